use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use alloy_primitives::Address;
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use hybrid_compute::{
    CandidateOutcome, EthersChain, HcConfig, HttpOffchainClient, HybridComputePipeline, LocalSigner,
};
use hybrid_compute_types::Operation;
use serde_json::{json, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Operator tooling for the Hybrid Compute pipeline.
///
/// Runs single operations through the same code path the bundler uses, against a live node, and
/// prints or writes the result as JSON.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// JSON pipeline configuration. When set, the node/contract flags below are ignored.
    #[arg(long, env = "HC_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "RPC_URL", required_unless_present = "config")]
    rpc_url: Option<String>,

    #[arg(long, env = "CHAIN_ID", required_unless_present = "config")]
    chain_id: Option<u64>,

    #[arg(long, env = "ENTRY_POINTS", required_unless_present = "config")]
    entry_point: Option<Address>,

    /// Hybrid Compute helper contract.
    #[arg(long, env = "HC_HELPER_ADDR", required_unless_present = "config")]
    helper: Option<Address>,

    /// Smart account that sends cache writes.
    #[arg(long, env = "HC_SYS_ACCOUNT", required_unless_present = "config")]
    system_account: Option<Address>,

    /// Path to a file containing the system signer's private key.
    #[arg(long, env = "SYS_PRIVKEY_PATH", conflicts_with = "sys_privkey")]
    sys_privkey_path: Option<PathBuf>,

    /// System signer's private key (hex string, 0x...).
    #[arg(long, env = "SYS_PRIVKEY", conflicts_with = "sys_privkey_path")]
    sys_privkey: Option<String>,

    /// Overall request deadline in milliseconds.
    #[arg(long, env = "HC_REQUEST_TIMEOUT_MS")]
    request_timeout_ms: Option<u64>,

    /// Per-call deadline for the off-chain service in milliseconds.
    #[arg(long, env = "HC_OFFCHAIN_TIMEOUT_MS")]
    offchain_timeout_ms: Option<u64>,

    /// Flat surcharge added to the original's preVerificationGas.
    #[arg(long, env = "HC_FLAT_FEE_GAS")]
    flat_fee_gas: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print an account's current registration.
    Resolve {
        #[arg(long)]
        account: Address,
    },
    /// Run an operation through detection, the off-chain call, population and re-estimation.
    Estimate {
        /// JSON file holding the user operation.
        #[arg(long)]
        op: PathBuf,

        /// Write the result here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let signer = Arc::new(load_system_signer(&cli)?);
    let chain = Arc::new(EthersChain::new(&config)?);
    let offchain = Arc::new(HttpOffchainClient::new(&config.offchain)?);
    let pipeline = HybridComputePipeline::new(config, chain, offchain, signer)?;

    match cli.command {
        Command::Resolve { account } => {
            let registration = pipeline.resolve(account).await?;
            println!("{}", serde_json::to_string_pretty(&registration)?);
        }
        Command::Estimate { op: op_path, out } => {
            let raw = fs::read_to_string(&op_path).with_context(|| format!("failed reading {}", op_path.display()))?;
            let op: Operation = serde_json::from_str(&raw)
                .with_context(|| format!("failed parsing operation in {}", op_path.display()))?;
            let report = estimate(&pipeline, op).await;
            match out {
                Some(path) => {
                    write_json_atomic(&path, &report)?;
                    info!(path = %path.display(), "estimate written");
                }
                None => println!("{}", serde_json::to_string_pretty(&report)?),
            }
        }
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<HcConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let raw = fs::read_to_string(path).with_context(|| format!("failed reading {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("failed parsing config in {}", path.display()))?
        }
        None => {
            let missing = |name: &str| anyhow!("missing --{name} (or pass --config)");
            HcConfig::new(
                cli.chain_id.ok_or_else(|| missing("chain-id"))?,
                cli.rpc_url.clone().ok_or_else(|| missing("rpc-url"))?,
                cli.entry_point.ok_or_else(|| missing("entry-point"))?,
                cli.helper.ok_or_else(|| missing("helper"))?,
                cli.system_account.ok_or_else(|| missing("system-account"))?,
            )
        }
    };
    if let Some(ms) = cli.request_timeout_ms {
        config.request_timeout_ms = ms;
    }
    if let Some(ms) = cli.offchain_timeout_ms {
        config.offchain.timeout_ms = ms;
    }
    if let Some(gas) = cli.flat_fee_gas {
        config.fees.flat_fee_gas = gas;
    }
    config.validate()?;
    Ok(config)
}

fn load_system_signer(cli: &Cli) -> Result<LocalSigner> {
    let key = if let Some(ref path) = cli.sys_privkey_path {
        fs::read_to_string(path).with_context(|| format!("failed reading {}", path.display()))?
    } else if let Some(ref key) = cli.sys_privkey {
        key.clone()
    } else {
        return Err(anyhow!(
            "missing system signer key: provide --sys-privkey-path or --sys-privkey (or set SYS_PRIVKEY_PATH/SYS_PRIVKEY)"
        ));
    };
    Ok(LocalSigner::from_hex(key.trim())?)
}

async fn estimate(
    pipeline: &HybridComputePipeline<EthersChain, HttpOffchainClient, LocalSigner>,
    op: Operation,
) -> Value {
    let now = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string());
    let sender = op.sender;

    let mut report = match pipeline.process(op).await {
        Ok(CandidateOutcome::Passthrough(op)) => json!({
            "outcome": "passthrough",
            "ops": [op],
        }),
        Ok(CandidateOutcome::Paired(paired)) => json!({
            "outcome": "paired",
            "requestId": paired.pair.request_id(),
            "fallback": paired.pair.fallback(),
            "lifecycle": paired.lifecycle.history(),
            "fee": paired.fee,
            "totalGasLimit": paired.pair.original().total_gas_limit(),
            "ops": paired.pair.ops(),
        }),
        Err(err) => json!({
            "outcome": "rejected",
            "class": err.class(),
            "error": err.rpc_error(),
        }),
    };
    report["sender"] = json!(sender);
    report["chainId"] = json!(pipeline.config().chain_id);
    report["estimatedAt"] = json!(now);
    report
}

fn write_json_atomic(path: &Path, value: &Value) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    if !parent.as_os_str().is_empty() && !parent.exists() {
        fs::create_dir_all(parent).with_context(|| format!("failed creating directory {}", parent.display()))?;
    }

    let serialised = serde_json::to_string_pretty(value).context("failed serialising estimate JSON")?;
    let tmp_path = tmp_path_for(path);
    fs::write(&tmp_path, serialised.as_bytes())
        .with_context(|| format!("failed writing temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("failed replacing {}", path.display()))?;
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["hc-operator"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).expect("parses")
    }

    #[test]
    fn flags_build_a_config() {
        let cli = cli(&[
            "--rpc-url",
            "http://127.0.0.1:8545",
            "--chain-id",
            "901",
            "--entry-point",
            "0x5ff137d4b0fdcd49dca30c7cf57e578a026d2789",
            "--helper",
            "0x00000000000000000000000000000000000000c1",
            "--system-account",
            "0x2a9099a58e0830a4ab418c2a19710022466f1ce7",
            "--flat-fee-gas",
            "1000",
            "resolve",
            "--account",
            "0x00000000000000000000000000000000000000aa",
        ]);
        let config = load_config(&cli).expect("config");
        assert_eq!(config.chain_id, 901);
        assert_eq!(config.fees.flat_fee_gas, 1000);
        assert!(matches!(cli.command, Command::Resolve { .. }));
    }

    #[test]
    fn both_key_sources_conflict() {
        let parsed = Cli::try_parse_from([
            "hc-operator",
            "--config",
            "hc.json",
            "--sys-privkey",
            "0x01",
            "--sys-privkey-path",
            "key.txt",
            "resolve",
            "--account",
            "0x00000000000000000000000000000000000000aa",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn tmp_path_sits_next_to_target() {
        assert_eq!(tmp_path_for(Path::new("out/estimate.json")), PathBuf::from("out/estimate.json.tmp"));
    }
}
