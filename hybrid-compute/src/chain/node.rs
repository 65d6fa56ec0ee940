//! [`ChainState`] over an ethers JSON-RPC provider.

use alloy_primitives::{aliases::U192, keccak256, Address, Bytes, B256, U256};
use alloy_sol_types::{SolCall, SolError};
use async_trait::async_trait;
use ethers::{
    providers::{spoof, Http, Middleware, Provider, ProviderError, RawCall, RpcError},
    types::{
        transaction::eip2718::TypedTransaction, BlockId, BlockNumber, Bytes as EthBytes, TransactionRequest,
        H160, H256, U256 as EthU256, U64,
    },
};
use hybrid_compute_types::{BlockContext, Operation};
use tracing::debug;

use super::{ChainState, RawRegistration, SimulationOutcome};
use crate::{
    abi::{
        decode_cache_write,
        interfaces::{IEntryPoint, IHCHelper},
        to_sol_operation,
    },
    config::HcConfig,
    errors::{ChainError, ConfigError},
};

/// Gas cap for simulation calls.
const SIMULATION_GAS: u64 = 30_000_000;
/// Balance spoofed onto the simulated sender so prefund checks never fail.
const SPOOFED_BALANCE: u128 = 1_000_000_000_000_000_000_000_000;
/// Storage slot of `NonceManager.nonceSequenceNumber` in EntryPoint v0.6.
const NONCE_SEQUENCE_SLOT: u64 = 1;

pub struct EthersChain {
    provider: Provider<Http>,
    entry_point: Address,
    helper: Address,
    system_account: Address,
    cache_slot: u64,
}

impl EthersChain {
    pub fn new(config: &HcConfig) -> Result<Self, ConfigError> {
        let provider = Provider::<Http>::try_from(config.node_url.as_str())
            .map_err(|e| ConfigError::Invalid(format!("node_url: {e}")))?;
        Ok(Self {
            provider,
            entry_point: config.entry_point,
            helper: config.helper_address,
            system_account: config.system_account,
            cache_slot: config.response_cache_slot,
        })
    }

    async fn read(&self, to: Address, data: Vec<u8>, block: &BlockContext) -> Result<Bytes, ChainError> {
        let tx: TypedTransaction = TransactionRequest::new().to(h160(to)).data(EthBytes::from(data)).into();
        let out = self
            .provider
            .call(&tx, Some(block_id(block)))
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        Ok(Bytes::from(out.to_vec()))
    }

    /// State override applying every cache write in `prefix` to the helper's storage.
    ///
    /// Injected operations queued behind unsubmitted ones carry nonces the chain has not reached
    /// yet, so the system account's nonce is pinned to the simulated operation's.
    fn prefix_state(&self, prefix: &[Operation], op: &Operation) -> spoof::State {
        let mut state = spoof::State::default();
        state.account(h160(op.sender)).balance(EthU256::from(SPOOFED_BALANCE));
        if op.sender == self.system_account {
            let (key, value) = nonce_storage_write(op.sender, op.nonce);
            state.account(h160(self.entry_point)).store(h256(key), h256(value));
        }
        for op in prefix {
            let Some((request_id, payload)) = decode_cache_write(&op.call_data, self.helper) else {
                continue;
            };
            let account = state.account(h160(self.helper));
            for (key, value) in cache_storage_writes(self.cache_slot, request_id, &payload) {
                account.store(h256(key), h256(value));
            }
        }
        state
    }
}

#[async_trait]
impl ChainState for EthersChain {
    async fn latest_block(&self) -> Result<BlockContext, ChainError> {
        let block = self
            .provider
            .get_block(BlockNumber::Latest)
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?
            .ok_or_else(|| ChainError::Decode("node has no latest block".into()))?;
        let number = block
            .number
            .ok_or_else(|| ChainError::Decode("latest block has no number".into()))?;
        Ok(BlockContext {
            number: number.as_u64(),
            hash: block.hash.map(|h| B256::from(h.0)).unwrap_or_default(),
            timestamp: block.timestamp.low_u64(),
        })
    }

    async fn registered_caller(&self, account: Address, block: &BlockContext) -> Result<RawRegistration, ChainError> {
        let data = IHCHelper::RegisteredCallersCall { account }.abi_encode();
        let out = self.read(self.helper, data, block).await?;
        let row = IHCHelper::RegisteredCallersCall::abi_decode_returns(&out, true)
            .map_err(|e| ChainError::Decode(e.to_string()))?;
        Ok(RawRegistration {
            signer: row.signer,
            url: row.url,
        })
    }

    async fn simulate(
        &self,
        prefix: &[Operation],
        op: &Operation,
        block: &BlockContext,
    ) -> Result<SimulationOutcome, ChainError> {
        let state = self.prefix_state(prefix, op);
        let at = block_id(block);

        // A single fee value makes `paid / price` exact.
        let price = op.max_fee_per_gas.max(U256::from(1u64));
        let mut sim_op = to_sol_operation(op);
        sim_op.maxFeePerGas = price;
        sim_op.maxPriorityFeePerGas = price;
        let data = IEntryPoint::simulateHandleOpCall {
            op: sim_op,
            target: Address::ZERO,
            targetCallData: Bytes::new(),
        }
        .abi_encode();
        let tx: TypedTransaction = TransactionRequest::new()
            .to(h160(self.entry_point))
            .gas(SIMULATION_GAS)
            .data(EthBytes::from(data))
            .into();
        let err = match self.provider.call_raw(&tx).block(at).state(&state).await {
            Ok(_) => return Err(ChainError::Decode("simulateHandleOp returned instead of reverting".into())),
            Err(err) => err,
        };
        let revert = revert_bytes(&err).ok_or_else(|| ChainError::Transport(err.to_string()))?;

        let result = match IEntryPoint::ExecutionResult::abi_decode(&revert, true) {
            Ok(result) => result,
            Err(_) => {
                let reason = match IEntryPoint::FailedOp::abi_decode(&revert, true) {
                    Ok(failed) => failed.reason,
                    Err(_) => format!("unrecognised simulation revert 0x{}", hex::encode(&revert)),
                };
                debug!(sender = %op.sender, %reason, "validation failed in simulation");
                return Ok(SimulationOutcome {
                    success: false,
                    revert_data: revert,
                    validation_error: Some(reason),
                    block: *block,
                    ..Default::default()
                });
            }
        };
        let verification_gas = result.preOpGas.saturating_sub(op.pre_verification_gas);
        let call_gas = (result.paid / price).saturating_sub(result.preOpGas);

        // Execution phase on its own, to surface its revert data.
        let exec: TypedTransaction = TransactionRequest::new()
            .from(h160(self.entry_point))
            .to(h160(op.sender))
            .gas(SIMULATION_GAS)
            .data(EthBytes::from(op.call_data.to_vec()))
            .into();
        let (success, revert_data) = match self.provider.call_raw(&exec).block(at).state(&state).await {
            Ok(_) => (true, Bytes::new()),
            Err(err) => (
                false,
                revert_bytes(&err).ok_or_else(|| ChainError::Transport(err.to_string()))?,
            ),
        };

        Ok(SimulationOutcome {
            success,
            revert_data,
            validation_error: None,
            verification_gas,
            call_gas,
            block: *block,
        })
    }

    async fn nonce(&self, account: Address) -> Result<U256, ChainError> {
        let block = self.latest_block().await?;
        let data = IEntryPoint::getNonceCall {
            sender: account,
            key: U192::ZERO,
        }
        .abi_encode();
        let out = self.read(self.entry_point, data, &block).await?;
        let ret =
            IEntryPoint::getNonceCall::abi_decode_returns(&out, true).map_err(|e| ChainError::Decode(e.to_string()))?;
        Ok(ret.nonce)
    }
}

fn h160(addr: Address) -> H160 {
    H160::from(addr.into_array())
}

fn h256(word: B256) -> H256 {
    H256::from(word.0)
}

fn block_id(block: &BlockContext) -> BlockId {
    if block.hash.is_zero() {
        BlockId::Number(BlockNumber::Number(U64::from(block.number)))
    } else {
        BlockId::Hash(h256(block.hash))
    }
}

fn revert_bytes(err: &ProviderError) -> Option<Bytes> {
    let data = err.as_error_response()?.as_revert_data()?;
    Some(Bytes::from(data.to_vec()))
}

/// EntryPoint storage write that makes `nonce` the next valid nonce of `sender`.
///
/// `nonceSequenceNumber[sender][nonce >> 64] = nonce & (2^64 - 1)`.
pub fn nonce_storage_write(sender: Address, nonce: U256) -> (B256, B256) {
    let mut outer = [0u8; 64];
    outer[12..32].copy_from_slice(sender.as_slice());
    outer[32..].copy_from_slice(&U256::from(NONCE_SEQUENCE_SLOT).to_be_bytes::<32>());
    let inner_slot = keccak256(outer);

    let key = nonce >> 64usize;
    let sequence = nonce & U256::from(u64::MAX);
    let mut inner = [0u8; 64];
    inner[..32].copy_from_slice(&key.to_be_bytes::<32>());
    inner[32..].copy_from_slice(inner_slot.as_slice());
    (keccak256(inner), B256::from(sequence.to_be_bytes::<32>()))
}

/// Storage writes that place `payload` at `mapping(bytes32 => bytes)[request_id]`, where the
/// mapping sits at `slot_index`.
///
/// Follows the Solidity layout: values under 32 bytes share the slot with `len * 2`, longer
/// values store `len * 2 + 1` in the slot and the data from `keccak256(slot)` onwards.
pub fn cache_storage_writes(slot_index: u64, request_id: B256, payload: &[u8]) -> Vec<(B256, B256)> {
    let mut key = [0u8; 64];
    key[..32].copy_from_slice(request_id.as_slice());
    key[32..].copy_from_slice(&U256::from(slot_index).to_be_bytes::<32>());
    let slot = keccak256(key);

    let len = payload.len();
    if len < 32 {
        let mut word = [0u8; 32];
        word[..len].copy_from_slice(payload);
        word[31] = (len * 2) as u8;
        return vec![(slot, B256::from(word))];
    }

    let mut writes = Vec::with_capacity(1 + len.div_ceil(32));
    writes.push((slot, B256::from(U256::from(len * 2 + 1).to_be_bytes::<32>())));
    let base = U256::from_be_bytes(keccak256(slot).0);
    for (i, chunk) in payload.chunks(32).enumerate() {
        let mut word = [0u8; 32];
        word[..chunk.len()].copy_from_slice(chunk);
        let at = base.wrapping_add(U256::from(i));
        writes.push((B256::from(at.to_be_bytes::<32>()), B256::from(word)));
    }
    writes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_values_share_the_slot_with_their_length() {
        let writes = cache_storage_writes(1, B256::repeat_byte(0xaa), b"abc");
        assert_eq!(writes.len(), 1);
        let word = writes[0].1;
        assert_eq!(&word[..3], b"abc");
        assert_eq!(word[31], 6);
    }

    #[test]
    fn long_values_spill_into_hashed_slots() {
        let payload = vec![0x5au8; 33];
        let writes = cache_storage_writes(1, B256::repeat_byte(0xaa), &payload);
        assert_eq!(writes.len(), 3);
        assert_eq!(U256::from_be_bytes(writes[0].1 .0), U256::from(67u64));

        let data_start = U256::from_be_bytes(keccak256(writes[0].0).0);
        assert_eq!(U256::from_be_bytes(writes[1].0 .0), data_start);
        assert_eq!(U256::from_be_bytes(writes[2].0 .0), data_start + U256::from(1u64));
        assert_eq!(writes[2].1[0], 0x5a);
        assert_eq!(writes[2].1[1], 0);
    }

    #[test]
    fn slot_depends_on_key_and_mapping_position() {
        let a = cache_storage_writes(1, B256::repeat_byte(1), b"x")[0].0;
        let b = cache_storage_writes(2, B256::repeat_byte(1), b"x")[0].0;
        let c = cache_storage_writes(1, B256::repeat_byte(2), b"x")[0].0;
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn nonce_write_splits_key_and_sequence() {
        let sender = Address::repeat_byte(0x5a);
        let nonce = (U256::from(3u64) << 64usize) | U256::from(9u64);
        let (slot, value) = nonce_storage_write(sender, nonce);
        assert_eq!(U256::from_be_bytes(value.0), U256::from(9u64));

        let (same_key_slot, _) = nonce_storage_write(sender, (U256::from(3u64) << 64usize) | U256::from(10u64));
        assert_eq!(slot, same_key_slot);
        let (other_key_slot, _) = nonce_storage_write(sender, U256::from(9u64));
        assert_ne!(slot, other_key_slot);
    }

    #[test]
    fn pinned_reads_prefer_the_block_hash() {
        let by_number = block_id(&BlockContext {
            number: 7,
            ..Default::default()
        });
        assert_eq!(by_number, BlockId::Number(BlockNumber::Number(U64::from(7u64))));
        let by_hash = block_id(&BlockContext {
            number: 7,
            hash: B256::repeat_byte(3),
            timestamp: 0,
        });
        assert_eq!(by_hash, BlockId::Hash(H256::repeat_byte(3)));
    }
}
