//! Immutable pipeline configuration, loaded once at process start.

use std::time::Duration;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::{abi::constants::*, errors::ConfigError};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HcConfig {
    pub chain_id: u64,
    /// Upstream node used for simulation and registry reads.
    pub node_url: String,
    pub entry_point: Address,
    /// Hybrid Compute helper (registry + response cache).
    pub helper_address: Address,
    /// Smart account that sends every injected cache-write operation.
    pub system_account: Address,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_fallback_grace_ms")]
    pub fallback_grace_ms: u64,
    /// Lifetime of a finished pair that has not been submitted.
    #[serde(default = "default_pending_ttl_ms")]
    pub pending_ttl_ms: u64,
    #[serde(default = "default_response_cache_slot")]
    pub response_cache_slot: u64,
    #[serde(default)]
    pub offchain: OffchainConfig,
    #[serde(default)]
    pub injected: InjectedGasConfig,
    #[serde(default)]
    pub fees: FeeConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OffchainConfig {
    pub method: String,
    pub timeout_ms: u64,
    pub max_response_bytes: usize,
    pub max_payload_bytes: usize,
}

impl Default for OffchainConfig {
    fn default() -> Self {
        Self {
            method: DEFAULT_OFFCHAIN_METHOD.to_string(),
            timeout_ms: DEFAULT_OFFCHAIN_TIMEOUT_MS,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

impl OffchainConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Gas limits of the injected operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InjectedGasConfig {
    pub verification_gas_limit: u64,
    pub call_gas_limit: u64,
    pub pre_verification_gas: u64,
}

impl Default for InjectedGasConfig {
    fn default() -> Self {
        Self {
            verification_gas_limit: DEFAULT_INJECTED_VERIFICATION_GAS,
            call_gas_limit: DEFAULT_INJECTED_CALL_GAS,
            pre_verification_gas: DEFAULT_INJECTED_PRE_VERIFICATION_GAS,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeeConfig {
    /// Flat surcharge (gas units) per off-chain call. Pricing is not dynamic.
    pub flat_fee_gas: u64,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            flat_fee_gas: DEFAULT_FLAT_FEE_GAS,
        }
    }
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_fallback_grace_ms() -> u64 {
    DEFAULT_FALLBACK_GRACE_MS
}

fn default_pending_ttl_ms() -> u64 {
    DEFAULT_PENDING_TTL_MS
}

fn default_response_cache_slot() -> u64 {
    DEFAULT_RESPONSE_CACHE_SLOT
}

impl HcConfig {
    /// Config with default timeouts, limits and fees.
    pub fn new(
        chain_id: u64,
        node_url: impl Into<String>,
        entry_point: Address,
        helper_address: Address,
        system_account: Address,
    ) -> Self {
        Self {
            chain_id,
            node_url: node_url.into(),
            entry_point,
            helper_address,
            system_account,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            fallback_grace_ms: DEFAULT_FALLBACK_GRACE_MS,
            pending_ttl_ms: DEFAULT_PENDING_TTL_MS,
            response_cache_slot: DEFAULT_RESPONSE_CACHE_SLOT,
            offchain: OffchainConfig::default(),
            injected: InjectedGasConfig::default(),
            fees: FeeConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_url.trim().is_empty() {
            return Err(ConfigError::Invalid("node_url is empty".into()));
        }
        for (name, addr) in [
            ("entry_point", self.entry_point),
            ("helper_address", self.helper_address),
            ("system_account", self.system_account),
        ] {
            if addr == Address::ZERO {
                return Err(ConfigError::Invalid(format!("{name} is the zero address")));
            }
        }
        if self.request_timeout_ms == 0 || self.fallback_grace_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be non-zero".into()));
        }
        if self.pending_ttl_ms <= self.request_timeout_ms + self.fallback_grace_ms {
            return Err(ConfigError::Invalid(format!(
                "pending_ttl_ms ({}) must exceed request_timeout_ms + fallback_grace_ms",
                self.pending_ttl_ms
            )));
        }
        if self.offchain.timeout_ms == 0 || self.offchain.timeout_ms >= self.request_timeout_ms {
            return Err(ConfigError::Invalid(format!(
                "offchain.timeout_ms ({}) must be non-zero and below request_timeout_ms ({})",
                self.offchain.timeout_ms, self.request_timeout_ms
            )));
        }
        if self.offchain.method.trim().is_empty() {
            return Err(ConfigError::Invalid("offchain.method is empty".into()));
        }
        if self.offchain.max_response_bytes == 0
            || self.offchain.max_payload_bytes == 0
            || self.offchain.max_payload_bytes > self.offchain.max_response_bytes
        {
            return Err(ConfigError::Invalid(
                "offchain size limits must be non-zero and max_payload_bytes <= max_response_bytes".into(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn fallback_grace(&self) -> Duration {
        Duration::from_millis(self.fallback_grace_ms)
    }

    pub fn pending_ttl(&self) -> Duration {
        Duration::from_millis(self.pending_ttl_ms)
    }
}
