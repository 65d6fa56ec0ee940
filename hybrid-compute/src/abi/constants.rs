//! Deployment defaults for the Hybrid Compute helper and the off-chain JSON-RPC contract.

/// JSON-RPC method the off-chain service exposes.
pub const DEFAULT_OFFCHAIN_METHOD: &str = "hc_offchainCall";

pub const DEFAULT_OFFCHAIN_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 64 * 1024;
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 16 * 1024;

/// Whole-request budget (resolve + off-chain call + population + re-estimation).
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
/// Extra budget granted to the synthetic error path after an off-chain failure.
pub const DEFAULT_FALLBACK_GRACE_MS: u64 = 3_000;
/// How long a finished pair may wait for its re-signed original and a bundle before its system
/// nonce is given back.
pub const DEFAULT_PENDING_TTL_MS: u64 = 120_000;

// Gas limits for the injected `PutResponse` operation.
pub const DEFAULT_INJECTED_VERIFICATION_GAS: u64 = 120_000;
pub const DEFAULT_INJECTED_CALL_GAS: u64 = 250_000;
pub const DEFAULT_INJECTED_PRE_VERIFICATION_GAS: u64 = 60_000;

/// Flat surcharge added to the original operation per off-chain call.
pub const DEFAULT_FLAT_FEE_GAS: u64 = 25_000;

/// Storage slot of `mapping(bytes32 => bytes) ResponseCache` in the helper.
pub const DEFAULT_RESPONSE_CACHE_SLOT: u64 = 1;
