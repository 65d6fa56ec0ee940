use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

/// ERC-4337 (EntryPoint v0.6) user operation.
///
/// `sender`, `nonce` and `call_data` are fixed by the originator. Only the gas fields may be
/// adjusted, and only before the account signs the final version.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub sender: Address,
    pub nonce: U256,
    #[serde(default)]
    pub init_code: Bytes,
    pub call_data: Bytes,
    #[serde(default)]
    pub call_gas_limit: U256,
    #[serde(default)]
    pub verification_gas_limit: U256,
    #[serde(default)]
    pub pre_verification_gas: U256,
    #[serde(default)]
    pub max_fee_per_gas: U256,
    #[serde(default)]
    pub max_priority_fee_per_gas: U256,
    #[serde(default)]
    pub paymaster_and_data: Bytes,
    #[serde(default)]
    pub signature: Bytes,
}

impl Operation {
    /// Copy of this operation with the gas fields replaced by `estimate`.
    ///
    /// The signature is kept as-is; it no longer covers the new gas values and the account has
    /// to re-sign.
    pub fn with_gas(&self, estimate: &GasEstimate) -> Self {
        Self {
            pre_verification_gas: estimate.pre_verification_gas,
            verification_gas_limit: estimate.verification_gas_limit,
            call_gas_limit: estimate.call_gas_limit,
            ..self.clone()
        }
    }

    /// Sum of all three gas allowances.
    pub fn total_gas_limit(&self) -> U256 {
        self.pre_verification_gas
            .saturating_add(self.verification_gas_limit)
            .saturating_add(self.call_gas_limit)
    }
}

/// Gas fields returned to the submitter by `eth_estimateUserOperationGas`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasEstimate {
    pub pre_verification_gas: U256,
    pub verification_gas_limit: U256,
    pub call_gas_limit: U256,
}

/// Block a simulation or registry read is pinned to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockContext {
    pub number: u64,
    pub hash: B256,
    pub timestamp: u64,
}
