//! Read-only chain access used by the pipeline.
//!
//! The pipeline never talks to a node directly. Everything it needs from the ledger goes through
//! [`ChainState`], so tests can script registrations, cache contents and simulation results.

pub mod node;

use alloy_primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use hybrid_compute_types::{BlockContext, Operation};

use crate::errors::ChainError;

/// Result of simulating one operation against a block (plus any prefix operations).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SimulationOutcome {
    /// Whether the operation's execution phase completed without reverting.
    pub success: bool,
    /// Revert data of the execution phase, or of the EntryPoint when validation failed.
    pub revert_data: Bytes,
    /// Set when the EntryPoint rejected the operation before execution (`FailedOp`).
    pub validation_error: Option<String>,
    pub verification_gas: U256,
    pub call_gas: U256,
    pub block: BlockContext,
}

impl SimulationOutcome {
    pub fn gas_used(&self) -> U256 {
        self.verification_gas.saturating_add(self.call_gas)
    }
}

/// Raw `RegisteredCallers(account)` row, before validation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawRegistration {
    pub signer: Address,
    pub url: String,
}

#[async_trait]
pub trait ChainState: Send + Sync + 'static {
    async fn latest_block(&self) -> Result<BlockContext, ChainError>;

    async fn registered_caller(&self, account: Address, block: &BlockContext) -> Result<RawRegistration, ChainError>;

    /// Simulate `op` with the effects of `prefix` applied first.
    ///
    /// Only cache writes in `prefix` are required to take effect.
    async fn simulate(
        &self,
        prefix: &[Operation],
        op: &Operation,
        block: &BlockContext,
    ) -> Result<SimulationOutcome, ChainError>;

    /// EntryPoint nonce (key 0) of `account` at the latest block.
    async fn nonce(&self, account: Address) -> Result<U256, ChainError>;
}
