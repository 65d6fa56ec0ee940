//! Hybrid Compute support for an ERC-4337 (EntryPoint v0.6) bundler.
//!
//! Operations whose simulation reverts with `HybridComputeRequired` need an off-chain result
//! before they can execute. [`HybridComputePipeline`] fetches and verifies that result, builds a
//! system-account operation that writes it into the helper contract's response cache, and
//! re-prices the original so it pays for the write. The two operations are bundled as a
//! [`PendingPair`], cache write first.

pub mod abi;
pub mod chain;
pub mod config;
pub mod detector;
pub mod errors;
pub mod fees;
pub mod lifecycle;
pub mod offchain;
pub mod pipeline;
pub mod populator;
pub mod registry;
pub mod signer;
pub mod utils;
pub mod verifier;

#[cfg(test)]
mod test_support;

pub use chain::{node::EthersChain, ChainState, SimulationOutcome};
pub use config::HcConfig;
pub use errors::{AttachError, ErrorClass, PipelineError, RpcErrorObject};
pub use lifecycle::{FailureReason, RequestLifecycle, RequestState};
pub use offchain::{HttpOffchainClient, OffchainClient};
pub use pipeline::{ActiveRequest, CandidateOutcome, HybridComputePipeline, PairedOutcome};
pub use populator::bundle::{order_pairs_by_nonce, verify_pair_ordering, AssembledBundle, BundleAssembler, BundleItem, PendingPair};
pub use signer::{LocalSigner, Signer};
