//! Shared types for the Hybrid Compute pipeline: user operations, compute requests/responses,
//! registrations, and the hashing rules both the bundler and the on-chain helper agree on.

pub mod hashing;
pub mod operation;
pub mod request;

pub use hashing::{derive_request_id, eth_message_hash, response_signing_hash, user_op_hash};
pub use operation::{BlockContext, GasEstimate, Operation};
pub use request::{ComputeRequest, ComputeResponse, HcErrorCode, Registration};
