use alloy_primitives::{Address, B256, U256};
use hybrid_compute_types::HcErrorCode;
use serde::Serialize;
use thiserror::Error;

use crate::{
    lifecycle::{FailureReason, RequestState, TransitionError},
    populator::bundle::OrderingError,
};

/// Configuration or startup failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("invalid pattern: {0}")]
    Pattern(String),
    #[error("http client: {0}")]
    HttpClient(String),
}

/// Upstream node failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("node transport: {0}")]
    Transport(String),
    #[error("node returned undecodable data: {0}")]
    Decode(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignerError {
    #[error("invalid signing key")]
    InvalidKey,
    #[error("signing failed: {0}")]
    Signing(String),
}

/// Marker present but unusable. The operation is rejected rather than passed through.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DetectionError {
    #[error("marker payload is undecodable: {0}")]
    Undecodable(String),
    #[error("marker names the zero account")]
    ZeroAccount,
    #[error("call parameters carry no function selector")]
    MissingSelector,
    #[error("marker request id {embedded} does not match derived id {derived}")]
    RequestIdMismatch { embedded: B256, derived: B256 },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("account {account} is not registered: {reason}")]
    NotRegistered { account: Address, reason: String },
    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Off-chain call failure. All variants are transient.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("off-chain call timed out")]
    Timeout,
    #[error("off-chain endpoint unreachable: {0}")]
    Unreachable(String),
    #[error("off-chain response malformed: {0}")]
    Malformed(String),
}

impl RequestError {
    /// Error code written into the synthetic response payload.
    pub fn error_code(&self) -> HcErrorCode {
        match self {
            RequestError::Timeout => HcErrorCode::Timeout,
            RequestError::Unreachable(_) => HcErrorCode::Unreachable,
            RequestError::Malformed(_) => HcErrorCode::Malformed,
        }
    }

    pub fn failure_reason(&self) -> FailureReason {
        match self {
            RequestError::Timeout => FailureReason::Timeout,
            RequestError::Unreachable(_) => FailureReason::Unreachable,
            RequestError::Malformed(_) => FailureReason::Malformed,
        }
    }
}

/// Response integrity failure. Never cached.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerificationError {
    #[error("response signed by {recovered}, expected {expected}")]
    SignerMismatch { expected: Address, recovered: Address },
    #[error("response signature invalid: {0}")]
    SignatureInvalid(String),
    #[error("response parameters mismatch: {0}")]
    ParameterMismatch(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PopulationError {
    #[error("injected operation simulation failed: {0}")]
    SimulationFailed(String),
    #[error("request {0} already has a cache entry or a pending write")]
    DuplicateRequest(B256),
    #[error(transparent)]
    Signer(#[from] SignerError),
    #[error(transparent)]
    Chain(#[from] ChainError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReestimationError {
    #[error("re-simulation failed: {0}")]
    SimulationFailed(String),
    #[error("request {0} is still unresolved after population")]
    StillPending(B256),
    #[error("gas estimate overflows")]
    Overflow,
}

/// A re-signed original that cannot replace the one in its pending pair.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AttachError {
    #[error("no pending pair for sender {sender} nonce {nonce}")]
    UnknownOperation { sender: Address, nonce: U256 },
    #[error("signed operation does not match its pending pair: {0}")]
    Mismatch(&'static str),
}

/// Broad category used by callers to decide between rejecting and retrying.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorClass {
    Configuration,
    Transient,
    Integrity,
    Internal,
}

/// JSON-RPC error object surfaced to the submitter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

pub const RPC_REJECTED: i64 = -32500;
pub const RPC_INVALID_PARAMS: i64 = -32602;
pub const RPC_INTERNAL: i64 = -32603;

/// Anything that ends a request without a pair.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error(transparent)]
    Detection(#[from] DetectionError),
    #[error("account {account} is not registered: {reason}")]
    NotRegistered { account: Address, reason: String },
    #[error(transparent)]
    Verification(#[from] VerificationError),
    #[error(transparent)]
    Population(#[from] PopulationError),
    #[error(transparent)]
    Reestimation(#[from] ReestimationError),
    #[error("request timed out while {stage:?}")]
    Timeout { stage: RequestState },
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Signer(#[from] SignerError),
    #[error(transparent)]
    Lifecycle(#[from] TransitionError),
    #[error(transparent)]
    Ordering(#[from] OrderingError),
    #[error(transparent)]
    Attach(#[from] AttachError),
}

impl From<RegistryError> for PipelineError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotRegistered { account, reason } => PipelineError::NotRegistered { account, reason },
            RegistryError::Chain(e) => PipelineError::Chain(e),
        }
    }
}

impl PipelineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            PipelineError::Detection(_) | PipelineError::NotRegistered { .. } | PipelineError::Attach(_) => {
                ErrorClass::Configuration
            }
            PipelineError::Timeout { .. } | PipelineError::Chain(_) => ErrorClass::Transient,
            PipelineError::Verification(_) => ErrorClass::Integrity,
            PipelineError::Population(PopulationError::DuplicateRequest(_)) => ErrorClass::Integrity,
            PipelineError::Population(PopulationError::Chain(_)) => ErrorClass::Transient,
            PipelineError::Population(_)
            | PipelineError::Reestimation(_)
            | PipelineError::Signer(_)
            | PipelineError::Lifecycle(_)
            | PipelineError::Ordering(_) => ErrorClass::Internal,
        }
    }

    /// Terminal reason recorded in the request lifecycle.
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            PipelineError::Detection(_) => FailureReason::Detection,
            PipelineError::NotRegistered { .. } => FailureReason::NotRegistered,
            PipelineError::Verification(VerificationError::SignerMismatch { .. }) => FailureReason::SignerMismatch,
            PipelineError::Verification(VerificationError::SignatureInvalid(_)) => FailureReason::SignatureInvalid,
            PipelineError::Verification(VerificationError::ParameterMismatch(_)) => FailureReason::ParameterMismatch,
            PipelineError::Population(PopulationError::DuplicateRequest(_)) => FailureReason::DuplicateRequest,
            PipelineError::Population(_) => FailureReason::SimulationFailed,
            PipelineError::Reestimation(_) => FailureReason::Reestimation,
            PipelineError::Timeout { .. } => FailureReason::Timeout,
            PipelineError::Chain(_)
            | PipelineError::Signer(_)
            | PipelineError::Lifecycle(_)
            | PipelineError::Ordering(_)
            | PipelineError::Attach(_) => FailureReason::Internal,
        }
    }

    pub fn rpc_error(&self) -> RpcErrorObject {
        let code = match self {
            PipelineError::NotRegistered { .. } | PipelineError::Attach(_) => RPC_INVALID_PARAMS,
            _ => match self.class() {
                ErrorClass::Internal => RPC_INTERNAL,
                _ => RPC_REJECTED,
            },
        };
        RpcErrorObject {
            code,
            message: self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_registered_maps_to_invalid_params() {
        let err: PipelineError = RegistryError::NotRegistered {
            account: Address::repeat_byte(1),
            reason: "zero signer".into(),
        }
        .into();
        assert_eq!(err.class(), ErrorClass::Configuration);
        assert_eq!(err.failure_reason(), FailureReason::NotRegistered);
        assert_eq!(err.rpc_error().code, RPC_INVALID_PARAMS);
    }

    #[test]
    fn integrity_failures_are_rejections() {
        let err = PipelineError::from(VerificationError::SignerMismatch {
            expected: Address::repeat_byte(1),
            recovered: Address::repeat_byte(2),
        });
        assert_eq!(err.class(), ErrorClass::Integrity);
        assert_eq!(err.failure_reason(), FailureReason::SignerMismatch);
        assert_eq!(err.rpc_error().code, RPC_REJECTED);
        assert!(err.rpc_error().message.contains("expected"));
    }

    #[test]
    fn attach_errors_are_invalid_params() {
        let err = PipelineError::from(AttachError::Mismatch("callData differs"));
        assert_eq!(err.class(), ErrorClass::Configuration);
        assert_eq!(err.rpc_error().code, RPC_INVALID_PARAMS);
    }

    #[test]
    fn transient_request_errors_carry_their_code() {
        assert_eq!(RequestError::Timeout.error_code(), HcErrorCode::Timeout);
        assert_eq!(RequestError::Unreachable("refused".into()).error_code(), HcErrorCode::Unreachable);
        assert_eq!(RequestError::Malformed("bad json".into()).failure_reason(), FailureReason::Malformed);
    }
}
