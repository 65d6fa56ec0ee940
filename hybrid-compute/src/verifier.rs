use alloy_primitives::Address;
use hybrid_compute_types::{response_signing_hash, ComputeRequest, ComputeResponse, HcErrorCode, Registration};
use tracing::error;

use crate::{abi::ResponsePayload, errors::VerificationError, utils::crypto::recover_address};

/// Check a service response against the request and the registration it was resolved from.
pub fn verify(
    request: &ComputeRequest,
    response: &ComputeResponse,
    registration: &Registration,
) -> Result<ResponsePayload, VerificationError> {
    verify_signed_by(request, response, registration.signer).inspect_err(|err| {
        error!(request_id = %request.request_id, account = %request.account, %err, "response rejected");
    })
}

/// Same checks as [`verify`] with an explicit expected signer.
///
/// Synthetic responses are checked against the system signer this way.
pub fn verify_signed_by(
    request: &ComputeRequest,
    response: &ComputeResponse,
    expected: Address,
) -> Result<ResponsePayload, VerificationError> {
    let digest = response_signing_hash(request.request_id, &response.payload);
    let recovered = recover_address(digest, &response.signature)
        .map_err(|e| VerificationError::SignatureInvalid(e.to_string()))?;
    if recovered != expected {
        return Err(VerificationError::SignerMismatch { expected, recovered });
    }

    let payload = ResponsePayload::decode(&response.payload)
        .map_err(|e| VerificationError::ParameterMismatch(format!("payload does not decode: {e}")))?;
    if payload.request_id != request.request_id {
        return Err(VerificationError::ParameterMismatch(format!(
            "payload is for request {}, expected {}",
            payload.request_id, request.request_id
        )));
    }

    let code = HcErrorCode::try_from(payload.error_code)
        .map_err(|c| VerificationError::ParameterMismatch(format!("unknown error code {c}")))?;
    if response.success != (code == HcErrorCode::None) {
        return Err(VerificationError::ParameterMismatch(format!(
            "success flag {} disagrees with error code {code:?}",
            response.success
        )));
    }
    if response.success && (payload.result.is_empty() || payload.result.len() % 32 != 0) {
        return Err(VerificationError::ParameterMismatch(format!(
            "result of {} bytes is not a whole number of words",
            payload.result.len()
        )));
    }
    Ok(payload)
}
