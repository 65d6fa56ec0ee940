//! Recognises the Hybrid Compute marker in a simulation outcome.

use alloy_primitives::Address;
use alloy_sol_types::SolError;
use hybrid_compute_types::{derive_request_id, ComputeRequest, Operation};

use crate::{abi::interfaces::HybridComputeRequired, chain::SimulationOutcome, errors::DetectionError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Interception {
    NotRequired,
    Required(ComputeRequest),
}

/// Inspect `outcome` (the simulation of `op`) for a pending off-chain call.
///
/// Reverts that do not carry the marker selector are left to the normal validation path.
pub fn detect(op: &Operation, outcome: &SimulationOutcome) -> Result<Interception, DetectionError> {
    if outcome.success || !outcome.revert_data.starts_with(&HybridComputeRequired::SELECTOR) {
        return Ok(Interception::NotRequired);
    }
    let marker = HybridComputeRequired::abi_decode(&outcome.revert_data, true)
        .map_err(|e| DetectionError::Undecodable(e.to_string()))?;

    if marker.account == Address::ZERO {
        return Err(DetectionError::ZeroAccount);
    }
    let request = ComputeRequest {
        account: marker.account,
        request_id: marker.requestId,
        call_params: marker.callParams,
        created_at: outcome.block.timestamp,
    };
    if request.selector().is_none() {
        return Err(DetectionError::MissingSelector);
    }
    let derived = derive_request_id(request.account, op.sender, op.nonce, &request.call_params);
    if derived != request.request_id {
        return Err(DetectionError::RequestIdMismatch {
            embedded: request.request_id,
            derived,
        });
    }

    Ok(Interception::Required(request))
}
