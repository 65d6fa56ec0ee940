use alloy_primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};

use crate::operation::BlockContext;

/// One interception instance, extracted from a simulation marker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeRequest {
    /// Hybrid account whose contract emitted the marker (the registry key).
    pub account: Address,
    pub request_id: B256,
    /// Off-chain call parameters, selector first.
    pub call_params: Bytes,
    /// Timestamp of the block the detecting simulation ran against.
    pub created_at: u64,
}

impl ComputeRequest {
    /// 4-byte function selector the off-chain service dispatches on.
    pub fn selector(&self) -> Option<[u8; 4]> {
        let head = self.call_params.get(..4)?;
        let mut sel = [0u8; 4];
        sel.copy_from_slice(head);
        Some(sel)
    }
}

/// Response produced by the off-chain service (or, for transient failures, a synthetic error
/// response signed by the system signer).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeResponse {
    pub success: bool,
    /// ABI-encoded `(bytes32 requestId, uint32 errorCode, bytes result)`.
    pub payload: Bytes,
    /// Signer the response was requested from. Informational only: verification compares the
    /// address recovered from `signature` with the registration.
    pub signer: Address,
    /// 65-byte `r || s || v` signature over `response_signing_hash(requestId, payload)`.
    pub signature: Bytes,
}

/// Point-in-time snapshot of an account's registration on the helper contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub account: Address,
    pub endpoint: String,
    pub signer: Address,
    /// Block the mapping was read at.
    pub block: BlockContext,
}

/// Error codes carried in the response payload's `errorCode` field.
///
/// Account contracts branch on these; keep the numbering stable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum HcErrorCode {
    None = 0,
    Other = 1,
    Timeout = 2,
    Unreachable = 3,
    Malformed = 4,
    RemoteFailure = 5,
}

impl HcErrorCode {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for HcErrorCode {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        use HcErrorCode::*;
        let code = match value {
            0 => None,
            1 => Other,
            2 => Timeout,
            3 => Unreachable,
            4 => Malformed,
            5 => RemoteFailure,
            other => return Err(other),
        };
        Ok(code)
    }
}
