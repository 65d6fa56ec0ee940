//! ABI bindings and the small codecs built on them.
//!
//! Everything that encodes or decodes helper calls lives here so the chain backend, the bundle
//! checks, and the test doubles agree on one layout.

pub mod constants;
pub mod interfaces;

use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::{SolCall, SolValue};
use hybrid_compute_types::{HcErrorCode, Operation};

use interfaces::{IHCHelper, ISimpleAccount, UserOperation};

/// Response payload stored in the cache and decoded by the account contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponsePayload {
    pub request_id: B256,
    pub error_code: u32,
    pub result: Bytes,
}

impl ResponsePayload {
    pub fn new(request_id: B256, code: HcErrorCode, result: Bytes) -> Self {
        Self {
            request_id,
            error_code: code.as_u32(),
            result,
        }
    }

    /// `abi.encode(bytes32 requestId, uint32 errorCode, bytes result)`.
    pub fn encode(&self) -> Bytes {
        (self.request_id, self.error_code, self.result.clone())
            .abi_encode_params()
            .into()
    }

    pub fn decode(data: &[u8]) -> Result<Self, alloy_sol_types::Error> {
        let (request_id, error_code, result) =
            <(B256, u32, Bytes)>::abi_decode_params(data, true)?;
        Ok(Self {
            request_id,
            error_code,
            result,
        })
    }
}

/// Calldata for the system account: `execute(helper, 0, PutResponse(requestId, payload, signature))`.
pub fn encode_cache_write(helper: Address, request_id: B256, payload: Bytes, signature: Bytes) -> Bytes {
    let put = IHCHelper::PutResponseCall {
        requestId: request_id,
        payload,
        signature,
    }
    .abi_encode();
    ISimpleAccount::executeCall {
        dest: helper,
        value: U256::ZERO,
        func: put.into(),
    }
    .abi_encode()
    .into()
}

/// Inverse of [`encode_cache_write`]; `None` if `call_data` is not a cache write to `helper`.
pub fn decode_cache_write(call_data: &[u8], helper: Address) -> Option<(B256, Bytes)> {
    let exec = ISimpleAccount::executeCall::abi_decode(call_data, true).ok()?;
    if exec.dest != helper || !exec.value.is_zero() {
        return None;
    }
    let put = IHCHelper::PutResponseCall::abi_decode(&exec.func, true).ok()?;
    Some((put.requestId, put.payload))
}

/// ABI form of an operation, for `simulateHandleOp`.
pub fn to_sol_operation(op: &Operation) -> UserOperation {
    UserOperation {
        sender: op.sender,
        nonce: op.nonce,
        initCode: op.init_code.clone(),
        callData: op.call_data.clone(),
        callGasLimit: op.call_gas_limit,
        verificationGasLimit: op.verification_gas_limit,
        preVerificationGas: op.pre_verification_gas,
        maxFeePerGas: op.max_fee_per_gas,
        maxPriorityFeePerGas: op.max_priority_fee_per_gas,
        paymasterAndData: op.paymaster_and_data.clone(),
        signature: op.signature.clone(),
    }
}
