//! Signing capability used for system-account operations and synthetic responses.

use std::fmt;

use alloy_primitives::{Address, Bytes, B256};
use hybrid_compute_types::{response_signing_hash, ComputeResponse, HcErrorCode};
use k256::ecdsa::SigningKey;

use crate::{abi::ResponsePayload, errors::SignerError, utils::crypto::public_key_address};

/// Produces 65-byte `r || s || v` (v in {27, 28}) signatures over 32-byte digests.
pub trait Signer: Send + Sync {
    fn address(&self) -> Address;
    fn sign_hash(&self, digest: B256) -> Result<Bytes, SignerError>;
}

/// In-process secp256k1 key.
pub struct LocalSigner {
    key: SigningKey,
    address: Address,
}

impl LocalSigner {
    pub fn from_bytes(secret: &[u8]) -> Result<Self, SignerError> {
        let key = SigningKey::from_slice(secret).map_err(|_| SignerError::InvalidKey)?;
        let address = public_key_address(key.verifying_key());
        Ok(Self { key, address })
    }

    /// Accepts the key with or without a `0x` prefix, surrounding whitespace ignored.
    pub fn from_hex(secret: &str) -> Result<Self, SignerError> {
        let trimmed = secret.trim();
        let raw = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = hex::decode(raw).map_err(|_| SignerError::InvalidKey)?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSigner").field("address", &self.address).finish()
    }
}

impl Signer for LocalSigner {
    fn address(&self) -> Address {
        self.address
    }

    fn sign_hash(&self, digest: B256) -> Result<Bytes, SignerError> {
        let (sig, recid) = self
            .key
            .sign_prehash_recoverable(digest.as_slice())
            .map_err(|e| SignerError::Signing(e.to_string()))?;
        let mut out = Vec::with_capacity(65);
        out.extend_from_slice(&sig.to_bytes());
        out.push(recid.to_byte() + 27);
        Ok(out.into())
    }
}

/// Build and sign a response for `request_id`.
///
/// Used for synthetic error responses, where the system signer stands in for the off-chain
/// service.
pub fn sign_compute_response(
    signer: &dyn Signer,
    request_id: B256,
    code: HcErrorCode,
    result: Bytes,
) -> Result<ComputeResponse, SignerError> {
    let payload = ResponsePayload::new(request_id, code, result).encode();
    let signature = signer.sign_hash(response_signing_hash(request_id, &payload))?;
    Ok(ComputeResponse {
        success: code == HcErrorCode::None,
        payload,
        signer: signer.address(),
        signature,
    })
}
