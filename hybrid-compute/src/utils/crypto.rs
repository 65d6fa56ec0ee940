//! Signature recovery for response and operation signatures.

use alloy_primitives::{Address, B256};
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use sha3::{Digest, Keccak256};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecoverError {
    #[error("signature must be 65 bytes, got {0}")]
    Length(usize),
    #[error("unsupported recovery byte {0}")]
    RecoveryByte(u8),
    #[error("malformed signature: {0}")]
    Malformed(String),
}

/// Address of a secp256k1 public key: low 20 bytes of keccak256(x || y).
pub fn public_key_address(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = Keccak256::digest(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

/// Recover the signer of a 32-byte digest from a 65-byte `r || s || v` signature.
///
/// `v` may be 0/1 or 27/28. Anything else is rejected rather than guessed.
pub fn recover_address(digest: B256, sig: &[u8]) -> Result<Address, RecoverError> {
    if sig.len() != 65 {
        return Err(RecoverError::Length(sig.len()));
    }
    let v = match sig[64] {
        v @ (0 | 1) => v,
        v @ (27 | 28) => v - 27,
        other => return Err(RecoverError::RecoveryByte(other)),
    };
    let recid = RecoveryId::from_byte(v).ok_or(RecoverError::RecoveryByte(sig[64]))?;
    let signature = Signature::from_slice(&sig[..64]).map_err(|e| RecoverError::Malformed(e.to_string()))?;
    let key = VerifyingKey::recover_from_prehash(digest.as_slice(), &signature, recid)
        .map_err(|e| RecoverError::Malformed(e.to_string()))?;
    Ok(public_key_address(&key))
}
