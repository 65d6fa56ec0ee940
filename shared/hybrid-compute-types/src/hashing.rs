use alloy_primitives::{keccak256, Address, B256, U256};

use crate::operation::Operation;

fn address_word(addr: Address) -> [u8; 32] {
    let mut padded = [0u8; 32];
    padded[12..32].copy_from_slice(addr.as_slice());
    padded
}

/// Request identifier for one interception attempt.
///
/// `keccak256(abi.encode(account, sender, nonce, keccak256(callParams)))`. The operation nonce makes
/// the identifier unique per attempt; the helper contract derives it the same way.
pub fn derive_request_id(account: Address, sender: Address, nonce: U256, call_params: &[u8]) -> B256 {
    let mut buf = Vec::with_capacity(32 * 4);
    buf.extend_from_slice(&address_word(account));
    buf.extend_from_slice(&address_word(sender));
    buf.extend_from_slice(&nonce.to_be_bytes::<32>());
    buf.extend_from_slice(keccak256(call_params).as_slice());
    keccak256(buf)
}

/// EIP-191 personal-message hash of a 32-byte digest.
pub fn eth_message_hash(digest: B256) -> B256 {
    let mut buf = Vec::with_capacity(28 + 32);
    buf.extend_from_slice(b"\x19Ethereum Signed Message:\n32");
    buf.extend_from_slice(digest.as_slice());
    keccak256(buf)
}

/// Digest an off-chain signer signs for a response (must match on-chain `PutResponse` checks).
///
/// `eth_message_hash(keccak256(abi.encode(requestId, keccak256(payload))))`
pub fn response_signing_hash(request_id: B256, payload: &[u8]) -> B256 {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(request_id.as_slice());
    buf.extend_from_slice(keccak256(payload).as_slice());
    eth_message_hash(keccak256(buf))
}

/// EntryPoint v0.6 `getUserOpHash`.
///
/// `keccak256(abi.encode(keccak256(pack(op)), entryPoint, chainId))`, where `pack` replaces the
/// dynamic fields with their hashes and leaves out the signature.
pub fn user_op_hash(op: &Operation, entry_point: Address, chain_id: u64) -> B256 {
    let mut packed = Vec::with_capacity(32 * 10);
    packed.extend_from_slice(&address_word(op.sender));
    packed.extend_from_slice(&op.nonce.to_be_bytes::<32>());
    packed.extend_from_slice(keccak256(&op.init_code).as_slice());
    packed.extend_from_slice(keccak256(&op.call_data).as_slice());
    packed.extend_from_slice(&op.call_gas_limit.to_be_bytes::<32>());
    packed.extend_from_slice(&op.verification_gas_limit.to_be_bytes::<32>());
    packed.extend_from_slice(&op.pre_verification_gas.to_be_bytes::<32>());
    packed.extend_from_slice(&op.max_fee_per_gas.to_be_bytes::<32>());
    packed.extend_from_slice(&op.max_priority_fee_per_gas.to_be_bytes::<32>());
    packed.extend_from_slice(keccak256(&op.paymaster_and_data).as_slice());

    let mut buf = Vec::with_capacity(32 * 3);
    buf.extend_from_slice(keccak256(packed).as_slice());
    buf.extend_from_slice(&address_word(entry_point));
    buf.extend_from_slice(&U256::from(chain_id).to_be_bytes::<32>());
    keccak256(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, b256, Bytes};

    #[test]
    fn request_id_depends_on_every_input() {
        let account = address!("00000000000000000000000000000000000000aa");
        let sender = address!("00000000000000000000000000000000000000bb");
        let base = derive_request_id(account, sender, U256::from(7u64), &[1, 2, 3, 4]);

        assert_eq!(base, derive_request_id(account, sender, U256::from(7u64), &[1, 2, 3, 4]));
        assert_ne!(base, derive_request_id(sender, sender, U256::from(7u64), &[1, 2, 3, 4]));
        assert_ne!(base, derive_request_id(account, account, U256::from(7u64), &[1, 2, 3, 4]));
        assert_ne!(base, derive_request_id(account, sender, U256::from(8u64), &[1, 2, 3, 4]));
        assert_ne!(base, derive_request_id(account, sender, U256::from(7u64), &[1, 2, 3, 5]));
    }

    #[test]
    fn eth_message_hash_prefixes_the_digest() {
        let digest = b256!("1111111111111111111111111111111111111111111111111111111111111111");
        let mut expected = b"\x19Ethereum Signed Message:\n32".to_vec();
        expected.extend_from_slice(digest.as_slice());
        assert_eq!(eth_message_hash(digest), keccak256(expected));
        assert_ne!(eth_message_hash(digest), keccak256(digest));
    }

    #[test]
    fn response_hash_binds_request_id_and_payload() {
        let id = b256!("0000000000000000000000000000000000000000000000000000000000000001");
        let other = b256!("0000000000000000000000000000000000000000000000000000000000000002");
        let h = response_signing_hash(id, b"payload");
        assert_ne!(h, response_signing_hash(other, b"payload"));
        assert_ne!(h, response_signing_hash(id, b"payloae"));
    }

    #[test]
    fn user_op_hash_ignores_signature_but_binds_gas_fields() {
        let op = Operation {
            sender: address!("00000000000000000000000000000000000000bb"),
            nonce: U256::from(1u64),
            call_data: Bytes::from(vec![0xde, 0xad]),
            pre_verification_gas: U256::from(21_000u64),
            ..Default::default()
        };
        let ep = address!("5ff137d4b0fdcd49dca30c7cf57e578a026d2789");
        let h = user_op_hash(&op, ep, 901);

        let mut resigned = op.clone();
        resigned.signature = Bytes::from(vec![1u8; 65]);
        assert_eq!(h, user_op_hash(&resigned, ep, 901));

        let mut bumped = op.clone();
        bumped.pre_verification_gas = U256::from(21_001u64);
        assert_ne!(h, user_op_hash(&bumped, ep, 901));
        assert_ne!(h, user_op_hash(&op, ep, 902));
    }
}
