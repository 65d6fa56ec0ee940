//! Pair bookkeeping and bundle placement.
//!
//! A pair is the injected cache write followed by the original operation. Pairs are placed as a
//! unit: both operations land in the same bundle with the injected one directly in front, or the
//! pair waits for the next bundle. Cache writes in a bundle carry consecutive system nonces,
//! starting at the system account's on-chain nonce.

use alloy_primitives::{Address, B256, U256};
use hybrid_compute_types::{GasEstimate, HcErrorCode, Operation};
use thiserror::Error;

use crate::{abi::decode_cache_write, errors::AttachError};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OrderingError {
    #[error("invalid pair: {0}")]
    InvalidPair(&'static str),
    #[error("cache write at {0} is not followed by its original operation")]
    MissingOriginal(usize),
    #[error("operation at {0} is not a cache write from the system account")]
    NotACacheWrite(usize),
    #[error("cache write at {0} is not part of a recorded pair")]
    Unpaired(usize),
    #[error("cache write at {0} does not carry the next system nonce")]
    NonceOrder(usize),
}

/// Injected cache write plus the original it serves, ready for bundling.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingPair {
    request_id: B256,
    injected: Operation,
    original: Operation,
    estimate: GasEstimate,
    fallback: Option<HcErrorCode>,
}

impl PendingPair {
    /// `original` must already carry the adjusted gas fields in `estimate`.
    pub fn new(
        request_id: B256,
        injected: Operation,
        original: Operation,
        estimate: GasEstimate,
        system_account: Address,
        fallback: Option<HcErrorCode>,
    ) -> Result<Self, OrderingError> {
        if injected.sender != system_account {
            return Err(OrderingError::InvalidPair("injected operation is not from the system account"));
        }
        if original.sender == system_account {
            return Err(OrderingError::InvalidPair("original operation is from the system account"));
        }
        Ok(Self {
            request_id,
            injected,
            original,
            estimate,
            fallback,
        })
    }

    pub fn request_id(&self) -> B256 {
        self.request_id
    }

    pub fn injected(&self) -> &Operation {
        &self.injected
    }

    pub fn original(&self) -> &Operation {
        &self.original
    }

    pub fn estimate(&self) -> GasEstimate {
        self.estimate
    }

    /// Error code of the synthetic response when the off-chain call failed.
    pub fn fallback(&self) -> Option<HcErrorCode> {
        self.fallback
    }

    /// Bundle order: injected first.
    pub fn ops(&self) -> [&Operation; 2] {
        [&self.injected, &self.original]
    }

    pub fn into_ops(self) -> [Operation; 2] {
        [self.injected, self.original]
    }

    /// Copy of this pair carrying the account's re-signed original.
    ///
    /// `signed` must equal the stored original in every field but the signature. In particular
    /// its gas fields must be the ones in [`estimate`](Self::estimate).
    pub fn with_signed_original(&self, signed: Operation) -> Result<Self, AttachError> {
        let expected = &self.original;
        if signed.sender != expected.sender || signed.nonce != expected.nonce {
            return Err(AttachError::UnknownOperation {
                sender: signed.sender,
                nonce: signed.nonce,
            });
        }
        let gas = GasEstimate {
            pre_verification_gas: signed.pre_verification_gas,
            verification_gas_limit: signed.verification_gas_limit,
            call_gas_limit: signed.call_gas_limit,
        };
        if gas != self.estimate {
            return Err(AttachError::Mismatch("gas fields differ from the estimate"));
        }
        if signed.call_data != expected.call_data {
            return Err(AttachError::Mismatch("callData differs"));
        }
        if signed.init_code != expected.init_code || signed.paymaster_and_data != expected.paymaster_and_data {
            return Err(AttachError::Mismatch("initCode or paymasterAndData differs"));
        }
        if signed.max_fee_per_gas != expected.max_fee_per_gas
            || signed.max_priority_fee_per_gas != expected.max_priority_fee_per_gas
        {
            return Err(AttachError::Mismatch("fee fields differ"));
        }
        if signed.signature.is_empty() || signed.signature == expected.signature {
            return Err(AttachError::Mismatch("signature was not renewed"));
        }
        Ok(Self {
            original: signed,
            ..self.clone()
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BundleItem {
    Single(Operation),
    Pair(PendingPair),
}

impl BundleItem {
    fn len(&self) -> usize {
        match self {
            BundleItem::Single(_) => 1,
            BundleItem::Pair(_) => 2,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AssembledBundle {
    pub ops: Vec<Operation>,
    /// Index of each injected operation in `ops`.
    pub pair_positions: Vec<usize>,
    /// Request ids of the pairs placed in this bundle.
    pub request_ids: Vec<B256>,
    /// Items that did not fit, in arrival order.
    pub deferred: Vec<BundleItem>,
}

/// Reorder the pairs in `items` by injected nonce, leaving singles where they are.
///
/// Concurrent requests take system nonces in completion order, not arrival order.
pub fn order_pairs_by_nonce(items: &mut [BundleItem]) {
    let mut pairs: Vec<PendingPair> = items
        .iter()
        .filter_map(|item| match item {
            BundleItem::Pair(pair) => Some(pair.clone()),
            BundleItem::Single(_) => None,
        })
        .collect();
    pairs.sort_by_key(|pair| pair.injected().nonce);
    let mut sorted = pairs.into_iter();
    for item in items.iter_mut() {
        if let BundleItem::Pair(slot) = item {
            if let Some(pair) = sorted.next() {
                *slot = pair;
            }
        }
    }
}

/// Fills one bundle up to `max_ops` operations.
///
/// Pairs must arrive in injected-nonce order (see [`order_pairs_by_nonce`]). A pair is placed
/// only if its injected nonce is the next one the system account will use on chain. Once a pair
/// is deferred every later pair is deferred too, so the system account never skips a nonce.
#[derive(Debug)]
pub struct BundleAssembler {
    max_ops: usize,
    next_nonce: U256,
    bundle: AssembledBundle,
    pair_deferred: bool,
}

impl BundleAssembler {
    /// `next_nonce` is the system account's current on-chain nonce.
    pub fn new(max_ops: usize, next_nonce: U256) -> Self {
        Self {
            max_ops,
            next_nonce,
            bundle: AssembledBundle::default(),
            pair_deferred: false,
        }
    }

    /// Order `items` and place as many as fit into one bundle of `max_ops`.
    pub fn assemble(max_ops: usize, next_nonce: U256, mut items: Vec<BundleItem>) -> AssembledBundle {
        order_pairs_by_nonce(&mut items);
        let mut assembler = Self::new(max_ops, next_nonce);
        for item in items {
            assembler.push(item);
        }
        assembler.finish()
    }

    pub fn remaining(&self) -> usize {
        self.max_ops.saturating_sub(self.bundle.ops.len())
    }

    /// Place `item` if it fits whole; otherwise defer it. Returns whether it was placed.
    pub fn push(&mut self, item: BundleItem) -> bool {
        let (is_pair, in_sequence) = match &item {
            BundleItem::Pair(pair) => (true, pair.injected().nonce == self.next_nonce),
            BundleItem::Single(_) => (false, true),
        };
        if item.len() > self.remaining() || (is_pair && (self.pair_deferred || !in_sequence)) {
            self.pair_deferred |= is_pair;
            self.bundle.deferred.push(item);
            return false;
        }
        match item {
            BundleItem::Single(op) => self.bundle.ops.push(op),
            BundleItem::Pair(pair) => {
                self.bundle.pair_positions.push(self.bundle.ops.len());
                self.bundle.request_ids.push(pair.request_id());
                self.next_nonce += U256::from(1u64);
                let [injected, original] = pair.into_ops();
                self.bundle.ops.push(injected);
                self.bundle.ops.push(original);
            }
        }
        true
    }

    pub fn finish(self) -> AssembledBundle {
        self.bundle
    }
}

/// Check that every cache write from `system_account` to `helper` is a recorded pair position
/// directly followed by a non-system operation, and that the writes carry consecutive nonces
/// starting at `next_nonce`, the system account's on-chain nonce.
pub fn verify_pair_ordering(
    ops: &[Operation],
    pair_positions: &[usize],
    system_account: Address,
    helper: Address,
    next_nonce: U256,
) -> Result<(), OrderingError> {
    let mut expected = next_nonce;
    for &pos in pair_positions {
        let injected = ops.get(pos).ok_or(OrderingError::MissingOriginal(pos))?;
        if injected.sender != system_account || decode_cache_write(&injected.call_data, helper).is_none() {
            return Err(OrderingError::NotACacheWrite(pos));
        }
        match ops.get(pos + 1) {
            Some(next) if next.sender != system_account => {}
            _ => return Err(OrderingError::MissingOriginal(pos)),
        }
        if injected.nonce != expected {
            return Err(OrderingError::NonceOrder(pos));
        }
        expected += U256::from(1u64);
    }
    for (i, op) in ops.iter().enumerate() {
        if op.sender == system_account
            && decode_cache_write(&op.call_data, helper).is_some()
            && !pair_positions.contains(&i)
        {
            return Err(OrderingError::Unpaired(i));
        }
    }
    Ok(())
}
