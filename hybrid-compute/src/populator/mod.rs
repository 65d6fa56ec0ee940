//! Builds and checks the injected cache-write operation.

pub mod bundle;
pub mod queue;

use std::{collections::HashSet, sync::Arc};

use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::SolError;
use hybrid_compute_types::{eth_message_hash, user_op_hash, BlockContext, ComputeResponse, Operation};
use parking_lot::Mutex;
use tracing::{debug, info};

use self::queue::{NonceTicket, SignerQueue};
use crate::{
    abi::{encode_cache_write, interfaces::DuplicateEntry},
    chain::{ChainState, SimulationOutcome},
    config::{HcConfig, InjectedGasConfig},
    errors::PopulationError,
    signer::Signer,
};

/// Injected operation that simulated cleanly, with everything needed to finish the pair.
///
/// Dropping it before [`Populated::finalize`] releases the nonce and the pending reservation.
#[derive(Debug)]
pub struct Populated<'a> {
    pub injected: Operation,
    pub outcome: SimulationOutcome,
    ticket: NonceTicket,
    reservation: Reservation<'a>,
}

impl Populated<'_> {
    /// Consume the nonce and keep the request id pending until it is submitted.
    pub fn finalize(self) {
        self.ticket.commit();
        self.reservation.keep();
    }
}

/// Claim on a request id in the pending set.
#[derive(Debug)]
struct Reservation<'a> {
    pending: &'a Mutex<HashSet<B256>>,
    request_id: B256,
    kept: bool,
}

impl Reservation<'_> {
    fn keep(mut self) {
        self.kept = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.kept {
            self.pending.lock().remove(&self.request_id);
        }
    }
}

pub struct CachePopulator<C, S> {
    chain: Arc<C>,
    signer: Arc<S>,
    queue: SignerQueue<C>,
    pending: Mutex<HashSet<B256>>,
    entry_point: Address,
    chain_id: u64,
    helper: Address,
    system_account: Address,
    gas: InjectedGasConfig,
}

impl<C: ChainState, S: Signer> CachePopulator<C, S> {
    pub fn new(config: &HcConfig, chain: Arc<C>, signer: Arc<S>) -> Self {
        Self {
            queue: SignerQueue::new(chain.clone()),
            chain,
            signer,
            pending: Mutex::new(HashSet::new()),
            entry_point: config.entry_point,
            chain_id: config.chain_id,
            helper: config.helper_address,
            system_account: config.system_account,
            gas: config.injected.clone(),
        }
    }

    pub fn system_account(&self) -> Address {
        self.system_account
    }

    pub fn queue(&self) -> &SignerQueue<C> {
        &self.queue
    }

    pub fn is_pending(&self, request_id: &B256) -> bool {
        self.pending.lock().contains(request_id)
    }

    fn reserve(&self, request_id: B256) -> Result<Reservation<'_>, PopulationError> {
        if !self.pending.lock().insert(request_id) {
            return Err(PopulationError::DuplicateRequest(request_id));
        }
        Ok(Reservation {
            pending: &self.pending,
            request_id,
            kept: false,
        })
    }

    /// Signed `execute(helper, 0, PutResponse(..))` from the system account.
    ///
    /// Fees are copied from `original` so the pair prices uniformly.
    pub fn build_injected(
        &self,
        original: &Operation,
        request_id: B256,
        response: &ComputeResponse,
        nonce: U256,
    ) -> Result<Operation, PopulationError> {
        let mut op = Operation {
            sender: self.system_account,
            nonce,
            call_data: encode_cache_write(
                self.helper,
                request_id,
                response.payload.clone(),
                response.signature.clone(),
            ),
            call_gas_limit: U256::from(self.gas.call_gas_limit),
            verification_gas_limit: U256::from(self.gas.verification_gas_limit),
            pre_verification_gas: U256::from(self.gas.pre_verification_gas),
            max_fee_per_gas: original.max_fee_per_gas,
            max_priority_fee_per_gas: original.max_priority_fee_per_gas,
            ..Default::default()
        };
        let hash = user_op_hash(&op, self.entry_point, self.chain_id);
        op.signature = self.signer.sign_hash(eth_message_hash(hash))?;
        Ok(op)
    }

    /// Reserve `request_id`, take the next system nonce, and simulate the injected operation.
    pub async fn populate(
        &self,
        original: &Operation,
        request_id: B256,
        response: &ComputeResponse,
        block: &BlockContext,
    ) -> Result<Populated<'_>, PopulationError> {
        let reservation = self.reserve(request_id)?;
        let ticket = self.queue.acquire(self.system_account).await?;
        let injected = self.build_injected(original, request_id, response, ticket.nonce())?;
        debug!(%request_id, account = %ticket.account(), nonce = %ticket.nonce(), "simulating injected cache write");

        let outcome = self.chain.simulate(&[], &injected, block).await?;
        check_injected_outcome(request_id, &outcome)?;
        info!(%request_id, nonce = %ticket.nonce(), gas_used = %outcome.gas_used(), "cache write prepared");
        Ok(Populated {
            injected,
            outcome,
            ticket,
            reservation,
        })
    }

    /// Drop submitted or expired request ids from the pending set.
    pub fn release(&self, request_ids: &[B256]) {
        let mut pending = self.pending.lock();
        for id in request_ids {
            pending.remove(id);
        }
    }
}

/// Map the injected operation's simulation to success or a population failure.
pub fn check_injected_outcome(request_id: B256, outcome: &SimulationOutcome) -> Result<(), PopulationError> {
    if let Some(reason) = &outcome.validation_error {
        return Err(PopulationError::SimulationFailed(reason.clone()));
    }
    if outcome.success {
        return Ok(());
    }
    if let Ok(dup) = DuplicateEntry::abi_decode(&outcome.revert_data, true) {
        return Err(PopulationError::DuplicateRequest(dup.requestId));
    }
    Err(PopulationError::SimulationFailed(format!(
        "cache write for {request_id} reverted with 0x{}",
        hex::encode(&outcome.revert_data)
    )))
}
