//! Interception-and-cache-population pipeline.
//!
//! For each candidate operation: detect the marker, resolve the account's registration, call the
//! off-chain service, verify the response, build and simulate the injected cache write, then
//! re-estimate the original with the write as prefix. The result is either the untouched
//! operation or a [`PendingPair`] with adjusted gas.
//!
//! Transient off-chain failures (timeout, unreachable, malformed) do not reject the candidate. The
//! system signer signs an error response instead, and that response goes through population and
//! fee accounting like a real one, within a short grace period.
//!
//! Finished pairs stay pending until they are submitted, dropped or expire. The account re-signs
//! the repriced original and binds it to its pair with
//! [`attach_signed`](HybridComputePipeline::attach_signed).

use std::{collections::HashMap, future::Future, sync::Arc};

use alloy_primitives::{Address, Bytes, B256};
use futures::future::join_all;
use hybrid_compute_types::{BlockContext, ComputeRequest, ComputeResponse, HcErrorCode, Operation, Registration};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::{timeout_at, Instant};
use tracing::{error, info, info_span, warn, Instrument};

use crate::{
    chain::{ChainState, SimulationOutcome},
    config::HcConfig,
    detector::{detect, Interception},
    errors::{AttachError, ConfigError, PipelineError, PopulationError, ReestimationError, RequestError},
    fees::{FeeAccountant, FeeAdjustment, InjectedCost},
    lifecycle::{RequestLifecycle, RequestState},
    offchain::OffchainClient,
    populator::{
        bundle::{AssembledBundle, BundleAssembler, BundleItem, PendingPair},
        CachePopulator,
    },
    registry::RegistryResolver,
    signer::{sign_compute_response, Signer},
    verifier::{verify, verify_signed_by},
};

#[derive(Clone, Debug)]
pub enum CandidateOutcome {
    /// No off-chain call needed; bundle the operation as-is.
    Passthrough(Operation),
    Paired(PairedOutcome),
}

#[derive(Clone, Debug)]
pub struct PairedOutcome {
    pub pair: PendingPair,
    pub lifecycle: RequestLifecycle,
    pub fee: FeeAdjustment,
}

/// One row of [`HybridComputePipeline::active_requests`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveRequest {
    pub request_id: B256,
    pub state: RequestState,
}

struct PendingEntry {
    pair: PendingPair,
    created_at: Instant,
}

pub struct HybridComputePipeline<C, O, S> {
    config: HcConfig,
    chain: Arc<C>,
    offchain: Arc<O>,
    system_signer: Arc<S>,
    registry: RegistryResolver<C>,
    populator: CachePopulator<C, S>,
    fees: FeeAccountant,
    active: Mutex<HashMap<B256, RequestState>>,
    pairs: Mutex<HashMap<B256, PendingEntry>>,
}

impl<C, O, S> HybridComputePipeline<C, O, S>
where
    C: ChainState,
    O: OffchainClient,
    S: Signer + 'static,
{
    pub fn new(config: HcConfig, chain: Arc<C>, offchain: Arc<O>, system_signer: Arc<S>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            registry: RegistryResolver::new(chain.clone())?,
            populator: CachePopulator::new(&config, chain.clone(), system_signer.clone()),
            fees: FeeAccountant::new(config.fees.flat_fee_gas),
            active: Mutex::new(HashMap::new()),
            pairs: Mutex::new(HashMap::new()),
            config,
            chain,
            offchain,
            system_signer,
        })
    }

    pub fn config(&self) -> &HcConfig {
        &self.config
    }

    /// Simulate `op` at the latest block and run it through the pipeline.
    ///
    /// The detecting simulation counts against the request deadline.
    pub async fn process(&self, op: Operation) -> Result<CandidateOutcome, PipelineError> {
        let deadline = Instant::now() + self.config.request_timeout();
        let block = within(deadline, RequestState::Detected, self.chain.latest_block()).await??;
        let outcome = within(deadline, RequestState::Detected, self.chain.simulate(&[], &op, &block)).await??;
        self.intercept(op, &outcome, deadline).await
    }

    /// Run `op` through the pipeline given a simulation the caller already has.
    pub async fn process_simulated(
        &self,
        op: Operation,
        outcome: &SimulationOutcome,
    ) -> Result<CandidateOutcome, PipelineError> {
        let deadline = Instant::now() + self.config.request_timeout();
        self.intercept(op, outcome, deadline).await
    }

    async fn intercept(
        &self,
        op: Operation,
        outcome: &SimulationOutcome,
        deadline: Instant,
    ) -> Result<CandidateOutcome, PipelineError> {
        let request = match detect(&op, outcome) {
            Ok(Interception::NotRequired) => return Ok(CandidateOutcome::Passthrough(op)),
            Ok(Interception::Required(request)) => request,
            Err(err) => {
                warn!(sender = %op.sender, nonce = %op.nonce, %err, "rejecting operation with malformed marker");
                return Err(err.into());
            }
        };
        let span = info_span!(
            "hybrid_compute",
            request_id = %request.request_id,
            account = %request.account,
            sender = %op.sender,
        );
        self.run(op, request, outcome.block, deadline).instrument(span).await
    }

    /// Process candidates concurrently. Results are in input order.
    pub async fn process_batch(&self, ops: Vec<Operation>) -> Vec<Result<CandidateOutcome, PipelineError>> {
        join_all(ops.into_iter().map(|op| self.process(op))).await
    }

    /// Current registration of `account` at the latest block.
    pub async fn resolve(&self, account: Address) -> Result<Registration, PipelineError> {
        let block = self.chain.latest_block().await?;
        Ok(self.registry.resolve(account, &block).await?)
    }

    /// Bind the account's re-signed original to its pending pair.
    ///
    /// [`process`](Self::process) raises the original's gas, which voids its signature. The
    /// account signs the repriced operation again and hands it back here. `signed` must match
    /// the pair's original in everything but the signature; the stored pair is updated and
    /// returned.
    pub fn attach_signed(&self, signed: Operation) -> Result<PendingPair, PipelineError> {
        let mut pairs = self.pairs.lock();
        let entry = pairs
            .values_mut()
            .find(|entry| entry.pair.original().sender == signed.sender && entry.pair.original().nonce == signed.nonce)
            .ok_or(AttachError::UnknownOperation {
                sender: signed.sender,
                nonce: signed.nonce,
            })?;
        let (sender, nonce) = (signed.sender, signed.nonce);
        entry.pair = entry.pair.with_signed_original(signed).inspect_err(|err| {
            warn!(%sender, %nonce, %err, "re-signed operation rejected");
        })?;
        info!(request_id = %entry.pair.request_id(), %sender, %nonce, "re-signed original attached");
        Ok(entry.pair.clone())
    }

    /// Finished pairs not yet submitted, in injected-nonce order.
    pub fn pending_pairs(&self) -> Vec<PendingPair> {
        let mut pairs: Vec<PendingPair> = self.pairs.lock().values().map(|entry| entry.pair.clone()).collect();
        pairs.sort_by_key(|pair| pair.injected().nonce);
        pairs
    }

    /// Place `items` into one bundle of at most `max_ops` operations.
    ///
    /// Pairs are placed only while their injected nonces continue the system account's
    /// on-chain nonce; the rest are deferred.
    pub async fn assemble_bundle(
        &self,
        max_ops: usize,
        items: Vec<BundleItem>,
    ) -> Result<AssembledBundle, PipelineError> {
        let next_nonce = self.chain.nonce(self.populator.system_account()).await?;
        Ok(BundleAssembler::assemble(max_ops, next_nonce, items))
    }

    /// Pairs included in a submitted bundle; their ids leave the working set.
    pub fn mark_submitted(&self, request_ids: &[B256]) {
        self.forget(request_ids);
    }

    /// A bundle carrying pairs was dropped.
    ///
    /// Pending pairs at or above the lowest dropped system nonce leave too, and the nonce lane
    /// re-reads the chain. Returns every request id released.
    pub async fn mark_dropped(&self, request_ids: &[B256]) -> Vec<B256> {
        let mut released = self.give_back(|id, _| request_ids.contains(id)).await;
        self.forget(request_ids);
        self.populator.queue().resync(self.populator.system_account()).await;
        for id in request_ids {
            if !released.contains(id) {
                released.push(*id);
            }
        }
        released
    }

    /// Drop pairs older than `pending_ttl_ms` that were never submitted.
    ///
    /// Pairs holding a system nonce at or above the oldest expired one are dropped with it, and
    /// the nonce lane is rewound to that nonce. Returns the dropped request ids; their operations
    /// can be processed again.
    pub async fn expire_pending(&self) -> Vec<B256> {
        let ttl = self.config.pending_ttl();
        let now = Instant::now();
        let expired = |entry: &PendingEntry| now.saturating_duration_since(entry.created_at) >= ttl;
        if !self.pairs.lock().values().any(expired) {
            return Vec::new();
        }
        let dropped = self.give_back(|_, entry| expired(entry)).await;
        if !dropped.is_empty() {
            warn!(count = dropped.len(), "unsubmitted pairs expired, system nonces given back");
        }
        dropped
    }

    /// Requests in flight or completed but not yet submitted.
    pub fn active_requests(&self) -> Vec<ActiveRequest> {
        let mut rows: Vec<_> = self
            .active
            .lock()
            .iter()
            .map(|(request_id, state)| ActiveRequest {
                request_id: *request_id,
                state: *state,
            })
            .collect();
        rows.sort_by_key(|row| row.request_id);
        rows
    }

    /// Drop every pending pair whose injected nonce is at or above the lowest nonce among the
    /// `selected` ones, rewinding the system nonce lane to it.
    async fn give_back<F>(&self, selected: F) -> Vec<B256>
    where
        F: Fn(&B256, &PendingEntry) -> bool,
    {
        let mut dropped = Vec::new();
        let rewound = self
            .populator
            .queue()
            .rewind_with(self.populator.system_account(), || {
                let mut pairs = self.pairs.lock();
                let cutoff = pairs
                    .iter()
                    .filter(|(id, entry)| selected(*id, *entry))
                    .map(|(_, entry)| entry.pair.injected().nonce)
                    .min()?;
                pairs.retain(|id, entry| {
                    let keep = entry.pair.injected().nonce < cutoff;
                    if !keep {
                        dropped.push(*id);
                    }
                    keep
                });
                Some(cutoff)
            })
            .await;
        if let Some(nonce) = rewound {
            self.forget(&dropped);
            info!(%nonce, count = dropped.len(), "pending pairs released");
        }
        dropped
    }

    fn forget(&self, request_ids: &[B256]) {
        self.populator.release(request_ids);
        let mut pairs = self.pairs.lock();
        let mut active = self.active.lock();
        for id in request_ids {
            pairs.remove(id);
            active.remove(id);
        }
    }

    async fn run(
        &self,
        op: Operation,
        request: ComputeRequest,
        block: BlockContext,
        deadline: Instant,
    ) -> Result<CandidateOutcome, PipelineError> {
        self.expire_pending().await;
        let request_id = request.request_id;
        {
            let mut active = self.active.lock();
            if active.contains_key(&request_id) {
                return Err(PopulationError::DuplicateRequest(request_id).into());
            }
            active.insert(request_id, RequestState::Detected);
        }
        info!("hybrid compute request detected");

        let mut lifecycle = RequestLifecycle::new(request_id);
        match self.drive(&op, &request, &block, deadline, &mut lifecycle).await {
            Ok((pair, fee)) => {
                info!(
                    state = ?lifecycle.state(),
                    pre_verification_gas = %fee.estimate.pre_verification_gas,
                    total_gas = %pair.original().total_gas_limit(),
                    injected_cost = %fee.injected_cost,
                    "pair ready"
                );
                Ok(CandidateOutcome::Paired(PairedOutcome { pair, lifecycle, fee }))
            }
            Err(err) => {
                if !lifecycle.is_terminal() {
                    lifecycle.fail(err.failure_reason())?;
                }
                self.active.lock().remove(&request_id);
                match &err {
                    PipelineError::Verification(_)
                    | PipelineError::Population(PopulationError::DuplicateRequest(_)) => {
                        error!(%err, "integrity failure, rejecting operation")
                    }
                    _ => warn!(%err, state = ?lifecycle.state(), "request failed"),
                }
                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        op: &Operation,
        request: &ComputeRequest,
        block: &BlockContext,
        mut deadline: Instant,
        lifecycle: &mut RequestLifecycle,
    ) -> Result<(PendingPair, FeeAdjustment), PipelineError> {
        let request_id = request.request_id;

        self.step(lifecycle, RequestState::Resolving)?;
        let registration = within(
            deadline,
            RequestState::Resolving,
            self.registry.resolve(request.account, block),
        )
        .await??;

        self.step(lifecycle, RequestState::Requesting)?;
        let reply = match timeout_at(deadline, self.offchain.request(&registration, request)).await {
            Ok(reply) => reply,
            Err(_) => Err(RequestError::Timeout),
        };

        let (response, fallback) = match reply {
            Ok(response) => {
                self.step(lifecycle, RequestState::Verifying)?;
                verify(request, &response, &registration)?;
                self.step(lifecycle, RequestState::Populating)?;
                (response, None)
            }
            Err(err) => {
                warn!(%err, "off-chain call failed, caching a synthetic error response");
                lifecycle.fail(err.failure_reason())?;
                self.record(request_id, lifecycle.state());
                deadline = Instant::now() + self.config.fallback_grace();
                let response = self.synthetic_response(request, err.error_code())?;
                (response, Some(err.error_code()))
            }
        };

        let stage = lifecycle.state();
        let populated = within(deadline, stage, self.populator.populate(op, request_id, &response, block)).await??;

        if fallback.is_none() {
            self.step(lifecycle, RequestState::Reestimating)?;
        }
        let stage = lifecycle.state();
        let resim = within(deadline, stage, self.chain.simulate(std::slice::from_ref(&populated.injected), op, block))
            .await?
            .map_err(|e| ReestimationError::SimulationFailed(e.to_string()))?;

        let cost = InjectedCost::from_simulation(&populated.injected, &populated.outcome);
        let fee = self.fees.adjust(request_id, op, &cost, &resim)?;
        let pair = PendingPair::new(
            request_id,
            populated.injected.clone(),
            op.with_gas(&fee.estimate),
            fee.estimate,
            self.populator.system_account(),
            fallback,
        )?;

        if fallback.is_none() {
            self.step(lifecycle, RequestState::Completed)?;
        }
        // registered while the nonce lane is still held, so expiry sees it
        self.pairs.lock().insert(
            request_id,
            PendingEntry {
                pair: pair.clone(),
                created_at: Instant::now(),
            },
        );
        populated.finalize();
        Ok((pair, fee))
    }

    fn synthetic_response(&self, request: &ComputeRequest, code: HcErrorCode) -> Result<ComputeResponse, PipelineError> {
        let response = sign_compute_response(self.system_signer.as_ref(), request.request_id, code, Bytes::new())?;
        verify_signed_by(request, &response, self.system_signer.address())?;
        Ok(response)
    }

    fn step(&self, lifecycle: &mut RequestLifecycle, next: RequestState) -> Result<(), PipelineError> {
        let state = lifecycle.advance(next)?;
        self.record(lifecycle.request_id(), state);
        Ok(())
    }

    fn record(&self, request_id: B256, state: RequestState) {
        self.active.lock().insert(request_id, state);
    }
}

async fn within<F, T>(deadline: Instant, stage: RequestState, fut: F) -> Result<T, PipelineError>
where
    F: Future<Output = T>,
{
    timeout_at(deadline, fut)
        .await
        .map_err(|_| PipelineError::Timeout { stage })
}
