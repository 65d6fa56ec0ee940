//! In-memory chain and off-chain service for tests.

use std::{
    collections::{HashMap, HashSet},
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use alloy_primitives::{address, Address, Bytes, B256, U256};
use alloy_sol_types::{sol, SolCall, SolError};
use async_trait::async_trait;
use hybrid_compute_types::{derive_request_id, BlockContext, ComputeRequest, ComputeResponse, HcErrorCode, Operation, Registration};
use parking_lot::Mutex;

use crate::{
    abi::{
        decode_cache_write,
        interfaces::{DuplicateEntry, HybridComputeRequired},
    },
    chain::{ChainState, RawRegistration, SimulationOutcome},
    config::HcConfig,
    errors::{ChainError, RequestError},
    offchain::OffchainClient,
    populator::bundle::PendingPair,
    signer::{sign_compute_response, LocalSigner, Signer},
};

sol! {
    /// Account entry point that needs an off-chain result before it can run.
    interface IHybridAccount {
        function hybridCall(address account, bytes callParams) external;
    }
}

pub const ENTRY_POINT: Address = address!("5ff137d4b0fdcd49dca30c7cf57e578a026d2789");
pub const HELPER: Address = address!("00000000000000000000000000000000000000c1");
pub const SYSTEM_ACCOUNT: Address = address!("2a9099a58e0830a4ab418c2a19710022466f1ce7");

pub const INJECTED_VERIFICATION_GAS: u64 = 70_000;
pub const INJECTED_CALL_GAS: u64 = 55_000;
pub const RESOLVED_VERIFICATION_GAS: u64 = 90_000;
pub const RESOLVED_CALL_GAS: u64 = 64_000;

pub fn test_config() -> HcConfig {
    let mut config = HcConfig::new(901, "http://127.0.0.1:9545", ENTRY_POINT, HELPER, SYSTEM_ACCOUNT);
    config.request_timeout_ms = 2_000;
    config.fallback_grace_ms = 1_000;
    config.offchain.timeout_ms = 500;
    config.pending_ttl_ms = 10_000;
    config
}

/// Calldata that makes [`FakeChain`] emit the marker until the response is cached.
pub fn hybrid_call(account: Address, call_params: &[u8]) -> Bytes {
    IHybridAccount::hybridCallCall {
        account,
        callParams: Bytes::copy_from_slice(call_params),
    }
    .abi_encode()
    .into()
}

#[derive(Default)]
struct FakeState {
    registrations: HashMap<Address, RawRegistration>,
    cache: HashMap<B256, Bytes>,
    nonces: HashMap<Address, U256>,
    injected_failure: Option<String>,
    injected_delay: Option<Duration>,
    user_delay: Option<Duration>,
    simulations: usize,
}

/// Scripted [`ChainState`].
///
/// Operations calling `hybridCall(account, params)` revert with the marker unless the response
/// cache (committed, or written by a prefix operation) holds their request id. Cache writes from
/// the system account revert with `DuplicateEntry` when the id already has an entry.
pub struct FakeChain {
    helper: Address,
    system_account: Address,
    state: Mutex<FakeState>,
}

impl Default for FakeChain {
    fn default() -> Self {
        Self::new(&test_config())
    }
}

impl FakeChain {
    pub fn new(config: &HcConfig) -> Self {
        Self {
            helper: config.helper_address,
            system_account: config.system_account,
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn register(&self, account: Address, signer: Address, url: &str) {
        self.state.lock().registrations.insert(
            account,
            RawRegistration {
                signer,
                url: url.to_string(),
            },
        );
    }

    pub fn set_nonce(&self, account: Address, nonce: U256) {
        self.state.lock().nonces.insert(account, nonce);
    }

    pub fn insert_cache_entry(&self, request_id: B256, payload: Bytes) {
        self.state.lock().cache.insert(request_id, payload);
    }

    pub fn cache_entry(&self, request_id: &B256) -> Option<Bytes> {
        self.state.lock().cache.get(request_id).cloned()
    }

    /// Apply a pair's cache write as if its bundle was included.
    pub fn commit(&self, pair: &PendingPair) {
        if let Some((id, payload)) = decode_cache_write(&pair.injected().call_data, self.helper) {
            self.insert_cache_entry(id, payload);
        }
    }

    pub fn fail_injected_validation(&self, reason: &str) {
        self.state.lock().injected_failure = Some(reason.to_string());
    }

    pub fn delay_injected_simulation(&self, delay: Duration) {
        self.state.lock().injected_delay = Some(delay);
    }

    /// Stall only the next simulation of a non-system operation.
    pub fn delay_next_user_simulation(&self, delay: Duration) {
        self.state.lock().user_delay = Some(delay);
    }

    pub fn simulations(&self) -> usize {
        self.state.lock().simulations
    }

    fn simulate_cache_write(&self, op: &Operation, prefix_ids: &HashSet<B256>, block: &BlockContext) -> SimulationOutcome {
        let mut outcome = SimulationOutcome {
            block: *block,
            verification_gas: U256::from(INJECTED_VERIFICATION_GAS),
            call_gas: U256::from(INJECTED_CALL_GAS),
            ..Default::default()
        };
        let state = self.state.lock();
        if let Some(reason) = &state.injected_failure {
            outcome.validation_error = Some(reason.clone());
            outcome.verification_gas = U256::ZERO;
            outcome.call_gas = U256::ZERO;
            return outcome;
        }
        match decode_cache_write(&op.call_data, self.helper) {
            Some((id, _)) if state.cache.contains_key(&id) || prefix_ids.contains(&id) => {
                outcome.revert_data = DuplicateEntry { requestId: id }.abi_encode().into();
            }
            Some(_) => outcome.success = true,
            None => outcome.revert_data = Bytes::from(vec![0xde, 0xad]),
        }
        outcome
    }

    fn simulate_user(&self, op: &Operation, prefix_ids: &HashSet<B256>, block: &BlockContext) -> SimulationOutcome {
        let mut outcome = SimulationOutcome {
            block: *block,
            verification_gas: U256::from(RESOLVED_VERIFICATION_GAS),
            call_gas: U256::from(RESOLVED_CALL_GAS),
            ..Default::default()
        };
        let Ok(call) = IHybridAccount::hybridCallCall::abi_decode(&op.call_data, true) else {
            outcome.success = true;
            return outcome;
        };
        let id = derive_request_id(call.account, op.sender, op.nonce, &call.callParams);
        if self.state.lock().cache.contains_key(&id) || prefix_ids.contains(&id) {
            outcome.success = true;
        } else {
            outcome.revert_data = HybridComputeRequired {
                account: call.account,
                requestId: id,
                callParams: call.callParams,
            }
            .abi_encode()
            .into();
        }
        outcome
    }
}

#[async_trait]
impl ChainState for FakeChain {
    async fn latest_block(&self) -> Result<BlockContext, ChainError> {
        Ok(BlockContext {
            number: 100,
            hash: B256::repeat_byte(0xb1),
            timestamp: 1_700_000_000,
        })
    }

    async fn registered_caller(&self, account: Address, _block: &BlockContext) -> Result<RawRegistration, ChainError> {
        Ok(self.state.lock().registrations.get(&account).cloned().unwrap_or_default())
    }

    async fn simulate(
        &self,
        prefix: &[Operation],
        op: &Operation,
        block: &BlockContext,
    ) -> Result<SimulationOutcome, ChainError> {
        let prefix_ids: HashSet<B256> = prefix
            .iter()
            .filter(|p| p.sender == self.system_account)
            .filter_map(|p| decode_cache_write(&p.call_data, self.helper).map(|(id, _)| id))
            .collect();
        let is_system = op.sender == self.system_account;
        let delay = {
            let mut state = self.state.lock();
            state.simulations += 1;
            if is_system {
                state.injected_delay
            } else {
                state.user_delay.take()
            }
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if is_system {
            Ok(self.simulate_cache_write(op, &prefix_ids, block))
        } else {
            Ok(self.simulate_user(op, &prefix_ids, block))
        }
    }

    async fn nonce(&self, account: Address) -> Result<U256, ChainError> {
        Ok(self.state.lock().nonces.get(&account).copied().unwrap_or_default())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Behaviour {
    /// Sign a one-word success result with the service key.
    Respond,
    /// Sign with a key that is not the registered one.
    WrongSigner,
    /// Sign a payload that belongs to another request.
    ForeignPayload,
    /// Never answer.
    Hang,
    Unreachable,
    Malformed,
}

/// Scripted [`OffchainClient`] that counts its calls.
pub struct ScriptedOffchain {
    key: LocalSigner,
    impostor: LocalSigner,
    behaviour: Mutex<Behaviour>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl Default for ScriptedOffchain {
    fn default() -> Self {
        Self::new(Behaviour::Respond)
    }
}

impl ScriptedOffchain {
    pub fn new(behaviour: Behaviour) -> Self {
        Self {
            key: LocalSigner::from_bytes(&[0x21; 32]).expect("service key"),
            impostor: LocalSigner::from_bytes(&[0x22; 32]).expect("impostor key"),
            behaviour: Mutex::new(behaviour),
            delay: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn signer_address(&self) -> Address {
        self.key.address()
    }

    pub fn set_behaviour(&self, behaviour: Behaviour) {
        *self.behaviour.lock() = behaviour;
    }

    /// Answer only after `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Result word the service returns for [`Behaviour::Respond`].
    pub fn result_word() -> Bytes {
        let mut word = [0u8; 32];
        word[31] = 42;
        Bytes::from(word.to_vec())
    }
}

#[async_trait]
impl OffchainClient for ScriptedOffchain {
    async fn request(
        &self,
        registration: &Registration,
        request: &ComputeRequest,
    ) -> Result<ComputeResponse, RequestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let behaviour = *self.behaviour.lock();
        let signed = |key: &LocalSigner, request_id: B256| {
            sign_compute_response(key, request_id, HcErrorCode::None, Self::result_word())
                .map_err(|e| RequestError::Malformed(e.to_string()))
        };
        let mut response = match behaviour {
            Behaviour::Respond => signed(&self.key, request.request_id)?,
            Behaviour::WrongSigner => signed(&self.impostor, request.request_id)?,
            Behaviour::ForeignPayload => {
                let mut response = signed(&self.key, B256::repeat_byte(0xff))?;
                response.signature = self
                    .key
                    .sign_hash(hybrid_compute_types::response_signing_hash(request.request_id, &response.payload))
                    .map_err(|e| RequestError::Malformed(e.to_string()))?;
                response
            }
            Behaviour::Hang => std::future::pending::<ComputeResponse>().await,
            Behaviour::Unreachable => return Err(RequestError::Unreachable("connection refused".into())),
            Behaviour::Malformed => return Err(RequestError::Malformed("unknown field `extra`".into())),
        };
        response.signer = registration.signer;
        Ok(response)
    }
}
