//! Per-account nonce lanes for injected operations.

use std::{collections::HashMap, sync::Arc};

use alloy_primitives::{Address, U256};
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::{chain::ChainState, errors::ChainError};

#[derive(Debug, Default)]
struct Lane {
    next: Option<U256>,
}

/// Serialises injected operations per sending account.
///
/// Each account has one FIFO lane holding the next unused nonce. A [`NonceTicket`] owns the lane
/// until it is committed or dropped.
pub struct SignerQueue<C> {
    chain: Arc<C>,
    lanes: Mutex<HashMap<Address, Arc<AsyncMutex<Lane>>>>,
}

impl<C: ChainState> SignerQueue<C> {
    pub fn new(chain: Arc<C>) -> Self {
        Self {
            chain,
            lanes: Mutex::new(HashMap::new()),
        }
    }

    fn lane(&self, account: Address) -> Arc<AsyncMutex<Lane>> {
        self.lanes.lock().entry(account).or_default().clone()
    }

    /// Wait for the account's lane and take the next nonce.
    ///
    /// The first ticket for an account (or the first after [`resync`](Self::resync)) reads the
    /// nonce from chain.
    pub async fn acquire(&self, account: Address) -> Result<NonceTicket, ChainError> {
        let mut guard = self.lane(account).lock_owned().await;
        let nonce = match guard.next {
            Some(nonce) => nonce,
            None => {
                let nonce = self.chain.nonce(account).await?;
                debug!(%account, %nonce, "nonce lane synced from chain");
                guard.next = Some(nonce);
                nonce
            }
        };
        Ok(NonceTicket { account, nonce, guard })
    }

    /// Forget the cached nonce, e.g. after a bundle carrying injected operations was dropped.
    pub async fn resync(&self, account: Address) {
        let mut guard = self.lane(account).lock_owned().await;
        guard.next = None;
    }

    /// Wait for the account's lane and, while holding it, lower the next nonce to whatever
    /// `rewind` returns.
    ///
    /// No ticket can commit while `rewind` runs, so it sees every nonce handed out so far.
    pub async fn rewind_with<F>(&self, account: Address, rewind: F) -> Option<U256>
    where
        F: FnOnce() -> Option<U256>,
    {
        let mut guard = self.lane(account).lock_owned().await;
        let target = rewind()?;
        if guard.next.is_some_and(|next| next > target) {
            debug!(%account, nonce = %target, "nonce lane rewound");
            guard.next = Some(target);
        }
        Some(target)
    }
}

/// Exclusive claim on an account's next nonce.
///
/// Dropping the ticket without [`commit`](Self::commit) leaves the nonce unused for the next
/// holder.
pub struct NonceTicket {
    account: Address,
    nonce: U256,
    guard: OwnedMutexGuard<Lane>,
}

impl NonceTicket {
    pub fn account(&self) -> Address {
        self.account
    }

    pub fn nonce(&self) -> U256 {
        self.nonce
    }

    pub fn commit(mut self) {
        self.guard.next = Some(self.nonce + U256::from(1u64));
    }
}

impl std::fmt::Debug for NonceTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceTicket")
            .field("account", &self.account)
            .field("nonce", &self.nonce)
            .finish()
    }
}
