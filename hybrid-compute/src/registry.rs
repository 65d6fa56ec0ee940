use std::sync::Arc;

use alloy_primitives::Address;
use hybrid_compute_types::{BlockContext, Registration};
use regex::Regex;
use tracing::debug;

use crate::{
    chain::ChainState,
    errors::{ConfigError, RegistryError},
};

/// Point-in-time registry lookups. Nothing is cached between calls.
pub struct RegistryResolver<C> {
    chain: Arc<C>,
    endpoint_pattern: Regex,
}

impl<C: ChainState> RegistryResolver<C> {
    pub fn new(chain: Arc<C>) -> Result<Self, ConfigError> {
        let endpoint_pattern =
            Regex::new(r"^https?://[^\s/?#]+(/\S*)?$").map_err(|e| ConfigError::Pattern(e.to_string()))?;
        Ok(Self {
            chain,
            endpoint_pattern,
        })
    }

    pub async fn resolve(&self, account: Address, block: &BlockContext) -> Result<Registration, RegistryError> {
        let raw = self.chain.registered_caller(account, block).await?;
        let not_registered = |reason: &str| RegistryError::NotRegistered {
            account,
            reason: reason.to_string(),
        };
        if raw.signer == Address::ZERO {
            return Err(not_registered("no signer registered"));
        }
        let endpoint = raw.url.trim();
        if endpoint.is_empty() {
            return Err(not_registered("no endpoint registered"));
        }
        if !self.endpoint_pattern.is_match(endpoint) {
            return Err(not_registered("endpoint is not an http(s) url"));
        }
        debug!(%account, endpoint, block = block.number, "registration resolved");
        Ok(Registration {
            account,
            endpoint: endpoint.to_string(),
            signer: raw.signer,
            block: *block,
        })
    }
}
