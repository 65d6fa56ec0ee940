//! JSON-RPC client for the registered off-chain service.
//!
//! One outbound call per request and no retries. The call is bounded by the configured timeout
//! and the response body by the configured size.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use hybrid_compute_types::{ComputeRequest, ComputeResponse, Registration};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::{
    config::OffchainConfig,
    errors::{ConfigError, RequestError},
};

#[async_trait]
pub trait OffchainClient: Send + Sync + 'static {
    async fn request(
        &self,
        registration: &Registration,
        request: &ComputeRequest,
    ) -> Result<ComputeResponse, RequestError>;
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: OffchainParams,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OffchainParams {
    request_id: B256,
    source_contract: Address,
    call_params: Bytes,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RpcResponse {
    jsonrpc: String,
    id: Value,
    #[serde(default)]
    result: Option<OffchainResult>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct OffchainResult {
    success: bool,
    response_payload: Bytes,
    signature: Bytes,
}

pub struct HttpOffchainClient {
    http: reqwest::Client,
    method: String,
    timeout: Duration,
    max_response_bytes: usize,
    max_payload_bytes: usize,
    next_id: AtomicU64,
}

impl HttpOffchainClient {
    pub fn new(config: &OffchainConfig) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(Self {
            http,
            method: config.method.clone(),
            timeout: config.timeout(),
            max_response_bytes: config.max_response_bytes,
            max_payload_bytes: config.max_payload_bytes,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call(
        &self,
        registration: &Registration,
        request: &ComputeRequest,
    ) -> Result<ComputeResponse, RequestError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = RpcRequest {
            jsonrpc: "2.0",
            id,
            method: &self.method,
            params: OffchainParams {
                request_id: request.request_id,
                source_contract: request.account,
                call_params: request.call_params.clone(),
            },
        };

        let mut resp = self
            .http
            .post(&registration.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(RequestError::Unreachable(format!("endpoint answered {status}")));
        }
        if resp.content_length().is_some_and(|len| len > self.max_response_bytes as u64) {
            return Err(RequestError::Malformed(format!(
                "response exceeds {} bytes",
                self.max_response_bytes
            )));
        }

        let mut raw = Vec::new();
        while let Some(chunk) = resp.chunk().await.map_err(transport_error)? {
            if raw.len() + chunk.len() > self.max_response_bytes {
                return Err(RequestError::Malformed(format!(
                    "response exceeds {} bytes",
                    self.max_response_bytes
                )));
            }
            raw.extend_from_slice(&chunk);
        }

        let parsed: RpcResponse =
            serde_json::from_slice(&raw).map_err(|e| RequestError::Malformed(format!("invalid body: {e}")))?;
        if parsed.jsonrpc != "2.0" {
            return Err(RequestError::Malformed(format!("unexpected jsonrpc version {}", parsed.jsonrpc)));
        }
        if parsed.id != Value::from(id) {
            return Err(RequestError::Malformed(format!("response id {} does not match {id}", parsed.id)));
        }
        if let Some(err) = parsed.error {
            return Err(RequestError::Malformed(format!("service returned error {err}")));
        }
        let result = parsed
            .result
            .ok_or_else(|| RequestError::Malformed("response has neither result nor error".into()))?;
        if result.signature.len() != 65 {
            return Err(RequestError::Malformed(format!(
                "signature is {} bytes, expected 65",
                result.signature.len()
            )));
        }
        if result.response_payload.len() > self.max_payload_bytes {
            return Err(RequestError::Malformed(format!(
                "payload exceeds {} bytes",
                self.max_payload_bytes
            )));
        }

        debug!(
            request_id = %request.request_id,
            success = result.success,
            payload_len = result.response_payload.len(),
            "off-chain response received"
        );
        Ok(ComputeResponse {
            success: result.success,
            payload: result.response_payload,
            signer: registration.signer,
            signature: result.signature,
        })
    }
}

#[async_trait]
impl OffchainClient for HttpOffchainClient {
    async fn request(
        &self,
        registration: &Registration,
        request: &ComputeRequest,
    ) -> Result<ComputeResponse, RequestError> {
        match tokio::time::timeout(self.timeout, self.call(registration, request)).await {
            Ok(result) => result,
            Err(_) => Err(RequestError::Timeout),
        }
    }
}

fn transport_error(err: reqwest::Error) -> RequestError {
    if err.is_timeout() {
        RequestError::Timeout
    } else {
        RequestError::Unreachable(err.to_string())
    }
}
