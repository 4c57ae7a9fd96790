//! Relays generic chain reads to the selected chain's network endpoint

use crate::chain::ChainSelector;
use alloy_primitives::ChainId;
use async_trait::async_trait;
use provider_bridge_core::HexChainId;
use provider_bridge_rpc::error::{ErrorCode, RpcError};
use serde::Deserialize;
use serde_json::Value;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tracing::trace;

/// Forwards a call to a chain's network endpoint and returns the raw result
#[async_trait]
pub trait RpcForwarder: Send + Sync {
    /// returns the endpoint's `result` verbatim, or its `error` verbatim
    async fn forward(&self, chain_id: ChainId, method: &str, params: Value)
    -> Result<Value, RpcError>;
}

/// [`RpcForwarder`] posting JSON-RPC 2.0 requests to the `rpc_url` of the configured chain
#[derive(Clone, Debug)]
pub struct HttpForwarder {
    client: reqwest::Client,
    chains: ChainSelector,
    next_id: Arc<AtomicU64>,
}

impl HttpForwarder {
    pub fn new(chains: ChainSelector) -> Self {
        Self::with_client(reqwest::Client::new(), chains)
    }

    pub fn with_client(client: reqwest::Client, chains: ChainSelector) -> Self {
        Self { client, chains, next_id: Default::default() }
    }
}

#[async_trait]
impl RpcForwarder for HttpForwarder {
    async fn forward(
        &self,
        chain_id: ChainId,
        method: &str,
        params: Value,
    ) -> Result<Value, RpcError> {
        let url = self.chains.get(chain_id).and_then(|chain| chain.rpc_url).ok_or_else(|| {
            RpcError::internal_error_with(format!(
                "no rpc endpoint configured for chain {}",
                HexChainId(chain_id)
            ))
        })?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        trace!(target: "bridge::dispatch", %url, method, id, "forwarding request");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|err| RpcError::internal_error_with(format!("request failed: {err}")))?;
        let payload: Value = response
            .json()
            .await
            .map_err(|err| RpcError::internal_error_with(format!("invalid response: {err}")))?;
        relay_response(payload)
    }
}

/// Splits a JSON-RPC 2.0 response into its result or its error, keeping both verbatim.
pub fn relay_response(payload: Value) -> Result<Value, RpcError> {
    #[derive(Deserialize)]
    struct Relayed {
        code: i64,
        message: String,
        #[serde(default)]
        data: Option<Value>,
    }

    #[derive(Deserialize)]
    struct Response {
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<Relayed>,
    }

    let response: Response = serde_json::from_value(payload)
        .map_err(|err| RpcError::internal_error_with(format!("invalid response: {err}")))?;
    match response.error {
        Some(err) => Err(RpcError {
            code: ErrorCode::from(err.code),
            message: err.message.into(),
            data: err.data,
        }),
        None => Ok(response.result.unwrap_or(Value::Null)),
    }
}
