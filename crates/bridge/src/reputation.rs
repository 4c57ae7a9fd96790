//! Remote origin reputation and transaction simulation

use crate::error::{BridgeError, Result};
use alloy_primitives::ChainId;
use alloy_rpc_types::TransactionRequest;
use async_trait::async_trait;
use provider_bridge_core::{
    Origin,
    risk::{ApprovalGrant, BalanceChanges},
};
use serde::{Deserialize, Serialize};

/// What the reputation service knows about an origin
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginReputation {
    /// Whether the origin is a known phishing site
    pub phishing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Structured outcome of simulating a transaction
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Simulation {
    #[serde(flatten)]
    pub changes: BalanceChanges,
    #[serde(default)]
    pub approvals: Vec<ApprovalGrant>,
}

/// A best effort remote service, any error is treated as unavailable.
///
/// Implementations should return [`BridgeError::UpstreamUnavailable`] when they can't answer.
#[async_trait]
pub trait ReputationService: Send + Sync {
    async fn check_origin(&self, origin: &Origin) -> Result<OriginReputation>;

    async fn simulate(&self, chain_id: ChainId, tx: &TransactionRequest) -> Result<Simulation>;
}

/// A [`ReputationService`] that is never reachable, the pipeline then relies on local
/// heuristics only.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoReputation;

#[async_trait]
impl ReputationService for NoReputation {
    async fn check_origin(&self, _origin: &Origin) -> Result<OriginReputation> {
        Err(BridgeError::UpstreamUnavailable("no reputation service configured".to_string()))
    }

    async fn simulate(&self, _chain_id: ChainId, _tx: &TransactionRequest) -> Result<Simulation> {
        Err(BridgeError::UpstreamUnavailable("no simulation service configured".to_string()))
    }
}
