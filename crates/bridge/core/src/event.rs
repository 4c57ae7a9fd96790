//! Events the host pushes into pages outside of any call

use crate::chain::HexChainId;
use alloy_primitives::Address;
use provider_bridge_rpc::response::ProviderResponse;
use serde::{Deserialize, Serialize};

/// An EIP-1193 provider event, serialized as `{ "event": name, "data": payload }`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ProviderEvent {
    #[serde(rename = "accountsChanged")]
    AccountsChanged(Vec<Address>),
    #[serde(rename = "chainChanged")]
    ChainChanged(HexChainId),
    #[serde(rename = "connect", rename_all = "camelCase")]
    Connect { chain_id: HexChainId },
    #[serde(rename = "disconnect")]
    Disconnect { code: i64, message: String },
}

impl ProviderEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AccountsChanged(_) => "accountsChanged",
            Self::ChainChanged(_) => "chainChanged",
            Self::Connect { .. } => "connect",
            Self::Disconnect { .. } => "disconnect",
        }
    }
}

/// Everything the host writes to a page: replies to calls, and events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HostMessage {
    Event(ProviderEvent),
    Response(ProviderResponse),
}

impl From<ProviderResponse> for HostMessage {
    fn from(resp: ProviderResponse) -> Self {
        Self::Response(resp)
    }
}

impl From<ProviderEvent> for HostMessage {
    fn from(event: ProviderEvent) -> Self {
        Self::Event(event)
    }
}
