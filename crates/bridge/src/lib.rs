//! # provider-bridge
//!
//! Lets untrusted web pages request wallet capabilities through an EIP-1193 provider while the
//! wallet enforces per-origin grants and screens every sensitive request before a human decides
//! on it.
//!
//! A page talks to the [`BridgeHost`] through a [`Provider`]. The host hands every call to the
//! [`ProviderApi`], which answers reads right away and routes connect, signing and add-chain
//! requests through the [`ApprovalQueue`].

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod macros;
use macros::bridge_info;

pub mod api;
pub mod approval;
pub mod chain;
pub mod config;
pub mod error;
pub mod forwarder;
pub mod host;
pub mod logging;
pub mod notifier;
pub mod permissions;
pub mod provider;
pub mod reputation;
pub mod risk;
pub mod signer;

pub use api::{Dispatch, PendingRequest, ProviderApi, SessionId};
pub use approval::{
    Approval, ApprovalCase, ApprovalError, ApprovalQueue, ApprovalState, CaseId, Decision,
    RejectReason,
};
pub use chain::ChainSelector;
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use host::{BridgeHandle, BridgeHost, spawn};
pub use logging::LoggingManager;
pub use permissions::{PermissionSnapshot, PermissionStore};
pub use provider::{Provider, ProviderError, ProviderEvents};
pub use reputation::{NoReputation, ReputationService};
pub use risk::RiskPipeline;
pub use signer::{SignerError, WalletSigner};

/// Spawns a host for `config` using `signer` and returns the api and a handle to attach pages.
///
/// Installs the global tracing subscriber unless one is already set, the returned api's
/// [`ProviderApi::logging`] toggles the user facing logs.
pub fn spawn_bridge(
    config: &BridgeConfig,
    signer: std::sync::Arc<dyn WalletSigner>,
) -> (ProviderApi, BridgeHandle) {
    let logging = logging::init_tracing();
    let api = ProviderApi::new(config, signer).with_logging(logging);
    let handle = spawn(api.clone(), config.approval.timeout());
    bridge_info!(chain_id = api.chains().active(), "provider bridge started");
    (api, handle)
}
