//! The method dispatcher: answers reads, gates signing and chain changes on the origin's grant
//! and routes sensitive requests through the approval queue.

use crate::{
    approval::{ApprovalQueue, ApprovalRequest},
    chain::ChainSelector,
    config::BridgeConfig,
    error::{BridgeError, Result, ToRpcResponseResult, to_rpc_result},
    forwarder::{HttpForwarder, RpcForwarder},
    logging::LoggingManager,
    macros::bridge_info,
    permissions::PermissionStore,
    reputation::{NoReputation, ReputationService},
    risk::{RiskInput, RiskPipeline},
    signer::WalletSigner,
};
use alloy_primitives::{Address, Bytes, ChainId};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use provider_bridge_core::{
    ChainDescriptor, HexChainId, MethodKind, Origin, PermissionGrant, ProviderRequest,
    RiskVerdict,
    chain::{AddChainParams, SwitchChainParams},
    permission::{ETH_ACCOUNTS_CAPABILITY, Permission},
    request::PermissionRequest,
};
use provider_bridge_rpc::{
    error::RpcError,
    request::{CallId, ProviderCall},
    response::ResponseResult,
};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use tracing::{debug, trace};

/// Identifies a loaded page, a new id is assigned on every load
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// A call that arrived from a page and has not been answered yet
#[derive(Clone, Debug)]
pub struct PendingRequest {
    pub id: CallId,
    pub session: SessionId,
    /// Derived by the host from the page's own navigation state, never from the call
    pub origin: Origin,
    pub request: ProviderRequest,
    /// The raw params, kept for display
    pub params: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl PendingRequest {
    /// Parses a call received from a page of the given origin.
    pub fn from_call(
        session: SessionId,
        origin: Origin,
        call: ProviderCall,
    ) -> std::result::Result<Self, RpcError> {
        let request = ProviderRequest::from_call(&call.method, call.params.clone())?;
        Ok(Self {
            id: call.id,
            session,
            origin,
            request,
            params: call.params.into(),
            created_at: Utc::now(),
        })
    }

    pub fn kind(&self) -> MethodKind {
        self.request.kind()
    }
}

/// How a request is answered
pub enum Dispatch {
    /// Answered without waiting on anything
    Immediate(ResponseResult),
    /// Answered once a human decision or a network call completes
    Deferred(BoxFuture<'static, ResponseResult>),
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate(res) => f.debug_tuple("Immediate").field(res).finish(),
            Self::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// Reply of the connect methods: the accounts for `eth_requestAccounts`, the permissions for
/// `wallet_requestPermissions`
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
enum ConnectReply {
    Accounts(Vec<Address>),
    Permissions(Vec<Permission>),
}

impl ConnectReply {
    fn new(request: &ProviderRequest, grant: &PermissionGrant) -> Self {
        match request {
            ProviderRequest::RequestPermissions(_) => Self::Permissions(vec![grant.as_permission()]),
            _ => Self::Accounts(vec![grant.address]),
        }
    }
}

/// Handles the provider calls of every page
#[derive(Clone)]
pub struct ProviderApi {
    store: PermissionStore,
    chains: ChainSelector,
    risk: RiskPipeline,
    approvals: ApprovalQueue,
    signer: Arc<dyn WalletSigner>,
    forwarder: Arc<dyn RpcForwarder>,
    logging: LoggingManager,
}

// === impl ProviderApi ===

impl ProviderApi {
    /// Creates the api for the configured chains, with an empty permission store, an HTTP
    /// forwarder and no reputation service.
    pub fn new(config: &BridgeConfig, signer: Arc<dyn WalletSigner>) -> Self {
        let chains = ChainSelector::new(config.registry(), config.default_chain_id);
        Self {
            store: PermissionStore::new(),
            forwarder: Arc::new(HttpForwarder::new(chains.clone())),
            chains,
            risk: RiskPipeline::new(config.risk.clone(), Arc::new(NoReputation)),
            approvals: ApprovalQueue::new(),
            signer,
            logging: LoggingManager::default(),
        }
    }

    pub fn with_forwarder(mut self, forwarder: Arc<dyn RpcForwarder>) -> Self {
        self.forwarder = forwarder;
        self
    }

    pub fn with_reputation(mut self, reputation: Arc<dyn ReputationService>) -> Self {
        self.risk = RiskPipeline::new(self.risk.config().clone(), reputation);
        self
    }

    /// Uses an existing store, e.g. one restored from a snapshot
    pub fn with_store(mut self, store: PermissionStore) -> Self {
        self.store = store;
        self
    }

    pub fn with_logging(mut self, logging: LoggingManager) -> Self {
        self.logging = logging;
        self
    }

    pub fn store(&self) -> &PermissionStore {
        &self.store
    }

    pub fn chains(&self) -> &ChainSelector {
        &self.chains
    }

    pub fn approvals(&self) -> &ApprovalQueue {
        &self.approvals
    }

    pub fn logging(&self) -> &LoggingManager {
        &self.logging
    }

    /// Executes the request.
    ///
    /// Validation failures are always answered immediately, only requests that wait for a
    /// human decision or a network endpoint are deferred.
    pub fn execute(&self, req: PendingRequest) -> Dispatch {
        trace!(target: "bridge::dispatch", id = %req.id, origin = %req.origin, method = req.request.method(), "executing request");
        let origin = &req.origin;
        let response = match &req.request {
            ProviderRequest::EthChainId(()) => self.eth_chain_id(origin).to_rpc_result(),
            ProviderRequest::NetVersion(()) => self.net_version(origin).to_rpc_result(),
            ProviderRequest::EthAccounts(()) => self.accounts(origin).to_rpc_result(),
            ProviderRequest::EthCoinbase(()) => self.coinbase(origin).to_rpc_result(),
            ProviderRequest::GetPermissions(()) => self.permissions(origin).to_rpc_result(),
            ProviderRequest::RevokePermissions(request) => {
                self.revoke_permissions(origin, request).to_rpc_result()
            }
            ProviderRequest::SwitchChain(params) => {
                self.switch_chain(origin, params).to_rpc_result()
            }
            ProviderRequest::EthRequestAccounts(()) | ProviderRequest::RequestPermissions(_) => {
                return self.request_accounts(req);
            }
            ProviderRequest::EthSendTransaction(_) |
            ProviderRequest::EthSignTransaction(_) |
            ProviderRequest::PersonalSign(..) |
            ProviderRequest::EthSign(..) |
            ProviderRequest::EthSignTypedDataV3(..) |
            ProviderRequest::EthSignTypedDataV4(..) => return self.sign(req),
            ProviderRequest::AddChain(_) => return self.add_chain(req),
            ProviderRequest::Passthrough { method, params } => {
                let forwarder = self.forwarder.clone();
                let chain_id = self.chain_id_for(origin);
                let (method, params) = (method.clone(), params.clone());
                return Dispatch::Deferred(Box::pin(async move {
                    forwarder.forward(chain_id, &method, params).await.into()
                }));
            }
        };
        Dispatch::Immediate(response)
    }

    /// Executes the request and waits for its response.
    pub async fn execute_and_wait(&self, req: PendingRequest) -> ResponseResult {
        match self.execute(req) {
            Dispatch::Immediate(res) => res,
            Dispatch::Deferred(fut) => fut.await,
        }
    }

    /// The chain an origin sees: its granted chain, or the wallet's active chain when it isn't
    /// connected.
    pub fn chain_id_for(&self, origin: &Origin) -> ChainId {
        self.store.get(origin).map(|grant| grant.chain_id).unwrap_or_else(|| self.chains.active())
    }

    /// Handler for ETH RPC call: `eth_chainId`
    pub fn eth_chain_id(&self, origin: &Origin) -> Result<HexChainId> {
        Ok(HexChainId(self.chain_id_for(origin)))
    }

    /// Handler for RPC call: `net_version`
    pub fn net_version(&self, origin: &Origin) -> Result<String> {
        Ok(self.chain_id_for(origin).to_string())
    }

    /// Handler for ETH RPC call: `eth_accounts`
    ///
    /// Never fails and never connects, an origin without a grant gets no accounts.
    pub fn accounts(&self, origin: &Origin) -> Result<Vec<Address>> {
        Ok(self.store.get(origin).map(|grant| vec![grant.address]).unwrap_or_default())
    }

    /// Handler for ETH RPC call: `eth_coinbase`
    pub fn coinbase(&self, origin: &Origin) -> Result<Option<Address>> {
        Ok(self.store.get(origin).map(|grant| grant.address))
    }

    /// Handler for RPC call: `wallet_getPermissions`
    pub fn permissions(&self, origin: &Origin) -> Result<Vec<Permission>> {
        Ok(self.store.get(origin).map(|grant| vec![grant.as_permission()]).unwrap_or_default())
    }

    /// Handler for RPC call: `wallet_revokePermissions`
    pub fn revoke_permissions(&self, origin: &Origin, request: &PermissionRequest) -> Result<()> {
        validate_permission_request(request)?;
        if self.store.clear(origin)?.is_some() {
            bridge_info!("{} revoked its account access", origin);
        }
        Ok(())
    }

    /// Handler for RPC call: `wallet_switchEthereumChain`
    ///
    /// A connected origin may switch to any recognized chain without a prompt.
    pub fn switch_chain(&self, origin: &Origin, params: &SwitchChainParams) -> Result<()> {
        let chain_id = params.chain_id.id();
        if !self.store.is_connected(origin) {
            return Err(BridgeError::Unauthorized);
        }
        if !self.chains.contains(chain_id) {
            return Err(BridgeError::UnrecognizedChain(chain_id));
        }
        self.store.set_chain(origin, chain_id)?;
        self.chains.set_active(chain_id)?;
        bridge_info!("{} switched to chain {}", origin, params.chain_id);
        Ok(())
    }

    /// Handler for ETH RPC call: `eth_requestAccounts` and `wallet_requestPermissions`
    fn request_accounts(&self, req: PendingRequest) -> Dispatch {
        if let ProviderRequest::RequestPermissions(request) = &req.request &&
            let Err(err) = validate_permission_request(request)
        {
            return Dispatch::Immediate(Err::<(), _>(err).to_rpc_result());
        }
        if let Some(grant) = self.store.get(&req.origin) {
            return Dispatch::Immediate(to_rpc_result(ConnectReply::new(&req.request, &grant)));
        }
        let api = self.clone();
        Dispatch::Deferred(Box::pin(async move { api.connect(req).await.to_rpc_result() }))
    }

    async fn connect(&self, req: PendingRequest) -> Result<ConnectReply> {
        let origin = &req.origin;
        if let Some(grant) = self.reconnect_remembered(origin).await? {
            return Ok(ConnectReply::new(&req.request, &grant));
        }

        let chain_id = self.chains.active();
        let verdict = self
            .risk
            .assess(RiskInput {
                origin,
                request: &req.request,
                chain_id,
                first_visit: !self.store.is_known(origin),
            })
            .await;
        let mut ticket =
            self.approvals.submit(self.approval_request(&req, verdict, self.signer.accounts()));
        let approval = ticket.outcome().await.map_err(BridgeError::UserRejected)?;
        let account = approval
            .account
            .ok_or_else(|| BridgeError::internal("connect approved without an account"))?;

        // a concurrent approval for the same origin may have written first, the last one wins
        let grant = self.store.set(origin, account, chain_id)?;
        if approval.remember {
            self.store.remember(origin, account)?;
        }
        bridge_info!("Connected {} to {}", origin, account);
        Ok(ConnectReply::new(&req.request, &grant))
    }

    /// Reconnects an origin without asking if the user chose to remember its account.
    ///
    /// The choice is used once. It is ignored if the account is gone from the wallet or the
    /// origin now rates as dangerous, the request then goes through the approval queue.
    async fn reconnect_remembered(&self, origin: &Origin) -> Result<Option<PermissionGrant>> {
        let Some(address) = self.store.take_remembered(origin) else { return Ok(None) };
        if !self.signer.is_signer_for(&address) {
            debug!(target: "bridge::dispatch", %origin, %address, "remembered account is gone");
            return Ok(None);
        }
        let verdict = self.risk.assess_origin(origin).await;
        if verdict.level.requires_acknowledgement() {
            debug!(target: "bridge::dispatch", %origin, level = %verdict.level, "remembered origin needs a prompt");
            return Ok(None);
        }
        let grant = self.store.set(origin, address, self.chains.active())?;
        bridge_info!("Reconnected {} to remembered account {}", origin, address);
        Ok(Some(grant))
    }

    fn sign(&self, req: PendingRequest) -> Dispatch {
        match self.validate_signing(&req) {
            Ok(grant) => {
                let api = self.clone();
                Dispatch::Deferred(Box::pin(async move {
                    api.sign_approved(req, grant).await.to_rpc_result()
                }))
            }
            Err(err) => {
                debug!(target: "bridge::dispatch", id = %req.id, origin = %req.origin, %err, "rejected signing request");
                Dispatch::Immediate(Err::<(), _>(err).to_rpc_result())
            }
        }
    }

    /// Checks a signing request against the origin's grant, before any risk check or prompt.
    fn validate_signing(&self, req: &PendingRequest) -> Result<PermissionGrant> {
        let grant = self.store.get(&req.origin).ok_or(BridgeError::Unauthorized)?;
        let requested = req
            .request
            .claimed_signer()
            .ok_or_else(|| BridgeError::invalid_params("missing `from` address"))?;
        if !grant.is_signer(&requested) {
            return Err(BridgeError::AccountMismatch { requested, granted: grant.address });
        }
        match req.request.bound_chain_id() {
            Ok(Some(chain_id)) if chain_id != grant.chain_id => {
                Err(BridgeError::invalid_params(format!(
                    "chainId {} does not match the connected chain {}",
                    HexChainId(chain_id),
                    HexChainId(grant.chain_id)
                )))
            }
            Ok(_) => Ok(grant),
            Err(msg) => Err(BridgeError::invalid_params(msg)),
        }
    }

    async fn sign_approved(&self, req: PendingRequest, grant: PermissionGrant) -> Result<Bytes> {
        let payload = req
            .request
            .sign_payload()
            .ok_or_else(|| BridgeError::internal("not a signing request"))?;
        let verdict = self
            .risk
            .assess(RiskInput {
                origin: &req.origin,
                request: &req.request,
                chain_id: grant.chain_id,
                first_visit: false,
            })
            .await;
        let mut ticket = self.approvals.submit(self.approval_request(&req, verdict, Vec::new()));
        ticket.outcome().await.map_err(BridgeError::UserRejected)?;

        // the grant may have changed while the case was presented
        let current = self.store.get(&req.origin).ok_or(BridgeError::Unauthorized)?;
        if !current.is_signer(&grant.address) {
            return Err(BridgeError::AccountMismatch {
                requested: grant.address,
                granted: current.address,
            });
        }

        let signed = self.signer.sign(grant.address, &payload).await?;
        bridge_info!("Signed {} for {} with {}", req.request.method(), req.origin, grant.address);
        Ok(signed)
    }

    /// Handler for RPC call: `wallet_addEthereumChain`
    ///
    /// Adding an already recognized chain is a no-op. An unknown chain is added once the user
    /// approves it, the active chain is left as is.
    fn add_chain(&self, req: PendingRequest) -> Dispatch {
        let ProviderRequest::AddChain(params) = &req.request else {
            return Dispatch::Immediate(RpcError::internal_error().into());
        };
        let descriptor = match self.validate_add_chain(&req.origin, params) {
            Ok(Some(descriptor)) => descriptor,
            Ok(None) => return Dispatch::Immediate(to_rpc_result(())),
            Err(err) => return Dispatch::Immediate(Err::<(), _>(err).to_rpc_result()),
        };
        let api = self.clone();
        Dispatch::Deferred(Box::pin(async move {
            api.add_chain_approved(req, descriptor).await.to_rpc_result()
        }))
    }

    /// Returns the descriptor of the chain to add, or `None` if it is already recognized.
    fn validate_add_chain(
        &self,
        origin: &Origin,
        params: &AddChainParams,
    ) -> Result<Option<ChainDescriptor>> {
        if !self.store.is_connected(origin) {
            return Err(BridgeError::Unauthorized);
        }
        let chain_id = params.chain_id.id();
        if self.chains.contains(chain_id) {
            return Ok(None);
        }
        let rpc_url = params
            .rpc_urls
            .first()
            .ok_or_else(|| BridgeError::invalid_params("rpcUrls must contain at least one url"))?;
        let url = url::Url::parse(rpc_url)
            .map_err(|err| BridgeError::invalid_params(format!("invalid rpc url {rpc_url:?}: {err}")))?;
        if !matches!(url.scheme(), "https" | "http") {
            return Err(BridgeError::invalid_params(format!(
                "unsupported rpc url scheme {:?}",
                url.scheme()
            )));
        }

        let mut descriptor = ChainDescriptor::new(chain_id).with_rpc_url(rpc_url.clone());
        if let Some(name) = &params.chain_name {
            descriptor.name = name.clone();
        }
        if let Some(currency) = &params.native_currency {
            descriptor = descriptor.with_symbol(currency.symbol.clone());
            descriptor.decimals = currency.decimals;
        }
        Ok(Some(descriptor))
    }

    async fn add_chain_approved(&self, req: PendingRequest, chain: ChainDescriptor) -> Result<()> {
        let verdict = self.risk.assess_origin(&req.origin).await;
        let mut ticket = self.approvals.submit(self.approval_request(&req, verdict, Vec::new()));
        ticket.outcome().await.map_err(BridgeError::UserRejected)?;

        // the origin may have been disconnected while the case was presented
        if !self.store.is_connected(&req.origin) {
            return Err(BridgeError::Unauthorized);
        }
        let (chain_id, name) = (chain.chain_id, chain.name.clone());
        if self.chains.add_chain(chain) {
            bridge_info!("{} added chain {} ({})", req.origin, name, HexChainId(chain_id));
        }
        Ok(())
    }

    fn approval_request(
        &self,
        req: &PendingRequest,
        verdict: RiskVerdict,
        accounts: Vec<Address>,
    ) -> ApprovalRequest {
        ApprovalRequest {
            session: req.session,
            call_id: req.id.clone(),
            origin: req.origin.clone(),
            kind: req.kind(),
            method: req.request.method().to_string(),
            payload: req.params.clone(),
            verdict,
            accounts,
        }
    }
}

impl fmt::Debug for ProviderApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderApi")
            .field("store", &self.store)
            .field("chains", &self.chains)
            .field("approvals", &self.approvals)
            .finish_non_exhaustive()
    }
}

/// Only the `eth_accounts` capability exists.
fn validate_permission_request(request: &PermissionRequest) -> Result<()> {
    if request.is_empty() {
        return Err(BridgeError::invalid_params("no permissions requested"));
    }
    if let Some(name) = request.keys().find(|name| *name != ETH_ACCOUNTS_CAPABILITY) {
        return Err(BridgeError::invalid_params(format!("unknown permission {name:?}")));
    }
    Ok(())
}
