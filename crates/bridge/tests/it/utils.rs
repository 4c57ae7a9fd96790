//! Mock collaborators and helpers shared by the bridge tests

use alloy_primitives::{Address, Bytes, ChainId, address};
use alloy_rpc_types::TransactionRequest;
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use provider_bridge::{
    ApprovalCase, BridgeConfig, BridgeHandle, CaseId, PermissionStore, Provider, ProviderApi,
    ProviderEvents, WalletSigner,
    error::BridgeError,
    forwarder::RpcForwarder,
    reputation::{OriginReputation, ReputationService, Simulation},
    signer::SignerError,
};
use provider_bridge_core::{Origin, event::ProviderEvent, request::SignPayload};
use provider_bridge_rpc::error::{ErrorCode, RpcError};
use serde_json::Value;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

pub const ALICE: Address = address!("0x70997970C51812dc3A010C7d01b50e0d17dc79C8");
pub const BOB: Address = address!("0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC");
pub const MALLORY: Address = address!("0x90F79bf6EB2c4f870365E785982E1f101E93b906");

pub const DAPP: &str = "https://app.dapp.example";
pub const OTHER_DAPP: &str = "https://other.example";

/// How long a test waits for something that should happen right away
pub const WAIT: Duration = Duration::from_secs(5);

/// Keystore of fixed accounts producing recognizable signatures
#[derive(Debug, Default)]
pub struct MockSigner {
    accounts: Vec<Address>,
    delays: Mutex<HashMap<Bytes, Duration>>,
    signed: Mutex<Vec<(Address, SignPayload)>>,
}

impl MockSigner {
    pub fn new(accounts: Vec<Address>) -> Self {
        Self { accounts, ..Default::default() }
    }

    /// Makes signing `message` take `delay`
    pub fn delay_message(&self, message: impl Into<Bytes>, delay: Duration) {
        self.delays.lock().insert(message.into(), delay);
    }

    pub fn signed(&self) -> Vec<(Address, SignPayload)> {
        self.signed.lock().clone()
    }

    /// The signature this signer produces for a message: the account followed by the message
    pub fn message_signature(from: Address, message: &[u8]) -> Bytes {
        [from.as_slice(), message].concat().into()
    }
}

#[async_trait]
impl WalletSigner for MockSigner {
    fn accounts(&self) -> Vec<Address> {
        self.accounts.clone()
    }

    async fn sign(&self, from: Address, payload: &SignPayload) -> Result<Bytes, SignerError> {
        if !self.accounts.contains(&from) {
            return Err(SignerError::new(format!("unknown account {from}")));
        }
        let signature = match payload {
            SignPayload::Message(message) => {
                let delay = self.delays.lock().get(message).copied();
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Self::message_signature(from, message)
            }
            SignPayload::Transaction { request, .. } => {
                request.value.unwrap_or_default().to_be_bytes_vec().into()
            }
            SignPayload::TypedData(_) => from.to_vec().into(),
        };
        self.signed.lock().push((from, payload.clone()));
        Ok(signature)
    }
}

/// Network endpoint answering from a fixed table and recording what it was asked
#[derive(Debug, Default)]
pub struct MockForwarder {
    responses: Mutex<HashMap<String, Result<Value, RpcError>>>,
    calls: Mutex<Vec<(ChainId, String, Value)>>,
}

impl MockForwarder {
    pub fn respond(&self, method: &str, response: Result<Value, RpcError>) {
        self.responses.lock().insert(method.to_string(), response);
    }

    pub fn calls(&self) -> Vec<(ChainId, String, Value)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl RpcForwarder for MockForwarder {
    async fn forward(
        &self,
        chain_id: ChainId,
        method: &str,
        params: Value,
    ) -> Result<Value, RpcError> {
        self.calls.lock().push((chain_id, method.to_string(), params));
        self.responses
            .lock()
            .get(method)
            .cloned()
            .unwrap_or_else(|| Err(RpcError::new(ErrorCode::MethodNotFound)))
    }
}

/// Reputation service with a fixed phishing list and slow simulations
#[derive(Debug, Default)]
pub struct MockReputation {
    phishing: Mutex<HashSet<String>>,
    simulation_delay: Mutex<Duration>,
}

impl MockReputation {
    pub fn flag(&self, origin: &str) {
        self.phishing.lock().insert(origin.to_string());
    }

    pub fn delay_simulations(&self, delay: Duration) {
        *self.simulation_delay.lock() = delay;
    }
}

#[async_trait]
impl ReputationService for MockReputation {
    async fn check_origin(&self, origin: &Origin) -> provider_bridge::Result<OriginReputation> {
        let phishing = self.phishing.lock().contains(&origin.to_string());
        Ok(OriginReputation { phishing, reason: None })
    }

    async fn simulate(
        &self,
        _chain_id: ChainId,
        _tx: &TransactionRequest,
    ) -> provider_bridge::Result<Simulation> {
        let delay = *self.simulation_delay.lock();
        tokio::time::sleep(delay).await;
        Err(BridgeError::UpstreamUnavailable("simulations are not mocked".to_string()))
    }
}

/// A running bridge with mocked collaborators
pub struct TestBridge {
    pub api: ProviderApi,
    pub handle: BridgeHandle,
    pub signer: Arc<MockSigner>,
    pub forwarder: Arc<MockForwarder>,
    pub reputation: Arc<MockReputation>,
}

/// Builds a [`TestBridge`]
pub struct TestBridgeBuilder {
    config: BridgeConfig,
    store: PermissionStore,
    signer: MockSigner,
    reputation: MockReputation,
}

impl TestBridgeBuilder {
    /// Connects `origin` to `address` on `chain_id` before the host starts.
    pub fn with_grant(self, origin: &str, address: Address, chain_id: ChainId) -> Self {
        self.store.set(origin, address, chain_id).unwrap();
        self
    }

    pub fn with_config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_reputation(mut self, reputation: MockReputation) -> Self {
        self.reputation = reputation;
        self
    }

    pub fn with_signer(mut self, signer: MockSigner) -> Self {
        self.signer = signer;
        self
    }

    pub fn spawn(self) -> TestBridge {
        crate::init_tracing();
        let signer = Arc::new(self.signer);
        let forwarder = Arc::new(MockForwarder::default());
        let reputation = Arc::new(self.reputation);
        let api = ProviderApi::new(&self.config, signer.clone())
            .with_store(self.store)
            .with_forwarder(forwarder.clone())
            .with_reputation(reputation.clone());
        let handle = provider_bridge::spawn(api.clone(), self.config.approval.timeout());
        TestBridge { api, handle, signer, forwarder, reputation }
    }
}

impl TestBridge {
    pub fn builder() -> TestBridgeBuilder {
        TestBridgeBuilder {
            config: BridgeConfig::default(),
            store: PermissionStore::new(),
            signer: MockSigner::new(vec![ALICE, BOB]),
            reputation: MockReputation::default(),
        }
    }

    pub fn spawn() -> Self {
        Self::builder().spawn()
    }

    /// Loads a page and consumes its `connect` event.
    pub async fn page(&self, url: &str) -> (Provider, ProviderEvents) {
        let (provider, mut events) = self.handle.attach(url);
        let event = next_event(&mut events).await;
        assert!(matches!(event, ProviderEvent::Connect { .. }), "{event:?}");
        (provider, events)
    }

    /// Waits until a case other than `after` is presented.
    pub async fn presented_after(&self, after: Option<CaseId>) -> ApprovalCase {
        let mut rx = self.api.approvals().subscribe();
        let case = tokio::time::timeout(
            WAIT,
            rx.wait_for(|case| case.as_ref().is_some_and(|case| Some(case.id) != after)),
        )
        .await
        .expect("no case was presented")
        .unwrap()
        .clone();
        case.unwrap()
    }

    pub async fn presented(&self) -> ApprovalCase {
        self.presented_after(None).await
    }

    /// Waits until exactly `n` cases are queued.
    pub async fn queued(&self, n: usize) {
        let queue = self.api.approvals().clone();
        tokio::time::timeout(WAIT, async move {
            while queue.len() != n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("expected {n} queued cases"));
    }

    /// Waits until no case is left in the queue.
    pub async fn queue_drained(&self) {
        self.queued(0).await
    }
}

pub async fn next_event(events: &mut ProviderEvents) -> ProviderEvent {
    tokio::time::timeout(WAIT, events.next()).await.expect("no event").expect("events closed")
}

/// Asserts that no event arrives within a short while.
pub async fn assert_no_event(events: &mut ProviderEvents) {
    if let Ok(event) = tokio::time::timeout(Duration::from_millis(100), events.next()).await {
        panic!("unexpected event {event:?}");
    }
}

/// The error code of a failed call
pub fn error_code(err: provider_bridge::ProviderError) -> ErrorCode {
    match err {
        provider_bridge::ProviderError::Rpc(err) => err.code,
        other => panic!("expected an rpc error, got {other:?}"),
    }
}
