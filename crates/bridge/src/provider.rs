//! The page half of the bridge: the object injected into a loaded page.
//!
//! Every call gets a process-unique [`CallId`] and a pending continuation, the frame is handed to
//! the host and the continuation is settled by the reply that carries the same id. Replies may
//! arrive in any order.

use crate::{api::SessionId, host::BridgeHandle};
use alloy_primitives::Address;
use futures::{
    Stream, StreamExt,
    channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded},
};
use parking_lot::Mutex;
use provider_bridge_core::event::{HostMessage, ProviderEvent};
use provider_bridge_rpc::{
    error::RpcError,
    request::{CallId, JsonRpcPayload, ProviderCall, RequestParams},
    response::{JsonRpcReply, ResponseResult},
};
use serde_json::Value;
use std::{
    collections::HashMap,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    task::{Context, Poll},
};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

/// Continuations of the calls that were sent and not answered yet
type PendingCalls = Arc<Mutex<HashMap<CallId, oneshot::Sender<ResponseResult>>>>;

/// Errors a page sees when calling the provider
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The host answered with an error
    #[error(transparent)]
    Rpc(#[from] RpcError),
    /// The call was discarded before it was answered, the page was torn down
    #[error("call {0} was discarded")]
    Discarded(CallId),
    #[error("the provider is disconnected")]
    Disconnected,
}

impl ProviderError {
    /// The error as a page would see it in a JSON-RPC reply
    pub fn into_rpc_error(self) -> RpcError {
        match self {
            Self::Rpc(err) => err,
            Self::Discarded(_) | Self::Disconnected => RpcError::disconnected(),
        }
    }
}

/// The EIP-1193 provider of a single page load
///
/// Cloning is cheap, the page is detached from the host when the last clone is dropped.
#[derive(Clone, Debug)]
pub struct Provider {
    inner: Arc<ProviderInner>,
}

#[derive(Debug)]
struct ProviderInner {
    session: SessionId,
    handle: BridgeHandle,
    pending: PendingCalls,
    closed: AtomicBool,
}

impl Drop for ProviderInner {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Relaxed) {
            self.handle.detach(self.session);
        }
        self.pending.lock().clear();
    }
}

// === impl Provider ===

impl Provider {
    pub fn session(&self) -> SessionId {
        self.inner.session
    }

    /// Number of calls waiting for a reply
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }

    /// EIP-1193 `request({ method, params })`.
    ///
    /// `params` may be null, an array or an object.
    pub async fn request(
        &self,
        method: impl Into<String>,
        params: Value,
    ) -> Result<Value, ProviderError> {
        let params = match params {
            Value::Null => RequestParams::None,
            Value::Array(params) => RequestParams::Array(params),
            Value::Object(params) => RequestParams::Object(params),
            _ => {
                return Err(RpcError::invalid_params("params must be an array or an object").into());
            }
        };
        self.call(method.into(), params).await
    }

    /// Legacy `enable()`, same as `eth_requestAccounts`
    pub async fn enable(&self) -> Result<Vec<Address>, ProviderError> {
        let accounts = self.request("eth_requestAccounts", Value::Null).await?;
        serde_json::from_value(accounts)
            .map_err(|err| RpcError::internal_error_with(err.to_string()).into())
    }

    /// Legacy `send(method, params)`
    pub async fn send(
        &self,
        method: impl Into<String>,
        params: Value,
    ) -> Result<Value, ProviderError> {
        self.request(method, params).await
    }

    /// Legacy `sendAsync(payload, callback)`, answers with a full JSON-RPC 2.0 reply
    pub async fn send_async(&self, payload: JsonRpcPayload) -> JsonRpcReply {
        let JsonRpcPayload { id, method, params, .. } = payload;
        let result = self.call(method, params).await.map_err(ProviderError::into_rpc_error);
        JsonRpcReply::new(id, result)
    }

    /// Tears the page down: pending calls are discarded and the host forgets the page.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::Relaxed) {
            return;
        }
        debug!(target: "bridge::page", session = %self.inner.session, "closing provider");
        self.inner.handle.detach(self.inner.session);
        self.inner.pending.lock().clear();
    }

    async fn call(&self, method: String, params: RequestParams) -> Result<Value, ProviderError> {
        if self.is_closed() {
            return Err(ProviderError::Disconnected);
        }
        let id = CallId::next();
        let frame = serde_json::to_string(&ProviderCall::new(method, params, id.clone()))
            .map_err(|err| RpcError::internal_error_with(err.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(id.clone(), tx);
        trace!(target: "bridge::page", session = %self.inner.session, %id, "sending call");
        if !self.inner.handle.send_frame(self.inner.session, frame) {
            self.inner.pending.lock().remove(&id);
            return Err(ProviderError::Disconnected);
        }

        match rx.await {
            Ok(result) => Ok(result.into_result()?),
            Err(_) => Err(ProviderError::Discarded(id)),
        }
    }
}

/// The events the host pushes into a page
#[derive(Debug)]
pub struct ProviderEvents {
    rx: UnboundedReceiver<ProviderEvent>,
}

impl Stream for ProviderEvents {
    type Item = ProviderEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_next_unpin(cx)
    }
}

// === impl BridgeHandle ===

impl BridgeHandle {
    /// Loads a page from `url` and injects a provider into it.
    ///
    /// Spawns the task reading the frames the host writes to the page.
    pub fn attach(&self, url: impl Into<String>) -> (Provider, ProviderEvents) {
        let (session, inbound) = self.attach_page(url);
        let pending = PendingCalls::default();
        let (events_tx, events_rx) = unbounded();
        tokio::spawn(read_frames(session, inbound, Arc::clone(&pending), events_tx));
        let inner = ProviderInner {
            session,
            handle: self.clone(),
            pending,
            closed: AtomicBool::new(false),
        };
        (Provider { inner: Arc::new(inner) }, ProviderEvents { rx: events_rx })
    }
}

/// Settles continuations and forwards events until the host drops the page.
async fn read_frames(
    session: SessionId,
    mut inbound: UnboundedReceiver<String>,
    pending: PendingCalls,
    events: UnboundedSender<ProviderEvent>,
) {
    while let Some(frame) = inbound.next().await {
        match serde_json::from_str::<HostMessage>(&frame) {
            Ok(HostMessage::Response(resp)) => {
                let Some(tx) = pending.lock().remove(&resp.id) else {
                    trace!(target: "bridge::page", %session, id = %resp.id, "reply to unknown call");
                    continue;
                };
                // the caller may have stopped waiting
                let _ = tx.send(resp.result);
            }
            Ok(HostMessage::Event(event)) => {
                trace!(target: "bridge::page", %session, event = event.name(), "received event");
                let _ = events.unbounded_send(event);
            }
            Err(err) => warn!(target: "bridge::page", %session, %err, "invalid host frame"),
        }
    }
    pending.lock().clear();
}
