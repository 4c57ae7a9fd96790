//! The host half of the bridge
//!
//! A single event loop owns every loaded page and every outstanding call. Pages talk to it only
//! through serialized frames, it answers each call exactly once and pushes provider events to
//! the pages a state change concerns.

use crate::{
    api::{Dispatch, PendingRequest, ProviderApi, SessionId},
    error::BridgeError,
    notifier::{Audience, StateChange, events_for},
};
use futures::{
    FutureExt, StreamExt,
    channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded},
    future::{AbortHandle, Abortable, BoxFuture},
    stream::{FuturesUnordered, SelectAll},
};
use provider_bridge_core::{HexChainId, Origin, OriginError, event::{HostMessage, ProviderEvent}};
use provider_bridge_rpc::{
    error::{ErrorCode, RpcError},
    request::{CallId, ProviderCall},
    response::{ProviderResponse, ResponseResult},
};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};
use tokio::time::Interval;
use tracing::{debug, error, trace, warn};

/// Code and message of the `disconnect` event sent when the host goes away
const DISCONNECTED_MESSAGE: &str = "The provider is disconnected from all chains.";

/// Messages the host loop receives
#[derive(Debug)]
pub enum HostCommand {
    /// A page was loaded from `url`, frames for it go to `outbound`
    Attach { session: SessionId, url: String, outbound: UnboundedSender<String> },
    /// The page was navigated away or torn down
    Detach { session: SessionId },
    /// A serialized [`ProviderCall`] sent by a page
    Frame { session: SessionId, frame: String },
    /// Disconnects every page and stops the loop
    Shutdown,
}

/// Cheap handle to a running host loop
#[derive(Clone, Debug)]
pub struct BridgeHandle {
    commands: UnboundedSender<HostCommand>,
    next_session: Arc<AtomicU64>,
}

// === impl BridgeHandle ===

impl BridgeHandle {
    /// Registers a page loaded from `url` and returns its session and the stream of frames the
    /// host writes to it.
    pub fn attach_page(&self, url: impl Into<String>) -> (SessionId, UnboundedReceiver<String>) {
        let session = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed));
        let (outbound, inbound) = unbounded();
        self.send(HostCommand::Attach { session, url: url.into(), outbound });
        (session, inbound)
    }

    /// Sends a frame on behalf of a page, returns false if the host is gone.
    pub fn send_frame(&self, session: SessionId, frame: String) -> bool {
        self.send(HostCommand::Frame { session, frame })
    }

    pub fn detach(&self, session: SessionId) {
        self.send(HostCommand::Detach { session });
    }

    pub fn shutdown(&self) {
        self.send(HostCommand::Shutdown);
    }

    /// Whether the host loop is still running
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    fn send(&self, cmd: HostCommand) -> bool {
        match self.commands.unbounded_send(cmd) {
            Ok(()) => true,
            Err(err) => {
                trace!(target: "bridge::host", "host is gone, dropping {:?}", err.into_inner());
                false
            }
        }
    }
}

/// Creates the host loop for the api and spawns it on the current tokio runtime.
pub fn spawn(api: ProviderApi, approval_timeout: Option<Duration>) -> BridgeHandle {
    let (host, handle) = BridgeHost::new(api, approval_timeout);
    tokio::spawn(host.run());
    handle
}

/// A loaded page
#[derive(Debug)]
struct Page {
    /// Derived from the url the page was loaded from
    origin: Result<Origin, OriginError>,
    outbound: UnboundedSender<String>,
}

impl Page {
    fn send(&self, msg: &HostMessage) {
        match serde_json::to_string(msg) {
            Ok(frame) => {
                // the page may already be gone, its detach is on the way
                let _ = self.outbound.unbounded_send(frame);
            }
            Err(err) => error!(target: "bridge::host", %err, "failed to serialize host message"),
        }
    }
}

/// An answered call waiting to be delivered, `None` if the call was aborted
type Completion = BoxFuture<'static, Option<(SessionId, CallId, ResponseResult)>>;

/// A call that was received and not answered yet
#[derive(Debug)]
struct Outstanding {
    method: String,
    since: Instant,
    /// Set for deferred calls, aborting drops the dispatch future and the approval case it
    /// waits on
    abort: Option<AbortHandle>,
}

/// The host event loop
pub struct BridgeHost {
    api: ProviderApi,
    commands: UnboundedReceiver<HostCommand>,
    pages: HashMap<SessionId, Page>,
    outstanding: HashMap<(SessionId, CallId), Outstanding>,
    completions: FuturesUnordered<Completion>,
    changes: SelectAll<UnboundedReceiver<StateChange>>,
    approval_timeout: Option<Duration>,
}

// === impl BridgeHost ===

impl BridgeHost {
    pub fn new(api: ProviderApi, approval_timeout: Option<Duration>) -> (Self, BridgeHandle) {
        let (tx, commands) = unbounded();
        let mut changes = SelectAll::new();
        changes.push(api.store().changes());
        changes.push(api.chains().changes());
        let host = Self {
            api,
            commands,
            pages: HashMap::new(),
            outstanding: HashMap::new(),
            completions: FuturesUnordered::new(),
            changes,
            approval_timeout,
        };
        let handle = BridgeHandle { commands: tx, next_session: Arc::new(AtomicU64::new(1)) };
        (host, handle)
    }

    /// Runs until [`HostCommand::Shutdown`] or until every handle is dropped.
    ///
    /// Answers are handled before state changes, so a page sees the reply to its call before
    /// the events the call caused.
    pub async fn run(mut self) {
        let mut expiry = self.approval_timeout.map(|timeout| {
            tokio::time::interval(timeout.clamp(Duration::from_millis(10), Duration::from_secs(1)))
        });
        loop {
            tokio::select! {
                biased;
                cmd = self.commands.next() => match cmd {
                    Some(HostCommand::Shutdown) | None => break,
                    Some(cmd) => self.on_command(cmd),
                },
                Some(done) = self.completions.next(), if !self.completions.is_empty() => {
                    if let Some((session, id, result)) = done {
                        self.resolve(session, id, result);
                    }
                }
                Some(change) = self.changes.next() => self.on_change(change),
                _ = tick(&mut expiry) => {
                    if let Some(timeout) = self.approval_timeout {
                        self.api.approvals().expire_overdue(timeout);
                    }
                }
            }
        }
        self.disconnect_all();
    }

    fn on_command(&mut self, cmd: HostCommand) {
        match cmd {
            HostCommand::Attach { session, url, outbound } => self.attach(session, &url, outbound),
            HostCommand::Detach { session } => self.detach(session),
            HostCommand::Frame { session, frame } => self.on_frame(session, &frame),
            HostCommand::Shutdown => {}
        }
    }

    fn attach(&mut self, session: SessionId, url: &str, outbound: UnboundedSender<String>) {
        let origin = Origin::parse(url);
        let page = Page { origin, outbound };
        match &page.origin {
            Ok(origin) => {
                debug!(target: "bridge::host", %session, %origin, "page attached");
                let chain_id = self.api.chain_id_for(origin);
                page.send(&ProviderEvent::Connect { chain_id: HexChainId(chain_id) }.into());
            }
            Err(err) => warn!(target: "bridge::host", %session, %err, "page attached without origin"),
        }
        self.pages.insert(session, page);
    }

    /// Forgets the page and aborts its calls. Approval cases the page is still waiting on are
    /// dismissed, calls that didn't reach the approval queue yet never will.
    fn detach(&mut self, session: SessionId) {
        if self.pages.remove(&session).is_none() {
            return;
        }
        let discarded = self.abort_calls(|s| s == session);
        let dismissed = self.api.approvals().dismiss_session(session);
        debug!(target: "bridge::host", %session, discarded, dismissed, "page detached");
    }

    /// Removes the outstanding calls of the matching sessions and aborts their dispatch.
    fn abort_calls(&mut self, matches: impl Fn(SessionId) -> bool) -> usize {
        let before = self.outstanding.len();
        self.outstanding.retain(|(session, _), call| {
            if !matches(*session) {
                return true;
            }
            if let Some(abort) = &call.abort {
                abort.abort();
            }
            false
        });
        before - self.outstanding.len()
    }

    fn on_frame(&mut self, session: SessionId, frame: &str) {
        let Some(page) = self.pages.get(&session) else {
            warn!(target: "bridge::host", %session, "frame from unknown page");
            return;
        };

        let call: ProviderCall = match serde_json::from_str(frame) {
            Ok(call) => call,
            Err(err) => {
                warn!(target: "bridge::host", %session, %err, "invalid frame");
                // answer if the frame at least carries an id
                let id = serde_json::from_str::<serde_json::Value>(frame)
                    .ok()
                    .and_then(|value| value.get("id").and_then(|id| id.as_str()).map(CallId::from));
                if let Some(id) = id {
                    let err = RpcError::from(BridgeError::InvalidRequest(err.to_string()));
                    page.send(&ProviderResponse::new(id, err).into());
                }
                return;
            }
        };

        let key = (session, call.id.clone());
        if self.outstanding.contains_key(&key) {
            warn!(target: "bridge::host", %session, id = %call.id, "id is still outstanding, dropping call");
            return;
        }

        let origin = match &page.origin {
            Ok(origin) => origin.clone(),
            Err(err) => {
                let err = RpcError::from(BridgeError::InvalidOrigin(err.clone()));
                page.send(&ProviderResponse::new(call.id, err).into());
                return;
            }
        };

        let id = call.id.clone();
        trace!(target: "bridge::host", %session, %id, method = %call.method, "received call");
        let pending = Outstanding { method: call.method.clone(), since: Instant::now(), abort: None };
        self.outstanding.insert(key.clone(), pending);
        let request = match PendingRequest::from_call(session, origin, call) {
            Ok(request) => request,
            Err(err) => {
                self.resolve(session, id, err.into());
                return;
            }
        };
        match self.api.execute(request) {
            Dispatch::Immediate(result) => self.resolve(session, id, result),
            Dispatch::Deferred(fut) => {
                let (abort, registration) = AbortHandle::new_pair();
                if let Some(call) = self.outstanding.get_mut(&key) {
                    call.abort = Some(abort);
                }
                let fut = Abortable::new(fut, registration);
                let fut = fut.map(move |result| Some((session, id, result.ok()?)));
                self.completions.push(fut.boxed());
            }
        }
    }

    /// Delivers the answer to a call. Each outstanding call is answered once, answers for calls
    /// of detached pages are dropped.
    fn resolve(&mut self, session: SessionId, id: CallId, result: ResponseResult) {
        let Some(Outstanding { method, since, .. }) = self.outstanding.remove(&(session, id.clone()))
        else {
            debug!(target: "bridge::host", %session, %id, "dropping answer to a discarded call");
            return;
        };
        trace!(target: "bridge::host", %session, %id, %method, elapsed = ?since.elapsed(), error = result.is_error(), "resolved call");
        if let Some(page) = self.pages.get(&session) {
            page.send(&ProviderResponse::new(id, result).into());
        }
    }

    fn on_change(&mut self, change: StateChange) {
        let events = events_for(&change, self.api.chains().active());
        for (audience, event) in events {
            let msg = HostMessage::from(event);
            for (session, page) in &self.pages {
                let Ok(origin) = &page.origin else { continue };
                let concerned = match &audience {
                    Audience::Origin(target) => target == origin,
                    Audience::Unconnected => !self.api.store().is_connected(origin),
                };
                if concerned {
                    trace!(target: "bridge::notify", %session, %origin, ?msg, "pushing event");
                    page.send(&msg);
                }
            }
        }
    }

    fn disconnect_all(&mut self) {
        debug!(target: "bridge::host", pages = self.pages.len(), outstanding = self.outstanding.len(), "shutting down");
        let msg = HostMessage::from(ProviderEvent::Disconnect {
            code: ErrorCode::Disconnected.code(),
            message: DISCONNECTED_MESSAGE.to_string(),
        });
        self.abort_calls(|_| true);
        for (session, page) in self.pages.drain() {
            page.send(&msg);
            self.api.approvals().dismiss_session(session);
        }
    }
}

/// Completes on the next tick, or never without an interval.
async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
