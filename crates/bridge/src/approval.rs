//! Approval cases and the queue that presents them to the user, one at a time

use crate::api::SessionId;
use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use provider_bridge_core::{MethodKind, Origin, RiskLevel, RiskVerdict};
use provider_bridge_rpc::request::CallId;
use serde::Serialize;
use std::{
    collections::VecDeque,
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{oneshot, watch};
use tracing::{debug, trace, warn};

/// Identifies an approval case for the lifetime of its queue
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CaseId(u64);

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why a case was rejected
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RejectReason {
    /// The user declined
    User,
    /// The page went away before a decision was made
    Dismissed,
    /// Nobody decided within the configured timeout
    TimedOut,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::User => "rejected by user",
            Self::Dismissed => "dismissed",
            Self::TimedOut => "timed out",
        };
        f.write_str(s)
    }
}

/// Lifecycle of a case: `Created -> Presented -> {Approved, Rejected} -> Resolved`.
///
/// A case that is torn down before it was presented goes straight from `Created` to
/// `Rejected`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "state", content = "reason")]
pub enum ApprovalState {
    Created,
    Presented,
    Approved,
    Rejected(RejectReason),
    Resolved,
}

impl ApprovalState {
    pub fn can_transition_to(&self, next: &Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Presented) |
                (Self::Created, Self::Rejected(RejectReason::Dismissed | RejectReason::TimedOut)) |
                (Self::Presented, Self::Approved | Self::Rejected(_)) |
                (Self::Approved | Self::Rejected(_), Self::Resolved)
        )
    }

    /// Whether the decision has been made
    pub fn is_decided(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected(_) | Self::Resolved)
    }
}

impl fmt::Display for ApprovalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Presented => f.write_str("presented"),
            Self::Approved => f.write_str("approved"),
            Self::Rejected(reason) => write!(f, "rejected ({reason})"),
            Self::Resolved => f.write_str("resolved"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ApprovalError {
    #[error("no approval case {0}")]
    UnknownCase(CaseId),
    #[error("approval case {id} is {state}, only the presented case can be decided")]
    NotPresented { id: CaseId, state: ApprovalState },
    #[error("approval case {0} is rated {1}, approving it needs an explicit acknowledgement")]
    AcknowledgementRequired(CaseId, RiskLevel),
    #[error("connecting needs an account to be chosen")]
    AccountRequired,
    #[error("account {0} is not one of the offered accounts")]
    UnknownAccount(Address),
    #[error("illegal transition from {from} to {to}")]
    IllegalTransition { from: ApprovalState, to: ApprovalState },
}

/// What a case asks the user to decide on
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    /// The page that made the call
    pub session: SessionId,
    pub call_id: CallId,
    pub origin: Origin,
    pub kind: MethodKind,
    pub method: String,
    /// The call's params, for display
    pub payload: serde_json::Value,
    pub verdict: RiskVerdict,
    /// Accounts the user may pick from, only set for connect requests
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub accounts: Vec<Address>,
}

/// The user facing projection of a sensitive pending request
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalCase {
    pub id: CaseId,
    pub state: ApprovalState,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub request: ApprovalRequest,
}

/// The affirmative answer to a case
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Approval {
    /// The chosen account, required for connect requests
    pub account: Option<Address>,
    /// Second confirmation, required for danger and forbidden verdicts
    pub acknowledged_risk: bool,
    /// For connect requests: reconnect this origin without asking next time
    pub remember: bool,
}

impl Approval {
    pub fn account(account: Address) -> Self {
        Self { account: Some(account), ..Default::default() }
    }

    pub fn acknowledged(mut self) -> Self {
        self.acknowledged_risk = true;
        self
    }

    pub fn remembered(mut self) -> Self {
        self.remember = true;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Approve(Approval),
    Reject,
}

pub type Outcome = Result<Approval, RejectReason>;

#[derive(Debug)]
struct Entry {
    case: ApprovalCase,
    presented_at: Option<Instant>,
    outcome: Option<oneshot::Sender<Outcome>>,
}

impl Entry {
    fn transition(&mut self, next: ApprovalState) -> Result<(), ApprovalError> {
        if !self.case.state.can_transition_to(&next) {
            return Err(ApprovalError::IllegalTransition { from: self.case.state, to: next });
        }
        trace!(target: "bridge::approval", id = %self.case.id, from = %self.case.state, to = %next, "transition");
        self.case.state = next;
        Ok(())
    }

    /// Moves the case to a rejected state and wakes up the waiting request.
    fn reject(&mut self, reason: RejectReason) -> Result<(), ApprovalError> {
        self.transition(ApprovalState::Rejected(reason))?;
        if let Some(tx) = self.outcome.take() {
            let _ = tx.send(Err(reason));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Cases {
    next_id: u64,
    /// in arrival order, the presented case if any is the first one
    entries: VecDeque<Entry>,
}

impl Cases {
    fn get_mut(&mut self, id: CaseId) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|entry| entry.case.id == id)
    }
}

/// First in, first out queue of approval cases.
///
/// At most one case is `Presented` at a time, the others wait in `Created` until it is
/// resolved. The presented case is published through [`ApprovalQueue::subscribe`].
#[derive(Clone, Debug)]
pub struct ApprovalQueue {
    cases: Arc<Mutex<Cases>>,
    presented: Arc<watch::Sender<Option<ApprovalCase>>>,
}

// === impl ApprovalQueue ===

impl ApprovalQueue {
    pub fn new() -> Self {
        let (presented, _) = watch::channel(None);
        Self { cases: Default::default(), presented: Arc::new(presented) }
    }

    /// Creates a case for the request and queues it.
    ///
    /// The returned ticket resolves once the case is decided. Dropping the ticket resolves the
    /// case, a case that wasn't decided yet is dismissed.
    pub fn submit(&self, request: ApprovalRequest) -> ApprovalTicket {
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut cases = self.cases.lock();
            cases.next_id += 1;
            let id = CaseId(cases.next_id);
            debug!(target: "bridge::approval", %id, origin = %request.origin, method = %request.method, level = %request.verdict.level, "case created");
            cases.entries.push_back(Entry {
                case: ApprovalCase {
                    id,
                    state: ApprovalState::Created,
                    created_at: Utc::now(),
                    request,
                },
                presented_at: None,
                outcome: Some(tx),
            });
            self.present_next(&mut cases);
            id
        };
        ApprovalTicket { id, queue: self.clone(), outcome: rx }
    }

    /// Returns the case currently presented to the user
    pub fn presented(&self) -> Option<ApprovalCase> {
        self.presented.borrow().clone()
    }

    /// Returns a receiver that tracks the presented case
    pub fn subscribe(&self) -> watch::Receiver<Option<ApprovalCase>> {
        self.presented.subscribe()
    }

    /// Returns all cases in arrival order
    pub fn cases(&self) -> Vec<ApprovalCase> {
        self.cases.lock().entries.iter().map(|entry| entry.case.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.cases.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records the user's decision on the presented case.
    ///
    /// An approval that doesn't satisfy the case, a dangerous verdict without acknowledgement
    /// or a connect without a valid account, is refused and the case stays presented.
    pub fn decide(&self, id: CaseId, decision: Decision) -> Result<(), ApprovalError> {
        let mut cases = self.cases.lock();
        let entry = cases.get_mut(id).ok_or(ApprovalError::UnknownCase(id))?;
        if entry.case.state != ApprovalState::Presented {
            return Err(ApprovalError::NotPresented { id, state: entry.case.state });
        }

        let approval = match decision {
            Decision::Reject => {
                debug!(target: "bridge::approval", %id, "case rejected by user");
                return entry.reject(RejectReason::User);
            }
            Decision::Approve(approval) => approval,
        };

        let level = entry.case.request.verdict.level;
        if level.requires_acknowledgement() && !approval.acknowledged_risk {
            return Err(ApprovalError::AcknowledgementRequired(id, level));
        }
        if entry.case.request.kind == MethodKind::Connect {
            let account = approval.account.ok_or(ApprovalError::AccountRequired)?;
            if !entry.case.request.accounts.contains(&account) {
                return Err(ApprovalError::UnknownAccount(account));
            }
        }

        entry.transition(ApprovalState::Approved)?;
        debug!(target: "bridge::approval", %id, "case approved");
        if let Some(tx) = entry.outcome.take() {
            let _ = tx.send(Ok(approval));
        }
        Ok(())
    }

    /// Rejects every undecided case of a page that went away, returns how many were dismissed.
    pub fn dismiss_session(&self, session: SessionId) -> usize {
        let mut cases = self.cases.lock();
        let mut dismissed = 0;
        for entry in cases.entries.iter_mut() {
            if entry.case.request.session == session &&
                !entry.case.state.is_decided() &&
                entry.reject(RejectReason::Dismissed).is_ok()
            {
                dismissed += 1;
            }
        }
        if dismissed > 0 {
            debug!(target: "bridge::approval", %session, dismissed, "dismissed cases of closed page");
        }
        dismissed
    }

    /// Rejects the presented case if it has been waiting for longer than `timeout`.
    pub fn expire_overdue(&self, timeout: Duration) -> bool {
        let mut cases = self.cases.lock();
        let Some(entry) = cases.entries.front_mut() else { return false };
        let overdue = entry.case.state == ApprovalState::Presented &&
            entry.presented_at.is_some_and(|at| at.elapsed() >= timeout);
        if overdue && entry.reject(RejectReason::TimedOut).is_ok() {
            debug!(target: "bridge::approval", id = %entry.case.id, ?timeout, "case timed out");
            return true;
        }
        false
    }

    /// Marks the case resolved and removes it, presenting the next one.
    fn finish(&self, id: CaseId) {
        let mut cases = self.cases.lock();
        let Some(pos) = cases.entries.iter().position(|entry| entry.case.id == id) else {
            return;
        };
        if let Some(entry) = cases.entries.get_mut(pos) {
            if !entry.case.state.is_decided() {
                let _ = entry.reject(RejectReason::Dismissed);
            }
            if let Err(err) = entry.transition(ApprovalState::Resolved) {
                warn!(target: "bridge::approval", %id, %err, "failed to resolve case");
            }
        }
        cases.entries.remove(pos);
        self.present_next(&mut cases);
    }

    /// Presents the oldest case if nothing is presented.
    fn present_next(&self, cases: &mut Cases) {
        let presented = match cases.entries.front_mut() {
            Some(entry) if entry.case.state == ApprovalState::Created => {
                if entry.transition(ApprovalState::Presented).is_err() {
                    return;
                }
                entry.presented_at = Some(Instant::now());
                debug!(target: "bridge::approval", id = %entry.case.id, "case presented");
                Some(entry.case.clone())
            }
            Some(entry) if entry.case.state == ApprovalState::Presented => {
                Some(entry.case.clone())
            }
            // the front case is decided and waits to be resolved
            Some(_) => return,
            None => None,
        };
        self.presented.send_replace(presented);
    }
}

impl Default for ApprovalQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle of a submitted case, held by the request waiting for the decision.
#[derive(Debug)]
pub struct ApprovalTicket {
    id: CaseId,
    queue: ApprovalQueue,
    outcome: oneshot::Receiver<Outcome>,
}

impl ApprovalTicket {
    pub fn id(&self) -> CaseId {
        self.id
    }

    /// Waits for the decision.
    pub async fn outcome(&mut self) -> Outcome {
        (&mut self.outcome).await.unwrap_or(Err(RejectReason::Dismissed))
    }
}

impl Drop for ApprovalTicket {
    fn drop(&mut self) {
        self.queue.finish(self.id);
    }
}
