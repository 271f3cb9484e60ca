//! Permission gateway.
//!
//! Privileged actions requested by a guest (opening a new window, capturing media,
//! downloading, locking the pointer, clearing data, ...) are routed through the
//! [`PermissionGateway`]. Each request is answered exactly once: by the embedder, by a
//! [`PermissionDelegate`](crate::guestview::delegate::PermissionDelegate), by its
//! default when the request times out, or by its default when the guest goes away.
//!
//! The caller side of a request is a [`PermissionTicket`]. Pending entries own the
//! sending half of a oneshot channel, and dropping an entry that was never answered
//! sends its default decision, so a ticket can not be left waiting.

use crate::guestview::delegate::RemovalMask;
use crate::guestview::errors::GuestViewError;
use crate::guestview::events::EventArgs;
use crate::guestview::guest::GuestInstanceId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Display;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of privileged action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionKind {
    NewWindow,
    Media,
    Download,
    PointerLock,
    Geolocation,
    ClearData,
}

impl PermissionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionKind::NewWindow => "newwindow",
            PermissionKind::Media => "media",
            PermissionKind::Download => "download",
            PermissionKind::PointerLock => "pointerLock",
            PermissionKind::Geolocation => "geolocation",
            PermissionKind::ClearData => "clearData",
        }
    }
}

/// A request as presented to the embedder
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionRequest {
    pub id: RequestId,
    /// Guest that asked for the action
    pub guest: GuestInstanceId,
    pub kind: PermissionKind,
    /// Kind specific payload
    pub params: EventArgs,
    /// Decision applied when nobody answers
    pub default_allowed: bool,
}

/// An explicit answer to a request
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PermissionResponse {
    pub allow: bool,
    /// Free-form input, e.g. the text typed into a prompt dialog
    pub user_input: Option<String>,
}

impl PermissionResponse {
    pub fn allow() -> Self {
        Self { allow: true, user_input: None }
    }

    pub fn deny() -> Self {
        Self { allow: false, user_input: None }
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.user_input = Some(input.into());
        self
    }
}

/// Who settled a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionSource {
    /// The embedder answered
    Embedder,
    /// A permission delegate answered
    Delegate,
    /// No embedder was available to ask
    Default,
    /// The request was not answered in time
    TimedOut,
    /// The guest or the manager went away
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionDecision {
    pub allowed: bool,
    pub user_input: Option<String>,
    pub source: DecisionSource,
}

impl PermissionDecision {
    pub fn default_for(default_allowed: bool, source: DecisionSource) -> Self {
        Self {
            allowed: default_allowed,
            user_input: None,
            source,
        }
    }
}

/// Caller side of a permission request
#[derive(Debug)]
pub struct PermissionTicket {
    id: RequestId,
    default_allowed: bool,
    rx: oneshot::Receiver<PermissionDecision>,
}

impl PermissionTicket {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Waits for the decision.
    pub async fn decision(self) -> PermissionDecision {
        match self.rx.await {
            Ok(decision) => decision,
            Err(_) => PermissionDecision::default_for(self.default_allowed, DecisionSource::Cancelled),
        }
    }

    /// Returns the decision if the request has been settled. Must not be called again
    /// after it returned `Some`.
    pub fn try_decision(&mut self) -> Option<PermissionDecision> {
        match self.rx.try_recv() {
            Ok(decision) => Some(decision),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => {
                Some(PermissionDecision::default_for(self.default_allowed, DecisionSource::Cancelled))
            }
        }
    }
}

/// Follow-up work attached to a request, carried out by the manager once the request
/// is settled.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingAction {
    None,
    /// A new-window request; the child is destroyed unless the request is allowed
    NewWindow { child: GuestInstanceId },
    /// Data removal that only happens when the request is allowed
    ClearData { since: SystemTime, mask: RemovalMask },
}

/// A request that has been settled
#[derive(Debug)]
pub struct Resolved {
    pub request: PermissionRequest,
    pub decision: PermissionDecision,
    pub action: PendingAction,
}

struct PendingPermission {
    request: PermissionRequest,
    action: PendingAction,
    deadline: Instant,
    reply: Option<oneshot::Sender<PermissionDecision>>,
}

impl PendingPermission {
    fn settle(mut self, decision: PermissionDecision) -> Resolved {
        if let Some(reply) = self.reply.take() {
            // The ticket may have been dropped; the decision still counts.
            let _ = reply.send(decision.clone());
        }

        Resolved {
            request: self.request.clone(),
            decision,
            action: std::mem::replace(&mut self.action, PendingAction::None),
        }
    }
}

impl Drop for PendingPermission {
    fn drop(&mut self) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(PermissionDecision::default_for(
                self.request.default_allowed,
                DecisionSource::Cancelled,
            ));
        }
    }
}

/// Outstanding permission requests of all guests.
pub struct PermissionGateway {
    timeout: Duration,
    pending: HashMap<RequestId, PendingPermission>,
}

impl PermissionGateway {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            pending: HashMap::new(),
        }
    }

    /// Registers a request. It expires `timeout` after `now`.
    pub fn register(&mut self, request: PermissionRequest, action: PendingAction, now: Instant) -> PermissionTicket {
        let (tx, rx) = oneshot::channel();
        let ticket = PermissionTicket {
            id: request.id,
            default_allowed: request.default_allowed,
            rx,
        };

        log::debug!(
            "Guest[{}]: permission request {} ({}) registered",
            request.guest,
            request.id,
            request.kind.as_str()
        );

        self.pending.insert(
            request.id,
            PendingPermission {
                request,
                action,
                deadline: now + self.timeout,
                reply: Some(tx),
            },
        );

        ticket
    }

    /// Settles a request with an explicit answer.
    pub fn resolve(
        &mut self,
        id: RequestId,
        response: PermissionResponse,
        source: DecisionSource,
    ) -> Result<Resolved, GuestViewError> {
        let entry = self.pending.remove(&id).ok_or(GuestViewError::PermissionNotPending(id))?;

        Ok(entry.settle(PermissionDecision {
            allowed: response.allow,
            user_input: response.user_input,
            source,
        }))
    }

    /// Settles a request with its default decision.
    pub fn resolve_default(&mut self, id: RequestId, source: DecisionSource) -> Result<Resolved, GuestViewError> {
        let entry = self.pending.remove(&id).ok_or(GuestViewError::PermissionNotPending(id))?;

        let decision = PermissionDecision::default_for(entry.request.default_allowed, source);
        Ok(entry.settle(decision))
    }

    /// Settles all requests whose deadline has passed.
    pub fn expire(&mut self, now: Instant) -> Vec<Resolved> {
        let expired: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        self.settle_all(expired, DecisionSource::TimedOut)
    }

    /// Settles every request that involves `guest`, either as the requester or as the
    /// child of a new-window request.
    pub fn cancel_for_guest(&mut self, guest: GuestInstanceId) -> Vec<Resolved> {
        let ids: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|(_, p)| {
                p.request.guest == guest || matches!(p.action, PendingAction::NewWindow { child } if child == guest)
            })
            .map(|(id, _)| *id)
            .collect();

        self.settle_all(ids, DecisionSource::Cancelled)
    }

    /// Settles every outstanding request.
    pub fn cancel_all(&mut self) -> Vec<Resolved> {
        let ids: Vec<RequestId> = self.pending.keys().copied().collect();
        self.settle_all(ids, DecisionSource::Cancelled)
    }

    fn settle_all(&mut self, ids: Vec<RequestId>, source: DecisionSource) -> Vec<Resolved> {
        let mut resolved: Vec<Resolved> = ids
            .into_iter()
            .filter_map(|id| self.resolve_default(id, source).ok())
            .collect();

        resolved.sort_by_key(|r| r.request.guest);
        resolved
    }

    pub fn is_pending(&self, id: RequestId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn request(&self, id: RequestId) -> Option<&PermissionRequest> {
        self.pending.get(&id).map(|p| &p.request)
    }

    /// Requests raised by `guest` that are still waiting for a decision.
    pub fn pending_for(&self, guest: GuestInstanceId) -> Vec<RequestId> {
        self.pending
            .values()
            .filter(|p| p.request.guest == guest)
            .map(|p| p.request.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(guest: u32, kind: PermissionKind, default_allowed: bool) -> PermissionRequest {
        PermissionRequest {
            id: RequestId::new(),
            guest: GuestInstanceId(guest),
            kind,
            params: EventArgs::new(),
            default_allowed,
        }
    }

    #[test]
    fn explicit_answer_reaches_ticket() {
        let mut gw = PermissionGateway::new(Duration::from_secs(5));
        let req = request(1, PermissionKind::Media, false);
        let id = req.id;
        let mut ticket = gw.register(req, PendingAction::None, Instant::now());

        assert!(ticket.try_decision().is_none());

        let resolved = gw
            .resolve(id, PermissionResponse::allow().with_input("ok"), DecisionSource::Embedder)
            .unwrap();
        assert!(resolved.decision.allowed);

        let decision = ticket.try_decision().unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.user_input.as_deref(), Some("ok"));
        assert_eq!(decision.source, DecisionSource::Embedder);
    }

    #[test]
    fn second_answer_is_rejected() {
        let mut gw = PermissionGateway::new(Duration::from_secs(5));
        let req = request(1, PermissionKind::Download, true);
        let id = req.id;
        let _ticket = gw.register(req, PendingAction::None, Instant::now());

        gw.resolve(id, PermissionResponse::deny(), DecisionSource::Embedder).unwrap();
        assert!(matches!(
            gw.resolve(id, PermissionResponse::allow(), DecisionSource::Embedder),
            Err(GuestViewError::PermissionNotPending(_))
        ));
    }

    #[test]
    fn expired_requests_resolve_to_default() {
        let now = Instant::now();
        let mut gw = PermissionGateway::new(Duration::from_millis(100));

        let allow_by_default = request(1, PermissionKind::PointerLock, true);
        let deny_by_default = request(1, PermissionKind::Geolocation, false);
        let mut t1 = gw.register(allow_by_default, PendingAction::None, now);
        let mut t2 = gw.register(deny_by_default, PendingAction::None, now);

        assert!(gw.expire(now + Duration::from_millis(50)).is_empty());
        assert_eq!(gw.expire(now + Duration::from_millis(100)).len(), 2);
        assert!(gw.is_empty());

        let d1 = t1.try_decision().unwrap();
        let d2 = t2.try_decision().unwrap();
        assert!(d1.allowed);
        assert!(!d2.allowed);
        assert_eq!(d1.source, DecisionSource::TimedOut);
    }

    #[test]
    fn cancel_matches_requester_and_new_window_child() {
        let mut gw = PermissionGateway::new(Duration::from_secs(5));
        let own = request(1, PermissionKind::Media, false);
        let child_window = request(7, PermissionKind::NewWindow, false);
        let unrelated = request(8, PermissionKind::Media, false);
        let unrelated_id = unrelated.id;

        let mut t_own = gw.register(own, PendingAction::None, Instant::now());
        let mut t_child = gw.register(
            child_window,
            PendingAction::NewWindow { child: GuestInstanceId(1) },
            Instant::now(),
        );
        let _t_unrelated = gw.register(unrelated, PendingAction::None, Instant::now());

        let cancelled = gw.cancel_for_guest(GuestInstanceId(1));
        assert_eq!(cancelled.len(), 2);
        assert_eq!(t_own.try_decision().unwrap().source, DecisionSource::Cancelled);
        assert!(!t_child.try_decision().unwrap().allowed);
        assert!(gw.is_pending(unrelated_id));
    }

    #[test]
    fn dropping_gateway_settles_tickets() {
        let mut gw = PermissionGateway::new(Duration::from_secs(5));
        let ticket = gw.register(request(3, PermissionKind::Media, true), PendingAction::None, Instant::now());
        drop(gw);

        let decision = futures::executor::block_on(ticket.decision());
        assert!(decision.allowed);
        assert_eq!(decision.source, DecisionSource::Cancelled);
    }

    #[tokio::test]
    async fn concurrent_requests_resolve_independently() {
        let mut gw = PermissionGateway::new(Duration::from_secs(5));
        let a = request(1, PermissionKind::Media, false);
        let b = request(1, PermissionKind::Download, false);
        let (a_id, b_id) = (a.id, b.id);
        let ta = gw.register(a, PendingAction::None, Instant::now());
        let tb = gw.register(b, PendingAction::None, Instant::now());

        let wa = tokio::spawn(ta.decision());
        let wb = tokio::spawn(tb.decision());

        gw.resolve(b_id, PermissionResponse::allow(), DecisionSource::Embedder).unwrap();
        assert!(wb.await.unwrap().allowed);

        gw.resolve(a_id, PermissionResponse::deny(), DecisionSource::Embedder).unwrap();
        assert!(!wa.await.unwrap().allowed);
    }
}
