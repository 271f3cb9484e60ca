use crate::guestview::delegate::RemovalMask;
use crate::guestview::errors::GuestViewError;
use crate::guestview::events::{keys, EventArgs, EventName};
use crate::guestview::guest::GuestInstanceId;
use crate::guestview::manager::GuestViewManager;
use crate::guestview::permission::{
    DecisionSource, PendingAction, PermissionKind, PermissionRequest, PermissionResponse, PermissionTicket, RequestId,
    Resolved,
};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use url::Url;

impl GuestViewManager {
    /// Asks for permission to perform a privileged action on behalf of a guest.
    ///
    /// The request goes to the permission delegate first. If the delegate does not
    /// settle it, the embedder is prompted with a `permissionrequest` event and has
    /// until the permission timeout to answer through
    /// [`respond_to_permission`](Self::respond_to_permission). Guests without an
    /// embedder get the default decision right away.
    pub fn request_permission(
        &mut self,
        guest_id: GuestInstanceId,
        kind: PermissionKind,
        params: EventArgs,
        default_allowed: bool,
    ) -> Result<PermissionTicket, GuestViewError> {
        self.request_with_action(guest_id, kind, params, default_allowed, PendingAction::None)
    }

    pub(crate) fn request_with_action(
        &mut self,
        guest_id: GuestInstanceId,
        kind: PermissionKind,
        params: EventArgs,
        default_allowed: bool,
        action: PendingAction,
    ) -> Result<PermissionTicket, GuestViewError> {
        let guest = self.guests.get(&guest_id).ok_or(GuestViewError::GuestNotFound(guest_id))?;
        let has_embedder = guest.embedder.is_some();

        let request = PermissionRequest {
            id: RequestId::new(),
            guest: guest_id,
            kind,
            params,
            default_allowed,
        };
        let id = request.id;
        let ticket = self.permissions.register(request.clone(), action, Instant::now());

        if !has_embedder {
            log::debug!("Guest[{}]: no embedder to ask for '{}', using default", guest_id, kind.as_str());
            let resolved = self.permissions.resolve_default(id, DecisionSource::Default)?;
            self.apply_resolution(resolved);
            return Ok(ticket);
        }

        if let Some(response) = self.delegate.decide(&request) {
            let resolved = self.permissions.resolve(id, response, DecisionSource::Delegate)?;
            self.apply_resolution(resolved);
            return Ok(ticket);
        }

        let name = match kind {
            PermissionKind::NewWindow => EventName::NewWindow,
            _ => EventName::PermissionRequest,
        };
        let mut args = EventArgs::new()
            .with(keys::REQUEST_ID, id.to_string())
            .with(keys::PERMISSION, kind.as_str());
        for (key, value) in request.params.iter() {
            args.set(key, value.clone());
        }
        self.emit(guest_id, name, args);

        Ok(ticket)
    }

    /// The embedder's answer to a permission request.
    pub fn respond_to_permission(&mut self, id: RequestId, response: PermissionResponse) -> Result<(), GuestViewError> {
        let resolved = self.permissions.resolve(id, response, DecisionSource::Embedder)?;
        self.apply_resolution(resolved);
        Ok(())
    }

    /// Resolves every request older than the permission timeout to its default.
    /// Returns the number of requests that expired.
    pub fn tick(&mut self, now: Instant) -> usize {
        let expired = self.permissions.expire(now);
        let count = expired.len();
        for resolved in expired {
            log::warn!(
                "Guest[{}]: permission request {} ({}) timed out",
                resolved.request.guest,
                resolved.request.id,
                resolved.request.kind.as_str()
            );
            self.apply_resolution(resolved);
        }
        count
    }

    /// Requests waiting for an answer that were raised by `guest_id`.
    pub fn pending_permissions(&self, guest_id: GuestInstanceId) -> Vec<RequestId> {
        self.permissions.pending_for(guest_id)
    }

    pub(crate) fn apply_resolution(&mut self, resolved: Resolved) {
        let Resolved { request, decision, action } = resolved;
        log::debug!(
            "Guest[{}]: permission request {} ({}) {} ({:?})",
            request.guest,
            request.id,
            request.kind.as_str(),
            if decision.allowed { "allowed" } else { "denied" },
            decision.source
        );

        match action {
            PendingAction::None => {}
            PendingAction::NewWindow { child } => {
                if !decision.allowed && self.guests.contains_key(&child) {
                    log::info!("Guest[{}]: new window {} was denied", request.guest, child);
                    if let Err(e) = self.destroy_guest(child) {
                        log::error!("Guest[{}]: cannot destroy denied window: {}", child, e);
                    }
                }
            }
            PendingAction::ClearData { since, mask } => {
                if decision.allowed {
                    if let Err(e) = self.host.clear_data(request.guest, since, mask) {
                        log::error!("Guest[{}]: clearing data failed: {:#}", request.guest, e);
                    }
                }
            }
        }
    }

    // ---------- Privileged actions ----------

    /// Camera and microphone access for `url`. Denied unless allowed.
    pub fn request_media_access(&mut self, guest_id: GuestInstanceId, url: &Url) -> Result<PermissionTicket, GuestViewError> {
        let params = EventArgs::new().with(keys::URL, url);
        self.request_permission(guest_id, PermissionKind::Media, params, false)
    }

    /// Downloading `url`. Denied unless allowed.
    pub fn request_download(
        &mut self,
        guest_id: GuestInstanceId,
        url: &Url,
        request_method: &str,
    ) -> Result<PermissionTicket, GuestViewError> {
        let params = EventArgs::new()
            .with(keys::URL, url)
            .with(keys::REQUEST_METHOD, request_method);
        self.request_permission(guest_id, PermissionKind::Download, params, false)
    }

    /// Locking the mouse pointer. Denied unless allowed.
    pub fn request_pointer_lock(
        &mut self,
        guest_id: GuestInstanceId,
        url: &Url,
        user_gesture: bool,
        last_unlocked_by_self: bool,
    ) -> Result<PermissionTicket, GuestViewError> {
        let params = EventArgs::new()
            .with(keys::USER_GESTURE, user_gesture)
            .with(keys::LAST_UNLOCKED_BY_SELF, last_unlocked_by_self)
            .with(keys::URL, url);
        self.request_permission(guest_id, PermissionKind::PointerLock, params, false)
    }

    /// Access to the geolocation of the user. Denied unless allowed.
    pub fn request_geolocation(&mut self, guest_id: GuestInstanceId, url: &Url) -> Result<PermissionTicket, GuestViewError> {
        let params = EventArgs::new().with(keys::URL, url);
        self.request_permission(guest_id, PermissionKind::Geolocation, params, false)
    }

    /// Removing the data selected by `mask` that was stored since `since`. Data is only
    /// removed once the request is allowed.
    pub fn request_clear_data(
        &mut self,
        guest_id: GuestInstanceId,
        since: SystemTime,
        mask: RemovalMask,
    ) -> Result<PermissionTicket, GuestViewError> {
        let since_ms = since
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as f64)
            .unwrap_or(0.0);
        let params = EventArgs::new().with(keys::SINCE, since_ms);

        self.request_with_action(
            guest_id,
            PermissionKind::ClearData,
            params,
            false,
            PendingAction::ClearData { since, mask },
        )
    }
}
