use crate::guestview::errors::GuestViewError;
use crate::guestview::events::{keys, EventArgs, WindowOpenDisposition};
use crate::guestview::guest::GuestInstanceId;
use crate::guestview::manager::GuestViewManager;
use crate::guestview::partition::decode_site;
use crate::guestview::pending::PendingWindow;
use crate::guestview::permission::{PendingAction, PermissionKind, PermissionTicket};
use url::Url;

/// A guest asking to open a new window
#[derive(Debug, Clone, PartialEq)]
pub struct NewWindowRequest {
    pub target_url: Url,
    /// Frame name requested by the opener (`window.open(url, name)`)
    pub frame_name: String,
    pub disposition: WindowOpenDisposition,
    pub initial_width: u32,
    pub initial_height: u32,
    /// Opened by script, in which case the new window already has its content
    pub scripted: bool,
}

impl NewWindowRequest {
    pub fn new(target_url: Url, disposition: WindowOpenDisposition) -> Self {
        Self {
            target_url,
            frame_name: String::new(),
            disposition,
            initial_width: 0,
            initial_height: 0,
            scripted: false,
        }
    }
}

impl GuestViewManager {
    /// Opens a new window for `opener`.
    ///
    /// The new (child) guest shares the opener's partition and is owned by the opener's
    /// owner. Until an embedder attaches it, the child sits in the opener's
    /// pending-window registry. The embedder is asked for permission with a `newwindow`
    /// event; unless the request is allowed, the child is destroyed again.
    pub fn new_window(
        &mut self,
        opener_id: GuestInstanceId,
        request: NewWindowRequest,
    ) -> Result<(GuestInstanceId, PermissionTicket), GuestViewError> {
        let opener = self.guests.get(&opener_id).ok_or(GuestViewError::GuestNotFound(opener_id))?;
        let owner = opener.owner;
        let partition = decode_site(&self.config.guest_scheme, &opener.site)?;

        let child_id = self.spawn_guest(owner, partition)?;
        let storage_partition_id = match self.guests.get_mut(&child_id) {
            Some(child) => {
                child.opener = Some(opener_id);
                child.name = request.frame_name.clone();
                child.partition.storage_partition_id()
            }
            None => return Err(GuestViewError::GuestNotFound(child_id)),
        };

        if let Some(opener) = self.guests.get_mut(&opener_id) {
            opener.pending_windows.register(
                child_id,
                PendingWindow::new(request.target_url.clone(), request.frame_name.clone(), request.scripted),
            );
        }
        log::debug!("Guest[{}]: opened window {} for {}", opener_id, child_id, request.target_url);

        let params = EventArgs::new()
            .with(keys::INITIAL_HEIGHT, request.initial_height)
            .with(keys::INITIAL_WIDTH, request.initial_width)
            .with(keys::TARGET_URL, &request.target_url)
            .with(keys::NAME, request.frame_name.as_str())
            .with(keys::WINDOW_ID, child_id.0)
            .with(keys::STORAGE_PARTITION_ID, storage_partition_id)
            .with(keys::WINDOW_OPEN_DISPOSITION, request.disposition.as_str());

        let ticket = self.request_with_action(
            opener_id,
            PermissionKind::NewWindow,
            params,
            false,
            PendingAction::NewWindow { child: child_id },
        )?;

        Ok((child_id, ticket))
    }

    /// A guest navigating to `url` with `disposition`.
    ///
    /// For a guest that is still pending in its opener's registry, the pending entry is
    /// redirected and nothing loads until attachment. Otherwise `current_tab` loads in
    /// place and every other disposition opens a new window, whose id is returned.
    pub fn open_url_from_guest(
        &mut self,
        source: GuestInstanceId,
        url: Url,
        disposition: WindowOpenDisposition,
    ) -> Result<Option<GuestInstanceId>, GuestViewError> {
        let guest = self.guests.get(&source).ok_or(GuestViewError::GuestNotFound(source))?;

        if !guest.is_attached() {
            let updated = guest
                .opener
                .and_then(|o| self.guests.get_mut(&o))
                .map(|o| o.pending_windows.update_if_changed(source, url.clone()))
                .unwrap_or(false);
            if !updated {
                log::debug!("Guest[{}]: not attached and not pending, ignoring {}", source, url);
            }
            return Ok(None);
        }

        if disposition == WindowOpenDisposition::CurrentTab {
            self.navigate(source, url.as_str(), false)?;
            return Ok(None);
        }

        let (child, _ticket) = self.new_window(source, NewWindowRequest::new(url, disposition))?;
        Ok(Some(child))
    }
}
