//! The guest view manager.
//!
//! [`GuestViewManager`] is the single owner of all embedder and guest state. It runs
//! the attachment state machine of every guest and owns the pieces around it: the
//! permission gateway, the event dispatcher, the routing replica and the isolation
//! registries. All methods take `&mut self`; the manager is meant to live on one
//! control task, either driven directly or through a
//! [`GuestViewHandle`](crate::guestview::GuestViewHandle) (see
//! [`GuestViewManager::start`]).

mod builder;
mod new_window;
mod notifications;
mod permissions;

pub use builder::GuestViewManagerBuilder;
pub use new_window::NewWindowRequest;
pub use notifications::GuestNotification;

use crate::guestview::config::{GuestViewConfig, MAX_ZOOM_FACTOR, MIN_ZOOM_FACTOR};
use crate::guestview::delegate::{ContentHost, PermissionDelegate, UrlFilter};
use crate::guestview::dispatch::{DispatchStats, EventDispatcher, EventSink, EventStream};
use crate::guestview::embedder::{Embedder, EmbedderId};
use crate::guestview::errors::GuestViewError;
use crate::guestview::events::{keys, EventArgs, EventName};
use crate::guestview::guest::{Guest, GuestInstanceId, GuestState};
use crate::guestview::isolation::{BoundaryRegistry, SiteInstances};
use crate::guestview::params::{
    ParamBag, PARAM_ALLOW_TRANSPARENCY, PARAM_INSTANCE_ID, PARAM_NAME, PARAM_SRC, PARAM_USER_AGENT_OVERRIDE,
};
use crate::guestview::partition::{encode_site, partition_domain, resolve_partition, PartitionDescriptor};
use crate::guestview::permission::PermissionGateway;
use crate::guestview::replica::{GuestRoutingInfo, InterceptListener, ListenerKey, RoutingId, RoutingReplica, RoutingTable};
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

/// Guest processes are numbered from here, away from embedder process ids.
const FIRST_GUEST_PROCESS_ID: u32 = 1 << 16;

pub struct GuestViewManager {
    config: Arc<GuestViewConfig>,
    host: Arc<dyn ContentHost>,
    filter: Arc<dyn UrlFilter>,
    delegate: Arc<dyn PermissionDelegate>,
    embedders: HashMap<EmbedderId, Embedder>,
    guests: HashMap<GuestInstanceId, Guest>,
    permissions: PermissionGateway,
    dispatcher: EventDispatcher,
    replica: RoutingReplica,
    boundaries: BoundaryRegistry,
    sites: SiteInstances,
    next_embedder_id: u32,
    next_guest_id: u32,
    next_route_id: u32,
}

impl GuestViewManager {
    /// Entry point to configure a manager.
    pub fn builder() -> GuestViewManagerBuilder {
        GuestViewManagerBuilder::default()
    }

    pub fn config(&self) -> &GuestViewConfig {
        &self.config
    }

    // ---------- Embedders ----------

    /// Registers an embedder living in `process_id` and showing `url`. Events for guests
    /// attached to it arrive on the returned stream.
    pub fn register_embedder(
        &mut self,
        process_id: u32,
        owner_id: impl Into<String>,
        url: Url,
    ) -> (EmbedderId, EventStream) {
        self.next_embedder_id += 1;
        let id = EmbedderId(self.next_embedder_id);

        let (sink, stream) = EventSink::channel();
        let embedder = Embedder::new(id, process_id, owner_id.into(), url, sink);
        log::info!("Embedder[{}]: registered (process {}, {})", id, process_id, embedder.url);
        self.embedders.insert(id, embedder);

        (id, stream)
    }

    /// Updates the document URL of an embedder. Relative `src` values resolve against it.
    pub fn set_embedder_url(&mut self, embedder: EmbedderId, url: Url) -> Result<(), GuestViewError> {
        let e = self
            .embedders
            .get_mut(&embedder)
            .ok_or(GuestViewError::EmbedderNotFound(embedder))?;
        e.url = url;
        Ok(())
    }

    /// Registers a network interception listener for one view of an embedder. Listeners
    /// live on the request thread until the embedder is destroyed.
    pub fn add_intercept_listener(
        &mut self,
        embedder: EmbedderId,
        view_instance_id: u32,
        event: impl Into<String>,
        sub_event_name: impl Into<String>,
    ) -> Result<(), GuestViewError> {
        let e = self.embedders.get(&embedder).ok_or(GuestViewError::EmbedderNotFound(embedder))?;
        let key = ListenerKey {
            owner_process_id: e.process_id,
            view_instance_id,
        };

        self.replica.add_listener(InterceptListener {
            key,
            event: event.into(),
            sub_event_name: sub_event_name.into(),
        });
        Ok(())
    }

    /// Tears an embedder down. Attached guests are detached first (their routing entries
    /// and the listeners of their views are removed), after which every guest created
    /// by or attached to the embedder is destroyed.
    pub fn destroy_embedder(&mut self, id: EmbedderId) -> Result<(), GuestViewError> {
        let embedder = self.embedders.remove(&id).ok_or(GuestViewError::EmbedderNotFound(id))?;

        for guest_id in &embedder.attached {
            self.embedder_will_be_destroyed(*guest_id, embedder.process_id);
        }
        self.boundaries.remove_process(embedder.process_id);

        let doomed: Vec<GuestInstanceId> = embedder.owned.union(&embedder.attached).copied().collect();
        for guest_id in doomed {
            if self.guests.contains_key(&guest_id) {
                self.destroy_guest(guest_id)?;
            }
        }

        log::info!("Embedder[{}]: destroyed", id);
        Ok(())
    }

    fn embedder_will_be_destroyed(&mut self, guest_id: GuestInstanceId, embedder_process_id: u32) {
        let Some(guest) = self.guests.get_mut(&guest_id) else {
            return;
        };

        self.replica.remove_guest(guest.routing_id);
        self.replica.remove_listeners(ListenerKey {
            owner_process_id: embedder_process_id,
            view_instance_id: guest.view_instance_id,
        });
        self.boundaries.remove(embedder_process_id, guest.view_instance_id);

        guest.embedder = None;
        log::debug!("Guest[{}]: detached from destroyed embedder", guest_id);
    }

    // ---------- Guest lifecycle ----------

    /// Creates an unattached guest for `owner`.
    ///
    /// A partition identifier that is not valid UTF-8 is a protocol violation: the
    /// owner's process is killed, the owner is torn down and
    /// [`GuestViewError::InvalidEncoding`] is returned.
    pub fn create_guest(&mut self, owner: EmbedderId, params: &ParamBag) -> Result<GuestInstanceId, GuestViewError> {
        let embedder = self.embedders.get(&owner).ok_or(GuestViewError::EmbedderNotFound(owner))?;

        let resolved = match resolve_partition(params) {
            Ok(resolved) => resolved,
            Err(e) => {
                let process_id = embedder.process_id;
                log::error!("Embedder[{}]: {}, terminating process {}", owner, e, process_id);
                self.host.kill_embedder_process(process_id);
                self.destroy_embedder(owner)?;
                return Err(e);
            }
        };

        let domain = partition_domain(&embedder.url, &embedder.owner_id);
        let partition = PartitionDescriptor::new(domain, resolved.id, resolved.persistent);

        let id = self.spawn_guest(owner, partition)?;
        if let Some(guest) = self.guests.get_mut(&id) {
            guest.creation_params = params.clone();
        }
        Ok(id)
    }

    /// Creates the guest itself: site, site instance and routing identity.
    fn spawn_guest(&mut self, owner: EmbedderId, partition: PartitionDescriptor) -> Result<GuestInstanceId, GuestViewError> {
        let embedder = self.embedders.get_mut(&owner).ok_or(GuestViewError::EmbedderNotFound(owner))?;
        if embedder.guest_count() >= self.config.max_guests_per_embedder {
            log::warn!("Embedder[{}]: guest limit of {} reached", owner, self.config.max_guests_per_embedder);
            return Err(GuestViewError::GuestLimitExceeded(owner));
        }

        let site = encode_site(&self.config.guest_scheme, &partition)?;
        let (site_instance, process_id) = self.sites.acquire(&site);

        self.next_guest_id += 1;
        self.next_route_id += 1;
        let id = GuestInstanceId(self.next_guest_id);
        let routing_id = RoutingId::new(process_id, self.next_route_id);

        let guest = Guest::new(
            id,
            routing_id,
            owner,
            partition,
            site,
            site_instance,
            self.config.default_zoom_factor,
        );

        log::debug!("Guest[{}]: created in {} (routing {})", id, guest.site, routing_id);
        embedder.owned.insert(id);
        self.guests.insert(id, guest);

        Ok(id)
    }

    /// Attaches a guest to an embedder.
    ///
    /// Attach parameters override the creation parameters of the guest. After the
    /// guest is registered with the routing replica, its frame name is reported, the
    /// user agent override is applied, a pending navigation is replayed (for guests
    /// opened as new window) or `src` is loaded, and finally transparency is applied.
    ///
    /// The navigation starts right away but its load reaches the [`ContentHost`] only
    /// once the replica reports the routing entry as applied; see
    /// [`process_routing_acks`](Self::process_routing_acks).
    ///
    /// # Panics
    ///
    /// Attaching a guest that is already attached is a programming error.
    pub fn attach(&mut self, guest_id: GuestInstanceId, embedder_id: EmbedderId, params: &ParamBag) -> Result<(), GuestViewError> {
        let guest = self.guests.get(&guest_id).ok_or(GuestViewError::GuestNotFound(guest_id))?;
        assert!(
            guest.state == GuestState::Unattached,
            "guest {guest_id} is already attached"
        );
        if !self.embedders.contains_key(&embedder_id) {
            return Err(GuestViewError::EmbedderNotFound(embedder_id));
        }

        let params = guest.creation_params.merged(params);
        let view_instance_id = params
            .get_int(PARAM_INSTANCE_ID)
            .and_then(|i| u32::try_from(i).ok())
            .unwrap_or(0);

        self.will_attach(guest_id, embedder_id, view_instance_id);
        self.did_attach(guest_id, &params)
    }

    /// Registers the guest on the request thread and binds it to the embedder.
    fn will_attach(&mut self, guest_id: GuestInstanceId, embedder_id: EmbedderId, view_instance_id: u32) {
        let (Some(guest), Some(embedder)) = (self.guests.get_mut(&guest_id), self.embedders.get_mut(&embedder_id)) else {
            return;
        };

        let boundary_id = self.boundaries.get_or_allocate(embedder.process_id, view_instance_id);
        self.replica.add_guest(
            guest.routing_id,
            GuestRoutingInfo {
                owner_process_id: embedder.process_id,
                instance_id: view_instance_id,
                partition_id: guest.partition.storage_partition_id(),
                owner_id: embedder.owner_id.clone(),
                boundary_id,
            },
        );

        guest.view_instance_id = view_instance_id;
        guest.boundary_id = Some(boundary_id);
        guest.embedder = Some(embedder_id);
        guest.state = GuestState::Attached;
        embedder.attached.insert(guest_id);

        log::info!("Guest[{}]: attached to embedder {} (boundary {})", guest_id, embedder_id, boundary_id);
    }

    fn did_attach(&mut self, guest_id: GuestInstanceId, params: &ParamBag) -> Result<(), GuestViewError> {
        let guest = self.guests.get_mut(&guest_id).ok_or(GuestViewError::GuestNotFound(guest_id))?;

        if guest.name.is_empty() {
            if let Some(name) = params.get_valid_str(PARAM_NAME) {
                guest.name = name.to_string();
            }
        }
        let name = guest.name.clone();
        let opener = guest.opener;
        self.emit(guest_id, EventName::FrameNameChanged, EventArgs::new().with(keys::NAME, name));

        let user_agent = params.get_valid_str(PARAM_USER_AGENT_OVERRIDE).unwrap_or("");
        self.set_user_agent_override(guest_id, user_agent)?;

        let pending = opener
            .and_then(|o| self.guests.get_mut(&o))
            .and_then(|o| o.pending_windows.take(guest_id));

        match pending {
            Some(entry) => {
                if entry.needs_navigation() {
                    self.navigate(guest_id, entry.url.as_str(), false)?;
                }
            }
            None => {
                let src = params.get_valid_str(PARAM_SRC).unwrap_or("").to_string();
                if !src.is_empty() {
                    self.navigate(guest_id, &src, false)?;
                }
            }
        }

        let allow_transparency = params.get_bool(PARAM_ALLOW_TRANSPARENCY).unwrap_or(false);
        self.set_allow_transparency(guest_id, allow_transparency)
    }

    /// Navigates an attached guest to `target`, resolved against the embedder's URL.
    ///
    /// Returns whether a navigation was started. Nothing happens if the guest is not
    /// attached, `target` is empty, or (unless `force_reload` is set) the guest already
    /// shows the resulting URL. URLs rejected by the URL filter are rewritten by it; a
    /// load-abort event reports the original URL.
    pub fn navigate(&mut self, guest_id: GuestInstanceId, target: &str, force_reload: bool) -> Result<bool, GuestViewError> {
        let guest = self.guests.get(&guest_id).ok_or(GuestViewError::GuestNotFound(guest_id))?;
        let Some(embedder) = guest.embedder.and_then(|e| self.embedders.get(&e)) else {
            log::debug!("Guest[{}]: not attached, ignoring navigation to '{}'", guest_id, target);
            return Ok(false);
        };
        if target.is_empty() {
            return Ok(false);
        }

        let resolved = match embedder.url.join(target) {
            Ok(url) => url,
            Err(e) => {
                log::warn!("Guest[{}]: cannot resolve '{}': {}", guest_id, target, e);
                self.emit(
                    guest_id,
                    EventName::LoadAbort,
                    EventArgs::new()
                        .with(keys::URL, target)
                        .with(keys::IS_TOP_LEVEL, true)
                        .with(keys::REASON, "ERR_INVALID_URL"),
                );
                return Ok(false);
            }
        };

        if !force_reload && guest.src.as_ref() == Some(&resolved) {
            return Ok(false);
        }

        let url = self.filter.filter(resolved.clone());
        if url != resolved {
            self.emit(
                guest_id,
                EventName::LoadAbort,
                EventArgs::new()
                    .with(keys::URL, &resolved)
                    .with(keys::IS_TOP_LEVEL, true)
                    .with(keys::REASON, "ERR_BLOCKED_BY_CLIENT"),
            );
        }

        let Some(guest) = self.guests.get_mut(&guest_id) else {
            return Ok(false);
        };
        guest.src = Some(url.clone());
        guest.loading = true;
        self.issue_load(guest_id, &url);

        log::debug!("Guest[{}]: navigating to {}", guest_id, url);
        self.emit(
            guest_id,
            EventName::LoadStart,
            EventArgs::new().with(keys::URL, &url).with(keys::IS_TOP_LEVEL, true),
        );
        Ok(true)
    }

    /// Destroys a guest.
    ///
    /// An unattached guest leaves its opener's pending-window registry. Children it
    /// opened that are still pending are destroyed with it, outstanding permission
    /// requests resolve to their defaults, and its routing entry is removed.
    pub fn destroy_guest(&mut self, guest_id: GuestInstanceId) -> Result<(), GuestViewError> {
        let guest = self.guests.remove(&guest_id).ok_or(GuestViewError::GuestNotFound(guest_id))?;

        self.will_destroy(&guest);
        self.guest_destroyed(guest)
    }

    /// Unhooks the guest from its opener, the request thread and its embedder.
    fn will_destroy(&mut self, guest: &Guest) {
        if guest.state != GuestState::Attached {
            if let Some(opener) = guest.opener.and_then(|o| self.guests.get_mut(&o)) {
                opener.pending_windows.take(guest.id);
            }
        }

        if guest.boundary_id.is_some() {
            self.replica.remove_guest(guest.routing_id);
        }
        if let Some(embedder) = guest.embedder.and_then(|e| self.embedders.get_mut(&e)) {
            embedder.attached.remove(&guest.id);
            if guest.view_instance_id != 0 {
                self.boundaries.remove(embedder.process_id, guest.view_instance_id);
            }
        }
        if let Some(owner) = self.embedders.get_mut(&guest.owner) {
            owner.owned.remove(&guest.id);
        }
    }

    fn guest_destroyed(&mut self, mut guest: Guest) -> Result<(), GuestViewError> {
        let guest_id = guest.id;
        self.sites.release(&guest.site);

        for child in guest.pending_windows.drain() {
            if self.guests.contains_key(&child) {
                log::debug!("Guest[{}]: destroying pending window {}", guest_id, child);
                self.destroy_guest(child)?;
            }
        }

        for resolved in self.permissions.cancel_for_guest(guest_id) {
            self.apply_resolution(resolved);
        }

        log::info!("Guest[{}]: destroyed", guest_id);
        Ok(())
    }

    // ---------- Guest properties ----------

    /// Sets the frame name. No-op if the name does not change.
    pub fn set_name(&mut self, guest_id: GuestInstanceId, name: &str) -> Result<(), GuestViewError> {
        let guest = self.guests.get_mut(&guest_id).ok_or(GuestViewError::GuestNotFound(guest_id))?;
        if guest.name == name {
            return Ok(());
        }

        guest.name = name.to_string();
        self.host.set_frame_name(guest_id, name);
        Ok(())
    }

    /// Sets the zoom factor, clamped to the supported range. Returns whether it changed.
    pub fn set_zoom(&mut self, guest_id: GuestInstanceId, factor: f64) -> Result<bool, GuestViewError> {
        let guest = self.guests.get_mut(&guest_id).ok_or(GuestViewError::GuestNotFound(guest_id))?;
        if !factor.is_finite() {
            log::warn!("Guest[{}]: ignoring zoom factor {}", guest_id, factor);
            return Ok(false);
        }

        let factor = factor.clamp(MIN_ZOOM_FACTOR, MAX_ZOOM_FACTOR);
        let old = guest.zoom;
        if (old - factor).abs() < f64::EPSILON {
            return Ok(false);
        }

        guest.zoom = factor;
        self.host.set_zoom_factor(guest_id, factor);
        self.emit(
            guest_id,
            EventName::ZoomChange,
            EventArgs::new()
                .with(keys::OLD_ZOOM_FACTOR, old)
                .with(keys::NEW_ZOOM_FACTOR, factor),
        );
        Ok(true)
    }

    /// Allows or disallows a transparent background. No-op unless the opacity flips.
    pub fn set_allow_transparency(&mut self, guest_id: GuestInstanceId, allow: bool) -> Result<(), GuestViewError> {
        let guest = self.guests.get_mut(&guest_id).ok_or(GuestViewError::GuestNotFound(guest_id))?;
        if guest.opaque != allow {
            return Ok(());
        }

        guest.opaque = !allow;
        self.host.set_background_transparent(guest_id, allow);
        Ok(())
    }

    /// Overrides the user agent for subsequent loads; an empty string removes the
    /// override. Ignored while the guest is not attached.
    pub fn set_user_agent_override(&mut self, guest_id: GuestInstanceId, user_agent: &str) -> Result<(), GuestViewError> {
        let guest = self.guests.get_mut(&guest_id).ok_or(GuestViewError::GuestNotFound(guest_id))?;
        if guest.embedder.is_none() {
            return Ok(());
        }

        guest.user_agent_override = if user_agent.is_empty() {
            None
        } else {
            log::debug!("Guest[{}]: overriding user agent", guest_id);
            Some(user_agent.to_string())
        };
        self.host.set_user_agent_override(guest_id, user_agent);
        Ok(())
    }

    // ---------- Navigation controls ----------

    /// Moves `offset` entries through the session history. Returns false when there is
    /// no such entry.
    pub fn go(&mut self, guest_id: GuestInstanceId, offset: i32) -> Result<bool, GuestViewError> {
        let guest = self.guests.get_mut(&guest_id).ok_or(GuestViewError::GuestNotFound(guest_id))?;
        if !guest.history.go(offset) {
            return Ok(false);
        }

        guest.src = guest.history.current_url().cloned();
        self.host.go_to_offset(guest_id, offset);
        Ok(true)
    }

    pub fn reload(&mut self, guest_id: GuestInstanceId) -> Result<(), GuestViewError> {
        self.guests.get(&guest_id).ok_or(GuestViewError::GuestNotFound(guest_id))?;
        self.host.reload(guest_id);
        Ok(())
    }

    pub fn stop(&mut self, guest_id: GuestInstanceId) -> Result<(), GuestViewError> {
        let guest = self.guests.get_mut(&guest_id).ok_or(GuestViewError::GuestNotFound(guest_id))?;
        guest.loading = false;
        self.host.stop(guest_id);
        Ok(())
    }

    /// Kills the process hosting the guest.
    pub fn terminate(&mut self, guest_id: GuestInstanceId) -> Result<(), GuestViewError> {
        let guest = self.guests.get(&guest_id).ok_or(GuestViewError::GuestNotFound(guest_id))?;
        log::info!("Guest[{}]: terminating process {}", guest_id, guest.routing_id.process_id);
        self.host.terminate_guest_process(guest_id, guest.routing_id.process_id);
        Ok(())
    }

    /// Loads a `data:` URL, with `base_url` used to resolve relative references in it
    /// and `virtual_url` shown as the guest's URL.
    pub fn load_data_with_base_url(
        &mut self,
        guest_id: GuestInstanceId,
        data_url: &str,
        base_url: &str,
        virtual_url: &str,
    ) -> Result<(), GuestViewError> {
        let guest = self.guests.get_mut(&guest_id).ok_or(GuestViewError::GuestNotFound(guest_id))?;

        let data = Url::parse(data_url)
            .ok()
            .filter(|u| u.scheme() == "data")
            .ok_or_else(|| GuestViewError::InvalidDataUrl(data_url.to_string()))?;
        let base = Url::parse(base_url).map_err(|_| GuestViewError::InvalidBaseUrl(base_url.to_string()))?;
        let virtual_url = Url::parse(virtual_url).map_err(|_| GuestViewError::InvalidVirtualUrl(virtual_url.to_string()))?;

        log::debug!("Guest[{}]: loading data with base {} as {}", guest_id, base, virtual_url);
        guest.base_url_for_data_url = Some(base);
        guest.src = Some(data.clone());
        guest.loading = true;
        self.issue_load(guest_id, &data);
        Ok(())
    }

    /// Hands a load to the host, or holds it until the guest's routing entry is applied.
    fn issue_load(&mut self, guest_id: GuestInstanceId, url: &Url) {
        let Some(guest) = self.guests.get_mut(&guest_id) else {
            return;
        };
        if !guest.routing_installed {
            log::trace!("Guest[{}]: holding load of {} until routing is applied", guest_id, url);
            guest.deferred_load = Some(url.clone());
            return;
        }
        self.host.load_url(guest_id, url, guest.user_agent_override.is_some());
    }

    // ---------- Routing ----------

    /// Applies every routing acknowledgement the replica has sent so far and returns
    /// how many there were. Held loads of the acknowledged guests are issued.
    ///
    /// The control loop started by [`start`](Self::start) does this on its own.
    pub fn process_routing_acks(&mut self) -> usize {
        let installed = self.replica.try_installed();
        let count = installed.len();
        for routing_id in installed {
            self.routing_installed(routing_id);
        }
        count
    }

    /// Moves the replica's acknowledgements to an async control loop.
    pub(crate) fn replica_acks(&mut self) -> Option<tokio::sync::mpsc::UnboundedReceiver<RoutingId>> {
        self.replica.take_installed()
    }

    /// The replica applied the routing entry of `routing_id`.
    pub(crate) fn routing_installed(&mut self, routing_id: RoutingId) {
        let Some(guest) = self.guests.values_mut().find(|g| g.routing_id == routing_id) else {
            log::trace!("Replica: acknowledged {} for a guest that is gone", routing_id);
            return;
        };
        guest.routing_installed = true;

        if let Some(url) = guest.deferred_load.take() {
            log::debug!("Guest[{}]: routing applied, loading {}", guest.id, url);
            self.host.load_url(guest.id, &url, guest.user_agent_override.is_some());
        }
    }

    // ---------- Queries ----------

    pub fn guest(&self, id: GuestInstanceId) -> Option<&Guest> {
        self.guests.get(&id)
    }

    pub fn embedder(&self, id: EmbedderId) -> Option<&Embedder> {
        self.embedders.get(&id)
    }

    pub fn guest_ids(&self) -> Vec<GuestInstanceId> {
        let mut ids: Vec<GuestInstanceId> = self.guests.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Read side of the routing replica, for the request-processing thread.
    pub fn routing_table(&self) -> RoutingTable {
        self.replica.table()
    }

    /// Waits until the replica thread has applied every update posted so far, then
    /// processes its acknowledgements.
    pub async fn flush_routing(&mut self) -> Result<(), GuestViewError> {
        self.replica.flush().await?;
        self.process_routing_acks();
        Ok(())
    }

    /// Blocking variant of [`flush_routing`](Self::flush_routing); not for use inside
    /// an async context.
    pub fn flush_routing_blocking(&mut self) -> Result<(), GuestViewError> {
        self.replica.flush_blocking()?;
        self.process_routing_acks();
        Ok(())
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    /// Tears everything down: outstanding permission requests resolve to their
    /// defaults, embedders and their guests are destroyed and the replica thread stops.
    pub fn shutdown(&mut self) {
        for resolved in self.permissions.cancel_all() {
            log::debug!("Guest[{}]: permission request {} cancelled", resolved.request.guest, resolved.request.id);
        }

        let mut embedders: Vec<EmbedderId> = self.embedders.keys().copied().collect();
        embedders.sort();
        for id in embedders {
            if let Err(e) = self.destroy_embedder(id) {
                log::error!("Embedder[{}]: cannot destroy: {}", id, e);
            }
        }

        self.replica.shutdown();
        log::info!("Guest view manager shut down");
    }

    /// Delivers an event for `guest_id` to its embedder, if it has one.
    fn emit(&mut self, guest_id: GuestInstanceId, name: EventName, args: EventArgs) -> bool {
        let sink = self
            .guests
            .get(&guest_id)
            .and_then(|g| g.embedder)
            .and_then(|e| self.embedders.get(&e))
            .map(|e| &e.sink);

        self.dispatcher.emit(sink, guest_id, name, args)
    }
}
