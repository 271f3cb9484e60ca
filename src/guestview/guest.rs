use crate::guestview::embedder::EmbedderId;
use crate::guestview::isolation::{BoundaryId, SiteInstanceId};
use crate::guestview::params::ParamBag;
use crate::guestview::partition::PartitionDescriptor;
use crate::guestview::pending::PendingWindowRegistry;
use crate::guestview::replica::RoutingId;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use url::Url;

/// Identity of a guest, unique within a manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GuestInstanceId(pub u32);

impl Display for GuestInstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a guest. Transitions only move forward and attachment is one-way.
///
/// A guest is only registered once its partition is resolved, so the created phase
/// never shows up here. A destroyed guest is removed from the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum GuestState {
    /// Partition resolved, not bound to an embedder
    Unattached,
    /// Bound to an embedder
    Attached,
}

/// Committed top level navigations of a guest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavigationHistory {
    entries: Vec<Url>,
    current: Option<usize>,
}

impl NavigationHistory {
    /// Records a committed navigation. Committing drops every forward entry, except
    /// when the committed URL is the entry that is navigated to by a history move.
    pub fn commit(&mut self, url: Url) {
        if let Some(current) = self.current {
            if self.entries.get(current) == Some(&url) {
                return;
            }
            self.entries.truncate(current + 1);
        }
        self.entries.push(url);
        self.current = Some(self.entries.len() - 1);
    }

    /// Moves the current entry by `offset`. Returns false (and stays put) when that
    /// would move out of range.
    pub fn go(&mut self, offset: i32) -> bool {
        if !self.can_go(offset) {
            return false;
        }
        self.current = self.current.map(|c| (c as i64 + offset as i64) as usize);
        true
    }

    pub fn can_go(&self, offset: i32) -> bool {
        match self.current {
            Some(current) => {
                let target = current as i64 + offset as i64;
                target >= 0 && target < self.entries.len() as i64
            }
            None => false,
        }
    }

    pub fn current_url(&self) -> Option<&Url> {
        self.current.and_then(|c| self.entries.get(c))
    }

    /// Index of the current entry, `-1` when nothing has been committed.
    pub fn current_index(&self) -> i64 {
        self.current.map(|c| c as i64).unwrap_or(-1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A guest and its bookkeeping. Guests are owned by the
/// [`GuestViewManager`](crate::guestview::GuestViewManager), which is the only one
/// changing their state.
#[derive(Debug)]
pub struct Guest {
    pub(crate) id: GuestInstanceId,
    pub(crate) routing_id: RoutingId,
    /// Embedder that created the guest
    pub(crate) owner: EmbedderId,
    /// Embedder the guest is attached to
    pub(crate) embedder: Option<EmbedderId>,
    /// Instance id of the view element the guest is attached to (0 if unknown)
    pub(crate) view_instance_id: u32,
    pub(crate) state: GuestState,
    pub(crate) partition: PartitionDescriptor,
    pub(crate) site: Url,
    pub(crate) site_instance: SiteInstanceId,
    /// Last URL a navigation was started for
    pub(crate) src: Option<Url>,
    pub(crate) name: String,
    pub(crate) zoom: f64,
    /// False when the background may be transparent
    pub(crate) opaque: bool,
    pub(crate) user_agent_override: Option<String>,
    /// Guest that opened this one through the new-window flow
    pub(crate) opener: Option<GuestInstanceId>,
    /// Children opened by this guest that are not attached yet
    pub(crate) pending_windows: PendingWindowRegistry,
    pub(crate) boundary_id: Option<BoundaryId>,
    pub(crate) history: NavigationHistory,
    /// Base URL of the last `load_data_with_base_url`
    pub(crate) base_url_for_data_url: Option<Url>,
    pub(crate) loading: bool,
    /// Set once the routing replica reports the guest's entry as applied
    pub(crate) routing_installed: bool,
    /// Load held back until the routing entry is applied. Last write wins.
    pub(crate) deferred_load: Option<Url>,
    /// Creation parameters; attach parameters override them
    pub(crate) creation_params: ParamBag,
}

/// Point-in-time copy of a guest, handed out through the
/// [`GuestViewHandle`](crate::guestview::GuestViewHandle).
#[derive(Debug, Clone, PartialEq)]
pub struct GuestSnapshot {
    pub id: GuestInstanceId,
    pub routing_id: RoutingId,
    pub state: GuestState,
    pub owner: EmbedderId,
    pub embedder: Option<EmbedderId>,
    pub partition: PartitionDescriptor,
    pub site: Url,
    pub src: Option<Url>,
    pub name: String,
    pub zoom: f64,
    pub opaque: bool,
    pub user_agent_override: Option<String>,
    pub opener: Option<GuestInstanceId>,
    pub pending_windows: Vec<GuestInstanceId>,
    pub current_entry_index: i64,
    pub entry_count: usize,
}

impl Guest {
    pub(crate) fn new(
        id: GuestInstanceId,
        routing_id: RoutingId,
        owner: EmbedderId,
        partition: PartitionDescriptor,
        site: Url,
        site_instance: SiteInstanceId,
        zoom: f64,
    ) -> Self {
        Self {
            id,
            routing_id,
            owner,
            embedder: None,
            view_instance_id: 0,
            state: GuestState::Unattached,
            partition,
            site,
            site_instance,
            src: None,
            name: String::new(),
            zoom,
            opaque: true,
            user_agent_override: None,
            opener: None,
            pending_windows: PendingWindowRegistry::new(),
            boundary_id: None,
            history: NavigationHistory::default(),
            base_url_for_data_url: None,
            loading: false,
            routing_installed: false,
            deferred_load: None,
            creation_params: ParamBag::new(),
        }
    }

    pub fn snapshot(&self) -> GuestSnapshot {
        GuestSnapshot {
            id: self.id,
            routing_id: self.routing_id,
            state: self.state,
            owner: self.owner,
            embedder: self.embedder,
            partition: self.partition.clone(),
            site: self.site.clone(),
            src: self.src.clone(),
            name: self.name.clone(),
            zoom: self.zoom,
            opaque: self.opaque,
            user_agent_override: self.user_agent_override.clone(),
            opener: self.opener,
            pending_windows: self.pending_windows.children(),
            current_entry_index: self.history.current_index(),
            entry_count: self.history.len(),
        }
    }

    pub fn id(&self) -> GuestInstanceId {
        self.id
    }

    pub fn routing_id(&self) -> RoutingId {
        self.routing_id
    }

    pub fn owner(&self) -> EmbedderId {
        self.owner
    }

    pub fn embedder(&self) -> Option<EmbedderId> {
        self.embedder
    }

    pub fn state(&self) -> GuestState {
        self.state
    }

    pub fn is_attached(&self) -> bool {
        self.state == GuestState::Attached
    }

    pub fn partition(&self) -> &PartitionDescriptor {
        &self.partition
    }

    pub fn site(&self) -> &Url {
        &self.site
    }

    pub fn site_instance(&self) -> SiteInstanceId {
        self.site_instance
    }

    pub fn src(&self) -> Option<&Url> {
        self.src.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn is_opaque(&self) -> bool {
        self.opaque
    }

    pub fn user_agent_override(&self) -> Option<&str> {
        self.user_agent_override.as_deref()
    }

    pub fn opener(&self) -> Option<GuestInstanceId> {
        self.opener
    }

    pub fn pending_windows(&self) -> &PendingWindowRegistry {
        &self.pending_windows
    }

    pub fn boundary_id(&self) -> Option<BoundaryId> {
        self.boundary_id
    }

    pub fn history(&self) -> &NavigationHistory {
        &self.history
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }
}
