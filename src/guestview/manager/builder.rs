use crate::guestview::config::{self, GuestViewConfig};
use crate::guestview::delegate::{
    ContentHost, DeferToEmbedder, NullContentHost, PermissionDelegate, UrlFilter, WebSafeSchemeFilter,
};
use crate::guestview::dispatch::EventDispatcher;
use crate::guestview::errors::GuestViewError;
use crate::guestview::isolation::{BoundaryAllocator, BoundaryRegistry, SequentialBoundaryAllocator, SiteInstances};
use crate::guestview::manager::{GuestViewManager, FIRST_GUEST_PROCESS_ID};
use crate::guestview::permission::PermissionGateway;
use crate::guestview::replica::RoutingReplica;
use std::collections::HashMap;
use std::sync::Arc;

/// Builder for [`GuestViewManager`]. Every collaborator has a default: a content host
/// that does nothing, a filter that only lets web-safe schemes through, and a
/// permission delegate that leaves every decision to the embedder.
#[derive(Default)]
pub struct GuestViewManagerBuilder {
    config: Option<GuestViewConfig>,
    host: Option<Arc<dyn ContentHost>>,
    filter: Option<Arc<dyn UrlFilter>>,
    delegate: Option<Arc<dyn PermissionDelegate>>,
    allocator: Option<Box<dyn BoundaryAllocator>>,
}

impl GuestViewManagerBuilder {
    pub fn config(mut self, cfg: GuestViewConfig) -> Self {
        self.config = Some(cfg);
        self
    }

    pub fn content_host(mut self, host: Arc<dyn ContentHost>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn url_filter(mut self, filter: Arc<dyn UrlFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn permission_delegate(mut self, delegate: Arc<dyn PermissionDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    pub fn boundary_allocator(mut self, allocator: Box<dyn BoundaryAllocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    /// Validates the configuration and spawns the routing replica thread.
    pub fn build(self) -> Result<GuestViewManager, GuestViewError> {
        let config = self.config.unwrap_or_default();
        config::validate(&config)?;

        let replica = RoutingReplica::spawn(&config.replica_thread_name)?;
        let allocator = self
            .allocator
            .unwrap_or_else(|| Box::new(SequentialBoundaryAllocator::default()));

        Ok(GuestViewManager {
            permissions: PermissionGateway::new(config.permission_timeout),
            config: Arc::new(config),
            host: self.host.unwrap_or_else(|| Arc::new(NullContentHost)),
            filter: self.filter.unwrap_or_else(|| Arc::new(WebSafeSchemeFilter::default())),
            delegate: self.delegate.unwrap_or_else(|| Arc::new(DeferToEmbedder)),
            embedders: HashMap::new(),
            guests: HashMap::new(),
            dispatcher: EventDispatcher::new(),
            replica,
            boundaries: BoundaryRegistry::new(allocator),
            sites: SiteInstances::new(FIRST_GUEST_PROCESS_ID),
            next_embedder_id: 0,
            next_guest_id: 0,
            next_route_id: 0,
        })
    }
}
