//! Guest views: web content embedded inside the page of another web application.
//!
//! An *embedder* is an application page that hosts guests. A *guest* lives in its own
//! storage partition, is created by an embedder, attached to it exactly once and
//! destroyed at the latest when its embedder goes away. Everything about guests
//! flows through the [`GuestViewManager`]:
//!
//! - lifecycle and attachment ([`GuestViewManager::create_guest`], [`GuestViewManager::attach`])
//! - navigation with filtering and relative URL resolution
//! - new windows opened by guests and the pending-window registry of their opener
//! - permission requests answered by a delegate or by the embedder, with timeouts
//! - events delivered to the embedder over an [`EventStream`]
//! - the routing replica read by the request-processing thread
//!
//! The manager can be driven directly or moved onto a tokio task with
//! [`GuestViewManager::start`] and used through a [`GuestViewHandle`].

pub mod config;
pub mod delegate;
pub mod dispatch;
pub mod embedder;
pub mod errors;
pub mod events;
pub mod guest;
pub mod handle;
pub mod isolation;
pub mod manager;
pub mod params;
pub mod partition;
pub mod pending;
pub mod permission;
pub mod replica;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ConfigError, GuestViewConfig, GuestViewConfigBuilder};
pub use delegate::{
    ContentHost, DeferToEmbedder, NullContentHost, PermissionDelegate, RemovalMask, UrlFilter, WebSafeSchemeFilter,
};
pub use dispatch::{DispatchStats, EventSink, EventStream};
pub use embedder::EmbedderId;
pub use errors::GuestViewError;
pub use events::{EventArgs, EventName, EventValue, GuestEvent, TerminationStatus, WindowOpenDisposition};
pub use guest::{GuestInstanceId, GuestSnapshot, GuestState};
pub use handle::{GuestViewHandle, ManagerCommand};
pub use manager::{GuestNotification, GuestViewManager, GuestViewManagerBuilder, NewWindowRequest};
pub use params::ParamBag;
pub use partition::PartitionDescriptor;
pub use permission::{
    DecisionSource, PermissionDecision, PermissionKind, PermissionRequest, PermissionResponse, PermissionTicket,
    RequestId,
};
pub use replica::{GuestRoutingInfo, RoutingId, RoutingTable};
