use crate::guestview::config::ConfigError;
use crate::guestview::embedder::EmbedderId;
use crate::guestview::guest::GuestInstanceId;
use crate::guestview::permission::RequestId;

#[derive(Debug, thiserror::Error)]
pub enum GuestViewError {
    /// The partition identifier supplied by an embedder was not valid UTF-8. This is a
    /// protocol violation: the offending embedder is terminated.
    #[error("Partition identifier is not valid UTF-8")]
    InvalidEncoding,

    #[error("Embedder {0} not found")]
    EmbedderNotFound(EmbedderId),

    #[error("Guest {0} not found")]
    GuestNotFound(GuestInstanceId),

    #[error("Guest limit for embedder {0} exceeded")]
    GuestLimitExceeded(EmbedderId),

    #[error("Permission request {0} is unknown or has already been answered")]
    PermissionNotPending(RequestId),

    #[error("Invalid data URL: {0}")]
    InvalidDataUrl(String),

    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(String),

    #[error("Invalid virtual URL: {0}")]
    InvalidVirtualUrl(String),

    #[error("Invalid site URL: {0}")]
    InvalidSite(String),

    #[error("Cannot spawn routing replica thread: {0}")]
    ReplicaSpawn(#[from] std::io::Error),

    #[error("Routing replica is no longer running")]
    ReplicaClosed,

    #[error("Guest view manager has shut down")]
    ChannelClosed,

    #[error("Guest view manager is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Config(#[from] ConfigError),
}
