//! Guest view configuration.
//!
//! `GuestViewConfig` controls the limits and timings of a
//! [`GuestViewManager`](crate::guestview::GuestViewManager): how long a permission
//! request may stay unanswered, how often the control loop ticks, how many guests a
//! single embedder may own, and so on.
//!
//! `GuestViewConfig` provides sensible defaults via [`Default`] and a fluent
//! [`GuestViewConfig::builder()`] for customization with validation.
//!
//! # Examples
//!
//! ## Use defaults
//! ```rust
//! use gosub_guestview::GuestViewConfig;
//! let cfg = GuestViewConfig::default();
//! assert_eq!(cfg.max_guests_per_embedder, 64);
//! ```
//!
//! ## Customize with the builder
//! ```rust
//! use std::time::Duration;
//! use gosub_guestview::GuestViewConfig;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cfg = GuestViewConfig::builder()
//!     .max_guests_per_embedder(8)
//!     .permission_timeout(Duration::from_secs(10))
//!     .default_zoom_factor(1.25)
//!     .build()?; // returns Result<GuestViewConfig, ConfigError>
//! # Ok(()) }
//! ```
//!
//! # Fields (summary)
//! - `guest_scheme`: Scheme used for guest site URLs (default: `guest`).
//! - `permission_timeout`: Time after which an unanswered permission request resolves
//!   to its default decision (default: 30s).
//! - `tick_interval`: How often the control loop checks for expired requests (default: 250ms).
//! - `max_guests_per_embedder`: Maximum number of live guests owned by one embedder (default: 64).
//! - `default_zoom_factor`: Zoom factor of freshly created guests (validated range `0.25..=5.0`).
//! - `replica_thread_name`: Name of the request-processing thread.
//! - `command_channel_capacity`: Capacity of the handle → control loop command channel.
//!
//! # Errors
//!
//! Builder validation can return [`ConfigError`] if values are invalid
//! (e.g. a zero timeout, an empty scheme or `max_guests_per_embedder == 0`).

use std::fmt;
use std::time::Duration;

pub const DEFAULT_GUEST_SCHEME: &str = "guest";

/// Smallest zoom factor a guest can be set to
pub const MIN_ZOOM_FACTOR: f64 = 0.25;
/// Largest zoom factor a guest can be set to
pub const MAX_ZOOM_FACTOR: f64 = 5.0;

#[derive(Debug, Clone)]
pub struct GuestViewConfig {
    pub guest_scheme: String,
    pub permission_timeout: Duration,
    pub tick_interval: Duration,
    pub max_guests_per_embedder: usize,
    pub default_zoom_factor: f64,
    pub replica_thread_name: String,
    pub command_channel_capacity: usize,
}

impl Default for GuestViewConfig {
    fn default() -> Self {
        Self {
            guest_scheme: DEFAULT_GUEST_SCHEME.to_string(),
            permission_timeout: Duration::from_secs(30),
            tick_interval: Duration::from_millis(250),
            max_guests_per_embedder: 64,
            default_zoom_factor: 1.0,
            replica_thread_name: "guestview-io".to_string(),
            command_channel_capacity: 128,
        }
    }
}

impl GuestViewConfig {
    pub fn builder() -> GuestViewConfigBuilder {
        GuestViewConfigBuilder::default()
    }
}

/// Builder for [`GuestViewConfig`].
#[derive(Debug, Clone, Default)]
pub struct GuestViewConfigBuilder {
    inner: GuestViewConfig,
}

impl GuestViewConfigBuilder {
    #[inline]
    fn map(mut self, f: impl FnOnce(&mut GuestViewConfig)) -> Self {
        f(&mut self.inner);
        self
    }

    pub fn guest_scheme<S: Into<String>>(self, scheme: S) -> Self { self.map(|c| c.guest_scheme = scheme.into()) }
    pub fn permission_timeout(self, timeout: Duration) -> Self { self.map(|c| c.permission_timeout = timeout) }
    pub fn tick_interval(self, interval: Duration) -> Self { self.map(|c| c.tick_interval = interval) }
    pub fn max_guests_per_embedder(self, n: usize) -> Self { self.map(|c| c.max_guests_per_embedder = n) }
    pub fn default_zoom_factor(self, factor: f64) -> Self { self.map(|c| c.default_zoom_factor = factor) }
    pub fn replica_thread_name<S: Into<String>>(self, name: S) -> Self { self.map(|c| c.replica_thread_name = name.into()) }
    pub fn command_channel_capacity(self, n: usize) -> Self { self.map(|c| c.command_channel_capacity = n) }

    /// Apply multiple changes in one go.
    pub fn with(self, f: impl FnOnce(&mut GuestViewConfig)) -> Self { self.map(f) }

    /// Validate and build the final config.
    pub fn build(self) -> Result<GuestViewConfig, ConfigError> {
        validate(&self.inner)?;
        Ok(self.inner)
    }
}

// ---------- Validation ----------

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    EmptyScheme,
    ZeroPermissionTimeout,
    ZeroTickInterval,
    ZeroGuests,
    ZeroChannelCapacity,
    InvalidZoomFactor(f64),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::EmptyScheme =>
                write!(f, "guest_scheme must not be empty"),
            ConfigError::ZeroPermissionTimeout =>
                write!(f, "permission_timeout must be larger than zero"),
            ConfigError::ZeroTickInterval =>
                write!(f, "tick_interval must be larger than zero"),
            ConfigError::ZeroGuests =>
                write!(f, "max_guests_per_embedder must be at least 1"),
            ConfigError::ZeroChannelCapacity =>
                write!(f, "command_channel_capacity must be at least 1"),
            ConfigError::InvalidZoomFactor(z) =>
                write!(f, "default_zoom_factor {z} is out of range (expected 0.25..=5.0)"),
        }
    }
}
impl std::error::Error for ConfigError {}

pub(crate) fn validate(c: &GuestViewConfig) -> Result<(), ConfigError> {
    if c.guest_scheme.is_empty() {
        return Err(ConfigError::EmptyScheme);
    }
    if c.permission_timeout.is_zero() {
        return Err(ConfigError::ZeroPermissionTimeout);
    }
    if c.tick_interval.is_zero() {
        return Err(ConfigError::ZeroTickInterval);
    }
    if c.max_guests_per_embedder == 0 {
        return Err(ConfigError::ZeroGuests);
    }
    if c.command_channel_capacity == 0 {
        return Err(ConfigError::ZeroChannelCapacity);
    }
    if !(MIN_ZOOM_FACTOR..=MAX_ZOOM_FACTOR).contains(&c.default_zoom_factor) {
        return Err(ConfigError::InvalidZoomFactor(c.default_zoom_factor));
    }
    Ok(())
}
