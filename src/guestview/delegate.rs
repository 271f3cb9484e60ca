//! Collaborator interfaces.
//!
//! The manager only keeps the books. Everything that touches actual content goes
//! through a [`ContentHost`], URLs pass a [`UrlFilter`] before they are loaded, and a
//! [`PermissionDelegate`] may settle permission requests before the embedder is asked.

use crate::guestview::guest::GuestInstanceId;
use crate::guestview::permission::{PermissionRequest, PermissionResponse};
use bitflags::bitflags;
use std::time::SystemTime;
use url::Url;

/// URL every blocked navigation is rewritten to.
pub const BLOCKED_URL: &str = "about:blank#blocked";

bitflags! {
    /// Kinds of browsing data that a clear-data request removes
    pub struct RemovalMask: u32 {
        const APPCACHE       = 1 << 0;
        const CACHE          = 1 << 1;
        const COOKIES        = 1 << 2;
        const FILE_SYSTEMS   = 1 << 3;
        const INDEXEDDB      = 1 << 4;
        const LOCAL_STORAGE  = 1 << 5;
        const WEBSQL         = 1 << 6;
        const SESSION_COOKIES    = 1 << 7;
        const PERSISTENT_COOKIES = 1 << 8;
    }
}

impl RemovalMask {
    /// Parses a list of data type names as used by embedders (`"cookies"`,
    /// `"localStorage"`, ...). Unknown names are ignored.
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        names.into_iter().fold(RemovalMask::empty(), |mask, name| {
            mask | match name {
                "appcache" => RemovalMask::APPCACHE,
                "cache" => RemovalMask::CACHE,
                "cookies" => RemovalMask::COOKIES,
                "sessionCookies" => RemovalMask::SESSION_COOKIES,
                "persistentCookies" => RemovalMask::PERSISTENT_COOKIES,
                "fileSystems" => RemovalMask::FILE_SYSTEMS,
                "indexedDB" => RemovalMask::INDEXEDDB,
                "localStorage" => RemovalMask::LOCAL_STORAGE,
                "webSQL" => RemovalMask::WEBSQL,
                _ => {
                    log::debug!("Unknown data type '{}' in removal mask", name);
                    RemovalMask::empty()
                }
            }
        })
    }
}

/// Rewrites URLs a guest is not allowed to load.
pub trait UrlFilter: Send + Sync {
    fn filter(&self, url: Url) -> Url;
}

/// Lets web-safe schemes through and blocks everything else.
#[derive(Debug, Clone, Default)]
pub struct WebSafeSchemeFilter {
    extra_schemes: Vec<String>,
}

const WEB_SAFE_SCHEMES: &[&str] = &["http", "https", "ws", "wss", "ftp", "data", "blob", "filesystem"];

impl WebSafeSchemeFilter {
    /// Also allows `scheme`.
    pub fn allow_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.extra_schemes.push(scheme.into());
        self
    }

    fn is_allowed(&self, url: &Url) -> bool {
        let scheme = url.scheme();
        if scheme == "about" {
            return matches!(url.path(), "blank" | "srcdoc");
        }
        WEB_SAFE_SCHEMES.contains(&scheme) || self.extra_schemes.iter().any(|s| s == scheme)
    }
}

impl UrlFilter for WebSafeSchemeFilter {
    fn filter(&self, url: Url) -> Url {
        if self.is_allowed(&url) {
            return url;
        }

        log::info!("Blocked navigation to {}", url);
        blocked_url()
    }
}

pub fn blocked_url() -> Url {
    Url::parse(BLOCKED_URL).expect("blocked url is a valid url")
}

/// Side effects on the hosted content
pub trait ContentHost: Send + Sync {
    /// Starts loading `url` in the guest's main frame.
    fn load_url(&self, guest: GuestInstanceId, url: &Url, override_user_agent: bool);

    fn set_user_agent_override(&self, guest: GuestInstanceId, user_agent: &str);

    fn set_frame_name(&self, guest: GuestInstanceId, name: &str);

    fn set_background_transparent(&self, guest: GuestInstanceId, transparent: bool);

    fn set_zoom_factor(&self, guest: GuestInstanceId, factor: f64);

    /// Moves through the session history by `offset` entries.
    fn go_to_offset(&self, guest: GuestInstanceId, offset: i32);

    fn reload(&self, guest: GuestInstanceId);

    fn stop(&self, guest: GuestInstanceId);

    fn terminate_guest_process(&self, guest: GuestInstanceId, process_id: u32);

    /// Removes browsing data of the guest's partition.
    fn clear_data(&self, guest: GuestInstanceId, since: SystemTime, mask: RemovalMask) -> anyhow::Result<()>;

    /// Terminates an embedder process that broke protocol.
    fn kill_embedder_process(&self, process_id: u32);
}

/// Content host that does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NullContentHost;

impl ContentHost for NullContentHost {
    fn load_url(&self, _guest: GuestInstanceId, _url: &Url, _override_user_agent: bool) {}
    fn set_user_agent_override(&self, _guest: GuestInstanceId, _user_agent: &str) {}
    fn set_frame_name(&self, _guest: GuestInstanceId, _name: &str) {}
    fn set_background_transparent(&self, _guest: GuestInstanceId, _transparent: bool) {}
    fn set_zoom_factor(&self, _guest: GuestInstanceId, _factor: f64) {}
    fn go_to_offset(&self, _guest: GuestInstanceId, _offset: i32) {}
    fn reload(&self, _guest: GuestInstanceId) {}
    fn stop(&self, _guest: GuestInstanceId) {}
    fn terminate_guest_process(&self, _guest: GuestInstanceId, _process_id: u32) {}
    fn clear_data(&self, _guest: GuestInstanceId, _since: SystemTime, _mask: RemovalMask) -> anyhow::Result<()> {
        Ok(())
    }
    fn kill_embedder_process(&self, _process_id: u32) {}
}

/// Decides permission requests before (or instead of) the embedder.
pub trait PermissionDelegate: Send + Sync {
    /// `Some` settles the request right away, `None` leaves it to the embedder.
    fn decide(&self, request: &PermissionRequest) -> Option<PermissionResponse>;
}

/// Leaves every request to the embedder
#[derive(Debug, Default, Clone, Copy)]
pub struct DeferToEmbedder;

impl PermissionDelegate for DeferToEmbedder {
    fn decide(&self, _request: &PermissionRequest) -> Option<PermissionResponse> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn web_safe_urls_pass() {
        let filter = WebSafeSchemeFilter::default();
        for u in ["https://example.test/a", "http://x.test/", "data:text/html,hi", "about:blank"] {
            assert_eq!(filter.filter(url(u)), url(u));
        }
    }

    #[test]
    fn other_urls_are_blocked() {
        let filter = WebSafeSchemeFilter::default();
        for u in ["javascript:alert(1)", "file:///etc/passwd", "chrome://settings", "about:config"] {
            assert_eq!(filter.filter(url(u)).as_str(), BLOCKED_URL);
        }
    }

    #[test]
    fn extra_schemes_can_be_allowed() {
        let filter = WebSafeSchemeFilter::default().allow_scheme("gosub");
        assert_eq!(filter.filter(url("gosub://settings")), url("gosub://settings"));
    }

    #[test]
    fn removal_mask_from_names() {
        let mask = RemovalMask::from_names(["cookies", "localStorage", "bogus"]);
        assert_eq!(mask, RemovalMask::COOKIES | RemovalMask::LOCAL_STORAGE);
        assert!(RemovalMask::from_names([]).is_empty());
    }
}
