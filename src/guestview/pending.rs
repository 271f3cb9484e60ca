//! Pending-window registry.
//!
//! When a guest opens a new window, the new (child) guest exists before any embedder
//! has picked it up. Until that happens the child is owned by its opener: the opener
//! keeps a [`PendingWindow`] entry per child, describing where the child should
//! navigate once it is attached.

use crate::guestview::guest::GuestInstanceId;
use std::collections::BTreeMap;
use url::Url;

/// Navigation state of a child guest that has not been attached yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWindow {
    /// URL the child should load on attachment
    pub url: Url,
    /// URL requested when the child was created
    pub original_url: Url,
    /// Frame name requested by the opener
    pub name: String,
    /// True if `url` differs from `original_url`
    pub changed: bool,
    /// True if the window was opened by script (as opposed to an explicit navigation)
    pub scripted: bool,
}

impl PendingWindow {
    pub fn new(url: Url, name: impl Into<String>, scripted: bool) -> Self {
        Self {
            original_url: url.clone(),
            url,
            name: name.into(),
            changed: false,
            scripted,
        }
    }

    /// Whether attaching the child has to issue a navigation. Windows that were not
    /// opened by script have nothing loaded yet; scripted windows already carry the
    /// content of their original URL unless the opener redirected them since.
    pub fn needs_navigation(&self) -> bool {
        self.changed || !self.scripted
    }
}

/// Per-opener registry of children that are waiting for attachment.
#[derive(Debug, Default)]
pub struct PendingWindowRegistry {
    entries: BTreeMap<GuestInstanceId, PendingWindow>,
}

impl PendingWindowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a child.
    ///
    /// # Panics
    ///
    /// Registering the same child twice is a programming error.
    pub fn register(&mut self, child: GuestInstanceId, entry: PendingWindow) {
        let previous = self.entries.insert(child, entry);
        assert!(previous.is_none(), "guest {child} is already registered as a pending window");
    }

    /// Redirects a pending child to `url`. The last update wins; the `changed` flag is
    /// always relative to the URL the child was created with. Returns false if the
    /// child is not pending.
    pub fn update_if_changed(&mut self, child: GuestInstanceId, url: Url) -> bool {
        let Some(entry) = self.entries.get_mut(&child) else {
            return false;
        };

        entry.changed = url != entry.original_url;
        entry.url = url;
        true
    }

    /// Removes and returns the entry for `child`.
    pub fn take(&mut self, child: GuestInstanceId) -> Option<PendingWindow> {
        self.entries.remove(&child)
    }

    pub fn get(&self, child: GuestInstanceId) -> Option<&PendingWindow> {
        self.entries.get(&child)
    }

    pub fn contains(&self, child: GuestInstanceId) -> bool {
        self.entries.contains_key(&child)
    }

    /// Children currently pending, in id order.
    pub fn children(&self) -> Vec<GuestInstanceId> {
        self.entries.keys().copied().collect()
    }

    /// Removes every entry, returning the children that were pending.
    pub fn drain(&mut self) -> Vec<GuestInstanceId> {
        std::mem::take(&mut self.entries).into_keys().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn register_take_once() {
        let mut reg = PendingWindowRegistry::new();
        let child = GuestInstanceId(2);
        reg.register(child, PendingWindow::new(url("https://example.test/b"), "popup", true));

        assert!(reg.contains(child));
        let entry = reg.take(child).unwrap();
        assert_eq!(entry.url, url("https://example.test/b"));
        assert_eq!(entry.name, "popup");
        assert!(!entry.changed);

        assert!(reg.take(child).is_none());
        assert!(reg.is_empty());
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn double_register_panics() {
        let mut reg = PendingWindowRegistry::new();
        let child = GuestInstanceId(2);
        reg.register(child, PendingWindow::new(url("https://example.test/b"), "", true));
        reg.register(child, PendingWindow::new(url("https://example.test/c"), "", true));
    }

    #[test]
    fn updates_are_last_write_wins() {
        let mut reg = PendingWindowRegistry::new();
        let child = GuestInstanceId(5);
        reg.register(child, PendingWindow::new(url("https://example.test/b"), "", true));

        assert!(reg.update_if_changed(child, url("https://example.test/c")));
        assert!(reg.get(child).unwrap().changed);

        assert!(reg.update_if_changed(child, url("https://example.test/d")));
        let entry = reg.get(child).unwrap();
        assert_eq!(entry.url, url("https://example.test/d"));
        assert!(entry.changed);

        // back to where it started: nothing to replay for a scripted window
        assert!(reg.update_if_changed(child, url("https://example.test/b")));
        let entry = reg.get(child).unwrap();
        assert!(!entry.changed);
        assert!(!entry.needs_navigation());

        assert!(!reg.update_if_changed(GuestInstanceId(99), url("https://example.test/x")));
    }

    #[test]
    fn needs_navigation() {
        let mut entry = PendingWindow::new(url("https://example.test/b"), "", false);
        assert!(entry.needs_navigation());

        entry.scripted = true;
        assert!(!entry.needs_navigation());

        entry.changed = true;
        assert!(entry.needs_navigation());
    }

    #[test]
    fn drain_empties_registry() {
        let mut reg = PendingWindowRegistry::new();
        for id in [3, 1, 2] {
            reg.register(GuestInstanceId(id), PendingWindow::new(url("https://example.test/"), "", true));
        }
        assert_eq!(reg.children(), vec![GuestInstanceId(1), GuestInstanceId(2), GuestInstanceId(3)]);
        assert_eq!(reg.drain().len(), 3);
        assert!(reg.is_empty());
    }
}
