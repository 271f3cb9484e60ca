use crate::guestview::dispatch::EventSink;
use crate::guestview::guest::GuestInstanceId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Display;
use url::Url;

/// Identity of an embedder, unique within a manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EmbedderId(pub u32);

impl Display for EmbedderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A hosting context that owns and displays guests.
#[derive(Debug)]
pub struct Embedder {
    pub(crate) id: EmbedderId,
    /// Process hosting the embedder
    pub(crate) process_id: u32,
    /// Identity of the owner, e.g. the id of the embedding application
    pub(crate) owner_id: String,
    /// Current document URL of the embedder
    pub(crate) url: Url,
    pub(crate) sink: EventSink,
    /// Guests created by this embedder
    pub(crate) owned: BTreeSet<GuestInstanceId>,
    /// Guests attached to this embedder
    pub(crate) attached: BTreeSet<GuestInstanceId>,
}

impl Embedder {
    pub(crate) fn new(id: EmbedderId, process_id: u32, owner_id: String, url: Url, sink: EventSink) -> Self {
        Self {
            id,
            process_id,
            owner_id,
            url,
            sink,
            owned: BTreeSet::new(),
            attached: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> EmbedderId {
        self.id
    }

    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Guests currently attached, in id order
    pub fn attached_guests(&self) -> Vec<GuestInstanceId> {
        self.attached.iter().copied().collect()
    }

    /// Guests created by this embedder that are still alive
    pub fn owned_guests(&self) -> Vec<GuestInstanceId> {
        self.owned.iter().copied().collect()
    }

    /// Number of live guests counted against the per-embedder limit
    pub fn guest_count(&self) -> usize {
        self.owned.union(&self.attached).count()
    }
}
