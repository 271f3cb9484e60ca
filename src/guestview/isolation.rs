//! Isolation bookkeeping.
//!
//! Guests are grouped into *site instances*: every guest whose site URL is the same
//! shares one site instance, and with it one guest process. Separately, each view
//! element of an embedder gets an *isolation boundary id* that the request thread uses
//! to tell rule sets of different views apart.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use url::Url;

pub type BoundaryId = u32;

/// Boundary id used when either the owner process or the view instance is unknown.
pub const DEFAULT_BOUNDARY_ID: BoundaryId = 0;

/// Allocates isolation boundary ids.
pub trait BoundaryAllocator: Send + Sync {
    /// Returns a fresh id. Must never return [`DEFAULT_BOUNDARY_ID`].
    fn allocate(&self) -> BoundaryId;
}

/// Hands out ids `1, 2, 3, ...`
#[derive(Debug)]
pub struct SequentialBoundaryAllocator {
    next: AtomicU32,
}

impl Default for SequentialBoundaryAllocator {
    fn default() -> Self {
        Self { next: AtomicU32::new(DEFAULT_BOUNDARY_ID + 1) }
    }
}

impl BoundaryAllocator for SequentialBoundaryAllocator {
    fn allocate(&self) -> BoundaryId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// Boundary ids per `(owner process, view instance)`.
pub struct BoundaryRegistry {
    allocator: Box<dyn BoundaryAllocator>,
    ids: HashMap<(u32, u32), BoundaryId>,
}

impl BoundaryRegistry {
    pub fn new(allocator: Box<dyn BoundaryAllocator>) -> Self {
        Self {
            allocator,
            ids: HashMap::new(),
        }
    }

    /// Returns the boundary id of a view, allocating one on first use. Views without an
    /// owner process or instance id share [`DEFAULT_BOUNDARY_ID`].
    pub fn get_or_allocate(&mut self, owner_process_id: u32, view_instance_id: u32) -> BoundaryId {
        if owner_process_id == 0 || view_instance_id == 0 {
            return DEFAULT_BOUNDARY_ID;
        }

        let allocator = &self.allocator;
        *self
            .ids
            .entry((owner_process_id, view_instance_id))
            .or_insert_with(|| allocator.allocate())
    }

    pub fn get(&self, owner_process_id: u32, view_instance_id: u32) -> Option<BoundaryId> {
        self.ids.get(&(owner_process_id, view_instance_id)).copied()
    }

    pub fn remove(&mut self, owner_process_id: u32, view_instance_id: u32) -> Option<BoundaryId> {
        self.ids.remove(&(owner_process_id, view_instance_id))
    }

    /// Drops every entry of an owner process.
    pub fn remove_process(&mut self, owner_process_id: u32) {
        self.ids.retain(|(process, _), _| *process != owner_process_id);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SiteInstanceId(pub u32);

#[derive(Debug)]
struct SiteInstance {
    id: SiteInstanceId,
    process_id: u32,
    refs: usize,
}

/// Site instances keyed by site URL, reference counted by the guests using them.
#[derive(Debug)]
pub struct SiteInstances {
    by_site: HashMap<Url, SiteInstance>,
    next_id: u32,
    next_process_id: u32,
}

impl SiteInstances {
    /// Guest processes are numbered from `first_process_id` upwards.
    pub fn new(first_process_id: u32) -> Self {
        Self {
            by_site: HashMap::new(),
            next_id: 1,
            next_process_id: first_process_id,
        }
    }

    /// Acquires the site instance for `site`, creating it (and a guest process for it)
    /// if no live guest uses that site. Returns the instance and its process id.
    pub fn acquire(&mut self, site: &Url) -> (SiteInstanceId, u32) {
        if let Some(instance) = self.by_site.get_mut(site) {
            instance.refs += 1;
            return (instance.id, instance.process_id);
        }

        let instance = SiteInstance {
            id: SiteInstanceId(self.next_id),
            process_id: self.next_process_id,
            refs: 1,
        };
        self.next_id += 1;
        self.next_process_id += 1;

        log::debug!("Site instance {} created for {} (process {})", instance.id.0, site, instance.process_id);
        let result = (instance.id, instance.process_id);
        self.by_site.insert(site.clone(), instance);
        result
    }

    /// Releases one reference. Returns true when the site instance went away.
    pub fn release(&mut self, site: &Url) -> bool {
        let Some(instance) = self.by_site.get_mut(site) else {
            return false;
        };

        instance.refs = instance.refs.saturating_sub(1);
        if instance.refs == 0 {
            self.by_site.remove(site);
            return true;
        }
        false
    }

    pub fn lookup(&self, site: &Url) -> Option<SiteInstanceId> {
        self.by_site.get(site).map(|i| i.id)
    }

    pub fn len(&self) -> usize {
        self.by_site.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_site.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_ids_are_stable_per_view() {
        let mut reg = BoundaryRegistry::new(Box::new(SequentialBoundaryAllocator::default()));

        let a = reg.get_or_allocate(10, 1);
        let b = reg.get_or_allocate(10, 2);
        assert_ne!(a, DEFAULT_BOUNDARY_ID);
        assert_ne!(a, b);
        assert_eq!(reg.get_or_allocate(10, 1), a);

        assert_eq!(reg.remove(10, 1), Some(a));
        assert_ne!(reg.get_or_allocate(10, 1), a);
    }

    #[test]
    fn unknown_views_use_default_boundary() {
        let mut reg = BoundaryRegistry::new(Box::new(SequentialBoundaryAllocator::default()));
        assert_eq!(reg.get_or_allocate(0, 5), DEFAULT_BOUNDARY_ID);
        assert_eq!(reg.get_or_allocate(5, 0), DEFAULT_BOUNDARY_ID);
        assert!(reg.is_empty());
    }

    #[test]
    fn remove_process_drops_all_views() {
        let mut reg = BoundaryRegistry::new(Box::new(SequentialBoundaryAllocator::default()));
        reg.get_or_allocate(10, 1);
        reg.get_or_allocate(10, 2);
        reg.get_or_allocate(11, 1);
        reg.remove_process(10);
        assert_eq!(reg.len(), 1);
        assert!(reg.get(11, 1).is_some());
    }

    #[test]
    fn same_site_shares_instance_until_released() {
        let mut sites = SiteInstances::new(1000);
        let work = Url::parse("guest://app.example/persist?work").unwrap();
        let other = Url::parse("guest://app.example/?other").unwrap();

        let (a, pa) = sites.acquire(&work);
        let (b, pb) = sites.acquire(&work);
        let (c, pc) = sites.acquire(&other);
        assert_eq!(a, b);
        assert_eq!(pa, pb);
        assert_ne!(a, c);
        assert_ne!(pa, pc);

        assert!(!sites.release(&work));
        assert!(sites.release(&work));
        assert!(sites.lookup(&work).is_none());
        assert_eq!(sites.len(), 1);
    }
}
