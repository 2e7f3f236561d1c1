//! The keyed collection of resources and its memory budget.
//!
//! Resources only report size and liveness changes through [`ResourceStore`], they never assume
//! how eviction is scheduled. [`MemoryStore`] is the in-memory implementation.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use url::Url;

use crate::config::StoreConfig;
use crate::resource::{Resource, ResourceHandle};

/// The store a [`Resource`] reports to.
///
/// Implementations must not hold any internal borrow while dropping a [`ResourceHandle`], since
/// that re-enters the store through the resource.
pub trait ResourceStore {
    /// A resource was created.
    fn register_live(&self, resource: &Resource);

    /// A resource was deleted.
    fn unregister_live(&self, resource: &Resource);

    /// The size of `resource` changed.
    fn update_size(&self, resource: &Resource, old_size: usize, new_size: usize);

    /// `resource` gained its first client.
    fn mark_live(&self, resource: &Resource);

    /// `resource` lost its last client.
    fn mark_dead(&self, resource: &Resource);

    fn contains(&self, resource: &Resource) -> bool;

    /// Puts `new` in place of `old`.
    fn replace(&self, old: &Resource, new: &Rc<Resource>);

    fn remove(&self, resource: &Resource);

    /// Evicts dead resources while the store is over its budget.
    fn prune_if_over_budget(&self);
}

/// The key of a resource in the store: its URL without fragment.
pub fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.into()
}

#[derive(Debug)]
struct StoreEntry {
    handle: ResourceHandle,
    size: usize,
    live: bool,
    last_access: u64,
}

/// An in-memory [`ResourceStore`] keyed by URL.
///
/// Every stored resource is held through one [`ResourceHandle`]. Live resources have clients and
/// are never evicted. Dead resources are purged and evicted least recently used first once the
/// store exceeds its [`StoreConfig`] budget.
#[derive(Debug)]
pub struct MemoryStore {
    config: StoreConfig,
    entries: RefCell<HashMap<String, StoreEntry>>,
    access_clock: Cell<u64>,
    live_size: Cell<usize>,
    dead_size: Cell<usize>,
    registered: Cell<usize>,
}

impl MemoryStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            entries: RefCell::new(HashMap::new()),
            access_clock: Cell::new(0),
            live_size: Cell::new(0),
            dead_size: Cell::new(0),
            registered: Cell::new(0),
        }
    }

    fn tick(&self) -> u64 {
        let now = self.access_clock.get() + 1;
        self.access_clock.set(now);
        now
    }

    /// Adds `resource`, replacing whatever was stored under its URL.
    pub fn add(&self, resource: &Rc<Resource>) {
        let entry = StoreEntry {
            handle: ResourceHandle::new(resource),
            size: resource.size(),
            live: resource.has_clients(),
            last_access: self.tick(),
        };
        self.account(&entry, true);

        let previous = self
            .entries
            .borrow_mut()
            .insert(cache_key(resource.url()), entry);
        if let Some(previous) = previous {
            self.account(&previous, false);
            drop(previous);
        }
        self.report_size();
    }

    /// Looks up the resource stored for `url`.
    pub fn get(&self, url: &Url) -> Option<Rc<Resource>> {
        let now = self.tick();
        let mut entries = self.entries.borrow_mut();
        let entry = entries.get_mut(&cache_key(url))?;
        entry.last_access = now;
        Some(entry.handle.get())
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Bytes held by resources with clients.
    pub fn live_size(&self) -> usize {
        self.live_size.get()
    }

    /// Bytes held by resources nobody observes.
    pub fn dead_size(&self) -> usize {
        self.dead_size.get()
    }

    pub fn total_size(&self) -> usize {
        self.live_size.get() + self.dead_size.get()
    }

    /// The number of resources alive, stored or not.
    pub fn registered_count(&self) -> usize {
        self.registered.get()
    }

    fn account(&self, entry: &StoreEntry, add: bool) {
        let total = if entry.live {
            &self.live_size
        } else {
            &self.dead_size
        };
        let size = if add {
            total.get() + entry.size
        } else {
            total.get().saturating_sub(entry.size)
        };
        total.set(size);
    }

    fn is_over_budget(&self) -> bool {
        self.dead_size.get() > self.config.dead_capacity
            || self.total_size() > self.config.capacity
    }

    fn report_size(&self) {
        metric!(gauge("store.size") = self.total_size() as u64);
    }

    /// Removes the entry for `resource`, if it is the one stored under its URL.
    fn take_entry(&self, resource: &Resource) -> Option<StoreEntry> {
        let key = cache_key(resource.url());
        let mut entries = self.entries.borrow_mut();
        if !entries.get(&key)?.handle.is(resource) {
            return None;
        }
        let entry = entries.remove(&key)?;
        drop(entries);
        self.account(&entry, false);
        Some(entry)
    }

    fn set_live(&self, resource: &Resource, live: bool) {
        let key = cache_key(resource.url());
        let mut entries = self.entries.borrow_mut();
        let Some(entry) = entries.get_mut(&key) else {
            return;
        };
        if !entry.handle.is(resource) || entry.live == live {
            return;
        }
        self.account(entry, false);
        entry.live = live;
        self.account(entry, true);
    }

    /// Dead resources, least recently used first.
    fn eviction_candidates(&self) -> Vec<Rc<Resource>> {
        let entries = self.entries.borrow();
        let mut candidates: Vec<_> = entries
            .values()
            .filter(|entry| !entry.live)
            .map(|entry| (entry.last_access, entry.handle.get()))
            .collect();
        candidates.sort_by_key(|(last_access, _)| *last_access);
        candidates.into_iter().map(|(_, resource)| resource).collect()
    }
}

impl ResourceStore for MemoryStore {
    fn register_live(&self, _resource: &Resource) {
        self.registered.set(self.registered.get() + 1);
    }

    fn unregister_live(&self, _resource: &Resource) {
        self.registered.set(self.registered.get().saturating_sub(1));
    }

    fn update_size(&self, resource: &Resource, old_size: usize, new_size: usize) {
        let key = cache_key(resource.url());
        let mut entries = self.entries.borrow_mut();
        let Some(entry) = entries.get_mut(&key) else {
            return;
        };
        if !entry.handle.is(resource) {
            return;
        }
        tracing::trace!(url = %resource.url(), old_size, new_size, "resource resized");
        self.account(entry, false);
        entry.size = new_size;
        self.account(entry, true);
    }

    fn mark_live(&self, resource: &Resource) {
        self.set_live(resource, true);
    }

    fn mark_dead(&self, resource: &Resource) {
        self.set_live(resource, false);
    }

    fn contains(&self, resource: &Resource) -> bool {
        self.entries
            .borrow()
            .get(&cache_key(resource.url()))
            .is_some_and(|entry| entry.handle.is(resource))
    }

    fn replace(&self, old: &Resource, new: &Rc<Resource>) {
        let previous = self.take_entry(old);
        self.add(new);
        drop(previous);
    }

    fn remove(&self, resource: &Resource) {
        let removed = self.take_entry(resource);
        if removed.is_some() {
            tracing::trace!(url = %resource.url(), "removed resource from store");
        }
        drop(removed);
        self.report_size();
    }

    fn prune_if_over_budget(&self) {
        if !self.is_over_budget() {
            return;
        }

        let mut purged = 0;
        let mut pruned: i64 = 0;
        for resource in self.eviction_candidates() {
            if !self.is_over_budget() {
                break;
            }
            if resource.unlock() {
                purged += resource.purge();
            }
            if !self.is_over_budget() {
                break;
            }
            if let Some(entry) = self.take_entry(&resource) {
                drop(entry);
                pruned += 1;
            }
        }

        tracing::debug!(purged, pruned, size = self.total_size(), "pruned store");
        metric!(counter("store.pruned") += pruned);
        self.report_size();
    }
}
