//! Per-call-site lock history.

use super::RawLock;
use crate::types::LockId;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::panic::Location;
use std::sync::{Arc, Weak};

/// Source location that began a transaction.
///
/// A transaction begun implicitly by a store or index operation is also
/// keyed by the resource it was begun for, so one operation on two stores
/// of the same type keeps two separate histories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallSite {
    location: &'static Location<'static>,
    anchor: Option<LockId>,
}

impl CallSite {
    /// Captures the caller's location.
    #[track_caller]
    #[must_use]
    pub fn caller() -> Self {
        Self {
            location: Location::caller(),
            anchor: None,
        }
    }

    /// Captures the caller's location for a transaction begun on `resource`.
    #[track_caller]
    #[must_use]
    pub fn caller_on(resource: LockId) -> Self {
        Self {
            location: Location::caller(),
            anchor: Some(resource),
        }
    }

    /// Returns the underlying source location.
    #[must_use]
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// Returns the resource the transaction was begun for, if any.
    #[must_use]
    pub fn anchor(&self) -> Option<LockId> {
        self.anchor
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let location = self.location;
        write!(f, "{}:{}:{}", location.file(), location.line(), location.column())?;
        if let Some(anchor) = self.anchor {
            write!(f, " on {anchor}")?;
        }
        Ok(())
    }
}

/// Resources bound to call sites, indexed both ways.
#[derive(Default)]
struct HistoryTable {
    by_site: HashMap<CallSite, BTreeMap<LockId, Weak<RawLock>>>,
    by_resource: HashMap<LockId, HashSet<CallSite>>,
}

impl HistoryTable {
    fn contains(&self, site: CallSite, id: LockId) -> bool {
        self.by_site
            .get(&site)
            .is_some_and(|resources| resources.contains_key(&id))
    }

    fn insert(&mut self, site: CallSite, id: LockId, lock: Weak<RawLock>) {
        self.by_site.entry(site).or_default().insert(id, lock);
        self.by_resource.entry(id).or_default().insert(site);
    }

    fn remove(&mut self, site: CallSite, id: LockId) {
        if let Some(resources) = self.by_site.get_mut(&site) {
            resources.remove(&id);
            if resources.is_empty() {
                self.by_site.remove(&site);
            }
        }
        if let Some(sites) = self.by_resource.get_mut(&id) {
            sites.remove(&site);
            if sites.is_empty() {
                self.by_resource.remove(&id);
            }
        }
    }

    fn remove_resource(&mut self, id: LockId) {
        let anchored: Vec<CallSite> = self
            .by_site
            .keys()
            .filter(|site| site.anchor == Some(id))
            .copied()
            .collect();
        for site in anchored {
            let resources = self.by_site.remove(&site).unwrap_or_default();
            for resource in resources.keys() {
                if let Some(sites) = self.by_resource.get_mut(resource) {
                    sites.remove(&site);
                    if sites.is_empty() {
                        self.by_resource.remove(resource);
                    }
                }
            }
        }

        let Some(sites) = self.by_resource.remove(&id) else {
            return;
        };
        for site in sites {
            if let Some(resources) = self.by_site.get_mut(&site) {
                resources.remove(&id);
                if resources.is_empty() {
                    self.by_site.remove(&site);
                }
            }
        }
    }

    fn resources(&self, site: CallSite) -> Vec<(LockId, Arc<RawLock>)> {
        self.by_site
            .get(&site)
            .map(|resources| {
                resources
                    .iter()
                    .filter_map(|(id, lock)| lock.upgrade().map(|lock| (*id, lock)))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn count(&self, site: CallSite) -> usize {
        self.by_site.get(&site).map_or(0, BTreeMap::len)
    }

    fn len(&self) -> usize {
        self.by_site.values().map(BTreeMap::len).sum()
    }
}

/// Locks to pre-acquire for a call site, each list in ascending id order.
#[derive(Default)]
pub(crate) struct LockPlan {
    pub(crate) exclusive: Vec<(LockId, Arc<RawLock>)>,
    pub(crate) shared: Vec<(LockId, Arc<RawLock>)>,
}

impl LockPlan {
    pub(crate) fn len(&self) -> usize {
        self.exclusive.len() + self.shared.len()
    }
}

/// Remembers which resources each call site has needed, and how.
///
/// A resource appears at most once per call site; an exclusive entry
/// supersedes a shared one.
#[derive(Default)]
pub(crate) struct LockHistory {
    shared: HistoryTable,
    exclusive: HistoryTable,
}

impl LockHistory {
    pub(crate) fn record_shared(&mut self, site: CallSite, id: LockId, lock: Weak<RawLock>) {
        if self.exclusive.contains(site, id) || self.shared.contains(site, id) {
            return;
        }
        self.shared.insert(site, id, lock);
    }

    pub(crate) fn record_exclusive(&mut self, site: CallSite, id: LockId, lock: Weak<RawLock>) {
        if self.exclusive.contains(site, id) {
            return;
        }
        self.shared.remove(site, id);
        self.exclusive.insert(site, id, lock);
    }

    pub(crate) fn remove_resource(&mut self, id: LockId) {
        self.shared.remove_resource(id);
        self.exclusive.remove_resource(id);
    }

    pub(crate) fn entries_for(&self, site: CallSite) -> usize {
        self.shared.count(site) + self.exclusive.count(site)
    }

    pub(crate) fn plan(&self, site: CallSite) -> LockPlan {
        LockPlan {
            exclusive: self.exclusive.resources(site),
            shared: self.shared.resources(site),
        }
    }

    pub(crate) fn shared_len(&self) -> usize {
        self.shared.len()
    }

    pub(crate) fn exclusive_len(&self) -> usize {
        self.exclusive.len()
    }
}
