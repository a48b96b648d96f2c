// Dependency store - container -> key -> subscriber set
//
// PRINCIPLED MODEL:
// - The store only knows container *identities* (ContainerId), never the
//   containers themselves, so being observed does not extend a container's
//   lifetime.
// - When the last handle to a container drops, it calls release_container()
//   and its whole entry goes away.
// - Per-key subscriber sets are ordinary strong sets. Ordering within a set
//   carries no meaning; the scheduler orders execution.

use crate::arena::SubscriberId;
use crate::hash::FastHashBuilder;
use indexmap::IndexSet;
use std::collections::HashMap;
use std::fmt;

/// Identity of an observed container.
///
/// Allocated from a monotonic counter and never reused, so a stale edge can
/// never alias a newer container.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, PartialOrd, Ord)]
pub struct ContainerId(u64);

impl ContainerId {
    /// Create a container id from its raw value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw value.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Property key within an observed container.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum PropKey {
    /// The single value of a cell-like container.
    Value,
    /// A positional slot of an array-like container.
    Index(usize),
    /// A named field of a record-like container, identified by its hash.
    ///
    /// Two field names hashing to the same value share an edge set, which can
    /// only over-notify.
    Field(u64),
    /// Synthetic key covering the container's shape: length, key set and
    /// iteration order.
    Structure,
}

/// Subscribers registered against one (container, key) pair.
pub type SubscriberSet = IndexSet<SubscriberId, FastHashBuilder>;

type KeyMap = HashMap<PropKey, SubscriberSet, FastHashBuilder>;

/// Identity-keyed bookkeeping of dependency edges.
#[derive(Default)]
pub struct DependencyStore {
    containers: HashMap<ContainerId, KeyMap, FastHashBuilder>,
}

impl DependencyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the subscriber set for a key, creating it (and the container entry)
    /// on first use.
    pub fn get_or_create_edge_set(
        &mut self,
        container: ContainerId,
        key: PropKey,
    ) -> &mut SubscriberSet {
        self.containers
            .entry(container)
            .or_default()
            .entry(key)
            .or_insert_with(|| IndexSet::with_hasher(FastHashBuilder))
    }

    /// Record an edge. Returns true if it did not exist yet.
    pub fn add_edge(&mut self, container: ContainerId, key: PropKey, subscriber: SubscriberId) -> bool {
        self.get_or_create_edge_set(container, key).insert(subscriber)
    }

    /// Borrow the subscriber set of a key, if anyone ever subscribed to it.
    pub fn subscribers(&self, container: ContainerId, key: PropKey) -> Option<&SubscriberSet> {
        self.containers.get(&container)?.get(&key)
    }

    /// Call `f` for every subscriber of a key. Unobserved keys cost two
    /// lookups and nothing else.
    pub fn for_each_subscriber<F>(&self, container: ContainerId, key: PropKey, mut f: F)
    where
        F: FnMut(SubscriberId),
    {
        if let Some(set) = self.subscribers(container, key) {
            for &subscriber in set {
                f(subscriber);
            }
        }
    }

    /// Number of subscribers currently attached to a key.
    pub fn subscriber_count(&self, container: ContainerId, key: PropKey) -> usize {
        self.subscribers(container, key).map_or(0, IndexSet::len)
    }

    /// Remove one edge. Empty sets are dropped; the container entry itself is
    /// kept until the container is released.
    pub fn remove_edge(&mut self, container: ContainerId, key: PropKey, subscriber: SubscriberId) -> bool {
        let Some(keys) = self.containers.get_mut(&container) else {
            return false;
        };
        let Some(set) = keys.get_mut(&key) else {
            return false;
        };
        let removed = set.swap_remove(&subscriber);
        if set.is_empty() {
            keys.remove(&key);
        }
        removed
    }

    /// Disposal hook for a container that is going away.
    ///
    /// Returns the number of edges dropped. Subscribers still listing those
    /// edges will find nothing to detach on their next run.
    pub fn release_container(&mut self, container: ContainerId) -> usize {
        self.containers
            .remove(&container)
            .map_or(0, |keys| keys.values().map(IndexSet::len).sum())
    }

    /// Whether the store holds an entry for this container.
    pub fn contains_container(&self, container: ContainerId) -> bool {
        self.containers.contains_key(&container)
    }

    /// Number of containers with an entry.
    pub fn container_count(&self) -> usize {
        self.containers.len()
    }
}
