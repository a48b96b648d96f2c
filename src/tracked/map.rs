use crate::arena::{ContainerId, PropKey};
use crate::hash::hash_key;
use crate::runtime::Runtime;
use crate::tracked::ContainerHandle;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// Observed record-like container.
///
/// Each key is observed as `Field(hash(key))`. Adding or removing a key also
/// writes `Structure`, so subscribers that iterate the keys see new entries.
/// Iteration order is insertion order.
pub struct TrackedMap<K, V> {
    inner: Arc<MapInner<K, V>>,
}

struct MapInner<K, V> {
    handle: ContainerHandle,
    entries: RwLock<IndexMap<K, V>>,
}

impl<K, V> Clone for TrackedMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for TrackedMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedMap")
            .field("container", &self.inner.handle.id())
            .field("entries", &*self.inner.entries.read())
            .finish()
    }
}

fn field<K: Hash + ?Sized>(key: &K) -> PropKey {
    PropKey::Field(hash_key(key))
}

impl<K: Hash + Eq, V> TrackedMap<K, V> {
    /// Create an empty map in `runtime`.
    pub fn new(runtime: &Runtime) -> Self {
        Self::from_map(runtime, IndexMap::new())
    }

    /// Wrap existing entries.
    pub fn from_map(runtime: &Runtime, entries: IndexMap<K, V>) -> Self {
        Self {
            inner: Arc::new(MapInner {
                handle: ContainerHandle::new(runtime),
                entries: RwLock::new(entries),
            }),
        }
    }

    /// Container identity.
    pub fn container(&self) -> ContainerId {
        self.inner.handle.id()
    }

    /// Read one entry through a closure. Depends on that key only, whether or
    /// not it is present.
    pub fn with_value<F, R>(&self, key: &K, f: F) -> Option<R>
    where
        F: FnOnce(&V) -> R,
    {
        self.inner.handle.track(field(key));
        self.inner.entries.read().get(key).map(f)
    }

    /// Whether `key` is present. Depends on that key.
    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.handle.track(field(key));
        self.inner.entries.read().contains_key(key)
    }

    /// Number of entries. Depends on `Structure`.
    pub fn len(&self) -> usize {
        self.inner.handle.track(PropKey::Structure);
        self.inner.entries.read().len()
    }

    /// Whether the map is empty. Depends on `Structure`.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the whole map through a closure.
    pub fn with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&IndexMap<K, V>) -> R,
    {
        self.inner.handle.track_whole();
        f(&*self.inner.entries.read())
    }

    /// Insert or replace. Returns the previous value.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let field = field(&key);
        let previous = self.inner.entries.write().insert(key, value);
        if previous.is_some() {
            self.inner.handle.trigger_keys([field, PropKey::Value]);
        } else {
            self.inner.handle.trigger_keys([field, PropKey::Structure]);
        }
        previous
    }

    /// Mutate an entry in place. Returns false if the key is absent.
    pub fn update<F>(&self, key: &K, f: F) -> bool
    where
        F: FnOnce(&mut V),
    {
        {
            let mut entries = self.inner.entries.write();
            let Some(value) = entries.get_mut(key) else {
                return false;
            };
            f(value);
        }
        self.inner.handle.trigger_keys([field(key), PropKey::Value]);
        true
    }

    /// Remove an entry, keeping the order of the rest.
    pub fn remove(&self, key: &K) -> Option<V> {
        let removed = self.inner.entries.write().shift_remove(key)?;
        self.inner
            .handle
            .trigger_keys([field(key), PropKey::Structure]);
        Some(removed)
    }

    /// Remove every entry.
    pub fn clear(&self) {
        let removed: Vec<PropKey> = {
            let mut entries = self.inner.entries.write();
            let fields = entries.keys().map(|k| field(k)).collect();
            entries.clear();
            fields
        };
        if removed.is_empty() {
            return;
        }
        self.inner
            .handle
            .trigger_keys(removed.into_iter().chain([PropKey::Structure]));
    }
}

impl<K: Hash + Eq + Clone, V> TrackedMap<K, V> {
    /// Snapshot of the keys in iteration order. Depends on `Structure`.
    pub fn keys(&self) -> Vec<K> {
        self.inner.handle.track(PropKey::Structure);
        self.inner.entries.read().keys().cloned().collect()
    }
}

impl<K: Hash + Eq, V: Clone> TrackedMap<K, V> {
    /// Clone the value at `key`. Depends on that key.
    pub fn get(&self, key: &K) -> Option<V> {
        self.with_value(key, V::clone)
    }
}
