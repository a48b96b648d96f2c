use crate::arena::{ContainerId, PropKey};
use crate::runtime::Runtime;
use crate::tracked::ContainerHandle;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Observed single value.
///
/// Clones share the same value and container identity.
pub struct TrackedCell<T> {
    inner: Arc<CellInner<T>>,
}

struct CellInner<T> {
    handle: ContainerHandle,
    value: RwLock<T>,
}

impl<T> Clone for TrackedCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for TrackedCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedCell")
            .field("container", &self.inner.handle.id())
            .field("value", &*self.inner.value.read())
            .finish()
    }
}

impl<T> TrackedCell<T> {
    /// Create a cell in `runtime`.
    pub fn new(runtime: &Runtime, value: T) -> Self {
        Self {
            inner: Arc::new(CellInner {
                handle: ContainerHandle::new(runtime),
                value: RwLock::new(value),
            }),
        }
    }

    /// Container identity.
    pub fn container(&self) -> ContainerId {
        self.inner.handle.id()
    }

    /// Read through a closure, recording a dependency.
    ///
    /// The value is locked while `f` runs; writing this cell from `f`
    /// deadlocks.
    pub fn with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&T) -> R,
    {
        self.inner.handle.track(PropKey::Value);
        f(&*self.inner.value.read())
    }

    /// Replace the value and notify.
    pub fn set(&self, value: T) {
        *self.inner.value.write() = value;
        self.inner.handle.trigger(PropKey::Value);
    }

    /// Mutate in place and notify.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut T),
    {
        f(&mut *self.inner.value.write());
        self.inner.handle.trigger(PropKey::Value);
    }

    /// Notify readers without changing the value.
    pub fn notify(&self) {
        self.inner.handle.trigger(PropKey::Value);
    }
}

impl<T: Clone> TrackedCell<T> {
    /// Read the value, recording a dependency.
    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    /// Read the value without recording a dependency.
    pub fn get_untracked(&self) -> T {
        self.inner.value.read().clone()
    }
}

impl<T: PartialEq> TrackedCell<T> {
    /// Replace the value, notifying only if it differs. Returns whether it
    /// changed.
    pub fn set_if_changed(&self, value: T) -> bool {
        {
            let mut current = self.inner.value.write();
            if *current == value {
                return false;
            }
            *current = value;
        }
        self.inner.handle.trigger(PropKey::Value);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Effect;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn read_outside_subscriber_records_nothing() {
        let rt = Runtime::new();
        let cell = TrackedCell::new(&rt, 5);
        assert_eq!(cell.get(), 5);
        assert_eq!(rt.subscriber_count(cell.container(), PropKey::Value), 0);
    }

    #[test]
    fn set_if_changed_skips_equal_values() {
        let rt = Runtime::new();
        let cell = TrackedCell::new(&rt, 1);
        let runs = Arc::new(AtomicUsize::new(0));
        let _effect = Effect::sync(&rt, {
            let (cell, runs) = (cell.clone(), runs.clone());
            move || {
                cell.get();
                runs.fetch_add(1, Ordering::Relaxed);
            }
        });

        assert!(!cell.set_if_changed(1));
        assert_eq!(runs.load(Ordering::Relaxed), 1);
        assert!(cell.set_if_changed(2));
        assert_eq!(runs.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn update_notifies() {
        let rt = Runtime::new();
        let cell = TrackedCell::new(&rt, vec![1]);
        let seen = Arc::new(AtomicUsize::new(0));
        let _effect = Effect::sync(&rt, {
            let (cell, seen) = (cell.clone(), seen.clone());
            move || seen.store(cell.with(Vec::len), Ordering::Relaxed)
        });
        cell.update(|v| v.push(2));
        assert_eq!(seen.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn dropping_last_handle_releases_container() {
        let rt = Runtime::new();
        let cell = TrackedCell::new(&rt, 0);
        let container = cell.container();
        let effect = Effect::sync(&rt, {
            let cell = cell.clone();
            move || {
                cell.get();
            }
        });
        assert!(rt.inner.store.read().contains_container(container));

        drop(effect);
        drop(cell);
        assert!(!rt.inner.store.read().contains_container(container));
    }
}
