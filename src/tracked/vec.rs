use crate::arena::{ContainerId, PropKey};
use crate::error::{Error, Result};
use crate::runtime::Runtime;
use crate::tracked::ContainerHandle;
use parking_lot::RwLock;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

/// Observed array-like container.
///
/// Reads of one slot depend on `Index(i)`; reads of the length or of the
/// whole sequence depend on `Structure` (and `Value` for element contents).
/// Any mutation that changes the length also writes `Structure`, so a
/// subscriber iterating the vector sees appends even though no slot it read
/// changed.
pub struct TrackedVec<T> {
    inner: Arc<VecInner<T>>,
}

struct VecInner<T> {
    handle: ContainerHandle,
    items: RwLock<Vec<T>>,
}

impl<T> Clone for TrackedVec<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for TrackedVec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedVec")
            .field("container", &self.inner.handle.id())
            .field("items", &*self.inner.items.read())
            .finish()
    }
}

fn indexes(range: Range<usize>) -> impl Iterator<Item = PropKey> {
    range.map(PropKey::Index)
}

impl<T> TrackedVec<T> {
    /// Create an empty vector in `runtime`.
    pub fn new(runtime: &Runtime) -> Self {
        Self::from_vec(runtime, Vec::new())
    }

    /// Wrap existing items.
    pub fn from_vec(runtime: &Runtime, items: Vec<T>) -> Self {
        Self {
            inner: Arc::new(VecInner {
                handle: ContainerHandle::new(runtime),
                items: RwLock::new(items),
            }),
        }
    }

    /// Container identity.
    pub fn container(&self) -> ContainerId {
        self.inner.handle.id()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Read one slot through a closure. Depends on `Index(index)` even when
    /// the slot does not exist yet.
    pub fn with_item<F, R>(&self, index: usize, f: F) -> Option<R>
    where
        F: FnOnce(&T) -> R,
    {
        self.inner.handle.track(PropKey::Index(index));
        self.inner.items.read().get(index).map(f)
    }

    /// Length. Depends on `Structure`.
    pub fn len(&self) -> usize {
        self.inner.handle.track(PropKey::Structure);
        self.inner.items.read().len()
    }

    /// Whether the vector is empty. Depends on `Structure`.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the whole sequence through a closure.
    pub fn with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&[T]) -> R,
    {
        self.inner.handle.track_whole();
        f(&self.inner.items.read()[..])
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Replace slot `index`.
    pub fn set(&self, index: usize, value: T) -> Result<()> {
        {
            let mut items = self.inner.items.write();
            let len = items.len();
            let slot = items
                .get_mut(index)
                .ok_or(Error::IndexOutOfBounds { index, len })?;
            *slot = value;
        }
        self.inner
            .handle
            .trigger_keys([PropKey::Index(index), PropKey::Value]);
        Ok(())
    }

    /// Mutate slot `index` in place. Returns false if it does not exist.
    pub fn update_item<F>(&self, index: usize, f: F) -> bool
    where
        F: FnOnce(&mut T),
    {
        {
            let mut items = self.inner.items.write();
            let Some(slot) = items.get_mut(index) else {
                return false;
            };
            f(slot);
        }
        self.inner
            .handle
            .trigger_keys([PropKey::Index(index), PropKey::Value]);
        true
    }

    /// Append an item.
    pub fn push(&self, value: T) {
        let index = {
            let mut items = self.inner.items.write();
            items.push(value);
            items.len() - 1
        };
        self.inner
            .handle
            .trigger_keys([PropKey::Index(index), PropKey::Structure]);
    }

    /// Remove and return the last item.
    pub fn pop(&self) -> Option<T> {
        let (value, index) = {
            let mut items = self.inner.items.write();
            let value = items.pop()?;
            (value, items.len())
        };
        self.inner
            .handle
            .trigger_keys([PropKey::Index(index), PropKey::Structure]);
        Some(value)
    }

    /// Insert at `index`, shifting later items.
    pub fn insert(&self, index: usize, value: T) -> Result<()> {
        let len = {
            let mut items = self.inner.items.write();
            let len = items.len();
            if index > len {
                return Err(Error::IndexOutOfBounds { index, len });
            }
            items.insert(index, value);
            len + 1
        };
        self.inner
            .handle
            .trigger_keys(indexes(index..len).chain([PropKey::Structure]));
        Ok(())
    }

    /// Remove the item at `index`, shifting later items.
    pub fn remove(&self, index: usize) -> Result<T> {
        let (value, old_len) = {
            let mut items = self.inner.items.write();
            let len = items.len();
            if index >= len {
                return Err(Error::IndexOutOfBounds { index, len });
            }
            (items.remove(index), len)
        };
        self.inner
            .handle
            .trigger_keys(indexes(index..old_len).chain([PropKey::Structure]));
        Ok(value)
    }

    /// Swap two slots. Length is unchanged, so `Structure` is not written.
    pub fn swap(&self, a: usize, b: usize) -> Result<()> {
        {
            let mut items = self.inner.items.write();
            let len = items.len();
            if let Some(index) = [a, b].into_iter().find(|&i| i >= len) {
                return Err(Error::IndexOutOfBounds { index, len });
            }
            if a == b {
                return Ok(());
            }
            items.swap(a, b);
        }
        self.inner.handle.trigger_keys([
            PropKey::Index(a),
            PropKey::Index(b),
            PropKey::Value,
        ]);
        Ok(())
    }

    /// Shorten to `len` items. No-op if already that short.
    pub fn truncate(&self, len: usize) {
        let old_len = {
            let mut items = self.inner.items.write();
            let old_len = items.len();
            if len >= old_len {
                return;
            }
            items.truncate(len);
            old_len
        };
        self.inner
            .handle
            .trigger_keys(indexes(len..old_len).chain([PropKey::Structure]));
    }

    /// Remove every item.
    pub fn clear(&self) {
        self.truncate(0);
    }

    /// Replace the whole contents.
    pub fn replace(&self, next: Vec<T>) {
        let touched = {
            let mut items = self.inner.items.write();
            let touched = items.len().max(next.len());
            *items = next;
            touched
        };
        self.inner.handle.trigger_keys(
            indexes(0..touched).chain([PropKey::Structure, PropKey::Value]),
        );
    }
}

impl<T: Clone> TrackedVec<T> {
    /// Clone slot `index`. Depends on `Index(index)`.
    pub fn get(&self, index: usize) -> Option<T> {
        self.with_item(index, T::clone)
    }

    /// Clone the whole sequence.
    pub fn to_vec(&self) -> Vec<T> {
        self.with(<[T]>::to_vec)
    }

    /// Iterate over a snapshot of the sequence.
    pub fn iter_cloned(&self) -> std::vec::IntoIter<T> {
        self.to_vec().into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Effect;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_effect<F>(rt: &Runtime, read: F) -> (Effect, Arc<AtomicUsize>)
    where
        F: Fn() + Send + 'static,
    {
        let runs = Arc::new(AtomicUsize::new(0));
        let effect = Effect::sync(rt, {
            let runs = runs.clone();
            move || {
                read();
                runs.fetch_add(1, Ordering::Relaxed);
            }
        });
        (effect, runs)
    }

    #[test]
    fn index_reader_ignores_other_slots() {
        let rt = Runtime::new();
        let v = TrackedVec::from_vec(&rt, vec![1, 2, 3]);
        let (_e, runs) = counting_effect(&rt, {
            let v = v.clone();
            move || {
                v.get(0);
            }
        });

        v.set(2, 30).unwrap();
        assert_eq!(runs.load(Ordering::Relaxed), 1);
        v.set(0, 10).unwrap();
        assert_eq!(runs.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn push_notifies_whole_readers() {
        let rt = Runtime::new();
        let v = TrackedVec::from_vec(&rt, vec![1, 2]);
        let (_e, runs) = counting_effect(&rt, {
            let v = v.clone();
            move || {
                v.to_vec();
            }
        });

        v.push(3);
        assert_eq!(runs.load(Ordering::Relaxed), 2);
        assert_eq!(v.to_vec(), vec![1, 2, 3]);
    }

    #[test]
    fn whole_reader_sees_in_place_change() {
        let rt = Runtime::new();
        let v = TrackedVec::from_vec(&rt, vec![1, 2]);
        let (_e, runs) = counting_effect(&rt, {
            let v = v.clone();
            move || {
                v.with(|items| items.iter().sum::<i32>());
            }
        });
        v.update_item(1, |x| *x = 5);
        assert_eq!(runs.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn len_reader_ignores_in_place_change() {
        let rt = Runtime::new();
        let v = TrackedVec::from_vec(&rt, vec![1, 2]);
        let (_e, runs) = counting_effect(&rt, {
            let v = v.clone();
            move || {
                v.len();
            }
        });
        v.set(0, 9).unwrap();
        assert_eq!(runs.load(Ordering::Relaxed), 1);
        v.pop();
        assert_eq!(runs.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn reader_of_missing_slot_sees_push() {
        let rt = Runtime::new();
        let v: TrackedVec<i32> = TrackedVec::new(&rt);
        let (_e, runs) = counting_effect(&rt, {
            let v = v.clone();
            move || {
                v.get(0);
            }
        });
        v.push(1);
        assert_eq!(runs.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn out_of_bounds_writes_error() {
        let rt = Runtime::new();
        let v = TrackedVec::from_vec(&rt, vec![1]);
        assert!(matches!(
            v.set(3, 0),
            Err(Error::IndexOutOfBounds { index: 3, len: 1 })
        ));
        assert!(v.insert(2, 0).is_err());
        assert!(v.remove(1).is_err());
        assert!(v.swap(0, 1).is_err());
        assert!(!v.update_item(4, |_| {}));
    }

    #[test]
    fn insert_and_remove_shift_slots() {
        let rt = Runtime::new();
        let v = TrackedVec::from_vec(&rt, vec!['a', 'c']);
        let (_e, runs) = counting_effect(&rt, {
            let v = v.clone();
            move || {
                v.get(1);
            }
        });

        v.insert(1, 'b').unwrap();
        assert_eq!(runs.load(Ordering::Relaxed), 2);
        assert_eq!(v.remove(0).unwrap(), 'a');
        assert_eq!(runs.load(Ordering::Relaxed), 3);
        assert_eq!(v.to_vec(), vec!['b', 'c']);
    }

    #[test]
    fn clear_and_truncate() {
        let rt = Runtime::new();
        let v = TrackedVec::from_vec(&rt, vec![1, 2, 3]);
        let (_e, runs) = counting_effect(&rt, {
            let v = v.clone();
            move || {
                v.is_empty();
            }
        });
        v.truncate(5);
        assert_eq!(runs.load(Ordering::Relaxed), 1);
        v.clear();
        assert_eq!(runs.load(Ordering::Relaxed), 2);
        assert!(v.is_empty());
    }
}
