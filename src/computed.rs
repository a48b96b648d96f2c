use crate::arena::{Lifecycle, PropKey};
use crate::error::{Error, Result};
use crate::runtime::Runtime;
use crate::subscriber::{Subscriber, SubscriberBuilder};
use crate::tracked::ContainerHandle;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Memoized derived value that recomputes when its dependencies change
///
/// A Computed is a subscriber whose notification does not re-run it. Instead
/// the cached value is marked dirty and the computed's own `Value` key is
/// triggered, so whoever read it gets notified. The next `get()` recomputes.
///
/// # How it works
/// Internally, a Computed is composed of:
/// - A lazy, detached subscriber that tracks dependencies and recomputes
/// - A container identity other subscribers track when they call `get()`
/// - A dirty flag set by the subscriber's custom notifier
///
/// # Example
/// ```ignore
/// let width = TrackedCell::new(&rt, 2);
/// let height = TrackedCell::new(&rt, 3);
///
/// let area = Computed::new(&rt, {
///     let (w, h) = (width.clone(), height.clone());
///     move || w.get() * h.get()
/// });
///
/// assert_eq!(area.get()?, 6);  // cached
/// width.set(4);              // marks dirty, notifies readers of `area`
/// assert_eq!(area.get()?, 12); // recomputed now
/// ```
pub struct Computed<T> {
    inner: Arc<ComputedInner<T>>,
}

struct ComputedInner<T> {
    // Field order matters: the subscriber goes first so its body (which holds
    // the value) is gone before the container is released.
    subscriber: Subscriber,
    value: Arc<RwLock<Option<T>>>,
    dirty: Arc<AtomicBool>,
    handle: ContainerHandle,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Computed<T> {
    /// Create a computed value. The computation runs immediately.
    pub fn new<F>(runtime: &Runtime, f: F) -> Self
    where
        F: FnMut() -> T + Send + 'static,
    {
        let computed = Self::lazy(runtime, f);
        if let Err(err) = computed.refresh() {
            runtime.route_error(err);
        }
        computed
    }

    /// Create a computed value that defers computation until first access.
    pub fn lazy<F>(runtime: &Runtime, mut f: F) -> Self
    where
        F: FnMut() -> T + Send + 'static,
    {
        let handle = ContainerHandle::new(runtime);
        let container = handle.id();
        let value: Arc<RwLock<Option<T>>> = Arc::new(RwLock::new(None));
        let dirty = Arc::new(AtomicBool::new(true));

        let weak = runtime.downgrade();
        let dirty_for_notifier = dirty.clone();
        let value_for_body = value.clone();
        let dirty_for_body = dirty.clone();

        let subscriber = SubscriberBuilder::new(runtime)
            .detached()
            .notifier(move |_| {
                // Already dirty: readers were notified when it became dirty
                if dirty_for_notifier.swap(true, Ordering::AcqRel) {
                    return;
                }
                if let Some(runtime) = weak.upgrade() {
                    runtime.trigger(container, PropKey::Value);
                }
            })
            .create(Box::new(move || {
                // A write to a dependency during `f` marks it dirty again.
                dirty_for_body.store(false, Ordering::Release);
                let next = f();
                *value_for_body.write() = Some(next);
                Ok(())
            }));

        Self {
            inner: Arc::new(ComputedInner {
                subscriber,
                value,
                dirty,
                handle,
            }),
        }
    }

    /// Whether the cached value is stale.
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::Acquire)
    }

    fn refresh(&self) -> Result<()> {
        if !self.is_dirty() {
            return Ok(());
        }
        self.inner.subscriber.run()
    }

    /// Get the memoized value, recomputing first if it is stale.
    ///
    /// Inside a subscriber this records a dependency on the computed. A
    /// computation that reads its own value gets [`Error::CyclicComputed`].
    pub fn get(&self) -> Result<T> {
        let id = self.inner.subscriber.id();
        if self.inner.subscriber.lifecycle() == Lifecycle::Running {
            cov_mark::hit!(computed_read_itself);
            tracing::warn!(subscriber = %id, "computed read its own value while computing");
            return Err(Error::CyclicComputed(id));
        }
        self.refresh()?;
        self.inner.handle.track(PropKey::Value);
        self.inner.value.read().clone().ok_or(Error::Disposed(id))
    }

    /// Force recomputation on the next `get()` and notify readers.
    pub fn invalidate(&self) {
        if !self.inner.dirty.swap(true, Ordering::AcqRel) {
            self.inner.handle.trigger(PropKey::Value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Effect, TrackedCell};
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn computed_caches_until_dependency_changes() {
        let rt = Runtime::new();
        let base = TrackedCell::new(&rt, 2);
        let computes = Arc::new(AtomicUsize::new(0));

        let doubled = Computed::new(&rt, {
            let (base, computes) = (base.clone(), computes.clone());
            move || {
                computes.fetch_add(1, Ordering::Relaxed);
                base.get() * 2
            }
        });
        assert_eq!(computes.load(Ordering::Relaxed), 1);

        assert_eq!(doubled.get().unwrap(), 4);
        assert_eq!(doubled.get().unwrap(), 4);
        assert_eq!(computes.load(Ordering::Relaxed), 1);

        base.set(5);
        assert!(doubled.is_dirty());
        assert_eq!(computes.load(Ordering::Relaxed), 1, "recompute is pulled, not pushed");
        assert_eq!(doubled.get().unwrap(), 10);
        assert_eq!(computes.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn lazy_computed_defers_first_run() {
        let rt = Runtime::new();
        let computes = Arc::new(AtomicUsize::new(0));
        let value = Computed::lazy(&rt, {
            let computes = computes.clone();
            move || {
                computes.fetch_add(1, Ordering::Relaxed);
                "ready"
            }
        });
        assert_eq!(computes.load(Ordering::Relaxed), 0);
        assert_eq!(value.get().unwrap(), "ready");
        assert_eq!(computes.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn effect_reading_computed_reruns() {
        let rt = Runtime::new();
        let base = TrackedCell::new(&rt, 1);
        let plus_one = Computed::new(&rt, {
            let base = base.clone();
            move || base.get() + 1
        });

        let seen = Arc::new(AtomicUsize::new(0));
        let _effect = Effect::sync(&rt, {
            let (plus_one, seen) = (plus_one.clone(), seen.clone());
            move || seen.store(plus_one.get().unwrap(), Ordering::Relaxed)
        });
        assert_eq!(seen.load(Ordering::Relaxed), 2);

        base.set(10);
        assert_eq!(seen.load(Ordering::Relaxed), 11);
    }

    #[test]
    fn manual_invalidate_recomputes() {
        let rt = Runtime::new();
        let computes = Arc::new(AtomicUsize::new(0));
        let value = Computed::new(&rt, {
            let computes = computes.clone();
            move || computes.fetch_add(1, Ordering::Relaxed)
        });
        assert_eq!(value.get().unwrap(), 0);
        value.invalidate();
        assert_eq!(value.get().unwrap(), 1);
    }

    #[test]
    fn write_during_computation_leaves_it_dirty() {
        let rt = Runtime::new();
        let a = TrackedCell::new(&rt, 1);
        let b = TrackedCell::new(&rt, 0);
        let _bump = Effect::sync(&rt, {
            let (a, b) = (a.clone(), b.clone());
            move || {
                if b.get() > 0 {
                    a.set(10);
                }
            }
        });

        let first = Computed::new(&rt, {
            let (a, b) = (a.clone(), b.clone());
            move || {
                let v = a.get();
                b.set_if_changed(1);
                v
            }
        });
        assert!(first.is_dirty());
        assert_eq!(first.get().unwrap(), 10);
        assert!(!first.is_dirty());
    }

    #[test]
    fn reading_itself_is_an_error() {
        let rt = Runtime::new();
        let slot: Arc<Mutex<Option<Computed<Result<i32>>>>> = Arc::default();
        let looping = Computed::lazy(&rt, {
            let slot = slot.clone();
            move || {
                let me = slot.lock().clone();
                match me {
                    Some(me) => me.get().and_then(|inner| inner).map(|v| v + 1),
                    None => Ok(0),
                }
            }
        });
        *slot.lock() = Some(looping.clone());

        cov_mark::check!(computed_read_itself);
        let inner = looping.get().unwrap();
        assert!(matches!(inner, Err(Error::CyclicComputed(_))));
        slot.lock().take();
    }
}
