use crate::arena::SubscriberId;
use crate::error::Result;
use crate::hash::FastHashBuilder;
use crate::runtime::Runtime;
use indexmap::IndexSet;

/// Per-runtime batch bookkeeping.
///
/// While `depth > 0`, synchronous subscribers notified by a write are
/// collected here instead of running inside the write.
pub(crate) struct BatchState {
    depth: usize,
    pending: IndexSet<SubscriberId, FastHashBuilder>,
}

impl BatchState {
    pub(crate) fn new() -> Self {
        Self {
            depth: 0,
            pending: IndexSet::with_hasher(FastHashBuilder),
        }
    }

    pub(crate) fn forget(&mut self, id: SubscriberId) {
        self.pending.swap_remove(&id);
    }
}

/// RAII guard that ensures the batch depth is restored even on panic.
///
/// The normal path calls [`BatchGuard::exit`]; only an unwinding `f` reaches
/// `Drop` with the guard still armed. Sync subscribers collected by a
/// panicking batch stay pending and run on the next `flush()`.
struct BatchGuard<'a> {
    runtime: &'a Runtime,
    armed: bool,
}

impl BatchGuard<'_> {
    /// Leave the batch. Returns true when this was the outermost level.
    fn exit(mut self) -> bool {
        self.armed = false;
        self.runtime.leave_batch()
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.runtime.leave_batch();
        }
    }
}

impl Runtime {
    /// Batch multiple writes into a single round of updates
    ///
    /// Writes inside `f` still notify immediately, but synchronous subscribers
    /// are deferred and scheduled ones are only queued. When the outermost
    /// batch exits:
    /// 1. deferred sync subscribers run once each, in creation order
    /// 2. the scheduler is flushed
    ///
    /// Nested batches only flush at the outermost level.
    ///
    /// # Example
    /// ```ignore
    /// // Without batch: the effect runs after each write (once flushed)
    /// // With batch: it runs once, when the batch exits
    /// runtime.batch(|| {
    ///     width.set(10);
    ///     height.set(20);
    /// })?;
    /// ```
    pub fn batch<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> R,
    {
        self.enter_batch();
        let guard = BatchGuard {
            runtime: self,
            armed: true,
        };
        let value = f();
        if guard.exit() {
            self.run_deferred_sync()?;
            self.flush()?;
        }
        Ok(value)
    }

    /// Whether a batch is open on this runtime.
    pub fn is_batching(&self) -> bool {
        self.inner.batch.lock().depth > 0
    }

    fn enter_batch(&self) {
        let mut batch = self.inner.batch.lock();
        batch.depth += 1;
        if batch.depth == 1 {
            tracing::trace!(runtime = %self.id(), "batch opened");
        }
    }

    fn leave_batch(&self) -> bool {
        let mut batch = self.inner.batch.lock();
        batch.depth = batch.depth.saturating_sub(1);
        batch.depth == 0
    }

    /// Collect a sync subscriber instead of running it, if a batch is open.
    pub(crate) fn defer_if_batching(&self, id: SubscriberId) -> bool {
        let mut batch = self.inner.batch.lock();
        if batch.depth == 0 {
            return false;
        }
        if !batch.pending.insert(id) {
            cov_mark::hit!(batched_sync_deduplicated);
        }
        true
    }

    /// Run sync subscribers collected by a batch, in creation order.
    pub(crate) fn run_deferred_sync(&self) -> Result<()> {
        let pending: Vec<SubscriberId> = {
            let mut batch = self.inner.batch.lock();
            if batch.depth > 0 || batch.pending.is_empty() {
                return Ok(());
            }
            batch.pending.drain(..).collect()
        };

        let mut ordered: Vec<(u64, SubscriberId)> = pending
            .into_iter()
            .filter_map(|id| self.with_subscriber(id, |meta| (meta.order, id)))
            .collect();
        ordered.sort_unstable_by_key(|(order, _)| *order);
        tracing::trace!(count = ordered.len(), "running batched sync subscribers");

        for (_, id) in ordered {
            if !self.is_alive(id) {
                continue;
            }
            if let Err(err) = self.run_subscriber(id) {
                self.report_error(err)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{Effect, Runtime, TrackedCell};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn batch_returns_value() {
        let rt = Runtime::new();
        assert_eq!(rt.batch(|| 42).unwrap(), 42);
        assert!(!rt.is_batching());
    }

    #[test]
    fn sync_subscriber_runs_once_per_batch() {
        cov_mark::check!(batched_sync_deduplicated);
        let rt = Runtime::new();
        let a = TrackedCell::new(&rt, 0);
        let b = TrackedCell::new(&rt, 0);
        let runs = Arc::new(AtomicUsize::new(0));

        let _effect = Effect::sync(&rt, {
            let (a, b, runs) = (a.clone(), b.clone(), runs.clone());
            move || {
                a.get();
                b.get();
                runs.fetch_add(1, Ordering::Relaxed);
            }
        });
        assert_eq!(runs.load(Ordering::Relaxed), 1);

        rt.batch(|| {
            a.set(1);
            a.set(2);
            b.set(3);
            assert_eq!(runs.load(Ordering::Relaxed), 1);
        })
        .unwrap();
        assert_eq!(runs.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn nested_batches_flush_at_outermost() {
        let rt = Runtime::new();
        let cell = TrackedCell::new(&rt, 0);
        let runs = Arc::new(AtomicUsize::new(0));
        let _effect = Effect::sync(&rt, {
            let (cell, runs) = (cell.clone(), runs.clone());
            move || {
                cell.get();
                runs.fetch_add(1, Ordering::Relaxed);
            }
        });

        rt.batch(|| {
            cell.set(1);
            rt.batch(|| cell.set(2)).unwrap();
            assert!(rt.is_batching());
            assert_eq!(runs.load(Ordering::Relaxed), 1);
        })
        .unwrap();
        assert_eq!(runs.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn panicking_batch_restores_depth() {
        let rt = Runtime::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            rt.batch(|| panic!("boom")).ok();
        }));
        assert!(result.is_err());
        assert!(!rt.is_batching());
    }
}
