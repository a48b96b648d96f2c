use crate::arena::{ActiveGuard, Lifecycle, Notifier, NotifyMode, SubscriberId};
use crate::error::Result;
use crate::runtime::{Runtime, SubscriberOptions};
use crate::scheduler::Phase;
use std::borrow::Cow;
use std::ops::Deref;

/// Run a closure without tracking dependencies
///
/// Use this when you need to read tracked values without creating
/// dependencies, e.g. one-time reads or breaking a cycle.
///
/// # Example
/// ```ignore
/// let effect = Effect::sync(&rt, move || {
///     // Re-runs when `a` changes
///     let tracked = a.get();
///
///     // Does NOT re-run when `b` changes
///     let untracked = untracked(|| b.get());
/// });
/// ```
pub fn untracked<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    // The guard restores the active subscriber even if f panics
    let _guard = ActiveGuard::enter(None);
    f()
}

/// Configures and creates a [`Subscriber`].
pub struct SubscriberBuilder {
    runtime: Runtime,
    options: SubscriberOptions,
    lazy: bool,
}

impl SubscriberBuilder {
    /// Start building a subscriber in `runtime`. The default mode is
    /// [`NotifyMode::Sync`].
    pub fn new(runtime: &Runtime) -> Self {
        Self {
            runtime: runtime.clone(),
            options: SubscriberOptions {
                mode: NotifyMode::Sync,
                allow_recurse: false,
                label: None,
                detached: false,
            },
            lazy: false,
        }
    }

    /// Set the notification mode.
    pub fn mode(mut self, mode: NotifyMode) -> Self {
        self.options.mode = mode;
        self
    }

    /// Re-run inside the write that notified it.
    pub fn sync(self) -> Self {
        self.mode(NotifyMode::Sync)
    }

    /// Queue into the scheduler on notification.
    pub fn scheduled(self, phase: Phase) -> Self {
        self.mode(NotifyMode::Scheduled(phase))
    }

    /// Call `notifier` instead of running on notification.
    pub fn notifier<F>(self, notifier: F) -> Self
    where
        F: Fn(SubscriberId) + Send + Sync + 'static,
    {
        let notifier: Notifier = std::sync::Arc::new(notifier);
        self.mode(NotifyMode::Custom(notifier))
    }

    /// Let the subscriber's own writes re-notify it.
    pub fn allow_recurse(mut self, allow: bool) -> Self {
        self.options.allow_recurse = allow;
        self
    }

    /// Label shown in logs and runaway-update errors.
    pub fn label(mut self, label: impl Into<Cow<'static, str>>) -> Self {
        self.options.label = Some(label.into());
        self
    }

    /// Do not attach to the enclosing subscriber's scope.
    pub fn detached(mut self) -> Self {
        self.options.detached = true;
        self
    }

    /// Skip the initial run; the subscriber has no dependencies until it is
    /// run explicitly.
    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    /// Create the subscriber and, unless lazy, run it once to collect its
    /// dependencies. If that first run fails the subscriber is disposed and
    /// the error returned.
    pub fn build<F>(self, body: F) -> Result<Subscriber>
    where
        F: FnMut() -> Result<()> + Send + 'static,
    {
        let subscriber = self.create(Box::new(body));
        if !self.lazy {
            subscriber.run()?;
        }
        Ok(subscriber)
    }

    pub(crate) fn create(&self, body: crate::arena::subscriber_arena::Body) -> Subscriber {
        let options = SubscriberOptions {
            mode: self.options.mode.clone(),
            allow_recurse: self.options.allow_recurse,
            label: self.options.label.clone(),
            detached: self.options.detached,
        };
        let id = self.runtime.create_subscriber(options, body);
        Subscriber {
            runtime: self.runtime.clone(),
            id,
        }
    }
}

/// Owning handle to a subscriber
///
/// A subscriber is a re-runnable computation. Each run records the tracked
/// reads it performs as dependency edges; a later write to any of them
/// notifies it according to its [`NotifyMode`].
///
/// Dropping the handle disposes the subscriber. Use [`into_scoped`] to hand
/// ownership to the subscriber whose run created it instead.
///
/// [`into_scoped`]: Subscriber::into_scoped
pub struct Subscriber {
    runtime: Runtime,
    id: SubscriberId,
}

impl Subscriber {
    /// Start configuring a subscriber.
    pub fn builder(runtime: &Runtime) -> SubscriberBuilder {
        SubscriberBuilder::new(runtime)
    }

    /// Arena id.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Owning runtime.
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Run now, replacing its dependency edges.
    pub fn run(&self) -> Result<()> {
        self.runtime.run_subscriber(self.id)
    }

    /// Notify it as if a dependency had changed.
    pub fn schedule(&self) {
        self.runtime.notify(self.id);
    }

    /// Drop a queued, not-yet-started run. Returns whether one was dropped.
    pub fn invalidate(&self) -> bool {
        self.runtime.invalidate(self.id)
    }

    /// Dispose now. Idempotent.
    pub fn dispose(&self) {
        self.runtime.dispose_subscriber(self.id);
    }

    /// Whether it has been disposed.
    pub fn is_disposed(&self) -> bool {
        !self.runtime.is_alive(self.id)
    }

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        self.runtime.lifecycle(self.id)
    }

    /// Number of dependency edges recorded by the last run.
    pub fn edge_count(&self) -> usize {
        self.runtime.edge_count(self.id)
    }

    /// Number of subscribers created by the last run and still alive.
    pub fn child_count(&self) -> usize {
        self.runtime
            .with_subscriber(self.id, |meta| meta.child_count())
            .unwrap_or(0)
    }

    /// Give up the handle without disposing. The subscriber then lives until
    /// its parent re-runs or is disposed (or, if it has none, until it is
    /// disposed by id).
    pub fn into_scoped(self) -> SubscriberId {
        let id = self.id;
        std::mem::forget(self);
        id
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.runtime.dispose_subscriber(self.id);
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("runtime", &self.runtime.id())
            .finish()
    }
}

/// Side-effectful computation that automatically re-runs when dependencies change
///
/// An infallible convenience over [`Subscriber`].
///
/// # Example
/// ```ignore
/// let count = TrackedCell::new(&rt, 0);
///
/// // Runs immediately and tracks `count`
/// let effect = Effect::new(&rt, {
///     let count = count.clone();
///     move || println!("count = {}", count.get())
/// });
///
/// count.set(1); // queued
/// count.set(2); // already queued
/// rt.flush()?;  // runs once, prints "count = 2"
/// ```
pub struct Effect(Subscriber);

impl Effect {
    /// Create an effect queued in the `Pre` phase on change (runs immediately).
    pub fn new<F>(runtime: &Runtime, f: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        Self::with_mode(runtime, NotifyMode::Scheduled(Phase::Pre), f)
    }

    /// Create an effect queued in the `Post` phase on change (runs immediately).
    pub fn post<F>(runtime: &Runtime, f: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        Self::with_mode(runtime, NotifyMode::Scheduled(Phase::Post), f)
    }

    /// Create an effect that re-runs inside the write (runs immediately).
    pub fn sync<F>(runtime: &Runtime, f: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        Self::with_mode(runtime, NotifyMode::Sync, f)
    }

    fn with_mode<F>(runtime: &Runtime, mode: NotifyMode, mut f: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let subscriber = SubscriberBuilder::new(runtime).mode(mode).create(Box::new(move || {
            f();
            Ok(())
        }));
        if let Err(err) = subscriber.run() {
            runtime.route_error(err);
        }
        Self(subscriber)
    }

    /// Give up the handle without disposing; see [`Subscriber::into_scoped`].
    pub fn into_scoped(self) -> SubscriberId {
        self.0.into_scoped()
    }
}

impl Deref for Effect {
    type Target = Subscriber;

    fn deref(&self) -> &Subscriber {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TrackedCell;
    use crate::error::Error;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn effect_debounces_rapid_writes() {
        let rt = Runtime::new();
        let cell = TrackedCell::new(&rt, 0);
        let runs = Arc::new(AtomicUsize::new(0));

        let _effect = Effect::new(&rt, {
            let (cell, runs) = (cell.clone(), runs.clone());
            move || {
                cell.get();
                runs.fetch_add(1, Ordering::Relaxed);
            }
        });
        assert_eq!(runs.load(Ordering::Relaxed), 1);

        for i in 0..20 {
            cell.set(i);
        }
        assert_eq!(runs.load(Ordering::Relaxed), 1);
        assert_eq!(rt.flush().unwrap(), 1);
        assert_eq!(runs.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn untracked_read_creates_no_edge() {
        let rt = Runtime::new();
        let a = TrackedCell::new(&rt, 1);
        let b = TrackedCell::new(&rt, 2);
        let effect = Effect::sync(&rt, {
            let (a, b) = (a.clone(), b.clone());
            move || {
                a.get();
                untracked(|| b.get());
            }
        });
        assert_eq!(effect.edge_count(), 1);
    }

    #[test]
    fn child_is_disposed_when_parent_reruns() {
        let rt = Runtime::new();
        let trigger = TrackedCell::new(&rt, 0);
        let child_runs = Arc::new(AtomicUsize::new(0));

        let parent = Effect::sync(&rt, {
            let (rt2, trigger, child_runs) = (rt.clone(), trigger.clone(), child_runs.clone());
            move || {
                trigger.get();
                let child_runs = child_runs.clone();
                Effect::sync(&rt2, move || {
                    child_runs.fetch_add(1, Ordering::Relaxed);
                })
                .into_scoped();
            }
        });
        assert_eq!(parent.child_count(), 1);
        assert_eq!(rt.subscriber_total(), 2);

        trigger.set(1);
        assert_eq!(parent.child_count(), 1);
        assert_eq!(rt.subscriber_total(), 2, "old child disposed, new one created");
        assert_eq!(child_runs.load(Ordering::Relaxed), 2);

        drop(parent);
        assert_eq!(rt.subscriber_total(), 0);
    }

    #[test]
    fn failing_first_run_disposes() {
        let rt = Runtime::new();
        let result = Subscriber::builder(&rt)
            .label("broken")
            .build(|| Err(Error::RuntimeDropped));
        assert!(matches!(result, Err(Error::RuntimeDropped)));
        assert_eq!(rt.subscriber_total(), 0);
    }

    #[test]
    fn lazy_subscriber_has_no_edges_until_run() {
        let rt = Runtime::new();
        let cell = TrackedCell::new(&rt, 0);
        let sub = Subscriber::builder(&rt)
            .lazy()
            .build({
                let cell = cell.clone();
                move || {
                    cell.get();
                    Ok(())
                }
            })
            .unwrap();
        assert_eq!(sub.edge_count(), 0);
        sub.run().unwrap();
        assert_eq!(sub.edge_count(), 1);
    }

    #[test]
    fn self_write_does_not_retrigger() {
        cov_mark::check!(self_trigger_skipped);
        let rt = Runtime::new();
        let cell = TrackedCell::new(&rt, 0);
        let runs = Arc::new(AtomicUsize::new(0));
        let _effect = Effect::sync(&rt, {
            let (cell, runs) = (cell.clone(), runs.clone());
            move || {
                let v = cell.get();
                runs.fetch_add(1, Ordering::Relaxed);
                if v < 5 {
                    cell.set(v + 1);
                }
            }
        });
        assert_eq!(runs.load(Ordering::Relaxed), 1);
        assert_eq!(cell.get_untracked(), 1);
    }

    #[test]
    fn custom_notifier_receives_id() {
        let rt = Runtime::new();
        let cell = TrackedCell::new(&rt, 0);
        let seen = Arc::new(AtomicUsize::new(0));
        let sub = Subscriber::builder(&rt)
            .notifier({
                let seen = seen.clone();
                move |_| {
                    seen.fetch_add(1, Ordering::Relaxed);
                }
            })
            .build({
                let cell = cell.clone();
                move || {
                    cell.get();
                    Ok(())
                }
            })
            .unwrap();

        cell.set(1);
        cell.set(2);
        assert_eq!(seen.load(Ordering::Relaxed), 2);
        assert_eq!(sub.lifecycle(), Lifecycle::Idle);
    }

    #[test]
    fn disposed_subscriber_ignores_writes() {
        let rt = Runtime::new();
        let cell = TrackedCell::new(&rt, 0);
        let runs = Arc::new(AtomicUsize::new(0));
        let effect = Effect::sync(&rt, {
            let (cell, runs) = (cell.clone(), runs.clone());
            move || {
                cell.get();
                runs.fetch_add(1, Ordering::Relaxed);
            }
        });
        effect.dispose();
        effect.dispose();
        assert!(effect.is_disposed());
        cell.set(5);
        assert_eq!(runs.load(Ordering::Relaxed), 1);
    }
}
