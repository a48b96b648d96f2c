//! Runtime instances.
//!
//! A [`Runtime`] owns everything reactive: the subscriber arena, the
//! dependency store, the scheduler queue and the batch state. Nothing is
//! process-global except the thread-local "active subscriber" marker, which
//! is tagged with the runtime id so two runtimes never track into each other.
//!
//! # Configuration
//!
//! ```ignore
//! let runtime = Runtime::builder()
//!     .name("app")
//!     .recursion_limit(50)
//!     .on_schedule(|| event_loop.wake())
//!     .error_handler(|err| eprintln!("update failed: {err}"))
//!     .build();
//! ```

use crate::arena::subscriber_arena::{Body, SubscriberInit};
use crate::arena::{
    ActiveGuard, ActiveSubscriber, ContainerId, DependencyStore, Edge, Lifecycle, NotifyMode,
    PropKey, SubscriberArena, SubscriberId, SubscriberMetadata, active_subscriber,
};
use crate::batch::BatchState;
use crate::error::{Error, Result};
use crate::scheduler::SchedulerState;
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Per-flush ceiling on how often one subscriber may run.
pub const DEFAULT_RECURSION_LIMIT: usize = 100;

/// Called once whenever a flush becomes necessary; the host should arrange
/// for [`Runtime::flush`] to run on its next turn.
pub type ScheduleHook = Arc<dyn Fn() + Send + Sync>;

/// Receives subscriber errors instead of having them returned from `flush`.
pub type ErrorHandler = Arc<dyn Fn(&Error) + Send + Sync>;

static NEXT_RUNTIME_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a runtime instance.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct RuntimeId(u64);

impl RuntimeId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    fn next() -> Self {
        Self(NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RuntimeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rt{}", self.0)
    }
}

pub(crate) struct RuntimeConfig {
    pub(crate) name: Option<Cow<'static, str>>,
    pub(crate) recursion_limit: usize,
    pub(crate) on_schedule: Option<ScheduleHook>,
    pub(crate) error_handler: Option<ErrorHandler>,
}

/// Builder for configuring a [`Runtime`].
pub struct RuntimeBuilder {
    config: RuntimeConfig,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeBuilder {
    /// Create a builder with default settings.
    ///
    /// Defaults:
    /// - `recursion_limit`: 100
    /// - no schedule hook (call `flush()` yourself)
    /// - no error handler (errors are returned from `flush()`)
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig {
                name: None,
                recursion_limit: DEFAULT_RECURSION_LIMIT,
                on_schedule: None,
                error_handler: None,
            },
        }
    }

    /// Name used in logs.
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.config.name = Some(name.into());
        self
    }

    /// How many times one subscriber may run within a single flush before
    /// [`Error::RunawayUpdate`] is raised. Clamped to at least 1.
    pub fn recursion_limit(mut self, limit: usize) -> Self {
        self.config.recursion_limit = limit.max(1);
        self
    }

    /// Hook called when a flush gets scheduled (the microtask-equivalent).
    pub fn on_schedule<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.config.on_schedule = Some(Arc::new(hook));
        self
    }

    /// Route subscriber errors to `handler` instead of returning them.
    pub fn error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.config.error_handler = Some(Arc::new(handler));
        self
    }

    /// Build the runtime.
    pub fn build(self) -> Runtime {
        let id = RuntimeId::next();
        tracing::debug!(runtime = %id, name = ?self.config.name, "runtime created");
        Runtime {
            inner: Arc::new(RuntimeInner {
                id,
                config: self.config,
                subscribers: RwLock::new(SubscriberArena::new()),
                store: RwLock::new(DependencyStore::new()),
                scheduler: Mutex::new(SchedulerState::new()),
                batch: Mutex::new(BatchState::new()),
                stashed_errors: Mutex::new(Vec::new()),
                next_container: AtomicU64::new(1),
                next_order: AtomicU64::new(0),
            }),
        }
    }
}

pub(crate) struct RuntimeInner {
    pub(crate) id: RuntimeId,
    pub(crate) config: RuntimeConfig,
    pub(crate) subscribers: RwLock<SubscriberArena>,
    pub(crate) store: RwLock<DependencyStore>,
    pub(crate) scheduler: Mutex<SchedulerState>,
    pub(crate) batch: Mutex<BatchState>,
    stashed_errors: Mutex<Vec<Error>>,
    next_container: AtomicU64,
    next_order: AtomicU64,
}

/// Handle to a reactive runtime instance. Cheap to clone.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Arc<RuntimeInner>,
}

/// Non-owning handle to a runtime, held by observed containers.
#[derive(Clone)]
pub struct WeakRuntime {
    inner: Weak<RuntimeInner>,
}

impl WeakRuntime {
    /// Upgrade to a strong handle if the runtime is still alive.
    pub fn upgrade(&self) -> Option<Runtime> {
        self.inner.upgrade().map(|inner| Runtime { inner })
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("id", &self.inner.id)
            .field("name", &self.inner.config.name)
            .finish_non_exhaustive()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

/// Options for creating a subscriber; see [`SubscriberBuilder`](crate::SubscriberBuilder).
pub(crate) struct SubscriberOptions {
    pub mode: NotifyMode,
    pub allow_recurse: bool,
    pub label: Option<Cow<'static, str>>,
    pub detached: bool,
}

impl Runtime {
    /// Create a runtime with default configuration.
    pub fn new() -> Self {
        RuntimeBuilder::new().build()
    }

    /// Start configuring a runtime.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// This runtime's identity.
    pub fn id(&self) -> RuntimeId {
        self.inner.id
    }

    /// Configured name, if any.
    pub fn name(&self) -> Option<&str> {
        self.inner.config.name.as_deref()
    }

    /// Configured per-flush recursion ceiling.
    pub fn recursion_limit(&self) -> usize {
        self.inner.config.recursion_limit
    }

    /// Create a non-owning handle.
    pub fn downgrade(&self) -> WeakRuntime {
        WeakRuntime {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // =========================================================================
    // Observation layer entry points
    // =========================================================================

    /// Allocate a fresh container identity.
    ///
    /// Custom containers call this once and pair it with
    /// [`release_container`](Self::release_container) when they go away.
    pub fn allocate_container(&self) -> ContainerId {
        ContainerId::new(self.inner.next_container.fetch_add(1, Ordering::Relaxed))
    }

    /// Disposal hook: forget every edge recorded against `container`.
    pub fn release_container(&self, container: ContainerId) {
        let dropped = self.inner.store.write().release_container(container);
        if dropped > 0 {
            tracing::trace!(%container, dropped, "container released");
        }
    }

    /// Record that the active subscriber (if any) read `key` of `container`.
    pub fn track(&self, container: ContainerId, key: PropKey) {
        let Some(active) = active_subscriber() else {
            return;
        };
        if active.runtime != self.inner.id || !self.is_alive(active.id) {
            return;
        }

        let inserted = self.inner.store.write().add_edge(container, key, active.id);
        if inserted {
            self.with_subscriber(active.id, |meta| meta.push_edge(Edge { container, key }));
            tracing::trace!(subscriber = %active.id, %container, ?key, "edge created");
        }
    }

    /// Notify every subscriber of `key` in `container`.
    pub fn trigger(&self, container: ContainerId, key: PropKey) {
        self.trigger_keys(container, [key]);
    }

    /// Notify the union of subscribers of several keys, each at most once.
    pub fn trigger_keys<I>(&self, container: ContainerId, keys: I)
    where
        I: IntoIterator<Item = PropKey>,
    {
        let mut targets: SmallVec<[SubscriberId; 8]> = SmallVec::new();
        {
            let store = self.inner.store.read();
            for key in keys {
                store.for_each_subscriber(container, key, |id| {
                    if !targets.contains(&id) {
                        targets.push(id);
                    }
                });
            }
        }
        if targets.is_empty() {
            return;
        }

        tracing::trace!(%container, count = targets.len(), "notifying subscribers");
        for id in targets {
            self.notify(id);
        }
    }

    // =========================================================================
    // Subscriber lifecycle
    // =========================================================================

    /// Access a subscriber's metadata. Returns `None` for disposed ids.
    pub(crate) fn with_subscriber<F, R>(&self, id: SubscriberId, f: F) -> Option<R>
    where
        F: FnOnce(&SubscriberMetadata) -> R,
    {
        let arena = self.inner.subscribers.read();
        arena.get(id).map(f)
    }

    /// Whether the subscriber exists and has not been disposed.
    pub fn is_alive(&self, id: SubscriberId) -> bool {
        self.with_subscriber(id, |_| ()).is_some()
    }

    /// Lifecycle state of a subscriber; disposed ids report `Disposed`.
    pub fn lifecycle(&self, id: SubscriberId) -> Lifecycle {
        self.with_subscriber(id, SubscriberMetadata::state)
            .unwrap_or(Lifecycle::Disposed)
    }

    /// Number of dependency edges the subscriber currently holds.
    pub fn edge_count(&self, id: SubscriberId) -> usize {
        self.with_subscriber(id, |meta| meta.with_edges(<[Edge]>::len))
            .unwrap_or(0)
    }

    /// Number of live subscribers in this runtime.
    pub fn subscriber_total(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// Number of subscribers attached to one (container, key) pair.
    pub fn subscriber_count(&self, container: ContainerId, key: PropKey) -> usize {
        self.inner.store.read().subscriber_count(container, key)
    }

    /// Whether `id` is the subscriber currently executing on this thread.
    pub(crate) fn is_active(&self, id: SubscriberId) -> bool {
        active_subscriber()
            == Some(ActiveSubscriber {
                runtime: self.inner.id,
                id,
            })
    }

    pub(crate) fn create_subscriber(&self, options: SubscriberOptions, body: Body) -> SubscriberId {
        let parent = if options.detached {
            None
        } else {
            active_subscriber()
                .filter(|active| active.runtime == self.inner.id)
                .map(|active| active.id)
        };
        let order = self.inner.next_order.fetch_add(1, Ordering::Relaxed);

        let id = self.inner.subscribers.write().insert(SubscriberInit {
            order,
            mode: options.mode,
            allow_recurse: options.allow_recurse,
            label: options.label,
            parent,
            body,
        });

        if let Some(parent_id) = parent {
            self.with_subscriber(parent_id, |meta| meta.add_child(id));
        }
        tracing::trace!(subscriber = %id, order, parent = ?parent, "subscriber created");
        id
    }

    /// Run a subscriber now.
    ///
    /// 1. Detach from every current edge and dispose children of the last run
    /// 2. Mark it active (restoring the previous marker afterwards)
    /// 3. Run the body; reads re-populate the edge list
    ///
    /// A subscriber that is already running is not re-entered.
    pub fn run_subscriber(&self, id: SubscriberId) -> Result<()> {
        let body = match self.with_subscriber(id, SubscriberMetadata::take_body) {
            None => return Err(Error::Disposed(id)),
            Some(None) => {
                cov_mark::hit!(reentrant_run_skipped);
                tracing::trace!(subscriber = %id, "already running, not re-entered");
                return Ok(());
            }
            Some(Some(body)) => body,
        };

        self.cleanup(id);
        self.with_subscriber(id, |meta| meta.set_state(Lifecycle::Running));

        let mut guard = BodyGuard {
            runtime: self,
            id,
            body: Some(body),
        };
        let _active = ActiveGuard::enter(Some(ActiveSubscriber {
            runtime: self.inner.id,
            id,
        }));
        guard.run()
    }

    /// Detach all edges and tear down children created by the previous run.
    fn cleanup(&self, id: SubscriberId) {
        let Some((edges, children)) =
            self.with_subscriber(id, |meta| (meta.take_edges(), meta.take_children()))
        else {
            return;
        };

        if !edges.is_empty() {
            let mut store = self.inner.store.write();
            for edge in &edges {
                store.remove_edge(edge.container, edge.key, id);
            }
        }
        for child in children {
            self.dispose_subscriber(child);
        }
    }

    /// Dispose a subscriber: detach its edges, dispose its children, drop it
    /// from the scheduler. Idempotent; returns false if it was already gone.
    pub fn dispose_subscriber(&self, id: SubscriberId) -> bool {
        let Some(meta) = self.inner.subscribers.write().remove(id) else {
            return false;
        };
        let parent = meta.parent;
        let (body, edges, children) = meta.into_parts();

        self.invalidate(id);
        self.inner.batch.lock().forget(id);

        if !edges.is_empty() {
            let mut store = self.inner.store.write();
            for edge in &edges {
                store.remove_edge(edge.container, edge.key, id);
            }
        }
        for child in children {
            self.dispose_subscriber(child);
        }
        if let Some(parent_id) = parent {
            self.with_subscriber(parent_id, |meta| meta.remove_child(id));
        }
        tracing::trace!(subscriber = %id, "subscriber disposed");

        // The body may own handles whose drop re-enters the runtime.
        drop(body);
        true
    }

    /// Deliver a change notification according to the subscriber's mode.
    pub(crate) fn notify(&self, id: SubscriberId) {
        let Some((mode, allow_recurse)) =
            self.with_subscriber(id, |meta| (meta.mode.clone(), meta.allow_recurse))
        else {
            return;
        };

        if !allow_recurse && self.is_active(id) {
            cov_mark::hit!(self_trigger_skipped);
            tracing::trace!(subscriber = %id, "write by the running subscriber ignored");
            return;
        }

        match mode {
            NotifyMode::Sync => {
                if self.defer_if_batching(id) {
                    return;
                }
                if let Err(err) = self.run_subscriber(id) {
                    self.route_error(err);
                }
            }
            NotifyMode::Scheduled(phase) => self.enqueue(id, phase),
            NotifyMode::Custom(notifier) => notifier(id),
        }
    }

    // =========================================================================
    // Error routing
    // =========================================================================

    /// Hand an error to the configured handler. Without one, the error is
    /// returned to the caller.
    pub(crate) fn report_error(&self, err: Error) -> Result<()> {
        match &self.inner.config.error_handler {
            Some(handler) => {
                tracing::error!(runtime = %self.inner.id, error = %err, "subscriber failed");
                handler(&err);
                Ok(())
            }
            None => Err(err),
        }
    }

    /// Report an error from a context that cannot return it (a write).
    /// Without a handler it is kept until the next `flush()`.
    pub(crate) fn route_error(&self, err: Error) {
        if let Err(err) = self.report_error(err) {
            tracing::debug!(error = %err, "stashing error until next flush");
            self.inner.stashed_errors.lock().push(err);
        }
    }

    pub(crate) fn take_stashed_error(&self) -> Option<Error> {
        let mut stashed = self.inner.stashed_errors.lock();
        if stashed.is_empty() {
            None
        } else {
            Some(stashed.remove(0))
        }
    }
}

/// Puts a subscriber's body back into the arena after it ran, even if it
/// panicked. If the subscriber was disposed meanwhile, the body is dropped
/// after the arena lock is released.
struct BodyGuard<'a> {
    runtime: &'a Runtime,
    id: SubscriberId,
    body: Option<Body>,
}

impl BodyGuard<'_> {
    fn run(&mut self) -> Result<()> {
        match self.body.as_mut() {
            Some(body) => body(),
            None => Ok(()),
        }
    }
}

impl Drop for BodyGuard<'_> {
    fn drop(&mut self) {
        let Some(body) = self.body.take() else {
            return;
        };
        let leftover = {
            let arena = self.runtime.inner.subscribers.read();
            match arena.get(self.id) {
                Some(meta) => {
                    meta.restore_body(body);
                    meta.set_state(Lifecycle::Idle);
                    None
                }
                None => Some(body),
            }
        };
        drop(leftover);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn options() -> SubscriberOptions {
        SubscriberOptions {
            mode: NotifyMode::Sync,
            allow_recurse: false,
            label: None,
            detached: false,
        }
    }

    #[test]
    fn track_outside_subscriber_is_noop() {
        let rt = Runtime::new();
        let c = rt.allocate_container();
        rt.track(c, PropKey::Value);
        assert_eq!(rt.subscriber_count(c, PropKey::Value), 0);
    }

    #[test]
    fn run_records_edges_and_rerun_replaces_them() {
        let rt = Runtime::new();
        let c = rt.allocate_container();
        let flag = Arc::new(AtomicUsize::new(1));

        let rt2 = rt.clone();
        let flag2 = flag.clone();
        let id = rt.create_subscriber(
            options(),
            Box::new(move || {
                rt2.track(c, PropKey::Index(0));
                if flag2.load(Ordering::Relaxed) == 1 {
                    rt2.track(c, PropKey::Index(1));
                }
                Ok(())
            }),
        );

        rt.run_subscriber(id).unwrap();
        assert_eq!(rt.edge_count(id), 2);

        flag.store(0, Ordering::Relaxed);
        rt.run_subscriber(id).unwrap();
        assert_eq!(rt.edge_count(id), 1);
        assert_eq!(rt.subscriber_count(c, PropKey::Index(1)), 0);
    }

    #[test]
    fn other_runtime_does_not_track() {
        let a = Runtime::new();
        let b = Runtime::new();
        let c = b.allocate_container();

        let b2 = b.clone();
        let id = a.create_subscriber(
            options(),
            Box::new(move || {
                b2.track(c, PropKey::Value);
                Ok(())
            }),
        );
        a.run_subscriber(id).unwrap();
        assert_eq!(b.subscriber_count(c, PropKey::Value), 0);
        assert_eq!(a.edge_count(id), 0);
    }

    #[test]
    fn dispose_is_idempotent_and_detaches() {
        let rt = Runtime::new();
        let c = rt.allocate_container();
        let rt2 = rt.clone();
        let id = rt.create_subscriber(
            options(),
            Box::new(move || {
                rt2.track(c, PropKey::Value);
                Ok(())
            }),
        );
        rt.run_subscriber(id).unwrap();
        assert_eq!(rt.subscriber_count(c, PropKey::Value), 1);

        assert!(rt.dispose_subscriber(id));
        assert!(!rt.dispose_subscriber(id));
        assert_eq!(rt.subscriber_count(c, PropKey::Value), 0);
        assert_eq!(rt.lifecycle(id), Lifecycle::Disposed);
        assert!(matches!(rt.run_subscriber(id), Err(Error::Disposed(_))));

        // Writing after disposal is a no-op.
        rt.trigger(c, PropKey::Value);
    }

    #[test]
    fn subscriber_disposing_itself_mid_run_is_safe() {
        let rt = Runtime::new();
        let slot: Arc<Mutex<Option<SubscriberId>>> = Arc::new(Mutex::new(None));
        let rt2 = rt.clone();
        let slot2 = slot.clone();
        let id = rt.create_subscriber(
            options(),
            Box::new(move || {
                if let Some(me) = *slot2.lock() {
                    rt2.dispose_subscriber(me);
                }
                Ok(())
            }),
        );
        *slot.lock() = Some(id);

        rt.run_subscriber(id).unwrap();
        assert!(!rt.is_alive(id));
        assert_eq!(rt.subscriber_total(), 0);
    }

    #[test]
    fn recursion_limit_is_clamped() {
        let rt = Runtime::builder().recursion_limit(0).build();
        assert_eq!(rt.recursion_limit(), 1);
        assert_eq!(Runtime::new().recursion_limit(), DEFAULT_RECURSION_LIMIT);
    }
}
