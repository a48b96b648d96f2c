// Subscriber arena - storage for subscriber metadata
//
// A subscriber is any re-runnable computation: a render pass, a derived
// value or a side-effecting watcher. Its metadata holds:
// - edges: the (container, key) pairs it currently depends on, so cleanup is
//   O(edges) instead of a scan of the store
// - body: the closure itself, stored directly in the arena
// - mode: what a notification does (run now, enqueue, or a custom notifier)
// - scope: parent and children, so subscribers created during a run are torn
//   down when their creator re-runs or is disposed
//
// LIFECYCLE:
// - Idle -> Running -> Idle on every run
// - Disposed is terminal; the slab entry is removed at the same time
//
// IDs carry a generation so a stale id never reaches a reused slot.

use crate::arena::{ContainerId, PropKey};
use crate::error::Result;
use crate::runtime::RuntimeId;
use crate::scheduler::Phase;
use parking_lot::Mutex;
use slab::Slab;
use std::borrow::Cow;
use std::cell::Cell;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Subscriber lifecycle state.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    /// Waiting for a notification.
    Idle = 0,
    /// Its body is executing.
    Running = 1,
    /// Terminal; notifications are ignored.
    Disposed = 2,
}

impl Lifecycle {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Lifecycle::Idle,
            1 => Lifecycle::Running,
            _ => Lifecycle::Disposed,
        }
    }
}

/// Custom notification callback.
///
/// Receives the id of the subscriber whose dependency changed. This is how a
/// scheduler or a derived value intercepts "re-run now" without the store
/// knowing either exists.
pub type Notifier = Arc<dyn Fn(SubscriberId) + Send + Sync>;

pub(crate) type Body = Box<dyn FnMut() -> Result<()> + Send>;

/// What happens when one of a subscriber's dependencies is written.
#[derive(Clone, Default)]
pub enum NotifyMode {
    /// Re-run synchronously inside the write (deferred to the end of a batch).
    #[default]
    Sync,
    /// Hand the subscriber to the scheduler in the given phase.
    Scheduled(Phase),
    /// Call a custom notifier instead of running.
    Custom(Notifier),
}

impl fmt::Debug for NotifyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyMode::Sync => f.write_str("Sync"),
            NotifyMode::Scheduled(phase) => f.debug_tuple("Scheduled").field(phase).finish(),
            NotifyMode::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Unique identifier for a subscriber in a runtime's arena.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct SubscriberId {
    index: u32,
    generation: u32,
}

impl SubscriberId {
    /// Create an id from a slab index and generation.
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slab index.
    pub fn index(self) -> usize {
        self.index as usize
    }

    /// Generation the slot had when this id was issued.
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// One dependency edge as seen from the subscriber's side.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct Edge {
    /// Observed container.
    pub container: ContainerId,
    /// Key read within it.
    pub key: PropKey,
}

/// Metadata for a subscriber stored in the arena.
pub struct SubscriberMetadata {
    generation: u32,
    state: AtomicU8,
    /// Monotonic ordering key; creators always sort before what they create.
    pub(crate) order: u64,
    pub(crate) mode: NotifyMode,
    pub(crate) allow_recurse: bool,
    pub(crate) label: Option<Cow<'static, str>>,
    pub(crate) parent: Option<SubscriberId>,
    /// Taken out while running so the body may touch the arena.
    body: Mutex<Option<Body>>,
    edges: Mutex<Vec<Edge>>,
    children: Mutex<Vec<SubscriberId>>,
}

/// Construction parameters for [`SubscriberMetadata`].
pub(crate) struct SubscriberInit {
    pub order: u64,
    pub mode: NotifyMode,
    pub allow_recurse: bool,
    pub label: Option<Cow<'static, str>>,
    pub parent: Option<SubscriberId>,
    pub body: Body,
}

impl SubscriberMetadata {
    fn new(generation: u32, init: SubscriberInit) -> Self {
        Self {
            generation,
            state: AtomicU8::new(Lifecycle::Idle as u8),
            order: init.order,
            mode: init.mode,
            allow_recurse: init.allow_recurse,
            label: init.label,
            parent: init.parent,
            body: Mutex::new(Some(init.body)),
            edges: Mutex::new(Vec::new()),
            children: Mutex::new(Vec::new()),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> Lifecycle {
        Lifecycle::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: Lifecycle) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Take the body out for execution. `None` means it is already running.
    pub(crate) fn take_body(&self) -> Option<Body> {
        self.body.lock().take()
    }

    pub(crate) fn restore_body(&self, body: Body) {
        *self.body.lock() = Some(body);
    }

    pub(crate) fn push_edge(&self, edge: Edge) {
        self.edges.lock().push(edge);
    }

    pub(crate) fn take_edges(&self) -> Vec<Edge> {
        std::mem::take(&mut *self.edges.lock())
    }

    /// Execute a closure with the current edge list.
    pub fn with_edges<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&[Edge]) -> R,
    {
        f(&self.edges.lock()[..])
    }

    pub(crate) fn add_child(&self, child: SubscriberId) {
        self.children.lock().push(child);
    }

    pub(crate) fn remove_child(&self, child: SubscriberId) {
        self.children.lock().retain(|c| *c != child);
    }

    pub(crate) fn take_children(&self) -> Vec<SubscriberId> {
        std::mem::take(&mut *self.children.lock())
    }

    /// Number of live children created by the last run.
    pub fn child_count(&self) -> usize {
        self.children.lock().len()
    }

    /// Take everything needed for disposal, leaving the metadata inert.
    pub(crate) fn into_parts(self) -> (Option<Body>, Vec<Edge>, Vec<SubscriberId>) {
        (
            self.body.into_inner(),
            self.edges.into_inner(),
            self.children.into_inner(),
        )
    }
}

/// Slab of subscriber metadata with generation-checked access.
pub struct SubscriberArena {
    slab: Slab<SubscriberMetadata>,
    next_generation: u32,
}

impl SubscriberArena {
    /// Create an empty arena.
    pub const fn new() -> Self {
        Self {
            slab: Slab::new(),
            next_generation: 0,
        }
    }

    pub(crate) fn insert(&mut self, init: SubscriberInit) -> SubscriberId {
        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1);
        let entry = self.slab.vacant_entry();
        let index = entry.key() as u32;
        entry.insert(SubscriberMetadata::new(generation, init));
        SubscriberId::new(index, generation)
    }

    /// Look up live metadata. Stale ids return `None`.
    pub fn get(&self, id: SubscriberId) -> Option<&SubscriberMetadata> {
        self.slab
            .get(id.index())
            .filter(|meta| meta.generation == id.generation)
    }

    /// Remove a subscriber's metadata. Stale ids return `None`.
    pub fn remove(&mut self, id: SubscriberId) -> Option<SubscriberMetadata> {
        self.get(id)?;
        let meta = self.slab.remove(id.index());
        meta.set_state(Lifecycle::Disposed);
        Some(meta)
    }

    /// Number of live subscribers.
    pub fn len(&self) -> usize {
        self.slab.len()
    }

    /// Whether the arena holds no subscribers.
    pub fn is_empty(&self) -> bool {
        self.slab.is_empty()
    }
}

impl Default for SubscriberArena {
    fn default() -> Self {
        Self::new()
    }
}

/// The subscriber currently executing on this thread, tagged with its runtime.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct ActiveSubscriber {
    /// Runtime that owns the subscriber.
    pub runtime: RuntimeId,
    /// The running subscriber.
    pub id: SubscriberId,
}

// Thread-local active subscriber.
// Reads consult it to know whom to attach an edge to.
thread_local! {
    static ACTIVE: Cell<Option<ActiveSubscriber>> = const { Cell::new(None) };
}

/// Get the currently executing subscriber (if any)
pub fn active_subscriber() -> Option<ActiveSubscriber> {
    ACTIVE.with(Cell::get)
}

/// RAII guard that restores the previously active subscriber when dropped.
///
/// Push/pop discipline: nested runs restore their caller's marker, and a
/// panicking body cannot leave a stale marker behind.
pub struct ActiveGuard {
    previous: Option<ActiveSubscriber>,
}

impl ActiveGuard {
    /// Make `active` the current subscriber until the guard drops.
    pub fn enter(active: Option<ActiveSubscriber>) -> Self {
        let previous = ACTIVE.with(|cell| cell.replace(active));
        Self { previous }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        ACTIVE.with(|cell| cell.set(self.previous));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init(order: u64) -> SubscriberInit {
        SubscriberInit {
            order,
            mode: NotifyMode::Sync,
            allow_recurse: false,
            label: None,
            parent: None,
            body: Box::new(|| Ok(())),
        }
    }

    #[test]
    fn stale_id_is_rejected_after_slot_reuse() {
        let mut arena = SubscriberArena::new();
        let first = arena.insert(init(0));
        assert!(arena.remove(first).is_some());

        let second = arena.insert(init(1));
        assert_eq!(first.index(), second.index());
        assert_ne!(first, second);

        assert!(arena.get(first).is_none());
        assert!(arena.remove(first).is_none());
        assert_eq!(arena.get(second).map(|m| m.order), Some(1));
    }

    #[test]
    fn body_is_taken_and_restored() {
        let mut arena = SubscriberArena::new();
        let id = arena.insert(init(0));
        let meta = arena.get(id).unwrap();

        let body = meta.take_body();
        assert!(body.is_some());
        assert!(meta.take_body().is_none(), "already running");
        meta.restore_body(body.unwrap());
        assert!(meta.take_body().is_some());
    }

    #[test]
    fn active_guard_restores_on_panic() {
        let outer = ActiveSubscriber {
            runtime: RuntimeId::new(1),
            id: SubscriberId::new(10, 0),
        };
        let inner = ActiveSubscriber {
            runtime: RuntimeId::new(1),
            id: SubscriberId::new(20, 0),
        };

        let _outer_guard = ActiveGuard::enter(Some(outer));
        let result = std::panic::catch_unwind(|| {
            let _guard = ActiveGuard::enter(Some(inner));
            assert_eq!(active_subscriber(), Some(inner));
            panic!("test panic");
        });

        assert!(result.is_err());
        assert_eq!(active_subscriber(), Some(outer));
    }
}
