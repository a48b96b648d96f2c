//! Lifecycle hooks for components and render roots.

use std::fmt;
use std::sync::Arc;

/// A lifecycle callback.
pub type HookFn = Arc<dyn Fn() + Send + Sync>;

/// Lifecycle points of a component (or a render root).
///
/// "Before" hooks run synchronously inside the diff, at the moment the
/// subtree is about to be mounted, patched or removed. "After" hooks are
/// queued and run in the post-flush phase, children before parents.
#[derive(Clone, Default)]
pub struct LifecycleHooks {
    pub(crate) before_mount: Vec<HookFn>,
    pub(crate) mounted: Vec<HookFn>,
    pub(crate) before_update: Vec<HookFn>,
    pub(crate) updated: Vec<HookFn>,
    pub(crate) before_unmount: Vec<HookFn>,
    pub(crate) unmounted: Vec<HookFn>,
}

/// Which lifecycle point fired.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HookPoint {
    /// Before the subtree is first inserted.
    BeforeMount,
    /// After the subtree was inserted (post phase).
    Mounted,
    /// Before the subtree is patched.
    BeforeUpdate,
    /// After the subtree was patched (post phase).
    Updated,
    /// Before the subtree is removed.
    BeforeUnmount,
    /// After the subtree was removed (post phase).
    Unmounted,
}

impl HookPoint {
    /// Whether hooks at this point are deferred to the post phase.
    pub fn is_after(self) -> bool {
        matches!(self, HookPoint::Mounted | HookPoint::Updated | HookPoint::Unmounted)
    }
}

impl LifecycleHooks {
    /// Empty hook set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook at `point`.
    pub fn on<F>(mut self, point: HookPoint, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.slot_mut(point).push(Arc::new(hook));
        self
    }

    /// Register a before-mount hook.
    pub fn on_before_mount<F: Fn() + Send + Sync + 'static>(self, hook: F) -> Self {
        self.on(HookPoint::BeforeMount, hook)
    }

    /// Register a mounted hook.
    pub fn on_mounted<F: Fn() + Send + Sync + 'static>(self, hook: F) -> Self {
        self.on(HookPoint::Mounted, hook)
    }

    /// Register a before-update hook.
    pub fn on_before_update<F: Fn() + Send + Sync + 'static>(self, hook: F) -> Self {
        self.on(HookPoint::BeforeUpdate, hook)
    }

    /// Register an updated hook.
    pub fn on_updated<F: Fn() + Send + Sync + 'static>(self, hook: F) -> Self {
        self.on(HookPoint::Updated, hook)
    }

    /// Register a before-unmount hook.
    pub fn on_before_unmount<F: Fn() + Send + Sync + 'static>(self, hook: F) -> Self {
        self.on(HookPoint::BeforeUnmount, hook)
    }

    /// Register an unmounted hook.
    pub fn on_unmounted<F: Fn() + Send + Sync + 'static>(self, hook: F) -> Self {
        self.on(HookPoint::Unmounted, hook)
    }

    /// Hooks registered at `point`.
    pub fn at(&self, point: HookPoint) -> &[HookFn] {
        match point {
            HookPoint::BeforeMount => &self.before_mount,
            HookPoint::Mounted => &self.mounted,
            HookPoint::BeforeUpdate => &self.before_update,
            HookPoint::Updated => &self.updated,
            HookPoint::BeforeUnmount => &self.before_unmount,
            HookPoint::Unmounted => &self.unmounted,
        }
    }

    fn slot_mut(&mut self, point: HookPoint) -> &mut Vec<HookFn> {
        match point {
            HookPoint::BeforeMount => &mut self.before_mount,
            HookPoint::Mounted => &mut self.mounted,
            HookPoint::BeforeUpdate => &mut self.before_update,
            HookPoint::Updated => &mut self.updated,
            HookPoint::BeforeUnmount => &mut self.before_unmount,
            HookPoint::Unmounted => &mut self.unmounted,
        }
    }
}

impl fmt::Debug for LifecycleHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleHooks")
            .field("before_mount", &self.before_mount.len())
            .field("mounted", &self.mounted.len())
            .field("before_update", &self.before_update.len())
            .field("updated", &self.updated.len())
            .field("before_unmount", &self.before_unmount.len())
            .field("unmounted", &self.unmounted.len())
            .finish()
    }
}
