//! Render subscribers.
//!
//! A [`RenderRoot`] binds a render function to a [`Renderer`]: the function
//! runs inside a `Render`-phase subscriber, so every tracked read it makes
//! schedules a re-render, and each run's tree is diffed against the last
//! committed one.

use crate::arena::active_subscriber;
use crate::diff::lifecycle::{HookFn, HookPoint, LifecycleHooks};
use crate::diff::{ErrorAction, Renderer};
use crate::error::{Error, RenderError, Result};
use crate::host::NodeOps;
use crate::node::Node;
use crate::runtime::{Runtime, WeakRuntime};
use crate::scheduler::Phase;
use crate::subscriber::Subscriber;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

struct RootState<O: NodeOps> {
    renderer: Renderer<O>,
    container: O::Handle,
    committed: Option<Node<O::Handle>>,
    hooks: Arc<LifecycleHooks>,
    renders: usize,
}

/// A mounted render function.
///
/// Dropping the root stops re-rendering but leaves the committed host nodes
/// in place; call [`unmount`](RenderRoot::unmount) to remove them.
pub struct RenderRoot<O: NodeOps> {
    runtime: Runtime,
    state: Arc<Mutex<RootState<O>>>,
    subscriber: Option<Subscriber>,
    order: u64,
}

impl<O: NodeOps> fmt::Debug for RenderRoot<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderRoot")
            .field("runtime", &self.runtime.id())
            .field("subscriber", &self.subscriber.as_ref().map(Subscriber::id))
            .finish_non_exhaustive()
    }
}

impl<O> RenderRoot<O>
where
    O: NodeOps + Send + 'static,
    O::Handle: Send + 'static,
{
    /// Create an unmounted root that renders into `container`.
    pub fn new(runtime: &Runtime, renderer: Renderer<O>, container: O::Handle) -> Self {
        Self {
            runtime: runtime.clone(),
            state: Arc::new(Mutex::new(RootState {
                renderer,
                container,
                committed: None,
                hooks: Arc::default(),
                renders: 0,
            })),
            subscriber: None,
            order: 0,
        }
    }

    /// Lifecycle hooks for the root itself. They fire around the whole
    /// tree: "before" hooks before the diff, "after" hooks after those of
    /// every component inside it. "Before" hooks run while the root is
    /// locked and must not call back into it.
    pub fn hooks(self, hooks: LifecycleHooks) -> Self {
        self.state.lock().hooks = Arc::new(hooks);
        self
    }

    /// Render once, mount the result and re-render whenever a tracked read
    /// made by `render` changes.
    ///
    /// `mounted` hooks run before this returns unless a flush is already in
    /// progress. If the first render fails and the error handler does not
    /// recover it, nothing is mounted and the error is returned.
    pub fn mount<F>(&mut self, render: F) -> Result<()>
    where
        F: FnMut() -> std::result::Result<Node<O::Handle>, RenderError> + Send + 'static,
    {
        if let Some(previous) = self.subscriber.take() {
            previous.dispose();
        }
        let body = render_body(self.state.clone(), self.runtime.downgrade(), render);
        let subscriber = Subscriber::builder(&self.runtime)
            .scheduled(Phase::Render)
            .label("render root")
            .detached()
            .build(body)?;
        self.order = self
            .runtime
            .with_subscriber(subscriber.id(), |meta| meta.order)
            .unwrap_or_default();
        self.subscriber = Some(subscriber);
        self.runtime.flush_post()?;
        Ok(())
    }

    /// Stop re-rendering and remove the committed tree from the host.
    pub fn unmount(&mut self) -> Result<()> {
        if let Some(subscriber) = self.subscriber.take() {
            subscriber.dispose();
        }
        let post = {
            let mut guard = self.state.lock();
            let RootState {
                renderer,
                container,
                committed,
                hooks,
                ..
            } = &mut *guard;
            if committed.is_none() {
                return Ok(());
            }
            run_now(hooks.at(HookPoint::BeforeUnmount));
            renderer.render(committed, None, container)?;
            let mut post = renderer.take_post_hooks();
            post.extend(hooks.at(HookPoint::Unmounted).iter().cloned());
            post
        };
        self.runtime.queue_post_hook(self.order, Box::new(move || run_now(&post)));
        self.runtime.flush_post()?;
        Ok(())
    }

    /// Whether a render function is mounted.
    pub fn is_mounted(&self) -> bool {
        self.subscriber.is_some()
    }

    /// The render subscriber, while mounted.
    pub fn subscriber(&self) -> Option<&Subscriber> {
        self.subscriber.as_ref()
    }

    /// Number of successful renders so far.
    pub fn render_count(&self) -> usize {
        self.state.lock().renders
    }

    /// Inspect the committed tree.
    pub fn with_committed<R>(&self, f: impl FnOnce(Option<&Node<O::Handle>>) -> R) -> R {
        f(self.state.lock().committed.as_ref())
    }

    /// Inspect the host.
    pub fn with_ops<R>(&self, f: impl FnOnce(&O) -> R) -> R {
        f(self.state.lock().renderer.ops())
    }
}

fn run_now(hooks: &[HookFn]) {
    for hook in hooks {
        hook();
    }
}

fn render_body<O, F>(
    state: Arc<Mutex<RootState<O>>>,
    runtime: WeakRuntime,
    mut render: F,
) -> impl FnMut() -> Result<()> + Send + 'static
where
    O: NodeOps + Send + 'static,
    O::Handle: Send + 'static,
    F: FnMut() -> std::result::Result<Node<O::Handle>, RenderError> + Send + 'static,
{
    move || {
        // Tracked reads happen here, with no lock held.
        let next = render();

        let mut guard = state.lock();
        let RootState {
            renderer,
            container,
            committed,
            hooks,
            renders,
        } = &mut *guard;

        let next = match next {
            Ok(node) => node,
            Err(err) => match renderer.handle_render_error(&err) {
                Some(ErrorAction::Fallback(fallback)) => fallback,
                Some(ErrorAction::Keep) => {
                    cov_mark::hit!(failed_render_kept);
                    return Ok(());
                }
                None => return Err(Error::RenderBody(err)),
            },
        };

        let (before, after) = if committed.is_none() {
            (HookPoint::BeforeMount, HookPoint::Mounted)
        } else {
            (HookPoint::BeforeUpdate, HookPoint::Updated)
        };
        let _span = tracing::debug_span!("render", ?before, renders = *renders).entered();
        run_now(hooks.at(before));
        renderer.render(committed, Some(next), container)?;
        *renders += 1;

        let mut post = renderer.take_post_hooks();
        post.extend(hooks.at(after).iter().cloned());
        drop(guard);

        if post.is_empty() {
            return Ok(());
        }
        match runtime.upgrade() {
            Some(rt) => {
                let order = active_subscriber()
                    .filter(|active| active.runtime == rt.id())
                    .and_then(|active| rt.with_subscriber(active.id, |meta| meta.order))
                    .unwrap_or_default();
                rt.queue_post_hook(order, Box::new(move || run_now(&post)));
            }
            None => run_now(&post),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{MemoryHost, NodeId};
    use crate::tracked::TrackedCell;

    type N = Node<NodeId>;

    fn root(rt: &Runtime) -> RenderRoot<MemoryHost> {
        let host = MemoryHost::new();
        let container = host.root();
        RenderRoot::new(rt, Renderer::new(host), container)
    }

    fn html(root: &RenderRoot<MemoryHost>) -> String {
        root.with_ops(|ops| ops.inner_html(ops.root()))
    }

    #[test]
    fn rerenders_on_tracked_change() {
        let rt = Runtime::new();
        let count = TrackedCell::new(&rt, 0);
        let mut app = root(&rt);
        let c = count.clone();
        app.mount(move || Ok(N::element("p").child(N::text(c.get().to_string()))))
            .unwrap();
        assert_eq!(html(&app), "<p>0</p>");

        count.set(1);
        count.set(2);
        assert_eq!(html(&app), "<p>0</p>");
        rt.flush().unwrap();
        assert_eq!(html(&app), "<p>2</p>");
        assert_eq!(app.render_count(), 2);
    }

    #[test]
    fn root_hooks_fire_around_the_tree() {
        let rt = Runtime::new();
        let log = Arc::new(Mutex::new(Vec::<&'static str>::new()));
        let push = |what: &'static str| {
            let log = log.clone();
            move || log.lock().push(what)
        };
        let count = TrackedCell::new(&rt, 0);
        let c = count.clone();
        let mut app = root(&rt).hooks(
            LifecycleHooks::new()
                .on_mounted(push("mounted"))
                .on_updated(push("updated"))
                .on_unmounted(push("unmounted")),
        );
        let child_hooks = Arc::new(LifecycleHooks::new().on_mounted(push("child mounted")));
        app.mount(move || {
            Ok(N::component("Child", [N::text(c.get().to_string())]).hooks(child_hooks.clone()))
        })
        .unwrap();
        assert_eq!(*log.lock(), ["child mounted", "mounted"]);

        count.set(5);
        rt.flush().unwrap();
        assert_eq!(log.lock().last(), Some(&"updated"));

        app.unmount().unwrap();
        assert_eq!(log.lock().last(), Some(&"unmounted"));
        assert_eq!(html(&app), "");
        assert!(!app.is_mounted());
    }

    #[test]
    fn failed_render_without_handler_keeps_tree_and_errors() {
        let rt = Runtime::new();
        let fail = TrackedCell::new(&rt, false);
        let mut app = root(&rt);
        let f = fail.clone();
        app.mount(move || {
            if f.get() {
                Err(RenderError::new("broken"))
            } else {
                Ok(N::text("fine"))
            }
        })
        .unwrap();

        fail.set(true);
        let err = rt.flush().unwrap_err();
        assert!(matches!(err, Error::RenderBody(ref e) if e.message() == "broken"));
        assert_eq!(html(&app), "fine");
        assert_eq!(app.render_count(), 1);
    }

    #[test]
    fn failed_render_with_handler() {
        let rt = Runtime::new();
        let fail = TrackedCell::new(&rt, false);
        let host = MemoryHost::new();
        let container = host.root();
        let mut app = RenderRoot::new(&rt, Renderer::new(host).on_error(|_| ErrorAction::Keep), container);
        let f = fail.clone();
        app.mount(move || {
            if f.get() {
                Err(RenderError::new("broken"))
            } else {
                Ok(N::text("fine"))
            }
        })
        .unwrap();

        cov_mark::check!(failed_render_kept);
        fail.set(true);
        rt.flush().unwrap();
        assert_eq!(html(&app), "fine");
    }

    #[test]
    fn first_render_failure_is_returned() {
        let rt = Runtime::new();
        let mut app = root(&rt);
        let err = app.mount(|| Err(RenderError::new("nope"))).unwrap_err();
        assert!(matches!(err, Error::RenderBody(_)));
        assert!(!app.is_mounted());
        assert_eq!(rt.subscriber_total(), 0);
    }
}
