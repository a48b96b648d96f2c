#![deny(missing_docs)]

//! A reactive update engine.
//!
//! Tracked containers record which subscriber read which part of them; a
//! write notifies exactly the subscribers that read what changed. Notified
//! subscribers are queued, deduplicated and run in creation order by a
//! batched scheduler, and render subscribers feed a tree diff engine that
//! patches a host node tree with as few operations as it can.
//!
//! # Quick Start
//!
//! ```ignore
//! use rebound::{Effect, Runtime, TrackedCell};
//!
//! let rt = Runtime::new();
//! let count = TrackedCell::new(&rt, 0);
//!
//! let c = count.clone();
//! let _effect = Effect::new(&rt, move || println!("count = {}", c.get()));
//!
//! count.set(1);
//! count.set(2);
//! rt.flush()?; // effect runs once, prints "count = 2"
//! ```
//!
//! # Core Types
//!
//! - [`Runtime`] - Owns the dependency store, the subscriber arena and the
//!   scheduler. Runtimes never see each other's reads or writes.
//! - [`TrackedCell`], [`TrackedVec`], [`TrackedMap`] - Observed containers.
//! - [`Subscriber`] / [`Effect`] - Re-runnable computations with automatic
//!   dependency tracking and a cleanup protocol.
//! - [`Computed<T>`] - Memoized value, recomputed on read after a change.
//! - [`Renderer`] - Diffs [`Node`] trees through a [`NodeOps`] host.
//! - [`RenderRoot`] - A render function bound to a renderer and scheduled
//!   in the `Render` phase.
//!
//! # Scheduling
//!
//! ```ignore
//! rt.batch(|| { a.set(1); b.set(2); })?; // sync subscribers run once, at the end
//! rt.invalidate(id);                      // drop a queued job
//! rt.flush()?;                            // run everything queued
//! untracked(|| c.get());                  // read without recording an edge
//! ```
//!
//! # Rendering
//!
//! ```ignore
//! let host = MemoryHost::new();
//! let container = host.root();
//! let mut app = RenderRoot::new(&rt, Renderer::new(host), container);
//! let c = count.clone();
//! app.mount(move || Ok(Node::element("p").child(Node::text(c.get().to_string()))))?;
//! ```

// Internal modules
pub(crate) mod arena;
mod batch;
mod computed;
pub mod diff;
mod error;
mod hash;
pub mod host;
pub mod node;
mod render;
mod runtime;
mod scheduler;
mod subscriber;
mod tracked;

// Reactive core
pub use arena::{
    ActiveSubscriber, ContainerId, Lifecycle, Notifier, NotifyMode, PropKey, SubscriberId,
    active_subscriber,
};
pub use computed::Computed;
pub use error::{Error, RenderError, Result};
pub use runtime::{
    DEFAULT_RECURSION_LIMIT, ErrorHandler, Runtime, RuntimeBuilder, RuntimeId, ScheduleHook,
    WeakRuntime,
};
pub use scheduler::Phase;
pub use subscriber::{Effect, Subscriber, SubscriberBuilder, untracked};
pub use tracked::{TrackedCell, TrackedMap, TrackedVec};

// Rendering
pub use diff::lifecycle::{HookPoint, LifecycleHooks};
pub use diff::{ErrorAction, Renderer};
pub use host::{MemoryHost, NodeOps};
pub use node::{Key, Node, NodeKind, PatchFlags, PropValue};
pub use render::RenderRoot;
