//! Observed containers.
//!
//! Every read method records a dependency edge for the active subscriber and
//! every write method notifies the subscribers of the keys it changed. The
//! wrappers are explicit types rather than transparent proxies, so the set of
//! observed operations is exactly their method list.
//!
//! Key layout shared by the collection types:
//!
//! | key         | read by                         | written by                     |
//! |-------------|---------------------------------|--------------------------------|
//! | `Index(i)`  | `get(i)`                        | any change to slot `i`         |
//! | `Field(h)`  | `get(k)`, `contains_key(k)`     | insert/remove of `k`           |
//! | `Structure` | `len`, `keys`, whole-value reads| length or key-set changes      |
//! | `Value`     | whole-value reads               | in-place element changes       |

mod cell;
mod map;
mod vec;

pub use cell::TrackedCell;
pub use map::TrackedMap;
pub use vec::TrackedVec;

use crate::arena::{ContainerId, PropKey};
use crate::runtime::{Runtime, WeakRuntime};

/// Identity of one observed container plus the runtime it reports to.
///
/// Dropping the handle is the container's disposal hook: its entry in the
/// dependency store goes away with it.
pub(crate) struct ContainerHandle {
    runtime: WeakRuntime,
    id: ContainerId,
}

impl ContainerHandle {
    pub(crate) fn new(runtime: &Runtime) -> Self {
        Self {
            runtime: runtime.downgrade(),
            id: runtime.allocate_container(),
        }
    }

    pub(crate) fn id(&self) -> ContainerId {
        self.id
    }

    pub(crate) fn track(&self, key: PropKey) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.track(self.id, key);
        }
    }

    /// Depend on both the shape and the contents.
    pub(crate) fn track_whole(&self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.track(self.id, PropKey::Structure);
            runtime.track(self.id, PropKey::Value);
        }
    }

    pub(crate) fn trigger(&self, key: PropKey) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.trigger(self.id, key);
        }
    }

    pub(crate) fn trigger_keys<I>(&self, keys: I)
    where
        I: IntoIterator<Item = PropKey>,
    {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.trigger_keys(self.id, keys);
        }
    }
}

impl Drop for ContainerHandle {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.release_container(self.id);
        }
    }
}
