//! Host node operations.
//!
//! The diff engine never touches a real node tree directly; everything goes
//! through [`NodeOps`]. A browser DOM, a terminal cell tree or the in-memory
//! [`MemoryHost`] can sit behind it.

mod memory;

pub use memory::{HostOp, MemoryHost, NodeId};

use crate::node::PropValue;
use std::fmt;

/// Primitive mutations on the host tree.
pub trait NodeOps {
    /// Handle to a host node.
    type Handle: Clone + PartialEq + fmt::Debug;

    /// Create a detached element.
    fn create_element(&mut self, tag: &str) -> Self::Handle;

    /// Create a detached text node.
    fn create_text(&mut self, text: &str) -> Self::Handle;

    /// Create a detached comment. Hosts without comments get an empty text
    /// node, which is invisible and still usable as an anchor.
    fn create_comment(&mut self, text: &str) -> Self::Handle {
        let _ = text;
        self.create_text("")
    }

    /// Replace the content of a text node.
    fn set_text(&mut self, node: &Self::Handle, text: &str);

    /// Set an attribute; `None` removes it.
    fn set_attribute(&mut self, el: &Self::Handle, name: &str, value: Option<&PropValue>);

    /// Insert `node` into `parent` before `anchor` (append when `None`).
    /// Inserting a node that is already attached moves it.
    fn insert(&mut self, node: &Self::Handle, parent: &Self::Handle, anchor: Option<&Self::Handle>);

    /// Detach `node` from its parent.
    fn remove(&mut self, node: &Self::Handle);

    /// Parent of `node`, if attached.
    fn parent_of(&self, node: &Self::Handle) -> Option<Self::Handle>;

    /// Next sibling of `node`, if any.
    fn next_sibling_of(&self, node: &Self::Handle) -> Option<Self::Handle>;
}
