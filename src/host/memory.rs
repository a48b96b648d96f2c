use crate::host::NodeOps;
use crate::node::PropValue;
use std::collections::BTreeMap;
use std::fmt::{self, Write};

/// Handle into a [`MemoryHost`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// One recorded host mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostOp {
    /// A node was created.
    Create(NodeId),
    /// A detached node was inserted.
    Insert {
        /// Inserted node.
        node: NodeId,
        /// New parent.
        parent: NodeId,
    },
    /// An attached node was re-inserted elsewhere.
    Move {
        /// Moved node.
        node: NodeId,
        /// New parent.
        parent: NodeId,
    },
    /// A node was detached.
    Remove(NodeId),
    /// A text node's content was replaced.
    SetText(NodeId),
    /// An attribute was set or removed.
    SetAttribute(NodeId, String),
}

enum HostKind {
    Element(String),
    Text(String),
    Comment(String),
}

struct HostNode {
    kind: HostKind,
    attrs: BTreeMap<String, String>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Recording in-memory host tree.
///
/// Keeps a flat arena of nodes plus a log of every mutation, so tests can
/// assert both on the resulting tree and on how many operations produced it.
pub struct MemoryHost {
    nodes: Vec<HostNode>,
    ops: Vec<HostOp>,
    root: NodeId,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHost {
    /// Create a host with an empty `root` element.
    pub fn new() -> Self {
        let mut host = Self {
            nodes: Vec::new(),
            ops: Vec::new(),
            root: NodeId(0),
        };
        host.root = host.alloc(HostKind::Element("root".to_owned()));
        host.ops.clear();
        host
    }

    /// The root container.
    pub fn root(&self) -> NodeId {
        self.root
    }

    fn alloc(&mut self, kind: HostKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(HostNode {
            kind,
            attrs: BTreeMap::new(),
            parent: None,
            children: Vec::new(),
        });
        self.ops.push(HostOp::Create(id));
        id
    }

    fn node(&self, id: NodeId) -> Option<&HostNode> {
        self.nodes.get(id.index())
    }

    fn detach(&mut self, id: NodeId) -> bool {
        let Some(parent) = self.nodes.get_mut(id.index()).and_then(|n| n.parent.take()) else {
            return false;
        };
        if let Some(p) = self.nodes.get_mut(parent.index()) {
            p.children.retain(|c| *c != id);
        }
        true
    }

    /// Every mutation recorded so far.
    pub fn ops(&self) -> &[HostOp] {
        &self.ops
    }

    /// Forget the recorded mutations.
    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    /// Number of recorded mutations matching `pred`.
    pub fn count(&self, pred: impl Fn(&HostOp) -> bool) -> usize {
        self.ops.iter().filter(|op| pred(op)).count()
    }

    /// Number of recorded creations.
    pub fn creates(&self) -> usize {
        self.count(|op| matches!(op, HostOp::Create(_)))
    }

    /// Number of recorded moves.
    pub fn moves(&self) -> usize {
        self.count(|op| matches!(op, HostOp::Move { .. }))
    }

    /// Number of recorded removals.
    pub fn removes(&self) -> usize {
        self.count(|op| matches!(op, HostOp::Remove(_)))
    }

    /// Children of a node.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map_or(&[], |n| &n.children[..])
    }

    /// Text content of a text or comment node.
    pub fn text(&self, id: NodeId) -> Option<&str> {
        match &self.node(id)?.kind {
            HostKind::Text(t) | HostKind::Comment(t) => Some(t),
            HostKind::Element(_) => None,
        }
    }

    /// Attribute value of an element.
    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.node(id)?.attrs.get(name).map(String::as_str)
    }

    /// Serialize a node and its subtree as markup. Attributes are sorted by
    /// name; empty text nodes (fragment markers) produce no output.
    pub fn serialize(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_node(id, &mut out);
        out
    }

    /// Serialize only the children of a node.
    pub fn inner_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        for &child in self.children(id) {
            self.write_node(child, &mut out);
        }
        out
    }

    fn write_node(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.node(id) else {
            return;
        };
        match &node.kind {
            HostKind::Text(t) => out.push_str(t),
            HostKind::Comment(t) => {
                let _ = write!(out, "<!--{t}-->");
            }
            HostKind::Element(tag) => {
                let _ = write!(out, "<{tag}");
                for (name, value) in &node.attrs {
                    let _ = write!(out, " {name}=\"{value}\"");
                }
                out.push('>');
                for &child in &node.children {
                    self.write_node(child, out);
                }
                let _ = write!(out, "</{tag}>");
            }
        }
    }
}

impl NodeOps for MemoryHost {
    type Handle = NodeId;

    fn create_element(&mut self, tag: &str) -> NodeId {
        self.alloc(HostKind::Element(tag.to_owned()))
    }

    fn create_text(&mut self, text: &str) -> NodeId {
        self.alloc(HostKind::Text(text.to_owned()))
    }

    fn create_comment(&mut self, text: &str) -> NodeId {
        self.alloc(HostKind::Comment(text.to_owned()))
    }

    fn set_text(&mut self, node: &NodeId, text: &str) {
        if let Some(HostNode {
            kind: HostKind::Text(t) | HostKind::Comment(t),
            ..
        }) = self.nodes.get_mut(node.index())
        {
            text.clone_into(t);
            self.ops.push(HostOp::SetText(*node));
        }
    }

    fn set_attribute(&mut self, el: &NodeId, name: &str, value: Option<&PropValue>) {
        let Some(node) = self.nodes.get_mut(el.index()) else {
            return;
        };
        match value {
            Some(value) => {
                node.attrs.insert(name.to_owned(), value.to_string());
            }
            None => {
                node.attrs.remove(name);
            }
        }
        self.ops.push(HostOp::SetAttribute(*el, name.to_owned()));
    }

    fn insert(&mut self, node: &NodeId, parent: &NodeId, anchor: Option<&NodeId>) {
        if anchor == Some(node) {
            return;
        }
        let was_attached = self.detach(*node);
        let Some(p) = self.nodes.get_mut(parent.index()) else {
            return;
        };
        let pos = anchor
            .and_then(|a| p.children.iter().position(|c| c == a))
            .unwrap_or(p.children.len());
        p.children.insert(pos, *node);
        if let Some(n) = self.nodes.get_mut(node.index()) {
            n.parent = Some(*parent);
        }
        self.ops.push(if was_attached {
            HostOp::Move {
                node: *node,
                parent: *parent,
            }
        } else {
            HostOp::Insert {
                node: *node,
                parent: *parent,
            }
        });
    }

    fn remove(&mut self, node: &NodeId) {
        if self.detach(*node) {
            self.ops.push(HostOp::Remove(*node));
        }
    }

    fn parent_of(&self, node: &NodeId) -> Option<NodeId> {
        self.node(*node)?.parent
    }

    fn next_sibling_of(&self, node: &NodeId) -> Option<NodeId> {
        let parent = self.node(*node)?.parent?;
        let siblings = &self.node(parent)?.children;
        let pos = siblings.iter().position(|c| c == node)?;
        siblings.get(pos + 1).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_before_anchor_and_move() {
        let mut host = MemoryHost::new();
        let root = host.root();
        let a = host.create_text("a");
        let b = host.create_text("b");
        host.insert(&a, &root, None);
        host.insert(&b, &root, Some(&a));
        assert_eq!(host.inner_html(root), "ba");
        assert_eq!(host.moves(), 0);

        host.insert(&b, &root, None);
        assert_eq!(host.inner_html(root), "ab");
        assert_eq!(host.moves(), 1);
        assert_eq!(host.next_sibling_of(&a), Some(b));
        assert_eq!(host.next_sibling_of(&b), None);
    }

    #[test]
    fn serialize_sorts_attributes_and_hides_markers() {
        let mut host = MemoryHost::new();
        let root = host.root();
        let div = host.create_element("div");
        host.set_attribute(&div, "id", Some(&PropValue::from("x")));
        host.set_attribute(&div, "class", Some(&PropValue::from("c")));
        let marker = host.create_text("");
        let note = host.create_comment("gone");
        host.insert(&div, &root, None);
        host.insert(&marker, &div, None);
        host.insert(&note, &div, None);

        assert_eq!(host.inner_html(root), "<div class=\"c\" id=\"x\"><!--gone--></div>");

        host.set_attribute(&div, "id", None);
        host.remove(&note);
        assert_eq!(host.inner_html(root), "<div class=\"c\"></div>");
        assert_eq!(host.parent_of(&note), None);
    }
}
