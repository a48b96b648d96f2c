//! Tree descriptions.
//!
//! A render body produces a [`Node`] tree describing what should be on
//! screen. The diff engine compares it with the committed tree and patches
//! the committed tree in place, so the `el`/`anchor` handles of the committed
//! tree always point at live host nodes.

mod flags;

pub use flags::PatchFlags;

use crate::diff::lifecycle::LifecycleHooks;
use crate::error::RenderError;
use indexmap::IndexMap;
use smallvec::SmallVec;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Position of a descendant relative to a block root, as child indexes.
pub type NodePath = SmallVec<[u32; 4]>;

/// Identity of a node among its siblings.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    /// Integer key.
    Int(i64),
    /// String key.
    Str(Cow<'static, str>),
}

impl From<i64> for Key {
    fn from(v: i64) -> Self {
        Key::Int(v)
    }
}

impl From<i32> for Key {
    fn from(v: i32) -> Self {
        Key::Int(v.into())
    }
}

impl From<u32> for Key {
    fn from(v: u32) -> Self {
        Key::Int(v.into())
    }
}

impl From<&'static str> for Key {
    fn from(v: &'static str) -> Self {
        Key::Str(Cow::Borrowed(v))
    }
}

impl From<String> for Key {
    fn from(v: String) -> Self {
        Key::Str(Cow::Owned(v))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(v) => write!(f, "{v}"),
            Key::Str(v) => f.write_str(v),
        }
    }
}

/// Attribute value.
#[derive(Clone, Debug, PartialEq)]
pub enum PropValue {
    /// String value.
    Str(Cow<'static, str>),
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// Boolean value.
    Bool(bool),
}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValue::Str(v) => f.write_str(v),
            PropValue::Int(v) => write!(f, "{v}"),
            PropValue::Float(v) => write!(f, "{v}"),
            PropValue::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl From<&'static str> for PropValue {
    fn from(v: &'static str) -> Self {
        PropValue::Str(Cow::Borrowed(v))
    }
}

impl From<String> for PropValue {
    fn from(v: String) -> Self {
        PropValue::Str(Cow::Owned(v))
    }
}

impl From<i64> for PropValue {
    fn from(v: i64) -> Self {
        PropValue::Int(v)
    }
}

impl From<i32> for PropValue {
    fn from(v: i32) -> Self {
        PropValue::Int(v.into())
    }
}

impl From<f64> for PropValue {
    fn from(v: f64) -> Self {
        PropValue::Float(v)
    }
}

impl From<bool> for PropValue {
    fn from(v: bool) -> Self {
        PropValue::Bool(v)
    }
}

/// A component boundary in the tree.
///
/// The component's rendered output is the node's children. Lifecycle hooks
/// attach here, and a failed component body is isolated here.
#[derive(Clone, Default)]
pub struct Component {
    pub(crate) name: Cow<'static, str>,
    pub(crate) hooks: Option<Arc<LifecycleHooks>>,
    pub(crate) failure: Option<RenderError>,
}

impl Component {
    /// Component name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The error its body raised, if it failed.
    pub fn failure(&self) -> Option<&RenderError> {
        self.failure.as_ref()
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("name", &self.name)
            .field("hooks", &self.hooks.is_some())
            .field("failure", &self.failure)
            .finish()
    }
}

/// What a node is.
#[derive(Clone, Debug)]
pub enum NodeKind {
    /// Text leaf.
    Text(String),
    /// Host element with a tag.
    Element(Cow<'static, str>),
    /// Children without a wrapper element, bracketed by empty text markers.
    Fragment,
    /// Component boundary; rendered like a fragment.
    Component(Component),
    /// Comment leaf, also used as a placeholder.
    Comment(Cow<'static, str>),
}

impl NodeKind {
    /// Kind discriminant plus tag/name: equal values may be patched in place.
    fn same_type(&self, other: &NodeKind) -> bool {
        match (self, other) {
            (NodeKind::Text(_), NodeKind::Text(_))
            | (NodeKind::Fragment, NodeKind::Fragment)
            | (NodeKind::Comment(_), NodeKind::Comment(_)) => true,
            (NodeKind::Element(a), NodeKind::Element(b)) => a == b,
            (NodeKind::Component(a), NodeKind::Component(b)) => a.name == b.name,
            _ => false,
        }
    }
}

/// A node of a tree description, and of the committed tree.
pub struct Node<H> {
    pub(crate) kind: NodeKind,
    pub(crate) key: Option<Key>,
    pub(crate) props: IndexMap<Cow<'static, str>, PropValue>,
    pub(crate) children: Vec<Node<H>>,
    pub(crate) flags: PatchFlags,
    pub(crate) dynamic_props: SmallVec<[Cow<'static, str>; 2]>,
    pub(crate) dynamic_children: Option<Vec<NodePath>>,
    pub(crate) el: Option<H>,
    pub(crate) anchor: Option<H>,
    /// Set when this node or a descendant is a failed component.
    pub(crate) contains_failure: bool,
}

impl<H: Clone> Clone for Node<H> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind.clone(),
            key: self.key.clone(),
            props: self.props.clone(),
            children: self.children.clone(),
            flags: self.flags,
            dynamic_props: self.dynamic_props.clone(),
            dynamic_children: self.dynamic_children.clone(),
            el: self.el.clone(),
            anchor: self.anchor.clone(),
            contains_failure: self.contains_failure,
        }
    }
}

impl<H: fmt::Debug> fmt::Debug for Node<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Node");
        s.field("kind", &self.kind);
        if let Some(key) = &self.key {
            s.field("key", key);
        }
        if !self.props.is_empty() {
            s.field("props", &self.props);
        }
        if !self.flags.is_empty() {
            s.field("flags", &self.flags);
        }
        if !self.children.is_empty() {
            s.field("children", &self.children);
        }
        s.field("el", &self.el).finish()
    }
}

impl<H> Node<H> {
    fn with_kind(kind: NodeKind) -> Self {
        Self {
            kind,
            key: None,
            props: IndexMap::new(),
            children: Vec::new(),
            flags: PatchFlags::empty(),
            dynamic_props: SmallVec::new(),
            dynamic_children: None,
            el: None,
            anchor: None,
            contains_failure: false,
        }
    }

    /// Text leaf.
    pub fn text(text: impl Into<String>) -> Self {
        Self::with_kind(NodeKind::Text(text.into()))
    }

    /// Host element.
    pub fn element(tag: impl Into<Cow<'static, str>>) -> Self {
        Self::with_kind(NodeKind::Element(tag.into()))
    }

    /// Fragment of children.
    pub fn fragment<I>(children: I) -> Self
    where
        I: IntoIterator<Item = Node<H>>,
    {
        Self::with_kind(NodeKind::Fragment).children(children)
    }

    /// Comment leaf.
    pub fn comment(text: impl Into<Cow<'static, str>>) -> Self {
        Self::with_kind(NodeKind::Comment(text.into()))
    }

    /// Component boundary whose rendered output is `children`.
    pub fn component<I>(name: impl Into<Cow<'static, str>>, children: I) -> Self
    where
        I: IntoIterator<Item = Node<H>>,
    {
        Self::with_kind(NodeKind::Component(Component {
            name: name.into(),
            hooks: None,
            failure: None,
        }))
        .children(children)
    }

    /// Component whose body failed. The renderer's error handler decides
    /// what is shown in its place.
    pub fn component_failed(name: impl Into<Cow<'static, str>>, error: RenderError) -> Self {
        let mut node = Self::with_kind(NodeKind::Component(Component {
            name: name.into(),
            hooks: None,
            failure: Some(error),
        }));
        node.contains_failure = true;
        node
    }

    /// Component from the result of running its body.
    pub fn component_from(
        name: impl Into<Cow<'static, str>>,
        body: std::result::Result<Vec<Node<H>>, RenderError>,
    ) -> Self {
        match body {
            Ok(children) => Self::component(name, children),
            Err(error) => Self::component_failed(name, error),
        }
    }

    /// Set the sibling key.
    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set an attribute.
    pub fn prop(mut self, name: impl Into<Cow<'static, str>>, value: impl Into<PropValue>) -> Self {
        self.props.insert(name.into(), value.into());
        self
    }

    /// Append a child.
    pub fn child(mut self, child: Node<H>) -> Self {
        self.contains_failure |= child.contains_failure;
        self.children.push(child);
        self
    }

    /// Append children.
    pub fn children<I>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = Node<H>>,
    {
        for child in children {
            self = self.child(child);
        }
        self
    }

    /// Attach a change hint.
    pub fn flags(mut self, flags: PatchFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Names of the props that may change, for [`PatchFlags::PROPS`].
    pub fn dynamic_props<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Cow<'static, str>>,
    {
        self.dynamic_props.extend(names.into_iter().map(Into::into));
        self
    }

    /// Attach lifecycle hooks. Only component nodes carry hooks; on other
    /// kinds this is a no-op.
    pub fn hooks(mut self, hooks: Arc<LifecycleHooks>) -> Self {
        if let NodeKind::Component(component) = &mut self.kind {
            component.hooks = Some(hooks);
        }
        self
    }

    /// Turn this node into a block root.
    ///
    /// Collects the paths of every descendant that can change: nodes with a
    /// hint (`BAIL` included), component nodes and nested blocks. Collection
    /// does not descend into bailed nodes, nested blocks, list fragments or
    /// components; they patch their own subtrees.
    pub fn into_block(mut self) -> Self {
        let mut paths = Vec::new();
        let mut path = NodePath::new();
        for (index, child) in self.children.iter().enumerate() {
            path.push(index as u32);
            collect_dynamic(child, &mut path, &mut paths);
            path.pop();
        }
        self.dynamic_children = Some(paths);
        self
    }

    /// Node kind.
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Sibling key.
    pub fn key_ref(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    /// Attributes.
    pub fn props(&self) -> &IndexMap<Cow<'static, str>, PropValue> {
        &self.props
    }

    /// Children.
    pub fn child_nodes(&self) -> &[Node<H>] {
        &self.children
    }

    /// Change hint.
    pub fn patch_flags(&self) -> PatchFlags {
        self.flags
    }

    /// Flattened dynamic descendants, if this is a block root.
    pub fn dynamic_children(&self) -> Option<&[NodePath]> {
        self.dynamic_children.as_deref()
    }

    /// Host handle of the node (the start marker for fragment-like nodes).
    pub fn el(&self) -> Option<&H> {
        self.el.as_ref()
    }

    /// End marker of fragment-like nodes.
    pub fn anchor(&self) -> Option<&H> {
        self.anchor.as_ref()
    }

    /// Whether `other` may be patched into `self` in place: same kind, same
    /// tag or component name, same key.
    pub fn same_type(&self, other: &Node<H>) -> bool {
        self.key == other.key && self.kind.same_type(&other.kind)
    }

    /// Whether the node renders through start/end markers.
    pub(crate) fn is_fragment_like(&self) -> bool {
        matches!(self.kind, NodeKind::Fragment | NodeKind::Component(_))
    }

    /// Descendant at `path`.
    pub fn node_at(&self, path: &[u32]) -> Option<&Node<H>> {
        path.iter()
            .try_fold(self, |node, &index| node.children.get(index as usize))
    }

    pub(crate) fn node_at_mut(&mut self, path: &[u32]) -> Option<&mut Node<H>> {
        let mut node = self;
        for &index in path {
            node = node.children.get_mut(index as usize)?;
        }
        Some(node)
    }

    /// Visit every node, depth first.
    pub fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a Node<H>)) {
        f(self);
        for child in &self.children {
            child.walk(f);
        }
    }
}

fn collect_dynamic<H>(node: &Node<H>, path: &mut NodePath, out: &mut Vec<NodePath>) {
    let is_component = matches!(node.kind, NodeKind::Component(_));
    let is_block = node.dynamic_children.is_some();
    let bail = node.flags.contains(PatchFlags::BAIL);
    if !node.flags.is_empty() || is_component || is_block {
        out.push(path.clone());
    }
    // A bailed node is diffed in full, descendants included.
    if bail || is_component || is_block || node.flags.is_list_fragment() {
        return;
    }
    for (index, child) in node.children.iter().enumerate() {
        path.push(index as u32);
        collect_dynamic(child, path, out);
        path.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    type N = Node<u32>;

    #[test]
    fn same_type_compares_kind_tag_and_key() {
        assert!(N::element("div").same_type(&N::element("div")));
        assert!(!N::element("div").same_type(&N::element("span")));
        assert!(!N::element("div").key(1).same_type(&N::element("div").key(2)));
        assert!(N::text("a").same_type(&N::text("b")));
        assert!(!N::text("a").same_type(&N::comment("a")));
        assert!(N::component("A", []).same_type(&N::component("A", [N::text("x")])));
        assert!(!N::component("A", []).same_type(&N::component("B", [])));
    }

    #[test]
    fn block_collects_hinted_descendants() {
        let tree = N::element("div")
            .child(N::element("h1").child(N::text("static")))
            .child(
                N::element("p")
                    .child(N::element("span").flags(PatchFlags::TEXT).child(N::text("x"))),
            )
            .child(N::element("b").flags(PatchFlags::CLASS).prop("class", "on"))
            .into_block();

        let paths = tree.dynamic_children().unwrap();
        let expected: Vec<NodePath> = vec![smallvec![1, 0], smallvec![2]];
        assert_eq!(paths, &expected[..]);
        assert!(matches!(
            tree.node_at(&[1, 0]).map(Node::kind),
            Some(NodeKind::Element(tag)) if tag == "span"
        ));
    }

    #[test]
    fn block_stops_at_lists_components_and_nested_blocks() {
        let list = N::fragment([N::element("li").key(1).flags(PatchFlags::TEXT)])
            .flags(PatchFlags::KEYED_FRAGMENT);
        let nested = N::element("section")
            .child(N::element("i").flags(PatchFlags::TEXT))
            .into_block();
        let comp = N::component("Inner", [N::element("u").flags(PatchFlags::TEXT)]);

        let tree = N::fragment([list, nested, comp]).into_block();
        let expected: Vec<NodePath> = vec![smallvec![0], smallvec![1], smallvec![2]];
        assert_eq!(tree.dynamic_children().unwrap(), &expected[..]);
    }

    #[test]
    fn bailed_node_is_collected_but_not_entered() {
        let tree = N::element("div")
            .child(
                N::element("span")
                    .flags(PatchFlags::BAIL)
                    .child(N::element("b").flags(PatchFlags::CLASS)),
            )
            .into_block();
        let expected: Vec<NodePath> = vec![smallvec![0]];
        assert_eq!(tree.dynamic_children().unwrap(), &expected[..]);
    }

    #[test]
    fn component_from_result() {
        let ok = N::component_from("Ok", Ok(vec![N::text("x")]));
        assert_eq!(ok.child_nodes().len(), 1);
        let failed = N::component_from("Bad", Err(RenderError::new("nope")));
        match failed.kind() {
            NodeKind::Component(c) => assert_eq!(c.failure().map(RenderError::message), Some("nope")),
            other => panic!("unexpected kind {other:?}"),
        }
    }
}
