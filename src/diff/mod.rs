//! Incremental tree diffing.
//!
//! [`Renderer`] owns a [`NodeOps`] implementation and patches a committed
//! [`Node`] tree toward a freshly rendered one. The committed tree is updated
//! in place and keeps the host handles, so the next render diffs against it
//! again.
//!
//! Change hints are trusted: a node carrying [`PatchFlags`] only has its
//! flagged categories compared, and a block root only patches the dynamic
//! descendants it recorded. `BAIL` turns both shortcuts off.

pub mod lifecycle;
pub mod sequence;

use crate::error::{Error, RenderError, Result};
use crate::hash::FastHashBuilder;
use crate::host::NodeOps;
use crate::node::{Key, Node, NodeKind, NodePath, PatchFlags, PropValue};
use indexmap::IndexMap;
use lifecycle::{HookFn, HookPoint, LifecycleHooks};
use sequence::longest_increasing_subsequence;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::{fmt, iter, mem};

type Props = IndexMap<Cow<'static, str>, PropValue>;

/// What to show in place of a failed render body or component.
pub enum ErrorAction<H> {
    /// Keep whatever is committed. A component that fails on its first mount
    /// gets a comment placeholder.
    Keep,
    /// Render this tree instead.
    Fallback(Node<H>),
}

impl<H: fmt::Debug> fmt::Debug for ErrorAction<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorAction::Keep => f.write_str("Keep"),
            ErrorAction::Fallback(node) => f.debug_tuple("Fallback").field(node).finish(),
        }
    }
}

type ErrorHook<H> = Box<dyn FnMut(&RenderError) -> ErrorAction<H> + Send>;

/// Patches committed trees through a [`NodeOps`] host.
pub struct Renderer<O: NodeOps> {
    ops: O,
    on_error: Option<ErrorHook<O::Handle>>,
    post_hooks: Vec<HookFn>,
}

impl<O: NodeOps> fmt::Debug for Renderer<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Renderer")
            .field("on_error", &self.on_error.is_some())
            .field("post_hooks", &self.post_hooks.len())
            .finish_non_exhaustive()
    }
}

impl<O: NodeOps> Renderer<O> {
    /// Create a renderer over `ops`.
    pub fn new(ops: O) -> Self {
        Self {
            ops,
            on_error: None,
            post_hooks: Vec::new(),
        }
    }

    /// Install the render error handler.
    ///
    /// Without one, a failed component in the next tree makes [`render`]
    /// return [`Error::RenderBody`] before touching the host.
    ///
    /// [`render`]: Renderer::render
    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&RenderError) -> ErrorAction<O::Handle> + Send + 'static,
    {
        self.on_error = Some(Box::new(handler));
        self
    }

    /// Whether a render error handler is installed.
    pub fn has_error_handler(&self) -> bool {
        self.on_error.is_some()
    }

    /// The host.
    pub fn ops(&self) -> &O {
        &self.ops
    }

    /// The host, mutably.
    pub fn ops_mut(&mut self) -> &mut O {
        &mut self.ops
    }

    /// Give the host back.
    pub fn into_ops(self) -> O {
        self.ops
    }

    /// Take the "after" hooks queued by previous renders, in firing order.
    pub fn take_post_hooks(&mut self) -> Vec<HookFn> {
        mem::take(&mut self.post_hooks)
    }

    /// Run the queued "after" hooks now. Renders driven by a
    /// [`RenderRoot`](crate::RenderRoot) hand them to the scheduler instead.
    pub fn run_post_hooks(&mut self) {
        for hook in self.take_post_hooks() {
            hook();
        }
    }

    /// Ask the handler what to do about `err`. `None` without a handler.
    pub fn handle_render_error(&mut self, err: &RenderError) -> Option<ErrorAction<O::Handle>> {
        let handler = self.on_error.as_mut()?;
        tracing::error!(error = %err, "render error passed to handler");
        Some(handler(err))
    }

    /// Bring `committed` (mounted in `container`) in line with `next`.
    ///
    /// `None` on either side mounts or unmounts the whole tree.
    pub fn render(
        &mut self,
        committed: &mut Option<Node<O::Handle>>,
        next: Option<Node<O::Handle>>,
        container: &O::Handle,
    ) -> Result<()> {
        if !self.has_error_handler() {
            if let Some(err) = next.as_ref().and_then(first_failure) {
                return Err(Error::RenderBody(err.clone()));
            }
        }
        match (committed.take(), next) {
            (None, None) => {}
            (None, Some(mut node)) => {
                self.mount(&mut node, container, None);
                *committed = Some(node);
            }
            (Some(old), None) => self.unmount(old, true),
            (Some(mut old), Some(node)) => {
                self.patch(&mut old, node, container, false);
                *committed = Some(old);
            }
        }
        Ok(())
    }

    fn run_hooks(hooks: Option<&Arc<LifecycleHooks>>, point: HookPoint) {
        if let Some(hooks) = hooks {
            for hook in hooks.at(point) {
                hook();
            }
        }
    }

    fn queue_hooks(&mut self, hooks: Option<&Arc<LifecycleHooks>>, point: HookPoint) {
        if let Some(hooks) = hooks {
            self.post_hooks.extend(hooks.at(point).iter().cloned());
        }
    }

    fn container_of(&self, node: &Node<O::Handle>) -> Option<O::Handle> {
        self.ops.parent_of(node.el.as_ref()?)
    }

    fn set_leaf_text(&mut self, node: &Node<O::Handle>, text: &str) {
        if let Some(el) = &node.el {
            self.ops.set_text(el, text);
        }
    }

    fn mount(&mut self, node: &mut Node<O::Handle>, container: &O::Handle, anchor: Option<&O::Handle>) {
        match &node.kind {
            NodeKind::Text(text) => {
                let el = self.ops.create_text(text);
                self.ops.insert(&el, container, anchor);
                node.el = Some(el);
            }
            NodeKind::Comment(text) => {
                let el = self.ops.create_comment(text);
                self.ops.insert(&el, container, anchor);
                node.el = Some(el);
            }
            NodeKind::Element(tag) => {
                let el = self.ops.create_element(tag);
                for (name, value) in &node.props {
                    self.ops.set_attribute(&el, name, Some(value));
                }
                for child in &mut node.children {
                    self.mount(child, &el, None);
                }
                self.ops.insert(&el, container, anchor);
                node.el = Some(el);
            }
            NodeKind::Fragment | NodeKind::Component(_) => {
                self.mount_fragment_like(node, container, anchor)
            }
        }
    }

    fn mount_fragment_like(
        &mut self,
        node: &mut Node<O::Handle>,
        container: &O::Handle,
        anchor: Option<&O::Handle>,
    ) {
        let hooks = component_hooks(&node.kind);
        Self::run_hooks(hooks.as_ref(), HookPoint::BeforeMount);

        if let NodeKind::Component(component) = &node.kind {
            if let Some(err) = component.failure.clone() {
                let placeholder = Node::comment(format!("{} failed", component.name));
                node.children = match self.handle_render_error(&err) {
                    Some(ErrorAction::Fallback(fallback)) => vec![fallback],
                    Some(ErrorAction::Keep) | None => vec![placeholder],
                };
            }
        }

        let start = self.ops.create_text("");
        let end = self.ops.create_text("");
        self.ops.insert(&start, container, anchor);
        self.ops.insert(&end, container, anchor);
        for child in &mut node.children {
            self.mount(child, container, Some(&end));
        }
        node.el = Some(start);
        node.anchor = Some(end);

        self.queue_hooks(hooks.as_ref(), HookPoint::Mounted);
    }

    /// Tear down `node`. Only the outermost host node of a removed element
    /// subtree is detached; descendants are still visited for their hooks.
    fn unmount(&mut self, node: Node<O::Handle>, do_remove: bool) {
        let Node {
            kind,
            children,
            el,
            anchor,
            ..
        } = node;
        match kind {
            NodeKind::Text(_) | NodeKind::Comment(_) => {}
            NodeKind::Element(_) => {
                for child in children {
                    self.unmount(child, false);
                }
            }
            NodeKind::Fragment => {
                for child in children {
                    self.unmount(child, do_remove);
                }
            }
            NodeKind::Component(component) => {
                Self::run_hooks(component.hooks.as_ref(), HookPoint::BeforeUnmount);
                for child in children {
                    self.unmount(child, do_remove);
                }
                if do_remove {
                    self.remove_handles(el.as_ref(), anchor.as_ref());
                }
                self.queue_hooks(component.hooks.as_ref(), HookPoint::Unmounted);
                return;
            }
        }
        if do_remove {
            self.remove_handles(el.as_ref(), anchor.as_ref());
        }
    }

    fn remove_handles(&mut self, el: Option<&O::Handle>, anchor: Option<&O::Handle>) {
        if let Some(el) = el {
            self.ops.remove(el);
        }
        if let Some(anchor) = anchor {
            self.ops.remove(anchor);
        }
    }

    fn move_node(&mut self, node: &Node<O::Handle>, container: &O::Handle, anchor: Option<&O::Handle>) {
        if node.is_fragment_like() {
            if let Some(start) = &node.el {
                self.ops.insert(start, container, anchor);
            }
            for child in &node.children {
                self.move_node(child, container, anchor);
            }
            if let Some(end) = &node.anchor {
                self.ops.insert(end, container, anchor);
            }
        } else if let Some(el) = &node.el {
            self.ops.insert(el, container, anchor);
        }
    }

    /// Unmount `old` and mount `new` at the same position.
    fn replace(&mut self, old: &mut Node<O::Handle>, mut new: Node<O::Handle>, container: &O::Handle) {
        let parent = self.container_of(old).unwrap_or_else(|| container.clone());
        let last = if old.is_fragment_like() {
            old.anchor.as_ref()
        } else {
            old.el.as_ref()
        };
        let anchor = last.and_then(|h| self.ops.next_sibling_of(h));
        let previous = mem::replace(old, Node::comment(""));
        self.unmount(previous, true);
        self.mount(&mut new, &parent, anchor.as_ref());
        *old = new;
    }

    fn patch(
        &mut self,
        old: &mut Node<O::Handle>,
        mut new: Node<O::Handle>,
        container: &O::Handle,
        optimized: bool,
    ) {
        if !old.same_type(&new) {
            self.replace(old, new, container);
            return;
        }

        let mut optimized = optimized || new.dynamic_children.is_some();
        if new.flags.contains(PatchFlags::BAIL) {
            cov_mark::hit!(bail_forces_full_diff);
            optimized = false;
            new.dynamic_children = None;
        }

        let Node {
            kind,
            props,
            children,
            flags,
            dynamic_props,
            dynamic_children,
            ..
        } = new;

        match kind {
            NodeKind::Text(text) => {
                if old.leaf_text() != Some(text.as_str()) {
                    self.set_leaf_text(old, &text);
                    old.kind = NodeKind::Text(text);
                }
            }
            NodeKind::Comment(text) => {
                if old.leaf_text() != Some(&*text) {
                    self.set_leaf_text(old, &text);
                    old.kind = NodeKind::Comment(text);
                }
            }
            NodeKind::Element(_) => {
                let Some(el) = old.el.clone() else {
                    return;
                };
                self.patch_props(&el, &old.props, &props, flags, &dynamic_props, optimized);
                if optimized && flags.contains(PatchFlags::TEXT) {
                    self.patch_text_children(&mut old.children, &children);
                }
                match (&old.dynamic_children, &dynamic_children) {
                    (Some(old_paths), Some(paths)) => {
                        let old_paths = old_paths.clone();
                        self.patch_block_children(
                            &mut old.children,
                            children,
                            &old_paths,
                            paths,
                            &el,
                            None,
                            flags,
                        );
                    }
                    (None, None) if optimized => {}
                    // A plain tree on either side has no paths to follow.
                    _ => self.patch_children(&mut old.children, children, &el, None, flags),
                }
            }
            NodeKind::Fragment => {
                self.patch_fragment_children(old, children, dynamic_children.as_deref(), container, flags, optimized);
            }
            NodeKind::Component(component) => {
                let mut children = children;
                if let Some(err) = &component.failure {
                    match self.handle_render_error(err) {
                        Some(ErrorAction::Fallback(fallback)) => children = vec![fallback],
                        Some(ErrorAction::Keep) | None => {
                            cov_mark::hit!(failed_component_kept);
                            return;
                        }
                    }
                }
                let hooks = component.hooks.clone();
                Self::run_hooks(hooks.as_ref(), HookPoint::BeforeUpdate);
                // Hints above a component never cover its output.
                self.patch_fragment_children(old, children, dynamic_children.as_deref(), container, flags, false);
                old.kind = NodeKind::Component(component);
                self.queue_hooks(hooks.as_ref(), HookPoint::Updated);
            }
        }

        old.props = props;
        old.flags = flags;
        old.dynamic_props = dynamic_props;
        old.dynamic_children = dynamic_children;
    }

    /// Children of a fragment or component, between its start and end
    /// markers.
    fn patch_fragment_children(
        &mut self,
        old: &mut Node<O::Handle>,
        children: Vec<Node<O::Handle>>,
        paths: Option<&[NodePath]>,
        container: &O::Handle,
        flags: PatchFlags,
        optimized: bool,
    ) {
        let parent = self.container_of(old).unwrap_or_else(|| container.clone());
        let end = old.anchor.clone();
        match (old.dynamic_children.clone(), paths) {
            (Some(old_paths), Some(paths)) => {
                self.patch_block_children(&mut old.children, children, &old_paths, paths, &parent, end.as_ref(), flags)
            }
            (None, None) if optimized && !flags.is_list_fragment() => {}
            _ => self.patch_children(&mut old.children, children, &parent, end.as_ref(), flags),
        }
    }

    fn patch_props(
        &mut self,
        el: &O::Handle,
        old: &Props,
        new: &Props,
        flags: PatchFlags,
        dynamic_props: &[Cow<'static, str>],
        optimized: bool,
    ) {
        if flags.is_hinted() && !flags.contains(PatchFlags::FULL_PROPS) {
            if flags.contains(PatchFlags::CLASS) {
                self.patch_prop(el, "class", old, new);
            }
            if flags.contains(PatchFlags::STYLE) {
                self.patch_prop(el, "style", old, new);
            }
            if flags.contains(PatchFlags::PROPS) {
                for name in dynamic_props {
                    self.patch_prop(el, name, old, new);
                }
            }
            return;
        }
        if optimized && !flags.contains(PatchFlags::FULL_PROPS) {
            return;
        }
        for (name, value) in new {
            if old.get(name) != Some(value) {
                self.ops.set_attribute(el, name, Some(value));
            }
        }
        for name in old.keys() {
            if !new.contains_key(name) {
                self.ops.set_attribute(el, name, None);
            }
        }
    }

    fn patch_prop(&mut self, el: &O::Handle, name: &str, old: &Props, new: &Props) {
        let next = new.get(name);
        if old.get(name) != next {
            self.ops.set_attribute(el, name, next);
        }
    }

    /// The `TEXT` hint: only text leaves directly under the element change.
    fn patch_text_children(&mut self, old: &mut [Node<O::Handle>], new: &[Node<O::Handle>]) {
        for (old, new) in old.iter_mut().zip(new) {
            if let (NodeKind::Text(current), NodeKind::Text(next)) = (&mut old.kind, &new.kind) {
                if current != next {
                    if let Some(el) = &old.el {
                        self.ops.set_text(el, next);
                    }
                    next.clone_into(current);
                }
            }
        }
    }

    /// Patch only the recorded dynamic descendants of a block.
    #[allow(clippy::too_many_arguments)]
    fn patch_block_children(
        &mut self,
        old_children: &mut Vec<Node<O::Handle>>,
        mut new_children: Vec<Node<O::Handle>>,
        old_paths: &[NodePath],
        paths: &[NodePath],
        container: &O::Handle,
        anchor: Option<&O::Handle>,
        flags: PatchFlags,
    ) {
        let resolvable = old_paths == paths
            && paths
                .iter()
                .all(|p| child_at(old_children, p).is_some() && child_at(&new_children, p).is_some());
        if !resolvable {
            cov_mark::hit!(block_shape_mismatch);
            tracing::debug!("block dynamic children do not line up, diffing in full");
            self.patch_children(old_children, new_children, container, anchor, flags);
            return;
        }

        // Deepest paths come last in pre-order; lift them out first so that
        // an ancestor taken later no longer contains them.
        let mut lifted = Vec::with_capacity(paths.len());
        for path in paths.iter().rev() {
            if let Some(slot) = child_at_mut(&mut new_children, path) {
                lifted.push(mem::replace(slot, Node::comment("")));
            }
        }
        lifted.reverse();

        for (path, new) in paths.iter().zip(lifted) {
            let Some(old) = child_at_mut(old_children, path) else {
                continue;
            };
            let parent = self.container_of(old).unwrap_or_else(|| container.clone());
            self.patch(old, new, &parent, true);
        }
    }

    fn patch_children(
        &mut self,
        old: &mut Vec<Node<O::Handle>>,
        new: Vec<Node<O::Handle>>,
        container: &O::Handle,
        anchor: Option<&O::Handle>,
        flags: PatchFlags,
    ) {
        let keyed = if flags.contains(PatchFlags::UNKEYED_FRAGMENT) {
            false
        } else {
            flags.contains(PatchFlags::KEYED_FRAGMENT)
                || old.iter().chain(&new).any(|n| n.key.is_some())
        };
        if keyed {
            self.patch_keyed_children(old, new, container, anchor);
        } else {
            self.patch_unkeyed_children(old, new, container, anchor);
        }
    }

    fn patch_unkeyed_children(
        &mut self,
        old: &mut Vec<Node<O::Handle>>,
        new: Vec<Node<O::Handle>>,
        container: &O::Handle,
        anchor: Option<&O::Handle>,
    ) {
        let common = old.len().min(new.len());
        let mut new = new.into_iter();
        for (old, new) in old.iter_mut().zip(new.by_ref()) {
            self.patch(old, new, container, false);
        }
        for removed in old.drain(common..) {
            self.unmount(removed, true);
        }
        for mut added in new {
            self.mount(&mut added, container, anchor);
            old.push(added);
        }
    }

    fn patch_slot(
        &mut self,
        old: Option<Node<O::Handle>>,
        new: Option<Node<O::Handle>>,
        container: &O::Handle,
    ) -> Option<Node<O::Handle>> {
        match (old, new) {
            (Some(mut old), Some(new)) => {
                self.patch(&mut old, new, container, false);
                Some(old)
            }
            (old, _) => old,
        }
    }

    fn patch_keyed_children(
        &mut self,
        old_children: &mut Vec<Node<O::Handle>>,
        new_children: Vec<Node<O::Handle>>,
        container: &O::Handle,
        parent_anchor: Option<&O::Handle>,
    ) {
        let mut old: Vec<Option<Node<O::Handle>>> = mem::take(old_children).into_iter().map(Some).collect();
        let mut new: Vec<Option<Node<O::Handle>>> = new_children.into_iter().map(Some).collect();
        let mut result: Vec<Option<Node<O::Handle>>> = iter::repeat_with(|| None).take(new.len()).collect();

        let mut start = 0;
        let mut old_end = old.len();
        let mut new_end = new.len();

        while start < old_end && start < new_end && slots_match(&old[start], &new[start]) {
            result[start] = self.patch_slot(old[start].take(), new[start].take(), container);
            start += 1;
        }
        while start < old_end && start < new_end && slots_match(&old[old_end - 1], &new[new_end - 1]) {
            old_end -= 1;
            new_end -= 1;
            result[new_end] = self.patch_slot(old[old_end].take(), new[new_end].take(), container);
        }

        if start >= old_end {
            let anchor = anchor_at(&result, new_end, parent_anchor);
            for (slot, out) in new[start..new_end].iter_mut().zip(&mut result[start..new_end]) {
                if let Some(mut node) = slot.take() {
                    self.mount(&mut node, container, anchor.as_ref());
                    *out = Some(node);
                }
            }
        } else if start >= new_end {
            for slot in &mut old[start..old_end] {
                if let Some(node) = slot.take() {
                    self.unmount(node, true);
                }
            }
        } else {
            self.patch_keyed_middle(
                &mut old[start..old_end],
                &mut new,
                &mut result,
                start..new_end,
                container,
                parent_anchor,
            );
        }

        *old_children = result.into_iter().flatten().collect();
    }

    /// The unknown middle section: match by key, unmount what has no
    /// counterpart, then mount and move walking backwards so each node is
    /// placed before an already-settled sibling. Nodes on the longest
    /// increasing run of old positions stay where they are.
    fn patch_keyed_middle(
        &mut self,
        old: &mut [Option<Node<O::Handle>>],
        new: &mut [Option<Node<O::Handle>>],
        result: &mut [Option<Node<O::Handle>>],
        range: std::ops::Range<usize>,
        container: &O::Handle,
        parent_anchor: Option<&O::Handle>,
    ) {
        let start = range.start;
        let to_patch = range.len();

        let mut key_to_new: HashMap<Key, usize, FastHashBuilder> =
            HashMap::with_capacity_and_hasher(to_patch, FastHashBuilder);
        for index in range.clone() {
            if let Some(key) = new[index].as_ref().and_then(|n| n.key.clone()) {
                key_to_new.insert(key, index);
            }
        }

        // 1-based old positions; 0 means the node is new.
        let mut new_to_old = vec![0usize; to_patch];
        let mut patched = 0;
        let mut moved = false;
        let mut max_new_index = 0;

        for (old_index, slot) in old.iter_mut().enumerate() {
            let Some(node) = slot.take() else {
                continue;
            };
            if patched >= to_patch {
                self.unmount(node, true);
                continue;
            }
            let target = match &node.key {
                Some(key) => key_to_new.get(key).copied(),
                None => range.clone().find(|&j| {
                    new_to_old[j - start] == 0
                        && new[j].as_ref().is_some_and(|n| n.key.is_none() && node.same_type(n))
                }),
            };
            let Some(new_index) = target.filter(|&j| new_to_old[j - start] == 0) else {
                self.unmount(node, true);
                continue;
            };
            new_to_old[new_index - start] = old_index + 1;
            if new_index >= max_new_index {
                max_new_index = new_index;
            } else {
                moved = true;
            }
            result[new_index] = self.patch_slot(Some(node), new[new_index].take(), container);
            patched += 1;
        }

        let stable = if moved {
            longest_increasing_subsequence(&new_to_old)
        } else {
            Vec::new()
        };
        let mut stable = stable.iter().rev().peekable();

        for offset in (0..to_patch).rev() {
            let index = start + offset;
            let anchor = anchor_at(result, index + 1, parent_anchor);
            if new_to_old[offset] == 0 {
                if let Some(mut node) = new[index].take() {
                    self.mount(&mut node, container, anchor.as_ref());
                    result[index] = Some(node);
                }
            } else if moved {
                if stable.peek() == Some(&&offset) {
                    stable.next();
                } else if let Some(node) = &result[index] {
                    cov_mark::hit!(keyed_child_moved);
                    self.move_node(node, container, anchor.as_ref());
                }
            }
        }
    }
}

impl<H> Node<H> {
    fn leaf_text(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Text(text) => Some(text.as_str()),
            NodeKind::Comment(text) => Some(&**text),
            _ => None,
        }
    }
}

fn component_hooks(kind: &NodeKind) -> Option<Arc<LifecycleHooks>> {
    match kind {
        NodeKind::Component(component) => component.hooks.clone(),
        _ => None,
    }
}

/// Follows only the branches marked as holding a failure.
fn first_failure<H>(node: &Node<H>) -> Option<&RenderError> {
    if !node.contains_failure {
        return None;
    }
    if let NodeKind::Component(component) = &node.kind {
        if let Some(err) = &component.failure {
            return Some(err);
        }
    }
    node.children.iter().find_map(first_failure)
}

fn slots_match<H>(old: &Option<Node<H>>, new: &Option<Node<H>>) -> bool {
    matches!((old, new), (Some(old), Some(new)) if old.same_type(new))
}

/// Host node to insert before so that a node lands at `index`: the first
/// host node of the settled sibling there, or the parent's own anchor.
fn anchor_at<H: Clone>(result: &[Option<Node<H>>], index: usize, parent_anchor: Option<&H>) -> Option<H> {
    result
        .get(index)
        .and_then(Option::as_ref)
        .and_then(|node| node.el.clone())
        .or_else(|| parent_anchor.cloned())
}

fn child_at<'a, H>(children: &'a [Node<H>], path: &[u32]) -> Option<&'a Node<H>> {
    let (first, rest) = path.split_first()?;
    children.get(*first as usize)?.node_at(rest)
}

fn child_at_mut<'a, H>(children: &'a mut [Node<H>], path: &[u32]) -> Option<&'a mut Node<H>> {
    let (first, rest) = path.split_first()?;
    children.get_mut(*first as usize)?.node_at_mut(rest)
}
