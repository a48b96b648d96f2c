bitflags::bitflags! {
    /// Compile-time change hints attached to a node.
    ///
    /// A non-empty, non-`BAIL` value promises that only the flagged categories
    /// can differ between renders; the diff engine then skips everything else.
    /// `BAIL` (or an empty value on a node inside a block's dynamic list)
    /// makes the engine fall back to a full comparison.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PatchFlags: u32 {
        /// Text content of the element's text child is dynamic.
        const TEXT             = 1;
        /// `class` is dynamic.
        const CLASS            = 1 << 1;
        /// `style` is dynamic.
        const STYLE            = 1 << 2;
        /// Only the props listed in `dynamic_props` are dynamic.
        const PROPS            = 1 << 3;
        /// Prop keys themselves are dynamic; diff all props.
        const FULL_PROPS       = 1 << 4;
        /// Fragment whose children never change order.
        const STABLE_FRAGMENT  = 1 << 6;
        /// Fragment whose children all carry keys.
        const KEYED_FRAGMENT   = 1 << 7;
        /// Fragment whose children carry no keys.
        const UNKEYED_FRAGMENT = 1 << 8;
        /// Node needs patching for reasons other than props or text.
        const NEED_PATCH       = 1 << 9;
        /// Sentinel: no hint can be trusted for this subtree.
        const BAIL             = 1 << 31;
    }
}

impl PatchFlags {
    /// Whether the flags carry a trustworthy hint.
    pub fn is_hinted(self) -> bool {
        !self.is_empty() && !self.contains(Self::BAIL)
    }

    /// Whether any prop category is flagged.
    pub fn has_prop_hints(self) -> bool {
        self.intersects(Self::CLASS | Self::STYLE | Self::PROPS | Self::FULL_PROPS)
    }

    /// Whether this marks a keyed or unkeyed list boundary.
    pub fn is_list_fragment(self) -> bool {
        self.intersects(Self::KEYED_FRAGMENT | Self::UNKEYED_FRAGMENT)
    }
}
