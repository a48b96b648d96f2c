// Arena-based storage for reactive bookkeeping
//
// This module provides the two structures a runtime instance owns:
// - Subscriber arena: stores SubscriberMetadata (body, edges, scope, mode)
// - Dependency store: container -> key -> subscriber set
//
// Unlike process-global statics, each Runtime owns one of each behind its
// own locks. SubscriberId and ContainerId are lightweight newtypes that index
// into them.

pub mod store;
pub mod subscriber_arena;

pub use store::{ContainerId, DependencyStore, PropKey};
pub use subscriber_arena::{
    ActiveGuard, ActiveSubscriber, Edge, Lifecycle, NotifyMode, Notifier, SubscriberArena,
    SubscriberId, SubscriberMetadata, active_subscriber,
};
