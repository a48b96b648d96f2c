use std::borrow::Cow;
use std::fmt;

use thiserror::Error;

use crate::arena::SubscriberId;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the runtime, the scheduler and the renderer.
///
/// Benign no-ops (writing an unobserved key, disposing twice, invalidating a
/// job that already ran) never produce an error.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A subscriber was re-queued more often than the configured ceiling
    /// within one flush.
    #[error(
        "maximum recursive updates exceeded: subscriber {subscriber}{} ran more than {limit} times in one flush",
        label_suffix(.label)
    )]
    RunawayUpdate {
        /// The subscriber that kept re-queuing itself.
        subscriber: SubscriberId,
        /// Its diagnostic label, if one was set.
        label: Option<Cow<'static, str>>,
        /// The configured per-flush ceiling.
        limit: usize,
    },

    /// A render body failed and no handler recovered it.
    #[error("render body failed: {0}")]
    RenderBody(#[from] RenderError),

    /// The subscriber no longer exists.
    #[error("subscriber {0} has been disposed")]
    Disposed(SubscriberId),

    /// A computed value was read by its own computation.
    #[error("computed {0} read its own value while computing")]
    CyclicComputed(SubscriberId),

    /// The runtime owning a handle has already been dropped.
    #[error("the owning runtime has been dropped")]
    RuntimeDropped,

    /// Index-based write past the end of a tracked vector.
    #[error("index {index} out of bounds for tracked vec of length {len}")]
    IndexOutOfBounds {
        /// The requested index.
        index: usize,
        /// The length at the time of the write.
        len: usize,
    },
}

fn label_suffix(label: &Option<Cow<'static, str>>) -> String {
    match label {
        Some(label) => format!(" ({label})"),
        None => String::new(),
    }
}

/// Failure raised by a render body or a component subtree.
///
/// Cloneable so that a failed component node can carry it in the tree and
/// the same value can be handed to an error handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RenderError {
    message: Cow<'static, str>,
}

impl RenderError {
    /// Create a render error from a message.
    pub fn new(message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Wrap any displayable error.
    pub fn from_display(err: impl fmt::Display) -> Self {
        Self::new(err.to_string())
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runaway_message_names_subscriber_and_limit() {
        let err = Error::RunawayUpdate {
            subscriber: SubscriberId::new(3, 1),
            label: Some("counter".into()),
            limit: 100,
        };
        let msg = err.to_string();
        assert!(msg.contains("#3v1"), "{msg}");
        assert!(msg.contains("(counter)"), "{msg}");
        assert!(msg.contains("100"), "{msg}");
    }

    #[test]
    fn render_error_converts_into_error() {
        let err: Error = RenderError::new("boom").into();
        assert!(matches!(err, Error::RenderBody(ref e) if e.message() == "boom"));
        assert_eq!(err.to_string(), "render body failed: boom");
    }
}
