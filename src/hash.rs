//! Zero-sized hash builder for the engine's internal maps.
//!
//! The dependency store, the scheduler's pending set and the keyed-children
//! index all hash small integer-like keys. None of them is exposed to
//! attacker-controlled input, so a fixed-seed foldhash is used instead of
//! SipHash.

use std::hash::{BuildHasher, Hash};

pub use foldhash::fast::{FixedState, FoldHasher};

/// A zero-sized `BuildHasher` that uses foldhash with a fixed seed.
///
/// All instances produce identical hash values, which is also what makes
/// [`hash_key`] usable as a stable field identity for tracked maps.
#[derive(Clone, Copy, Debug, Default)]
pub struct FastHashBuilder;

impl BuildHasher for FastHashBuilder {
    type Hasher = FoldHasher<'static>;

    #[inline]
    fn build_hasher(&self) -> Self::Hasher {
        FixedState::with_seed(0x517cc1b727220a95).build_hasher()
    }
}

/// Hash an arbitrary key into the `u64` used by [`PropKey::Field`].
///
/// [`PropKey::Field`]: crate::PropKey::Field
#[inline]
pub fn hash_key<K: Hash + ?Sized>(key: &K) -> u64 {
    FastHashBuilder.hash_one(key)
}
