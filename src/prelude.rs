//! Shared collection aliases and numeric helpers.
//!
//! Every hashed collection in the crate goes through these aliases so the
//! hasher is chosen in one place.

// ═══════════════════════════════════════════════════════════════════════════════
// Hashed collections
// ═══════════════════════════════════════════════════════════════════════════════

pub use rustc_hash::{FxHashMap, FxHashSet};

/// Insertion-ordered map used where property order is observable.
pub type IndexMap<K, V> =
    indexmap::IndexMap<K, V, core::hash::BuildHasherDefault<rustc_hash::FxHasher>>;

/// Create an empty IndexMap
#[inline]
pub fn index_map_new<K, V>() -> IndexMap<K, V>
where
    K: core::hash::Hash + Eq,
{
    indexmap::IndexMap::with_hasher(Default::default())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Math
// ═══════════════════════════════════════════════════════════════════════════════

/// IEEE-754 helpers with C library semantics.
pub mod math {
    /// Remainder with the sign of the dividend (C `fmod`), as used by `%`.
    #[inline]
    pub fn fmod(x: f64, y: f64) -> f64 {
        libm::fmod(x, y)
    }

    #[inline]
    pub fn trunc(x: f64) -> f64 {
        libm::trunc(x)
    }
}
