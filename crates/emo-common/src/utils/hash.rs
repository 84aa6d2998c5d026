//! Fast hashing aliases.
//!
//! All internal maps keyed by handles or addresses use `ahash` through
//! `hashbrown`; these are hot paths and do not need DoS resistance.

/// Hash map with the default ahash hasher.
pub type FxHashMap<K, V> = hashbrown::HashMap<K, V, ahash::RandomState>;

/// Hash set with the default ahash hasher.
pub type FxHashSet<T> = hashbrown::HashSet<T, ahash::RandomState>;
