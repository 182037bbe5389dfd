//! Densely numbered entity references used as map keys.
//!
//! The IR this crate consumes is a flat, slot-indexed tree (see `ir::Slot`
//! in the module doc). Most of the ABI data computed per slot, per type, or
//! per function is naturally a parallel vector indexed by one of these
//! small `u32` keys, so rather than reach for `HashMap<u32, T>` everywhere
//! we give every index its own zero-cost newtype and two small containers
//! built on top of `Vec`: `PrimaryMap`, which owns its keyspace and mints
//! new keys, and `SecondaryMap`, which attaches default-valued data to an
//! existing keyspace without owning it.

use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

/// A densely numbered entity reference usable as a map key.
pub trait EntityRef: Copy + Eq {
    /// Create a new entity reference from a small index.
    fn new(index: usize) -> Self;

    /// Get the index of this reference.
    fn index(self) -> usize;
}

/// Defines a new entity reference type wrapping a `u32`.
macro_rules! entity_ref {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u32);

        impl $crate::entity::EntityRef for $name {
            fn new(index: usize) -> Self {
                debug_assert!(index < (u32::MAX as usize));
                $name(index as u32)
            }

            fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl $name {
            /// Index of this reference within its keyspace.
            pub fn as_u32(self) -> u32 {
                self.0
            }
        }
    };
}

entity_ref!(
    /// Linearized index over a flattened IR type's traversal order.
    ///
    /// Every scalar leaf, every aggregate opener, and every padding entry
    /// gets its own slot. Slots are the key used to look up a type's
    /// `LayoutEntry` (C1) and `ParameterLocation` (C2).
    Slot
);

entity_ref!(
    /// Reference to a named IR type entry (a struct/union/array/scalar
    /// declaration), distinct from the per-field `Slot` indices inside it.
    TypeId
);

entity_ref!(
    /// Reference to a function declaration within a module.
    FunctionId
);

entity_ref!(
    /// Reference to a string literal within a module.
    StringId
);

/// A mapping `K -> V` for a dense, owned keyspace.
///
/// `PrimaryMap` is the only way to mint new keys: `push` appends a value
/// and returns the key that now refers to it. Use this for collections
/// that define the keyspace (the type table, the function table).
#[derive(Debug, Clone)]
pub struct PrimaryMap<K: EntityRef, V> {
    elems: Vec<V>,
    unused: PhantomData<K>,
}

impl<K: EntityRef, V> PrimaryMap<K, V> {
    /// Create a new empty map.
    pub fn new() -> Self {
        Self {
            elems: Vec::new(),
            unused: PhantomData,
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.elems.len()
    }

    /// Is this map empty?
    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    /// Append `v`, returning the key that now refers to it.
    pub fn push(&mut self, v: V) -> K {
        let k = K::new(self.elems.len());
        self.elems.push(v);
        k
    }

    /// Get the value for `k`, if present.
    pub fn get(&self, k: K) -> Option<&V> {
        self.elems.get(k.index())
    }

    /// Iterate over `(key, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (K, &V)> {
        self.elems
            .iter()
            .enumerate()
            .map(|(i, v)| (K::new(i), v))
    }

    /// Iterate over keys in order.
    pub fn keys(&self) -> impl Iterator<Item = K> {
        (0..self.elems.len()).map(K::new)
    }
}

impl<K: EntityRef, V> Default for PrimaryMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: EntityRef, V> Index<K> for PrimaryMap<K, V> {
    type Output = V;
    fn index(&self, k: K) -> &V {
        &self.elems[k.index()]
    }
}

impl<K: EntityRef, V> IndexMut<K> for PrimaryMap<K, V> {
    fn index_mut(&mut self, k: K) -> &mut V {
        &mut self.elems[k.index()]
    }
}

/// A mapping `K -> V` for secondary (parallel) data over someone else's
/// keyspace.
///
/// Unlike `PrimaryMap`, a `SecondaryMap` can't mint keys. It behaves as if
/// every key has a default entry from the start, growing on write as
/// needed. This is the parallel-vector-indexed-by-slot structure the data
/// model calls for: layout entries and eightbyte classes are both
/// `SecondaryMap<Slot, _>`.
#[derive(Debug, Clone)]
pub struct SecondaryMap<K: EntityRef, V: Clone> {
    elems: Vec<V>,
    default: V,
    unused: PhantomData<K>,
}

impl<K: EntityRef, V: Clone> SecondaryMap<K, V> {
    /// Create a new empty map using `V::default()` for unwritten entries.
    pub fn new() -> Self
    where
        V: Default,
    {
        Self {
            elems: Vec::new(),
            default: Default::default(),
            unused: PhantomData,
        }
    }

    /// Create a new empty map with an explicit default value.
    pub fn with_default(default: V) -> Self {
        Self {
            elems: Vec::new(),
            default,
            unused: PhantomData,
        }
    }

    /// Number of entries materialized so far (not necessarily the full
    /// keyspace size).
    pub fn len(&self) -> usize {
        self.elems.len()
    }

    /// Get the value at `k`, defaulting if never written.
    pub fn get(&self, k: K) -> &V {
        self.elems.get(k.index()).unwrap_or(&self.default)
    }

    /// Set the value at `k`, growing the backing vector as needed.
    pub fn set(&mut self, k: K, v: V) {
        let idx = k.index();
        if idx >= self.elems.len() {
            self.elems.resize(idx + 1, self.default.clone());
        }
        self.elems[idx] = v;
    }
}

impl<K: EntityRef, V: Clone> Index<K> for SecondaryMap<K, V> {
    type Output = V;
    fn index(&self, k: K) -> &V {
        self.get(k)
    }
}
