//! Hidden classes.
//!
//! A shape maps property names to slot offsets and attributes. Objects built
//! by the same sequence of additions share one shape, found by following
//! cached transitions from the empty root shape. An object whose layout
//! churns (deletes, attribute changes, or a very long transition chain) is
//! moved onto a *unique* shape it owns alone; unique shapes are edited in
//! place for appends and replaced by a fresh copy for anything else.

use crate::atom::Atom;
use crate::error::JsError;
use crate::gc::{CellRef, HeapCell, Heap, Trace, Tracer};
use crate::prelude::{FxHashMap, IndexMap, index_map_new};

/// Property attribute bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Attributes(u8);

impl Attributes {
    pub const NONE: Attributes = Attributes(0);
    pub const WRITABLE: Attributes = Attributes(1);
    pub const ENUMERABLE: Attributes = Attributes(2);
    pub const CONFIGURABLE: Attributes = Attributes(4);
    /// The slot holds a getter/setter pair rather than a value
    pub const ACCESSOR: Attributes = Attributes(8);

    /// Writable, enumerable and configurable: what assignment creates
    pub const DEFAULT: Attributes = Attributes(1 | 2 | 4);
    /// Writable and configurable but hidden from for-in: native methods
    pub const HIDDEN: Attributes = Attributes(1 | 4);

    #[inline]
    pub fn contains(self, other: Attributes) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn writable(self) -> bool {
        self.contains(Self::WRITABLE)
    }

    #[inline]
    pub fn enumerable(self) -> bool {
        self.contains(Self::ENUMERABLE)
    }

    #[inline]
    pub fn configurable(self) -> bool {
        self.contains(Self::CONFIGURABLE)
    }

    #[inline]
    pub fn is_accessor(self) -> bool {
        self.contains(Self::ACCESSOR)
    }

    /// Copy with `flag` set or cleared
    #[inline]
    pub fn with(self, flag: Attributes, on: bool) -> Attributes {
        if on {
            Attributes(self.0 | flag.0)
        } else {
            Attributes(self.0 & !flag.0)
        }
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl std::ops::BitOr for Attributes {
    type Output = Attributes;

    fn bitor(self, rhs: Attributes) -> Attributes {
        Attributes(self.0 | rhs.0)
    }
}

/// Where a named property lives and how it behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeEntry {
    pub offset: u32,
    pub attrs: Attributes,
}

/// Key of a transition edge
pub type TransitionKey = (Atom, Attributes);

pub struct Shape {
    /// Shape this one was derived from; keeps the chain alive
    parent: Option<CellRef>,
    table: IndexMap<Atom, ShapeEntry>,
    /// Weak: pruned by the collector when the target dies
    transitions: FxHashMap<TransitionKey, CellRef>,
    unique: bool,
    depth: u32,
    slot_count: u32,
    /// Offsets vacated by deletes, reused by later additions
    free_slots: Vec<u32>,
}

impl Shape {
    /// The root shape with no properties
    pub fn empty() -> Self {
        Self {
            parent: None,
            table: index_map_new(),
            transitions: FxHashMap::default(),
            unique: false,
            depth: 0,
            slot_count: 0,
            free_slots: Vec::new(),
        }
    }

    #[inline]
    pub fn lookup(&self, name: Atom) -> Option<ShapeEntry> {
        self.table.get(&name).copied()
    }

    /// Property names in insertion order
    pub fn keys(&self) -> impl Iterator<Item = (Atom, ShapeEntry)> + '_ {
        self.table.iter().map(|(k, e)| (*k, *e))
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    #[inline]
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Number of slots an object of this shape must provide
    pub fn slot_count(&self) -> u32 {
        self.slot_count
    }

    pub fn transitions(&self) -> impl Iterator<Item = (TransitionKey, CellRef)> + '_ {
        self.transitions.iter().map(|(k, v)| (*k, *v))
    }

    pub fn transition_count(&self) -> usize {
        self.transitions.len()
    }

    pub(crate) fn forget_transition(&mut self, key: TransitionKey) {
        self.transitions.remove(&key);
    }

    fn next_offset(&mut self) -> u32 {
        match self.free_slots.pop() {
            Some(offset) => offset,
            None => {
                self.slot_count += 1;
                self.slot_count - 1
            }
        }
    }

    /// Detached copy owned by a single object
    fn unique_copy(&self) -> Shape {
        Shape {
            parent: None,
            table: self.table.clone(),
            transitions: FxHashMap::default(),
            unique: true,
            depth: self.depth,
            slot_count: self.slot_count,
            free_slots: self.free_slots.clone(),
        }
    }
}

impl Trace for Shape {
    fn trace(&self, tracer: &mut Tracer) {
        if let Some(parent) = self.parent {
            tracer.edge(parent);
        }
    }
}

/// Shape reached from `shape` by adding `name` with `attrs`, and the slot
/// offset the new property occupies.
///
/// Shared shapes follow (or create and cache) a transition, so repeating the
/// same addition yields the same shape. Past `max_transitions` levels the
/// result is a unique shape instead. Unique shapes are extended in place.
pub fn add_property(
    heap: &mut Heap,
    shape: CellRef,
    name: Atom,
    attrs: Attributes,
    max_transitions: u32,
) -> Result<(CellRef, u32), JsError> {
    let current = heap.shape_mut(shape)?;
    if current.unique {
        let offset = current.next_offset();
        current.table.insert(name, ShapeEntry { offset, attrs });
        return Ok((shape, offset));
    }

    let cached = current.transitions.get(&(name, attrs)).copied();
    if let Some(target) = cached {
        if heap.is_live(target) {
            let offset = heap
                .shape(target)?
                .lookup(name)
                .map(|e| e.offset)
                .ok_or_else(|| JsError::internal_error("transition target lacks its key"))?;
            return Ok((target, offset));
        }
    }

    let current = heap.shape(shape)?;
    let mut next = if current.depth >= max_transitions {
        current.unique_copy()
    } else {
        Shape {
            parent: Some(shape),
            table: current.table.clone(),
            transitions: FxHashMap::default(),
            unique: false,
            depth: current.depth + 1,
            slot_count: current.slot_count,
            free_slots: current.free_slots.clone(),
        }
    };
    let offset = next.next_offset();
    next.table.insert(name, ShapeEntry { offset, attrs });
    let unique = next.unique;
    let target = heap.allocate(HeapCell::Shape(next))?;
    if unique {
        tracing::trace!(depth = max_transitions, "shape chain too deep, going unique");
    } else {
        heap.shape_mut(shape)?
            .transitions
            .insert((name, attrs), target);
    }
    Ok((target, offset))
}

/// Fresh unique shape lacking `name`. The vacated offset is kept for reuse.
pub fn remove_property(heap: &mut Heap, shape: CellRef, name: Atom) -> Result<CellRef, JsError> {
    let mut next = heap.shape(shape)?.unique_copy();
    if let Some(entry) = next.table.shift_remove(&name) {
        next.free_slots.push(entry.offset);
    }
    heap.allocate(HeapCell::Shape(next))
}

/// Fresh unique shape where `name` carries `attrs` at its existing offset
pub fn change_attributes(
    heap: &mut Heap,
    shape: CellRef,
    name: Atom,
    attrs: Attributes,
) -> Result<CellRef, JsError> {
    let mut next = heap.shape(shape)?.unique_copy();
    if let Some(entry) = next.table.get_mut(&name) {
        entry.attrs = attrs;
    }
    heap.allocate(HeapCell::Shape(next))
}
