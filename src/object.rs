//! Object layout.
//!
//! Named properties live in `slots`, laid out by the object's shape. Array
//! index properties live in `elements`: a dense vector for the common
//! hole-free prefix and an ordered sparse map for everything else. The
//! `class` tag carries the per-kind internal state (array length, function
//! code, primitive wrapper value).

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::atom::Atom;
use crate::code::Executable;
use crate::engine::Engine;
use crate::error::JsError;
use crate::gc::{CellRef, Trace, Tracer};
use crate::shape::Attributes;
use crate::value::{JsString, Value};

/// Signature of a host function: engine, `this`, arguments
pub type NativeFn = fn(&mut Engine, Value, &[Value]) -> Result<Value, JsError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Keys, slots and descriptors
// ═══════════════════════════════════════════════════════════════════════════════

/// Property key after canonicalization: array indices are kept numeric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    Name(Atom),
    Index(u32),
}

/// Storage of one property
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Slot {
    Data(Value),
    /// Getter and setter; `Undefined` when absent
    Accessor { getter: Value, setter: Value },
}

impl Slot {
    fn trace(&self, tracer: &mut Tracer) {
        match self {
            Slot::Data(v) => tracer.value(*v),
            Slot::Accessor { getter, setter } => {
                tracer.value(*getter);
                tracer.value(*setter);
            }
        }
    }
}

/// Property descriptor with every field optional, as consumed by
/// `[[DefineOwnProperty]]`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PropertyDescriptor {
    pub value: Option<Value>,
    pub writable: Option<bool>,
    pub get: Option<Value>,
    pub set: Option<Value>,
    pub enumerable: Option<bool>,
    pub configurable: Option<bool>,
}

impl PropertyDescriptor {
    /// Fully populated data descriptor
    pub fn data(value: Value, attrs: Attributes) -> Self {
        Self {
            value: Some(value),
            writable: Some(attrs.writable()),
            get: None,
            set: None,
            enumerable: Some(attrs.enumerable()),
            configurable: Some(attrs.configurable()),
        }
    }

    /// Fully populated accessor descriptor
    pub fn accessor(getter: Value, setter: Value, attrs: Attributes) -> Self {
        Self {
            value: None,
            writable: None,
            get: Some(getter),
            set: Some(setter),
            enumerable: Some(attrs.enumerable()),
            configurable: Some(attrs.configurable()),
        }
    }

    /// Descriptor describing an existing property
    pub fn from_slot(slot: Slot, attrs: Attributes) -> Self {
        match slot {
            Slot::Data(value) => Self::data(value, attrs),
            Slot::Accessor { getter, setter } => Self::accessor(getter, setter, attrs),
        }
    }

    #[inline]
    pub fn is_accessor(&self) -> bool {
        self.get.is_some() || self.set.is_some()
    }

    #[inline]
    pub fn is_data(&self) -> bool {
        self.value.is_some() || self.writable.is_some()
    }

    #[inline]
    pub fn is_generic(&self) -> bool {
        !self.is_accessor() && !self.is_data()
    }

    pub fn is_empty(&self) -> bool {
        self.is_generic() && self.enumerable.is_none() && self.configurable.is_none()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Elements
// ═══════════════════════════════════════════════════════════════════════════════

/// One sparse element
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Element {
    pub slot: Slot,
    pub attrs: Attributes,
}

/// Indexed storage.
///
/// `dense` holds indices `0..dense.len()`, all present, all plain data with
/// default attributes. Every sparse key is at least `dense.len()`; once the
/// sparse map is non-empty, new indices always go there.
#[derive(Debug, Default)]
pub struct Elements {
    dense: Vec<Value>,
    sparse: BTreeMap<u32, Element>,
}

impl Elements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            dense: Vec::with_capacity(capacity),
            sparse: BTreeMap::new(),
        }
    }

    pub fn get(&self, index: u32) -> Option<Element> {
        if let Some(value) = self.dense.get(index as usize) {
            return Some(Element {
                slot: Slot::Data(*value),
                attrs: Attributes::DEFAULT,
            });
        }
        self.sparse.get(&index).copied()
    }

    /// Dense fast path: value of a plain present element
    #[inline]
    pub fn dense_get(&self, index: u32) -> Option<Value> {
        self.dense.get(index as usize).copied()
    }

    pub fn contains(&self, index: u32) -> bool {
        (index as usize) < self.dense.len() || self.sparse.contains_key(&index)
    }

    pub fn dense_len(&self) -> usize {
        self.dense.len()
    }

    pub fn sparse_len(&self) -> usize {
        self.sparse.len()
    }

    /// Whether every element is stored densely
    pub fn is_dense(&self) -> bool {
        self.sparse.is_empty()
    }

    pub fn count(&self) -> usize {
        self.dense.len() + self.sparse.len()
    }

    /// Overwrite the value of an existing data element or add a default one
    pub fn set_value(&mut self, index: u32, value: Value, dense_limit: u32) {
        if let Some(slot) = self.dense.get_mut(index as usize) {
            *slot = value;
            return;
        }
        if let Some(element) = self.sparse.get_mut(&index) {
            element.slot = Slot::Data(value);
            return;
        }
        self.define(index, Slot::Data(value), Attributes::DEFAULT, dense_limit);
    }

    /// Store `slot` with `attrs` at `index`, replacing whatever was there
    pub fn define(&mut self, index: u32, slot: Slot, attrs: Attributes, dense_limit: u32) {
        let plain = matches!(slot, Slot::Data(_)) && attrs == Attributes::DEFAULT;
        let i = index as usize;
        if plain {
            if let (Some(existing), Slot::Data(v)) = (self.dense.get_mut(i), slot) {
                *existing = v;
                return;
            }
            if let Slot::Data(v) = slot {
                if i == self.dense.len() && self.sparse.is_empty() && index < dense_limit {
                    self.dense.push(v);
                    return;
                }
            }
        } else if i < self.dense.len() {
            self.spill();
        }
        self.sparse.insert(index, Element { slot, attrs });
    }

    /// Remove an element; returns whether it existed
    pub fn remove(&mut self, index: u32) -> bool {
        let i = index as usize;
        if i < self.dense.len() {
            if i + 1 == self.dense.len() {
                self.dense.pop();
            } else {
                self.spill();
                self.sparse.remove(&index);
            }
            return true;
        }
        self.sparse.remove(&index).is_some()
    }

    /// Move every dense element into the sparse map
    fn spill(&mut self) {
        tracing::trace!(count = self.dense.len(), "elements going sparse");
        for (i, value) in self.dense.drain(..).enumerate() {
            self.sparse.insert(
                i as u32,
                Element {
                    slot: Slot::Data(value),
                    attrs: Attributes::DEFAULT,
                },
            );
        }
    }

    /// Delete every index `>= new_len`, highest first.
    ///
    /// Stops at the first non-configurable element and returns its index.
    pub fn truncate(&mut self, new_len: u32) -> Result<(), u32> {
        let doomed: Vec<u32> = self
            .sparse
            .range(new_len..)
            .rev()
            .map(|(k, _)| *k)
            .collect();
        for index in doomed {
            match self.sparse.get(&index) {
                Some(e) if !e.attrs.configurable() => return Err(index),
                _ => {
                    self.sparse.remove(&index);
                }
            }
        }
        if (new_len as usize) < self.dense.len() {
            self.dense.truncate(new_len as usize);
        }
        Ok(())
    }

    /// Present indices in ascending order
    pub fn indices(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.dense.len() as u32).chain(self.sparse.keys().copied())
    }

    fn trace(&self, tracer: &mut Tracer) {
        tracer.values(&self.dense);
        for element in self.sparse.values() {
            element.slot.trace(tracer);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Objects
// ═══════════════════════════════════════════════════════════════════════════════

/// Callable behavior of a function object
#[derive(Clone)]
pub enum FunctionKind {
    /// Bytecode closure over `scope`
    Script { exec: Rc<Executable>, scope: CellRef },
    /// Host function. `construct` is used for `new`; without it the function
    /// is not a constructor.
    Native {
        call: NativeFn,
        construct: Option<NativeFn>,
    },
}

/// Internal kind of an object
#[derive(Clone)]
pub enum ObjectClass {
    Ordinary,
    Array { length: u32, length_writable: bool },
    Function(FunctionKind),
    Error,
    Boolean(bool),
    Number(f64),
    String(JsString),
    Arguments,
    Global,
}

impl ObjectClass {
    /// Value reported by `Object.prototype.toString`
    pub fn name(&self) -> &'static str {
        match self {
            ObjectClass::Ordinary | ObjectClass::Global => "Object",
            ObjectClass::Array { .. } => "Array",
            ObjectClass::Function(_) => "Function",
            ObjectClass::Error => "Error",
            ObjectClass::Boolean(_) => "Boolean",
            ObjectClass::Number(_) => "Number",
            ObjectClass::String(_) => "String",
            ObjectClass::Arguments => "Arguments",
        }
    }
}

pub struct JsObject {
    pub shape: CellRef,
    /// Named property storage, indexed by shape offsets
    pub slots: Vec<Slot>,
    pub elements: Elements,
    pub prototype: Option<CellRef>,
    pub extensible: bool,
    pub class: ObjectClass,
}

impl JsObject {
    pub fn new(shape: CellRef, prototype: Option<CellRef>, class: ObjectClass) -> Self {
        Self {
            shape,
            slots: Vec::new(),
            elements: Elements::new(),
            prototype,
            extensible: true,
            class,
        }
    }

    #[inline]
    pub fn slot(&self, offset: u32) -> Option<Slot> {
        self.slots.get(offset as usize).copied()
    }

    /// Write a slot, growing storage to fit the offset
    pub fn set_slot(&mut self, offset: u32, slot: Slot) {
        let i = offset as usize;
        if i >= self.slots.len() {
            self.slots.resize(i + 1, Slot::Data(Value::Undefined));
        }
        if let Some(s) = self.slots.get_mut(i) {
            *s = slot;
        }
    }

    #[inline]
    pub fn is_callable(&self) -> bool {
        matches!(self.class, ObjectClass::Function(_))
    }

    /// Whether `new` may be applied
    pub fn is_constructor(&self) -> bool {
        match &self.class {
            ObjectClass::Function(FunctionKind::Script { .. }) => true,
            ObjectClass::Function(FunctionKind::Native { construct, .. }) => construct.is_some(),
            _ => false,
        }
    }

    #[inline]
    pub fn is_array(&self) -> bool {
        matches!(self.class, ObjectClass::Array { .. })
    }

    pub fn array_length(&self) -> Option<u32> {
        match self.class {
            ObjectClass::Array { length, .. } => Some(length),
            _ => None,
        }
    }

    pub fn function(&self) -> Option<&FunctionKind> {
        match &self.class {
            ObjectClass::Function(kind) => Some(kind),
            _ => None,
        }
    }
}

impl Trace for JsObject {
    fn trace(&self, tracer: &mut Tracer) {
        tracer.edge(self.shape);
        if let Some(proto) = self.prototype {
            tracer.edge(proto);
        }
        for slot in &self.slots {
            slot.trace(tracer);
        }
        self.elements.trace(tracer);
        if let ObjectClass::Function(FunctionKind::Script { scope, .. }) = &self.class {
            tracer.edge(*scope);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// For-in iteration
// ═══════════════════════════════════════════════════════════════════════════════

/// Snapshot of the enumerable keys of an object and its prototype chain.
///
/// Keys deleted after the snapshot are skipped when reached; keys added after
/// it are not visited.
pub struct NameIterator {
    pub object: CellRef,
    keys: Vec<PropertyKey>,
    position: usize,
}

impl NameIterator {
    pub fn new(object: CellRef, keys: Vec<PropertyKey>) -> Self {
        Self {
            object,
            keys,
            position: 0,
        }
    }

    /// Next key of the snapshot, without checking it still exists
    pub fn advance(&mut self) -> Option<PropertyKey> {
        let key = self.keys.get(self.position).copied()?;
        self.position += 1;
        Some(key)
    }
}

impl Trace for NameIterator {
    fn trace(&self, tracer: &mut Tracer) {
        tracer.edge(self.object);
    }
}
