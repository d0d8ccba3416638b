//! Property access: `[[Get]]`, `[[Put]]`, `[[Delete]]`, `[[HasProperty]]`,
//! `[[DefineOwnProperty]]`, for-in key collection and the inline cache
//! probes used by the named-property opcodes.

use crate::atom::{self, Atom};
use crate::code::Executable;
use crate::engine::Engine;
use crate::error::JsError;
use crate::gc::CellRef;
use crate::ic::CacheEntry;
use crate::object::{ObjectClass, PropertyDescriptor, PropertyKey, Slot};
use crate::prelude::FxHashSet;
use crate::shape::{self, Attributes};
use crate::value::Value;

/// An own property: where it is stored and how it behaves
pub(crate) type OwnProperty = (Slot, Attributes);

fn reject(throw: bool, message: &str) -> Result<bool, JsError> {
    if throw {
        Err(JsError::type_error(message))
    } else {
        Ok(false)
    }
}

impl Engine {
    // ------------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------------

    /// `[[GetOwnProperty]]`, including the array `length` and the string
    /// wrapper's index and `length` properties
    pub(crate) fn own_property(
        &mut self,
        obj: CellRef,
        key: PropertyKey,
    ) -> Result<Option<OwnProperty>, JsError> {
        let o = self.heap.object(obj)?;
        match key {
            PropertyKey::Name(name) => {
                if name == atom::LENGTH {
                    match &o.class {
                        ObjectClass::Array {
                            length,
                            length_writable,
                        } => {
                            let attrs = if *length_writable {
                                Attributes::WRITABLE
                            } else {
                                Attributes::NONE
                            };
                            return Ok(Some((Slot::Data(Value::number(*length as f64)), attrs)));
                        }
                        ObjectClass::String(s) => {
                            let len = Value::number(s.utf16_len() as f64);
                            return Ok(Some((Slot::Data(len), Attributes::NONE)));
                        }
                        _ => {}
                    }
                }
                let entry = self.heap.shape(o.shape)?.lookup(name);
                Ok(entry.and_then(|e| o.slot(e.offset).map(|slot| (slot, e.attrs))))
            }
            PropertyKey::Index(index) => {
                if let Some(element) = o.elements.get(index) {
                    return Ok(Some((element.slot, element.attrs)));
                }
                let unit = match &o.class {
                    ObjectClass::String(s) => s.code_unit_at(index as usize),
                    _ => None,
                };
                match unit {
                    Some(unit) => {
                        let value = self.new_string(unit)?;
                        Ok(Some((Slot::Data(value), Attributes::ENUMERABLE)))
                    }
                    None => Ok(None),
                }
            }
        }
    }

    /// Own-property existence without materializing the value
    pub(crate) fn has_own_property(&self, obj: CellRef, key: PropertyKey) -> Result<bool, JsError> {
        let o = self.heap.object(obj)?;
        Ok(match key {
            PropertyKey::Name(name) => {
                (name == atom::LENGTH
                    && matches!(o.class, ObjectClass::Array { .. } | ObjectClass::String(_)))
                    || self.heap.shape(o.shape)?.lookup(name).is_some()
            }
            PropertyKey::Index(index) => {
                o.elements.contains(index)
                    || matches!(&o.class, ObjectClass::String(s) if (index as usize) < s.utf16_len())
            }
        })
    }

    /// `[[HasProperty]]`
    pub(crate) fn has_property(&self, obj: CellRef, key: PropertyKey) -> Result<bool, JsError> {
        let mut current = Some(obj);
        while let Some(o) = current {
            if self.has_own_property(o, key)? {
                return Ok(true);
            }
            current = self.heap.object(o)?.prototype;
        }
        Ok(false)
    }

    /// `[[GetProperty]]`: first property along the prototype chain
    pub(crate) fn find_property(
        &mut self,
        obj: CellRef,
        key: PropertyKey,
    ) -> Result<Option<OwnProperty>, JsError> {
        let mut current = Some(obj);
        while let Some(o) = current {
            if let Some(found) = self.own_property(o, key)? {
                return Ok(Some(found));
            }
            current = self.heap.object(o)?.prototype;
        }
        Ok(None)
    }

    /// `[[Get]]` with an explicit receiver for getters
    pub(crate) fn get_property(
        &mut self,
        obj: CellRef,
        key: PropertyKey,
        receiver: Value,
    ) -> Result<Value, JsError> {
        if let PropertyKey::Index(index) = key {
            if let Some(value) = self.heap.object(obj)?.elements.dense_get(index) {
                return Ok(value);
            }
        }
        match self.find_property(obj, key)? {
            Some((Slot::Data(value), _)) => Ok(value),
            Some((Slot::Accessor { getter, .. }, _)) => {
                if self.is_callable(getter) {
                    self.call_value(getter, receiver, &[])
                } else {
                    Ok(Value::Undefined)
                }
            }
            None => Ok(Value::Undefined),
        }
    }

    /// Property read on any base value; primitives read through their
    /// prototype without being wrapped
    pub(crate) fn get_value(&mut self, base: Value, key: PropertyKey) -> Result<Value, JsError> {
        let prototype = match base {
            Value::Cell(cell) if base.is_object() => return self.get_property(cell, key, base),
            Value::Cell(cell) if base.is_string() => {
                let s = self.heap.string(cell)?;
                match key {
                    PropertyKey::Name(name) if name == atom::LENGTH => {
                        return Ok(Value::number(s.utf16_len() as f64));
                    }
                    PropertyKey::Index(index) => {
                        if let Some(unit) = s.code_unit_at(index as usize) {
                            return self.new_string(unit);
                        }
                    }
                    _ => {}
                }
                self.realm.string_prototype
            }
            Value::Int32(_) | Value::Double(_) => self.realm.number_prototype,
            Value::Boolean(_) => self.realm.boolean_prototype,
            Value::Null => return Err(JsError::type_error("null has no properties")),
            _ => return Err(JsError::type_error("undefined has no properties")),
        };
        self.get_property(prototype, key, base)
    }

    // ------------------------------------------------------------------------
    // Assignment
    // ------------------------------------------------------------------------

    /// `[[Put]]`. `receiver` is the `this` handed to setters.
    pub(crate) fn put_property(
        &mut self,
        obj: CellRef,
        key: PropertyKey,
        value: Value,
        receiver: Value,
        strict: bool,
    ) -> Result<(), JsError> {
        match self.own_property(obj, key)? {
            Some((Slot::Data(_), attrs)) => {
                if !attrs.writable() {
                    reject(strict, "cannot put value to object")?;
                    return Ok(());
                }
                return self.set_own_value(obj, key, value, strict);
            }
            Some((Slot::Accessor { setter, .. }, _)) => {
                return self.call_setter(setter, receiver, value, strict);
            }
            None => {}
        }

        let mut current = self.heap.object(obj)?.prototype;
        while let Some(proto) = current {
            match self.own_property(proto, key)? {
                Some((Slot::Accessor { setter, .. }, _)) => {
                    return self.call_setter(setter, receiver, value, strict);
                }
                Some((Slot::Data(_), attrs)) => {
                    if !attrs.writable() {
                        reject(strict, "cannot put value to object")?;
                        return Ok(());
                    }
                    break;
                }
                None => current = self.heap.object(proto)?.prototype,
            }
        }

        if !self.heap.object(obj)?.extensible {
            reject(strict, "object not extensible")?;
            return Ok(());
        }
        match key {
            PropertyKey::Name(name) if !self.heap.object(obj)?.is_array() => {
                self.write_own(obj, PropertyKey::Name(name), Slot::Data(value), Attributes::DEFAULT)
            }
            _ => {
                let desc = PropertyDescriptor::data(value, Attributes::DEFAULT);
                self.define_own_property(obj, key, desc, strict).map(|_| ())
            }
        }
    }

    /// Property write on any base value.
    ///
    /// Primitive bases never get new properties; only setters found along
    /// their prototype chain run (with the primitive as `this`).
    pub(crate) fn put_value(
        &mut self,
        base: Value,
        key: PropertyKey,
        value: Value,
        strict: bool,
    ) -> Result<(), JsError> {
        if let Some(obj) = base.as_object() {
            return self.put_property(obj, key, value, base, strict);
        }
        let wrapper = self.to_object(base)?;
        if self.has_own_property(wrapper, key)? {
            reject(strict, "cannot put value to object")?;
            return Ok(());
        }
        match self.find_property(wrapper, key)? {
            Some((Slot::Accessor { setter, .. }, _)) => {
                self.call_setter(setter, base, value, strict)
            }
            _ => {
                reject(strict, "cannot put value to object")?;
                Ok(())
            }
        }
    }

    fn call_setter(
        &mut self,
        setter: Value,
        receiver: Value,
        value: Value,
        strict: bool,
    ) -> Result<(), JsError> {
        if self.is_callable(setter) {
            self.call_value(setter, receiver, &[value])?;
        } else {
            reject(strict, "cannot put value to object")?;
        }
        Ok(())
    }

    /// Overwrite the value of an existing own writable data property
    fn set_own_value(
        &mut self,
        obj: CellRef,
        key: PropertyKey,
        value: Value,
        strict: bool,
    ) -> Result<(), JsError> {
        let dense_limit = self.config.dense_limit;
        let o = self.heap.object(obj)?;
        match key {
            PropertyKey::Name(name) => {
                if name == atom::LENGTH && o.is_array() {
                    let desc = PropertyDescriptor {
                        value: Some(value),
                        ..PropertyDescriptor::default()
                    };
                    return self.define_array_length(obj, desc, strict).map(|_| ());
                }
                let entry = self.heap.shape(o.shape)?.lookup(name);
                if let Some(entry) = entry {
                    self.heap
                        .object_mut(obj)?
                        .set_slot(entry.offset, Slot::Data(value));
                }
            }
            PropertyKey::Index(index) => {
                self.heap
                    .object_mut(obj)?
                    .elements
                    .set_value(index, value, dense_limit);
            }
        }
        Ok(())
    }

    /// Store `slot` with `attrs` as an own property, adding it or updating it
    /// in place. No validation.
    pub(crate) fn write_own(
        &mut self,
        obj: CellRef,
        key: PropertyKey,
        slot: Slot,
        attrs: Attributes,
    ) -> Result<(), JsError> {
        match key {
            PropertyKey::Name(name) => {
                let current = self.heap.object(obj)?.shape;
                let entry = self.heap.shape(current)?.lookup(name);
                let (next, offset) = match entry {
                    Some(e) if e.attrs == attrs => (current, e.offset),
                    Some(e) => (
                        shape::change_attributes(&mut self.heap, current, name, attrs)?,
                        e.offset,
                    ),
                    None => shape::add_property(
                        &mut self.heap,
                        current,
                        name,
                        attrs,
                        self.config.max_transitions,
                    )?,
                };
                let o = self.heap.object_mut(obj)?;
                o.shape = next;
                o.set_slot(offset, slot);
            }
            PropertyKey::Index(index) => {
                let dense_limit = self.config.dense_limit;
                self.heap
                    .object_mut(obj)?
                    .elements
                    .define(index, slot, attrs, dense_limit);
            }
        }
        Ok(())
    }

    /// Define a named data property without checks; used to populate
    /// fresh objects
    pub(crate) fn define_data(
        &mut self,
        obj: CellRef,
        name: Atom,
        value: Value,
        attrs: Attributes,
    ) -> Result<(), JsError> {
        self.write_own(obj, PropertyKey::Name(name), Slot::Data(value), attrs)
    }

    // ------------------------------------------------------------------------
    // Definition
    // ------------------------------------------------------------------------

    /// `[[DefineOwnProperty]]`, with the array exotic rules for `length`
    /// and indices
    pub(crate) fn define_own_property(
        &mut self,
        obj: CellRef,
        key: PropertyKey,
        desc: PropertyDescriptor,
        throw: bool,
    ) -> Result<bool, JsError> {
        let array = match self.heap.object(obj)?.class {
            ObjectClass::Array {
                length,
                length_writable,
            } => Some((length, length_writable)),
            _ => None,
        };
        let Some((length, length_writable)) = array else {
            return self.define_ordinary(obj, key, desc, throw);
        };
        match key {
            PropertyKey::Name(name) if name == atom::LENGTH => {
                self.define_array_length(obj, desc, throw)
            }
            PropertyKey::Index(index) => {
                if index >= length && !length_writable {
                    return reject(throw, "[[DefineOwnProperty]] failed");
                }
                if !self.define_ordinary(obj, key, desc, throw)? {
                    return Ok(false);
                }
                if index >= length {
                    self.set_array_length_field(obj, index + 1, None)?;
                }
                Ok(true)
            }
            PropertyKey::Name(_) => self.define_ordinary(obj, key, desc, throw),
        }
    }

    fn set_array_length_field(
        &mut self,
        obj: CellRef,
        new_length: u32,
        writable: Option<bool>,
    ) -> Result<(), JsError> {
        if let ObjectClass::Array {
            length,
            length_writable,
        } = &mut self.heap.object_mut(obj)?.class
        {
            *length = new_length;
            if let Some(w) = writable {
                *length_writable = w;
            }
        }
        Ok(())
    }

    /// `length` of an array: validates the new value, then deletes indices
    /// from the top down, stopping at the first non-configurable one
    fn define_array_length(
        &mut self,
        obj: CellRef,
        desc: PropertyDescriptor,
        throw: bool,
    ) -> Result<bool, JsError> {
        let (old_length, writable) = match self.heap.object(obj)?.class {
            ObjectClass::Array {
                length,
                length_writable,
            } => (length, length_writable),
            _ => return Err(JsError::internal_error("array length on a non-array")),
        };
        if desc.configurable == Some(true)
            || desc.enumerable == Some(true)
            || desc.is_accessor()
            || (!writable && desc.writable == Some(true))
        {
            return reject(throw, "[[DefineOwnProperty]] failed");
        }
        let Some(value) = desc.value else {
            if let Some(w) = desc.writable {
                self.set_array_length_field(obj, old_length, Some(w))?;
            }
            return Ok(true);
        };

        let new_length = self.to_uint32(value)?;
        if new_length as f64 != self.to_number(value)? {
            return Err(JsError::range_error("invalid array length"));
        }
        if new_length >= old_length {
            if !writable && new_length != old_length {
                return reject(throw, "[[DefineOwnProperty]] failed");
            }
            self.set_array_length_field(obj, new_length, desc.writable)?;
            return Ok(true);
        }
        if !writable {
            return reject(throw, "[[DefineOwnProperty]] failed");
        }
        let keep_writable = desc.writable != Some(false);
        let truncated = self.heap.object_mut(obj)?.elements.truncate(new_length);
        match truncated {
            Ok(()) => {
                self.set_array_length_field(obj, new_length, Some(keep_writable))?;
                Ok(true)
            }
            Err(blocking) => {
                self.set_array_length_field(obj, blocking + 1, Some(keep_writable))?;
                reject(throw, "[[DefineOwnProperty]] failed")
            }
        }
    }

    /// Ordinary `[[DefineOwnProperty]]`: validate the descriptor against the
    /// current property, then merge present fields over it
    fn define_ordinary(
        &mut self,
        obj: CellRef,
        key: PropertyKey,
        desc: PropertyDescriptor,
        throw: bool,
    ) -> Result<bool, JsError> {
        let Some((slot, attrs)) = self.own_property(obj, key)? else {
            if !self.heap.object(obj)?.extensible {
                return reject(throw, "object not extensible");
            }
            let mut attrs = Attributes::NONE
                .with(Attributes::ENUMERABLE, desc.enumerable.unwrap_or(false))
                .with(Attributes::CONFIGURABLE, desc.configurable.unwrap_or(false));
            let slot = if desc.is_accessor() {
                attrs = attrs.with(Attributes::ACCESSOR, true);
                Slot::Accessor {
                    getter: desc.get.unwrap_or(Value::Undefined),
                    setter: desc.set.unwrap_or(Value::Undefined),
                }
            } else {
                attrs = attrs.with(Attributes::WRITABLE, desc.writable.unwrap_or(false));
                Slot::Data(desc.value.unwrap_or(Value::Undefined))
            };
            self.write_own(obj, key, slot, attrs)?;
            return Ok(true);
        };

        if desc.is_empty() {
            return Ok(true);
        }
        let configurable = attrs.configurable();
        if !configurable {
            if desc.configurable == Some(true) {
                return reject(throw, "[[DefineOwnProperty]] failed");
            }
            if desc.enumerable.is_some_and(|e| e != attrs.enumerable()) {
                return reject(throw, "[[DefineOwnProperty]] failed");
            }
        }

        let (mut slot, mut attrs) = (slot, attrs);
        let current_accessor = matches!(slot, Slot::Accessor { .. });
        if desc.is_generic() {
            // Nothing beyond the enumerable/configurable checks above
        } else if current_accessor != desc.is_accessor() {
            if !configurable {
                return reject(throw, "[[DefineOwnProperty]] failed");
            }
            let kept = Attributes::NONE
                .with(Attributes::ENUMERABLE, attrs.enumerable())
                .with(Attributes::CONFIGURABLE, configurable);
            if current_accessor {
                slot = Slot::Data(Value::Undefined);
                attrs = kept;
            } else {
                slot = Slot::Accessor {
                    getter: Value::Undefined,
                    setter: Value::Undefined,
                };
                attrs = kept.with(Attributes::ACCESSOR, true);
            }
        } else if let Slot::Data(current) = slot {
            if !configurable && !attrs.writable() {
                if desc.writable == Some(true) {
                    return reject(throw, "[[DefineOwnProperty]] failed");
                }
                if let Some(v) = desc.value {
                    if !v.same_value(&current, &self.heap) {
                        return reject(throw, "[[DefineOwnProperty]] failed");
                    }
                }
            }
        } else if let Slot::Accessor { getter, setter } = slot {
            if !configurable {
                let changed = |new: Option<Value>, old: Value, heap: &crate::gc::Heap| {
                    new.is_some_and(|n| !n.same_value(&old, heap))
                };
                if changed(desc.get, getter, &self.heap) || changed(desc.set, setter, &self.heap) {
                    return reject(throw, "[[DefineOwnProperty]] failed");
                }
            }
        }

        // Virtual properties of string wrappers can only pass validation
        // unchanged
        if self.is_virtual_property(obj, key)? {
            return Ok(true);
        }

        match &mut slot {
            Slot::Data(v) => {
                if let Some(value) = desc.value {
                    *v = value;
                }
                if let Some(w) = desc.writable {
                    attrs = attrs.with(Attributes::WRITABLE, w);
                }
            }
            Slot::Accessor { getter, setter } => {
                if let Some(g) = desc.get {
                    *getter = g;
                }
                if let Some(s) = desc.set {
                    *setter = s;
                }
            }
        }
        if let Some(e) = desc.enumerable {
            attrs = attrs.with(Attributes::ENUMERABLE, e);
        }
        if let Some(c) = desc.configurable {
            attrs = attrs.with(Attributes::CONFIGURABLE, c);
        }
        self.write_own(obj, key, slot, attrs)?;
        Ok(true)
    }

    fn is_virtual_property(&self, obj: CellRef, key: PropertyKey) -> Result<bool, JsError> {
        let o = self.heap.object(obj)?;
        Ok(match (&o.class, key) {
            (ObjectClass::String(s), PropertyKey::Index(i)) => {
                (i as usize) < s.utf16_len() && !o.elements.contains(i)
            }
            (ObjectClass::String(_), PropertyKey::Name(name)) => name == atom::LENGTH,
            _ => false,
        })
    }

    /// Own property as a descriptor, for `Object.getOwnPropertyDescriptor`
    pub(crate) fn own_descriptor(
        &mut self,
        obj: CellRef,
        key: PropertyKey,
    ) -> Result<Option<PropertyDescriptor>, JsError> {
        Ok(self
            .own_property(obj, key)?
            .map(|(slot, attrs)| PropertyDescriptor::from_slot(slot, attrs)))
    }

    // ------------------------------------------------------------------------
    // Deletion and enumeration
    // ------------------------------------------------------------------------

    /// `[[Delete]]`
    pub(crate) fn delete_property(
        &mut self,
        obj: CellRef,
        key: PropertyKey,
        strict: bool,
    ) -> Result<bool, JsError> {
        let Some((_, attrs)) = self.own_property(obj, key)? else {
            return Ok(true);
        };
        if !attrs.configurable() {
            return if strict {
                Err(JsError::type_error("delete failed"))
            } else {
                Ok(false)
            };
        }
        match key {
            PropertyKey::Name(name) => {
                let current = self.heap.object(obj)?.shape;
                let offset = self.heap.shape(current)?.lookup(name).map(|e| e.offset);
                let next = shape::remove_property(&mut self.heap, current, name)?;
                let o = self.heap.object_mut(obj)?;
                o.shape = next;
                if let Some(offset) = offset {
                    o.set_slot(offset, Slot::Data(Value::Undefined));
                }
            }
            PropertyKey::Index(index) => {
                self.heap.object_mut(obj)?.elements.remove(index);
            }
        }
        Ok(true)
    }

    /// Own keys in enumeration order (indices ascending, then names in
    /// insertion order), each with its enumerable flag
    pub(crate) fn own_keys(&self, obj: CellRef) -> Result<Vec<(PropertyKey, bool)>, JsError> {
        let o = self.heap.object(obj)?;
        let mut keys = Vec::new();
        let string_len = match &o.class {
            ObjectClass::String(s) => s.utf16_len() as u32,
            _ => 0,
        };
        keys.extend((0..string_len).map(|i| (PropertyKey::Index(i), true)));
        for index in o.elements.indices() {
            if index >= string_len {
                let enumerable = o.elements.get(index).is_some_and(|e| e.attrs.enumerable());
                keys.push((PropertyKey::Index(index), enumerable));
            }
        }
        if matches!(o.class, ObjectClass::Array { .. } | ObjectClass::String(_)) {
            keys.push((PropertyKey::Name(atom::LENGTH), false));
        }
        let shape = self.heap.shape(o.shape)?;
        keys.extend(
            shape
                .keys()
                .map(|(name, entry)| (PropertyKey::Name(name), entry.attrs.enumerable())),
        );
        Ok(keys)
    }

    /// Enumerable keys along the prototype chain, skipping keys shadowed by
    /// an earlier object (enumerable or not)
    pub(crate) fn enumerable_keys(&self, obj: CellRef) -> Result<Vec<PropertyKey>, JsError> {
        let mut seen = FxHashSet::default();
        let mut keys = Vec::new();
        let mut current = Some(obj);
        while let Some(o) = current {
            for (key, enumerable) in self.own_keys(o)? {
                if seen.insert(key) && enumerable {
                    keys.push(key);
                }
            }
            current = self.heap.object(o)?.prototype;
        }
        Ok(keys)
    }

    // ------------------------------------------------------------------------
    // Inline caches
    // ------------------------------------------------------------------------

    /// Cached read of a named data property
    pub(crate) fn probe_load(
        &self,
        exec: &Executable,
        site: usize,
        obj: CellRef,
    ) -> Result<Option<Value>, JsError> {
        let o = self.heap.object(obj)?;
        let slot = match exec.cache.get(site) {
            CacheEntry::Own { shape, offset } if o.shape == shape => o.slot(offset),
            CacheEntry::Proto {
                shape,
                holder,
                holder_shape,
                offset,
            } if o.shape == shape && o.prototype == Some(holder) => {
                let h = self.heap.object(holder)?;
                if h.shape == holder_shape {
                    h.slot(offset)
                } else {
                    None
                }
            }
            _ => None,
        };
        match slot {
            Some(Slot::Data(value)) => {
                exec.cache.record_hit();
                Ok(Some(value))
            }
            _ => {
                exec.cache.record_miss();
                Ok(None)
            }
        }
    }

    /// Remember where a named data property was found: on the receiver
    /// itself, or on its direct prototype when the receiver's shape is shared
    pub(crate) fn fill_load(
        &self,
        exec: &Executable,
        site: usize,
        obj: CellRef,
        name: Atom,
    ) -> Result<(), JsError> {
        let o = self.heap.object(obj)?;
        if name == atom::LENGTH
            && matches!(o.class, ObjectClass::Array { .. } | ObjectClass::String(_))
        {
            return Ok(());
        }
        let shape = self.heap.shape(o.shape)?;
        if let Some(entry) = shape.lookup(name) {
            if !entry.attrs.is_accessor() {
                exec.cache.set(
                    site,
                    CacheEntry::Own {
                        shape: o.shape,
                        offset: entry.offset,
                    },
                );
            }
            return Ok(());
        }
        if shape.is_unique() {
            return Ok(());
        }
        let Some(holder) = o.prototype else {
            return Ok(());
        };
        let h = self.heap.object(holder)?;
        if let Some(entry) = self.heap.shape(h.shape)?.lookup(name) {
            if !entry.attrs.is_accessor() {
                exec.cache.set(
                    site,
                    CacheEntry::Proto {
                        shape: o.shape,
                        holder,
                        holder_shape: h.shape,
                        offset: entry.offset,
                    },
                );
            }
        }
        Ok(())
    }

    /// Cached write to an existing writable own data property
    pub(crate) fn probe_store(
        &mut self,
        exec: &Executable,
        site: usize,
        obj: CellRef,
        value: Value,
    ) -> Result<bool, JsError> {
        let o = self.heap.object_mut(obj)?;
        if let CacheEntry::Own { shape, offset } = exec.cache.get(site) {
            if o.shape == shape {
                o.set_slot(offset, Slot::Data(value));
                exec.cache.record_hit();
                return Ok(true);
            }
        }
        exec.cache.record_miss();
        Ok(false)
    }

    pub(crate) fn fill_store(
        &self,
        exec: &Executable,
        site: usize,
        obj: CellRef,
        name: Atom,
    ) -> Result<(), JsError> {
        let o = self.heap.object(obj)?;
        if name == atom::LENGTH && o.is_array() {
            return Ok(());
        }
        if let Some(entry) = self.heap.shape(o.shape)?.lookup(name) {
            if entry.attrs.writable() && !entry.attrs.is_accessor() {
                exec.cache.set(
                    site,
                    CacheEntry::Own {
                        shape: o.shape,
                        offset: entry.offset,
                    },
                );
            }
        }
        Ok(())
    }

    /// Cache site of the instruction at `pc`, unless caching is switched off
    #[inline]
    pub(crate) fn cache_site(&self, exec: &Executable, pc: usize) -> Option<usize> {
        if self.config.inline_caches {
            exec.cache.site(pc)
        } else {
            None
        }
    }

    /// Named read with the inline cache of the instruction at `pc`
    pub(crate) fn load_named(
        &mut self,
        exec: &Executable,
        pc: usize,
        base: Value,
        key: PropertyKey,
    ) -> Result<Value, JsError> {
        let (Some(obj), PropertyKey::Name(name), Some(site)) =
            (base.as_object(), key, self.cache_site(exec, pc))
        else {
            return self.get_value(base, key);
        };
        if let Some(value) = self.probe_load(exec, site, obj)? {
            return Ok(value);
        }
        tracing::trace!(pc, name = self.atoms.as_str(name), "ic miss");
        let value = self.get_property(obj, key, base)?;
        self.fill_load(exec, site, obj, name)?;
        Ok(value)
    }

    /// Named write with the inline cache of the instruction at `pc`
    pub(crate) fn store_named(
        &mut self,
        exec: &Executable,
        pc: usize,
        base: Value,
        key: PropertyKey,
        value: Value,
        strict: bool,
    ) -> Result<(), JsError> {
        let (Some(obj), PropertyKey::Name(name), Some(site)) =
            (base.as_object(), key, self.cache_site(exec, pc))
        else {
            return self.put_value(base, key, value, strict);
        };
        if self.probe_store(exec, site, obj, value)? {
            return Ok(());
        }
        self.put_property(obj, key, value, base, strict)?;
        self.fill_store(exec, site, obj, name)
    }
}
