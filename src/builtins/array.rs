//! `Array` and `Array.prototype`

use std::cmp::Ordering;
use std::collections::BTreeSet;

use super::{arg, register_constructor, register_method};
use crate::atom;
use crate::engine::Engine;
use crate::error::JsError;
use crate::gc::CellRef;
use crate::object::PropertyKey;
use crate::value::{JsString, Value};

pub fn install(engine: &mut Engine) -> Result<(), JsError> {
    let proto = engine.realm.array_prototype;
    register_method(engine, proto, "push", array_push, 1)?;
    register_method(engine, proto, "join", array_join, 1)?;
    register_method(engine, proto, "toString", array_to_string, 0)?;
    register_method(engine, proto, "sort", array_sort, 1)?;
    register_constructor(engine, "Array", array_constructor, array_constructor, 1, proto)?;
    Ok(())
}

/// Key for an index that may lie past the array index range
fn index_key(engine: &mut Engine, index: f64) -> PropertyKey {
    if index < f64::from(u32::MAX) {
        PropertyKey::Index(index as u32)
    } else {
        engine.key(&crate::value::number_to_string(index))
    }
}

fn length_of(engine: &mut Engine, obj: CellRef) -> Result<u32, JsError> {
    let length = engine.get_property(obj, PropertyKey::Name(atom::LENGTH), Value::Cell(obj))?;
    engine.to_uint32(length)
}

/// `Array(...)` and `new Array(...)`; a single numeric argument is a length
pub fn array_constructor(engine: &mut Engine, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    if let [len] = args {
        if let Some(n) = len.as_number() {
            let length = crate::value::to_uint32(n);
            if f64::from(length) != n {
                return Err(JsError::range_error("invalid array length"));
            }
            return Ok(Value::Cell(engine.new_array(length)?));
        }
    }
    Ok(Value::Cell(engine.new_array_from(args)?))
}

/// Array.prototype.push(...items)
pub fn array_push(engine: &mut Engine, this: Value, args: &[Value]) -> Result<Value, JsError> {
    let obj = engine.to_object(this)?;
    let mut length = f64::from(length_of(engine, obj)?);
    for item in args {
        let key = index_key(engine, length);
        engine.put_property(obj, key, *item, Value::Cell(obj), true)?;
        length += 1.0;
    }
    let length = Value::number(length);
    engine.put_property(obj, PropertyKey::Name(atom::LENGTH), length, Value::Cell(obj), true)?;
    Ok(length)
}

/// Array.prototype.join(separator)
pub fn array_join(engine: &mut Engine, this: Value, args: &[Value]) -> Result<Value, JsError> {
    let obj = engine.to_object(this)?;
    let length = length_of(engine, obj)?;
    let separator = match arg(args, 0) {
        Value::Undefined => JsString::from(","),
        sep => engine.to_js_string(sep)?,
    };
    let mut out = String::new();
    for i in 0..length {
        if i > 0 {
            out.push_str(separator.as_str());
        }
        let element = engine.get_property(obj, PropertyKey::Index(i), Value::Cell(obj))?;
        if !element.is_nullish() {
            out.push_str(engine.to_js_string(element)?.as_str());
        }
    }
    engine.new_string(out)
}

/// Array.prototype.toString: `join`, or `[object Class]` when there is none
pub fn array_to_string(engine: &mut Engine, this: Value, _args: &[Value]) -> Result<Value, JsError> {
    let obj = engine.to_object(this)?;
    let join_key = engine.key("join");
    let join = engine.get_property(obj, join_key, Value::Cell(obj))?;
    if engine.is_callable(join) {
        engine.call_value(join, Value::Cell(obj), &[])
    } else {
        super::object::object_to_string(engine, Value::Cell(obj), &[])
    }
}

/// Compare two defined elements with the user comparator, or by string
/// value in UTF-16 code unit order
fn compare_elements(
    engine: &mut Engine,
    comparator: Value,
    a: Value,
    b: Value,
) -> Result<Ordering, JsError> {
    if !comparator.is_undefined() {
        let result = engine.call_value(comparator, Value::Undefined, &[a, b])?;
        let n = engine.to_number(result)?;
        return Ok(if n < 0.0 {
            Ordering::Less
        } else if n > 0.0 {
            Ordering::Greater
        } else {
            Ordering::Equal
        });
    }
    let a = engine.to_js_string(a)?;
    let b = engine.to_js_string(b)?;
    Ok(a.as_str().encode_utf16().cmp(b.as_str().encode_utf16()))
}

/// Stable bottom-up merge sort with a comparator that may fail
fn merge_sort(
    engine: &mut Engine,
    comparator: Value,
    values: Vec<Value>,
) -> Result<Vec<Value>, JsError> {
    let n = values.len();
    let mut src = values;
    let mut dst = Vec::with_capacity(n);
    let mut width = 1;
    while width < n {
        dst.clear();
        let mut start = 0;
        while start < n {
            let mid = (start + width).min(n);
            let end = (start + 2 * width).min(n);
            let (mut i, mut j) = (start, mid);
            while i < mid && j < end {
                let (Some(&left), Some(&right)) = (src.get(i), src.get(j)) else {
                    break;
                };
                if compare_elements(engine, comparator, left, right)? != Ordering::Greater {
                    dst.push(left);
                    i += 1;
                } else {
                    dst.push(right);
                    j += 1;
                }
            }
            dst.extend(src.get(i..mid).unwrap_or_default());
            dst.extend(src.get(j..end).unwrap_or_default());
            start = end;
        }
        std::mem::swap(&mut src, &mut dst);
        width *= 2;
    }
    Ok(src)
}

/// Array.prototype.sort(comparefn): defined values in comparator order,
/// then `undefined`s, then holes
pub fn array_sort(engine: &mut Engine, this: Value, args: &[Value]) -> Result<Value, JsError> {
    let comparator = arg(args, 0);
    if !comparator.is_undefined() && !engine.is_callable(comparator) {
        return Err(JsError::type_error("sort comparator must be a function"));
    }
    let obj = engine.to_object(this)?;
    let length = length_of(engine, obj)?;

    // Present indices only; `length` may be far beyond the element count
    let mut present = BTreeSet::new();
    let mut holder = Some(obj);
    while let Some(current) = holder {
        present.extend(own_indices_below(engine, current, length)?);
        holder = engine.heap.object(current)?.prototype;
    }

    let mut defined = Vec::new();
    let mut undefined_count = 0u32;
    for i in present {
        let key = PropertyKey::Index(i);
        let value = engine.get_property(obj, key, Value::Cell(obj))?;
        if value.is_undefined() {
            undefined_count += 1;
        } else {
            engine.heap.pin(value);
            defined.push(value);
        }
    }

    let sorted = merge_sort(engine, comparator, defined)?;
    let mut index = 0u32;
    for value in sorted {
        engine.put_property(obj, PropertyKey::Index(index), value, Value::Cell(obj), true)?;
        index += 1;
    }
    for _ in 0..undefined_count {
        engine.put_property(obj, PropertyKey::Index(index), Value::Undefined, Value::Cell(obj), true)?;
        index += 1;
    }
    for hole in own_indices_below(engine, obj, length)? {
        if hole >= index {
            engine.delete_property(obj, PropertyKey::Index(hole), true)?;
        }
    }
    Ok(Value::Cell(obj))
}

/// Own index keys of `obj` under `length`, ascending
fn own_indices_below(engine: &Engine, obj: CellRef, length: u32) -> Result<Vec<u32>, JsError> {
    let mut indices: Vec<u32> = engine
        .own_keys(obj)?
        .into_iter()
        .filter_map(|(key, _)| match key {
            PropertyKey::Index(i) if i < length => Some(i),
            _ => None,
        })
        .collect();
    indices.sort_unstable();
    Ok(indices)
}
