//! `Object` and `Object.prototype`

use super::{arg, register_constructor, register_method};
use crate::atom;
use crate::engine::Engine;
use crate::error::JsError;
use crate::gc::CellRef;
use crate::object::{PropertyDescriptor, PropertyKey};
use crate::shape::Attributes;
use crate::value::Value;

pub fn install(engine: &mut Engine) -> Result<(), JsError> {
    let proto = engine.realm.object_prototype;
    register_method(engine, proto, "toString", object_to_string, 0)?;
    register_method(engine, proto, "valueOf", object_value_of, 0)?;
    register_method(engine, proto, "hasOwnProperty", object_has_own_property, 1)?;

    let ctor = register_constructor(engine, "Object", object_constructor, object_constructor, 1, proto)?;
    register_method(engine, ctor, "defineProperty", object_define_property, 3)?;
    register_method(
        engine,
        ctor,
        "getOwnPropertyDescriptor",
        object_get_own_property_descriptor,
        2,
    )?;
    register_method(engine, ctor, "getPrototypeOf", object_get_prototype_of, 1)?;
    register_method(engine, ctor, "keys", object_keys, 1)?;
    Ok(())
}

fn require_object(value: Value, method: &str) -> Result<CellRef, JsError> {
    value
        .as_object()
        .ok_or_else(|| JsError::type_error(format!("Object.{} called on non-object", method)))
}

/// `Object(value)` and `new Object(value)`
pub fn object_constructor(engine: &mut Engine, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    let value = arg(args, 0);
    if value.is_nullish() {
        return Ok(Value::Cell(engine.new_object()?));
    }
    Ok(Value::Cell(engine.to_object(value)?))
}

/// Object.prototype.toString: `[object Class]`
pub fn object_to_string(engine: &mut Engine, this: Value, _args: &[Value]) -> Result<Value, JsError> {
    let class = match this {
        Value::Undefined => "Undefined",
        Value::Null => "Null",
        _ => {
            let obj = engine.to_object(this)?;
            engine.heap.object(obj)?.class.name()
        }
    };
    engine.new_string(format!("[object {}]", class))
}

pub fn object_value_of(engine: &mut Engine, this: Value, _args: &[Value]) -> Result<Value, JsError> {
    Ok(Value::Cell(engine.to_object(this)?))
}

pub fn object_has_own_property(
    engine: &mut Engine,
    this: Value,
    args: &[Value],
) -> Result<Value, JsError> {
    let key = engine.to_property_key(arg(args, 0))?;
    let obj = engine.to_object(this)?;
    let found = engine.own_property(obj, key)?.is_some();
    Ok(Value::Boolean(found))
}

/// ToPropertyDescriptor on an attributes object
fn to_property_descriptor(engine: &mut Engine, attributes: Value) -> Result<PropertyDescriptor, JsError> {
    let Some(obj) = attributes.as_object() else {
        return Err(JsError::type_error("property description must be an object"));
    };
    let field = |engine: &mut Engine, name| -> Result<Option<Value>, JsError> {
        let key = PropertyKey::Name(name);
        if engine.has_property(obj, key)? {
            let value = engine.get_property(obj, key, attributes)?;
            engine.heap.pin(value);
            Ok(Some(value))
        } else {
            Ok(None)
        }
    };
    let enumerable = field(engine, atom::ENUMERABLE)?;
    let configurable = field(engine, atom::CONFIGURABLE)?;
    let value = field(engine, atom::VALUE)?;
    let writable = field(engine, atom::WRITABLE)?;
    let get = field(engine, atom::GET)?;
    let set = field(engine, atom::SET)?;

    for accessor in [get, set].into_iter().flatten() {
        if !accessor.is_undefined() && !engine.is_callable(accessor) {
            return Err(JsError::type_error("property accessor must be a function"));
        }
    }
    let desc = PropertyDescriptor {
        value,
        writable: writable.map(|v| v.to_boolean(&engine.heap)),
        get,
        set,
        enumerable: enumerable.map(|v| v.to_boolean(&engine.heap)),
        configurable: configurable.map(|v| v.to_boolean(&engine.heap)),
    };
    if desc.is_accessor() && desc.is_data() {
        return Err(JsError::type_error(
            "property description must not mix accessors with a value or writable",
        ));
    }
    Ok(desc)
}

/// Descriptor object for `Object.getOwnPropertyDescriptor`
fn from_property_descriptor(engine: &mut Engine, desc: PropertyDescriptor) -> Result<Value, JsError> {
    let obj = engine.new_object()?;
    let put = |engine: &mut Engine, name, value| {
        engine.define_data(obj, name, value, Attributes::DEFAULT)
    };
    if desc.is_accessor() {
        put(engine, atom::GET, desc.get.unwrap_or_default())?;
        put(engine, atom::SET, desc.set.unwrap_or_default())?;
    } else {
        put(engine, atom::VALUE, desc.value.unwrap_or_default())?;
        put(engine, atom::WRITABLE, Value::Boolean(desc.writable.unwrap_or(false)))?;
    }
    put(engine, atom::ENUMERABLE, Value::Boolean(desc.enumerable.unwrap_or(false)))?;
    put(engine, atom::CONFIGURABLE, Value::Boolean(desc.configurable.unwrap_or(false)))?;
    Ok(Value::Cell(obj))
}

/// Object.defineProperty(o, p, attributes)
pub fn object_define_property(
    engine: &mut Engine,
    _this: Value,
    args: &[Value],
) -> Result<Value, JsError> {
    let target = arg(args, 0);
    let obj = require_object(target, "defineProperty")?;
    let key = engine.to_property_key(arg(args, 1))?;
    let desc = to_property_descriptor(engine, arg(args, 2))?;
    engine.define_own_property(obj, key, desc, true)?;
    Ok(target)
}

/// Object.getOwnPropertyDescriptor(o, p)
pub fn object_get_own_property_descriptor(
    engine: &mut Engine,
    _this: Value,
    args: &[Value],
) -> Result<Value, JsError> {
    let obj = require_object(arg(args, 0), "getOwnPropertyDescriptor")?;
    let key = engine.to_property_key(arg(args, 1))?;
    match engine.own_descriptor(obj, key)? {
        Some(desc) => from_property_descriptor(engine, desc),
        None => Ok(Value::Undefined),
    }
}

/// Object.getPrototypeOf(o)
pub fn object_get_prototype_of(
    engine: &mut Engine,
    _this: Value,
    args: &[Value],
) -> Result<Value, JsError> {
    let obj = require_object(arg(args, 0), "getPrototypeOf")?;
    Ok(engine
        .heap
        .object(obj)?
        .prototype
        .map_or(Value::Null, Value::Cell))
}

/// Object.keys(o): own enumerable keys in enumeration order
pub fn object_keys(engine: &mut Engine, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    let obj = require_object(arg(args, 0), "keys")?;
    let keys = engine.own_keys(obj)?;
    let mut names = Vec::with_capacity(keys.len());
    for (key, enumerable) in keys {
        if enumerable {
            let name = engine.key_to_value(key)?;
            names.push(name);
        }
    }
    Ok(Value::Cell(engine.new_array_from(&names)?))
}
