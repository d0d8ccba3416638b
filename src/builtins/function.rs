//! `Function.prototype`

use super::{arg, register_method};
use crate::atom;
use crate::engine::Engine;
use crate::error::JsError;
use crate::object::PropertyKey;
use crate::shape::Attributes;
use crate::value::Value;

pub fn install(engine: &mut Engine) -> Result<(), JsError> {
    let proto = engine.realm.function_prototype;
    engine.define_data(proto, atom::LENGTH, Value::Int32(0), Attributes::NONE)?;
    register_method(engine, proto, "call", function_call, 1)?;
    register_method(engine, proto, "apply", function_apply, 2)?;
    Ok(())
}

/// `Function.prototype` itself: accepts anything, returns `undefined`
pub fn empty(_engine: &mut Engine, _this: Value, _args: &[Value]) -> Result<Value, JsError> {
    Ok(Value::Undefined)
}

/// Function.prototype.call(thisArg, ...args)
pub fn function_call(engine: &mut Engine, this: Value, args: &[Value]) -> Result<Value, JsError> {
    if !engine.is_callable(this) {
        return Err(JsError::type_error("Function.prototype.call is not generic"));
    }
    let rest = args.get(1..).unwrap_or_default();
    engine.call_value(this, arg(args, 0), rest)
}

/// Function.prototype.apply(thisArg, argArray)
pub fn function_apply(engine: &mut Engine, this: Value, args: &[Value]) -> Result<Value, JsError> {
    if !engine.is_callable(this) {
        return Err(JsError::type_error("Function.prototype.apply is not generic"));
    }
    let list = arg(args, 1);
    if list.is_nullish() {
        return engine.call_value(this, arg(args, 0), &[]);
    }
    let Some(array_like) = list.as_object() else {
        return Err(JsError::type_error("apply requires an array-like argument list"));
    };
    let length = engine.get_property(array_like, PropertyKey::Name(atom::LENGTH), list)?;
    let length = engine.to_uint32(length)?;
    let mut spread = Vec::with_capacity(length.min(1024) as usize);
    for i in 0..length {
        let value = engine.get_property(array_like, PropertyKey::Index(i), list)?;
        engine.heap.pin(value);
        spread.push(value);
    }
    engine.call_value(this, arg(args, 0), &spread)
}
