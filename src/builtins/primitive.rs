//! `String`, `Number` and `Boolean` with their wrapper objects

use super::{arg, register_constructor, register_method};
use crate::engine::Engine;
use crate::error::JsError;
use crate::object::ObjectClass;
use crate::value::{JsString, Value, number_to_string};

pub fn install(engine: &mut Engine) -> Result<(), JsError> {
    let string_proto = engine.realm.string_prototype;
    register_method(engine, string_proto, "toString", string_value_of, 0)?;
    register_method(engine, string_proto, "valueOf", string_value_of, 0)?;
    register_constructor(engine, "String", string_call, string_construct, 1, string_proto)?;

    let number_proto = engine.realm.number_prototype;
    register_method(engine, number_proto, "toString", number_to_string_method, 1)?;
    register_method(engine, number_proto, "valueOf", number_value_of, 0)?;
    register_constructor(engine, "Number", number_call, number_construct, 1, number_proto)?;

    let boolean_proto = engine.realm.boolean_prototype;
    register_method(engine, boolean_proto, "toString", boolean_to_string, 0)?;
    register_method(engine, boolean_proto, "valueOf", boolean_value_of, 0)?;
    register_constructor(engine, "Boolean", boolean_call, boolean_construct, 1, boolean_proto)?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// String
// ═══════════════════════════════════════════════════════════════════════════════

fn string_arg(engine: &mut Engine, args: &[Value]) -> Result<JsString, JsError> {
    match args.first() {
        Some(v) => engine.to_js_string(*v),
        None => Ok(JsString::from("")),
    }
}

pub fn string_call(engine: &mut Engine, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    let s = string_arg(engine, args)?;
    engine.new_string(s)
}

pub fn string_construct(engine: &mut Engine, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    let s = string_arg(engine, args)?;
    let proto = engine.realm.string_prototype;
    Ok(Value::Cell(engine.new_object_with(Some(proto), ObjectClass::String(s))?))
}

/// String.prototype.toString and valueOf
pub fn string_value_of(engine: &mut Engine, this: Value, _args: &[Value]) -> Result<Value, JsError> {
    if this.is_string() {
        return Ok(this);
    }
    let wrapped = match this.as_object() {
        Some(obj) => match &engine.heap.object(obj)?.class {
            ObjectClass::String(s) => Some(s.clone()),
            _ => None,
        },
        None => None,
    };
    match wrapped {
        Some(s) => engine.new_string(s),
        None => Err(JsError::type_error("String.prototype.valueOf is not generic")),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Number
// ═══════════════════════════════════════════════════════════════════════════════

fn number_arg(engine: &mut Engine, args: &[Value]) -> Result<Value, JsError> {
    match args.first() {
        Some(v) => engine.to_numeric(*v),
        None => Ok(Value::Int32(0)),
    }
}

pub fn number_call(engine: &mut Engine, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    number_arg(engine, args)
}

pub fn number_construct(engine: &mut Engine, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    let n = number_arg(engine, args)?.as_number().unwrap_or(f64::NAN);
    let proto = engine.realm.number_prototype;
    Ok(Value::Cell(engine.new_object_with(Some(proto), ObjectClass::Number(n))?))
}

fn this_number(engine: &Engine, this: Value) -> Result<f64, JsError> {
    if let Some(n) = this.as_number() {
        return Ok(n);
    }
    if let Some(obj) = this.as_object() {
        if let ObjectClass::Number(n) = engine.heap.object(obj)?.class {
            return Ok(n);
        }
    }
    Err(JsError::type_error("Number.prototype.valueOf is not generic"))
}

pub fn number_value_of(engine: &mut Engine, this: Value, _args: &[Value]) -> Result<Value, JsError> {
    Ok(Value::number(this_number(engine, this)?))
}

/// Number.prototype.toString(radix)
pub fn number_to_string_method(
    engine: &mut Engine,
    this: Value,
    args: &[Value],
) -> Result<Value, JsError> {
    let n = this_number(engine, this)?;
    let radix = match arg(args, 0) {
        Value::Undefined => 10,
        r => engine.to_int32(r)?,
    };
    if !(2..=36).contains(&radix) {
        return Err(JsError::range_error("toString() radix must be between 2 and 36"));
    }
    let text = if radix == 10 || !n.is_finite() {
        number_to_string(n)
    } else {
        to_radix_string(n, radix as u32)
    };
    engine.new_string(text)
}

/// Digits of a finite number in a non-decimal radix; fractions are cut off
/// after 52 digits
fn to_radix_string(n: f64, radix: u32) -> String {
    let negative = n < 0.0;
    let n = n.abs();
    let mut integer = n.trunc();
    let mut fraction = n - integer;

    let mut digits = Vec::new();
    loop {
        let d = (integer % f64::from(radix)) as u32;
        digits.push(std::char::from_digit(d, radix).unwrap_or('0'));
        integer = (integer / f64::from(radix)).trunc();
        if integer < 1.0 {
            break;
        }
    }
    let mut out = String::with_capacity(digits.len() + 2);
    if negative {
        out.push('-');
    }
    out.extend(digits.iter().rev());
    if fraction > 0.0 {
        out.push('.');
        for _ in 0..52 {
            fraction *= f64::from(radix);
            let d = fraction.trunc();
            out.push(std::char::from_digit(d as u32, radix).unwrap_or('0'));
            fraction -= d;
            if fraction <= 0.0 {
                break;
            }
        }
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════════════
// Boolean
// ═══════════════════════════════════════════════════════════════════════════════

pub fn boolean_call(engine: &mut Engine, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    Ok(Value::Boolean(arg(args, 0).to_boolean(&engine.heap)))
}

pub fn boolean_construct(engine: &mut Engine, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    let b = arg(args, 0).to_boolean(&engine.heap);
    let proto = engine.realm.boolean_prototype;
    Ok(Value::Cell(engine.new_object_with(Some(proto), ObjectClass::Boolean(b))?))
}

fn this_boolean(engine: &Engine, this: Value) -> Result<bool, JsError> {
    if let Value::Boolean(b) = this {
        return Ok(b);
    }
    if let Some(obj) = this.as_object() {
        if let ObjectClass::Boolean(b) = engine.heap.object(obj)?.class {
            return Ok(b);
        }
    }
    Err(JsError::type_error("Boolean.prototype.valueOf is not generic"))
}

pub fn boolean_value_of(engine: &mut Engine, this: Value, _args: &[Value]) -> Result<Value, JsError> {
    Ok(Value::Boolean(this_boolean(engine, this)?))
}

pub fn boolean_to_string(engine: &mut Engine, this: Value, _args: &[Value]) -> Result<Value, JsError> {
    let b = this_boolean(engine, this)?;
    engine.new_string(if b { "true" } else { "false" })
}
