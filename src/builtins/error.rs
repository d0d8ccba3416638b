//! `Error` and the native error constructors

use super::{arg, register_constructor, register_method, register_value};
use crate::atom;
use crate::engine::Engine;
use crate::error::{ErrorKind, JsError};
use crate::object::{ObjectClass, PropertyKey};
use crate::shape::Attributes;
use crate::value::Value;

const KINDS: [Option<ErrorKind>; 6] = [
    None,
    Some(ErrorKind::Type),
    Some(ErrorKind::Range),
    Some(ErrorKind::Reference),
    Some(ErrorKind::Syntax),
    Some(ErrorKind::Eval),
];

pub fn install(engine: &mut Engine) -> Result<(), JsError> {
    let base = engine.realm.error_prototype;
    register_method(engine, base, "toString", error_to_string, 0)?;

    for kind in KINDS {
        let proto = engine.realm.error_prototype(kind);
        let name = kind.map_or("Error", ErrorKind::name);
        let name_value = engine.new_string(name)?;
        register_value(engine, proto, "name", name_value)?;
        let empty = engine.new_string("")?;
        register_value(engine, proto, "message", empty)?;
        let ctor = constructor_for(kind);
        register_constructor(engine, name, ctor, ctor, 1, proto)?;
    }
    Ok(())
}

/// Shared body of every error constructor; callable with or without `new`
fn construct_error(
    engine: &mut Engine,
    kind: Option<ErrorKind>,
    args: &[Value],
) -> Result<Value, JsError> {
    let proto = engine.realm.error_prototype(kind);
    let error = engine.new_object_with(Some(proto), ObjectClass::Error)?;
    let message = arg(args, 0);
    if !message.is_undefined() {
        let message = engine.to_string_value(message)?;
        engine.define_data(error, atom::MESSAGE, message, Attributes::HIDDEN)?;
    }
    Ok(Value::Cell(error))
}

macro_rules! error_constructors {
    ($( $fn_name:ident => $kind:expr ),* $(,)?) => {
        $(
            pub fn $fn_name(
                engine: &mut Engine,
                _this: Value,
                args: &[Value],
            ) -> Result<Value, JsError> {
                construct_error(engine, $kind, args)
            }
        )*
    };
}

error_constructors! {
    error_constructor => None,
    type_error_constructor => Some(ErrorKind::Type),
    range_error_constructor => Some(ErrorKind::Range),
    reference_error_constructor => Some(ErrorKind::Reference),
    syntax_error_constructor => Some(ErrorKind::Syntax),
    eval_error_constructor => Some(ErrorKind::Eval),
}

fn constructor_for(kind: Option<ErrorKind>) -> crate::object::NativeFn {
    match kind {
        None => error_constructor,
        Some(ErrorKind::Type) => type_error_constructor,
        Some(ErrorKind::Range) => range_error_constructor,
        Some(ErrorKind::Reference) => reference_error_constructor,
        Some(ErrorKind::Syntax) => syntax_error_constructor,
        Some(ErrorKind::Eval) => eval_error_constructor,
    }
}

/// Error.prototype.toString: `name: message`, dropping whichever is empty
pub fn error_to_string(engine: &mut Engine, this: Value, _args: &[Value]) -> Result<Value, JsError> {
    let Some(obj) = this.as_object() else {
        return Err(JsError::type_error("Error.prototype.toString called on non-object"));
    };
    let name = engine.get_property(obj, PropertyKey::Name(atom::NAME), this)?;
    let name = if name.is_undefined() {
        "Error".to_string()
    } else {
        engine.to_js_string(name)?.as_str().to_string()
    };
    let message = engine.get_property(obj, PropertyKey::Name(atom::MESSAGE), this)?;
    let message = if message.is_undefined() {
        String::new()
    } else {
        engine.to_js_string(message)?.as_str().to_string()
    };
    let text = match (name.is_empty(), message.is_empty()) {
        (true, _) => message,
        (_, true) => name,
        _ => format!("{}: {}", name, message),
    };
    engine.new_string(text)
}
