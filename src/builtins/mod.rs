//! The native library the VM itself relies on.
//!
//! Only what the execution core needs to be observable and testable is
//! provided: conversions go through `valueOf`/`toString`, failures surface as
//! error objects, `eval` reaches the engine, and hosts can see functions.

pub mod array;
pub mod error;
pub mod function;
pub mod global;
pub mod object;
pub mod primitive;

use crate::atom::{self, Atom};
use crate::engine::Engine;
use crate::error::JsError;
use crate::gc::CellRef;
use crate::object::NativeFn;
use crate::shape::Attributes;
use crate::value::Value;

/// Populate the realm's intrinsics and the global object
pub fn install(engine: &mut Engine) -> Result<(), JsError> {
    global::install(engine)?;
    object::install(engine)?;
    function::install(engine)?;
    array::install(engine)?;
    primitive::install(engine)?;
    error::install(engine)?;
    Ok(())
}

/// Argument `index`, `undefined` when missing
#[inline]
pub(crate) fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).copied().unwrap_or_default()
}

/// Add a native method to `target` as a writable, configurable,
/// non-enumerable property
pub(crate) fn register_method(
    engine: &mut Engine,
    target: CellRef,
    name: &str,
    call: NativeFn,
    arity: usize,
) -> Result<CellRef, JsError> {
    let function = engine.new_native_function(name, call, None, arity)?;
    let atom = engine.intern(name);
    engine.define_data(target, atom, Value::Cell(function), Attributes::HIDDEN)?;
    Ok(function)
}

/// Add a non-enumerable data property
pub(crate) fn register_value(
    engine: &mut Engine,
    target: CellRef,
    name: &str,
    value: Value,
) -> Result<(), JsError> {
    let atom = engine.intern(name);
    engine.define_data(target, atom, value, Attributes::HIDDEN)
}

/// Global constructor tied to an existing prototype object
pub(crate) fn register_constructor(
    engine: &mut Engine,
    name: &str,
    call: NativeFn,
    construct: NativeFn,
    arity: usize,
    prototype: CellRef,
) -> Result<CellRef, JsError> {
    let ctor = engine.new_native_function(name, call, Some(construct), arity)?;
    engine.define_data(ctor, atom::PROTOTYPE, Value::Cell(prototype), Attributes::NONE)?;
    engine.define_data(prototype, atom::CONSTRUCTOR, Value::Cell(ctor), Attributes::HIDDEN)?;
    let global = engine.realm.global;
    let name: Atom = engine.intern(name);
    engine.define_data(global, name, Value::Cell(ctor), Attributes::HIDDEN)?;
    Ok(ctor)
}
