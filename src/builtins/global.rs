//! Value properties of the global object and `eval`

use super::arg;
use crate::atom;
use crate::engine::Engine;
use crate::error::JsError;
use crate::shape::Attributes;
use crate::value::Value;

pub fn install(engine: &mut Engine) -> Result<(), JsError> {
    let global = engine.realm.global;
    engine.define_data(global, atom::UNDEFINED, Value::Undefined, Attributes::NONE)?;
    engine.define_data(global, atom::NAN, Value::Double(f64::NAN), Attributes::NONE)?;
    engine.define_data(
        global,
        atom::INFINITY,
        Value::Double(f64::INFINITY),
        Attributes::NONE,
    )?;

    let eval = engine.realm.eval_function;
    engine.define_data(eval, atom::LENGTH, Value::Int32(1), Attributes::NONE)?;
    let name = engine.new_string("eval")?;
    engine.define_data(eval, atom::NAME, name, Attributes::NONE)?;
    engine.define_data(global, atom::EVAL, Value::Cell(eval), Attributes::HIDDEN)?;
    Ok(())
}

/// `eval` reached other than by a direct call: the code runs in the global
/// scope
pub fn indirect_eval(engine: &mut Engine, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    engine.eval_source(arg(args, 0), false)
}
