//! Name resolution: globals, locals, scope chains and their errors

use super::{create_test_engine, eval, eval_string, eval_throws, program, run_value};
use esvm::{CodeBuilder, Op, Value};

#[test]
fn test_declared_global_var() {
    let mut engine = create_test_engine();
    let code = program(|b| {
        b.declare_var("x");
        b.emit_number(5.0)?;
        b.emit_name(Op::STORE_NAME, "x")?;
        b.emit(Op::POP_TOP);
        b.emit_name(Op::LOAD_NAME, "x")?;
        Ok(())
    });
    assert_eq!(run_value(&mut engine, &code), Value::Int32(5));
    assert_eq!(engine.get_global("x").unwrap(), Value::Int32(5));
}

#[test]
fn test_declared_var_starts_undefined() {
    let s = eval_string(|b| {
        b.declare_var("later");
        b.emit_name(Op::TYPEOF_NAME, "later")?;
        Ok(())
    });
    assert_eq!(s, "undefined");

    let (_, value) = eval(|b| {
        b.declare_var("later");
        b.emit_name(Op::LOAD_GLOBAL, "later")?;
        Ok(())
    });
    assert_eq!(value, Value::Undefined);
}

#[test]
fn test_unresolvable_load_is_reference_error() {
    let (name, message) = eval_throws(|b| {
        b.emit_name(Op::LOAD_NAME, "nowhere")?;
        Ok(())
    });
    assert_eq!(name, "ReferenceError");
    assert_eq!(message, "\"nowhere\" not defined");

    let (name, _) = eval_throws(|b| {
        b.emit_name(Op::LOAD_GLOBAL, "nowhere")?;
        Ok(())
    });
    assert_eq!(name, "ReferenceError");
}

#[test]
fn test_sloppy_store_creates_global() {
    let mut engine = create_test_engine();
    let code = program(|b| {
        b.emit_string("made")?;
        b.emit_name(Op::STORE_NAME, "implicit")?;
        Ok(())
    });
    let value = run_value(&mut engine, &code);
    assert_eq!(engine.string_contents(value).as_deref(), Some("made"));
    let global = engine.get_global("implicit").unwrap();
    assert_eq!(engine.string_contents(global).as_deref(), Some("made"));
}

#[test]
fn test_strict_store_to_unresolvable_throws() {
    for op in [Op::STORE_NAME, Op::STORE_GLOBAL] {
        let (name, message) = eval_throws(|b| {
            b.set_strict(true);
            b.emit_number(1.0)?;
            b.emit_name(op, "undeclared")?;
            Ok(())
        });
        assert_eq!(name, "ReferenceError");
        assert_eq!(
            message,
            "putting to unresolvable reference not allowed in strict reference"
        );
    }
}

#[test]
fn test_typeof_unresolvable_is_undefined() {
    for op in [Op::TYPEOF_NAME, Op::TYPEOF_GLOBAL] {
        let s = eval_string(|b| {
            b.emit_name(op, "nothing_here")?;
            Ok(())
        });
        assert_eq!(s, "undefined");
    }
}

#[test]
fn test_builtin_globals() {
    let s = eval_string(|b| {
        b.emit_name(Op::LOAD_GLOBAL, "NaN")?;
        b.emit(Op::TYPEOF);
        Ok(())
    });
    assert_eq!(s, "number");

    let s = eval_string(|b| {
        b.emit_name(Op::TYPEOF_GLOBAL, "Object")?;
        Ok(())
    });
    assert_eq!(s, "function");

    let (_, value) = eval(|b| {
        b.emit_name(Op::LOAD_GLOBAL, "undefined")?;
        Ok(())
    });
    assert_eq!(value, Value::Undefined);
}

#[test]
fn test_locals_in_program_code() {
    let (_, value) = eval(|b| {
        let t = b.add_local("t")?;
        b.emit_number(20.0)?;
        b.emit_with(Op::STORE_LOCAL, t);
        b.emit(Op::POP_TOP);
        b.emit_with(Op::INCREMENT_LOCAL, t);
        b.emit(Op::POP_TOP);
        b.emit_with(Op::LOAD_LOCAL, t);
        b.emit_with(Op::LOAD_LOCAL, t);
        b.emit(Op::BINARY_ADD);
        Ok(())
    });
    assert_eq!(value, Value::Int32(42));
}

#[test]
fn test_postfix_increment_returns_old_value() {
    // i = "1"; i++ + i
    let (_, value) = eval(|b| {
        b.declare_var("i");
        b.emit_string("1")?;
        b.emit_name(Op::STORE_NAME, "i")?;
        b.emit(Op::POP_TOP);
        b.emit_name(Op::POSTFIX_INCREMENT_NAME, "i")?;
        b.emit_name(Op::LOAD_NAME, "i")?;
        b.emit(Op::BINARY_ADD);
        Ok(())
    });
    assert_eq!(value, Value::Int32(3));

    let (_, value) = eval(|b| {
        b.declare_var("g");
        b.emit_number(10.0)?;
        b.emit_name(Op::STORE_GLOBAL, "g")?;
        b.emit(Op::POP_TOP);
        b.emit_name(Op::DECREMENT_GLOBAL, "g")?;
        b.emit_name(Op::POSTFIX_DECREMENT_GLOBAL, "g")?;
        b.emit(Op::BINARY_ADD);
        b.emit_name(Op::LOAD_GLOBAL, "g")?;
        b.emit(Op::BINARY_ADD);
        Ok(())
    });
    // 9 + 9 + 8
    assert_eq!(value, Value::Int32(26));
}

#[test]
fn test_delete_names() {
    // Implicit globals are configurable
    let s = eval_string(|b| {
        b.emit_number(1.0)?;
        b.emit_name(Op::STORE_NAME, "temp")?;
        b.emit(Op::POP_TOP);
        b.emit_name(Op::DELETE_NAME, "temp")?;
        b.emit(Op::POP_TOP);
        b.emit_name(Op::TYPEOF_NAME, "temp")?;
        Ok(())
    });
    assert_eq!(s, "undefined");

    // Declared vars are not
    let (_, value) = eval(|b| {
        b.declare_var("kept");
        b.emit_name(Op::DELETE_NAME, "kept")?;
        Ok(())
    });
    assert_eq!(value, Value::Boolean(false));

    let (_, value) = eval(|b| {
        b.emit_name(Op::DELETE_GLOBAL, "never_existed")?;
        Ok(())
    });
    assert_eq!(value, Value::Boolean(true));
}

#[test]
fn test_program_this_is_global_object() {
    let mut engine = create_test_engine();
    let code = program(|b| {
        b.emit(Op::PUSH_THIS);
        Ok(())
    });
    let this = run_value(&mut engine, &code);
    assert_eq!(this, engine.global_object());
}

#[test]
fn test_function_declarations_are_hoisted() {
    let mut engine = create_test_engine();
    let mut b = CodeBuilder::global();
    let answer = super::function("answer", &[], |f| {
        f.emit_number(42.0)?;
        f.emit(Op::RETURN);
        Ok(())
    });
    b.declare_function("answer", answer).unwrap();
    b.emit_name(Op::CALL_NAME, "answer").unwrap();
    b.emit_with(Op::CALL, 0);
    b.emit(Op::POP_TOP_AND_RET);
    b.emit(Op::STOP_CODE);
    let code = b.finish().unwrap();
    assert_eq!(run_value(&mut engine, &code), Value::Int32(42));
}
