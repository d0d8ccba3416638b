//! throw, try/catch, finally subroutines and unwinding across frames

use super::{create_test_engine, eval, eval_string, function, program, run_value};
use esvm::{CodeBuilder, Completion, HandlerKind, JsError, Op, Value};

/// `try { <body> } catch (e) { r = <handler> }; r` with `r` in a local
fn try_catch(
    b: &mut CodeBuilder,
    body: impl FnOnce(&mut CodeBuilder) -> Result<(), JsError>,
    handler: impl FnOnce(&mut CodeBuilder) -> Result<(), JsError>,
) -> Result<(), JsError> {
    let r = b.add_local("r")?;
    let begin = b.new_label();
    let catch = b.new_label();
    let after = b.new_label();
    b.bind(begin);
    body(b)?;
    b.emit_jump(Op::JUMP_ABSOLUTE, after);
    b.bind(catch);
    b.emit_name(Op::TRY_CATCH_SETUP, "e")?;
    handler(b)?;
    b.emit_with(Op::STORE_LOCAL, r);
    b.emit(Op::POP_TOP);
    b.emit(Op::POP_ENV);
    b.bind(after);
    b.add_handler(HandlerKind::Catch, begin, catch, 0, 0);
    b.emit_with(Op::LOAD_LOCAL, r);
    Ok(())
}

#[test]
fn test_catch_thrown_value() {
    let s = eval_string(|b| {
        try_catch(
            b,
            |b| {
                b.emit_string("boom")?;
                b.emit(Op::THROW);
                Ok(())
            },
            |b| {
                b.emit_name(Op::LOAD_NAME, "e")?;
                b.emit_string("!")?;
                b.emit(Op::BINARY_ADD);
                Ok(())
            },
        )
    });
    assert_eq!(s, "boom!");
}

#[test]
fn test_catch_runtime_error() {
    let (_, value) = eval(|b| {
        try_catch(
            b,
            |b| {
                b.emit(Op::PUSH_NULL);
                b.emit_name(Op::LOAD_PROP, "x")?;
                b.emit(Op::POP_TOP);
                Ok(())
            },
            |b| {
                b.emit_name(Op::LOAD_NAME, "e")?;
                b.emit_name(Op::LOAD_GLOBAL, "TypeError")?;
                b.emit(Op::BINARY_INSTANCEOF);
                Ok(())
            },
        )
    });
    assert_eq!(value, Value::Boolean(true));
}

#[test]
fn test_catch_restores_operand_stack() {
    // 40 + (try { 1, 2, throw 2 } catch (e) { e }) with the row keeping one value
    let (_, value) = eval(|b| {
        let r = b.add_local("r")?;
        let begin = b.new_label();
        let catch = b.new_label();
        b.emit_number(40.0)?;
        b.bind(begin);
        b.emit_number(1.0)?;
        b.emit_number(2.0)?;
        b.emit(Op::THROW);
        b.bind(catch);
        b.emit_with(Op::STORE_LOCAL, r);
        b.emit(Op::POP_TOP);
        b.add_handler(HandlerKind::Catch, begin, catch, 1, 0);
        b.emit_with(Op::LOAD_LOCAL, r);
        b.emit(Op::BINARY_ADD);
        Ok(())
    });
    assert_eq!(value, Value::Int32(42));
}

#[test]
fn test_catch_scope_is_dropped_after_with() {
    // try { with ({x: 1}) { throw 0 } } catch (e) {} typeof x
    let s = eval_string(|b| {
        try_catch(
            b,
            |b| {
                b.emit(Op::BUILD_OBJECT);
                b.emit_number(1.0)?;
                b.emit_name(Op::STORE_OBJECT_DATA, "x")?;
                b.emit(Op::WITH_SETUP);
                b.emit_number(0.0)?;
                b.emit(Op::THROW);
                Ok(())
            },
            |b| {
                b.emit(Op::PUSH_UNDEFINED);
                Ok(())
            },
        )?;
        b.emit(Op::POP_TOP);
        b.emit_name(Op::TYPEOF_NAME, "x")?;
        Ok(())
    });
    assert_eq!(s, "undefined");
}

#[test]
fn test_finally_runs_on_normal_exit() {
    // r = 10; try { r = r * 2 } finally { r++ }; r
    let (_, value) = eval(|b| {
        let r = b.add_local("r")?;
        let begin = b.new_label();
        let fin = b.new_label();
        let after = b.new_label();
        b.emit_number(10.0)?;
        b.emit_with(Op::STORE_LOCAL, r);
        b.emit(Op::POP_TOP);
        b.bind(begin);
        b.emit_with(Op::LOAD_LOCAL, r);
        b.emit_number(2.0)?;
        b.emit(Op::BINARY_MULTIPLY);
        b.emit_with(Op::STORE_LOCAL, r);
        b.emit(Op::POP_TOP);
        b.emit_jump(Op::JUMP_SUBROUTINE, fin);
        b.emit_jump(Op::JUMP_ABSOLUTE, after);
        b.bind(fin);
        b.emit_with(Op::INCREMENT_LOCAL, r);
        b.emit(Op::POP_TOP);
        b.emit(Op::RETURN_SUBROUTINE);
        b.bind(after);
        b.add_handler(HandlerKind::Finally, begin, fin, 0, 0);
        b.emit_with(Op::LOAD_LOCAL, r);
        Ok(())
    });
    assert_eq!(value, Value::Int32(21));
}

#[test]
fn test_finally_rethrows_after_running() {
    // try { throw "boom" } finally { ran = true }
    let mut engine = create_test_engine();
    let code = program(|b| {
        let begin = b.new_label();
        let fin = b.new_label();
        let after = b.new_label();
        b.bind(begin);
        b.emit_string("boom")?;
        b.emit(Op::THROW);
        b.emit_jump(Op::JUMP_SUBROUTINE, fin);
        b.emit_jump(Op::JUMP_ABSOLUTE, after);
        b.bind(fin);
        b.emit(Op::PUSH_TRUE);
        b.emit_name(Op::STORE_NAME, "ran")?;
        b.emit(Op::POP_TOP);
        b.emit(Op::RETURN_SUBROUTINE);
        b.bind(after);
        b.add_handler(HandlerKind::Finally, begin, fin, 0, 0);
        b.emit(Op::PUSH_UNDEFINED);
        Ok(())
    });
    let Completion::Throw(error) = engine.run(&code).unwrap() else {
        panic!("expected the exception to escape");
    };
    assert_eq!(engine.string_contents(error).as_deref(), Some("boom"));
    assert_eq!(engine.get_global("ran").unwrap(), Value::Boolean(true));
}

#[test]
fn test_nested_finally_then_catch() {
    // try { try { throw "boom" } finally { r++ } } catch (e) { c = e }; c + r
    let s = eval_string(|b| {
        let r = b.add_local("r")?;
        let c = b.add_local("c")?;
        let outer = b.new_label();
        let inner = b.new_label();
        let fin = b.new_label();
        let inner_after = b.new_label();
        let catch = b.new_label();
        let after = b.new_label();

        b.emit_number(0.0)?;
        b.emit_with(Op::STORE_LOCAL, r);
        b.emit(Op::POP_TOP);
        b.bind(outer);
        b.bind(inner);
        b.emit_string("boom")?;
        b.emit(Op::THROW);
        b.emit_jump(Op::JUMP_SUBROUTINE, fin);
        b.emit_jump(Op::JUMP_ABSOLUTE, inner_after);
        b.bind(fin);
        b.emit_with(Op::INCREMENT_LOCAL, r);
        b.emit(Op::POP_TOP);
        b.emit(Op::RETURN_SUBROUTINE);
        b.bind(inner_after);
        b.emit_jump(Op::JUMP_ABSOLUTE, after);
        b.bind(catch);
        b.emit_name(Op::TRY_CATCH_SETUP, "e")?;
        b.emit_name(Op::LOAD_NAME, "e")?;
        b.emit_with(Op::STORE_LOCAL, c);
        b.emit(Op::POP_TOP);
        b.emit(Op::POP_ENV);
        b.bind(after);
        b.add_handler(HandlerKind::Finally, inner, fin, 0, 0);
        b.add_handler(HandlerKind::Catch, outer, catch, 0, 0);
        b.emit_with(Op::LOAD_LOCAL, c);
        b.emit_with(Op::LOAD_LOCAL, r);
        b.emit(Op::BINARY_ADD);
        Ok(())
    });
    assert_eq!(s, "boom1");
}

#[test]
fn test_return_runs_finally() {
    // function f() { try { return 1 } finally { count++ } }
    let f = function("f", &[], |f| {
        let begin = f.new_label();
        let fin = f.new_label();
        f.bind(begin);
        f.emit_number(1.0)?;
        f.emit_jump(Op::JUMP_RETURN_HOOKED_SUBROUTINE, fin);
        f.emit(Op::RETURN);
        f.bind(fin);
        f.emit_name(Op::INCREMENT_GLOBAL, "count")?;
        f.emit(Op::POP_TOP);
        f.emit(Op::RETURN_SUBROUTINE);
        f.add_handler(HandlerKind::Finally, begin, fin, 0, 0);
        Ok(())
    });
    let mut engine = create_test_engine();
    let code = program(move |b| {
        b.declare_var("count");
        let index = b.add_code(f)?;
        b.emit_number(0.0)?;
        b.emit_name(Op::STORE_NAME, "count")?;
        b.emit(Op::POP_TOP);
        b.emit_with(Op::BUILD_FUNCTION, index);
        b.emit(Op::PUSH_UNDEFINED);
        b.emit_with(Op::CALL, 0);
        Ok(())
    });
    assert_eq!(run_value(&mut engine, &code), Value::Int32(1));
    // The finally block ran exactly once
    assert_eq!(engine.get_global("count").unwrap(), Value::Int32(1));
}

#[test]
fn test_exception_unwinds_callee_frames() {
    // function thrower() { throw new RangeError("bad") }
    // try { thrower() } catch (e) { e.name + ": " + e.message }
    let thrower = function("thrower", &[], |f| {
        f.emit_name(Op::LOAD_GLOBAL, "RangeError")?;
        f.emit(Op::PUSH_UNDEFINED);
        f.emit_string("bad")?;
        f.emit_with(Op::CONSTRUCT, 1);
        f.emit(Op::THROW);
        Ok(())
    });
    let s = eval_string(move |b| {
        b.declare_function("thrower", thrower)?;
        try_catch(
            b,
            |b| {
                b.emit_name(Op::CALL_GLOBAL, "thrower")?;
                b.emit_with(Op::CALL, 0);
                b.emit(Op::POP_TOP);
                Ok(())
            },
            |b| {
                b.emit_name(Op::LOAD_NAME, "e")?;
                b.emit_name(Op::LOAD_PROP, "name")?;
                b.emit_string(": ")?;
                b.emit(Op::BINARY_ADD);
                b.emit_name(Op::LOAD_NAME, "e")?;
                b.emit_name(Op::LOAD_PROP, "message")?;
                b.emit(Op::BINARY_ADD);
                Ok(())
            },
        )
    });
    assert_eq!(s, "RangeError: bad");
}

#[test]
fn test_exception_from_getter_is_catchable() {
    let getter = function("bad", &[], |f| {
        f.emit_string("from getter")?;
        f.emit(Op::THROW);
        Ok(())
    });
    let s = eval_string(move |b| {
        let index = b.add_code(getter)?;
        try_catch(
            b,
            |b| {
                b.emit(Op::BUILD_OBJECT);
                b.emit_with(Op::BUILD_FUNCTION, index);
                b.emit_name(Op::STORE_OBJECT_GET, "bad")?;
                b.emit_name(Op::LOAD_PROP, "bad")?;
                b.emit(Op::POP_TOP);
                Ok(())
            },
            |b| {
                b.emit_name(Op::LOAD_NAME, "e")?;
                Ok(())
            },
        )
    });
    assert_eq!(s, "from getter");
}

#[test]
fn test_uncaught_error_completion() {
    let mut engine = create_test_engine();
    let code = program(|b| {
        b.emit_name(Op::LOAD_NAME, "missing")?;
        Ok(())
    });
    let completion = engine.run(&code).unwrap();
    assert!(completion.is_throw());
    let text = engine.to_display_string(completion.value()).unwrap();
    assert_eq!(text, "ReferenceError: \"missing\" not defined");
}

#[test]
fn test_malformed_code_is_internal_error() {
    let mut code = program(|b| {
        b.emit(Op::PUSH_UNDEFINED);
        Ok(())
    });
    code.instructions = vec![Op::LOAD_NAME as u8, 7, 0, Op::STOP_CODE as u8];
    let mut engine = create_test_engine();
    assert!(matches!(engine.run(&code), Err(JsError::Internal(_))));
}
