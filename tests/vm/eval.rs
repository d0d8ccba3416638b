//! Direct and indirect eval through a host-supplied compiler

use super::{create_test_engine, error_parts, function, program, run_value};
use esvm::{Code, CodeBuilder, Completion, Engine, EvalCompiler, JsError, Op, Value};

/// Knows a handful of fixed sources
struct TableCompiler;

impl EvalCompiler for TableCompiler {
    fn compile_eval(&self, source: &str, strict: bool) -> Result<Code, JsError> {
        let mut b = CodeBuilder::eval();
        b.set_strict(strict);
        match source {
            "x" => {
                b.emit_name(Op::LOAD_NAME, "x")?;
                b.emit(Op::POP_TOP_AND_RET);
            }
            "1 + 1" => {
                b.emit_number(1.0)?;
                b.emit_number(1.0)?;
                b.emit(Op::BINARY_ADD);
                b.emit(Op::POP_TOP_AND_RET);
            }
            "var y = 5" => {
                b.declare_var("y");
                b.emit_number(5.0)?;
                b.emit_name(Op::STORE_NAME, "y")?;
                b.emit(Op::POP_TOP);
            }
            "this" => {
                b.emit(Op::PUSH_THIS);
                b.emit(Op::POP_TOP_AND_RET);
            }
            "throw" => {
                b.emit_string("from eval")?;
                b.emit(Op::THROW);
            }
            _ => return Err(JsError::syntax_error(format!("cannot compile {:?}", source))),
        }
        b.emit(Op::STOP_CODE);
        b.finish()
    }
}

fn engine_with_compiler() -> Engine {
    let mut engine = create_test_engine();
    engine.set_eval_compiler(Box::new(TableCompiler));
    engine
}

/// `eval(<source>)` as a direct call
fn direct_eval(b: &mut CodeBuilder, source: &str) -> Result<(), JsError> {
    b.emit_name(Op::CALL_NAME, "eval")?;
    b.emit_string(source)?;
    b.emit_with(Op::EVAL, 1);
    Ok(())
}

/// `(0, eval)(<source>)`
fn indirect_eval(b: &mut CodeBuilder, source: &str) -> Result<(), JsError> {
    b.emit_name(Op::CALL_GLOBAL, "eval")?;
    b.emit_string(source)?;
    b.emit_with(Op::CALL, 1);
    Ok(())
}

#[test]
fn test_eval_without_compiler_is_eval_error() {
    let mut engine = create_test_engine();
    let code = program(|b| indirect_eval(b, "1 + 1"));
    let Completion::Throw(error) = engine.run(&code).unwrap() else {
        panic!("expected EvalError");
    };
    let (name, message) = error_parts(&mut engine, error);
    assert_eq!(name, "EvalError");
    assert_eq!(message, "eval is not available without a compiler");
}

#[test]
fn test_eval_of_non_string_returns_argument() {
    let mut engine = create_test_engine();
    let code = program(|b| {
        b.emit_name(Op::CALL_NAME, "eval")?;
        b.emit_number(5.0)?;
        b.emit_with(Op::EVAL, 1);
        Ok(())
    });
    assert_eq!(run_value(&mut engine, &code), Value::Int32(5));
}

#[test]
fn test_indirect_eval_computes_value() {
    let mut engine = engine_with_compiler();
    let code = program(|b| indirect_eval(b, "1 + 1"));
    assert_eq!(run_value(&mut engine, &code), Value::Int32(2));
}

#[test]
fn test_direct_eval_sees_function_scope() {
    // function f(x) { return eval("x") }; f(42)
    let f = function("f", &["x"], |f| {
        f.set_needs_env();
        direct_eval(f, "x")?;
        f.emit(Op::RETURN);
        Ok(())
    });
    let mut engine = engine_with_compiler();
    let code = program(move |b| {
        let index = b.add_code(f)?;
        b.emit_with(Op::BUILD_FUNCTION, index);
        b.emit(Op::PUSH_UNDEFINED);
        b.emit_number(42.0)?;
        b.emit_with(Op::CALL, 1);
        Ok(())
    });
    assert_eq!(run_value(&mut engine, &code), Value::Int32(42));
}

#[test]
fn test_indirect_eval_uses_global_scope() {
    // x = "global"; function f(x) { return (0, eval)("x") }; f("local")
    let f = function("f", &["x"], |f| {
        indirect_eval(f, "x")?;
        f.emit(Op::RETURN);
        Ok(())
    });
    let mut engine = engine_with_compiler();
    let code = program(move |b| {
        let index = b.add_code(f)?;
        b.emit_string("global")?;
        b.emit_name(Op::STORE_NAME, "x")?;
        b.emit(Op::POP_TOP);
        b.emit_with(Op::BUILD_FUNCTION, index);
        b.emit(Op::PUSH_UNDEFINED);
        b.emit_string("local")?;
        b.emit_with(Op::CALL, 1);
        Ok(())
    });
    let value = run_value(&mut engine, &code);
    assert_eq!(engine.string_contents(value).as_deref(), Some("global"));
}

#[test]
fn test_direct_eval_declares_in_caller_scope() {
    // function f() { eval("var y = 5"); return y }
    let f = function("f", &[], |f| {
        f.set_needs_env();
        direct_eval(f, "var y = 5")?;
        f.emit(Op::POP_TOP);
        f.emit_name(Op::LOAD_NAME, "y")?;
        f.emit(Op::RETURN);
        Ok(())
    });
    let mut engine = engine_with_compiler();
    let code = program(move |b| {
        let index = b.add_code(f)?;
        b.emit_with(Op::BUILD_FUNCTION, index);
        b.emit(Op::PUSH_UNDEFINED);
        b.emit_with(Op::CALL, 0);
        b.emit_name(Op::TYPEOF_NAME, "y")?;
        b.emit(Op::BINARY_ADD);
        Ok(())
    });
    let value = run_value(&mut engine, &code);
    assert_eq!(engine.string_contents(value).as_deref(), Some("5undefined"));
}

#[test]
fn test_eval_declared_globals_are_deletable() {
    let mut engine = engine_with_compiler();
    let code = program(|b| {
        direct_eval(b, "var y = 5")?;
        b.emit(Op::POP_TOP);
        b.emit_name(Op::DELETE_NAME, "y")?;
        Ok(())
    });
    assert_eq!(run_value(&mut engine, &code), Value::Boolean(true));
}

#[test]
fn test_strict_direct_eval_keeps_its_vars() {
    // "use strict"; function f() { eval("var y = 5"); return typeof y }
    let mut f = CodeBuilder::function("f");
    f.set_strict(true).set_needs_env();
    direct_eval(&mut f, "var y = 5").unwrap();
    f.emit(Op::POP_TOP);
    f.emit_name(Op::TYPEOF_NAME, "y").unwrap();
    f.emit(Op::RETURN);
    f.emit(Op::STOP_CODE);
    let f = f.finish().unwrap();

    let mut engine = engine_with_compiler();
    let code = program(move |b| {
        let index = b.add_code(f)?;
        b.emit_with(Op::BUILD_FUNCTION, index);
        b.emit(Op::PUSH_UNDEFINED);
        b.emit_with(Op::CALL, 0);
        Ok(())
    });
    let value = run_value(&mut engine, &code);
    assert_eq!(engine.string_contents(value).as_deref(), Some("undefined"));
}

#[test]
fn test_direct_eval_shares_this() {
    // ({ m: function () { return eval("this") } }).m() is the object
    let m = function("m", &[], |f| {
        f.set_needs_env();
        direct_eval(f, "this")?;
        f.emit(Op::RETURN);
        Ok(())
    });
    let mut engine = engine_with_compiler();
    let code = program(move |b| {
        let index = b.add_code(m)?;
        let o = b.add_local("o")?;
        b.emit(Op::BUILD_OBJECT);
        b.emit_with(Op::BUILD_FUNCTION, index);
        b.emit_name(Op::STORE_OBJECT_DATA, "m")?;
        b.emit_with(Op::STORE_LOCAL, o);
        b.emit_name(Op::CALL_PROP, "m")?;
        b.emit_with(Op::CALL, 0);
        b.emit_with(Op::LOAD_LOCAL, o);
        b.emit(Op::BINARY_STRICT_EQ);
        Ok(())
    });
    assert_eq!(run_value(&mut engine, &code), Value::Boolean(true));
}

#[test]
fn test_errors_from_eval_propagate() {
    let mut engine = engine_with_compiler();
    let code = program(|b| direct_eval(b, "throw"));
    let Completion::Throw(value) = engine.run(&code).unwrap() else {
        panic!("expected a throw");
    };
    assert_eq!(engine.string_contents(value).as_deref(), Some("from eval"));

    let code = program(|b| indirect_eval(b, "not javascript"));
    let Completion::Throw(error) = engine.run(&code).unwrap() else {
        panic!("expected SyntaxError");
    };
    let (name, _) = error_parts(&mut engine, error);
    assert_eq!(name, "SyntaxError");
}
