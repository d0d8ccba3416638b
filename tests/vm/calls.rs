//! Calls, closures, constructors and the host call protocol

use super::{
    create_test_engine, error_parts, eval, eval_string, eval_throws, function, program, run_value,
};
use esvm::{CodeBuilder, Completion, Engine, JsError, Op, Value};

/// `function fact(n) { return n <= 1 ? 1 : n * fact(n - 1) }`
fn factorial() -> esvm::Code {
    function("fact", &["n"], |f| {
        let recurse = f.new_label();
        f.emit_name(Op::LOAD_NAME, "n")?;
        f.emit_number(1.0)?;
        f.emit(Op::BINARY_LTE);
        f.emit_jump(Op::POP_JUMP_IF_FALSE, recurse);
        f.emit_number(1.0)?;
        f.emit(Op::RETURN);
        f.bind(recurse);
        f.emit_name(Op::LOAD_NAME, "n")?;
        f.emit_name(Op::CALL_GLOBAL, "fact")?;
        f.emit_name(Op::LOAD_NAME, "n")?;
        f.emit_number(1.0)?;
        f.emit(Op::BINARY_SUBTRACT);
        f.emit_with(Op::CALL, 1);
        f.emit(Op::BINARY_MULTIPLY);
        f.emit(Op::RETURN);
        Ok(())
    })
}

#[test]
fn test_recursive_calls() {
    let fact = factorial();
    let (_, value) = eval(move |b| {
        b.declare_function("fact", fact)?;
        b.emit_name(Op::CALL_GLOBAL, "fact")?;
        b.emit_number(10.0)?;
        b.emit_with(Op::CALL, 1);
        Ok(())
    });
    assert_eq!(value, Value::Int32(3628800));
}

#[test]
fn test_params_in_locals() {
    // function sub(a, b) { return a - b } with both params in frame slots
    let mut f = CodeBuilder::function("sub");
    f.add_param("a").add_param("b");
    let a = f.add_local("a").unwrap();
    let b_slot = f.add_local("b").unwrap();
    f.emit_with(Op::LOAD_LOCAL, a);
    f.emit_with(Op::LOAD_LOCAL, b_slot);
    f.emit(Op::BINARY_SUBTRACT);
    f.emit(Op::RETURN);
    f.emit(Op::STOP_CODE);
    let sub = f.finish().unwrap();

    let (_, value) = eval(move |b| {
        let index = b.add_code(sub)?;
        b.emit_with(Op::BUILD_FUNCTION, index);
        b.emit(Op::PUSH_UNDEFINED);
        b.emit_number(50.0)?;
        b.emit_number(8.0)?;
        b.emit_number(1000.0)?;
        b.emit_with(Op::CALL, 3);
        Ok(())
    });
    assert_eq!(value, Value::Int32(42));
}

#[test]
fn test_missing_arguments_are_undefined() {
    let second = function("second", &["a", "b"], |f| {
        f.emit_name(Op::LOAD_NAME, "b")?;
        f.emit(Op::TYPEOF);
        f.emit(Op::RETURN);
        Ok(())
    });
    let s = eval_string(move |b| {
        let index = b.add_code(second)?;
        b.emit_with(Op::BUILD_FUNCTION, index);
        b.emit(Op::PUSH_UNDEFINED);
        b.emit_number(1.0)?;
        b.emit_with(Op::CALL, 1);
        Ok(())
    });
    assert_eq!(s, "undefined");
}

#[test]
fn test_function_without_return_gives_undefined() {
    let nothing = function("nothing", &[], |f| {
        f.emit_number(5.0)?;
        f.emit(Op::POP_TOP);
        Ok(())
    });
    let (_, value) = eval(move |b| {
        let index = b.add_code(nothing)?;
        b.emit_with(Op::BUILD_FUNCTION, index);
        b.emit(Op::PUSH_UNDEFINED);
        b.emit_with(Op::CALL, 0);
        Ok(())
    });
    assert_eq!(value, Value::Undefined);
}

#[test]
fn test_arguments_object() {
    // function f() { return arguments.length + arguments[1] }
    let mut f = CodeBuilder::function("f");
    f.set_uses_arguments();
    f.emit_name(Op::LOAD_NAME, "arguments").unwrap();
    f.emit_name(Op::LOAD_PROP, "length").unwrap();
    f.emit_name(Op::LOAD_NAME, "arguments").unwrap();
    f.emit_number(1.0).unwrap();
    f.emit(Op::LOAD_ELEMENT);
    f.emit(Op::BINARY_ADD);
    f.emit(Op::RETURN);
    f.emit(Op::STOP_CODE);
    let f = f.finish().unwrap();

    let (_, value) = eval(move |b| {
        let index = b.add_code(f)?;
        b.emit_with(Op::BUILD_FUNCTION, index);
        b.emit(Op::PUSH_UNDEFINED);
        b.emit_number(1.0)?;
        b.emit_number(40.0)?;
        b.emit_number(3.0)?;
        b.emit_with(Op::CALL, 3);
        Ok(())
    });
    assert_eq!(value, Value::Int32(43));
}

#[test]
fn test_closures_keep_their_scope() {
    // function makeCounter() { var n = 0; return function () { return ++n } }
    let inner = function("", &[], |f| {
        f.emit_name(Op::INCREMENT_NAME, "n")?;
        f.emit(Op::RETURN);
        Ok(())
    });
    let make_counter = function("makeCounter", &[], move |f| {
        f.declare_var("n");
        let index = f.add_code(inner)?;
        f.emit_number(0.0)?;
        f.emit_name(Op::STORE_NAME, "n")?;
        f.emit(Op::POP_TOP);
        f.emit_with(Op::BUILD_FUNCTION, index);
        f.emit(Op::RETURN);
        Ok(())
    });

    let (_, value) = eval(move |b| {
        b.declare_function("makeCounter", make_counter)?;
        let c = b.add_local("c")?;
        let other = b.add_local("other")?;
        for slot in [c, other] {
            b.emit_name(Op::CALL_NAME, "makeCounter")?;
            b.emit_with(Op::CALL, 0);
            b.emit_with(Op::STORE_LOCAL, slot);
            b.emit(Op::POP_TOP);
        }
        for _ in 0..2 {
            b.emit_with(Op::CALL_LOCAL, c);
            b.emit_with(Op::CALL, 0);
            b.emit(Op::POP_TOP);
        }
        // Third call on c, first on other: 3 * 10 + 1
        b.emit_with(Op::CALL_LOCAL, c);
        b.emit_with(Op::CALL, 0);
        b.emit_number(10.0)?;
        b.emit(Op::BINARY_MULTIPLY);
        b.emit_with(Op::CALL_LOCAL, other);
        b.emit_with(Op::CALL, 0);
        b.emit(Op::BINARY_ADD);
        Ok(())
    });
    assert_eq!(value, Value::Int32(31));
}

#[test]
fn test_named_function_expression_sees_itself() {
    // (function me(n) { return n ? me(n - 1) + 2 : 0 })(5)
    let me = function("me", &["n"], |f| {
        let zero = f.new_label();
        f.set_named_expression();
        f.emit_name(Op::LOAD_NAME, "n")?;
        f.emit_jump(Op::POP_JUMP_IF_FALSE, zero);
        f.emit_name(Op::CALL_NAME, "me")?;
        f.emit_name(Op::LOAD_NAME, "n")?;
        f.emit_number(1.0)?;
        f.emit(Op::BINARY_SUBTRACT);
        f.emit_with(Op::CALL, 1);
        f.emit_number(2.0)?;
        f.emit(Op::BINARY_ADD);
        f.emit(Op::RETURN);
        f.bind(zero);
        f.emit_number(0.0)?;
        f.emit(Op::RETURN);
        Ok(())
    });
    let (_, value) = eval(move |b| {
        let index = b.add_code(me)?;
        b.emit_with(Op::BUILD_FUNCTION, index);
        b.emit(Op::PUSH_UNDEFINED);
        b.emit_number(5.0)?;
        b.emit_with(Op::CALL, 1);
        Ok(())
    });
    assert_eq!(value, Value::Int32(10));

    // The name is not visible outside
    let (_, value) = eval(|b| {
        b.emit_name(Op::TYPEOF_NAME, "me")?;
        b.emit_string("undefined")?;
        b.emit(Op::BINARY_STRICT_EQ);
        Ok(())
    });
    assert_eq!(value, Value::Boolean(true));
}

/// `function Point(x) { this.x = x }` declared globally
fn declare_point(b: &mut CodeBuilder) -> Result<(), JsError> {
    let point = function("Point", &["x"], |f| {
        f.emit(Op::PUSH_THIS);
        f.emit_name(Op::LOAD_NAME, "x")?;
        f.emit_name(Op::STORE_PROP, "x")?;
        f.emit(Op::POP_TOP);
        Ok(())
    });
    b.declare_function("Point", point)?;
    Ok(())
}

#[test]
fn test_constructor_initializes_this() {
    let (_, value) = eval(|b| {
        declare_point(b)?;
        b.emit_name(Op::LOAD_GLOBAL, "Point")?;
        b.emit(Op::PUSH_UNDEFINED);
        b.emit_number(7.0)?;
        b.emit_with(Op::CONSTRUCT, 1);
        b.emit_name(Op::LOAD_PROP, "x")?;
        Ok(())
    });
    assert_eq!(value, Value::Int32(7));
}

#[test]
fn test_constructed_object_inherits_from_prototype() {
    // Point.prototype.norm = 3; var p = new Point(1); p instanceof Point && p.norm
    let (_, value) = eval(|b| {
        declare_point(b)?;
        b.emit_name(Op::LOAD_GLOBAL, "Point")?;
        b.emit_name(Op::LOAD_PROP, "prototype")?;
        b.emit_number(3.0)?;
        b.emit_name(Op::STORE_PROP, "norm")?;
        b.emit(Op::POP_TOP);

        let p = b.add_local("p")?;
        let end = b.new_label();
        b.emit_name(Op::LOAD_GLOBAL, "Point")?;
        b.emit(Op::PUSH_UNDEFINED);
        b.emit_number(1.0)?;
        b.emit_with(Op::CONSTRUCT, 1);
        b.emit_with(Op::STORE_LOCAL, p);
        b.emit_name(Op::LOAD_GLOBAL, "Point")?;
        b.emit(Op::BINARY_INSTANCEOF);
        b.emit_jump(Op::JUMP_IF_FALSE_OR_POP, end);
        b.emit_with(Op::LOAD_LOCAL, p);
        b.emit_name(Op::LOAD_PROP, "norm")?;
        b.bind(end);
        Ok(())
    });
    assert_eq!(value, Value::Int32(3));
}

#[test]
fn test_constructor_returning_object_replaces_this() {
    let make = function("Make", &[], |f| {
        f.emit(Op::BUILD_OBJECT);
        f.emit_string("replaced")?;
        f.emit_name(Op::STORE_OBJECT_DATA, "tag")?;
        f.emit(Op::RETURN);
        Ok(())
    });
    let s = eval_string(move |b| {
        let index = b.add_code(make)?;
        b.emit_with(Op::BUILD_FUNCTION, index);
        b.emit(Op::PUSH_UNDEFINED);
        b.emit_with(Op::CONSTRUCT, 0);
        b.emit_name(Op::LOAD_PROP, "tag")?;
        Ok(())
    });
    assert_eq!(s, "replaced");

    // A primitive result is ignored
    let primitive = function("Primitive", &[], |f| {
        f.emit_number(5.0)?;
        f.emit(Op::RETURN);
        Ok(())
    });
    let s = eval_string(move |b| {
        let index = b.add_code(primitive)?;
        b.emit_with(Op::BUILD_FUNCTION, index);
        b.emit(Op::PUSH_UNDEFINED);
        b.emit_with(Op::CONSTRUCT, 0);
        b.emit(Op::TYPEOF);
        Ok(())
    });
    assert_eq!(s, "object");
}

#[test]
fn test_this_coercion() {
    // Sloppy functions see the global object for an undefined receiver
    let sloppy = function("sloppy", &[], |f| {
        f.emit(Op::PUSH_THIS);
        f.emit(Op::RETURN);
        Ok(())
    });
    let mut engine = create_test_engine();
    let code = program(move |b| {
        let index = b.add_code(sloppy)?;
        b.emit_with(Op::BUILD_FUNCTION, index);
        b.emit(Op::PUSH_UNDEFINED);
        b.emit_with(Op::CALL, 0);
        Ok(())
    });
    let this = run_value(&mut engine, &code);
    assert_eq!(this, engine.global_object());

    let mut strict = CodeBuilder::function("strict");
    strict.set_strict(true);
    strict.emit(Op::PUSH_THIS);
    strict.emit(Op::RETURN);
    strict.emit(Op::STOP_CODE);
    let strict = strict.finish().unwrap();
    let (_, value) = eval(move |b| {
        let index = b.add_code(strict)?;
        b.emit_with(Op::BUILD_FUNCTION, index);
        b.emit(Op::PUSH_UNDEFINED);
        b.emit_with(Op::CALL, 0);
        Ok(())
    });
    assert_eq!(value, Value::Undefined);
}

#[test]
fn test_method_call_passes_receiver() {
    // ({ base: 40, get: function () { return this.base + 2 } }).get()
    let method = function("get", &[], |f| {
        f.emit(Op::PUSH_THIS);
        f.emit_name(Op::LOAD_PROP, "base")?;
        f.emit_number(2.0)?;
        f.emit(Op::BINARY_ADD);
        f.emit(Op::RETURN);
        Ok(())
    });
    let (_, value) = eval(move |b| {
        let index = b.add_code(method)?;
        b.emit(Op::BUILD_OBJECT);
        b.emit_number(40.0)?;
        b.emit_name(Op::STORE_OBJECT_DATA, "base")?;
        b.emit_with(Op::BUILD_FUNCTION, index);
        b.emit_name(Op::STORE_OBJECT_DATA, "get")?;
        b.emit_name(Op::CALL_PROP, "get")?;
        b.emit_with(Op::CALL, 0);
        Ok(())
    });
    assert_eq!(value, Value::Int32(42));
}

#[test]
fn test_function_call_and_apply() {
    let method = function("get", &["extra"], |f| {
        f.emit(Op::PUSH_THIS);
        f.emit_name(Op::LOAD_PROP, "base")?;
        f.emit_name(Op::LOAD_NAME, "extra")?;
        f.emit(Op::BINARY_ADD);
        f.emit(Op::RETURN);
        Ok(())
    });
    let (_, value) = eval(move |b| {
        let index = b.add_code(method)?;
        let f = b.add_local("f")?;
        b.emit_with(Op::BUILD_FUNCTION, index);
        b.emit_with(Op::STORE_LOCAL, f);
        b.emit(Op::POP_TOP);

        // f.call({base: 30}, 2)
        b.emit_with(Op::LOAD_LOCAL, f);
        b.emit_name(Op::CALL_PROP, "call")?;
        b.emit(Op::BUILD_OBJECT);
        b.emit_number(30.0)?;
        b.emit_name(Op::STORE_OBJECT_DATA, "base")?;
        b.emit_number(2.0)?;
        b.emit_with(Op::CALL, 2);

        // f.apply({base: 5}, [5])
        b.emit_with(Op::LOAD_LOCAL, f);
        b.emit_name(Op::CALL_PROP, "apply")?;
        b.emit(Op::BUILD_OBJECT);
        b.emit_number(5.0)?;
        b.emit_name(Op::STORE_OBJECT_DATA, "base")?;
        b.emit_with(Op::BUILD_ARRAY, 1);
        b.emit_number(5.0)?;
        b.emit_with(Op::INIT_VECTOR_ARRAY_ELEMENT, 0);
        b.emit_with(Op::CALL, 2);

        b.emit(Op::BINARY_ADD);
        Ok(())
    });
    assert_eq!(value, Value::Int32(42));
}

#[test]
fn test_calling_non_function_is_type_error() {
    let (name, message) = eval_throws(|b| {
        b.emit_number(1.0)?;
        b.emit(Op::PUSH_UNDEFINED);
        b.emit_with(Op::CALL, 0);
        Ok(())
    });
    assert_eq!(name, "TypeError");
    assert_eq!(message, "not callable object");

    // Native functions without a construct behavior are not constructors
    let (name, _) = eval_throws(|b| {
        b.emit_name(Op::LOAD_GLOBAL, "Object")?;
        b.emit_name(Op::LOAD_PROP, "keys")?;
        b.emit(Op::PUSH_UNDEFINED);
        b.emit_with(Op::CONSTRUCT, 0);
        Ok(())
    });
    assert_eq!(name, "TypeError");
}

#[test]
fn test_runaway_recursion_is_range_error() {
    let forever = function("forever", &[], |f| {
        f.emit_name(Op::CALL_GLOBAL, "forever")?;
        f.emit_with(Op::CALL, 0);
        f.emit(Op::RETURN);
        Ok(())
    });
    let mut engine = create_test_engine();
    let code = program(move |b| {
        b.declare_function("forever", forever)?;
        b.emit_name(Op::CALL_GLOBAL, "forever")?;
        b.emit_with(Op::CALL, 0);
        Ok(())
    });
    let Completion::Throw(error) = engine.run(&code).unwrap() else {
        panic!("expected overflow");
    };
    let (name, message) = error_parts(&mut engine, error);
    assert_eq!(name, "RangeError");
    assert_eq!(message, "maximum call stack size exceeded");

    // The engine is usable afterwards
    let code = program(|b| {
        b.emit_number(1.0)?;
        Ok(())
    });
    assert_eq!(run_value(&mut engine, &code), Value::Int32(1));
}

#[test]
fn test_self_recursive_getter_is_range_error() {
    // var o = { get x() { return this.x } }; o.x
    let getter = function("x", &[], |f| {
        f.emit(Op::PUSH_THIS);
        f.emit_name(Op::LOAD_PROP, "x")?;
        f.emit(Op::RETURN);
        Ok(())
    });
    let mut engine = create_test_engine();
    let code = program(move |b| {
        let index = b.add_code(getter)?;
        b.emit(Op::BUILD_OBJECT);
        b.emit_with(Op::BUILD_FUNCTION, index);
        b.emit_name(Op::STORE_OBJECT_GET, "x")?;
        b.emit_name(Op::STORE_NAME, "o")?;
        b.emit(Op::POP_TOP);
        b.emit_name(Op::LOAD_GLOBAL, "o")?;
        b.emit_name(Op::LOAD_PROP, "x")?;
        Ok(())
    });
    let Completion::Throw(error) = engine.run(&code).unwrap() else {
        panic!("expected overflow");
    };
    let (name, message) = error_parts(&mut engine, error);
    assert_eq!(name, "RangeError");
    assert_eq!(message, "maximum call stack size exceeded");

    // Every nested entry was unwound, so host calls still get in
    let object = engine.get_global("Object").unwrap();
    let created = engine.call(object, Value::Undefined, &[]).unwrap();
    assert!(created.as_object().is_some());
}

fn host_add(_engine: &mut Engine, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    let mut sum = 0.0;
    for arg in args {
        sum += arg
            .as_number()
            .ok_or_else(|| JsError::type_error("hostAdd wants numbers"))?;
    }
    Ok(Value::number(sum))
}

#[test]
fn test_host_function_called_from_script() {
    let mut engine = create_test_engine();
    engine.define_global_function("hostAdd", host_add, 2).unwrap();
    let code = program(|b| {
        b.emit_name(Op::CALL_GLOBAL, "hostAdd")?;
        b.emit_number(40.0)?;
        b.emit_number(2.0)?;
        b.emit_with(Op::CALL, 2);
        Ok(())
    });
    assert_eq!(run_value(&mut engine, &code), Value::Int32(42));

    // Host errors surface as script exceptions
    let code = program(|b| {
        b.emit_name(Op::CALL_GLOBAL, "hostAdd")?;
        b.emit_string("x")?;
        b.emit_with(Op::CALL, 1);
        Ok(())
    });
    let Completion::Throw(error) = engine.run(&code).unwrap() else {
        panic!("expected a throw");
    };
    let (name, message) = error_parts(&mut engine, error);
    assert_eq!(name, "TypeError");
    assert_eq!(message, "hostAdd wants numbers");
}

#[test]
fn test_host_calls_script_function() {
    let fact = factorial();
    let mut engine = create_test_engine();
    let code = program(move |b| {
        b.declare_function("fact", fact)?;
        b.emit(Op::PUSH_UNDEFINED);
        Ok(())
    });
    run_value(&mut engine, &code);

    let fact = engine.get_global("fact").unwrap();
    let result = engine
        .call(fact, Value::Undefined, &[Value::Int32(5)])
        .unwrap();
    assert_eq!(result, Value::Int32(120));

    let point = engine.get_global("Object").unwrap();
    let made = engine.construct(point, &[]).unwrap();
    assert!(made.is_object());
}
