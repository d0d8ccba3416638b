//! Object and array literals, property access, accessors and arrays

use super::{eval, eval_string, eval_throws, function};
use esvm::{CodeBuilder, JsError, Op, Value};

/// `{ base: 21 }` left on the stack
fn object_with_base(b: &mut CodeBuilder) -> Result<(), JsError> {
    b.emit(Op::BUILD_OBJECT);
    b.emit_number(21.0)?;
    b.emit_name(Op::STORE_OBJECT_DATA, "base")?;
    Ok(())
}

/// `[10, 20, 30]` left on the stack
fn small_array(b: &mut CodeBuilder) -> Result<(), JsError> {
    b.emit_with(Op::BUILD_ARRAY, 3);
    for (i, v) in [10.0, 20.0, 30.0].into_iter().enumerate() {
        b.emit_number(v)?;
        b.emit_with(Op::INIT_VECTOR_ARRAY_ELEMENT, i as u16);
    }
    Ok(())
}

#[test]
fn test_object_literal_property() {
    let (_, value) = eval(|b| {
        object_with_base(b)?;
        b.emit_name(Op::LOAD_PROP, "base")?;
        Ok(())
    });
    assert_eq!(value, Value::Int32(21));

    let (_, value) = eval(|b| {
        object_with_base(b)?;
        b.emit_name(Op::LOAD_PROP, "absent")?;
        Ok(())
    });
    assert_eq!(value, Value::Undefined);
}

#[test]
fn test_store_then_load_property() {
    let (_, value) = eval(|b| {
        let o = b.add_local("o")?;
        b.emit(Op::BUILD_OBJECT);
        b.emit_with(Op::STORE_LOCAL, o);
        b.emit(Op::POP_TOP);
        for (name, v) in [("x", 1.0), ("y", 2.0), ("x", 40.0)] {
            b.emit_with(Op::LOAD_LOCAL, o);
            b.emit_number(v)?;
            b.emit_name(Op::STORE_PROP, name)?;
            b.emit(Op::POP_TOP);
        }
        b.emit_with(Op::LOAD_LOCAL, o);
        b.emit_name(Op::LOAD_PROP, "x")?;
        b.emit_with(Op::LOAD_LOCAL, o);
        b.emit_name(Op::LOAD_PROP, "y")?;
        b.emit(Op::BINARY_ADD);
        Ok(())
    });
    assert_eq!(value, Value::Int32(42));
}

#[test]
fn test_inherited_method_lookup() {
    let s = eval_string(|b| {
        b.emit(Op::BUILD_OBJECT);
        b.emit_name(Op::LOAD_PROP, "hasOwnProperty")?;
        b.emit(Op::TYPEOF);
        Ok(())
    });
    assert_eq!(s, "function");
}

#[test]
fn test_property_of_nullish_is_type_error() {
    let (name, message) = eval_throws(|b| {
        b.emit(Op::PUSH_UNDEFINED);
        b.emit_name(Op::LOAD_PROP, "x")?;
        Ok(())
    });
    assert_eq!(name, "TypeError");
    assert_eq!(message, "undefined has no properties");

    // The base is checked before the key is converted
    let (name, message) = eval_throws(|b| {
        b.emit(Op::PUSH_NULL);
        b.emit_name(Op::LOAD_NAME, "Object")?;
        b.emit(Op::LOAD_ELEMENT);
        Ok(())
    });
    assert_eq!(name, "TypeError");
    assert_eq!(message, "null has no properties");
}

#[test]
fn test_string_primitive_properties() {
    let (_, value) = eval(|b| {
        b.emit_string("héllo")?;
        b.emit_name(Op::LOAD_PROP, "length")?;
        Ok(())
    });
    assert_eq!(value, Value::Int32(5));

    let s = eval_string(|b| {
        b.emit_string("abc")?;
        b.emit_number(1.0)?;
        b.emit(Op::LOAD_ELEMENT);
        Ok(())
    });
    assert_eq!(s, "b");
}

#[test]
fn test_getter_sees_receiver() {
    let getter = function("double", &[], |f| {
        f.emit(Op::PUSH_THIS);
        f.emit_name(Op::LOAD_PROP, "base")?;
        f.emit_number(2.0)?;
        f.emit(Op::BINARY_MULTIPLY);
        f.emit(Op::RETURN);
        Ok(())
    });
    let (_, value) = eval(move |b| {
        let index = b.add_code(getter)?;
        object_with_base(b)?;
        b.emit_with(Op::BUILD_FUNCTION, index);
        b.emit_name(Op::STORE_OBJECT_GET, "double")?;
        b.emit_name(Op::LOAD_PROP, "double")?;
        Ok(())
    });
    assert_eq!(value, Value::Int32(42));
}

#[test]
fn test_setter_receives_value() {
    // set x(v) { this.stored = v + 1 }
    let setter = function("x", &["v"], |f| {
        f.emit(Op::PUSH_THIS);
        f.emit_name(Op::LOAD_NAME, "v")?;
        f.emit_number(1.0)?;
        f.emit(Op::BINARY_ADD);
        f.emit_name(Op::STORE_PROP, "stored")?;
        f.emit(Op::POP_TOP);
        Ok(())
    });
    let (_, value) = eval(move |b| {
        let index = b.add_code(setter)?;
        let o = b.add_local("o")?;
        b.emit(Op::BUILD_OBJECT);
        b.emit_with(Op::BUILD_FUNCTION, index);
        b.emit_name(Op::STORE_OBJECT_SET, "x")?;
        b.emit_with(Op::STORE_LOCAL, o);
        b.emit_number(5.0)?;
        b.emit_name(Op::STORE_PROP, "x")?;
        b.emit(Op::POP_TOP);
        b.emit_with(Op::LOAD_LOCAL, o);
        b.emit_name(Op::LOAD_PROP, "stored")?;
        Ok(())
    });
    assert_eq!(value, Value::Int32(6));
}

#[test]
fn test_accessor_without_getter_reads_undefined() {
    let setter = function("only", &["v"], |_| Ok(()));
    let (_, value) = eval(move |b| {
        let index = b.add_code(setter)?;
        b.emit(Op::BUILD_OBJECT);
        b.emit_with(Op::BUILD_FUNCTION, index);
        b.emit_name(Op::STORE_OBJECT_SET, "only")?;
        b.emit_name(Op::LOAD_PROP, "only")?;
        Ok(())
    });
    assert_eq!(value, Value::Undefined);
}

#[test]
fn test_array_literal_length_and_elements() {
    let (_, value) = eval(|b| {
        small_array(b)?;
        b.emit_name(Op::LOAD_PROP, "length")?;
        Ok(())
    });
    assert_eq!(value, Value::Int32(3));

    let (_, value) = eval(|b| {
        small_array(b)?;
        b.emit_string("2")?;
        b.emit(Op::LOAD_ELEMENT);
        Ok(())
    });
    assert_eq!(value, Value::Int32(30));
}

#[test]
fn test_array_literal_holes() {
    // 1 in [1, , 3]
    let (_, value) = eval(|b| {
        b.emit_number(1.0)?;
        b.emit_with(Op::BUILD_ARRAY, 3);
        b.emit_number(1.0)?;
        b.emit_with(Op::INIT_VECTOR_ARRAY_ELEMENT, 0);
        b.emit(Op::PUSH_EMPTY);
        b.emit_with(Op::INIT_VECTOR_ARRAY_ELEMENT, 1);
        b.emit_number(3.0)?;
        b.emit_with(Op::INIT_VECTOR_ARRAY_ELEMENT, 2);
        b.emit(Op::BINARY_IN);
        Ok(())
    });
    assert_eq!(value, Value::Boolean(false));
}

#[test]
fn test_array_length_follows_writes() {
    // a[5] = 1; a.length
    let (_, value) = eval(|b| {
        let a = b.add_local("a")?;
        small_array(b)?;
        b.emit_with(Op::STORE_LOCAL, a);
        b.emit_number(5.0)?;
        b.emit_number(1.0)?;
        b.emit(Op::STORE_ELEMENT);
        b.emit(Op::POP_TOP);
        b.emit_with(Op::LOAD_LOCAL, a);
        b.emit_name(Op::LOAD_PROP, "length")?;
        Ok(())
    });
    assert_eq!(value, Value::Int32(6));

    // a.length = 1; a[2]
    let (_, value) = eval(|b| {
        let a = b.add_local("a")?;
        small_array(b)?;
        b.emit_with(Op::STORE_LOCAL, a);
        b.emit_number(1.0)?;
        b.emit_name(Op::STORE_PROP, "length")?;
        b.emit(Op::POP_TOP);
        b.emit_with(Op::LOAD_LOCAL, a);
        b.emit_number(2.0)?;
        b.emit(Op::LOAD_ELEMENT);
        Ok(())
    });
    assert_eq!(value, Value::Undefined);
}

#[test]
fn test_invalid_array_length_is_range_error() {
    let (name, _) = eval_throws(|b| {
        small_array(b)?;
        b.emit_number(-1.0)?;
        b.emit_name(Op::STORE_PROP, "length")?;
        Ok(())
    });
    assert_eq!(name, "RangeError");
}

/// `a = [10, 20, 30]; Object.defineProperty(a, "1", { configurable: false })`
fn array_with_pinned_element(b: &mut CodeBuilder) -> Result<u16, JsError> {
    let a = b.add_local("a")?;
    small_array(b)?;
    b.emit_with(Op::STORE_LOCAL, a);
    b.emit(Op::POP_TOP);
    b.emit_name(Op::LOAD_GLOBAL, "Object")?;
    b.emit_name(Op::CALL_PROP, "defineProperty")?;
    b.emit_with(Op::LOAD_LOCAL, a);
    b.emit_string("1")?;
    b.emit(Op::BUILD_OBJECT);
    b.emit(Op::PUSH_FALSE);
    b.emit_name(Op::STORE_OBJECT_DATA, "configurable")?;
    b.emit_with(Op::CALL, 3);
    b.emit(Op::POP_TOP);
    Ok(a)
}

#[test]
fn test_length_shrink_stops_at_non_configurable_element() {
    // a.length = 0; a.length + "," + a[0] + "," + a[2]
    let s = eval_string(|b| {
        let a = array_with_pinned_element(b)?;
        b.emit_with(Op::LOAD_LOCAL, a);
        b.emit_number(0.0)?;
        b.emit_name(Op::STORE_PROP, "length")?;
        b.emit(Op::POP_TOP);
        b.emit_with(Op::LOAD_LOCAL, a);
        b.emit_name(Op::LOAD_PROP, "length")?;
        for index in [0.0, 2.0] {
            b.emit_string(",")?;
            b.emit(Op::BINARY_ADD);
            b.emit_with(Op::LOAD_LOCAL, a);
            b.emit_number(index)?;
            b.emit(Op::LOAD_ELEMENT);
            b.emit(Op::BINARY_ADD);
        }
        Ok(())
    });
    assert_eq!(s, "2,10,undefined");
}

#[test]
fn test_blocked_length_shrink_throws_in_strict_code() {
    let (name, _) = eval_throws(|b| {
        b.set_strict(true);
        let a = array_with_pinned_element(b)?;
        b.emit_with(Op::LOAD_LOCAL, a);
        b.emit_number(0.0)?;
        b.emit_name(Op::STORE_PROP, "length")?;
        Ok(())
    });
    assert_eq!(name, "TypeError");
}

/// `Object.defineProperty(o, "k", { value: 1 })` with `o` in local 0
fn define_readonly(b: &mut CodeBuilder) -> Result<u16, JsError> {
    let o = b.add_local("o")?;
    b.emit(Op::BUILD_OBJECT);
    b.emit_with(Op::STORE_LOCAL, o);
    b.emit(Op::POP_TOP);
    b.emit_name(Op::LOAD_GLOBAL, "Object")?;
    b.emit_name(Op::CALL_PROP, "defineProperty")?;
    b.emit_with(Op::LOAD_LOCAL, o);
    b.emit_string("k")?;
    b.emit(Op::BUILD_OBJECT);
    b.emit_number(1.0)?;
    b.emit_name(Op::STORE_OBJECT_DATA, "value")?;
    b.emit_with(Op::CALL, 3);
    b.emit(Op::POP_TOP);
    Ok(o)
}

#[test]
fn test_readonly_property_ignores_sloppy_writes() {
    let (_, value) = eval(|b| {
        let o = define_readonly(b)?;
        b.emit_with(Op::LOAD_LOCAL, o);
        b.emit_number(2.0)?;
        b.emit_name(Op::STORE_PROP, "k")?;
        b.emit(Op::POP_TOP);
        b.emit_with(Op::LOAD_LOCAL, o);
        b.emit_name(Op::LOAD_PROP, "k")?;
        Ok(())
    });
    assert_eq!(value, Value::Int32(1));
}

#[test]
fn test_readonly_property_rejects_strict_writes() {
    let (name, _) = eval_throws(|b| {
        b.set_strict(true);
        let o = define_readonly(b)?;
        b.emit_with(Op::LOAD_LOCAL, o);
        b.emit_number(2.0)?;
        b.emit_name(Op::STORE_PROP, "k")?;
        Ok(())
    });
    assert_eq!(name, "TypeError");
}

#[test]
fn test_defined_property_is_not_enumerable_or_deletable() {
    let (_, value) = eval(|b| {
        let o = define_readonly(b)?;
        b.emit_with(Op::LOAD_LOCAL, o);
        b.emit_name(Op::DELETE_PROP, "k")?;
        Ok(())
    });
    assert_eq!(value, Value::Boolean(false));

    let s = eval_string(|b| {
        let o = define_readonly(b)?;
        b.emit_name(Op::LOAD_GLOBAL, "Object")?;
        b.emit_name(Op::CALL_PROP, "keys")?;
        b.emit_with(Op::LOAD_LOCAL, o);
        b.emit_with(Op::CALL, 1);
        b.emit_name(Op::LOAD_PROP, "length")?;
        Ok(())
    });
    assert_eq!(s, "0");
}

#[test]
fn test_delete_property() {
    // delete o.base; "base" in o
    let (_, value) = eval(|b| {
        let o = b.add_local("o")?;
        object_with_base(b)?;
        b.emit_with(Op::STORE_LOCAL, o);
        b.emit_name(Op::DELETE_PROP, "base")?;
        b.emit(Op::POP_TOP);
        b.emit_string("base")?;
        b.emit_with(Op::LOAD_LOCAL, o);
        b.emit(Op::BINARY_IN);
        Ok(())
    });
    assert_eq!(value, Value::Boolean(false));
}

#[test]
fn test_element_increment() {
    // o = {base: 21}; o["base"]++ + o.base
    let (_, value) = eval(|b| {
        let o = b.add_local("o")?;
        object_with_base(b)?;
        b.emit_with(Op::STORE_LOCAL, o);
        b.emit_string("base")?;
        b.emit(Op::POSTFIX_INCREMENT_ELEMENT);
        b.emit_with(Op::LOAD_LOCAL, o);
        b.emit_name(Op::LOAD_PROP, "base")?;
        b.emit(Op::BINARY_ADD);
        Ok(())
    });
    assert_eq!(value, Value::Int32(43));

    let (_, value) = eval(|b| {
        object_with_base(b)?;
        b.emit_name(Op::INCREMENT_PROP, "base")?;
        Ok(())
    });
    assert_eq!(value, Value::Int32(22));
}
