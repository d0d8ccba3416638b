//! Type conversions and operators that may run user code
//!
//! ToPrimitive on an object calls its `valueOf`/`toString`, so everything
//! built on it (ToNumber, ToString, `+`, `==`, relational comparison) lives
//! on the engine rather than on `Value`.

use crate::atom;
use crate::error::JsError;
use crate::gc::CellKind;
use crate::object::{ObjectClass, PropertyKey};
use crate::prelude::math;
use crate::value::{
    CompareResult, JsString, Value, compare_numbers, compare_strings, number_to_string,
    parse_array_index, string_to_number, to_int32, to_uint32,
};
use crate::engine::Engine;

/// Preferred type for ToPrimitive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hint {
    Default,
    Number,
    String,
}

impl Engine {
    // ------------------------------------------------------------------------
    // ToPrimitive and friends
    // ------------------------------------------------------------------------

    pub(crate) fn to_primitive(&mut self, value: Value, hint: Hint) -> Result<Value, JsError> {
        match value.as_object() {
            Some(obj) => self.default_value(obj, hint),
            None => Ok(value),
        }
    }

    /// `[[DefaultValue]]`: try `toString` first for a String hint, `valueOf`
    /// first otherwise
    fn default_value(&mut self, obj: crate::gc::CellRef, hint: Hint) -> Result<Value, JsError> {
        let order = if hint == Hint::String {
            [atom::TO_STRING, atom::VALUE_OF]
        } else {
            [atom::VALUE_OF, atom::TO_STRING]
        };
        for name in order {
            let method = self.get_property(obj, PropertyKey::Name(name), Value::Cell(obj))?;
            if self.is_callable(method) {
                let result = self.call_value(method, Value::Cell(obj), &[])?;
                if result.is_primitive() {
                    return Ok(result);
                }
            }
        }
        Err(JsError::type_error("invalid default value"))
    }

    pub(crate) fn to_number(&mut self, value: Value) -> Result<f64, JsError> {
        match value {
            Value::Int32(i) => Ok(i as f64),
            Value::Double(d) => Ok(d),
            Value::Boolean(b) => Ok(if b { 1.0 } else { 0.0 }),
            Value::Null => Ok(0.0),
            Value::Undefined | Value::Empty => Ok(f64::NAN),
            Value::Cell(cell) => match cell.kind() {
                CellKind::String => Ok(string_to_number(self.heap.string(cell)?.as_str())),
                CellKind::Object => {
                    let prim = self.to_primitive(value, Hint::Number)?;
                    self.to_number(prim)
                }
                _ => Err(JsError::internal_error("internal cell used as a value")),
            },
        }
    }

    /// ToNumber, keeping the Int32 representation when it already is one
    pub(crate) fn to_numeric(&mut self, value: Value) -> Result<Value, JsError> {
        match value {
            Value::Int32(_) | Value::Double(_) => Ok(value),
            _ => Ok(Value::number(self.to_number(value)?)),
        }
    }

    pub(crate) fn to_int32(&mut self, value: Value) -> Result<i32, JsError> {
        match value {
            Value::Int32(i) => Ok(i),
            _ => Ok(to_int32(self.to_number(value)?)),
        }
    }

    pub(crate) fn to_uint32(&mut self, value: Value) -> Result<u32, JsError> {
        match value {
            Value::Int32(i) => Ok(i as u32),
            _ => Ok(to_uint32(self.to_number(value)?)),
        }
    }

    /// ToString as a shared buffer
    pub(crate) fn to_js_string(&mut self, value: Value) -> Result<JsString, JsError> {
        match value {
            Value::Int32(i) => Ok(JsString::from(i.to_string())),
            Value::Double(d) => Ok(JsString::from(number_to_string(d))),
            Value::Boolean(b) => Ok(JsString::from(if b { "true" } else { "false" })),
            Value::Null => Ok(JsString::from("null")),
            Value::Undefined | Value::Empty => Ok(JsString::from("undefined")),
            Value::Cell(cell) => match cell.kind() {
                CellKind::String => Ok(self.heap.string(cell)?.clone()),
                CellKind::Object => {
                    let prim = self.to_primitive(value, Hint::String)?;
                    self.to_js_string(prim)
                }
                _ => Err(JsError::internal_error("internal cell used as a value")),
            },
        }
    }

    /// ToString as a value; strings are returned as they are
    pub(crate) fn to_string_value(&mut self, value: Value) -> Result<Value, JsError> {
        if value.is_string() {
            return Ok(value);
        }
        let s = self.to_js_string(value)?;
        self.new_string(s)
    }

    /// ToObject: wraps primitives, rejects `null` and `undefined`
    pub(crate) fn to_object(&mut self, value: Value) -> Result<crate::gc::CellRef, JsError> {
        let (prototype, class) = match value {
            Value::Null => return Err(JsError::type_error("null has no properties")),
            Value::Undefined | Value::Empty => {
                return Err(JsError::type_error("undefined has no properties"));
            }
            Value::Boolean(b) => (self.realm.boolean_prototype, ObjectClass::Boolean(b)),
            Value::Int32(_) | Value::Double(_) => (
                self.realm.number_prototype,
                ObjectClass::Number(value.as_number().unwrap_or(f64::NAN)),
            ),
            Value::Cell(cell) => match cell.kind() {
                CellKind::Object => return Ok(cell),
                CellKind::String => {
                    let s = self.heap.string(cell)?.clone();
                    (self.realm.string_prototype, ObjectClass::String(s))
                }
                _ => return Err(JsError::internal_error("internal cell used as a value")),
            },
        };
        self.new_object_with(Some(prototype), class)
    }

    /// Canonical property key of a computed member expression
    pub(crate) fn to_property_key(&mut self, value: Value) -> Result<PropertyKey, JsError> {
        if let Some(index) = value.as_uint32() {
            if index != u32::MAX {
                return Ok(PropertyKey::Index(index));
            }
        }
        let s = self.to_js_string(value)?;
        Ok(match parse_array_index(s.as_str()) {
            Some(index) => PropertyKey::Index(index),
            None => PropertyKey::Name(self.atoms.intern(s.as_str())),
        })
    }

    pub(crate) fn is_callable(&self, value: Value) -> bool {
        value
            .as_object()
            .and_then(|obj| self.heap.object(obj).ok())
            .is_some_and(|o| o.is_callable())
    }

    pub(crate) fn type_of(&self, value: Value) -> &'static str {
        match value {
            Value::Int32(_) | Value::Double(_) => "number",
            Value::Boolean(_) => "boolean",
            Value::Null => "object",
            Value::Undefined | Value::Empty => "undefined",
            Value::Cell(cell) => match cell.kind() {
                CellKind::String => "string",
                _ if self.is_callable(value) => "function",
                _ => "object",
            },
        }
    }

    pub(crate) fn typeof_value(&mut self, value: Value) -> Result<Value, JsError> {
        let name = self.type_of(value);
        self.new_string(name)
    }

    // ------------------------------------------------------------------------
    // Operators
    // ------------------------------------------------------------------------

    /// The `+` operator
    pub(crate) fn add(&mut self, lhs: Value, rhs: Value) -> Result<Value, JsError> {
        if let (Value::Int32(a), Value::Int32(b)) = (lhs, rhs) {
            return Ok(match a.checked_add(b) {
                Some(sum) => Value::Int32(sum),
                None => Value::Double(a as f64 + b as f64),
            });
        }
        if let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) {
            return Ok(Value::number(a + b));
        }
        let lprim = self.to_primitive(lhs, Hint::Default)?;
        let rprim = self.to_primitive(rhs, Hint::Default)?;
        if lprim.is_string() || rprim.is_string() {
            let left = self.to_js_string(lprim)?;
            let right = self.to_js_string(rprim)?;
            return self.new_string(left.concat(right.as_str()));
        }
        let a = self.to_number(lprim)?;
        let b = self.to_number(rprim)?;
        Ok(Value::number(a + b))
    }

    /// `-`, `*`, `/` and `%`
    pub(crate) fn arithmetic(
        &mut self,
        op: Arith,
        lhs: Value,
        rhs: Value,
    ) -> Result<Value, JsError> {
        if let (Value::Int32(a), Value::Int32(b)) = (lhs, rhs) {
            let fast = match op {
                Arith::Sub => a.checked_sub(b),
                // Int32 products of zero may need to be -0
                Arith::Mul if a != 0 && b != 0 => a.checked_mul(b),
                _ => None,
            };
            if let Some(v) = fast {
                return Ok(Value::Int32(v));
            }
        }
        let a = self.to_number(lhs)?;
        let b = self.to_number(rhs)?;
        let result = match op {
            Arith::Sub => a - b,
            Arith::Mul => a * b,
            Arith::Div => a / b,
            Arith::Mod => math::fmod(a, b),
        };
        Ok(Value::number(result))
    }

    /// Shift and bitwise operators
    pub(crate) fn bitwise(&mut self, op: Bitwise, lhs: Value, rhs: Value) -> Result<Value, JsError> {
        let a = self.to_int32(lhs)?;
        match op {
            Bitwise::Shl => {
                let count = self.to_uint32(rhs)? & 0x1f;
                Ok(Value::Int32(a.wrapping_shl(count)))
            }
            Bitwise::Shr => {
                let count = self.to_uint32(rhs)? & 0x1f;
                Ok(Value::Int32(a >> count))
            }
            Bitwise::UShr => {
                let count = self.to_uint32(rhs)? & 0x1f;
                Ok(Value::number(((a as u32) >> count) as f64))
            }
            Bitwise::And => Ok(Value::Int32(a & self.to_int32(rhs)?)),
            Bitwise::Or => Ok(Value::Int32(a | self.to_int32(rhs)?)),
            Bitwise::Xor => Ok(Value::Int32(a ^ self.to_int32(rhs)?)),
        }
    }

    /// Abstract relational comparison `x < y`; `left_first` controls the
    /// order in which the operands are converted
    pub(crate) fn compare(
        &mut self,
        x: Value,
        y: Value,
        left_first: bool,
    ) -> Result<CompareResult, JsError> {
        if let (Value::Int32(a), Value::Int32(b)) = (x, y) {
            return Ok(CompareResult::from_bool(a < b));
        }
        let (px, py) = if left_first {
            let px = self.to_primitive(x, Hint::Number)?;
            let py = self.to_primitive(y, Hint::Number)?;
            (px, py)
        } else {
            let py = self.to_primitive(y, Hint::Number)?;
            let px = self.to_primitive(x, Hint::Number)?;
            (px, py)
        };
        if let (Some(a), Some(b)) = (px.as_string_cell(), py.as_string_cell()) {
            let a = self.heap.string(a)?;
            let b = self.heap.string(b)?;
            return Ok(compare_strings(a.as_str(), b.as_str()));
        }
        let a = self.to_number(px)?;
        let b = self.to_number(py)?;
        Ok(compare_numbers(a, b))
    }

    /// `<`, `>`, `<=` and `>=`
    pub(crate) fn relational(&mut self, op: Relation, x: Value, y: Value) -> Result<bool, JsError> {
        Ok(match op {
            Relation::Lt => self.compare(x, y, true)? == CompareResult::True,
            Relation::Gt => self.compare(y, x, false)? == CompareResult::True,
            Relation::Lte => self.compare(y, x, false)? == CompareResult::False,
            Relation::Gte => self.compare(x, y, true)? == CompareResult::False,
        })
    }

    /// Abstract equality (`==`)
    pub(crate) fn abstract_equals(&mut self, x: Value, y: Value) -> Result<bool, JsError> {
        if let (Some(a), Some(b)) = (x.as_number(), y.as_number()) {
            return Ok(a == b);
        }
        if x.is_nullish() && y.is_nullish() {
            return Ok(true);
        }
        if x.is_nullish() || y.is_nullish() {
            return Ok(false);
        }
        let same_type = match (x, y) {
            (Value::Boolean(_), Value::Boolean(_)) => true,
            (Value::Cell(a), Value::Cell(b)) => a.kind() == b.kind(),
            _ => false,
        };
        if same_type {
            return Ok(x.strict_equals(&y, &self.heap));
        }
        if x.is_number() && y.is_string() {
            let b = self.to_number(y)?;
            return self.abstract_equals(x, Value::number(b));
        }
        if x.is_string() && y.is_number() {
            let a = self.to_number(x)?;
            return self.abstract_equals(Value::number(a), y);
        }
        if let Value::Boolean(b) = x {
            return self.abstract_equals(Value::Int32(i32::from(b)), y);
        }
        if let Value::Boolean(b) = y {
            return self.abstract_equals(x, Value::Int32(i32::from(b)));
        }
        if (x.is_number() || x.is_string()) && y.is_object() {
            let py = self.to_primitive(y, Hint::Default)?;
            return self.abstract_equals(x, py);
        }
        if x.is_object() && (y.is_number() || y.is_string()) {
            let px = self.to_primitive(x, Hint::Default)?;
            return self.abstract_equals(px, y);
        }
        Ok(false)
    }

    /// `x instanceof f`
    pub(crate) fn instance_of(&mut self, x: Value, f: Value) -> Result<bool, JsError> {
        let Some(function) = f.as_object() else {
            return Err(JsError::type_error("instanceof requires object"));
        };
        if !self.heap.object(function)?.is_callable() {
            return Err(JsError::type_error("instanceof requires constructor"));
        }
        let Some(mut obj) = x.as_object() else {
            return Ok(false);
        };
        let proto = self.get_property(function, PropertyKey::Name(atom::PROTOTYPE), f)?;
        let Some(proto) = proto.as_object() else {
            return Err(JsError::type_error("instanceof requires object"));
        };
        while let Some(next) = self.heap.object(obj)?.prototype {
            if next == proto {
                return Ok(true);
            }
            obj = next;
        }
        Ok(false)
    }

    /// `key in obj`
    pub(crate) fn has_in(&mut self, key: Value, obj: Value) -> Result<bool, JsError> {
        let Some(obj) = obj.as_object() else {
            return Err(JsError::type_error("in requires object"));
        };
        let key = self.to_property_key(key)?;
        self.has_property(obj, key)
    }

    /// New value for `++`/`--` on an already-read old value
    pub(crate) fn increment(&mut self, old: Value, delta: i32) -> Result<(Value, Value), JsError> {
        let old = self.to_numeric(old)?;
        let new = match old {
            Value::Int32(i) => match i.checked_add(delta) {
                Some(n) => Value::Int32(n),
                None => Value::Double(i as f64 + delta as f64),
            },
            _ => Value::number(old.as_number().unwrap_or(f64::NAN) + delta as f64),
        };
        Ok((old, new))
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Arith {
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy)]
pub enum Bitwise {
    Shl,
    Shr,
    UShr,
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone, Copy)]
pub enum Relation {
    Lt,
    Gt,
    Lte,
    Gte,
}
