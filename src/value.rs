//! Value representation and the pure ECMAScript conversions.
//!
//! `Value` is the fixed-size tagged union used on the operand stack, in
//! property slots and in bindings. Heap-backed values (strings, objects and
//! internal cells) are `CellRef` handles into the [`Heap`]; everything else is
//! stored inline. Conversions that can run user code (ToPrimitive, ToObject,
//! ToNumber/ToString on objects) live on the engine; this module only holds
//! the ones that never call back into script.

use std::fmt;
use std::sync::Arc;

use crate::gc::{CellKind, CellRef, Heap};
use crate::prelude::math;

/// 2^32, the modulus for ToUint32/ToInt32
const TWO_POW_32: f64 = 4_294_967_296.0;

// ═══════════════════════════════════════════════════════════════════════════════
// JsString
// ═══════════════════════════════════════════════════════════════════════════════

/// Shared, immutable string buffer.
///
/// The buffer is reference counted atomically: copies and string cells that
/// share content release it independently of the collector.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JsString(Arc<str>);

impl JsString {
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Length in UTF-16 code units, as observed by scripts
    pub fn utf16_len(&self) -> usize {
        self.0.encode_utf16().count()
    }

    /// Single code unit at a UTF-16 index, as a one-unit string
    pub fn code_unit_at(&self, index: usize) -> Option<JsString> {
        let unit = self.0.encode_utf16().nth(index)?;
        Some(JsString::from(String::from_utf16_lossy(&[unit])))
    }

    /// Number of strong references to the buffer
    pub fn share_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub fn concat(&self, other: &str) -> JsString {
        let mut s = String::with_capacity(self.0.len() + other.len());
        s.push_str(&self.0);
        s.push_str(other);
        JsString::from(s)
    }
}

impl AsRef<str> for JsString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for JsString {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for JsString {
    fn eq(&self, other: &str) -> bool {
        self.0.as_ref() == other
    }
}

impl PartialEq<&str> for JsString {
    fn eq(&self, other: &&str) -> bool {
        self.0.as_ref() == *other
    }
}

impl From<&str> for JsString {
    fn from(s: &str) -> Self {
        JsString(s.into())
    }
}

impl From<String> for JsString {
    fn from(s: String) -> Self {
        JsString(s.into())
    }
}

impl fmt::Debug for JsString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl fmt::Display for JsString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &*self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Value
// ═══════════════════════════════════════════════════════════════════════════════

/// Fixed-width tagged value
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum Value {
    Double(f64),
    Int32(i32),
    Boolean(bool),
    Null,
    #[default]
    Undefined,
    /// Internal marker: array holes, uninitialized slots, finally bookkeeping
    Empty,
    /// Reference to a heap cell (string, object or internal cell)
    Cell(CellRef),
}

/// Outcome of the abstract relational comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareResult {
    True,
    False,
    /// At least one operand was NaN
    Undefined,
}

impl CompareResult {
    #[inline]
    pub fn from_bool(b: bool) -> Self {
        if b {
            CompareResult::True
        } else {
            CompareResult::False
        }
    }
}

impl Value {
    /// Number value, stored as Int32 when it is an integer that fits and is not -0
    #[inline]
    pub fn number(n: f64) -> Value {
        let i = n as i32;
        if i as f64 == n && !(n == 0.0 && n.is_sign_negative()) {
            Value::Int32(i)
        } else {
            Value::Double(n)
        }
    }

    #[inline]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// `null` or `undefined`
    #[inline]
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Null | Value::Undefined)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    #[inline]
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Double(_) | Value::Int32(_))
    }

    #[inline]
    pub fn is_boolean(&self) -> bool {
        matches!(self, Value::Boolean(_))
    }

    #[inline]
    pub fn is_string(&self) -> bool {
        matches!(self, Value::Cell(r) if r.kind() == CellKind::String)
    }

    #[inline]
    pub fn is_object(&self) -> bool {
        matches!(self, Value::Cell(r) if r.kind() == CellKind::Object)
    }

    /// Anything that is not an object
    #[inline]
    pub fn is_primitive(&self) -> bool {
        !self.is_object()
    }

    #[inline]
    pub fn as_cell(&self) -> Option<CellRef> {
        match self {
            Value::Cell(r) => Some(*r),
            _ => None,
        }
    }

    #[inline]
    pub fn as_object(&self) -> Option<CellRef> {
        match self {
            Value::Cell(r) if r.kind() == CellKind::Object => Some(*r),
            _ => None,
        }
    }

    #[inline]
    pub fn as_string_cell(&self) -> Option<CellRef> {
        match self {
            Value::Cell(r) if r.kind() == CellKind::String => Some(*r),
            _ => None,
        }
    }

    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            Value::Int32(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Exact uint32 value of a number, if it is one
    pub fn as_uint32(&self) -> Option<u32> {
        match self {
            Value::Int32(i) if *i >= 0 => Some(*i as u32),
            Value::Double(d) => {
                let u = *d as u32;
                if u as f64 == *d { Some(u) } else { None }
            }
            _ => None,
        }
    }

    /// ToBoolean. Strings need the heap to check for emptiness.
    pub fn to_boolean(&self, heap: &Heap) -> bool {
        match self {
            Value::Boolean(b) => *b,
            Value::Int32(i) => *i != 0,
            Value::Double(d) => !(d.is_nan() || *d == 0.0),
            Value::Null | Value::Undefined | Value::Empty => false,
            Value::Cell(r) => match r.kind() {
                CellKind::String => heap.string(*r).map(|s| !s.is_empty()).unwrap_or(false),
                _ => true,
            },
        }
    }

    /// Strict equality (`===`)
    pub fn strict_equals(&self, other: &Value, heap: &Heap) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Empty, Value::Empty) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (a, b) if a.is_number() && b.is_number() => a.as_number() == b.as_number(),
            (Value::Cell(a), Value::Cell(b)) => {
                if a.kind() == CellKind::String && b.kind() == CellKind::String {
                    a == b || heap.string(*a).ok() == heap.string(*b).ok()
                } else {
                    a == b
                }
            }
            _ => false,
        }
    }

    /// SameValue: like strict equality, but NaN equals NaN and +0 differs from -0
    pub fn same_value(&self, other: &Value, heap: &Heap) -> bool {
        if let (Some(a), Some(b)) = (self.as_number(), other.as_number()) {
            if a.is_nan() && b.is_nan() {
                return true;
            }
            return a == b && a.is_sign_negative() == b.is_sign_negative();
        }
        self.strict_equals(other, heap)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Number conversions
// ═══════════════════════════════════════════════════════════════════════════════

/// ToUint32 on an already-converted number
pub fn to_uint32(n: f64) -> u32 {
    if !n.is_finite() || n == 0.0 {
        return 0;
    }
    let int = math::trunc(n);
    let mut m = math::fmod(int, TWO_POW_32);
    if m < 0.0 {
        m += TWO_POW_32;
    }
    m as u32
}

/// ToInt32 on an already-converted number
#[inline]
pub fn to_int32(n: f64) -> i32 {
    to_uint32(n) as i32
}

/// Number::toString for radix 10
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let i = n as i32;
    if i as f64 == n {
        return i.to_string();
    }
    let mut buffer = ryu_js::Buffer::new();
    buffer.format(n).to_string()
}

fn is_js_whitespace(c: char) -> bool {
    matches!(
        c,
        '\u{0009}'
            | '\u{000B}'
            | '\u{000C}'
            | ' '
            | '\u{00A0}'
            | '\u{FEFF}'
            | '\n'
            | '\r'
            | '\u{2028}'
            | '\u{2029}'
    ) || (c != '\u{FEFF}' && c.is_whitespace())
}

/// ToNumber applied to a string (StringNumericLiteral grammar)
pub fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim_matches(is_js_whitespace);
    if trimmed.is_empty() {
        return 0.0;
    }
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        if hex.is_empty() {
            return f64::NAN;
        }
        let mut value = 0.0f64;
        for c in hex.chars() {
            match c.to_digit(16) {
                Some(d) => value = value * 16.0 + d as f64,
                None => return f64::NAN,
            }
        }
        return value;
    }
    let (sign, unsigned) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    if unsigned == "Infinity" {
        return sign * f64::INFINITY;
    }
    // Rust's float grammar also accepts "inf" and "nan"; ours does not
    let valid = !unsigned.is_empty()
        && unsigned
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
        && unsigned.chars().next().is_some_and(|c| c.is_ascii_digit() || c == '.');
    if !valid || unsigned == "." {
        return f64::NAN;
    }
    match unsigned.parse::<f64>() {
        Ok(v) => sign * v,
        Err(_) => f64::NAN,
    }
}

/// Canonical array index ("0", "1", ... up to 2^32 - 2), if `s` is one
pub fn parse_array_index(s: &str) -> Option<u32> {
    let bytes = s.as_bytes();
    let first = *bytes.first()?;
    if !first.is_ascii_digit() || (first == b'0' && bytes.len() > 1) || bytes.len() > 10 {
        return None;
    }
    let mut value: u64 = 0;
    for b in bytes {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value * 10 + u64::from(b - b'0');
    }
    if value < u64::from(u32::MAX) {
        Some(value as u32)
    } else {
        None
    }
}

/// Abstract relational comparison on two numbers
pub fn compare_numbers(x: f64, y: f64) -> CompareResult {
    if x.is_nan() || y.is_nan() {
        CompareResult::Undefined
    } else {
        CompareResult::from_bool(x < y)
    }
}

/// Abstract relational comparison on two strings (code unit order)
pub fn compare_strings(x: &str, y: &str) -> CompareResult {
    CompareResult::from_bool(x.encode_utf16().lt(y.encode_utf16()))
}
