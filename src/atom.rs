//! Interned property names.
//!
//! Every named property key and binding name is interned once per engine so
//! shapes, environments and inline caches compare names as integers. The
//! table belongs to one `Engine` and is passed explicitly to whatever needs
//! it; there is no process-wide registry.

use rustc_hash::FxHashMap;

use crate::value::JsString;

/// Interned name handle. Only meaningful for the table that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Atom(u32);

impl Atom {
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

/// A table mapping string content to a stable `Atom`.
///
/// Strings inserted into the table share one `JsString` buffer, so resolving
/// an atom back to a string is a cheap reference-count bump.
pub struct AtomTable {
    /// Map from string content to its atom
    ids: FxHashMap<Box<str>, Atom>,
    /// Atom index to shared string buffer
    names: Vec<JsString>,
}

impl AtomTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            ids: FxHashMap::default(),
            names: Vec::new(),
        }
    }

    /// Create a table pre-populated with the names the engine looks up itself.
    pub fn with_common_names() -> Self {
        let mut table = Self::new();
        for name in COMMON_NAMES {
            table.intern(name);
        }
        table
    }

    /// Get the atom for `s`, inserting it on first use.
    pub fn intern(&mut self, s: &str) -> Atom {
        if let Some(atom) = self.ids.get(s) {
            return *atom;
        }
        let atom = Atom(self.names.len() as u32);
        self.names.push(JsString::from(s));
        self.ids.insert(s.into(), atom);
        atom
    }

    /// Get an existing atom without inserting.
    pub fn lookup(&self, s: &str) -> Option<Atom> {
        self.ids.get(s).copied()
    }

    /// Shared string buffer behind an atom.
    pub fn name(&self, atom: Atom) -> JsString {
        match self.names.get(atom.0 as usize) {
            Some(s) => s.clone(),
            None => JsString::from(""),
        }
    }

    /// Borrow the text behind an atom.
    pub fn as_str(&self, atom: Atom) -> &str {
        match self.names.get(atom.0 as usize) {
            Some(s) => s.as_str(),
            None => "",
        }
    }

    /// Number of interned names.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for AtomTable {
    fn default() -> Self {
        Self::new()
    }
}

// Atoms of the common names; valid for tables built by `with_common_names`
pub const LENGTH: Atom = Atom(0);
pub const PROTOTYPE: Atom = Atom(1);
pub const CONSTRUCTOR: Atom = Atom(2);
pub const NAME: Atom = Atom(3);
pub const MESSAGE: Atom = Atom(4);
pub const ARGUMENTS: Atom = Atom(5);
pub const CALLEE: Atom = Atom(6);
pub const CALLER: Atom = Atom(7);
pub const VALUE_OF: Atom = Atom(8);
pub const TO_STRING: Atom = Atom(9);
pub const EVAL: Atom = Atom(10);
pub const UNDEFINED: Atom = Atom(11);
pub const NAN: Atom = Atom(12);
pub const INFINITY: Atom = Atom(13);
pub const VALUE: Atom = Atom(14);
pub const WRITABLE: Atom = Atom(15);
pub const GET: Atom = Atom(16);
pub const SET: Atom = Atom(17);
pub const ENUMERABLE: Atom = Atom(18);
pub const CONFIGURABLE: Atom = Atom(19);

/// Names interned up front because the engine itself looks them up.
const COMMON_NAMES: &[&str] = &[
    "length",
    "prototype",
    "constructor",
    "name",
    "message",
    "arguments",
    "callee",
    "caller",
    "valueOf",
    "toString",
    "eval",
    "undefined",
    "NaN",
    "Infinity",
    "value",
    "writable",
    "get",
    "set",
    "enumerable",
    "configurable",
];
