//! Lexical environments.
//!
//! A chain of scope records walked by name resolution. Function and
//! declarative records hold their bindings directly; object records (the
//! global scope and `with`) forward to an object's properties; static records
//! hold exactly one immutable-by-scope binding, used for `catch` parameters
//! and named function expressions.

use crate::atom::Atom;
use crate::gc::{CellRef, Trace, Tracer};
use crate::prelude::{IndexMap, index_map_new};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Binding {
    pub value: Value,
    pub mutable: bool,
    /// Created by non-strict eval, removable with `delete`
    pub deletable: bool,
}

impl Binding {
    pub fn mutable(value: Value) -> Self {
        Self {
            value,
            mutable: true,
            deletable: false,
        }
    }

    pub fn immutable(value: Value) -> Self {
        Self {
            value,
            mutable: false,
            deletable: false,
        }
    }

    pub fn deletable(value: Value) -> Self {
        Self {
            value,
            mutable: true,
            deletable: true,
        }
    }
}

pub enum EnvKind {
    Declarative {
        bindings: IndexMap<Atom, Binding>,
    },
    /// Activation record of a function call
    Function {
        bindings: IndexMap<Atom, Binding>,
        callee: CellRef,
    },
    /// Bindings are the properties of `object`
    Object {
        object: CellRef,
        /// `with` scopes supply their object as the implicit `this`
        provide_this: bool,
    },
    Static {
        name: Atom,
        value: Value,
        mutable: bool,
    },
}

pub struct Environment {
    pub outer: Option<CellRef>,
    pub kind: EnvKind,
}

impl Environment {
    pub fn declarative(outer: Option<CellRef>) -> Self {
        Self {
            outer,
            kind: EnvKind::Declarative {
                bindings: index_map_new(),
            },
        }
    }

    pub fn function(outer: CellRef, callee: CellRef) -> Self {
        Self {
            outer: Some(outer),
            kind: EnvKind::Function {
                bindings: index_map_new(),
                callee,
            },
        }
    }

    pub fn object(outer: Option<CellRef>, object: CellRef, provide_this: bool) -> Self {
        Self {
            outer,
            kind: EnvKind::Object {
                object,
                provide_this,
            },
        }
    }

    /// Single binding scope; `catch` parameters are mutable, function
    /// expression names are not
    pub fn single(outer: CellRef, name: Atom, value: Value, mutable: bool) -> Self {
        Self {
            outer: Some(outer),
            kind: EnvKind::Static {
                name,
                value,
                mutable,
            },
        }
    }

    pub fn bindings_mut(&mut self) -> Option<&mut IndexMap<Atom, Binding>> {
        match &mut self.kind {
            EnvKind::Declarative { bindings } | EnvKind::Function { bindings, .. } => {
                Some(bindings)
            }
            _ => None,
        }
    }

    /// Implicit `this` for calls through an unqualified name
    pub fn implicit_this(&self) -> Value {
        match self.kind {
            EnvKind::Object {
                object,
                provide_this: true,
            } => Value::Cell(object),
            _ => Value::Undefined,
        }
    }
}

impl Trace for Environment {
    fn trace(&self, tracer: &mut Tracer) {
        if let Some(outer) = self.outer {
            tracer.edge(outer);
        }
        match &self.kind {
            EnvKind::Declarative { bindings } => {
                for b in bindings.values() {
                    tracer.value(b.value);
                }
            }
            EnvKind::Function { bindings, callee } => {
                tracer.edge(*callee);
                for b in bindings.values() {
                    tracer.value(b.value);
                }
            }
            EnvKind::Object { object, .. } => tracer.edge(*object),
            EnvKind::Static { value, .. } => tracer.value(*value),
        }
    }
}
