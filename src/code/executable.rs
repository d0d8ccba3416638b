//! Linked code: what the VM actually runs

use std::rc::Rc;

use super::{Code, CodeKind, Constant, Handler};
use crate::atom::{Atom, AtomTable};
use crate::error::JsError;
use crate::ic::InlineCache;
use crate::object::PropertyKey;
use crate::value::{JsString, parse_array_index};

/// Constant with strings already turned into shared buffers
#[derive(Debug, Clone)]
pub enum LinkedConstant {
    Number(f64),
    String(JsString),
    Boolean(bool),
    Null,
    Undefined,
}

/// A declaration bound during instantiation: the name, and the frame slot it
/// lives in when it is a local
#[derive(Debug, Clone, Copy)]
pub struct FunctionBinding {
    pub name: Atom,
    pub code: u16,
    pub slot: Option<u16>,
}

/// Validated code with names interned and nested codes linked
#[derive(Debug)]
pub struct Executable {
    pub name: Atom,
    pub kind: CodeKind,
    pub strict: bool,
    pub instructions: Box<[u8]>,
    pub constants: Box<[LinkedConstant]>,
    pub names: Box<[Atom]>,
    /// `names` as property keys (index-like names become indices)
    pub keys: Box<[PropertyKey]>,
    pub params: Box<[Atom]>,
    /// Frame slot per parameter, when the parameter is a local
    pub param_slots: Box<[Option<u16>]>,
    pub local_count: usize,
    pub var_decls: Box<[(Atom, Option<u16>)]>,
    pub function_decls: Box<[FunctionBinding]>,
    pub uses_arguments: bool,
    pub arguments_slot: Option<u16>,
    /// The activation needs a heap environment
    pub needs_env: bool,
    pub named_expression: bool,
    pub exception_table: Box<[Handler]>,
    pub stack_depth: usize,
    pub children: Box<[Rc<Executable>]>,
    pub cache: InlineCache,
}

impl Executable {
    /// Link a validated code unit and all its nested codes
    pub fn link(code: Code, atoms: &mut AtomTable) -> Result<Rc<Executable>, JsError> {
        let Code {
            name,
            kind,
            strict,
            params,
            locals,
            var_decls,
            function_decls,
            uses_arguments,
            needs_env,
            named_expression,
            instructions,
            constants,
            names,
            codes,
            exception_table,
            stack_depth,
        } = code;

        let slot_of = |name: &str| locals.iter().position(|l| l == name).map(|i| i as u16);

        let param_slots: Box<[Option<u16>]> = params.iter().map(|p| slot_of(p)).collect();
        let var_slots: Vec<Option<u16>> = var_decls.iter().map(|v| slot_of(v)).collect();
        let arguments_slot = if uses_arguments { slot_of("arguments") } else { None };

        let mut children = Vec::with_capacity(codes.len());
        for child in codes {
            children.push(Executable::link(child, atoms)?);
        }

        let mut decls = Vec::with_capacity(function_decls.len());
        for decl in &function_decls {
            if decl.code as usize >= children.len() {
                return Err(JsError::internal_error(format!(
                    "function declaration '{}' names missing code",
                    decl.name
                )));
            }
            decls.push(FunctionBinding {
                name: atoms.intern(&decl.name),
                code: decl.code,
                slot: slot_of(&decl.name),
            });
        }

        // Anything not living in a frame slot needs a real environment
        let heap_bound = param_slots.iter().any(Option::is_none)
            || var_slots.iter().any(Option::is_none)
            || decls.iter().any(|d| d.slot.is_none())
            || (uses_arguments && arguments_slot.is_none());
        let needs_env = needs_env || (kind == CodeKind::Function && heap_bound);

        let keys = names
            .iter()
            .map(|n| match parse_array_index(n) {
                Some(index) => PropertyKey::Index(index),
                None => PropertyKey::Name(atoms.intern(n)),
            })
            .collect();
        let name_atoms = names.iter().map(|n| atoms.intern(n)).collect();

        let cache = InlineCache::for_instructions(
            super::Instructions {
                bytes: &instructions,
                pc: 0,
            }
            .map(|i| (i.offset, i.op)),
        );

        let constants = constants
            .into_iter()
            .map(|c| match c {
                Constant::Number(n) => LinkedConstant::Number(n),
                Constant::String(s) => LinkedConstant::String(JsString::from(s)),
                Constant::Boolean(b) => LinkedConstant::Boolean(b),
                Constant::Null => LinkedConstant::Null,
                Constant::Undefined => LinkedConstant::Undefined,
            })
            .collect();

        Ok(Rc::new(Executable {
            name: atoms.intern(&name),
            kind,
            strict,
            instructions: instructions.into_boxed_slice(),
            constants,
            names: name_atoms,
            keys,
            params: params.iter().map(|p| atoms.intern(p)).collect(),
            param_slots,
            local_count: locals.len(),
            var_decls: var_decls
                .iter()
                .zip(var_slots)
                .map(|(v, slot)| (atoms.intern(v), slot))
                .collect(),
            function_decls: decls.into_boxed_slice(),
            uses_arguments,
            arguments_slot,
            needs_env,
            named_expression,
            exception_table: exception_table.into_boxed_slice(),
            stack_depth: stack_depth as usize,
            children: children.into_boxed_slice(),
            cache,
        }))
    }

    /// Innermost Catch/Finally row covering `pc`
    pub fn find_handler(&self, pc: usize) -> Option<Handler> {
        self.exception_table
            .iter()
            .filter(|h| h.kind != super::HandlerKind::Iter && h.covers(pc))
            .min_by_key(|h| h.end.saturating_sub(h.begin))
            .copied()
    }

    #[inline]
    pub fn name_at(&self, index: u16) -> Result<Atom, JsError> {
        self.names
            .get(index as usize)
            .copied()
            .ok_or_else(|| JsError::internal_error(format!("name index {} out of range", index)))
    }

    #[inline]
    pub fn key_at(&self, index: u16) -> Result<PropertyKey, JsError> {
        self.keys
            .get(index as usize)
            .copied()
            .ok_or_else(|| JsError::internal_error(format!("name index {} out of range", index)))
    }

    pub fn child(&self, index: u16) -> Result<Rc<Executable>, JsError> {
        self.children
            .get(index as usize)
            .cloned()
            .ok_or_else(|| JsError::internal_error(format!("code index {} out of range", index)))
    }

    /// Declared parameter count, reported as a function's `length`
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}
