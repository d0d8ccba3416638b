//! Bytecode virtual machine
//!
//! A stack machine over one shared value stack. Every activation (global
//! code, eval code, function calls) is a [`Frame`] whose locals and operand
//! region live on that stack; script-to-script calls push a frame and keep
//! dispatching in the same loop, while calls that enter from native code
//! start a nested [`Engine::execute`] on an *entry* frame.

mod call;
mod convert;
mod names;
mod property;

use std::rc::Rc;

pub use convert::Hint;
pub(crate) use call::Invoked;

use crate::atom::Atom;
use crate::code::{CodeKind, Executable, HandlerKind, LinkedConstant, Op, decode};
use crate::engine::Engine;
use crate::env::Environment;
use crate::error::JsError;
use crate::gc::{CellRef, HeapCell, Trace, Tracer};
use crate::object::{NameIterator, PropertyDescriptor, PropertyKey};
use crate::shape::Attributes;
use crate::value::Value;
use convert::{Arith, Bitwise, Relation};

/// Flag values of the `finally` subroutine protocol
const SUBROUTINE_JUMP: i32 = 0;
const SUBROUTINE_RETURN: i32 = 1;
const SUBROUTINE_RETHROW: i32 = 2;

/// One activation record
pub struct Frame {
    pub exec: Rc<Executable>,
    /// Offset of the next instruction
    pub pc: usize,
    /// Offset of the instruction being executed; for a caller frame, its
    /// call instruction
    pub last_pc: usize,
    /// Start of the call window `[callee, this, args...]`; the stack is
    /// truncated here when the frame returns
    pub callee_index: usize,
    pub locals_base: usize,
    /// Bottom of the operand region; handler stack depths are relative to it
    pub stack_base: usize,
    pub argc: usize,
    pub this: Value,
    pub callee: Option<CellRef>,
    pub lexical_env: CellRef,
    pub variable_env: CellRef,
    /// Catch and with scopes pushed on top of the frame's own scope
    pub dynamic_env_level: u16,
    /// Completion value of global and eval code
    pub ret: Value,
    pub construct: bool,
    /// Entered from native code: returning leaves the dispatch loop
    pub entry: bool,
}

impl Trace for Frame {
    fn trace(&self, tracer: &mut Tracer) {
        tracer.value(self.this);
        tracer.value(self.ret);
        if let Some(callee) = self.callee {
            tracer.edge(callee);
        }
        tracer.edge(self.lexical_env);
        tracer.edge(self.variable_env);
    }
}

/// How an entry frame finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// Ran off the end of its code
    Normal,
    /// Executed `RETURN`
    Return,
}

/// Result of executing one instruction
enum Flow {
    Continue,
    Exit(Value, Exit),
}

impl Engine {
    // ------------------------------------------------------------------------
    // Stack and frame access
    // ------------------------------------------------------------------------

    #[inline]
    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    /// Pop the top value, keeping it alive until the instruction finishes
    #[inline]
    fn pop(&mut self) -> Result<Value, JsError> {
        let value = self
            .stack
            .pop()
            .ok_or_else(|| JsError::internal_error("stack underflow"))?;
        self.heap.pin(value);
        Ok(value)
    }

    /// Value `depth` slots below the top (0 is the top)
    #[inline]
    fn peek(&self, depth: usize) -> Result<Value, JsError> {
        self.stack
            .len()
            .checked_sub(depth + 1)
            .and_then(|i| self.stack.get(i))
            .copied()
            .ok_or_else(|| JsError::internal_error("stack underflow"))
    }

    #[inline]
    pub(crate) fn stack_at(&self, index: usize) -> Result<Value, JsError> {
        self.stack
            .get(index)
            .copied()
            .ok_or_else(|| JsError::internal_error(format!("stack index {} out of range", index)))
    }

    #[inline]
    pub(crate) fn set_stack_at(&mut self, index: usize, value: Value) -> Result<(), JsError> {
        let slot = self
            .stack
            .get_mut(index)
            .ok_or_else(|| JsError::internal_error(format!("stack index {} out of range", index)))?;
        *slot = value;
        Ok(())
    }

    #[inline]
    pub(crate) fn frame(&self) -> Result<&Frame, JsError> {
        self.frames
            .last()
            .ok_or_else(|| JsError::internal_error("no active frame"))
    }

    #[inline]
    pub(crate) fn frame_mut(&mut self) -> Result<&mut Frame, JsError> {
        self.frames
            .last_mut()
            .ok_or_else(|| JsError::internal_error("no active frame"))
    }

    fn local(&self, slot: u16) -> Result<Value, JsError> {
        let base = self.frame()?.locals_base;
        self.stack_at(base + slot as usize)
    }

    fn set_local(&mut self, slot: u16, value: Value) -> Result<(), JsError> {
        let base = self.frame()?.locals_base;
        self.set_stack_at(base + slot as usize, value)
    }

    fn jump(&mut self, target: Option<usize>) -> Result<(), JsError> {
        let target = target.ok_or_else(|| JsError::internal_error("jump without target"))?;
        self.frame_mut()?.pc = target;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Dispatch loop
    // ------------------------------------------------------------------------

    /// Run from the innermost frame until its entry frame returns.
    ///
    /// Values created by an instruction are pinned until it finishes; after
    /// that they are reachable from the stack or the frames.
    pub(crate) fn execute(&mut self) -> Result<(Value, Exit), JsError> {
        loop {
            let mark = self.heap.temp_mark();
            match self.step() {
                Ok(Flow::Continue) => self.heap.release_temps(mark),
                Ok(Flow::Exit(value, exit)) => {
                    self.heap.release_temps(mark);
                    self.heap.pin(value);
                    return Ok((value, exit));
                }
                Err(err) => {
                    self.unwind(err)?;
                    self.heap.release_temps(mark);
                }
            }
        }
    }

    fn step(&mut self) -> Result<Flow, JsError> {
        let frame = self.frame_mut()?;
        let exec = Rc::clone(&frame.exec);
        let instr = decode(&exec.instructions, frame.pc)?;
        frame.last_pc = instr.offset;
        frame.pc = instr.next();
        let operand = instr.operand;
        let strict = exec.strict;

        match instr.op {
            Op::NOP => {}
            Op::DEBUGGER => tracing::debug!(pc = instr.offset, "debugger statement"),

            // ── Stack ──────────────────────────────────────────────────────
            Op::POP_TOP => {
                self.pop()?;
            }
            Op::POP_N => {
                let len = self.stack.len().saturating_sub(operand as usize);
                self.stack.truncate(len);
            }
            Op::DUP_TOP => {
                let top = self.peek(0)?;
                self.push(top);
            }
            Op::DUP_TWO => {
                let a = self.peek(1)?;
                let b = self.peek(0)?;
                self.push(a);
                self.push(b);
            }
            Op::ROT_TWO => self.rotate(2)?,
            Op::ROT_THREE => self.rotate(3)?,
            Op::ROT_FOUR => self.rotate(4)?,

            // ── Literals ───────────────────────────────────────────────────
            Op::PUSH_EMPTY => self.push(Value::Empty),
            Op::PUSH_UNDEFINED => self.push(Value::Undefined),
            Op::PUSH_TRUE => self.push(Value::Boolean(true)),
            Op::PUSH_FALSE => self.push(Value::Boolean(false)),
            Op::PUSH_NULL => self.push(Value::Null),
            Op::PUSH_THIS => {
                let this = self.frame()?.this;
                self.push(this);
            }
            Op::PUSH_INT16 => self.push(Value::Int32(i32::from(operand as i16))),
            Op::PUSH_UINT16 => self.push(Value::Int32(i32::from(operand))),
            Op::LOAD_CONST => {
                let value = self.load_constant(&exec, operand)?;
                self.push(value);
            }

            // ── Operators ──────────────────────────────────────────────────
            Op::UNARY_POSITIVE => {
                let v = self.pop()?;
                let n = self.to_numeric(v)?;
                self.push(n);
            }
            Op::UNARY_NEGATIVE => {
                let v = self.pop()?;
                let result = match self.to_numeric(v)? {
                    Value::Int32(i) if i != 0 && i != i32::MIN => Value::Int32(-i),
                    n => Value::number(-n.as_number().unwrap_or(f64::NAN)),
                };
                self.push(result);
            }
            Op::UNARY_NOT => {
                let v = self.pop()?;
                let b = v.to_boolean(&self.heap);
                self.push(Value::Boolean(!b));
            }
            Op::UNARY_BIT_NOT => {
                let v = self.pop()?;
                let i = self.to_int32(v)?;
                self.push(Value::Int32(!i));
            }
            Op::TYPEOF => {
                let v = self.pop()?;
                let t = self.typeof_value(v)?;
                self.push(t);
            }
            Op::BINARY_ADD => self.binary(|vm, l, r| vm.add(l, r))?,
            Op::BINARY_SUBTRACT => self.binary(|vm, l, r| vm.arithmetic(Arith::Sub, l, r))?,
            Op::BINARY_MULTIPLY => self.binary(|vm, l, r| vm.arithmetic(Arith::Mul, l, r))?,
            Op::BINARY_DIVIDE => self.binary(|vm, l, r| vm.arithmetic(Arith::Div, l, r))?,
            Op::BINARY_MODULO => self.binary(|vm, l, r| vm.arithmetic(Arith::Mod, l, r))?,
            Op::BINARY_LSHIFT => self.binary(|vm, l, r| vm.bitwise(Bitwise::Shl, l, r))?,
            Op::BINARY_RSHIFT => self.binary(|vm, l, r| vm.bitwise(Bitwise::Shr, l, r))?,
            Op::BINARY_RSHIFT_LOGICAL => {
                self.binary(|vm, l, r| vm.bitwise(Bitwise::UShr, l, r))?
            }
            Op::BINARY_BIT_AND => self.binary(|vm, l, r| vm.bitwise(Bitwise::And, l, r))?,
            Op::BINARY_BIT_OR => self.binary(|vm, l, r| vm.bitwise(Bitwise::Or, l, r))?,
            Op::BINARY_BIT_XOR => self.binary(|vm, l, r| vm.bitwise(Bitwise::Xor, l, r))?,
            Op::BINARY_LT => self.predicate(|vm, l, r| vm.relational(Relation::Lt, l, r))?,
            Op::BINARY_LTE => self.predicate(|vm, l, r| vm.relational(Relation::Lte, l, r))?,
            Op::BINARY_GT => self.predicate(|vm, l, r| vm.relational(Relation::Gt, l, r))?,
            Op::BINARY_GTE => self.predicate(|vm, l, r| vm.relational(Relation::Gte, l, r))?,
            Op::BINARY_INSTANCEOF => self.predicate(|vm, l, r| vm.instance_of(l, r))?,
            Op::BINARY_IN => self.predicate(|vm, l, r| vm.has_in(l, r))?,
            Op::BINARY_EQ => self.predicate(|vm, l, r| vm.abstract_equals(l, r))?,
            Op::BINARY_NE => self.predicate(|vm, l, r| Ok(!vm.abstract_equals(l, r)?))?,
            Op::BINARY_STRICT_EQ => self.predicate(|vm, l, r| Ok(l.strict_equals(&r, &vm.heap)))?,
            Op::BINARY_STRICT_NE => {
                self.predicate(|vm, l, r| Ok(!l.strict_equals(&r, &vm.heap)))?
            }

            // ── Names through the scope chain ──────────────────────────────
            Op::LOAD_NAME => {
                let value = self.load_name(exec.name_at(operand)?)?;
                self.push(value);
            }
            Op::STORE_NAME => {
                let value = self.peek(0)?;
                self.store_name(exec.name_at(operand)?, value)?;
            }
            Op::CALL_NAME => {
                let (func, this) = self.call_name(exec.name_at(operand)?)?;
                self.push(func);
                self.push(this);
            }
            Op::DELETE_NAME => {
                let deleted = self.delete_name(exec.name_at(operand)?)?;
                self.push(Value::Boolean(deleted));
            }
            Op::TYPEOF_NAME => {
                let t = self.typeof_name(exec.name_at(operand)?)?;
                self.push(t);
            }
            Op::INCREMENT_NAME => self.increment_name(exec.name_at(operand)?, 1, true)?,
            Op::DECREMENT_NAME => self.increment_name(exec.name_at(operand)?, -1, true)?,
            Op::POSTFIX_INCREMENT_NAME => self.increment_name(exec.name_at(operand)?, 1, false)?,
            Op::POSTFIX_DECREMENT_NAME => {
                self.increment_name(exec.name_at(operand)?, -1, false)?
            }

            // ── Frame locals ───────────────────────────────────────────────
            Op::LOAD_LOCAL => {
                let value = self.local(operand)?;
                self.push(value);
            }
            Op::STORE_LOCAL => {
                let value = self.peek(0)?;
                self.set_local(operand, value)?;
            }
            Op::CALL_LOCAL => {
                let value = self.local(operand)?;
                self.push(value);
                self.push(Value::Undefined);
            }
            Op::DELETE_LOCAL => self.push(Value::Boolean(false)),
            Op::TYPEOF_LOCAL => {
                let value = self.local(operand)?;
                let t = self.typeof_value(value)?;
                self.push(t);
            }
            Op::INCREMENT_LOCAL => self.increment_local(operand, 1, true)?,
            Op::DECREMENT_LOCAL => self.increment_local(operand, -1, true)?,
            Op::POSTFIX_INCREMENT_LOCAL => self.increment_local(operand, 1, false)?,
            Op::POSTFIX_DECREMENT_LOCAL => self.increment_local(operand, -1, false)?,

            // ── Global object ──────────────────────────────────────────────
            Op::LOAD_GLOBAL => {
                let value = self.load_global(&exec, instr.offset, exec.name_at(operand)?)?;
                self.push(value);
            }
            Op::STORE_GLOBAL => {
                let value = self.peek(0)?;
                self.store_global(&exec, instr.offset, exec.name_at(operand)?, value)?;
            }
            Op::CALL_GLOBAL => {
                let value = self.load_global(&exec, instr.offset, exec.name_at(operand)?)?;
                self.push(value);
                self.push(Value::Undefined);
            }
            Op::DELETE_GLOBAL => {
                let key = PropertyKey::Name(exec.name_at(operand)?);
                let global = self.realm.global;
                let deleted = if self.has_property(global, key)? {
                    self.delete_property(global, key, false)?
                } else {
                    true
                };
                self.push(Value::Boolean(deleted));
            }
            Op::TYPEOF_GLOBAL => {
                let name = exec.name_at(operand)?;
                let t = if self.has_property(self.realm.global, PropertyKey::Name(name))? {
                    let value = self.load_global(&exec, instr.offset, name)?;
                    self.typeof_value(value)?
                } else {
                    self.new_string("undefined")?
                };
                self.push(t);
            }
            Op::INCREMENT_GLOBAL => self.increment_global(&exec, instr.offset, operand, 1, true)?,
            Op::DECREMENT_GLOBAL => {
                self.increment_global(&exec, instr.offset, operand, -1, true)?
            }
            Op::POSTFIX_INCREMENT_GLOBAL => {
                self.increment_global(&exec, instr.offset, operand, 1, false)?
            }
            Op::POSTFIX_DECREMENT_GLOBAL => {
                self.increment_global(&exec, instr.offset, operand, -1, false)?
            }

            // ── Named properties ───────────────────────────────────────────
            Op::LOAD_PROP => {
                let base = self.pop()?;
                let value = self.load_named(&exec, instr.offset, base, exec.key_at(operand)?)?;
                self.push(value);
            }
            Op::STORE_PROP => {
                let value = self.pop()?;
                let base = self.pop()?;
                let key = exec.key_at(operand)?;
                self.store_named(&exec, instr.offset, base, key, value, strict)?;
                self.push(value);
            }
            Op::DELETE_PROP => {
                let base = self.pop()?;
                let deleted = self.delete_value(base, exec.key_at(operand)?, strict)?;
                self.push(Value::Boolean(deleted));
            }
            Op::CALL_PROP => {
                let base = self.pop()?;
                let func = self.load_named(&exec, instr.offset, base, exec.key_at(operand)?)?;
                self.push(func);
                self.push(base);
            }
            Op::INCREMENT_PROP => self.increment_prop(&exec, instr.offset, operand, 1, true)?,
            Op::DECREMENT_PROP => self.increment_prop(&exec, instr.offset, operand, -1, true)?,
            Op::POSTFIX_INCREMENT_PROP => {
                self.increment_prop(&exec, instr.offset, operand, 1, false)?
            }
            Op::POSTFIX_DECREMENT_PROP => {
                self.increment_prop(&exec, instr.offset, operand, -1, false)?
            }

            // ── Computed properties ────────────────────────────────────────
            Op::LOAD_ELEMENT => {
                let key = self.pop()?;
                let base = self.pop()?;
                let key = self.element_key(base, key)?;
                let value = self.get_value(base, key)?;
                self.push(value);
            }
            Op::STORE_ELEMENT => {
                let value = self.pop()?;
                let key = self.pop()?;
                let base = self.pop()?;
                let key = self.element_key(base, key)?;
                self.put_value(base, key, value, strict)?;
                self.push(value);
            }
            Op::DELETE_ELEMENT => {
                let key = self.pop()?;
                let base = self.pop()?;
                let key = self.element_key(base, key)?;
                let deleted = self.delete_value(base, key, strict)?;
                self.push(Value::Boolean(deleted));
            }
            Op::CALL_ELEMENT => {
                let key = self.pop()?;
                let base = self.pop()?;
                let key = self.element_key(base, key)?;
                let func = self.get_value(base, key)?;
                self.push(func);
                self.push(base);
            }
            Op::INCREMENT_ELEMENT => self.increment_element(1, true, strict)?,
            Op::DECREMENT_ELEMENT => self.increment_element(-1, true, strict)?,
            Op::POSTFIX_INCREMENT_ELEMENT => self.increment_element(1, false, strict)?,
            Op::POSTFIX_DECREMENT_ELEMENT => self.increment_element(-1, false, strict)?,

            // ── Call results used as references ────────────────────────────
            Op::STORE_CALL_RESULT | Op::INCREMENT_CALL_RESULT => {
                return Err(JsError::reference_error("target is not reference"));
            }
            Op::DELETE_CALL_RESULT => {
                self.pop()?;
                self.push(Value::Boolean(true));
            }
            Op::CALL_CALL_RESULT => self.push(Value::Undefined),

            // ── Literals with structure ────────────────────────────────────
            Op::BUILD_OBJECT => {
                let obj = self.new_object()?;
                self.push(Value::Cell(obj));
            }
            Op::STORE_OBJECT_DATA => {
                let desc = PropertyDescriptor::data(self.pop()?, Attributes::DEFAULT);
                self.define_on_top(exec.key_at(operand)?, desc)?;
            }
            Op::STORE_OBJECT_GET => {
                let desc = PropertyDescriptor {
                    get: Some(self.pop()?),
                    enumerable: Some(true),
                    configurable: Some(true),
                    ..PropertyDescriptor::default()
                };
                self.define_on_top(exec.key_at(operand)?, desc)?;
            }
            Op::STORE_OBJECT_SET => {
                let desc = PropertyDescriptor {
                    set: Some(self.pop()?),
                    enumerable: Some(true),
                    configurable: Some(true),
                    ..PropertyDescriptor::default()
                };
                self.define_on_top(exec.key_at(operand)?, desc)?;
            }
            Op::BUILD_ARRAY => {
                let array = self.new_array(u32::from(operand))?;
                self.push(Value::Cell(array));
            }
            Op::INIT_VECTOR_ARRAY_ELEMENT | Op::INIT_SPARSE_ARRAY_ELEMENT => {
                let value = self.pop()?;
                let array = self
                    .peek(0)?
                    .as_object()
                    .ok_or_else(|| JsError::internal_error("array literal without array"))?;
                if !value.is_empty() {
                    let limit = self.config.dense_limit;
                    self.heap
                        .object_mut(array)?
                        .elements
                        .set_value(u32::from(operand), value, limit);
                }
            }
            Op::BUILD_FUNCTION => {
                let child = exec.child(operand)?;
                let scope = self.frame()?.lexical_env;
                let function = self.make_closure(child, scope)?;
                self.push(Value::Cell(function));
            }

            // ── Calls ──────────────────────────────────────────────────────
            Op::CALL | Op::CONSTRUCT | Op::EVAL => {
                let argc = operand as usize;
                let callee_index = self
                    .stack
                    .len()
                    .checked_sub(argc + 2)
                    .ok_or_else(|| JsError::internal_error("call window underflow"))?;
                if instr.op == Op::EVAL
                    && self.stack_at(callee_index)? == Value::Cell(self.realm.eval_function)
                {
                    let arg = if argc > 0 {
                        self.stack_at(callee_index + 2)?
                    } else {
                        Value::Undefined
                    };
                    let result = self.eval_source(arg, true)?;
                    self.stack.truncate(callee_index);
                    self.push(result);
                } else {
                    let construct = instr.op == Op::CONSTRUCT;
                    if let Invoked::Done(result) =
                        self.invoke(callee_index, argc, construct, false)?
                    {
                        self.push(result);
                    }
                }
            }

            // ── Jumps ──────────────────────────────────────────────────────
            Op::JUMP_BY | Op::JUMP_ABSOLUTE => self.jump(instr.jump_target())?,
            Op::POP_JUMP_IF_FALSE | Op::POP_JUMP_IF_TRUE => {
                let v = self.pop()?;
                if v.to_boolean(&self.heap) == (instr.op == Op::POP_JUMP_IF_TRUE) {
                    self.jump(instr.jump_target())?;
                }
            }
            Op::JUMP_IF_FALSE_OR_POP | Op::JUMP_IF_TRUE_OR_POP => {
                let v = self.peek(0)?;
                if v.to_boolean(&self.heap) == (instr.op == Op::JUMP_IF_TRUE_OR_POP) {
                    self.jump(instr.jump_target())?;
                } else {
                    self.pop()?;
                }
            }

            // ── finally subroutines ────────────────────────────────────────
            Op::JUMP_SUBROUTINE => {
                self.push(Value::Empty);
                self.push(Value::Int32(instr.next() as i32));
                self.push(Value::Int32(SUBROUTINE_JUMP));
                self.jump(instr.jump_target())?;
            }
            Op::JUMP_RETURN_HOOKED_SUBROUTINE => {
                self.push(Value::Int32(instr.next() as i32));
                self.push(Value::Int32(SUBROUTINE_RETURN));
                self.jump(instr.jump_target())?;
            }
            Op::RETURN_SUBROUTINE => {
                let flag = self.pop()?;
                let value = self.pop()?;
                match flag {
                    Value::Int32(SUBROUTINE_JUMP) => {
                        self.pop()?;
                        self.jump(value.as_uint32().map(|pc| pc as usize))?;
                    }
                    Value::Int32(SUBROUTINE_RETURN) => {
                        self.jump(value.as_uint32().map(|pc| pc as usize))?;
                    }
                    Value::Int32(SUBROUTINE_RETHROW) => {
                        self.pop()?;
                        return Err(JsError::thrown(value));
                    }
                    _ => return Err(JsError::internal_error("corrupt finally subroutine frame")),
                }
            }

            // ── Statements ─────────────────────────────────────────────────
            Op::SWITCH_CASE => {
                let v = self.pop()?;
                let target = self.peek(0)?;
                if v.strict_equals(&target, &self.heap) {
                    self.pop()?;
                    self.jump(instr.jump_target())?;
                }
            }
            Op::SWITCH_DEFAULT => {
                self.pop()?;
                self.jump(instr.jump_target())?;
            }
            Op::FORIN_SETUP => {
                if self.peek(0)?.is_nullish() {
                    self.jump(instr.jump_target())?;
                } else {
                    let v = self.pop()?;
                    let obj = self.to_object(v)?;
                    let keys = self.enumerable_keys(obj)?;
                    let iter = self.alloc(HeapCell::Iterator(NameIterator::new(obj, keys)))?;
                    self.push(Value::Cell(iter));
                }
            }
            Op::FORIN_ENUMERATE => {
                let iter = self
                    .peek(0)?
                    .as_cell()
                    .ok_or_else(|| JsError::internal_error("for-in without iterator"))?;
                match self.next_enumerated_key(iter)? {
                    Some(key) => {
                        let key = self.key_to_value(key)?;
                        self.push(key);
                    }
                    None => self.jump(instr.jump_target())?,
                }
            }
            Op::TRY_CATCH_SETUP => {
                let error = self.pop()?;
                let outer = self.frame()?.lexical_env;
                let name = exec.name_at(operand)?;
                let env = self.alloc(HeapCell::Environment(Environment::single(
                    outer, name, error, true,
                )))?;
                self.enter_dynamic_env(env)?;
            }
            Op::WITH_SETUP => {
                let v = self.pop()?;
                let obj = self.to_object(v)?;
                let outer = self.frame()?.lexical_env;
                let env =
                    self.alloc(HeapCell::Environment(Environment::object(Some(outer), obj, true)))?;
                self.enter_dynamic_env(env)?;
            }
            Op::POP_ENV => {
                let env = self.frame()?.lexical_env;
                let outer = self
                    .heap
                    .env(env)?
                    .outer
                    .ok_or_else(|| JsError::internal_error("POP_ENV at outermost scope"))?;
                let frame = self.frame_mut()?;
                frame.lexical_env = outer;
                frame.dynamic_env_level = frame.dynamic_env_level.saturating_sub(1);
            }
            Op::THROW => {
                let v = self.pop()?;
                return Err(JsError::thrown(v));
            }
            Op::RETURN => {
                let v = self.pop()?;
                return self.return_from_frame(v, Exit::Return);
            }
            Op::POP_TOP_AND_RET => {
                let v = self.pop()?;
                self.frame_mut()?.ret = v;
            }
            Op::STOP_CODE => {
                let frame = self.frame()?;
                let value = match frame.exec.kind {
                    CodeKind::Function => Value::Undefined,
                    _ => frame.ret,
                };
                return self.return_from_frame(value, Exit::Normal);
            }
        }
        Ok(Flow::Continue)
    }

    // ------------------------------------------------------------------------
    // Returns and exceptions
    // ------------------------------------------------------------------------

    fn return_from_frame(&mut self, value: Value, exit: Exit) -> Result<Flow, JsError> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| JsError::internal_error("return without frame"))?;
        let result = if frame.construct && !value.is_object() {
            frame.this
        } else {
            value
        };
        self.stack.truncate(frame.callee_index);
        if frame.entry {
            return Ok(Flow::Exit(result, exit));
        }
        self.push(result);
        Ok(Flow::Continue)
    }

    /// Route a failure to the nearest handler, popping frames up to the
    /// entry frame. Returns `Err` when the failure leaves the entry frame.
    fn unwind(&mut self, err: JsError) -> Result<(), JsError> {
        let thrown = match err {
            JsError::Internal(_) => Err(err),
            err => self.error_to_value(err),
        };
        let value = match thrown {
            Ok(value) => value,
            Err(err) => {
                self.abandon_entry();
                return Err(err);
            }
        };
        self.heap.pin(value);

        loop {
            let Some(frame) = self.frames.last_mut() else {
                return Err(JsError::thrown(value));
            };
            if let Some(handler) = frame.exec.find_handler(frame.last_pc) {
                let mut env = frame.lexical_env;
                let mut level = frame.dynamic_env_level;
                while level > handler.env_level {
                    env = self
                        .heap
                        .env(env)?
                        .outer
                        .ok_or_else(|| JsError::internal_error("handler scope underflow"))?;
                    level -= 1;
                }
                let base = frame.stack_base + handler.stack_base as usize;
                frame.lexical_env = env;
                frame.dynamic_env_level = level;
                frame.pc = handler.end as usize;
                tracing::trace!(pc = frame.last_pc, handler = frame.pc, "exception caught");
                self.stack.truncate(base);
                match handler.kind {
                    HandlerKind::Catch => self.push(value),
                    HandlerKind::Finally => {
                        self.push(Value::Empty);
                        self.push(value);
                        self.push(Value::Int32(SUBROUTINE_RETHROW));
                    }
                    HandlerKind::Iter => {}
                }
                return Ok(());
            }
            let entry = frame.entry;
            let callee_index = frame.callee_index;
            self.frames.pop();
            self.stack.truncate(callee_index);
            if entry {
                return Err(JsError::thrown(value));
            }
        }
    }

    /// Drop frames down to and including the innermost entry frame
    fn abandon_entry(&mut self) {
        while let Some(frame) = self.frames.pop() {
            self.stack.truncate(frame.callee_index);
            if frame.entry {
                break;
            }
        }
    }

    // ------------------------------------------------------------------------
    // Instruction helpers
    // ------------------------------------------------------------------------

    fn rotate(&mut self, n: usize) -> Result<(), JsError> {
        let start = self
            .stack
            .len()
            .checked_sub(n)
            .ok_or_else(|| JsError::internal_error("stack underflow"))?;
        if let Some(window) = self.stack.get_mut(start..) {
            window.rotate_right(1);
        }
        Ok(())
    }

    fn binary(
        &mut self,
        op: impl FnOnce(&mut Engine, Value, Value) -> Result<Value, JsError>,
    ) -> Result<(), JsError> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let result = op(self, lhs, rhs)?;
        self.push(result);
        Ok(())
    }

    fn predicate(
        &mut self,
        op: impl FnOnce(&mut Engine, Value, Value) -> Result<bool, JsError>,
    ) -> Result<(), JsError> {
        self.binary(|vm, l, r| op(vm, l, r).map(Value::Boolean))
    }

    fn load_constant(&mut self, exec: &Executable, index: u16) -> Result<Value, JsError> {
        let constant = exec.constants.get(index as usize).ok_or_else(|| {
            JsError::internal_error(format!("constant index {} out of range", index))
        })?;
        Ok(match constant {
            LinkedConstant::Number(n) => Value::number(*n),
            LinkedConstant::String(s) => {
                let s = s.clone();
                self.new_string(s)?
            }
            LinkedConstant::Boolean(b) => Value::Boolean(*b),
            LinkedConstant::Null => Value::Null,
            LinkedConstant::Undefined => Value::Undefined,
        })
    }

    /// Property key of `base[key]`; the base is checked before the key is
    /// converted
    fn element_key(&mut self, base: Value, key: Value) -> Result<PropertyKey, JsError> {
        if base.is_nullish() {
            self.to_object(base)?;
        }
        self.to_property_key(key)
    }

    fn delete_value(&mut self, base: Value, key: PropertyKey, strict: bool) -> Result<bool, JsError> {
        let obj = self.to_object(base)?;
        self.delete_property(obj, key, strict)
    }

    /// Define a literal property on the object under the value just popped
    fn define_on_top(&mut self, key: PropertyKey, desc: PropertyDescriptor) -> Result<(), JsError> {
        let obj = self
            .peek(0)?
            .as_object()
            .ok_or_else(|| JsError::internal_error("object literal without object"))?;
        self.define_own_property(obj, key, desc, false)?;
        Ok(())
    }

    fn enter_dynamic_env(&mut self, env: CellRef) -> Result<(), JsError> {
        let frame = self.frame_mut()?;
        frame.lexical_env = env;
        frame.dynamic_env_level += 1;
        Ok(())
    }

    /// Next key of a for-in iterator that is still present on its object
    fn next_enumerated_key(&mut self, iter: CellRef) -> Result<Option<PropertyKey>, JsError> {
        loop {
            let it = self.heap.iterator_mut(iter)?;
            let object = it.object;
            let Some(key) = it.advance() else {
                return Ok(None);
            };
            if self.has_property(object, key)? {
                return Ok(Some(key));
            }
        }
    }

    fn load_global(&mut self, exec: &Executable, pc: usize, name: Atom) -> Result<Value, JsError> {
        let global = self.realm.global;
        let site = self.cache_site(exec, pc);
        if let Some(site) = site {
            if let Some(value) = self.probe_load(exec, site, global)? {
                return Ok(value);
            }
        }
        let key = PropertyKey::Name(name);
        if !self.has_property(global, key)? {
            return Err(JsError::not_defined(self.atoms.as_str(name)));
        }
        let value = self.get_property(global, key, Value::Cell(global))?;
        if let Some(site) = site {
            self.fill_load(exec, site, global, name)?;
        }
        Ok(value)
    }

    fn store_global(
        &mut self,
        exec: &Executable,
        pc: usize,
        name: Atom,
        value: Value,
    ) -> Result<(), JsError> {
        let global = self.realm.global;
        let site = self.cache_site(exec, pc);
        if let Some(site) = site {
            if self.probe_store(exec, site, global, value)? {
                return Ok(());
            }
        }
        let key = PropertyKey::Name(name);
        if exec.strict && !self.has_property(global, key)? {
            return Err(JsError::reference_error(
                "putting to unresolvable reference not allowed in strict reference",
            ));
        }
        self.put_property(global, key, value, Value::Cell(global), exec.strict)?;
        if let Some(site) = site {
            self.fill_store(exec, site, global, name)?;
        }
        Ok(())
    }

    /// Push the new value for prefix forms, the old numeric value for postfix
    fn push_update(&mut self, old: Value, new: Value, prefix: bool) {
        self.push(if prefix { new } else { old });
    }

    fn increment_name(&mut self, name: Atom, delta: i32, prefix: bool) -> Result<(), JsError> {
        let old = self.load_name(name)?;
        let (old, new) = self.increment(old, delta)?;
        self.store_name(name, new)?;
        self.push_update(old, new, prefix);
        Ok(())
    }

    fn increment_local(&mut self, slot: u16, delta: i32, prefix: bool) -> Result<(), JsError> {
        let old = self.local(slot)?;
        let (old, new) = self.increment(old, delta)?;
        self.set_local(slot, new)?;
        self.push_update(old, new, prefix);
        Ok(())
    }

    fn increment_global(
        &mut self,
        exec: &Executable,
        pc: usize,
        operand: u16,
        delta: i32,
        prefix: bool,
    ) -> Result<(), JsError> {
        let name = exec.name_at(operand)?;
        let old = self.load_global(exec, pc, name)?;
        let (old, new) = self.increment(old, delta)?;
        // The cache site holds the load's entry, which says nothing about writability
        let global = self.realm.global;
        self.put_property(global, PropertyKey::Name(name), new, Value::Cell(global), exec.strict)?;
        self.push_update(old, new, prefix);
        Ok(())
    }

    fn increment_prop(
        &mut self,
        exec: &Executable,
        pc: usize,
        operand: u16,
        delta: i32,
        prefix: bool,
    ) -> Result<(), JsError> {
        let base = self.pop()?;
        let key = exec.key_at(operand)?;
        let old = self.load_named(exec, pc, base, key)?;
        let (old, new) = self.increment(old, delta)?;
        self.put_value(base, key, new, exec.strict)?;
        self.push_update(old, new, prefix);
        Ok(())
    }

    fn increment_element(&mut self, delta: i32, prefix: bool, strict: bool) -> Result<(), JsError> {
        let key = self.pop()?;
        let base = self.pop()?;
        let key = self.element_key(base, key)?;
        let old = self.get_value(base, key)?;
        let (old, new) = self.increment(old, delta)?;
        self.put_value(base, key, new, strict)?;
        self.push_update(old, new, prefix);
        Ok(())
    }
}
