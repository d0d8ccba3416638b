//! The call protocol: frame setup, binding instantiation, constructors,
//! native functions, closures and eval.

use std::rc::Rc;

use super::{Exit, Frame};
use crate::atom::{self, Atom};
use crate::code::{Code, CodeKind, Executable};
use crate::engine::Engine;
use crate::env::{Binding, EnvKind, Environment};
use crate::error::JsError;
use crate::gc::{CellRef, HeapCell};
use crate::object::{FunctionKind, ObjectClass, PropertyDescriptor, PropertyKey};
use crate::shape::Attributes;
use crate::value::Value;

/// What invoking a call window produced
pub(crate) enum Invoked {
    /// A script frame was pushed; the dispatch loop continues in it
    Frame,
    /// A native function already returned; the window is gone
    Done(Value),
}

fn stack_overflow() -> JsError {
    JsError::range_error("maximum call stack size exceeded")
}

impl Engine {
    /// Invoke the call window `[callee, this, args...]` starting at
    /// `callee_index`.
    pub(crate) fn invoke(
        &mut self,
        callee_index: usize,
        argc: usize,
        construct: bool,
        entry: bool,
    ) -> Result<Invoked, JsError> {
        let callee_value = self.stack_at(callee_index)?;
        let kind = match callee_value.as_object() {
            Some(callee) => match self.heap.object(callee)?.function() {
                Some(kind) if !construct || self.heap.object(callee)?.is_constructor() => {
                    kind.clone()
                }
                _ => return Err(JsError::type_error("not callable object")),
            },
            None => return Err(JsError::type_error("not callable object")),
        };
        let callee = callee_value
            .as_object()
            .ok_or_else(|| JsError::internal_error("callee vanished"))?;
        if self.frames.len() >= self.config.max_call_depth {
            return Err(stack_overflow());
        }

        match kind {
            FunctionKind::Native { call, construct: ctor } => {
                let args_start = callee_index + 2;
                let args: Vec<Value> = self
                    .stack
                    .get(args_start..args_start + argc)
                    .map(<[Value]>::to_vec)
                    .ok_or_else(|| JsError::internal_error("call window out of range"))?;
                let result = match (construct, ctor) {
                    (true, Some(ctor)) => ctor(self, Value::Undefined, &args)?,
                    (true, None) => return Err(JsError::type_error("not callable object")),
                    (false, _) => {
                        let this = self.stack_at(callee_index + 1)?;
                        call(self, this, &args)?
                    }
                };
                self.stack.truncate(callee_index);
                Ok(Invoked::Done(result))
            }
            FunctionKind::Script { exec, scope } => {
                let needed = exec.local_count + exec.stack_depth;
                if self.stack.len() + needed > self.config.stack_capacity {
                    return Err(stack_overflow());
                }
                let this = if construct {
                    let proto = self.get_property(
                        callee,
                        PropertyKey::Name(atom::PROTOTYPE),
                        callee_value,
                    )?;
                    let proto = proto.as_object().unwrap_or(self.realm.object_prototype);
                    let obj = self.new_object_with(Some(proto), ObjectClass::Ordinary)?;
                    Value::Cell(obj)
                } else {
                    let this = self.stack_at(callee_index + 1)?;
                    self.coerce_this(this, exec.strict)?
                };
                self.set_stack_at(callee_index + 1, this)?;

                let locals_base = self.stack.len();
                self.stack
                    .resize(locals_base + exec.local_count, Value::Undefined);
                self.frames.push(Frame {
                    exec: Rc::clone(&exec),
                    pc: 0,
                    last_pc: 0,
                    callee_index,
                    locals_base,
                    stack_base: locals_base + exec.local_count,
                    argc,
                    this,
                    callee: Some(callee),
                    lexical_env: scope,
                    variable_env: scope,
                    dynamic_env_level: 0,
                    ret: Value::Undefined,
                    construct,
                    entry,
                });
                if let Err(err) = self.instantiate_function(&exec, callee, scope) {
                    self.frames.pop();
                    self.stack.truncate(callee_index);
                    return Err(err);
                }
                Ok(Invoked::Frame)
            }
        }
    }

    /// `this` as a non-strict function sees it
    fn coerce_this(&mut self, this: Value, strict: bool) -> Result<Value, JsError> {
        if strict {
            return Ok(this);
        }
        if this.is_nullish() || this.is_empty() {
            return Ok(Value::Cell(self.realm.global));
        }
        if this.is_primitive() {
            return Ok(Value::Cell(self.to_object(this)?));
        }
        Ok(this)
    }

    /// Bind parameters, hoisted functions, `arguments` and vars of the frame
    /// just pushed
    fn instantiate_function(
        &mut self,
        exec: &Rc<Executable>,
        callee: CellRef,
        scope: CellRef,
    ) -> Result<(), JsError> {
        let env = if exec.needs_env {
            let env = self.alloc(HeapCell::Environment(Environment::function(scope, callee)))?;
            let frame = self.frame_mut()?;
            frame.lexical_env = env;
            frame.variable_env = env;
            Some(env)
        } else {
            None
        };
        let closure_scope = env.unwrap_or(scope);
        let (locals_base, callee_index, argc) = {
            let frame = self.frame()?;
            (frame.locals_base, frame.callee_index, frame.argc)
        };

        for (i, (name, slot)) in exec.params.iter().zip(exec.param_slots.iter()).enumerate() {
            let value = if i < argc {
                self.stack_at(callee_index + 2 + i)?
            } else {
                Value::Undefined
            };
            self.bind_declaration(*name, *slot, env, locals_base, Some(value))?;
        }

        for decl in exec.function_decls.iter() {
            let child = exec.child(decl.code)?;
            let function = self.new_function(child, closure_scope)?;
            self.bind_declaration(decl.name, decl.slot, env, locals_base, Some(Value::Cell(function)))?;
        }

        if exec.uses_arguments {
            let shadowed = exec.params.contains(&atom::ARGUMENTS)
                || exec.function_decls.iter().any(|d| d.name == atom::ARGUMENTS);
            if !shadowed {
                let args = self.new_arguments(callee, callee_index, argc)?;
                self.bind_declaration(
                    atom::ARGUMENTS,
                    exec.arguments_slot,
                    env,
                    locals_base,
                    Some(Value::Cell(args)),
                )?;
            }
        }

        for (name, slot) in exec.var_decls.iter() {
            if slot.is_none() {
                self.bind_declaration(*name, None, env, locals_base, None)?;
            }
        }
        Ok(())
    }

    /// Store a declaration in its frame slot or function environment.
    /// `None` as the value only creates a missing binding.
    fn bind_declaration(
        &mut self,
        name: Atom,
        slot: Option<u16>,
        env: Option<CellRef>,
        locals_base: usize,
        value: Option<Value>,
    ) -> Result<(), JsError> {
        if let Some(slot) = slot {
            if let Some(v) = value {
                self.set_stack_at(locals_base + slot as usize, v)?;
            }
            return Ok(());
        }
        let env = env.ok_or_else(|| JsError::internal_error("binding without environment"))?;
        let bindings = self
            .heap
            .env_mut(env)?
            .bindings_mut()
            .ok_or_else(|| JsError::internal_error("function scope is not declarative"))?;
        match (bindings.get_mut(&name), value) {
            (Some(binding), Some(v)) => binding.value = v,
            (Some(_), None) => {}
            (None, v) => {
                bindings.insert(name, Binding::mutable(v.unwrap_or_default()));
            }
        }
        Ok(())
    }

    /// Unmapped arguments object: indices, `length` and `callee`
    fn new_arguments(
        &mut self,
        callee: CellRef,
        callee_index: usize,
        argc: usize,
    ) -> Result<CellRef, JsError> {
        let args = self.new_object_with(Some(self.realm.object_prototype), ObjectClass::Arguments)?;
        let dense_limit = self.config.dense_limit;
        for i in 0..argc {
            let value = self.stack_at(callee_index + 2 + i)?;
            self.heap
                .object_mut(args)?
                .elements
                .set_value(i as u32, value, dense_limit);
        }
        self.define_data(args, atom::LENGTH, Value::number(argc as f64), Attributes::HIDDEN)?;
        self.define_data(args, atom::CALLEE, Value::Cell(callee), Attributes::HIDDEN)?;
        Ok(args)
    }

    /// Create a var or function binding in a variable environment. Bindings
    /// created by eval can be deleted; those of program code cannot.
    fn declare_variable(
        &mut self,
        env: CellRef,
        name: Atom,
        value: Option<Value>,
        deletable: bool,
    ) -> Result<(), JsError> {
        let record = self.heap.env_mut(env)?;
        let object = match &mut record.kind {
            EnvKind::Declarative { bindings } | EnvKind::Function { bindings, .. } => {
                match (bindings.get_mut(&name), value) {
                    (Some(binding), Some(v)) => binding.value = v,
                    (Some(_), None) => {}
                    (None, v) => {
                        let v = v.unwrap_or_default();
                        let binding = if deletable {
                            Binding::deletable(v)
                        } else {
                            Binding::mutable(v)
                        };
                        bindings.insert(name, binding);
                    }
                }
                return Ok(());
            }
            EnvKind::Object { object, .. } => *object,
            EnvKind::Static { .. } => {
                return Err(JsError::internal_error("static scope used as variable scope"));
            }
        };
        let key = PropertyKey::Name(name);
        if !self.has_own_property(object, key)? {
            let attrs = if deletable {
                Attributes::DEFAULT
            } else {
                Attributes::WRITABLE | Attributes::ENUMERABLE
            };
            let desc = PropertyDescriptor::data(value.unwrap_or_default(), attrs);
            self.define_own_property(object, key, desc, true)?;
        } else if let Some(v) = value {
            self.put_property(object, key, v, Value::Cell(object), true)?;
        }
        Ok(())
    }

    /// Hoist the declarations of global or eval code into `variable_env`
    fn instantiate_declarations(
        &mut self,
        exec: &Rc<Executable>,
        variable_env: CellRef,
        lexical_env: CellRef,
        locals_base: usize,
        deletable: bool,
    ) -> Result<(), JsError> {
        for decl in exec.function_decls.iter() {
            let child = exec.child(decl.code)?;
            let function = Value::Cell(self.new_function(child, lexical_env)?);
            match decl.slot {
                Some(slot) => self.set_stack_at(locals_base + slot as usize, function)?,
                None => self.declare_variable(variable_env, decl.name, Some(function), deletable)?,
            }
        }
        for (name, slot) in exec.var_decls.iter() {
            if slot.is_none() {
                self.declare_variable(variable_env, *name, None, deletable)?;
            }
        }
        Ok(())
    }

    /// Push an entry frame for global or eval code and run it to completion
    fn run_entry(
        &mut self,
        exec: Rc<Executable>,
        this: Value,
        lexical_env: CellRef,
        variable_env: CellRef,
        deletable: bool,
    ) -> Result<(Value, Exit), JsError> {
        let base = self.stack.len();
        self.stack.resize(base + exec.local_count, Value::Undefined);
        self.frames.push(Frame {
            exec: Rc::clone(&exec),
            pc: 0,
            last_pc: 0,
            callee_index: base,
            locals_base: base,
            stack_base: base + exec.local_count,
            argc: 0,
            this,
            callee: None,
            lexical_env,
            variable_env,
            dynamic_env_level: 0,
            ret: Value::Undefined,
            construct: false,
            entry: true,
        });
        if let Err(err) =
            self.instantiate_declarations(&exec, variable_env, lexical_env, base, deletable)
        {
            self.frames.pop();
            self.stack.truncate(base);
            return Err(err);
        }
        self.execute()
    }

    /// Execute linked program code in the global scope
    pub(crate) fn run_global(
        &mut self,
        exec: Rc<Executable>,
    ) -> Result<crate::engine::Completion, JsError> {
        let global = Value::Cell(self.realm.global);
        let env = self.realm.global_env;
        let (value, exit) = self.run_entry(exec, global, env, env, false)?;
        Ok(match exit {
            Exit::Normal => crate::engine::Completion::Normal(value),
            Exit::Return => crate::engine::Completion::Return(value),
        })
    }

    /// Run eval code. A direct eval shares the caller's scope and `this`;
    /// strict eval code gets a scope of its own.
    pub(crate) fn run_eval(&mut self, code: Code, direct: bool) -> Result<Value, JsError> {
        if code.kind != CodeKind::Eval {
            return Err(JsError::internal_error("eval compiler returned non-eval code"));
        }
        code.validate()?;
        let exec = Executable::link(code, &mut self.atoms)?;
        let (this, mut lexical, mut variable) = match self.frames.last() {
            Some(frame) if direct => (frame.this, frame.lexical_env, frame.variable_env),
            _ => {
                let env = self.realm.global_env;
                (Value::Cell(self.realm.global), env, env)
            }
        };
        if exec.strict {
            let env = self.alloc(HeapCell::Environment(Environment::declarative(Some(lexical))))?;
            lexical = env;
            variable = env;
        }
        self.enter()?;
        let result = self.run_entry(exec, this, lexical, variable, true);
        self.reentry_depth -= 1;
        result.map(|(value, _)| value)
    }

    /// `eval(x)` through the realm's eval function
    pub(crate) fn eval_source(&mut self, arg: Value, direct: bool) -> Result<Value, JsError> {
        let Some(cell) = arg.as_string_cell() else {
            return Ok(arg);
        };
        let source = self.heap.string(cell)?.clone();
        let Some(compiler) = self.eval_compiler() else {
            return Err(JsError::eval_error("eval is not available without a compiler"));
        };
        let strict = direct && self.frames.last().is_some_and(|f| f.exec.strict);
        let code = compiler.compile_eval(source.as_str(), strict)?;
        self.run_eval(code, direct)
    }

    fn enter(&mut self) -> Result<(), JsError> {
        if self.reentry_depth >= self.config.max_reentry {
            return Err(stack_overflow());
        }
        self.reentry_depth += 1;
        Ok(())
    }

    /// Call a function from native code and run it to completion
    pub(crate) fn call_value(
        &mut self,
        callee: Value,
        this: Value,
        args: &[Value],
    ) -> Result<Value, JsError> {
        self.invoke_entry(callee, this, args, false)
    }

    /// `new callee(...args)` from native code
    pub(crate) fn construct_value(&mut self, callee: Value, args: &[Value]) -> Result<Value, JsError> {
        self.invoke_entry(callee, Value::Undefined, args, true)
    }

    fn invoke_entry(
        &mut self,
        callee: Value,
        this: Value,
        args: &[Value],
        construct: bool,
    ) -> Result<Value, JsError> {
        self.enter()?;
        let base = self.stack.len();
        self.stack.push(callee);
        self.stack.push(this);
        self.stack.extend_from_slice(args);
        let result = match self.invoke(base, args.len(), construct, true) {
            Ok(Invoked::Done(value)) => Ok(value),
            Ok(Invoked::Frame) => self.execute().map(|(value, _)| value),
            Err(err) => Err(err),
        };
        self.stack.truncate(base);
        self.reentry_depth -= 1;
        result
    }

    /// Closure for `BUILD_FUNCTION`. A named function expression sees its
    /// own name through a scope holding just that binding.
    pub(crate) fn make_closure(
        &mut self,
        exec: Rc<Executable>,
        scope: CellRef,
    ) -> Result<CellRef, JsError> {
        if !exec.named_expression {
            return self.new_function(exec, scope);
        }
        let name = exec.name;
        let env = self.alloc(HeapCell::Environment(Environment::single(
            scope,
            name,
            Value::Undefined,
            false,
        )))?;
        let function = self.new_function(exec, env)?;
        if let EnvKind::Static { value, .. } = &mut self.heap.env_mut(env)?.kind {
            *value = Value::Cell(function);
        }
        Ok(function)
    }
}
