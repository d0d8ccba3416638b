//! Embedding surface.
//!
//! An [`Engine`] owns everything one script context needs: the heap, the
//! atom table, the realm of intrinsics and the VM stacks. Hosts hand it
//! [`Code`] to run and talk to script values through the call protocol and
//! a few property helpers.

use std::rc::Rc;

use serde::Deserialize;

use crate::atom::{Atom, AtomTable};
use crate::builtins;
use crate::code::{Code, Executable};
use crate::error::{ErrorKind, JsError};
use crate::gc::{CellRef, GcStats, Heap, HeapCell, RootId, Trace};
use crate::ic::CacheStats;
use crate::object::{FunctionKind, JsObject, NativeFn, ObjectClass, PropertyKey};
use crate::realm::Realm;
use crate::shape::Attributes;
use crate::value::{JsString, Value};
use crate::vm::Frame;

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

/// Unoptimized dispatch frames are large; this keeps a 2 MiB thread safe
#[cfg(debug_assertions)]
const DEFAULT_MAX_REENTRY: usize = 8;
#[cfg(not(debug_assertions))]
const DEFAULT_MAX_REENTRY: usize = 128;

/// Engine limits and collector tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Allocations between automatic collections (0 = never collect automatically)
    pub gc_threshold: usize,
    /// Values the VM stack may hold across all frames
    pub stack_capacity: usize,
    pub max_call_depth: usize,
    /// Nested entries into the VM from native code (getters, `valueOf`,
    /// sort comparators, host calls); each one recurses on the Rust stack
    pub max_reentry: usize,
    /// Array indices at or above this always use sparse storage
    pub dense_limit: u32,
    /// Transition chain length after which objects get unique shapes
    pub max_transitions: u32,
    /// Consult and fill per-instruction property caches
    pub inline_caches: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gc_threshold: crate::gc::DEFAULT_GC_THRESHOLD,
            stack_capacity: 16 * 1024,
            max_call_depth: 4096,
            max_reentry: DEFAULT_MAX_REENTRY,
            dense_limit: 1 << 20,
            max_transitions: 64,
            inline_caches: true,
        }
    }
}

impl EngineConfig {
    /// Defaults, with `ESVM_GC_THRESHOLD` applied when set
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(threshold) = std::env::var("ESVM_GC_THRESHOLD") {
            if let Ok(threshold) = threshold.parse::<usize>() {
                config.gc_threshold = threshold;
            }
        }
        config
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Completion and eval seam
// ═══════════════════════════════════════════════════════════════════════════════

/// Outcome of running a top-level [`Code`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Completion {
    /// Ran to the end; carries the completion value
    Normal(Value),
    /// Left through `RETURN`
    Return(Value),
    /// An exception nobody caught
    Throw(Value),
}

impl Completion {
    pub fn value(&self) -> Value {
        match self {
            Completion::Normal(v) | Completion::Return(v) | Completion::Throw(v) => *v,
        }
    }

    pub fn is_throw(&self) -> bool {
        matches!(self, Completion::Throw(_))
    }
}

/// Compiles source text for `eval`. No compiler ships with the engine; hosts
/// that have one install it with [`Engine::set_eval_compiler`].
pub trait EvalCompiler {
    fn compile_eval(&self, source: &str, strict: bool) -> Result<Code, JsError>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Engine
// ═══════════════════════════════════════════════════════════════════════════════

pub struct Engine {
    pub(crate) heap: Heap,
    pub(crate) atoms: AtomTable,
    pub(crate) realm: Realm,
    /// Call windows, locals and operands of every frame
    pub(crate) stack: Vec<Value>,
    pub(crate) frames: Vec<Frame>,
    pub(crate) config: EngineConfig,
    eval_compiler: Option<Rc<dyn EvalCompiler>>,
    /// Keeps the last completion value alive for the host
    completion_root: RootId,
    /// Cache counters of finished runs
    cache_totals: CacheStats,
    /// Nested host/native calls back into script
    pub(crate) reentry_depth: usize,
}

/// Counters of `exec` and every function code nested in it
fn tree_cache_stats(exec: &Executable) -> CacheStats {
    let mut total = exec.cache.stats();
    for child in exec.children.iter() {
        total += tree_cache_stats(child);
    }
    total
}

impl Engine {
    /// Create an engine with its realm and native library installed
    pub fn new(config: EngineConfig) -> Result<Self, JsError> {
        let mut heap = Heap::new();
        // No collection can run until the realm is in place to be traced
        heap.set_gc_threshold(0);
        let atoms = AtomTable::with_common_names();
        let realm = Realm::bootstrap(&mut heap)?;
        let completion_root = heap.add_root(Value::Undefined);
        heap.release_all_temps();

        let mut engine = Self {
            heap,
            atoms,
            realm,
            stack: Vec::with_capacity(config.stack_capacity.min(1 << 16)),
            frames: Vec::new(),
            config,
            eval_compiler: None,
            completion_root,
            cache_totals: CacheStats::default(),
            reentry_depth: 0,
        };
        engine.heap.set_gc_threshold(engine.config.gc_threshold);
        let mark = engine.heap.temp_mark();
        builtins::install(&mut engine)?;
        engine.heap.release_temps(mark);
        tracing::debug!(
            live = engine.heap.stats().live_cells,
            atoms = engine.atoms.len(),
            "realm initialized"
        );
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn set_eval_compiler(&mut self, compiler: Box<dyn EvalCompiler>) {
        self.eval_compiler = Some(Rc::from(compiler));
    }

    pub(crate) fn eval_compiler(&self) -> Option<Rc<dyn EvalCompiler>> {
        self.eval_compiler.clone()
    }

    // ------------------------------------------------------------------------
    // Running code
    // ------------------------------------------------------------------------

    /// Validate, link and execute a top-level program
    pub fn run(&mut self, code: &Code) -> Result<Completion, JsError> {
        code.validate()?;
        let exec = Executable::link(code.clone(), &mut self.atoms)?;

        let mark = self.heap.temp_mark();
        let stack_base = self.stack.len();
        let frame_base = self.frames.len();
        let outcome = self.run_global(Rc::clone(&exec));
        self.cache_totals += tree_cache_stats(&exec);
        drop(exec);
        let completion = match outcome {
            Ok(completion) => completion,
            Err(JsError::Thrown { value }) => Completion::Throw(value),
            Err(err) => {
                self.stack.truncate(stack_base);
                self.frames.truncate(frame_base);
                self.heap.release_temps(mark);
                return Err(err);
            }
        };
        self.heap.set_root(self.completion_root, completion.value());
        self.heap.release_temps(mark);
        if let Completion::Throw(value) = completion {
            tracing::debug!(value = %self.describe(value), "uncaught exception");
        }
        Ok(completion)
    }

    /// Run a program and map the outcome to a process exit status
    pub fn run_main(&mut self, code: &Code) -> i32 {
        match self.run(code) {
            Ok(Completion::Normal(_)) | Ok(Completion::Return(_)) => 0,
            Ok(Completion::Throw(value)) => {
                tracing::error!("Uncaught {}", self.describe(value));
                1
            }
            Err(err) => {
                tracing::error!("{}", err);
                1
            }
        }
    }

    /// Best-effort string for diagnostics; never runs into a second failure
    pub fn describe(&mut self, value: Value) -> String {
        match self.to_display_string(value) {
            Ok(s) => s,
            Err(_) => format!("{:?}", value),
        }
    }

    // ------------------------------------------------------------------------
    // Values
    // ------------------------------------------------------------------------

    pub fn intern(&mut self, name: &str) -> Atom {
        self.atoms.intern(name)
    }

    pub fn atom_str(&self, atom: Atom) -> &str {
        self.atoms.as_str(atom)
    }

    /// Canonical property key for a name
    pub fn key(&mut self, name: &str) -> PropertyKey {
        match crate::value::parse_array_index(name) {
            Some(index) => PropertyKey::Index(index),
            None => PropertyKey::Name(self.atoms.intern(name)),
        }
    }

    pub fn global_object(&self) -> Value {
        Value::Cell(self.realm.global)
    }

    /// Read a property of the global object; `undefined` when absent
    pub fn get_global(&mut self, name: &str) -> Result<Value, JsError> {
        let key = self.key(name);
        let global = self.realm.global;
        self.get_property(global, key, Value::Cell(global))
    }

    /// `base[name]` with full semantics (getters, primitive bases)
    pub fn get(&mut self, base: Value, name: &str) -> Result<Value, JsError> {
        let key = self.key(name);
        self.get_value(base, key)
    }

    /// `base[name] = value` in strict mode
    pub fn put(&mut self, base: Value, name: &str, value: Value) -> Result<(), JsError> {
        let key = self.key(name);
        self.put_value(base, key, value, true)
    }

    /// Call `callee` with `this` and `args`
    pub fn call(&mut self, callee: Value, this: Value, args: &[Value]) -> Result<Value, JsError> {
        let mark = self.heap.temp_mark();
        let result = self.call_value(callee, this, args);
        self.heap.release_temps(mark);
        if let Ok(value) = result {
            self.heap.pin(value);
        }
        if let Err(JsError::Thrown { value }) = &result {
            self.heap.pin(*value);
        }
        result
    }

    /// `new callee(...args)`
    pub fn construct(&mut self, callee: Value, args: &[Value]) -> Result<Value, JsError> {
        let mark = self.heap.temp_mark();
        let result = self.construct_value(callee, args);
        self.heap.release_temps(mark);
        if let Ok(value) = result {
            self.heap.pin(value);
        }
        if let Err(JsError::Thrown { value }) = &result {
            self.heap.pin(*value);
        }
        result
    }

    /// ToString, as host-side text
    pub fn to_display_string(&mut self, value: Value) -> Result<String, JsError> {
        Ok(self.to_js_string(value)?.as_str().to_string())
    }

    /// Text of a string value, without conversion
    pub fn string_contents(&self, value: Value) -> Option<String> {
        let cell = value.as_string_cell()?;
        self.heap.string(cell).ok().map(|s| s.as_str().to_string())
    }

    /// Current shape of an object value
    pub fn shape_of(&self, value: Value) -> Option<CellRef> {
        let cell = value.as_object()?;
        self.heap.object(cell).ok().map(|o| o.shape)
    }

    // ------------------------------------------------------------------------
    // GC controls
    // ------------------------------------------------------------------------

    /// Run a full collection now; returns the number of cells reclaimed
    pub fn collect_garbage(&mut self) -> usize {
        self.collect(None)
    }

    pub fn gc_stats(&self) -> GcStats {
        self.heap.stats()
    }

    /// Set the GC threshold
    ///
    /// - `0`: never collect automatically
    /// - `n > 0`: collect after every `n` allocations
    pub fn set_gc_threshold(&mut self, threshold: usize) {
        self.config.gc_threshold = threshold;
        self.heap.set_gc_threshold(threshold);
    }

    /// Keep `value` alive until [`Engine::unroot`]
    pub fn root(&mut self, value: Value) -> RootId {
        self.heap.add_root(value)
    }

    pub fn unroot(&mut self, id: RootId) {
        self.heap.remove_root(id);
    }

    /// Inline cache counters summed over every finished `run`.
    ///
    /// Each program's caches are counted once, when its run ends; later host
    /// calls into functions it created are not added.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache_totals
    }

    fn collect(&mut self, pending: Option<&HeapCell>) -> usize {
        let Engine {
            heap,
            stack,
            frames,
            realm,
            ..
        } = self;
        heap.collect(|tracer| {
            tracer.values(stack.iter());
            for frame in frames.iter() {
                frame.trace(tracer);
            }
            realm.trace(tracer);
            if let Some(cell) = pending {
                cell.trace(tracer);
            }
        })
    }

    // ------------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------------

    /// Allocate a cell, collecting first when the threshold is reached.
    ///
    /// Everything the new cell references is traced during that collection.
    /// The returned handle is pinned until the current temp level is released.
    pub(crate) fn alloc(&mut self, cell: HeapCell) -> Result<CellRef, JsError> {
        if self.heap.wants_collection() {
            self.collect(Some(&cell));
        }
        self.heap.allocate(cell)
    }

    pub fn new_string(&mut self, s: impl Into<JsString>) -> Result<Value, JsError> {
        Ok(Value::Cell(self.alloc(HeapCell::String(s.into()))?))
    }

    pub(crate) fn new_object_with(
        &mut self,
        prototype: Option<CellRef>,
        class: ObjectClass,
    ) -> Result<CellRef, JsError> {
        let shape = self.realm.empty_shape;
        self.alloc(HeapCell::Object(JsObject::new(shape, prototype, class)))
    }

    /// Plain object inheriting from `Object.prototype`
    pub fn new_object(&mut self) -> Result<CellRef, JsError> {
        self.new_object_with(Some(self.realm.object_prototype), ObjectClass::Ordinary)
    }

    /// Array of the given length with no elements present
    pub fn new_array(&mut self, length: u32) -> Result<CellRef, JsError> {
        self.new_object_with(
            Some(self.realm.array_prototype),
            ObjectClass::Array {
                length,
                length_writable: true,
            },
        )
    }

    /// Dense array holding `values`
    pub fn new_array_from(&mut self, values: &[Value]) -> Result<CellRef, JsError> {
        let array = self.new_array(values.len() as u32)?;
        let limit = self.config.dense_limit;
        let obj = self.heap.object_mut(array)?;
        for (i, v) in values.iter().enumerate() {
            obj.elements.set_value(i as u32, *v, limit);
        }
        Ok(array)
    }

    /// Closure over `scope` with its own `prototype` object
    pub(crate) fn new_function(
        &mut self,
        exec: Rc<Executable>,
        scope: CellRef,
    ) -> Result<CellRef, JsError> {
        let arity = exec.arity();
        let function = self.new_object_with(
            Some(self.realm.function_prototype),
            ObjectClass::Function(FunctionKind::Script { exec, scope }),
        )?;
        self.define_data(
            function,
            crate::atom::LENGTH,
            Value::number(arity as f64),
            Attributes::NONE,
        )?;
        let prototype = self.new_object()?;
        self.define_data(
            prototype,
            crate::atom::CONSTRUCTOR,
            Value::Cell(function),
            Attributes::HIDDEN,
        )?;
        self.define_data(
            function,
            crate::atom::PROTOTYPE,
            Value::Cell(prototype),
            Attributes::WRITABLE,
        )?;
        Ok(function)
    }

    /// Host function object; `construct` makes it usable with `new`
    pub fn new_native_function(
        &mut self,
        name: &str,
        call: NativeFn,
        construct: Option<NativeFn>,
        arity: usize,
    ) -> Result<CellRef, JsError> {
        let function = self.new_object_with(
            Some(self.realm.function_prototype),
            ObjectClass::Function(FunctionKind::Native { call, construct }),
        )?;
        self.define_data(
            function,
            crate::atom::LENGTH,
            Value::number(arity as f64),
            Attributes::NONE,
        )?;
        let name_value = self.new_string(name)?;
        self.define_data(function, crate::atom::NAME, name_value, Attributes::NONE)?;
        Ok(function)
    }

    /// Expose a host function as a global
    pub fn define_global_function(
        &mut self,
        name: &str,
        call: NativeFn,
        arity: usize,
    ) -> Result<CellRef, JsError> {
        let function = self.new_native_function(name, call, None, arity)?;
        let atom = self.atoms.intern(name);
        self.define_data(self.realm.global, atom, Value::Cell(function), Attributes::HIDDEN)?;
        Ok(function)
    }

    /// Error object of `kind` with an own `message`
    pub fn new_error(&mut self, kind: Option<ErrorKind>, message: &str) -> Result<CellRef, JsError> {
        let prototype = self.realm.error_prototype(kind);
        let error = self.new_object_with(Some(prototype), ObjectClass::Error)?;
        let message = self.new_string(message)?;
        self.define_data(error, crate::atom::MESSAGE, message, Attributes::HIDDEN)?;
        Ok(error)
    }

    /// Turn a failure into the value a handler receives
    pub(crate) fn error_to_value(&mut self, err: JsError) -> Result<Value, JsError> {
        match err {
            JsError::Thrown { value } => Ok(value),
            JsError::Internal(_) => Err(err),
            typed => {
                let message = typed.message().unwrap_or_default().to_string();
                let error = self.new_error(typed.kind(), &message)?;
                Ok(Value::Cell(error))
            }
        }
    }

    /// String value of a property key
    pub(crate) fn key_to_value(&mut self, key: PropertyKey) -> Result<Value, JsError> {
        match key {
            PropertyKey::Name(atom) => {
                let s = self.atoms.name(atom);
                self.new_string(s)
            }
            PropertyKey::Index(i) => self.new_string(i.to_string()),
        }
    }
}
