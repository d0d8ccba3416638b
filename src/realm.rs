//! The intrinsic objects of one engine.
//!
//! Bootstrapping only creates the bare cells (prototypes, the global object
//! and its environment) so that everything else can refer to them; their
//! properties and native functions are installed afterwards by
//! [`builtins::install`](crate::builtins::install).

use crate::builtins;
use crate::env::Environment;
use crate::error::{ErrorKind, JsError};
use crate::gc::{CellRef, Heap, HeapCell, Trace, Tracer};
use crate::object::{FunctionKind, JsObject, ObjectClass};
use crate::shape::Shape;
use crate::value::JsString;

pub struct Realm {
    /// Root of every shape tree in this realm
    pub empty_shape: CellRef,
    pub global: CellRef,
    /// Object record over `global`, outermost scope of all code
    pub global_env: CellRef,
    pub object_prototype: CellRef,
    pub function_prototype: CellRef,
    pub array_prototype: CellRef,
    pub string_prototype: CellRef,
    pub number_prototype: CellRef,
    pub boolean_prototype: CellRef,
    pub error_prototype: CellRef,
    pub type_error_prototype: CellRef,
    pub range_error_prototype: CellRef,
    pub reference_error_prototype: CellRef,
    pub syntax_error_prototype: CellRef,
    pub eval_error_prototype: CellRef,
    /// The `eval` function; calls through it by name are direct evals
    pub eval_function: CellRef,
}

impl Realm {
    /// Allocate the intrinsic cells. Runs before the engine exists, so it
    /// goes to the heap directly and never collects.
    pub fn bootstrap(heap: &mut Heap) -> Result<Realm, JsError> {
        let empty_shape = heap.allocate(HeapCell::Shape(Shape::empty()))?;
        let object = |heap: &mut Heap, proto: Option<CellRef>, class: ObjectClass| {
            heap.allocate(HeapCell::Object(JsObject::new(empty_shape, proto, class)))
        };

        let object_prototype = object(heap, None, ObjectClass::Ordinary)?;
        let proto = Some(object_prototype);
        let function_prototype = object(
            heap,
            proto,
            ObjectClass::Function(FunctionKind::Native {
                call: builtins::function::empty,
                construct: None,
            }),
        )?;
        let array_prototype = object(
            heap,
            proto,
            ObjectClass::Array {
                length: 0,
                length_writable: true,
            },
        )?;
        let string_prototype = object(heap, proto, ObjectClass::String(JsString::from("")))?;
        let number_prototype = object(heap, proto, ObjectClass::Number(0.0))?;
        let boolean_prototype = object(heap, proto, ObjectClass::Boolean(false))?;
        let error_prototype = object(heap, proto, ObjectClass::Error)?;
        let sub = Some(error_prototype);
        let type_error_prototype = object(heap, sub, ObjectClass::Error)?;
        let range_error_prototype = object(heap, sub, ObjectClass::Error)?;
        let reference_error_prototype = object(heap, sub, ObjectClass::Error)?;
        let syntax_error_prototype = object(heap, sub, ObjectClass::Error)?;
        let eval_error_prototype = object(heap, sub, ObjectClass::Error)?;

        let global = object(heap, proto, ObjectClass::Global)?;
        let global_env = heap.allocate(HeapCell::Environment(Environment::object(
            None, global, false,
        )))?;
        let eval_function = object(
            heap,
            Some(function_prototype),
            ObjectClass::Function(FunctionKind::Native {
                call: builtins::global::indirect_eval,
                construct: None,
            }),
        )?;

        Ok(Realm {
            empty_shape,
            global,
            global_env,
            object_prototype,
            function_prototype,
            array_prototype,
            string_prototype,
            number_prototype,
            boolean_prototype,
            error_prototype,
            type_error_prototype,
            range_error_prototype,
            reference_error_prototype,
            syntax_error_prototype,
            eval_error_prototype,
            eval_function,
        })
    }

    /// Prototype for errors of `kind`; plain `Error.prototype` for `None`
    pub fn error_prototype(&self, kind: Option<ErrorKind>) -> CellRef {
        match kind {
            None => self.error_prototype,
            Some(ErrorKind::Type) => self.type_error_prototype,
            Some(ErrorKind::Range) => self.range_error_prototype,
            Some(ErrorKind::Reference) => self.reference_error_prototype,
            Some(ErrorKind::Syntax) => self.syntax_error_prototype,
            Some(ErrorKind::Eval) => self.eval_error_prototype,
        }
    }

    fn cells(&self) -> [CellRef; 16] {
        [
            self.empty_shape,
            self.global,
            self.global_env,
            self.object_prototype,
            self.function_prototype,
            self.array_prototype,
            self.string_prototype,
            self.number_prototype,
            self.boolean_prototype,
            self.error_prototype,
            self.type_error_prototype,
            self.range_error_prototype,
            self.reference_error_prototype,
            self.syntax_error_prototype,
            self.eval_error_prototype,
            self.eval_function,
        ]
    }
}

impl Trace for Realm {
    fn trace(&self, tracer: &mut Tracer) {
        for cell in self.cells() {
            tracer.edge(cell);
        }
    }
}
