//! Execution core for an ECMAScript (ES5) engine
//!
//! The crate runs bytecode produced by an external compiler. It provides the
//! value representation, a mark-sweep heap with precise roots, shape-based
//! objects with per-instruction inline caches, the scope chain, and a stack
//! virtual machine with exception tables and `finally` subroutines.
//!
//! # Example
//!
//! ```
//! use esvm::{CodeBuilder, Completion, Engine, EngineConfig, Op};
//!
//! let mut code = CodeBuilder::global();
//! code.emit_with(Op::PUSH_INT16, 40);
//! code.emit_with(Op::PUSH_INT16, 2);
//! code.emit(Op::BINARY_ADD);
//! code.emit(Op::POP_TOP_AND_RET);
//! code.emit(Op::STOP_CODE);
//!
//! let mut engine = Engine::new(EngineConfig::default()).unwrap();
//! let completion = engine.run(&code.finish().unwrap()).unwrap();
//! assert_eq!(completion, Completion::Normal(esvm::Value::Int32(42)));
//! ```

pub mod atom;
pub mod builtins;
pub mod code;
pub mod engine;
pub mod env;
pub mod error;
pub mod gc;
pub mod ic;
pub mod object;
pub mod prelude;
pub mod realm;
pub mod shape;
pub mod value;
pub mod vm;

pub use code::{Code, CodeBuilder, CodeKind, Constant, Handler, HandlerKind, Label, Op};
pub use engine::{Completion, Engine, EngineConfig, EvalCompiler};
pub use error::{ErrorKind, JsError};
pub use gc::{CellRef, GcStats, RootId};
pub use ic::CacheStats;
pub use object::{NativeFn, PropertyKey};
pub use value::{JsString, Value};
