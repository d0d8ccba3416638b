//! Integration tests for the VM, organized by feature
//!
//! Programs are assembled with [`CodeBuilder`] and run through the public
//! [`Engine`] API.
//!
//! ## Aggressive Test Defaults
//!
//! Tests use aggressive defaults to catch bugs early:
//! - `GC_THRESHOLD=1` - GC on every allocation to catch rooting bugs
//!
//! Override via environment variables:
//!
//! ```bash
//! cargo test                           # Default: aggressive settings
//! GC_THRESHOLD=100 cargo test          # Less aggressive GC for faster runs
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing, clippy::panic)]

mod calls;
mod eval;
mod exceptions;
mod names;
mod objects;

use esvm::{Code, CodeBuilder, Completion, Engine, EngineConfig, JsError, Op, Value};

/// Create an engine with aggressive defaults for testing:
/// - GC_THRESHOLD=1 (GC on every allocation)
pub fn create_test_engine() -> Engine {
    let mut engine = Engine::new(EngineConfig::default()).unwrap();

    // GC_THRESHOLD=100 cargo test  # Faster runs
    // GC_THRESHOLD=0 cargo test    # Disable automatic GC
    let gc_threshold = std::env::var("GC_THRESHOLD")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1);
    engine.set_gc_threshold(gc_threshold);
    engine
}

/// Program whose completion value is whatever `body` leaves on the stack
pub fn program(body: impl FnOnce(&mut CodeBuilder) -> Result<(), JsError>) -> Code {
    let mut b = CodeBuilder::global();
    body(&mut b).unwrap();
    b.emit(Op::POP_TOP_AND_RET);
    b.emit(Op::STOP_CODE);
    b.finish().unwrap()
}

/// Function code with `params` bound in its environment
pub fn function(
    name: &str,
    params: &[&str],
    body: impl FnOnce(&mut CodeBuilder) -> Result<(), JsError>,
) -> Code {
    let mut b = CodeBuilder::function(name);
    for param in params {
        b.add_param(param);
    }
    body(&mut b).unwrap();
    b.emit(Op::STOP_CODE);
    b.finish().unwrap()
}

/// Run `code` on `engine`, expecting a normal completion
pub fn run_value(engine: &mut Engine, code: &Code) -> Value {
    match engine.run(code).unwrap() {
        Completion::Normal(value) => value,
        other => panic!("expected normal completion, got {:?}", other),
    }
}

/// Evaluate a program on a fresh engine
pub fn eval(body: impl FnOnce(&mut CodeBuilder) -> Result<(), JsError>) -> (Engine, Value) {
    let mut engine = create_test_engine();
    let value = run_value(&mut engine, &program(body));
    (engine, value)
}

/// Evaluate a program and convert its value with ToString
pub fn eval_string(body: impl FnOnce(&mut CodeBuilder) -> Result<(), JsError>) -> String {
    let (mut engine, value) = eval(body);
    engine.to_display_string(value).unwrap()
}

/// Run a program that must throw; returns the error's `name` and `message`
pub fn eval_throws(body: impl FnOnce(&mut CodeBuilder) -> Result<(), JsError>) -> (String, String) {
    let mut engine = create_test_engine();
    let completion = engine.run(&program(body)).unwrap();
    let Completion::Throw(error) = completion else {
        panic!("expected a throw, got {:?}", completion);
    };
    error_parts(&mut engine, error)
}

pub fn error_parts(engine: &mut Engine, error: Value) -> (String, String) {
    let name = engine.get(error, "name").unwrap();
    let message = engine.get(error, "message").unwrap();
    (
        engine.to_display_string(name).unwrap(),
        engine.to_display_string(message).unwrap(),
    )
}

/// `for (i = 0; i < n; i++) <body>` with `i` in a local
pub fn repeat(
    b: &mut CodeBuilder,
    n: f64,
    body: impl FnOnce(&mut CodeBuilder) -> Result<(), JsError>,
) -> Result<(), JsError> {
    let i = b.add_local("i")?;
    let top = b.new_label();
    let done = b.new_label();
    b.emit_number(0.0)?;
    b.emit_with(Op::STORE_LOCAL, i);
    b.emit(Op::POP_TOP);
    b.bind(top);
    b.emit_with(Op::LOAD_LOCAL, i);
    b.emit_number(n)?;
    b.emit(Op::BINARY_LT);
    b.emit_jump(Op::POP_JUMP_IF_FALSE, done);
    body(b)?;
    b.emit_with(Op::INCREMENT_LOCAL, i);
    b.emit(Op::POP_TOP);
    b.emit_jump(Op::JUMP_ABSOLUTE, top);
    b.bind(done);
    Ok(())
}
