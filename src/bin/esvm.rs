//! Command line host for esvm
//!
//! Runs a bytecode module stored as JSON (the serde form of
//! [`esvm::Code`]) and exits with 0 on normal completion, 1 on an uncaught
//! exception or a host failure.
//!
//! Usage: esvm [options] <module.json>
//!
//! Logging goes to stderr and is controlled by `ESVM_LOG` (an
//! `EnvFilter` directive, default `warn`) or `--verbose`.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use esvm::{Code, Engine, EngineConfig, JsError};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "esvm", version, about = "Run an ECMAScript bytecode module")]
struct Args {
    /// Bytecode module in JSON form
    module: PathBuf,

    /// Engine configuration file (JSON); flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Allocations between automatic collections (0 disables them)
    #[arg(long)]
    gc_threshold: Option<usize>,

    /// Values the VM stack may hold
    #[arg(long)]
    stack_capacity: Option<usize>,

    /// Maximum call depth
    #[arg(long)]
    max_call_depth: Option<usize>,

    /// Nested VM entries from native code (getters, valueOf, host calls)
    #[arg(long)]
    max_reentry: Option<usize>,

    /// Run without inline property caches
    #[arg(long)]
    no_inline_caches: bool,

    /// Print the disassembly before running
    #[arg(long)]
    dump: bool,

    /// Print heap and inline cache statistics after running
    #[arg(long)]
    stats: bool,

    /// Debug-level logging (overrides ESVM_LOG)
    #[arg(short, long)]
    verbose: bool,
}

/// Failures of the host itself, as opposed to script exceptions
#[derive(Debug, thiserror::Error)]
enum HostError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed {what} in {path}: {source}")]
    Json {
        what: &'static str,
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("{0}")]
    Engine(#[from] JsError),
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("ESVM_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read(path: &PathBuf) -> Result<String, HostError> {
    fs::read_to_string(path).map_err(|source| HostError::Io {
        path: path.clone(),
        source,
    })
}

fn load_config(args: &Args) -> Result<EngineConfig, HostError> {
    let mut config = match &args.config {
        Some(path) => serde_json::from_str(&read(path)?).map_err(|source| HostError::Json {
            what: "configuration",
            path: path.clone(),
            source,
        })?,
        None => EngineConfig::from_env(),
    };
    if let Some(threshold) = args.gc_threshold {
        config.gc_threshold = threshold;
    }
    if let Some(capacity) = args.stack_capacity {
        config.stack_capacity = capacity;
    }
    if let Some(depth) = args.max_call_depth {
        config.max_call_depth = depth;
    }
    if let Some(reentry) = args.max_reentry {
        config.max_reentry = reentry;
    }
    if args.no_inline_caches {
        config.inline_caches = false;
    }
    Ok(config)
}

fn run(args: &Args) -> Result<i32, HostError> {
    let config = load_config(args)?;
    let code = Code::from_json(&read(&args.module)?).map_err(|source| HostError::Json {
        what: "bytecode module",
        path: args.module.clone(),
        source,
    })?;
    if args.dump {
        println!("{}", code.disassemble());
    }

    let mut engine = Engine::new(config)?;
    let status = engine.run_main(&code);

    if args.stats {
        let gc = engine.gc_stats();
        let ic = engine.cache_stats();
        eprintln!(
            "heap: {} live cells, {} free blocks, {} arenas, {} collections, {} freed",
            gc.live_cells, gc.free_blocks, gc.arenas, gc.collections, gc.total_freed
        );
        eprintln!(
            "inline cache: {} sites, {} hits, {} misses",
            ic.sites, ic.hits, ic.misses
        );
    }
    Ok(status)
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);
    match run(&args) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("esvm: {}", e);
            ExitCode::FAILURE
        }
    }
}
