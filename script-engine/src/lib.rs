//! Bar-oriented indicator scripting.
//!
//! Scripts come in two surface syntaxes ([`Dialect`]): indentation-based pine
//! text and a brace-style host function body. Both are parsed to the same
//! [`ast`], lowered by the [`transpiler`] into a [`LoweredProgram`] of
//! explicit slot operations, and evaluated one bar per pass against a
//! [`Context`]. [`ScriptRunner`] drives replay and live polling.
//!
//! ```no_run
//! use script_engine::{run_script, Value};
//! # let bars = Vec::new();
//! let output = run_script("plot(ta.sma(close, 14))", &bars, Default::default())?;
//! let sma: Vec<Value> = output.plots["plot1"].iter().map(|p| p.value.clone()).collect();
//! # Ok::<(), script_engine::ScriptError>(())
//! ```

pub mod ast;
mod builtins;
pub mod config;
pub mod context;
pub mod error;
pub mod interpreter;
pub mod language;
pub mod lexer;
pub mod namespaces;
pub mod parser;
pub mod program;
pub mod runner;
pub mod transpiler;
pub mod value;

use std::collections::BTreeMap;

use ts_core::Bar;

pub use config::{ConfigError, LiveConfig, RunConfig};
pub use context::{precision, precision_with, Context, ContextOptions, Metadata, PlotPoint};
pub use error::{RuntimeError, ScriptError, SyntaxError};
pub use interpreter::run_pass;
pub use language::{Dialect, SourceSpan, SyntaxErrorKind};
pub use program::{LoweredProgram, ScopeId, ScopeKind, SlotRef};
pub use runner::{LiveUpdate, RunOutput, RunnerCheckpoint, ScriptRunner};
pub use transpiler::{transpile, transpile_with};
pub use value::Value;

/// Transpile `source` and evaluate it over `bars` with the given input
/// overrides.
pub fn run_script(source: &str, bars: &[Bar], inputs: BTreeMap<String, Value>) -> Result<RunOutput, ScriptError> {
    let mut runner = ScriptRunner::from_source(source)?.with_inputs(inputs);
    runner.on_history(bars)?;
    Ok(runner.output())
}
