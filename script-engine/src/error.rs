use serde::{Deserialize, Serialize};
use ta_engine::TaError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::language::{SourceSpan, SyntaxErrorKind};

/// Transpile-time failure with its code and location.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{} at {span}: {message}", kind.code())]
pub struct SyntaxError {
    pub kind: SyntaxErrorKind,
    pub message: String,
    pub span: SourceSpan,
}

impl SyntaxError {
    pub fn new(kind: SyntaxErrorKind, message: impl Into<String>, span: SourceSpan) -> Self {
        Self {
            kind,
            message: message.into(),
            span,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Indicator(#[from] TaError),
    #[error("loop exceeded {limit} iterations")]
    LoopLimit { limit: usize },
    #[error("call depth exceeded {limit}")]
    CallDepth { limit: usize },
    #[error("type error: {0}")]
    Type(String),
    #[error("array index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: i64, len: usize },
    #[error("unknown builtin `{0}`")]
    UnknownBuiltin(String),
    #[error("function `{0}` is not defined")]
    UnknownFunction(String),
    #[error("temporary ${0} read before assignment")]
    UnboundTemp(usize),
    #[error("`{0}` outside of a loop")]
    StrayControl(&'static str),
}

/// Error surface of the public entry points.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
