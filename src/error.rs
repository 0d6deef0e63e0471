use std::path::PathBuf;

use rhai::EvalAltResult;
use thiserror::Error;

use crate::environment::ExportHandle;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("failed to compile '{chunk}': {source}")]
    Compile {
        chunk: String,
        #[source]
        source: rhai::ParseError,
    },
    #[error("script error in '{context}': {source}")]
    Runtime {
        context: String,
        #[source]
        source: Box<EvalAltResult>,
    },
    #[error("export handle {0} not found")]
    HandleNotFound(ExportHandle),
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("reading '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("argument codec: {0}")]
    Codec(#[from] bincode::Error),
    #[error("value of type '{0}' cannot cross the script boundary")]
    UnsupportedValue(String),
    #[error("no script environment is active on this thread")]
    NoActiveEnvironment,
    #[error("script runtime is already initialized")]
    AlreadyInitialized,
}

impl ScriptError {
    pub fn runtime(context: impl Into<String>, source: Box<EvalAltResult>) -> Self {
        ScriptError::Runtime { context: context.into(), source }
    }

    /// The error raised inside a nested script function call, if any.
    pub fn inner_cause(&self) -> Option<String> {
        match self {
            ScriptError::Runtime { source, .. } => match source.as_ref() {
                EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => Some(inner.to_string()),
                EvalAltResult::ErrorInModule(_, inner, _) => Some(inner.to_string()),
                _ => None,
            },
            _ => None,
        }
    }

    /// Converts a host-side failure into the error type rhai expects from native functions.
    pub fn into_eval(self) -> Box<EvalAltResult> {
        match self {
            ScriptError::Runtime { source, .. } => source,
            other => other.to_string().into(),
        }
    }
}

pub type ScriptResult<T> = Result<T, ScriptError>;
