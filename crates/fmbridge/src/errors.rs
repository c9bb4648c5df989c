use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures raised while compiling a JSON-Schema-like document
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum SchemaError {
    #[error("Invalid schema document: {0}")]
    InvalidDocument(String),

    #[error("Unsupported reference '{0}', only #/definitions/<name> is supported")]
    UnsupportedReference(String),

    #[error("Reference '{0}' has no matching definition")]
    UnresolvedReference(String),
}

#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum NormError {
    #[error("No messages provided")]
    Empty,
}

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum BridgeError {
    #[error("Generation engine unavailable: {reason}")]
    EngineUnavailable { reason: String },

    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("No messages provided")]
    NoMessages,

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("Generation failed: {detail}")]
    GenerationFailure { detail: String },

    #[error("A generation is already in flight for this session")]
    Busy,

    #[error("Blocking bridge call made from inside an async runtime, use ChatSession there")]
    AsyncContext,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BridgeError {
    pub fn invalid_input<S: Into<String>>(reason: S) -> Self {
        BridgeError::InvalidInput {
            reason: reason.into(),
        }
    }

    pub fn generation<S: Into<String>>(detail: S) -> Self {
        BridgeError::GenerationFailure {
            detail: detail.into(),
        }
    }
}

impl From<NormError> for BridgeError {
    fn from(err: NormError) -> Self {
        match err {
            NormError::Empty => BridgeError::NoMessages,
        }
    }
}

impl From<config::ConfigError> for BridgeError {
    fn from(err: config::ConfigError) -> Self {
        BridgeError::Config(err.to_string())
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
