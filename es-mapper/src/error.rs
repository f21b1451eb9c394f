use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Missing template: {interface}::{method}")]
    MissingTemplate {
        interface: String,
        method: String,
    },
    #[error("Template file {path:?}: {source}")]
    TemplateFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Duplicate method: {interface}::{method}")]
    DuplicateMethod {
        interface: String,
        method: String,
    },
    #[error("Missing collection: {interface}::{method}")]
    MissingCollection {
        interface: String,
        method: String,
    },
    #[error("Duplicate parameter name: {0}")]
    DuplicateParameterName(String),
    #[error("Arity mismatch: expected {expected} arguments, got {actual}")]
    ArityMismatch { expected: usize, actual: usize },
    #[error("Missing parameter: {0}")]
    MissingParameter(String),
    #[error("Invalid parameter: {0}")]
    InvalidParameter(#[source] serde_json::Error),
    #[error("Invalid pagination: from={from}, size={size}")]
    InvalidPagination { from: i64, size: i64 },
    #[error("Invalid template: {0}")]
    InvalidTemplate(String),
    #[error("Translation failed: {0}")]
    TranslationFailed(String),
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
    #[error("Transport error{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Transport {
        status: Option<u16>,
        message: String,
    },
    #[error("Engine timeout after {timeout_ms}ms")]
    EngineTimeout { timeout_ms: u64 },
    #[error("Decode error: {0}")]
    DecodeError(String),
    #[error("Unmapped method: {interface}::{method}")]
    UnmappedMethod {
        interface: String,
        method: String,
    },
    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn transport(message: impl ToString) -> Self {
        Error::Transport {
            status: None,
            message: message.to_string(),
        }
    }

    pub(crate) fn decode(message: impl ToString) -> Self {
        Error::DecodeError(message.to_string())
    }
}
