use std::path::PathBuf;

use thiserror::Error;

use crate::classfile::error::ClassError;

/// Result type for jarhook operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for jarhook
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Class(#[from] ClassError),

    #[error("Invalid patch spec: {message}")]
    InvalidSpec { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an invalid patch spec error
    pub fn invalid_spec(message: impl Into<String>) -> Self {
        Self::InvalidSpec { message: message.into() }
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }
}

/// Errors raised while reading, rewriting or writing an archive
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Cannot read archive '{path}': {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("Cannot write archive '{path}': {reason}")]
    WriteFailed { path: PathBuf, reason: String },

    #[error("Transforming entry '{path}' failed: {source}")]
    TransformFailed {
        path: String,
        #[source]
        source: ClassError,
    },

    #[error("Duplicate archive entry: {0}")]
    DuplicateEntry(String),
}

impl ArchiveError {
    pub fn unreadable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Unreadable { path: path.into(), reason: reason.to_string() }
    }

    pub fn write_failed(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::WriteFailed { path: path.into(), reason: reason.to_string() }
    }
}
