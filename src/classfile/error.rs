//! Errors raised while parsing, patching and re-serializing a classfile

use thiserror::Error;

/// Errors that can occur while transforming a single classfile
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassError {
    #[error("Malformed class: {0}")]
    MalformedClass(String),
    #[error("Invalid descriptor: {descriptor}")]
    InvalidDescriptor { descriptor: String },
    #[error("Frame computation failed: {0}")]
    FrameComputationFailed(String),
    #[error("Constant pool is out of space")]
    ConstantPoolOverflow,
    #[error("Code too large: {0}")]
    CodeTooLarge(String),
}

impl ClassError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedClass(message.into())
    }

    pub fn frame(message: impl Into<String>) -> Self {
        Self::FrameComputationFailed(message.into())
    }

    pub fn invalid_descriptor(descriptor: impl Into<String>) -> Self {
        Self::InvalidDescriptor { descriptor: descriptor.into() }
    }
}

/// Result type for classfile operations
pub type ClassResult<T> = Result<T, ClassError>;
