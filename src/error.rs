//! Error types for the GSD file engine.

use std::io;
use thiserror::Error;

/// Result type for GSD operations.
pub type Result<T> = std::result::Result<T, GsdError>;

/// Errors returned by the GSD file engine.
#[derive(Debug, Error)]
pub enum GsdError {
    /// A positional read/write, flush, seek, truncate, or mmap call failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A parameter was invalid, or the operation is not permitted in the
    /// handle's open mode.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The requested chunk or name does not exist, or a write could not
    /// intern its name because the namelist is full.
    #[error("not found")]
    NotFound,

    /// The file is not a GSD file, or its format version is unsupported.
    #[error("invalid GSD file: {0}")]
    InvalidFile(String),

    /// An on-disk invariant was violated while loading or scanning the index.
    #[error("corrupt GSD file: {0}")]
    CorruptFile(String),

    /// A memory allocation for the index or namelist cache failed.
    #[error("memory allocation failed")]
    AllocationFailure,

    /// `create_and_open` was called with the read-only mode.
    #[error("file must be opened in a writable mode")]
    FileMustBeWritable,
}

impl From<std::collections::TryReserveError> for GsdError {
    fn from(_: std::collections::TryReserveError) -> Self {
        GsdError::AllocationFailure
    }
}
