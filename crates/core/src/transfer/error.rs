//! Error types for the transfer engine.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while moving one file. All are terminal for the
/// attempt; callers log them and the source file is left untouched unless
/// the move already committed.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Source file not found.
    #[error("Source file not found: {}", .path.display())]
    NotFound { path: PathBuf },

    /// Destination volume cannot hold the file.
    #[error("Insufficient space at {}: need {} bytes, have {}", .path.display(), .required, .available)]
    InsufficientSpace {
        path: PathBuf,
        required: u64,
        available: u64,
    },

    /// Copied data does not match the source.
    #[error("Validation failed for {}: {}", .path.display(), .reason)]
    ValidationFailed { path: PathBuf, reason: String },

    /// The cancel flag was raised mid-copy.
    #[error("Transfer cancelled")]
    Cancelled,

    /// A post-condition did not hold (rename vanished, source not
    /// deletable, destination missing).
    #[error("Unexpected: {0}")]
    Unexpected(String),

    /// I/O error while streaming.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
