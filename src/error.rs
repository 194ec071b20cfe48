//! Error types for the operation log
//!
//! Provides a unified error type for all operations.

use std::path::PathBuf;

use thiserror::Error;

use crate::opid::OpId;

/// Result type alias using LogError
pub type Result<T> = std::result::Result<T, LogError>;

/// Unified error type for log operations
#[derive(Debug, Error)]
pub enum LogError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Segment Errors
    // -------------------------------------------------------------------------
    /// Magic, version or header payload is unusable. The segment cannot be
    /// trusted at all, but other segments of the log remain readable.
    #[error("Corrupt segment header in {}: {reason}", path.display())]
    CorruptHeader { path: PathBuf, reason: String },

    /// A frame failed its checksum or could not be parsed.
    #[error("Corrupt entry in {} at offset {offset}: {reason}", path.display())]
    CorruptEntry {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    #[error("Corrupt segment footer in {}: {reason}", path.display())]
    CorruptFooter { path: PathBuf, reason: String },

    // -------------------------------------------------------------------------
    // Log Errors
    // -------------------------------------------------------------------------
    #[error("Log discontinuity: expected segment {expected}, found {found}")]
    LogDiscontinuity { expected: u64, found: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Index conflict for {op_id}: already at {existing}, attempted {attempted}")]
    IndexConflict {
        op_id: OpId,
        existing: String,
        attempted: String,
    },

    #[error("Illegal state: {0}")]
    IllegalState(String),

    // -------------------------------------------------------------------------
    // Decode Errors
    // -------------------------------------------------------------------------
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LogError {
    /// True for the corruption family (header, entry, footer).
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            LogError::CorruptHeader { .. }
                | LogError::CorruptEntry { .. }
                | LogError::CorruptFooter { .. }
        )
    }
}

impl From<bincode::Error> for LogError {
    fn from(err: bincode::Error) -> Self {
        LogError::Serialization(err.to_string())
    }
}
