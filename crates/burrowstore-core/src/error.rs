//! Error types for the storage core
//!
//! Every failure carries enough context (paths, offsets, expected/actual
//! values) to diagnose on-disk corruption from the log output alone.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for storage-core operations
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Storage-core error type with detailed context
#[derive(Debug, Error)]
pub enum EngineError {
    /// I/O operation failed
    #[error("io error{}: {message} ({kind})", fmt_path(.path))]
    Io {
        /// File or directory where the error occurred
        path: Option<PathBuf>,
        /// Underlying I/O error kind
        kind: std::io::ErrorKind,
        /// Human-readable description
        message: String,
    },

    /// A log or extent record is corrupted and cannot be recovered
    #[error("corrupt record in {path} at offset {offset}: {reason}")]
    CorruptRecord {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    /// Checksum verification failed
    #[error(
        "checksum mismatch in {path} at offset {offset}: \
         expected {expected:#010x}, got {actual:#010x}"
    )]
    ChecksumMismatch {
        path: PathBuf,
        offset: u64,
        expected: u32,
        actual: u32,
    },

    /// Partial write at end of file (the crash point)
    #[error(
        "torn write in {path} at offset {offset}: \
         expected {expected_size} bytes, only {available} available"
    )]
    TornWrite {
        path: PathBuf,
        offset: u64,
        expected_size: u64,
        available: u64,
    },

    /// Magic bytes not found at the expected location
    #[error("magic bytes not found in {path} at offset {offset}: found {found:02x?}")]
    NoMagic {
        path: PathBuf,
        offset: u64,
        found: [u8; 4],
    },

    /// Key or message exceeds its size limit
    #[error("{component} of {size} bytes exceeds limit of {limit} bytes")]
    Oversized {
        component: &'static str,
        size: u64,
        limit: u64,
    },

    /// The extent store has reached its configured capacity
    #[error("store capacity exhausted: need {needed} bytes, {remaining} of {capacity} remain")]
    CapacityExhausted {
        needed: u64,
        remaining: u64,
        capacity: u64,
    },

    /// Subsystem configuration failed validation
    #[error("invalid configuration: {reason}")]
    BadConfig { reason: String },

    /// Mount target is missing or does not match the configured geometry
    #[error("cannot mount {path}: {reason}")]
    BadMount { path: PathBuf, reason: String },
}

impl EngineError {
    /// Wrap an `io::Error` with the path and operation that produced it.
    pub fn io(path: impl Into<PathBuf>, what: &str, err: std::io::Error) -> Self {
        EngineError::Io {
            path: Some(path.into()),
            kind: err.kind(),
            message: format!("{what}: {err}"),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io {
            path: None,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

fn fmt_path(path: &Option<PathBuf>) -> String {
    match path {
        Some(p) => format!(" in {}", p.display()),
        None => String::new(),
    }
}
