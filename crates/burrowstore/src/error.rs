//! Error type for the public store API
//!
//! Callers that bridge into errno-style interfaces can flatten any error to
//! a POSIX code via [`StoreError::code`]; everyone else matches on the enum.

use burrowstore_core::EngineError;
use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// `EINVAL`: configuration or argument violation
const EINVAL: i32 = 22;
/// `ENOMEM`: allocation failure reported by the engine
const ENOMEM: i32 = 12;
/// `EIO`: storage or engine failure
const EIO: i32 = 5;
/// `ENOSPC`: disk budget exhausted
const ENOSPC: i32 = 28;

/// Errors surfaced by the store façade
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store configuration or data config is malformed
    #[error("bad parameter: {reason}")]
    BadParam { reason: String },

    /// An operation argument is invalid (key too long, buffer too small,
    /// value requested from a not-found result)
    #[error("invalid argument: {reason}")]
    InvalidArg { reason: String },

    /// The engine reached a state it cannot operate from
    #[error("invalid state: {reason}")]
    InvalidState { reason: String },

    /// The storage core failed
    #[error("storage failure: {0}")]
    Storage(#[from] EngineError),
}

impl StoreError {
    pub(crate) fn bad_param(reason: impl Into<String>) -> Self {
        StoreError::BadParam {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_arg(reason: impl Into<String>) -> Self {
        StoreError::InvalidArg {
            reason: reason.into(),
        }
    }

    /// errno-style code for this error.
    pub fn code(&self) -> i32 {
        match self {
            StoreError::BadParam { .. } | StoreError::InvalidArg { .. } => EINVAL,
            StoreError::InvalidState { .. } => EIO,
            StoreError::Storage(engine) => match engine {
                EngineError::CapacityExhausted { .. } => ENOSPC,
                EngineError::BadConfig { .. } => EINVAL,
                EngineError::Io { kind, .. } if *kind == std::io::ErrorKind::OutOfMemory => ENOMEM,
                _ => EIO,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argument_errors_map_to_einval() {
        assert_eq!(StoreError::bad_param("x").code(), 22);
        assert_eq!(StoreError::invalid_arg("y").code(), 22);
    }

    #[test]
    fn test_capacity_maps_to_enospc() {
        let err = StoreError::Storage(EngineError::CapacityExhausted {
            needed: 100,
            remaining: 10,
            capacity: 1000,
        });
        assert_eq!(err.code(), 28);
    }

    #[test]
    fn test_engine_failures_map_to_eio() {
        let err = StoreError::Storage(EngineError::CorruptRecord {
            path: "/tmp/x".into(),
            offset: 0,
            reason: "bad".into(),
        });
        assert_eq!(err.code(), 5);
    }
}
