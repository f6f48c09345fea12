//! Lookup-result buffer protocol
//!
//! A [`LookupResult`] is a caller-owned, reusable result buffer. It wraps
//! the engine's merge accumulator: a lookup fills it in place, growing the
//! buffer only when a value outgrows the current capacity, and the larger
//! capacity then sticks for subsequent reuse.

use burrowstore_core::MergeAccumulator;

use crate::error::{Result, StoreError};
use crate::message::decode_message;

/// Caller-owned result buffer for point lookups.
///
/// One result may serve many lookups; a borrowed value slice is valid until
/// the next lookup that reuses the result.
#[derive(Debug, Default)]
pub struct LookupResult {
    pub(crate) acc: MergeAccumulator,
}

impl LookupResult {
    /// Result with an empty buffer; the first hit allocates.
    pub fn new() -> Self {
        Self::default()
    }

    /// Result over a caller-owned buffer whose capacity is reused.
    pub fn with_buffer(buffer: Vec<u8>) -> Self {
        Self {
            acc: MergeAccumulator::with_buffer(buffer),
        }
    }

    /// Whether the last lookup found the key.
    pub fn found(&self) -> bool {
        self.acc.is_valid()
    }

    /// Value from the last lookup.
    ///
    /// Fails with `InvalidArg` when the key was not found. The slice
    /// borrows the result's buffer.
    pub fn value(&self) -> Result<&[u8]> {
        if !self.found() {
            return Err(StoreError::invalid_arg(
                "value requested from a not-found lookup result",
            ));
        }
        decode_message(self.acc.raw())
    }

    /// Release the result, handing back the underlying buffer.
    pub fn into_buffer(self) -> Vec<u8> {
        self.acc.into_buffer()
    }
}
