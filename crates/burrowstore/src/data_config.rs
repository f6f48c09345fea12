//! Application data configuration
//!
//! A [`DataConfig`] defines the key and value semantics of a store: how
//! logical keys compare and hash, what the admissible key range is, and how
//! update messages merge with older state. The store borrows the config for
//! its whole life (shared via `Arc`), so one config can back many stores.
//!
//! All keys at this level are *logical*: exactly the bytes the application
//! passed in. The fixed-width encoding the engine sees is applied underneath
//! by the shim and never leaks into these callbacks.

use std::cmp::Ordering;

use burrowstore_core::{EngineResult, MergeAccumulator};

use crate::error::{Result, StoreError};
use crate::key_codec::MAX_KEY_SIZE;
use crate::message;

/// Capability set defining a store's key/value semantics.
pub trait DataConfig: Send + Sync {
    /// Declared maximum logical key length, in `(0, MAX_KEY_SIZE]`.
    fn key_size(&self) -> usize;

    /// Smallest admissible key. May be empty.
    fn min_key(&self) -> &[u8];

    /// Largest admissible key. Must be non-empty and compare greater than
    /// `min_key`.
    fn max_key(&self) -> &[u8];

    /// Total order over logical keys.
    fn key_compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// 32-bit hash over a logical key.
    fn key_hash(&self, key: &[u8], seed: u32) -> u32;

    /// Whether `update` operations are meaningful for this config.
    ///
    /// Configs without merge semantics return `false`, and the store
    /// rejects blind updates at message-build time.
    fn supports_blind_updates(&self) -> bool {
        true
    }

    /// Merge an update (held in `acc`) with the older message `old_raw`.
    ///
    /// The default keeps the old state and discards the update.
    fn merge(&self, key: &[u8], old_raw: &[u8], acc: &mut MergeAccumulator) -> EngineResult<()> {
        let _ = key;
        acc.set(message::message_class(old_raw), old_raw);
        Ok(())
    }

    /// Merge an update (held in `acc`) when no older message exists.
    ///
    /// The default leaves the update in place, so it surfaces as the key's
    /// value until a real insert lands.
    fn merge_final(&self, key: &[u8], acc: &mut MergeAccumulator) -> EngineResult<()> {
        let _ = (key, acc);
        Ok(())
    }

    /// Render a key for diagnostics. Defaults to hex.
    fn key_to_string(&self, key: &[u8]) -> String {
        hex_string(key)
    }

    /// Render a message for diagnostics. Defaults to hex.
    fn message_to_string(&self, raw: &[u8]) -> String {
        hex_string(raw)
    }
}

pub(crate) fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Validate a data config against the store's structural invariants.
pub(crate) fn validate_data_config(cfg: &dyn DataConfig) -> Result<()> {
    let key_size = cfg.key_size();
    if key_size == 0 || key_size > MAX_KEY_SIZE {
        return Err(StoreError::bad_param(format!(
            "key_size {key_size} must be in (0, {MAX_KEY_SIZE}]"
        )));
    }
    if cfg.max_key().is_empty() {
        return Err(StoreError::bad_param("max_key must be non-empty"));
    }
    if cfg.max_key().len() > key_size {
        return Err(StoreError::bad_param(format!(
            "max_key of {} bytes cannot exceed key_size {key_size}",
            cfg.max_key().len()
        )));
    }
    if cfg.min_key().len() > key_size {
        return Err(StoreError::bad_param(format!(
            "min_key of {} bytes cannot exceed key_size {key_size}",
            cfg.min_key().len()
        )));
    }
    if cfg.key_compare(cfg.min_key(), cfg.max_key()) != Ordering::Less {
        return Err(StoreError::bad_param("min_key must compare below max_key"));
    }
    Ok(())
}
