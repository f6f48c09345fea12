//! Shim between logical and physical key worlds
//!
//! The engine's [`DataDriver`] callbacks receive physical (fixed-width,
//! length-prefixed) keys. Applications supply a [`DataConfig`] over logical
//! keys. The shim is a decorator: each callback strips the length prefix,
//! forms the logical slice, and forwards to the application config. The
//! length prefix is stripped for hashing too, so padding never feeds the
//! hash.
//!
//! The shim pre-encodes the application's min/max keys into physical
//! sentinels at construction.

use std::cmp::Ordering;
use std::sync::Arc;

use burrowstore_core::{DataDriver, EngineResult, MergeAccumulator, MessageKind};

use crate::data_config::DataConfig;
use crate::error::Result;
use crate::key_codec::{decode_key, encode_key, PHYSICAL_KEY_SIZE};
use crate::message;

/// Decorator presenting a fixed-width key world to the engine.
pub(crate) struct ShimDataConfig {
    app: Arc<dyn DataConfig>,
    min_key: [u8; PHYSICAL_KEY_SIZE],
    max_key: [u8; PHYSICAL_KEY_SIZE],
}

impl ShimDataConfig {
    pub(crate) fn new(app: Arc<dyn DataConfig>) -> Result<Self> {
        let mut min_key = [0u8; PHYSICAL_KEY_SIZE];
        let mut max_key = [0u8; PHYSICAL_KEY_SIZE];
        encode_key(&mut min_key, app.min_key())?;
        encode_key(&mut max_key, app.max_key())?;
        Ok(Self {
            app,
            min_key,
            max_key,
        })
    }

    pub(crate) fn app(&self) -> &Arc<dyn DataConfig> {
        &self.app
    }
}

impl DataDriver for ShimDataConfig {
    fn key_size(&self) -> usize {
        PHYSICAL_KEY_SIZE
    }

    fn min_key(&self) -> &[u8] {
        &self.min_key
    }

    fn max_key(&self) -> &[u8] {
        &self.max_key
    }

    fn key_compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.app.key_compare(decode_key(a), decode_key(b))
    }

    fn key_hash(&self, key: &[u8], seed: u32) -> u32 {
        self.app.key_hash(decode_key(key), seed)
    }

    fn message_class(&self, raw: &[u8]) -> MessageKind {
        message::message_class(raw)
    }

    fn merge(&self, key: &[u8], old_raw: &[u8], acc: &mut MergeAccumulator) -> EngineResult<()> {
        self.app.merge(decode_key(key), old_raw, acc)
    }

    fn merge_final(&self, key: &[u8], acc: &mut MergeAccumulator) -> EngineResult<()> {
        self.app.merge_final(decode_key(key), acc)
    }

    fn key_to_string(&self, key: &[u8]) -> String {
        self.app.key_to_string(decode_key(key))
    }

    fn message_to_string(&self, raw: &[u8]) -> String {
        self.app.message_to_string(raw)
    }
}
