//! Data-plane types shared between the trunk and its embedder
//!
//! The trunk is message-oriented: it never stores plain values, only tagged
//! messages whose semantics (ordering, hashing, merging) are supplied by a
//! [`DataDriver`]. The driver sees *physical* keys: fixed-width byte strings
//! whose interpretation is entirely up to the embedding layer.

use std::cmp::Ordering;

use crate::error::EngineResult;

/// Message kinds understood by the trunk.
///
/// The tag values are part of the on-disk format and must stay stable for
/// the lifetime of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    /// Set the key to the message payload
    Insert = 1,
    /// Remove the key
    Delete = 2,
    /// Blind mutation, resolved against older state via the driver's merge
    Update = 3,
}

impl MessageKind {
    /// Parse a wire tag. Returns `None` for unknown tags.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(MessageKind::Insert),
            2 => Some(MessageKind::Delete),
            3 => Some(MessageKind::Update),
            _ => None,
        }
    }

    /// Wire tag for this kind.
    pub fn tag(self) -> u8 {
        self as u8
    }
}

/// Capability set the trunk requires from its embedder.
///
/// All key arguments are physical keys of exactly `key_size()` bytes.
/// Message arguments are raw encoded messages; the trunk treats them as
/// opaque except through `message_class` and the merge hooks.
pub trait DataDriver: Send + Sync {
    /// Fixed physical key width, in bytes.
    fn key_size(&self) -> usize;

    /// Smallest admissible physical key.
    fn min_key(&self) -> &[u8];

    /// Largest admissible physical key.
    fn max_key(&self) -> &[u8];

    /// Total order over physical keys.
    fn key_compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// 32-bit key hash.
    fn key_hash(&self, key: &[u8], seed: u32) -> u32;

    /// Classify a raw message.
    fn message_class(&self, raw: &[u8]) -> MessageKind;

    /// Merge an update (held in `acc`) with the older message `old_raw`.
    ///
    /// On entry `acc` holds the newer update message; on return it holds the
    /// merged result.
    fn merge(&self, key: &[u8], old_raw: &[u8], acc: &mut MergeAccumulator) -> EngineResult<()>;

    /// Merge an update (held in `acc`) when no older message exists.
    fn merge_final(&self, key: &[u8], acc: &mut MergeAccumulator) -> EngineResult<()>;

    /// Render a key for diagnostics.
    fn key_to_string(&self, key: &[u8]) -> String;

    /// Render a message for diagnostics.
    fn message_to_string(&self, raw: &[u8]) -> String;
}

/// Growable tagged message buffer used to return lookup results and to
/// resolve merges.
///
/// An accumulator is either *invalid* (no message, the not-found state) or
/// holds one raw encoded message together with its kind. It can be built over
/// a caller-supplied buffer whose capacity is reused across lookups; when a
/// message outgrows that capacity the buffer reallocates and the larger
/// capacity sticks for subsequent reuse.
#[derive(Debug, Default)]
pub struct MergeAccumulator {
    data: Vec<u8>,
    kind: Option<MessageKind>,
}

impl MergeAccumulator {
    /// Empty, invalid accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build over a caller-owned buffer, reusing its capacity.
    pub fn with_buffer(mut buf: Vec<u8>) -> Self {
        buf.clear();
        Self {
            data: buf,
            kind: None,
        }
    }

    /// Store a raw message, replacing any previous contents.
    pub fn set(&mut self, kind: MessageKind, raw: &[u8]) {
        self.data.clear();
        self.data.extend_from_slice(raw);
        self.kind = Some(kind);
    }

    /// Reset to the invalid (not-found) state, keeping the buffer.
    pub fn set_invalid(&mut self) {
        self.data.clear();
        self.kind = None;
    }

    /// Whether a message is present.
    pub fn is_valid(&self) -> bool {
        self.kind.is_some()
    }

    /// Kind of the held message, if any.
    pub fn kind(&self) -> Option<MessageKind> {
        self.kind
    }

    /// Raw bytes of the held message. Empty when invalid.
    pub fn raw(&self) -> &[u8] {
        &self.data
    }

    /// Recover the underlying buffer, e.g. to return a caller's scratch.
    pub fn into_buffer(mut self) -> Vec<u8> {
        self.data.clear();
        self.data
    }
}
