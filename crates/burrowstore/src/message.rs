//! Tagged message encoding
//!
//! A message is a value payload prefixed by a one-byte kind tag:
//!
//! ```text
//! message:  [ kind: u8 ][ value bytes ]
//! ```
//!
//! The engine stores and returns messages in this form; only the tag is
//! interpreted below the façade.

use crate::error::{Result, StoreError};

pub use burrowstore_core::MessageKind;

/// Size of the kind-tag header.
pub(crate) const MESSAGE_HEADER_SIZE: usize = 1;

/// Encode a message into a fresh buffer.
pub(crate) fn encode_message(kind: MessageKind, value: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(MESSAGE_HEADER_SIZE + value.len());
    raw.push(kind.tag());
    raw.extend_from_slice(value);
    raw
}

/// Encode a message into a caller-provided slot, returning the encoded
/// length. Fails when the slot cannot hold the header plus the payload.
pub fn encode_message_into(kind: MessageKind, value: &[u8], dst: &mut [u8]) -> Result<usize> {
    let needed = MESSAGE_HEADER_SIZE + value.len();
    if needed > dst.len() {
        return Err(StoreError::invalid_arg(format!(
            "message of {} bytes exceeds buffer of {} bytes",
            needed,
            dst.len()
        )));
    }
    dst[0] = kind.tag();
    dst[MESSAGE_HEADER_SIZE..needed].copy_from_slice(value);
    Ok(needed)
}

/// View the value payload of an encoded message.
pub fn decode_message(raw: &[u8]) -> Result<&[u8]> {
    if raw.len() < MESSAGE_HEADER_SIZE {
        return Err(StoreError::invalid_arg(format!(
            "message buffer of {} bytes is shorter than the {MESSAGE_HEADER_SIZE}-byte header",
            raw.len()
        )));
    }
    Ok(&raw[MESSAGE_HEADER_SIZE..])
}

/// Classify an encoded message.
///
/// Unknown tags cannot arise from this façade's encoders; hitting one means
/// the buffer is not a message, which is a programming error.
pub fn message_class(raw: &[u8]) -> MessageKind {
    assert!(!raw.is_empty(), "empty buffer is not a message");
    match MessageKind::from_tag(raw[0]) {
        Some(kind) => kind,
        None => panic!("unknown message tag: {}", raw[0]),
    }
}
