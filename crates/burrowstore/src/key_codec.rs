//! Length-prefixed variable-length key encoding
//!
//! The trunk stores fixed-width keys. Applications use variable-length keys
//! up to [`MAX_KEY_SIZE`] bytes. The bridge is a length-prefix encoding into
//! a fixed physical slot:
//!
//! ```text
//! physical key:  [ length: u8 ][ data: MAX_KEY_SIZE bytes, zero-padded ]
//! ```
//!
//! The slot is zero-filled before the payload is copied so that byte-wise
//! operations on encoded keys never observe stale padding.

use crate::error::{Result, StoreError};

/// Maximum logical key length, in bytes.
pub const MAX_KEY_SIZE: usize = 104;

/// Size of the length-prefix header.
const KEY_HEADER_SIZE: usize = 1;

/// Fixed width of an encoded (physical) key.
pub(crate) const PHYSICAL_KEY_SIZE: usize = MAX_KEY_SIZE + KEY_HEADER_SIZE;

// The one-byte header caps logical keys at 255 bytes, and the engine
// reserves room for eight-byte sentinels.
const _: () = assert!(MAX_KEY_SIZE <= u8::MAX as usize);
const _: () = assert!(MAX_KEY_SIZE >= 8);
const _: () = assert!(MAX_KEY_SIZE + KEY_HEADER_SIZE == PHYSICAL_KEY_SIZE);

/// Encode a logical key into a physical slot.
///
/// `out` must be exactly [`PHYSICAL_KEY_SIZE`] bytes. The slot is
/// zero-filled, the length header written, and the payload copied.
pub(crate) fn encode_key(out: &mut [u8], key: &[u8]) -> Result<()> {
    if key.len() > MAX_KEY_SIZE {
        return Err(StoreError::invalid_arg(format!(
            "key of {} bytes exceeds maximum key size {MAX_KEY_SIZE}",
            key.len()
        )));
    }
    assert_eq!(
        out.len(),
        PHYSICAL_KEY_SIZE,
        "key slot must be exactly PHYSICAL_KEY_SIZE bytes"
    );

    out.fill(0);
    out[0] = key.len() as u8;
    if !key.is_empty() {
        out[KEY_HEADER_SIZE..KEY_HEADER_SIZE + key.len()].copy_from_slice(key);
    }
    Ok(())
}

/// Decode a physical key back to its logical slice.
///
/// The encoded form must carry a sane length header; callers inside the
/// engine cannot forge one, so violation is a programming error.
pub(crate) fn decode_key(encoded: &[u8]) -> &[u8] {
    let length = encoded[0] as usize;
    assert!(
        length <= MAX_KEY_SIZE,
        "encoded key header claims {length} bytes, maximum is {MAX_KEY_SIZE}"
    );
    &encoded[KEY_HEADER_SIZE..KEY_HEADER_SIZE + length]
}
