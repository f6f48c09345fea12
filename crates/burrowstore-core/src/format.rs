//! On-disk record framing shared by the shard log and the extent store
//!
//! Every record follows the same layout:
//! ChunkHeader (32 bytes) + key_len(u16) + msg_len(u32) + padding(u16) + key_bytes + message_bytes
//!
//! The message bytes are an encoded message (kind tag + payload) and are
//! opaque to this layer.

use crate::error::{EngineError, EngineResult};

/// Magic bytes identifying BurrowStore records: "BURW" in ASCII
pub const MAGIC: [u8; 4] = [0x42, 0x55, 0x52, 0x57];

/// Maximum physical key size the framing supports
pub const MAX_PHYSICAL_KEY_SIZE: usize = 512;

/// Maximum encoded message size (32MB)
pub const MAX_MESSAGE_SIZE: usize = 32 * 1024 * 1024;

/// Chunk header size in bytes
pub const HEADER_SIZE: usize = 32;

/// Fixed-size header preceding each record
/// Size: 32 bytes
///
/// Layout:
///   [0..4]   magic:    [u8;4] - "BURW"
///   [4..8]   length:   u32 LE - payload length in bytes
///   [8..12]  checksum: u32 LE - CRC32C of payload bytes
///   [12..16] reserved: [u8;4] - must be zero
///   [16..32] padding:  [u8;16]
#[derive(Debug, Clone, Copy)]
pub struct ChunkHeader {
    /// Magic bytes for record identification and corruption resync
    pub magic: [u8; 4],
    /// Total length of the record payload (excluding this header)
    pub length: u32,
    /// CRC32C checksum of the payload bytes
    pub checksum: u32,
}

impl ChunkHeader {
    pub fn new(length: u32, checksum: u32) -> Self {
        Self {
            magic: MAGIC,
            length,
            checksum,
        }
    }

    /// Serialize header to bytes for writing
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic);
        buf[4..8].copy_from_slice(&self.length.to_le_bytes());
        buf[8..12].copy_from_slice(&self.checksum.to_le_bytes());
        // bytes 12..32 are reserved/padding, already zero
        buf
    }

    /// Parse header from bytes
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        Self {
            magic,
            length: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            checksum: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        }
    }
}

/// A complete record (deserialized)
#[derive(Debug, Clone)]
pub struct Record {
    pub key: Vec<u8>,
    pub message: Vec<u8>,
}

/// Serialize a key/message record into `out`, reusing its capacity.
///
/// `out` is cleared first; the caller typically passes a per-thread scratch
/// buffer so the hot write path does not allocate.
pub fn serialize_record_into(key: &[u8], message: &[u8], out: &mut Vec<u8>) -> EngineResult<()> {
    // Validate input sizes before touching the buffer
    if key.len() > MAX_PHYSICAL_KEY_SIZE {
        return Err(EngineError::Oversized {
            component: "key",
            size: key.len() as u64,
            limit: MAX_PHYSICAL_KEY_SIZE as u64,
        });
    }
    if message.len() > MAX_MESSAGE_SIZE {
        return Err(EngineError::Oversized {
            component: "message",
            size: message.len() as u64,
            limit: MAX_MESSAGE_SIZE as u64,
        });
    }

    // Payload: key_len(2) + msg_len(4) + padding(2) + key + message
    let payload_size = 8 + key.len() + message.len();

    out.clear();
    out.reserve(HEADER_SIZE + payload_size);

    // Write a placeholder header, then the payload, then patch the header
    // once the payload checksum is known.
    out.extend_from_slice(&[0u8; HEADER_SIZE]);
    out.extend_from_slice(&(key.len() as u16).to_le_bytes());
    out.extend_from_slice(&(message.len() as u32).to_le_bytes());
    out.extend_from_slice(&[0u8; 2]);
    out.extend_from_slice(key);
    out.extend_from_slice(message);

    let checksum = crc32c::crc32c(&out[HEADER_SIZE..]);
    let header = ChunkHeader::new(payload_size as u32, checksum);
    out[..HEADER_SIZE].copy_from_slice(&header.to_bytes());

    Ok(())
}

/// Serialize a key/message record into a fresh buffer.
pub fn serialize_record(key: &[u8], message: &[u8]) -> EngineResult<Vec<u8>> {
    let mut out = Vec::new();
    serialize_record_into(key, message, &mut out)?;
    Ok(out)
}

/// Deserialize a record from a byte slice.
///
/// `origin` and `offset` only feed error context.
pub fn deserialize_record(
    data: &[u8],
    origin: &std::path::Path,
    offset: u64,
) -> EngineResult<Record> {
    if data.len() < HEADER_SIZE {
        return Err(EngineError::CorruptRecord {
            path: origin.to_path_buf(),
            offset,
            reason: format!(
                "record too short: {} bytes, need at least {}",
                data.len(),
                HEADER_SIZE
            ),
        });
    }

    let header_bytes: [u8; HEADER_SIZE] = data[..HEADER_SIZE]
        .try_into()
        .expect("slice length checked above");
    let header = ChunkHeader::from_bytes(&header_bytes);

    if header.magic != MAGIC {
        return Err(EngineError::NoMagic {
            path: origin.to_path_buf(),
            offset,
            found: header.magic,
        });
    }

    let payload_end = HEADER_SIZE + header.length as usize;
    if data.len() < payload_end {
        return Err(EngineError::TornWrite {
            path: origin.to_path_buf(),
            offset,
            expected_size: header.length as u64,
            available: (data.len() - HEADER_SIZE) as u64,
        });
    }
    let payload = &data[HEADER_SIZE..payload_end];

    let computed = crc32c::crc32c(payload);
    if computed != header.checksum {
        return Err(EngineError::ChecksumMismatch {
            path: origin.to_path_buf(),
            offset,
            expected: header.checksum,
            actual: computed,
        });
    }

    // Payload: key_len(2) + msg_len(4) + padding(2) + key + message
    if payload.len() < 8 {
        return Err(EngineError::CorruptRecord {
            path: origin.to_path_buf(),
            offset,
            reason: "payload too short for record fields".to_string(),
        });
    }
    let key_len = u16::from_le_bytes([payload[0], payload[1]]) as usize;
    let msg_len = u32::from_le_bytes([payload[2], payload[3], payload[4], payload[5]]) as usize;

    let key_end = 8 + key_len;
    let msg_end = key_end + msg_len;
    if payload.len() < msg_end {
        return Err(EngineError::CorruptRecord {
            path: origin.to_path_buf(),
            offset,
            reason: format!(
                "payload of {} bytes too short for key({key_len}) + message({msg_len})",
                payload.len()
            ),
        });
    }

    Ok(Record {
        key: payload[8..key_end].to_vec(),
        message: payload[key_end..msg_end].to_vec(),
    })
}

/// Scan forward in a buffer for the next occurrence of the record magic.
/// Used for resynchronization after encountering corruption.
pub fn find_next_magic(buffer: &[u8], start: usize) -> Option<usize> {
    (start..buffer.len().saturating_sub(3)).find(|&i| buffer[i..i + 4] == MAGIC)
}
