//! Extent store — reference-counted on-disk allocation
//!
//! Flushed records live in extent-sized, append-only files. The store tracks
//! a live-record count per extent: records become dead when superseded by a
//! newer flush or covered by a tombstone, and an extent whose live count
//! drops to zero is deleted whole during reclamation. Capacity is bounded by
//! the configured disk budget.
//!
//! A superblock written at create time pins the store's geometry; mount
//! refuses a directory whose superblock is missing or disagrees.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use tracing::{info, warn};

use crate::cache::PageCache;
use crate::config::AllocatorConfig;
use crate::durability::durable_sync;
use crate::error::{EngineError, EngineResult};
use crate::format::{self, Record, HEADER_SIZE, MAGIC};
use crate::io::{open_append_with_perms, IoHandle};

const SUPERBLOCK_FILE: &str = "superblock.brw";
const SUPERBLOCK_VERSION: u16 = 1;
const SUPERBLOCK_SIZE: usize = 36;

fn extent_file_name(sequence: u64) -> String {
    format!("extent-{sequence:016x}.brw")
}

fn parse_extent_sequence(name: &str) -> Option<u64> {
    let hex = name.strip_prefix("extent-")?.strip_suffix(".brw")?;
    u64::from_str_radix(hex, 16).ok()
}

/// Position of a record within the extent store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtentLocation {
    /// Extent sequence number
    pub extent: u64,
    /// Byte offset of the record header within the extent file
    pub offset: u64,
    /// Total record length including header
    pub len: u32,
}

#[derive(Debug, Default, Clone)]
struct ExtentInfo {
    live: u64,
    bytes: u64,
    dead_bytes: u64,
}

/// Append-only extent files with per-extent live-record accounting.
pub struct ExtentStore {
    dir: PathBuf,
    superblock_path: PathBuf,
    cfg: AllocatorConfig,
    perms: u32,
    file: File,
    path: PathBuf,
    sequence: u64,
    size: u64,
    used_bytes: u64,
    extents: HashMap<u64, ExtentInfo>,
}

impl ExtentStore {
    /// Initialize a fresh extent store. Fails if one already exists here.
    pub fn create(io: &IoHandle, cfg: AllocatorConfig) -> EngineResult<Self> {
        cfg.validate()?;

        let superblock_path = io.dir().join(SUPERBLOCK_FILE);
        if superblock_path.exists() {
            return Err(EngineError::BadMount {
                path: io.dir().to_path_buf(),
                reason: "store already exists (superblock present); open it instead".into(),
            });
        }
        write_superblock(&superblock_path, io, &cfg)?;

        let sequence = 1;
        let path = io.extent_dir().join(extent_file_name(sequence));
        let file = open_append_with_perms(&path, io.config().perms)?;

        let mut extents = HashMap::new();
        extents.insert(sequence, ExtentInfo::default());

        Ok(Self {
            dir: io.extent_dir().to_path_buf(),
            superblock_path,
            cfg,
            perms: io.config().perms,
            file,
            path,
            sequence,
            size: 0,
            used_bytes: 0,
            extents,
        })
    }

    /// Mount an existing extent store, validating its superblock.
    pub fn mount(io: &IoHandle, cfg: AllocatorConfig) -> EngineResult<Self> {
        cfg.validate()?;

        let superblock_path = io.dir().join(SUPERBLOCK_FILE);
        read_superblock(&superblock_path, io, &cfg)?;

        let mut extents = HashMap::new();
        let mut used_bytes = 0u64;
        let mut max_sequence = 0u64;

        let entries = std::fs::read_dir(io.extent_dir())
            .map_err(|e| EngineError::io(io.extent_dir(), "failed to read extent directory", e))?;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(seq) = name.to_str().and_then(parse_extent_sequence) else {
                continue;
            };
            let bytes = entry
                .metadata()
                .map_err(|e| EngineError::io(entry.path(), "failed to stat extent file", e))?
                .len();
            extents.insert(
                seq,
                ExtentInfo {
                    live: 0,
                    bytes,
                    dead_bytes: 0,
                },
            );
            used_bytes += bytes;
            max_sequence = max_sequence.max(seq);
        }

        if max_sequence == 0 {
            return Err(EngineError::BadMount {
                path: io.extent_dir().to_path_buf(),
                reason: "no extent files found".into(),
            });
        }

        let path = io.extent_dir().join(extent_file_name(max_sequence));
        let file = open_append_with_perms(&path, io.config().perms)?;
        let size = extents
            .get(&max_sequence)
            .map(|info| info.bytes)
            .unwrap_or(0);

        Ok(Self {
            dir: io.extent_dir().to_path_buf(),
            superblock_path,
            cfg,
            perms: io.config().perms,
            file,
            path,
            sequence: max_sequence,
            size,
            used_bytes,
            extents,
        })
    }

    /// Append a framed record, returning its location.
    ///
    /// The record counts as live until `note_dead` is called for it.
    pub fn append_record(&mut self, record: &[u8]) -> EngineResult<ExtentLocation> {
        let len = record.len() as u64;
        if self.used_bytes + len > self.cfg.capacity {
            return Err(EngineError::CapacityExhausted {
                needed: len,
                remaining: self.cfg.capacity - self.used_bytes,
                capacity: self.cfg.capacity,
            });
        }

        if self.size > 0 && self.size + len > self.cfg.extent_size {
            self.rotate()?;
        }

        let offset = self.size;
        self.file
            .write_all(record)
            .map_err(|e| EngineError::io(&self.path, "extent write failed", e))?;
        durable_sync(&self.file)
            .map_err(|e| EngineError::io(&self.path, "extent durable_sync failed", e))?;

        self.size += len;
        self.used_bytes += len;
        let info = self.extents.entry(self.sequence).or_default();
        info.live += 1;
        info.bytes += len;

        Ok(ExtentLocation {
            extent: self.sequence,
            offset,
            len: record.len() as u32,
        })
    }

    fn rotate(&mut self) -> EngineResult<()> {
        durable_sync(&self.file)
            .map_err(|e| EngineError::io(&self.path, "extent sync before rotation failed", e))?;

        self.sequence += 1;
        let new_path = self.dir.join(extent_file_name(self.sequence));
        self.file = open_append_with_perms(&new_path, self.perms)?;
        self.path = new_path;
        self.size = 0;
        self.extents.insert(self.sequence, ExtentInfo::default());
        Ok(())
    }

    /// Mark a previously-appended record dead (superseded or tombstoned).
    pub fn note_dead(&mut self, loc: &ExtentLocation) {
        if let Some(info) = self.extents.get_mut(&loc.extent) {
            info.live = info.live.saturating_sub(1);
            info.dead_bytes += loc.len as u64;
        }
    }

    /// Total dead bytes across all extents.
    pub fn dead_bytes(&self) -> u64 {
        self.extents.values().map(|i| i.dead_bytes).sum()
    }

    /// Bytes currently allocated on disk.
    pub fn used_bytes(&self) -> u64 {
        self.used_bytes
    }

    /// Delete extents with no live records, except the current one.
    /// Returns the number of bytes reclaimed.
    pub fn reclaim(&mut self) -> EngineResult<u64> {
        let dead: Vec<u64> = self
            .extents
            .iter()
            .filter(|(&seq, info)| seq != self.sequence && info.live == 0 && info.bytes > 0)
            .map(|(&seq, _)| seq)
            .collect();

        let mut reclaimed = 0u64;
        for seq in dead {
            let path = self.dir.join(extent_file_name(seq));
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    if let Some(info) = self.extents.remove(&seq) {
                        self.used_bytes -= info.bytes;
                        reclaimed += info.bytes;
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to remove dead extent");
                }
            }
        }

        if reclaimed > 0 {
            info!(
                reclaimed_bytes = reclaimed,
                used_bytes = self.used_bytes,
                "reclaimed dead extents"
            );
        }
        Ok(reclaimed)
    }

    /// Read one record back through the page cache.
    pub fn read_record(&self, loc: &ExtentLocation, cache: &PageCache) -> EngineResult<Record> {
        read_record_at(&self.dir, loc, cache)
    }

    /// Scan every record across all extents in (sequence, offset) order,
    /// reading through the page cache (which doubles as mount-time warm-up).
    /// Corrupt records are skipped with a resync scan; torn records at the
    /// end of an extent terminate that extent's scan.
    pub fn scan(&self, cache: &PageCache) -> EngineResult<Vec<(ExtentLocation, Record)>> {
        let mut sequences: Vec<u64> = self.extents.keys().copied().collect();
        sequences.sort_unstable();

        let mut records = Vec::new();
        for seq in sequences {
            self.scan_extent(seq, cache, &mut records)?;
        }
        Ok(records)
    }

    fn scan_extent(
        &self,
        seq: u64,
        cache: &PageCache,
        records: &mut Vec<(ExtentLocation, Record)>,
    ) -> EngineResult<()> {
        let path = self.dir.join(extent_file_name(seq));
        let file_len = match std::fs::metadata(&path) {
            Ok(md) => md.len(),
            Err(_) => return Ok(()), // already reclaimed
        };

        let mut header_buf = Vec::new();
        let mut record_buf = Vec::new();
        let mut offset = 0u64;

        while offset + HEADER_SIZE as u64 <= file_len {
            cache.read(seq, &path, offset, HEADER_SIZE, &mut header_buf)?;

            if header_buf[0..4] != MAGIC {
                warn!(path = %path.display(), offset, "bad magic in extent scan, resyncing");
                match self.resync(seq, &path, offset + 1, file_len, cache)? {
                    Some(next) => {
                        offset = next;
                        continue;
                    }
                    None => break,
                }
            }

            let length = u32::from_le_bytes([
                header_buf[4],
                header_buf[5],
                header_buf[6],
                header_buf[7],
            ]) as u64;
            let total = HEADER_SIZE as u64 + length;
            if offset + total > file_len {
                warn!(path = %path.display(), offset, "truncated record at end of extent");
                break;
            }

            cache.read(seq, &path, offset, total as usize, &mut record_buf)?;
            match format::deserialize_record(&record_buf, &path, offset) {
                Ok(record) => {
                    records.push((
                        ExtentLocation {
                            extent: seq,
                            offset,
                            len: total as u32,
                        },
                        record,
                    ));
                    offset += total;
                }
                Err(e) => {
                    warn!(path = %path.display(), offset, error = %e, "corrupt extent record, resyncing");
                    match self.resync(seq, &path, offset + 1, file_len, cache)? {
                        Some(next) => offset = next,
                        None => break,
                    }
                }
            }
        }
        Ok(())
    }

    /// Scan forward for the next record magic, in page-sized steps.
    fn resync(
        &self,
        seq: u64,
        path: &Path,
        start: u64,
        file_len: u64,
        cache: &PageCache,
    ) -> EngineResult<Option<u64>> {
        let mut buf = Vec::new();
        let mut pos = start;
        while pos + 4 <= file_len {
            let chunk = (file_len - pos).min(cache.page_size()) as usize;
            cache.read(seq, path, pos, chunk, &mut buf)?;
            if let Some(idx) = format::find_next_magic(&buf, 0) {
                return Ok(Some(pos + idx as u64));
            }
            if chunk <= 3 {
                break;
            }
            pos += (chunk - 3) as u64;
        }
        Ok(None)
    }

    /// Extent directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the superblock, for diagnostics.
    pub fn superblock_path(&self) -> &Path {
        &self.superblock_path
    }
}

/// Read one record from an extent directory without an `ExtentStore` handle.
///
/// Extent files are append-only, so a located record is immutable; the read
/// path only needs the directory and the cache, never the store's write
/// state.
pub fn read_record_at(
    dir: &Path,
    loc: &ExtentLocation,
    cache: &PageCache,
) -> EngineResult<Record> {
    let path = dir.join(extent_file_name(loc.extent));
    let mut buf = Vec::new();
    cache.read(loc.extent, &path, loc.offset, loc.len as usize, &mut buf)?;
    format::deserialize_record(&buf, &path, loc.offset)
}

fn write_superblock(path: &Path, io: &IoHandle, cfg: &AllocatorConfig) -> EngineResult<()> {
    let mut buf = [0u8; SUPERBLOCK_SIZE];
    buf[0..4].copy_from_slice(&MAGIC);
    buf[4..6].copy_from_slice(&SUPERBLOCK_VERSION.to_le_bytes());
    // bytes 6..8 reserved
    buf[8..16].copy_from_slice(&io.config().page_size.to_le_bytes());
    buf[16..24].copy_from_slice(&cfg.extent_size.to_le_bytes());
    buf[24..32].copy_from_slice(&cfg.capacity.to_le_bytes());
    let checksum = crc32c::crc32c(&buf[0..32]);
    buf[32..36].copy_from_slice(&checksum.to_le_bytes());

    let mut opts = std::fs::OpenOptions::new();
    opts.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(io.config().perms);
    }
    let mut file = opts
        .open(path)
        .map_err(|e| EngineError::io(path, "failed to create superblock", e))?;
    file.write_all(&buf)
        .map_err(|e| EngineError::io(path, "failed to write superblock", e))?;
    durable_sync(&file).map_err(|e| EngineError::io(path, "failed to sync superblock", e))?;
    Ok(())
}

fn read_superblock(path: &Path, io: &IoHandle, cfg: &AllocatorConfig) -> EngineResult<()> {
    let data = std::fs::read(path).map_err(|e| EngineError::BadMount {
        path: path.to_path_buf(),
        reason: format!("superblock unreadable: {e}"),
    })?;
    if data.len() != SUPERBLOCK_SIZE {
        return Err(EngineError::BadMount {
            path: path.to_path_buf(),
            reason: format!("superblock has {} bytes, expected {SUPERBLOCK_SIZE}", data.len()),
        });
    }
    if data[0..4] != MAGIC {
        return Err(EngineError::NoMagic {
            path: path.to_path_buf(),
            offset: 0,
            found: [data[0], data[1], data[2], data[3]],
        });
    }

    let stored_crc = u32::from_le_bytes([data[32], data[33], data[34], data[35]]);
    let computed = crc32c::crc32c(&data[0..32]);
    if stored_crc != computed {
        return Err(EngineError::ChecksumMismatch {
            path: path.to_path_buf(),
            offset: 0,
            expected: stored_crc,
            actual: computed,
        });
    }

    let version = u16::from_le_bytes([data[4], data[5]]);
    if version != SUPERBLOCK_VERSION {
        return Err(EngineError::BadMount {
            path: path.to_path_buf(),
            reason: format!("superblock version {version}, expected {SUPERBLOCK_VERSION}"),
        });
    }

    let page_size = u64::from_le_bytes(data[8..16].try_into().expect("fixed slice"));
    let extent_size = u64::from_le_bytes(data[16..24].try_into().expect("fixed slice"));
    if page_size != io.config().page_size || extent_size != cfg.extent_size {
        return Err(EngineError::BadMount {
            path: path.to_path_buf(),
            reason: format!(
                "geometry mismatch: on-disk page_size={page_size} extent_size={extent_size}, \
                 configured page_size={} extent_size={}",
                io.config().page_size,
                cfg.extent_size
            ),
        });
    }
    Ok(())
}
