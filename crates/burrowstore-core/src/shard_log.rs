//! Shard log — the write-ahead journal
//!
//! Durability contract, in order:
//! 1. serialize: frame the key/message record with CRC32C
//! 2. write:     append the framed bytes to the current log file
//! 3. sync:      durable_sync() so the bytes reach persistent storage
//! 4. return:    only after sync does the caller update the resident table
//!
//! The flush cycle rotates the log before flushing to the extent store and
//! prunes fully-flushed log files afterwards, which keeps the log bounded.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::config::LogConfig;
use crate::durability::durable_sync;
use crate::error::{EngineError, EngineResult};
use crate::format::{self, Record, HEADER_SIZE, MAGIC};
use crate::io::open_append_with_perms;

fn log_file_name(sequence: u64) -> String {
    format!("log-{sequence:016x}.brw")
}

fn parse_log_sequence(name: &str) -> Option<u64> {
    let hex = name.strip_prefix("log-")?.strip_suffix(".brw")?;
    u64::from_str_radix(hex, 16).ok()
}

/// Appends framed records and guarantees their durability.
///
/// INVARIANT: `append` must complete (including durable_sync) before the
/// caller updates the resident table.
pub struct ShardLogWriter {
    file: File,
    path: PathBuf,
    size: u64,
    dir: PathBuf,
    sequence: u64,
    perms: u32,
    cfg: LogConfig,
}

impl ShardLogWriter {
    /// Open the log in `dir`, resuming after the highest existing sequence.
    pub fn open(dir: &Path, perms: u32, cfg: LogConfig) -> EngineResult<Self> {
        cfg.validate()?;

        let sequence = Self::max_sequence(dir).unwrap_or(0);
        let path = dir.join(log_file_name(sequence));
        let file = open_append_with_perms(&path, perms)?;
        let size = file
            .metadata()
            .map_err(|e| EngineError::io(&path, "failed to stat log file", e))?
            .len();

        Ok(Self {
            file,
            path,
            size,
            dir: dir.to_path_buf(),
            sequence,
            perms,
            cfg,
        })
    }

    fn max_sequence(dir: &Path) -> Option<u64> {
        let entries = std::fs::read_dir(dir).ok()?;
        entries
            .flatten()
            .filter_map(|e| parse_log_sequence(e.file_name().to_str()?))
            .max()
    }

    /// Append a framed record with full durability.
    pub fn append(&mut self, record: &[u8]) -> EngineResult<()> {
        self.append_bytes(record)?;
        durable_sync(&self.file)
            .map_err(|e| EngineError::io(&self.path, "log durable_sync failed", e))
    }

    /// Append without syncing. The record lands in the OS page cache only;
    /// call `sync` afterwards to make a batch durable with one fsync.
    pub fn append_fast(&mut self, record: &[u8]) -> EngineResult<()> {
        self.append_bytes(record)
    }

    fn append_bytes(&mut self, record: &[u8]) -> EngineResult<()> {
        if self.size + record.len() as u64 > self.cfg.rotation_size {
            self.rotate()?;
        }
        self.file
            .write_all(record)
            .map_err(|e| EngineError::io(&self.path, "log write failed", e))?;
        self.size += record.len() as u64;
        Ok(())
    }

    /// Sync the current log file without writing.
    pub fn sync(&self) -> EngineResult<()> {
        durable_sync(&self.file).map_err(|e| EngineError::io(&self.path, "log sync failed", e))
    }

    /// Switch to a fresh log file, syncing the old one first.
    /// Returns the new file's sequence number.
    pub fn rotate(&mut self) -> EngineResult<u64> {
        durable_sync(&self.file)
            .map_err(|e| EngineError::io(&self.path, "log sync before rotation failed", e))?;

        self.sequence += 1;
        let new_path = self.dir.join(log_file_name(self.sequence));
        self.file = open_append_with_perms(&new_path, self.perms)?;
        self.path = new_path;
        self.size = 0;
        Ok(self.sequence)
    }

    /// Delete log files with a sequence below `sequence`.
    ///
    /// Only safe once every record in those files has been flushed to the
    /// extent store; the flush cycle enforces that ordering.
    pub fn prune_before(&self, sequence: u64) -> EngineResult<()> {
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| EngineError::io(&self.dir, "failed to read log directory", e))?;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(seq) = name.to_str().and_then(parse_log_sequence) else {
                continue;
            };
            if seq < sequence {
                if let Err(e) = std::fs::remove_file(entry.path()) {
                    warn!(path = %entry.path().display(), error = %e, "failed to prune log file");
                }
            }
        }
        Ok(())
    }

    /// Current log file sequence.
    pub fn current_sequence(&self) -> u64 {
        self.sequence
    }

    /// Current log file path, for diagnostics.
    pub fn current_path(&self) -> &Path {
        &self.path
    }

    /// Bytes written to the current log file.
    pub fn current_size(&self) -> u64 {
        self.size
    }
}

/// Replays records from log files for crash recovery.
pub struct ShardLogReader {
    dir: PathBuf,
}

impl ShardLogReader {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    /// Recover all records across log files, in sequence order.
    ///
    /// Per file:
    /// 1. Check magic at the current offset; on mismatch, scan forward to
    ///    resync on the next record boundary.
    /// 2. Validate the framed length against the remaining bytes; a torn
    ///    record at EOF is the crash point and recovery stops there.
    /// 3. Verify CRC32C; corrupt records are skipped with a warning.
    pub fn recover_records(&self) -> EngineResult<Vec<Record>> {
        let mut files: Vec<(u64, PathBuf)> = Vec::new();
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| EngineError::io(&self.dir, "failed to read log directory", e))?;
        for entry in entries.flatten() {
            let name = entry.file_name();
            if let Some(seq) = name.to_str().and_then(parse_log_sequence) {
                files.push((seq, entry.path()));
            }
        }
        files.sort_by_key(|(seq, _)| *seq);

        let mut records = Vec::new();
        for (_, path) in &files {
            records.extend(self.recover_from_file(path)?);
        }
        Ok(records)
    }

    fn recover_from_file(&self, path: &Path) -> EngineResult<Vec<Record>> {
        let mut file = File::open(path)
            .map_err(|e| EngineError::io(path, "failed to open log file for recovery", e))?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)
            .map_err(|e| EngineError::io(path, "failed to read log file", e))?;

        let mut records = Vec::new();
        let mut offset = 0usize;

        while offset + HEADER_SIZE <= buffer.len() {
            if buffer[offset..offset + 4] != MAGIC {
                warn!(
                    path = %path.display(),
                    offset,
                    "bad magic during log recovery, scanning for next record"
                );
                match format::find_next_magic(&buffer, offset + 1) {
                    Some(next) => {
                        offset = next;
                        continue;
                    }
                    None => break,
                }
            }

            let length = u32::from_le_bytes([
                buffer[offset + 4],
                buffer[offset + 5],
                buffer[offset + 6],
                buffer[offset + 7],
            ]) as usize;
            let total = HEADER_SIZE + length;

            if offset + total > buffer.len() {
                // Torn write: the record started but never completed.
                warn!(
                    path = %path.display(),
                    offset,
                    needed = total,
                    available = buffer.len() - offset,
                    "torn write at end of log, stopping recovery here"
                );
                break;
            }

            match format::deserialize_record(&buffer[offset..offset + total], path, offset as u64)
            {
                Ok(record) => {
                    records.push(record);
                    offset += total;
                }
                Err(e) => {
                    warn!(path = %path.display(), offset, error = %e, "corrupt log record, resyncing");
                    match format::find_next_magic(&buffer, offset + 1) {
                        Some(next) => offset = next,
                        None => break,
                    }
                }
            }
        }

        Ok(records)
    }
}
