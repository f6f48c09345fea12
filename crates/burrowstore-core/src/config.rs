//! Per-subsystem configuration
//!
//! The embedding layer translates its single user-facing config into one
//! config block per subsystem, in the order the subsystems are brought up:
//! io, allocator (extent store), cache, shard log, trunk. Each block
//! validates itself; validation failures surface before any file is touched.

use std::path::PathBuf;

use crate::error::{EngineError, EngineResult};

/// I/O geometry and file-creation parameters.
#[derive(Debug, Clone)]
pub struct IoConfig {
    /// Store directory; all log and extent files live beneath it
    pub path: PathBuf,
    /// Page size in bytes (power of two)
    pub page_size: u64,
    /// Extent size in bytes (power-of-two multiple of page_size)
    pub extent_size: u64,
    /// open(2)-style flags, recorded for diagnostics
    pub flags: i32,
    /// Unix permission bits for created files and directories
    pub perms: u32,
    /// Async queue depth hint for the I/O backend
    pub async_queue_depth: u64,
}

impl IoConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.path.as_os_str().is_empty() {
            return Err(EngineError::BadConfig {
                reason: "io path must be set".into(),
            });
        }
        if self.page_size == 0 || !self.page_size.is_power_of_two() {
            return Err(EngineError::BadConfig {
                reason: format!("page_size {} must be a power of two", self.page_size),
            });
        }
        if self.extent_size < self.page_size || self.extent_size % self.page_size != 0 {
            return Err(EngineError::BadConfig {
                reason: format!(
                    "extent_size {} must be a multiple of page_size {}",
                    self.extent_size, self.page_size
                ),
            });
        }
        if !(self.extent_size / self.page_size).is_power_of_two() {
            return Err(EngineError::BadConfig {
                reason: format!(
                    "extent_size {} must be a power-of-two multiple of page_size {}",
                    self.extent_size, self.page_size
                ),
            });
        }
        if self.async_queue_depth == 0 {
            return Err(EngineError::BadConfig {
                reason: "async_queue_depth must be > 0".into(),
            });
        }
        Ok(())
    }
}

/// Extent-store (allocator) configuration.
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    /// Extent size in bytes; extent files rotate at this boundary
    pub extent_size: u64,
    /// Total on-disk capacity budget in bytes
    pub capacity: u64,
}

impl AllocatorConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.capacity == 0 {
            return Err(EngineError::BadConfig {
                reason: "allocator capacity must be > 0".into(),
            });
        }
        if self.extent_size == 0 || self.capacity < self.extent_size {
            return Err(EngineError::BadConfig {
                reason: format!(
                    "allocator capacity {} must hold at least one extent of {}",
                    self.capacity, self.extent_size
                ),
            });
        }
        Ok(())
    }
}

/// Page-cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Page size in bytes; must match the io geometry
    pub page_size: u64,
    /// Cache capacity in bytes
    pub capacity: u64,
    /// Track and report hit/miss statistics
    pub use_stats: bool,
}

impl CacheConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.capacity < self.page_size {
            return Err(EngineError::BadConfig {
                reason: format!(
                    "cache capacity {} must hold at least one page of {}",
                    self.capacity, self.page_size
                ),
            });
        }
        Ok(())
    }

    /// Number of whole pages the cache can hold.
    pub fn page_count(&self) -> usize {
        (self.capacity / self.page_size) as usize
    }
}

/// Shard-log configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Whether writes are journaled at all
    pub enabled: bool,
    /// Log file rotation threshold in bytes
    pub rotation_size: u64,
}

impl LogConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.enabled && self.rotation_size < 4096 {
            return Err(EngineError::BadConfig {
                reason: format!("log rotation_size {} must be >= 4096", self.rotation_size),
            });
        }
        Ok(())
    }
}

/// Trunk configuration.
///
/// The filter and branching parameters describe the trunk's shape to the
/// embedder; the resident-set behavior is governed by `memtable_capacity`
/// and `reclaim_threshold`.
#[derive(Debug, Clone)]
pub struct TrunkConfig {
    /// Bytes of message data kept resident before flushed entries spill
    pub memtable_capacity: u64,
    /// Cadence of the background flush cycle
    pub flush_cadence: std::time::Duration,
    /// Fanout of the trunk tree
    pub fanout: u8,
    /// Maximum branches per trunk node
    pub max_branches_per_node: u8,
    /// B-tree height at which rough counts are taken
    pub rough_count_height: u8,
    /// Filter index size
    pub filter_index_size: u16,
    /// Filter remainder size in bits
    pub filter_remainder_size: u16,
    /// Dead bytes in the extent store before reclamation runs;
    /// `u64::MAX` disables proactive reclamation
    pub reclaim_threshold: u64,
    /// Track and report insertion/lookup statistics
    pub use_stats: bool,
}

impl TrunkConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.memtable_capacity == 0 {
            return Err(EngineError::BadConfig {
                reason: "memtable_capacity must be > 0".into(),
            });
        }
        if self.flush_cadence.is_zero() {
            return Err(EngineError::BadConfig {
                reason: "flush_cadence must be > 0".into(),
            });
        }
        if self.fanout < 2 {
            return Err(EngineError::BadConfig {
                reason: format!("fanout {} must be >= 2", self.fanout),
            });
        }
        if self.max_branches_per_node == 0 {
            return Err(EngineError::BadConfig {
                reason: "max_branches_per_node must be > 0".into(),
            });
        }
        if self.filter_remainder_size > 16 {
            return Err(EngineError::BadConfig {
                reason: format!(
                    "filter_remainder_size {} must be <= 16 bits",
                    self.filter_remainder_size
                ),
            });
        }
        Ok(())
    }
}
