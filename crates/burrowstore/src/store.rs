//! Store lifecycle and point operations
//!
//! A [`Store`] binds an application [`DataConfig`] to the storage core. Open
//! translates the single [`StoreConfig`] into per-subsystem configs and
//! brings the subsystems up in order: io handle, task system, extent store
//! (create or mount), page cache, shard log, trunk (create or mount). Each
//! step returns early on failure and the already-built subsystems unwind in
//! reverse order; close tears the same stack down explicitly.
//!
//! Point operations take logical keys, encode them into a stack slot, and
//! hand tagged messages to the trunk.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use burrowstore_core::{
    trunk_scratch_size, AllocatorConfig, CacheConfig, IoConfig, IoHandle, LogConfig, PageCache,
    ShardLogReader, ShardLogWriter, TaskSystem, Trunk, TrunkConfig,
};
use tracing::{error, info};

use crate::data_config::{validate_data_config, DataConfig};
use crate::error::{Result, StoreError};
use crate::iterator::RangeIterator;
use crate::key_codec::{encode_key, PHYSICAL_KEY_SIZE};
use crate::lookup::LookupResult;
use crate::message::{encode_message, MessageKind};
use crate::shim::ShimDataConfig;

/// `O_RDWR | O_CREAT`
const DEFAULT_IO_FLAGS: i32 = 0o102;
const DEFAULT_IO_PERMS: u32 = 0o755;
const DEFAULT_PAGE_SIZE: u64 = 4096;
const DEFAULT_EXTENT_PAGES: u64 = 128;
const DEFAULT_QUEUE_DEPTH: u64 = 256;
const DEFAULT_MEMTABLE_CAPACITY: u64 = 24 * 1024 * 1024;
const DEFAULT_FANOUT: u8 = 8;
const DEFAULT_MAX_BRANCHES: u8 = 24;
const DEFAULT_ROUGH_COUNT_HEIGHT: u8 = 1;
const DEFAULT_FILTER_INDEX_SIZE: u16 = 256;
const DEFAULT_FILTER_REMAINDER_SIZE: u16 = 6;
const DEFAULT_LOG_ROTATION: u64 = 64 * 1024 * 1024;
const DEFAULT_FLUSH_CADENCE: Duration = Duration::from_secs(2);

/// Root id the trunk is created or mounted at.
const TRUNK_ROOT_ID: u64 = 1;

/// User-facing store configuration.
///
/// Zero-valued tuning fields take defaults at open; `data_dir`,
/// `cache_size`, and `disk_size` are required. The config is consumed by
/// [`Store::create`] / [`Store::open`]: ownership of the data config moves
/// into the store, so a stale config cannot alias a running instance.
pub struct StoreConfig {
    /// Store directory (required)
    pub data_dir: PathBuf,
    /// Page-cache capacity in bytes (required)
    pub cache_size: u64,
    /// On-disk capacity budget in bytes (required)
    pub disk_size: u64,

    /// Page size in bytes; default 4096
    pub page_size: u64,
    /// Extent size in bytes; default 128 pages
    pub extent_size: u64,
    /// open(2)-style flags; default `O_RDWR | O_CREAT`
    pub io_flags: i32,
    /// Permission bits for created files; default 0o755
    pub io_perms: u32,
    /// Async I/O queue depth hint; default 256
    pub io_async_queue_depth: u64,

    /// Resident-set budget before flushed values spill; default 24 MiB
    pub memtable_capacity: u64,
    /// Trunk fanout; default 8
    pub fanout: u8,
    /// Maximum branches per trunk node; default 24
    pub max_branches_per_node: u8,
    /// B-tree height for rough counts; default 1
    pub btree_rough_count_height: u8,
    /// Filter index size; default 256
    pub filter_index_size: u16,
    /// Filter remainder bits; default 6
    pub filter_remainder_size: u16,
    /// Dead bytes before extent reclamation; default `u64::MAX` (disabled)
    pub reclaim_threshold: u64,

    /// Journal writes through the shard log; default true
    pub use_log: bool,
    /// Track and report statistics; default true
    pub use_stats: bool,

    /// Application key/value semantics
    pub data_config: Arc<dyn DataConfig>,
}

impl StoreConfig {
    /// Config with required fields set and every tuning field defaulted.
    pub fn new(
        data_dir: impl Into<PathBuf>,
        cache_size: u64,
        disk_size: u64,
        data_config: Arc<dyn DataConfig>,
    ) -> Self {
        Self {
            data_dir: data_dir.into(),
            cache_size,
            disk_size,
            page_size: 0,
            extent_size: 0,
            io_flags: 0,
            io_perms: 0,
            io_async_queue_depth: 0,
            memtable_capacity: 0,
            fanout: 0,
            max_branches_per_node: 0,
            btree_rough_count_height: 0,
            filter_index_size: 0,
            filter_remainder_size: 0,
            reclaim_threshold: 0,
            use_log: true,
            use_stats: true,
            data_config,
        }
    }

    /// Fill zero-valued tuning fields with their defaults.
    fn set_defaults(&mut self) {
        if self.page_size == 0 {
            self.page_size = DEFAULT_PAGE_SIZE;
        }
        if self.extent_size == 0 {
            self.extent_size = DEFAULT_EXTENT_PAGES * self.page_size;
        }
        if self.io_flags == 0 {
            self.io_flags = DEFAULT_IO_FLAGS;
        }
        if self.io_perms == 0 {
            self.io_perms = DEFAULT_IO_PERMS;
        }
        if self.io_async_queue_depth == 0 {
            self.io_async_queue_depth = DEFAULT_QUEUE_DEPTH;
        }
        if self.memtable_capacity == 0 {
            self.memtable_capacity = DEFAULT_MEMTABLE_CAPACITY;
        }
        if self.fanout == 0 {
            self.fanout = DEFAULT_FANOUT;
        }
        if self.max_branches_per_node == 0 {
            self.max_branches_per_node = DEFAULT_MAX_BRANCHES;
        }
        if self.btree_rough_count_height == 0 {
            self.btree_rough_count_height = DEFAULT_ROUGH_COUNT_HEIGHT;
        }
        if self.filter_index_size == 0 {
            self.filter_index_size = DEFAULT_FILTER_INDEX_SIZE;
        }
        if self.filter_remainder_size == 0 {
            self.filter_remainder_size = DEFAULT_FILTER_REMAINDER_SIZE;
        }
        if self.reclaim_threshold == 0 {
            self.reclaim_threshold = u64::MAX;
        }
    }
}

/// An open store.
///
/// The store exclusively owns its subsystems; the application data config is
/// shared. Closing consumes the store, so a closed handle cannot be used
/// again.
pub struct Store {
    trunk: Trunk,
    io: IoHandle,
    tasks: Arc<TaskSystem>,
    app: Arc<dyn DataConfig>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// Create a new store at `cfg.data_dir`.
    pub fn create(cfg: StoreConfig) -> Result<Store> {
        Self::create_or_open(cfg, false)
    }

    /// Open an existing store at `cfg.data_dir`.
    pub fn open(cfg: StoreConfig) -> Result<Store> {
        Self::create_or_open(cfg, true)
    }

    fn create_or_open(mut cfg: StoreConfig, open_existing: bool) -> Result<Store> {
        validate_data_config(cfg.data_config.as_ref())?;

        if cfg.data_dir.as_os_str().is_empty() || cfg.cache_size == 0 || cfg.disk_size == 0 {
            error!("expect data_dir, cache_size and disk_size to be set");
            return Err(StoreError::bad_param(
                "data_dir, cache_size and disk_size are required",
            ));
        }
        cfg.set_defaults();

        let app = Arc::clone(&cfg.data_config);
        let shim = Arc::new(ShimDataConfig::new(Arc::clone(&app))?);

        let io_cfg = IoConfig {
            path: cfg.data_dir.clone(),
            page_size: cfg.page_size,
            extent_size: cfg.extent_size,
            flags: cfg.io_flags,
            perms: cfg.io_perms,
            async_queue_depth: cfg.io_async_queue_depth,
        };
        let allocator_cfg = AllocatorConfig {
            extent_size: cfg.extent_size,
            capacity: cfg.disk_size,
        };
        let cache_cfg = CacheConfig {
            page_size: cfg.page_size,
            capacity: cfg.cache_size,
            use_stats: cfg.use_stats,
        };
        let log_cfg = LogConfig {
            enabled: cfg.use_log,
            rotation_size: DEFAULT_LOG_ROTATION,
        };
        let trunk_cfg = TrunkConfig {
            memtable_capacity: cfg.memtable_capacity,
            flush_cadence: DEFAULT_FLUSH_CADENCE,
            fanout: cfg.fanout,
            max_branches_per_node: cfg.max_branches_per_node,
            rough_count_height: cfg.btree_rough_count_height,
            filter_index_size: cfg.filter_index_size,
            filter_remainder_size: cfg.filter_remainder_size,
            reclaim_threshold: cfg.reclaim_threshold,
            use_stats: cfg.use_stats,
        };

        // Bring-up order matters; failures return early and the subsystems
        // built so far unwind in reverse order.
        let io = IoHandle::init(io_cfg).map_err(|e| {
            error!(error = %e, "failed to initialize io handle");
            StoreError::from(e)
        })?;

        let tasks = TaskSystem::create(trunk_scratch_size());

        let extents = if open_existing {
            burrowstore_core::ExtentStore::mount(&io, allocator_cfg)
        } else {
            burrowstore_core::ExtentStore::create(&io, allocator_cfg)
        }
        .map_err(|e| {
            error!(
                error = %e,
                "failed to {} extent allocator",
                if open_existing { "mount" } else { "initialize" }
            );
            StoreError::from(e)
        })?;

        let cache = Arc::new(PageCache::new(&cache_cfg).map_err(|e| {
            error!(error = %e, "failed to initialize page cache");
            StoreError::from(e)
        })?);

        let log = if cfg.use_log {
            Some(
                ShardLogWriter::open(io.log_dir(), cfg.io_perms, log_cfg).map_err(|e| {
                    error!(error = %e, "failed to open shard log");
                    StoreError::from(e)
                })?,
            )
        } else {
            None
        };

        let trunk = if open_existing {
            let recovered = ShardLogReader::new(io.log_dir())
                .recover_records()
                .map_err(StoreError::from)?;
            Trunk::mount(
                trunk_cfg,
                shim,
                extents,
                cache,
                log,
                Arc::clone(&tasks),
                TRUNK_ROOT_ID,
                recovered,
            )
        } else {
            Trunk::create(
                trunk_cfg,
                shim,
                extents,
                cache,
                log,
                Arc::clone(&tasks),
                TRUNK_ROOT_ID,
            )
        }
        .map_err(|e| {
            error!(error = %e, "failed to bring up trunk");
            StoreError::InvalidState {
                reason: format!("trunk {} failed: {e}", if open_existing { "mount" } else { "create" }),
            }
        })?;

        info!(
            path = %cfg.data_dir.display(),
            "successfully {} burrowstore instance",
            if open_existing { "mounted existing" } else { "created new" }
        );

        Ok(Store {
            trunk,
            io,
            tasks,
            app,
        })
    }

    /// Close the store: unmount the trunk, then release the cache, extent
    /// allocator, io handle, and task system in that order. Best-effort;
    /// problems surface in the log.
    pub fn close(self) {
        let Store {
            trunk, io, tasks, ..
        } = self;
        if let Err(e) = trunk.unmount() {
            error!(error = %e, "trunk unmount failed during close");
        }
        info!(path = %io.dir().display(), "closed burrowstore instance");
        drop(io);
        drop(tasks);
    }

    /// Register the calling thread with the task system.
    ///
    /// Any thread other than the opening one must register exactly once
    /// before its first operation, and deregister before it exits.
    pub fn register_thread(&self) {
        self.tasks.register_this_thread();
    }

    /// Deregister the calling thread, releasing its scratch memory.
    pub fn deregister_thread(&self) {
        self.tasks.deregister_this_thread();
    }

    /// Insert a key/value pair.
    pub fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let raw = encode_message(MessageKind::Insert, value);
        self.insert_message(key, &raw)
    }

    /// Delete a key.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        const DELETE_MESSAGE: &[u8] = &[MessageKind::Delete as u8];
        self.insert_message(key, DELETE_MESSAGE)
    }

    /// Apply a blind update to a key.
    ///
    /// Rejected up front when the data config has no merge semantics.
    pub fn update(&self, key: &[u8], delta: &[u8]) -> Result<()> {
        if !self.app.supports_blind_updates() {
            return Err(StoreError::invalid_arg(
                "data config does not support blind updates",
            ));
        }
        let raw = encode_message(MessageKind::Update, delta);
        self.insert_message(key, &raw)
    }

    fn insert_message(&self, key: &[u8], raw: &[u8]) -> Result<()> {
        self.validate_key_length(key)?;
        debug_assert!(
            self.key_in_range(key),
            "attempt to insert key outside the configured min/max key range"
        );

        let mut slot = [0u8; PHYSICAL_KEY_SIZE];
        encode_key(&mut slot, key)?;
        self.trunk.insert(&slot, raw).map_err(StoreError::from)
    }

    /// Look up a key, filling the caller's result buffer.
    ///
    /// Returns Ok for both hit and miss; check [`LookupResult::found`].
    pub fn lookup(&self, key: &[u8], result: &mut LookupResult) -> Result<()> {
        self.validate_key_length(key)?;

        let mut slot = [0u8; PHYSICAL_KEY_SIZE];
        encode_key(&mut slot, key)?;
        self.trunk
            .lookup(&slot, &mut result.acc)
            .map_err(StoreError::from)
    }

    /// Range iterator from `start_key`, or from the beginning when `None`.
    pub fn range(&self, start_key: Option<&[u8]>) -> Result<RangeIterator<'_>> {
        let start_slot = match start_key {
            Some(key) => {
                self.validate_key_length(key)?;
                let mut slot = [0u8; PHYSICAL_KEY_SIZE];
                encode_key(&mut slot, key)?;
                Some(slot)
            }
            None => None,
        };

        let entries = self
            .trunk
            .range_scan(start_slot.as_ref().map(|s| s.as_slice()), None, u64::MAX)
            .map_err(StoreError::from)?;
        Ok(RangeIterator::new(self, entries))
    }

    fn validate_key_length(&self, key: &[u8]) -> Result<()> {
        if key.len() > self.app.key_size() {
            error!(
                key_len = key.len(),
                key_size = self.app.key_size(),
                "key exceeds the data config's key_size"
            );
            return Err(StoreError::invalid_arg(format!(
                "key of {} bytes exceeds data config key_size {}",
                key.len(),
                self.app.key_size()
            )));
        }
        Ok(())
    }

    /// Whether a key lies inside `[min_key, max_key]`.
    fn key_in_range(&self, key: &[u8]) -> bool {
        let app = &self.app;
        if app.key_compare(app.min_key(), key).is_gt() {
            error!(
                key = %app.key_to_string(key),
                min = %app.key_to_string(app.min_key()),
                "key is below the configured min key"
            );
            return false;
        }
        if app.key_compare(key, app.max_key()).is_gt() {
            error!(
                key = %app.key_to_string(key),
                max = %app.key_to_string(app.max_key()),
                "key is above the configured max key"
            );
            return false;
        }
        true
    }

    /// Drop every cached page. Testing hook.
    pub fn cache_flush(&self) {
        self.trunk.cache_flush();
    }

    /// Emit insertion-side statistics through the log.
    pub fn stats_print_insertion(&self) {
        self.trunk.print_insertion_stats();
    }

    /// Emit lookup-side statistics through the log.
    pub fn stats_print_lookup(&self) {
        self.trunk.print_lookup_stats();
    }

    /// Zero all statistics counters.
    pub fn stats_reset(&self) {
        self.trunk.reset_stats();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::default_config::DefaultDataConfig;
    use tempfile::TempDir;

    fn config(dir: &std::path::Path) -> StoreConfig {
        StoreConfig::new(
            dir,
            1024 * 1024,
            64 * 1024 * 1024,
            Arc::new(DefaultDataConfig::new(16).unwrap()),
        )
    }

    #[test]
    fn test_defaults_fill_zero_fields() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = config(tmp.path());
        cfg.set_defaults();
        assert_eq!(cfg.page_size, 4096);
        assert_eq!(cfg.extent_size, 128 * 4096);
        assert_eq!(cfg.io_perms, 0o755);
        assert_eq!(cfg.io_async_queue_depth, 256);
        assert_eq!(cfg.memtable_capacity, 24 * 1024 * 1024);
        assert_eq!(cfg.fanout, 8);
        assert_eq!(cfg.max_branches_per_node, 24);
        assert_eq!(cfg.btree_rough_count_height, 1);
        assert_eq!(cfg.filter_index_size, 256);
        assert_eq!(cfg.filter_remainder_size, 6);
        assert_eq!(cfg.reclaim_threshold, u64::MAX);
        assert!(cfg.use_log);
        assert!(cfg.use_stats);
    }

    #[test]
    fn test_explicit_fields_survive_defaults() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = config(tmp.path());
        cfg.page_size = 8192;
        cfg.fanout = 4;
        cfg.set_defaults();
        assert_eq!(cfg.page_size, 8192);
        assert_eq!(cfg.extent_size, 128 * 8192);
        assert_eq!(cfg.fanout, 4);
    }

    #[test]
    fn test_open_requires_cache_and_disk_size() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = config(tmp.path());
        cfg.cache_size = 0;
        assert!(matches!(
            Store::create(cfg),
            Err(StoreError::BadParam { .. })
        ));

        let mut cfg = config(tmp.path());
        cfg.disk_size = 0;
        assert!(matches!(
            Store::create(cfg),
            Err(StoreError::BadParam { .. })
        ));
    }

    #[test]
    fn test_create_then_create_again_fails() {
        let tmp = TempDir::new().unwrap();
        let store = Store::create(config(tmp.path())).unwrap();
        store.close();
        assert!(Store::create(config(tmp.path())).is_err());
    }

    #[test]
    fn test_open_missing_store_fails() {
        let tmp = TempDir::new().unwrap();
        assert!(Store::open(config(tmp.path())).is_err());
    }

    #[test]
    fn test_update_rejected_by_default_config() {
        let tmp = TempDir::new().unwrap();
        let store = Store::create(config(tmp.path())).unwrap();
        let result = store.update(b"k", b"delta");
        assert!(matches!(result, Err(StoreError::InvalidArg { .. })));
        store.close();
    }

    #[test]
    fn test_overlong_key_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = Store::create(config(tmp.path())).unwrap();
        // key_size is 16 for this store
        let long_key = vec![0x61; 17];
        assert!(matches!(
            store.insert(&long_key, b"v"),
            Err(StoreError::InvalidArg { .. })
        ));
        let mut result = LookupResult::new();
        assert!(matches!(
            store.lookup(&long_key, &mut result),
            Err(StoreError::InvalidArg { .. })
        ));
        store.close();
    }
}
