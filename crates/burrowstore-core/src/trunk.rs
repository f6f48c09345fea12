//! Trunk — the message-oriented storage core
//!
//! The trunk keeps a resident table of physical keys to their latest message
//! state, journals every write through the shard log, and flushes on a
//! cadence to the extent store. Under memory pressure flushed values are
//! released from RAM and read back through the page cache on demand.
//!
//! **Write path**: shard log first (durable), then the resident table, then
//! mark dirty for the flush cycle. If the log append fails the table is
//! never touched.
//!
//! **Read path**: resident table; spilled entries fall through to the extent
//! store via the page cache (this is where a lookup can block on disk).
//!
//! **Flush cycle**: rotate the log, flush dirty keys to extents, prune
//! fully-flushed log files, spill under memory pressure, reclaim dead
//! extents past the configured threshold.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::cache::PageCache;
use crate::config::TrunkConfig;
use crate::data::{DataDriver, MergeAccumulator, MessageKind};
use crate::error::{EngineError, EngineResult};
use crate::extent::{read_record_at, ExtentLocation, ExtentStore};
use crate::format::serialize_record_into;
use crate::shard_log::ShardLogWriter;
use crate::task::{spawn_background, DirtyTracker, TaskHandle, TaskSystem};

/// Scratch bytes each registered thread needs for the trunk's write path.
pub fn trunk_scratch_size() -> usize {
    64 * 1024
}

/// Latest known state of one key.
///
/// Invariant: `raw` and `loc` are never both `None`. A key whose final
/// message is a Delete keeps its slot (and its tombstone record) so that a
/// remount cannot resurrect older values from still-live extents.
#[derive(Debug, Default)]
struct Slot {
    /// Resident copy of the raw message, if any
    raw: Option<Vec<u8>>,
    /// Latest flushed record, if any
    loc: Option<ExtentLocation>,
}

/// Mutable write-side state, guarded by a single mutex: writers serialize
/// through it, and the flush cycle's log rotation and extent appends take it
/// per record.
struct WriteState {
    log: Option<ShardLogWriter>,
    extents: ExtentStore,
}

/// Insertion and lookup counters.
#[derive(Debug, Default)]
pub struct TrunkStats {
    inserts: AtomicU64,
    insert_bytes: AtomicU64,
    deletes: AtomicU64,
    updates: AtomicU64,
    lookups: AtomicU64,
    lookups_found: AtomicU64,
    lookup_disk_reads: AtomicU64,
    flushed_records: AtomicU64,
    flush_cycles: AtomicU64,
}

impl TrunkStats {
    fn record_cycle(&self, flushed: u64) {
        self.flushed_records.fetch_add(flushed, Ordering::Relaxed);
        self.flush_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn flush_cycles(&self) -> u64 {
        self.flush_cycles.load(Ordering::Relaxed)
    }

    pub fn flushed_records(&self) -> u64 {
        self.flushed_records.load(Ordering::Relaxed)
    }
}

struct TrunkShared {
    driver: Arc<dyn DataDriver>,
    cfg: TrunkConfig,
    table: RwLock<HashMap<Vec<u8>, Slot>>,
    write: Mutex<WriteState>,
    extent_dir: std::path::PathBuf,
    cache: Arc<PageCache>,
    dirty: DirtyTracker,
    tasks: Arc<TaskSystem>,
    stats: TrunkStats,
    resident_bytes: AtomicU64,
}

/// Handle to a created or mounted trunk.
pub struct Trunk {
    shared: Arc<TrunkShared>,
    flusher: Mutex<Option<TaskHandle>>,
    root_id: u64,
}

impl Trunk {
    /// Create a fresh trunk over a newly created extent store.
    pub fn create(
        cfg: TrunkConfig,
        driver: Arc<dyn DataDriver>,
        extents: ExtentStore,
        cache: Arc<PageCache>,
        log: Option<ShardLogWriter>,
        tasks: Arc<TaskSystem>,
        root_id: u64,
    ) -> EngineResult<Trunk> {
        cfg.validate()?;
        let trunk = Self::assemble(cfg, driver, extents, cache, log, tasks, root_id)?;
        trunk.start_flusher()?;
        Ok(trunk)
    }

    /// Mount an existing trunk: rebuild the table from the extent store,
    /// then replay the shard log on top.
    pub fn mount(
        cfg: TrunkConfig,
        driver: Arc<dyn DataDriver>,
        mut extents: ExtentStore,
        cache: Arc<PageCache>,
        log: Option<ShardLogWriter>,
        tasks: Arc<TaskSystem>,
        root_id: u64,
        recovered: Vec<crate::format::Record>,
    ) -> EngineResult<Trunk> {
        cfg.validate()?;

        // Extent pass: last record per key wins; superseded records go dead.
        let scanned = extents.scan(&cache)?;
        let mut table: HashMap<Vec<u8>, Slot> = HashMap::new();
        for (loc, record) in scanned {
            if record.key.len() != driver.key_size() {
                warn!(
                    key_len = record.key.len(),
                    expected = driver.key_size(),
                    "skipping extent record with foreign key width"
                );
                continue;
            }
            let slot = Slot {
                raw: None,
                loc: Some(loc),
            };
            if let Some(prev) = table.insert(record.key, slot) {
                if let Some(old_loc) = prev.loc {
                    extents.note_dead(&old_loc);
                }
            }
        }

        let trunk = Self::assemble(cfg, driver, extents, cache, log, tasks, root_id)?;

        // Log pass: records postdate the extent contents, so they apply on
        // top, and stay dirty so the first flush cycle re-lands them.
        {
            let mut table_guard = trunk.shared.table.write();
            *table_guard = table;
        }
        let replayed = recovered.len();
        for record in recovered {
            if record.key.len() != trunk.shared.driver.key_size() {
                warn!(
                    key_len = record.key.len(),
                    "skipping log record with foreign key width"
                );
                continue;
            }
            let resolved = trunk.resolve_message(&record.key, &record.message)?;
            trunk.apply_resident(&record.key, resolved);
            trunk.shared.dirty.mark_dirty(&record.key);
        }
        if replayed > 0 {
            info!(records = replayed, "replayed shard log records");
        }

        trunk.start_flusher()?;
        Ok(trunk)
    }

    fn assemble(
        cfg: TrunkConfig,
        driver: Arc<dyn DataDriver>,
        extents: ExtentStore,
        cache: Arc<PageCache>,
        log: Option<ShardLogWriter>,
        tasks: Arc<TaskSystem>,
        root_id: u64,
    ) -> EngineResult<Trunk> {
        let extent_dir = extents.dir().to_path_buf();
        let shared = Arc::new(TrunkShared {
            driver,
            cfg,
            table: RwLock::new(HashMap::new()),
            write: Mutex::new(WriteState { log, extents }),
            extent_dir,
            cache,
            dirty: DirtyTracker::new(),
            tasks,
            stats: TrunkStats::default(),
            resident_bytes: AtomicU64::new(0),
        });
        Ok(Trunk {
            shared,
            flusher: Mutex::new(None),
            root_id,
        })
    }

    fn start_flusher(&self) -> EngineResult<()> {
        let shared = Arc::clone(&self.shared);
        let handle = spawn_background(
            "burrowstore-flush",
            self.shared.cfg.flush_cadence,
            Arc::clone(&self.shared.tasks),
            move || {
                if let Err(e) = flush_cycle(&shared) {
                    error!(error = %e, "flush cycle failed");
                }
            },
        )?;
        *self.flusher.lock() = Some(handle);
        Ok(())
    }

    /// Insert a raw message for a physical key.
    ///
    /// The calling thread must be registered with the task system.
    pub fn insert(&self, key: &[u8], raw_message: &[u8]) -> EngineResult<()> {
        debug_assert!(
            self.shared.tasks.is_registered(),
            "trunk used from an unregistered thread"
        );
        assert_eq!(
            key.len(),
            self.shared.driver.key_size(),
            "physical key width mismatch"
        );

        let shared = &self.shared;
        let kind = shared.driver.message_class(raw_message);

        // Single-writer discipline: the write mutex covers merge resolution,
        // the log append, the table update, and the dirty mark, so the flush
        // cycle's rotation cannot slip between any of them.
        let mut write = shared.write.lock();

        let resolved = self.resolve_message(key, raw_message)?;

        if let Some(log) = write.log.as_mut() {
            shared.tasks.with_scratch(|scratch| {
                serialize_record_into(key, raw_message, scratch)?;
                log.append(scratch)
            })?;
        }

        self.apply_resident(key, resolved);
        shared.dirty.mark_dirty(key);
        drop(write);

        if shared.cfg.use_stats {
            match kind {
                MessageKind::Insert => shared.stats.inserts.fetch_add(1, Ordering::Relaxed),
                MessageKind::Delete => shared.stats.deletes.fetch_add(1, Ordering::Relaxed),
                MessageKind::Update => shared.stats.updates.fetch_add(1, Ordering::Relaxed),
            };
            shared
                .stats
                .insert_bytes
                .fetch_add(raw_message.len() as u64, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Resolve an incoming message against the key's current state.
    /// Insert and Delete replace; Update merges through the driver.
    fn resolve_message(&self, key: &[u8], raw: &[u8]) -> EngineResult<Vec<u8>> {
        let shared = &self.shared;
        match shared.driver.message_class(raw) {
            MessageKind::Insert | MessageKind::Delete => Ok(raw.to_vec()),
            MessageKind::Update => {
                let old = self.load_current(key)?;
                let mut acc = MergeAccumulator::new();
                acc.set(MessageKind::Update, raw);
                match old {
                    Some(old_raw) => shared.driver.merge(key, &old_raw, &mut acc)?,
                    None => shared.driver.merge_final(key, &mut acc)?,
                }
                Ok(acc.raw().to_vec())
            }
        }
    }

    /// Load the key's current raw message, reading spilled state from disk.
    fn load_current(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        let shared = &self.shared;
        let loc = {
            let table = shared.table.read();
            match table.get(key) {
                None => return Ok(None),
                Some(slot) => match &slot.raw {
                    Some(raw) => return Ok(Some(raw.clone())),
                    None => slot.loc,
                },
            }
        };
        match loc {
            Some(loc) => {
                let record = read_record_at(&shared.extent_dir, &loc, &shared.cache)?;
                Ok(Some(record.message))
            }
            None => Ok(None),
        }
    }

    /// Install a resolved message as the key's resident state.
    fn apply_resident(&self, key: &[u8], raw: Vec<u8>) {
        let shared = &self.shared;
        let mut table = shared.table.write();
        let slot = table.entry(key.to_vec()).or_default();
        let old_len = slot.raw.as_ref().map_or(0, |r| r.len() as u64);
        shared
            .resident_bytes
            .fetch_add(raw.len() as u64, Ordering::Relaxed);
        shared.resident_bytes.fetch_sub(old_len, Ordering::Relaxed);
        slot.raw = Some(raw);
    }

    /// Look up a physical key, filling the caller's accumulator.
    ///
    /// Not-found (including tombstoned keys) leaves the accumulator invalid.
    /// Spilled entries are read back through the page cache and may block on
    /// disk.
    pub fn lookup(&self, key: &[u8], acc: &mut MergeAccumulator) -> EngineResult<()> {
        debug_assert!(
            self.shared.tasks.is_registered(),
            "trunk used from an unregistered thread"
        );
        assert_eq!(
            key.len(),
            self.shared.driver.key_size(),
            "physical key width mismatch"
        );

        let shared = &self.shared;
        if shared.cfg.use_stats {
            shared.stats.lookups.fetch_add(1, Ordering::Relaxed);
        }

        // A spilled record can be superseded and its extent reclaimed
        // between our snapshot and the disk read; one retry observes the
        // fresh location.
        for attempt in 0..2 {
            let loc = {
                let table = shared.table.read();
                match table.get(key) {
                    None => {
                        acc.set_invalid();
                        return Ok(());
                    }
                    Some(slot) => match &slot.raw {
                        Some(raw) => {
                            self.fill_accumulator(acc, raw);
                            return Ok(());
                        }
                        None => match slot.loc {
                            Some(loc) => loc,
                            None => {
                                acc.set_invalid();
                                return Ok(());
                            }
                        },
                    },
                }
            };

            if shared.cfg.use_stats {
                shared.stats.lookup_disk_reads.fetch_add(1, Ordering::Relaxed);
            }
            match read_record_at(&shared.extent_dir, &loc, &shared.cache) {
                Ok(record) => {
                    self.fill_accumulator(acc, &record.message);
                    return Ok(());
                }
                Err(EngineError::Io { kind, .. })
                    if kind == std::io::ErrorKind::NotFound && attempt == 0 => {}
                Err(e) => return Err(e),
            }
        }

        acc.set_invalid();
        Ok(())
    }

    fn fill_accumulator(&self, acc: &mut MergeAccumulator, raw: &[u8]) {
        match self.shared.driver.message_class(raw) {
            MessageKind::Delete => acc.set_invalid(),
            kind => {
                acc.set(kind, raw);
                if self.shared.cfg.use_stats {
                    self.shared.stats.lookups_found.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Ordered scan of live records in `[start, end]`, at most `cap` results.
    ///
    /// The scan snapshots the table, loads any spilled messages through the
    /// cache, drops tombstones, and sorts by the driver's comparator.
    pub fn range_scan(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        cap: u64,
    ) -> EngineResult<Vec<(Vec<u8>, Vec<u8>)>> {
        debug_assert!(
            self.shared.tasks.is_registered(),
            "trunk used from an unregistered thread"
        );
        let shared = &self.shared;

        let snapshot: Vec<(Vec<u8>, Option<Vec<u8>>, Option<ExtentLocation>)> = {
            let table = shared.table.read();
            table
                .iter()
                .map(|(key, slot)| (key.clone(), slot.raw.clone(), slot.loc))
                .collect()
        };

        let driver = &shared.driver;
        let mut entries: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
        for (key, raw, loc) in snapshot {
            if let Some(start) = start {
                if driver.key_compare(&key, start).is_lt() {
                    continue;
                }
            }
            if let Some(end) = end {
                if driver.key_compare(&key, end).is_gt() {
                    continue;
                }
            }
            let raw = match raw {
                Some(raw) => raw,
                None => match loc {
                    Some(loc) => {
                        match read_record_at(&shared.extent_dir, &loc, &shared.cache) {
                            Ok(record) => record.message,
                            // Reclaimed under us: the key was superseded or
                            // deleted after the snapshot, so skip it.
                            Err(EngineError::Io { kind, .. })
                                if kind == std::io::ErrorKind::NotFound =>
                            {
                                continue
                            }
                            Err(e) => return Err(e),
                        }
                    }
                    None => continue,
                },
            };
            if driver.message_class(&raw) == MessageKind::Delete {
                continue;
            }
            entries.push((key, raw));
        }

        entries.sort_by(|(a, _), (b, _)| driver.key_compare(a, b));
        entries.truncate(cap.min(usize::MAX as u64) as usize);
        Ok(entries)
    }

    /// Run one flush cycle inline.
    pub fn flush(&self) -> EngineResult<()> {
        flush_cycle(&self.shared)
    }

    /// Drop every cached page. Testing hook.
    pub fn cache_flush(&self) {
        self.shared.cache.flush();
    }

    /// Bytes of message data currently resident.
    pub fn resident_bytes(&self) -> u64 {
        self.shared.resident_bytes.load(Ordering::Relaxed)
    }

    /// Keys waiting for the next flush cycle.
    pub fn dirty_count(&self) -> usize {
        self.shared.dirty.dirty_count()
    }

    pub fn stats(&self) -> &TrunkStats {
        &self.shared.stats
    }

    /// Emit insertion-side statistics through the log.
    pub fn print_insertion_stats(&self) {
        let s = &self.shared.stats;
        info!(
            root_id = self.root_id,
            inserts = s.inserts.load(Ordering::Relaxed),
            deletes = s.deletes.load(Ordering::Relaxed),
            updates = s.updates.load(Ordering::Relaxed),
            insert_bytes = s.insert_bytes.load(Ordering::Relaxed),
            flush_cycles = s.flush_cycles.load(Ordering::Relaxed),
            flushed_records = s.flushed_records.load(Ordering::Relaxed),
            resident_bytes = self.resident_bytes(),
            "trunk insertion stats"
        );
    }

    /// Emit lookup-side statistics through the log.
    pub fn print_lookup_stats(&self) {
        let s = &self.shared.stats;
        info!(
            root_id = self.root_id,
            lookups = s.lookups.load(Ordering::Relaxed),
            found = s.lookups_found.load(Ordering::Relaxed),
            disk_reads = s.lookup_disk_reads.load(Ordering::Relaxed),
            "trunk lookup stats"
        );
        self.shared.cache.print_stats();
    }

    /// Zero all statistics counters.
    pub fn reset_stats(&self) {
        let s = &self.shared.stats;
        for counter in [
            &s.inserts,
            &s.insert_bytes,
            &s.deletes,
            &s.updates,
            &s.lookups,
            &s.lookups_found,
            &s.lookup_disk_reads,
            &s.flushed_records,
            &s.flush_cycles,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.shared.cache.reset_stats();
    }

    /// Stop the flush task, land outstanding writes, and release the trunk.
    pub fn unmount(self) -> EngineResult<()> {
        if let Some(handle) = self.flusher.lock().take() {
            handle.shutdown();
        }
        let write = self.shared.write.lock();
        if let Some(log) = write.log.as_ref() {
            log.sync()?;
        }
        info!(root_id = self.root_id, "trunk unmounted");
        Ok(())
    }
}

impl Drop for Trunk {
    fn drop(&mut self) {
        if let Some(handle) = self.flusher.lock().take() {
            handle.shutdown();
        }
    }
}

/// One flush cycle.
///
/// Ordering is what makes log pruning safe: the log rotates first (under the
/// write mutex, so no append can straddle the rotation), then every key
/// dirtied before the rotation is landed in the extent store, and only then
/// are the pre-rotation log files deleted.
fn flush_cycle(shared: &Arc<TrunkShared>) -> EngineResult<()> {
    if shared.dirty.dirty_count() == 0 {
        shared.stats.record_cycle(0);
        return Ok(());
    }

    let cut = {
        let mut write = shared.write.lock();
        match write.log.as_mut() {
            Some(log) => Some(log.rotate()?),
            None => None,
        }
    };

    let dirty = shared.dirty.take_dirty();
    let mut flushed = 0u64;
    let mut clean = true;

    for key in dirty {
        // Snapshot outside the write mutex; only the flusher mutates `loc`.
        let (raw, old_loc) = {
            let table = shared.table.read();
            match table.get(&key) {
                Some(slot) => (slot.raw.clone(), slot.loc),
                None => (None, None),
            }
        };
        let Some(raw) = raw else { continue };

        let appended = {
            let mut write = shared.write.lock();
            let result = shared.tasks.with_scratch(|scratch| {
                serialize_record_into(&key, &raw, scratch)?;
                write.extents.append_record(scratch)
            });
            if let (Ok(_), Some(old)) = (&result, old_loc) {
                write.extents.note_dead(&old);
            }
            result
        };

        match appended {
            Ok(loc) => {
                let mut table = shared.table.write();
                if let Some(slot) = table.get_mut(&key) {
                    slot.loc = Some(loc);
                }
                flushed += 1;
            }
            Err(e) => {
                error!(error = %e, "failed to flush record, retrying next cycle");
                shared.dirty.mark_dirty(&key);
                clean = false;
            }
        }
    }

    // Everything dirtied before the rotation has landed; the old log files
    // are now redundant.
    if clean {
        if let Some(cut) = cut {
            let write = shared.write.lock();
            if let Some(log) = write.log.as_ref() {
                log.prune_before(cut)?;
            }
        }
    }

    spill_over_capacity(shared);

    let dead = {
        let write = shared.write.lock();
        write.extents.dead_bytes()
    };
    if dead >= shared.cfg.reclaim_threshold {
        let mut write = shared.write.lock();
        write.extents.reclaim()?;
    }

    shared.stats.record_cycle(flushed);
    Ok(())
}

/// Release resident copies of flushed, non-dirty entries until the resident
/// set fits the memtable budget. Spilled entries are served from the extent
/// store through the page cache.
fn spill_over_capacity(shared: &Arc<TrunkShared>) {
    if shared.resident_bytes.load(Ordering::Relaxed) <= shared.cfg.memtable_capacity {
        return;
    }

    let mut released = 0u64;
    let mut table = shared.table.write();
    for (key, slot) in table.iter_mut() {
        if shared
            .resident_bytes
            .load(Ordering::Relaxed)
            .saturating_sub(released)
            <= shared.cfg.memtable_capacity
        {
            break;
        }
        // A dirty key's resident copy is newer than its flushed record and
        // must not be dropped.
        if slot.loc.is_none() || shared.dirty.is_dirty(key) {
            continue;
        }
        if let Some(raw) = slot.raw.take() {
            released += raw.len() as u64;
        }
    }
    drop(table);

    if released > 0 {
        shared.resident_bytes.fetch_sub(released, Ordering::Relaxed);
        info!(released_bytes = released, "spilled resident entries to extents");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AllocatorConfig, CacheConfig, IoConfig, LogConfig};
    use crate::io::IoHandle;
    use std::cmp::Ordering as CmpOrdering;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    const KEY_SIZE: usize = 8;

    struct TestDriver {
        min_key: Vec<u8>,
        max_key: Vec<u8>,
    }

    impl TestDriver {
        fn new() -> Self {
            Self {
                min_key: vec![0x00; KEY_SIZE],
                max_key: vec![0xFF; KEY_SIZE],
            }
        }
    }

    impl DataDriver for TestDriver {
        fn key_size(&self) -> usize {
            KEY_SIZE
        }
        fn min_key(&self) -> &[u8] {
            &self.min_key
        }
        fn max_key(&self) -> &[u8] {
            &self.max_key
        }
        fn key_compare(&self, a: &[u8], b: &[u8]) -> CmpOrdering {
            a.cmp(b)
        }
        fn key_hash(&self, key: &[u8], seed: u32) -> u32 {
            crc32c::crc32c_append(seed, key)
        }
        fn message_class(&self, raw: &[u8]) -> MessageKind {
            MessageKind::from_tag(raw[0]).expect("unknown message tag")
        }
        fn merge(
            &self,
            _key: &[u8],
            old_raw: &[u8],
            acc: &mut MergeAccumulator,
        ) -> EngineResult<()> {
            // Old state wins; updates are advisory in this driver
            acc.set(self.message_class(old_raw), old_raw);
            Ok(())
        }
        fn merge_final(&self, _key: &[u8], _acc: &mut MergeAccumulator) -> EngineResult<()> {
            Ok(())
        }
        fn key_to_string(&self, key: &[u8]) -> String {
            format!("{key:02x?}")
        }
        fn message_to_string(&self, raw: &[u8]) -> String {
            format!("{raw:02x?}")
        }
    }

    fn key(name: &str) -> Vec<u8> {
        let mut k = vec![0u8; KEY_SIZE];
        k[..name.len()].copy_from_slice(name.as_bytes());
        k
    }

    fn insert_msg(value: &[u8]) -> Vec<u8> {
        let mut m = vec![MessageKind::Insert.tag()];
        m.extend_from_slice(value);
        m
    }

    fn delete_msg() -> Vec<u8> {
        vec![MessageKind::Delete.tag()]
    }

    fn update_msg(value: &[u8]) -> Vec<u8> {
        let mut m = vec![MessageKind::Update.tag()];
        m.extend_from_slice(value);
        m
    }

    struct Fixture {
        io: IoHandle,
        tasks: Arc<TaskSystem>,
        cfg: TrunkConfig,
    }

    impl Fixture {
        fn new(dir: &Path) -> Self {
            let io = IoHandle::init(IoConfig {
                path: dir.to_path_buf(),
                page_size: 512,
                extent_size: 16 * 512,
                flags: 0,
                perms: 0o755,
                async_queue_depth: 256,
            })
            .unwrap();
            Self {
                io,
                tasks: TaskSystem::create(trunk_scratch_size()),
                // Long cadence: tests drive flushes explicitly unless they
                // opt into the background cycle.
                cfg: TrunkConfig {
                    memtable_capacity: 1024 * 1024,
                    flush_cadence: Duration::from_secs(60),
                    fanout: 8,
                    max_branches_per_node: 24,
                    rough_count_height: 1,
                    filter_index_size: 256,
                    filter_remainder_size: 6,
                    reclaim_threshold: u64::MAX,
                    use_stats: true,
                },
            }
        }

        fn cache(&self) -> Arc<PageCache> {
            Arc::new(
                PageCache::new(&CacheConfig {
                    page_size: 512,
                    capacity: 64 * 512,
                    use_stats: true,
                })
                .unwrap(),
            )
        }

        fn alloc_cfg(&self) -> AllocatorConfig {
            AllocatorConfig {
                extent_size: 16 * 512,
                capacity: 16 * 1024 * 1024,
            }
        }

        fn log(&self) -> ShardLogWriter {
            ShardLogWriter::open(
                self.io.log_dir(),
                0o755,
                LogConfig {
                    enabled: true,
                    rotation_size: 1024 * 1024,
                },
            )
            .unwrap()
        }

        fn create_trunk(&self) -> Trunk {
            let extents = ExtentStore::create(&self.io, self.alloc_cfg()).unwrap();
            Trunk::create(
                self.cfg.clone(),
                Arc::new(TestDriver::new()),
                extents,
                self.cache(),
                Some(self.log()),
                Arc::clone(&self.tasks),
                1,
            )
            .unwrap()
        }

        fn mount_trunk(&self) -> Trunk {
            let extents = ExtentStore::mount(&self.io, self.alloc_cfg()).unwrap();
            let recovered = crate::shard_log::ShardLogReader::new(self.io.log_dir())
                .recover_records()
                .unwrap();
            Trunk::mount(
                self.cfg.clone(),
                Arc::new(TestDriver::new()),
                extents,
                self.cache(),
                Some(self.log()),
                Arc::clone(&self.tasks),
                1,
                recovered,
            )
            .unwrap()
        }
    }

    fn lookup_value(trunk: &Trunk, k: &[u8]) -> Option<Vec<u8>> {
        let mut acc = MergeAccumulator::new();
        trunk.lookup(k, &mut acc).unwrap();
        acc.is_valid().then(|| acc.raw()[1..].to_vec())
    }

    #[test]
    fn test_insert_lookup() {
        let tmp = TempDir::new().unwrap();
        let fx = Fixture::new(&tmp.path().join("store"));
        let trunk = fx.create_trunk();

        trunk.insert(&key("hello"), &insert_msg(b"world")).unwrap();
        assert_eq!(lookup_value(&trunk, &key("hello")), Some(b"world".to_vec()));
        assert_eq!(lookup_value(&trunk, &key("absent")), None);
    }

    #[test]
    fn test_delete_hides_key() {
        let tmp = TempDir::new().unwrap();
        let fx = Fixture::new(&tmp.path().join("store"));
        let trunk = fx.create_trunk();

        trunk.insert(&key("k"), &insert_msg(b"v")).unwrap();
        trunk.insert(&key("k"), &delete_msg()).unwrap();
        assert_eq!(lookup_value(&trunk, &key("k")), None);
    }

    #[test]
    fn test_update_merge_keeps_old_state() {
        let tmp = TempDir::new().unwrap();
        let fx = Fixture::new(&tmp.path().join("store"));
        let trunk = fx.create_trunk();

        trunk.insert(&key("k"), &insert_msg(b"original")).unwrap();
        trunk.insert(&key("k"), &update_msg(b"ignored")).unwrap();
        assert_eq!(lookup_value(&trunk, &key("k")), Some(b"original".to_vec()));
    }

    #[test]
    fn test_update_without_old_state_lands_as_is() {
        let tmp = TempDir::new().unwrap();
        let fx = Fixture::new(&tmp.path().join("store"));
        let trunk = fx.create_trunk();

        trunk.insert(&key("fresh"), &update_msg(b"delta")).unwrap();
        let mut acc = MergeAccumulator::new();
        trunk.lookup(&key("fresh"), &mut acc).unwrap();
        assert_eq!(acc.kind(), Some(MessageKind::Update));
        assert_eq!(&acc.raw()[1..], b"delta");
    }

    #[test]
    fn test_range_scan_ordered() {
        let tmp = TempDir::new().unwrap();
        let fx = Fixture::new(&tmp.path().join("store"));
        let trunk = fx.create_trunk();

        trunk.insert(&key("b"), &insert_msg(b"1")).unwrap();
        trunk.insert(&key("a"), &insert_msg(b"2")).unwrap();
        trunk.insert(&key("c"), &insert_msg(b"3")).unwrap();
        trunk.insert(&key("gone"), &insert_msg(b"x")).unwrap();
        trunk.insert(&key("gone"), &delete_msg()).unwrap();

        let entries = trunk.range_scan(None, None, u64::MAX).unwrap();
        let keys: Vec<_> = entries.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![key("a"), key("b"), key("c")]);

        let bounded = trunk.range_scan(Some(&key("b")), None, u64::MAX).unwrap();
        assert_eq!(bounded.len(), 2);
        assert_eq!(bounded[0].0, key("b"));

        let capped = trunk.range_scan(None, None, 1).unwrap();
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].0, key("a"));
    }

    #[test]
    fn test_flush_prunes_log_and_counts() {
        let tmp = TempDir::new().unwrap();
        let fx = Fixture::new(&tmp.path().join("store"));
        let trunk = fx.create_trunk();

        trunk.insert(&key("k1"), &insert_msg(b"v1")).unwrap();
        trunk.insert(&key("k2"), &insert_msg(b"v2")).unwrap();
        assert_eq!(trunk.dirty_count(), 2);

        trunk.flush().unwrap();
        assert_eq!(trunk.dirty_count(), 0);
        assert_eq!(trunk.stats().flushed_records(), 2);

        // Values remain readable after the flush
        assert_eq!(lookup_value(&trunk, &key("k1")), Some(b"v1".to_vec()));
    }

    #[test]
    fn test_remount_recovers_flushed_and_logged_state() {
        let tmp = TempDir::new().unwrap();
        let store_dir = tmp.path().join("store");

        {
            let fx = Fixture::new(&store_dir);
            let trunk = fx.create_trunk();
            trunk.insert(&key("flushed"), &insert_msg(b"on-disk")).unwrap();
            trunk.flush().unwrap();
            trunk.insert(&key("logged"), &insert_msg(b"in-log")).unwrap();
            trunk.insert(&key("dead"), &insert_msg(b"tmp")).unwrap();
            trunk.insert(&key("dead"), &delete_msg()).unwrap();
            trunk.unmount().unwrap();
        }

        {
            let fx = Fixture::new(&store_dir);
            let trunk = fx.mount_trunk();
            assert_eq!(
                lookup_value(&trunk, &key("flushed")),
                Some(b"on-disk".to_vec())
            );
            assert_eq!(lookup_value(&trunk, &key("logged")), Some(b"in-log".to_vec()));
            assert_eq!(lookup_value(&trunk, &key("dead")), None);
            trunk.unmount().unwrap();
        }
    }

    #[test]
    fn test_spill_and_disk_read_under_memory_pressure() {
        let tmp = TempDir::new().unwrap();
        let fx = {
            let mut fx = Fixture::new(&tmp.path().join("store"));
            fx.cfg.memtable_capacity = 256;
            fx
        };
        let trunk = fx.create_trunk();

        for i in 0..8u8 {
            trunk
                .insert(&key(&format!("k{i}")), &insert_msg(&[i; 128]))
                .unwrap();
        }
        trunk.flush().unwrap();
        assert!(trunk.resident_bytes() <= 256);

        // Spilled values come back through the extent store
        for i in 0..8u8 {
            assert_eq!(
                lookup_value(&trunk, &key(&format!("k{i}"))),
                Some(vec![i; 128])
            );
        }
        assert!(trunk.stats().lookups.load(Ordering::Relaxed) >= 8);
        assert!(trunk.stats().lookup_disk_reads.load(Ordering::Relaxed) >= 1);
    }

    #[test]
    fn test_overwrites_mark_dead_and_reclaim() {
        let tmp = TempDir::new().unwrap();
        let fx = {
            let mut fx = Fixture::new(&tmp.path().join("store"));
            fx.cfg.reclaim_threshold = 1; // reclaim as soon as anything is dead
            fx
        };
        let trunk = fx.create_trunk();

        for round in 0..4u8 {
            trunk
                .insert(&key("churn"), &insert_msg(&vec![round; 2048]))
                .unwrap();
            trunk.flush().unwrap();
        }

        // The latest value survives every reclamation
        assert_eq!(
            lookup_value(&trunk, &key("churn")),
            Some(vec![3u8; 2048])
        );
    }

    #[test]
    fn test_background_flusher_runs() {
        let tmp = TempDir::new().unwrap();
        let fx = {
            let mut fx = Fixture::new(&tmp.path().join("store"));
            fx.cfg.flush_cadence = Duration::from_millis(50);
            fx
        };
        let trunk = fx.create_trunk();

        trunk.insert(&key("bg"), &insert_msg(b"flush-me")).unwrap();
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(trunk.dirty_count(), 0);
        assert!(trunk.stats().flush_cycles() >= 1);
    }

    #[test]
    fn test_unregistered_thread_asserts() {
        let tmp = TempDir::new().unwrap();
        let fx = Fixture::new(&tmp.path().join("store"));
        let trunk = Arc::new(fx.create_trunk());

        let t = Arc::clone(&trunk);
        let result = std::thread::spawn(move || {
            // No register_this_thread: debug builds must trip the assertion
            t.insert(&key("x"), &insert_msg(b"y")).unwrap();
        })
        .join();
        if cfg!(debug_assertions) {
            assert!(result.is_err());
        }
    }
}
