//! Page cache for extent-file reads
//!
//! Non-resident values are read back from extent files through this cache.
//! Pages are fixed-size slices of an extent file, keyed by (extent sequence,
//! page index); eviction is LRU. The cache is read-only: extent files are
//! append-only, so a cached page can never go stale.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::info;

use crate::config::CacheConfig;
use crate::error::{EngineError, EngineResult};

/// Cache key: extent sequence number plus page index within the extent file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PageKey {
    extent: u64,
    page: u64,
}

/// Fixed-capacity LRU cache over extent-file pages.
pub struct PageCache {
    pages: Mutex<LruCache<PageKey, Arc<Vec<u8>>>>,
    page_size: u64,
    use_stats: bool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PageCache {
    pub fn new(cfg: &CacheConfig) -> EngineResult<Self> {
        cfg.validate()?;
        let capacity =
            NonZeroUsize::new(cfg.page_count().max(1)).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            pages: Mutex::new(LruCache::new(capacity)),
            page_size: cfg.page_size,
            use_stats: cfg.use_stats,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Read `len` bytes at `offset` from an extent file, page by page
    /// through the cache.
    pub fn read(
        &self,
        extent: u64,
        path: &Path,
        offset: u64,
        len: usize,
        out: &mut Vec<u8>,
    ) -> EngineResult<()> {
        out.clear();
        out.reserve(len);

        let mut remaining = len as u64;
        let mut pos = offset;
        while remaining > 0 {
            let page = pos / self.page_size;
            let page_off = (pos % self.page_size) as usize;
            let data = self.page(extent, path, page)?;
            let take = remaining.min(self.page_size - page_off as u64) as usize;
            if page_off + take > data.len() {
                return Err(EngineError::TornWrite {
                    path: path.to_path_buf(),
                    offset: pos,
                    expected_size: take as u64,
                    available: data.len().saturating_sub(page_off) as u64,
                });
            }
            out.extend_from_slice(&data[page_off..page_off + take]);
            pos += take as u64;
            remaining -= take as u64;
        }
        Ok(())
    }

    /// Fetch one page, loading it from the file on a miss.
    fn page(&self, extent: u64, path: &Path, page: u64) -> EngineResult<Arc<Vec<u8>>> {
        let key = PageKey { extent, page };

        if let Some(data) = self.pages.lock().get(&key).cloned() {
            if self.use_stats {
                self.hits.fetch_add(1, Ordering::Relaxed);
            }
            return Ok(data);
        }
        if self.use_stats {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }

        let mut file = File::open(path)
            .map_err(|e| EngineError::io(path, "failed to open extent file for read", e))?;
        file.seek(SeekFrom::Start(page * self.page_size))
            .map_err(|e| EngineError::io(path, "failed to seek extent file", e))?;

        // The last page of a file may be short
        let mut data = vec![0u8; self.page_size as usize];
        let mut filled = 0;
        while filled < data.len() {
            let n = file
                .read(&mut data[filled..])
                .map_err(|e| EngineError::io(path, "failed to read extent page", e))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        data.truncate(filled);

        let data = Arc::new(data);
        self.pages.lock().put(key, Arc::clone(&data));
        Ok(data)
    }

    /// Drop every cached page. Testing hook.
    pub fn flush(&self) {
        self.pages.lock().clear();
    }

    /// Cache hits since start or last reset.
    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Cache misses since start or last reset.
    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn reset_stats(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    /// Emit cache statistics through the log.
    pub fn print_stats(&self) {
        let (hits, misses) = (self.hit_count(), self.miss_count());
        let total = hits + misses;
        let rate = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64 * 100.0
        };
        info!(
            cached_pages = self.pages.lock().len(),
            hits,
            misses,
            hit_rate = %format!("{rate:.1}%"),
            "page cache stats"
        );
    }
}
