//! Task system — thread registration and background work
//!
//! Two responsibilities:
//!
//! 1. **Thread registry**: every thread that touches the trunk, other than
//!    the one that created it, must register first. Registration attaches a
//!    per-thread scratch buffer used by the write path to frame records
//!    without allocating. The registry holds at most [`MAX_THREADS`] live
//!    threads; exceeding the ceiling is a programming error and panics.
//!
//! 2. **Background task**: a named thread that runs a closure on a fixed
//!    cadence until shut down, with one final run at shutdown. The trunk
//!    uses it for the flush cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};

use crate::error::{EngineError, EngineResult};

/// Ceiling on concurrently registered threads.
pub const MAX_THREADS: usize = 64;

/// Per-thread state: the scratch buffer.
struct ThreadSlot {
    scratch: Arc<Mutex<Vec<u8>>>,
}

/// Registry of threads allowed to use the trunk.
pub struct TaskSystem {
    threads: RwLock<HashMap<ThreadId, ThreadSlot>>,
    scratch_size: usize,
}

impl TaskSystem {
    /// Create the task system and register the calling thread.
    pub fn create(scratch_size: usize) -> Arc<Self> {
        let system = Arc::new(Self {
            threads: RwLock::new(HashMap::new()),
            scratch_size,
        });
        system.register_this_thread();
        system
    }

    /// Register the calling thread, allocating its scratch buffer.
    ///
    /// Must be called exactly once per thread before its first trunk
    /// operation. Panics if the thread is already registered or the
    /// MAX_THREADS ceiling is reached.
    pub fn register_this_thread(&self) {
        let id = thread::current().id();
        let mut threads = self.threads.write();
        assert!(
            threads.len() < MAX_THREADS,
            "thread registry full: MAX_THREADS={MAX_THREADS} threads already live"
        );
        let previous = threads.insert(
            id,
            ThreadSlot {
                scratch: Arc::new(Mutex::new(Vec::with_capacity(self.scratch_size))),
            },
        );
        assert!(previous.is_none(), "thread registered twice");
    }

    /// Deregister the calling thread, releasing its scratch buffer.
    ///
    /// Call before thread exit; a thread that never deregisters leaks its
    /// scratch until the store closes.
    pub fn deregister_this_thread(&self) {
        self.threads.write().remove(&thread::current().id());
    }

    /// Whether the calling thread is registered.
    pub fn is_registered(&self) -> bool {
        self.threads.read().contains_key(&thread::current().id())
    }

    /// Number of live registered threads.
    pub fn registered_count(&self) -> usize {
        self.threads.read().len()
    }

    /// Run `f` with the calling thread's scratch buffer.
    ///
    /// Unregistered callers are a programming error, asserted in debug
    /// builds; release builds fall back to a transient buffer.
    pub fn with_scratch<R>(&self, f: impl FnOnce(&mut Vec<u8>) -> R) -> R {
        let slot = {
            let threads = self.threads.read();
            threads
                .get(&thread::current().id())
                .map(|slot| Arc::clone(&slot.scratch))
        };
        debug_assert!(
            slot.is_some(),
            "thread used the trunk without register_thread"
        );
        match slot {
            Some(scratch) => f(&mut scratch.lock()),
            None => f(&mut Vec::with_capacity(self.scratch_size)),
        }
    }
}

/// Tracks keys modified in the resident table but not yet flushed.
pub struct DirtyTracker {
    dirty_keys: Mutex<hashbrown::HashSet<Vec<u8>>>,
}

impl DirtyTracker {
    pub fn new() -> Self {
        Self {
            dirty_keys: Mutex::new(hashbrown::HashSet::new()),
        }
    }

    /// Mark a key dirty. Called with the write path's log lock held so the
    /// flush cycle cannot rotate between a log append and this mark.
    pub fn mark_dirty(&self, key: &[u8]) {
        self.dirty_keys.lock().insert(key.to_vec());
    }

    /// Take the dirty set, leaving it empty.
    pub fn take_dirty(&self) -> hashbrown::HashSet<Vec<u8>> {
        std::mem::take(&mut *self.dirty_keys.lock())
    }

    /// Whether a key is currently dirty.
    pub fn is_dirty(&self, key: &[u8]) -> bool {
        self.dirty_keys.lock().contains(key)
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty_keys.lock().len()
    }
}

impl Default for DirtyTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a running background task. Dropping it stops the task.
pub struct TaskHandle {
    shutdown: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl TaskHandle {
    /// Request shutdown and wait for the final run to complete.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Spawn a background task that runs `work` every `cadence`, plus one final
/// time at shutdown. The task thread registers itself with the task system
/// so `work` can use per-thread scratch.
pub fn spawn_background(
    name: &str,
    cadence: Duration,
    tasks: Arc<TaskSystem>,
    work: impl Fn() + Send + 'static,
) -> EngineResult<TaskHandle> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let thread = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            tasks.register_this_thread();
            loop {
                let wake = Instant::now() + cadence;
                while Instant::now() < wake {
                    if shutdown_flag.load(Ordering::Acquire) {
                        work();
                        tasks.deregister_this_thread();
                        return;
                    }
                    thread::sleep(Duration::from_millis(10));
                }
                work();
            }
        })
        .map_err(|e| EngineError::Io {
            path: None,
            kind: std::io::ErrorKind::Other,
            message: format!("failed to spawn background task '{name}': {e}"),
        })?;

    Ok(TaskHandle {
        shutdown,
        thread: Some(thread),
    })
}
