//! BurrowStore Core — message-oriented storage engine
//!
//! A compact storage core built around four subsystems:
//!
//! - **Shard log**: write-ahead journal with CRC32C framing, rotation, and
//!   corruption-resyncing recovery
//! - **Extent store**: reference-counted, extent-sized data files holding
//!   flushed records, with whole-extent reclamation
//! - **Page cache**: LRU cache over extent pages serving non-resident reads
//! - **Task system**: thread registry with per-thread scratch plus the
//!   background flush task
//!
//! The [`trunk::Trunk`] ties them together: writes are journaled first, the
//! resident table is updated second, and a background cycle lands dirty
//! entries in the extent store, pruning the log behind itself.
//!
//! Key and message semantics are not baked in: the trunk is parameterized
//! over a [`data::DataDriver`] supplied by the embedding layer, and sees
//! only fixed-width physical keys and opaque tagged messages.

pub mod cache;
pub mod config;
pub mod data;
pub mod durability;
pub mod error;
pub mod extent;
pub mod format;
pub mod io;
pub mod shard_log;
pub mod task;
pub mod trunk;

// Re-export key types for embedders
pub use cache::PageCache;
pub use config::{AllocatorConfig, CacheConfig, IoConfig, LogConfig, TrunkConfig};
pub use data::{DataDriver, MergeAccumulator, MessageKind};
pub use error::{EngineError, EngineResult};
pub use extent::{ExtentLocation, ExtentStore};
pub use io::IoHandle;
pub use shard_log::{ShardLogReader, ShardLogWriter};
pub use task::{TaskSystem, MAX_THREADS};
pub use trunk::{trunk_scratch_size, Trunk};
