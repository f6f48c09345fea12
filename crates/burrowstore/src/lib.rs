//! # BurrowStore
//!
//! An embedded key-value store with variable-length keys over a
//! message-oriented storage core.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Store façade                            │
//! │  lifecycle · point ops · range iterator · thread registry    │
//! └───────────────┬─────────────────────────────────────────────┘
//!                 │ fixed-width keys, tagged messages
//! ┌───────────────▼─────────────────────────────────────────────┐
//! │                 Shim data config (decorator)                 │
//! │      length-prefix encoding ⇆ logical key callbacks          │
//! └───────────────┬─────────────────────────────────────────────┘
//!                 │
//! ┌───────────────▼─────────────────────────────────────────────┐
//! │              burrowstore-core (trunk engine)                 │
//! │    shard log · extent store · page cache · task system       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Applications describe their key/value semantics with a [`DataConfig`]
//! (or use [`DefaultDataConfig`] for memcmp-ordered keys), open a [`Store`],
//! and operate on logical byte-slice keys up to [`MAX_KEY_SIZE`] bytes. The
//! engine below only ever sees fixed-width, length-prefixed keys.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use burrowstore::{DefaultDataConfig, LookupResult, Store, StoreConfig};
//!
//! # fn main() -> Result<(), burrowstore::StoreError> {
//! let data_config = Arc::new(DefaultDataConfig::new(64)?);
//! let cfg = StoreConfig::new("./db", 64 << 20, 1 << 30, data_config);
//! let store = Store::create(cfg)?;
//!
//! store.insert(b"apple", b"red")?;
//!
//! let mut result = LookupResult::new();
//! store.lookup(b"apple", &mut result)?;
//! assert!(result.found());
//! assert_eq!(result.value()?, b"red");
//!
//! store.close();
//! # Ok(())
//! # }
//! ```
//!
//! ## Threading
//!
//! Any thread other than the one that opened the store must call
//! [`Store::register_thread`] before its first operation and
//! [`Store::deregister_thread`] before it exits.

pub mod data_config;
pub mod default_config;
pub mod error;
pub mod iterator;
pub mod key_codec;
pub mod lookup;
pub mod message;
mod shim;
pub mod store;

pub use data_config::DataConfig;
pub use default_config::DefaultDataConfig;
pub use error::{Result, StoreError};
pub use iterator::RangeIterator;
pub use key_codec::MAX_KEY_SIZE;
pub use lookup::LookupResult;
pub use message::{decode_message, encode_message_into, message_class, MessageKind};
pub use store::{Store, StoreConfig};

/// Crate version, as a build string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build version string.
pub fn version() -> &'static str {
    VERSION
}
