//! Range iterator protocol
//!
//! A [`RangeIterator`] walks live keys in data-config order, starting from
//! an optional start key. It borrows its parent [`Store`], which both keeps
//! the engine alive and prevents the store from being closed mid-iteration.
//!
//! The protocol is explicit: check [`valid`](RangeIterator::valid), read
//! [`current`](RangeIterator::current), advance with
//! [`next`](RangeIterator::next). Advancing past the end is a programming
//! error.

use crate::key_codec::decode_key;
use crate::message::MESSAGE_HEADER_SIZE;
use crate::store::Store;

/// Iterator over a store's live keys in data-config order.
///
/// Not thread-safe and not clonable; each iterator belongs to the caller
/// that created it.
pub struct RangeIterator<'s> {
    store: &'s Store,
    /// (physical key, raw message) pairs in comparator order
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    pos: usize,
    status: i32,
}

impl<'s> RangeIterator<'s> {
    pub(crate) fn new(store: &'s Store, entries: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        Self {
            store,
            entries,
            pos: 0,
            status: 0,
        }
    }

    /// Whether the iterator is positioned on an entry.
    pub fn valid(&self) -> bool {
        self.status == 0 && self.pos < self.entries.len()
    }

    /// Advance to the next entry.
    ///
    /// Calling `next` on an invalid iterator is a programming error.
    pub fn next(&mut self) {
        debug_assert!(self.valid(), "advanced an exhausted iterator");
        self.pos += 1;
    }

    /// Current logical key and value.
    ///
    /// The slices borrow the iterator and stay valid until the next
    /// `next` call or the iterator is dropped.
    pub fn current(&self) -> (&[u8], &[u8]) {
        assert!(self.valid(), "read from an invalid iterator");
        let (physical_key, raw_message) = &self.entries[self.pos];
        (decode_key(physical_key), &raw_message[MESSAGE_HEADER_SIZE..])
    }

    /// Last cached engine status code; 0 when healthy.
    pub fn status(&self) -> i32 {
        self.status
    }

    /// Parent store.
    pub fn store(&self) -> &Store {
        self.store
    }
}
