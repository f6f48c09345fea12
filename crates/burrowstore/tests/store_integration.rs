//! End-to-end store scenarios: lifecycle, point operations, iteration,
//! persistence across reopen, and the threading contract.

use std::sync::Arc;

use burrowstore::{
    DataConfig, DefaultDataConfig, LookupResult, Store, StoreConfig, StoreError,
};
use tempfile::TempDir;

fn default_config(dir: &std::path::Path, key_size: usize) -> StoreConfig {
    StoreConfig::new(
        dir,
        1024 * 1024,
        256 * 1024 * 1024,
        Arc::new(DefaultDataConfig::new(key_size).unwrap()),
    )
}

fn lookup_value(store: &Store, key: &[u8]) -> Option<Vec<u8>> {
    let mut result = LookupResult::new();
    store.lookup(key, &mut result).unwrap();
    result.found().then(|| result.value().unwrap().to_vec())
}

#[test]
fn insert_then_lookup() {
    let tmp = TempDir::new().unwrap();
    let store = Store::create(default_config(tmp.path(), 64)).unwrap();

    assert_eq!(store.insert(b"apple", b"red").map_err(|e| e.code()), Ok(()));
    assert_eq!(lookup_value(&store, b"apple"), Some(b"red".to_vec()));
    assert_eq!(lookup_value(&store, b"pear"), None);

    store.close();
}

#[test]
fn overlong_key_is_einval() {
    let tmp = TempDir::new().unwrap();
    let store = Store::create(default_config(tmp.path(), 8)).unwrap();

    // 9 bytes against a key_size of 8
    let err = store.insert(b"abcdefghi", b"v").unwrap_err();
    assert_eq!(err.code(), 22);

    store.close();
}

#[test]
fn delete_then_miss() {
    let tmp = TempDir::new().unwrap();
    let store = Store::create(default_config(tmp.path(), 64)).unwrap();

    store.insert(b"k", b"v").unwrap();
    store.delete(b"k").unwrap();
    assert_eq!(lookup_value(&store, b"k"), None);

    store.close();
}

#[test]
fn overwrite_returns_latest() {
    let tmp = TempDir::new().unwrap();
    let store = Store::create(default_config(tmp.path(), 64)).unwrap();

    store.insert(b"k", b"v1").unwrap();
    store.insert(b"k", b"v2").unwrap();
    assert_eq!(lookup_value(&store, b"k"), Some(b"v2".to_vec()));

    store.close();
}

#[test]
fn range_iterates_in_order() {
    let tmp = TempDir::new().unwrap();
    let store = Store::create(default_config(tmp.path(), 64)).unwrap();

    store.insert(b"b", b"1").unwrap();
    store.insert(b"a", b"2").unwrap();
    store.insert(b"c", b"3").unwrap();

    let mut iter = store.range(None).unwrap();
    let mut seen = Vec::new();
    while iter.valid() {
        let (k, v) = iter.current();
        seen.push((k.to_vec(), v.to_vec()));
        iter.next();
    }
    assert_eq!(iter.status(), 0);
    assert_eq!(
        seen,
        vec![
            (b"a".to_vec(), b"2".to_vec()),
            (b"b".to_vec(), b"1".to_vec()),
            (b"c".to_vec(), b"3".to_vec()),
        ]
    );

    drop(iter);
    store.close();
}

#[test]
fn range_with_start_key() {
    let tmp = TempDir::new().unwrap();
    let store = Store::create(default_config(tmp.path(), 64)).unwrap();

    store.insert(b"b", b"1").unwrap();
    store.insert(b"a", b"2").unwrap();
    store.insert(b"c", b"3").unwrap();

    let mut iter = store.range(Some(b"b")).unwrap();
    let mut seen = Vec::new();
    while iter.valid() {
        let (k, v) = iter.current();
        seen.push((k.to_vec(), v.to_vec()));
        iter.next();
    }
    assert_eq!(
        seen,
        vec![(b"b".to_vec(), b"1".to_vec()), (b"c".to_vec(), b"3".to_vec())]
    );

    drop(iter);
    store.close();
}

#[test]
fn iterator_visits_each_key_once_with_last_value() {
    let tmp = TempDir::new().unwrap();
    let store = Store::create(default_config(tmp.path(), 64)).unwrap();

    for i in 0..50u32 {
        store
            .insert(format!("key-{i:03}").as_bytes(), b"first")
            .unwrap();
    }
    for i in (0..50u32).step_by(2) {
        store
            .insert(format!("key-{i:03}").as_bytes(), b"second")
            .unwrap();
    }
    store.delete(b"key-013").unwrap();

    let mut iter = store.range(None).unwrap();
    let mut seen = Vec::new();
    while iter.valid() {
        let (k, v) = iter.current();
        seen.push((k.to_vec(), v.to_vec()));
        iter.next();
    }

    assert_eq!(seen.len(), 49);
    let mut sorted = seen.clone();
    sorted.sort();
    assert_eq!(seen, sorted, "iteration must follow key order");
    for (k, v) in &seen {
        let i: u32 = std::str::from_utf8(&k[4..]).unwrap().parse().unwrap();
        let expected: &[u8] = if i % 2 == 0 { b"second" } else { b"first" };
        assert_eq!(v.as_slice(), expected, "wrong value for {k:?}");
    }

    drop(iter);
    store.close();
}

#[test]
fn reopen_preserves_data() {
    let tmp = TempDir::new().unwrap();

    {
        let store = Store::create(default_config(tmp.path(), 64)).unwrap();
        store.insert(b"x", b"y").unwrap();
        store.close();
    }

    {
        let store = Store::open(default_config(tmp.path(), 64)).unwrap();
        assert_eq!(lookup_value(&store, b"x"), Some(b"y".to_vec()));
        store.close();
    }
}

#[test]
fn reopen_preserves_deletes_and_overwrites() {
    let tmp = TempDir::new().unwrap();

    {
        let store = Store::create(default_config(tmp.path(), 64)).unwrap();
        store.insert(b"keep", b"v1").unwrap();
        store.insert(b"keep", b"v2").unwrap();
        store.insert(b"drop", b"tmp").unwrap();
        store.delete(b"drop").unwrap();
        store.close();
    }

    {
        let store = Store::open(default_config(tmp.path(), 64)).unwrap();
        assert_eq!(lookup_value(&store, b"keep"), Some(b"v2".to_vec()));
        assert_eq!(lookup_value(&store, b"drop"), None);

        let mut iter = store.range(None).unwrap();
        assert!(iter.valid());
        assert_eq!(iter.current().0, b"keep");
        iter.next();
        assert!(!iter.valid());
        drop(iter);
        store.close();
    }
}

#[test]
fn lookup_result_reuse_and_growth() {
    let tmp = TempDir::new().unwrap();
    let store = Store::create(default_config(tmp.path(), 64)).unwrap();

    store.insert(b"small", b"v").unwrap();
    let big = vec![0xBD; 16 * 1024];
    store.insert(b"big", &big).unwrap();

    // A result bound to a small caller buffer must grow in place and then
    // keep serving smaller hits.
    let mut result = LookupResult::with_buffer(Vec::with_capacity(8));
    store.lookup(b"big", &mut result).unwrap();
    assert!(result.found());
    assert_eq!(result.value().unwrap(), big.as_slice());

    store.lookup(b"small", &mut result).unwrap();
    assert_eq!(result.value().unwrap(), b"v");

    store.lookup(b"missing", &mut result).unwrap();
    assert!(!result.found());
    assert_eq!(result.value().unwrap_err().code(), 22);

    let buffer = result.into_buffer();
    assert!(buffer.capacity() >= 16 * 1024);

    store.close();
}

#[test]
fn registered_threads_can_operate() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(Store::create(default_config(tmp.path(), 64)).unwrap());

    let mut handles = Vec::new();
    for t in 0..4u32 {
        let store = Arc::clone(&store);
        handles.push(std::thread::spawn(move || {
            store.register_thread();
            for i in 0..25u32 {
                let key = format!("t{t}-k{i}");
                store.insert(key.as_bytes(), key.as_bytes()).unwrap();
            }
            store.deregister_thread();
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for t in 0..4u32 {
        for i in 0..25u32 {
            let key = format!("t{t}-k{i}");
            assert_eq!(
                lookup_value(&store, key.as_bytes()),
                Some(key.as_bytes().to_vec())
            );
        }
    }

    match Arc::try_unwrap(store) {
        Ok(store) => store.close(),
        Err(_) => panic!("store still shared"),
    }
}

#[test]
fn unregistered_thread_asserts_in_debug() {
    if !cfg!(debug_assertions) {
        return;
    }
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(Store::create(default_config(tmp.path(), 64)).unwrap());

    let s = Arc::clone(&store);
    let result = std::thread::spawn(move || {
        // No register_thread call
        let _ = s.insert(b"k", b"v");
    })
    .join();
    assert!(result.is_err(), "unregistered use must trip the assertion");
}

#[test]
fn values_survive_memory_pressure() {
    let tmp = TempDir::new().unwrap();
    let mut cfg = default_config(tmp.path(), 64);
    // Tiny resident budget: flushed values spill and reads go through the
    // page cache.
    cfg.memtable_capacity = 4 * 1024;
    let store = Store::create(cfg).unwrap();

    for i in 0..32u32 {
        let value = vec![(i % 251) as u8; 1024];
        store.insert(format!("spill-{i:02}").as_bytes(), &value).unwrap();
    }
    // Give the background flush cycle time to land and spill entries
    std::thread::sleep(std::time::Duration::from_secs(3));

    store.cache_flush();
    for i in 0..32u32 {
        let expected = vec![(i % 251) as u8; 1024];
        assert_eq!(
            lookup_value(&store, format!("spill-{i:02}").as_bytes()),
            Some(expected)
        );
    }

    store.stats_print_insertion();
    store.stats_print_lookup();
    store.stats_reset();
    store.close();
}

#[test]
fn custom_comparator_controls_iteration_order() {
    // Reverse-memcmp config: iteration must come out in reverse order,
    // proving the shim forwards comparisons to the application config.
    struct ReverseConfig {
        // Under reverse order the memcmp-largest key is the smallest
        min_key: Vec<u8>,
        max_key: Vec<u8>,
    }

    impl DataConfig for ReverseConfig {
        fn key_size(&self) -> usize {
            16
        }
        fn min_key(&self) -> &[u8] {
            &self.min_key
        }
        fn max_key(&self) -> &[u8] {
            &self.max_key
        }
        fn key_compare(&self, a: &[u8], b: &[u8]) -> std::cmp::Ordering {
            b.cmp(a)
        }
        fn key_hash(&self, key: &[u8], seed: u32) -> u32 {
            crc32c::crc32c_append(seed, key)
        }
    }

    let tmp = TempDir::new().unwrap();
    let cfg = StoreConfig::new(
        tmp.path(),
        1024 * 1024,
        64 * 1024 * 1024,
        Arc::new(ReverseConfig {
            min_key: vec![0xFF; 16],
            max_key: vec![0x00],
        }),
    );
    let store = Store::create(cfg).unwrap();

    store.insert(b"a", b"1").unwrap();
    store.insert(b"b", b"2").unwrap();
    store.insert(b"c", b"3").unwrap();

    let mut iter = store.range(None).unwrap();
    let mut keys = Vec::new();
    while iter.valid() {
        keys.push(iter.current().0.to_vec());
        iter.next();
    }
    assert_eq!(keys, vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);

    drop(iter);
    store.close();
}

#[test]
fn version_string_is_present() {
    assert!(!burrowstore::version().is_empty());
    assert_eq!(burrowstore::version(), burrowstore::VERSION);
}

#[test]
fn empty_key_roundtrips() {
    let tmp = TempDir::new().unwrap();
    let store = Store::create(default_config(tmp.path(), 64)).unwrap();

    store.insert(b"", b"empty-key-value").unwrap();
    assert_eq!(lookup_value(&store, b""), Some(b"empty-key-value".to_vec()));

    store.close();
}

#[test]
fn close_is_final() {
    let tmp = TempDir::new().unwrap();
    let store = Store::create(default_config(tmp.path(), 64)).unwrap();
    store.insert(b"k", b"v").unwrap();
    // close consumes the store; the handle cannot be used afterwards, which
    // is the compile-time rendering of the nulled-pointer discipline.
    store.close();

    let reopened = Store::open(default_config(tmp.path(), 64)).unwrap();
    assert_eq!(lookup_value(&reopened, b"k"), Some(b"v".to_vec()));
    reopened.close();
}

#[test]
fn bad_data_config_is_rejected() {
    struct InvertedConfig;
    impl DataConfig for InvertedConfig {
        fn key_size(&self) -> usize {
            8
        }
        fn min_key(&self) -> &[u8] {
            b"zz"
        }
        fn max_key(&self) -> &[u8] {
            b"aa"
        }
        fn key_compare(&self, a: &[u8], b: &[u8]) -> std::cmp::Ordering {
            a.cmp(b)
        }
        fn key_hash(&self, key: &[u8], seed: u32) -> u32 {
            crc32c::crc32c_append(seed, key)
        }
    }

    let tmp = TempDir::new().unwrap();
    let cfg = StoreConfig::new(
        tmp.path(),
        1024 * 1024,
        64 * 1024 * 1024,
        Arc::new(InvertedConfig),
    );
    let err = Store::create(cfg).unwrap_err();
    assert!(matches!(err, StoreError::BadParam { .. }));
    assert_eq!(err.code(), 22);
}
