//! Error handling and edge case tests.

use kvcas::{
    FileStorage, FileStorageConfig, KeyedValue, MemoryStorage, Result, RetryPolicy, Snapshot,
    Storage, StoreError, TransactionRequest, Transactional,
};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tempfile::TempDir;

/// Memory store whose reads or writes can be switched to fail.
#[derive(Default)]
struct FlakyStorage {
    inner: MemoryStorage,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    reads: AtomicUsize,
}

impl FlakyStorage {
    fn read(&self) -> Result<()> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("read failed".into()));
        }
        Ok(())
    }

    fn write(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("write failed".into()));
        }
        Ok(())
    }
}

impl Storage for FlakyStorage {
    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.write()?;
        self.inner.put(key, value)
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        self.read()?;
        self.inner.get(key)
    }

    fn get_by_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.read()?;
        self.inner.get_by_prefix(prefix)
    }

    fn put_if_absent(&self, key: &str, value: &str) -> Result<bool> {
        self.write()?;
        self.inner.put_if_absent(key, value)
    }

    fn compare_and_swap(&self, key: &str, expected: &str, new_value: &str) -> Result<bool> {
        self.write()?;
        self.inner.compare_and_swap(key, expected, new_value)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.write()?;
        self.inner.delete(key)
    }

    fn clear(&self) -> Result<()> {
        self.write()?;
        self.inner.clear()
    }
}

fn test_config(dir: &TempDir) -> FileStorageConfig {
    FileStorageConfig {
        path: dir.path().join("store"),
        ..Default::default()
    }
}

// --- Hard backend errors ---

#[test]
fn test_snapshot_propagates_read_error() {
    let store = FlakyStorage::default();
    store.fail_reads.store(true, Ordering::SeqCst);

    let result = store.begin_transaction(&["a", "b"]);
    assert!(matches!(result, Err(StoreError::Backend(_))));
    // Aborted on the first key
    assert_eq!(store.reads.load(Ordering::SeqCst), 1);
}

#[test]
fn test_completion_propagates_write_error() {
    let store = FlakyStorage::default();
    store.put("a", "1").unwrap();

    let snapshot = store.begin_transaction(&["a"]).unwrap();
    store.fail_writes.store(true, Ordering::SeqCst);

    let result = store.complete_transaction(&snapshot, &[KeyedValue::new("a", "2")]);
    assert!(matches!(result, Err(StoreError::Backend(_))));
}

#[test]
fn test_execute_does_not_retry_backend_errors() {
    let store = FlakyStorage::default();
    store.put("a", "1").unwrap();
    store.fail_writes.store(true, Ordering::SeqCst);
    let calls = AtomicUsize::new(0);

    let request = TransactionRequest::new(["a"], |_: &Snapshot| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![KeyedValue::new("a", "2")])
    })
    .with_retry(RetryPolicy::busy());

    let result = store.execute(&request);
    match result {
        Err(e) => assert!(e.is_backend()),
        Ok(ok) => panic!("expected backend error, got Ok({})", ok),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_execute_propagates_snapshot_error() {
    let store = FlakyStorage::default();
    store.fail_reads.store(true, Ordering::SeqCst);
    let calls = AtomicUsize::new(0);

    let request = TransactionRequest::new(["a"], |_: &Snapshot| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![])
    });

    assert!(matches!(store.execute(&request), Err(StoreError::Backend(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

// --- Caller computation errors ---

#[test]
fn test_update_error_aborts_without_writing() {
    let store = MemoryStorage::new();
    store.put("balance", "10").unwrap();

    let request = TransactionRequest::new(["balance"], |snap: &Snapshot| {
        let balance: i64 = snap.value("balance").unwrap_or("0").parse()?;
        if balance < 25 {
            return Err(format!("insufficient balance: {}", balance).into());
        }
        Ok(vec![KeyedValue::new("balance", (balance - 25).to_string())])
    })
    .retry_until_resolved(true);

    let err = store.execute(&request).unwrap_err();
    assert!(matches!(err, StoreError::Update(_)));
    assert!(!err.is_backend());
    assert!(err.to_string().contains("insufficient balance: 10"));
    assert_eq!(store.get("balance").unwrap().as_deref(), Some("10"));
}

#[test]
fn test_parse_error_in_update_is_wrapped() {
    let store = MemoryStorage::new();
    store.put("n", "not-a-number").unwrap();

    let request = TransactionRequest::new(["n"], |snap: &Snapshot| {
        let n: u64 = snap.value("n").unwrap_or("0").parse()?;
        Ok(vec![KeyedValue::new("n", (n + 1).to_string())])
    });

    assert!(matches!(store.execute(&request), Err(StoreError::Update(_))));
}

#[test]
fn test_absent_desired_value_is_invalid() {
    let store = MemoryStorage::new();
    store.put("a", "1").unwrap();

    let request = TransactionRequest::new(["a"], |_: &Snapshot| Ok(vec![KeyedValue::absent("a")]));

    let result = store.execute(&request);
    assert!(matches!(result, Err(StoreError::InvalidOperation(_))));
    assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
}

// --- File store errors ---

#[test]
fn test_open_nonexistent_store() {
    let dir = TempDir::new().unwrap();

    let result = FileStorage::open(test_config(&dir));
    assert!(matches!(result, Err(StoreError::NotInitialized)));

    let result = FileStorage::open_or_create(FileStorageConfig {
        create_if_missing: false,
        ..test_config(&dir)
    });
    assert!(matches!(result, Err(StoreError::NotInitialized)));
}

#[test]
fn test_concurrent_store_access() {
    let dir = TempDir::new().unwrap();
    let _store1 = FileStorage::create(test_config(&dir)).unwrap();

    // Second handle should fail with lock error
    let result = FileStorage::open(test_config(&dir));
    assert!(matches!(result, Err(StoreError::Locked)));
}

#[test]
fn test_invalid_manifest() {
    let dir = TempDir::new().unwrap();
    drop(FileStorage::create(test_config(&dir)).unwrap());

    fs::write(dir.path().join("store").join("MANIFEST"), b"XXXX\x01").unwrap();

    let result = FileStorage::open(test_config(&dir));
    assert!(matches!(result, Err(StoreError::InvalidFormat(_))));
}

#[test]
fn test_corrupted_log_record() {
    let dir = TempDir::new().unwrap();
    {
        let store = FileStorage::create(test_config(&dir)).unwrap();
        store.put("a", "1").unwrap();
        store.put("b", "2").unwrap();
    }

    // Damage the first record's payload, leaving a valid record after it
    let log_path = dir.path().join("store").join("data.log");
    let mut buf = fs::read(&log_path).unwrap();
    buf[10] ^= 0xff;
    fs::write(&log_path, &buf).unwrap();

    let result = FileStorage::open(test_config(&dir));
    assert!(matches!(result, Err(StoreError::ChecksumMismatch { .. })));
}

#[test]
fn test_torn_write_is_recovered() {
    let dir = TempDir::new().unwrap();
    {
        let store = FileStorage::create(test_config(&dir)).unwrap();
        store.put("a", "1").unwrap();
    }

    // Simulate a crash partway through appending a record
    let log_path = dir.path().join("store").join("data.log");
    let mut file = OpenOptions::new().append(true).open(&log_path).unwrap();
    file.write_all(&[200, 0, 0, 0, 1, 2, 3]).unwrap();
    drop(file);

    let store = FileStorage::open(test_config(&dir)).unwrap();
    assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));

    // The store keeps working after recovery
    store.put("b", "2").unwrap();
    drop(store);

    let store = FileStorage::open(test_config(&dir)).unwrap();
    assert_eq!(store.get("b").unwrap().as_deref(), Some("2"));
}

// --- Boundary conditions ---

#[test]
fn test_empty_condition_keys() {
    let store = MemoryStorage::new();

    let request = TransactionRequest::new(Vec::<String>::new(), |snap: &Snapshot| {
        assert!(snap.is_empty());
        Ok(vec![KeyedValue::new("ignored", "x")])
    });

    assert!(store.execute(&request).unwrap());
    assert_eq!(store.get("ignored").unwrap(), None);
}

#[test]
fn test_empty_key() {
    let store = MemoryStorage::new();

    let snapshot = store.begin_transaction(&[""]).unwrap();
    assert!(store
        .complete_transaction(&snapshot, &[KeyedValue::new("", "root")])
        .unwrap());
    assert_eq!(store.get("").unwrap().as_deref(), Some("root"));
}
