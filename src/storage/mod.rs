//! Single-key storage backends.
//!
//! Every backend guards its whole key space with one reader/writer lock, so
//! each single-key operation is atomic with respect to every other. Nothing
//! is promised across two calls on different keys; the transaction layer in
//! [`crate::txn`] builds on exactly these guarantees and nothing more.
//!
//! - [`MemoryStorage`]: the reference in-memory map
//! - [`FileStorage`]: the same map, replayed from an append-only op log

mod file;
mod memory;
mod oplog;

pub use file::{FileStorage, FileStorageConfig};
pub use memory::MemoryStorage;

use crate::error::Result;
use std::sync::Arc;

/// The single-key contract the transaction protocol consumes.
///
/// Any backend (in memory, on disk, over the network) may implement this as
/// long as each call is atomic for the key it touches. An `Err` is a hard
/// backend failure and is propagated verbatim by every caller.
pub trait Storage: Send + Sync {
    /// Unconditional upsert.
    fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Read a key. `None` means the key does not exist.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Every value whose key starts with `prefix`, in no particular order.
    fn get_by_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Set `value` only if `key` is absent. Returns false and changes
    /// nothing if the key exists.
    fn put_if_absent(&self, key: &str, value: &str) -> Result<bool>;

    /// Set `new_value` only if `key` is present and currently equals
    /// `expected`. Absent and mismatched both return false.
    fn compare_and_swap(&self, key: &str, expected: &str, new_value: &str) -> Result<bool>;

    /// Remove a key. Removing an absent key is not an error.
    fn delete(&self, key: &str) -> Result<()>;

    /// Remove every key.
    fn clear(&self) -> Result<()>;
}

impl<S: Storage + ?Sized> Storage for &S {
    fn put(&self, key: &str, value: &str) -> Result<()> {
        (**self).put(key, value)
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn get_by_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        (**self).get_by_prefix(prefix)
    }

    fn put_if_absent(&self, key: &str, value: &str) -> Result<bool> {
        (**self).put_if_absent(key, value)
    }

    fn compare_and_swap(&self, key: &str, expected: &str, new_value: &str) -> Result<bool> {
        (**self).compare_and_swap(key, expected, new_value)
    }

    fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key)
    }

    fn clear(&self) -> Result<()> {
        (**self).clear()
    }
}

impl<S: Storage + ?Sized> Storage for Arc<S> {
    fn put(&self, key: &str, value: &str) -> Result<()> {
        (**self).put(key, value)
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn get_by_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        (**self).get_by_prefix(prefix)
    }

    fn put_if_absent(&self, key: &str, value: &str) -> Result<bool> {
        (**self).put_if_absent(key, value)
    }

    fn compare_and_swap(&self, key: &str, expected: &str, new_value: &str) -> Result<bool> {
        (**self).compare_and_swap(key, expected, new_value)
    }

    fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key)
    }

    fn clear(&self) -> Result<()> {
        (**self).clear()
    }
}
