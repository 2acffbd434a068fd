//! Snapshot capture.

use crate::error::Result;
use crate::storage::Storage;
use crate::types::KeyedValue;

/// Values observed for a transaction's condition keys.
///
/// One entry per requested key, in request order. Each entry was read
/// atomically, but the set as a whole was not: another writer may have
/// changed one key between the reads of two others.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    values: Vec<KeyedValue>,
}

impl Snapshot {
    /// All observed entries, in condition-key order.
    pub fn values(&self) -> &[KeyedValue] {
        &self.values
    }

    /// The entry for `key`, if it is a condition key.
    pub fn get(&self, key: &str) -> Option<&KeyedValue> {
        self.values.iter().find(|kv| kv.key == key)
    }

    /// The observed value for `key`. `None` if the key was absent or is not
    /// a condition key.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(KeyedValue::value)
    }

    /// Iterate over the observed entries.
    pub fn iter(&self) -> std::slice::Iter<'_, KeyedValue> {
        self.values.iter()
    }

    /// The condition keys, in request order.
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.values.iter().map(|kv| kv.key.as_str())
    }

    /// Number of condition keys.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the transaction has no condition keys.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Consume the snapshot, returning its entries.
    pub fn into_values(self) -> Vec<KeyedValue> {
        self.values
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a KeyedValue;
    type IntoIter = std::slice::Iter<'a, KeyedValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

/// Read every condition key from `store`, one `get` per key, in order.
///
/// A hard backend error aborts capture and is returned as is.
pub fn begin_transaction<S, K>(store: &S, condition_keys: &[K]) -> Result<Snapshot>
where
    S: Storage + ?Sized,
    K: AsRef<str>,
{
    let values = condition_keys
        .iter()
        .map(|key| {
            let key = key.as_ref();
            Ok(KeyedValue::from_read(key, store.get(key)?))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Snapshot { values })
}
