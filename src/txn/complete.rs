//! Transaction completion.

use super::snapshot::Snapshot;
use crate::error::{Result, StoreError};
use crate::storage::Storage;
use crate::types::KeyedValue;
use std::collections::HashMap;
use tracing::debug;

/// Apply `desired` against `store`, re-checking every condition key in
/// `snapshot` order.
///
/// For a key the snapshot saw as present, the current value must still
/// equal the observed one; the replacement (if any) is then written with a
/// plain `put`. For a key the snapshot saw as absent, the replacement (if
/// any) is written with `put_if_absent`. A condition key with no entry in
/// `desired` is checked but not written; an absent one is skipped.
///
/// Returns `Ok(false)` at the first key that fails its check. Keys already
/// written stay written: there is no rollback.
///
/// Every entry in `desired` must be present. An absent entry is rejected
/// with [`StoreError::InvalidOperation`] before the store is touched.
pub fn complete_transaction<S>(
    store: &S,
    snapshot: &Snapshot,
    desired: &[KeyedValue],
) -> Result<bool>
where
    S: Storage + ?Sized,
{
    let mut updates: HashMap<&str, &str> = HashMap::with_capacity(desired.len());
    for kv in desired {
        let Some(value) = kv.value() else {
            return Err(StoreError::InvalidOperation(format!(
                "Desired value for '{}' is marked absent",
                kv.key
            )));
        };
        if snapshot.get(&kv.key).is_none() {
            debug!(key = %kv.key, "Ignoring desired value for non-condition key");
            continue;
        }
        updates.entry(kv.key.as_str()).or_insert(value);
    }

    for observed in snapshot {
        let key = observed.key.as_str();
        let update = updates.get(key).copied();

        match observed.value() {
            Some(expected) => {
                let current = store.get(key)?;
                if current.as_deref() != Some(expected) {
                    debug!(key = %key, "Condition key changed since snapshot");
                    return Ok(false);
                }
                if let Some(value) = update {
                    store.put(key, value)?;
                }
            }
            None => {
                let Some(value) = update else {
                    continue;
                };
                if !store.put_if_absent(key, value)? {
                    debug!(key = %key, "Condition key created since snapshot");
                    return Ok(false);
                }
            }
        }
    }

    Ok(true)
}
