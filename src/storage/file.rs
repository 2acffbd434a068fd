//! Disk-backed storage.

use super::oplog::{LogOp, OpLog};
use super::Storage;
use crate::error::{Result, StoreError};
use fs2::FileExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Magic bytes for the store manifest.
const STORE_MAGIC: &[u8; 4] = b"KVS\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

/// File storage configuration.
#[derive(Clone, Debug)]
pub struct FileStorageConfig {
    /// Directory holding the store.
    pub path: PathBuf,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// fsync the op log after every write.
    pub sync_writes: bool,

    /// Rewrite the op log from live contents once this many records have
    /// been appended since it was opened or last rewritten.
    pub compact_after: Option<u64>,
}

impl Default for FileStorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./kvcas"),
            create_if_missing: true,
            sync_writes: false,
            compact_after: None,
        }
    }
}

struct Inner {
    data: HashMap<String, String>,
    log: OpLog,
}

/// A key-value map persisted as an append-only op log.
///
/// Contents live in memory behind one reader/writer lock, exactly like
/// [`super::MemoryStorage`]. Each write is appended to the log before it is
/// applied to the map, so a failed append is a hard error that leaves the
/// map unchanged. Reopening replays the log.
pub struct FileStorage {
    config: FileStorageConfig,

    /// Lock file for exclusive access.
    _lock_file: File,

    inner: RwLock<Inner>,
}

impl FileStorage {
    /// Open an existing store or create a new one.
    pub fn open_or_create(config: FileStorageConfig) -> Result<Self> {
        if config.path.join("MANIFEST").exists() {
            Self::open(config)
        } else if config.create_if_missing {
            Self::create(config)
        } else {
            Err(StoreError::NotInitialized)
        }
    }

    /// Create a new store.
    pub fn create(config: FileStorageConfig) -> Result<Self> {
        if config.path.join("MANIFEST").exists() {
            return Err(StoreError::InvalidOperation(format!(
                "Store already exists at {}",
                config.path.display()
            )));
        }

        fs::create_dir_all(&config.path)?;
        let lock_file = Self::acquire_lock(&config.path)?;
        Self::write_manifest(&config.path)?;

        let (log, _) = OpLog::open(config.path.join("data.log"))?;

        info!(path = %config.path.display(), "Created file store");

        Ok(Self {
            config,
            _lock_file: lock_file,
            inner: RwLock::new(Inner {
                data: HashMap::new(),
                log,
            }),
        })
    }

    /// Open an existing store and replay its op log.
    pub fn open(config: FileStorageConfig) -> Result<Self> {
        if !config.path.join("MANIFEST").exists() {
            return Err(StoreError::NotInitialized);
        }
        Self::verify_manifest(&config.path)?;

        let lock_file = Self::acquire_lock(&config.path)?;

        let (log, ops) = OpLog::open(config.path.join("data.log"))?;
        let replayed = ops.len();

        let mut data = HashMap::new();
        for op in ops {
            match op {
                LogOp::Put { key, value } => {
                    data.insert(key, value);
                }
                LogOp::Delete { key } => {
                    data.remove(&key);
                }
                LogOp::Clear => data.clear(),
            }
        }

        info!(
            path = %config.path.display(),
            ops = replayed,
            keys = data.len(),
            "Opened file store"
        );

        Ok(Self {
            config,
            _lock_file: lock_file,
            inner: RwLock::new(Inner { data, log }),
        })
    }

    /// Get the store path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.inner.read().data.len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.inner.read().data.is_empty()
    }

    /// Records currently in the op log.
    pub fn log_len(&self) -> u64 {
        self.inner.read().log.records()
    }

    /// Flush and fsync the op log.
    pub fn sync(&self) -> Result<()> {
        self.inner.write().log.sync()
    }

    /// Rewrite the op log so it holds one record per live key.
    pub fn compact(&self) -> Result<()> {
        let mut inner = self.inner.write();
        Self::compact_locked(&mut inner)
    }

    fn compact_locked(inner: &mut Inner) -> Result<()> {
        let before = inner.log.records();
        let ops: Vec<LogOp> = inner
            .data
            .iter()
            .map(|(key, value)| LogOp::Put {
                key: key.clone(),
                value: value.clone(),
            })
            .collect();
        inner.log.rewrite(ops.iter())?;

        info!(before, after = ops.len(), "Compacted op log");
        Ok(())
    }

    /// Log `op`, then apply it to the map. Caller holds the write lock.
    fn commit(&self, inner: &mut Inner, op: LogOp) -> Result<()> {
        inner.log.append(&op, self.config.sync_writes)?;

        match op {
            LogOp::Put { key, value } => {
                inner.data.insert(key, value);
            }
            LogOp::Delete { key } => {
                inner.data.remove(&key);
            }
            LogOp::Clear => inner.data.clear(),
        }

        // The write is already logged and applied; a failed compaction
        // only leaves a longer log
        if let Some(limit) = self.config.compact_after {
            if inner.log.since_rewrite() >= limit {
                if let Err(e) = Self::compact_locked(inner) {
                    warn!(error = %e, "Automatic op log compaction failed");
                }
            }
        }

        Ok(())
    }

    fn write_manifest(path: &Path) -> Result<()> {
        let mut file = File::create(path.join("MANIFEST"))?;

        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        file.sync_all()?;

        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        let mut file = File::open(path.join("MANIFEST"))?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != STORE_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid store magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != STORE_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported store version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.join("LOCK"))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;

        Ok(lock_file)
    }
}

impl Storage for FileStorage {
    fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut inner = self.inner.write();
        self.commit(
            &mut inner,
            LogOp::Put {
                key: key.to_string(),
                value: value.to_string(),
            },
        )
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.read().data.get(key).cloned())
    }

    fn get_by_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let inner = self.inner.read();
        Ok(inner
            .data
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(_, value)| value.clone())
            .collect())
    }

    fn put_if_absent(&self, key: &str, value: &str) -> Result<bool> {
        let mut inner = self.inner.write();
        if inner.data.contains_key(key) {
            return Ok(false);
        }
        self.commit(
            &mut inner,
            LogOp::Put {
                key: key.to_string(),
                value: value.to_string(),
            },
        )?;
        Ok(true)
    }

    fn compare_and_swap(&self, key: &str, expected: &str, new_value: &str) -> Result<bool> {
        let mut inner = self.inner.write();
        if inner.data.get(key).map(String::as_str) != Some(expected) {
            return Ok(false);
        }
        self.commit(
            &mut inner,
            LogOp::Put {
                key: key.to_string(),
                value: new_value.to_string(),
            },
        )?;
        Ok(true)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.data.contains_key(key) {
            return Ok(());
        }
        self.commit(
            &mut inner,
            LogOp::Delete {
                key: key.to_string(),
            },
        )
    }

    fn clear(&self) -> Result<()> {
        let mut inner = self.inner.write();
        self.commit(&mut inner, LogOp::Clear)
    }
}

impl Drop for FileStorage {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.sync();
    }
}
