//! Append-only operation log backing [`super::FileStorage`].
//!
//! File layout: a 5-byte header (magic + version) followed by records of
//! `len: u32 LE | payload | crc32(payload): u32 LE`, where the payload is a
//! MessagePack-encoded [`LogOp`].

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Magic bytes for the op log.
const LOG_MAGIC: &[u8; 4] = b"KVL\0";

/// Current op log format version.
const LOG_VERSION: u8 = 1;

const HEADER_LEN: usize = LOG_MAGIC.len() + 1;

/// Largest record accepted on replay (64MB).
const MAX_RECORD_LEN: usize = 64 * 1024 * 1024;

/// A single mutation recorded in the log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum LogOp {
    Put { key: String, value: String },
    Delete { key: String },
    Clear,
}

/// Writer half of the op log plus replay on open.
pub(crate) struct OpLog {
    path: PathBuf,
    file: File,
    /// Bytes of complete records on disk, header included.
    len: u64,
    /// Records in the log.
    records: u64,
    /// Records appended since the log was opened or last rewritten.
    since_rewrite: u64,
    /// Set when a failed append could not be cut back off the file.
    poisoned: bool,
    #[cfg(test)]
    fail_next_append: bool,
}

impl OpLog {
    /// Open the log at `path`, creating it if missing, and return every
    /// recorded operation in order.
    ///
    /// A torn record at the tail is cut off; damage anywhere else is an error.
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, Vec<LogOp>)> {
        let path = path.as_ref().to_path_buf();

        let (ops, len) = if path.exists() {
            let buf = fs::read(&path)?;
            Self::verify_header(&buf)?;

            let (ops, valid_len) = Self::replay(&buf)?;
            if valid_len < buf.len() {
                warn!(
                    path = %path.display(),
                    discarded = buf.len() - valid_len,
                    "Truncating torn record at end of op log"
                );
                let file = OpenOptions::new().write(true).open(&path)?;
                file.set_len(valid_len as u64)?;
                file.sync_all()?;
            }
            (ops, valid_len as u64)
        } else {
            Self::write_fresh(&path)?;
            (Vec::new(), HEADER_LEN as u64)
        };

        let file = OpenOptions::new().append(true).open(&path)?;
        let records = ops.len() as u64;

        Ok((
            Self {
                path,
                file,
                len,
                records,
                since_rewrite: 0,
                poisoned: false,
                #[cfg(test)]
                fail_next_append: false,
            },
            ops,
        ))
    }

    /// Append one operation. With `sync` the record is fsynced before return.
    ///
    /// The record is written whole or not at all: on failure the file is cut
    /// back to its previous length, so a failed append never reappears on
    /// replay.
    pub fn append(&mut self, op: &LogOp, sync: bool) -> Result<()> {
        if self.poisoned {
            return Err(StoreError::Corruption(format!(
                "Op log {} has an unrecoverable partial record; reopen the store",
                self.path.display()
            )));
        }

        let mut frame = Vec::new();
        Self::write_record(&mut frame, op)?;

        if let Err(e) = self.write_frame(&frame, sync) {
            self.roll_back();
            return Err(e);
        }

        self.len += frame.len() as u64;
        self.records += 1;
        self.since_rewrite += 1;
        Ok(())
    }

    /// Replace the whole log with `ops`, written to a side file and renamed
    /// into place. On failure the current log is left as it was.
    pub fn rewrite<'a>(&mut self, ops: impl Iterator<Item = &'a LogOp>) -> Result<()> {
        let tmp_path = self.path.with_extension("log.tmp");
        let result = self.rewrite_via(&tmp_path, ops);
        if result.is_err() && tmp_path.is_file() {
            let _ = fs::remove_file(&tmp_path);
        }
        result
    }

    /// fsync the file.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn since_rewrite(&self) -> u64 {
        self.since_rewrite
    }

    /// Make the next append write half its record and then fail.
    #[cfg(test)]
    pub fn fail_next_append(&mut self) {
        self.fail_next_append = true;
    }

    fn write_frame(&mut self, frame: &[u8], sync: bool) -> Result<()> {
        #[cfg(test)]
        if std::mem::take(&mut self.fail_next_append) {
            self.file.write_all(&frame[..frame.len() / 2])?;
            let e = std::io::Error::new(std::io::ErrorKind::Other, "injected write failure");
            return Err(e.into());
        }

        self.file.write_all(frame)?;
        if sync {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Cut the file back to the last complete record.
    fn roll_back(&mut self) {
        if let Err(e) = self.file.set_len(self.len) {
            warn!(
                path = %self.path.display(),
                error = %e,
                "Could not roll back failed op log append; refusing further writes"
            );
            self.poisoned = true;
        }
    }

    fn rewrite_via<'a>(
        &mut self,
        tmp_path: &Path,
        ops: impl Iterator<Item = &'a LogOp>,
    ) -> Result<()> {
        let mut count = 0u64;
        let mut tmp = BufWriter::new(File::create(tmp_path)?);
        tmp.write_all(LOG_MAGIC)?;
        tmp.write_all(&[LOG_VERSION])?;
        for op in ops {
            Self::write_record(&mut tmp, op)?;
            count += 1;
        }
        let tmp = tmp.into_inner().map_err(|e| e.into_error())?;
        tmp.sync_all()?;
        let len = tmp.metadata()?.len();

        // The append handle follows the file through the rename
        let file = OpenOptions::new().append(true).open(tmp_path)?;
        fs::rename(tmp_path, &self.path)?;

        self.file = file;
        self.len = len;
        self.records = count;
        self.since_rewrite = 0;
        self.poisoned = false;
        Ok(())
    }

    fn write_fresh(path: &Path) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(LOG_MAGIC)?;
        file.write_all(&[LOG_VERSION])?;
        file.sync_all()?;
        Ok(())
    }

    fn verify_header(buf: &[u8]) -> Result<()> {
        if buf.len() < HEADER_LEN || &buf[..LOG_MAGIC.len()] != LOG_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid op log magic".into()));
        }
        let version = buf[LOG_MAGIC.len()];
        if version != LOG_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported op log version: {}",
                version
            )));
        }
        Ok(())
    }

    /// Decode records after the header. Returns the ops and the length of
    /// the prefix of `buf` made of complete records.
    fn replay(buf: &[u8]) -> Result<(Vec<LogOp>, usize)> {
        let mut ops = Vec::new();
        let mut pos = HEADER_LEN;

        while pos < buf.len() {
            let rest = &buf[pos..];
            if rest.len() < 4 {
                break;
            }
            let len = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
            if len == 0 {
                // Records are never empty; zeroes here are space the file
                // grew by before a crash wrote into it
                if rest.iter().all(|&b| b == 0) {
                    break;
                }
                return Err(StoreError::Corruption(format!(
                    "Empty op log record at offset {}",
                    pos
                )));
            }
            if len > MAX_RECORD_LEN {
                return Err(StoreError::Corruption(format!(
                    "Op log record at offset {} too large ({} bytes)",
                    pos, len
                )));
            }
            if rest.len() < 4 + len + 4 {
                break;
            }

            let payload = &rest[4..4 + len];
            let crc = &rest[4 + len..8 + len];
            let stored = u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]);
            let computed = crc32fast::hash(payload);
            if stored != computed {
                return Err(StoreError::ChecksumMismatch {
                    expected: stored,
                    got: computed,
                });
            }

            ops.push(rmp_serde::from_slice(payload)?);
            pos += 8 + len;
        }

        Ok((ops, pos.min(buf.len())))
    }

    fn write_record<W: Write>(writer: &mut W, op: &LogOp) -> Result<()> {
        let encoded = rmp_serde::to_vec(op)?;

        writer.write_all(&(encoded.len() as u32).to_le_bytes())?;
        writer.write_all(&encoded)?;
        writer.write_all(&crc32fast::hash(&encoded).to_le_bytes())?;

        Ok(())
    }
}
