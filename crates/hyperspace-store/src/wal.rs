//! Write-ahead log framing.
//!
//! Each entry on disk is an 8-byte little-endian length prefix followed
//! by that many bytes of `"<log_id>|<version>|<op>|<payload_json>\n"`.
//! There are deliberately no checksums — a known simplification
//! relative to how this workspace frames other binary blobs.
//!
//! This module only owns the byte framing and the file handles; the
//! business rules around `log_id` monotonicity, snapshot skip and the
//! read cursor's persistence belong to the storage node's `Persistence`
//! wrapper, which is the thing that actually decides what `log_id` to
//! assign and when to stop replaying.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("malformed WAL entry: {0}")]
    Malformed(String),
}

/// One decoded WAL record: `(log_id, version, op, payload)`.
#[derive(Debug, Clone, PartialEq)]
pub struct WalEntry {
    pub log_id: u64,
    pub version: String,
    pub op: String,
    pub payload: Value,
}

impl WalEntry {
    fn encode_line(&self) -> String {
        format!(
            "{}|{}|{}|{}\n",
            self.log_id, self.version, self.op, self.payload
        )
    }

    fn decode_line(line: &str) -> Result<Self, WalError> {
        let line = line.strip_suffix('\n').unwrap_or(line);
        let mut parts = line.splitn(4, '|');
        let log_id = parts
            .next()
            .ok_or_else(|| WalError::Malformed("missing log_id".into()))?
            .parse::<u64>()
            .map_err(|e| WalError::Malformed(format!("bad log_id: {e}")))?;
        let version = parts
            .next()
            .ok_or_else(|| WalError::Malformed("missing version".into()))?
            .to_string();
        let op = parts
            .next()
            .ok_or_else(|| WalError::Malformed("missing op".into()))?
            .to_string();
        let payload_str = parts
            .next()
            .ok_or_else(|| WalError::Malformed("missing payload".into()))?;
        let payload: Value = serde_json::from_str(payload_str)
            .map_err(|e| WalError::Malformed(format!("bad payload json: {e}")))?;
        Ok(WalEntry {
            log_id,
            version,
            op,
            payload,
        })
    }
}

/// Append-only WAL file.
///
/// Writes go through a dedicated handle kept permanently seeked at
/// EOF (append mode); reads go through a second, independent handle
/// whose position is the caller-tracked `read_offset` so that a
/// `reloadDatabase` replay walking forward from byte 0 never races
/// with concurrent appends landing at EOF — the read offset lives in
/// the `Persistence` wrapper, not in the OS file position.
pub struct Wal {
    write_file: Mutex<File>,
    read_file: Mutex<File>,
    read_offset: AtomicU64,
    flush_on_write: bool,
}

impl Wal {
    /// Opens (creating if absent) the WAL at `path` for append + read.
    pub fn open(path: &Path, flush_on_write: bool) -> Result<Self, WalError> {
        let write_file = OpenOptions::new().create(true).append(true).open(path)?;
        let read_file = OpenOptions::new().read(true).open(path)?;
        Ok(Self {
            write_file: Mutex::new(write_file),
            read_file: Mutex::new(read_file),
            read_offset: AtomicU64::new(0),
            flush_on_write,
        })
    }

    pub fn read_offset(&self) -> u64 {
        self.read_offset.load(Ordering::SeqCst)
    }

    pub fn set_read_offset(&self, offset: u64) {
        self.read_offset.store(offset, Ordering::SeqCst);
    }

    /// Appends one entry. WAL writes are serialised through a mutex so
    /// disk writes happen in monotonic `log_id` order on a single
    /// node.
    pub fn append(&self, entry: &WalEntry) -> Result<(), WalError> {
        let line = entry.encode_line();
        let bytes = line.as_bytes();

        let mut file = self.write_file.lock();
        file.write_u64::<LittleEndian>(bytes.len() as u64)?;
        file.write_all(bytes)?;
        if self.flush_on_write {
            file.sync_data()?;
        }
        Ok(())
    }

    /// Reads and decodes the next entry starting at `read_offset`,
    /// advancing it past the record on success. Returns `None` at
    /// EOF (a short read of the 8-byte length prefix), leaving the
    /// offset where it was so a later call — after more data has been
    /// appended — can pick up from the same spot.
    pub fn read_next(&self) -> Result<Option<WalEntry>, WalError> {
        let mut file = self.read_file.lock();
        let offset = self.read_offset.load(Ordering::SeqCst);
        file.seek(SeekFrom::Start(offset))?;

        let mut len_buf = [0u8; 8];
        match file.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = u64::from_le_bytes(len_buf);

        let mut body = vec![0u8; len as usize];
        match file.read_exact(&mut body) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let line = String::from_utf8(body)
            .map_err(|e| WalError::Malformed(format!("non-utf8 entry: {e}")))?;
        let entry = WalEntry::decode_line(&line)?;

        self.read_offset.store(offset + 8 + len, Ordering::SeqCst);
        Ok(Some(entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trips_a_single_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal.log");
        let wal = Wal::open(&path, true).unwrap();

        let entry = WalEntry {
            log_id: 1,
            version: "1.0".into(),
            op: "upsert".into(),
            payload: json!({"id": 1, "vectors": [1.0, 2.0]}),
        };
        wal.append(&entry).unwrap();

        let read_back = wal.read_next().unwrap().unwrap();
        assert_eq!(read_back, entry);
        assert!(wal.read_next().unwrap().is_none());
    }

    #[test]
    fn read_offset_survives_reopen_and_interleaved_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal.log");
        let wal = Wal::open(&path, false).unwrap();

        for i in 1..=3u64 {
            wal.append(&WalEntry {
                log_id: i,
                version: "1.0".into(),
                op: "upsert".into(),
                payload: json!({"id": i}),
            })
            .unwrap();
        }

        let first = wal.read_next().unwrap().unwrap();
        assert_eq!(first.log_id, 1);

        // A write landing after we've started reading must not perturb
        // the read cursor.
        wal.append(&WalEntry {
            log_id: 4,
            version: "1.0".into(),
            op: "upsert".into(),
            payload: json!({"id": 4}),
        })
        .unwrap();

        let second = wal.read_next().unwrap().unwrap();
        assert_eq!(second.log_id, 2);

        let offset = wal.read_offset();
        drop(wal);

        let wal = Wal::open(&path, false).unwrap();
        wal.set_read_offset(offset);
        let third = wal.read_next().unwrap().unwrap();
        assert_eq!(third.log_id, 3);
        let fourth = wal.read_next().unwrap().unwrap();
        assert_eq!(fourth.log_id, 4);
        assert!(wal.read_next().unwrap().is_none());
    }

    #[test]
    fn payload_containing_pipe_characters_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal.log");
        let wal = Wal::open(&path, true).unwrap();

        let entry = WalEntry {
            log_id: 1,
            version: "1.0".into(),
            op: "upsert".into(),
            payload: json!({"note": "a|b|c"}),
        };
        wal.append(&entry).unwrap();
        assert_eq!(wal.read_next().unwrap().unwrap(), entry);
    }
}
