//! JSONL queue files: tolerant reads, dated archival, staleness.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::io::atomic::write_atomic;

/// Read one JSON record per line.
///
/// Absent files and open failures yield an empty list. Lines that are not
/// valid UTF-8 or not valid JSON are skipped with a warning; only an I/O
/// error ends the read early. Blank lines are ignored silently.
pub fn read_queue<T: DeserializeOwned>(path: &Path) -> Vec<T> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(err) => {
            warn!(path = %path.display(), err = %err, "failed to open queue");
            return Vec::new();
        }
    };

    let mut reader = BufReader::new(file);
    let mut records = Vec::new();
    let mut buf = Vec::new();
    let mut line_no = 0usize;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => line_no += 1,
            Err(err) => {
                warn!(path = %path.display(), line = line_no + 1, err = %err, "queue read stopped");
                break;
            }
        }
        if buf.trim_ascii().is_empty() {
            continue;
        }
        match serde_json::from_slice(&buf) {
            Ok(record) => records.push(record),
            Err(err) => {
                warn!(path = %path.display(), line = line_no, err = %err, "skipping malformed queue line");
            }
        }
    }
    debug!(path = %path.display(), count = records.len(), "queue read");
    records
}

/// Append one record as a JSON line, creating parent directories.
pub fn append_line<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut line = serde_json::to_string(record).context("serialize queue line")?;
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("append {}", path.display()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    Archived(PathBuf),
    /// The rename failed and the source was deleted instead.
    Deleted,
    Absent,
}

/// Move `path` into `archive_dir` under a timestamp-prefixed name.
///
/// An existing archive with the same name gets a numeric suffix instead of
/// being replaced. A second call on the now-absent file is a no-op.
pub fn archive(path: &Path, archive_dir: &Path, now: DateTime<Utc>) -> Result<ArchiveOutcome> {
    if !path.exists() {
        return Ok(ArchiveOutcome::Absent);
    }
    fs::create_dir_all(archive_dir)
        .with_context(|| format!("create archive dir {}", archive_dir.display()))?;
    let file_name = path
        .file_name()
        .with_context(|| format!("queue path missing file name {}", path.display()))?
        .to_string_lossy();
    let stamp = now.format("%Y%m%dT%H%M%S%.3fZ");
    let mut target = archive_dir.join(format!("{stamp}-{file_name}"));
    let mut attempt = 1;
    while target.symlink_metadata().is_ok() {
        target = archive_dir.join(format!("{stamp}-{attempt}-{file_name}"));
        attempt += 1;
    }
    move_or_delete(path, target)
}

fn move_or_delete(path: &Path, target: PathBuf) -> Result<ArchiveOutcome> {
    match fs::rename(path, &target) {
        Ok(()) => {
            debug!(from = %path.display(), to = %target.display(), "archived");
            Ok(ArchiveOutcome::Archived(target))
        }
        Err(err) => {
            warn!(path = %path.display(), err = %err, "archive rename failed, deleting instead");
            fs::remove_file(path).with_context(|| format!("remove {}", path.display()))?;
            Ok(ArchiveOutcome::Deleted)
        }
    }
}

/// Delete `path`. Returns false when it did not exist.
pub fn clear(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
    }
}

/// True when the file was last modified more than `max_age` before `now`.
///
/// Absent files and stat failures are never stale.
pub fn is_stale(path: &Path, max_age: Duration, now: SystemTime) -> bool {
    let Ok(modified) = fs::metadata(path).and_then(|meta| meta.modified()) else {
        return false;
    };
    now.duration_since(modified)
        .is_ok_and(|age| age > max_age)
}

/// Write a pretty JSON document atomically.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    buf.push('\n');
    write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc)
    }

    #[test]
    fn absent_queue_reads_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let records: Vec<Value> = read_queue(&temp.path().join("missing.jsonl"));
        assert!(records.is_empty());
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("q.jsonl");
        fs::write(&path, "{\"a\":1}\nnot json\n\n{\"a\":2}\n{\"a\":").expect("write");
        let records: Vec<Value> = read_queue(&path);
        assert_eq!(records, vec![json!({"a": 1}), json!({"a": 2})]);
    }

    #[test]
    fn reading_twice_is_idempotent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("q.jsonl");
        append_line(&path, &json!({"n": 1})).expect("append");
        append_line(&path, &json!({"n": 2})).expect("append");
        let first: Vec<Value> = read_queue(&path);
        let second: Vec<Value> = read_queue(&path);
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn archive_moves_once_then_noops() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("graph-queue.jsonl");
        let archive_dir = temp.path().join("archive");
        fs::write(&path, "{}\n").expect("write");

        match archive(&path, &archive_dir, now()).expect("archive") {
            ArchiveOutcome::Archived(target) => {
                assert!(target.exists());
                assert_eq!(
                    target.file_name().and_then(|n| n.to_str()),
                    Some("20260301T120000.000Z-graph-queue.jsonl")
                );
            }
            other => panic!("expected archive, got {other:?}"),
        }
        assert!(!path.exists());
        assert_eq!(
            archive(&path, &archive_dir, now()).expect("second archive"),
            ArchiveOutcome::Absent
        );
    }

    #[test]
    fn undecodable_line_does_not_end_the_read() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("q.jsonl");
        let mut contents = b"{\"a\":1}\n{\"a\":\"".to_vec();
        contents.extend_from_slice(b"\xff\xfe\"}\n{\"a\":3}\n{\"a\":4}\n");
        fs::write(&path, contents).expect("write");
        let records: Vec<Value> = read_queue(&path);
        assert_eq!(records, vec![json!({"a": 1}), json!({"a": 3}), json!({"a": 4})]);
    }

    #[test]
    fn same_instant_archives_do_not_overwrite() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state.json");
        let archive_dir = temp.path().join("archive");

        fs::write(&path, "first").expect("write");
        archive(&path, &archive_dir, now()).expect("first archive");
        fs::write(&path, "second").expect("write");
        let second = match archive(&path, &archive_dir, now()).expect("second archive") {
            ArchiveOutcome::Archived(target) => target,
            other => panic!("expected archive, got {other:?}"),
        };

        assert_eq!(
            second.file_name().and_then(|n| n.to_str()),
            Some("20260301T120000.000Z-1-state.json")
        );
        assert_eq!(
            fs::read_to_string(archive_dir.join("20260301T120000.000Z-state.json")).expect("first"),
            "first"
        );
        assert_eq!(fs::read_to_string(second).expect("second"), "second");
    }

    #[test]
    fn failed_rename_falls_back_to_delete() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("q.jsonl");
        fs::write(&path, "{}\n").expect("write");
        // A non-empty directory cannot be replaced by a file.
        let target = temp.path().join("occupied");
        fs::create_dir_all(target.join("inner")).expect("mkdir");

        assert_eq!(
            move_or_delete(&path, target.clone()).expect("fallback"),
            ArchiveOutcome::Deleted
        );
        assert!(!path.exists());
        assert!(target.join("inner").is_dir());
    }

    #[test]
    fn clear_reports_presence() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("q.jsonl");
        fs::write(&path, "{}\n").expect("write");
        assert!(clear(&path).expect("clear"));
        assert!(!clear(&path).expect("clear again"));
    }

    #[test]
    fn staleness_uses_modification_time() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("q.jsonl");
        fs::write(&path, "{}\n").expect("write");
        let hour = Duration::from_secs(3600);
        assert!(!is_stale(&path, hour, SystemTime::now()));
        assert!(is_stale(&path, hour, SystemTime::now() + 2 * hour));
        assert!(!is_stale(&temp.path().join("missing"), hour, SystemTime::now()));
    }
}
