//! File-backed coordination store (`.claude/coordination/locks.json`).
//!
//! The store is a single JSON document replaced wholesale on every write.
//! There is no OS-level file lock around the read-modify-write cycle, so two
//! processes writing at the same instant can lose an update; the store only
//! targets same-host, low-contention coordination.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::io::atomic::write_atomic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockType {
    Write,
    Edit,
    Exclusive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    pub lock_id: String,
    /// Path relative to the project root, `/`-separated.
    pub file_path: String,
    pub lock_type: LockType,
    pub owner_instance_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lock {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Deterministic lock id for an (owner, path) pair.
pub fn lock_id(owner: &str, file_path: &str) -> String {
    format!("{owner}::{file_path}")
}

/// On-disk document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coordination {
    #[serde(default)]
    pub locks: Vec<Lock>,
}

impl Coordination {
    /// Live lock on `file_path` held by anyone other than `owner`.
    pub fn conflict_for(&self, file_path: &str, owner: &str, now: DateTime<Utc>) -> Option<&Lock> {
        self.locks.iter().find(|lock| {
            lock.file_path == file_path && lock.owner_instance_id != owner && lock.is_live(now)
        })
    }

    fn prune_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.locks.len();
        self.locks.retain(|lock| lock.is_live(now));
        before - self.locks.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired(Lock),
    /// The owner already held the lock; its window was extended.
    Refreshed(Lock),
    /// Someone else holds a live lock on the path.
    Conflict(Lock),
    /// No store exists, so coordination is off.
    Disabled,
}

/// Handle on the coordination store at a fixed path.
#[derive(Debug, Clone)]
pub struct LockStore {
    path: PathBuf,
}

impl LockStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Coordination is enabled only once the store file exists.
    pub fn is_enabled(&self) -> bool {
        self.path.exists()
    }

    /// Create an empty store. Returns false when one already exists and
    /// `force` is not set.
    pub fn init(&self, force: bool) -> Result<bool> {
        if self.is_enabled() && !force {
            return Ok(false);
        }
        self.save(&Coordination::default())?;
        info!(path = %self.path.display(), "coordination store initialized");
        Ok(true)
    }

    /// Load the store; `None` when coordination is disabled.
    pub fn load(&self) -> Result<Option<Coordination>> {
        if !self.is_enabled() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read coordination store {}", self.path.display()))?;
        if contents.trim().is_empty() {
            return Ok(Some(Coordination::default()));
        }
        let store: Coordination = serde_json::from_str(&contents)
            .with_context(|| format!("parse coordination store {}", self.path.display()))?;
        Ok(Some(store))
    }

    pub fn save(&self, store: &Coordination) -> Result<()> {
        let mut buf = serde_json::to_string_pretty(store).context("serialize coordination store")?;
        buf.push('\n');
        write_atomic(&self.path, &buf)
    }

    pub fn conflict_for(
        &self,
        file_path: &str,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Lock>> {
        Ok(self
            .load()?
            .and_then(|store| store.conflict_for(file_path, owner, now).cloned()))
    }

    /// Acquire or refresh `owner`'s lock on `file_path`.
    ///
    /// Idempotent: re-acquiring replaces the owner's previous entry rather than
    /// adding a second one. Expired entries are pruned on every write.
    #[instrument(skip_all, fields(file_path, owner))]
    pub fn acquire(
        &self,
        file_path: &str,
        owner: &str,
        lock_type: LockType,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<AcquireOutcome> {
        let Some(mut store) = self.load()? else {
            return Ok(AcquireOutcome::Disabled);
        };
        if let Some(conflict) = store.conflict_for(file_path, owner, now) {
            debug!(holder = %conflict.owner_instance_id, "lock held by another instance");
            return Ok(AcquireOutcome::Conflict(conflict.clone()));
        }

        let pruned = store.prune_expired(now);
        let id = lock_id(owner, file_path);
        let existing = store.locks.iter().position(|lock| lock.lock_id == id);
        let lock = Lock {
            lock_id: id,
            file_path: file_path.to_string(),
            lock_type,
            owner_instance_id: owner.to_string(),
            acquired_at: existing.map_or(now, |idx| store.locks[idx].acquired_at),
            expires_at: now + ttl,
        };
        let outcome = match existing {
            Some(idx) => {
                store.locks[idx] = lock.clone();
                AcquireOutcome::Refreshed(lock)
            }
            None => {
                store.locks.push(lock.clone());
                AcquireOutcome::Acquired(lock)
            }
        };
        self.save(&store)?;
        debug!(pruned, "lock store written");
        Ok(outcome)
    }

    /// Drop every lock held by `owner`. Returns how many were removed.
    #[instrument(skip_all, fields(owner))]
    pub fn release_owned(&self, owner: &str) -> Result<usize> {
        let Some(mut store) = self.load()? else {
            return Ok(0);
        };
        let before = store.locks.len();
        store.locks.retain(|lock| lock.owner_instance_id != owner);
        let released = before - store.locks.len();
        if released > 0 {
            self.save(&store)?;
        }
        debug!(released, "released owned locks");
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc)
    }

    fn enabled_store() -> (tempfile::TempDir, LockStore) {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = LockStore::new(temp.path().join("coordination/locks.json"));
        assert!(store.init(false).expect("init"));
        (temp, store)
    }

    #[test]
    fn absent_store_disables_coordination() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = LockStore::new(temp.path().join("locks.json"));
        assert_eq!(store.load().expect("load"), None);
        assert_eq!(
            store
                .acquire("src/app.ts", "a", LockType::Write, Duration::minutes(5), now())
                .expect("acquire"),
            AcquireOutcome::Disabled
        );
        assert!(!store.path().exists());
    }

    #[test]
    fn conflicts_respect_owner_and_expiry() {
        let (_temp, store) = enabled_store();
        store
            .acquire("src/app.ts", "a", LockType::Write, Duration::minutes(5), now())
            .expect("acquire");

        let conflict = store
            .conflict_for("src/app.ts", "b", now())
            .expect("conflict_for")
            .expect("b conflicts");
        assert_eq!(conflict.owner_instance_id, "a");
        assert_eq!(store.conflict_for("src/app.ts", "a", now()).expect("own"), None);
        assert_eq!(
            store
                .conflict_for("src/app.ts", "b", now() + Duration::minutes(6))
                .expect("expired"),
            None
        );
        assert_eq!(store.conflict_for("src/other.ts", "b", now()).expect("other"), None);
    }

    #[test]
    fn reacquire_refreshes_instead_of_duplicating() {
        let (_temp, store) = enabled_store();
        let first = store
            .acquire("src/app.ts", "a", LockType::Edit, Duration::minutes(5), now())
            .expect("first");
        assert!(matches!(first, AcquireOutcome::Acquired(_)));
        let later = now() + Duration::minutes(2);
        match store
            .acquire("src/app.ts", "a", LockType::Edit, Duration::minutes(5), later)
            .expect("second")
        {
            AcquireOutcome::Refreshed(lock) => {
                assert_eq!(lock.acquired_at, now());
                assert_eq!(lock.expires_at, later + Duration::minutes(5));
                assert_eq!(lock.lock_id, lock_id("a", "src/app.ts"));
            }
            other => panic!("expected refresh, got {other:?}"),
        }
        let loaded = store.load().expect("load").expect("enabled");
        assert_eq!(loaded.locks.len(), 1);
    }

    #[test]
    fn conflicting_acquire_leaves_store_untouched() {
        let (_temp, store) = enabled_store();
        store
            .acquire("src/app.ts", "a", LockType::Write, Duration::minutes(5), now())
            .expect("a");
        let outcome = store
            .acquire("src/app.ts", "b", LockType::Write, Duration::minutes(5), now())
            .expect("b");
        assert!(matches!(outcome, AcquireOutcome::Conflict(ref lock) if lock.owner_instance_id == "a"));
        assert_eq!(store.load().expect("load").expect("enabled").locks.len(), 1);
    }

    #[test]
    fn expired_locks_are_pruned_on_write() {
        let (_temp, store) = enabled_store();
        store
            .acquire("a.ts", "a", LockType::Write, Duration::minutes(1), now())
            .expect("a");
        store
            .acquire(
                "b.ts",
                "b",
                LockType::Write,
                Duration::minutes(1),
                now() + Duration::minutes(10),
            )
            .expect("b");
        let loaded = store.load().expect("load").expect("enabled");
        assert_eq!(loaded.locks.len(), 1);
        assert_eq!(loaded.locks[0].file_path, "b.ts");
    }

    #[test]
    fn release_owned_only_drops_own_locks() {
        let (_temp, store) = enabled_store();
        for (path, owner) in [("a.ts", "a"), ("b.ts", "a"), ("c.ts", "b")] {
            store
                .acquire(path, owner, LockType::Write, Duration::minutes(5), now())
                .expect("acquire");
        }
        assert_eq!(store.release_owned("a").expect("release"), 2);
        assert_eq!(store.release_owned("a").expect("release again"), 0);
        let loaded = store.load().expect("load").expect("enabled");
        assert_eq!(loaded.locks.len(), 1);
        assert_eq!(loaded.locks[0].owner_instance_id, "b");
    }

    #[test]
    fn store_uses_snake_case_fields() {
        let (_temp, store) = enabled_store();
        store
            .acquire("src/app.ts", "a", LockType::Write, Duration::minutes(5), now())
            .expect("acquire");
        let raw = fs::read_to_string(store.path()).expect("read");
        assert!(raw.contains("\"owner_instance_id\": \"a\""));
        assert!(raw.contains("\"lock_type\": \"write\""));
    }

    #[test]
    fn init_does_not_clobber_without_force() {
        let (_temp, store) = enabled_store();
        store
            .acquire("a.ts", "a", LockType::Write, Duration::minutes(5), now())
            .expect("acquire");
        assert!(!store.init(false).expect("init"));
        assert_eq!(store.load().expect("load").expect("enabled").locks.len(), 1);
        assert!(store.init(true).expect("force"));
        assert!(store.load().expect("load").expect("enabled").locks.is_empty());
    }
}
