//! Durable record of locally deleted objects.
//!
//! A tombstoned identity is never recreated by a merge, whatever the
//! incoming timestamp. The only way back is [`TombstoneRegistry::restore`],
//! which marks the entry restored and hands back the last known state;
//! [`TombstoneRegistry::reinstate`] undoes a restore that could not be
//! merged.
//! Rows are never removed.
//!
//! Uses its own SQLite file so deletion history survives a wiped object
//! store.

use crate::error::SyncResult;
use chrono::{DateTime, Utc};
use meridian_model::SerializedObject;
use meridian_types::Oid;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// A deleted object.
#[derive(Debug, Clone, PartialEq)]
pub struct Tombstone {
    pub oid: Oid,
    pub object_type: String,
    pub last_state: SerializedObject,
    pub deleted_at: DateTime<Utc>,
    /// The local user created the object, so it is eligible for the trash.
    pub created_locally: bool,
    pub restored_at: Option<DateTime<Utc>>,
}

impl Tombstone {
    pub fn is_active(&self) -> bool {
        self.restored_at.is_none()
    }
}

/// Persistent tombstone registry backed by SQLite.
#[derive(Clone)]
pub struct TombstoneRegistry {
    conn: Arc<Mutex<Connection>>,
}

impl TombstoneRegistry {
    /// Opens (or creates) a registry at the given path.
    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Opens an in-memory registry (for testing).
    pub fn open_in_memory() -> SyncResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> SyncResult<Self> {
        let registry = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        registry.init_schema()?;
        Ok(registry)
    }

    fn init_schema(&self) -> SyncResult<()> {
        self.lock().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS tombstones (
                oid TEXT PRIMARY KEY,
                object_type TEXT NOT NULL,
                last_state TEXT NOT NULL,
                deleted_at INTEGER NOT NULL,
                created_locally INTEGER NOT NULL,
                restored_at INTEGER
            );

            CREATE TABLE IF NOT EXISTS local_creations (
                oid TEXT PRIMARY KEY
            );
            ",
        )?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Recording ────────────────────────────────────────────────

    /// Records a deletion. Recording an already active tombstone is a no-op;
    /// recording over a restored entry re-activates it with the new state.
    pub fn record_delete(
        &self,
        oid: &Oid,
        last_state: &SerializedObject,
        created_locally: bool,
    ) -> SyncResult<()> {
        let body = serde_json::to_string(last_state)?;
        let object_type = last_state.object_type().unwrap_or_default().to_string();
        let now = Utc::now().timestamp_millis();
        let changed = self.lock().execute(
            "INSERT INTO tombstones (oid, object_type, last_state, deleted_at, created_locally, restored_at)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL)
             ON CONFLICT(oid) DO UPDATE SET
                object_type = excluded.object_type,
                last_state = excluded.last_state,
                deleted_at = excluded.deleted_at,
                created_locally = excluded.created_locally,
                restored_at = NULL
             WHERE tombstones.restored_at IS NOT NULL",
            params![oid.as_str(), object_type, body, now, created_locally],
        )?;
        if changed > 0 {
            debug!("tombstoned {oid} ({object_type})");
        }
        Ok(())
    }

    /// Remembers that the local user created `oid`, so a later delete of it
    /// goes to the trash.
    pub fn mark_created_locally(&self, oid: &Oid) -> SyncResult<()> {
        self.lock().execute(
            "INSERT OR IGNORE INTO local_creations (oid) VALUES (?1)",
            params![oid.as_str()],
        )?;
        Ok(())
    }

    pub fn is_local_creation(&self, oid: &Oid) -> SyncResult<bool> {
        let found: Option<i64> = self
            .lock()
            .query_row(
                "SELECT 1 FROM local_creations WHERE oid = ?1",
                params![oid.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    // ── Queries ──────────────────────────────────────────────────

    /// True if the identity has an active (unrestored) tombstone.
    pub fn is_tombstoned(&self, oid: &Oid) -> SyncResult<bool> {
        let found: Option<i64> = self
            .lock()
            .query_row(
                "SELECT 1 FROM tombstones WHERE oid = ?1 AND restored_at IS NULL",
                params![oid.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Fetches an entry, active or restored.
    pub fn get(&self, oid: &Oid) -> SyncResult<Option<Tombstone>> {
        let raw = self
            .lock()
            .query_row(
                "SELECT oid, object_type, last_state, deleted_at, created_locally, restored_at
                 FROM tombstones WHERE oid = ?1",
                params![oid.as_str()],
                RawTombstone::from_row,
            )
            .optional()?;
        raw.map(RawTombstone::into_tombstone).transpose()
    }

    /// All identities with an active tombstone.
    pub fn tombstoned_oids(&self) -> SyncResult<BTreeSet<Oid>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT oid FROM tombstones WHERE restored_at IS NULL")?;
        let raw = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(raw.into_iter().filter_map(|s| Oid::new(s)).collect())
    }

    /// Number of active tombstones.
    pub fn len(&self) -> SyncResult<usize> {
        let n: i64 = self.lock().query_row(
            "SELECT COUNT(*) FROM tombstones WHERE restored_at IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    pub fn is_empty(&self) -> SyncResult<bool> {
        Ok(self.len()? == 0)
    }

    // ── Reconciliation ───────────────────────────────────────────

    /// Objects the remote owns that are missing locally and were not
    /// deliberately deleted here: `remote ∖ local ∖ tombstoned`.
    pub fn reconcile(
        remote_owned: &BTreeSet<Oid>,
        local: &BTreeSet<Oid>,
        tombstoned: &BTreeSet<Oid>,
    ) -> BTreeSet<Oid> {
        remote_owned
            .iter()
            .filter(|oid| !local.contains(*oid) && !tombstoned.contains(*oid))
            .cloned()
            .collect()
    }

    /// [`Self::reconcile`] against this registry's active tombstones.
    pub fn restore_set(
        &self,
        remote_owned: &BTreeSet<Oid>,
        local: &BTreeSet<Oid>,
    ) -> SyncResult<BTreeSet<Oid>> {
        let tombstoned = self.tombstoned_oids()?;
        Ok(Self::reconcile(remote_owned, local, &tombstoned))
    }

    // ── Trash ────────────────────────────────────────────────────

    /// Active tombstones of locally created objects, most recent first.
    pub fn trash(&self) -> SyncResult<Vec<Tombstone>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT oid, object_type, last_state, deleted_at, created_locally, restored_at
             FROM tombstones
             WHERE created_locally = 1 AND restored_at IS NULL
             ORDER BY deleted_at DESC, oid",
        )?;
        let raw = stmt
            .query_map([], RawTombstone::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(RawTombstone::into_tombstone).collect()
    }

    /// Lifts an active tombstone and returns the object's last state so the
    /// caller can merge it back. `None` if there is nothing to restore.
    pub fn restore(&self, oid: &Oid) -> SyncResult<Option<SerializedObject>> {
        let conn = self.lock();
        let now = Utc::now().timestamp_millis();
        let changed = conn.execute(
            "UPDATE tombstones SET restored_at = ?2 WHERE oid = ?1 AND restored_at IS NULL",
            params![oid.as_str(), now],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        let body: String = conn.query_row(
            "SELECT last_state FROM tombstones WHERE oid = ?1",
            params![oid.as_str()],
            |row| row.get(0),
        )?;
        debug!("restored {oid} from tombstone");
        Ok(Some(serde_json::from_str(&body)?))
    }

    /// Re-activates a restored entry, keeping its last state and deletion
    /// time. Used when merging the restored state back failed.
    pub fn reinstate(&self, oid: &Oid) -> SyncResult<bool> {
        let changed = self.lock().execute(
            "UPDATE tombstones SET restored_at = NULL WHERE oid = ?1 AND restored_at IS NOT NULL",
            params![oid.as_str()],
        )?;
        if changed > 0 {
            debug!("reinstated tombstone of {oid}");
        }
        Ok(changed > 0)
    }
}

/// Row as read from SQLite, before JSON decoding.
struct RawTombstone {
    oid: String,
    object_type: String,
    last_state: String,
    deleted_at: i64,
    created_locally: bool,
    restored_at: Option<i64>,
}

impl RawTombstone {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            oid: row.get(0)?,
            object_type: row.get(1)?,
            last_state: row.get(2)?,
            deleted_at: row.get(3)?,
            created_locally: row.get(4)?,
            restored_at: row.get(5)?,
        })
    }

    fn into_tombstone(self) -> SyncResult<Tombstone> {
        Ok(Tombstone {
            oid: Oid::from(self.oid.as_str()),
            object_type: self.object_type,
            last_state: serde_json::from_str(&self.last_state)?,
            deleted_at: millis_to_datetime(self.deleted_at),
            created_locally: self.created_locally,
            restored_at: self.restored_at.map(millis_to_datetime),
        })
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
