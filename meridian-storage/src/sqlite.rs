//! SQLite-backed object store.
//!
//! Each object is one row holding its JSON body. Reference fields are also
//! written to `object_refs` so inverse relations can be answered with an
//! index lookup instead of a full scan.

use crate::adapter::ObjectStore;
use crate::error::{StorageError, StorageResult};
use meridian_model::DomainObject;
use meridian_types::Oid;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, warn};

/// Persistent store backed by a single SQLite file.
pub struct SqliteStore {
    conn: Connection,
    in_unit: bool,
}

impl SqliteStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> StorageResult<Self> {
        let store = Self {
            conn,
            in_unit: false,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StorageResult<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS objects (
                oid TEXT PRIMARY KEY,
                object_type TEXT NOT NULL,
                mod_datetime TEXT,
                body TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_objects_type ON objects(object_type);

            CREATE TABLE IF NOT EXISTS object_refs (
                oid TEXT NOT NULL,
                field TEXT NOT NULL,
                target TEXT NOT NULL,
                PRIMARY KEY (oid, field)
            );

            CREATE INDEX IF NOT EXISTS idx_object_refs_target ON object_refs(target);
            ",
        )?;
        Ok(())
    }

    fn require_unit(&self) -> StorageResult<()> {
        if self.in_unit {
            Ok(())
        } else {
            Err(StorageError::NoUnitOfWork)
        }
    }

    fn write_row(&self, object: &DomainObject) -> StorageResult<()> {
        let body = serde_json::to_string(object)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO objects (oid, object_type, mod_datetime, body)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                object.oid.as_str(),
                object.object_type,
                object.mod_datetime.map(|ts| ts.to_rfc3339()),
                body,
            ],
        )?;
        self.conn
            .execute("DELETE FROM object_refs WHERE oid = ?1", params![object.oid.as_str()])?;
        let mut stmt = self
            .conn
            .prepare_cached("INSERT INTO object_refs (oid, field, target) VALUES (?1, ?2, ?3)")?;
        for (field, target) in &object.refs {
            if let Some(target) = target {
                stmt.execute(params![object.oid.as_str(), field, target.as_str()])?;
            }
        }
        Ok(())
    }

    fn decode(body: &str) -> StorageResult<DomainObject> {
        Ok(serde_json::from_str(body)?)
    }

    fn query_objects(&self, sql: &str, arg: &str) -> StorageResult<Vec<DomainObject>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let bodies = stmt
            .query_map(params![arg], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        bodies.iter().map(|b| Self::decode(b)).collect()
    }
}

impl ObjectStore for SqliteStore {
    fn exists(&self, oid: &Oid) -> StorageResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM objects WHERE oid = ?1",
                params![oid.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn get(&self, oid: &Oid) -> StorageResult<Option<DomainObject>> {
        let body: Option<String> = self
            .conn
            .query_row(
                "SELECT body FROM objects WHERE oid = ?1",
                params![oid.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        body.as_deref().map(Self::decode).transpose()
    }

    fn list_by_type(&self, object_type: &str) -> StorageResult<Vec<DomainObject>> {
        self.query_objects(
            "SELECT body FROM objects WHERE object_type = ?1 ORDER BY oid",
            object_type,
        )
    }

    fn referrers(&self, oid: &Oid) -> StorageResult<Vec<DomainObject>> {
        self.query_objects(
            "SELECT DISTINCT o.body, o.oid FROM objects o
             JOIN object_refs r ON r.oid = o.oid
             WHERE r.target = ?1
             ORDER BY o.oid",
            oid.as_str(),
        )
    }

    fn oids(&self) -> StorageResult<BTreeSet<Oid>> {
        let mut stmt = self.conn.prepare_cached("SELECT oid FROM objects")?;
        let raw = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(raw.into_iter().filter_map(|s| Oid::new(s)).collect())
    }

    fn begin_unit_of_work(&mut self) -> StorageResult<()> {
        if self.in_unit {
            return Err(StorageError::UnitOfWorkActive);
        }
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        self.in_unit = true;
        Ok(())
    }

    fn in_unit_of_work(&self) -> bool {
        self.in_unit
    }

    fn create(&mut self, object: DomainObject) -> StorageResult<()> {
        self.require_unit()?;
        if self.exists(&object.oid)? {
            return Err(StorageError::AlreadyExists(object.oid.to_string()));
        }
        self.write_row(&object)
    }

    fn update(&mut self, object: DomainObject) -> StorageResult<()> {
        self.require_unit()?;
        if !self.exists(&object.oid)? {
            return Err(StorageError::NotFound(object.oid.to_string()));
        }
        self.write_row(&object)
    }

    fn delete(&mut self, oid: &Oid) -> StorageResult<()> {
        self.require_unit()?;
        let removed = self
            .conn
            .execute("DELETE FROM objects WHERE oid = ?1", params![oid.as_str()])?;
        if removed == 0 {
            return Err(StorageError::NotFound(oid.to_string()));
        }
        self.conn
            .execute("DELETE FROM object_refs WHERE oid = ?1", params![oid.as_str()])?;
        Ok(())
    }

    fn commit(&mut self) -> StorageResult<()> {
        self.require_unit()?;
        if let Err(e) = self.conn.execute_batch("COMMIT") {
            warn!("commit failed, rolling back: {e}");
            if let Err(rb) = self.conn.execute_batch("ROLLBACK") {
                warn!("rollback after failed commit also failed: {rb}");
            }
            self.in_unit = false;
            return Err(e.into());
        }
        self.in_unit = false;
        debug!("committed unit of work");
        Ok(())
    }

    fn rollback(&mut self) -> StorageResult<()> {
        self.require_unit()?;
        self.in_unit = false;
        self.conn.execute_batch("ROLLBACK")?;
        debug!("rolled back unit of work");
        Ok(())
    }
}
