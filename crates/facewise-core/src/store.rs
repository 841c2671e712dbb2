//! SQLite face store.
//!
//! One row per registered face: `id`, `name`, `timestamp` and the encoding as
//! a JSON array string.

use crate::types::{Encoding, FaceRecord, KnownFace, ENCODING_DIM};
use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Timestamp layout used by the `timestamp` column (SQLite `CURRENT_TIMESTAMP`).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS faces (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
    encoding TEXT NOT NULL
)";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database not found: {0}")]
    NotFound(String),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("encoding serialization: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("encoding must have {ENCODING_DIM} values, got {0}")]
    Dimension(usize),
}

/// Registered face without its encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceSummary {
    pub id: i64,
    pub name: String,
    pub timestamp: String,
}

pub struct FaceStore {
    conn: Connection,
}

impl FaceStore {
    /// Open (or create) the database and make sure the `faces` table exists.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        tracing::debug!(path = %path.display(), "face store opened");
        Ok(Self { conn })
    }

    /// Open a database that must already exist. The schema is left untouched.
    pub fn open_existing(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Err(StoreError::NotFound(path.display().to_string()));
        }
        Ok(Self { conn: Connection::open(path)? })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn has_faces_table(&self) -> Result<bool, StoreError> {
        let found = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'faces'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Register a face with the current UTC time.
    pub fn insert(&self, name: &str, encoding: &Encoding) -> Result<FaceRecord, StoreError> {
        self.insert_at(name, encoding, Utc::now().naive_utc())
    }

    pub fn insert_at(
        &self,
        name: &str,
        encoding: &Encoding,
        registered_at: NaiveDateTime,
    ) -> Result<FaceRecord, StoreError> {
        if encoding.len() != ENCODING_DIM {
            return Err(StoreError::Dimension(encoding.len()));
        }
        let timestamp = registered_at.format(TIMESTAMP_FORMAT).to_string();
        self.conn.execute(
            "INSERT INTO faces (name, timestamp, encoding) VALUES (?1, ?2, ?3)",
            params![name, timestamp, encoding.to_json()?],
        )?;
        let id = self.conn.last_insert_rowid();
        tracing::info!(id, name, "face registered");

        Ok(FaceRecord {
            id,
            name: name.to_string(),
            timestamp,
            encoding: encoding.clone(),
        })
    }

    /// All registered faces, oldest first.
    pub fn summaries(&self) -> Result<Vec<FaceSummary>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, timestamp FROM faces ORDER BY timestamp, id")?;
        let rows = stmt.query_map([], |row| {
            Ok(FaceSummary {
                id: row.get(0)?,
                name: row.get(1)?,
                timestamp: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Gallery for matching. Rows whose encoding cannot be parsed or has the
    /// wrong length are skipped.
    pub fn known_faces(&self) -> Result<Vec<KnownFace>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT id, name, encoding FROM faces ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?;

        let mut faces = Vec::new();
        for row in rows {
            let (id, name, raw) = row?;
            match Encoding::from_json(&raw) {
                Ok(encoding) if encoding.len() == ENCODING_DIM => {
                    faces.push(KnownFace { id, name, encoding })
                }
                Ok(encoding) => {
                    tracing::warn!(id, name, len = encoding.len(), "skipping face with wrong encoding length")
                }
                Err(err) => tracing::warn!(id, name, error = %err, "skipping face with unreadable encoding"),
            }
        }
        Ok(faces)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let n: i64 = self.conn.query_row("SELECT COUNT(*) FROM faces", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Delete a face by id. Returns whether a row was removed.
    pub fn remove(&self, id: i64) -> Result<bool, StoreError> {
        let removed = self.conn.execute("DELETE FROM faces WHERE id = ?1", params![id])?;
        if removed > 0 {
            tracing::info!(id, "face removed");
        }
        Ok(removed > 0)
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }
}
