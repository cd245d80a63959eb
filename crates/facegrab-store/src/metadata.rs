//! SQLite face metadata: registered names and the index-slot mapping.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS faces (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    name       TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS face_mappings (
    faiss_slot INTEGER PRIMARY KEY,
    face_id    INTEGER NOT NULL REFERENCES faces(id)
);
";

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("cannot create database directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A registered face as listed by [`MetadataStore::list_faces`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceRecord {
    pub id: i64,
    pub name: String,
    /// Index slot holding this face's vector, if mapped.
    pub slot: Option<i64>,
    pub created_at: String,
}

pub struct MetadataStore {
    conn: Connection,
}

impl MetadataStore {
    /// Open (or create) the database file and ensure both tables exist.
    pub fn open(path: &Path) -> Result<Self, MetadataError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| MetadataError::CreateDir {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let store = Self::with_connection(Connection::open(path)?)?;
        tracing::info!(path = %path.display(), faces = store.face_count()?, "metadata store opened");
        Ok(store)
    }

    /// In-memory database, for tests and dry runs.
    pub fn open_in_memory() -> Result<Self, MetadataError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, MetadataError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Insert a face record and return its auto-assigned id.
    pub fn put_face(&self, name: &str) -> Result<i64, MetadataError> {
        insert_face(&self.conn, name)
    }

    pub fn put_mapping(&self, slot: usize, face_id: i64) -> Result<(), MetadataError> {
        insert_mapping(&self.conn, slot, face_id)
    }

    /// Insert the face and its slot mapping in one transaction.
    pub fn record_registration(&mut self, slot: usize, name: &str) -> Result<i64, MetadataError> {
        let tx = self.conn.transaction()?;
        let face_id = insert_face(&tx, name)?;
        insert_mapping(&tx, slot, face_id)?;
        tx.commit()?;
        Ok(face_id)
    }

    pub fn lookup_by_slot(&self, slot: usize) -> Result<Option<i64>, MetadataError> {
        let face_id = self
            .conn
            .query_row(
                "SELECT face_id FROM face_mappings WHERE faiss_slot = ?1",
                params![slot as i64],
                |row| row.get(0),
            )
            .optional()?;
        Ok(face_id)
    }

    pub fn lookup_name(&self, face_id: i64) -> Result<Option<String>, MetadataError> {
        let name = self
            .conn
            .query_row("SELECT name FROM faces WHERE id = ?1", params![face_id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(name)
    }

    pub fn face_count(&self) -> Result<usize, MetadataError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM faces", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// All faces ordered by id.
    pub fn list_faces(&self) -> Result<Vec<FaceRecord>, MetadataError> {
        let mut stmt = self.conn.prepare(
            "SELECT f.id, f.name, m.faiss_slot, f.created_at
             FROM faces f LEFT JOIN face_mappings m ON m.face_id = f.id
             ORDER BY f.id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(FaceRecord {
                id: row.get(0)?,
                name: row.get(1)?,
                slot: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Slots in `0..index_len` with no mapping row.
    pub fn unmapped_slots(&self, index_len: usize) -> Result<Vec<usize>, MetadataError> {
        let mut stmt = self
            .conn
            .prepare("SELECT faiss_slot FROM face_mappings WHERE faiss_slot < ?1")?;
        let mapped = stmt
            .query_map(params![index_len as i64], |row| row.get::<_, i64>(0))?
            .collect::<Result<std::collections::HashSet<_>, _>>()?;
        Ok((0..index_len)
            .filter(|slot| !mapped.contains(&(*slot as i64)))
            .collect())
    }
}

fn insert_face(conn: &Connection, name: &str) -> Result<i64, MetadataError> {
    let created_at = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO faces (name, created_at) VALUES (?1, ?2)",
        params![name, created_at],
    )?;
    Ok(conn.last_insert_rowid())
}

fn insert_mapping(conn: &Connection, slot: usize, face_id: i64) -> Result<(), MetadataError> {
    conn.execute(
        "INSERT INTO face_mappings (faiss_slot, face_id) VALUES (?1, ?2)",
        params![slot as i64, face_id],
    )?;
    Ok(())
}
