//! Enrolled identities and their reference embeddings.
//!
//! [`IdentityRegistry`] is the in-memory view the matcher scans.
//! [`RegistryStore`] persists every embedding as one SQLite row, and loading
//! in row-id order rebuilds the registry in insertion order.

use crate::types::Embedding;
use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::Path;
use thiserror::Error;

const SCHEMA_VERSION: i32 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS embeddings (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    identity    TEXT    NOT NULL,
    dim         INTEGER NOT NULL,
    vector      BLOB    NOT NULL,
    created_at  TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_embeddings_identity ON embeddings(identity);
";

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed embedding blob for {identity} (row {row}): expected {expected} bytes, got {actual}")]
    MalformedBlob {
        row: i64,
        identity: String,
        expected: usize,
        actual: usize,
    },
    #[error("database schema version {0} is newer than supported")]
    UnsupportedSchema(i32),
    #[error("embedding must not be empty")]
    EmptyEmbedding,
}

/// One identity and its embeddings, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityRecord {
    pub key: String,
    pub embeddings: Vec<Embedding>,
}

#[derive(Debug, Clone, Default)]
pub struct IdentityRegistry {
    records: Vec<IdentityRecord>,
}

impl IdentityRegistry {
    /// Register `key` with no embeddings if it is not already present.
    pub fn ensure_identity(&mut self, key: &str) -> &mut IdentityRecord {
        let pos = match self.records.iter().position(|r| r.key == key) {
            Some(pos) => pos,
            None => {
                self.records.push(IdentityRecord {
                    key: key.to_string(),
                    embeddings: Vec::new(),
                });
                self.records.len() - 1
            }
        };
        &mut self.records[pos]
    }

    /// Append an embedding; returns how many the identity now holds.
    pub fn append(&mut self, key: &str, embedding: Embedding) -> usize {
        let record = self.ensure_identity(key);
        record.embeddings.push(embedding);
        record.embeddings.len()
    }

    pub fn get(&self, key: &str) -> Option<&IdentityRecord> {
        self.records.iter().find(|r| r.key == key)
    }

    pub fn records(&self) -> &[IdentityRecord] {
        &self.records
    }

    /// Every (identity, embedding) pair in insertion order.
    pub fn candidates(&self) -> impl Iterator<Item = (&str, &Embedding)> {
        self.records
            .iter()
            .flat_map(|r| r.embeddings.iter().map(move |e| (r.key.as_str(), e)))
    }

    /// Identities holding at least one embedding.
    pub fn enrolled_count(&self) -> usize {
        self.records.iter().filter(|r| !r.embeddings.is_empty()).count()
    }

    pub fn total_embeddings(&self) -> usize {
        self.records.iter().map(|r| r.embeddings.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_embeddings() == 0
    }
}

/// SQLite-backed embedding store.
pub struct RegistryStore {
    conn: Connection,
}

impl RegistryStore {
    pub fn open(path: &Path) -> Result<Self, RegistryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "opened registry store");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, RegistryError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, RegistryError> {
        let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if version > SCHEMA_VERSION {
            return Err(RegistryError::UnsupportedSchema(version));
        }
        conn.execute_batch(SCHEMA)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(Self { conn })
    }

    /// Persist one embedding. Returns the new row id.
    pub fn insert(&self, identity: &str, embedding: &Embedding) -> Result<i64, RegistryError> {
        if embedding.dim() == 0 {
            return Err(RegistryError::EmptyEmbedding);
        }
        self.conn.execute(
            "INSERT INTO embeddings (identity, dim, vector, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                identity,
                embedding.dim() as i64,
                encode_vector(embedding.values()),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Write-through enrollment: the row is committed before the in-memory
    /// registry sees the embedding.
    pub fn enroll(
        &self,
        registry: &mut IdentityRegistry,
        identity: &str,
        embedding: Embedding,
    ) -> Result<usize, RegistryError> {
        let row = self.insert(identity, &embedding)?;
        let count = registry.append(identity, embedding);
        tracing::info!(identity, row, count, "embedding enrolled");
        Ok(count)
    }

    /// Rebuild the registry in insertion order. Malformed rows are skipped.
    pub fn load(&self) -> Result<IdentityRegistry, RegistryError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, identity, dim, vector FROM embeddings ORDER BY id ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Vec<u8>>(3)?,
            ))
        })?;

        let mut registry = IdentityRegistry::default();
        let mut skipped = 0usize;
        for row in rows {
            let (id, identity, dim, blob) = row?;
            match decode_vector(id, &identity, dim, &blob) {
                Ok(values) => {
                    registry.append(&identity, Embedding::new(values));
                }
                Err(e) => {
                    skipped += 1;
                    tracing::warn!(error = %e, "skipping registry row");
                }
            }
        }

        tracing::info!(
            identities = registry.enrolled_count(),
            embeddings = registry.total_embeddings(),
            skipped,
            "registry loaded"
        );
        Ok(registry)
    }
}

fn encode_vector(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(row: i64, identity: &str, dim: i64, blob: &[u8]) -> Result<Vec<f32>, RegistryError> {
    let expected = usize::try_from(dim).unwrap_or(0).saturating_mul(4);
    if dim <= 0 || blob.len() != expected {
        return Err(RegistryError::MalformedBlob {
            row,
            identity: identity.to_string(),
            expected,
            actual: blob.len(),
        });
    }
    Ok(blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
