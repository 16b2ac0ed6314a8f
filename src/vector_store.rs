//! Persisted vector stores.
//!
//! Each store is one SQLite file, `<dir>/<store_id>.sqlite`, holding a
//! `meta` key/value table and an `entries` table in insertion order.
//! Vectors are little-endian `f32` BLOBs and round-trip bit-exactly.
//!
//! Saving writes `<store_id>.sqlite.partial` in a single transaction, closes
//! it, and renames it over the final path. Readers therefore see either the
//! previous store or the complete new one; a `.partial` file is never read.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use sqlx::Row;

use docchat_core::embedding::{blob_to_vec, vec_to_blob};
use docchat_core::index::{IndexEntry, VectorIndex};
use docchat_core::models::Chunk;
use docchat_core::EmbeddingSpace;

use crate::db;
use crate::error::{Error, Result};

const FORMAT_VERSION: &str = "1";

/// Store ids become file names, so only `[A-Za-z0-9_-]` is allowed.
pub fn validate_store_id(store_id: &str) -> Result<()> {
    if store_id.is_empty() {
        return Err(Error::config("store id must not be empty"));
    }
    if !store_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::config(format!(
            "store id '{}' may only contain letters, digits, '-' and '_'",
            store_id
        )));
    }
    Ok(())
}

/// Directory of persisted indexes.
#[derive(Debug, Clone)]
pub struct VectorStore {
    dir: PathBuf,
}

impl VectorStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self, store_id: &str) -> PathBuf {
        self.dir.join(format!("{}.sqlite", store_id))
    }

    fn partial_path(&self, store_id: &str) -> PathBuf {
        self.dir.join(format!("{}.sqlite.partial", store_id))
    }

    pub fn exists(&self, store_id: &str) -> bool {
        validate_store_id(store_id).is_ok() && self.path(store_id).is_file()
    }

    /// Atomically replace the store `store_id` with `index`.
    pub async fn save(&self, store_id: &str, index: &VectorIndex) -> Result<()> {
        validate_store_id(store_id)?;
        let partial = self.partial_path(store_id);
        remove_if_present(&partial).await?;

        let pool = db::connect(&partial, true).await?;

        sqlx::query(
            r#"
            CREATE TABLE meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE entries (
                position INTEGER PRIMARY KEY,
                chunk_id TEXT NOT NULL,
                origin TEXT NOT NULL,
                ordinal INTEGER NOT NULL,
                text TEXT NOT NULL,
                hash TEXT NOT NULL,
                metadata_json TEXT NOT NULL DEFAULT '{}',
                vector BLOB NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        let mut tx = pool.begin().await?;

        let space = index.space();
        let meta = [
            ("format_version", FORMAT_VERSION.to_string()),
            ("model", space.model.clone()),
            ("dims", space.dims.to_string()),
            ("chunk_count", index.len().to_string()),
            ("created_at", chrono::Utc::now().to_rfc3339()),
        ];
        for (key, value) in meta {
            sqlx::query("INSERT INTO meta (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }

        for (position, entry) in index.entries().iter().enumerate() {
            let chunk = &entry.chunk;
            sqlx::query(
                "INSERT INTO entries (position, chunk_id, origin, ordinal, text, hash, metadata_json, vector) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(position as i64)
            .bind(&chunk.id)
            .bind(&chunk.origin)
            .bind(chunk.ordinal as i64)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .bind(serde_json::to_string(&chunk.metadata)?)
            .bind(vec_to_blob(&entry.vector))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        pool.close().await;

        tokio::fs::rename(&partial, self.path(store_id)).await?;
        tracing::info!(
            "saved index '{}' ({} chunks, {})",
            store_id,
            index.len(),
            space
        );
        Ok(())
    }

    /// Load the store `store_id` in its original insertion order.
    pub async fn load(&self, store_id: &str) -> Result<VectorIndex> {
        validate_store_id(store_id)?;
        let path = self.path(store_id);
        if !path.is_file() {
            return Err(Error::StoreNotFound(store_id.to_string()));
        }

        let pool = db::connect(&path, false).await?;

        let meta: HashMap<String, String> = sqlx::query("SELECT key, value FROM meta")
            .fetch_all(&pool)
            .await?
            .iter()
            .map(|row| (row.get("key"), row.get("value")))
            .collect();

        let model = meta
            .get("model")
            .cloned()
            .ok_or_else(|| Error::StoreCorrupt(format!("{}: missing model", store_id)))?;
        let dims = parse_meta(&meta, "dims", store_id)?;
        let chunk_count = parse_meta(&meta, "chunk_count", store_id)?;

        let rows = sqlx::query(
            "SELECT chunk_id, origin, ordinal, text, hash, metadata_json, vector \
             FROM entries ORDER BY position",
        )
        .fetch_all(&pool)
        .await?;
        pool.close().await;

        if rows.len() != chunk_count {
            return Err(Error::StoreCorrupt(format!(
                "{}: meta lists {} chunks, found {}",
                store_id,
                chunk_count,
                rows.len()
            )));
        }

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            let ordinal: i64 = row.get("ordinal");
            let metadata_json: String = row.get("metadata_json");
            let metadata: BTreeMap<String, String> = serde_json::from_str(&metadata_json)
                .map_err(|e| Error::StoreCorrupt(format!("{}: {}", store_id, e)))?;
            let blob: Vec<u8> = row.get("vector");
            if blob.len() != dims * 4 {
                return Err(Error::StoreCorrupt(format!(
                    "{}: vector of {} bytes, expected {}",
                    store_id,
                    blob.len(),
                    dims * 4
                )));
            }
            entries.push(IndexEntry {
                chunk: Chunk {
                    id: row.get("chunk_id"),
                    origin: row.get("origin"),
                    ordinal: u32::try_from(ordinal)
                        .map_err(|_| Error::StoreCorrupt(format!("{}: bad ordinal", store_id)))?,
                    text: row.get("text"),
                    hash: row.get("hash"),
                    metadata,
                },
                vector: blob_to_vec(&blob),
            });
        }

        let index = VectorIndex::from_entries(EmbeddingSpace::new(model, dims), entries)
            .map_err(|e| Error::StoreCorrupt(format!("{}: {}", store_id, e)))?;
        tracing::debug!("loaded index '{}' ({} chunks)", store_id, index.len());
        Ok(index)
    }

    pub async fn remove(&self, store_id: &str) -> Result<()> {
        validate_store_id(store_id)?;
        remove_if_present(&self.partial_path(store_id)).await?;
        remove_if_present(&self.path(store_id)).await
    }
}

fn parse_meta(meta: &HashMap<String, String>, key: &str, store_id: &str) -> Result<usize> {
    meta.get(key)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| Error::StoreCorrupt(format!("{}: missing or invalid {}", store_id, key)))
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
