//! SQLite-backed embedding memoization.
//!
//! Rows are keyed by `(model, text)` with exact string equality and store
//! the vector's dimensionality, an element-type tag and the raw
//! little-endian f32 bytes. Every write is committed before returning.
//! One handle must not be shared between concurrent writers.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use super::error::{DedupError, Result};

/// Element-type tag recorded alongside every stored vector.
pub const ELEMENT_TYPE: &str = "float32";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS embeddings (
    model TEXT NOT NULL,
    text TEXT NOT NULL,
    dim INTEGER NOT NULL,
    dtype TEXT NOT NULL,
    blob BLOB NOT NULL,
    PRIMARY KEY (model, text)
);
"#;

/// Persistent `(model, text) -> vector` store.
///
/// Dropping the handle closes it; [`EmbeddingCache::close`] does so
/// explicitly and reports any error.
#[derive(Debug)]
pub struct EmbeddingCache {
    conn: Connection,
    path: Option<PathBuf>,
}

impl EmbeddingCache {
    /// Open or create the cache file at `path`, creating parent
    /// directories and the schema as needed. Idempotent.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        info!(path = %path.display(), "opened embedding cache");
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// A cache that lives only as long as the handle.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn, path: None })
    }

    /// Backing file, or `None` for an in-memory cache.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Exact-match lookup. A miss is `Ok(None)`.
    pub fn get(&self, model: &str, text: &str) -> Result<Option<Vec<f32>>> {
        let row = self
            .conn
            .query_row(
                "SELECT dim, dtype, blob FROM embeddings WHERE model = ?1 AND text = ?2",
                params![model, text],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(dim, dtype, blob)| decode_vector(model, text, dim, &dtype, &blob))
            .transpose()
    }

    /// Upsert: replaces any vector already stored under `(model, text)`.
    pub fn put(&self, model: &str, text: &str, vector: &[f32]) -> Result<()> {
        let dim = i64::try_from(vector.len()).map_err(|_| {
            DedupError::InvalidParameter(format!("vector of length {} is too long", vector.len()))
        })?;
        self.conn.execute(
            "INSERT OR REPLACE INTO embeddings (model, text, dim, dtype, blob) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![model, text, dim, ELEMENT_TYPE, encode_vector(vector)],
        )?;
        Ok(())
    }

    /// Store a wider-precision vector. Elements are cast to f32 on write,
    /// and read back at that precision.
    pub fn put_f64(&self, model: &str, text: &str, vector: &[f64]) -> Result<()> {
        let narrowed: Vec<f32> = vector.iter().map(|v| *v as f32).collect();
        self.put(model, text, &narrowed)
    }

    /// Number of vectors stored for `model`.
    pub fn len_for_model(&self, model: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM embeddings WHERE model = ?1",
            params![model],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Each model present in the cache with its row count, ordered by name.
    pub fn models(&self) -> Result<Vec<(String, usize)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT model, COUNT(*) FROM embeddings GROUP BY model ORDER BY model")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete every vector stored for `model`. Returns the number removed.
    pub fn purge_model(&self, model: &str) -> Result<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM embeddings WHERE model = ?1", params![model])?;
        info!(model, removed, "purged cached embeddings");
        Ok(removed)
    }

    /// Release the underlying connection.
    pub fn close(self) -> Result<()> {
        debug!(path = ?self.path, "closing embedding cache");
        self.conn.close().map_err(|(_, e)| DedupError::Cache(e))
    }

    /// Run `work` against an optional cache, then close the cache whether
    /// or not `work` failed. An error from `work` takes precedence over one
    /// from closing.
    pub fn run_then_close<T, F>(cache: Option<Self>, work: F) -> Result<T>
    where
        F: FnOnce(Option<&Self>) -> Result<T>,
    {
        let outcome = work(cache.as_ref());
        let closed = cache.map(Self::close).transpose();
        let value = outcome?;
        closed?;
        Ok(value)
    }
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(std::mem::size_of_val(vector));
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_vector(model: &str, text: &str, dim: i64, dtype: &str, blob: &[u8]) -> Result<Vec<f32>> {
    if dtype != ELEMENT_TYPE {
        return Err(DedupError::CacheConsistency(format!(
            "entry ({model:?}, {text:?}) has element type {dtype:?}, expected {ELEMENT_TYPE:?}"
        )));
    }
    let expected_len = usize::try_from(dim)
        .ok()
        .and_then(|d| d.checked_mul(std::mem::size_of::<f32>()))
        .ok_or_else(|| {
            DedupError::CacheConsistency(format!(
                "entry ({model:?}, {text:?}) has invalid dimensionality {dim}"
            ))
        })?;
    if blob.len() != expected_len {
        return Err(DedupError::CacheConsistency(format!(
            "entry ({model:?}, {text:?}) holds {} bytes for dimensionality {dim}",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("embeddings.sqlite");
        let vector = vec![1.0_f32, -2.5, 3.25e-7];

        let cache = EmbeddingCache::open(&path).unwrap();
        cache.put("m", "x", &vector).unwrap();
        cache.close().unwrap();

        let cache = EmbeddingCache::open(&path).unwrap();
        let loaded = cache.get("m", "x").unwrap().expect("cached vector");
        assert_eq!(
            loaded.iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
            vector.iter().map(|v| v.to_bits()).collect::<Vec<_>>()
        );
        cache.close().unwrap();
    }

    #[test]
    fn test_miss_is_none() {
        let cache = EmbeddingCache::open_in_memory().unwrap();
        cache.put("m", "x", &[1.0]).unwrap();
        assert_eq!(cache.get("m", "y").unwrap(), None);
        assert_eq!(cache.get("other", "x").unwrap(), None);
    }

    #[test]
    fn test_key_is_exact() {
        let cache = EmbeddingCache::open_in_memory().unwrap();
        cache.put("m", "Cost Overrun", &[1.0]).unwrap();
        assert_eq!(cache.get("m", "cost overrun").unwrap(), None);
        assert_eq!(cache.get("m", "Cost Overrun ").unwrap(), None);
        assert_eq!(cache.get("m", "Cost Overrun").unwrap(), Some(vec![1.0]));
    }

    #[test]
    fn test_put_overwrites() {
        let cache = EmbeddingCache::open_in_memory().unwrap();
        cache.put("m", "x", &[1.0, 2.0]).unwrap();
        cache.put("m", "x", &[3.0, 4.0, 5.0]).unwrap();
        assert_eq!(cache.get("m", "x").unwrap(), Some(vec![3.0, 4.0, 5.0]));
        assert_eq!(cache.len_for_model("m").unwrap(), 1);
    }

    #[test]
    fn test_put_f64_narrows() {
        let cache = EmbeddingCache::open_in_memory().unwrap();
        let wide = [0.1_f64, 1.0 / 3.0];
        cache.put_f64("m", "x", &wide).unwrap();
        assert_eq!(
            cache.get("m", "x").unwrap(),
            Some(vec![0.1_f64 as f32, (1.0_f64 / 3.0) as f32])
        );
    }

    #[test]
    fn test_models_and_purge() {
        let cache = EmbeddingCache::open_in_memory().unwrap();
        cache.put("b", "x", &[1.0]).unwrap();
        cache.put("a", "x", &[1.0]).unwrap();
        cache.put("a", "y", &[1.0]).unwrap();
        assert_eq!(
            cache.models().unwrap(),
            vec![("a".to_string(), 2), ("b".to_string(), 1)]
        );
        assert_eq!(cache.purge_model("a").unwrap(), 2);
        assert_eq!(cache.len_for_model("a").unwrap(), 0);
        assert_eq!(cache.len_for_model("b").unwrap(), 1);
    }

    #[test]
    fn test_foreign_rows_are_inconsistent() {
        let cache = EmbeddingCache::open_in_memory().unwrap();
        cache
            .conn
            .execute(
                "INSERT INTO embeddings (model, text, dim, dtype, blob) VALUES ('m', 'x', 3, 'float32', ?1)",
                params![vec![0u8; 8]],
            )
            .unwrap();
        cache
            .conn
            .execute(
                "INSERT INTO embeddings (model, text, dim, dtype, blob) VALUES ('m', 'y', 1, 'float64', ?1)",
                params![vec![0u8; 8]],
            )
            .unwrap();
        assert!(matches!(
            cache.get("m", "x"),
            Err(DedupError::CacheConsistency(_))
        ));
        assert!(matches!(
            cache.get("m", "y"),
            Err(DedupError::CacheConsistency(_))
        ));
    }

    #[test]
    fn test_run_then_close_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.sqlite");

        let cache = EmbeddingCache::open(&path).unwrap();
        let result: Result<()> = EmbeddingCache::run_then_close(Some(cache), |c| {
            c.unwrap().put("m", "kept", &[1.0, 2.0])?;
            Err(DedupError::InvalidParameter("grouping failed".into()))
        });
        assert!(matches!(result, Err(DedupError::InvalidParameter(_))));

        let reopened = EmbeddingCache::open(&path).unwrap();
        assert_eq!(reopened.get("m", "kept").unwrap(), Some(vec![1.0, 2.0]));
        reopened.close().unwrap();
    }

    #[test]
    fn test_run_then_close_without_cache() {
        let value = EmbeddingCache::run_then_close(None, |c| {
            assert!(c.is_none());
            Ok(7)
        })
        .unwrap();
        assert_eq!(value, 7);
    }
}
