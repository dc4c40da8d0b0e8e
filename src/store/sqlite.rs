use ndarray::Array2;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use std::path::Path;

use super::schema;
use crate::error::{Result, RetrievalError};

/// SQLite file backing a persisted vector index.
pub struct IndexStore {
    conn: Connection,
}

/// Everything needed to rebuild an index in memory.
pub struct StoredIndex {
    pub kind: String,
    pub dimension: usize,
    pub ids: Vec<i64>,
    pub matrix: Array2<f32>,
}

impl IndexStore {
    /// Create (or reuse) a database at `path` and make sure the schema exists.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        schema::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Open an existing index file read-only.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RetrievalError::IndexNotFound(path.to_path_buf()));
        }
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Self { conn })
    }

    /// Replace the stored index with `ids`/`matrix` in one transaction.
    pub fn write(&mut self, kind: &str, ids: &[i64], matrix: &Array2<f32>) -> Result<()> {
        let dimension = matrix.ncols();
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM vectors", [])?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO vectors (slot, movie_id, vector) VALUES (?1, ?2, ?3)")?;
            for (slot, (id, row)) in ids.iter().zip(matrix.rows()).enumerate() {
                let mut blob = Vec::with_capacity(dimension * 4);
                for x in row.iter() {
                    blob.extend_from_slice(&x.to_le_bytes());
                }
                stmt.execute(params![slot as i64, id, blob])?;
            }
        }
        let mut meta = tx.prepare("INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)")?;
        meta.execute(params!["kind", kind])?;
        meta.execute(params!["dimension", dimension.to_string()])?;
        meta.execute(params!["count", ids.len().to_string()])?;
        meta.execute(params!["built_at", chrono::Utc::now().to_rfc3339()])?;
        drop(meta);
        tx.commit()?;
        Ok(())
    }

    fn meta_value(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = self
            .conn
            .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |r| {
                r.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn meta_usize(&self, key: &str) -> Result<usize> {
        let raw = self
            .meta_value(key)?
            .ok_or_else(|| RetrievalError::corrupt(format!("index metadata lacks {key}")))?;
        raw.parse::<usize>().map_err(|_| {
            RetrievalError::corrupt(format!("index metadata {key}={raw:?} is not a count"))
        })
    }

    pub fn read(&self) -> Result<StoredIndex> {
        let dimension = self.meta_usize("dimension")?;
        let count = self.meta_usize("count")?;
        let kind = self.meta_value("kind")?.unwrap_or_else(|| "flat-ip".to_string());

        let stored: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM vectors", [], |r| r.get(0))?;
        if usize::try_from(stored).ok() != Some(count) {
            return Err(RetrievalError::corrupt(format!(
                "index metadata says {count} vectors, file holds {stored}"
            )));
        }
        let row_bytes = dimension.checked_mul(4).ok_or_else(|| {
            RetrievalError::corrupt(format!("index dimension {dimension} overflows"))
        })?;

        let mut stmt = self
            .conn
            .prepare("SELECT slot, movie_id, vector FROM vectors ORDER BY slot")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;

        // Only `count` is trusted for preallocation, and only after the check above.
        let mut ids = Vec::with_capacity(count);
        let mut data = Vec::new();
        for (expected_slot, row) in rows.enumerate() {
            let (slot, id, blob) = row?;
            if slot != expected_slot as i64 {
                return Err(RetrievalError::corrupt(format!(
                    "index slot {slot} found where {expected_slot} expected"
                )));
            }
            if blob.len() != row_bytes {
                return Err(RetrievalError::corrupt(format!(
                    "vector for movie {id} has {} bytes, expected {row_bytes}",
                    blob.len()
                )));
            }
            ids.push(id);
            data.extend(blob.chunks_exact(4).map(|c| {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(c);
                f32::from_le_bytes(buf)
            }));
        }

        let matrix = Array2::from_shape_vec((ids.len(), dimension), data)
            .map_err(|e| RetrievalError::corrupt(e.to_string()))?;
        Ok(StoredIndex {
            kind,
            dimension,
            ids,
            matrix,
        })
    }
}
