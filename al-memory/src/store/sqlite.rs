//! sqlite-vec backed vector store.
//!
//! Vectors are stored as little-endian f32 blobs and scored with
//! `vec_distance_cosine` from the sqlite-vec extension, which is registered
//! process-wide on first open. Filters compile to SQL over
//! `json_extract(payload, …)` so `top_k` is exact over matching rows.

use std::collections::BTreeMap;
use std::mem::transmute;
use std::os::raw::c_char;
use std::path::Path;
use std::sync::Once;

use async_trait::async_trait;
use tokio_rusqlite::types as rusqlite_value;
use tokio_rusqlite::{params, params_from_iter};
use tokio_rusqlite::{ffi, Connection, OptionalExtension};

use crate::collections::CollectionName;
use crate::embedder::vector_to_bytes;
use crate::error::MemoryError;
use crate::types::{FieldCondition, Filter, Scalar, SearchHit};

use super::{safe_field_name, NewDocument, VectorStore};

pub struct SqliteVectorStore {
    conn: Connection,
}

impl SqliteVectorStore {
    /// Open (or create) the store at `path`, registering the sqlite-vec
    /// extension and probing `vec_version()` to fail fast on a bad build.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, MemoryError> {
        Self::register_sqlite_vec()?;
        let conn = Connection::open(path)
            .await
            .map_err(|e| MemoryError::StoreUnavailable {
                detail: e.to_string(),
            })?;
        conn.call(|conn| {
            conn.query_row("select vec_version()", [], |row| row.get::<_, String>(0))
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS documents (
                     id INTEGER PRIMARY KEY AUTOINCREMENT,
                     collection TEXT NOT NULL,
                     payload TEXT NOT NULL,
                     content_hash BLOB NOT NULL,
                     embedding BLOB NOT NULL,
                     deleted INTEGER NOT NULL DEFAULT 0
                 );
                 CREATE INDEX IF NOT EXISTS documents_by_collection
                     ON documents(collection, deleted);",
            )
            .map_err(tokio_rusqlite::Error::Rusqlite)?;
            Ok(())
        })
        .await
        .map_err(|e| MemoryError::StoreUnavailable {
            detail: e.to_string(),
        })?;
        Ok(Self { conn })
    }

    fn register_sqlite_vec() -> Result<(), MemoryError> {
        use std::sync::Mutex;

        static INIT: Once = Once::new();
        static INIT_RESULT: Mutex<Option<Result<(), String>>> = Mutex::new(None);

        INIT.call_once(|| {
            let result = unsafe {
                type SqliteExtensionInit = unsafe extern "C" fn(
                    *mut ffi::sqlite3,
                    *mut *mut c_char,
                    *const ffi::sqlite3_api_routines,
                ) -> i32;

                let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
                let init_fn: SqliteExtensionInit =
                    transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
                let rc = ffi::sqlite3_auto_extension(Some(init_fn));
                if rc != 0 {
                    Err(format!("failed to register sqlite-vec extension (code {rc})"))
                } else {
                    Ok(())
                }
            };
            *INIT_RESULT.lock().expect("init result mutex poisoned") = Some(result);
        });

        INIT_RESULT
            .lock()
            .expect("init result mutex poisoned")
            .clone()
            .expect("init was called but result not set")
            .map_err(|detail| MemoryError::StoreUnavailable { detail })
    }

    fn scalar_to_sql(value: &Scalar) -> rusqlite_value::Value {
        match value {
            Scalar::Bool(b) => rusqlite_value::Value::Integer(i64::from(*b)),
            Scalar::Integer(v) => rusqlite_value::Value::Integer(*v),
            Scalar::Float(v) => rusqlite_value::Value::Real(*v),
            Scalar::String(s) => rusqlite_value::Value::Text(s.clone()),
        }
    }

    /// Compile a filter to SQL fragments and their bound parameters.
    fn filter_to_sql(
        filter: &Filter,
    ) -> Result<(String, Vec<rusqlite_value::Value>), MemoryError> {
        let mut clauses = String::new();
        let mut params = Vec::new();
        for (field, condition) in &filter.conditions {
            safe_field_name(field)?;
            let column = format!("json_extract(payload, '$.{field}')");
            match condition {
                FieldCondition::Eq(value) => {
                    clauses.push_str(&format!(" AND {column} = ?"));
                    params.push(Self::scalar_to_sql(value));
                }
                FieldCondition::Ne(value) => {
                    clauses.push_str(&format!(" AND {column} != ?"));
                    params.push(Self::scalar_to_sql(value));
                }
                FieldCondition::In(options) => {
                    if options.is_empty() {
                        clauses.push_str(" AND 0");
                        continue;
                    }
                    let placeholders = vec!["?"; options.len()].join(", ");
                    clauses.push_str(&format!(" AND {column} IN ({placeholders})"));
                    params.extend(options.iter().map(Self::scalar_to_sql));
                }
                FieldCondition::Range { gte, lte, gt, lt } => {
                    for (op, bound) in [(">=", gte), ("<=", lte), (">", gt), ("<", lt)] {
                        if let Some(bound) = bound {
                            clauses.push_str(&format!(" AND {column} {op} ?"));
                            params.push(rusqlite_value::Value::Real(*bound));
                        }
                    }
                }
            }
        }
        Ok((clauses, params))
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn ensure_collection(&self, _collection: CollectionName) -> Result<(), MemoryError> {
        // Collections share one table keyed by name; nothing to create.
        Ok(())
    }

    async fn upsert(
        &self,
        collection: CollectionName,
        docs: Vec<NewDocument>,
    ) -> Result<Vec<u64>, MemoryError> {
        let expected_dim = collection.dimension();
        for doc in &docs {
            if doc.vector.len() != expected_dim {
                return Err(MemoryError::SchemaViolation {
                    detail: format!(
                        "vector dimension {} does not match collection {collection} ({expected_dim})",
                        doc.vector.len()
                    ),
                });
            }
        }
        let name = collection.as_str().to_string();
        let rows: Result<Vec<(String, Vec<u8>, Vec<u8>)>, MemoryError> = docs
            .into_iter()
            .map(|doc| {
                let payload = serde_json::to_string(&doc.payload)?;
                Ok((
                    payload,
                    doc.content_hash.to_vec(),
                    vector_to_bytes(&doc.vector),
                ))
            })
            .collect();
        let rows = rows?;

        self.conn
            .call(move |conn| {
                let tx = conn.transaction().map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut ids = Vec::with_capacity(rows.len());
                {
                    let mut stmt = tx
                        .prepare(
                            "INSERT INTO documents (collection, payload, content_hash, embedding) \
                             VALUES (?, ?, ?, ?)",
                        )
                        .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    for (payload, content_hash, embedding) in rows {
                        stmt.execute(params![
                            name,
                            payload,
                            content_hash,
                            embedding
                        ])
                        .map_err(tokio_rusqlite::Error::Rusqlite)?;
                        ids.push(tx.last_insert_rowid() as u64);
                    }
                }
                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(ids)
            })
            .await
            .map_err(|e| MemoryError::StoreUnavailable {
                detail: e.to_string(),
            })
    }

    async fn search(
        &self,
        collection: CollectionName,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchHit>, MemoryError> {
        if top_k == 0 {
            return Ok(vec![]);
        }
        let (clauses, filter_params) = match filter {
            Some(f) => Self::filter_to_sql(f)?,
            None => (String::new(), vec![]),
        };
        let sql = format!(
            "SELECT id, payload, vec_distance_cosine(embedding, ?) AS dist \
             FROM documents \
             WHERE collection = ? AND deleted = 0{clauses} \
             ORDER BY dist ASC, id ASC \
             LIMIT ?"
        );
        let query_blob = vector_to_bytes(vector);
        let name = collection.as_str().to_string();

        self.conn
            .call(move |conn| {
                let mut params: Vec<rusqlite_value::Value> = Vec::with_capacity(filter_params.len() + 3);
                params.push(rusqlite_value::Value::Blob(query_blob));
                params.push(rusqlite_value::Value::Text(name));
                params.extend(filter_params);
                params.push(rusqlite_value::Value::Integer(top_k as i64));

                let mut stmt = conn.prepare(&sql).map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut rows = stmt
                    .query(params_from_iter(params))
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut hits = Vec::new();
                while let Some(row) = rows.next().map_err(tokio_rusqlite::Error::Rusqlite)? {
                    let id: i64 = row.get(0).map_err(tokio_rusqlite::Error::Rusqlite)?;
                    let payload: String = row.get(1).map_err(tokio_rusqlite::Error::Rusqlite)?;
                    let dist: f64 = row.get(2).map_err(tokio_rusqlite::Error::Rusqlite)?;
                    let payload: BTreeMap<String, Scalar> = serde_json::from_str(&payload)
                        .map_err(|e| {
                            tokio_rusqlite::Error::Other(Box::new(e))
                        })?;
                    hits.push(SearchHit {
                        id: id as u64,
                        score: (1.0 - dist) as f32,
                        payload,
                    });
                }
                Ok(hits)
            })
            .await
            .map_err(|e| MemoryError::StoreUnavailable {
                detail: e.to_string(),
            })
    }

    async fn update_payload(
        &self,
        collection: CollectionName,
        id: u64,
        updates: BTreeMap<String, Scalar>,
    ) -> Result<bool, MemoryError> {
        let name = collection.as_str().to_string();
        self.conn
            .call(move |conn| {
                let existing: Option<String> = conn
                    .query_row(
                        "SELECT payload FROM documents \
                         WHERE collection = ? AND id = ? AND deleted = 0",
                        params![name, id as i64],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let Some(existing) = existing else {
                    return Ok(false);
                };
                let mut payload: BTreeMap<String, Scalar> = serde_json::from_str(&existing)
                    .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?;
                for (field, value) in updates {
                    payload.insert(field, value);
                }
                let payload = serde_json::to_string(&payload)
                    .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?;
                conn.execute(
                    "UPDATE documents SET payload = ? WHERE collection = ? AND id = ?",
                    params![payload, name, id as i64],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(true)
            })
            .await
            .map_err(|e| MemoryError::StoreUnavailable {
                detail: e.to_string(),
            })
    }

    async fn delete(&self, collection: CollectionName, id: u64) -> Result<bool, MemoryError> {
        let name = collection.as_str().to_string();
        self.conn
            .call(move |conn| {
                let affected = conn
                    .execute(
                        "UPDATE documents SET deleted = 1 \
                         WHERE collection = ? AND id = ? AND deleted = 0",
                        params![name, id as i64],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(affected > 0)
            })
            .await
            .map_err(|e| MemoryError::StoreUnavailable {
                detail: e.to_string(),
            })
    }

    async fn count(&self, collection: CollectionName) -> Result<u64, MemoryError> {
        let name = collection.as_str().to_string();
        self.conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM documents WHERE collection = ? AND deleted = 0",
                    params![name],
                    |row| row.get::<_, i64>(0),
                )
                .map(|n| n as u64)
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await
            .map_err(|e| MemoryError::StoreUnavailable {
                detail: e.to_string(),
            })
    }

    async fn healthy(&self) -> bool {
        self.conn
            .call(|conn| {
                conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                    .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await
            .is_ok()
    }
}
