//! Durable storage for workflow histories.
//!
//! Two backends behind one trait: an in-memory store for tests and
//! development, and a SQLite store for durable deployments. Both assign
//! strictly increasing `seq` numbers per execution and treat history as
//! append-only.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use sqlx::Row;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::instrument;

use super::history::{Event, EventKind, ExecutionRecord, WorkflowExecution, WorkflowStatus};

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("history backend error: {0}")]
    #[diagnostic(
        code(agentloom::workflow::store_backend),
        help("Check the history database URL and filesystem permissions.")
    )]
    Backend(String),

    #[error("history serialization error: {0}")]
    #[diagnostic(code(agentloom::workflow::store_serde))]
    Serde(String),

    #[error("execution not found: {workflow_id}")]
    #[diagnostic(code(agentloom::workflow::store_not_found))]
    NotFound { workflow_id: String },
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serde(e.to_string())
    }
}

/// Append-only persistence for executions and their event histories.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Persist a new execution record (status `Running`, empty history).
    async fn create_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError>;

    /// Append one event; the store assigns and returns the next `seq`.
    async fn append_event(
        &self,
        workflow_id: &str,
        run_id: &str,
        event: Event,
    ) -> Result<u64, StoreError>;

    /// Load the most recent run of `workflow_id` with its full history.
    async fn load_latest(&self, workflow_id: &str)
        -> Result<Option<WorkflowExecution>, StoreError>;

    /// Update the status (and optionally the close time) of an execution.
    async fn update_status(
        &self,
        workflow_id: &str,
        run_id: &str,
        status: WorkflowStatus,
        closed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// All executions currently in the given status.
    async fn list_by_status(
        &self,
        status: WorkflowStatus,
    ) -> Result<Vec<ExecutionRecord>, StoreError>;

    /// Liveness probe for the status surface.
    async fn healthy(&self) -> bool {
        true
    }
}

/// Volatile store for tests and development.
#[derive(Default)]
pub struct InMemoryHistoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    records: HashMap<String, Vec<ExecutionRecord>>,
    events: HashMap<(String, String), Vec<Event>>,
}

impl InMemoryHistoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn create_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner
            .records
            .entry(record.workflow_id.clone())
            .or_default()
            .push(record.clone());
        inner
            .events
            .insert((record.workflow_id.clone(), record.run_id.clone()), vec![]);
        Ok(())
    }

    async fn append_event(
        &self,
        workflow_id: &str,
        run_id: &str,
        mut event: Event,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        let events = inner
            .events
            .get_mut(&(workflow_id.to_string(), run_id.to_string()))
            .ok_or_else(|| StoreError::NotFound {
                workflow_id: workflow_id.to_string(),
            })?;
        let seq = events.len() as u64 + 1;
        event.seq = seq;
        events.push(event);
        Ok(seq)
    }

    async fn load_latest(
        &self,
        workflow_id: &str,
    ) -> Result<Option<WorkflowExecution>, StoreError> {
        let inner = self.inner.lock().await;
        let Some(runs) = inner.records.get(workflow_id) else {
            return Ok(None);
        };
        let Some(record) = runs.last().cloned() else {
            return Ok(None);
        };
        let history = inner
            .events
            .get(&(record.workflow_id.clone(), record.run_id.clone()))
            .cloned()
            .unwrap_or_default();
        Ok(Some(WorkflowExecution { record, history }))
    }

    async fn update_status(
        &self,
        workflow_id: &str,
        run_id: &str,
        status: WorkflowStatus,
        closed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let runs = inner
            .records
            .get_mut(workflow_id)
            .ok_or_else(|| StoreError::NotFound {
                workflow_id: workflow_id.to_string(),
            })?;
        let record = runs
            .iter_mut()
            .find(|r| r.run_id == run_id)
            .ok_or_else(|| StoreError::NotFound {
                workflow_id: workflow_id.to_string(),
            })?;
        record.status = status;
        record.closed_at = closed_at;
        Ok(())
    }

    async fn list_by_status(
        &self,
        status: WorkflowStatus,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let inner = self.inner.lock().await;
        let mut out: Vec<ExecutionRecord> = inner
            .records
            .values()
            .filter_map(|runs| runs.last())
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(out)
    }
}

/// SQLite-backed store. Schema is bootstrapped on connect; histories grow
/// with `executions × events`, so long-lived deployments should prune
/// closed executions past their retention window.
pub struct SqliteHistoryStore {
    pool: Arc<SqlitePool>,
}

impl std::fmt::Debug for SqliteHistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteHistoryStore").finish()
    }
}

impl SqliteHistoryStore {
    /// Connect (or create) a SQLite database at `database_url`,
    /// e.g. `sqlite://agentloom.db`.
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StoreError::Backend(format!("invalid database url: {e}")))?
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                workflow_id   TEXT NOT NULL,
                run_id        TEXT NOT NULL,
                workflow_type TEXT NOT NULL,
                input_json    TEXT NOT NULL,
                status        TEXT NOT NULL,
                started_at    TEXT NOT NULL,
                closed_at     TEXT,
                PRIMARY KEY (workflow_id, run_id)
            )
            "#,
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                workflow_id  TEXT NOT NULL,
                run_id       TEXT NOT NULL,
                seq          INTEGER NOT NULL,
                kind         TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                timestamp    TEXT NOT NULL,
                PRIMARY KEY (workflow_id, run_id, seq)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<ExecutionRecord, StoreError> {
        let status: String = row.get("status");
        let started_at: String = row.get("started_at");
        let closed_at: Option<String> = row.get("closed_at");
        let input_json: String = row.get("input_json");
        Ok(ExecutionRecord {
            workflow_id: row.get("workflow_id"),
            run_id: row.get("run_id"),
            workflow_type: row.get("workflow_type"),
            input: serde_json::from_str(&input_json)?,
            status: WorkflowStatus::parse(&status)
                .ok_or_else(|| StoreError::Serde(format!("unknown status: {status}")))?,
            started_at: parse_timestamp(&started_at)?,
            closed_at: closed_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Serde(format!("bad timestamp {s}: {e}")))
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    #[instrument(skip(self, record), err)]
    async fn create_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO executions \
             (workflow_id, run_id, workflow_type, input_json, status, started_at, closed_at) \
             VALUES (?, ?, ?, ?, ?, ?, NULL)",
        )
        .bind(&record.workflow_id)
        .bind(&record.run_id)
        .bind(&record.workflow_type)
        .bind(serde_json::to_string(&record.input)?)
        .bind(record.status.as_str())
        .bind(record.started_at.to_rfc3339())
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self, event), err)]
    async fn append_event(
        &self,
        workflow_id: &str,
        run_id: &str,
        event: Event,
    ) -> Result<u64, StoreError> {
        let row = sqlx::query(
            "INSERT INTO events (workflow_id, run_id, seq, kind, payload_json, timestamp) \
             VALUES (?, ?, \
               (SELECT COALESCE(MAX(seq), 0) + 1 FROM events WHERE workflow_id = ? AND run_id = ?), \
               ?, ?, ?) \
             RETURNING seq",
        )
        .bind(workflow_id)
        .bind(run_id)
        .bind(workflow_id)
        .bind(run_id)
        .bind(event.kind.as_str())
        .bind(serde_json::to_string(&event.payload)?)
        .bind(event.timestamp.to_rfc3339())
        .fetch_one(&*self.pool)
        .await?;
        let seq: i64 = row.get("seq");
        Ok(seq as u64)
    }

    #[instrument(skip(self), err)]
    async fn load_latest(
        &self,
        workflow_id: &str,
    ) -> Result<Option<WorkflowExecution>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM executions WHERE workflow_id = ? ORDER BY started_at DESC, run_id DESC LIMIT 1",
        )
        .bind(workflow_id)
        .fetch_optional(&*self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let record = Self::row_to_record(&row)?;

        let rows = sqlx::query(
            "SELECT seq, kind, payload_json, timestamp FROM events \
             WHERE workflow_id = ? AND run_id = ? ORDER BY seq ASC",
        )
        .bind(&record.workflow_id)
        .bind(&record.run_id)
        .fetch_all(&*self.pool)
        .await?;

        let mut history = Vec::with_capacity(rows.len());
        for row in rows {
            let seq: i64 = row.get("seq");
            let kind: String = row.get("kind");
            let payload_json: String = row.get("payload_json");
            let timestamp: String = row.get("timestamp");
            history.push(Event {
                seq: seq as u64,
                kind: EventKind::parse(&kind)
                    .ok_or_else(|| StoreError::Serde(format!("unknown event kind: {kind}")))?,
                payload: serde_json::from_str(&payload_json)?,
                timestamp: parse_timestamp(&timestamp)?,
            });
        }
        Ok(Some(WorkflowExecution { record, history }))
    }

    #[instrument(skip(self), err)]
    async fn update_status(
        &self,
        workflow_id: &str,
        run_id: &str,
        status: WorkflowStatus,
        closed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE executions SET status = ?, closed_at = ? WHERE workflow_id = ? AND run_id = ?",
        )
        .bind(status.as_str())
        .bind(closed_at.map(|t| t.to_rfc3339()))
        .bind(workflow_id)
        .bind(run_id)
        .execute(&*self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                workflow_id: workflow_id.to_string(),
            });
        }
        Ok(())
    }

    async fn list_by_status(
        &self,
        status: WorkflowStatus,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM executions WHERE status = ? ORDER BY started_at ASC")
            .bind(status.as_str())
            .fetch_all(&*self.pool)
            .await?;
        rows.iter().map(Self::row_to_record).collect()
    }

    async fn healthy(&self) -> bool {
        sqlx::query("SELECT 1")
            .fetch_one(&*self.pool)
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(workflow_id: &str, run_id: &str) -> ExecutionRecord {
        ExecutionRecord {
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
            workflow_type: "test".into(),
            input: json!({"n": 1}),
            status: WorkflowStatus::Running,
            started_at: Utc::now(),
            closed_at: None,
        }
    }

    #[tokio::test]
    async fn memory_store_assigns_increasing_seq() {
        let store = InMemoryHistoryStore::new();
        store.create_execution(&record("w1", "r1")).await.unwrap();
        let s1 = store
            .append_event("w1", "r1", Event::new(EventKind::WorkflowStarted, json!({})))
            .await
            .unwrap();
        let s2 = store
            .append_event(
                "w1",
                "r1",
                Event::new(EventKind::ActivityScheduled, json!({"index": 0})),
            )
            .await
            .unwrap();
        assert_eq!((s1, s2), (1, 2));

        let loaded = store.load_latest("w1").await.unwrap().unwrap();
        assert_eq!(loaded.history.len(), 2);
        assert!(loaded.history.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    #[tokio::test]
    async fn memory_store_status_transitions() {
        let store = InMemoryHistoryStore::new();
        store.create_execution(&record("w1", "r1")).await.unwrap();
        assert_eq!(
            store
                .list_by_status(WorkflowStatus::Running)
                .await
                .unwrap()
                .len(),
            1
        );
        store
            .update_status("w1", "r1", WorkflowStatus::Completed, Some(Utc::now()))
            .await
            .unwrap();
        assert!(store
            .list_by_status(WorkflowStatus::Running)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn sqlite_store_round_trips_history() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}/history.db", dir.path().display());
        let store = SqliteHistoryStore::connect(&url).await.unwrap();

        store.create_execution(&record("w1", "r1")).await.unwrap();
        store
            .append_event(
                "w1",
                "r1",
                Event::new(EventKind::WorkflowStarted, json!({"workflow_type": "test"})),
            )
            .await
            .unwrap();
        store
            .append_event(
                "w1",
                "r1",
                Event::new(
                    EventKind::ActivityCompleted,
                    json!({"index": 0, "result": {"ok": true}}),
                ),
            )
            .await
            .unwrap();

        let loaded = store.load_latest("w1").await.unwrap().unwrap();
        assert_eq!(loaded.history.len(), 2);
        assert_eq!(loaded.history[1].payload["result"]["ok"], json!(true));
        assert_eq!(loaded.history[1].seq, 2);
        assert!(store.healthy().await);
    }
}
