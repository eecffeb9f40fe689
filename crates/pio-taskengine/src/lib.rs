//! Durable, priority-ordered task queue with named-lock mutual exclusion.
//! See spec.md §4.5. Backed by its own SQLite file, separate from the
//! relational `Store`, so task churn never contends with experiment/worker
//! reads and writes.

pub mod handler;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::{DashMap, DashSet};
use pio_types::task::{TaskKind, TaskRecord, TaskState};
use tokio::sync::Notify;
use tokio_rusqlite::Connection;
use uuid::Uuid;

pub use handler::{FnTaskHandler, HandlerError, TaskHandler};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("no handler registered for task kind {0:?}")]
    NoHandler(TaskKind),
}

const DEFAULT_WORKER_SLOTS: usize = 4;
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Durable priority queue + consumer pool.
pub struct TaskEngine {
    conn: Connection,
    held_locks: Arc<DashSet<String>>,
    handlers: Arc<DashMap<TaskKind, Arc<dyn TaskHandler>>>,
    notify: Arc<Notify>,
    worker_slots: usize,
}

impl TaskEngine {
    pub async fn open(path: impl AsRef<Path>, worker_slots: Option<usize>) -> Result<Self, EngineError> {
        let conn = Connection::open(path.as_ref()).await?;
        let engine = Self {
            conn,
            held_locks: Arc::new(DashSet::new()),
            handlers: Arc::new(DashMap::new()),
            notify: Arc::new(Notify::new()),
            worker_slots: worker_slots.unwrap_or(DEFAULT_WORKER_SLOTS),
        };
        engine.init_schema().await?;
        Ok(engine)
    }

    pub async fn open_in_memory(worker_slots: Option<usize>) -> Result<Self, EngineError> {
        let conn = Connection::open_in_memory().await?;
        let engine = Self {
            conn,
            held_locks: Arc::new(DashSet::new()),
            handlers: Arc::new(DashMap::new()),
            notify: Arc::new(Notify::new()),
            worker_slots: worker_slots.unwrap_or(DEFAULT_WORKER_SLOTS),
        };
        engine.init_schema().await?;
        Ok(engine)
    }

    async fn init_schema(&self) -> Result<(), EngineError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "
                    PRAGMA journal_mode = WAL;
                    PRAGMA busy_timeout = 5000;

                    CREATE TABLE IF NOT EXISTS tasks (
                        id          TEXT PRIMARY KEY,
                        kind        TEXT NOT NULL,
                        payload     TEXT NOT NULL,
                        priority    INTEGER NOT NULL,
                        lock_name   TEXT,
                        state       TEXT NOT NULL,
                        result      TEXT,
                        error       TEXT,
                        created_at  TEXT NOT NULL,
                        updated_at  TEXT NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS idx_tasks_claim ON tasks(state, priority DESC, created_at ASC);
                    ",
                )?;
                Ok(())
            })
            .await
            .map_err(EngineError::from)
    }

    /// Register the handler that will run every task of `kind`. Must be
    /// called before [`Self::spawn_consumers`].
    pub fn register_handler(&self, kind: TaskKind, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(kind, handler);
    }

    /// Enqueue a task, stamping its priority/lock from [`TaskKind`]'s
    /// defaults, and wake an idle consumer.
    pub async fn enqueue(&self, kind: TaskKind, payload: serde_json::Value) -> Result<String, EngineError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let priority = kind.default_priority();
        let lock_name = kind.lock_name().map(str::to_string);
        let kind_str = serde_json::to_value(kind).ok().and_then(|v| v.as_str().map(str::to_string)).unwrap();
        let payload_str = payload.to_string();

        let id_clone = id.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO tasks (id, kind, payload, priority, lock_name, state, result, error, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, 'pending', NULL, NULL, ?6, ?6)",
                    rusqlite::params![id_clone, kind_str, payload_str, priority, lock_name, now],
                )
            })
            .await?;

        self.notify.notify_one();
        Ok(id)
    }

    pub async fn get_task(&self, id: &str) -> Result<Option<TaskRecord>, EngineError> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, kind, payload, priority, lock_name, state, result, error, created_at, updated_at
                     FROM tasks WHERE id = ?1",
                )?;
                let mut rows = stmt.query(rusqlite::params![id])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_task(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(EngineError::from)
    }

    /// Poll a task until it reaches a terminal state or `timeout` elapses.
    /// Used by endpoints that synchronously await completion (spec.md §5:
    /// `export_datasets` 300 s, `write_config_and_sync` 75 s, etc). Returns
    /// `Ok(None)` if `timeout` elapses before the task finishes.
    pub async fn wait_for_completion(
        &self,
        id: &str,
        timeout: Duration,
    ) -> Result<Option<TaskRecord>, EngineError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let task = self.get_task(id).await?;
            if let Some(task) = &task {
                if matches!(task.state, TaskState::Complete | TaskState::Failed) {
                    return Ok(task.clone().into());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn list_tasks(&self, state: Option<TaskState>) -> Result<Vec<TaskRecord>, EngineError> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, kind, payload, priority, lock_name, state, result, error, created_at, updated_at
                     FROM tasks WHERE (?1 IS NULL OR state = ?1) ORDER BY created_at DESC",
                )?;
                let state_str = state.map(state_to_sql);
                let mut rows = stmt.query(rusqlite::params![state_str])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_task(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(EngineError::from)
    }

    /// Spawn `worker_slots` consumer loops. `self` is wrapped in an `Arc` so
    /// every loop can outlive the caller's stack frame.
    pub fn spawn_consumers(self: &Arc<Self>) {
        for slot in 0..self.worker_slots {
            let engine = self.clone();
            tokio::spawn(async move {
                tracing::info!(slot, "task consumer started");
                loop {
                    match engine.claim_next().await {
                        Ok(Some(task)) => engine.run_task(task).await,
                        Ok(None) => {
                            let _ = tokio::time::timeout(POLL_INTERVAL, engine.notify.notified()).await;
                        }
                        Err(err) => {
                            tracing::error!(error = %err, "task claim failed");
                            tokio::time::sleep(POLL_INTERVAL).await;
                        }
                    }
                }
            });
        }
    }

    /// Pick the highest-priority pending task whose lock (if any) isn't
    /// currently held, mark it running, and reserve its lock in-memory.
    /// `tokio_rusqlite::Connection` serializes all `.call()`s onto one
    /// background thread, so this scan-then-update is race-free without an
    /// explicit SQL-level compare-and-swap.
    async fn claim_next(&self) -> Result<Option<TaskRecord>, EngineError> {
        let held_locks = self.held_locks.clone();
        let candidate = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut stmt = tx.prepare(
                    "SELECT id, kind, payload, priority, lock_name, state, result, error, created_at, updated_at
                     FROM tasks WHERE state = 'pending' ORDER BY priority DESC, created_at ASC",
                )?;
                let mut rows = stmt.query([])?;
                let mut claimed = None;
                while let Some(row) = rows.next()? {
                    let task = row_to_task(row)?;
                    if let Some(lock_name) = &task.lock_name {
                        if held_locks.contains(lock_name) {
                            continue;
                        }
                    }
                    claimed = Some(task);
                    break;
                }
                drop(rows);
                drop(stmt);

                if let Some(task) = &claimed {
                    let now = Utc::now().to_rfc3339();
                    tx.execute(
                        "UPDATE tasks SET state = 'running', updated_at = ?1 WHERE id = ?2",
                        rusqlite::params![now, task.id],
                    )?;
                }
                tx.commit()?;
                Ok(claimed)
            })
            .await?;

        if let Some(task) = &candidate {
            if let Some(lock_name) = &task.lock_name {
                self.held_locks.insert(lock_name.clone());
            }
        }
        Ok(candidate)
    }

    async fn run_task(&self, mut task: TaskRecord) {
        let outcome = match self.handlers.get(&task.kind) {
            Some(handler) => handler.handle(task.payload.clone()).await,
            None => Err(HandlerError::Failed(format!("no handler registered for {:?}", task.kind))),
        };

        task.state = if outcome.is_ok() { TaskState::Complete } else { TaskState::Failed };
        let (result, error) = match outcome {
            Ok(value) => (Some(value), None),
            Err(err) => (None, Some(err.to_string())),
        };

        if let Err(err) = self.finish_task(&task.id, task.state, result, error).await {
            tracing::error!(task_id = %task.id, error = %err, "failed to persist task completion");
        }

        if let Some(lock_name) = &task.lock_name {
            self.held_locks.remove(lock_name);
        }
        self.notify.notify_one();
    }

    async fn finish_task(
        &self,
        id: &str,
        state: TaskState,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<(), EngineError> {
        let id = id.to_string();
        let state_str = state_to_sql(state);
        let result_str = result.map(|v| v.to_string());
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE tasks SET state = ?1, result = ?2, error = ?3, updated_at = ?4 WHERE id = ?5",
                    rusqlite::params![state_str, result_str, error, now, id],
                )
            })
            .await?;
        Ok(())
    }
}

fn state_to_sql(state: TaskState) -> &'static str {
    match state {
        TaskState::Pending => "pending",
        TaskState::Running => "running",
        TaskState::Complete => "complete",
        TaskState::Failed => "failed",
        TaskState::Locked => "locked",
    }
}

fn sql_to_state(s: &str) -> TaskState {
    match s {
        "running" => TaskState::Running,
        "complete" => TaskState::Complete,
        "failed" => TaskState::Failed,
        "locked" => TaskState::Locked,
        _ => TaskState::Pending,
    }
}

fn sql_to_kind(s: &str) -> TaskKind {
    serde_json::from_value(serde_json::Value::String(s.to_string())).unwrap_or(TaskKind::PioRun)
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRecord> {
    let kind_str: String = row.get(1)?;
    let payload_str: String = row.get(2)?;
    let state_str: String = row.get(5)?;
    let result_str: Option<String> = row.get(6)?;
    let created_at: String = row.get(8)?;
    let updated_at: String = row.get(9)?;

    Ok(TaskRecord {
        id: row.get(0)?,
        kind: sql_to_kind(&kind_str),
        payload: serde_json::from_str(&payload_str).unwrap_or(serde_json::Value::Null),
        priority: row.get(3)?,
        lock_name: row.get(4)?,
        state: sql_to_state(&state_str),
        result: result_str.and_then(|s| serde_json::from_str(&s).ok()),
        error: row.get(7)?,
        created_at: parse_rfc3339(&created_at, 8)?,
        updated_at: parse_rfc3339(&updated_at, 9)?,
    })
}

fn parse_rfc3339(s: &str, idx: usize) -> rusqlite::Result<chrono::DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ok_handler() -> Arc<dyn TaskHandler> {
        Arc::new(FnTaskHandler::new(|payload| {
            Box::pin(async move { Ok(payload) })
        }))
    }

    #[tokio::test]
    async fn enqueue_then_consume_marks_complete() {
        let engine = Arc::new(TaskEngine::open_in_memory(Some(1)).await.unwrap());
        engine.register_handler(TaskKind::PioRun, ok_handler());
        engine.spawn_consumers();

        let id = engine.enqueue(TaskKind::PioRun, serde_json::json!({"job": "stirring"})).await.unwrap();

        let mut task = engine.get_task(&id).await.unwrap().unwrap();
        for _ in 0..50 {
            if task.state == TaskState::Complete {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            task = engine.get_task(&id).await.unwrap().unwrap();
        }
        assert_eq!(task.state, TaskState::Complete);
        assert_eq!(task.result, Some(serde_json::json!({"job": "stirring"})));
    }

    #[tokio::test]
    async fn tasks_sharing_a_lock_run_one_at_a_time() {
        let engine = Arc::new(TaskEngine::open_in_memory(Some(4)).await.unwrap());
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_concurrent = Arc::new(AtomicUsize::new(0));

        let concurrent_for_handler = concurrent.clone();
        let max_for_handler = max_concurrent.clone();
        engine.register_handler(
            TaskKind::PioUpdateApp,
            Arc::new(FnTaskHandler::new(move |payload| {
                let concurrent = concurrent_for_handler.clone();
                let max_concurrent = max_for_handler.clone();
                Box::pin(async move {
                    let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                    max_concurrent.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    concurrent.fetch_sub(1, Ordering::SeqCst);
                    Ok(payload)
                })
            })),
        );
        engine.spawn_consumers();

        for _ in 0..3 {
            engine.enqueue(TaskKind::PioUpdateApp, serde_json::json!({})).await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
    }
}
