//! SQLite-backed relational state: experiments, workers, assignments,
//! labels, logs, and config history. Enforces invariants via foreign keys
//! and unique indexes rather than in application code. See spec.md §4.1.

pub mod assignments;
pub mod configs;
pub mod experiments;
pub mod labels;
pub mod logs;
pub mod timeseries;
pub mod workers;

use std::path::Path;
use std::time::Duration;

use rusqlite::Row;
use tokio_rusqlite::Connection;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// How callers should react to a `modify()` result: the row counts alone do
/// not distinguish "nothing matched" from "constraint violation", so
/// `modify` reports which happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifyOutcome {
    /// The statement committed and affected `rows_affected` rows.
    Applied { rows_affected: usize },
    /// A UNIQUE or FOREIGN KEY constraint rejected the statement.
    Conflict,
}

const MAX_BUSY_RETRIES: u32 = 5;
const BUSY_BACKOFF: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Single SQLite database handle, pooled per request by the API layer
/// (one `Store` is cheap to clone -- `tokio_rusqlite::Connection` is a
/// handle to a background thread owning the real `rusqlite::Connection`).
#[derive(Clone)]
pub struct Store {
    conn: Connection,
}

impl Store {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref()).await?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "
                    PRAGMA foreign_keys = ON;
                    PRAGMA journal_mode = WAL;
                    PRAGMA busy_timeout = 5000;

                    CREATE TABLE IF NOT EXISTS experiments (
                        experiment      TEXT PRIMARY KEY,
                        created_at      TEXT NOT NULL,
                        description     TEXT,
                        media_used      TEXT,
                        organism_used   TEXT
                    );

                    CREATE TABLE IF NOT EXISTS workers (
                        pioreactor_unit TEXT PRIMARY KEY,
                        added_at        TEXT NOT NULL,
                        is_active       INTEGER NOT NULL DEFAULT 1
                    );

                    CREATE TABLE IF NOT EXISTS experiment_worker_assignments (
                        pioreactor_unit TEXT PRIMARY KEY
                            REFERENCES workers(pioreactor_unit) ON DELETE CASCADE,
                        experiment      TEXT NOT NULL
                            REFERENCES experiments(experiment) ON DELETE CASCADE,
                        assigned_at     TEXT NOT NULL
                    );

                    CREATE TABLE IF NOT EXISTS assignment_history (
                        id              INTEGER PRIMARY KEY AUTOINCREMENT,
                        pioreactor_unit TEXT NOT NULL,
                        experiment      TEXT NOT NULL,
                        assigned_at     TEXT NOT NULL,
                        unassigned_at   TEXT
                    );

                    CREATE TABLE IF NOT EXISTS pioreactor_unit_labels (
                        experiment      TEXT NOT NULL
                            REFERENCES experiments(experiment) ON DELETE CASCADE,
                        pioreactor_unit TEXT NOT NULL,
                        label           TEXT NOT NULL,
                        created_at      TEXT NOT NULL,
                        PRIMARY KEY (experiment, pioreactor_unit)
                    );

                    CREATE TABLE IF NOT EXISTS logs (
                        id              INTEGER PRIMARY KEY AUTOINCREMENT,
                        timestamp       TEXT NOT NULL,
                        level           TEXT NOT NULL,
                        pioreactor_unit TEXT NOT NULL,
                        message         TEXT NOT NULL,
                        task            TEXT NOT NULL,
                        experiment      TEXT NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS idx_logs_experiment ON logs(experiment);
                    CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs(timestamp);

                    CREATE TABLE IF NOT EXISTS config_file_history (
                        id         INTEGER PRIMARY KEY AUTOINCREMENT,
                        filename   TEXT NOT NULL,
                        timestamp  TEXT NOT NULL,
                        data       TEXT NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS idx_config_history_filename
                        ON config_file_history(filename);

                    CREATE TABLE IF NOT EXISTS time_series_points (
                        id              INTEGER PRIMARY KEY AUTOINCREMENT,
                        data_source     TEXT NOT NULL,
                        column_name     TEXT NOT NULL,
                        experiment      TEXT NOT NULL,
                        pioreactor_unit TEXT NOT NULL,
                        channel         TEXT,
                        timestamp       TEXT NOT NULL,
                        value           REAL NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS idx_time_series_lookup
                        ON time_series_points(data_source, column_name, experiment, timestamp);

                    CREATE TABLE IF NOT EXISTS dosing_events (
                        id                INTEGER PRIMARY KEY AUTOINCREMENT,
                        pioreactor_unit   TEXT NOT NULL,
                        experiment        TEXT NOT NULL,
                        timestamp         TEXT NOT NULL,
                        event             TEXT NOT NULL,
                        volume_change_ml  REAL NOT NULL,
                        source_of_event   TEXT NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS idx_dosing_events_experiment
                        ON dosing_events(experiment);
                    ",
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::from)
    }

    /// Run a write statement with the busy-retry/backoff discipline from
    /// spec.md §4.1: commits on success, reports [`ModifyOutcome::Conflict`]
    /// on a unique/FK violation (never an error), retries on
    /// `SQLITE_BUSY`/`SQLITE_LOCKED`, and propagates anything else.
    pub(crate) async fn modify<F>(&self, f: F) -> Result<ModifyOutcome, StoreError>
    where
        F: Fn(&rusqlite::Connection) -> rusqlite::Result<usize> + Send + Sync + 'static,
    {
        let f = std::sync::Arc::new(f);
        for attempt in 0..=MAX_BUSY_RETRIES {
            let f = f.clone();
            let outcome = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let result = (f)(&tx);
                    match result {
                        Ok(rows) => {
                            tx.commit()?;
                            Ok(ModifyOutcome::Applied { rows_affected: rows })
                        }
                        Err(rusqlite::Error::SqliteFailure(e, _))
                            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                        {
                            tx.rollback().ok();
                            Ok(ModifyOutcome::Conflict)
                        }
                        Err(e) => Err(e),
                    }
                })
                .await;

            match outcome {
                Ok(outcome) => return Ok(outcome),
                Err(tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(e, _)))
                    if (e.code == rusqlite::ErrorCode::DatabaseBusy
                        || e.code == rusqlite::ErrorCode::DatabaseLocked)
                        && attempt < MAX_BUSY_RETRIES =>
                {
                    tokio::time::sleep(BUSY_BACKOFF).await;
                    continue;
                }
                Err(e) => return Err(StoreError::from(e)),
            }
        }
        unreachable!("loop always returns within MAX_BUSY_RETRIES + 1 iterations")
    }

    /// Run a read statement returning zero or more rows.
    pub(crate) async fn query<T, F>(&self, f: F) -> Result<Vec<T>, StoreError>
    where
        T: Send + 'static,
        F: Fn(&rusqlite::Connection) -> rusqlite::Result<Vec<T>> + Send + 'static,
    {
        self.conn.call(move |conn| (f)(conn)).await.map_err(StoreError::from)
    }

    /// Run a read statement returning at most one row.
    pub(crate) async fn query_one<T, F>(&self, f: F) -> Result<Option<T>, StoreError>
    where
        T: Send + 'static,
        F: Fn(&rusqlite::Connection) -> rusqlite::Result<Option<T>> + Send + 'static,
    {
        self.conn.call(move |conn| (f)(conn)).await.map_err(StoreError::from)
    }
}

pub(crate) fn datetime_to_sql(dt: chrono::DateTime<chrono::Utc>) -> String {
    dt.to_rfc3339()
}

pub(crate) fn datetime_from_row(row: &Row<'_>, idx: usize) -> rusqlite::Result<chrono::DateTime<chrono::Utc>> {
    let s: String = row.get(idx)?;
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}
