use chrono::Utc;
use pio_types::{Assignment, AssignmentHistoryRow};

use crate::{datetime_from_row, datetime_to_sql, ModifyOutcome, Store, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignResult {
    Assigned,
    /// The worker or experiment named in the assignment doesn't exist.
    UnknownReference,
}

impl Store {
    /// Assign a worker to an experiment. A worker has at most one active
    /// assignment at a time (PK on `pioreactor_unit`); assigning an
    /// already-assigned worker reassigns it and closes out the old
    /// assignment in history.
    pub async fn assign_worker(&self, pioreactor_unit: &str, experiment: &str) -> Result<AssignResult, StoreError> {
        let unit = pioreactor_unit.to_string();
        let experiment = experiment.to_string();
        let now = datetime_to_sql(Utc::now());

        let outcome = self
            .modify(move |conn| {
                let previous: Option<String> = conn
                    .query_row(
                        "SELECT experiment FROM experiment_worker_assignments WHERE pioreactor_unit = ?1",
                        rusqlite::params![unit],
                        |row| row.get(0),
                    )
                    .ok();

                if let Some(prev_experiment) = previous {
                    conn.execute(
                        "UPDATE assignment_history SET unassigned_at = ?1
                         WHERE pioreactor_unit = ?2 AND experiment = ?3 AND unassigned_at IS NULL",
                        rusqlite::params![now, unit, prev_experiment],
                    )?;
                }

                conn.execute(
                    "INSERT INTO experiment_worker_assignments (pioreactor_unit, experiment, assigned_at)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT(pioreactor_unit) DO UPDATE SET experiment = excluded.experiment, assigned_at = excluded.assigned_at",
                    rusqlite::params![unit, experiment, now],
                )?;

                conn.execute(
                    "INSERT INTO assignment_history (pioreactor_unit, experiment, assigned_at, unassigned_at)
                     VALUES (?1, ?2, ?3, NULL)",
                    rusqlite::params![unit, experiment, now],
                )
            })
            .await?;

        Ok(match outcome {
            ModifyOutcome::Applied { .. } => AssignResult::Assigned,
            ModifyOutcome::Conflict => AssignResult::UnknownReference,
        })
    }

    pub async fn unassign_worker(&self, pioreactor_unit: &str) -> Result<(), StoreError> {
        let unit = pioreactor_unit.to_string();
        let now = datetime_to_sql(Utc::now());
        self.modify(move |conn| {
            conn.execute(
                "UPDATE assignment_history SET unassigned_at = ?1
                 WHERE pioreactor_unit = ?2 AND unassigned_at IS NULL",
                rusqlite::params![now, unit],
            )?;
            conn.execute(
                "DELETE FROM experiment_worker_assignments WHERE pioreactor_unit = ?1",
                rusqlite::params![unit],
            )
        })
        .await?;
        Ok(())
    }

    pub async fn get_assignment(&self, pioreactor_unit: &str) -> Result<Option<Assignment>, StoreError> {
        let unit = pioreactor_unit.to_string();
        self.query_one(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT pioreactor_unit, experiment, assigned_at
                 FROM experiment_worker_assignments WHERE pioreactor_unit = ?1",
            )?;
            let mut rows = stmt.query(rusqlite::params![unit])?;
            match rows.next()? {
                Some(row) => Ok(Some(Assignment {
                    pioreactor_unit: row.get(0)?,
                    experiment: row.get(1)?,
                    assigned_at: datetime_from_row(row, 2)?,
                })),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn list_assignments_for_experiment(&self, experiment: &str) -> Result<Vec<Assignment>, StoreError> {
        let experiment = experiment.to_string();
        self.query(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT pioreactor_unit, experiment, assigned_at
                 FROM experiment_worker_assignments WHERE experiment = ?1
                 ORDER BY pioreactor_unit ASC",
            )?;
            let mut rows = stmt.query(rusqlite::params![experiment])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(Assignment {
                    pioreactor_unit: row.get(0)?,
                    experiment: row.get(1)?,
                    assigned_at: datetime_from_row(row, 2)?,
                });
            }
            Ok(out)
        })
        .await
    }

    pub async fn assignment_history(&self, pioreactor_unit: &str) -> Result<Vec<AssignmentHistoryRow>, StoreError> {
        let unit = pioreactor_unit.to_string();
        self.query(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT pioreactor_unit, experiment, assigned_at, unassigned_at
                 FROM assignment_history WHERE pioreactor_unit = ?1
                 ORDER BY assigned_at DESC",
            )?;
            let mut rows = stmt.query(rusqlite::params![unit])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let unassigned_at: Option<String> = row.get(3)?;
                out.push(AssignmentHistoryRow {
                    pioreactor_unit: row.get(0)?,
                    experiment: row.get(1)?,
                    assigned_at: datetime_from_row(row, 2)?,
                    unassigned_at: unassigned_at
                        .map(|s| {
                            chrono::DateTime::parse_from_rfc3339(&s)
                                .map(|dt| dt.with_timezone(&chrono::Utc))
                                .map_err(|e| {
                                    rusqlite::Error::FromSqlConversionFailure(
                                        3,
                                        rusqlite::types::Type::Text,
                                        Box::new(e),
                                    )
                                })
                        })
                        .transpose()?,
                });
            }
            Ok(out)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> Store {
        let store = Store::open_in_memory().await.unwrap();
        store.create_experiment("exp-A", None, None, None).await.unwrap();
        store.create_experiment("exp-B", None, None, None).await.unwrap();
        store.upsert_worker("pio01").await.unwrap();
        store
    }

    #[tokio::test]
    async fn assign_unknown_worker_is_conflict() {
        let store = Store::open_in_memory().await.unwrap();
        store.create_experiment("exp-A", None, None, None).await.unwrap();
        assert_eq!(
            store.assign_worker("ghost", "exp-A").await.unwrap(),
            AssignResult::UnknownReference
        );
    }

    #[tokio::test]
    async fn reassignment_closes_prior_history_row() {
        let store = seeded().await;
        store.assign_worker("pio01", "exp-A").await.unwrap();
        store.assign_worker("pio01", "exp-B").await.unwrap();

        let current = store.get_assignment("pio01").await.unwrap().unwrap();
        assert_eq!(current.experiment, "exp-B");

        let history = store.assignment_history("pio01").await.unwrap();
        assert_eq!(history.len(), 2);
        let closed = history.iter().find(|r| r.experiment == "exp-A").unwrap();
        assert!(closed.unassigned_at.is_some());
        let open = history.iter().find(|r| r.experiment == "exp-B").unwrap();
        assert!(open.unassigned_at.is_none());
    }

    #[tokio::test]
    async fn unassign_clears_current_but_keeps_history() {
        let store = seeded().await;
        store.assign_worker("pio01", "exp-A").await.unwrap();
        store.unassign_worker("pio01").await.unwrap();
        assert!(store.get_assignment("pio01").await.unwrap().is_none());
        assert_eq!(store.assignment_history("pio01").await.unwrap().len(), 1);
    }
}
