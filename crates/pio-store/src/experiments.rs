use chrono::Utc;
use pio_types::Experiment;

use crate::{datetime_from_row, datetime_to_sql, ModifyOutcome, Store, StoreError};

/// Create/read/update/delete outcomes for an [`Experiment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteResult {
    Created,
    AlreadyExists,
    NotFound,
}

impl Store {
    /// Insert a new experiment, stamping `created_at = now`.
    ///
    /// Name validation is the caller's responsibility (spec.md §4.1 keeps
    /// validation at the API boundary, not in the Store).
    pub async fn create_experiment(
        &self,
        experiment: &str,
        description: Option<String>,
        media_used: Option<String>,
        organism_used: Option<String>,
    ) -> Result<WriteResult, StoreError> {
        let experiment = experiment.to_string();
        let created_at = datetime_to_sql(Utc::now());
        let outcome = self
            .modify(move |conn| {
                conn.execute(
                    "INSERT INTO experiments (experiment, created_at, description, media_used, organism_used)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![experiment, created_at, description, media_used, organism_used],
                )
            })
            .await?;
        Ok(match outcome {
            ModifyOutcome::Applied { .. } => WriteResult::Created,
            ModifyOutcome::Conflict => WriteResult::AlreadyExists,
        })
    }

    pub async fn get_experiment(&self, experiment: &str) -> Result<Option<Experiment>, StoreError> {
        let experiment = experiment.to_string();
        self.query_one(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT experiment, created_at, description, media_used, organism_used
                 FROM experiments WHERE experiment = ?1",
            )?;
            let mut rows = stmt.query(rusqlite::params![experiment])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_experiment(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn list_experiments(&self) -> Result<Vec<Experiment>, StoreError> {
        self.query(|conn| {
            let mut stmt = conn.prepare(
                "SELECT experiment, created_at, description, media_used, organism_used
                 FROM experiments ORDER BY created_at DESC",
            )?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_experiment(row)?);
            }
            Ok(out)
        })
        .await
    }

    /// The most recently created experiment, i.e. the "latest" virtual view.
    pub async fn latest_experiment(&self) -> Result<Option<Experiment>, StoreError> {
        self.query_one(|conn| {
            let mut stmt = conn.prepare(
                "SELECT experiment, created_at, description, media_used, organism_used
                 FROM experiments ORDER BY created_at DESC LIMIT 1",
            )?;
            let mut rows = stmt.query([])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_experiment(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn update_experiment_description(
        &self,
        experiment: &str,
        description: String,
    ) -> Result<WriteResult, StoreError> {
        let experiment = experiment.to_string();
        let outcome = self
            .modify(move |conn| {
                conn.execute(
                    "UPDATE experiments SET description = ?1 WHERE experiment = ?2",
                    rusqlite::params![description, experiment],
                )
            })
            .await?;
        Ok(match outcome {
            ModifyOutcome::Applied { rows_affected } if rows_affected > 0 => WriteResult::Created,
            _ => WriteResult::NotFound,
        })
    }

    /// Delete an experiment. Cascades to assignments/labels via FK; logs are
    /// not FK-constrained (they outlive experiments for audit purposes) but
    /// are filtered out of normal reads once the experiment is gone.
    pub async fn delete_experiment(&self, experiment: &str) -> Result<WriteResult, StoreError> {
        let experiment = experiment.to_string();
        let outcome = self
            .modify(move |conn| {
                conn.execute("DELETE FROM experiments WHERE experiment = ?1", rusqlite::params![experiment])
            })
            .await?;
        Ok(match outcome {
            ModifyOutcome::Applied { rows_affected } if rows_affected > 0 => WriteResult::Created,
            _ => WriteResult::NotFound,
        })
    }
}

fn row_to_experiment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Experiment> {
    Ok(Experiment {
        experiment: row.get(0)?,
        created_at: datetime_from_row(row, 1)?,
        description: row.get(2)?,
        media_used: row.get(3)?,
        organism_used: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_delete_cascades_and_yields_not_found() {
        let store = Store::open_in_memory().await.unwrap();
        assert_eq!(
            store.create_experiment("exp-A", None, None, None).await.unwrap(),
            WriteResult::Created
        );
        store.upsert_worker("pio01").await.unwrap();
        store.assign_worker("pio01", "exp-A").await.unwrap();

        assert_eq!(store.delete_experiment("exp-A").await.unwrap(), WriteResult::Created);
        assert!(store.get_experiment("exp-A").await.unwrap().is_none());
        assert!(store.get_assignment("pio01").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_create_is_conflict() {
        let store = Store::open_in_memory().await.unwrap();
        store.create_experiment("exp-A", None, None, None).await.unwrap();
        assert_eq!(
            store.create_experiment("exp-A", None, None, None).await.unwrap(),
            WriteResult::AlreadyExists
        );
    }
}
