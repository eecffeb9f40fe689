use chrono::Utc;
use pio_types::UnitLabel;

use crate::{datetime_from_row, datetime_to_sql, Store, StoreError};

impl Store {
    /// Set (insert or overwrite) a worker's display label within an
    /// experiment. Labels are per-experiment: the same worker can carry a
    /// different label in each experiment it has run in. An empty-string
    /// label deletes the row instead of storing an empty label.
    pub async fn set_label(&self, experiment: &str, pioreactor_unit: &str, label: &str) -> Result<(), StoreError> {
        if label.is_empty() {
            return self.remove_label(experiment, pioreactor_unit).await;
        }
        let experiment = experiment.to_string();
        let unit = pioreactor_unit.to_string();
        let label = label.to_string();
        let now = datetime_to_sql(Utc::now());
        self.modify(move |conn| {
            conn.execute(
                "INSERT INTO pioreactor_unit_labels (experiment, pioreactor_unit, label, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(experiment, pioreactor_unit) DO UPDATE SET label = excluded.label",
                rusqlite::params![experiment, unit, label, now],
            )
        })
        .await?;
        Ok(())
    }

    pub async fn remove_label(&self, experiment: &str, pioreactor_unit: &str) -> Result<(), StoreError> {
        let experiment = experiment.to_string();
        let unit = pioreactor_unit.to_string();
        self.modify(move |conn| {
            conn.execute(
                "DELETE FROM pioreactor_unit_labels WHERE experiment = ?1 AND pioreactor_unit = ?2",
                rusqlite::params![experiment, unit],
            )
        })
        .await?;
        Ok(())
    }

    pub async fn list_labels(&self, experiment: &str) -> Result<Vec<UnitLabel>, StoreError> {
        let experiment = experiment.to_string();
        self.query(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT experiment, pioreactor_unit, label, created_at
                 FROM pioreactor_unit_labels WHERE experiment = ?1 ORDER BY pioreactor_unit ASC",
            )?;
            let mut rows = stmt.query(rusqlite::params![experiment])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(UnitLabel {
                    experiment: row.get(0)?,
                    pioreactor_unit: row.get(1)?,
                    label: row.get(2)?,
                    created_at: datetime_from_row(row, 3)?,
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

    #[tokio::test]
    async fn set_then_overwrite_then_remove() {
        let store = Store::open_in_memory().await.unwrap();
        store.create_experiment("exp-A", None, None, None).await.unwrap();

        store.set_label("exp-A", "pio01", "control").await.unwrap();
        store.set_label("exp-A", "pio01", "control-v2").await.unwrap();
        let labels = store.list_labels("exp-A").await.unwrap();
        assert_eq!(labels.len(), 1);
        assert_eq!(labels[0].label, "control-v2");

        store.remove_label("exp-A", "pio01").await.unwrap();
        assert!(store.list_labels("exp-A").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn set_label_with_empty_string_deletes() {
        let store = Store::open_in_memory().await.unwrap();
        store.create_experiment("exp-B", None, None, None).await.unwrap();

        store.set_label("exp-B", "pio01", "control").await.unwrap();
        assert_eq!(store.list_labels("exp-B").await.unwrap().len(), 1);

        store.set_label("exp-B", "pio01", "").await.unwrap();
        assert!(store.list_labels("exp-B").await.unwrap().is_empty());

        // deleting an already-absent label is a no-op, not an error
        store.set_label("exp-B", "pio01", "").await.unwrap();
    }
}
