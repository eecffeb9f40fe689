use chrono::Utc;
use pio_types::Worker;

use crate::{datetime_from_row, datetime_to_sql, Store, StoreError};

impl Store {
    /// Register a worker if absent, or reactivate it if it had been
    /// soft-deleted. Idempotent by design -- re-adding an existing worker is
    /// not an error.
    pub async fn upsert_worker(&self, pioreactor_unit: &str) -> Result<(), StoreError> {
        let unit = pioreactor_unit.to_string();
        let added_at = datetime_to_sql(Utc::now());
        self.modify(move |conn| {
            conn.execute(
                "INSERT INTO workers (pioreactor_unit, added_at, is_active) VALUES (?1, ?2, 1)
                 ON CONFLICT(pioreactor_unit) DO UPDATE SET is_active = 1",
                rusqlite::params![unit, added_at],
            )
        })
        .await?;
        Ok(())
    }

    pub async fn get_worker(&self, pioreactor_unit: &str) -> Result<Option<Worker>, StoreError> {
        let unit = pioreactor_unit.to_string();
        self.query_one(move |conn| {
            let mut stmt =
                conn.prepare("SELECT pioreactor_unit, added_at, is_active FROM workers WHERE pioreactor_unit = ?1")?;
            let mut rows = stmt.query(rusqlite::params![unit])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_worker(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn list_workers(&self) -> Result<Vec<Worker>, StoreError> {
        self.query(|conn| {
            let mut stmt =
                conn.prepare("SELECT pioreactor_unit, added_at, is_active FROM workers ORDER BY added_at ASC")?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_worker(row)?);
            }
            Ok(out)
        })
        .await
    }

    /// Soft-delete: the worker row stays (assignment history references it)
    /// but it's excluded from active-worker listings and fanout targets.
    pub async fn deactivate_worker(&self, pioreactor_unit: &str) -> Result<(), StoreError> {
        let unit = pioreactor_unit.to_string();
        self.modify(move |conn| {
            conn.execute(
                "UPDATE workers SET is_active = 0 WHERE pioreactor_unit = ?1",
                rusqlite::params![unit],
            )
        })
        .await?;
        Ok(())
    }

    pub async fn remove_worker(&self, pioreactor_unit: &str) -> Result<(), StoreError> {
        let unit = pioreactor_unit.to_string();
        self.modify(move |conn| conn.execute("DELETE FROM workers WHERE pioreactor_unit = ?1", rusqlite::params![unit]))
            .await?;
        Ok(())
    }

    pub(crate) async fn worker_is_active(&self, pioreactor_unit: &str) -> Result<bool, StoreError> {
        Ok(self
            .get_worker(pioreactor_unit)
            .await?
            .map(|w| w.is_active)
            .unwrap_or(false))
    }
}

fn row_to_worker(row: &rusqlite::Row<'_>) -> rusqlite::Result<Worker> {
    Ok(Worker {
        pioreactor_unit: row.get(0)?,
        added_at: datetime_from_row(row, 1)?,
        is_active: row.get::<_, i64>(2)? != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_is_idempotent_and_reactivates() {
        let store = Store::open_in_memory().await.unwrap();
        store.upsert_worker("pio01").await.unwrap();
        store.deactivate_worker("pio01").await.unwrap();
        assert!(!store.worker_is_active("pio01").await.unwrap());

        store.upsert_worker("pio01").await.unwrap();
        assert!(store.worker_is_active("pio01").await.unwrap());
        assert_eq!(store.list_workers().await.unwrap().len(), 1);
    }
}
