use chrono::Utc;
use pio_types::ConfigFileHistoryRow;

use crate::{datetime_from_row, datetime_to_sql, Store, StoreError};

impl Store {
    /// Append a new revision of a config file's contents. History is
    /// append-only: editing a config never overwrites a prior revision, so
    /// `rollback` can always recover an earlier version.
    pub async fn append_config_revision(&self, filename: &str, data: &str) -> Result<(), StoreError> {
        let filename = filename.to_string();
        let data = data.to_string();
        let timestamp = datetime_to_sql(Utc::now());
        self.modify(move |conn| {
            conn.execute(
                "INSERT INTO config_file_history (filename, timestamp, data) VALUES (?1, ?2, ?3)",
                rusqlite::params![filename, timestamp, data],
            )
        })
        .await?;
        Ok(())
    }

    pub async fn latest_config(&self, filename: &str) -> Result<Option<ConfigFileHistoryRow>, StoreError> {
        let filename = filename.to_string();
        self.query_one(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT filename, timestamp, data FROM config_file_history
                 WHERE filename = ?1 ORDER BY timestamp DESC LIMIT 1",
            )?;
            let mut rows = stmt.query(rusqlite::params![filename])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_config(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn config_history(&self, filename: &str) -> Result<Vec<ConfigFileHistoryRow>, StoreError> {
        let filename = filename.to_string();
        self.query(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT filename, timestamp, data FROM config_file_history
                 WHERE filename = ?1 ORDER BY timestamp DESC",
            )?;
            let mut rows = stmt.query(rusqlite::params![filename])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_config(row)?);
            }
            Ok(out)
        })
        .await
    }

    pub async fn list_config_filenames(&self) -> Result<Vec<String>, StoreError> {
        self.query(|conn| {
            let mut stmt = conn.prepare("SELECT DISTINCT filename FROM config_file_history ORDER BY filename ASC")?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row.get(0)?);
            }
            Ok(out)
        })
        .await
    }
}

fn row_to_config(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConfigFileHistoryRow> {
    Ok(ConfigFileHistoryRow {
        filename: row.get(0)?,
        timestamp: datetime_from_row(row, 1)?,
        data: row.get(2)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn history_is_append_only_and_latest_wins() {
        let store = Store::open_in_memory().await.unwrap();
        store.append_config_revision("config.ini", "v1").await.unwrap();
        store.append_config_revision("config.ini", "v2").await.unwrap();

        assert_eq!(store.latest_config("config.ini").await.unwrap().unwrap().data, "v2");
        assert_eq!(store.config_history("config.ini").await.unwrap().len(), 2);
        assert_eq!(store.list_config_filenames().await.unwrap(), vec!["config.ini".to_string()]);
    }
}
