use pio_types::log::{LogEntry, LogLevel};
use pio_types::UNIVERSAL_EXPERIMENT;

use crate::{datetime_from_row, datetime_to_sql, Store, StoreError};

/// Filters for `Store::list_logs`. `None`/`0` mean "don't filter on this field".
#[derive(Debug, Default, Clone)]
pub struct LogFilter {
    pub experiment: Option<String>,
    pub pioreactor_unit: Option<String>,
    pub min_level: Option<LogLevel>,
    pub limit: u32,
}

impl Store {
    pub async fn insert_log(&self, entry: &LogEntry) -> Result<(), StoreError> {
        let timestamp = datetime_to_sql(entry.timestamp);
        let level = level_to_sql(entry.level);
        let unit = entry.pioreactor_unit.clone();
        let message = entry.message.clone();
        let task = entry.task.clone();
        let experiment = entry.experiment.clone();

        self.modify(move |conn| {
            conn.execute(
                "INSERT INTO logs (timestamp, level, pioreactor_unit, message, task, experiment)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![timestamp, level, unit, message, task, experiment],
            )
        })
        .await?;
        Ok(())
    }

    pub async fn list_logs(&self, filter: LogFilter) -> Result<Vec<LogEntry>, StoreError> {
        self.query(move |conn| {
            let mut sql = String::from(
                "SELECT timestamp, level, pioreactor_unit, message, task, experiment FROM logs WHERE 1=1",
            );
            // A log tagged with the universal sentinel applies to every
            // experiment, so a per-experiment query must also match it.
            if filter.experiment.is_some() {
                sql.push_str(" AND (experiment = ? OR experiment = ?)");
            }
            if filter.pioreactor_unit.is_some() {
                sql.push_str(" AND pioreactor_unit = ?");
            }
            sql.push_str(" ORDER BY timestamp DESC");

            let mut stmt = conn.prepare(&sql)?;
            let mut param_idx = 1;
            if let Some(experiment) = &filter.experiment {
                stmt.raw_bind_parameter(param_idx, experiment)?;
                param_idx += 1;
                stmt.raw_bind_parameter(param_idx, UNIVERSAL_EXPERIMENT)?;
                param_idx += 1;
            }
            if let Some(unit) = &filter.pioreactor_unit {
                stmt.raw_bind_parameter(param_idx, unit)?;
            }

            let mut rows = stmt.raw_query();
            let mut out = Vec::new();
            let limit = if filter.limit == 0 { u32::MAX } else { filter.limit };
            while out.len() < limit as usize {
                let row = match rows.next()? {
                    Some(row) => row,
                    None => break,
                };
                let level = parse_level(&row.get::<_, String>(1)?);
                if let Some(min) = filter.min_level {
                    if level_rank(level) < level_rank(min) {
                        continue;
                    }
                }
                out.push(LogEntry {
                    timestamp: datetime_from_row(row, 0)?,
                    level,
                    pioreactor_unit: row.get(2)?,
                    message: row.get(3)?,
                    task: row.get(4)?,
                    experiment: row.get(5)?,
                });
            }
            Ok(out)
        })
        .await
    }
}

fn level_to_sql(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Debug => "DEBUG",
        LogLevel::Info => "INFO",
        LogLevel::Notice => "NOTICE",
        LogLevel::Warning => "WARNING",
        LogLevel::Error => "ERROR",
    }
}

fn parse_level(s: &str) -> LogLevel {
    match s {
        "DEBUG" => LogLevel::Debug,
        "NOTICE" => LogLevel::Notice,
        "WARNING" => LogLevel::Warning,
        "ERROR" => LogLevel::Error,
        _ => LogLevel::Info,
    }
}

fn level_rank(level: LogLevel) -> u8 {
    match level {
        LogLevel::Debug => 0,
        LogLevel::Info => 1,
        LogLevel::Notice => 2,
        LogLevel::Warning => 3,
        LogLevel::Error => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(unit: &str, experiment: &str, level: LogLevel) -> LogEntry {
        LogEntry {
            timestamp: Utc::now(),
            level,
            pioreactor_unit: unit.to_string(),
            message: "hello".to_string(),
            task: "stirring".to_string(),
            experiment: experiment.to_string(),
        }
    }

    #[tokio::test]
    async fn filters_by_experiment_and_level() {
        let store = Store::open_in_memory().await.unwrap();
        store.insert_log(&entry("pio01", "exp-A", LogLevel::Info)).await.unwrap();
        store.insert_log(&entry("pio01", "exp-A", LogLevel::Error)).await.unwrap();
        store.insert_log(&entry("pio02", "exp-B", LogLevel::Error)).await.unwrap();

        let rows = store
            .list_logs(LogFilter {
                experiment: Some("exp-A".to_string()),
                min_level: Some(LogLevel::Error),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].pioreactor_unit, "pio01");
    }

    #[tokio::test]
    async fn experiment_filter_includes_universal_logs() {
        let store = Store::open_in_memory().await.unwrap();
        store.insert_log(&entry("pio01", "exp-A", LogLevel::Info)).await.unwrap();
        store.insert_log(&entry("pio01", UNIVERSAL_EXPERIMENT, LogLevel::Info)).await.unwrap();
        store.insert_log(&entry("pio02", "exp-B", LogLevel::Info)).await.unwrap();

        let rows = store
            .list_logs(LogFilter { experiment: Some("exp-A".to_string()), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().any(|r| r.experiment == "exp-A"));
        assert!(rows.iter().any(|r| r.experiment == UNIVERSAL_EXPERIMENT));
        assert!(!rows.iter().any(|r| r.experiment == "exp-B"));
    }

    #[tokio::test]
    async fn limit_caps_result_count() {
        let store = Store::open_in_memory().await.unwrap();
        for _ in 0..5 {
            store.insert_log(&entry("pio01", "exp-A", LogLevel::Info)).await.unwrap();
        }
        let rows = store
            .list_logs(LogFilter { limit: 2, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }
}
