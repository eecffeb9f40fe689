//! Time-series readings (growth rates, temperature, optical density, and
//! other per-unit measurement columns) and dosing events, queried by
//! experiment + lookback window into the nested JSON aggregate shape the
//! front-end charts expect. See spec.md §3 ("TimeSeriesRow... opaque to the
//! core, stored in per-measurement tables") and §4.7's `/experiments/…`
//! time-series and media-rates surface.

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use pio_types::{MediaRate, TimeSeriesAggregate, TimeSeriesPoint};

use crate::{datetime_from_row, datetime_to_sql, Store, StoreError};

/// One measurement to record. `channel` distinguishes multiple sensors of
/// the same kind on one unit (e.g. `od_readings`' per-PD-channel readings);
/// `None` for single-sensor measurements. The core never interprets
/// `data_source`/`column` beyond using them as a lookup key -- they're
/// opaque labels the caller assigns.
#[derive(Debug, Clone)]
pub struct TimeSeriesSample {
    pub data_source: String,
    pub column: String,
    pub experiment: String,
    pub pioreactor_unit: String,
    pub channel: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Downsample + lookback-window parameters, matching the retrieved source's
/// `filter_mod_N`/`lookback` query params.
#[derive(Debug, Clone, Copy)]
pub struct TimeSeriesQuery {
    pub filter_mod_n: f64,
    pub lookback_hours: f64,
    pub round_places: i32,
}

impl Default for TimeSeriesQuery {
    fn default() -> Self {
        Self { filter_mod_n: 100.0, lookback_hours: 4.0, round_places: 7 }
    }
}

impl Store {
    pub async fn insert_time_series_sample(&self, sample: &TimeSeriesSample) -> Result<(), StoreError> {
        let data_source = sample.data_source.clone();
        let column = sample.column.clone();
        let experiment = sample.experiment.clone();
        let unit = sample.pioreactor_unit.clone();
        let channel = sample.channel.clone();
        let timestamp = datetime_to_sql(sample.timestamp);
        let value = sample.value;
        self.modify(move |conn| {
            conn.execute(
                "INSERT INTO time_series_points
                    (data_source, column_name, experiment, pioreactor_unit, channel, timestamp, value)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![data_source, column, experiment, unit, channel, timestamp, value],
            )
        })
        .await?;
        Ok(())
    }

    /// Read one measurement column for an experiment within a lookback
    /// window, grouped by unit (or `unit-channel` when samples carry a
    /// channel). Downsampled the way the retrieved source does: keep
    /// roughly `1/filter_mod_n` of rows, chosen by a golden-ratio hash of
    /// each row's id so the kept rows are spread evenly rather than only
    /// the earliest `1/filter_mod_n` fraction.
    pub async fn query_time_series(
        &self,
        data_source: &str,
        column: &str,
        experiment: &str,
        query: TimeSeriesQuery,
    ) -> Result<TimeSeriesAggregate, StoreError> {
        let data_source = data_source.to_string();
        let column = column.to_string();
        let experiment = experiment.to_string();
        let cutoff = datetime_to_sql(Utc::now() - lookback_duration(query.lookback_hours));
        let filter_mod_n = query.filter_mod_n.max(1.0);
        let round_places = query.round_places;

        let rows = self
            .query(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, pioreactor_unit, channel, timestamp, value FROM time_series_points
                     WHERE data_source = ?1 AND column_name = ?2 AND experiment = ?3 AND timestamp > ?4
                     ORDER BY pioreactor_unit ASC, timestamp ASC",
                )?;
                let mut rows = stmt.query(rusqlite::params![data_source, column, experiment, cutoff])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    let id: i64 = row.get(0)?;
                    let unit: String = row.get(1)?;
                    let channel: Option<String> = row.get(2)?;
                    let timestamp = datetime_from_row(row, 3)?;
                    let value: f64 = row.get(4)?;
                    out.push((id, unit, channel, timestamp, value));
                }
                Ok(out)
            })
            .await?;

        let mut by_unit: HashMap<String, Vec<TimeSeriesPoint>> = HashMap::new();
        for (id, unit, channel, timestamp, value) in rows {
            if !passes_golden_ratio_filter(id, filter_mod_n) {
                continue;
            }
            let key = match channel {
                Some(channel) => format!("{unit}-{channel}"),
                None => unit,
            };
            by_unit.entry(key).or_default().push(TimeSeriesPoint { x: timestamp, y: round_to(value, round_places) });
        }

        let mut series: Vec<String> = by_unit.keys().cloned().collect();
        series.sort();
        let data = series.iter().map(|key| by_unit.remove(key).unwrap_or_default()).collect();
        Ok(TimeSeriesAggregate { series, data })
    }

    pub async fn insert_dosing_event(
        &self,
        pioreactor_unit: &str,
        experiment: &str,
        timestamp: DateTime<Utc>,
        event: &str,
        volume_change_ml: f64,
        source_of_event: &str,
    ) -> Result<(), StoreError> {
        let unit = pioreactor_unit.to_string();
        let experiment = experiment.to_string();
        let timestamp = datetime_to_sql(timestamp);
        let event = event.to_string();
        let source_of_event = source_of_event.to_string();
        self.modify(move |conn| {
            conn.execute(
                "INSERT INTO dosing_events
                    (pioreactor_unit, experiment, timestamp, event, volume_change_ml, source_of_event)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![unit, experiment, timestamp, event, volume_change_ml, source_of_event],
            )
        })
        .await?;
        Ok(())
    }

    /// mL/hour added per worker over the last 3 hours, counting only
    /// `add_media`/`add_alt_media` events whose source is a dosing
    /// automation (not a manual or continuous dose) -- matches the
    /// retrieved source's `get_media_rates` exactly, including the
    /// divide-by-3 and the synthetic `"all"` aggregate row.
    pub async fn media_rates(&self, experiment: &str) -> Result<HashMap<String, MediaRate>, StoreError> {
        let experiment = experiment.to_string();
        let cutoff = datetime_to_sql(Utc::now() - ChronoDuration::hours(3));
        let rows = self
            .query(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT pioreactor_unit,
                            SUM(CASE WHEN event='add_media' THEN volume_change_ml ELSE 0 END) / 3.0,
                            SUM(CASE WHEN event='add_alt_media' THEN volume_change_ml ELSE 0 END) / 3.0
                     FROM dosing_events
                     WHERE timestamp >= ?1
                       AND event IN ('add_media', 'add_alt_media')
                       AND source_of_event LIKE 'dosing_automation%'
                       AND experiment = ?2
                     GROUP BY pioreactor_unit",
                )?;
                let mut rows = stmt.query(rusqlite::params![cutoff, experiment])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push((row.get::<_, String>(0)?, row.get::<_, f64>(1)?, row.get::<_, f64>(2)?));
                }
                Ok(out)
            })
            .await?;

        let mut result = HashMap::new();
        let mut aggregate = MediaRate::default();
        for (unit, media_rate, alt_media_rate) in rows {
            aggregate.media_rate += media_rate;
            aggregate.alt_media_rate += alt_media_rate;
            result.insert(unit, MediaRate { media_rate, alt_media_rate });
        }
        result.insert("all".to_string(), aggregate);
        Ok(result)
    }
}

fn lookback_duration(hours: f64) -> ChronoDuration {
    ChronoDuration::milliseconds((hours * 3_600_000.0) as i64)
}

fn passes_golden_ratio_filter(id: i64, filter_mod_n: f64) -> bool {
    const GOLDEN: f64 = 0.61803398875;
    let scaled = id as f64 * GOLDEN;
    (scaled - scaled.trunc()) < 1.0 / filter_mod_n
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn sample_store() -> Store {
        let store = Store::open_in_memory().await.unwrap();
        store.create_experiment("exp-A", None, None, None).await.unwrap();
        store
    }

    #[tokio::test]
    async fn time_series_groups_by_unit_within_lookback() {
        let store = sample_store().await;
        let now = Utc::now();
        for (unit, value) in [("pio01", 0.123456), ("pio01", 0.654321), ("pio02", 1.0)] {
            store
                .insert_time_series_sample(&TimeSeriesSample {
                    data_source: "growth_rates".to_string(),
                    column: "rate".to_string(),
                    experiment: "exp-A".to_string(),
                    pioreactor_unit: unit.to_string(),
                    channel: None,
                    timestamp: now,
                    value,
                })
                .await
                .unwrap();
        }
        // out of lookback window, must not appear
        store
            .insert_time_series_sample(&TimeSeriesSample {
                data_source: "growth_rates".to_string(),
                column: "rate".to_string(),
                experiment: "exp-A".to_string(),
                pioreactor_unit: "pio01".to_string(),
                channel: None,
                timestamp: now - ChronoDuration::hours(10),
                value: 99.0,
            })
            .await
            .unwrap();

        let aggregate = store
            .query_time_series(
                "growth_rates",
                "rate",
                "exp-A",
                TimeSeriesQuery { filter_mod_n: 1.0, lookback_hours: 4.0, round_places: 5 },
            )
            .await
            .unwrap();
        assert_eq!(aggregate.series, vec!["pio01".to_string(), "pio02".to_string()]);
        assert_eq!(aggregate.data[0].len(), 2);
        assert_eq!(aggregate.data[1].len(), 1);
        assert!((aggregate.data[0][0].y - 0.12346).abs() < 1e-9);
    }

    #[tokio::test]
    async fn time_series_groups_by_unit_and_channel() {
        let store = sample_store().await;
        let now = Utc::now();
        for channel in ["1", "2"] {
            store
                .insert_time_series_sample(&TimeSeriesSample {
                    data_source: "od_readings".to_string(),
                    column: "od_reading".to_string(),
                    experiment: "exp-A".to_string(),
                    pioreactor_unit: "pio01".to_string(),
                    channel: Some(channel.to_string()),
                    timestamp: now,
                    value: 0.5,
                })
                .await
                .unwrap();
        }
        let aggregate = store
            .query_time_series("od_readings", "od_reading", "exp-A", TimeSeriesQuery { filter_mod_n: 1.0, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(aggregate.series, vec!["pio01-1".to_string(), "pio01-2".to_string()]);
    }

    #[tokio::test]
    async fn media_rates_only_counts_dosing_automation_within_3_hours() {
        let store = sample_store().await;
        let now = Utc::now();
        store.insert_dosing_event("pio01", "exp-A", now, "add_media", 3.0, "dosing_automation").await.unwrap();
        store.insert_dosing_event("pio01", "exp-A", now, "add_alt_media", 1.5, "dosing_automation").await.unwrap();
        // manual dose: must be excluded
        store.insert_dosing_event("pio01", "exp-A", now, "add_media", 100.0, "manually_added").await.unwrap();
        // outside the 3-hour window: must be excluded
        store
            .insert_dosing_event("pio01", "exp-A", now - ChronoDuration::hours(4), "add_media", 50.0, "dosing_automation")
            .await
            .unwrap();

        let rates = store.media_rates("exp-A").await.unwrap();
        let pio01 = rates.get("pio01").unwrap();
        assert!((pio01.media_rate - 1.0).abs() < 1e-9);
        assert!((pio01.alt_media_rate - 0.5).abs() < 1e-9);
        let all = rates.get("all").unwrap();
        assert!((all.media_rate - 1.0).abs() < 1e-9);
    }
}
