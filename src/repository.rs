//! Record repository seam
//!
//! The analytics core never talks to storage or the network directly. It asks
//! a [`RecordRepository`] for raw records and, best-effort, for statistics the
//! server already aggregated. [`InMemoryRepository`] backs the CLI and tests;
//! the loaders read record files into it.

use crate::error::{ImportError, RepositoryError, Result};
use crate::models::{Dimension, MetricType, PartialAggregate, RawRecord};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use csv::ReaderBuilder;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

/// Source of diary records for one user and metric
#[async_trait]
pub trait RecordRepository: Send + Sync {
    /// Records whose UTC calendar date lies in `[start, end]`
    async fn fetch_records(
        &self,
        user_id: &str,
        metric: MetricType,
        start: NaiveDate,
        end: NaiveDate,
    ) -> std::result::Result<Vec<RawRecord>, RepositoryError>;

    /// Server-side statistics for a dimension key, if the server has any
    ///
    /// Keys are `YYYY-MM-DD` (day), `YYYY-Www` (ISO week) and `YYYY-MM`
    /// (month).
    async fn fetch_pre_aggregated_stats(
        &self,
        user_id: &str,
        metric: MetricType,
        dimension: Dimension,
        key: &str,
    ) -> std::result::Result<Option<PartialAggregate>, RepositoryError>;
}

type StatsKey = (String, MetricType, Dimension, String);

/// Repository holding records in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryRepository {
    records: Vec<RawRecord>,
    stats: HashMap<StatsKey, PartialAggregate>,
    records_failure: Option<RepositoryError>,
    stats_failure: Option<RepositoryError>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Repository preloaded with `records`; blank ids are replaced with
    /// fresh UUIDs
    pub fn with_records(records: Vec<RawRecord>) -> Self {
        let mut repo = Self::new();
        for record in records {
            repo.insert(record);
        }
        repo
    }

    pub fn insert(&mut self, mut record: RawRecord) {
        if record.id.is_empty() {
            record.id = Uuid::new_v4().to_string();
        }
        self.records.push(record);
    }

    /// Register server statistics for a dimension key
    pub fn with_stats(
        mut self,
        user_id: &str,
        metric: MetricType,
        dimension: Dimension,
        key: &str,
        stats: PartialAggregate,
    ) -> Self {
        self.stats
            .insert((user_id.to_string(), metric, dimension, key.to_string()), stats);
        self
    }

    /// Make every record fetch fail with `error`
    pub fn failing_records(mut self, error: RepositoryError) -> Self {
        self.records_failure = Some(error);
        self
    }

    /// Make every statistics fetch fail with `error`
    pub fn failing_stats(mut self, error: RepositoryError) -> Self {
        self.stats_failure = Some(error);
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RecordRepository for InMemoryRepository {
    async fn fetch_records(
        &self,
        user_id: &str,
        metric: MetricType,
        start: NaiveDate,
        end: NaiveDate,
    ) -> std::result::Result<Vec<RawRecord>, RepositoryError> {
        if let Some(error) = &self.records_failure {
            return Err(error.clone());
        }

        let records: Vec<RawRecord> = self
            .records
            .iter()
            .filter(|r| r.user_id == user_id && r.metric_type == metric)
            .filter(|r| {
                let date = r.timestamp.date_naive();
                date >= start && date <= end
            })
            .cloned()
            .collect();

        debug!(user_id, %metric, %start, %end, count = records.len(), "Fetched records");
        Ok(records)
    }

    async fn fetch_pre_aggregated_stats(
        &self,
        user_id: &str,
        metric: MetricType,
        dimension: Dimension,
        key: &str,
    ) -> std::result::Result<Option<PartialAggregate>, RepositoryError> {
        if let Some(error) = &self.stats_failure {
            return Err(error.clone());
        }

        Ok(self
            .stats
            .get(&(user_id.to_string(), metric, dimension, key.to_string()))
            .cloned())
    }
}

/// Load records from a `.json` or `.csv` file
///
/// Records without an owner are assigned to `default_user`.
pub fn load_records(path: &Path, default_user: &str) -> Result<Vec<RawRecord>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    let records = match extension.as_str() {
        "json" => load_records_json(path, default_user)?,
        "csv" => load_records_csv(path, default_user)?,
        other => {
            return Err(ImportError::UnsupportedFormat {
                format: other.to_string(),
            }
            .into())
        }
    };

    info!(path = %path.display(), count = records.len(), "Loaded diary records");
    Ok(records)
}

/// Load a JSON array of records
pub fn load_records_json(path: &Path, default_user: &str) -> Result<Vec<RawRecord>> {
    let content = std::fs::read_to_string(path)?;
    let mut records: Vec<RawRecord> =
        serde_json::from_str(&content).map_err(|e| ImportError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    for record in &mut records {
        fill_identity(record, default_user);
    }
    Ok(records)
}

/// Load records from CSV
///
/// Required columns are `metric_type`, `timestamp` and `primary_value` (or
/// `value`). `id`, `user_id` and `notes` are optional; any other non-empty
/// numeric column becomes a secondary value.
pub fn load_records_csv(path: &Path, default_user: &str) -> Result<Vec<RawRecord>> {
    let parse_error = |reason: String| ImportError::ParseError {
        path: path.to_path_buf(),
        reason,
    };

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| parse_error(e.to_string()))?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| parse_error(e.to_string()))?
        .iter()
        .map(normalize_column_name)
        .collect();

    let mut records = Vec::new();
    for (line, row) in reader.records().enumerate() {
        let row = row.map_err(|e| parse_error(e.to_string()))?;
        let columns: BTreeMap<&str, &str> = headers
            .iter()
            .map(String::as_str)
            .zip(row.iter())
            .filter(|(_, value)| !value.is_empty())
            .collect();

        let metric_type: MetricType = required(&columns, "metric_type")?
            .parse()
            .map_err(|e: String| parse_error(format!("row {}: {}", line + 1, e)))?;

        let timestamp = parse_timestamp(required(&columns, "timestamp")?)
            .ok_or_else(|| parse_error(format!("row {}: unreadable timestamp", line + 1)))?;

        let primary_value: f64 = required(&columns, "primary_value")?
            .parse()
            .map_err(|_| parse_error(format!("row {}: primary_value is not a number", line + 1)))?;

        let secondary_values = columns
            .iter()
            .filter(|(name, _)| !RESERVED_COLUMNS.contains(*name))
            .filter_map(|(name, value)| value.parse::<f64>().ok().map(|v| (name.to_string(), v)))
            .collect();

        let mut record = RawRecord {
            id: columns.get("id").map(|s| s.to_string()).unwrap_or_default(),
            user_id: columns.get("user_id").map(|s| s.to_string()).unwrap_or_default(),
            metric_type,
            timestamp,
            primary_value,
            secondary_values,
            notes: columns.get("notes").map(|s| s.to_string()),
        };
        fill_identity(&mut record, default_user);
        records.push(record);
    }

    Ok(records)
}

const RESERVED_COLUMNS: [&str; 6] = [
    "id",
    "user_id",
    "metric_type",
    "timestamp",
    "primary_value",
    "notes",
];

fn normalize_column_name(name: &str) -> String {
    let normalized = name.trim().to_lowercase().replace([' ', '-'], "_");
    match normalized.as_str() {
        "value" | "primary" => "primary_value".to_string(),
        "metric" | "type" => "metric_type".to_string(),
        "time" | "recorded_at" => "timestamp".to_string(),
        "user" => "user_id".to_string(),
        _ => normalized,
    }
}

fn required<'a>(columns: &BTreeMap<&str, &'a str>, field: &str) -> Result<&'a str> {
    columns.get(field).copied().ok_or_else(|| {
        ImportError::MissingField {
            field: field.to_string(),
        }
        .into()
    })
}

fn fill_identity(record: &mut RawRecord, default_user: &str) {
    if record.id.is_empty() {
        record.id = Uuid::new_v4().to_string();
    }
    if record.user_id.is_empty() {
        record.user_id = default_user.to_string();
    }
}

/// RFC 3339, or a naive date-time taken as UTC
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    let formats = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];
    formats
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}
