use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Secondary value keys used by the bundled metric descriptors
pub mod fields {
    pub const DIASTOLIC: &str = "diastolic";
    pub const HEART_RATE: &str = "heart_rate";
    pub const INFUSION_VOLUME: &str = "infusion_volume";
    pub const DRAINAGE_VOLUME: &str = "drainage_volume";
}

/// Health metrics recorded in the diary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    /// Systolic is the primary value, diastolic and heart rate are secondary
    BloodPressure,
    /// Body weight in kilograms
    Weight,
    /// Water intake in millilitres
    WaterIntake,
    /// Urine output in millilitres
    UrineOutput,
    /// Dialysis ultrafiltration in millilitres (drainage minus infusion)
    Ultrafiltration,
}

impl MetricType {
    pub const ALL: [MetricType; 5] = [
        MetricType::BloodPressure,
        MetricType::Weight,
        MetricType::WaterIntake,
        MetricType::UrineOutput,
        MetricType::Ultrafiltration,
    ];

    pub fn unit(&self) -> &'static str {
        match self {
            MetricType::BloodPressure => "mmHg",
            MetricType::Weight => "kg",
            MetricType::WaterIntake | MetricType::UrineOutput | MetricType::Ultrafiltration => {
                "ml"
            }
        }
    }
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricType::BloodPressure => write!(f, "blood_pressure"),
            MetricType::Weight => write!(f, "weight"),
            MetricType::WaterIntake => write!(f, "water_intake"),
            MetricType::UrineOutput => write!(f, "urine_output"),
            MetricType::Ultrafiltration => write!(f, "ultrafiltration"),
        }
    }
}

impl std::str::FromStr for MetricType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "blood_pressure" | "bp" => Ok(MetricType::BloodPressure),
            "weight" => Ok(MetricType::Weight),
            "water_intake" | "water" => Ok(MetricType::WaterIntake),
            "urine_output" | "urine" => Ok(MetricType::UrineOutput),
            "ultrafiltration" | "dialysis" | "uf" => Ok(MetricType::Ultrafiltration),
            _ => Err(format!("Invalid metric type: {}", s)),
        }
    }
}

/// A single time-stamped measurement as returned by the record repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Repository identifier
    #[serde(default)]
    pub id: String,

    /// Owner of the record
    #[serde(default)]
    pub user_id: String,

    pub metric_type: MetricType,

    /// Instant the measurement was taken
    pub timestamp: DateTime<Utc>,

    /// Main value charted for the metric (systolic, kg, ml)
    pub primary_value: f64,

    /// Metric-specific extra values keyed by name (see [`fields`])
    #[serde(default)]
    pub secondary_values: BTreeMap<String, f64>,

    #[serde(default)]
    pub notes: Option<String>,
}

impl RawRecord {
    /// Secondary value by name, ignoring non-finite entries
    pub fn secondary(&self, name: &str) -> Option<f64> {
        self.secondary_values
            .get(name)
            .copied()
            .filter(|v| v.is_finite())
    }
}

/// Width of the analysed window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    Day,
    Week,
    Month,
}

impl std::str::FromStr for ViewMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "day" | "d" => Ok(ViewMode::Day),
            "week" | "w" => Ok(ViewMode::Week),
            "month" | "m" => Ok(ViewMode::Month),
            _ => Err(format!("Invalid view mode: {}", s)),
        }
    }
}

/// Navigation step relative to the current range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Prev,
    Next,
}

/// Concrete calendar interval covered by a view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    /// First day of the period
    pub start: NaiveDate,

    /// Last day with possible data; clamped to today for the current period
    pub end: NaiveDate,

    pub view_mode: ViewMode,
}

impl DateRange {
    /// Nominal last day of the period, ignoring the clamp to today
    pub fn period_end(&self) -> NaiveDate {
        match self.view_mode {
            ViewMode::Day => self.start,
            ViewMode::Week => self.start + chrono::Days::new(6),
            ViewMode::Month => {
                let days = days_in_month(self.start.year(), self.start.month());
                self.start
                    .with_day(days)
                    .unwrap_or(self.start)
            }
        }
    }

    /// Days the view is expected to cover when computing coverage
    pub fn expected_days(&self) -> u32 {
        match self.view_mode {
            ViewMode::Day => 1,
            ViewMode::Week => 7,
            ViewMode::Month => days_in_month(self.start.year(), self.start.month()),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Whether the period was cut short by the clamp to today
    pub fn is_clamped(&self) -> bool {
        self.end < self.period_end()
    }
}

/// Number of days in the given calendar month
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };

    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(30)
}

/// Aggregate statistics for a bucket or a whole range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BucketAggregate {
    /// Number of records
    pub count: usize,

    /// Sum of primary values
    pub total: f64,

    pub mean: f64,
    pub min: f64,
    pub max: f64,

    /// Population variance of primary values
    pub variance: f64,

    /// Standard deviation divided by mean (0 when mean is 0)
    pub coefficient_of_variation: f64,

    /// Distinct days with data over expected days, in [0, 1]
    pub coverage: f64,

    /// Distinct calendar days with at least one record
    #[serde(default)]
    pub distinct_days: u32,

    /// Records classified as abnormal
    pub abnormal_count: usize,

    /// Mean of each secondary value over the records carrying it
    #[serde(default)]
    pub secondary_means: BTreeMap<String, f64>,
}

impl BucketAggregate {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn std_dev(&self) -> f64 {
        self.variance.max(0.0).sqrt()
    }
}

/// A labeled group of records aggregated together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    /// Axis label (e.g. `08:00`, `Mon`, `12`, `W3`)
    pub label: String,

    /// Instant the slot begins, when the strategy has regular slots
    pub start: Option<DateTime<Utc>>,

    pub points: Vec<RawRecord>,

    pub aggregate: BucketAggregate,
}

/// Trend direction across consecutive periods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
    Fluctuating,
}

/// Trend signal as reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerTrend {
    Up,
    Down,
    Stable,
}

impl From<ServerTrend> for TrendDirection {
    fn from(trend: ServerTrend) -> Self {
        match trend {
            ServerTrend::Up => TrendDirection::Increasing,
            ServerTrend::Down => TrendDirection::Decreasing,
            ServerTrend::Stable => TrendDirection::Stable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub direction: TrendDirection,

    /// Signed change relative to the reference, in percent
    pub percentage: f64,
}

impl Default for Trend {
    fn default() -> Self {
        Trend {
            direction: TrendDirection::Stable,
            percentage: 0.0,
        }
    }
}

/// Dimension used to key server-side pre-aggregated statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Day,
    Week,
    Month,
}

impl From<ViewMode> for Dimension {
    fn from(mode: ViewMode) -> Self {
        match mode {
            ViewMode::Day => Dimension::Day,
            ViewMode::Week => Dimension::Week,
            ViewMode::Month => Dimension::Month,
        }
    }
}

/// Server-provided statistics; every field is optional
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PartialAggregate {
    #[serde(default)]
    pub count: Option<usize>,
    #[serde(default)]
    pub total: Option<f64>,
    #[serde(default)]
    pub mean: Option<f64>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub trend: Option<ServerTrend>,
}

/// Result object consumed by presentation layers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Metadata {
    pub count: usize,
    pub total: f64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub variance: f64,
    pub coefficient_of_variation: f64,
    pub coverage: f64,
    pub abnormal_count: usize,

    #[serde(default)]
    pub severe_count: usize,

    /// Calendar days whose total falls outside the daily scale
    #[serde(default)]
    pub daily_abnormal_count: usize,

    pub trend: Trend,

    #[serde(default)]
    pub secondary_means: BTreeMap<String, f64>,

    /// Number of records per classification label
    pub category_counts: BTreeMap<String, usize>,

    /// Distinct calendar days with at least one record
    pub distinct_days: u32,

    pub expected_days: u32,

    /// True when server statistics overrode at least one local figure
    pub server_merged: bool,
}
