//! Metric descriptors
//!
//! The five diary metrics share one analytics engine. A descriptor carries
//! everything that differs between them: threshold tables, bucket strategies
//! per view mode, how values combine within a day and which secondary fields
//! are averaged alongside the primary value.

use crate::bucketer::BucketStrategy;
use crate::classifier::{
    ThresholdTable, BLOOD_PRESSURE, DRAINAGE, ULTRAFILTRATION, URINE_DAILY, URINE_SINGLE_VOID,
    WATER_DAILY,
};
use crate::models::{fields, MetricType, ViewMode};

/// How a metric's values combine over a day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Point readings; the daily figure is the mean (blood pressure, weight)
    Averaged,
    /// Volumes; the daily figure is the sum (water, urine, ultrafiltration)
    Summed,
}

/// What a record's classification depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationContext {
    /// The record alone, through the record tables
    Table,
    /// The record and the measurements preceding it
    ConsecutiveChange,
}

/// Static description of one metric
#[derive(Debug, Clone, Copy)]
pub struct MetricDescriptor {
    pub metric: MetricType,
    pub value_kind: ValueKind,
    pub context: ClassificationContext,

    /// Tables applied to single records and aggregates; the worst result wins
    pub record_tables: &'static [&'static ThresholdTable],

    /// Table applied to daily totals, if the metric has a daily scale
    pub daily_table: Option<&'static ThresholdTable>,

    /// Secondary values shown next to the primary value
    pub secondary_fields: &'static [&'static str],

    pub day_strategy: BucketStrategy,
    pub month_strategy: BucketStrategy,
}

static BLOOD_PRESSURE_DESCRIPTOR: MetricDescriptor = MetricDescriptor {
    metric: MetricType::BloodPressure,
    value_kind: ValueKind::Averaged,
    context: ClassificationContext::Table,
    record_tables: &[&BLOOD_PRESSURE],
    daily_table: None,
    secondary_fields: &[fields::DIASTOLIC, fields::HEART_RATE],
    day_strategy: BucketStrategy::PerRecord,
    month_strategy: BucketStrategy::WeekOfMonth,
};

static WEIGHT_DESCRIPTOR: MetricDescriptor = MetricDescriptor {
    metric: MetricType::Weight,
    value_kind: ValueKind::Averaged,
    context: ClassificationContext::ConsecutiveChange,
    record_tables: &[],
    daily_table: None,
    secondary_fields: &[],
    day_strategy: BucketStrategy::PerRecord,
    month_strategy: BucketStrategy::WeekOfMonth,
};

static WATER_INTAKE_DESCRIPTOR: MetricDescriptor = MetricDescriptor {
    metric: MetricType::WaterIntake,
    value_kind: ValueKind::Summed,
    context: ClassificationContext::Table,
    record_tables: &[],
    daily_table: Some(&WATER_DAILY),
    secondary_fields: &[],
    day_strategy: BucketStrategy::Hourly,
    month_strategy: BucketStrategy::DayOfMonth,
};

static URINE_OUTPUT_DESCRIPTOR: MetricDescriptor = MetricDescriptor {
    metric: MetricType::UrineOutput,
    value_kind: ValueKind::Summed,
    context: ClassificationContext::Table,
    record_tables: &[&URINE_SINGLE_VOID],
    daily_table: Some(&URINE_DAILY),
    secondary_fields: &[],
    day_strategy: BucketStrategy::Hourly,
    month_strategy: BucketStrategy::DayOfMonth,
};

static ULTRAFILTRATION_DESCRIPTOR: MetricDescriptor = MetricDescriptor {
    metric: MetricType::Ultrafiltration,
    value_kind: ValueKind::Summed,
    context: ClassificationContext::Table,
    record_tables: &[&ULTRAFILTRATION, &DRAINAGE],
    daily_table: None,
    secondary_fields: &[fields::INFUSION_VOLUME, fields::DRAINAGE_VOLUME],
    day_strategy: BucketStrategy::PerRecord,
    month_strategy: BucketStrategy::DayOfMonth,
};

impl MetricDescriptor {
    /// Descriptor for a metric
    pub fn for_metric(metric: MetricType) -> &'static MetricDescriptor {
        match metric {
            MetricType::BloodPressure => &BLOOD_PRESSURE_DESCRIPTOR,
            MetricType::Weight => &WEIGHT_DESCRIPTOR,
            MetricType::WaterIntake => &WATER_INTAKE_DESCRIPTOR,
            MetricType::UrineOutput => &URINE_OUTPUT_DESCRIPTOR,
            MetricType::Ultrafiltration => &ULTRAFILTRATION_DESCRIPTOR,
        }
    }

    /// Bucket strategy this metric uses for a view mode
    pub fn strategy_for(&self, view_mode: ViewMode) -> BucketStrategy {
        match view_mode {
            ViewMode::Day => self.day_strategy,
            ViewMode::Week => BucketStrategy::Weekday,
            ViewMode::Month => self.month_strategy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_metric_has_a_descriptor() {
        for metric in MetricType::ALL {
            let descriptor = MetricDescriptor::for_metric(metric);
            assert_eq!(descriptor.metric, metric);
            for view_mode in [ViewMode::Day, ViewMode::Week, ViewMode::Month] {
                assert!(descriptor.strategy_for(view_mode).is_valid_for(view_mode));
            }
        }
    }

    #[test]
    fn test_urine_tables_bound_to_granularity() {
        let descriptor = MetricDescriptor::for_metric(MetricType::UrineOutput);
        assert_eq!(descriptor.record_tables[0].name, "urine_single_void");
        assert_eq!(descriptor.daily_table.map(|t| t.name), Some("urine_daily"));
    }

    #[test]
    fn test_volume_metrics_are_summed() {
        for metric in [
            MetricType::WaterIntake,
            MetricType::UrineOutput,
            MetricType::Ultrafiltration,
        ] {
            assert_eq!(MetricDescriptor::for_metric(metric).value_kind, ValueKind::Summed);
        }
        assert_eq!(
            MetricDescriptor::for_metric(MetricType::Weight).context,
            ClassificationContext::ConsecutiveChange
        );
    }
}
