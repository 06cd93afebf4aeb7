//! Metadata assembly
//!
//! Folds the range aggregate, the classification summaries and the trend
//! into the single object handed to presentation layers. Total: any
//! non-finite input figure comes out as 0.

use crate::classifier::ClassificationSummary;
use crate::models::{BucketAggregate, DateRange, Metadata, Trend};

pub struct MetadataAssembler;

impl MetadataAssembler {
    pub fn assemble(
        aggregate: &BucketAggregate,
        summary: &ClassificationSummary,
        daily_summary: &ClassificationSummary,
        trend: Trend,
        range: &DateRange,
        server_merged: bool,
    ) -> Metadata {
        Metadata {
            count: aggregate.count,
            total: finite(aggregate.total),
            mean: finite(aggregate.mean),
            min: finite(aggregate.min),
            max: finite(aggregate.max),
            variance: finite(aggregate.variance).max(0.0),
            coefficient_of_variation: finite(aggregate.coefficient_of_variation).max(0.0),
            coverage: finite(aggregate.coverage).clamp(0.0, 1.0),
            abnormal_count: summary.abnormal_count,
            severe_count: summary.severe_count,
            daily_abnormal_count: daily_summary.abnormal_count,
            trend: Trend {
                direction: trend.direction,
                percentage: finite(trend.percentage),
            },
            secondary_means: aggregate
                .secondary_means
                .iter()
                .filter(|(_, v)| v.is_finite())
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            category_counts: summary.counts.clone(),
            distinct_days: aggregate.distinct_days,
            expected_days: range.expected_days(),
            server_merged,
        }
    }
}

fn finite(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TrendDirection, ViewMode};
    use chrono::NaiveDate;

    fn week() -> DateRange {
        DateRange {
            start: NaiveDate::from_ymd_opt(2026, 10, 5).unwrap(),
            end: NaiveDate::from_ymd_opt(2026, 10, 11).unwrap(),
            view_mode: ViewMode::Week,
        }
    }

    #[test]
    fn test_empty_input_is_zeroed() {
        let metadata = MetadataAssembler::assemble(
            &BucketAggregate::default(),
            &ClassificationSummary::default(),
            &ClassificationSummary::default(),
            Trend::default(),
            &week(),
            false,
        );

        assert_eq!(metadata.count, 0);
        assert_eq!(metadata.mean, 0.0);
        assert_eq!(metadata.coverage, 0.0);
        assert_eq!(metadata.abnormal_count, 0);
        assert_eq!(metadata.trend.direction, TrendDirection::Stable);
        assert_eq!(metadata.expected_days, 7);
        assert!(metadata.category_counts.is_empty());
    }

    #[test]
    fn test_non_finite_inputs_are_neutralized() {
        let aggregate = BucketAggregate {
            count: 2,
            mean: f64::NAN,
            max: f64::INFINITY,
            coverage: 3.0,
            ..BucketAggregate::default()
        };
        let trend = Trend {
            direction: TrendDirection::Increasing,
            percentage: f64::NAN,
        };

        let metadata = MetadataAssembler::assemble(
            &aggregate,
            &ClassificationSummary::default(),
            &ClassificationSummary::default(),
            trend,
            &week(),
            true,
        );

        assert_eq!(metadata.mean, 0.0);
        assert_eq!(metadata.max, 0.0);
        assert_eq!(metadata.coverage, 1.0);
        assert_eq!(metadata.trend.percentage, 0.0);
        assert_eq!(metadata.trend.direction, TrendDirection::Increasing);
        assert!(metadata.server_merged);
    }

    #[test]
    fn test_counts_come_from_summary() {
        let mut summary = ClassificationSummary::default();
        summary.counts.insert("Normal".to_string(), 4);
        summary.counts.insert("Hypertensive Crisis".to_string(), 1);
        summary.abnormal_count = 1;
        summary.severe_count = 1;

        let aggregate = BucketAggregate {
            count: 5,
            total: 650.0,
            mean: 130.0,
            distinct_days: 3,
            ..BucketAggregate::default()
        };

        let mut daily = ClassificationSummary::default();
        daily.abnormal_count = 2;

        let metadata = MetadataAssembler::assemble(
            &aggregate,
            &summary,
            &daily,
            Trend::default(),
            &week(),
            false,
        );

        assert_eq!(metadata.count, 5);
        assert_eq!(metadata.abnormal_count, 1);
        assert_eq!(metadata.severe_count, 1);
        assert_eq!(metadata.category_counts.get("Normal"), Some(&4));
        assert_eq!(metadata.distinct_days, 3);
        assert_eq!(metadata.daily_abnormal_count, 2);
    }
}
