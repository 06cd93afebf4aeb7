//! Bucket and range statistics
//!
//! All figures are guarded against degenerate input: an empty set yields an
//! all-zero aggregate and a zero mean yields a zero coefficient of variation,
//! so nothing downstream ever sees NaN.

use crate::models::{Bucket, BucketAggregate, DateRange, PartialAggregate, RawRecord};
use chrono::{FixedOffset, NaiveDate};
use statrs::statistics::Statistics;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Stateless statistics over primary values
pub struct Aggregator;

impl Aggregator {
    /// Count, total, mean, min, max, population variance and CV of `values`
    ///
    /// Non-finite values are ignored.
    pub fn aggregate(values: &[f64]) -> BucketAggregate {
        let values: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();

        if values.is_empty() {
            return BucketAggregate::default();
        }

        let total: f64 = values.iter().sum();
        let mean = finite_or_zero(Statistics::mean(values.iter()));
        let variance = finite_or_zero(Statistics::population_variance(values.iter())).max(0.0);
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        BucketAggregate {
            count: values.len(),
            total,
            mean,
            min,
            max,
            variance,
            coefficient_of_variation: coefficient_of_variation(variance.sqrt(), mean),
            ..BucketAggregate::default()
        }
    }

    /// Aggregate records, including secondary means and coverage over
    /// `expected_days`
    pub fn aggregate_records(
        records: &[RawRecord],
        offset: FixedOffset,
        expected_days: u32,
    ) -> BucketAggregate {
        let values: Vec<f64> = records.iter().map(|r| r.primary_value).collect();
        let mut aggregate = Self::aggregate(&values);

        aggregate.secondary_means = secondary_means(records);
        aggregate.distinct_days = distinct_days(records, offset);
        aggregate.coverage = coverage_ratio(aggregate.distinct_days, expected_days);
        aggregate
    }

    /// Whole-range aggregate over the points of all buckets
    ///
    /// Abnormal counts are summed from the buckets.
    pub fn aggregate_buckets(
        buckets: &[Bucket],
        range: &DateRange,
        offset: FixedOffset,
    ) -> BucketAggregate {
        let points: Vec<RawRecord> = buckets
            .iter()
            .flat_map(|b| b.points.iter().cloned())
            .collect();

        let mut aggregate = Self::aggregate_records(&points, offset, range.expected_days());
        aggregate.abnormal_count = buckets.iter().map(|b| b.aggregate.abnormal_count).sum();

        debug!(
            count = aggregate.count,
            total = aggregate.total,
            coverage = aggregate.coverage,
            "Aggregated range"
        );
        aggregate
    }

    /// Distinct days with data over the days expected for the view mode
    pub fn coverage(records: &[RawRecord], range: &DateRange, offset: FixedOffset) -> f64 {
        let in_range: Vec<RawRecord> = records
            .iter()
            .filter(|r| range.contains(r.timestamp.with_timezone(&offset).date_naive()))
            .cloned()
            .collect();
        coverage_ratio(distinct_days(&in_range, offset), range.expected_days())
    }

    /// Sum of primary values per calendar day in the analytics timezone
    pub fn daily_totals(records: &[RawRecord], offset: FixedOffset) -> BTreeMap<NaiveDate, f64> {
        let mut totals = BTreeMap::new();
        for record in records.iter().filter(|r| r.primary_value.is_finite()) {
            let date = record.timestamp.with_timezone(&offset).date_naive();
            *totals.entry(date).or_insert(0.0) += record.primary_value;
        }
        totals
    }

    /// Override local figures with server-provided ones, field by field
    ///
    /// Absent or non-finite server fields keep the local value. Variance and
    /// CV are never supplied by the server and stay local. Returns whether any
    /// field was taken from the server.
    pub fn merge_server(
        local: &BucketAggregate,
        server: &PartialAggregate,
    ) -> (BucketAggregate, bool) {
        let mut merged = local.clone();
        let mut overridden = false;

        if let Some(count) = server.count {
            merged.count = count;
            overridden = true;
        }

        let mut take = |target: &mut f64, value: Option<f64>| {
            if let Some(v) = value.filter(|v| v.is_finite()) {
                *target = v;
                overridden = true;
            }
        };
        take(&mut merged.total, server.total);
        take(&mut merged.mean, server.mean);
        take(&mut merged.min, server.min);
        take(&mut merged.max, server.max);

        if overridden {
            debug!(?server, "Merged server statistics");
        }

        (merged, overridden)
    }
}

/// Standard deviation over |mean|, 0 when the mean is 0
pub fn coefficient_of_variation(std_dev: f64, mean: f64) -> f64 {
    if mean == 0.0 || !mean.is_finite() || !std_dev.is_finite() {
        0.0
    } else {
        std_dev / mean.abs()
    }
}

fn coverage_ratio(days_with_data: u32, expected_days: u32) -> f64 {
    if expected_days == 0 {
        return 0.0;
    }
    (days_with_data as f64 / expected_days as f64).clamp(0.0, 1.0)
}

fn distinct_days(records: &[RawRecord], offset: FixedOffset) -> u32 {
    records
        .iter()
        .map(|r| r.timestamp.with_timezone(&offset).date_naive())
        .collect::<BTreeSet<_>>()
        .len() as u32
}

fn secondary_means(records: &[RawRecord]) -> BTreeMap<String, f64> {
    let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for record in records {
        for name in record.secondary_values.keys() {
            if let Some(value) = record.secondary(name) {
                let entry = sums.entry(name.clone()).or_insert((0.0, 0));
                entry.0 += value;
                entry.1 += 1;
            }
        }
    }

    sums.into_iter()
        .map(|(name, (sum, count))| (name, sum / count as f64))
        .collect()
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{fields, MetricType, ViewMode};
    use chrono::{TimeZone, Utc};

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn record(day: u32, hour: u32, value: f64, secondary: &[(&str, f64)]) -> RawRecord {
        RawRecord {
            id: format!("r{}{}", day, hour),
            user_id: "u1".to_string(),
            metric_type: MetricType::BloodPressure,
            timestamp: Utc.with_ymd_and_hms(2026, 10, day, hour, 0, 0).unwrap(),
            primary_value: value,
            secondary_values: secondary
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            notes: None,
        }
    }

    #[test]
    fn test_empty_aggregate_is_zeroed() {
        let agg = Aggregator::aggregate(&[]);
        assert_eq!(agg.count, 0);
        assert_eq!(agg.total, 0.0);
        assert_eq!(agg.mean, 0.0);
        assert_eq!(agg.min, 0.0);
        assert_eq!(agg.max, 0.0);
        assert_eq!(agg.variance, 0.0);
        assert_eq!(agg.coefficient_of_variation, 0.0);
    }

    #[test]
    fn test_basic_statistics() {
        let agg = Aggregator::aggregate(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(agg.count, 8);
        assert_eq!(agg.total, 40.0);
        assert_eq!(agg.mean, 5.0);
        assert_eq!(agg.min, 2.0);
        assert_eq!(agg.max, 9.0);
        assert!((agg.variance - 4.0).abs() < 1e-9);
        assert!((agg.coefficient_of_variation - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_single_value_has_zero_variance() {
        let agg = Aggregator::aggregate(&[120.0]);
        assert_eq!(agg.variance, 0.0);
        assert_eq!(agg.coefficient_of_variation, 0.0);
        assert_eq!(agg.min, 120.0);
        assert_eq!(agg.max, 120.0);
    }

    #[test]
    fn test_zero_mean_cv_is_zero() {
        let agg = Aggregator::aggregate(&[-100.0, 100.0]);
        assert_eq!(agg.mean, 0.0);
        assert_eq!(agg.coefficient_of_variation, 0.0);
        assert!(agg.variance > 0.0);
    }

    #[test]
    fn test_non_finite_values_are_ignored() {
        let agg = Aggregator::aggregate(&[f64::NAN, 10.0, f64::INFINITY]);
        assert_eq!(agg.count, 1);
        assert_eq!(agg.mean, 10.0);
    }

    #[test]
    fn test_secondary_means_skip_missing_fields() {
        let records = vec![
            record(1, 8, 120.0, &[(fields::DIASTOLIC, 80.0), (fields::HEART_RATE, 70.0)]),
            record(1, 20, 140.0, &[(fields::DIASTOLIC, 90.0)]),
        ];
        let agg = Aggregator::aggregate_records(&records, utc(), 1);
        assert_eq!(agg.secondary_means.get(fields::DIASTOLIC), Some(&85.0));
        assert_eq!(agg.secondary_means.get(fields::HEART_RATE), Some(&70.0));
    }

    #[test]
    fn test_coverage_counts_distinct_days() {
        let range = DateRange {
            start: NaiveDate::from_ymd_opt(2026, 10, 5).unwrap(),
            end: NaiveDate::from_ymd_opt(2026, 10, 11).unwrap(),
            view_mode: ViewMode::Week,
        };
        let records = vec![
            record(5, 8, 1.0, &[]),
            record(5, 20, 1.0, &[]),
            record(7, 8, 1.0, &[]),
            // Outside the range
            record(12, 8, 1.0, &[]),
        ];
        let coverage = Aggregator::coverage(&records, &range, utc());
        assert!((coverage - 2.0 / 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_coverage_is_clamped() {
        let records: Vec<RawRecord> = (1..=3).map(|d| record(d, 8, 1.0, &[])).collect();
        let agg = Aggregator::aggregate_records(&records, utc(), 1);
        assert_eq!(agg.coverage, 1.0);
    }

    #[test]
    fn test_daily_totals_follow_offset() {
        let records = vec![
            record(5, 10, 300.0, &[]),
            record(5, 20, 200.0, &[]),
            record(6, 9, 250.0, &[]),
        ];

        let totals = Aggregator::daily_totals(&records, utc());
        assert_eq!(totals.len(), 2);
        assert_eq!(totals[&NaiveDate::from_ymd_opt(2026, 10, 5).unwrap()], 500.0);

        // 20:00 UTC on the 5th is already the 6th at UTC+8
        let totals = Aggregator::daily_totals(&records, FixedOffset::east_opt(8 * 3600).unwrap());
        assert_eq!(totals[&NaiveDate::from_ymd_opt(2026, 10, 5).unwrap()], 300.0);
        assert_eq!(totals[&NaiveDate::from_ymd_opt(2026, 10, 6).unwrap()], 450.0);
    }

    #[test]
    fn test_server_overrides_field_by_field() {
        let local = BucketAggregate {
            count: 3,
            total: 30.0,
            mean: 10.0,
            min: 5.0,
            max: 15.0,
            variance: 16.0,
            coefficient_of_variation: 0.4,
            ..BucketAggregate::default()
        };
        let server = PartialAggregate {
            mean: Some(12.0),
            max: Some(50.0),
            ..PartialAggregate::default()
        };

        let (merged, overridden) = Aggregator::merge_server(&local, &server);
        assert!(overridden);
        assert_eq!(merged.mean, 12.0);
        assert_eq!(merged.max, 50.0);
        assert_eq!(merged.min, 5.0);
        assert_eq!(merged.total, 30.0);
        assert_eq!(merged.count, 3);
        assert_eq!(merged.variance, local.variance);
        assert_eq!(merged.coefficient_of_variation, local.coefficient_of_variation);
    }

    #[test]
    fn test_server_non_finite_fields_are_ignored() {
        let local = BucketAggregate {
            mean: 10.0,
            ..BucketAggregate::default()
        };
        let server = PartialAggregate {
            mean: Some(f64::NAN),
            ..PartialAggregate::default()
        };
        let (merged, overridden) = Aggregator::merge_server(&local, &server);
        assert!(!overridden);
        assert_eq!(merged.mean, 10.0);
    }
}
