//! Trend analysis between a period and its reference
//!
//! A server-supplied trend signal always wins. Otherwise the current level is
//! compared with the reference level: high variability reads as
//! fluctuating, a change beyond the stability band as increasing or
//! decreasing, anything else as stable.

use crate::aggregator::{coefficient_of_variation, Aggregator};
use crate::metric::ValueKind;
use crate::models::{Bucket, BucketAggregate, ServerTrend, Trend, TrendDirection};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Trend detection thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendConfig {
    /// Changes within +/- this percentage are stable (default: 5)
    pub stability_band_pct: f64,

    /// Coefficient of variation above which a period is fluctuating
    /// (default: 0.15)
    pub fluctuation_cv: f64,

    /// Fewer points than this are never judged fluctuating (default: 3)
    pub min_points_for_fluctuation: usize,
}

impl Default for TrendConfig {
    fn default() -> Self {
        TrendConfig {
            stability_band_pct: 5.0,
            fluctuation_cv: 0.15,
            min_points_for_fluctuation: 3,
        }
    }
}

/// Level and variability of the period being judged
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendSample {
    /// Mean reading for averaged metrics, mean daily total for summed ones
    pub level: f64,
    pub variability: f64,
    pub points: usize,
}

impl TrendSample {
    /// Sample from a period aggregate and its buckets
    ///
    /// Summed metrics take their variability from the non-empty bucket
    /// totals; single volumes vary too much to mean anything.
    pub fn new(aggregate: &BucketAggregate, buckets: &[Bucket], kind: ValueKind) -> Self {
        let variability = match kind {
            ValueKind::Averaged => aggregate.coefficient_of_variation,
            ValueKind::Summed => {
                let totals: Vec<f64> = buckets
                    .iter()
                    .filter(|b| !b.aggregate.is_empty())
                    .map(|b| b.aggregate.total)
                    .collect();
                let spread = Aggregator::aggregate(&totals);
                coefficient_of_variation(spread.std_dev(), spread.mean)
            }
        };

        TrendSample {
            level: level(aggregate, kind),
            variability,
            points: aggregate.count,
        }
    }
}

/// Comparable level of an aggregate
pub fn level(aggregate: &BucketAggregate, kind: ValueKind) -> f64 {
    match kind {
        ValueKind::Averaged => aggregate.mean,
        ValueKind::Summed if aggregate.distinct_days > 0 => {
            aggregate.total / aggregate.distinct_days as f64
        }
        ValueKind::Summed => aggregate.total,
    }
}

/// What the current period is compared against
#[derive(Debug, Clone, Copy)]
pub enum TrendReference<'a> {
    /// Level of the preceding period
    Previous(f64),
    /// Externally supplied baseline level
    Baseline(f64),
    /// First against last non-empty bucket of the current period
    WithinPeriod(&'a [Bucket], ValueKind),
    Unavailable,
}

/// Trend analysis engine
pub struct TrendAnalyzer {
    config: TrendConfig,
}

impl TrendAnalyzer {
    pub fn new() -> Self {
        TrendAnalyzer {
            config: TrendConfig::default(),
        }
    }

    pub fn with_config(config: TrendConfig) -> Self {
        TrendAnalyzer { config }
    }

    /// Direction and percentage change of `current` against `reference`
    pub fn analyze_trend(
        &self,
        current: &TrendSample,
        reference: TrendReference<'_>,
        server_signal: Option<ServerTrend>,
    ) -> Trend {
        let (current_level, reference_level) = match reference {
            TrendReference::Previous(level) | TrendReference::Baseline(level) => {
                (Some(current.level), Some(level))
            }
            TrendReference::WithinPeriod(buckets, kind) => {
                let levels: Vec<f64> = buckets
                    .iter()
                    .filter(|b| !b.aggregate.is_empty())
                    .map(|b| level(&b.aggregate, kind))
                    .collect();
                match (levels.first(), levels.last()) {
                    (Some(&first), Some(&last)) if levels.len() >= 2 => (Some(last), Some(first)),
                    _ => (None, None),
                }
            }
            TrendReference::Unavailable => (None, None),
        };

        let percentage = match (current_level, reference_level) {
            (Some(cur), Some(base)) => percent_change(base, cur),
            _ => 0.0,
        };

        if let Some(signal) = server_signal {
            debug!(?signal, "Using server trend signal");
            return Trend {
                direction: signal.into(),
                percentage,
            };
        }

        if current.points == 0 {
            return Trend::default();
        }

        let direction = if current.points >= self.config.min_points_for_fluctuation
            && current.variability > self.config.fluctuation_cv
        {
            TrendDirection::Fluctuating
        } else if reference_level.is_none() {
            TrendDirection::Stable
        } else {
            Self::determine_trend(percentage, self.config.stability_band_pct)
        };

        debug!(?direction, percentage, ?reference, "Analyzed trend");
        Trend {
            direction,
            percentage,
        }
    }

    /// Direction of a percentage change given a stability band
    fn determine_trend(percentage: f64, band: f64) -> TrendDirection {
        if percentage > band {
            TrendDirection::Increasing
        } else if percentage < -band {
            TrendDirection::Decreasing
        } else {
            TrendDirection::Stable
        }
    }
}

impl Default for TrendAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Signed percentage change from `base` to `current`, 0 for a zero base
fn percent_change(base: f64, current: f64) -> f64 {
    if base == 0.0 || !base.is_finite() || !current.is_finite() {
        return 0.0;
    }
    let change = (current - base) / base.abs() * 100.0;
    if change.is_finite() {
        change
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(level: f64, variability: f64, points: usize) -> TrendSample {
        TrendSample {
            level,
            variability,
            points,
        }
    }

    fn bucket(total: f64, count: usize) -> Bucket {
        Bucket {
            label: "x".to_string(),
            start: None,
            points: Vec::new(),
            aggregate: BucketAggregate {
                count,
                total,
                mean: if count > 0 { total / count as f64 } else { 0.0 },
                distinct_days: if count > 0 { 1 } else { 0 },
                ..BucketAggregate::default()
            },
        }
    }

    #[test]
    fn test_increasing_and_decreasing() {
        let analyzer = TrendAnalyzer::new();

        let trend = analyzer.analyze_trend(&sample(110.0, 0.05, 5), TrendReference::Previous(100.0), None);
        assert_eq!(trend.direction, TrendDirection::Increasing);
        assert!((trend.percentage - 10.0).abs() < 1e-9);

        let trend = analyzer.analyze_trend(&sample(90.0, 0.05, 5), TrendReference::Baseline(100.0), None);
        assert_eq!(trend.direction, TrendDirection::Decreasing);
        assert!((trend.percentage + 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_stable_within_band() {
        let analyzer = TrendAnalyzer::new();
        let trend = analyzer.analyze_trend(&sample(102.0, 0.05, 5), TrendReference::Previous(100.0), None);
        assert_eq!(trend.direction, TrendDirection::Stable);
    }

    #[test]
    fn test_high_variability_is_fluctuating() {
        let analyzer = TrendAnalyzer::new();
        let trend = analyzer.analyze_trend(&sample(130.0, 0.4, 6), TrendReference::Previous(100.0), None);
        assert_eq!(trend.direction, TrendDirection::Fluctuating);
        assert!((trend.percentage - 30.0).abs() < 1e-9);

        // Too few points to call it fluctuating
        let trend = analyzer.analyze_trend(&sample(130.0, 0.4, 2), TrendReference::Previous(100.0), None);
        assert_eq!(trend.direction, TrendDirection::Increasing);
    }

    #[test]
    fn test_server_signal_takes_precedence() {
        let analyzer = TrendAnalyzer::new();
        let trend = analyzer.analyze_trend(
            &sample(80.0, 0.5, 10),
            TrendReference::Previous(100.0),
            Some(ServerTrend::Up),
        );
        assert_eq!(trend.direction, TrendDirection::Increasing);

        let trend = analyzer.analyze_trend(&sample(0.0, 0.0, 0), TrendReference::Unavailable, Some(ServerTrend::Stable));
        assert_eq!(trend.direction, TrendDirection::Stable);
        assert_eq!(trend.percentage, 0.0);
    }

    #[test]
    fn test_no_reference_is_stable() {
        let analyzer = TrendAnalyzer::new();
        let trend = analyzer.analyze_trend(&sample(120.0, 0.0, 1), TrendReference::Unavailable, None);
        assert_eq!(trend, Trend::default());
    }

    #[test]
    fn test_zero_reference_has_zero_percentage() {
        let analyzer = TrendAnalyzer::new();
        let trend = analyzer.analyze_trend(&sample(50.0, 0.0, 3), TrendReference::Previous(0.0), None);
        assert_eq!(trend.percentage, 0.0);
        assert_eq!(trend.direction, TrendDirection::Stable);
    }

    #[test]
    fn test_within_period_compares_first_and_last_buckets() {
        let analyzer = TrendAnalyzer::new();
        let buckets = vec![bucket(100.0, 1), bucket(0.0, 0), bucket(150.0, 1)];
        let trend = analyzer.analyze_trend(
            &sample(125.0, 0.0, 2),
            TrendReference::WithinPeriod(&buckets, ValueKind::Averaged),
            None,
        );
        assert_eq!(trend.direction, TrendDirection::Increasing);
        assert!((trend.percentage - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_summed_level_is_daily_mean() {
        let agg = BucketAggregate {
            count: 6,
            total: 3000.0,
            mean: 500.0,
            distinct_days: 2,
            ..BucketAggregate::default()
        };
        assert_eq!(level(&agg, ValueKind::Summed), 1500.0);
        assert_eq!(level(&agg, ValueKind::Averaged), 500.0);
    }

    #[test]
    fn test_summed_variability_uses_bucket_totals() {
        let buckets = vec![bucket(1000.0, 4), bucket(1000.0, 2), bucket(0.0, 0)];
        let agg = BucketAggregate {
            count: 6,
            total: 2000.0,
            mean: 2000.0 / 6.0,
            coefficient_of_variation: 0.9,
            distinct_days: 2,
            ..BucketAggregate::default()
        };
        let sample = TrendSample::new(&agg, &buckets, ValueKind::Summed);
        assert_eq!(sample.variability, 0.0);
        assert_eq!(sample.level, 1000.0);
    }
}
