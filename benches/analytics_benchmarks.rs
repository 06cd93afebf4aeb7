use chrono::{Duration, NaiveDate, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pd_diary::aggregator::Aggregator;
use pd_diary::bucketer::{BucketStrategy, Bucketer};
use pd_diary::classifier::Classifier;
use pd_diary::date_range::DateRangeCalculator;
use pd_diary::models::fields;
use pd_diary::{MetricType, RawRecord, ViewMode};
use std::collections::BTreeMap;

/// Benchmarks for the per-refresh computation
///
/// Record counts cover a sparse month up to a heavily logged one.

fn create_records(count: usize, metric: MetricType) -> Vec<RawRecord> {
    let origin = Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap();
    let step = (31 * 24 * 60) / count.max(1) as i64;

    (0..count)
        .map(|i| {
            let mut secondary_values = BTreeMap::new();
            secondary_values.insert(fields::DIASTOLIC.to_string(), 70.0 + (i % 40) as f64);
            RawRecord {
                id: format!("bench-{}", i),
                user_id: "bench".to_string(),
                metric_type: metric,
                timestamp: origin + Duration::minutes(i as i64 * step),
                primary_value: 100.0 + (i % 90) as f64,
                secondary_values,
                notes: None,
            }
        })
        .collect()
}

fn bench_grouping(c: &mut Criterion) {
    let mut group = c.benchmark_group("Month Grouping");

    let calculator = DateRangeCalculator::with_today(NaiveDate::from_ymd_opt(2026, 10, 31).unwrap());
    let range = calculator.compute_range(ViewMode::Month, NaiveDate::from_ymd_opt(2026, 10, 1).unwrap());
    let bucketer = Bucketer::default();

    for &size in &[31, 200, 1000, 5000] {
        let records = create_records(size, MetricType::UrineOutput);

        group.throughput(Throughput::Elements(size as u64));
        for strategy in [BucketStrategy::DayOfMonth, BucketStrategy::WeekOfMonth] {
            group.bench_with_input(
                BenchmarkId::new(format!("{:?}", strategy), size),
                &records,
                |b, records| {
                    b.iter(|| bucketer.group_with(black_box(records), &range, strategy));
                },
            );
        }
    }

    group.finish();
}

fn bench_aggregation(c: &mut Criterion) {
    let mut group = c.benchmark_group("Aggregation");

    for &size in &[10, 1000, 100_000] {
        let values: Vec<f64> = (0..size).map(|i| 800.0 + (i % 400) as f64).collect();

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("aggregate", size), &values, |b, values| {
            b.iter(|| Aggregator::aggregate(black_box(values)));
        });
    }

    group.finish();
}

fn bench_classification(c: &mut Criterion) {
    let mut group = c.benchmark_group("Classification");

    for &size in &[100, 1000] {
        let pressure = create_records(size, MetricType::BloodPressure);
        let weight = create_records(size, MetricType::Weight);

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(
            BenchmarkId::new("blood_pressure", size),
            &pressure,
            |b, records| {
                b.iter(|| Classifier::classify_series(black_box(records), MetricType::BloodPressure, 7));
            },
        );
        group.bench_with_input(BenchmarkId::new("weight", size), &weight, |b, records| {
            b.iter(|| Classifier::classify_series(black_box(records), MetricType::Weight, 7));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_grouping, bench_aggregation, bench_classification);
criterion_main!(benches);
