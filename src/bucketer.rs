//! Grouping of raw records into chart buckets
//!
//! Every strategy except `PerRecord` emits a complete, regularly spaced axis:
//! slots with no records are kept with a zero aggregate. Records are placed
//! by their calendar date and hour in the analytics timezone; records outside
//! the range are left out and every in-range record lands in exactly one
//! bucket.

use crate::aggregator::Aggregator;
use crate::models::{Bucket, DateRange, RawRecord, ViewMode};
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Offset, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const WEEKDAY_LABELS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Named bucketing grains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketStrategy {
    /// Day view: one bucket per record, ascending by time
    PerRecord,
    /// Day view: 24 hourly slots
    Hourly,
    /// Week view: seven slots, Monday first
    Weekday,
    /// Month view: one slot per calendar day
    DayOfMonth,
    /// Month view: `ceil(day / 7)` slots
    WeekOfMonth,
}

impl BucketStrategy {
    pub fn default_for(view_mode: ViewMode) -> Self {
        match view_mode {
            ViewMode::Day => BucketStrategy::PerRecord,
            ViewMode::Week => BucketStrategy::Weekday,
            ViewMode::Month => BucketStrategy::DayOfMonth,
        }
    }

    pub fn is_valid_for(&self, view_mode: ViewMode) -> bool {
        matches!(
            (self, view_mode),
            (BucketStrategy::PerRecord | BucketStrategy::Hourly, ViewMode::Day)
                | (BucketStrategy::Weekday, ViewMode::Week)
                | (
                    BucketStrategy::DayOfMonth | BucketStrategy::WeekOfMonth,
                    ViewMode::Month
                )
        )
    }
}

impl std::str::FromStr for BucketStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "per_record" | "record" => Ok(BucketStrategy::PerRecord),
            "hourly" | "hour" => Ok(BucketStrategy::Hourly),
            "weekday" => Ok(BucketStrategy::Weekday),
            "day_of_month" | "daily" => Ok(BucketStrategy::DayOfMonth),
            "week_of_month" | "weekly" => Ok(BucketStrategy::WeekOfMonth),
            _ => Err(format!("Invalid bucket strategy: {}", s)),
        }
    }
}

/// A bucket before materialization: its label and the indices of its records
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub label: String,
    pub start: Option<DateTime<Utc>>,
    /// Calendar days the slot spans, used for bucket coverage
    pub span_days: u32,
    /// Indices into the grouped record slice
    pub members: Vec<usize>,
}

/// Groups records into buckets in a fixed analytics timezone
#[derive(Debug, Clone, Copy)]
pub struct Bucketer {
    offset: FixedOffset,
}

impl Default for Bucketer {
    fn default() -> Self {
        Bucketer::new(Utc.fix())
    }
}

impl Bucketer {
    pub fn new(offset: FixedOffset) -> Self {
        Bucketer { offset }
    }

    /// Bucketer for an offset in minutes east of UTC; invalid offsets use UTC
    pub fn from_offset_minutes(minutes: i32) -> Self {
        let offset = minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| {
                warn!(minutes, "Invalid UTC offset, using UTC");
                Utc.fix()
            });
        Bucketer::new(offset)
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Calendar date of a record in the analytics timezone
    pub fn local_date(&self, record: &RawRecord) -> NaiveDate {
        record.timestamp.with_timezone(&self.offset).date_naive()
    }

    /// Records whose calendar date falls in the range, ascending by time
    pub fn in_range(&self, records: &[RawRecord], range: &DateRange) -> Vec<RawRecord> {
        let mut selected: Vec<RawRecord> = records
            .iter()
            .filter(|r| range.contains(self.local_date(r)))
            .cloned()
            .collect();
        selected.sort_by_key(|r| r.timestamp);
        selected
    }

    /// Group with the default strategy of the range's view mode
    pub fn group(&self, records: &[RawRecord], range: &DateRange) -> Vec<Bucket> {
        self.group_with(records, range, BucketStrategy::default_for(range.view_mode))
    }

    /// Group with an explicit strategy
    pub fn group_with(
        &self,
        records: &[RawRecord],
        range: &DateRange,
        strategy: BucketStrategy,
    ) -> Vec<Bucket> {
        let selected = self.in_range(records, range);
        let slots = self.assign(&selected, range, strategy);
        self.materialize(&selected, &slots, &vec![false; selected.len()])
    }

    /// Assign each record to a slot
    ///
    /// Records outside the range are not assigned. An invalid strategy for
    /// the view mode falls back to that view's default.
    pub fn assign(
        &self,
        records: &[RawRecord],
        range: &DateRange,
        strategy: BucketStrategy,
    ) -> Vec<Slot> {
        let strategy = if strategy.is_valid_for(range.view_mode) {
            strategy
        } else {
            let fallback = BucketStrategy::default_for(range.view_mode);
            warn!(
                ?strategy,
                view_mode = ?range.view_mode,
                ?fallback,
                "Bucket strategy does not fit view mode"
            );
            fallback
        };

        let in_range: Vec<usize> = (0..records.len())
            .filter(|&i| range.contains(self.local_date(&records[i])))
            .collect();

        let slots = match strategy {
            BucketStrategy::PerRecord => {
                let mut ordered = in_range;
                ordered.sort_by_key(|&i| records[i].timestamp);
                ordered
                    .into_iter()
                    .map(|i| {
                        let local = records[i].timestamp.with_timezone(&self.offset);
                        Slot {
                            label: local.format("%H:%M").to_string(),
                            start: Some(records[i].timestamp),
                            span_days: 1,
                            members: vec![i],
                        }
                    })
                    .collect()
            }
            BucketStrategy::Hourly => {
                let mut slots: Vec<Slot> = (0..24u32)
                    .map(|hour| Slot {
                        label: format!("{:02}:00", hour),
                        start: self.instant(range.start, hour),
                        span_days: 1,
                        members: Vec::new(),
                    })
                    .collect();
                for i in in_range {
                    let hour = records[i].timestamp.with_timezone(&self.offset).hour() as usize;
                    slots[hour].members.push(i);
                }
                slots
            }
            BucketStrategy::Weekday => {
                let mut slots: Vec<Slot> = WEEKDAY_LABELS
                    .iter()
                    .enumerate()
                    .map(|(day, label)| Slot {
                        label: label.to_string(),
                        start: self.instant(range.start + chrono::Days::new(day as u64), 0),
                        span_days: 1,
                        members: Vec::new(),
                    })
                    .collect();
                for i in in_range {
                    let day = self.local_date(&records[i]).weekday().num_days_from_monday();
                    slots[day as usize].members.push(i);
                }
                slots
            }
            BucketStrategy::DayOfMonth => {
                let days = range.expected_days();
                let mut slots: Vec<Slot> = (0..days)
                    .map(|day| Slot {
                        label: (day + 1).to_string(),
                        start: self.instant(range.start + chrono::Days::new(day as u64), 0),
                        span_days: 1,
                        members: Vec::new(),
                    })
                    .collect();
                for i in in_range {
                    let day = self.local_date(&records[i]).day0() as usize;
                    if let Some(slot) = slots.get_mut(day) {
                        slot.members.push(i);
                    }
                }
                slots
            }
            BucketStrategy::WeekOfMonth => {
                let days = range.expected_days();
                let weeks = days.div_ceil(7);
                let mut slots: Vec<Slot> = (0..weeks)
                    .map(|week| Slot {
                        label: format!("W{}", week + 1),
                        start: self.instant(range.start + chrono::Days::new(week as u64 * 7), 0),
                        span_days: (days - week * 7).min(7),
                        members: Vec::new(),
                    })
                    .collect();
                for i in in_range {
                    let week = week_of_month(self.local_date(&records[i])) as usize - 1;
                    if let Some(slot) = slots.get_mut(week) {
                        slot.members.push(i);
                    }
                }
                slots
            }
        };

        debug!(
            ?strategy,
            slots = slots.len(),
            records = records.len(),
            "Assigned records to slots"
        );
        slots
    }

    /// Build buckets from slots; `abnormal` is parallel to `records`
    pub fn materialize(&self, records: &[RawRecord], slots: &[Slot], abnormal: &[bool]) -> Vec<Bucket> {
        slots
            .iter()
            .map(|slot| {
                let points: Vec<RawRecord> =
                    slot.members.iter().map(|&i| records[i].clone()).collect();
                let mut aggregate =
                    Aggregator::aggregate_records(&points, self.offset, slot.span_days);
                aggregate.abnormal_count = slot
                    .members
                    .iter()
                    .filter(|&&i| abnormal.get(i).copied().unwrap_or(false))
                    .count();

                Bucket {
                    label: slot.label.clone(),
                    start: slot.start,
                    points,
                    aggregate,
                }
            })
            .collect()
    }

    /// Start instant of a local date and hour
    fn instant(&self, date: NaiveDate, hour: u32) -> Option<DateTime<Utc>> {
        let naive = date.and_hms_opt(hour, 0, 0)?;
        self.offset
            .from_local_datetime(&naive)
            .single()
            .map(|local| local.with_timezone(&Utc))
    }
}

/// Week of month as `ceil(day / 7)`, 1-based
pub fn week_of_month(date: NaiveDate) -> u32 {
    date.day().div_ceil(7)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::date_range::DateRangeCalculator;
    use crate::models::MetricType;
    use std::collections::BTreeMap;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn record(id: &str, ts: DateTime<Utc>, value: f64) -> RawRecord {
        RawRecord {
            id: id.to_string(),
            user_id: "u1".to_string(),
            metric_type: MetricType::WaterIntake,
            timestamp: ts,
            primary_value: value,
            secondary_values: BTreeMap::new(),
            notes: None,
        }
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn calculator() -> DateRangeCalculator {
        DateRangeCalculator::with_today(date(2026, 10, 15))
    }

    #[test]
    fn test_per_record_buckets_are_ordered() {
        let range = calculator().compute_range(ViewMode::Day, date(2026, 10, 15));
        let records = vec![
            record("b", at(2026, 10, 15, 20, 0), 300.0),
            record("a", at(2026, 10, 15, 8, 0), 200.0),
        ];

        let buckets = Bucketer::default().group(&records, &range);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].label, "08:00");
        assert_eq!(buckets[1].label, "20:00");
        assert_eq!(buckets[0].points[0].id, "a");
    }

    #[test]
    fn test_hourly_keeps_empty_slots() {
        let range = calculator().compute_range(ViewMode::Day, date(2026, 10, 15));
        let records = vec![
            record("a", at(2026, 10, 15, 8, 10), 200.0),
            record("b", at(2026, 10, 15, 8, 50), 150.0),
            record("c", at(2026, 10, 15, 13, 0), 100.0),
        ];

        let buckets = Bucketer::default().group_with(&records, &range, BucketStrategy::Hourly);
        assert_eq!(buckets.len(), 24);
        assert_eq!(buckets[8].aggregate.count, 2);
        assert_eq!(buckets[8].aggregate.total, 350.0);
        assert_eq!(buckets[13].aggregate.count, 1);
        assert_eq!(buckets[0].aggregate.count, 0);
        assert_eq!(buckets[0].aggregate.mean, 0.0);
    }

    #[test]
    fn test_weekday_buckets_start_on_monday() {
        let range = calculator().compute_range(ViewMode::Week, date(2026, 10, 8));
        let records = vec![
            // Monday
            record("a", at(2026, 10, 5, 9, 0), 100.0),
            // Sunday
            record("b", at(2026, 10, 11, 9, 0), 200.0),
            record("c", at(2026, 10, 11, 18, 0), 300.0),
            // Next week, outside the range
            record("d", at(2026, 10, 12, 9, 0), 999.0),
        ];

        let buckets = Bucketer::default().group(&records, &range);
        let labels: Vec<&str> = buckets.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, WEEKDAY_LABELS.to_vec());
        assert_eq!(buckets[0].aggregate.total, 100.0);
        assert_eq!(buckets[6].aggregate.total, 500.0);
        assert_eq!(buckets[6].aggregate.mean, 250.0);
        let placed: usize = buckets.iter().map(|b| b.points.len()).sum();
        assert_eq!(placed, 3);
    }

    #[test]
    fn test_month_by_day_and_by_week() {
        let range = calculator().compute_range(ViewMode::Month, date(2026, 9, 1));
        let records = vec![
            record("a", at(2026, 9, 1, 9, 0), 100.0),
            record("b", at(2026, 9, 7, 9, 0), 100.0),
            record("c", at(2026, 9, 8, 9, 0), 100.0),
            record("d", at(2026, 9, 30, 9, 0), 100.0),
        ];
        let bucketer = Bucketer::default();

        let by_day = bucketer.group_with(&records, &range, BucketStrategy::DayOfMonth);
        assert_eq!(by_day.len(), 30);
        assert_eq!(by_day[29].label, "30");
        assert_eq!(by_day[29].aggregate.count, 1);

        let by_week = bucketer.group_with(&records, &range, BucketStrategy::WeekOfMonth);
        assert_eq!(by_week.len(), 5);
        assert_eq!(by_week[0].aggregate.count, 2);
        assert_eq!(by_week[1].aggregate.count, 1);
        assert_eq!(by_week[4].aggregate.count, 1);
        assert_eq!(by_week[4].label, "W5");
    }

    #[test]
    fn test_week_of_month() {
        assert_eq!(week_of_month(date(2026, 9, 1)), 1);
        assert_eq!(week_of_month(date(2026, 9, 7)), 1);
        assert_eq!(week_of_month(date(2026, 9, 8)), 2);
        assert_eq!(week_of_month(date(2026, 9, 29)), 5);
    }

    #[test]
    fn test_timezone_moves_record_to_local_day() {
        let range = calculator().compute_range(ViewMode::Day, date(2026, 10, 15));
        // 23:30 UTC on the 14th is 07:30 on the 15th at UTC+8
        let records = vec![record("a", at(2026, 10, 14, 23, 30), 250.0)];

        let utc = Bucketer::default().group(&records, &range);
        assert!(utc.is_empty());

        let shanghai = Bucketer::from_offset_minutes(480).group(&records, &range);
        assert_eq!(shanghai.len(), 1);
        assert_eq!(shanghai[0].label, "07:30");
    }

    #[test]
    fn test_out_of_range_offset_uses_utc() {
        let utc = FixedOffset::east_opt(0).unwrap();
        assert_eq!(Bucketer::from_offset_minutes(40_000_000).offset(), utc);
        assert_eq!(Bucketer::from_offset_minutes(i32::MIN).offset(), utc);
        assert_eq!(Bucketer::from_offset_minutes(25 * 60).offset(), utc);
        assert_eq!(
            Bucketer::from_offset_minutes(-300).offset(),
            FixedOffset::west_opt(5 * 3600).unwrap()
        );
    }

    #[test]
    fn test_invalid_strategy_falls_back() {
        let range = calculator().compute_range(ViewMode::Week, date(2026, 10, 8));
        let buckets = Bucketer::default().group_with(&[], &range, BucketStrategy::Hourly);
        assert_eq!(buckets.len(), 7);
    }

    #[test]
    fn test_materialize_counts_abnormal_members() {
        let range = calculator().compute_range(ViewMode::Day, date(2026, 10, 15));
        let records = vec![
            record("a", at(2026, 10, 15, 8, 0), 200.0),
            record("b", at(2026, 10, 15, 8, 30), 300.0),
        ];
        let bucketer = Bucketer::default();
        let slots = bucketer.assign(&records, &range, BucketStrategy::Hourly);
        let buckets = bucketer.materialize(&records, &slots, &[false, true]);
        assert_eq!(buckets[8].aggregate.abnormal_count, 1);
    }
}
