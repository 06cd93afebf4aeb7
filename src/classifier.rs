//! Clinical classification of diary values
//!
//! Each metric owns static, ordered threshold tables. Rules are evaluated top
//! to bottom and the first match wins, so the order of a table encodes
//! precedence (a 185/70 reading is a crisis, never "elevated").
//!
//! Tables:
//! - Blood pressure: crisis → stage 2 → stage 1 → elevated → low → normal
//! - Urine: single void (<200 / >500 ml) and daily total (<800 / >2000 ml)
//! - Ultrafiltration: per exchange and drainage/infusion ratio, worst wins
//! - Water intake: daily total above 2000 ml
//! - Weight: consecutive change against the recent fluctuation band

use crate::metric::{ClassificationContext, MetricDescriptor};
use crate::models::{fields, BucketAggregate, MetricType, RawRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Classification categories across all metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Normal,
    Low,
    High,
    Elevated,
    HypertensionStage1,
    HypertensionStage2,
    HypertensiveCrisis,
    Abnormal,
    Severe,
    NotableChange,
    Exceeded,
}

impl Category {
    pub fn label(&self) -> &'static str {
        match self {
            Category::Normal => "Normal",
            Category::Low => "Low",
            Category::High => "High",
            Category::Elevated => "Elevated",
            Category::HypertensionStage1 => "Hypertension Stage 1",
            Category::HypertensionStage2 => "Hypertension Stage 2",
            Category::HypertensiveCrisis => "Hypertensive Crisis",
            Category::Abnormal => "Abnormal",
            Category::Severe => "Severe",
            Category::NotableChange => "Notable Change",
            Category::Exceeded => "Exceeded",
        }
    }

    /// Chart color for the category
    pub fn color(&self) -> &'static str {
        match self {
            Category::Normal => "#52c41a",
            Category::Low => "#1890ff",
            Category::Elevated => "#fadb14",
            Category::HypertensionStage1 => "#faad14",
            Category::High | Category::Abnormal | Category::Exceeded => "#fa8c16",
            Category::NotableChange => "#fa8c16",
            Category::HypertensionStage2 => "#f5222d",
            Category::HypertensiveCrisis | Category::Severe => "#a8071a",
        }
    }

    /// Elevated and stage 1 readings are shown but not counted as abnormal
    pub fn is_abnormal(&self) -> bool {
        !matches!(
            self,
            Category::Normal | Category::Elevated | Category::HypertensionStage1
        )
    }

    pub fn is_severe(&self) -> bool {
        matches!(self, Category::HypertensiveCrisis | Category::Severe)
    }

    fn rank(&self) -> u8 {
        if self.is_severe() {
            2
        } else if self.is_abnormal() {
            1
        } else {
            0
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Outcome of classifying one record or aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub category: Category,
    pub label: String,
    pub color: String,
    pub is_abnormal: bool,
    pub is_severe: bool,
}

impl From<Category> for ClassificationResult {
    fn from(category: Category) -> Self {
        ClassificationResult {
            category,
            label: category.label().to_string(),
            color: category.color().to_string(),
            is_abnormal: category.is_abnormal(),
            is_severe: category.is_severe(),
        }
    }
}

/// Value a threshold condition reads
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Field {
    Primary,
    Secondary(&'static str),
    /// `numerator / denominator` of two secondary values; absent when the
    /// denominator is missing or not positive
    Ratio(&'static str, &'static str),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Comparison {
    /// value < bound
    Below(f64),
    /// value >= bound
    AtLeast(f64),
    /// value > bound
    Above(f64),
}

impl Comparison {
    fn holds(&self, value: f64) -> bool {
        match *self {
            Comparison::Below(bound) => value < bound,
            Comparison::AtLeast(bound) => value >= bound,
            Comparison::Above(bound) => value > bound,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Condition {
    pub field: Field,
    pub comparison: Comparison,
}

/// How the conditions of a rule combine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Join {
    Any,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdRule {
    pub category: Category,
    pub join: Join,
    pub conditions: &'static [Condition],
}

/// Ordered rules with a fallback category
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdTable {
    pub name: &'static str,
    pub rules: &'static [ThresholdRule],
    pub default: Category,
}

const fn cond(field: Field, comparison: Comparison) -> Condition {
    Condition { field, comparison }
}

const SYSTOLIC: Field = Field::Primary;
const DIASTOLIC: Field = Field::Secondary(fields::DIASTOLIC);
const DRAINAGE_RATIO: Field = Field::Ratio(fields::DRAINAGE_VOLUME, fields::INFUSION_VOLUME);

pub static BLOOD_PRESSURE: ThresholdTable = ThresholdTable {
    name: "blood_pressure",
    rules: &[
        ThresholdRule {
            category: Category::HypertensiveCrisis,
            join: Join::Any,
            conditions: &[
                cond(SYSTOLIC, Comparison::AtLeast(180.0)),
                cond(DIASTOLIC, Comparison::AtLeast(120.0)),
            ],
        },
        ThresholdRule {
            category: Category::HypertensionStage2,
            join: Join::Any,
            conditions: &[
                cond(SYSTOLIC, Comparison::AtLeast(140.0)),
                cond(DIASTOLIC, Comparison::AtLeast(90.0)),
            ],
        },
        ThresholdRule {
            category: Category::HypertensionStage1,
            join: Join::Any,
            conditions: &[
                cond(SYSTOLIC, Comparison::AtLeast(130.0)),
                cond(DIASTOLIC, Comparison::AtLeast(80.0)),
            ],
        },
        ThresholdRule {
            category: Category::Elevated,
            join: Join::All,
            conditions: &[
                cond(SYSTOLIC, Comparison::AtLeast(120.0)),
                cond(DIASTOLIC, Comparison::Below(80.0)),
            ],
        },
        ThresholdRule {
            category: Category::Low,
            join: Join::Any,
            conditions: &[
                cond(SYSTOLIC, Comparison::Below(90.0)),
                cond(DIASTOLIC, Comparison::Below(60.0)),
            ],
        },
    ],
    default: Category::Normal,
};

pub static URINE_SINGLE_VOID: ThresholdTable = ThresholdTable {
    name: "urine_single_void",
    rules: &[
        ThresholdRule {
            category: Category::Low,
            join: Join::Any,
            conditions: &[cond(Field::Primary, Comparison::Below(200.0))],
        },
        ThresholdRule {
            category: Category::High,
            join: Join::Any,
            conditions: &[cond(Field::Primary, Comparison::Above(500.0))],
        },
    ],
    default: Category::Normal,
};

pub static URINE_DAILY: ThresholdTable = ThresholdTable {
    name: "urine_daily",
    rules: &[
        ThresholdRule {
            category: Category::Low,
            join: Join::Any,
            conditions: &[cond(Field::Primary, Comparison::Below(800.0))],
        },
        ThresholdRule {
            category: Category::High,
            join: Join::Any,
            conditions: &[cond(Field::Primary, Comparison::Above(2000.0))],
        },
    ],
    default: Category::Normal,
};

pub static ULTRAFILTRATION: ThresholdTable = ThresholdTable {
    name: "ultrafiltration",
    rules: &[
        ThresholdRule {
            category: Category::Severe,
            join: Join::Any,
            conditions: &[
                cond(Field::Primary, Comparison::Below(-500.0)),
                cond(Field::Primary, Comparison::Above(2000.0)),
            ],
        },
        ThresholdRule {
            category: Category::Abnormal,
            join: Join::Any,
            conditions: &[
                cond(Field::Primary, Comparison::Below(0.0)),
                cond(Field::Primary, Comparison::Above(1500.0)),
            ],
        },
    ],
    default: Category::Normal,
};

pub static DRAINAGE: ThresholdTable = ThresholdTable {
    name: "drainage_ratio",
    rules: &[
        ThresholdRule {
            category: Category::Severe,
            join: Join::Any,
            conditions: &[
                cond(DRAINAGE_RATIO, Comparison::Below(0.5)),
                cond(DRAINAGE_RATIO, Comparison::Above(2.0)),
            ],
        },
        ThresholdRule {
            category: Category::Abnormal,
            join: Join::Any,
            conditions: &[
                cond(DRAINAGE_RATIO, Comparison::Below(0.8)),
                cond(DRAINAGE_RATIO, Comparison::Above(1.5)),
            ],
        },
    ],
    default: Category::Normal,
};

pub static WATER_DAILY: ThresholdTable = ThresholdTable {
    name: "water_daily",
    rules: &[ThresholdRule {
        category: Category::Exceeded,
        join: Join::Any,
        conditions: &[cond(Field::Primary, Comparison::Above(2000.0))],
    }],
    default: Category::Normal,
};

/// Thing being classified; the variant selects which scale applies
#[derive(Debug, Clone, Copy)]
pub enum Subject<'a> {
    /// A single measurement (single void, one exchange, one reading)
    Record(&'a RawRecord),
    /// Sum of one calendar day's measurements
    DailyTotal(f64),
    /// Bucket or range aggregate, classified on its means
    Aggregate(&'a BucketAggregate),
}

impl Subject<'_> {
    fn value(&self, field: Field) -> Option<f64> {
        let value = match (self, field) {
            (Subject::Record(record), Field::Primary) => Some(record.primary_value),
            (Subject::Record(record), Field::Secondary(name)) => record.secondary(name),
            (Subject::Record(record), Field::Ratio(num, den)) => {
                ratio(record.secondary(num), record.secondary(den))
            }
            (Subject::DailyTotal(total), Field::Primary) => Some(*total),
            (Subject::DailyTotal(_), _) => None,
            (Subject::Aggregate(agg), Field::Primary) => (agg.count > 0).then_some(agg.mean),
            (Subject::Aggregate(agg), Field::Secondary(name)) => {
                agg.secondary_means.get(name).copied()
            }
            (Subject::Aggregate(agg), Field::Ratio(num, den)) => ratio(
                agg.secondary_means.get(num).copied(),
                agg.secondary_means.get(den).copied(),
            ),
        };
        value.filter(|v| v.is_finite())
    }
}

fn ratio(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    match (numerator, denominator) {
        (Some(n), Some(d)) if d > 0.0 => Some(n / d),
        _ => None,
    }
}

impl ThresholdTable {
    /// First matching rule's category, or the default
    ///
    /// Conditions on absent fields are skipped; a rule with no evaluable
    /// condition does not match.
    pub fn evaluate(&self, subject: &Subject<'_>) -> Category {
        for rule in self.rules {
            let outcomes: Vec<bool> = rule
                .conditions
                .iter()
                .filter_map(|c| subject.value(c.field).map(|v| c.comparison.holds(v)))
                .collect();

            if outcomes.is_empty() {
                continue;
            }

            let matched = match rule.join {
                Join::Any => outcomes.iter().any(|&o| o),
                Join::All => outcomes.iter().all(|&o| o),
            };

            if matched {
                return rule.category;
            }
        }
        self.default
    }
}

/// Per-category counts over a set of classification results
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClassificationSummary {
    pub counts: BTreeMap<String, usize>,
    pub abnormal_count: usize,
    pub severe_count: usize,
}

/// Stateless classifier driven by metric descriptors
pub struct Classifier;

impl Classifier {
    /// Classify a record, daily total or aggregate of the given metric
    pub fn classify(subject: Subject<'_>, metric: MetricType) -> ClassificationResult {
        let descriptor = MetricDescriptor::for_metric(metric);

        let category = match subject {
            Subject::DailyTotal(_) => descriptor
                .daily_table
                .map(|table| table.evaluate(&subject))
                .unwrap_or(Category::Normal),
            Subject::Record(_) | Subject::Aggregate(_) => {
                worst_of(descriptor.record_tables, &subject)
            }
        };

        ClassificationResult::from(category)
    }

    /// Classify an ordered series of records of one metric
    ///
    /// Weight needs the preceding measurements to judge a change; every other
    /// metric is classified record by record. Results are returned in the
    /// order of `records`.
    pub fn classify_series(
        records: &[RawRecord],
        metric: MetricType,
        weight_window: usize,
    ) -> Vec<ClassificationResult> {
        let descriptor = MetricDescriptor::for_metric(metric);

        match descriptor.context {
            ClassificationContext::Table => records
                .iter()
                .map(|r| Self::classify(Subject::Record(r), metric))
                .collect(),
            ClassificationContext::ConsecutiveChange => {
                let mut order: Vec<usize> = (0..records.len()).collect();
                order.sort_by_key(|&i| records[i].timestamp);

                let values: Vec<f64> = order.iter().map(|&i| records[i].primary_value).collect();
                let flags = notable_changes(&values, weight_window);

                let mut results = vec![ClassificationResult::from(Category::Normal); records.len()];
                for (position, &index) in order.iter().enumerate() {
                    if flags[position] {
                        results[index] = ClassificationResult::from(Category::NotableChange);
                    }
                }
                results
            }
        }
    }

    /// Count categories and abnormal results
    pub fn summarize(results: &[ClassificationResult]) -> ClassificationSummary {
        let mut summary = ClassificationSummary::default();
        for result in results {
            *summary.counts.entry(result.label.clone()).or_insert(0) += 1;
            if result.is_abnormal {
                summary.abnormal_count += 1;
            }
            if result.is_severe {
                summary.severe_count += 1;
            }
        }
        summary
    }
}

/// Worst category across tables; ties keep the earlier table
fn worst_of(tables: &[&ThresholdTable], subject: &Subject<'_>) -> Category {
    let mut worst = Category::Normal;
    for table in tables {
        let category = table.evaluate(subject);
        if category.rank() > worst.rank() {
            worst = category;
        }
    }
    worst
}

/// Flag values whose change from the previous value exceeds half the
/// fluctuation band (max - min) of the preceding `window` values
///
/// At least two preceding values are needed before anything is flagged.
pub fn notable_changes(values: &[f64], window: usize) -> Vec<bool> {
    let window = window.max(2);
    let mut flags = vec![false; values.len()];

    for i in 2..values.len() {
        let from = i.saturating_sub(window);
        let recent = &values[from..i];

        let band = recent.iter().cloned().fold(f64::MIN, f64::max)
            - recent.iter().cloned().fold(f64::MAX, f64::min);
        let change = (values[i] - values[i - 1]).abs();

        if change > band / 2.0 {
            debug!(index = i, change, band, "Notable weight change");
            flags[i] = true;
        }
    }
    flags
}
