//! Diary session: the refresh / navigate surface for one user and metric
//!
//! A refresh runs in three steps so that several can be in flight at once:
//! [`DiarySession::begin`] issues a request token and fixes the range,
//! [`DiarySession::load`] awaits the repository and computes the result,
//! [`DiarySession::commit`] publishes it only if no newer request was issued
//! in between. Whatever order loads complete in, the caller only ever
//! observes the latest request's result.

use crate::aggregator::Aggregator;
use crate::bucketer::{BucketStrategy, Bucketer};
use crate::classifier::{ClassificationSummary, Classifier, Subject};
use crate::config::AnalyticsConfig;
use crate::date_range::{dimension_key, DateRangeCalculator};
use crate::error::{DiaryError, Result};
use crate::metadata::MetadataAssembler;
use crate::metric::{ClassificationContext, MetricDescriptor};
use crate::models::{
    Bucket, DateRange, Dimension, Direction, Metadata, MetricType, PartialAggregate, RawRecord,
    ViewMode,
};
use crate::repository::RecordRepository;
use crate::trend::{level, TrendAnalyzer, TrendReference, TrendSample};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn, Level};

/// Monotonically increasing refresh identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestToken(u64);

impl RequestToken {
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Issues request tokens and tells whether one is still the latest
#[derive(Debug, Default)]
pub struct RequestTracker {
    latest: u64,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&mut self) -> RequestToken {
        self.latest += 1;
        RequestToken(self.latest)
    }

    pub fn is_current(&self, token: RequestToken) -> bool {
        token.0 == self.latest
    }
}

/// A refresh that has been started but not yet loaded
#[derive(Debug, Clone)]
pub struct RefreshRequest {
    pub token: RequestToken,
    pub range: DateRange,
}

/// A computed refresh waiting to be committed
#[derive(Debug, Clone)]
pub struct LoadedRefresh {
    pub token: RequestToken,
    pub result: RefreshResult,
}

/// What presentation layers receive from a refresh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshResult {
    pub range: DateRange,
    pub buckets: Vec<Bucket>,
    pub metadata: Metadata,
    pub is_loading: bool,

    /// Human-readable failure message; data is empty when set
    pub error: Option<String>,
}

impl RefreshResult {
    /// Empty result carrying a failure message
    pub fn failed(range: DateRange, error: &DiaryError) -> Self {
        RefreshResult {
            range,
            buckets: Vec::new(),
            metadata: Metadata::default(),
            is_loading: false,
            error: Some(error.user_message()),
        }
    }
}

/// Analytics session for one user and one metric
pub struct DiarySession {
    user_id: String,
    metric: MetricType,
    repository: Arc<dyn RecordRepository>,
    config: AnalyticsConfig,
    calculator: DateRangeCalculator,
    bucketer: Bucketer,
    trend: TrendAnalyzer,
    tracker: RequestTracker,
    view_mode: ViewMode,
    anchor: NaiveDate,
    loading: bool,
    current: Option<RefreshResult>,
}

impl DiarySession {
    pub fn new(
        user_id: impl Into<String>,
        metric: MetricType,
        repository: Arc<dyn RecordRepository>,
        config: AnalyticsConfig,
        calculator: DateRangeCalculator,
    ) -> Self {
        let bucketer = Bucketer::from_offset_minutes(config.utc_offset_minutes);
        let trend = TrendAnalyzer::with_config(config.trend.clone());
        let anchor = calculator.today();

        DiarySession {
            user_id: user_id.into(),
            metric,
            repository,
            config,
            calculator,
            bucketer,
            trend,
            tracker: RequestTracker::new(),
            view_mode: ViewMode::Day,
            anchor,
            loading: false,
            current: None,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn metric(&self) -> MetricType {
        self.metric
    }

    pub fn view_mode(&self) -> ViewMode {
        self.view_mode
    }

    pub fn anchor(&self) -> NaiveDate {
        self.anchor
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Latest committed result
    pub fn current(&self) -> Option<&RefreshResult> {
        self.current.as_ref()
    }

    /// Range for the current view mode and anchor
    pub fn range(&self) -> DateRange {
        self.calculator.compute_range(self.view_mode, self.anchor)
    }

    /// Start a refresh; any request begun earlier becomes stale
    pub fn begin(&mut self, view_mode: ViewMode, anchor: NaiveDate) -> RefreshRequest {
        let range = self.calculator.compute_range(view_mode, anchor);
        self.view_mode = view_mode;
        self.anchor = anchor.min(self.calculator.today());
        self.loading = true;

        let token = self.tracker.issue();
        debug!(token = token.value(), ?view_mode, start = %range.start, end = %range.end, "Refresh started");
        RefreshRequest { token, range }
    }

    /// Fetch and compute a started refresh
    ///
    /// Never fails: a repository error yields an empty result carrying the
    /// error message.
    #[instrument(
        skip(self, request),
        fields(user_id = %self.user_id, metric = %self.metric, token = request.token.value())
    )]
    pub async fn load(&self, request: &RefreshRequest) -> LoadedRefresh {
        let result = match self.compute(&request.range).await {
            Ok(result) => result,
            Err(e) => {
                log_failure(&e);
                RefreshResult::failed(request.range, &e)
            }
        };

        LoadedRefresh {
            token: request.token,
            result,
        }
    }

    /// Publish a loaded refresh unless a newer one was started since
    pub fn commit(&mut self, loaded: LoadedRefresh) -> Option<RefreshResult> {
        if !self.tracker.is_current(loaded.token) {
            debug!(token = loaded.token.value(), "Discarding stale refresh result");
            return None;
        }

        self.loading = false;
        info!(
            metric = %self.metric,
            start = %loaded.result.range.start,
            count = loaded.result.metadata.count,
            abnormal = loaded.result.metadata.abnormal_count,
            failed = loaded.result.error.is_some(),
            "Refresh committed"
        );
        self.current = Some(loaded.result.clone());
        Some(loaded.result)
    }

    /// Begin, load and commit in one call
    pub async fn refresh(&mut self, view_mode: ViewMode, anchor: NaiveDate) -> RefreshResult {
        let request = self.begin(view_mode, anchor);
        let loaded = self.load(&request).await;
        let range = request.range;

        // Holding `&mut self` across the load means nothing newer can start
        self.commit(loaded).unwrap_or_else(|| {
            RefreshResult::failed(
                range,
                &DiaryError::Internal("refresh superseded".to_string()),
            )
        })
    }

    /// Move the anchor one period back or forward and return it
    pub fn navigate(&mut self, direction: Direction) -> NaiveDate {
        let range = self.calculator.navigate(&self.range(), direction);
        self.anchor = range.start;
        self.anchor
    }

    /// Move the anchor back to today and return it
    pub fn reset_to_today(&mut self) -> NaiveDate {
        self.anchor = self.calculator.today();
        self.anchor
    }

    async fn compute(&self, range: &DateRange) -> Result<RefreshResult> {
        let descriptor = MetricDescriptor::for_metric(self.metric);
        let offset = self.bucketer.offset();

        let records = self.fetch_padded(range).await?;
        let server = self.fetch_server_stats(range).await;
        let previous = if self.config.compare_previous_period {
            self.fetch_previous(range).await
        } else {
            None
        };

        let selected = self.bucketer.in_range(&records, range);

        let results = match (descriptor.context, &previous) {
            // Earlier measurements give the first in-range values a history
            (ClassificationContext::ConsecutiveChange, Some((_, earlier))) => {
                let mut series = earlier.clone();
                series.extend(selected.iter().cloned());
                let all =
                    Classifier::classify_series(&series, self.metric, self.config.weight_window);
                all[earlier.len()..].to_vec()
            }
            _ => Classifier::classify_series(&selected, self.metric, self.config.weight_window),
        };
        let abnormal: Vec<bool> = results.iter().map(|r| r.is_abnormal).collect();
        let summary = Classifier::summarize(&results);

        // Today is still being logged, so its total is not judged yet
        let today = self.calculator.today();
        let daily_summary = match descriptor.daily_table {
            Some(_) => {
                let daily: Vec<_> = Aggregator::daily_totals(&selected, offset)
                    .into_iter()
                    .filter(|(date, _)| *date < today)
                    .map(|(_, total)| Classifier::classify(Subject::DailyTotal(total), self.metric))
                    .collect();
                Classifier::summarize(&daily)
            }
            None => ClassificationSummary::default(),
        };

        let strategy = self.strategy_for(range.view_mode);
        let slots = self.bucketer.assign(&selected, range, strategy);
        let buckets = self.bucketer.materialize(&selected, &slots, &abnormal);

        let local = Aggregator::aggregate_buckets(&buckets, range, offset);
        let (aggregate, server_merged) = match &server {
            Some(stats) => Aggregator::merge_server(&local, stats),
            None => (local.clone(), false),
        };

        // Both sides of the comparison come from local records
        let kind = descriptor.value_kind;
        let sample = TrendSample::new(&local, &buckets, kind);
        let reference = match &previous {
            Some((previous_range, earlier)) if !earlier.is_empty() => {
                let earlier_aggregate =
                    Aggregator::aggregate_records(earlier, offset, previous_range.expected_days());
                TrendReference::Previous(level(&earlier_aggregate, kind))
            }
            _ => TrendReference::WithinPeriod(&buckets, kind),
        };
        let trend = self.trend.analyze_trend(
            &sample,
            reference,
            server.as_ref().and_then(|s| s.trend),
        );

        let metadata = MetadataAssembler::assemble(
            &aggregate,
            &summary,
            &daily_summary,
            trend,
            range,
            server_merged,
        );

        Ok(RefreshResult {
            range: *range,
            buckets,
            metadata,
            is_loading: false,
            error: None,
        })
    }

    /// Records for the range, fetched with a day of margin on each side so
    /// the analytics timezone can shift records across UTC midnight
    async fn fetch_padded(&self, range: &DateRange) -> Result<Vec<RawRecord>> {
        let start = range.start.pred_opt().unwrap_or(range.start);
        let end = range.end.succ_opt().unwrap_or(range.end);

        self.repository
            .fetch_records(&self.user_id, self.metric, start, end)
            .await
            .map_err(DiaryError::from)
    }

    /// Server statistics for the range; failures are logged and ignored
    async fn fetch_server_stats(&self, range: &DateRange) -> Option<PartialAggregate> {
        let key = dimension_key(range);
        match self
            .repository
            .fetch_pre_aggregated_stats(
                &self.user_id,
                self.metric,
                Dimension::from(range.view_mode),
                &key,
            )
            .await
        {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, %key, "Pre-aggregated statistics unavailable, using local data");
                None
            }
        }
    }

    /// Previous period and its in-range records; failures are logged and
    /// ignored
    async fn fetch_previous(&self, range: &DateRange) -> Option<(DateRange, Vec<RawRecord>)> {
        let previous_range = self.calculator.previous_period(range);
        if previous_range.start >= range.start {
            return None;
        }

        match self.fetch_padded(&previous_range).await {
            Ok(records) => Some((
                previous_range,
                self.bucketer.in_range(&records, &previous_range),
            )),
            Err(e) => {
                warn!(error = %e, "Previous period unavailable, comparing within the period");
                None
            }
        }
    }

    fn strategy_for(&self, view_mode: ViewMode) -> BucketStrategy {
        let descriptor = MetricDescriptor::for_metric(self.metric);
        let configured = match view_mode {
            ViewMode::Day => self.config.day_strategy,
            ViewMode::Week => None,
            ViewMode::Month => self.config.month_strategy,
        };
        configured.unwrap_or_else(|| descriptor.strategy_for(view_mode))
    }
}

fn log_failure(e: &DiaryError) {
    if e.severity().to_tracing_level() == Level::ERROR {
        error!(error = %e, retryable = e.is_retryable(), "Refresh failed");
    } else {
        warn!(error = %e, retryable = e.is_retryable(), "Refresh failed");
    }
}
