// Library interface for the pd-diary analytics core
// Integration tests and the CLI build on these modules

pub mod aggregator;
pub mod bucketer;
pub mod classifier;
pub mod config;
pub mod date_range;
pub mod error;
pub mod logging;
pub mod metadata;
pub mod metric;
pub mod models;
pub mod repository;
pub mod session;
pub mod trend;

// Re-export commonly used types for convenience
pub use models::*;
pub use aggregator::Aggregator;
pub use bucketer::{BucketStrategy, Bucketer};
pub use classifier::{Category, ClassificationResult, ClassificationSummary, Classifier, Subject};
pub use config::{AnalyticsConfig, AppConfig};
pub use date_range::DateRangeCalculator;
pub use metadata::MetadataAssembler;
pub use metric::{MetricDescriptor, ValueKind};
pub use repository::{InMemoryRepository, RecordRepository};
pub use session::{DiarySession, RefreshResult, RequestToken, RequestTracker};
pub use trend::{TrendAnalyzer, TrendConfig, TrendReference, TrendSample};
pub use error::{DiaryError, ImportError, RepositoryError, Result};
pub use logging::{LogConfig, LogFormat, LogLevel};
