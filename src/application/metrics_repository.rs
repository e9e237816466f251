// Repository trait for metrics store access
use crate::domain::error::ReportError;
use crate::domain::metrics::{MetricQuery, MetricSeries};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Read-only access to a time-series store. Implementations do not retry;
/// every call is idempotent and safe to repeat.
#[async_trait]
pub trait MetricsRepository: Send + Sync {
    /// Evaluate `query.expr` at every `query.step` across `query.window`.
    async fn query_range(&self, query: &MetricQuery) -> Result<MetricSeries, ReportError>;

    /// Evaluate `expr` at a single point in time.
    async fn query_instant(&self, expr: &str, time: DateTime<Utc>) -> Result<MetricSeries, ReportError>;
}
