// Metrics collector - Concurrent query fan-out under one time budget
use crate::application::aggregator::active_window;
use crate::application::metrics_repository::MetricsRepository;
use crate::domain::error::ReportError;
use crate::domain::metrics::{MetricQuery, MetricSeries, TimeWindow};
use chrono::Utc;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Issues the queries of one report run. The time budget starts when the
/// collector is created and covers every query made through it.
#[derive(Clone)]
pub struct MetricsCollector {
    repository: Arc<dyn MetricsRepository>,
    budget: Duration,
    deadline: Instant,
}

impl MetricsCollector {
    pub fn new(repository: Arc<dyn MetricsRepository>, budget: Duration) -> Self {
        Self {
            repository,
            budget,
            deadline: Instant::now() + budget,
        }
    }

    /// Runs `work` in whatever is left of the budget.
    pub async fn within<T, F>(&self, work: F) -> Result<T, ReportError>
    where
        F: Future<Output = T>,
    {
        tokio::time::timeout_at(self.deadline, work)
            .await
            .map_err(|_| ReportError::Timeout(self.budget))
    }

    /// Runs every query concurrently and returns the series keyed by expression.
    /// The first failure, or running past the deadline, aborts the rest.
    pub async fn collect(&self, queries: Vec<MetricQuery>) -> Result<BTreeMap<String, MetricSeries>, ReportError> {
        let start_time = std::time::Instant::now();

        // One task per distinct expression
        let mut distinct: BTreeMap<String, MetricQuery> = BTreeMap::new();
        for query in queries {
            distinct.entry(query.expr.clone()).or_insert(query);
        }

        let mut pending = FuturesUnordered::new();
        let mut aborts = Vec::with_capacity(distinct.len());
        for (expr, query) in distinct {
            let repo = self.repository.clone();
            let handle = tokio::spawn(async move {
                let result = repo.query_range(&query).await;
                (expr, result)
            });
            aborts.push(handle.abort_handle());
            pending.push(handle);
        }
        let total = aborts.len();

        let gather = async {
            let mut collected = BTreeMap::new();
            while let Some(joined) = pending.next().await {
                let (expr, result) =
                    joined.map_err(|e| ReportError::query(format!("query task failed: {}", e)))?;
                let series = result?;
                tracing::debug!("Query '{}' returned {} series", expr, series.len());
                collected.insert(expr, series);
            }
            Ok::<_, ReportError>(collected)
        };

        let outcome = self.within(gather).await.and_then(|collected| collected);
        if outcome.is_err() {
            for handle in &aborts {
                handle.abort();
            }
        }

        let collected = outcome?;
        tracing::info!("Collected {} queries in {:?}", total, start_time.elapsed());
        Ok(collected)
    }

    /// Polls `expr` until it reports a value above zero.
    pub async fn wait_until_ready(&self, expr: &str, attempts: u32, interval: Duration) -> bool {
        tracing::info!("Waiting for metrics: {}", expr);
        for attempt in 1..=attempts {
            match self.repository.query_instant(expr, Utc::now()).await {
                Ok(series) => {
                    let ready = series
                        .iter()
                        .any(|(_, samples)| samples.iter().any(|s| s.value > 0.0));
                    if ready {
                        tracing::info!("Metrics available after {} attempt(s)", attempt);
                        return true;
                    }
                }
                Err(e) => tracing::debug!("Readiness query failed: {}", e),
            }

            tracing::info!("  Attempt {}/{}: waiting for metrics...", attempt, attempts);
            if attempt < attempts {
                tokio::time::sleep(interval).await;
            }
        }
        tracing::warn!("Metrics not found after {} attempts", attempts);
        false
    }

    /// Span within `window` where `expr` is active, if it can be determined.
    pub async fn detect_active_window(&self, expr: &str, window: TimeWindow, step: Duration) -> Option<TimeWindow> {
        let query = match MetricQuery::new(expr, window, step) {
            Ok(query) => query,
            Err(e) => {
                tracing::warn!("Cannot detect active window: {}", e);
                return None;
            }
        };

        match self.repository.query_range(&query).await {
            Ok(series) => {
                let active = active_window(&series);
                if let Some(w) = &active {
                    tracing::info!(
                        "Detected active window: {} to {}",
                        w.start.format("%H:%M:%S"),
                        w.end.format("%H:%M:%S")
                    );
                }
                active
            }
            Err(e) => {
                tracing::warn!("Failed to detect active window: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::metrics::{LabelSet, MetricSample};
    use crate::test_support::StaticRepository;
    use chrono::TimeZone;

    const T0: i64 = 1_700_000_000_000;

    fn window() -> TimeWindow {
        let start = Utc.timestamp_millis_opt(T0).unwrap();
        TimeWindow::new(start, start + chrono::Duration::seconds(60))
    }

    fn query(expr: &str) -> MetricQuery {
        MetricQuery::new(expr, window(), Duration::from_secs(15)).unwrap()
    }

    fn series_of(values: &[f64]) -> Vec<(LabelSet, Vec<MetricSample>)> {
        let samples = values
            .iter()
            .enumerate()
            .map(|(i, v)| MetricSample::new(T0 + i as i64 * 15_000, *v))
            .collect();
        vec![(LabelSet::new().with("target", "foo"), samples)]
    }

    #[tokio::test]
    async fn test_collect_fans_in_by_expression() {
        let repo = StaticRepository::default()
            .with_range("a", series_of(&[1.0, 2.0]))
            .with_range("b", series_of(&[3.0]));
        let repo = Arc::new(repo);
        let collector = MetricsCollector::new(repo.clone(), Duration::from_secs(5));

        let collected = collector
            .collect(vec![query("a"), query("b"), query("a"), query("missing")])
            .await
            .unwrap();

        assert_eq!(collected.len(), 3);
        assert_eq!(collected["a"].len(), 1);
        assert_eq!(collected["a"].window, window());
        assert!(collected["missing"].is_empty());
        assert_eq!(repo.range_calls(), 3);
    }

    #[tokio::test]
    async fn test_collect_fails_on_first_query_error() {
        let repo = StaticRepository::default()
            .with_range("a", series_of(&[1.0]))
            .failing("b");
        let collector = MetricsCollector::new(Arc::new(repo), Duration::from_secs(5));

        let err = collector.collect(vec![query("a"), query("b")]).await.unwrap_err();
        assert!(matches!(err, ReportError::Query { .. }));
    }

    #[tokio::test]
    async fn test_collect_times_out() {
        let repo = StaticRepository::default()
            .with_range("slow", series_of(&[1.0]))
            .with_delay(Duration::from_secs(30));
        let collector = MetricsCollector::new(Arc::new(repo), Duration::from_millis(50));

        let err = collector.collect(vec![query("slow")]).await.unwrap_err();
        assert!(matches!(err, ReportError::Timeout(d) if d == Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn test_budget_is_shared_across_calls() {
        let repo = StaticRepository::default()
            .with_range("a", series_of(&[1.0]))
            .with_delay(Duration::from_millis(60));
        let collector = MetricsCollector::new(Arc::new(repo), Duration::from_millis(100));

        // The first call fits, the second runs past the shared deadline
        collector.collect(vec![query("a")]).await.unwrap();
        let err = collector.collect(vec![query("a")]).await.unwrap_err();
        assert!(matches!(err, ReportError::Timeout(d) if d == Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn test_within_bounds_any_work() {
        let collector = MetricsCollector::new(Arc::new(StaticRepository::default()), Duration::from_millis(50));
        assert_eq!(collector.within(async { 7 }).await.unwrap(), 7);

        let err = collector
            .within(tokio::time::sleep(Duration::from_secs(30)))
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_wait_until_ready() {
        let ready = StaticRepository::default().with_instant("sum(k6_http_reqs_total)", series_of(&[42.0]));
        let collector = MetricsCollector::new(Arc::new(ready), Duration::from_secs(5));
        assert!(collector.wait_until_ready("sum(k6_http_reqs_total)", 3, Duration::from_millis(1)).await);

        let idle = Arc::new(StaticRepository::default().with_instant("sum(k6_http_reqs_total)", series_of(&[0.0])));
        let collector = MetricsCollector::new(idle.clone(), Duration::from_secs(5));
        assert!(!collector.wait_until_ready("sum(k6_http_reqs_total)", 3, Duration::from_millis(1)).await);
        assert_eq!(idle.instant_calls(), 3);
    }

    #[tokio::test]
    async fn test_detect_active_window() {
        let repo = StaticRepository::default().with_range("activity", series_of(&[0.0, 4.0, 6.0, 0.0]));
        let collector = MetricsCollector::new(Arc::new(repo), Duration::from_secs(5));

        let active = collector
            .detect_active_window("activity", window(), Duration::from_secs(15))
            .await
            .unwrap();
        assert_eq!(active.start.timestamp_millis(), T0 + 15_000);
        assert_eq!(active.end.timestamp_millis(), T0 + 30_000);

        let failing = StaticRepository::default().failing("activity");
        let collector = MetricsCollector::new(Arc::new(failing), Duration::from_secs(5));
        assert!(collector.detect_active_window("activity", window(), Duration::from_secs(15)).await.is_none());
    }
}
