// Test doubles for the metrics store
use crate::application::metrics_repository::MetricsRepository;
use crate::domain::error::ReportError;
use crate::domain::metrics::{LabelSet, MetricQuery, MetricSample, MetricSeries, TimeWindow};
use async_trait::async_trait;
use axum::Router;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

type Fixture = Vec<(LabelSet, Vec<MetricSample>)>;

/// In-memory repository answering from fixed fixtures. Unknown expressions
/// return an empty result, like a selector that matches nothing.
#[derive(Default)]
pub struct StaticRepository {
    range: HashMap<String, Fixture>,
    instant: HashMap<String, Fixture>,
    failing: HashSet<String>,
    delay: Duration,
    range_calls: AtomicUsize,
    instant_calls: AtomicUsize,
}

impl StaticRepository {
    pub fn with_range(mut self, expr: &str, fixture: Fixture) -> Self {
        self.range.insert(expr.to_string(), fixture);
        self
    }

    pub fn with_instant(mut self, expr: &str, fixture: Fixture) -> Self {
        self.instant.insert(expr.to_string(), fixture);
        self
    }

    pub fn failing(mut self, expr: &str) -> Self {
        self.failing.insert(expr.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn range_calls(&self) -> usize {
        self.range_calls.load(Ordering::SeqCst)
    }

    pub fn instant_calls(&self) -> usize {
        self.instant_calls.load(Ordering::SeqCst)
    }

    async fn answer(&self, fixtures: &HashMap<String, Fixture>, expr: &str, window: TimeWindow) -> Result<MetricSeries, ReportError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.contains(expr) {
            return Err(ReportError::Query {
                status: Some(503),
                message: format!("{} unavailable", expr),
            });
        }
        let mut series = MetricSeries::new(expr, window);
        for (labels, samples) in fixtures.get(expr).cloned().unwrap_or_default() {
            series.insert(labels, samples);
        }
        Ok(series)
    }
}

#[async_trait]
impl MetricsRepository for StaticRepository {
    async fn query_range(&self, query: &MetricQuery) -> Result<MetricSeries, ReportError> {
        self.range_calls.fetch_add(1, Ordering::SeqCst);
        self.answer(&self.range, &query.expr, query.window).await
    }

    async fn query_instant(&self, expr: &str, time: DateTime<Utc>) -> Result<MetricSeries, ReportError> {
        self.instant_calls.fetch_add(1, Ordering::SeqCst);
        self.answer(&self.instant, expr, TimeWindow::instant(time)).await
    }
}

/// Serves `app` on an ephemeral local port and returns its base URL.
pub async fn spawn_fake_prometheus(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move { axum::serve(listener, app).await.expect("serve app") });
    format!("http://{}", addr)
}

/// Base URL of a port nothing listens on.
pub async fn unreachable_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    format!("http://{}", addr)
}
