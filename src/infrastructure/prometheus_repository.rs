// Prometheus HTTP API repository implementation
use crate::application::metrics_repository::MetricsRepository;
use crate::domain::error::ReportError;
use crate::domain::metrics::{LabelSet, MetricQuery, MetricSample, MetricSeries, TimeWindow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PrometheusRepository {
    host: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct PromResponse {
    status: String,
    #[serde(default)]
    data: Option<PromData>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default, rename = "errorType")]
    error_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PromData {
    #[serde(rename = "resultType")]
    result_type: String,
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct MatrixEntry {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    values: Vec<(f64, String)>,
}

#[derive(Debug, Deserialize)]
struct VectorEntry {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    value: (f64, String),
}

impl PrometheusRepository {
    pub fn new(host: String, request_timeout: Duration) -> Result<Self, ReportError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ReportError::query(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            host: host.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn build_query_url(&self, path: &str, params: &[(&str, String)]) -> String {
        let query_string = params
            .iter()
            .map(|(key, value)| format!("{}={}", key, urlencoding::encode(value)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}{}?{}", self.host, path, query_string)
    }

    async fn execute_query(&self, url: &str) -> Result<PromData, ReportError> {
        tracing::debug!("Querying Prometheus: {}", url);

        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| ReportError::query(format!("failed to send request to Prometheus: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ReportError::query(format!("failed to read Prometheus response: {}", e)))?;

        if !status.is_success() {
            // Prometheus wraps most errors in its JSON envelope
            let message = serde_json::from_str::<PromResponse>(&body)
                .ok()
                .and_then(|r| r.error)
                .unwrap_or(body);
            return Err(ReportError::Query {
                status: Some(status.as_u16()),
                message,
            });
        }

        let data: PromResponse = serde_json::from_str(&body)?;
        if data.status != "success" {
            return Err(ReportError::Parse(format!(
                "status '{}' ({}): {}",
                data.status,
                data.error_type.unwrap_or_default(),
                data.error.unwrap_or_default()
            )));
        }

        data.data
            .ok_or_else(|| ReportError::Parse("response has no data field".to_string()))
    }

    fn to_series(data: PromData, expr: &str, window: TimeWindow) -> Result<MetricSeries, ReportError> {
        let mut series = MetricSeries::new(expr, window);
        match data.result_type.as_str() {
            "matrix" => {
                let entries: Vec<MatrixEntry> = serde_json::from_value(data.result)?;
                for entry in entries {
                    let samples = entry
                        .values
                        .iter()
                        .map(|(ts, value)| Self::parse_sample(*ts, value))
                        .collect::<Result<Vec<_>, _>>()?;
                    series.insert(LabelSet::from(entry.metric), samples);
                }
            }
            "vector" => {
                let entries: Vec<VectorEntry> = serde_json::from_value(data.result)?;
                for entry in entries {
                    let (ts, value) = &entry.value;
                    let sample = Self::parse_sample(*ts, value)?;
                    series.insert(LabelSet::from(entry.metric), vec![sample]);
                }
            }
            "scalar" => {
                let (ts, value): (f64, String) = serde_json::from_value(data.result)?;
                series.insert(LabelSet::new(), vec![Self::parse_sample(ts, &value)?]);
            }
            other => {
                return Err(ReportError::Parse(format!("unsupported result type '{}'", other)));
            }
        }
        Ok(series)
    }

    fn parse_sample(timestamp: f64, value: &str) -> Result<MetricSample, ReportError> {
        // Prometheus renders NaN and +Inf as strings, which f64 parsing accepts
        let value = value
            .parse::<f64>()
            .map_err(|_| ReportError::Parse(format!("invalid sample value '{}'", value)))?;
        Ok(MetricSample::new((timestamp * 1000.0).round() as i64, value))
    }
}

fn unix_seconds(time: DateTime<Utc>) -> String {
    format!("{:.3}", time.timestamp_millis() as f64 / 1000.0)
}

#[async_trait]
impl MetricsRepository for PrometheusRepository {
    async fn query_range(&self, query: &MetricQuery) -> Result<MetricSeries, ReportError> {
        let url = self.build_query_url(
            "/api/v1/query_range",
            &[
                ("query", query.expr.clone()),
                ("start", unix_seconds(query.window.start)),
                ("end", unix_seconds(query.window.end)),
                ("step", format!("{}s", query.step.as_secs_f64())),
            ],
        );
        let data = self.execute_query(&url).await?;
        let series = Self::to_series(data, &query.expr, query.window)?;

        tracing::debug!("Got {} series for '{}'", series.len(), query.expr);
        Ok(series)
    }

    async fn query_instant(&self, expr: &str, time: DateTime<Utc>) -> Result<MetricSeries, ReportError> {
        if expr.trim().is_empty() {
            return Err(ReportError::InvalidQuery("query expression is empty".to_string()));
        }
        let url = self.build_query_url(
            "/api/v1/query",
            &[("query", expr.to_string()), ("time", unix_seconds(time))],
        );
        let data = self.execute_query(&url).await?;
        Self::to_series(data, expr, TimeWindow::instant(time))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{spawn_fake_prometheus, unreachable_url};
    use axum::Router;
    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::routing::get;
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn window() -> TimeWindow {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        TimeWindow::new(start, start + chrono::Duration::seconds(60))
    }

    fn repository(url: String) -> PrometheusRepository {
        PrometheusRepository::new(url, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_build_query_url_encodes_params() {
        let repo = repository("http://prometheus.localhost:8080/".to_string());
        let url = repo.build_query_url(
            "/api/v1/query",
            &[("query", "sum(rate(x{a=\"b\"}[5m]))".to_string()), ("time", "1.5".to_string())],
        );
        assert_eq!(
            url,
            "http://prometheus.localhost:8080/api/v1/query?query=sum%28rate%28x%7Ba%3D%22b%22%7D%5B5m%5D%29%29&time=1.5"
        );
    }

    #[tokio::test]
    async fn test_query_range_parses_matrix() {
        let app = Router::new().route(
            "/api/v1/query_range",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                assert_eq!(params["query"], "k6_http_reqs_total");
                assert_eq!(params["start"], "1700000000.000");
                assert_eq!(params["end"], "1700000060.000");
                assert_eq!(params["step"], "15s");
                axum::Json(serde_json::json!({
                    "status": "success",
                    "data": {
                        "resultType": "matrix",
                        "result": [
                            {"metric": {"target": "foo"}, "values": [[1700000060, "120"], [1700000000, "100"]]},
                            {"metric": {"target": "bar"}, "values": [[1700000000, "200"], [1700000060, "NaN"]]}
                        ]
                    }
                }))
            }),
        );
        let url = spawn_fake_prometheus(app).await;

        let query = MetricQuery::new("k6_http_reqs_total", window(), Duration::from_secs(15)).unwrap();
        let series = repository(url).query_range(&query).await.unwrap();

        assert_eq!(series.len(), 2);
        let collected: Vec<(String, Vec<MetricSample>)> = series
            .iter()
            .map(|(labels, samples)| (labels.get("target").unwrap().to_string(), samples.to_vec()))
            .collect();
        assert_eq!(collected[0].0, "bar");
        assert!(collected[0].1[1].value.is_nan());
        assert_eq!(
            collected[1],
            (
                "foo".to_string(),
                vec![
                    MetricSample::new(1_700_000_000_000, 100.0),
                    MetricSample::new(1_700_000_060_000, 120.0)
                ]
            )
        );
    }

    #[tokio::test]
    async fn test_query_instant_parses_vector_and_scalar() {
        let app = Router::new().route(
            "/api/v1/query",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                let body = if params["query"] == "scalar(up)" {
                    serde_json::json!({
                        "status": "success",
                        "data": {"resultType": "scalar", "result": [1700000000.5, "1"]}
                    })
                } else {
                    serde_json::json!({
                        "status": "success",
                        "data": {
                            "resultType": "vector",
                            "result": [{"metric": {"target": "foo"}, "value": [1700000000, "1"]}]
                        }
                    })
                };
                axum::Json(body)
            }),
        );
        let repo = repository(spawn_fake_prometheus(app).await);
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        let vector = repo.query_instant("up", at).await.unwrap();
        assert_eq!(vector.label_values("target"), vec!["foo"]);
        assert_eq!(vector.window, TimeWindow::instant(at));

        let scalar = repo.query_instant("scalar(up)", at).await.unwrap();
        let (labels, samples) = scalar.iter().next().unwrap();
        assert_eq!(labels, &LabelSet::new());
        assert_eq!(samples, &[MetricSample::new(1_700_000_000_500, 1.0)]);

        assert!(matches!(
            repo.query_instant(" ", at).await,
            Err(ReportError::InvalidQuery(_))
        ));
    }

    #[tokio::test]
    async fn test_non_success_status_is_query_error() {
        let app = Router::new().route(
            "/api/v1/query",
            get(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    axum::Json(serde_json::json!({
                        "status": "error",
                        "errorType": "bad_data",
                        "error": "parse error at char 4"
                    })),
                )
            }),
        );
        let repo = repository(spawn_fake_prometheus(app).await);

        let err = repo.query_instant("up{", Utc::now()).await.unwrap_err();
        match err {
            ReportError::Query { status, message } => {
                assert_eq!(status, Some(400));
                assert_eq!(message, "parse error at char 4");
            }
            other => panic!("expected query error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_parse_error() {
        let app = Router::new()
            .route("/api/v1/query", get(|| async { "definitely not json" }))
            .route(
                "/api/v1/query_range",
                get(|| async {
                    axum::Json(serde_json::json!({
                        "status": "success",
                        "data": {"resultType": "matrix", "result": [{"metric": {}, "values": [[1, "abc"]]}]}
                    }))
                }),
            );
        let repo = repository(spawn_fake_prometheus(app).await);

        assert!(matches!(
            repo.query_instant("up", Utc::now()).await,
            Err(ReportError::Parse(_))
        ));
        let query = MetricQuery::new("up", window(), Duration::from_secs(15)).unwrap();
        assert!(matches!(repo.query_range(&query).await, Err(ReportError::Parse(_))));
    }

    #[tokio::test]
    async fn test_unreachable_store_is_query_error() {
        let repo = repository(unreachable_url().await);
        let err = repo.query_instant("up", Utc::now()).await.unwrap_err();
        assert!(matches!(err, ReportError::Query { status: None, .. }));
    }
}
