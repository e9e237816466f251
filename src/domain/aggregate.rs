// Derived statistics computed from queried series
use super::metrics::TimeWindow;
use serde::Deserialize;
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    RequestRate,
    RequestCount,
    Latency,
    AverageLatency,
    ErrorRatio,
    CpuUsage,
    MemoryUsage,
    /// Latest reported value, e.g. a trend gauge.
    Gauge,
}

impl MetricKind {
    pub fn default_name(&self) -> &'static str {
        match self {
            MetricKind::RequestRate => "request_rate",
            MetricKind::RequestCount => "request_count",
            MetricKind::Latency => "latency",
            MetricKind::AverageLatency => "latency_avg",
            MetricKind::ErrorRatio => "error_ratio",
            MetricKind::CpuUsage => "cpu_usage",
            MetricKind::MemoryUsage => "memory_usage",
            MetricKind::Gauge => "gauge",
        }
    }

    pub fn default_unit(&self) -> &'static str {
        match self {
            MetricKind::RequestRate => "req/s",
            MetricKind::RequestCount => "requests",
            MetricKind::Latency | MetricKind::AverageLatency => "ms",
            MetricKind::ErrorRatio => "ratio",
            MetricKind::CpuUsage => "millicores",
            MetricKind::MemoryUsage => "MB",
            MetricKind::Gauge => "",
        }
    }

    /// Whether a per-target chart is drawn for this kind.
    pub fn is_charted(&self) -> bool {
        matches!(
            self,
            MetricKind::RequestRate | MetricKind::Latency | MetricKind::CpuUsage | MetricKind::MemoryUsage
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AggregateValue {
    Scalar(f64),
    /// Gauge summary: mean and maximum over the window.
    Usage { avg: f64, peak: f64 },
    /// Placeholder for a metric that could not be measured.
    NoData,
}

impl AggregateValue {
    /// The figure thresholds are compared against; the peak for usage values.
    pub fn comparable(&self) -> Option<f64> {
        match *self {
            AggregateValue::Scalar(v) => Some(v),
            AggregateValue::Usage { peak, .. } => Some(peak),
            AggregateValue::NoData => None,
        }
    }

    fn scaled(self, factor: f64) -> Self {
        match self {
            AggregateValue::Scalar(v) => AggregateValue::Scalar(v * factor),
            AggregateValue::Usage { avg, peak } => AggregateValue::Usage {
                avg: avg * factor,
                peak: peak * factor,
            },
            AggregateValue::NoData => AggregateValue::NoData,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateResult {
    pub metric: String,
    pub kind: MetricKind,
    pub target: String,
    pub value: AggregateValue,
    pub unit: String,
    pub window: TimeWindow,
}

impl AggregateResult {
    pub fn new(kind: MetricKind, target: impl Into<String>, value: AggregateValue, window: TimeWindow) -> Self {
        Self {
            metric: kind.default_name().to_string(),
            kind,
            target: target.into(),
            value,
            unit: kind.default_unit().to_string(),
            window,
        }
    }

    pub fn no_data(kind: MetricKind, target: impl Into<String>, window: TimeWindow) -> Self {
        Self::new(kind, target, AggregateValue::NoData, window)
    }

    pub fn named(mut self, metric: impl Into<String>) -> Self {
        self.metric = metric.into();
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn scaled(mut self, factor: f64) -> Self {
        self.value = self.value.scaled(factor);
        self
    }

    pub fn is_placeholder(&self) -> bool {
        self.value == AggregateValue::NoData
    }

    /// Human readable value with unit, e.g. `0.33 req/s` or `1.2500%`.
    pub fn display_value(&self) -> String {
        match self.value {
            AggregateValue::Scalar(v) => format_measurement(v, &self.unit),
            AggregateValue::Usage { avg, peak } => format!(
                "avg {} / peak {}",
                format_measurement(avg, &self.unit),
                format_measurement(peak, &self.unit)
            ),
            AggregateValue::NoData => "no data".to_string(),
        }
    }

    /// Report ordering: metric name, then target.
    pub fn sort_key_cmp(&self, other: &Self) -> Ordering {
        self.metric
            .cmp(&other.metric)
            .then_with(|| self.target.cmp(&other.target))
    }
}

pub fn format_measurement(value: f64, unit: &str) -> String {
    match unit {
        "ratio" => format!("{:.4}%", value * 100.0),
        "requests" => format!("{:.0}", value),
        "millicores" => format!("{:.1} m", value),
        "MB" => format!("{:.1} MB", value),
        "" => format!("{:.2}", value),
        _ => format!("{:.2} {}", value, unit),
    }
}

impl fmt::Display for AggregateResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}] = {}", self.metric, self.target, self.display_value())
    }
}

/// Sorts results into report order.
pub fn sort_results(results: &mut [AggregateResult]) {
    results.sort_by(AggregateResult::sort_key_cmp);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn window() -> TimeWindow {
        let end = Utc.timestamp_opt(1_700_000_060, 0).unwrap();
        TimeWindow::new(end - chrono::Duration::seconds(60), end)
    }

    #[test]
    fn test_display_value() {
        let rate = AggregateResult::new(MetricKind::RequestRate, "foo", AggregateValue::Scalar(1.0 / 3.0), window());
        assert_eq!(rate.display_value(), "0.33 req/s");

        let ratio = AggregateResult::new(MetricKind::ErrorRatio, "foo", AggregateValue::Scalar(0.0125), window());
        assert_eq!(ratio.display_value(), "1.2500%");

        let mem = AggregateResult::new(
            MetricKind::MemoryUsage,
            "bar",
            AggregateValue::Usage { avg: 12.0, peak: 20.5 },
            window(),
        );
        assert_eq!(mem.display_value(), "avg 12.0 MB / peak 20.5 MB");
        assert_eq!(mem.value.comparable(), Some(20.5));
    }

    #[test]
    fn test_scaled_and_named() {
        let latency = AggregateResult::new(MetricKind::Latency, "foo", AggregateValue::Scalar(0.25), window())
            .named("latency_p95_ms")
            .scaled(1000.0);
        assert_eq!(latency.metric, "latency_p95_ms");
        assert_eq!(latency.value, AggregateValue::Scalar(250.0));

        let missing = AggregateResult::no_data(MetricKind::CpuUsage, "foo", window()).scaled(1000.0);
        assert!(missing.is_placeholder());
        assert_eq!(missing.value.comparable(), None);
    }

    #[test]
    fn test_sort_results() {
        let w = window();
        let mut results = vec![
            AggregateResult::new(MetricKind::RequestRate, "foo", AggregateValue::Scalar(1.0), w),
            AggregateResult::new(MetricKind::ErrorRatio, "foo", AggregateValue::Scalar(0.0), w),
            AggregateResult::new(MetricKind::RequestRate, "bar", AggregateValue::Scalar(2.0), w),
        ];
        sort_results(&mut results);
        let order: Vec<(&str, &str)> = results
            .iter()
            .map(|r| (r.metric.as_str(), r.target.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![("error_ratio", "foo"), ("request_rate", "bar"), ("request_rate", "foo")]
        );
    }
}
