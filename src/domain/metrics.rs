// Time-series domain models
use super::error::ReportError;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;

/// Label name/value pairs identifying one series, kept sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LabelSet(BTreeMap<String, String>);

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.0.insert(name.to_string(), value.to_string());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

impl From<BTreeMap<String, String>> for LabelSet {
    fn from(labels: BTreeMap<String, String>) -> Self {
        Self(labels)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricSample {
    pub time_ms: i64,
    pub value: f64,
}

impl MetricSample {
    pub fn new(time_ms: i64, value: f64) -> Self {
        Self { time_ms, value }
    }
}

/// Closed interval `[start, end]` a series was queried over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Window of `lookback` ending at `end`.
    pub fn ending_at(end: DateTime<Utc>, lookback: Duration) -> Self {
        let lookback = chrono::Duration::from_std(lookback).unwrap_or(chrono::Duration::zero());
        Self {
            start: end - lookback,
            end,
        }
    }

    pub fn instant(time: DateTime<Utc>) -> Self {
        Self {
            start: time,
            end: time,
        }
    }

    pub fn seconds(&self) -> f64 {
        (self.end - self.start).num_milliseconds() as f64 / 1000.0
    }
}

/// A range query against the metrics store.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricQuery {
    pub expr: String,
    pub window: TimeWindow,
    pub step: Duration,
}

impl MetricQuery {
    pub fn new(expr: impl Into<String>, window: TimeWindow, step: Duration) -> Result<Self, ReportError> {
        let expr = expr.into();
        if expr.trim().is_empty() {
            return Err(ReportError::InvalidQuery("query expression is empty".to_string()));
        }
        if window.start >= window.end {
            return Err(ReportError::InvalidQuery(format!(
                "window start {} is not before end {}",
                window.start, window.end
            )));
        }
        if step.is_zero() {
            return Err(ReportError::InvalidQuery("step must be positive".to_string()));
        }
        Ok(Self { expr, window, step })
    }
}

/// One queried metric across every matching label set.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSeries {
    pub expr: String,
    pub window: TimeWindow,
    series: BTreeMap<LabelSet, Vec<MetricSample>>,
}

impl MetricSeries {
    pub fn new(expr: impl Into<String>, window: TimeWindow) -> Self {
        Self {
            expr: expr.into(),
            window,
            series: BTreeMap::new(),
        }
    }

    /// Adds samples for `labels`, keeping them ascending with unique timestamps.
    /// On a duplicated timestamp the later sample wins.
    pub fn insert(&mut self, labels: LabelSet, samples: Vec<MetricSample>) {
        let entry = self.series.entry(labels).or_default();
        entry.extend(samples);
        entry.sort_by_key(|s| s.time_ms);

        let mut normalized: Vec<MetricSample> = Vec::with_capacity(entry.len());
        for sample in entry.drain(..) {
            match normalized.last_mut() {
                Some(last) if last.time_ms == sample.time_ms => *last = sample,
                _ => normalized.push(sample),
            }
        }
        *entry = normalized;
    }

    pub fn with_series(mut self, labels: LabelSet, samples: Vec<MetricSample>) -> Self {
        self.insert(labels, samples);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LabelSet, &[MetricSample])> {
        self.series.iter().map(|(labels, samples)| (labels, samples.as_slice()))
    }

    /// Number of label sets returned by the query.
    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Distinct values of `label` across all label sets, sorted.
    pub fn label_values(&self, label: &str) -> Vec<String> {
        let mut values: Vec<String> = self
            .series
            .keys()
            .filter_map(|labels| labels.get(label).map(str::to_string))
            .collect();
        values.sort();
        values.dedup();
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn window() -> TimeWindow {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        TimeWindow::new(start, start + chrono::Duration::seconds(60))
    }

    #[test]
    fn test_query_validation() {
        let w = window();
        assert!(MetricQuery::new("up", w, Duration::from_secs(15)).is_ok());
        assert!(matches!(
            MetricQuery::new("  ", w, Duration::from_secs(15)),
            Err(ReportError::InvalidQuery(_))
        ));
        assert!(matches!(
            MetricQuery::new("up", TimeWindow::instant(w.start), Duration::from_secs(15)),
            Err(ReportError::InvalidQuery(_))
        ));
        assert!(matches!(
            MetricQuery::new("up", w, Duration::ZERO),
            Err(ReportError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_insert_sorts_and_dedups() {
        let labels = LabelSet::new().with("target", "foo");
        let series = MetricSeries::new("x", window()).with_series(
            labels.clone(),
            vec![
                MetricSample::new(2000, 2.0),
                MetricSample::new(1000, 1.0),
                MetricSample::new(2000, 3.0),
            ],
        );

        let (_, samples) = series.iter().next().unwrap();
        assert_eq!(samples, &[MetricSample::new(1000, 1.0), MetricSample::new(2000, 3.0)]);
    }

    #[test]
    fn test_window_seconds() {
        assert_eq!(window().seconds(), 60.0);
        assert_eq!(TimeWindow::instant(window().start).seconds(), 0.0);
    }

    #[test]
    fn test_label_values() {
        let series = MetricSeries::new("up", window())
            .with_series(LabelSet::new().with("target", "foo").with("pod", "a"), vec![])
            .with_series(LabelSet::new().with("target", "bar"), vec![])
            .with_series(LabelSet::new().with("target", "foo").with("pod", "b"), vec![])
            .with_series(LabelSet::new().with("job", "k6"), vec![]);
        assert_eq!(series.label_values("target"), vec!["bar", "foo"]);
    }
}
