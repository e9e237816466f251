// Report domain models
use super::aggregate::{AggregateResult, MetricKind, format_measurement};
use super::load_profile::{LoadProfile, StageBand};
use super::metrics::{MetricSample, TimeWindow};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesData {
    pub name: String,
    pub points: Vec<MetricSample>,
}

impl SeriesData {
    pub fn new(name: String, points: Vec<MetricSample>) -> Self {
        Self { name, points }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartData {
    pub id: String,
    pub title: String,
    pub unit: String,
    /// Sum over every target, drawn as a filled area.
    pub cumulative: Option<SeriesData>,
    pub series: Vec<SeriesData>,
}

impl ChartData {
    pub fn new(id: String, title: String, unit: String, cumulative: Option<SeriesData>, series: Vec<SeriesData>) -> Self {
        Self {
            id,
            title,
            unit,
            cumulative,
            series,
        }
    }

    pub fn has_data(&self) -> bool {
        self.cumulative.as_ref().is_some_and(|c| !c.points.is_empty())
            || self.series.iter().any(|s| !s.points.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Comparison {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
}

impl Comparison {
    pub fn holds(&self, measured: f64, limit: f64) -> bool {
        match self {
            Comparison::Lt => measured < limit,
            Comparison::Le => measured <= limit,
            Comparison::Gt => measured > limit,
            Comparison::Ge => measured >= limit,
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
        };
        f.write_str(symbol)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub metric: String,
    pub comparison: Comparison,
    pub limit: f64,
}

impl Threshold {
    pub fn new(metric: impl Into<String>, comparison: Comparison, limit: f64) -> Self {
        Self {
            metric: metric.into(),
            comparison,
            limit,
        }
    }

    pub fn describe(&self, unit: &str) -> String {
        format!("{} {}", self.comparison, format_measurement(self.limit, unit))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail,
    NoData,
}

impl Verdict {
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
            Verdict::NoData => "NO DATA",
        }
    }
}

/// One threshold checked against one measured result.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdOutcome {
    pub result: AggregateResult,
    pub threshold: Threshold,
    pub verdict: Verdict,
}

impl ThresholdOutcome {
    pub fn measured(&self) -> String {
        match self.result.value.comparable() {
            Some(v) => format_measurement(v, &self.result.unit),
            None => "no data".to_string(),
        }
    }

    pub fn expected(&self) -> String {
        self.threshold.describe(&self.result.unit)
    }

    pub fn failure_message(&self) -> String {
        format!(
            "{} for {}: measured {}, threshold {}",
            self.result.metric,
            self.result.target,
            self.measured(),
            self.expected()
        )
    }
}

/// Checks every threshold against every result of its metric.
/// Outcomes are ordered by metric, target, then threshold order.
pub fn evaluate(results: &[AggregateResult], thresholds: &[Threshold]) -> Vec<ThresholdOutcome> {
    let mut indexed: Vec<(usize, ThresholdOutcome)> = Vec::new();
    for (idx, threshold) in thresholds.iter().enumerate() {
        for result in results.iter().filter(|r| r.metric == threshold.metric) {
            let verdict = match result.value.comparable() {
                Some(v) if threshold.comparison.holds(v, threshold.limit) => Verdict::Pass,
                Some(_) => Verdict::Fail,
                None => Verdict::NoData,
            };
            indexed.push((
                idx,
                ThresholdOutcome {
                    result: result.clone(),
                    threshold: threshold.clone(),
                    verdict,
                },
            ));
        }
    }
    indexed.sort_by(|(ia, a), (ib, b)| a.result.sort_key_cmp(&b.result).then(ia.cmp(ib)));
    indexed.into_iter().map(|(_, outcome)| outcome).collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl OutcomeCounts {
    pub fn tally(outcomes: &[ThresholdOutcome]) -> Self {
        outcomes.iter().fold(Self::default(), |mut counts, o| {
            match o.verdict {
                Verdict::Pass => counts.passed += 1,
                Verdict::Fail => counts.failed += 1,
                Verdict::NoData => counts.skipped += 1,
            }
            counts
        })
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped
    }
}

/// Everything the renderers need for one report.
#[derive(Debug, Clone)]
pub struct ReportData {
    pub title: String,
    pub window: TimeWindow,
    pub results: Vec<AggregateResult>,
    pub charts: Vec<ChartData>,
    pub profile: LoadProfile,
    pub bands: Vec<StageBand>,
}

impl ReportData {
    pub fn new(title: String, window: TimeWindow, results: Vec<AggregateResult>, charts: Vec<ChartData>) -> Self {
        Self {
            title,
            window,
            results,
            charts,
            profile: LoadProfile::default(),
            bands: Vec::new(),
        }
    }

    pub fn with_profile(mut self, profile: LoadProfile, bands: Vec<StageBand>) -> Self {
        self.profile = profile;
        self.bands = bands;
        self
    }

    /// Sum of a scalar metric kind over all targets, if any target measured it.
    pub fn total_of(&self, kind: MetricKind) -> Option<f64> {
        let values: Vec<f64> = self
            .results
            .iter()
            .filter(|r| r.kind == kind)
            .filter_map(|r| r.value.comparable())
            .collect();
        (!values.is_empty()).then(|| values.iter().sum())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Html,
    Junit,
    All,
}

impl ReportFormat {
    pub fn includes_html(&self) -> bool {
        matches!(self, ReportFormat::Html | ReportFormat::All)
    }

    pub fn includes_junit(&self) -> bool {
        matches!(self, ReportFormat::Junit | ReportFormat::All)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReportDocument {
    Html(Bytes),
    Junit(Bytes),
}

impl ReportDocument {
    pub fn file_name(&self) -> &'static str {
        match self {
            ReportDocument::Html(_) => "report.html",
            ReportDocument::Junit(_) => "junit.xml",
        }
    }

    pub fn contents(&self) -> &Bytes {
        match self {
            ReportDocument::Html(b) | ReportDocument::Junit(b) => b,
        }
    }
}
