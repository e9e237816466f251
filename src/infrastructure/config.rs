use crate::domain::aggregate::MetricKind;
use crate::domain::error::ReportError;
use crate::domain::load_profile::{LoadProfile, LoadStage, parse_duration};
use crate::domain::report::{Comparison, ReportFormat, Threshold};
use crate::domain::target::MatchMode;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct ReportConfig {
    pub prometheus: PrometheusSettings,
    #[serde(default)]
    pub report: ReportSettings,
    #[serde(default)]
    pub window: WindowSettings,
    pub targets: TargetSettings,
    #[serde(default)]
    pub readiness: Option<ReadinessSettings>,
    #[serde(default)]
    pub metrics: Vec<MetricConfig>,
    #[serde(default)]
    pub thresholds: Vec<ThresholdConfig>,
    #[serde(default)]
    pub stages: Vec<StageConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PrometheusSettings {
    pub url: String,
    /// Budget for the whole query phase.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReportSettings {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_format")]
    pub format: ReportFormat,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            title: default_title(),
            output_dir: default_output_dir(),
            format: default_format(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WindowSettings {
    #[serde(default = "default_lookback_minutes")]
    pub lookback_minutes: u64,
    #[serde(default = "default_step_seconds")]
    pub step_seconds: u64,
    /// Narrows the window to the span where this query is above zero.
    #[serde(default)]
    pub activity_query: Option<String>,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            lookback_minutes: default_lookback_minutes(),
            step_seconds: default_step_seconds(),
            activity_query: None,
        }
    }
}

impl WindowSettings {
    pub fn lookback(&self) -> Duration {
        Duration::from_secs(self.lookback_minutes * 60)
    }

    pub fn step(&self) -> Duration {
        Duration::from_secs(self.step_seconds)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TargetSettings {
    pub label: String,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default, rename = "match")]
    pub match_mode: MatchMode,
    /// Instant query whose `label` values are the targets when `names` is empty.
    #[serde(default)]
    pub discovery_query: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReadinessSettings {
    pub query: String,
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricConfig {
    pub name: String,
    pub kind: MetricKind,
    pub query: String,
    /// Successful-request counter, paired with `query` as the total.
    #[serde(default)]
    pub success_query: Option<String>,
    /// Observation counter, paired with `query` as the running sum.
    #[serde(default)]
    pub count_query: Option<String>,
    /// Measured instead when `query` has no samples for a target.
    #[serde(default)]
    pub fallback_query: Option<String>,
    #[serde(default)]
    pub percentile: Option<f64>,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub required: bool,
}

impl MetricConfig {
    pub fn unit(&self) -> &str {
        self.unit.as_deref().unwrap_or(self.kind.default_unit())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ThresholdConfig {
    pub metric: String,
    pub op: Comparison,
    pub limit: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StageConfig {
    pub duration: String,
    pub target: u32,
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_title() -> String {
    "Load Test Report".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("reports/output")
}

fn default_format() -> ReportFormat {
    ReportFormat::All
}

fn default_lookback_minutes() -> u64 {
    10
}

fn default_step_seconds() -> u64 {
    15
}

fn default_attempts() -> u32 {
    30
}

fn default_interval_secs() -> u64 {
    2
}

fn default_scale() -> f64 {
    1.0
}

impl ReportConfig {
    pub fn validate(&self) -> Result<(), ReportError> {
        if self.window.lookback_minutes == 0 {
            return Err(ReportError::Config("window.lookback_minutes must be positive".to_string()));
        }
        if self.window.step_seconds == 0 {
            return Err(ReportError::Config("window.step_seconds must be positive".to_string()));
        }
        if self.prometheus.timeout_secs == 0 {
            return Err(ReportError::Config("prometheus.timeout_secs must be positive".to_string()));
        }

        let mut names = HashSet::new();
        for metric in &self.metrics {
            if !names.insert(metric.name.as_str()) {
                return Err(ReportError::Config(format!("duplicate metric name '{}'", metric.name)));
            }
            if metric.query.trim().is_empty() {
                return Err(ReportError::Config(format!("metric '{}' has an empty query", metric.name)));
            }
            match metric.kind {
                MetricKind::Latency => match metric.percentile {
                    Some(p) if p > 0.0 && p < 100.0 => {}
                    _ => {
                        return Err(ReportError::Config(format!(
                            "latency metric '{}' needs a percentile in (0, 100)",
                            metric.name
                        )));
                    }
                },
                MetricKind::ErrorRatio if metric.success_query.is_none() => {
                    return Err(ReportError::Config(format!(
                        "error_ratio metric '{}' needs a success_query",
                        metric.name
                    )));
                }
                MetricKind::AverageLatency if metric.count_query.is_none() => {
                    return Err(ReportError::Config(format!(
                        "average_latency metric '{}' needs a count_query",
                        metric.name
                    )));
                }
                _ => {}
            }
            if metric.fallback_query.is_some() && !matches!(metric.kind, MetricKind::Latency | MetricKind::Gauge) {
                return Err(ReportError::Config(format!(
                    "metric '{}' cannot have a fallback_query",
                    metric.name
                )));
            }
        }

        for threshold in &self.thresholds {
            if !names.contains(threshold.metric.as_str()) {
                return Err(ReportError::Config(format!(
                    "threshold references unknown metric '{}'",
                    threshold.metric
                )));
            }
        }

        self.load_profile().map(|_| ())
    }

    pub fn thresholds(&self) -> Vec<Threshold> {
        self.thresholds
            .iter()
            .map(|t| Threshold::new(t.metric.clone(), t.op, t.limit))
            .collect()
    }

    pub fn load_profile(&self) -> Result<LoadProfile, ReportError> {
        let stages = self
            .stages
            .iter()
            .map(|s| {
                Ok(LoadStage {
                    duration: parse_duration(&s.duration)?,
                    vus: s.target,
                })
            })
            .collect::<Result<Vec<_>, ReportError>>()?;
        stages
            .iter()
            .try_fold(Duration::ZERO, |total, s| total.checked_add(s.duration))
            .ok_or_else(|| ReportError::Config("total stage duration is too long".to_string()))?;
        Ok(LoadProfile::new(stages))
    }
}

/// Loads `path` (extension optional) layered under `REPORT__*` environment
/// variables, e.g. `REPORT__PROMETHEUS__URL`.
pub fn load_report_config(path: &str) -> anyhow::Result<ReportConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name(path))
        .add_source(config::Environment::with_prefix("REPORT").separator("__"))
        .build()?;

    let report_config: ReportConfig = settings.try_deserialize()?;
    report_config.validate()?;
    Ok(report_config)
}

#[cfg(test)]
pub fn parse_report_config(toml: &str) -> anyhow::Result<ReportConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::from_str(toml, config::FileFormat::Toml))
        .build()?;

    let report_config: ReportConfig = settings.try_deserialize()?;
    report_config.validate()?;
    Ok(report_config)
}

/// Replace template variables in a query string
pub fn prepare_query(query: &str, vars: &HashMap<String, String>) -> String {
    let mut result = query.to_string();
    for (key, value) in vars {
        let placeholder = format!("${{{}}}", key);
        result = result.replace(&placeholder, value);
    }
    result
}
