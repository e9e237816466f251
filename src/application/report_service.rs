// Report service - Runs a report from discovery to written artifacts
use crate::application::aggregator::{
    compute_error_ratio, compute_latest, compute_mean, compute_percentile, compute_rate, compute_request_count,
    compute_resource_usage, sum_by_timestamp, sum_points, target_latency_points, target_rate_points,
};
use crate::application::collector::MetricsCollector;
use crate::application::metrics_repository::MetricsRepository;
use crate::application::target_service::TargetService;
use crate::domain::aggregate::{AggregateResult, MetricKind, sort_results};
use crate::domain::error::{PipelineError, PipelineStage, ReportError, StageResultExt};
use crate::domain::metrics::{MetricQuery, MetricSample, MetricSeries, TimeWindow};
use crate::domain::report::{
    ChartData, OutcomeCounts, ReportData, ReportDocument, ReportFormat, SeriesData, Threshold, evaluate,
};
use crate::domain::target::Target;
use crate::infrastructure::artifact_writer::write_documents;
use crate::infrastructure::config::{MetricConfig, ReportConfig, prepare_query};
use crate::presentation::html::render_html;
use crate::presentation::junit::render_junit;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub paths: Vec<PathBuf>,
    pub window: TimeWindow,
    pub targets: usize,
    pub results: usize,
    pub counts: OutcomeCounts,
}

#[derive(Clone)]
pub struct ReportService {
    repository: Arc<dyn MetricsRepository>,
    config: ReportConfig,
}

impl ReportService {
    pub fn new(repository: Arc<dyn MetricsRepository>, config: ReportConfig) -> Self {
        Self { repository, config }
    }

    /// Generates the report for the window ending at `end`. Stages run in
    /// order and the first failure ends the run; nothing is written unless
    /// every document rendered. `prometheus.timeout_secs` bounds all queries
    /// of the run together.
    pub async fn generate(
        &self,
        end: DateTime<Utc>,
        format: ReportFormat,
        output_dir: &Path,
    ) -> Result<RunSummary, PipelineError> {
        let collector = MetricsCollector::new(
            self.repository.clone(),
            Duration::from_secs(self.config.prometheus.timeout_secs),
        );

        tracing::info!("Generating '{}' from {}", self.config.report.title, self.config.prometheus.url);

        // Discover
        let targets = collector
            .within(TargetService::new(self.repository.clone()).list_targets(&self.config.targets, end))
            .await
            .and_then(|targets| targets)
            .in_stage(PipelineStage::Discover)?;
        if targets.is_empty() {
            tracing::warn!("No targets configured or discovered, the report will only carry placeholders");
        } else {
            let names: Vec<&str> = targets.iter().map(|t| t.name.as_str()).collect();
            tracing::info!("Targets: {}", names.join(", "));
        }

        // Readiness
        if let Some(readiness) = &self.config.readiness {
            let ready = collector
                .within(collector.wait_until_ready(
                    &readiness.query,
                    readiness.attempts,
                    Duration::from_secs(readiness.interval_secs),
                ))
                .await
                .in_stage(PipelineStage::Readiness)?;
            if !ready {
                tracing::warn!("Continuing without confirmed metrics, the report may be empty");
            }
        }

        // Window
        let (window, narrowed) = self.resolve_window(&collector, end).await.in_stage(PipelineStage::Window)?;
        tracing::info!(
            "Report window: {} to {} ({:.0}s)",
            window.start.format("%H:%M:%S"),
            window.end.format("%H:%M:%S"),
            window.seconds()
        );

        // Collect
        let vars = self.template_vars(window);
        let queries = self.build_queries(&vars, window).in_stage(PipelineStage::Collect)?;
        let collected = collector.collect(queries).await.in_stage(PipelineStage::Collect)?;

        // Aggregate
        let results = self
            .aggregate(&collected, &vars, &targets, window)
            .in_stage(PipelineStage::Aggregate)?;
        let charts = self.build_charts(&collected, &vars, &targets);
        let profile = self.config.load_profile().in_stage(PipelineStage::Aggregate)?;
        let bands = if profile.is_empty() {
            Vec::new()
        } else if narrowed {
            profile.bands(window.start)
        } else {
            let start = chrono::Duration::from_std(profile.total_duration())
                .ok()
                .and_then(|total| window.end.checked_sub_signed(total))
                .unwrap_or(window.start);
            profile.bands(start)
        };
        let thresholds = self.config.thresholds();
        let data = ReportData::new(self.config.report.title.clone(), window, results, charts).with_profile(profile, bands);

        // Render
        let documents = render_documents(&data, &thresholds, format).in_stage(PipelineStage::Render)?;

        // Write
        let paths = write_documents(output_dir, &documents)
            .await
            .in_stage(PipelineStage::Write)?;

        let counts = OutcomeCounts::tally(&evaluate(&data.results, &thresholds));
        tracing::info!(
            "Thresholds: {} passed, {} failed, {} without data",
            counts.passed,
            counts.failed,
            counts.skipped
        );

        Ok(RunSummary {
            paths,
            window,
            targets: targets.len(),
            results: data.results.len(),
            counts,
        })
    }

    /// Lookback window ending at `end`, narrowed to the span of activity when
    /// an activity query is configured and finds one.
    async fn resolve_window(
        &self,
        collector: &MetricsCollector,
        end: DateTime<Utc>,
    ) -> Result<(TimeWindow, bool), ReportError> {
        let settings = &self.config.window;
        let lookback = TimeWindow::ending_at(end, settings.lookback());
        if lookback.start >= lookback.end {
            return Err(ReportError::InvalidQuery("report window is empty".to_string()));
        }

        let Some(activity) = &settings.activity_query else {
            return Ok((lookback, false));
        };
        let query = prepare_query(activity, &self.template_vars(lookback));
        match collector
            .within(collector.detect_active_window(&query, lookback, settings.step()))
            .await?
        {
            Some(active) => Ok((active, true)),
            None => {
                tracing::warn!("No activity found, using the full lookback window");
                Ok((lookback, false))
            }
        }
    }

    fn template_vars(&self, window: TimeWindow) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert("window".to_string(), format!("{}s", window.seconds().round() as i64));
        vars.insert("step".to_string(), format!("{}s", self.config.window.step_seconds));
        vars
    }

    fn build_queries(&self, vars: &HashMap<String, String>, window: TimeWindow) -> Result<Vec<MetricQuery>, ReportError> {
        let step = self.config.window.step();
        let mut queries = Vec::new();
        for metric in &self.config.metrics {
            let paired = [&metric.success_query, &metric.count_query, &metric.fallback_query];
            queries.push(MetricQuery::new(prepare_query(&metric.query, vars), window, step)?);
            for expr in paired.into_iter().flatten() {
                queries.push(MetricQuery::new(prepare_query(expr, vars), window, step)?);
            }
        }
        Ok(queries)
    }

    fn aggregate(
        &self,
        collected: &BTreeMap<String, MetricSeries>,
        vars: &HashMap<String, String>,
        targets: &[Target],
        window: TimeWindow,
    ) -> Result<Vec<AggregateResult>, ReportError> {
        let mut results = Vec::new();

        for metric in &self.config.metrics {
            let series = lookup(collected, &prepare_query(&metric.query, vars))?;
            if metric.required && series.is_empty() && !targets.is_empty() {
                return Err(ReportError::InsufficientData(format!(
                    "required metric '{}' returned no series",
                    metric.name
                )));
            }
            let success = lookup_paired(collected, vars, &metric.success_query)?;
            let count = lookup_paired(collected, vars, &metric.count_query)?;
            let fallback = lookup_paired(collected, vars, &metric.fallback_query)?;

            for target in targets {
                let measured = match (measure(metric, series, success, count, target), fallback) {
                    (Err(ReportError::InsufficientData(reason)), Some(fallback)) => {
                        tracing::debug!("{} for {}: {}, trying fallback", metric.name, target.name, reason);
                        measure(metric, fallback, success, count, target)
                    }
                    (measured, _) => measured,
                };

                let result = match measured {
                    Ok(result) => result.scaled(metric.scale),
                    Err(ReportError::InsufficientData(reason)) => {
                        tracing::warn!("{} for {}: {}", metric.name, target.name, reason);
                        AggregateResult::no_data(metric.kind, &target.name, window)
                    }
                    Err(e) => return Err(e),
                };
                let result = result.named(&metric.name).with_unit(metric.unit());
                tracing::info!("  {}", result);
                results.push(result);
            }
        }

        sort_results(&mut results);
        Ok(results)
    }

    fn build_charts(
        &self,
        collected: &BTreeMap<String, MetricSeries>,
        vars: &HashMap<String, String>,
        targets: &[Target],
    ) -> Vec<ChartData> {
        let mut charts = Vec::new();

        for metric in self.config.metrics.iter().filter(|m| m.kind.is_charted()) {
            let Some(series) = collected.get(&prepare_query(&metric.query, vars)) else {
                continue;
            };
            let fallback = metric
                .fallback_query
                .as_ref()
                .and_then(|q| collected.get(&prepare_query(q, vars)));
            let points_of = |series: &MetricSeries, target: &Target| match metric.kind {
                MetricKind::RequestRate => target_rate_points(series, target),
                MetricKind::Latency => target_latency_points(series, target, metric.percentile.unwrap_or(95.0)),
                _ => sum_by_timestamp(series, |labels| target.matches(labels)),
            };

            let per_target: Vec<SeriesData> = targets
                .iter()
                .map(|target| {
                    let mut points = points_of(series, target);
                    if let (true, Some(fallback)) = (points.is_empty(), fallback) {
                        points = points_of(fallback, target);
                    }
                    SeriesData::new(target.name.clone(), scale_points(points, metric.scale))
                })
                .collect();

            // Latency does not add up across targets
            let cumulative = (metric.kind != MetricKind::Latency).then(|| {
                let total = sum_points(per_target.iter().map(|s| s.points.clone()));
                SeriesData::new("Total".to_string(), total)
            });

            charts.push(ChartData::new(
                metric.name.clone(),
                chart_title(metric),
                metric.unit().to_string(),
                cumulative,
                per_target,
            ));
        }

        charts.sort_by(|a, b| a.id.cmp(&b.id));
        charts
    }
}

/// Measures one metric for one target from its primary series and, where
/// the kind needs one, the paired series.
fn measure(
    metric: &MetricConfig,
    series: &MetricSeries,
    success: Option<&MetricSeries>,
    count: Option<&MetricSeries>,
    target: &Target,
) -> Result<AggregateResult, ReportError> {
    match metric.kind {
        MetricKind::RequestRate => Ok(compute_rate(series, target)),
        MetricKind::RequestCount => Ok(compute_request_count(series, target)),
        MetricKind::ErrorRatio => {
            let success = success.ok_or_else(|| missing_pair(metric, "success_query"))?;
            Ok(compute_error_ratio(success, series, target))
        }
        MetricKind::Latency => percentile_of(metric).and_then(|p| compute_percentile(series, target, p)),
        MetricKind::AverageLatency => {
            let count = count.ok_or_else(|| missing_pair(metric, "count_query"))?;
            compute_mean(series, count, target)
        }
        MetricKind::Gauge => compute_latest(series, target),
        kind @ (MetricKind::CpuUsage | MetricKind::MemoryUsage) => compute_resource_usage(series, target, kind),
    }
}

fn missing_pair(metric: &MetricConfig, field: &str) -> ReportError {
    ReportError::Config(format!("{} metric '{}' needs a {}", metric.kind.default_name(), metric.name, field))
}

fn lookup<'a>(collected: &'a BTreeMap<String, MetricSeries>, expr: &str) -> Result<&'a MetricSeries, ReportError> {
    collected
        .get(expr)
        .ok_or_else(|| ReportError::InsufficientData(format!("no result collected for '{}'", expr)))
}

fn lookup_paired<'a>(
    collected: &'a BTreeMap<String, MetricSeries>,
    vars: &HashMap<String, String>,
    query: &Option<String>,
) -> Result<Option<&'a MetricSeries>, ReportError> {
    query
        .as_ref()
        .map(|q| lookup(collected, &prepare_query(q, vars)))
        .transpose()
}

fn percentile_of(metric: &MetricConfig) -> Result<f64, ReportError> {
    metric
        .percentile
        .ok_or_else(|| ReportError::Config(format!("latency metric '{}' needs a percentile", metric.name)))
}

fn scale_points(points: Vec<MetricSample>, factor: f64) -> Vec<MetricSample> {
    points
        .into_iter()
        .map(|p| MetricSample::new(p.time_ms, p.value * factor))
        .collect()
}

fn chart_title(metric: &MetricConfig) -> String {
    match metric.kind {
        MetricKind::RequestRate => "Request Rate Over Time".to_string(),
        MetricKind::Latency => format!("Latency p{} Over Time", metric.percentile.unwrap_or(95.0)),
        MetricKind::CpuUsage => "CPU Usage Over Time".to_string(),
        MetricKind::MemoryUsage => "Memory Usage Over Time".to_string(),
        _ => metric.name.clone(),
    }
}

fn render_documents(
    data: &ReportData,
    thresholds: &[Threshold],
    format: ReportFormat,
) -> Result<Vec<ReportDocument>, ReportError> {
    let mut documents = Vec::new();
    if format.includes_html() {
        documents.push(ReportDocument::Html(render_html(data, thresholds)?));
    }
    if format.includes_junit() {
        documents.push(ReportDocument::Junit(render_junit(data, thresholds)?));
    }
    tracing::debug!("Rendered {} document(s)", documents.len());
    Ok(documents)
}
