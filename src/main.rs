// Main entry point - Dependency injection and report run
mod application;
mod domain;
mod infrastructure;
mod presentation;
#[cfg(test)]
mod test_support;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::application::report_service::ReportService;
use crate::infrastructure::config::load_report_config;
use crate::infrastructure::prometheus_repository::PrometheusRepository;
use crate::presentation::cli::Args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing, RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    // Load configuration, command-line flags win
    let mut config = load_report_config(&args.config)?;
    args.apply(&mut config);
    config.validate()?;

    // Create repository (infrastructure layer)
    let repository = Arc::new(PrometheusRepository::new(
        config.prometheus.url.clone(),
        Duration::from_secs(config.prometheus.request_timeout_secs),
    )?);

    let format = config.report.format;
    let output_dir = config.report.output_dir.clone();

    // Create service (application layer)
    let service = ReportService::new(repository, config);

    match service.generate(args.end(), format, &output_dir).await {
        Ok(summary) => {
            for path in &summary.paths {
                tracing::info!("Report: {}", path.display());
            }
            tracing::info!(
                "{} results for {} targets, {} checks passed, {} failed, {} without data",
                summary.results,
                summary.targets,
                summary.counts.passed,
                summary.counts.failed,
                summary.counts.skipped
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!("Report generation failed: {}", e);
            Err(e.into())
        }
    }
}
