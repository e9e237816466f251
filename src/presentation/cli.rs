// Command-line arguments
use crate::domain::report::ReportFormat;
use crate::infrastructure::config::ReportConfig;
use chrono::{DateTime, Utc};
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "loadtest-report")]
#[command(version, about = "Builds HTML and JUnit load test reports from Prometheus metrics")]
pub struct Args {
    /// Configuration file, with or without the .toml extension
    #[arg(short, long, default_value = "config/report")]
    pub config: String,

    /// Prometheus base URL, overrides prometheus.url
    #[arg(long)]
    pub prometheus_url: Option<String>,

    /// Directory the reports are written to
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Report formats to produce
    #[arg(short, long, value_enum)]
    pub format: Option<ReportFormat>,

    /// End of the report window (RFC 3339), defaults to now
    #[arg(long)]
    pub end: Option<DateTime<Utc>>,
}

impl Args {
    /// Applies command-line overrides on top of the loaded configuration.
    pub fn apply(&self, config: &mut ReportConfig) {
        if let Some(url) = &self.prometheus_url {
            config.prometheus.url = url.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.report.output_dir = dir.clone();
        }
        if let Some(format) = self.format {
            config.report.format = format;
        }
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end.unwrap_or_else(Utc::now)
    }
}
