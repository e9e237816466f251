// Error taxonomy shared by every layer
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    /// The metrics store could not be reached or answered with a non-2xx status.
    #[error("{}", format_query_error(.status, .message))]
    Query { status: Option<u16>, message: String },

    #[error("Malformed metrics response: {0}")]
    Parse(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Queries exceeded the run budget of {0:?}")]
    Timeout(Duration),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to render report: {0}")]
    Render(#[from] std::fmt::Error),

    #[error("Failed to render template: {0}")]
    Template(#[from] tera::Error),

    #[error("Failed to write report: {0}")]
    Io(#[from] std::io::Error),
}

fn format_query_error(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(code) => format!("Metrics query failed with status {}: {}", code, message),
        None => format!("Metrics query failed: {}", message),
    }
}

impl ReportError {
    pub fn query(message: impl Into<String>) -> Self {
        ReportError::Query {
            status: None,
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for ReportError {
    fn from(err: serde_json::Error) -> Self {
        ReportError::Parse(err.to_string())
    }
}

/// Pipeline stages of a report run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Discover,
    Readiness,
    Window,
    Collect,
    Aggregate,
    Render,
    Write,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Discover => "discover",
            PipelineStage::Readiness => "readiness",
            PipelineStage::Window => "window",
            PipelineStage::Collect => "collect",
            PipelineStage::Aggregate => "aggregate",
            PipelineStage::Render => "render",
            PipelineStage::Write => "write",
        };
        f.write_str(name)
    }
}

/// A report run aborted in `stage`.
#[derive(Debug, Error)]
#[error("{stage} stage failed: {source}")]
pub struct PipelineError {
    pub stage: PipelineStage,
    #[source]
    pub source: ReportError,
}

/// Tags a stage's error with the stage it came from.
pub trait StageResultExt<T> {
    fn in_stage(self, stage: PipelineStage) -> Result<T, PipelineError>;
}

impl<T> StageResultExt<T> for Result<T, ReportError> {
    fn in_stage(self, stage: PipelineStage) -> Result<T, PipelineError> {
        self.map_err(|source| PipelineError { stage, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_error_carries_upstream_status() {
        let err = ReportError::Query {
            status: Some(503),
            message: "service unavailable".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Metrics query failed with status 503: service unavailable"
        );
        assert_eq!(
            ReportError::query("connection refused").to_string(),
            "Metrics query failed: connection refused"
        );
    }

    #[test]
    fn test_in_stage_wraps_error() {
        let result: Result<(), ReportError> = Err(ReportError::Timeout(Duration::from_secs(5)));
        let err = result.in_stage(PipelineStage::Collect).unwrap_err();
        assert_eq!(err.stage, PipelineStage::Collect);
        assert!(err.to_string().starts_with("collect stage failed"));
    }
}
