// Target service - Use case for resolving monitored targets
use crate::application::metrics_repository::MetricsRepository;
use crate::domain::error::ReportError;
use crate::domain::target::Target;
use crate::infrastructure::config::TargetSettings;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Clone)]
pub struct TargetService {
    repository: Arc<dyn MetricsRepository>,
}

impl TargetService {
    pub fn new(repository: Arc<dyn MetricsRepository>) -> Self {
        Self { repository }
    }

    /// Configured targets, or the values of the target label reported by the
    /// discovery query when none are configured.
    pub async fn list_targets(&self, settings: &TargetSettings, at: DateTime<Utc>) -> Result<Vec<Target>, ReportError> {
        let to_target = |value: String| Target::new(settings.label.clone(), value, settings.match_mode);

        if !settings.names.is_empty() {
            return Ok(settings.names.iter().cloned().map(to_target).collect());
        }

        let Some(query) = &settings.discovery_query else {
            return Ok(Vec::new());
        };
        let series = self.repository.query_instant(query, at).await?;
        let values = series.label_values(&settings.label);
        tracing::info!("Discovered {} targets via '{}'", values.len(), query);
        Ok(values.into_iter().map(to_target).collect())
    }
}
