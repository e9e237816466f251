// Load profile of the test run (ramp stages)
use super::error::ReportError;
use chrono::{DateTime, Utc};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadStage {
    pub duration: Duration,
    pub vus: u32,
}

/// A stage placed on the time axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageBand {
    pub start_ms: i64,
    pub end_ms: i64,
    pub vus: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadProfile {
    pub stages: Vec<LoadStage>,
}

impl LoadProfile {
    pub fn new(stages: Vec<LoadStage>) -> Self {
        Self { stages }
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn total_duration(&self) -> Duration {
        self.stages
            .iter()
            .fold(Duration::ZERO, |total, s| total.saturating_add(s.duration))
    }

    pub fn peak_vus(&self) -> u32 {
        self.stages.iter().map(|s| s.vus).max().unwrap_or(0)
    }

    /// Lays the stages out back to back starting at `start`.
    pub fn bands(&self, start: DateTime<Utc>) -> Vec<StageBand> {
        let mut current = start.timestamp_millis();
        self.stages
            .iter()
            .map(|stage| {
                let millis = i64::try_from(stage.duration.as_millis()).unwrap_or(i64::MAX);
                let end = current.saturating_add(millis);
                let band = StageBand {
                    start_ms: current,
                    end_ms: end,
                    vus: stage.vus,
                };
                current = end;
                band
            })
            .collect()
    }
}

/// Parses durations like `30s`, `1m` or `2m30s`.
pub fn parse_duration(text: &str) -> Result<Duration, ReportError> {
    let invalid = || ReportError::Config(format!("invalid stage duration '{}'", text));
    let text = text.trim();
    if text.is_empty() {
        return Err(invalid());
    }

    let mut total = 0u64;
    let mut digits = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        let amount: u64 = digits.parse().map_err(|_| invalid())?;
        digits.clear();
        let seconds = match ch {
            'h' => amount.checked_mul(3600),
            'm' => amount.checked_mul(60),
            's' => Some(amount),
            _ => return Err(invalid()),
        };
        total = seconds.and_then(|s| total.checked_add(s)).ok_or_else(invalid)?;
    }
    if !digits.is_empty() {
        return Err(invalid());
    }
    Ok(Duration::from_secs(total))
}

/// Inverse of `parse_duration` for whole minutes and seconds, e.g. `4m30s`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (minutes, seconds) = (secs / 60, secs % 60);
    match (minutes, seconds) {
        (0, s) => format!("{}s", s),
        (m, 0) => format!("{}m", m),
        (m, s) => format!("{}m{}s", m, s),
    }
}
