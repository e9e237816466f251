// Monitored target domain model
use super::metrics::LabelSet;
use serde::Deserialize;

/// How a target value is compared against a series label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    #[default]
    Exact,
    /// Label value contains the target value, e.g. pod `http-echo-foo-7d9` for `foo`.
    Contains,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub label: String,
    pub value: String,
    pub name: String,
    pub match_mode: MatchMode,
}

impl Target {
    pub fn new(label: impl Into<String>, value: impl Into<String>, match_mode: MatchMode) -> Self {
        let value = value.into();
        let name = Self::format_name(&value);
        Self {
            label: label.into(),
            value,
            name,
            match_mode,
        }
    }

    fn format_name(value: &str) -> String {
        // Convert "foo.localhost" to "foo"
        value.split('.').next().unwrap_or(value).to_string()
    }

    pub fn matches(&self, labels: &LabelSet) -> bool {
        match (labels.get(&self.label), self.match_mode) {
            (Some(v), MatchMode::Exact) => v == self.value,
            (Some(v), MatchMode::Contains) => v.contains(&self.value),
            (None, _) => false,
        }
    }
}
