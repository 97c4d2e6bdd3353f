use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cycle::CycleDetector;
use crate::error::{OrchestratorError, Result};

pub const ENV_PAUSE_POLL_MS: &str = "WEAVE_ORCH_PAUSE_POLL_MS";
pub const ENV_CONTEXT_CHAR_LIMIT: &str = "WEAVE_ORCH_CONTEXT_CHAR_LIMIT";
pub const ENV_MAX_PARENT_DEPTH: &str = "WEAVE_ORCH_MAX_PARENT_DEPTH";
pub const ENV_BUDGET_WARNING_RATIO: &str = "WEAVE_ORCH_BUDGET_WARNING_RATIO";

/// Tunables for the run coordinator and strategy executors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    pub pause_poll_interval_ms: u64,
    /// Maximum characters of one agent's output passed on as context
    pub context_char_limit: usize,
    pub max_parent_depth: usize,
    pub budget_warning_ratio: f64,
    pub status_channel_capacity: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            pause_poll_interval_ms: 500,
            context_char_limit: 10_000,
            max_parent_depth: CycleDetector::DEFAULT_MAX_DEPTH,
            budget_warning_ratio: 0.8,
            status_channel_capacity: 2048,
        }
    }
}

impl OrchestratorSettings {
    /// Defaults, overlaid by an optional JSON file, overlaid by the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) if path.exists() => Self::from_file(path)?,
            _ => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::IoError(format!("Failed to read settings file: {}", e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            OrchestratorError::ParseError(format!("Failed to parse settings file: {}", e))
        })
    }

    /// Overlay values from `lookup`; unparseable values are logged and ignored
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_env(&lookup, ENV_PAUSE_POLL_MS) {
            self.pause_poll_interval_ms = v;
        }
        if let Some(v) = parse_env(&lookup, ENV_CONTEXT_CHAR_LIMIT) {
            self.context_char_limit = v;
        }
        if let Some(v) = parse_env(&lookup, ENV_MAX_PARENT_DEPTH) {
            self.max_parent_depth = v;
        }
        if let Some(v) = parse_env(&lookup, ENV_BUDGET_WARNING_RATIO) {
            self.budget_warning_ratio = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.pause_poll_interval_ms == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "pause_poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_parent_depth == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "max_parent_depth must be greater than zero".to_string(),
            ));
        }
        if !(self.budget_warning_ratio > 0.0 && self.budget_warning_ratio <= 1.0) {
            return Err(OrchestratorError::InvalidConfig(format!(
                "budget_warning_ratio must be in (0, 1], got {}",
                self.budget_warning_ratio
            )));
        }
        if self.status_channel_capacity == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "status_channel_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn pause_poll_interval(&self) -> Duration {
        Duration::from_millis(self.pause_poll_interval_ms)
    }
}

fn parse_env<F, T>(lookup: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring invalid value {:?} for {}", raw, key);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_documented_values() {
        let settings = OrchestratorSettings::default();
        assert_eq!(settings.pause_poll_interval_ms, 500);
        assert_eq!(settings.context_char_limit, 10_000);
        assert_eq!(settings.max_parent_depth, 20);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn file_values_fill_missing_fields_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"context_char_limit": 2000}"#).unwrap();

        let settings = OrchestratorSettings::load(Some(&path)).unwrap();
        assert_eq!(settings.context_char_limit, 2000);
        assert_eq!(settings.pause_poll_interval_ms, 500);
    }

    #[test]
    fn env_overrides_and_ignores_garbage() {
        let env: HashMap<&str, &str> = [
            (ENV_PAUSE_POLL_MS, "25"),
            (ENV_CONTEXT_CHAR_LIMIT, "not-a-number"),
            (ENV_BUDGET_WARNING_RATIO, " 0.5 "),
        ]
        .into_iter()
        .collect();

        let mut settings = OrchestratorSettings::default();
        settings.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(settings.pause_poll_interval_ms, 25);
        assert_eq!(settings.context_char_limit, 10_000);
        assert_eq!(settings.budget_warning_ratio, 0.5);
    }

    #[test]
    fn rejects_out_of_range_ratio() {
        let settings = OrchestratorSettings {
            budget_warning_ratio: 1.5,
            ..OrchestratorSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(OrchestratorError::InvalidConfig(_))
        ));
    }
}
