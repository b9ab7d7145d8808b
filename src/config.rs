//! Engine configuration
//!
//! Loaded from a JSON5 file. Every field has a default, so a missing file or
//! an empty object yields a working configuration.

use crate::error::{EngineError, EngineResult};
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "CHATFLOW_CONFIG_PATH";

/// Root configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    #[serde(default)]
    pub attempts: AttemptPolicy,
    /// Upper bound on pass-through steps taken for one inbound event.
    #[serde(default = "default_max_chained_steps")]
    pub max_chained_steps: usize,
    /// Fall back to the default flow when no trigger matches.
    #[serde(default = "default_true")]
    pub use_default_flow: bool,
    /// Idle time after which `sweep_stale` abandons a session.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_max_chained_steps() -> usize {
    16
}

fn default_true() -> bool {
    true
}

fn default_stale_after_secs() -> u64 {
    24 * 60 * 60
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            attempts: AttemptPolicy::default(),
            max_chained_steps: default_max_chained_steps(),
            use_default_flow: true,
            stale_after_secs: default_stale_after_secs(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Idle threshold, clamped to ten years.
    pub fn stale_after(&self) -> chrono::Duration {
        const MAX_SECS: u64 = 10 * 365 * 24 * 60 * 60;
        chrono::Duration::seconds(self.stale_after_secs.min(MAX_SECS) as i64)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> EngineResult<()> {
        if self.attempts.ceiling == 0 {
            return Err(EngineError::Config(
                "attempts.ceiling must be at least 1".to_string(),
            ));
        }
        if self.max_chained_steps == 0 {
            return Err(EngineError::Config(
                "maxChainedSteps must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// What happens when a session keeps failing on the same step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptPolicy {
    /// The action fires once `attempt_count` reaches this value.
    #[serde(default = "default_ceiling")]
    pub ceiling: u32,
    #[serde(default)]
    pub on_exceeded: ExceededAction,
}

fn default_ceiling() -> u32 {
    3
}

impl Default for AttemptPolicy {
    fn default() -> Self {
        Self {
            ceiling: default_ceiling(),
            on_exceeded: ExceededAction::default(),
        }
    }
}

impl AttemptPolicy {
    pub fn is_exceeded(&self, attempt_count: u32) -> bool {
        attempt_count >= self.ceiling
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExceededAction {
    /// Transfer to a human agent.
    #[default]
    HandOff,
    Abandon,
}

/// Resolve the config file location.
///
/// An explicit path wins, then `CHATFLOW_CONFIG_PATH`, then
/// `<config dir>/chatflow/config.json5`.
pub fn get_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV).filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from(".config"))
        .join("chatflow")
        .join("config.json5")
}

/// Parse configuration text.
pub fn parse_config(raw: &str) -> EngineResult<EngineConfig> {
    if raw.trim().is_empty() {
        return Ok(EngineConfig::default());
    }
    let config: EngineConfig =
        json5::from_str(raw).map_err(|e| EngineError::Config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from `path`; a missing file yields defaults.
pub async fn load_config(path: &Path) -> EngineResult<EngineConfig> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => {
            debug!(path = %path.display(), "loading config");
            parse_config(&raw).map_err(|e| match e {
                EngineError::Config(reason) => {
                    EngineError::Config(format!("{}: {}", path.display(), reason))
                }
                other => other,
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no config file, using defaults");
            Ok(EngineConfig::default())
        }
        Err(e) => Err(EngineError::Config(format!(
            "failed to read {}: {}",
            path.display(),
            e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogFormat;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.attempts.ceiling, 3);
        assert_eq!(config.attempts.on_exceeded, ExceededAction::HandOff);
        assert_eq!(config.max_chained_steps, 16);
        assert!(config.use_default_flow);
        assert_eq!(config.stale_after(), chrono::Duration::hours(24));
    }

    #[test]
    fn test_parse_partial_json5() {
        let config = parse_config(
            r#"{
                // tighter retry budget
                attempts: { ceiling: 2, onExceeded: "abandon" },
                logging: { format: "json" },
            }"#,
        )
        .unwrap();
        assert_eq!(config.attempts.ceiling, 2);
        assert_eq!(config.attempts.on_exceeded, ExceededAction::Abandon);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.max_chained_steps, 16);
    }

    #[test]
    fn test_rejects_zero_ceiling() {
        assert!(matches!(
            parse_config("{ attempts: { ceiling: 0 } }"),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_policy_fires_at_ceiling() {
        let policy = AttemptPolicy::default();
        assert!(!policy.is_exceeded(2));
        assert!(policy.is_exceeded(3));
    }

    #[test]
    fn test_explicit_path_wins() {
        let path = Path::new("/tmp/custom.json5");
        assert_eq!(get_config_path(Some(path)), path);
    }

    #[tokio::test]
    async fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{ maxChainedSteps: 4, useDefaultFlow: false }}").unwrap();

        let config = load_config(file.path()).await.unwrap();
        assert_eq!(config.max_chained_steps, 4);
        assert!(!config.use_default_flow);
    }

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.json5")).await.unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[tokio::test]
    async fn test_invalid_file_names_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{ attempts: ").unwrap();
        let err = load_config(file.path()).await.unwrap_err();
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }
}
