//! Locator configuration.
//!
//! Loaded from YAML, then adjusted by environment variables:
//!
//! | variable | field |
//! |---|---|
//! | `SVCMGR_CLASSIFICATION` | `classification` (`core` / `non_core`) |
//! | `SVCMGR_ISOLATED` | `isolated` |
//! | `SVCMGR_SLOW_CALL_CORE_MS` | `slow_call_core_ms` |
//! | `SVCMGR_SLOW_CALL_MS` | `slow_call_ms` |
//! | `SVCMGR_LOG_CALLS_CORE` | `log_calls_core` |
//! | `SVCMGR_LOG_CALLS` | `log_calls` |
//! | `SVCMGR_MANIFEST` | `manifest_path` |
//!
//! # Rust Learning Note
//!
//! ## Overrides through a lookup function
//!
//! ```rust,ignore
//! config.apply_overrides_from(|key| std::env::var(key).ok());
//! ```
//!
//! Reading the environment inside the override logic would make it
//! untestable without mutating process-global state. Taking
//! `Fn(&str) -> Option<String>` lets tests pass a `HashMap` lookup instead.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use svcmgr_common::Classification;
use svcmgr_registry::CallerContext;
use tracing::warn;

use crate::diagnostics::DiagnosticsThresholds;

pub const ENV_CLASSIFICATION: &str = "SVCMGR_CLASSIFICATION";
pub const ENV_ISOLATED: &str = "SVCMGR_ISOLATED";
pub const ENV_SLOW_CALL_CORE_MS: &str = "SVCMGR_SLOW_CALL_CORE_MS";
pub const ENV_SLOW_CALL_MS: &str = "SVCMGR_SLOW_CALL_MS";
pub const ENV_LOG_CALLS_CORE: &str = "SVCMGR_LOG_CALLS_CORE";
pub const ENV_LOG_CALLS: &str = "SVCMGR_LOG_CALLS";
pub const ENV_MANIFEST: &str = "SVCMGR_MANIFEST";

/// Settings of one process's locator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatorConfig {
    /// Diagnostics partition this process's lookups are accounted to.
    #[serde(default)]
    pub classification: Classification,

    /// Whether this process is sandboxed.
    #[serde(default)]
    pub isolated: bool,

    #[serde(default = "default_slow_call_core_ms")]
    pub slow_call_core_ms: u64,

    #[serde(default = "default_slow_call_ms")]
    pub slow_call_ms: u64,

    /// Core lookups per summary window.
    #[serde(default = "default_log_calls_core")]
    pub log_calls_core: u64,

    /// Non-core lookups per summary window.
    #[serde(default = "default_log_calls")]
    pub log_calls: u64,

    #[serde(default = "default_log_interval_ms")]
    pub stats_log_interval_ms: u64,

    #[serde(default = "default_log_interval_ms")]
    pub slow_log_interval_ms: u64,

    /// First poll delay of `wait_for_service`.
    #[serde(default = "default_wait_backoff_min_ms")]
    pub wait_backoff_min_ms: u64,

    /// Poll delay cap of `wait_for_service`.
    #[serde(default = "default_wait_backoff_max_ms")]
    pub wait_backoff_max_ms: u64,

    /// Declaration manifest to load.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_path: Option<PathBuf>,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            classification: Classification::default(),
            isolated: false,
            slow_call_core_ms: default_slow_call_core_ms(),
            slow_call_ms: default_slow_call_ms(),
            log_calls_core: default_log_calls_core(),
            log_calls: default_log_calls(),
            stats_log_interval_ms: default_log_interval_ms(),
            slow_log_interval_ms: default_log_interval_ms(),
            wait_backoff_min_ms: default_wait_backoff_min_ms(),
            wait_backoff_max_ms: default_wait_backoff_max_ms(),
            manifest_path: None,
        }
    }
}

impl LocatorConfig {
    /// Load configuration from a YAML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        Self::load_from_string(&content)
    }

    /// Load configuration from a YAML string
    pub fn load_from_string(content: &str) -> Result<Self> {
        let config: LocatorConfig =
            serde_yaml::from_str(content).context("Failed to parse YAML configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Defaults adjusted by the process environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides_from(|key| std::env::var(key).ok());
        config
    }

    /// Applies overrides returned by `lookup` for each known variable.
    ///
    /// Unparsable values are logged and ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_CLASSIFICATION) {
            match Classification::parse(&value) {
                Some(classification) => self.classification = classification,
                None => warn!("Ignoring {}={:?}: expected core or non_core", ENV_CLASSIFICATION, value),
            }
        }
        override_parsed(&lookup, ENV_ISOLATED, &mut self.isolated);
        override_parsed(&lookup, ENV_SLOW_CALL_CORE_MS, &mut self.slow_call_core_ms);
        override_parsed(&lookup, ENV_SLOW_CALL_MS, &mut self.slow_call_ms);
        override_parsed(&lookup, ENV_LOG_CALLS_CORE, &mut self.log_calls_core);
        override_parsed(&lookup, ENV_LOG_CALLS, &mut self.log_calls);
        if let Some(path) = lookup(ENV_MANIFEST).filter(|p| !p.is_empty()) {
            self.manifest_path = Some(PathBuf::from(path));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.log_calls_core == 0 || self.log_calls == 0 {
            return Err(anyhow!("Log-every thresholds must be greater than 0"));
        }
        if self.stats_log_interval_ms == 0 || self.slow_log_interval_ms == 0 {
            return Err(anyhow!("Log intervals must be greater than 0"));
        }
        if self.wait_backoff_min_ms == 0 {
            return Err(anyhow!("Wait backoff must be greater than 0"));
        }
        if self.wait_backoff_min_ms > self.wait_backoff_max_ms {
            return Err(anyhow!(
                "Wait backoff minimum ({} ms) exceeds maximum ({} ms)",
                self.wait_backoff_min_ms,
                self.wait_backoff_max_ms
            ));
        }
        Ok(())
    }

    /// Diagnostics thresholds of `classification`.
    pub fn thresholds(&self, classification: Classification) -> DiagnosticsThresholds {
        let (slow_call_ms, log_every_calls) = match classification {
            Classification::Core => (self.slow_call_core_ms, self.log_calls_core),
            Classification::NonCore => (self.slow_call_ms, self.log_calls),
        };
        DiagnosticsThresholds {
            slow_call: Duration::from_millis(slow_call_ms),
            log_every_calls,
            stats_interval: Duration::from_millis(self.stats_log_interval_ms),
            slow_log_interval: Duration::from_millis(self.slow_log_interval_ms),
        }
    }

    /// How this process presents itself to the authority.
    pub fn caller_context(&self) -> CallerContext {
        CallerContext {
            isolated: self.isolated,
        }
    }

    pub fn wait_backoff_min(&self) -> Duration {
        Duration::from_millis(self.wait_backoff_min_ms)
    }

    pub fn wait_backoff_max(&self) -> Duration {
        Duration::from_millis(self.wait_backoff_max_ms)
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, field: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(value) = lookup(key) {
        match value.trim().parse() {
            Ok(parsed) => *field = parsed,
            Err(_) => warn!("Ignoring {}={:?}: not a valid value", key, value),
        }
    }
}

// Default value functions
fn default_slow_call_core_ms() -> u64 {
    10
}

fn default_slow_call_ms() -> u64 {
    50
}

fn default_log_calls_core() -> u64 {
    100
}

fn default_log_calls() -> u64 {
    200
}

fn default_log_interval_ms() -> u64 {
    5000
}

fn default_wait_backoff_min_ms() -> u64 {
    5
}

fn default_wait_backoff_max_ms() -> u64 {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env(vars: &[(&str, &str)]) -> HashMap<String, String> {
        vars.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = LocatorConfig::default();

        assert_eq!(config.classification, Classification::NonCore);
        assert_eq!(config.thresholds(Classification::Core), DiagnosticsThresholds::core_default());
        assert_eq!(
            config.thresholds(Classification::NonCore),
            DiagnosticsThresholds::non_core_default()
        );
        assert_eq!(config.wait_backoff_min(), Duration::from_millis(5));
        assert_eq!(config.wait_backoff_max(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_environment_overrides() {
        let vars = env(&[
            (ENV_CLASSIFICATION, "core"),
            (ENV_ISOLATED, "true"),
            (ENV_SLOW_CALL_CORE_MS, "20"),
            (ENV_LOG_CALLS, "50"),
            (ENV_MANIFEST, "/etc/svcmgr/manifest.yaml"),
        ]);
        let mut config = LocatorConfig::default();
        config.apply_overrides_from(|key| vars.get(key).cloned());

        assert_eq!(config.classification, Classification::Core);
        assert!(config.caller_context().isolated);
        assert_eq!(config.slow_call_core_ms, 20);
        assert_eq!(config.slow_call_ms, 50);
        assert_eq!(config.log_calls, 50);
        assert_eq!(
            config.manifest_path,
            Some(PathBuf::from("/etc/svcmgr/manifest.yaml"))
        );
    }

    #[test]
    fn test_invalid_overrides_keep_defaults() {
        let vars = env(&[
            (ENV_CLASSIFICATION, "important"),
            (ENV_SLOW_CALL_MS, "fast"),
            (ENV_ISOLATED, "maybe"),
        ]);
        let mut config = LocatorConfig::default();
        config.apply_overrides_from(|key| vars.get(key).cloned());

        assert_eq!(config, LocatorConfig::default());
    }

    #[test]
    fn test_load_from_string_with_defaults() {
        let yaml = r#"
classification: core
slow_call_core_ms: 15
"#;
        let config = LocatorConfig::load_from_string(yaml).unwrap();

        assert_eq!(config.classification, Classification::Core);
        assert_eq!(config.slow_call_core_ms, 15);
        assert_eq!(config.log_calls_core, 100);
        assert_eq!(config.stats_log_interval_ms, 5000);
    }

    #[test]
    fn test_validation() {
        assert!(LocatorConfig::load_from_string("log_calls: 0").is_err());
        assert!(LocatorConfig::load_from_string("wait_backoff_min_ms: 0").is_err());
        assert!(LocatorConfig::load_from_string("wait_backoff_min_ms: 2000").is_err());
        assert!(LocatorConfig::load_from_string("classification: sometimes").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "isolated: true\nwait_backoff_max_ms: 250").unwrap();

        let config = LocatorConfig::load_from_file(file.path()).unwrap();
        assert!(config.isolated);
        assert_eq!(config.wait_backoff_max(), Duration::from_millis(250));
    }
}
