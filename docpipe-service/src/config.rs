//! Pipeline configuration.
//!
//! Every field has a default, so an empty environment yields a working
//! configuration rooted at `./temp`.

mod loader;

pub use loader::load_config;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::tools::Tool;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_staging")]
    pub staging: StagingConfig,

    #[serde(default = "default_limits")]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub tools: ToolOverrides,

    /// Locale for user-facing messages
    #[serde(default = "default_locale")]
    pub locale: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            staging: default_staging(),
            limits: default_limits(),
            tools: ToolOverrides::default(),
            locale: default_locale(),
        }
    }
}

/// Staging directory and artifact lifetimes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingConfig {
    #[serde(default = "default_staging_dir")]
    pub dir: PathBuf,

    /// Grace window before a delivered artifact is deleted
    #[serde(default = "default_output_ttl_secs")]
    pub output_ttl_secs: u64,

    /// Delay before a converter profile directory is deleted
    #[serde(default = "default_profile_ttl_secs")]
    pub profile_ttl_secs: u64,

    /// How often long-lived hosts sweep due deletions
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl StagingConfig {
    pub fn output_ttl(&self) -> Duration {
        Duration::from_secs(self.output_ttl_secs)
    }

    pub fn profile_ttl(&self) -> Duration {
        Duration::from_secs(self.profile_ttl_secs)
    }

    /// Never zero, since a zero period is rejected by the timer
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Size limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_input_bytes")]
    pub max_input_bytes: u64,
}

/// Explicit binary paths. When set, platform probing is skipped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolOverrides {
    #[serde(default)]
    pub converter: Option<PathBuf>,

    #[serde(default)]
    pub rasterizer: Option<PathBuf>,

    #[serde(default)]
    pub encryption: Option<PathBuf>,

    #[serde(default)]
    pub encryption_fallback: Option<PathBuf>,
}

impl ToolOverrides {
    pub fn as_map(&self) -> HashMap<Tool, PathBuf> {
        [
            (Tool::DocumentConverter, &self.converter),
            (Tool::Rasterizer, &self.rasterizer),
            (Tool::EncryptionPrimary, &self.encryption),
            (Tool::EncryptionFallback, &self.encryption_fallback),
        ]
        .into_iter()
        .filter_map(|(tool, path)| path.clone().map(|p| (tool, p)))
        .collect()
    }
}

// ==================== Default Value Functions ====================

pub(crate) fn default_staging() -> StagingConfig {
    StagingConfig {
        dir: default_staging_dir(),
        output_ttl_secs: default_output_ttl_secs(),
        profile_ttl_secs: default_profile_ttl_secs(),
        sweep_interval_secs: default_sweep_interval_secs(),
    }
}

pub(crate) fn default_staging_dir() -> PathBuf {
    PathBuf::from("./temp")
}

fn default_output_ttl_secs() -> u64 {
    600 // 10 minutes
}

fn default_profile_ttl_secs() -> u64 {
    10
}

fn default_sweep_interval_secs() -> u64 {
    30
}

pub(crate) fn default_limits() -> LimitsConfig {
    LimitsConfig {
        max_input_bytes: default_max_input_bytes(),
    }
}

fn default_max_input_bytes() -> u64 {
    50 * 1024 * 1024 // 50 MB
}

fn default_locale() -> String {
    "en".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.staging.dir, PathBuf::from("./temp"));
        assert_eq!(config.staging.output_ttl(), Duration::from_secs(600));
        assert_eq!(config.staging.profile_ttl(), Duration::from_secs(10));
        assert_eq!(config.limits.max_input_bytes, 52_428_800);
        assert_eq!(config.locale, "en");
        assert!(config.tools.as_map().is_empty());
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{"staging": {"dir": "/var/tmp/docpipe"}, "tools": {"rasterizer": "/usr/local/bin/gs"}}"#,
        )
        .unwrap();

        assert_eq!(config.staging.dir, PathBuf::from("/var/tmp/docpipe"));
        assert_eq!(config.staging.sweep_interval_secs, 30);
        assert_eq!(config.staging.sweep_interval(), Duration::from_secs(30));
        assert_eq!(
            config.tools.as_map().get(&Tool::Rasterizer),
            Some(&PathBuf::from("/usr/local/bin/gs"))
        );
    }
}
