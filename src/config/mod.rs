//! Configuration management for deej
//!
//! Handles loading, parsing, and hot-reloading of the YAML configuration.
//! Two files contribute to the slider mapping: the user's `config.yaml`
//! and an optional internal mapping file whose entries are appended after
//! the user's own (see [`slider_mapping`]).

pub mod slider_mapping;
pub mod watcher;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

use crate::slider::{NoiseReductionLevel, TrackerSettings};

pub use slider_mapping::{SliderKey, SliderMapping, TargetList};
pub use watcher::ConfigWatcher;

/// Value of `com_port` that requests port auto-detection
pub const AUTO_COM_PORT: &str = "auto";

/// User configuration file (`config.yaml`)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub slider_mapping: HashMap<SliderKey, TargetList>,
    #[serde(default)]
    pub invert_sliders: bool,
    #[serde(default)]
    pub noise_reduction: NoiseReductionLevel,
    #[serde(default = "default_com_port")]
    pub com_port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

/// Internal mapping file, merged below the user's mapping
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct InternalConfig {
    #[serde(default)]
    pub slider_mapping: HashMap<SliderKey, TargetList>,
}

/// Serial connection parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub com_port: String,
    pub baud_rate: u32,
}

impl ConnectionInfo {
    /// Whether the port should be discovered rather than opened directly
    pub fn wants_auto_detect(&self) -> bool {
        self.com_port.trim().is_empty() || self.com_port.eq_ignore_ascii_case(AUTO_COM_PORT)
    }
}

/// Fully resolved configuration handed to the rest of the app
#[derive(Debug, Clone)]
pub struct CanonicalConfig {
    pub slider_mapping: Arc<SliderMapping>,
    pub invert_sliders: bool,
    pub noise_reduction: NoiseReductionLevel,
    pub connection: ConnectionInfo,
}

impl CanonicalConfig {
    pub fn from_parts(user: &AppConfig, internal: Option<&InternalConfig>) -> Self {
        let empty = HashMap::new();
        let internal_mapping = internal.map(|c| &c.slider_mapping).unwrap_or(&empty);

        Self {
            slider_mapping: Arc::new(SliderMapping::from_configs(&user.slider_mapping, internal_mapping)),
            invert_sliders: user.invert_sliders,
            noise_reduction: user.noise_reduction,
            connection: ConnectionInfo {
                com_port: user.com_port.clone(),
                baud_rate: user.baud_rate,
            },
        }
    }

    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            invert_sliders: self.invert_sliders,
            noise_reduction: self.noise_reduction,
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&contents).with_context(|| format!("Failed to parse YAML config: {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            anyhow::bail!("baud_rate must be greater than zero");
        }

        Ok(())
    }
}

impl InternalConfig {
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read internal config file: {}", path.display()))?;

        serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML internal config: {}", path.display()))
    }
}

/// Knows where both config files live and how to combine them
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    pub user_path: PathBuf,
    pub internal_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new(user_path: impl Into<PathBuf>, internal_path: Option<PathBuf>) -> Self {
        Self {
            user_path: user_path.into(),
            internal_path,
        }
    }

    /// Load and merge both files
    ///
    /// A missing internal file is not an error; a broken one is.
    pub async fn load(&self) -> Result<CanonicalConfig> {
        let user = AppConfig::load(&self.user_path).await?;

        let internal = match &self.internal_path {
            Some(path) if path.exists() => Some(InternalConfig::load(path).await?),
            _ => None,
        };

        Ok(CanonicalConfig::from_parts(&user, internal.as_ref()))
    }
}

// Default value functions
fn default_com_port() -> String { AUTO_COM_PORT.to_string() }
fn default_baud_rate() -> u32 { 9600 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = AppConfig::parse(
            r#"
slider_mapping:
  0: master
  1:
    - chrome.exe
    - firefox
  2: deej.unmapped
invert_sliders: true
noise_reduction: high
com_port: /dev/ttyUSB0
baud_rate: 115200
"#,
        )
        .unwrap();

        assert!(config.invert_sliders);
        assert_eq!(config.noise_reduction, NoiseReductionLevel::High);
        assert_eq!(config.com_port, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 115200);

        let canonical = CanonicalConfig::from_parts(&config, None);
        assert_eq!(canonical.slider_mapping.get(0), Some(&["master".to_string()][..]));
        assert_eq!(canonical.slider_mapping.get(1).map(|t| t.len()), Some(2));
        assert!(!canonical.connection.wants_auto_detect());
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::parse("slider_mapping: {}").unwrap();
        assert!(!config.invert_sliders);
        assert_eq!(config.noise_reduction, NoiseReductionLevel::Default);
        assert_eq!(config.baud_rate, 9600);

        let canonical = CanonicalConfig::from_parts(&config, None);
        assert!(canonical.connection.wants_auto_detect());
        assert!(canonical.slider_mapping.is_empty());
    }

    #[test]
    fn test_zero_baud_rate_rejected() {
        assert!(AppConfig::parse("baud_rate: 0").is_err());
    }

    #[test]
    fn test_internal_mapping_is_appended() {
        let user = AppConfig::parse("slider_mapping:\n  0: master\n").unwrap();
        let internal: InternalConfig =
            serde_yaml::from_str("slider_mapping:\n  0: [master, discord]\n  3: spotify\n").unwrap();

        let canonical = CanonicalConfig::from_parts(&user, Some(&internal));
        assert_eq!(
            canonical.slider_mapping.get(0),
            Some(&["master".to_string(), "discord".to_string()][..])
        );
        assert_eq!(canonical.slider_mapping.get(3), Some(&["spotify".to_string()][..]));
    }

    #[tokio::test]
    async fn test_loader_ignores_missing_internal_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let user_path = dir.path().join("config.yaml");
        std::fs::write(&user_path, "slider_mapping:\n  0: master\n").unwrap();

        let loader = ConfigLoader::new(&user_path, Some(dir.path().join("missing.yaml")));
        let config = loader.load().await.unwrap();
        assert_eq!(config.slider_mapping.len(), 1);
    }
}
