//! Configuration management for CrabCapture
//!
//! Provides configuration loading, saving, and validation for session
//! retry policy, preview frame rates, device monitoring and preference storage.

use crate::errors::ConfigError;
use crate::mode::CaptureMode;
use crate::types::{Facing, CONST_FPS_OPTIONS};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrabCaptureConfig {
    pub session: SessionConfig,
    pub preview: PreviewConfig,
    pub registry: RegistryConfig,
    pub preferences: PreferencesConfig,
}

/// Capture session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Mode requested on the first start
    pub initial_mode: CaptureMode,
    /// Facing tried first when no device is active
    pub default_facing: Facing,
    /// Fixed delay before a suspended session retries, in milliseconds
    pub retry_delay_ms: u64,
}

/// Frame rates used when building constraint sets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewConfig {
    /// Lower bound of a variable frame rate
    pub min_fps: u32,
    /// Ideal value of a variable frame rate
    pub ideal_fps: u32,
    /// Constant fps tried first when the user never picked one
    pub default_const_fps: u32,
}

/// Device registry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Poll the provider for device changes
    pub monitor_devices: bool,
    /// Polling interval in milliseconds
    pub poll_interval_ms: u64,
}

/// Preference storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferencesConfig {
    /// JSON file holding persisted preferences
    pub path: String,
}

impl Default for CrabCaptureConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig {
                initial_mode: CaptureMode::Photo,
                default_facing: Facing::User,
                retry_delay_ms: 100,
            },
            preview: PreviewConfig::default(),
            registry: RegistryConfig {
                monitor_devices: true,
                poll_interval_ms: 2000,
            },
            preferences: PreferencesConfig {
                path: "crabcapture-prefs.json".to_string(),
            },
        }
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            min_fps: 20,
            ideal_fps: 30,
            default_const_fps: 30,
        }
    }
}

impl SessionConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl RegistryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl CrabCaptureConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;

        let config: CrabCaptureConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| ConfigError::Write(e.to_string()))?;
            }
        }

        let toml_string =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;

        fs::write(path, toml_string).map_err(|e| ConfigError::Write(e.to_string()))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("crabcapture.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.retry_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "Retry delay must be greater than zero".to_string(),
            ));
        }

        if self.preview.min_fps == 0 || self.preview.min_fps > self.preview.ideal_fps {
            return Err(ConfigError::Invalid(
                "Preview fps must satisfy 0 < min_fps <= ideal_fps".to_string(),
            ));
        }
        if !CONST_FPS_OPTIONS.contains(&self.preview.default_const_fps) {
            return Err(ConfigError::Invalid(format!(
                "Default constant fps must be one of {:?}",
                CONST_FPS_OPTIONS
            )));
        }

        if self.registry.monitor_devices && self.registry.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "Poll interval must be greater than zero".to_string(),
            ));
        }

        if self.preferences.path.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "Preference path must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CrabCaptureConfig::default();
        assert_eq!(config.session.retry_delay_ms, 100);
        assert_eq!(config.session.initial_mode, CaptureMode::Photo);
        assert_eq!(config.preview.default_const_fps, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut bad = CrabCaptureConfig::default();
        bad.session.retry_delay_ms = 0;
        assert!(bad.validate().is_err());

        let mut bad = CrabCaptureConfig::default();
        bad.preview.min_fps = 40;
        assert!(bad.validate().is_err());

        let mut bad = CrabCaptureConfig::default();
        bad.preview.default_const_fps = 24;
        assert!(bad.validate().is_err());

        let mut no_monitor = CrabCaptureConfig::default();
        no_monitor.registry.monitor_devices = false;
        no_monitor.registry.poll_interval_ms = 0;
        assert!(no_monitor.validate().is_ok());
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("nested").join("crabcapture.toml");

        let mut config = CrabCaptureConfig::default();
        config.session.initial_mode = CaptureMode::Video;
        config.session.default_facing = Facing::Environment;
        config.save_to_file(&config_path).unwrap();

        let loaded = CrabCaptureConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_toml_format() {
        let config = CrabCaptureConfig::default();
        let toml_string = toml::to_string_pretty(&config).unwrap();

        assert!(toml_string.contains("[session]"));
        assert!(toml_string.contains("[preview]"));
        assert!(toml_string.contains("[registry]"));
        assert!(toml_string.contains("[preferences]"));
        assert!(toml_string.contains("default_facing = \"user\""));
        assert!(toml_string.contains("initial_mode = \"photo\""));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = CrabCaptureConfig::load_from_file("nonexistent_crabcapture.toml");
        assert_eq!(result.unwrap().session.retry_delay_ms, 100);
    }

    #[test]
    fn test_load_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[session\nretry_delay_ms = ").unwrap();
        assert!(matches!(
            CrabCaptureConfig::load_from_file(&path),
            Err(ConfigError::Parse(_))
        ));
    }
}
