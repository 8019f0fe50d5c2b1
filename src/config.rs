use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::calibration::CalibrationConfig;
use crate::derivation::LearningConfig;
use crate::logging::LogConfig;
use crate::pmc::LoadConfig;

/// Values rejected by [`AppConfig::validate`]
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub metadata: ConfigMetadata,

    /// General application settings
    #[serde(default)]
    pub settings: AppSettings,

    /// Load model time constants
    #[serde(default)]
    pub pmc: LoadConfig,

    /// Delta threshold and trust gates
    #[serde(default)]
    pub calibration: CalibrationConfig,

    /// Data point weighting and confidence
    #[serde(default)]
    pub learning: LearningConfig,

    #[serde(default)]
    pub logging: LogConfig,
}

/// Configuration metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigMetadata {
    /// Configuration format version
    pub version: String,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// General application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Data directory path
    pub data_dir: PathBuf,

    /// Database file name inside `data_dir`
    pub database_file: String,

    /// Apply calibrations automatically when they are trusted and needed
    pub auto_apply: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        let now = Utc::now();

        AppConfig {
            metadata: ConfigMetadata {
                version: "1.0".to_string(),
                created_at: now,
                updated_at: now,
            },
            settings: AppSettings::default(),
            pmc: LoadConfig::default(),
            calibration: CalibrationConfig::default(),
            learning: LearningConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl Default for AppSettings {
    fn default() -> Self {
        AppSettings {
            data_dir: AppConfig::default_dir().join("data"),
            database_file: "loadcal.db".to_string(),
            auto_apply: true,
        }
    }
}

/// Configuration management implementation
impl AppConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML configuration")?;

        config
            .validate()
            .with_context(|| format!("Invalid configuration in {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.metadata.updated_at = Utc::now();

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml_content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize configuration to TOML")?;

        fs::write(&path, toml_content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    fn default_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".loadcal")
    }

    /// Get default configuration file path
    pub fn default_config_path() -> PathBuf {
        Self::default_dir().join("config.toml")
    }

    /// Load configuration with fallback to defaults
    pub fn load_or_default() -> Self {
        let config_path = Self::default_config_path();

        if !config_path.exists() {
            return Self::default();
        }

        match Self::load_from_file(&config_path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!(
                    "Ignoring config file {}: {:#}. Using defaults.",
                    config_path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save configuration to default location
    pub fn save_default(&mut self) -> Result<()> {
        let config_path = Self::default_config_path();
        self.save_to_file(config_path)
    }

    pub fn database_path(&self) -> PathBuf {
        self.settings.data_dir.join(&self.settings.database_file)
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.pmc.fitness_time_constant == 0 {
            return Err(ConfigError::invalid("pmc.fitness_time_constant", "must be at least 1 day"));
        }
        if self.pmc.fatigue_time_constant == 0 {
            return Err(ConfigError::invalid("pmc.fatigue_time_constant", "must be at least 1 day"));
        }
        if self.pmc.fatigue_time_constant >= self.pmc.fitness_time_constant {
            return Err(ConfigError::invalid(
                "pmc.fatigue_time_constant",
                "must be shorter than the fitness time constant",
            ));
        }

        if self.calibration.delta_threshold < Decimal::ZERO {
            return Err(ConfigError::invalid("calibration.delta_threshold", "cannot be negative"));
        }
        for (field, value) in [
            ("calibration.trust_confidence", self.calibration.trust_confidence),
            (
                "calibration.min_observation_confidence",
                self.calibration.min_observation_confidence,
            ),
            ("learning.min_agreement", self.learning.min_agreement),
            (
                "learning.derived_confidence_discount",
                self.learning.derived_confidence_discount,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::invalid(field, format!("{} is outside [0, 1]", value)));
            }
        }

        if !(self.learning.half_life_days > 0.0) {
            return Err(ConfigError::invalid("learning.half_life_days", "must be positive"));
        }
        if !(self.learning.prior_mass >= 0.0) {
            return Err(ConfigError::invalid("learning.prior_mass", "cannot be negative"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.metadata.version, deserialized.metadata.version);
        assert_eq!(config.calibration.delta_threshold, deserialized.calibration.delta_threshold);
        assert_eq!(config.pmc, deserialized.pmc);
    }

    #[test]
    fn test_defaults_are_valid() {
        assert_eq!(AppConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.pmc.fitness_time_constant = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.pmc.fatigue_time_constant = 50;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.calibration.trust_confidence = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "calibration.trust_confidence"
        ));

        let mut config = AppConfig::default();
        config.calibration.delta_threshold = dec!(-1);
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.learning.half_life_days = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_file_io() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut original_config = AppConfig::default();
        original_config.pmc.fitness_time_constant = 28;
        original_config.settings.auto_apply = false;

        original_config.save_to_file(&config_path).unwrap();
        let loaded_config = AppConfig::load_from_file(&config_path).unwrap();

        assert_eq!(loaded_config.pmc.fitness_time_constant, 28);
        assert!(!loaded_config.settings.auto_apply);
        assert_eq!(loaded_config.learning, original_config.learning);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        let mut config = AppConfig::default();
        config.pmc.fatigue_time_constant = 0;
        config.save_to_file(&config_path).unwrap();

        assert!(AppConfig::load_from_file(&config_path).is_err());
    }
}
