//! Configuration module
//!
//! Handles loading and saving ORC client configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::network::{DEFAULT_MAX_FRAME_SIZE, DEFAULT_SEQUENCE_MAX};
use crate::protocol::DEFAULT_PORT;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Remote endpoint settings
    #[serde(default)]
    pub endpoint: EndpointSection,

    /// Session behaviour
    #[serde(default)]
    pub session: SessionSection,

    /// Recovery schedule
    #[serde(default)]
    pub recovery: RecoverySection,

    /// Sequence numbering
    #[serde(default)]
    pub sequence: SequenceSection,
}

/// Remote endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSection {
    /// Server host name or address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Connection timeout in ms
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_connect_timeout() -> u64 {
    5000
}

impl Default for EndpointSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSection {
    /// Keep-alive interval in ms
    #[serde(default = "default_vitality_interval")]
    pub vitality_interval_ms: u64,
    /// Attempts per call, the first one included
    #[serde(default = "default_max_call_attempts")]
    pub max_call_attempts: u8,
    /// Largest accepted frame content
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

fn default_vitality_interval() -> u64 {
    250
}

fn default_max_call_attempts() -> u8 {
    2
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            vitality_interval_ms: default_vitality_interval(),
            max_call_attempts: default_max_call_attempts(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

/// Recovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoverySection {
    /// Reconnect attempts before giving up
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// Delay tiers, ordered by `until_step`
    #[serde(default = "default_tiers")]
    pub tiers: Vec<RecoveryTier>,
}

/// Delay applied before every attempt up to and including `until_step`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryTier {
    pub until_step: u32,
    pub delay_ms: u64,
}

fn default_max_steps() -> u32 {
    10
}

fn default_tiers() -> Vec<RecoveryTier> {
    vec![
        RecoveryTier {
            until_step: 3,
            delay_ms: 500,
        },
        RecoveryTier {
            until_step: 5,
            delay_ms: 2000,
        },
        RecoveryTier {
            until_step: 10,
            delay_ms: 5000,
        },
    ]
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            tiers: default_tiers(),
        }
    }
}

/// Sequence number configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceSection {
    /// Largest sequence number before wrapping back to 1
    #[serde(default = "default_sequence_max")]
    pub max_value: u32,
}

fn default_sequence_max() -> u32 {
    DEFAULT_SEQUENCE_MAX
}

impl Default for SequenceSection {
    fn default() -> Self {
        Self {
            max_value: default_sequence_max(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("orc/config.toml")),
            Some(PathBuf::from("./orc.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                return Self::load(path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.session.max_call_attempts == 0 {
            return Err(ConfigError::Invalid("session.max_call_attempts must be at least 1".into()));
        }
        if self.sequence.max_value == 0 || self.sequence.max_value > i32::MAX as u32 {
            return Err(ConfigError::Invalid(format!(
                "sequence.max_value must be within 1..={}",
                i32::MAX
            )));
        }
        if self.recovery.tiers.windows(2).any(|w| w[0].until_step >= w[1].until_step) {
            return Err(ConfigError::Invalid("recovery.tiers must be ordered by until_step".into()));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.endpoint.connect_timeout_ms)
    }

    pub fn vitality_interval(&self) -> Duration {
        Duration::from_millis(self.session.vitality_interval_ms)
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    let config = Config {
        endpoint: EndpointSection {
            host: "microscope.local".to_string(),
            ..Default::default()
        },
        ..Default::default()
    };

    Ok(toml::to_string_pretty(&config)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.endpoint.port, DEFAULT_PORT);
        assert_eq!(config.session.vitality_interval_ms, 250);
        assert_eq!(config.recovery.max_steps, 10);
        assert_eq!(config.sequence.max_value, i32::MAX as u32);
    }

    #[test]
    fn test_save_and_load() {
        let mut config = Config::default();
        config.endpoint.port = 9100;
        let file = NamedTempFile::new().unwrap();

        config.save(file.path()).unwrap();

        let loaded = Config::load(file.path()).unwrap();
        assert_eq!(loaded.endpoint.port, 9100);
        assert_eq!(loaded.recovery.tiers, config.recovery.tiers);
    }

    #[test]
    fn test_sample_config() {
        let sample = generate_sample_config().unwrap();
        let parsed: Config = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.endpoint.host, "microscope.local");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: Config = toml::from_str("[endpoint]\nhost = \"10.0.0.5\"\n").unwrap();
        assert_eq!(parsed.endpoint.host, "10.0.0.5");
        assert_eq!(parsed.endpoint.port, DEFAULT_PORT);
        assert_eq!(parsed.session.max_call_attempts, 2);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = Config::default();
        config.session.max_call_attempts = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.recovery.tiers.reverse();
        assert!(config.validate().is_err());
    }
}
