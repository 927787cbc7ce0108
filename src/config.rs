// src/config.rs
//
// Session configuration: which serial endpoint to open, how chunks are sized
// and tagged, where logs go. Loaded from a TOML document; every field has a
// default so a partial file (or none at all) is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::chunk::{ChunkTag, MAX_CHUNK_SIZE};
use crate::io::BaudRate;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to serialise config: {0}")]
    Serialise(#[from] toml::ser::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SerialSettings {
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: BaudRate,
    #[serde(default)]
    pub blocking: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChunkSettings {
    /// Body capacity in bytes, excluding headers
    #[serde(default = "default_chunk_capacity")]
    pub capacity: usize,
    #[serde(default = "default_chunk_tag")]
    pub tag: String,
    /// Group records by kind into sorted chunks
    #[serde(default)]
    pub sorted: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LogSettings {
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
    /// Rotate to a new chunk log file past this size (bytes)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Mirror `tlog!` output into `dir`
    #[serde(default)]
    pub file_logging: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct TextSettings {
    /// TOML or JSON field layout document for the text codec
    #[serde(default)]
    pub layout_file: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct SessionConfig {
    #[serde(default)]
    pub serial: SerialSettings,
    #[serde(default)]
    pub chunk: ChunkSettings,
    #[serde(default)]
    pub log: LogSettings,
    #[serde(default)]
    pub text: TextSettings,
}

fn default_port() -> String {
    if cfg!(windows) {
        "COM1".to_string()
    } else {
        "/dev/ttyACM0".to_string()
    }
}
fn default_baud_rate() -> BaudRate {
    BaudRate::B921600
}
fn default_chunk_capacity() -> usize {
    MAX_CHUNK_SIZE
}
fn default_chunk_tag() -> String {
    "DATA".to_string()
}
fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("senselink")
        .join("logs")
}
fn default_max_file_size() -> u64 {
    5 * 1024 * 1024
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            blocking: false,
        }
    }
}

impl Default for ChunkSettings {
    fn default() -> Self {
        Self {
            capacity: default_chunk_capacity(),
            tag: default_chunk_tag(),
            sorted: false,
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            max_file_size: default_max_file_size(),
            file_logging: false,
        }
    }
}

impl ChunkSettings {
    /// The configured tag in its on-disk form.
    pub fn chunk_tag(&self) -> Result<ChunkTag, ConfigError> {
        ChunkTag::new(&self.tag).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

impl SessionConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        tlog!("[config] Loaded {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Check values serde cannot: tag shape, sizes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunk.chunk_tag()?;
        if self.chunk.capacity == 0 {
            return Err(ConfigError::Invalid("chunk.capacity must be non-zero".into()));
        }
        if self.chunk.capacity > MAX_CHUNK_SIZE {
            return Err(ConfigError::Invalid(format!(
                "chunk.capacity {} exceeds the {} byte limit",
                self.chunk.capacity, MAX_CHUNK_SIZE
            )));
        }
        if self.log.max_file_size == 0 {
            return Err(ConfigError::Invalid("log.max_file_size must be non-zero".into()));
        }
        if self.serial.port.is_empty() {
            return Err(ConfigError::Invalid("serial.port must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = SessionConfig::from_toml_str("").unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.serial.baud_rate, BaudRate::B921600);
        assert_eq!(config.chunk.capacity, MAX_CHUNK_SIZE);
        assert_eq!(config.chunk.tag, "DATA");
        assert!(!config.serial.blocking);
    }

    #[test]
    fn test_partial_sections() {
        let config = SessionConfig::from_toml_str(
            r#"
            [serial]
            port = "/dev/ttyUSB1"
            baud_rate = 115200
            blocking = true

            [chunk]
            sorted = true
            tag = "IMU"
            "#,
        )
        .unwrap();

        assert_eq!(config.serial.port, "/dev/ttyUSB1");
        assert_eq!(config.serial.baud_rate, BaudRate::B115200);
        assert!(config.serial.blocking);
        assert!(config.chunk.sorted);
        assert_eq!(config.chunk.capacity, MAX_CHUNK_SIZE);
        assert_eq!(config.chunk.chunk_tag().unwrap().as_str(), "IMU");
    }

    #[test]
    fn test_unsupported_baud_rejected() {
        let err = SessionConfig::from_toml_str("[serial]\nbaud_rate = 12345\n").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn test_long_tag_rejected() {
        let err = SessionConfig::from_toml_str("[chunk]\ntag = \"TOOLONG\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_chunk_capacity_bounds() {
        let zero = SessionConfig::from_toml_str("[chunk]\ncapacity = 0\n");
        assert!(matches!(zero, Err(ConfigError::Invalid(_))));

        let text = format!("[chunk]\ncapacity = {}\n", MAX_CHUNK_SIZE + 1);
        assert!(matches!(
            SessionConfig::from_toml_str(&text),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.toml");

        let mut config = SessionConfig::default();
        config.serial.port = "/dev/ttyS3".to_string();
        config.log.max_file_size = 4096;
        config.text.layout_file = Some(PathBuf::from("layouts.toml"));
        config.save(&path).unwrap();

        assert_eq!(SessionConfig::load(&path).unwrap(), config);
    }
}
