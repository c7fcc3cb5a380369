//! Configuration file support
//!
//! Loads server configuration from TOML files. Every section and most keys
//! are optional; whatever is left out keeps its default.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::{LibraryConfig, ServerConfig, StreamConfig};
use radio_core::{EncoderConfig, ToolsConfig};

/// Configuration file format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Server settings
    #[serde(default)]
    pub server: ServerSettings,
    /// Music library
    pub library: Option<LibraryConfig>,
    /// Live stream settings
    pub stream: Option<StreamSettings>,
    /// External tool paths
    pub tools: Option<ToolsConfig>,
    /// MP3 encoder settings
    pub encoder: Option<EncoderConfig>,
    /// Logging settings
    pub logging: Option<LoggingSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Host address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Enable CORS
    pub cors_enabled: Option<bool>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        let defaults = ServerConfig::default();
        Self {
            host: defaults.host,
            port: defaults.port,
            cors_enabled: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamSettings {
    pub channels: Option<u16>,
    pub rate: Option<u32>,
    pub bits: Option<u16>,
    pub read_ahead_secs: Option<u32>,
    pub read_behind_secs: Option<u32>,
    pub mp3_lead_secs: Option<u32>,
    pub mp3_capacity: Option<usize>,
    pub failure_backoff_ms: Option<u64>,
}

impl StreamSettings {
    fn into_stream_config(self) -> StreamConfig {
        let d = StreamConfig::default();
        StreamConfig {
            channels: self.channels.unwrap_or(d.channels),
            rate: self.rate.unwrap_or(d.rate),
            bits: self.bits.unwrap_or(d.bits),
            read_ahead_secs: self.read_ahead_secs.unwrap_or(d.read_ahead_secs),
            read_behind_secs: self.read_behind_secs.unwrap_or(d.read_behind_secs),
            mp3_lead_secs: self.mp3_lead_secs.unwrap_or(d.mp3_lead_secs),
            mp3_capacity: self.mp3_capacity.unwrap_or(d.mp3_capacity),
            failure_backoff_ms: self.failure_backoff_ms.unwrap_or(d.failure_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: Option<String>,
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: ConfigFile = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Generate default configuration file
    pub fn default_config() -> Self {
        let defaults = ServerConfig::default();
        let stream = defaults.stream;
        Self {
            server: ServerSettings {
                host: defaults.host,
                port: defaults.port,
                cors_enabled: Some(defaults.cors_enabled),
            },
            library: Some(LibraryConfig {
                dir: PathBuf::from("music"),
            }),
            stream: Some(StreamSettings {
                channels: Some(stream.channels),
                rate: Some(stream.rate),
                bits: Some(stream.bits),
                read_ahead_secs: Some(stream.read_ahead_secs),
                read_behind_secs: Some(stream.read_behind_secs),
                mp3_lead_secs: Some(stream.mp3_lead_secs),
                mp3_capacity: Some(stream.mp3_capacity),
                failure_backoff_ms: Some(stream.failure_backoff_ms),
            }),
            tools: Some(defaults.tools),
            encoder: Some(defaults.encoder),
            logging: Some(LoggingSettings {
                level: defaults.log_level,
                format: Some(defaults.log_format),
            }),
        }
    }

    /// Convert to ServerConfig
    pub fn into_server_config(self) -> ServerConfig {
        ServerConfig {
            host: self.server.host,
            port: self.server.port,
            cors_enabled: self.server.cors_enabled.unwrap_or(true),
            log_level: self
                .logging
                .as_ref()
                .map(|l| l.level.clone())
                .unwrap_or_else(|| "info".to_string()),
            log_format: self
                .logging
                .and_then(|l| l.format)
                .unwrap_or_else(|| "pretty".to_string()),
            library: self.library.unwrap_or_default(),
            stream: self.stream.unwrap_or_default().into_stream_config(),
            tools: self.tools.unwrap_or_default(),
            encoder: self.encoder.unwrap_or_default(),
        }
    }
}

/// Generate default configuration file at the specified path
pub fn generate_default_config<P: AsRef<Path>>(path: P) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigFile::default_config();
    config.to_file(path)?;
    Ok(())
}
