//! Server configuration

use chrono::TimeDelta;
use radio_core::{
    EncoderConfig, Mp3ChunkConfig, PcmChunkConfig, SchedulerConfig, StreamFormat, ToolsConfig,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Where the music lives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Root directory of WAV and FLAC files
    pub dir: PathBuf,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("music"),
        }
    }
}

/// Live stream configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Playback format; everything is converted to this before chunking
    pub channels: u16,
    pub rate: u32,
    pub bits: u16,

    /// How far the scheduler may run ahead of the wall clock, in seconds
    pub read_ahead_secs: u32,

    /// How much played audio stays available for delayed listeners, in seconds
    pub read_behind_secs: u32,

    /// How far ahead of the PCM stream the MP3 encoder is fed, in seconds
    pub mp3_lead_secs: u32,

    /// Number of MP3 frames retained
    pub mp3_capacity: usize,

    /// Pause after a performance fails to play, in milliseconds
    pub failure_backoff_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        let format = StreamFormat::default();
        Self {
            channels: format.channels,
            rate: format.rate,
            bits: format.bits,
            read_ahead_secs: 30,
            read_behind_secs: 15,
            mp3_lead_secs: 25,
            mp3_capacity: 4000,
            failure_backoff_ms: 1000,
        }
    }
}

impl StreamConfig {
    pub fn format(&self) -> StreamFormat {
        StreamFormat::new(self.channels, self.rate, self.bits)
    }

    pub fn mp3_lead(&self) -> TimeDelta {
        TimeDelta::seconds(self.mp3_lead_secs as i64)
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Enable CORS
    pub cors_enabled: bool,

    /// Log level for radio_core (trace, debug, info, warn, error)
    pub log_level: String,

    /// Log output format (pretty, json)
    pub log_format: String,

    pub library: LibraryConfig,
    pub stream: StreamConfig,
    pub tools: ToolsConfig,
    pub encoder: EncoderConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_enabled: true,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            library: LibraryConfig::default(),
            stream: StreamConfig::default(),
            tools: ToolsConfig::default(),
            encoder: EncoderConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Get the socket address string
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn pcm_chunk_config(&self) -> PcmChunkConfig {
        PcmChunkConfig {
            format: self.stream.format(),
            read_ahead: TimeDelta::seconds(self.stream.read_ahead_secs as i64),
            read_behind: TimeDelta::seconds(self.stream.read_behind_secs as i64),
        }
    }

    pub fn mp3_chunk_config(&self) -> Mp3ChunkConfig {
        Mp3ChunkConfig {
            format: self.stream.format(),
            encoder: self.encoder.clone(),
            tools: self.tools.clone(),
            capacity: self.stream.mp3_capacity,
            read_ahead: TimeDelta::seconds(self.stream.read_ahead_secs as i64),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            failure_backoff: Duration::from_millis(self.stream.failure_backoff_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radio_core::DAT;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.stream.format(), DAT);
        assert_eq!(config.stream.mp3_lead(), TimeDelta::seconds(25));
    }

    #[test]
    fn test_socket_addr() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Default::default()
        };
        assert_eq!(config.socket_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_chunk_configs() {
        let mut config = ServerConfig::default();
        config.stream.rate = 44_100;
        config.stream.read_ahead_secs = 10;
        config.encoder.max_bitrate = Some(192);

        let pcm = config.pcm_chunk_config();
        assert_eq!(pcm.format.rate, 44_100);
        assert_eq!(pcm.read_ahead, TimeDelta::seconds(10));
        assert_eq!(pcm.read_behind, TimeDelta::seconds(15));

        let mp3 = config.mp3_chunk_config();
        assert_eq!(mp3.format, pcm.format);
        assert_eq!(mp3.capacity, 4000);
        assert_eq!(mp3.encoder.max_bitrate, Some(192));

        assert_eq!(
            config.scheduler_config().failure_backoff,
            Duration::from_secs(1)
        );
    }
}
