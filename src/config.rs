//! # Configuration Management
//!
//! This module handles loading the streamer's configuration from multiple sources:
//! - TOML configuration files (config.toml, or the file given with `--config`)
//! - Environment variables (with STREAMER_ prefix, `__` between sections)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Command-line overrides (applied by `main`)
//! 2. Environment variables (STREAMER_MQTT__HOST, STREAMER_STREAM__SOURCE_PATH, etc.)
//! 3. Configuration file
//! 4. Default values (defined in the Default impl)
//!
//! The per-run [`StreamFormat`] is derived once from the configuration and
//! the opened audio source, and is never re-derived per packet.

use crate::audio::reader::frames_per_block;
use crate::audio::source::AudioSource;
use crate::audio::SAMPLE_WIDTH;
use crate::error::{StreamError, StreamResult};
use crate::transport::DeliveryQuality;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Broker settings, stream shaping and the recorder are tuned independently,
/// and each maps onto one `[section]` of config.toml.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    pub stream: StreamConfig,
    pub recorder: RecorderConfig,
}

/// Broker connection settings.
///
/// ## Fields:
/// - `host`, `port`: Broker address (default `localhost:1883`)
/// - `client_id`: MQTT client identifier used by the streamer
/// - `topic`: Topic every packet is published on
/// - `qos`: Delivery-quality level, 0 (at most once) to 2 (exactly once)
/// - `keep_alive_secs`: MQTT keep-alive interval
/// - `clean_session`: Discard broker-side session state on connect
/// - `ack_timeout_ms`: How long to wait for a CONNACK, SUBACK or delivery acknowledgment
/// - `channel_capacity`: Request queue depth between client and event loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub topic: String,
    pub qos: u8,
    pub keep_alive_secs: u64,
    pub clean_session: bool,
    pub ack_timeout_ms: u64,
    pub channel_capacity: usize,
}

/// Settings for turning the audio source into packets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// WAV file to stream
    pub source_path: PathBuf,

    /// Value of the `creator` field in every envelope
    pub creator: String,

    /// Audio duration covered by one packet, in milliseconds
    pub block_duration_ms: u64,

    /// Reject sources whose channel count differs from this value
    #[serde(default)]
    pub expected_channels: Option<u16>,
}

/// Settings for the `record` subcommand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// MQTT client identifier used while recording
    pub client_id: String,

    /// Output file name pattern; `{}` is replaced by the channel index
    pub file_pattern: String,

    /// Seconds between connection attempts while the broker is unreachable
    pub retry_interval_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "mpBeamforming".to_string(),
            topic: "/audio".to_string(),
            qos: 0,
            keep_alive_secs: 20,
            clean_session: true,
            ack_timeout_ms: 5000,
            channel_capacity: 10,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            source_path: PathBuf::from("multichannel_audio.wav"),
            creator: "mpBeamforming".to_string(),
            block_duration_ms: 30,
            expected_channels: None,
        }
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            client_id: "mpBeamformingRecorder".to_string(),
            file_pattern: "channel_{}.wav".to_string(),
            retry_interval_secs: 5,
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from `path`, or from config.toml if it exists
    /// 3. Override with environment variables prefixed with STREAMER_
    ///
    /// ## Environment Variable Examples:
    /// - `STREAMER_MQTT__HOST=broker.local`: Override broker host
    /// - `STREAMER_MQTT__QOS=1`: Publish at least once
    /// - `STREAMER_STREAM__BLOCK_DURATION_MS=20`: Shorter packets
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            // An explicitly requested file must exist
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name("config").required(false),
        };

        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("STREAMER")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Runs once at startup, before the source is opened or the broker is
    /// contacted.
    pub fn validate(&self) -> StreamResult<()> {
        if self.mqtt.host.trim().is_empty() {
            return Err(StreamError::Config("Broker host cannot be empty".to_string()));
        }

        if self.mqtt.port == 0 {
            return Err(StreamError::Config("Broker port cannot be 0".to_string()));
        }

        if self.mqtt.client_id.is_empty() || self.recorder.client_id.is_empty() {
            return Err(StreamError::Config("Client id cannot be empty".to_string()));
        }

        if self.mqtt.topic.is_empty() {
            return Err(StreamError::Config("Topic cannot be empty".to_string()));
        }

        self.delivery_quality()?;

        if self.mqtt.keep_alive_secs == 0 {
            return Err(StreamError::Config(
                "Keep-alive interval must be at least 1 second".to_string(),
            ));
        }

        if self.mqtt.ack_timeout_ms == 0 {
            return Err(StreamError::Config(
                "Acknowledgment timeout must be greater than 0".to_string(),
            ));
        }

        if self.mqtt.channel_capacity == 0 {
            return Err(StreamError::Config(
                "Channel capacity must be greater than 0".to_string(),
            ));
        }

        if !(1..=1000).contains(&self.stream.block_duration_ms) {
            return Err(StreamError::Config(format!(
                "Block duration must be between 1 and 1000 ms, got {}",
                self.stream.block_duration_ms
            )));
        }

        if self.stream.expected_channels == Some(0) {
            return Err(StreamError::Config(
                "Expected channel count must be greater than 0".to_string(),
            ));
        }

        if self.recorder.retry_interval_secs == 0 {
            return Err(StreamError::Config(
                "Recorder retry interval must be at least 1 second".to_string(),
            ));
        }

        if !self.recorder.file_pattern.contains("{}") {
            return Err(StreamError::Config(
                "Recorder file pattern must contain {} for the channel index".to_string(),
            ));
        }

        Ok(())
    }

    /// The configured delivery-quality level.
    pub fn delivery_quality(&self) -> StreamResult<DeliveryQuality> {
        DeliveryQuality::try_from(self.mqtt.qos).map_err(|e| StreamError::Config(e.to_string()))
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Immutable description of the stream, fixed for the whole run.
///
/// Built once from the configuration and the opened source. Every envelope
/// copies its format fields from here.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamFormat {
    pub creator: String,
    pub channels: u16,
    pub sample_rate: u32,
    pub sample_width: usize,
    pub block_duration: Duration,
    pub frames_per_block: usize,
}

impl StreamFormat {
    /// Derive the stream format from the opened source.
    ///
    /// ## Fails when:
    /// - the source reports zero channels or a zero sample rate
    /// - `expected_channels` is set and the source disagrees
    /// - the block duration rounds down to zero frames
    pub fn from_source<S: AudioSource>(config: &StreamConfig, source: &S) -> StreamResult<Self> {
        let channels = source.channels();
        let sample_rate = source.sample_rate();

        if channels == 0 || sample_rate == 0 {
            return Err(StreamError::UnsupportedFormat(format!(
                "source reports {} channels at {} Hz",
                channels, sample_rate
            )));
        }

        if let Some(expected) = config.expected_channels {
            if expected != channels {
                return Err(StreamError::UnsupportedFormat(format!(
                    "expected {} channels, source has {}",
                    expected, channels
                )));
            }
        }

        let block_duration = Duration::from_millis(config.block_duration_ms);
        let frames = frames_per_block(sample_rate, block_duration);
        if frames == 0 {
            return Err(StreamError::UnsupportedFormat(format!(
                "{} ms at {} Hz is less than one frame",
                config.block_duration_ms, sample_rate
            )));
        }

        Ok(Self {
            creator: config.creator.clone(),
            channels,
            sample_rate,
            sample_width: SAMPLE_WIDTH,
            block_duration,
            frames_per_block: frames,
        })
    }

    /// Nominal block duration in whole milliseconds, as carried on the wire.
    pub fn buffer_duration_ms(&self) -> u64 {
        self.block_duration.as_millis() as u64
    }
}
