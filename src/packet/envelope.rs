//! # Packet Envelope
//!
//! The self-describing JSON document published once per audio block.
//!
//! ## Wire Schema:
//! ```json
//! {
//!   "creator": "mpBeamforming",
//!   "audio": "<base64 channel 0>",
//!   "all_channels": ["<base64 channel 0>", "<base64 channel 1>", ...],
//!   "sample_width": 2,
//!   "buffer_duration": 30,
//!   "num_channels": 4,
//!   "sample_rate": 16000,
//!   "rms": null,
//!   "all_rms": [],
//!   "created_at": 1700000000.123456,
//!   "iuid": "<base64 sha1 of created_at>",
//!   "previous_iu": null,
//!   "grounded_in": [],
//!   "vad": null,
//!   "doa": null
//! }
//! ```
//!
//! `rms`, `all_rms`, `previous_iu`, `grounded_in`, `vad` and `doa` are slots
//! reserved for downstream stages. This pipeline always emits them empty.

use super::{codec, identifier};
use crate::audio::demux::ChannelBuffer;
use crate::config::StreamFormat;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One published packet.
///
/// ## Invariants:
/// - `all_channels.len() == num_channels`
/// - `audio == all_channels[0]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketEnvelope {
    pub creator: String,

    /// Encoded audio of the primary (first) channel
    pub audio: String,

    /// Encoded audio of every channel, in channel order
    pub all_channels: Vec<String>,

    /// Bytes per sample
    pub sample_width: usize,

    /// Nominal milliseconds of audio represented
    pub buffer_duration: u64,

    pub num_channels: u16,
    pub sample_rate: u32,

    pub rms: Option<f64>,
    pub all_rms: Vec<f64>,

    /// Fractional seconds since the Unix epoch
    pub created_at: f64,

    /// Identifier derived from `created_at`
    pub iuid: String,

    pub previous_iu: Option<String>,
    pub grounded_in: Vec<String>,
    pub vad: Option<serde_json::Value>,
    pub doa: Option<serde_json::Value>,
}

impl PacketEnvelope {
    /// Render the envelope as the compact JSON published on the wire.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }

    /// Decode every channel back to raw sample bytes.
    pub fn decode_channels(&self) -> Result<Vec<Vec<u8>>, base64::DecodeError> {
        self.all_channels.iter().map(|c| codec::decode(c)).collect()
    }
}

/// Assembles envelopes for one stream.
///
/// Holds the run's [`StreamFormat`] so the format fields of every packet
/// come from the same validated values.
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    format: StreamFormat,
}

impl EnvelopeBuilder {
    pub fn new(format: StreamFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> &StreamFormat {
        &self.format
    }

    /// Encode the channel buffers of one block and build its envelope.
    pub fn build_from_buffers(
        &self,
        buffers: &[ChannelBuffer],
        created_at: DateTime<Utc>,
    ) -> PacketEnvelope {
        let all_channels = buffers.iter().map(|b| codec::encode(b.as_bytes())).collect();
        self.build(all_channels, created_at)
    }

    /// Build an envelope from already encoded channels.
    ///
    /// `num_channels` is the number of channels actually present, which is
    /// the source's channel count.
    pub fn build(&self, all_channels: Vec<String>, created_at: DateTime<Utc>) -> PacketEnvelope {
        let created_at = epoch_seconds(created_at);
        let iuid = identifier::derive_iuid(&identifier::format_timestamp(created_at));

        PacketEnvelope {
            creator: self.format.creator.clone(),
            audio: all_channels.first().cloned().unwrap_or_default(),
            num_channels: all_channels.len() as u16,
            all_channels,
            sample_width: self.format.sample_width,
            buffer_duration: self.format.buffer_duration_ms(),
            sample_rate: self.format.sample_rate,
            rms: None,
            all_rms: Vec::new(),
            created_at,
            iuid,
            previous_iu: None,
            grounded_in: Vec::new(),
            vad: None,
            doa: None,
        }
    }
}

/// Fractional seconds since the epoch, at microsecond resolution.
pub fn epoch_seconds(time: DateTime<Utc>) -> f64 {
    time.timestamp_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::demux::deinterleave;
    use crate::audio::reader::AudioBlock;
    use std::time::Duration;

    fn format(channels: u16) -> StreamFormat {
        StreamFormat {
            creator: "mpBeamforming".to_string(),
            channels,
            sample_rate: 16000,
            sample_width: 2,
            block_duration: Duration::from_millis(30),
            frames_per_block: 480,
        }
    }

    fn fixed_time() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 123_456_000).unwrap()
    }

    #[test]
    fn test_schema_completeness() {
        let builder = EnvelopeBuilder::new(format(4));
        let channels = vec!["AAA=".to_string(), "AQA=".to_string(), "AgA=".to_string(), "AwA=".to_string()];
        let envelope = builder.build(channels, fixed_time());

        let value: serde_json::Value = serde_json::from_slice(&envelope.to_json().unwrap()).unwrap();
        let object = value.as_object().unwrap();
        for key in [
            "creator", "audio", "all_channels", "sample_width", "buffer_duration",
            "num_channels", "sample_rate", "rms", "all_rms", "created_at", "iuid",
            "previous_iu", "grounded_in", "vad", "doa",
        ] {
            assert!(object.contains_key(key), "missing key {}", key);
        }
        assert_eq!(object.len(), 15);

        assert_eq!(value["creator"], "mpBeamforming");
        assert_eq!(value["audio"], value["all_channels"][0]);
        assert_eq!(value["all_channels"].as_array().unwrap().len(), 4);
        assert_eq!(value["num_channels"], 4);
        assert_eq!(value["sample_rate"], 16000);
        assert_eq!(value["sample_width"], 2);
        assert_eq!(value["buffer_duration"], 30);
        assert!(value["rms"].is_null());
        assert_eq!(value["all_rms"], serde_json::json!([]));
        assert!(value["previous_iu"].is_null());
        assert_eq!(value["grounded_in"], serde_json::json!([]));
        assert!(value["vad"].is_null());
        assert!(value["doa"].is_null());
    }

    #[test]
    fn test_identifier_follows_timestamp() {
        let builder = EnvelopeBuilder::new(format(1));
        let envelope = builder.build(vec!["AAA=".to_string()], fixed_time());

        assert_eq!(envelope.created_at, 1_700_000_000.123456);
        assert_eq!(envelope.iuid, identifier::derive_iuid("1700000000.123456"));

        let again = builder.build(vec!["AQA=".to_string()], fixed_time());
        assert_eq!(envelope.iuid, again.iuid);
    }

    #[test]
    fn test_channels_round_trip_through_envelope() {
        let block = AudioBlock {
            samples: vec![1, -1, 2, -2, 3, -3],
            channels: 2,
            sample_rate: 16000,
            sample_width: 2,
            frame_count: 3,
        };
        let builder = EnvelopeBuilder::new(format(2));
        let envelope = builder.build_from_buffers(&deinterleave(&block), fixed_time());

        let parsed = PacketEnvelope::from_json(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(parsed, envelope);

        let decoded = parsed.decode_channels().unwrap();
        assert_eq!(crate::audio::demux::bytes_to_samples(&decoded[0]), vec![1, 2, 3]);
        assert_eq!(crate::audio::demux::bytes_to_samples(&decoded[1]), vec![-1, -2, -3]);
    }

    /// The channel count comes from the audio actually present, not from a
    /// nominal setting.
    #[test]
    fn test_num_channels_reflects_actual_channels() {
        let builder = EnvelopeBuilder::new(format(2));
        let envelope = builder.build(vec!["AAA=".to_string(), "AQA=".to_string()], fixed_time());
        assert_eq!(envelope.num_channels, 2);
        assert_eq!(envelope.all_channels.len(), 2);
    }
}
