//! # Channel Recorder
//!
//! The receiving end of the stream: takes published packets and appends each
//! channel's samples to its own mono WAV file. Useful for checking a stream
//! end to end and for capturing multi-channel test material.
//!
//! ## Output Files:
//! One file per channel, named from a pattern where `{}` is replaced by the
//! channel index (`channel_{}.wav` gives `channel_0.wav`, `channel_1.wav`, ...).
//! Files are created from the first packet's format; later packets with a
//! different channel count, sample rate or sample width are skipped.

use crate::audio::demux::bytes_to_samples;
use crate::audio::SAMPLE_WIDTH;
use crate::error::{StreamError, StreamResult};
use crate::packet::envelope::PacketEnvelope;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use tracing::{debug, info, warn};

struct ChannelFile {
    path: PathBuf,
    writer: WavWriter<BufWriter<File>>,
}

/// Writes received packets to per-channel WAV files.
pub struct ChannelRecorder {
    pattern: String,
    files: Vec<ChannelFile>,
    sample_rate: u32,
    packets_written: u64,
    packets_skipped: u64,
}

/// Totals reported when a recording is finalized.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSummary {
    pub files: Vec<PathBuf>,
    pub packets_written: u64,
    pub packets_skipped: u64,
}

impl ChannelRecorder {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            files: Vec::new(),
            sample_rate: 0,
            packets_written: 0,
            packets_skipped: 0,
        }
    }

    /// Output path for channel `index`.
    pub fn channel_path(&self, index: usize) -> PathBuf {
        PathBuf::from(self.pattern.replace("{}", &index.to_string()))
    }

    pub fn packets_written(&self) -> u64 {
        self.packets_written
    }

    /// Append one received payload to the channel files.
    ///
    /// Returns `Ok(false)` when the payload was skipped. Malformed or
    /// mismatched packets are not errors; only file I/O failures are.
    pub fn handle_payload(&mut self, payload: &[u8]) -> StreamResult<bool> {
        let envelope = match PacketEnvelope::from_json(payload) {
            Ok(envelope) => envelope,
            Err(err) => return Ok(self.skip(format!("malformed packet: {}", err))),
        };

        if envelope.sample_width != SAMPLE_WIDTH {
            return Ok(self.skip(format!(
                "packet {} has sample width {}",
                envelope.iuid, envelope.sample_width
            )));
        }

        let channels = match envelope.decode_channels() {
            Ok(channels) => channels,
            Err(err) => {
                return Ok(self.skip(format!("packet {} has bad audio: {}", envelope.iuid, err)))
            }
        };

        if self.files.is_empty() {
            self.open_files(channels.len(), envelope.sample_rate)?;
        } else if channels.len() != self.files.len() || envelope.sample_rate != self.sample_rate {
            return Ok(self.skip(format!(
                "packet {} has {} channels at {} Hz, recording {} channels at {} Hz",
                envelope.iuid,
                channels.len(),
                envelope.sample_rate,
                self.files.len(),
                self.sample_rate
            )));
        }

        for (file, bytes) in self.files.iter_mut().zip(&channels) {
            for sample in bytes_to_samples(bytes) {
                file.writer
                    .write_sample(sample)
                    .map_err(|source| StreamError::Recording {
                        path: file.path.clone(),
                        source,
                    })?;
            }
        }

        self.packets_written += 1;
        debug!(iuid = %envelope.iuid, "Recorded packet");
        Ok(true)
    }

    /// Flush and close every channel file.
    pub fn finalize(self) -> StreamResult<RecordingSummary> {
        let mut files = Vec::with_capacity(self.files.len());
        for file in self.files {
            file.writer
                .finalize()
                .map_err(|source| StreamError::Recording {
                    path: file.path.clone(),
                    source,
                })?;
            files.push(file.path);
        }

        Ok(RecordingSummary {
            files,
            packets_written: self.packets_written,
            packets_skipped: self.packets_skipped,
        })
    }

    fn open_files(&mut self, channels: usize, sample_rate: u32) -> StreamResult<()> {
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };

        for index in 0..channels {
            let path = self.channel_path(index);
            let writer = WavWriter::create(&path, spec).map_err(|source| StreamError::Recording {
                path: path.clone(),
                source,
            })?;
            self.files.push(ChannelFile { path, writer });
        }

        self.sample_rate = sample_rate;
        info!("Recording {} channels at {} Hz", channels, sample_rate);
        Ok(())
    }

    fn skip(&mut self, reason: String) -> bool {
        warn!("Skipping packet: {}", reason);
        self.packets_skipped += 1;
        false
    }
}
