//! # Audio Sources
//!
//! The Frame Reader pulls interleaved frames from anything implementing
//! [`AudioSource`]. The production source is a WAV file read incrementally
//! with hound, so only one block of samples is ever held in memory.

use crate::error::{StreamError, StreamResult};
use hound::{SampleFormat, WavReader};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// A source of interleaved 16-bit samples.
pub trait AudioSource {
    /// Number of interleaved channels per frame.
    fn channels(&self) -> u16;

    /// Frames per second.
    fn sample_rate(&self) -> u32;

    /// Total number of frames the source holds.
    fn total_frames(&self) -> u64;

    /// Read up to `frames` interleaved frames into `buf`.
    ///
    /// `buf` is cleared first and holds `frames_read * channels` samples on
    /// return. Returns 0 exactly when the source is exhausted.
    fn read_frames(&mut self, buf: &mut Vec<i16>, frames: usize) -> StreamResult<usize>;
}

/// A WAV file streamed block by block.
pub struct WavSource {
    reader: WavReader<BufReader<File>>,
    channels: u16,
    sample_rate: u32,
}

impl WavSource {
    /// Open a WAV file for streaming.
    ///
    /// ## Errors:
    /// - **SourceOpen**: the file is missing or not a readable WAV file
    /// - **UnsupportedFormat**: samples are not 16-bit integers
    pub fn open<P: AsRef<Path>>(path: P) -> StreamResult<Self> {
        let path = path.as_ref();
        let reader = WavReader::open(path).map_err(|source| StreamError::SourceOpen {
            path: path.to_path_buf(),
            source,
        })?;

        let spec = reader.spec();
        if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(StreamError::UnsupportedFormat(format!(
                "{} holds {}-bit {:?} samples, expected 16-bit integer PCM",
                path.display(),
                spec.bits_per_sample,
                spec.sample_format
            )));
        }

        Ok(Self {
            reader,
            channels: spec.channels,
            sample_rate: spec.sample_rate,
        })
    }
}

impl AudioSource for WavSource {
    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_frames(&self) -> u64 {
        // hound reports duration in frames (samples per channel)
        u64::from(self.reader.duration())
    }

    fn read_frames(&mut self, buf: &mut Vec<i16>, frames: usize) -> StreamResult<usize> {
        buf.clear();
        let channels = usize::from(self.channels);
        for sample in self.reader.samples::<i16>().take(frames * channels) {
            buf.push(sample?);
        }

        // A truncated trailing frame cannot be deinterleaved
        let frames_read = buf.len() / channels;
        buf.truncate(frames_read * channels);
        Ok(frames_read)
    }
}

/// An in-memory source, used by tests.
#[cfg(test)]
pub struct MemorySource {
    samples: Vec<i16>,
    channels: u16,
    sample_rate: u32,
    position: usize,
}

#[cfg(test)]
impl MemorySource {
    pub fn new(samples: Vec<i16>, channels: u16, sample_rate: u32) -> Self {
        Self {
            samples,
            channels,
            sample_rate,
            position: 0,
        }
    }

    /// A source whose sample values encode their own position:
    /// frame `j`, channel `c` holds `j * 10 + c`.
    pub fn ramp(frames: usize, channels: u16, sample_rate: u32) -> Self {
        let samples = (0..frames)
            .flat_map(|j| (0..channels).map(move |c| (j * 10 + usize::from(c)) as i16))
            .collect();
        Self::new(samples, channels, sample_rate)
    }
}

#[cfg(test)]
impl AudioSource for MemorySource {
    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_frames(&self) -> u64 {
        (self.samples.len() / usize::from(self.channels)) as u64
    }

    fn read_frames(&mut self, buf: &mut Vec<i16>, frames: usize) -> StreamResult<usize> {
        buf.clear();
        let channels = usize::from(self.channels);
        let end = (self.position + frames * channels).min(self.samples.len());
        buf.extend_from_slice(&self.samples[self.position..end]);
        self.position = end;
        Ok(buf.len() / channels)
    }
}

/// Write a 16-bit WAV fixture for tests.
#[cfg(test)]
pub fn write_test_wav(path: &Path, samples: &[i16], channels: u16, sample_rate: u32) {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for &sample in samples {
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();
}
