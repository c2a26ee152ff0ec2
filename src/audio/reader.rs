//! # Frame Reader
//!
//! Reads fixed-duration blocks of interleaved frames from an [`AudioSource`].
//! A block is the unit of everything downstream: one block becomes one
//! packet.
//!
//! ## Block Sizing:
//! `frames_per_block = round(sample_rate * block_duration_seconds)`,
//! e.g. 30 ms at 16 kHz is 480 frames.
//!
//! ## End of Stream:
//! The final block may be short. It is returned as-is, never padded or
//! dropped. `next_block` returns `None` only once the source reports zero
//! frames.

use super::source::AudioSource;
use super::SAMPLE_WIDTH;
use crate::error::StreamResult;
use std::time::Duration;

/// Frames covered by one block of `duration` at `sample_rate`.
pub fn frames_per_block(sample_rate: u32, duration: Duration) -> usize {
    (f64::from(sample_rate) * duration.as_secs_f64()).round() as usize
}

/// One block of interleaved samples, as read from the source.
///
/// ## Invariant:
/// `samples.len() == frame_count * channels`
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    /// Interleaved samples, one per channel per frame, in channel order
    pub samples: Vec<i16>,

    pub channels: u16,
    pub sample_rate: u32,

    /// Bytes per sample
    pub sample_width: usize,

    /// Samples per channel in this block
    pub frame_count: usize,
}

/// Pulls one block at a time from a source.
///
/// Each block gets a freshly allocated sample buffer that is handed to the
/// caller with the block, so nothing is carried between reads.
pub struct FrameReader<S> {
    source: S,
    frames_per_block: usize,
}

impl<S: AudioSource> FrameReader<S> {
    pub fn new(source: S, frames_per_block: usize) -> Self {
        Self {
            source,
            frames_per_block,
        }
    }

    /// Read the next block, or `None` when the source is exhausted.
    pub fn next_block(&mut self) -> StreamResult<Option<AudioBlock>> {
        let channels = self.source.channels();
        let mut samples = Vec::with_capacity(self.frames_per_block * usize::from(channels));
        let frame_count = self.source.read_frames(&mut samples, self.frames_per_block)?;

        if frame_count == 0 {
            return Ok(None);
        }

        Ok(Some(AudioBlock {
            samples,
            channels,
            sample_rate: self.source.sample_rate(),
            sample_width: SAMPLE_WIDTH,
            frame_count,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::source::MemorySource;

    #[test]
    fn test_frames_per_block() {
        assert_eq!(frames_per_block(16000, Duration::from_millis(30)), 480);
        assert_eq!(frames_per_block(44100, Duration::from_millis(30)), 1323);
        assert_eq!(frames_per_block(22050, Duration::from_millis(10)), 221); // 220.5 rounds up
        assert_eq!(frames_per_block(48000, Duration::from_millis(20)), 960);
    }

    #[test]
    fn test_short_final_block() {
        // 1600 frames in 480-frame blocks: 480, 480, 480, 160
        let source = MemorySource::ramp(1600, 4, 16000);
        let mut reader = FrameReader::new(source, 480);

        let mut counts = Vec::new();
        while let Some(block) = reader.next_block().unwrap() {
            assert_eq!(block.samples.len(), block.frame_count * 4);
            assert_eq!(block.channels, 4);
            assert_eq!(block.sample_rate, 16000);
            assert_eq!(block.sample_width, 2);
            counts.push(block.frame_count);
        }

        assert_eq!(counts, vec![480, 480, 480, 160]);
        assert!(reader.next_block().unwrap().is_none());
    }

    #[test]
    fn test_blocks_preserve_source_order() {
        let source = MemorySource::ramp(5, 2, 8000);
        let mut reader = FrameReader::new(source, 2);

        let first = reader.next_block().unwrap().unwrap();
        assert_eq!(first.samples, vec![0, 1, 10, 11]);
        let second = reader.next_block().unwrap().unwrap();
        assert_eq!(second.samples, vec![20, 21, 30, 31]);
        let last = reader.next_block().unwrap().unwrap();
        assert_eq!(last.samples, vec![40, 41]);
        assert_eq!(last.frame_count, 1);
        assert!(reader.next_block().unwrap().is_none());
    }

    #[test]
    fn test_empty_source() {
        let mut reader = FrameReader::new(MemorySource::new(Vec::new(), 4, 16000), 480);
        assert!(reader.next_block().unwrap().is_none());
    }
}
