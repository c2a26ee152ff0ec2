//! # Channel Demultiplexer
//!
//! Splits an interleaved [`AudioBlock`] into one byte buffer per channel.
//! This is a pure reshape: sample values and their temporal order are kept
//! exactly, so `channel[c][j] == interleaved[j * channels + c]`.

use super::reader::AudioBlock;
use byteorder::{ByteOrder, LittleEndian};

/// Raw little-endian sample bytes for one channel of one block.
///
/// Length is `frame_count * sample_width`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelBuffer {
    bytes: Vec<u8>,
}

impl ChannelBuffer {
    /// Build a buffer from samples in temporal order.
    pub fn from_samples(samples: &[i16]) -> Self {
        let mut bytes = vec![0u8; samples.len() * super::SAMPLE_WIDTH];
        LittleEndian::write_i16_into(samples, &mut bytes);
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Interpret little-endian bytes as 16-bit samples.
///
/// A trailing odd byte is ignored.
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    let whole = bytes.len() / super::SAMPLE_WIDTH * super::SAMPLE_WIDTH;
    let mut samples = vec![0i16; whole / super::SAMPLE_WIDTH];
    LittleEndian::read_i16_into(&bytes[..whole], &mut samples);
    samples
}

/// Split `block` into `block.channels` channel buffers, in channel order.
pub fn deinterleave(block: &AudioBlock) -> Vec<ChannelBuffer> {
    let channels = usize::from(block.channels);
    let frames = &block.samples[..block.frame_count * channels];

    (0..channels)
        .map(|c| {
            let channel: Vec<i16> = frames.chunks_exact(channels).map(|frame| frame[c]).collect();
            ChannelBuffer::from_samples(&channel)
        })
        .collect()
}
