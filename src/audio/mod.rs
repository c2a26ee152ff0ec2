//! # Audio Framing Module
//!
//! Turns a multi-channel audio source into fixed-duration blocks and splits
//! each block into per-channel byte buffers ready for encoding.
//!
//! ## Key Components:
//! - **Audio Source**: Where interleaved samples come from (`source`)
//! - **Frame Reader**: Pulls one block of interleaved frames per call (`reader`)
//! - **Channel Demultiplexer**: Reshapes a block into one buffer per channel (`demux`)
//!
//! ## Audio Format Requirements:
//! - **Bit Depth**: 16-bit signed integer PCM
//! - **Channels**: Any count, interleaved in channel order
//! - **Byte Order**: Channel buffers are little-endian

pub mod demux;   // Interleaved block -> per-channel buffers
pub mod reader;  // Fixed-duration block reads
pub mod source;  // Audio source trait and WAV implementation

/// Bytes per sample for 16-bit PCM.
pub const SAMPLE_WIDTH: usize = std::mem::size_of::<i16>();
