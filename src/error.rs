//! # Error Handling
//!
//! Error types for the streaming pipeline. Every failure that can stop a run
//! is a `StreamError` variant; `main` wraps these in `anyhow` for reporting.
//!
//! ## Error Categories:
//! - **SourceOpen**: The audio source could not be opened (fatal, before any packet is built)
//! - **SourceRead**: The source failed part-way through the stream
//! - **UnsupportedFormat**: The source does not carry 16-bit integer PCM, or its
//!   channel count does not match the configured expectation
//! - **Transport**: Connect/publish failures raised by the transport (fatal to the run)
//! - **Recording**: The recorder could not write a channel WAV file
//! - **Serialize**: A packet envelope could not be rendered to JSON
//! - **Config**: Configuration values failed validation
//!
//! A base64 length mismatch is deliberately absent: it is logged as a
//! diagnostic and processing continues.

use crate::transport::TransportError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the audio streaming pipeline.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The audio source could not be opened at all
    #[error("failed to open audio source {}: {source}", .path.display())]
    SourceOpen {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    /// Reading the next block from the source failed
    #[error("failed to read audio source: {0}")]
    SourceRead(#[from] hound::Error),

    /// The source format cannot be streamed
    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// Connect, publish or subscribe failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A recorded channel file could not be created or written
    #[error("failed to write recording {}: {source}", .path.display())]
    Recording {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    /// The packet envelope could not be serialized
    #[error("failed to serialize packet envelope: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Configuration values are invalid
    #[error("configuration error: {0}")]
    Config(String),
}

/// Shorthand for results carrying a [`StreamError`].
pub type StreamResult<T> = Result<T, StreamError>;
