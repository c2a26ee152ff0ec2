//! # Publication State
//!
//! Counters for one streaming run. The publisher owns a [`PublicationState`]
//! for the duration of the loop and hands back a [`RunSummary`] when the loop
//! ends, so the caller owns the totals instead of reading global counters.
//!
//! ## Counters:
//! - **packets_sent**: publish attempts the transport completed, acknowledged or not
//! - **packets_unacknowledged**: those whose acknowledgment never arrived
//! - **frames_sent**: frames covered by those packets
//! - **last_frames_read**: frame count of the most recent read (0 once the
//!   source is exhausted)

use crate::error::StreamError;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Why a run ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The source ran out of frames
    Exhausted,
    /// A stop was requested (Ctrl+C / SIGTERM)
    Cancelled,
}

/// Mutable counters for the running pipeline.
///
/// Only the pipeline task touches these, so no locking is needed.
#[derive(Debug)]
pub struct PublicationState {
    packets_sent: u64,
    packets_unacknowledged: u64,
    frames_sent: u64,
    last_frames_read: usize,
    connection_losses: u32,
    start_time: Instant,
}

impl PublicationState {
    pub fn new() -> Self {
        Self {
            packets_sent: 0,
            packets_unacknowledged: 0,
            frames_sent: 0,
            last_frames_read: 0,
            connection_losses: 0,
            start_time: Instant::now(),
        }
    }

    /// Record the frame count returned by a read.
    pub fn record_read(&mut self, frames: usize) {
        self.last_frames_read = frames;
    }

    /// Record one published packet covering `frames` frames.
    pub fn record_publish(&mut self, frames: usize) {
        self.packets_sent += 1;
        self.frames_sent += frames as u64;
    }

    /// Record that the last published packet went unacknowledged.
    pub fn record_unacknowledged(&mut self) {
        self.packets_unacknowledged += 1;
    }

    pub fn record_connection_loss(&mut self) {
        self.connection_losses += 1;
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }

    /// Snapshot the counters into a summary.
    pub fn summary(&self, stop_reason: Option<StopReason>) -> RunSummary {
        RunSummary {
            packets_sent: self.packets_sent,
            packets_unacknowledged: self.packets_unacknowledged,
            frames_sent: self.frames_sent,
            last_frames_read: self.last_frames_read,
            connection_losses: self.connection_losses,
            elapsed: self.start_time.elapsed(),
            stop_reason,
        }
    }

    /// Finish a run that ended normally.
    pub fn finish(self, reason: StopReason) -> RunSummary {
        self.summary(Some(reason))
    }

    /// Finish a run that was aborted by `error`.
    pub fn fail(self, error: impl Into<StreamError>) -> RunFailure {
        RunFailure {
            summary: self.summary(None),
            error: error.into(),
        }
    }
}

/// Totals reported at the end of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub packets_sent: u64,
    pub packets_unacknowledged: u64,
    pub frames_sent: u64,
    pub last_frames_read: usize,
    pub connection_losses: u32,
    pub elapsed: Duration,

    /// `None` when the run was aborted
    pub stop_reason: Option<StopReason>,
}

impl RunSummary {
    /// Average packets per second over the run.
    pub fn packets_per_second(&self) -> f64 {
        let seconds = self.elapsed.as_secs_f64();
        if seconds > 0.0 {
            self.packets_sent as f64 / seconds
        } else {
            0.0
        }
    }
}

/// A run aborted by a fatal error, with the totals reached before it.
#[derive(Debug, Error)]
#[error("stream aborted after {} packets: {error}", .summary.packets_sent)]
pub struct RunFailure {
    pub summary: RunSummary,
    #[source]
    pub error: StreamError,
}
