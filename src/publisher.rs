//! # Paced Publisher
//!
//! The streaming loop. Each iteration handles exactly one block, strictly in
//! sequence:
//!
//! 1. Stop if a stop was requested
//! 2. Drain and log transport notifications (connection loss)
//! 3. Read the next block (end of source ends the run)
//! 4. Deinterleave, encode and build the envelope
//! 5. Publish and wait for delivery at the configured quality level
//! 6. Count the packet, acknowledged or not
//! 7. Sleep for the block's nominal duration
//!
//! Block N is fully published and slept on before block N+1 is read, so
//! packets leave in source order with at most one block in flight. Pacing is
//! best effort: publish latency adds to the sleep, so the stream drifts
//! behind real time rather than bursting to catch up.
//!
//! A missing acknowledgment is logged and the stream carries on. A transport
//! error aborts the run immediately. The returned [`RunFailure`] reports how
//! many packets made it out.

use crate::audio::demux::deinterleave;
use crate::audio::reader::FrameReader;
use crate::audio::source::AudioSource;
use crate::packet::envelope::EnvelopeBuilder;
use crate::state::{PublicationState, RunFailure, RunSummary, StopReason};
use crate::transport::{Delivery, DeliveryQuality, Transport, TransportEvent};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Publishes one envelope per block onto a fixed topic.
pub struct PacedPublisher<T> {
    transport: T,
    topic: String,
    quality: DeliveryQuality,
    builder: EnvelopeBuilder,
    stop: Arc<AtomicBool>,
}

impl<T: Transport> PacedPublisher<T> {
    pub fn new(
        transport: T,
        topic: impl Into<String>,
        quality: DeliveryQuality,
        builder: EnvelopeBuilder,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            transport,
            topic: topic.into(),
            quality,
            builder,
            stop,
        }
    }

    /// Stream every block from `reader` until the source is exhausted, a
    /// stop is requested, or the transport fails.
    pub async fn run<S: AudioSource>(
        &mut self,
        reader: &mut FrameReader<S>,
    ) -> Result<RunSummary, RunFailure> {
        let mut state = PublicationState::new();
        let pacing = self.builder.format().block_duration;

        loop {
            if self.stop.load(Ordering::SeqCst) {
                info!("Stop requested, ending stream");
                return Ok(state.finish(StopReason::Cancelled));
            }

            self.drain_events(&mut state);

            let block = match reader.next_block() {
                Ok(Some(block)) => block,
                Ok(None) => {
                    state.record_read(0);
                    info!("Audio source exhausted");
                    return Ok(state.finish(StopReason::Exhausted));
                }
                Err(err) => return Err(state.fail(err)),
            };
            let frames = block.frame_count;
            state.record_read(frames);
            debug_assert_eq!(block.channels, self.builder.format().channels);
            debug_assert_eq!(block.sample_rate, self.builder.format().sample_rate);
            debug_assert_eq!(block.sample_width, self.builder.format().sample_width);

            // Channel buffers are dropped at the end of this scope
            let envelope = {
                let buffers = deinterleave(&block);
                self.builder.build_from_buffers(&buffers, Utc::now())
            };

            let payload = match envelope.to_json() {
                Ok(payload) => payload,
                Err(err) => return Err(state.fail(err)),
            };

            let delivery = match self.transport.publish(&self.topic, self.quality, payload).await {
                Ok(delivery) => delivery,
                Err(err) => {
                    // The loss that broke the publish is usually queued behind it
                    self.drain_events(&mut state);
                    return Err(state.fail(err));
                }
            };
            state.record_publish(frames);
            if delivery == Delivery::Unacknowledged {
                warn!(iuid = %envelope.iuid, "Packet not acknowledged at {}", self.quality);
                state.record_unacknowledged();
            }
            debug!(
                frames,
                iuid = %envelope.iuid,
                packet = state.packets_sent(),
                "Just published"
            );

            tokio::time::sleep(pacing).await;
        }
    }

    /// Log and count every pending transport notification.
    fn drain_events(&mut self, state: &mut PublicationState) {
        while let Some(event) = self.transport.poll_event() {
            match event {
                TransportEvent::ConnectionLost(cause) => {
                    warn!(cause = %cause, "Connection lost");
                    state.record_connection_loss();
                }
            }
        }
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    #[cfg(test)]
    pub fn into_transport(self) -> T {
        self.transport
    }
}
