//! # Message Transport
//!
//! The publish/subscribe seam the pipeline talks to. The pipeline only needs
//! three things from a transport: publish one payload at a delivery-quality
//! level and wait for it to be delivered, report connection-loss events, and
//! disconnect at the end of a run.
//!
//! ## Implementations:
//! - **MqttTransport** (`transport::mqtt`): MQTT broker client built on rumqttc
//! - Tests use a scripted in-memory transport (see `publisher` tests)

pub mod mqtt;
#[cfg(test)]
pub mod testing;

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Delivery guarantee requested for each publish.
///
/// Maps one-to-one onto MQTT QoS levels 0, 1 and 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryQuality {
    /// Fire-and-forget (QoS 0)
    AtMostOnce,
    /// Acknowledged delivery, duplicates possible (QoS 1)
    AtLeastOnce,
    /// Four-way handshake delivery (QoS 2)
    ExactlyOnce,
}

impl DeliveryQuality {
    pub fn level(self) -> u8 {
        match self {
            DeliveryQuality::AtMostOnce => 0,
            DeliveryQuality::AtLeastOnce => 1,
            DeliveryQuality::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for DeliveryQuality {
    type Error = TransportError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(DeliveryQuality::AtMostOnce),
            1 => Ok(DeliveryQuality::AtLeastOnce),
            2 => Ok(DeliveryQuality::ExactlyOnce),
            other => Err(TransportError::InvalidQuality(other)),
        }
    }
}

impl fmt::Display for DeliveryQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QoS {}", self.level())
    }
}

/// How a completed publish ended.
///
/// An acknowledgment that never arrives is not fatal: the payload was handed
/// to the broker connection and the stream carries on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Delivered at the requested quality level
    Acknowledged,
    /// Sent, but the acknowledgment did not arrive in time
    Unacknowledged,
}

/// Asynchronous notifications from the transport.
///
/// These are informational: the pipeline logs them once per block and does
/// not reconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection to the broker was lost
    ConnectionLost(String),
}

/// Failures raised by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to broker {broker}: {reason}")]
    Connect { broker: String, reason: String },

    #[error("failed to publish to {topic}: {reason}")]
    Publish { topic: String, reason: String },

    #[error("failed to subscribe to {topic}: {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("connection to broker lost")]
    Disconnected,

    #[error("no acknowledgment within {0:?}")]
    AckTimeout(Duration),

    #[error("invalid delivery quality level {0} (expected 0, 1 or 2)")]
    InvalidQuality(u8),
}

/// A publish/subscribe transport the pipeline can publish packets onto.
///
/// Implementations complete `publish` once the payload has been delivered at
/// the requested quality level, or once the wait for its acknowledgment has
/// given up. Either way the caller can rely on packets leaving in the order
/// it publishes them. Errors are reserved for a broken connection.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Publish `payload` on `topic` and wait for delivery at `quality`.
    async fn publish(
        &mut self,
        topic: &str,
        quality: DeliveryQuality,
        payload: Vec<u8>,
    ) -> Result<Delivery, TransportError>;

    /// Take the next pending notification without blocking.
    fn poll_event(&mut self) -> Option<TransportEvent>;

    /// Close the connection.
    async fn disconnect(&mut self) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_levels() {
        for level in 0..=2u8 {
            let quality = DeliveryQuality::try_from(level).unwrap();
            assert_eq!(quality.level(), level);
        }
        assert!(matches!(
            DeliveryQuality::try_from(3),
            Err(TransportError::InvalidQuality(3))
        ));
    }

    #[test]
    fn test_quality_display() {
        assert_eq!(DeliveryQuality::AtLeastOnce.to_string(), "QoS 1");
    }
}
