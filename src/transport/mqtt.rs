//! # MQTT Transport
//!
//! Publishes packets to an MQTT broker with rumqttc. rumqttc splits a
//! connection into an `AsyncClient` (request side) and an `EventLoop` that
//! must be polled for anything to happen on the wire. The event loop is
//! driven by a background task that forwards what the pipeline cares about
//! over channels:
//!
//! - **signals**: connection and delivery acknowledgments, consumed by `publish`
//! - **events**: connection-lost notifications, polled once per block
//! - **messages**: payloads received on subscribed topics (recorder only)
//!
//! The driver stops at the first connection error. There is no automatic
//! reconnect: once the driver has stopped, every further publish fails with
//! [`TransportError::Disconnected`]. A publish whose acknowledgment times out
//! while the connection is still up completes as [`Delivery::Unacknowledged`].

use super::{Delivery, DeliveryQuality, Transport, TransportError, TransportEvent};
use crate::config::MqttConfig;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

impl From<DeliveryQuality> for QoS {
    fn from(quality: DeliveryQuality) -> Self {
        match quality {
            DeliveryQuality::AtMostOnce => QoS::AtMostOnce,
            DeliveryQuality::AtLeastOnce => QoS::AtLeastOnce,
            DeliveryQuality::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}

/// Progress reported by the event-loop driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    /// CONNACK accepted
    Connected,
    /// A PUBLISH packet was written to the socket
    Written,
    /// PUBACK received (QoS 1 complete)
    PubAck,
    /// PUBCOMP received (QoS 2 complete)
    PubComp,
    /// SUBACK received
    SubAck,
}

impl Signal {
    /// The signal that completes a publish at the given quality level.
    fn delivered(quality: DeliveryQuality) -> Self {
        match quality {
            DeliveryQuality::AtMostOnce => Signal::Written,
            DeliveryQuality::AtLeastOnce => Signal::PubAck,
            DeliveryQuality::ExactlyOnce => Signal::PubComp,
        }
    }
}

/// MQTT client connection used by both the streamer and the recorder.
pub struct MqttTransport {
    client: AsyncClient,
    signals: mpsc::UnboundedReceiver<Signal>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    messages: mpsc::UnboundedReceiver<Vec<u8>>,
    driver: JoinHandle<()>,
    ack_timeout: Duration,
}

impl MqttTransport {
    /// Connect to the broker and wait for the CONNACK.
    ///
    /// ## Options applied:
    /// - **keep_alive_secs**: MQTT keep-alive interval
    /// - **clean_session**: start without any stored session state
    /// - **ack_timeout_ms**: upper bound on the CONNACK wait
    pub async fn connect(config: &MqttConfig) -> Result<Self, TransportError> {
        let broker = format!("{}:{}", config.host, config.port);
        info!("Connecting to {} as {}", broker, config.client_id);

        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options
            .set_keep_alive(Duration::from_secs(config.keep_alive_secs))
            .set_clean_session(config.clean_session);

        let (client, eventloop) = AsyncClient::new(options, config.channel_capacity);
        let (signal_tx, signals) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::unbounded_channel();
        let (message_tx, messages) = mpsc::unbounded_channel();
        let driver = tokio::spawn(drive(eventloop, signal_tx, event_tx, message_tx));

        let mut transport = Self {
            client,
            signals,
            events,
            messages,
            driver,
            ack_timeout: Duration::from_millis(config.ack_timeout_ms),
        };

        match transport.wait_for(Signal::Connected).await {
            Ok(()) => {
                info!("Connected to {}", broker);
                Ok(transport)
            }
            Err(err) => {
                // Prefer the driver's cause over the generic wait error
                let reason = match transport.poll_event() {
                    Some(TransportEvent::ConnectionLost(cause)) => cause,
                    None => err.to_string(),
                };
                Err(TransportError::Connect { broker, reason })
            }
        }
    }

    /// Subscribe to `topic` and wait for the SUBACK.
    pub async fn subscribe(
        &mut self,
        topic: &str,
        quality: DeliveryQuality,
    ) -> Result<(), TransportError> {
        self.client
            .subscribe(topic, quality.into())
            .await
            .map_err(|e| TransportError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;
        self.wait_for(Signal::SubAck).await?;
        info!("Subscribed to {} at {}", topic, quality);
        Ok(())
    }

    /// Wait for the next payload on a subscribed topic.
    ///
    /// Returns `None` once the connection is gone.
    pub async fn next_message(&mut self) -> Option<Vec<u8>> {
        self.messages.recv().await
    }

    /// Consume driver signals until `wanted` arrives.
    async fn wait_for(&mut self, wanted: Signal) -> Result<(), TransportError> {
        let limit = self.ack_timeout;
        let signals = &mut self.signals;
        let wait = async {
            while let Some(signal) = signals.recv().await {
                if signal == wanted {
                    return Ok(());
                }
            }
            Err(TransportError::Disconnected)
        };

        tokio::time::timeout(limit, wait)
            .await
            .map_err(|_| TransportError::AckTimeout(limit))?
    }
}

impl Transport for MqttTransport {
    async fn publish(
        &mut self,
        topic: &str,
        quality: DeliveryQuality,
        payload: Vec<u8>,
    ) -> Result<Delivery, TransportError> {
        // Acknowledgments that arrived after an earlier wait gave up
        while self.signals.try_recv().is_ok() {}

        self.client
            .publish(topic, quality.into(), false, payload)
            .await
            .map_err(|e| TransportError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

        match self.wait_for(Signal::delivered(quality)).await {
            Ok(()) => Ok(Delivery::Acknowledged),
            Err(TransportError::AckTimeout(limit)) => {
                debug!(?limit, "publish not acknowledged");
                Ok(Delivery::Unacknowledged)
            }
            Err(err) => Err(err),
        }
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        self.events.try_recv().ok()
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.client
            .disconnect()
            .await
            .map_err(|_| TransportError::Disconnected)?;

        // The driver exits once DISCONNECT is on the wire
        tokio::time::timeout(self.ack_timeout, &mut self.driver)
            .await
            .map_err(|_| TransportError::AckTimeout(self.ack_timeout))?
            .map_err(|_| TransportError::Disconnected)
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// Poll the rumqttc event loop until the connection ends.
async fn drive(
    mut eventloop: EventLoop,
    signals: mpsc::UnboundedSender<Signal>,
    events: mpsc::UnboundedSender<TransportEvent>,
    messages: mpsc::UnboundedSender<Vec<u8>>,
) {
    loop {
        let signal = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => Signal::Connected,
            Ok(Event::Incoming(Packet::PubAck(_))) => Signal::PubAck,
            Ok(Event::Incoming(Packet::PubComp(_))) => Signal::PubComp,
            Ok(Event::Incoming(Packet::SubAck(_))) => Signal::SubAck,
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let _ = messages.send(publish.payload.to_vec());
                continue;
            }
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                debug!(pkid, "publish written");
                Signal::Written
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("disconnect sent, stopping event loop");
                break;
            }
            Ok(_) => continue,
            Err(err) => {
                warn!("Connection lost: {}", err);
                let _ = events.send(TransportEvent::ConnectionLost(err.to_string()));
                break;
            }
        };
        let _ = signals.send(signal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::reader::FrameReader;
    use crate::audio::source::MemorySource;
    use crate::config::{StreamConfig, StreamFormat};
    use crate::packet::envelope::EnvelopeBuilder;
    use crate::publisher::PacedPublisher;
    use crate::transport::testing::{AckPolicy, FakeBroker};
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn test_quality_maps_to_qos() {
        assert_eq!(QoS::from(DeliveryQuality::AtMostOnce), QoS::AtMostOnce);
        assert_eq!(QoS::from(DeliveryQuality::AtLeastOnce), QoS::AtLeastOnce);
        assert_eq!(QoS::from(DeliveryQuality::ExactlyOnce), QoS::ExactlyOnce);
    }

    #[test]
    fn test_delivery_signal_per_quality() {
        assert_eq!(Signal::delivered(DeliveryQuality::AtMostOnce), Signal::Written);
        assert_eq!(Signal::delivered(DeliveryQuality::AtLeastOnce), Signal::PubAck);
        assert_eq!(Signal::delivered(DeliveryQuality::ExactlyOnce), Signal::PubComp);
    }

    /// Nothing listens on port 1, so the connect must fail instead of hanging.
    #[tokio::test]
    async fn test_connect_refused_is_fatal() {
        let config = MqttConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            ack_timeout_ms: 2000,
            ..MqttConfig::default()
        };

        let result = MqttTransport::connect(&config).await;
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }

    fn broker_config(broker: &FakeBroker, ack_timeout_ms: u64) -> MqttConfig {
        MqttConfig {
            host: "127.0.0.1".to_string(),
            port: broker.port,
            ack_timeout_ms,
            ..MqttConfig::default()
        }
    }

    #[tokio::test]
    async fn test_publish_waits_for_puback() {
        let broker = FakeBroker::start(AckPolicy::Acknowledge).await;
        let mut transport = MqttTransport::connect(&broker_config(&broker, 2000)).await.unwrap();

        let delivery = transport
            .publish("/audio", DeliveryQuality::AtLeastOnce, b"{}".to_vec())
            .await
            .unwrap();
        assert_eq!(delivery, Delivery::Acknowledged);
        assert_eq!(broker.publishes(), 1);

        transport.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_completes_exactly_once_handshake() {
        let broker = FakeBroker::start(AckPolicy::Acknowledge).await;
        let mut transport = MqttTransport::connect(&broker_config(&broker, 2000)).await.unwrap();

        for _ in 0..2 {
            let delivery = transport
                .publish("/audio", DeliveryQuality::ExactlyOnce, b"{}".to_vec())
                .await
                .unwrap();
            assert_eq!(delivery, Delivery::Acknowledged);
        }
        assert_eq!(broker.publishes(), 2);
    }

    #[tokio::test]
    async fn test_missing_ack_is_not_fatal() {
        let broker = FakeBroker::start(AckPolicy::Silent).await;
        let mut transport = MqttTransport::connect(&broker_config(&broker, 300)).await.unwrap();

        for _ in 0..2 {
            let delivery = transport
                .publish("/audio", DeliveryQuality::AtLeastOnce, b"{}".to_vec())
                .await
                .unwrap();
            assert_eq!(delivery, Delivery::Unacknowledged);
        }
        assert_eq!(broker.publishes(), 2);
        assert!(transport.poll_event().is_none());
    }

    #[tokio::test]
    async fn test_publish_after_broker_gone_fails() {
        let broker = FakeBroker::start(AckPolicy::Acknowledge).await;
        let mut transport = MqttTransport::connect(&broker_config(&broker, 2000)).await.unwrap();

        drop(broker);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let result = transport
            .publish("/audio", DeliveryQuality::AtMostOnce, b"{}".to_vec())
            .await;
        assert!(result.is_err());
        assert!(matches!(
            transport.poll_event(),
            Some(TransportEvent::ConnectionLost(_))
        ));
    }

    /// A broker that never acknowledges slows the stream down but every
    /// block still goes out.
    #[tokio::test]
    async fn test_stream_survives_silent_broker() {
        let broker = FakeBroker::start(AckPolicy::Silent).await;
        let transport = MqttTransport::connect(&broker_config(&broker, 300)).await.unwrap();

        let source = MemorySource::ramp(1600, 4, 16000);
        let format = StreamFormat::from_source(&StreamConfig::default(), &source).unwrap();
        let mut reader = FrameReader::new(source, format.frames_per_block);
        let mut publisher = PacedPublisher::new(
            transport,
            "/audio",
            DeliveryQuality::AtLeastOnce,
            EnvelopeBuilder::new(format),
            Arc::new(AtomicBool::new(false)),
        );

        let summary = publisher.run(&mut reader).await.unwrap();
        assert_eq!(summary.packets_sent, 4);
        assert_eq!(summary.packets_unacknowledged, 4);
        assert_eq!(broker.publishes(), 4);
    }
}
