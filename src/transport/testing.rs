//! In-process MQTT broker for transport tests.
//!
//! Serves a single client and speaks just enough MQTT 3.1.1 to drive
//! [`MqttTransport`](super::mqtt::MqttTransport): CONNACK, SUBACK, PUBACK,
//! the QoS 2 handshake and PINGRESP.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Whether the broker acknowledges QoS 1 and 2 publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckPolicy {
    Acknowledge,
    Silent,
}

pub struct FakeBroker {
    pub port: u16,
    publishes: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl FakeBroker {
    /// Listen on an ephemeral localhost port.
    pub async fn start(policy: AckPolicy) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::serve(listener, policy)
    }

    /// Serve the first client that connects to `listener`.
    pub fn serve(listener: TcpListener, policy: AckPolicy) -> Self {
        let port = listener.local_addr().unwrap().port();
        let publishes = Arc::new(AtomicUsize::new(0));
        let counter = publishes.clone();
        let handle = tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                session(stream, policy, counter).await;
            }
        });

        Self {
            port,
            publishes,
            handle,
        }
    }

    /// PUBLISH packets received so far.
    pub fn publishes(&self) -> usize {
        self.publishes.load(Ordering::SeqCst)
    }
}

impl Drop for FakeBroker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn session(mut stream: TcpStream, policy: AckPolicy, publishes: Arc<AtomicUsize>) {
    let mut pending = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        while let Some((header, body, used)) = split_packet(&pending) {
            pending.drain(..used);
            // DISCONNECT
            if header >> 4 == 14 {
                return;
            }
            let reply = respond(header, &body, policy, &publishes);
            if !reply.is_empty() && stream.write_all(&reply).await.is_err() {
                return;
            }
        }

        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => pending.extend_from_slice(&chunk[..n]),
        }
    }
}

/// Split one complete packet off the front of `buf`.
fn split_packet(buf: &[u8]) -> Option<(u8, Vec<u8>, usize)> {
    let header = *buf.first()?;
    let mut length = 0usize;
    let mut shift = 0;
    let mut index = 1;
    loop {
        let byte = *buf.get(index)?;
        length |= usize::from(byte & 0x7f) << shift;
        index += 1;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }

    let end = index + length;
    if buf.len() < end {
        return None;
    }
    Some((header, buf[index..end].to_vec(), end))
}

fn respond(header: u8, body: &[u8], policy: AckPolicy, publishes: &AtomicUsize) -> Vec<u8> {
    match header >> 4 {
        // CONNECT
        1 => vec![0x20, 0x02, 0x00, 0x00],
        // PUBLISH
        3 => {
            publishes.fetch_add(1, Ordering::SeqCst);
            let qos = (header >> 1) & 0x03;
            if qos == 0 || policy == AckPolicy::Silent {
                return Vec::new();
            }
            let topic_len = usize::from(u16::from_be_bytes([body[0], body[1]]));
            let pkid = &body[2 + topic_len..4 + topic_len];
            let kind = if qos == 1 { 0x40 } else { 0x50 };
            vec![kind, 0x02, pkid[0], pkid[1]]
        }
        // PUBREL, answered with PUBCOMP
        6 => vec![0x70, 0x02, body[0], body[1]],
        // SUBSCRIBE, granted at QoS 0
        8 => vec![0x90, 0x03, body[0], body[1], 0x00],
        // PINGREQ
        12 => vec![0xd0, 0x00],
        _ => Vec::new(),
    }
}
