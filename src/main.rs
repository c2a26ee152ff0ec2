//! # Audio Packet Streamer - Main Application Entry Point
//!
//! Streams a multi-channel WAV file onto an MQTT topic as a sequence of
//! small JSON packets, one per 30 ms block, paced at roughly real time.
//! Downstream stages (voice activity, direction of arrival, beamforming)
//! subscribe to the topic and fill in the feature slots of each packet.
//!
//! ## Commands:
//! - **stream** (default): read the source and publish packets until it is exhausted
//! - **record**: subscribe to the topic and write each channel to its own WAV file,
//!   retrying the broker connection until it comes up
//!
//! ## Application Architecture:
//! - **audio**: Source access, block reads, channel demultiplexing
//! - **packet**: Base64 codec, identifier derivation, envelope schema
//! - **publisher**: The paced publish loop
//! - **transport**: Publish/subscribe seam and the MQTT client
//! - **recorder**: Packet stream back to per-channel WAV files
//! - **state**: Per-run counters and the run summary
//! - **config**: Application configuration (TOML files + environment variables)
//! - **error**: Error taxonomy

mod audio;      // Audio source, frame reader, demultiplexer (audio/ directory)
mod config;     // Configuration management (config.rs)
mod error;      // Error handling types (error.rs)
mod packet;     // Packet encoding and envelope (packet/ directory)
mod publisher;  // Paced publish loop (publisher.rs)
mod recorder;   // Per-channel WAV recorder (recorder.rs)
mod state;      // Run counters and summary (state.rs)
mod transport;  // Message transport (transport/ directory)

use crate::audio::reader::FrameReader;
use crate::audio::source::{AudioSource, WavSource};
use crate::config::{AppConfig, MqttConfig, StreamFormat};
use crate::error::StreamError;
use crate::packet::envelope::EnvelopeBuilder;
use crate::publisher::PacedPublisher;
use crate::recorder::ChannelRecorder;
use crate::state::StopReason;
use crate::transport::mqtt::MqttTransport;
use crate::transport::{DeliveryQuality, Transport, TransportError};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line interface.
#[derive(Debug, Parser)]
#[command(name = "audio-packet-streamer", version, about)]
struct Cli {
    /// Configuration file (defaults to ./config.toml when present)
    #[arg(short, long, env = "STREAMER_CONFIG")]
    config: Option<PathBuf>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Publish the audio source as paced packets
    Stream {
        /// WAV file to stream
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Topic to publish on
        #[arg(short, long)]
        topic: Option<String>,

        /// Delivery-quality level (0, 1 or 2)
        #[arg(short, long)]
        qos: Option<u8>,
    },

    /// Record a published stream to per-channel WAV files
    Record {
        /// Output file pattern, `{}` is replaced by the channel index
        #[arg(short, long)]
        pattern: Option<String>,

        /// Topic to subscribe to
        #[arg(short, long)]
        topic: Option<String>,

        /// Stop after this many packets
        #[arg(short, long)]
        max_packets: Option<u64>,
    },
}

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files, environment variables and flags
/// 2. **Sets up logging** for debugging and monitoring
/// 3. **Runs the selected command** until it finishes, fails, or is interrupted
///
/// Any fatal error is returned from here, which exits with a nonzero status.
#[tokio::main]
async fn main() -> Result<()> {
    // .ok() means "ignore errors" - it's fine if there's no .env file
    dotenv::dotenv().ok();

    init_tracing()?;

    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    apply_overrides(&mut config, cli.command.as_ref());
    config.validate()?;

    if cli.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    info!("Starting audio-packet-streamer v{}", env!("CARGO_PKG_VERSION"));

    let stop = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(stop.clone());

    match cli.command {
        Some(Command::Record { max_packets, .. }) => run_recorder(&config, max_packets, stop).await,
        Some(Command::Stream { .. }) | None => run_stream(&config, stop).await,
    }
}

/// Apply command-line flags on top of the loaded configuration.
fn apply_overrides(config: &mut AppConfig, command: Option<&Command>) {
    match command {
        Some(Command::Stream { source, topic, qos }) => {
            if let Some(source) = source {
                config.stream.source_path = source.clone();
            }
            if let Some(topic) = topic {
                config.mqtt.topic = topic.clone();
            }
            if let Some(qos) = qos {
                config.mqtt.qos = *qos;
            }
        }
        Some(Command::Record { pattern, topic, .. }) => {
            if let Some(pattern) = pattern {
                config.recorder.file_pattern = pattern.clone();
            }
            if let Some(topic) = topic {
                config.mqtt.topic = topic.clone();
            }
        }
        None => {}
    }
}

/// Stream the configured source onto the broker.
///
/// ## Order of operations:
/// 1. Open the source (fails before anything touches the network)
/// 2. Derive the stream format once
/// 3. Connect to the broker
/// 4. Run the paced publish loop
/// 5. Report the packet total and disconnect
async fn run_stream(config: &AppConfig, stop: Arc<AtomicBool>) -> Result<()> {
    let source = WavSource::open(&config.stream.source_path)?;
    let format = StreamFormat::from_source(&config.stream, &source)?;

    info!(
        "Channel : {} | Frame : {} | Rate : {} Hz",
        format.channels,
        source.total_frames(),
        format.sample_rate
    );
    info!(
        "Block : {} ms = {} frames per channel",
        format.buffer_duration_ms(),
        format.frames_per_block
    );

    let quality = config.delivery_quality()?;
    let transport = MqttTransport::connect(&config.mqtt).await?;

    let mut reader = FrameReader::new(source, format.frames_per_block);
    let mut publisher = PacedPublisher::new(
        transport,
        config.mqtt.topic.clone(),
        quality,
        EnvelopeBuilder::new(format),
        stop,
    );

    info!("Publishing on {} at {}", config.mqtt.topic, quality);
    match publisher.run(&mut reader).await {
        Ok(summary) => {
            info!(
                "Sent {} packets ({} frames) in {:.1}s, {:.1} packets/s",
                summary.packets_sent,
                summary.frames_sent,
                summary.elapsed.as_secs_f64(),
                summary.packets_per_second()
            );
            if summary.stop_reason == Some(StopReason::Cancelled) {
                info!(
                    "Stopped before the end of the source (last read {} frames)",
                    summary.last_frames_read
                );
            }
            if summary.packets_unacknowledged > 0 {
                warn!(
                    "{} packets were not acknowledged at {}",
                    summary.packets_unacknowledged, quality
                );
            }
            if summary.connection_losses > 0 {
                warn!("Connection was lost {} times during the run", summary.connection_losses);
            }
            if let Err(err) = publisher.transport_mut().disconnect().await {
                warn!("Disconnect failed: {}", err);
            }
            Ok(())
        }
        Err(failure) => {
            error!("Error: {}", failure.error);
            info!("Sent {} packets", failure.summary.packets_sent);
            Err(failure.into())
        }
    }
}

/// Record the stream on the configured topic until stopped.
///
/// Unlike the streamer, the recorder waits for the broker: it keeps trying
/// to connect until it succeeds, and reconnects and resubscribes when the
/// connection drops.
async fn run_recorder(config: &AppConfig, max_packets: Option<u64>, stop: Arc<AtomicBool>) -> Result<()> {
    let mqtt = MqttConfig {
        client_id: config.recorder.client_id.clone(),
        ..config.mqtt.clone()
    };
    let quality = config.delivery_quality()?;
    let retry = Duration::from_secs(config.recorder.retry_interval_secs);

    let Some(mut transport) = connect_with_retry(&mqtt, quality, retry, &stop).await else {
        info!("Shutdown signal received before the broker was reachable");
        return Ok(());
    };

    let mut recorder = ChannelRecorder::new(config.recorder.file_pattern.clone());
    let outcome: Result<(), StreamError> = loop {
        if max_packets.is_some_and(|max| recorder.packets_written() >= max) {
            info!("Reached packet limit");
            break Ok(());
        }

        let payload = tokio::select! {
            payload = transport.next_message() => payload,
            _ = wait_for_shutdown(&stop) => {
                info!("Shutdown signal received, stopping recorder...");
                break Ok(());
            }
        };

        match payload {
            Some(payload) => {
                if let Err(err) = recorder.handle_payload(&payload) {
                    break Err(err);
                }
            }
            None => {
                warn!("Connection to broker lost, reconnecting");
                match connect_with_retry(&mqtt, quality, retry, &stop).await {
                    Some(reconnected) => transport = reconnected,
                    None => break Ok(()),
                }
            }
        }
    };

    // Finalize even after a failure so the files written so far stay readable
    let summary = recorder.finalize()?;
    info!(
        "Recorded {} packets into {} files ({} skipped)",
        summary.packets_written,
        summary.files.len(),
        summary.packets_skipped
    );
    if let Err(err) = transport.disconnect().await {
        warn!("Disconnect failed: {}", err);
    }

    outcome?;
    Ok(())
}

/// Connect and subscribe, retrying every `retry` until it works.
///
/// Returns `None` if a stop is requested first.
async fn connect_with_retry(
    mqtt: &MqttConfig,
    quality: DeliveryQuality,
    retry: Duration,
    stop: &AtomicBool,
) -> Option<MqttTransport> {
    let mut attempt = 1u32;
    loop {
        if stop.load(Ordering::SeqCst) {
            return None;
        }

        match subscribe_once(mqtt, quality).await {
            Ok(transport) => return Some(transport),
            Err(err) => warn!(
                "Connection attempt {} failed: {}; retrying in {}s",
                attempt,
                err,
                retry.as_secs_f64()
            ),
        }

        tokio::select! {
            _ = tokio::time::sleep(retry) => {}
            _ = wait_for_shutdown(stop) => return None,
        }
        attempt += 1;
    }
}

async fn subscribe_once(mqtt: &MqttConfig, quality: DeliveryQuality) -> Result<MqttTransport, TransportError> {
    let mut transport = MqttTransport::connect(mqtt).await?;
    transport.subscribe(&mqtt.topic, quality).await?;
    Ok(transport)
}

/// Initialize the tracing (logging) system for the application.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "debug", "audio_packet_streamer=debug")
/// - If not set, defaults to "audio_packet_streamer=info,rumqttc=warn"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "audio_packet_streamer=info,rumqttc=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Set up signal handlers for graceful shutdown.
///
/// SIGINT (Ctrl+C) or SIGTERM sets `stop`. The publisher checks it before
/// reading each block, so the packet in flight always completes.
fn setup_signal_handlers(stop: Arc<AtomicBool>) {
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(err), _) | (_, Err(err)) => {
                error!("Failed to install signal handlers: {}", err);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        stop.store(true, Ordering::SeqCst);
    });
}

/// Wait for the stop flag to be set.
///
/// Polls every 100ms; used where a blocking wait (the recorder's receive)
/// has to be interrupted.
async fn wait_for_shutdown(stop: &AtomicBool) {
    while !stop.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
