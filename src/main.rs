//! LoRa audio relay service
//!
//! This service:
//! - Reads frames from a RYLR998 LoRa transceiver on a serial line
//! - Keeps the latest GPS fix from location packets
//! - Reassembles audio fragments into a fixed window and wraps it as WAV
//! - Uploads each WAV with the GPS fix to the detection service
//!
//! Architecture: radio → decoder → {fix, window} → WAV → staging → multipart POST

use anyhow::{Context, Result};
use lora_audio_relay::config::Config;
use lora_audio_relay::driver::Relay;
use lora_audio_relay::radio::Rylr998Link;
use lora_audio_relay::restart::RestartPolicy;
use lora_audio_relay::storage::FsStorage;
use lora_audio_relay::transport::TcpTransport;
use lora_audio_relay::upload::{FormFile, Uploader};
use tracing::{info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize tracing subscriber for structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("LoRa audio relay starting");

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path))?;
    info!("Configuration loaded successfully");

    let policy = RestartPolicy::from(&config.receiver);

    let link = policy
        .run("radio", || Rylr998Link::open(&config.radio.device, config.radio.frame_capacity))
        .await
        .context("Radio unavailable")?;
    info!(device = %config.radio.device, "LoRa link open");

    let storage = match &config.receiver.staging_dir {
        Some(dir) => Some(
            policy
                .run("storage", || FsStorage::init(dir.clone()))
                .await
                .context("Staging storage unavailable")?,
        ),
        None => None,
    };

    let endpoint = config.upload.endpoint()?;
    let uploader = Uploader::new(TcpTransport, endpoint, FormFile::from(&config.upload));
    let online = match policy.run("network", || uploader.probe()).await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Detection service unreachable, starting offline");
            false
        }
    };
    if online {
        info!(
            host = %uploader.endpoint().host,
            port = uploader.endpoint().port,
            path = %uploader.endpoint().path,
            "Detection service reachable"
        );
    }

    let mut relay: Relay<_, TcpTransport, FsStorage> = Relay::new(
        link,
        config.radio.frame_capacity,
        config.audio.window_capacity,
        config.audio.format(),
    )
    .with_poll_interval(config.receiver.poll_interval())
    .with_uploader(uploader);
    if !online {
        relay = relay.starting_offline();
    }
    if let Some(storage) = storage {
        relay = relay.with_storage(storage);
    }

    info!("Service running. Press Ctrl+C to stop.");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
        result = relay.run() => {
            result.context("Relay stopped")?;
        }
    }

    info!("LoRa audio relay stopped");
    Ok(())
}
