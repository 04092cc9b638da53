//! Configuration management for the LoRa audio relay
//!
//! Loads configuration from config.toml with environment variable overrides

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::wav::WavFormat;

/// Complete relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub radio: RadioConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    pub upload: UploadConfig,
    #[serde(default)]
    pub receiver: ReceiverConfig,
}

/// LoRa transceiver (serial) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioConfig {
    /// Serial device the transceiver is attached to, or "-" for stdin
    pub device: String,
    #[serde(default = "default_frame_capacity")]
    pub frame_capacity: usize,
}

/// Audio window and container format
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub window_capacity: usize,
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

/// Detection service endpoint and multipart layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Endpoint URL (e.g., "http://192.168.43.48:8000/detect")
    pub endpoint: String,
    #[serde(default = "default_boundary")]
    pub boundary: String,
    #[serde(default = "default_field_name")]
    pub field_name: String,
    #[serde(default = "default_filename")]
    pub filename: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

/// Driver loop and restart policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    pub poll_interval_ms: u64,
    /// Directory used to stage containers before upload
    pub staging_dir: Option<PathBuf>,
    pub init_retry_delay_ms: u64,
    pub max_init_retries: u32,
}

/// Host, port and request path split out of the endpoint URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub path: String,
}

fn default_frame_capacity() -> usize {
    255
}

fn default_boundary() -> String {
    "SaJeBoundary".to_string()
}

fn default_field_name() -> String {
    "file".to_string()
}

fn default_filename() -> String {
    "audio.wav".to_string()
}

fn default_content_type() -> String {
    "audio/x-wav".to_string()
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            window_capacity: 320,
            sample_rate: 8000,
            channels: 1,
            bits_per_sample: 16,
        }
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            staging_dir: None,
            init_retry_delay_ms: 5000,
            max_init_retries: 3,
        }
    }
}

impl AudioConfig {
    pub fn format(&self) -> WavFormat {
        WavFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
            bits_per_sample: self.bits_per_sample,
        }
    }
}

impl ReceiverConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn init_retry_delay(&self) -> Duration {
        Duration::from_millis(self.init_retry_delay_ms)
    }
}

impl UploadConfig {
    pub fn endpoint(&self) -> Result<Endpoint> {
        parse_endpoint(&self.endpoint)
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// Environment variables override config file values:
    /// - RELAY_UPLOAD_ENDPOINT: Override the detection service URL
    /// - RELAY_RADIO_DEVICE: Override the transceiver serial device
    pub fn load(path: &str) -> Result<Self> {
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let mut config = Self::from_toml(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        if let Ok(endpoint) = std::env::var("RELAY_UPLOAD_ENDPOINT") {
            tracing::info!("Using RELAY_UPLOAD_ENDPOINT from environment");
            config.upload.endpoint = endpoint;
        }
        if let Ok(device) = std::env::var("RELAY_RADIO_DEVICE") {
            tracing::info!("Using RELAY_RADIO_DEVICE from environment");
            config.radio.device = device;
        }

        config.validate()?;

        Ok(config)
    }

    fn from_toml(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.radio.device.is_empty() {
            anyhow::bail!("Radio device must not be empty");
        }
        if self.radio.frame_capacity == 0 {
            anyhow::bail!("Radio frame_capacity must be greater than 0");
        }

        // Fixed format: no negotiation with the sender
        let audio = &self.audio;
        if audio.sample_rate != 8000 || audio.channels != 1 || audio.bits_per_sample != 16 {
            anyhow::bail!(
                "Unsupported audio format {} Hz / {} ch / {} bit (only 8000 Hz mono 16-bit)",
                audio.sample_rate,
                audio.channels,
                audio.bits_per_sample
            );
        }
        if audio.window_capacity == 0 {
            anyhow::bail!("Audio window_capacity must be greater than 0");
        }
        if audio.window_capacity % usize::from(audio.format().block_align()) != 0 {
            anyhow::bail!(
                "Audio window_capacity {} is not a whole number of samples",
                audio.window_capacity
            );
        }

        self.upload.endpoint()?;
        validate_boundary(&self.upload.boundary)?;
        if self.upload.field_name.is_empty() || self.upload.filename.is_empty() {
            anyhow::bail!("Upload field_name and filename must not be empty");
        }

        if self.receiver.poll_interval_ms == 0 {
            anyhow::bail!("Receiver poll_interval_ms must be greater than 0");
        }

        Ok(())
    }
}

/// Boundary delimiters are 1-70 characters and must stay on one header line
fn validate_boundary(boundary: &str) -> Result<()> {
    if boundary.is_empty() || boundary.len() > 70 {
        anyhow::bail!("Invalid multipart boundary length: {}", boundary.len());
    }
    if !boundary.bytes().all(|b| b.is_ascii_graphic() || b == b' ') || boundary.ends_with(' ') {
        anyhow::bail!("Invalid multipart boundary: {:?}", boundary);
    }
    Ok(())
}

/// Parse an upload endpoint URL into host, port and path
///
/// Supports:
/// - http://192.168.43.48:8000/detect
/// - http://detector.local/detect (port 80)
/// - http://detector.local:8000 (path "/")
pub fn parse_endpoint(url: &str) -> Result<Endpoint> {
    let rest = url
        .strip_prefix("http://")
        .context("Invalid upload endpoint: must start with http://")?;

    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };

    let (host, port) = if let Some((host, port_str)) = authority.split_once(':') {
        let port = port_str
            .parse::<u16>()
            .context("Invalid port number in upload endpoint")?;
        (host, port)
    } else {
        (authority, 80)
    };

    if host.is_empty() {
        anyhow::bail!("Invalid upload endpoint: missing host in {}", url);
    }

    Ok(Endpoint {
        host: host.to_string(),
        port,
        path: path.to_string(),
    })
}
