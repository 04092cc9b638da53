//! Pipeline driver: poll the radio, route packets, drain full windows
//!
//! Single task, one step at a time:
//!
//! ```text
//! Idle -> frame? -> Location | AudioFragment | Unknown -> Idle
//!             \-> window full? -> build container -> stage -> upload -> reset
//! ```
//!
//! The window is reset after every drain whatever the upload outcome, so a
//! dead endpoint costs one window of audio and never stalls the radio.
//!
//! Offline mode is entered when the endpoint refuses a connection. While
//! offline, each drain first probes the endpoint and goes back online as
//! soon as it answers.

use std::io;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, warn};

use crate::error::{RelayError, Result};
use crate::location::{update_fix, LocationFix};
use crate::packet::{Packet, PacketDecoder};
use crate::radio::RadioLink;
use crate::storage::{stage_container, FsStorage, Storage, STAGED_CONTAINER};
use crate::transport::Transport;
use crate::upload::{UploadResponse, Uploader};
use crate::wav::{AudioContainer, WavFormat};
use crate::window::AudioWindow;

/// Mutable pipeline state, owned by the driver
#[derive(Debug, Clone)]
pub struct PipelineState {
    pub window: AudioWindow,
    pub fix: Option<LocationFix>,
}

impl PipelineState {
    pub fn new(window_capacity: usize) -> Self {
        Self {
            window: AudioWindow::new(window_capacity),
            fix: None,
        }
    }
}

/// Counters reported after each drain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub frames: u32,
    pub locations: u32,
    pub malformed_locations: u32,
    pub audio_fragments: u32,
    pub audio_bytes_dropped: u32,
    pub unknown_packets: u32,
    pub drains: u32,
    pub uploads_ok: u32,
    pub uploads_failed: u32,
    pub container_failures: u32,
    pub last_rssi: i16,
    pub last_snr: i16,
}

/// Where one poll routed its frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    NoFrame,
    Location { accepted: bool },
    Audio { accepted: usize, dropped: usize },
    Unknown { tag: u8 },
}

/// Result of draining one window
#[derive(Debug)]
pub enum DrainOutcome {
    Uploaded(UploadResponse),
    /// Offline mode: staged (if storage is configured) but not sent
    Offline,
    Failed(RelayError),
}

/// The receive → reassemble → upload loop
pub struct Relay<L, T, S = FsStorage> {
    link: L,
    decoder: PacketDecoder,
    state: PipelineState,
    format: WavFormat,
    uploader: Option<Uploader<T>>,
    online: bool,
    storage: Option<S>,
    poll_interval: Duration,
    stats: RelayStats,
}

impl<L, T, S> Relay<L, T, S>
where
    L: RadioLink,
    T: Transport,
    S: Storage,
{
    pub fn new(link: L, frame_capacity: usize, window_capacity: usize, format: WavFormat) -> Self {
        Self {
            link,
            decoder: PacketDecoder::new(frame_capacity),
            state: PipelineState::new(window_capacity),
            format,
            uploader: None,
            online: false,
            storage: None,
            poll_interval: Duration::from_millis(100),
            stats: RelayStats::default(),
        }
    }

    /// Upload drained windows; without an uploader the relay runs offline
    pub fn with_uploader(mut self, uploader: Uploader<T>) -> Self {
        self.uploader = Some(uploader);
        self.online = true;
        self
    }

    /// Start in offline mode; the endpoint is probed again on every drain
    pub fn starting_offline(mut self) -> Self {
        self.online = false;
        self
    }

    /// Stage each container in `storage` before it is uploaded
    pub fn with_storage(mut self, storage: S) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn stats(&self) -> &RelayStats {
        &self.stats
    }

    pub fn is_offline(&self) -> bool {
        !self.online || self.uploader.is_none()
    }

    /// Leave offline mode if the endpoint accepts a connection again
    async fn recheck_endpoint(&mut self) {
        if self.online {
            return;
        }
        let Some(uploader) = &self.uploader else {
            return;
        };
        match uploader.probe().await {
            Ok(()) => {
                info!("Detection service reachable again, leaving offline mode");
                self.online = true;
            }
            Err(e) => debug!(error = %e, "Detection service still unreachable"),
        }
    }

    /// Read at most one frame and route it
    pub async fn poll_once(&mut self) -> Result<Dispatch> {
        let packet = match self.decoder.next_packet(&mut self.link).await? {
            Some(packet) => packet,
            None => return Ok(Dispatch::NoFrame),
        };

        self.stats.frames += 1;
        self.stats.last_rssi = self.link.packet_rssi();
        self.stats.last_snr = self.link.packet_snr();
        debug!(
            packet_type = ?packet.packet_type(),
            rssi = self.stats.last_rssi,
            snr = self.stats.last_snr,
            "Received packet"
        );

        let dispatch = match packet {
            Packet::Location(payload) => {
                let accepted = update_fix(&mut self.state.fix, payload).is_ok();
                if accepted {
                    self.stats.locations += 1;
                } else {
                    self.stats.malformed_locations += 1;
                }
                Dispatch::Location { accepted }
            }
            Packet::AudioFragment(payload) => {
                let accepted = self.state.window.append(payload);
                let dropped = payload.len() - accepted;
                self.stats.audio_fragments += 1;
                if dropped > 0 {
                    self.stats.audio_bytes_dropped += dropped as u32;
                    debug!(accepted, dropped, "Audio fragment overflowed window");
                }
                debug!(
                    fill = self.state.window.len(),
                    capacity = self.state.window.capacity(),
                    "Receiving audio data"
                );
                Dispatch::Audio { accepted, dropped }
            }
            Packet::Unknown { tag, len } => {
                self.stats.unknown_packets += 1;
                let e = RelayError::UnknownPacketType { tag };
                warn!(error = %e, len, "Frame discarded");
                Dispatch::Unknown { tag }
            }
        };

        Ok(dispatch)
    }

    /// Convert the window into a container, deliver it, and reset the window
    pub async fn drain(&mut self) -> DrainOutcome {
        info!(
            bytes = self.state.window.len(),
            "Audio buffer is full. Saving file and sending to API"
        );
        self.stats.drains += 1;
        self.recheck_endpoint().await;

        let container = AudioContainer::from_window(&self.state.window, self.format);
        let outcome = deliver(
            &container,
            self.storage.as_ref(),
            self.uploader.as_ref().filter(|_| self.online),
            self.state.fix.as_ref(),
        )
        .await;
        self.state.window.reset();

        if let DrainOutcome::Failed(RelayError::UploadConnectFailed { .. }) = &outcome {
            warn!("Detection service unreachable, entering offline mode");
            self.online = false;
        }

        match &outcome {
            DrainOutcome::Uploaded(_) => self.stats.uploads_ok += 1,
            DrainOutcome::Offline => {}
            DrainOutcome::Failed(RelayError::ContainerWriteFailed { .. }) => {
                self.stats.container_failures += 1;
            }
            DrainOutcome::Failed(_) => self.stats.uploads_failed += 1,
        }
        if let DrainOutcome::Failed(e) = &outcome {
            error!(error = %e, "Drain failed, window discarded");
        }

        let s = &self.stats;
        info!(
            frames = s.frames,
            locations = s.locations,
            malformed_locations = s.malformed_locations,
            audio_fragments = s.audio_fragments,
            unknown_packets = s.unknown_packets,
            drains = s.drains,
            uploads_ok = s.uploads_ok,
            uploads_failed = s.uploads_failed,
            container_failures = s.container_failures,
            rssi = s.last_rssi,
            "Relay statistics"
        );

        outcome
    }

    /// One loop iteration: poll, then drain if the window filled up
    ///
    /// The window check runs even when the poll failed; the poll error is
    /// returned after any drain.
    pub async fn step(&mut self) -> Result<(Dispatch, Option<DrainOutcome>)> {
        let polled = self.poll_once().await;
        let drained = if self.state.window.is_full() {
            Some(self.drain().await)
        } else {
            None
        };
        Ok((polled?, drained))
    }

    /// Run until the radio stream ends
    pub async fn run(&mut self) -> Result<()> {
        info!(
            capacity = self.state.window.capacity(),
            offline = self.is_offline(),
            "Receiver ready"
        );
        loop {
            match self.step().await {
                Ok((Dispatch::NoFrame, _)) => tokio::time::sleep(self.poll_interval).await,
                Ok(_) => {}
                Err(RelayError::Radio { source }) if source.kind() == io::ErrorKind::UnexpectedEof => {
                    info!("Radio stream closed");
                    return Ok(());
                }
                Err(e) if !e.is_recoverable() => {
                    error!(error = %e, "Relay cannot continue");
                    return Err(e);
                }
                Err(e) => {
                    error!(error = %e, "Radio read failed");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }
}

async fn deliver<T, S>(
    container: &AudioContainer<'_>,
    storage: Option<&S>,
    uploader: Option<&Uploader<T>>,
    fix: Option<&LocationFix>,
) -> DrainOutcome
where
    T: Transport,
    S: Storage,
{
    if let Some(storage) = storage {
        if let Err(e) = stage_container(storage, STAGED_CONTAINER, container).await {
            return DrainOutcome::Failed(e);
        }
        info!(path = %storage.path_of(STAGED_CONTAINER).display(), "WAV file saved successfully");
    }

    let Some(uploader) = uploader else {
        warn!("Offline, upload skipped");
        return DrainOutcome::Offline;
    };

    let result = match storage {
        Some(storage) => match storage.open(STAGED_CONTAINER).await {
            Ok((mut reader, len)) => uploader.send(fix, &mut reader, len).await,
            Err(source) => Err(RelayError::ContainerWriteFailed {
                path: storage.path_of(STAGED_CONTAINER),
                source,
            }),
        },
        None => {
            let header = container.header.to_bytes();
            let mut reader = (&header[..]).chain(container.payload);
            uploader
                .send(fix, &mut reader, container.byte_len() as u64)
                .await
        }
    };

    match result {
        Ok(response) => DrainOutcome::Uploaded(response),
        Err(e) => DrainOutcome::Failed(e),
    }
}
