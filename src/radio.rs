//! LoRa radio ingestion
//!
//! The driver sees the radio as a frame-at-a-time byte source: `parse_packet`
//! announces the next frame, then its bytes are pulled one by one until the
//! frame is exhausted.
//!
//! `Rylr998Link` talks to a REYAX RYLR998 module over its UART. Received
//! frames arrive as
//!
//! ```text
//! +RCV=<address>,<length>,<data>,<rssi>,<snr>\r\n
//! ```
//!
//! where `<data>` is `<length>` raw bytes and may itself contain commas or
//! CR/LF, so it is read by length, never by delimiter.

use std::io;

use tokio::io::{AsyncBufRead, AsyncRead, AsyncReadExt, BufReader};
use tracing::{debug, warn};

use crate::error::{RelayError, Result};

const RCV_PREFIX: &[u8] = b"+RCV=";

/// Floor for the per-field limit, so small frame capacities still fit status lines
const MIN_FIELD_LEN: usize = 32;

/// Frame-oriented view of the radio link
#[async_trait::async_trait]
pub trait RadioLink: Send {
    /// Wait for the next frame and return its size in bytes (0 = no frame)
    ///
    /// Any unread bytes of the previous frame are discarded first, so every
    /// call starts at a frame boundary.
    async fn parse_packet(&mut self) -> Result<usize>;

    /// Whether unread bytes remain in the current frame
    fn available(&self) -> bool;

    /// Next byte of the current frame
    fn read_byte(&mut self) -> Option<u8>;

    /// RSSI of the last frame in dBm
    fn packet_rssi(&self) -> i16;

    /// SNR of the last frame in dB
    fn packet_snr(&self) -> i16;
}

/// Append the rest of the current frame to `out`, returning the byte count
pub fn read_remaining<L: RadioLink + ?Sized>(link: &mut L, out: &mut Vec<u8>) -> usize {
    let start = out.len();
    while let Some(b) = link.read_byte() {
        out.push(b);
    }
    out.len() - start
}

/// RYLR998 receive-notification reader
pub struct Rylr998Link<R> {
    reader: R,
    frame: Vec<u8>,
    pos: usize,
    frame_capacity: usize,
    rssi: i16,
    snr: i16,
}

impl Rylr998Link<BufReader<Box<dyn AsyncRead + Unpin + Send>>> {
    /// Open the transceiver's serial device, or stdin when `device` is "-"
    ///
    /// The line settings (baud rate, raw mode) are expected to be configured
    /// outside this process.
    pub async fn open(device: &str, frame_capacity: usize) -> Result<Self> {
        let source: Box<dyn AsyncRead + Unpin + Send> = if device == "-" {
            Box::new(tokio::io::stdin())
        } else {
            let file = tokio::fs::File::open(device)
                .await
                .map_err(|e| RelayError::init_failed("radio", format!("{}: {}", device, e)))?;
            Box::new(file)
        };
        Ok(Self::new(BufReader::new(source), frame_capacity))
    }
}

impl<R: AsyncBufRead + Unpin + Send> Rylr998Link<R> {
    pub fn new(reader: R, frame_capacity: usize) -> Self {
        Self {
            reader,
            frame: Vec::with_capacity(frame_capacity),
            pos: 0,
            frame_capacity,
            rssi: 0,
            snr: 0,
        }
    }

    fn field_limit(&self) -> usize {
        self.frame_capacity.max(MIN_FIELD_LEN)
    }

    /// Read bytes into `out` up to (not including) `,` or `\n`; returns the terminator
    ///
    /// A field longer than `field_limit` is line noise: the rest of the line
    /// is skipped and the field comes back empty, terminated by `\n`.
    async fn read_field(&mut self, out: &mut Vec<u8>) -> io::Result<u8> {
        out.clear();
        let limit = self.field_limit();
        loop {
            let b = self.reader.read_u8().await?;
            if b == b',' || b == b'\n' {
                return Ok(b);
            }
            if out.len() == limit {
                warn!(limit, "Transceiver field too long, skipping line");
                out.clear();
                self.skip_line().await?;
                return Ok(b'\n');
            }
            out.push(b);
        }
    }

    async fn skip_line(&mut self) -> io::Result<()> {
        while self.reader.read_u8().await? != b'\n' {}
        Ok(())
    }

    async fn receive(&mut self) -> io::Result<usize> {
        let mut field = Vec::new();

        if self.read_field(&mut field).await? == b'\n' {
            // "+OK", "+READY", "+ERR=.." and blank lines
            debug!(line = %String::from_utf8_lossy(&field).trim_end(), "Transceiver status");
            return Ok(0);
        }
        if !field.starts_with(RCV_PREFIX) {
            self.skip_line().await?;
            debug!(line = %String::from_utf8_lossy(&field), "Ignoring unexpected transceiver output");
            return Ok(0);
        }
        let address = String::from_utf8_lossy(&field[RCV_PREFIX.len()..]).into_owned();

        if self.read_field(&mut field).await? == b'\n' {
            warn!("Truncated +RCV notification");
            return Ok(0);
        }
        let len: usize = match std::str::from_utf8(&field).ok().and_then(|s| s.parse().ok()) {
            Some(len) => len,
            None => {
                warn!(length = %String::from_utf8_lossy(&field), "Invalid +RCV length field");
                self.skip_line().await?;
                return Ok(0);
            }
        };

        let oversized = len > self.frame_capacity;
        if oversized {
            let mut rest = (&mut self.reader).take(len as u64);
            let skipped = tokio::io::copy(&mut rest, &mut tokio::io::sink()).await?;
            if skipped < len as u64 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
        } else {
            self.frame.resize(len, 0);
            self.reader.read_exact(&mut self.frame).await?;
        }

        // ",<rssi>,<snr>\r\n"
        let mut tail = Vec::new();
        let limit = self.field_limit();
        loop {
            let b = self.reader.read_u8().await?;
            if b == b'\n' {
                break;
            }
            if tail.len() < limit {
                tail.push(b);
            }
        }
        let tail = String::from_utf8_lossy(&tail);
        let parts: Vec<&str> = tail.split(',').collect();
        if parts.len() >= 3 {
            self.rssi = parts[1].trim().parse().unwrap_or(self.rssi);
            self.snr = parts[2].trim().parse().unwrap_or(self.snr);
        } else {
            warn!(tail = %tail, "Missing RSSI/SNR in +RCV notification");
        }

        if oversized {
            warn!(len, capacity = self.frame_capacity, "Dropping oversized frame");
            return Ok(0);
        }

        debug!(address = %address, len, rssi = self.rssi, snr = self.snr, "Frame received");
        Ok(len)
    }
}

#[async_trait::async_trait]
impl<R: AsyncBufRead + Unpin + Send> RadioLink for Rylr998Link<R> {
    async fn parse_packet(&mut self) -> Result<usize> {
        self.frame.clear();
        self.pos = 0;
        self.receive()
            .await
            .map_err(|source| RelayError::Radio { source })
    }

    fn available(&self) -> bool {
        self.pos < self.frame.len()
    }

    fn read_byte(&mut self) -> Option<u8> {
        let b = self.frame.get(self.pos).copied()?;
        self.pos += 1;
        Some(b)
    }

    fn packet_rssi(&self) -> i16 {
        self.rssi
    }

    fn packet_snr(&self) -> i16 {
        self.snr
    }
}
