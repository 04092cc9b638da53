//! WAV (RIFF/PCM) container construction
//!
//! Layout of the 44-byte header, every multi-byte field little-endian:
//!
//! | Offset | Size | Field |
//! |---|---|---|
//! | 0 | 4 | `RIFF` |
//! | 4 | 4 | chunk size = 36 + data length |
//! | 8 | 4 | `WAVE` |
//! | 12 | 4 | `fmt ` |
//! | 16 | 4 | fmt subchunk size = 16 |
//! | 20 | 2 | format tag = 1 (PCM) |
//! | 22 | 2 | channels |
//! | 24 | 4 | sample rate |
//! | 28 | 4 | byte rate |
//! | 32 | 2 | block align |
//! | 34 | 2 | bits per sample |
//! | 36 | 4 | `data` |
//! | 40 | 4 | data length |

use std::io::{self, Write};

use crate::window::AudioWindow;

pub const HEADER_LEN: usize = 44;

const PCM_FORMAT_TAG: u16 = 1;
const FMT_CHUNK_LEN: u32 = 16;
/// Bytes of header counted by the RIFF chunk size besides the data itself
const RIFF_OVERHEAD: u32 = 36;

/// Fixed PCM format of the incoming audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl Default for WavFormat {
    /// 8 kHz mono 16-bit, what the field sender transmits
    fn default() -> Self {
        Self {
            sample_rate: 8000,
            channels: 1,
            bits_per_sample: 16,
        }
    }
}

impl WavFormat {
    pub fn block_align(&self) -> u16 {
        self.channels * (self.bits_per_sample / 8)
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * u32::from(self.block_align())
    }
}

/// Header fields derived from the format and payload length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub block_align: u16,
    pub byte_rate: u32,
    pub data_len: u32,
    pub chunk_size: u32,
}

impl WavHeader {
    pub fn new(format: WavFormat, data_len: u32) -> Self {
        Self {
            format_tag: PCM_FORMAT_TAG,
            channels: format.channels,
            sample_rate: format.sample_rate,
            bits_per_sample: format.bits_per_sample,
            block_align: format.block_align(),
            byte_rate: format.byte_rate(),
            data_len,
            chunk_size: RIFF_OVERHEAD + data_len,
        }
    }

    /// Serialize the header, returning the number of bytes written
    pub fn write_to<W: Write>(&self, out: W) -> io::Result<usize> {
        let mut w = LeWriter::new(out);
        w.tag(b"RIFF")?;
        w.u32(self.chunk_size)?;
        w.tag(b"WAVE")?;
        w.tag(b"fmt ")?;
        w.u32(FMT_CHUNK_LEN)?;
        w.u16(self.format_tag)?;
        w.u16(self.channels)?;
        w.u32(self.sample_rate)?;
        w.u32(self.byte_rate)?;
        w.u16(self.block_align)?;
        w.u16(self.bits_per_sample)?;
        w.tag(b"data")?;
        w.u32(self.data_len)?;
        Ok(w.written())
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        // A 44-byte slice always has room for the 44-byte header
        let _ = self.write_to(&mut bytes[..]);
        bytes
    }
}

/// Header plus a borrowed view of the drained window's samples
#[derive(Debug, Clone, Copy)]
pub struct AudioContainer<'a> {
    pub header: WavHeader,
    pub payload: &'a [u8],
}

impl<'a> AudioContainer<'a> {
    pub fn from_window(window: &'a AudioWindow, format: WavFormat) -> Self {
        Self::from_samples(window.as_slice(), format)
    }

    pub fn from_samples(payload: &'a [u8], format: WavFormat) -> Self {
        Self {
            header: WavHeader::new(format, payload.len() as u32),
            payload,
        }
    }

    /// Total container size: header plus samples
    pub fn byte_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    pub fn write_to<W: Write>(&self, mut out: W) -> io::Result<usize> {
        let header_len = self.header.write_to(&mut out)?;
        out.write_all(self.payload)?;
        Ok(header_len + self.payload.len())
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.byte_len());
        // Writing into a Vec cannot fail
        let _ = self.write_to(&mut bytes);
        bytes
    }
}

/// Little-endian field writer that counts what it emits
struct LeWriter<W> {
    out: W,
    written: usize,
}

impl<W: Write> LeWriter<W> {
    fn new(out: W) -> Self {
        Self { out, written: 0 }
    }

    fn put(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.out.write_all(bytes)?;
        self.written += bytes.len();
        Ok(())
    }

    fn tag(&mut self, tag: &[u8; 4]) -> io::Result<()> {
        self.put(tag)
    }

    fn u16(&mut self, value: u16) -> io::Result<()> {
        self.put(&value.to_le_bytes())
    }

    fn u32(&mut self, value: u32) -> io::Result<()> {
        self.put(&value.to_le_bytes())
    }

    fn written(&self) -> usize {
        self.written
    }
}
