//! Packet decoding
//!
//! Wire format of one radio frame:
//!
//! | Byte | Meaning |
//! |---|---|
//! | 0 | type tag: `0x01` location, `0x02` audio fragment |
//! | 1.. | payload: CSV text for location, raw PCM bytes for audio |

use crate::error::{RelayError, Result};
use crate::radio::{read_remaining, RadioLink};

pub const TAG_LOCATION: u8 = 0x01;
pub const TAG_AUDIO: u8 = 0x02;

/// Known packet types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Location,
    AudioFragment,
}

impl TryFrom<u8> for PacketType {
    type Error = RelayError;

    fn try_from(tag: u8) -> Result<Self> {
        match tag {
            TAG_LOCATION => Ok(Self::Location),
            TAG_AUDIO => Ok(Self::AudioFragment),
            tag => Err(RelayError::UnknownPacketType { tag }),
        }
    }
}

/// One decoded frame, borrowing its payload from the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packet<'a> {
    Location(&'a [u8]),
    AudioFragment(&'a [u8]),
    /// Tag not recognised; the payload was consumed and dropped
    Unknown { tag: u8, len: usize },
}

impl<'a> Packet<'a> {
    /// Split a complete frame into tag and payload
    pub fn from_frame(frame: &'a [u8]) -> Option<Self> {
        let (&tag, payload) = frame.split_first()?;
        Some(match PacketType::try_from(tag) {
            Ok(PacketType::Location) => Packet::Location(payload),
            Ok(PacketType::AudioFragment) => Packet::AudioFragment(payload),
            Err(_) => Packet::Unknown {
                tag,
                len: payload.len(),
            },
        })
    }

    pub fn packet_type(&self) -> Option<PacketType> {
        match self {
            Packet::Location(_) => Some(PacketType::Location),
            Packet::AudioFragment(_) => Some(PacketType::AudioFragment),
            Packet::Unknown { .. } => None,
        }
    }
}

/// Pulls frames off the radio into a reusable buffer
#[derive(Debug)]
pub struct PacketDecoder {
    frame: Vec<u8>,
}

impl PacketDecoder {
    pub fn new(frame_capacity: usize) -> Self {
        Self {
            frame: Vec::with_capacity(frame_capacity),
        }
    }

    /// Read the next frame in full and decode it
    ///
    /// `Ok(None)` means no frame was waiting; the caller should just poll again.
    pub async fn next_packet<L>(&mut self, link: &mut L) -> Result<Option<Packet<'_>>>
    where
        L: RadioLink + ?Sized,
    {
        self.frame.clear();
        if link.parse_packet().await? == 0 {
            return Ok(None);
        }
        read_remaining(link, &mut self.frame);
        Ok(Packet::from_frame(&self.frame))
    }
}
