//! LoRa audio relay library
//!
//! Components of the field receiver: radio framing, packet decoding, GPS fix
//! parsing, audio window reassembly, WAV container construction, and the
//! multipart upload to the detection service.

pub mod config;
pub mod driver;
pub mod error;
pub mod location;
pub mod packet;
pub mod radio;
pub mod restart;
pub mod storage;
pub mod transport;
pub mod upload;
pub mod wav;
pub mod window;

pub use error::{RelayError, Result};
