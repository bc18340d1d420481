//! Audio format descriptor.
//!
//! `AudioFormat` is a plain value describing how raw bytes map to samples.
//! Every derived size (frame size, bytes per sample) is computed from the
//! stored fields so it can never drift out of sync.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How individual samples are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    /// Two's complement integer PCM.
    PcmSigned,
    /// Offset-binary integer PCM (silence at the midpoint).
    PcmUnsigned,
    /// IEEE 754 floating point.
    Float,
    /// G.711 µ-law companded, 8 bits.
    Ulaw,
    /// G.711 A-law companded, 8 bits.
    Alaw,
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Encoding::PcmSigned => "PCM signed",
            Encoding::PcmUnsigned => "PCM unsigned",
            Encoding::Float => "float",
            Encoding::Ulaw => "µ-law",
            Encoding::Alaw => "A-law",
        };
        f.write_str(name)
    }
}

/// Byte order of multi-byte samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    Little,
    Big,
}

/// Description of a raw audio byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Frames per second.
    pub sample_rate: f32,
    /// Bits per single-channel sample.
    pub bits_per_sample: u16,
    /// Interleaved channel count.
    pub channels: u16,
    pub encoding: Encoding,
    pub byte_order: ByteOrder,
}

impl AudioFormat {
    /// Creates a format descriptor.
    pub fn new(
        sample_rate: f32,
        bits_per_sample: u16,
        channels: u16,
        encoding: Encoding,
        byte_order: ByteOrder,
    ) -> Self {
        Self {
            sample_rate,
            bits_per_sample,
            channels,
            encoding,
            byte_order,
        }
    }

    /// Signed little-endian PCM, the layout most capture hardware delivers.
    pub fn pcm_signed_le(sample_rate: f32, bits_per_sample: u16, channels: u16) -> Self {
        Self::new(
            sample_rate,
            bits_per_sample,
            channels,
            Encoding::PcmSigned,
            ByteOrder::Little,
        )
    }

    /// 16-bit signed little-endian mono.
    pub fn mono_16bit(sample_rate: f32) -> Self {
        Self::pcm_signed_le(sample_rate, 16, 1)
    }

    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits_per_sample).div_ceil(8)
    }

    /// Bytes occupied by one frame: one sample for every channel.
    pub fn frame_size(&self) -> usize {
        self.bytes_per_sample() * usize::from(self.channels)
    }

    /// Frames per second; identical to the sample rate for PCM streams.
    pub fn frame_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn is_signed(&self) -> bool {
        !matches!(self.encoding, Encoding::PcmUnsigned)
    }

    pub fn is_big_endian(&self) -> bool {
        self.byte_order == ByteOrder::Big
    }

    /// Converts a byte count into seconds of audio.
    ///
    /// Trailing bytes that do not form a complete frame are ignored.
    pub fn bytes_to_seconds(&self, bytes: u64) -> f64 {
        let frame_size = self.frame_size() as u64;
        if frame_size == 0 || self.sample_rate <= 0.0 {
            return 0.0;
        }
        (bytes / frame_size) as f64 / f64::from(self.sample_rate)
    }

    /// Converts seconds of audio into a whole number of frames worth of bytes.
    pub fn seconds_to_bytes(&self, seconds: f64) -> u64 {
        if seconds <= 0.0 {
            return 0;
        }
        let frames = (seconds * f64::from(self.sample_rate)) as u64;
        frames * self.frame_size() as u64
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let order = match self.byte_order {
            ByteOrder::Little => "little-endian",
            ByteOrder::Big => "big-endian",
        };
        write!(
            f,
            "{} Hz, {}-bit {}, {} channel{}, {}",
            self.sample_rate,
            self.bits_per_sample,
            self.encoding,
            self.channels,
            if self.channels == 1 { "" } else { "s" },
            order
        )
    }
}
