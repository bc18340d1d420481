//! Conversion between raw sample bytes and normalized `f32` samples.
//!
//! A `SampleCodec` is resolved once from an `AudioFormat`; unsupported
//! combinations are rejected there, so the per-window `decode`/`encode`
//! calls cannot fail and never allocate.

use crate::audio::format::{AudioFormat, ByteOrder, Encoding};
use crate::error::{DispatchError, Result};
use byteorder::{BigEndian, ByteOrder as Endian, LittleEndian};

const SCALE_8: f32 = 128.0;
const SCALE_16: f32 = 32768.0;
const SCALE_24: f32 = 8_388_608.0;
const SCALE_32: f64 = 2_147_483_648.0;

/// Concrete sample layout a codec converts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    S8,
    U8,
    S16,
    U16,
    S24,
    U24,
    S32,
    U32,
    F32,
    Ulaw,
    Alaw,
}

impl Layout {
    fn resolve(format: &AudioFormat) -> Option<Self> {
        let layout = match (format.encoding, format.bits_per_sample) {
            (Encoding::PcmSigned, 8) => Layout::S8,
            (Encoding::PcmUnsigned, 8) => Layout::U8,
            (Encoding::PcmSigned, 16) => Layout::S16,
            (Encoding::PcmUnsigned, 16) => Layout::U16,
            (Encoding::PcmSigned, 24) => Layout::S24,
            (Encoding::PcmUnsigned, 24) => Layout::U24,
            (Encoding::PcmSigned, 32) => Layout::S32,
            (Encoding::PcmUnsigned, 32) => Layout::U32,
            (Encoding::Float, 32) => Layout::F32,
            (Encoding::Ulaw, 8) => Layout::Ulaw,
            (Encoding::Alaw, 8) => Layout::Alaw,
            _ => return None,
        };
        Some(layout)
    }
}

/// Byte <-> normalized sample converter for one audio format.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleCodec {
    format: AudioFormat,
    layout: Layout,
}

impl SampleCodec {
    /// Resolves the converter for `format`.
    ///
    /// # Errors
    /// `ConfigInvalidValue` for a non-positive sample rate or zero channels,
    /// `UnsupportedFormat` when no conversion exists for the bit depth and
    /// encoding combination.
    pub fn new(format: AudioFormat) -> Result<Self> {
        if !format.sample_rate.is_finite() || format.sample_rate <= 0.0 {
            return Err(DispatchError::ConfigInvalidValue {
                key: "sample_rate".to_string(),
                message: format!("must be positive, got {}", format.sample_rate),
            });
        }
        if format.channels == 0 {
            return Err(DispatchError::ConfigInvalidValue {
                key: "channels".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        let layout = Layout::resolve(&format).ok_or_else(|| DispatchError::UnsupportedFormat {
            format: format.to_string(),
        })?;
        Ok(Self { format, layout })
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    /// Decodes samples from `bytes` into `samples`.
    ///
    /// Converts as many samples as both slices hold and returns that count.
    /// Interleaved channels stay interleaved.
    pub fn decode(&self, bytes: &[u8], samples: &mut [f32]) -> usize {
        match self.format.byte_order {
            ByteOrder::Little => decode_with::<LittleEndian>(self.layout, bytes, samples),
            ByteOrder::Big => decode_with::<BigEndian>(self.layout, bytes, samples),
        }
    }

    /// Encodes `samples` into `bytes`, clamping to the representable range.
    ///
    /// Returns the number of samples written.
    pub fn encode(&self, samples: &[f32], bytes: &mut [u8]) -> usize {
        match self.format.byte_order {
            ByteOrder::Little => encode_with::<LittleEndian>(self.layout, samples, bytes),
            ByteOrder::Big => encode_with::<BigEndian>(self.layout, samples, bytes),
        }
    }

    /// Decodes `frames` frames starting at `byte_offset` into `samples`
    /// starting at `sample_offset`.
    ///
    /// # Panics
    /// If either range falls outside its buffer.
    pub fn decode_frames(
        &self,
        bytes: &[u8],
        byte_offset: usize,
        samples: &mut [f32],
        sample_offset: usize,
        frames: usize,
    ) -> usize {
        let byte_len = frames * self.format.frame_size();
        let sample_len = frames * usize::from(self.format.channels);
        self.decode(
            &bytes[byte_offset..byte_offset + byte_len],
            &mut samples[sample_offset..sample_offset + sample_len],
        )
    }

    /// Inverse of [`decode_frames`](Self::decode_frames).
    ///
    /// # Panics
    /// If either range falls outside its buffer.
    pub fn encode_frames(
        &self,
        samples: &[f32],
        sample_offset: usize,
        bytes: &mut [u8],
        byte_offset: usize,
        frames: usize,
    ) -> usize {
        let byte_len = frames * self.format.frame_size();
        let sample_len = frames * usize::from(self.format.channels);
        self.encode(
            &samples[sample_offset..sample_offset + sample_len],
            &mut bytes[byte_offset..byte_offset + byte_len],
        )
    }
}

fn convert_in<F>(bytes: &[u8], width: usize, samples: &mut [f32], f: F) -> usize
where
    F: Fn(&[u8]) -> f32,
{
    let mut count = 0;
    for (chunk, out) in bytes.chunks_exact(width).zip(samples.iter_mut()) {
        *out = f(chunk);
        count += 1;
    }
    count
}

fn convert_out<F>(samples: &[f32], bytes: &mut [u8], width: usize, f: F) -> usize
where
    F: Fn(f32, &mut [u8]),
{
    let mut count = 0;
    for (&sample, chunk) in samples.iter().zip(bytes.chunks_exact_mut(width)) {
        f(sample, chunk);
        count += 1;
    }
    count
}

fn decode_with<B: Endian>(layout: Layout, bytes: &[u8], samples: &mut [f32]) -> usize {
    match layout {
        Layout::S8 => convert_in(bytes, 1, samples, |b| f32::from(b[0] as i8) / SCALE_8),
        Layout::U8 => convert_in(bytes, 1, samples, |b| {
            (f32::from(b[0]) - SCALE_8) / SCALE_8
        }),
        Layout::S16 => convert_in(bytes, 2, samples, |b| f32::from(B::read_i16(b)) / SCALE_16),
        Layout::U16 => convert_in(bytes, 2, samples, |b| {
            (f32::from(B::read_u16(b)) - SCALE_16) / SCALE_16
        }),
        Layout::S24 => convert_in(bytes, 3, samples, |b| B::read_i24(b) as f32 / SCALE_24),
        Layout::U24 => convert_in(bytes, 3, samples, |b| {
            (B::read_u24(b) as f32 - SCALE_24) / SCALE_24
        }),
        Layout::S32 => convert_in(bytes, 4, samples, |b| {
            (f64::from(B::read_i32(b)) / SCALE_32) as f32
        }),
        Layout::U32 => convert_in(bytes, 4, samples, |b| {
            ((f64::from(B::read_u32(b)) - SCALE_32) / SCALE_32) as f32
        }),
        Layout::F32 => convert_in(bytes, 4, samples, |b| B::read_f32(b)),
        Layout::Ulaw => convert_in(bytes, 1, samples, |b| {
            f32::from(ulaw_to_linear(b[0])) / SCALE_16
        }),
        Layout::Alaw => convert_in(bytes, 1, samples, |b| {
            f32::from(alaw_to_linear(b[0])) / SCALE_16
        }),
    }
}

fn quantize(sample: f32, scale: f64, min: f64, max: f64) -> f64 {
    (f64::from(sample) * scale).round().clamp(min, max)
}

fn encode_with<B: Endian>(layout: Layout, samples: &[f32], bytes: &mut [u8]) -> usize {
    match layout {
        Layout::S8 => convert_out(samples, bytes, 1, |s, b| {
            b[0] = quantize(s, 128.0, -128.0, 127.0) as i8 as u8;
        }),
        Layout::U8 => convert_out(samples, bytes, 1, |s, b| {
            b[0] = (quantize(s, 128.0, -128.0, 127.0) + 128.0) as u8;
        }),
        Layout::S16 => convert_out(samples, bytes, 2, |s, b| {
            B::write_i16(b, quantize(s, 32768.0, -32768.0, 32767.0) as i16);
        }),
        Layout::U16 => convert_out(samples, bytes, 2, |s, b| {
            B::write_u16(b, (quantize(s, 32768.0, -32768.0, 32767.0) + 32768.0) as u16);
        }),
        Layout::S24 => convert_out(samples, bytes, 3, |s, b| {
            B::write_i24(b, quantize(s, 8_388_608.0, -8_388_608.0, 8_388_607.0) as i32);
        }),
        Layout::U24 => convert_out(samples, bytes, 3, |s, b| {
            let v = quantize(s, 8_388_608.0, -8_388_608.0, 8_388_607.0) + 8_388_608.0;
            B::write_u24(b, v as u32);
        }),
        Layout::S32 => convert_out(samples, bytes, 4, |s, b| {
            B::write_i32(b, quantize(s, SCALE_32, -SCALE_32, SCALE_32 - 1.0) as i32);
        }),
        Layout::U32 => convert_out(samples, bytes, 4, |s, b| {
            let v = quantize(s, SCALE_32, -SCALE_32, SCALE_32 - 1.0) + SCALE_32;
            B::write_u32(b, v as u32);
        }),
        Layout::F32 => convert_out(samples, bytes, 4, |s, b| B::write_f32(b, s)),
        Layout::Ulaw => convert_out(samples, bytes, 1, |s, b| {
            b[0] = linear_to_ulaw(quantize(s, 32768.0, -32768.0, 32767.0) as i16);
        }),
        Layout::Alaw => convert_out(samples, bytes, 1, |s, b| {
            b[0] = linear_to_alaw(quantize(s, 32768.0, -32768.0, 32767.0) as i16);
        }),
    }
}

const ULAW_BIAS: i32 = 0x84;
const ULAW_CLIP: i32 = 32635;

fn ulaw_to_linear(byte: u8) -> i16 {
    let u = !byte;
    let exponent = (u >> 4) & 0x07;
    let mantissa = i32::from(u & 0x0F);
    let magnitude = (((mantissa << 3) + ULAW_BIAS) << exponent) - ULAW_BIAS;
    if u & 0x80 != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

fn linear_to_ulaw(sample: i16) -> u8 {
    let mut value = i32::from(sample);
    let sign = if value < 0 {
        value = -value;
        0x80
    } else {
        0x00
    };
    value = value.min(ULAW_CLIP) + ULAW_BIAS;

    let mut exponent = 7u8;
    let mut mask = 0x4000;
    while exponent > 0 && value & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = ((value >> (exponent + 3)) & 0x0F) as u8;
    !(sign | (exponent << 4) | mantissa)
}

fn alaw_to_linear(byte: u8) -> i16 {
    let a = byte ^ 0x55;
    let segment = (a >> 4) & 0x07;
    let mut magnitude = i32::from(a & 0x0F) << 4;
    match segment {
        0 => magnitude += 8,
        1 => magnitude += 0x108,
        _ => magnitude = (magnitude + 0x108) << (segment - 1),
    }
    if a & 0x80 != 0 {
        magnitude as i16
    } else {
        -magnitude as i16
    }
}

const ALAW_SEGMENT_END: [i32; 8] = [0x1F, 0x3F, 0x7F, 0xFF, 0x1FF, 0x3FF, 0x7FF, 0xFFF];

fn linear_to_alaw(sample: i16) -> u8 {
    let mut value = i32::from(sample) >> 3;
    let mask: u8 = if value >= 0 {
        0xD5
    } else {
        value = -value - 1;
        0x55
    };

    let Some(segment) = ALAW_SEGMENT_END.iter().position(|&end| value <= end) else {
        return 0x7F ^ mask;
    };
    let shift = if segment < 2 { 1 } else { segment };
    let byte = ((segment as u8) << 4) | ((value >> shift) & 0x0F) as u8;
    byte ^ mask
}
