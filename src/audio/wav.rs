//! WAV file byte source.
//!
//! Parses the RIFF header with `hound`, then hands the raw data chunk to the
//! dispatcher untouched so the configured codec does the sample conversion.

use crate::audio::format::{AudioFormat, ByteOrder, Encoding};
use crate::audio::source::{ByteSource, StreamSource};
use crate::error::{DispatchError, Result};
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Take};
use std::path::Path;

type DataReader = Take<Box<dyn Read + Send>>;

/// Byte source over the data chunk of a WAV stream.
pub struct WavSource {
    inner: StreamSource<DataReader>,
    format: AudioFormat,
}

impl WavSource {
    /// Create from any reader positioned at the start of a WAV stream.
    pub fn from_reader(reader: Box<dyn Read + Send>) -> Result<Self> {
        let wav_reader = hound::WavReader::new(reader)?;
        let format = format_from_spec(&wav_reader.spec_ex())?;
        let frames = u64::from(wav_reader.duration());
        let data_len = frames * format.frame_size() as u64;

        let data = wav_reader.into_inner().take(data_len);
        Ok(Self {
            inner: StreamSource::new(data).with_total_bytes(data_len),
            format,
        })
    }

    /// Open a WAV file from disk.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(Box::new(BufReader::new(file)))
    }

    /// Create from stdin.
    pub fn from_stdin() -> Result<Self> {
        // StdinLock is not Send; buffer the whole stream first.
        let mut buffer = Vec::new();
        std::io::stdin().lock().read_to_end(&mut buffer)?;
        Self::from_reader(Box::new(Cursor::new(buffer)))
    }

    /// Format described by the WAV header.
    pub fn format(&self) -> AudioFormat {
        self.format
    }
}

impl ByteSource for WavSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.inner.read(buf)
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }

    fn total_bytes(&self) -> Option<u64> {
        self.inner.total_bytes()
    }
}

/// Maps a WAV header onto an `AudioFormat`.
///
/// WAV stores 8-bit PCM unsigned and everything else signed, always
/// little-endian. Samples must fill their container exactly; a
/// WAVE_FORMAT_EXTENSIBLE file with e.g. 24-bit samples in 4-byte slots is
/// rejected.
fn format_from_spec(spec_ex: &hound::WavSpecEx) -> Result<AudioFormat> {
    let spec = &spec_ex.spec;
    if u32::from(spec_ex.bytes_per_sample) * 8 != u32::from(spec.bits_per_sample) {
        return Err(DispatchError::UnsupportedFormat {
            format: format!(
                "WAV {}-bit samples in {}-byte containers",
                spec.bits_per_sample, spec_ex.bytes_per_sample
            ),
        });
    }
    let encoding = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 8) => Encoding::PcmUnsigned,
        (hound::SampleFormat::Int, 16 | 24 | 32) => Encoding::PcmSigned,
        (hound::SampleFormat::Float, 32) => Encoding::Float,
        (sample_format, bits) => {
            return Err(DispatchError::UnsupportedFormat {
                format: format!("WAV {:?} with {} bits per sample", sample_format, bits),
            });
        }
    };
    Ok(AudioFormat::new(
        spec.sample_rate as f32,
        spec.bits_per_sample,
        spec.channels,
        encoding,
        ByteOrder::Little,
    ))
}
