//! Sliding sample window.
//!
//! `WindowBuffer` owns the normalized sample window and the raw byte staging
//! buffer. Both are allocated once and reused for every slide:
//!
//! ```text
//!  window N     [ a a a a | b b b b b b ]
//!                           └──overlap──┘ copied to the front
//!  window N+1   [ b b b b | c c c c c c ]   c = step_size fresh frames
//! ```
//!
//! Sizes are expressed in frames. For multi-channel formats the sample
//! window holds `buffer_size * channels` interleaved samples.

use crate::audio::codec::SampleCodec;
use crate::audio::source::ByteSource;
use crate::defaults::MAX_BUFFER_SIZE;
use crate::error::{DispatchError, Result};
use serde::{Deserialize, Serialize};

/// How the first window is filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirstWindow {
    /// Slide against an all-zero window: only the last `step_size` frames
    /// of the first window hold data.
    #[default]
    ZeroPad,
    /// Read `buffer_size` frames before the first dispatch.
    Full,
}

/// What happens when the source ends partway through a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TailPolicy {
    /// The short window is never dispatched.
    #[default]
    Discard,
    /// Missing frames are zero-filled and the window is dispatched as the last one.
    ZeroPad,
}

/// Result of filling the window from the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// The whole requested region was read and decoded.
    Complete { bytes: usize },
    /// The source ended early; missing frames were zero-filled.
    Padded { bytes: usize },
    /// The source ended early and the window was left undecoded.
    Short { bytes: usize },
    /// The source returned no data at all.
    Exhausted,
    /// The dispatcher was stopped before the read began.
    Stopped,
}

impl Fill {
    /// Bytes obtained from the source.
    pub fn bytes(&self) -> usize {
        match self {
            Fill::Complete { bytes } | Fill::Padded { bytes } | Fill::Short { bytes } => *bytes,
            Fill::Exhausted | Fill::Stopped => 0,
        }
    }

    /// Whether the window now holds data a stage may see.
    pub fn is_dispatchable(&self) -> bool {
        matches!(self, Fill::Complete { .. } | Fill::Padded { .. })
    }
}

/// Reads from `source` until `buf` is full or the source ends.
fn read_fully<S: ByteSource + ?Sized>(source: &mut S, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Rejects empty windows and windows above [`MAX_BUFFER_SIZE`] frames.
pub(crate) fn check_buffer_size(buffer_size: usize) -> Result<()> {
    if buffer_size == 0 {
        return Err(DispatchError::ConfigInvalidValue {
            key: "buffer_size".to_string(),
            message: "must be at least 1 frame".to_string(),
        });
    }
    if buffer_size > MAX_BUFFER_SIZE {
        return Err(oversized(buffer_size));
    }
    Ok(())
}

fn oversized(buffer_size: usize) -> DispatchError {
    DispatchError::ConfigInvalidValue {
        key: "buffer_size".to_string(),
        message: format!(
            "{} frames exceeds the limit of {} frames",
            buffer_size, MAX_BUFFER_SIZE
        ),
    }
}

/// Fixed-size overlapping window over a decoded byte stream.
#[derive(Debug, Clone)]
pub struct WindowBuffer {
    codec: SampleCodec,
    samples: Vec<f32>,
    bytes: Vec<u8>,
    buffer_size: usize,
    overlap: usize,
    tail: TailPolicy,
}

impl WindowBuffer {
    /// Allocates the window for `buffer_size` frames with `overlap` frames
    /// carried between consecutive windows.
    ///
    /// # Errors
    /// `ConfigInvalidValue` for an empty or oversized window, `InvalidWindow`
    /// when `overlap >= buffer_size`.
    pub fn new(codec: SampleCodec, buffer_size: usize, overlap: usize) -> Result<Self> {
        check_buffer_size(buffer_size)?;
        if overlap >= buffer_size {
            return Err(DispatchError::InvalidWindow {
                buffer_size,
                overlap,
            });
        }

        let format = *codec.format();
        let sample_len = buffer_size
            .checked_mul(usize::from(format.channels))
            .ok_or_else(|| oversized(buffer_size))?;
        let byte_len = buffer_size
            .checked_mul(format.frame_size())
            .ok_or_else(|| oversized(buffer_size))?;

        let mut window = Self {
            samples: vec![0.0; sample_len],
            bytes: vec![0; byte_len],
            codec,
            buffer_size,
            overlap,
            tail: TailPolicy::default(),
        };
        // Silence is not all-zero bytes for unsigned or companded encodings.
        window.codec.encode(&window.samples, &mut window.bytes);
        Ok(window)
    }

    pub fn with_tail_policy(mut self, tail: TailPolicy) -> Self {
        self.tail = tail;
        self
    }

    /// Window length in frames.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Frames carried over from the previous window.
    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Fresh frames read per slide.
    pub fn step_size(&self) -> usize {
        self.buffer_size - self.overlap
    }

    pub fn channels(&self) -> usize {
        usize::from(self.codec.format().channels)
    }

    pub fn codec(&self) -> &SampleCodec {
        &self.codec
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    /// Raw bytes backing the current window.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Bytes one full window occupies in the source.
    pub fn window_bytes(&self) -> usize {
        self.bytes.len()
    }

    /// Bytes a single slide reads from the source.
    pub fn step_bytes(&self) -> usize {
        self.step_size() * self.codec.format().frame_size()
    }

    /// Fills the entire window from the source.
    ///
    /// Used once, before the first dispatch, by the full-first-window policy.
    pub fn fill_first<S: ByteSource + ?Sized>(
        &mut self,
        source: &mut S,
        stopped: bool,
    ) -> Result<Fill> {
        if stopped {
            return Ok(Fill::Stopped);
        }
        let read = read_fully(source, &mut self.bytes)?;
        Ok(self.commit(0, read))
    }

    /// Slides the window by one step.
    ///
    /// Copies the trailing `overlap` frames (samples and bytes) to the front,
    /// then reads and decodes exactly `step_size` fresh frames behind them.
    pub fn slide<S: ByteSource + ?Sized>(&mut self, source: &mut S, stopped: bool) -> Result<Fill> {
        let channels = self.channels();
        let frame_size = self.codec.format().frame_size();
        let step = self.step_size();

        self.samples.copy_within(step * channels.., 0);
        self.bytes.copy_within(step * frame_size.., 0);

        if stopped {
            return Ok(Fill::Stopped);
        }

        let start = self.overlap * frame_size;
        let read = read_fully(source, &mut self.bytes[start..])?;
        Ok(self.commit(self.overlap, read))
    }

    /// Decodes the region starting at `first_frame` after `read` bytes landed there.
    fn commit(&mut self, first_frame: usize, read: usize) -> Fill {
        let frame_size = self.codec.format().frame_size();
        let channels = self.channels();
        let requested = (self.buffer_size - first_frame) * frame_size;

        if read == 0 {
            return Fill::Exhausted;
        }
        if read == requested {
            self.codec.decode_frames(
                &self.bytes,
                first_frame * frame_size,
                &mut self.samples,
                first_frame * channels,
                self.buffer_size - first_frame,
            );
            return Fill::Complete { bytes: read };
        }
        if self.tail == TailPolicy::Discard {
            return Fill::Short { bytes: read };
        }

        let whole_frames = read / frame_size;
        let padded_from = first_frame + whole_frames;
        self.codec.decode_frames(
            &self.bytes,
            first_frame * frame_size,
            &mut self.samples,
            first_frame * channels,
            whole_frames,
        );
        self.samples[padded_from * channels..].fill(0.0);
        self.codec.encode(
            &self.samples[padded_from * channels..],
            &mut self.bytes[padded_from * frame_size..],
        );
        Fill::Padded { bytes: read }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::{AudioFormat, ByteOrder, Encoding};
    use crate::audio::source::MockByteSource;

    fn mono16() -> SampleCodec {
        SampleCodec::new(AudioFormat::mono_16bit(8000.0)).unwrap()
    }

    fn pcm(values: &[f32]) -> Vec<i16> {
        values.iter().map(|v| (v * 32768.0) as i16).collect()
    }

    #[test]
    fn rejects_overlap_not_smaller_than_window() {
        assert!(matches!(
            WindowBuffer::new(mono16(), 4, 4),
            Err(DispatchError::InvalidWindow {
                buffer_size: 4,
                overlap: 4
            })
        ));
        assert!(matches!(
            WindowBuffer::new(mono16(), 0, 0),
            Err(DispatchError::ConfigInvalidValue { .. })
        ));
    }

    #[test]
    fn derived_sizes() {
        let codec = SampleCodec::new(AudioFormat::pcm_signed_le(8000.0, 16, 2)).unwrap();
        let window = WindowBuffer::new(codec, 8, 3).unwrap();

        assert_eq!(window.step_size(), 5);
        assert_eq!(window.samples().len(), 16);
        assert_eq!(window.window_bytes(), 32);
        assert_eq!(window.step_bytes(), 20);
    }

    #[test]
    fn first_slide_leaves_zero_overlap() {
        let mut window = WindowBuffer::new(mono16(), 4, 2).unwrap();
        let mut source = MockByteSource::from_i16_le(&pcm(&[0.5, -0.5]));

        let fill = window.slide(&mut source, false).unwrap();

        assert_eq!(fill, Fill::Complete { bytes: 4 });
        assert_eq!(window.samples(), &[0.0, 0.0, 0.5, -0.5]);
    }

    #[test]
    fn slide_carries_tail_to_front() {
        let mut window = WindowBuffer::new(mono16(), 5, 2).unwrap();
        let mut source =
            MockByteSource::from_i16_le(&pcm(&[0.125, 0.25, 0.375, 0.5, 0.625, 0.75]));

        window.slide(&mut source, false).unwrap();
        let previous_tail = window.samples()[3..].to_vec();
        window.slide(&mut source, false).unwrap();

        assert_eq!(&window.samples()[..2], previous_tail.as_slice());
        assert_eq!(window.samples(), &[0.25, 0.375, 0.5, 0.625, 0.75]);
    }

    #[test]
    fn slide_mirrors_bytes() {
        let mut window = WindowBuffer::new(mono16(), 3, 1).unwrap();
        let mut source = MockByteSource::from_i16_le(&[1, 2, 3, 4]);

        window.slide(&mut source, false).unwrap();
        window.slide(&mut source, false).unwrap();

        assert_eq!(window.bytes(), &[2, 0, 3, 0, 4, 0]);
    }

    #[test]
    fn slide_retries_partial_reads() {
        let mut window = WindowBuffer::new(mono16(), 4, 0).unwrap();
        let mut source = MockByteSource::from_i16_le(&pcm(&[0.5, 0.25, -0.25, -0.5])).with_max_chunk(3);
        let reads = source.read_counter();

        let fill = window.slide(&mut source, false).unwrap();

        assert_eq!(fill, Fill::Complete { bytes: 8 });
        assert_eq!(reads.load(std::sync::atomic::Ordering::SeqCst), 3);
        assert_eq!(window.samples(), &[0.5, 0.25, -0.25, -0.5]);
    }

    #[test]
    fn short_read_is_discarded_by_default() {
        let mut window = WindowBuffer::new(mono16(), 4, 1).unwrap();
        let mut source = MockByteSource::from_i16_le(&pcm(&[0.5, 0.5]));

        let fill = window.slide(&mut source, false).unwrap();

        assert_eq!(fill, Fill::Short { bytes: 4 });
        assert!(!fill.is_dispatchable());
        assert_eq!(window.samples(), &[0.0; 4]);
    }

    #[test]
    fn short_read_is_zero_padded_when_configured() {
        let mut window = WindowBuffer::new(mono16(), 4, 1)
            .unwrap()
            .with_tail_policy(TailPolicy::ZeroPad);
        let mut source = MockByteSource::from_i16_le(&pcm(&[0.5, 0.5]));

        let fill = window.slide(&mut source, false).unwrap();

        assert_eq!(fill, Fill::Padded { bytes: 4 });
        assert!(fill.is_dispatchable());
        assert_eq!(window.samples(), &[0.0, 0.5, 0.5, 0.0]);
        assert_eq!(&window.bytes()[6..], &[0, 0]);
    }

    #[test]
    fn zero_padding_writes_encoded_silence_for_unsigned_bytes() {
        let codec = SampleCodec::new(AudioFormat::new(
            8000.0,
            8,
            1,
            Encoding::PcmUnsigned,
            ByteOrder::Little,
        ))
        .unwrap();
        let mut window = WindowBuffer::new(codec, 3, 0)
            .unwrap()
            .with_tail_policy(TailPolicy::ZeroPad);
        let mut source = MockByteSource::new(vec![255]);

        window.slide(&mut source, false).unwrap();

        assert_eq!(window.bytes(), &[255, 128, 128]);
        assert_eq!(window.samples(), &[127.0 / 128.0, 0.0, 0.0]);
    }

    #[test]
    fn exhausted_source_reports_no_data() {
        let mut window = WindowBuffer::new(mono16(), 4, 2).unwrap();
        let mut source = MockByteSource::new(Vec::new());

        assert_eq!(window.slide(&mut source, false).unwrap(), Fill::Exhausted);
    }

    #[test]
    fn stopped_slide_does_not_read() {
        let mut window = WindowBuffer::new(mono16(), 4, 2).unwrap();
        let mut source = MockByteSource::from_i16_le(&[1, 2, 3, 4]);
        let reads = source.read_counter();

        assert_eq!(window.slide(&mut source, true).unwrap(), Fill::Stopped);
        assert_eq!(reads.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn fill_first_reads_whole_window() {
        let mut window = WindowBuffer::new(mono16(), 4, 2).unwrap();
        let mut source = MockByteSource::from_i16_le(&pcm(&[0.5, -0.5, 0.25, -0.25]));

        let fill = window.fill_first(&mut source, false).unwrap();

        assert_eq!(fill, Fill::Complete { bytes: 8 });
        assert_eq!(window.samples(), &[0.5, -0.5, 0.25, -0.25]);
    }

    #[test]
    fn read_error_propagates() {
        let mut window = WindowBuffer::new(mono16(), 4, 2).unwrap();
        let mut source = MockByteSource::new(vec![0; 64]).with_read_failure_after(0);

        assert!(matches!(
            window.slide(&mut source, false),
            Err(DispatchError::SourceRead { .. })
        ));
    }

    #[test]
    fn overlap_invariant_holds_across_many_slides() {
        let formats = [
            AudioFormat::mono_16bit(8000.0),
            AudioFormat::pcm_signed_le(8000.0, 16, 2),
            AudioFormat::pcm_signed_le(8000.0, 24, 2),
        ];
        for format in formats {
            let channels = usize::from(format.channels);
            for buffer_size in 1..=9usize {
                for overlap in 0..buffer_size {
                    let total = buffer_size * 6 * format.frame_size();
                    let data: Vec<u8> = (0..total).map(|i| (i * 37 % 251) as u8).collect();
                    let mut source = MockByteSource::new(data.clone());
                    let codec = SampleCodec::new(format).unwrap();
                    let mut window = WindowBuffer::new(codec, buffer_size, overlap).unwrap();

                    let mut previous: Option<(Vec<f32>, Vec<u8>)> = None;
                    let mut consumed = 0;
                    while let Fill::Complete { bytes } = window.slide(&mut source, false).unwrap() {
                        if let Some((prev_samples, prev_bytes)) = &previous {
                            let kept = overlap * channels;
                            let kept_bytes = overlap * format.frame_size();
                            assert_eq!(
                                &window.samples()[..kept],
                                &prev_samples[prev_samples.len() - kept..],
                                "{format} buffer_size={buffer_size} overlap={overlap}"
                            );
                            assert_eq!(
                                &window.bytes()[..kept_bytes],
                                &prev_bytes[prev_bytes.len() - kept_bytes..]
                            );
                        }
                        consumed += bytes;
                        assert_eq!(
                            &window.bytes()[window.window_bytes() - bytes..],
                            &data[consumed - bytes..consumed]
                        );
                        previous = Some((window.samples().to_vec(), window.bytes().to_vec()));
                    }
                }
            }
        }
    }

    fn stereo16() -> SampleCodec {
        SampleCodec::new(AudioFormat::pcm_signed_le(8000.0, 16, 2)).unwrap()
    }

    #[test]
    fn stereo_slide_keeps_frames_interleaved() {
        let mut window = WindowBuffer::new(stereo16(), 3, 1).unwrap();
        let mut source = MockByteSource::from_i16_le(&pcm(&[
            0.5, -0.5, 0.25, -0.25, 0.75, -0.75, 0.125, -0.125,
        ]));

        assert_eq!(window.slide(&mut source, false).unwrap(), Fill::Complete { bytes: 8 });
        assert_eq!(window.samples(), &[0.0, 0.0, 0.5, -0.5, 0.25, -0.25]);

        assert_eq!(window.slide(&mut source, false).unwrap(), Fill::Complete { bytes: 8 });
        assert_eq!(window.samples(), &[0.25, -0.25, 0.75, -0.75, 0.125, -0.125]);

        assert_eq!(window.slide(&mut source, false).unwrap(), Fill::Exhausted);
    }

    #[test]
    fn stereo_tail_with_partial_frame_is_zero_padded() {
        let mut window = WindowBuffer::new(stereo16(), 3, 1)
            .unwrap()
            .with_tail_policy(TailPolicy::ZeroPad);
        let mut source = MockByteSource::from_i16_le(&pcm(&[0.5, -0.5, 0.25, -0.25, 0.75]));

        window.slide(&mut source, false).unwrap();
        let fill = window.slide(&mut source, false).unwrap();

        assert_eq!(fill, Fill::Padded { bytes: 2 });
        assert_eq!(window.samples(), &[0.25, -0.25, 0.0, 0.0, 0.0, 0.0]);
        assert!(window.bytes()[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn stereo_24bit_full_first_then_slide() {
        let codec = SampleCodec::new(AudioFormat::pcm_signed_le(8000.0, 24, 2)).unwrap();
        let mut window = WindowBuffer::new(codec, 2, 1).unwrap();
        // 0.5, -0.5, 0.25, -0.25, then 0.75, -0.75 as 24-bit little-endian.
        let bytes = vec![
            0x00, 0x00, 0x40, 0x00, 0x00, 0xC0, 0x00, 0x00, 0x20, 0x00, 0x00, 0xE0, 0x00, 0x00,
            0x60, 0x00, 0x00, 0xA0,
        ];
        let mut source = MockByteSource::new(bytes);

        assert_eq!(window.fill_first(&mut source, false).unwrap(), Fill::Complete { bytes: 12 });
        assert_eq!(window.samples(), &[0.5, -0.5, 0.25, -0.25]);

        assert_eq!(window.slide(&mut source, false).unwrap(), Fill::Complete { bytes: 6 });
        assert_eq!(window.samples(), &[0.25, -0.25, 0.75, -0.75]);
    }

    #[test]
    fn rejects_oversized_window_without_allocating() {
        for buffer_size in [MAX_BUFFER_SIZE + 1, usize::MAX / 2, usize::MAX] {
            assert!(matches!(
                WindowBuffer::new(stereo16(), buffer_size, 0),
                Err(DispatchError::ConfigInvalidValue { ref key, .. }) if key == "buffer_size"
            ));
        }
    }
}
