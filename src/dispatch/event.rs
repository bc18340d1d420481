use crate::audio::format::AudioFormat;

/// One dispatched window, lent to each stage in turn.
///
/// Borrows the dispatcher's window storage for the duration of a single
/// iteration. Stages that need the data later must copy it out.
#[derive(Debug)]
pub struct AudioEvent<'a> {
    samples: &'a mut [f32],
    overlap: usize,
    format: &'a AudioFormat,
    bytes_processed: u64,
    total_bytes: Option<u64>,
}

impl<'a> AudioEvent<'a> {
    pub fn new(
        samples: &'a mut [f32],
        overlap: usize,
        format: &'a AudioFormat,
        bytes_processed: u64,
        total_bytes: Option<u64>,
    ) -> Self {
        Self {
            samples,
            overlap,
            format,
            bytes_processed,
            total_bytes,
        }
    }

    /// Normalized samples of the whole window, channels interleaved.
    pub fn samples(&self) -> &[f32] {
        self.samples
    }

    /// Mutable window contents. Changes are visible to later stages in the
    /// chain and, in the overlap region, to the next window.
    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut *self.samples
    }

    /// Frames at the front of the window carried over from the previous one.
    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Carried-over samples.
    pub fn overlap_samples(&self) -> &[f32] {
        &self.samples[..self.overlap * self.channels()]
    }

    /// Samples read from the source for this window.
    pub fn fresh_samples(&self) -> &[f32] {
        &self.samples[self.overlap * self.channels()..]
    }

    /// Window length in frames.
    pub fn buffer_size(&self) -> usize {
        self.samples.len() / self.channels()
    }

    pub fn channels(&self) -> usize {
        usize::from(self.format.channels)
    }

    pub fn format(&self) -> &AudioFormat {
        self.format
    }

    /// Source bytes consumed before this window.
    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed
    }

    pub fn frames_processed(&self) -> u64 {
        self.bytes_processed / self.format.frame_size() as u64
    }

    /// Stream time at the start of the fresh region, in seconds.
    pub fn timestamp_seconds(&self) -> f64 {
        self.format.bytes_to_seconds(self.bytes_processed)
    }

    /// Fraction of the source consumed, or `None` for sources of unknown length.
    pub fn progress(&self) -> Option<f64> {
        match self.total_bytes {
            Some(0) => Some(1.0),
            Some(total) => Some((self.bytes_processed as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}
