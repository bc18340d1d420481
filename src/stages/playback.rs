//! Writes windows back out as raw bytes.

use crate::audio::codec::SampleCodec;
use crate::dispatch::event::AudioEvent;
use crate::dispatch::stage::{Flow, Stage};
use std::io::Write;
use tracing::warn;

/// Encodes the fresh frames of each window and writes them to `writer`.
///
/// Only the non-overlapping part is written, so the output is the input
/// stream (after any changes earlier stages made) without duplication.
/// A write error stops the run; finishing flushes the writer.
pub struct PlaybackStage<W: Write + Send + 'static> {
    writer: W,
    codec: SampleCodec,
    scratch: Vec<u8>,
    bytes_written: u64,
    limit: Option<u64>,
}

impl<W: Write + Send + 'static> PlaybackStage<W> {
    pub fn new(writer: W, codec: SampleCodec) -> Self {
        Self {
            writer,
            codec,
            scratch: Vec::new(),
            bytes_written: 0,
            limit: None,
        }
    }

    /// Stops the run once `bytes` bytes have been written.
    pub fn with_byte_limit(mut self, bytes: u64) -> Self {
        self.limit = Some(bytes);
        self
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send + 'static> Stage for PlaybackStage<W> {
    fn process(&mut self, event: &mut AudioEvent<'_>) -> Flow {
        let fresh = event.fresh_samples();
        let frame_size = self.codec.format().frame_size();
        let channels = usize::from(self.codec.format().channels);
        let mut len = fresh.len() / channels * frame_size;
        if let Some(limit) = self.limit {
            let remaining = limit.saturating_sub(self.bytes_written) as usize;
            len = len.min(remaining / frame_size * frame_size);
        }

        self.scratch.resize(len, 0);
        self.codec.encode(fresh, &mut self.scratch);

        if let Err(e) = self.writer.write_all(&self.scratch) {
            warn!(error = %e, "playback write failed, stopping");
            return Flow::Stop;
        }
        self.bytes_written += len as u64;

        Flow::from(self.limit.is_none_or(|limit| self.bytes_written < limit))
    }

    fn on_finished(&mut self) {
        if let Err(e) = self.writer.flush() {
            warn!(error = %e, "failed to flush playback output");
        }
    }

    fn name(&self) -> &'static str {
        "playback"
    }
}
