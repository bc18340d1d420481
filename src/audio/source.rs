//! Raw byte sources feeding the dispatcher.

use crate::dispatch::signal::StopSignal;
use crate::error::{DispatchError, Result};
use std::io::{ErrorKind, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Trait for raw audio byte sources.
///
/// This trait allows swapping implementations (file, pipe, capture device, mock).
pub trait ByteSource: Send {
    /// Reads up to `buf.len()` bytes into `buf`.
    ///
    /// May return fewer bytes than requested; the dispatcher retries until
    /// its request is satisfied. `Ok(0)` marks the end of the data.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Releases the underlying stream or device.
    fn close(&mut self) -> Result<()>;

    /// Total length of the stream in bytes, when known up front.
    ///
    /// `None` for live sources such as microphone capture.
    fn total_bytes(&self) -> Option<u64> {
        None
    }

    /// Hands the source the dispatcher's stop flag so a blocking read can
    /// return early once a stop is requested.
    fn attach_stop_signal(&mut self, _signal: StopSignal) {}
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn total_bytes(&self) -> Option<u64> {
        (**self).total_bytes()
    }

    fn attach_stop_signal(&mut self, signal: StopSignal) {
        (**self).attach_stop_signal(signal)
    }
}

/// Byte source backed by any `std::io::Read`.
pub struct StreamSource<R: Read + Send> {
    reader: Option<R>,
    total_bytes: Option<u64>,
}

impl<R: Read + Send> StreamSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: Some(reader),
            total_bytes: None,
        }
    }

    /// Declares the stream length so the dispatcher can report total duration.
    pub fn with_total_bytes(mut self, total_bytes: u64) -> Self {
        self.total_bytes = Some(total_bytes);
        self
    }

    pub fn is_closed(&self) -> bool {
        self.reader.is_none()
    }
}

impl<R: Read + Send> ByteSource for StreamSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(0);
        };
        loop {
            match reader.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(DispatchError::SourceRead {
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.reader = None;
        Ok(())
    }

    fn total_bytes(&self) -> Option<u64> {
        self.total_bytes
    }
}

/// Mock byte source for testing
///
/// Serves a fixed byte buffer, optionally in short reads, and can be told to
/// fail after a number of successful reads.
#[derive(Debug, Clone)]
pub struct MockByteSource {
    data: Vec<u8>,
    position: usize,
    max_chunk: Option<usize>,
    fail_after_reads: Option<usize>,
    fail_close: bool,
    report_length: bool,
    reads: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    close_calls: Arc<AtomicUsize>,
}

impl MockByteSource {
    /// Create a mock serving `data` in a single read.
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            position: 0,
            max_chunk: None,
            fail_after_reads: None,
            fail_close: false,
            report_length: false,
            reads: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
            close_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create a mock serving 16-bit little-endian samples.
    pub fn from_i16_le(samples: &[i16]) -> Self {
        Self::new(samples.iter().flat_map(|s| s.to_le_bytes()).collect())
    }

    /// Limit every read to at most `max_chunk` bytes
    pub fn with_max_chunk(mut self, max_chunk: usize) -> Self {
        self.max_chunk = Some(max_chunk.max(1));
        self
    }

    /// Fail every read after `reads` successful ones
    pub fn with_read_failure_after(mut self, reads: usize) -> Self {
        self.fail_after_reads = Some(reads);
        self
    }

    /// Configure the mock to fail on close
    pub fn with_close_failure(mut self) -> Self {
        self.fail_close = true;
        self
    }

    /// Report the data length through `total_bytes`
    pub fn with_known_length(mut self) -> Self {
        self.report_length = true;
        self
    }

    /// Flag that flips once `close` has been called.
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }

    /// Counter of `close` calls.
    pub fn close_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.close_calls)
    }

    /// Counter of `read` calls.
    pub fn read_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.reads)
    }
}

impl ByteSource for MockByteSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let completed = self.reads.fetch_add(1, Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            return Ok(0);
        }
        if self.fail_after_reads.is_some_and(|limit| completed >= limit) {
            return Err(DispatchError::SourceRead {
                message: "mock read error".to_string(),
            });
        }

        let remaining = self.data.len() - self.position;
        let mut n = buf.len().min(remaining);
        if let Some(max) = self.max_chunk {
            n = n.min(max);
        }
        buf[..n].copy_from_slice(&self.data[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }

    fn close(&mut self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(DispatchError::SourceClose {
                message: "mock close error".to_string(),
            });
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn total_bytes(&self) -> Option<u64> {
        self.report_length.then_some(self.data.len() as u64)
    }
}
