//! Default configuration constants for audio-dispatch.
//!
//! Shared by the configuration file, the CLI and the source constructors so
//! they agree on one set of values.

/// Default sample rate in Hz for raw input and microphone capture.
pub const SAMPLE_RATE: u32 = 44100;

/// Default bit depth for raw input and microphone capture.
pub const BITS_PER_SAMPLE: u16 = 16;

/// Default channel count for raw input and microphone capture.
pub const CHANNELS: u16 = 1;

/// Default window length in frames.
///
/// 2048 frames is about 46ms at 44.1kHz, long enough for pitch estimation of
/// low voices while still updating a UI at ~20Hz.
pub const BUFFER_SIZE: usize = 2048;

/// Default overlap in frames between consecutive windows.
pub const OVERLAP: usize = 0;

/// Largest accepted window, in frames. About 95s at 44.1kHz.
pub const MAX_BUFFER_SIZE: usize = 1 << 22;

/// Sample rates most capture hardware supports. Capture falls back to these,
/// highest first, when the requested rate is not available.
pub const COMMON_SAMPLE_RATES: [u32; 6] = [8000, 11025, 16000, 22050, 44100, 48000];

/// Capacity of the window channel used by `ForwardStage`.
pub const FORWARD_BUFFER: usize = 16;

/// How long a blocking capture read waits before re-checking the stop signal.
pub const CAPTURE_POLL_MS: u64 = 10;
