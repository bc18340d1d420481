//! Microphone capture using CPAL (Cross-Platform Audio Library).
//!
//! The device callback pushes 16-bit little-endian PCM into a channel; the
//! dispatcher pulls it through [`ByteSource::read`], which blocks until data
//! arrives or the stop signal is raised.

use crate::audio::format::AudioFormat;
use crate::audio::source::ByteSource;
use crate::defaults;
use crate::dispatch::signal::StopSignal;
use crate::error::{DispatchError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use std::time::Duration;
use tracing::{debug, warn};

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// This suppresses noisy ALSA/JACK/PipeWire messages that CPAL triggers
/// when probing audio backends.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// List the names of all available audio input devices.
///
/// # Errors
/// Returns `DispatchError::AudioCapture` if device enumeration fails.
pub fn list_devices() -> Result<Vec<String>> {
    let (host, devices) = with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices = host.input_devices();
        (host, devices)
    });
    let _ = host; // keep host alive while iterating devices
    let devices = devices.map_err(|e| DispatchError::AudioCapture {
        message: format!("Failed to enumerate input devices: {}", e),
    })?;

    Ok(devices.filter_map(|device| device.name().ok()).collect())
}

fn find_device(device_name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();

        let Some(name) = device_name else {
            return host
                .default_input_device()
                .ok_or_else(|| DispatchError::AudioDeviceNotFound {
                    device: "default".to_string(),
                });
        };

        let devices = host
            .input_devices()
            .map_err(|e| DispatchError::AudioCapture {
                message: format!("Failed to enumerate devices: {}", e),
            })?;

        for device in devices {
            if let Ok(device_name) = device.name()
                && device_name == name
            {
                return Ok(device);
            }
        }

        Err(DispatchError::AudioDeviceNotFound {
            device: name.to_string(),
        })
    })
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is only touched by the thread that owns the
/// `CaptureSource` (play on first read, drop on close); the device callback
/// communicates through the channel only.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

fn stream_error(err: cpal::StreamError) {
    warn!("Audio stream error: {}", err);
}

fn f32_to_le_bytes(data: &[f32]) -> Vec<u8> {
    data.iter()
        .flat_map(|&s| ((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16).to_le_bytes())
        .collect()
}

fn i16_to_le_bytes(data: &[i16]) -> Vec<u8> {
    data.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Live microphone byte source.
///
/// Always delivers 16-bit signed little-endian PCM. Tries mono at the
/// requested rate first, then common rates, then the device's native rate
/// and channel count; [`format`](Self::format) reports what was negotiated.
pub struct CaptureSource {
    stream: Option<SendableStream>,
    receiver: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    pending_pos: usize,
    format: AudioFormat,
    playing: bool,
    stop: Option<StopSignal>,
    poll_interval: Duration,
}

impl CaptureSource {
    /// Open an input device. `None` selects the system default.
    ///
    /// The stream is built here but only started by the first read.
    pub fn open(device_name: Option<&str>, sample_rate: u32) -> Result<Self> {
        let device = find_device(device_name)?;
        let (sender, receiver) = unbounded();
        let (stream, format) = build_stream(&device, sample_rate, sender)?;

        debug!(format = %format, "capture stream built");

        Ok(Self {
            stream: Some(SendableStream(stream)),
            receiver,
            pending: Vec::new(),
            pending_pos: 0,
            format,
            playing: false,
            stop: None,
            poll_interval: Duration::from_millis(defaults::CAPTURE_POLL_MS),
        })
    }

    /// Open the default input device at the default sample rate.
    pub fn open_default() -> Result<Self> {
        Self::open(None, defaults::SAMPLE_RATE)
    }

    /// Format of the bytes this source delivers.
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    fn ensure_playing(&mut self) -> Result<()> {
        if self.playing {
            return Ok(());
        }
        let Some(stream) = self.stream.as_ref() else {
            return Ok(());
        };
        stream.0.play().map_err(|e| DispatchError::AudioCapture {
            message: format!("Failed to start audio stream: {}", e),
        })?;
        self.playing = true;
        Ok(())
    }

    fn stop_requested(&self) -> bool {
        self.stop.as_ref().is_some_and(StopSignal::is_raised)
    }
}

impl ByteSource for CaptureSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.stream.is_none() {
            return Ok(0);
        }
        self.ensure_playing()?;

        while self.pending_pos >= self.pending.len() {
            if self.stop_requested() {
                return Ok(0);
            }
            match self.receiver.recv_timeout(self.poll_interval) {
                Ok(chunk) => {
                    self.pending = chunk;
                    self.pending_pos = 0;
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(DispatchError::SourceRead {
                        message: "capture stream disconnected".to_string(),
                    });
                }
            }
        }

        let available = &self.pending[self.pending_pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pending_pos += n;
        Ok(n)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            if self.playing
                && let Err(e) = stream.0.pause()
            {
                return Err(DispatchError::SourceClose {
                    message: format!("Failed to pause audio stream: {}", e),
                });
            }
            drop(stream);
        }
        self.playing = false;
        Ok(())
    }

    fn attach_stop_signal(&mut self, signal: StopSignal) {
        self.stop = Some(signal);
    }
}

/// Build the input stream, preferring i16 mono at the requested rate.
///
/// Tries in order:
/// 1. i16 then f32 mono at the requested rate
/// 2. the same at each common sample rate, highest first
/// 3. Device default config (native rate and channels)
fn build_stream(
    device: &cpal::Device,
    sample_rate: u32,
    sender: Sender<Vec<u8>>,
) -> Result<(cpal::Stream, AudioFormat)> {
    let fallbacks = defaults::COMMON_SAMPLE_RATES
        .iter()
        .rev()
        .copied()
        .filter(|&rate| rate != sample_rate);

    for rate in std::iter::once(sample_rate).chain(fallbacks) {
        if let Some(stream) = build_mono_stream(device, rate, &sender) {
            if rate != sample_rate {
                debug!(requested = sample_rate, rate, "falling back to common sample rate");
            }
            return Ok((stream, AudioFormat::mono_16bit(rate as f32)));
        }
    }

    build_native_stream(device, sender)
}

fn build_mono_stream(
    device: &cpal::Device,
    sample_rate: u32,
    sender: &Sender<Vec<u8>>,
) -> Option<cpal::Stream> {
    let config = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let tx = sender.clone();
    if let Ok(stream) = device.build_input_stream(
        &config,
        move |data: &[i16], _: &cpal::InputCallbackInfo| {
            tx.send(i16_to_le_bytes(data)).ok();
        },
        stream_error,
        None,
    ) {
        return Some(stream);
    }

    let tx = sender.clone();
    device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                tx.send(f32_to_le_bytes(data)).ok();
            },
            stream_error,
            None,
        )
        .ok()
}

fn build_native_stream(
    device: &cpal::Device,
    sender: Sender<Vec<u8>>,
) -> Result<(cpal::Stream, AudioFormat)> {
    use cpal::SampleFormat;

    let default_config = device
        .default_input_config()
        .map_err(|e| DispatchError::AudioCapture {
            message: format!("Failed to query default input config: {}", e),
        })?;

    let native_rate = default_config.sample_rate().0;
    let native_channels = default_config.channels();
    let stream_config: cpal::StreamConfig = default_config.clone().into();
    let format = AudioFormat::pcm_signed_le(native_rate as f32, 16, native_channels);

    debug!(
        "using native capture format ({}ch/{}Hz/{:?})",
        native_channels,
        native_rate,
        default_config.sample_format(),
    );

    let stream = match default_config.sample_format() {
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                sender.send(i16_to_le_bytes(data)).ok();
            },
            stream_error,
            None,
        ),
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                sender.send(f32_to_le_bytes(data)).ok();
            },
            stream_error,
            None,
        ),
        other => {
            return Err(DispatchError::AudioCapture {
                message: format!(
                    "Unsupported native sample format: {:?}. \
                     Try specifying a device with --device.",
                    other
                ),
            });
        }
    }
    .map_err(|e| DispatchError::AudioCapture {
        message: format!("Failed to build native input stream: {}", e),
    })?;

    Ok((stream, format))
}
