use crate::audio::format::{AudioFormat, ByteOrder, Encoding};
use crate::defaults;
use crate::dispatch::dispatcher::DispatcherConfig;
use crate::error::{DispatchError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
#[cfg(feature = "cli")]
use std::path::PathBuf;
use tracing::warn;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub format: FormatConfig,
    pub dispatch: DispatcherConfig,
    pub capture: CaptureConfig,
}

/// Format of headerless input and of microphone capture
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FormatConfig {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
    pub encoding: Encoding,
    pub byte_order: ByteOrder,
}

/// Microphone capture configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct CaptureConfig {
    pub device: Option<String>,
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            bits_per_sample: defaults::BITS_PER_SAMPLE,
            channels: defaults::CHANNELS,
            encoding: Encoding::PcmSigned,
            byte_order: ByteOrder::Little,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values. The window geometry is validated.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DispatchError::ConfigFileNotFound {
                path: path.display().to_string(),
            });
        }
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.dispatch.validate()?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file doesn't exist
    ///
    /// Malformed or invalid files are still errors.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(DispatchError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - AUDIO_DISPATCH_BUFFER_SIZE → dispatch.buffer_size
    /// - AUDIO_DISPATCH_OVERLAP → dispatch.overlap
    /// - AUDIO_DISPATCH_DEVICE → capture.device
    ///
    /// Values that do not parse are ignored with a warning.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(size) = env_number("AUDIO_DISPATCH_BUFFER_SIZE") {
            self.dispatch.buffer_size = size;
        }

        if let Some(overlap) = env_number("AUDIO_DISPATCH_OVERLAP") {
            self.dispatch.overlap = overlap;
        }

        if let Ok(device) = std::env::var("AUDIO_DISPATCH_DEVICE")
            && !device.is_empty()
        {
            self.capture.device = Some(device);
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/audio-dispatch/config.toml on Linux, or `None` when
    /// the platform has no configuration directory.
    #[cfg(feature = "cli")]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("audio-dispatch").join("config.toml"))
    }

    /// Window geometry for new dispatchers.
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        self.dispatch
    }

    /// Format assumed for headerless input.
    pub fn audio_format(&self) -> AudioFormat {
        AudioFormat::new(
            self.format.sample_rate as f32,
            self.format.bits_per_sample,
            self.format.channels,
            self.format.encoding,
            self.format.byte_order,
        )
    }
}

fn env_number(key: &str) -> Option<usize> {
    let value = std::env::var(key).ok().filter(|v| !v.is_empty())?;
    match value.parse() {
        Ok(n) => Some(n),
        Err(e) => {
            warn!("ignoring {}={:?}: {}", key, value, e);
            None
        }
    }
}
