//! Error types for audio-dispatch.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Invalid window: overlap {overlap} must be smaller than buffer size {buffer_size}")]
    InvalidWindow { buffer_size: usize, overlap: usize },

    // Format errors
    #[error("Unsupported audio format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Failed to parse WAV header: {0}")]
    Wav(#[from] hound::Error),

    // Source errors
    #[error("Source read failed: {message}")]
    SourceRead { message: String },

    #[error("Source close failed: {message}")]
    SourceClose { message: String },

    // Capture device errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    // State errors
    #[error("Dispatcher already stopped")]
    AlreadyStopped,

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DispatchError>;
