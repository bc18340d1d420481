//! Command-line interface for audio-dispatch
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Overlapping-window audio dispatch
#[derive(Parser, Debug)]
#[command(
    name = "audio-dispatch",
    version,
    about = "Slice audio streams into overlapping windows"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Verbose output (-v: debug, -vv: every window)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Window length in frames (overrides config)
    #[arg(long, global = true, value_name = "FRAMES")]
    pub buffer_size: Option<usize>,

    /// Frames shared by consecutive windows (overrides config)
    #[arg(long, global = true, value_name = "FRAMES")]
    pub overlap: Option<usize>,

    /// Read a full window before the first dispatch instead of zero-padding it
    #[arg(long, global = true)]
    pub full_first: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show format, duration and window count of an input
    Info {
        /// WAV file, or `-` for stdin
        input: PathBuf,

        /// Treat input as headerless PCM in the configured format
        #[arg(long)]
        raw: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Dispatch an input and write its PCM to stdout
    Play {
        /// WAV file, or `-` for stdin
        input: PathBuf,

        /// Treat input as headerless PCM in the configured format
        #[arg(long)]
        raw: bool,

        /// Stop after this many seconds of audio
        #[arg(long, value_name = "SECONDS")]
        seconds: Option<f64>,
    },

    /// Capture from the microphone and write raw PCM to stdout
    #[cfg(feature = "cpal-audio")]
    Record {
        /// Audio input device (e.g., hw:0)
        #[arg(long, value_name = "DEVICE")]
        device: Option<String>,

        /// Stop after this long. Examples: 30s, 5m, 1h30m
        #[arg(long, short = 'd', value_name = "DURATION", value_parser = parse_duration)]
        duration: Option<Duration>,
    },

    /// List available audio input devices
    #[cfg(feature = "cpal-audio")]
    Devices,
}

/// Parse a duration string.
///
/// Supports any duration format accepted by `humantime`: bare numbers (seconds),
/// single-unit (`30s`, `5m`, `2h`), and compound (`1h30m`, `2m30s`).
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    // Bare number → seconds
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Whether an input argument names stdin.
pub fn is_stdin(input: &Path) -> bool {
    input.as_os_str() == "-"
}
