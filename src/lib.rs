//! audio-dispatch - Overlapping-window audio dispatch
//!
//! Decodes raw audio bytes into fixed-size windows of normalized samples that
//! slide forward with a configurable overlap, and passes every window through
//! an ordered chain of processing stages.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod stages;

// Sources and formats
pub use audio::codec::SampleCodec;
pub use audio::format::{AudioFormat, ByteOrder, Encoding};
pub use audio::source::{ByteSource, StreamSource};
pub use audio::wav::WavSource;

// Dispatch core
pub use dispatch::{
    AudioEvent, DispatchState, Dispatcher, DispatcherConfig, DispatcherHandle, FirstWindow, Flow,
    FnStage, Stage, StageId, StopSignal, TailPolicy,
};

// Stages
pub use stages::{CollectorStage, ForwardStage, PlaybackStage};

// Error handling
pub use error::{DispatchError, Result};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
