//! Ready-made stages.

pub mod collector;
pub mod forward;
pub mod playback;

pub use collector::CollectorStage;
pub use forward::{ForwardStage, WindowCopy};
pub use playback::PlaybackStage;
