//! Audio formats, sample conversion and byte sources.

#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod codec;
pub mod format;
pub mod source;
pub mod wav;

#[cfg(feature = "cpal-audio")]
pub use capture::{CaptureSource, list_devices};
pub use codec::SampleCodec;
pub use format::{AudioFormat, ByteOrder, Encoding};
pub use source::{ByteSource, MockByteSource, StreamSource};
pub use wav::WavSource;
