//! Audio capture, decoding, and processing.

#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod processing;
pub mod source;
pub mod wav;

pub use processing::{ClipMetrics, ProcessingOptions};
pub use source::{AudioSource, MockAudioSource};
pub use wav::WavAudioSource;
