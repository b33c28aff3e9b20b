//! voxprep - voice capture and transcription for interview practice
//!
//! Microphone capture with live quality scoring, native/embedded
//! transcription failover, and subprocess speech synthesis, coordinated by
//! an embeddable [`VoiceOrchestrator`].

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod probe;
pub mod quality;
pub mod stt;
pub mod tts;

// Core traits (capture → score → transcribe → speak)
pub use audio::source::AudioSource;
pub use stt::native::NativeRecognizer;
pub use stt::transcriber::Transcriber;
pub use tts::SpeechSynthesizer;

// Service surface
pub use events::{Component, EventBus, VoiceEvent};
pub use orchestrator::{
    FallbackPolicy, OrchestratorBuilder, ServiceStatus, StatusReport, TranscriptionMethod,
    TranscriptionOutcome, VoiceOrchestrator,
};
pub use probe::{Capabilities, CapabilityRating, CapabilityReport};

// Quality analysis
pub use quality::{QualityMetrics, QualityMonitor, QualityStatus, QualityThresholds};

// Error handling
pub use error::{Result, VoxprepError};

// Config
pub use config::VoiceConfig;

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
