//! Speech-to-text backends: host-native (event-driven) and embedded (batch).

pub mod native;
pub mod transcriber;
pub mod whisper;

pub use native::{
    MockNativeRecognizer, NativeErrorKind, NativeRecognizer, RecognizedUtterance, RecognizerEvent,
};
pub use transcriber::{EngineResult, MockTranscriber, Transcriber};
pub use whisper::{WhisperConfig, WhisperTranscriber, resolve_model_path, whisper_language};
