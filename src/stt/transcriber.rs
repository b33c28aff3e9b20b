use crate::defaults;
use crate::error::{Result, VoxprepError};
use std::sync::Arc;

/// Result of a single batch transcription pass.
///
/// `confidence` is in `[0.0, 1.0]`. Engines that do not report a real
/// confidence use [`defaults::NOMINAL_EMBEDDED_CONFIDENCE`].
#[derive(Debug, Clone, PartialEq)]
pub struct EngineResult {
    pub text: String,
    pub confidence: f32,
}

/// Trait for batch speech-to-text transcription.
///
/// This is the embedded recognition path: the whole clip is handed over at
/// once after recording stops. Implementations must be shareable across
/// threads so one loaded model can serve consecutive sessions.
pub trait Transcriber: Send + Sync {
    /// Transcribe audio samples to text.
    ///
    /// # Arguments
    /// * `audio` - Audio samples as 16-bit PCM at 16kHz mono
    fn transcribe(&self, audio: &[i16]) -> Result<EngineResult>;

    /// Get the name of the loaded model
    fn model_name(&self) -> &str;

    /// Check if the transcriber is ready
    fn is_ready(&self) -> bool;
}

/// Implement Transcriber for Arc<T> to allow sharing across sessions.
impl<T: Transcriber + ?Sized> Transcriber for Arc<T> {
    fn transcribe(&self, audio: &[i16]) -> Result<EngineResult> {
        (**self).transcribe(audio)
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }
}

/// Mock transcriber for testing
#[derive(Debug, Clone)]
pub struct MockTranscriber {
    model_name: String,
    response: String,
    confidence: f32,
    should_fail: bool,
}

impl MockTranscriber {
    /// Create a new mock transcriber with default settings
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            response: "mock transcription".to_string(),
            confidence: defaults::NOMINAL_EMBEDDED_CONFIDENCE,
            should_fail: false,
        }
    }

    /// Configure the mock to return a specific response
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    /// Configure the mock to report a specific confidence
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    /// Configure the mock to fail on transcribe
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }
}

impl Transcriber for MockTranscriber {
    fn transcribe(&self, _audio: &[i16]) -> Result<EngineResult> {
        if self.should_fail {
            Err(VoxprepError::Transcription {
                message: "mock transcription failure".to_string(),
            })
        } else {
            Ok(EngineResult {
                text: self.response.clone(),
                confidence: self.confidence,
            })
        }
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn is_ready(&self) -> bool {
        !self.should_fail
    }
}
