//! Host-provided native speech recognition.
//!
//! The crate does not ship an OS speech-recognition binding. Hosts that have
//! one (a desktop API, a cloud stream, an IME service) inject it by
//! implementing [`NativeRecognizer`]; the orchestrator prefers it over the
//! embedded engine whenever `is_available()` says so.
//!
//! The contract is event-driven: the capture thread feeds PCM frames and
//! drains [`RecognizerEvent`]s on every poll. Error events are classified so
//! the orchestrator can decide between falling back and giving up.

use crate::error::{Result, VoxprepError};
use std::collections::VecDeque;
use std::fmt;

/// Why a native recognition session failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeErrorKind {
    /// Nothing intelligible was heard.
    NoSpeech,
    /// The capture device is held by another client.
    DeviceBusy,
    /// Microphone or recognition permission was refused.
    NotAllowed,
    /// The backing service could not be reached.
    Network,
    /// The session was cancelled from our side.
    Aborted,
    /// Anything the host could not classify.
    Other,
}

impl NativeErrorKind {
    /// Transient failures are worth one in-place retry on the embedded path.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NoSpeech | Self::DeviceBusy)
    }

    /// Permission failures must surface immediately and are never retried.
    pub fn is_permission(&self) -> bool {
        matches!(self, Self::NotAllowed)
    }
}

impl fmt::Display for NativeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NoSpeech => "no-speech",
            Self::DeviceBusy => "device-busy",
            Self::NotAllowed => "not-allowed",
            Self::Network => "network",
            Self::Aborted => "aborted",
            Self::Other => "other",
        };
        write!(f, "{}", name)
    }
}

/// One event drained from a native recognition session.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognizerEvent {
    /// Partial hypothesis, may be revised.
    Interim { text: String },
    /// Committed segment with the recognizer's confidence.
    Final { text: String, confidence: f32 },
    /// The session hit an error; see [`NativeErrorKind`] for severity.
    Error {
        kind: NativeErrorKind,
        message: String,
    },
    /// The session ended on its own (end of speech, service timeout).
    End,
}

/// Tail result flushed by [`NativeRecognizer::finish`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedUtterance {
    pub text: String,
    pub confidence: f32,
}

/// Event-driven speech recognition backend.
///
/// Owned by the capture thread for the duration of a recording, so `Send` is
/// required but `Sync` is not; all methods take `&mut self`.
pub trait NativeRecognizer: Send {
    /// Start a session for `language` (a BCP-47 tag).
    fn begin(&mut self, language: &str) -> Result<()>;

    /// Hand over captured 16-bit PCM frames. No-op outside a session.
    fn feed(&mut self, samples: &[i16]);

    /// Drain the next pending event, if any.
    fn poll_event(&mut self) -> Option<RecognizerEvent>;

    /// End the session and flush the final utterance, if one was produced.
    fn finish(&mut self) -> Option<RecognizedUtterance>;

    /// Cancel the session, discarding pending events.
    fn abort(&mut self);

    /// Whether this backend can be used at all right now.
    fn is_available(&self) -> bool;
}

/// Scriptable recognizer for testing
#[derive(Debug)]
pub struct MockNativeRecognizer {
    available: bool,
    script: VecDeque<RecognizerEvent>,
    utterance: Option<RecognizedUtterance>,
    begin_failure: Option<String>,
    active: bool,
    began_language: Option<String>,
    fed_samples: usize,
    aborted: bool,
}

impl MockNativeRecognizer {
    /// Create an available recognizer with no scripted events
    pub fn new() -> Self {
        Self {
            available: true,
            script: VecDeque::new(),
            utterance: None,
            begin_failure: None,
            active: false,
            began_language: None,
            fed_samples: 0,
            aborted: false,
        }
    }

    /// Create a recognizer that reports itself unavailable
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    /// Script the events drained by `poll_event`, in order
    pub fn with_events(mut self, events: impl IntoIterator<Item = RecognizerEvent>) -> Self {
        self.script = events.into_iter().collect();
        self
    }

    /// Set the utterance returned by `finish`
    pub fn with_utterance(mut self, text: &str, confidence: f32) -> Self {
        self.utterance = Some(RecognizedUtterance {
            text: text.to_string(),
            confidence,
        });
        self
    }

    /// Make `begin` fail with the given message
    pub fn with_begin_failure(mut self, message: &str) -> Self {
        self.begin_failure = Some(message.to_string());
        self
    }

    /// Language passed to the last `begin`
    pub fn began_language(&self) -> Option<&str> {
        self.began_language.as_deref()
    }

    /// Samples fed since the last `begin`
    pub fn fed_samples(&self) -> usize {
        self.fed_samples
    }

    /// Whether `abort` was called
    pub fn was_aborted(&self) -> bool {
        self.aborted
    }

    /// Whether a session is in progress
    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Default for MockNativeRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeRecognizer for MockNativeRecognizer {
    fn begin(&mut self, language: &str) -> Result<()> {
        if !self.available {
            return Err(VoxprepError::NativeRecognition {
                message: "native recognition not available".to_string(),
            });
        }
        if let Some(message) = &self.begin_failure {
            return Err(VoxprepError::NativeRecognition {
                message: message.clone(),
            });
        }
        self.active = true;
        self.began_language = Some(language.to_string());
        self.fed_samples = 0;
        self.aborted = false;
        Ok(())
    }

    fn feed(&mut self, samples: &[i16]) {
        if self.active {
            self.fed_samples += samples.len();
        }
    }

    fn poll_event(&mut self) -> Option<RecognizerEvent> {
        if self.active {
            self.script.pop_front()
        } else {
            None
        }
    }

    fn finish(&mut self) -> Option<RecognizedUtterance> {
        self.active = false;
        self.utterance.take()
    }

    fn abort(&mut self) {
        self.active = false;
        self.aborted = true;
        self.script.clear();
    }

    fn is_available(&self) -> bool {
        self.available
    }
}
