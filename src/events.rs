//! Typed event stream published by the voice service.
//!
//! Consumers subscribe to a cloneable receiver instead of registering
//! callbacks. Every state change, result, and failure flows through here,
//! so the service itself never needs to know who is listening.

use crate::orchestrator::{ServiceStatus, TranscriptionOutcome};
use crate::quality::{QualityMetrics, QualityStatus};
use crate::tts::TtsOutcome;
use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;

/// Subsystem a failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Capture,
    Quality,
    Transcription,
    Synthesis,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Component::Capture => "capture",
            Component::Quality => "quality",
            Component::Transcription => "transcription",
            Component::Synthesis => "synthesis",
        };
        write!(f, "{name}")
    }
}

/// Events emitted over the lifetime of the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VoiceEvent {
    /// Service lifecycle state changed.
    StatusChanged { status: ServiceStatus },
    /// A recording session finished and produced its one result.
    TranscriptionReady { result: TranscriptionOutcome },
    /// Speech synthesis finished, successfully or not.
    TtsComplete { outcome: TtsOutcome },
    /// A quality tick completed during an active recording.
    QualityUpdated {
        status: QualityStatus,
        metrics: QualityMetrics,
    },
    /// A component failed.
    Failed { component: Component, message: String },
}

impl VoiceEvent {
    /// Serialize event to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize event from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Fan-out bus delivering every event to every live subscriber.
///
/// Channels are unbounded so a slow consumer can never stall the capture
/// thread. Subscribers that drop their receiver are pruned on the next emit.
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<VoiceEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register a new subscriber and return its receiving end.
    pub fn subscribe(&self) -> Receiver<VoiceEvent> {
        let (tx, rx) = unbounded();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    /// Deliver an event to all live subscribers, dropping dead ones.
    pub fn emit(&self, event: VoiceEvent) {
        let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
