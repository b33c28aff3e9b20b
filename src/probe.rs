//! Pre-flight capability detection.
//!
//! [`Capabilities::detect`] inspects the host once: which recognition paths
//! exist, whether a synthesis engine answers, whether capture devices are
//! present, and what the embedded engine could use. The result is plain data;
//! backend selection reads it at initialization and `doctor` renders it.
//!
//! The weighted score and its thresholds live in [`defaults`]; runtime
//! decisions use the individual fields, never the rating.

use crate::config::VoiceConfig;
use crate::defaults;
use crate::stt;
use crate::tts;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Microphone permission as far as it can be known without opening a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    Granted,
    Denied,
    Prompt,
    #[default]
    Unknown,
}

impl fmt::Display for PermissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Granted => "granted",
            Self::Denied => "denied",
            Self::Prompt => "prompt",
            Self::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// What the host-injected recognizer reports about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NativeRecognitionSupport {
    pub available: bool,
    pub continuous: bool,
    pub interim_results: bool,
}

/// Synthesis engine availability.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SynthesisSupport {
    pub available: bool,
    /// Engine command that answered, when one did.
    pub engine: Option<String>,
    pub voice_count: usize,
}

/// Microphone capture availability.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecordingSupport {
    pub available: bool,
    /// Containers the pipeline can produce regardless of device state.
    pub containers: Vec<String>,
}

/// In-process signal analysis availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DspSupport {
    pub available: bool,
    /// Default input device rate, when a device was found.
    pub device_sample_rate: Option<u32>,
}

/// Embedded transcription engine readiness.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EmbeddedSupport {
    /// Whether the engine was compiled in (`whisper` feature).
    pub compiled: bool,
    pub model_available: bool,
    pub model_path: Option<PathBuf>,
    /// Inference threads the host could offer.
    pub threads: usize,
    /// Whether the build targets a SIMD-capable architecture.
    pub simd: bool,
}

/// Overall environment rating derived from the weighted score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityRating {
    Excellent,
    Good,
    Limited,
    Poor,
}

impl CapabilityRating {
    pub fn from_score(score: u32) -> Self {
        if score >= defaults::RATING_EXCELLENT_MIN {
            Self::Excellent
        } else if score >= defaults::RATING_GOOD_MIN {
            Self::Good
        } else if score >= defaults::RATING_LIMITED_MIN {
            Self::Limited
        } else {
            Self::Poor
        }
    }
}

impl fmt::Display for CapabilityRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Limited => "limited",
            Self::Poor => "poor",
        };
        write!(f, "{}", name)
    }
}

/// Everything one probe pass learned about the host.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    pub native_recognition: NativeRecognitionSupport,
    pub synthesis: SynthesisSupport,
    pub recording: RecordingSupport,
    pub dsp: DspSupport,
    pub embedded: EmbeddedSupport,
    pub microphone_permission: PermissionState,
}

/// Diagnostic bundle for rendering: the rating plus the accompanying lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityReport {
    pub rating: CapabilityRating,
    pub score: u32,
    pub recommendations: Vec<String>,
    pub issues: Vec<String>,
    pub fallback_strategies: Vec<String>,
}

impl Capabilities {
    /// Inspect the host. One-shot; the result does not update itself.
    ///
    /// Native recognition is host-injected and therefore reported absent
    /// here; callers that hold a recognizer overlay it with
    /// [`with_native_recognition`](Self::with_native_recognition).
    pub fn detect(config: &VoiceConfig) -> Self {
        let (recording, microphone_permission, device_sample_rate) = detect_recording();

        Self {
            native_recognition: NativeRecognitionSupport::default(),
            synthesis: detect_synthesis(config),
            recording,
            dsp: DspSupport {
                available: true,
                device_sample_rate,
            },
            embedded: detect_embedded(config),
            microphone_permission,
        }
    }

    /// Overlay what an injected recognizer reports about itself.
    pub fn with_native_recognition(mut self, available: bool) -> Self {
        self.native_recognition = NativeRecognitionSupport {
            available,
            continuous: available,
            interim_results: available,
        };
        self
    }

    /// Whether the embedded engine could transcribe right now.
    pub fn embedded_ready(&self) -> bool {
        self.embedded.compiled && self.embedded.model_available
    }

    /// Whether any transcription path exists.
    pub fn has_transcription_backend(&self) -> bool {
        self.native_recognition.available || self.embedded_ready()
    }

    /// Weighted environment score in 0..=100.
    pub fn score(&self) -> u32 {
        let mut score: i64 = 0;
        if self.native_recognition.available {
            score += defaults::PROBE_POINTS_NATIVE as i64;
        }
        if self.synthesis.available {
            score += defaults::PROBE_POINTS_TTS as i64;
        }
        if self.recording.available {
            score += defaults::PROBE_POINTS_RECORDING as i64;
        }
        if self.dsp.available {
            score += defaults::PROBE_POINTS_DSP as i64;
        }
        if self.embedded_ready() {
            score += defaults::PROBE_POINTS_ADVANCED as i64;
        }
        match self.microphone_permission {
            PermissionState::Denied => score -= defaults::PROBE_PERMISSION_DENIED_PENALTY as i64,
            PermissionState::Unknown => score -= defaults::PROBE_PERMISSION_UNKNOWN_PENALTY as i64,
            PermissionState::Granted | PermissionState::Prompt => {}
        }
        score.clamp(0, 100) as u32
    }

    pub fn overall_rating(&self) -> CapabilityRating {
        CapabilityRating::from_score(self.score())
    }

    /// Actionable setup hints, best first.
    pub fn recommendations(&self) -> Vec<String> {
        let mut hints = Vec::new();
        if !self.native_recognition.available && self.embedded_ready() {
            hints.push(
                "Native recognition is unavailable; the embedded engine will be used.".to_string(),
            );
        }
        if self.embedded.compiled && !self.embedded.model_available {
            hints.push(
                "Download a whisper model (e.g. ggml-base.bin) into ~/.cache/voxprep/models."
                    .to_string(),
            );
        }
        if !self.embedded.compiled {
            hints.push(
                "Rebuild with the whisper feature for offline transcription.".to_string(),
            );
        }
        if !self.synthesis.available {
            hints.push(
                "Install a speech engine (espeak-ng or speech-dispatcher) for voice output."
                    .to_string(),
            );
        }
        if self.microphone_permission == PermissionState::Denied {
            hints.push(
                "Grant microphone access (is your user in the audio group?).".to_string(),
            );
        }
        hints
    }

    /// Problems that keep parts of the service from working at all.
    pub fn issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if !self.recording.available {
            issues.push("No audio capture device available.".to_string());
        }
        if !self.has_transcription_backend() {
            issues.push("No transcription backend available.".to_string());
        }
        if self.microphone_permission == PermissionState::Denied {
            issues.push("Microphone permission denied.".to_string());
        }
        issues
    }

    /// How the service degrades given what is missing.
    pub fn fallback_strategies(&self) -> Vec<String> {
        let mut strategies = Vec::new();
        if self.native_recognition.available && self.embedded_ready() {
            strategies.push(
                "Embedded transcription takes over if native recognition fails.".to_string(),
            );
        }
        if !self.native_recognition.available && self.embedded_ready() {
            strategies.push("All transcription uses the embedded engine.".to_string());
        }
        if !self.recording.available {
            strategies
                .push("Transcribe prerecorded WAV files instead of live capture.".to_string());
        }
        if !self.synthesis.available {
            strategies.push("Text output only; no spoken responses.".to_string());
        }
        strategies
    }

    pub fn report(&self) -> CapabilityReport {
        CapabilityReport {
            rating: self.overall_rating(),
            score: self.score(),
            recommendations: self.recommendations(),
            issues: self.issues(),
            fallback_strategies: self.fallback_strategies(),
        }
    }
}

fn supported_containers() -> Vec<String> {
    vec!["wav".to_string(), "pcm16".to_string()]
}

#[cfg(feature = "cpal-audio")]
fn detect_recording() -> (RecordingSupport, PermissionState, Option<u32>) {
    match crate::audio::capture::list_devices() {
        Ok(devices) if !devices.is_empty() => (
            RecordingSupport {
                available: true,
                containers: supported_containers(),
            },
            PermissionState::Granted,
            crate::audio::capture::default_device_sample_rate(),
        ),
        Ok(_) => (
            RecordingSupport {
                available: false,
                containers: supported_containers(),
            },
            PermissionState::Unknown,
            None,
        ),
        Err(e) => {
            let message = e.to_string().to_lowercase();
            let permission = if message.contains("permission") || message.contains("denied") {
                PermissionState::Denied
            } else {
                PermissionState::Unknown
            };
            (
                RecordingSupport {
                    available: false,
                    containers: supported_containers(),
                },
                permission,
                None,
            )
        }
    }
}

#[cfg(not(feature = "cpal-audio"))]
fn detect_recording() -> (RecordingSupport, PermissionState, Option<u32>) {
    (
        RecordingSupport {
            available: false,
            containers: supported_containers(),
        },
        PermissionState::Unknown,
        None,
    )
}

fn detect_synthesis(config: &VoiceConfig) -> SynthesisSupport {
    let engine = match &config.tts.engine {
        Some(engine) if tts::engine_available(engine) => Some(engine.clone()),
        Some(_) => None,
        None => tts::detect_engine(),
    };

    match engine {
        Some(engine) => {
            let voice_count = tts::list_engine_voices(&engine).len();
            SynthesisSupport {
                available: true,
                engine: Some(engine),
                voice_count,
            }
        }
        None => SynthesisSupport::default(),
    }
}

fn detect_embedded(config: &VoiceConfig) -> EmbeddedSupport {
    let model_path =
        stt::resolve_model_path(&config.stt.model, config.stt.model_path.as_deref()).ok();

    EmbeddedSupport {
        compiled: cfg!(feature = "whisper"),
        model_available: model_path.is_some(),
        model_path,
        threads: std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
        simd: cfg!(any(
            target_feature = "avx2",
            target_feature = "avx",
            target_arch = "aarch64"
        )),
    }
}
