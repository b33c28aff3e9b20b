//! The coordinating state machine for capture, transcription, and synthesis.
//!
//! One orchestrator owns the microphone source and the active recognition
//! backend for the lifetime of each recording session. A session runs on a
//! single capture thread that polls the source, feeds the native recognizer
//! and the quality monitor, and reacts to fallback triggers without leaving
//! the `Recording` state. `stop_recording` joins that thread with a bounded
//! wait and emits exactly one [`TranscriptionReady`](VoiceEvent) per
//! completed session, even when the backend switched mid-recording.

use crate::audio::processing::{self, ClipMetrics, ProcessingOptions};
use crate::audio::source::AudioSource;
use crate::config::VoiceConfig;
use crate::defaults;
use crate::error::{Result, VoxprepError};
use crate::events::{Component, EventBus, VoiceEvent};
use crate::probe::{Capabilities, PermissionState};
use crate::quality::QualityMonitor;
use crate::stt::{
    NativeRecognizer, RecognizedUtterance, RecognizerEvent, Transcriber, WhisperConfig,
    WhisperTranscriber,
};
use crate::tts::{self, CommandSynthesizer, SpeakRequest, SpeechSynthesizer, TtsOutcome};
use crossbeam_channel::{Receiver, bounded};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Lifecycle states of the voice service.
///
/// `Error` is entered on unrecoverable failures and left only through
/// [`VoiceOrchestrator::initialize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Initializing,
    Ready,
    Recording,
    Processing,
    Speaking,
    Error,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceStatus::Initializing => "initializing",
            ServiceStatus::Ready => "ready",
            ServiceStatus::Recording => "recording",
            ServiceStatus::Processing => "processing",
            ServiceStatus::Speaking => "speaking",
            ServiceStatus::Error => "error",
        };
        write!(f, "{name}")
    }
}

/// Which backend produced a transcription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptionMethod {
    Native,
    Embedded,
}

impl fmt::Display for TranscriptionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TranscriptionMethod::Native => "native",
            TranscriptionMethod::Embedded => "embedded",
        };
        write!(f, "{name}")
    }
}

/// The one result a completed recording session produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionOutcome {
    pub text: String,
    /// In `[0.0, 1.0]`; nominal for engines that do not report one.
    pub confidence: f32,
    pub method: TranscriptionMethod,
    /// Wall-clock time spent between stop and result.
    pub processing_time_ms: u64,
    /// Level statistics of the captured clip, when audio was recorded.
    pub audio_metrics: Option<ClipMetrics>,
}

/// Snapshot returned by [`VoiceOrchestrator::get_status`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: ServiceStatus,
    pub is_recording: bool,
    pub is_speaking: bool,
    pub capabilities: Capabilities,
}

/// Bounded counter deciding whether another backend fallback is allowed.
///
/// Consulted on every fallback trigger. Each granted fallback increments the
/// counter; a session that delivers a result resets it. Once the bound is
/// reached further triggers are refused until a reset, which keeps a flapping
/// environment from switching backends forever.
#[derive(Debug, Clone)]
pub struct FallbackPolicy {
    max_consecutive: u32,
    consecutive: u32,
}

impl FallbackPolicy {
    pub fn new(max_consecutive: u32) -> Self {
        Self {
            max_consecutive,
            consecutive: 0,
        }
    }

    /// Ask for one more fallback. Increments the counter when granted.
    pub fn allow(&mut self) -> bool {
        if self.consecutive >= self.max_consecutive {
            return false;
        }
        self.consecutive += 1;
        true
    }

    /// A session produced a result; the environment is healthy again.
    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.consecutive
    }
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self::new(defaults::MAX_FALLBACK_ATTEMPTS)
    }
}

/// Factory invoked once per recording session to open the audio source.
pub type SourceFactory = Box<dyn Fn() -> Result<Box<dyn AudioSource>> + Send + Sync>;

/// What the capture thread hands back when a session ends.
struct SessionEnd {
    samples: Vec<i16>,
    /// Recognizer returned for reuse by the next session.
    recognizer: Option<Box<dyn NativeRecognizer>>,
    /// Joined final segments from the native session, if it produced any.
    native_utterance: Option<RecognizedUtterance>,
    method: TranscriptionMethod,
    /// The active backend died without a fallback; the failure event has
    /// already been emitted from the capture thread.
    backend_lost: bool,
    /// The source stopped delivering; the failure event has already been
    /// emitted from the capture thread.
    capture_aborted: bool,
}

struct CaptureSession {
    run: Arc<AtomicBool>,
    handle: JoinHandle<()>,
    done_rx: Receiver<SessionEnd>,
}

/// Everything the capture thread needs, moved in at spawn.
struct CaptureContext {
    source: Box<dyn AudioSource>,
    recognizer: Option<Box<dyn NativeRecognizer>>,
    monitor: Option<QualityMonitor>,
    run: Arc<AtomicBool>,
    bus: Arc<EventBus>,
    policy: Arc<Mutex<FallbackPolicy>>,
    /// Whether the embedded engine can take over mid-session.
    fallback_ready: bool,
}

/// Builder for a [`VoiceOrchestrator`] with injected collaborators.
///
/// Every part left out is constructed from the configuration during
/// [`initialize`](VoiceOrchestrator::initialize): the default microphone
/// factory, the embedded whisper engine, the command-line synthesizer, and a
/// fresh capability probe.
pub struct OrchestratorBuilder {
    config: VoiceConfig,
    source_factory: Option<SourceFactory>,
    recognizer: Option<Box<dyn NativeRecognizer>>,
    transcriber: Option<Arc<dyn Transcriber>>,
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    capabilities: Option<Capabilities>,
}

impl OrchestratorBuilder {
    pub fn new(config: VoiceConfig) -> Self {
        Self {
            config,
            source_factory: None,
            recognizer: None,
            transcriber: None,
            synthesizer: None,
            capabilities: None,
        }
    }

    /// Use a custom audio source factory instead of the default microphone.
    pub fn with_source_factory(mut self, factory: SourceFactory) -> Self {
        self.source_factory = Some(factory);
        self
    }

    /// Inject the host's native recognition backend.
    pub fn with_recognizer(mut self, recognizer: Box<dyn NativeRecognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    /// Inject the embedded transcription engine.
    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    /// Inject the synthesis backend.
    pub fn with_synthesizer(mut self, synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    /// Inject probed capabilities instead of inspecting the host.
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    pub fn build(self) -> VoiceOrchestrator {
        let transcriber_injected = self.transcriber.is_some();
        let synthesizer_injected = self.synthesizer.is_some();
        let source_factory = self
            .source_factory
            .unwrap_or_else(|| default_source_factory(&self.config));
        VoiceOrchestrator {
            config: self.config,
            status: Arc::new(Mutex::new(ServiceStatus::Initializing)),
            bus: Arc::new(EventBus::new()),
            recording: Arc::new(AtomicBool::new(false)),
            initialized: false,
            capabilities: None,
            injected_capabilities: self.capabilities,
            source_factory,
            recognizer: self.recognizer,
            transcriber: self.transcriber,
            transcriber_injected,
            synthesizer: self.synthesizer,
            synthesizer_injected,
            policy: Arc::new(Mutex::new(FallbackPolicy::default())),
            session: None,
            processing: ProcessingOptions::default(),
        }
    }
}

/// Factory opening the configured microphone at the configured rate.
#[cfg(feature = "cpal-audio")]
fn default_source_factory(config: &VoiceConfig) -> SourceFactory {
    use crate::audio::capture::CpalAudioSource;
    let device = config.audio.device.clone();
    let rate = config.audio.sample_rate;
    Box::new(move || {
        let source = CpalAudioSource::with_sample_rate(device.as_deref(), rate)?;
        Ok(Box::new(source) as Box<dyn AudioSource>)
    })
}

#[cfg(not(feature = "cpal-audio"))]
fn default_source_factory(_config: &VoiceConfig) -> SourceFactory {
    Box::new(|| {
        Err(VoxprepError::AudioCapture {
            message: "built without microphone support (cpal-audio feature)".to_string(),
        })
    })
}

/// The voice service. See the module docs for the threading model.
pub struct VoiceOrchestrator {
    config: VoiceConfig,
    status: Arc<Mutex<ServiceStatus>>,
    bus: Arc<EventBus>,
    recording: Arc<AtomicBool>,
    initialized: bool,
    capabilities: Option<Capabilities>,
    injected_capabilities: Option<Capabilities>,
    source_factory: SourceFactory,
    recognizer: Option<Box<dyn NativeRecognizer>>,
    transcriber: Option<Arc<dyn Transcriber>>,
    transcriber_injected: bool,
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    synthesizer_injected: bool,
    policy: Arc<Mutex<FallbackPolicy>>,
    session: Option<CaptureSession>,
    /// Effective processing options, derived at initialization.
    processing: ProcessingOptions,
}

impl VoiceOrchestrator {
    /// Orchestrator with production collaborators built from `config`.
    pub fn new(config: VoiceConfig) -> Self {
        OrchestratorBuilder::new(config).build()
    }

    pub fn builder(config: VoiceConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    /// Probe the host, construct missing adapters, and become `Ready`.
    ///
    /// Adapter construction degrades gracefully: a missing whisper model or
    /// synthesis engine leaves that path unavailable without failing the
    /// whole initialization. Also the only way out of the `Error` state.
    pub fn initialize(&mut self) -> Result<()> {
        self.set_status(ServiceStatus::Initializing);

        if let Err(e) = self.config.validate() {
            self.set_status(ServiceStatus::Error);
            return Err(e);
        }

        self.processing = effective_processing(&self.config);

        // Warm up the embedded engine while fallback is wanted. Loading the
        // model here keeps stop_recording latency flat later.
        if !self.transcriber_injected {
            self.transcriber = None;
            if self.config.service.enable_embedded_fallback {
                let built = WhisperConfig::from_settings(
                    &self.config.stt,
                    &self.config.service.language,
                )
                .and_then(WhisperTranscriber::new);
                match built {
                    Ok(engine) => self.transcriber = Some(Arc::new(engine)),
                    Err(e) => eprintln!("Warning: embedded engine unavailable: {e}"),
                }
            }
        }

        if !self.synthesizer_injected {
            match CommandSynthesizer::new(&self.config.tts) {
                Ok(engine) => self.synthesizer = Some(Arc::new(engine)),
                Err(e) => {
                    self.synthesizer = None;
                    eprintln!("Warning: speech synthesis unavailable: {e}");
                }
            }
        }

        let caps = self
            .injected_capabilities
            .clone()
            .unwrap_or_else(|| Capabilities::detect(&self.config));
        let native_available = self
            .recognizer
            .as_ref()
            .map(|r| r.is_available())
            .unwrap_or(false);
        self.capabilities = Some(caps.with_native_recognition(native_available));

        self.policy
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .reset();
        self.initialized = true;
        self.set_status(ServiceStatus::Ready);
        Ok(())
    }

    /// Replace the configuration. A language change on an initialized
    /// service re-runs [`initialize`](Self::initialize) so adapters pick up
    /// the new locale. Refused while a recording is active.
    pub fn configure(&mut self, config: VoiceConfig) -> Result<()> {
        if self.recording.load(Ordering::SeqCst) {
            return Err(VoxprepError::Other(
                "cannot reconfigure while recording".to_string(),
            ));
        }
        config.validate()?;
        let language_changed = config.service.language != self.config.service.language;
        self.config = config;
        if self.initialized && language_changed {
            self.initialize()?;
        }
        Ok(())
    }

    /// Start a recording session.
    ///
    /// Returns `Ok(false)` without touching the device when a session is
    /// already running. The native backend is preferred; with it absent the
    /// manual path records for the embedded engine. With neither usable the
    /// service enters `Error` and the call fails.
    pub fn start_recording(&mut self) -> Result<bool> {
        if !self.initialized {
            return Err(VoxprepError::Other(
                "initialize() must be called before recording".to_string(),
            ));
        }
        if self.recording.load(Ordering::SeqCst) {
            return Ok(false);
        }

        // Permission errors surface immediately; there is nothing to retry.
        if self
            .capabilities
            .as_ref()
            .is_some_and(|c| c.microphone_permission == PermissionState::Denied)
        {
            let e = VoxprepError::MicrophonePermission {
                message: "microphone access denied by the host".to_string(),
            };
            self.bus.emit(VoiceEvent::Failed {
                component: Component::Capture,
                message: e.to_string(),
            });
            return Err(e);
        }

        // Live signals decide the backend, not the initialization-time probe.
        let native_usable = self
            .recognizer
            .as_ref()
            .map(|r| r.is_available())
            .unwrap_or(false);
        let embedded_usable = self.config.service.enable_embedded_fallback
            && self
                .transcriber
                .as_ref()
                .map(|t| t.is_ready())
                .unwrap_or(false);

        if !native_usable && !embedded_usable {
            let message = "no recording method available".to_string();
            self.bus.emit(VoiceEvent::Failed {
                component: Component::Capture,
                message: message.clone(),
            });
            self.set_status(ServiceStatus::Error);
            return Err(VoxprepError::BackendUnavailable { message });
        }

        let mut source = match (self.source_factory)() {
            Ok(source) => source,
            Err(e) => {
                self.bus.emit(VoiceEvent::Failed {
                    component: Component::Capture,
                    message: e.to_string(),
                });
                return Err(e);
            }
        };
        if let Err(e) = source.start() {
            self.bus.emit(VoiceEvent::Failed {
                component: Component::Capture,
                message: e.to_string(),
            });
            return Err(e);
        }

        // Native first; a failed begin() degrades to the manual path rather
        // than failing the session.
        let mut session_recognizer: Option<Box<dyn NativeRecognizer>> = None;
        if native_usable {
            if let Some(mut recognizer) = self.recognizer.take() {
                match recognizer.begin(&self.config.service.language) {
                    Ok(()) => session_recognizer = Some(recognizer),
                    Err(e) => {
                        eprintln!("Warning: native recognition failed to start: {e}");
                        self.recognizer = Some(recognizer);
                    }
                }
            }
        }
        if session_recognizer.is_none() && !embedded_usable {
            let _ = source.stop();
            let message = "no recording method available".to_string();
            self.bus.emit(VoiceEvent::Failed {
                component: Component::Capture,
                message: message.clone(),
            });
            self.set_status(ServiceStatus::Error);
            return Err(VoxprepError::BackendUnavailable { message });
        }

        let monitor = self.config.service.enable_quality_monitoring.then(|| {
            QualityMonitor::new(self.config.thresholds, self.config.audio.sample_rate)
        });

        let run = Arc::new(AtomicBool::new(true));
        let (done_tx, done_rx) = bounded(1);
        let context = CaptureContext {
            source,
            recognizer: session_recognizer,
            monitor,
            run: run.clone(),
            bus: self.bus.clone(),
            policy: self.policy.clone(),
            fallback_ready: embedded_usable,
        };
        let handle = thread::spawn(move || run_capture_session(context, done_tx));

        self.session = Some(CaptureSession {
            run,
            handle,
            done_rx,
        });
        self.recording.store(true, Ordering::SeqCst);
        self.set_status(ServiceStatus::Recording);
        Ok(true)
    }

    /// End the active session and deliver its result.
    ///
    /// Idempotent when idle. Joins the capture thread within a bounded
    /// deadline, releases the source, and emits exactly one
    /// `TranscriptionReady` (or the failure that doomed the session) before
    /// returning to `Ready`.
    pub fn stop_recording(&mut self) -> Result<()> {
        if !self.recording.load(Ordering::SeqCst) {
            return Ok(());
        }
        let started = Instant::now();
        self.set_status(ServiceStatus::Processing);

        let end = match self.end_session() {
            Ok(Some(end)) => end,
            Ok(None) => {
                self.set_status(ServiceStatus::Ready);
                return Ok(());
            }
            Err(e) => {
                self.set_status(ServiceStatus::Error);
                return Err(e);
            }
        };

        if end.capture_aborted || end.backend_lost {
            // The capture thread already reported the failure.
            self.set_status(ServiceStatus::Ready);
            return Ok(());
        }

        let metrics = (!end.samples.is_empty())
            .then(|| processing::clip_metrics(&end.samples, self.config.audio.sample_rate));

        match end.method {
            TranscriptionMethod::Native => match end.native_utterance {
                Some(utterance) => {
                    self.deliver_outcome(TranscriptionOutcome {
                        text: utterance.text,
                        confidence: utterance.confidence.clamp(0.0, 1.0),
                        method: TranscriptionMethod::Native,
                        processing_time_ms: started.elapsed().as_millis() as u64,
                        audio_metrics: metrics,
                    });
                }
                None => {
                    // Native finished empty-handed; one more chance on the
                    // batch path before giving up on the session.
                    let rescue = self.config.service.enable_embedded_fallback
                        && self
                            .transcriber
                            .as_ref()
                            .map(|t| t.is_ready())
                            .unwrap_or(false)
                        && self.policy.lock().unwrap_or_else(|e| e.into_inner()).allow();
                    if rescue {
                        self.transcribe_clip(end.samples, metrics, started);
                    } else {
                        self.bus.emit(VoiceEvent::Failed {
                            component: Component::Transcription,
                            message: "no speech recognized".to_string(),
                        });
                        self.set_status(ServiceStatus::Ready);
                    }
                }
            },
            TranscriptionMethod::Embedded => {
                self.transcribe_clip(end.samples, metrics, started);
            }
        }
        Ok(())
    }

    /// Run the captured clip through processing and the embedded engine,
    /// then emit the session's terminal event and return to `Ready`.
    fn transcribe_clip(
        &mut self,
        samples: Vec<i16>,
        metrics: Option<ClipMetrics>,
        started: Instant,
    ) {
        if samples.is_empty() {
            self.bus.emit(VoiceEvent::Failed {
                component: Component::Transcription,
                message: "no audio captured".to_string(),
            });
            self.set_status(ServiceStatus::Ready);
            return;
        }

        if let Some(m) = &metrics
            && !processing::is_quality_acceptable(m)
        {
            self.bus.emit(VoiceEvent::Failed {
                component: Component::Capture,
                message: format!(
                    "captured clip unusable ({:.1}s, peak {:.3}, {:.1} dB SNR)",
                    m.duration_secs, m.peak_amplitude, m.signal_to_noise_db
                ),
            });
            self.set_status(ServiceStatus::Ready);
            return;
        }

        let clip = if self.config.service.enable_audio_processing {
            processing::process_clip(&samples, self.config.audio.sample_rate, &self.processing)
        } else {
            samples
        };

        let Some(transcriber) = self.transcriber.as_ref().filter(|t| t.is_ready()) else {
            self.bus.emit(VoiceEvent::Failed {
                component: Component::Transcription,
                message: "embedded engine not available".to_string(),
            });
            self.set_status(ServiceStatus::Error);
            return;
        };

        match transcriber.transcribe(&clip) {
            Ok(result) => {
                self.deliver_outcome(TranscriptionOutcome {
                    text: result.text,
                    confidence: result.confidence.clamp(0.0, 1.0),
                    method: TranscriptionMethod::Embedded,
                    processing_time_ms: started.elapsed().as_millis() as u64,
                    audio_metrics: metrics,
                });
            }
            Err(e) => {
                self.bus.emit(VoiceEvent::Failed {
                    component: Component::Transcription,
                    message: e.to_string(),
                });
                self.set_status(ServiceStatus::Ready);
            }
        }
    }

    fn deliver_outcome(&mut self, outcome: TranscriptionOutcome) {
        self.policy
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record_success();
        self.bus
            .emit(VoiceEvent::TranscriptionReady { result: outcome });
        self.set_status(ServiceStatus::Ready);
    }

    /// Flip the run flag and collect the session from the capture thread.
    ///
    /// `Ok(None)` when no session was stored; `Err` when the thread missed
    /// the join deadline, in which case it is detached rather than waited on.
    fn end_session(&mut self) -> Result<Option<SessionEnd>> {
        let Some(session) = self.session.take() else {
            self.recording.store(false, Ordering::SeqCst);
            return Ok(None);
        };
        session.run.store(false, Ordering::SeqCst);
        let deadline = Duration::from_millis(defaults::SESSION_JOIN_DEADLINE_MS);
        let outcome = session.done_rx.recv_timeout(deadline);
        self.recording.store(false, Ordering::SeqCst);
        match outcome {
            Ok(mut end) => {
                let _ = session.handle.join();
                if let Some(recognizer) = end.recognizer.take() {
                    self.recognizer = Some(recognizer);
                }
                Ok(Some(end))
            }
            Err(_) => {
                let message = "capture thread did not stop within the deadline".to_string();
                self.bus.emit(VoiceEvent::Failed {
                    component: Component::Capture,
                    message: message.clone(),
                });
                Err(VoxprepError::AudioCapture { message })
            }
        }
    }

    /// Speak `text` with the configured voice, rate, and pitch.
    ///
    /// Returns once synthesis has started. Completion arrives later as a
    /// `TtsComplete` event; synthesis failures never move the service to
    /// `Error`.
    pub fn speak(&self, text: &str) -> Result<()> {
        let Some(synthesizer) = self.synthesizer.as_ref() else {
            return Err(VoxprepError::Synthesis {
                message: "no synthesis backend available".to_string(),
            });
        };

        let mut request = SpeakRequest::from_options(text, &self.config.tts);
        if request.voice.is_none() && self.config.service.auto_select_voice {
            request.voice = synthesizer
                .recommended_voice(&self.config.service.language)
                .map(|v| v.id);
        }

        let start = synthesizer.speak(&request)?;
        set_status_shared(&self.status, &self.bus, ServiceStatus::Speaking);

        let bus = self.bus.clone();
        let status = self.status.clone();
        let recording = self.recording.clone();
        let completion = start.completion;
        thread::spawn(move || {
            let outcome = completion
                .recv()
                .unwrap_or_else(|_| TtsOutcome::failed("synthesis ended without reporting"));
            bus.emit(VoiceEvent::TtsComplete { outcome });
            // Hand the headline status back to whatever is still going on.
            let current = *status.lock().unwrap_or_else(|e| e.into_inner());
            if current == ServiceStatus::Speaking {
                let next = if recording.load(Ordering::SeqCst) {
                    ServiceStatus::Recording
                } else {
                    ServiceStatus::Ready
                };
                set_status_shared(&status, &bus, next);
            }
        });
        Ok(())
    }

    /// Interrupt the current utterance. Safe when nothing is speaking.
    ///
    /// The interrupted utterance still reports through `TtsComplete`, which
    /// is also what moves the status back to `Ready`.
    pub fn stop_speech(&self) {
        if let Some(synthesizer) = self.synthesizer.as_ref() {
            synthesizer.stop();
        }
    }

    /// Speak a canned phrase and wait for its completion event.
    ///
    /// Self-verifies the synthesis path end to end. `language` defaults to
    /// the configured one; returns whether the utterance completed within
    /// the timeout.
    pub fn test_voice(&self, language: Option<&str>) -> Result<bool> {
        let language = language.unwrap_or(&self.config.service.language);
        let phrase = tts::test_phrase(language);
        let events = self.bus.subscribe();
        self.speak(phrase)?;

        let deadline = Duration::from_millis(defaults::TEST_VOICE_TIMEOUT_MS);
        let started = Instant::now();
        while let Some(remaining) = deadline.checked_sub(started.elapsed()) {
            match events.recv_timeout(remaining) {
                Ok(VoiceEvent::TtsComplete { outcome }) => return Ok(outcome.success),
                Ok(_) => continue,
                Err(_) => break,
            }
        }
        Ok(false)
    }

    pub fn get_status(&self) -> StatusReport {
        StatusReport {
            status: *self.status.lock().unwrap_or_else(|e| e.into_inner()),
            is_recording: self.recording.load(Ordering::SeqCst),
            is_speaking: self
                .synthesizer
                .as_ref()
                .map(|s| s.is_speaking())
                .unwrap_or(false),
            capabilities: self.capabilities.clone().unwrap_or_default(),
        }
    }

    /// Register for the typed event stream.
    pub fn subscribe(&self) -> Receiver<VoiceEvent> {
        self.bus.subscribe()
    }

    /// Tear everything down and return to `Ready` from any state.
    ///
    /// Stops speech, discards any active recording without emitting a
    /// result, and releases the source. Join deadlines are honored; a stuck
    /// capture thread is detached instead of waited on.
    pub fn cleanup(&mut self) -> Result<()> {
        self.stop_speech();
        if self.recording.load(Ordering::SeqCst) || self.session.is_some() {
            let _ = self.end_session();
        }
        self.policy
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .reset();
        self.set_status(ServiceStatus::Ready);
        Ok(())
    }

    fn set_status(&self, next: ServiceStatus) {
        set_status_shared(&self.status, &self.bus, next);
    }
}

fn set_status_shared(status: &Mutex<ServiceStatus>, bus: &EventBus, next: ServiceStatus) {
    let mut current = status.lock().unwrap_or_else(|e| e.into_inner());
    if *current != next {
        *current = next;
        bus.emit(VoiceEvent::StatusChanged { status: next });
    }
}

/// Cancel the native session and keep the recognizer for the next one.
fn park_native(
    recognizer: &mut Option<Box<dyn NativeRecognizer>>,
    parked: &mut Option<Box<dyn NativeRecognizer>>,
) {
    if let Some(mut rec) = recognizer.take() {
        rec.abort();
        *parked = Some(rec);
    }
}

/// Processing options for the session: explicit customization wins,
/// otherwise the band is tuned for the configured language.
pub fn effective_processing(config: &VoiceConfig) -> ProcessingOptions {
    if config.processing == ProcessingOptions::default() {
        processing::language_optimized_options(&config.service.language)
    } else {
        config.processing
    }
}

/// Body of the capture thread.
///
/// Polls the source, buffers the session audio, feeds the recognizer and
/// the monitor, and performs in-place backend fallback. Always stops the
/// source and always sends exactly one [`SessionEnd`] before exiting.
fn run_capture_session(context: CaptureContext, done_tx: crossbeam_channel::Sender<SessionEnd>) {
    let CaptureContext {
        mut source,
        mut recognizer,
        mut monitor,
        run,
        bus,
        policy,
        fallback_ready,
    } = context;

    let poll = Duration::from_millis(defaults::CAPTURE_POLL_MS);
    let started_native = recognizer.is_some();
    let mut parked_recognizer: Option<Box<dyn NativeRecognizer>> = None;
    let mut segments: Vec<String> = Vec::new();
    let mut confidence_sum = 0.0f32;
    let mut samples_buf: Vec<i16> = Vec::new();
    let mut method = if started_native {
        TranscriptionMethod::Native
    } else {
        TranscriptionMethod::Embedded
    };
    let mut backend_lost = false;
    let mut capture_aborted = false;
    let mut quality_refusal_reported = false;
    let mut consecutive_read_errors = 0u32;

    while run.load(Ordering::SeqCst) {
        match source.read_samples() {
            Ok(samples) => {
                consecutive_read_errors = 0;
                if samples.is_empty() {
                    if source.is_finite() {
                        break;
                    }
                    thread::sleep(poll);
                    continue;
                }
                samples_buf.extend_from_slice(&samples);

                if let Some(rec) = recognizer.as_deref_mut() {
                    rec.feed(&samples);
                }
                // Drain recognition events outside the feed borrow.
                loop {
                    let Some(event) = recognizer.as_deref_mut().and_then(|r| r.poll_event())
                    else {
                        break;
                    };
                    match event {
                        RecognizerEvent::Interim { .. } => {}
                        RecognizerEvent::Final { text, confidence } => {
                            segments.push(text);
                            confidence_sum += confidence;
                        }
                        RecognizerEvent::End => {
                            // The platform session ended on its own. Flush
                            // the tail and keep capturing; the result is
                            // delivered at stop.
                            if let Some(mut rec) = recognizer.take() {
                                if let Some(utterance) = rec.finish() {
                                    segments.push(utterance.text);
                                    confidence_sum += utterance.confidence;
                                }
                                parked_recognizer = Some(rec);
                            }
                        }
                        RecognizerEvent::Error { kind, message } => {
                            park_native(&mut recognizer, &mut parked_recognizer);
                            if kind.is_permission() {
                                bus.emit(VoiceEvent::Failed {
                                    component: Component::Transcription,
                                    message: format!(
                                        "speech recognition not permitted: {message}"
                                    ),
                                });
                                backend_lost = true;
                            } else if kind.is_transient()
                                && fallback_ready
                                && policy.lock().unwrap_or_else(|e| e.into_inner()).allow()
                            {
                                method = TranscriptionMethod::Embedded;
                                segments.clear();
                                confidence_sum = 0.0;
                            } else {
                                bus.emit(VoiceEvent::Failed {
                                    component: Component::Transcription,
                                    message: format!(
                                        "native recognition failed ({kind}): {message}"
                                    ),
                                });
                                backend_lost = true;
                            }
                        }
                    }
                }

                if let Some(mon) = monitor.as_mut()
                    && let Some(tick) = mon.push_samples(&samples)
                {
                    bus.emit(VoiceEvent::QualityUpdated {
                        status: tick.status,
                        metrics: tick.metrics,
                    });
                    if let Some(reason) = tick.fallback
                        && recognizer.is_some()
                    {
                        if fallback_ready
                            && policy.lock().unwrap_or_else(|e| e.into_inner()).allow()
                        {
                            park_native(&mut recognizer, &mut parked_recognizer);
                            method = TranscriptionMethod::Embedded;
                            segments.clear();
                            confidence_sum = 0.0;
                        } else if !quality_refusal_reported {
                            quality_refusal_reported = true;
                            bus.emit(VoiceEvent::Failed {
                                component: Component::Quality,
                                message: format!("{reason}; fallback attempts exhausted"),
                            });
                        }
                    }
                }
            }
            Err(e) => {
                consecutive_read_errors += 1;
                if consecutive_read_errors >= defaults::MAX_CONSECUTIVE_READ_ERRORS {
                    bus.emit(VoiceEvent::Failed {
                        component: Component::Capture,
                        message: format!("audio source failed repeatedly: {e}"),
                    });
                    capture_aborted = true;
                    break;
                }
                thread::sleep(poll);
            }
        }
    }

    // Session over: flush or cancel the native backend, release the device.
    if let Some(mut rec) = recognizer.take() {
        if capture_aborted {
            rec.abort();
        } else if let Some(utterance) = rec.finish() {
            segments.push(utterance.text);
            confidence_sum += utterance.confidence;
        }
        parked_recognizer = Some(rec);
    }
    let _ = source.stop();

    let native_utterance = if segments.is_empty() {
        None
    } else {
        let confidence = confidence_sum / segments.len() as f32;
        Some(RecognizedUtterance {
            text: segments.join(" "),
            confidence,
        })
    };

    let _ = done_tx.send(SessionEnd {
        samples: samples_buf,
        recognizer: parked_recognizer,
        native_utterance,
        method,
        backend_lost,
        capture_aborted,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::source::MockAudioSource;
    use crate::config::VoiceConfig;
    use crate::probe::Capabilities;
    use crate::stt::{MockNativeRecognizer, MockTranscriber, NativeErrorKind};
    use crate::tts::MockSynthesizer;
    use std::sync::atomic::AtomicUsize;

    const RATE: u32 = 16000;

    /// A clip that passes the acceptance gate: a quiet lead-in followed by
    /// a loud tone, so frame percentiles see a real noise floor.
    fn speech_like_clip() -> Vec<i16> {
        let quiet = (0.3 * RATE as f32) as usize;
        (0..RATE as usize)
            .map(|i| {
                let t = i as f32 / RATE as f32;
                let amplitude = if i < quiet { 0.002 } else { 0.3 };
                let value = amplitude * (std::f32::consts::TAU * 440.0 * t).sin();
                (value * i16::MAX as f32) as i16
            })
            .collect()
    }

    fn base_config() -> VoiceConfig {
        let mut config = VoiceConfig::default();
        // Keep initialize() away from real engine probing in tests.
        config.tts.engine = Some("voxprep-test-no-such-engine".to_string());
        config
    }

    fn chunked(clip: Vec<i16>, chunk: usize) -> Vec<Vec<i16>> {
        clip.chunks(chunk).map(|c| c.to_vec()).collect()
    }

    fn mock_factory(source: MockAudioSource) -> SourceFactory {
        let slot = Mutex::new(Some(source));
        Box::new(move || {
            let source = slot
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take()
                .expect("factory called more than once");
            Ok(Box::new(source) as Box<dyn AudioSource>)
        })
    }

    fn counting_factory(source: MockAudioSource, counter: Arc<AtomicUsize>) -> SourceFactory {
        let slot = Mutex::new(Some(source));
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let source = slot
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take()
                .expect("factory called more than once");
            Ok(Box::new(source) as Box<dyn AudioSource>)
        })
    }

    fn drain(rx: &Receiver<VoiceEvent>) -> Vec<VoiceEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn transcription_results(events: &[VoiceEvent]) -> Vec<&TranscriptionOutcome> {
        events
            .iter()
            .filter_map(|e| match e {
                VoiceEvent::TranscriptionReady { result } => Some(result),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_fallback_policy_bounded() {
        let mut policy = FallbackPolicy::new(2);
        assert!(policy.allow());
        assert!(policy.allow());
        assert!(!policy.allow());
        assert_eq!(policy.attempts(), 2);
    }

    #[test]
    fn test_fallback_policy_success_resets() {
        let mut policy = FallbackPolicy::new(2);
        assert!(policy.allow());
        policy.record_success();
        assert_eq!(policy.attempts(), 0);
        assert!(policy.allow());
        assert!(policy.allow());
        assert!(!policy.allow());
        policy.reset();
        assert!(policy.allow());
    }

    #[test]
    fn test_service_status_serializes_snake_case() {
        let json = serde_json::to_string(&ServiceStatus::Recording).unwrap();
        assert_eq!(json, "\"recording\"");
        let method = serde_json::to_string(&TranscriptionMethod::Embedded).unwrap();
        assert_eq!(method, "\"embedded\"");
    }

    #[test]
    fn test_effective_processing_tunes_for_tonal_language() {
        let mut config = VoiceConfig::default();
        config.service.language = "zh-CN".to_string();
        let options = effective_processing(&config);
        assert_eq!(options.highpass_hz, defaults::TONAL_HIGHPASS_HZ);

        // Explicit customization wins over language tuning.
        config.processing.highpass_hz = 120.0;
        let options = effective_processing(&config);
        assert_eq!(options.highpass_hz, 120.0);
    }

    #[test]
    fn test_initialize_reaches_ready_and_emits_lifecycle() {
        let mut orchestrator = VoiceOrchestrator::builder(base_config())
            .with_capabilities(Capabilities::default())
            .with_transcriber(Arc::new(MockTranscriber::new("base")))
            .with_synthesizer(Arc::new(MockSynthesizer::new()))
            .build();
        let events = orchestrator.subscribe();

        orchestrator.initialize().expect("initialize should succeed");

        assert_eq!(orchestrator.get_status().status, ServiceStatus::Ready);
        let statuses: Vec<_> = drain(&events)
            .into_iter()
            .filter_map(|e| match e {
                VoiceEvent::StatusChanged { status } => Some(status),
                _ => None,
            })
            .collect();
        assert_eq!(statuses, vec![ServiceStatus::Ready]);
    }

    #[test]
    fn test_initialize_rejects_invalid_config() {
        let mut config = base_config();
        config.audio.sample_rate = 0;
        let mut orchestrator = VoiceOrchestrator::builder(config)
            .with_capabilities(Capabilities::default())
            .with_transcriber(Arc::new(MockTranscriber::new("base")))
            .with_synthesizer(Arc::new(MockSynthesizer::new()))
            .build();

        assert!(orchestrator.initialize().is_err());
        assert_eq!(orchestrator.get_status().status, ServiceStatus::Error);
    }

    #[test]
    fn test_start_recording_requires_initialize() {
        let mut orchestrator = VoiceOrchestrator::builder(base_config())
            .with_source_factory(mock_factory(MockAudioSource::new()))
            .with_transcriber(Arc::new(MockTranscriber::new("base")))
            .build();
        assert!(orchestrator.start_recording().is_err());
    }

    #[test]
    fn test_native_session_delivers_single_result() {
        let recognizer = MockNativeRecognizer::new().with_events([RecognizerEvent::Final {
            text: "hello world".to_string(),
            confidence: 0.92,
        }]);
        let source = MockAudioSource::new().with_chunks(chunked(speech_like_clip(), 1600));
        let mut orchestrator = VoiceOrchestrator::builder(base_config())
            .with_capabilities(Capabilities::default())
            .with_source_factory(mock_factory(source))
            .with_recognizer(Box::new(recognizer))
            .with_transcriber(Arc::new(MockTranscriber::new("base")))
            .with_synthesizer(Arc::new(MockSynthesizer::new()))
            .build();
        orchestrator.initialize().unwrap();
        let events = orchestrator.subscribe();

        assert!(orchestrator.start_recording().unwrap());
        assert_eq!(orchestrator.get_status().status, ServiceStatus::Recording);
        assert!(orchestrator.get_status().is_recording);

        thread::sleep(Duration::from_millis(120));
        orchestrator.stop_recording().unwrap();

        let events = drain(&events);
        let results = transcription_results(&events);
        assert_eq!(results.len(), 1, "events: {events:?}");
        assert_eq!(results[0].text, "hello world");
        assert_eq!(results[0].method, TranscriptionMethod::Native);
        assert!((results[0].confidence - 0.92).abs() < 1e-6);
        assert!(results[0].audio_metrics.is_some());
        assert_eq!(orchestrator.get_status().status, ServiceStatus::Ready);
        assert!(!orchestrator.get_status().is_recording);
    }

    #[test]
    fn test_native_segments_are_joined() {
        let recognizer = MockNativeRecognizer::new().with_events([
            RecognizerEvent::Interim {
                text: "tell me".to_string(),
            },
            RecognizerEvent::Final {
                text: "tell me about".to_string(),
                confidence: 0.9,
            },
            RecognizerEvent::Final {
                text: "your experience".to_string(),
                confidence: 0.8,
            },
        ]);
        let source = MockAudioSource::new().with_chunks(chunked(speech_like_clip(), 1600));
        let mut orchestrator = VoiceOrchestrator::builder(base_config())
            .with_capabilities(Capabilities::default())
            .with_source_factory(mock_factory(source))
            .with_recognizer(Box::new(recognizer))
            .with_transcriber(Arc::new(MockTranscriber::new("base")))
            .with_synthesizer(Arc::new(MockSynthesizer::new()))
            .build();
        orchestrator.initialize().unwrap();
        let events = orchestrator.subscribe();

        assert!(orchestrator.start_recording().unwrap());
        thread::sleep(Duration::from_millis(120));
        orchestrator.stop_recording().unwrap();

        let events = drain(&events);
        let results = transcription_results(&events);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "tell me about your experience");
        assert!((results[0].confidence - 0.85).abs() < 1e-3);
    }

    #[test]
    fn test_double_start_returns_false_without_second_source() {
        let counter = Arc::new(AtomicUsize::new(0));
        let source = MockAudioSource::new().with_chunks(chunked(speech_like_clip(), 1600));
        let mut orchestrator = VoiceOrchestrator::builder(base_config())
            .with_capabilities(Capabilities::default())
            .with_source_factory(counting_factory(source, counter.clone()))
            .with_recognizer(Box::new(
                MockNativeRecognizer::new().with_utterance("ok", 0.9),
            ))
            .with_transcriber(Arc::new(MockTranscriber::new("base")))
            .with_synthesizer(Arc::new(MockSynthesizer::new()))
            .build();
        orchestrator.initialize().unwrap();

        assert!(orchestrator.start_recording().unwrap());
        assert!(!orchestrator.start_recording().unwrap());
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        orchestrator.stop_recording().unwrap();
    }

    #[test]
    fn test_stop_when_idle_is_a_noop() {
        let mut orchestrator = VoiceOrchestrator::builder(base_config())
            .with_capabilities(Capabilities::default())
            .with_transcriber(Arc::new(MockTranscriber::new("base")))
            .with_synthesizer(Arc::new(MockSynthesizer::new()))
            .build();
        orchestrator.initialize().unwrap();
        let events = orchestrator.subscribe();

        orchestrator.stop_recording().expect("idle stop should be fine");

        assert_eq!(orchestrator.get_status().status, ServiceStatus::Ready);
        assert!(drain(&events).is_empty());
    }

    #[test]
    fn test_embedded_manual_path_when_native_unavailable() {
        let source = MockAudioSource::new().with_chunks(chunked(speech_like_clip(), 1600));
        let mut orchestrator = VoiceOrchestrator::builder(base_config())
            .with_capabilities(Capabilities::default())
            .with_source_factory(mock_factory(source))
            .with_recognizer(Box::new(MockNativeRecognizer::unavailable()))
            .with_transcriber(Arc::new(
                MockTranscriber::new("base").with_response("manual path works"),
            ))
            .with_synthesizer(Arc::new(MockSynthesizer::new()))
            .build();
        orchestrator.initialize().unwrap();
        let events = orchestrator.subscribe();

        assert!(orchestrator.start_recording().unwrap());
        thread::sleep(Duration::from_millis(120));
        orchestrator.stop_recording().unwrap();

        let events = drain(&events);
        let results = transcription_results(&events);
        assert_eq!(results.len(), 1, "events: {events:?}");
        assert_eq!(results[0].text, "manual path works");
        assert_eq!(results[0].method, TranscriptionMethod::Embedded);
    }

    #[test]
    fn test_no_backend_moves_to_error() {
        let mut config = base_config();
        config.service.enable_embedded_fallback = false;
        let mut orchestrator = VoiceOrchestrator::builder(config)
            .with_capabilities(Capabilities::default())
            .with_source_factory(mock_factory(MockAudioSource::new()))
            .with_recognizer(Box::new(MockNativeRecognizer::unavailable()))
            .with_synthesizer(Arc::new(MockSynthesizer::new()))
            .build();
        orchestrator.initialize().unwrap();
        let events = orchestrator.subscribe();

        let err = orchestrator.start_recording().unwrap_err();
        assert!(matches!(err, VoxprepError::BackendUnavailable { .. }));
        assert_eq!(orchestrator.get_status().status, ServiceStatus::Error);
        assert!(drain(&events).iter().any(|e| matches!(
            e,
            VoiceEvent::Failed { message, .. } if message == "no recording method available"
        )));

        // Error is recoverable only through initialize().
        orchestrator.initialize().unwrap();
        assert_eq!(orchestrator.get_status().status, ServiceStatus::Ready);
    }

    #[test]
    fn test_transient_native_error_falls_back_to_embedded() {
        let recognizer = MockNativeRecognizer::new().with_events([RecognizerEvent::Error {
            kind: NativeErrorKind::NoSpeech,
            message: "no speech detected".to_string(),
        }]);
        let source = MockAudioSource::new().with_chunks(chunked(speech_like_clip(), 1600));
        let mut orchestrator = VoiceOrchestrator::builder(base_config())
            .with_capabilities(Capabilities::default())
            .with_source_factory(mock_factory(source))
            .with_recognizer(Box::new(recognizer))
            .with_transcriber(Arc::new(
                MockTranscriber::new("base").with_response("rescued by fallback"),
            ))
            .with_synthesizer(Arc::new(MockSynthesizer::new()))
            .build();
        orchestrator.initialize().unwrap();
        let events = orchestrator.subscribe();

        assert!(orchestrator.start_recording().unwrap());
        thread::sleep(Duration::from_millis(120));
        assert_eq!(
            orchestrator.get_status().status,
            ServiceStatus::Recording,
            "fallback must not leave the recording state"
        );
        orchestrator.stop_recording().unwrap();

        let events = drain(&events);
        let results = transcription_results(&events);
        assert_eq!(results.len(), 1, "events: {events:?}");
        assert_eq!(results[0].text, "rescued by fallback");
        assert_eq!(results[0].method, TranscriptionMethod::Embedded);
    }

    #[test]
    fn test_permission_error_fails_without_fallback() {
        let recognizer = MockNativeRecognizer::new().with_events([RecognizerEvent::Error {
            kind: NativeErrorKind::NotAllowed,
            message: "recognition denied by user".to_string(),
        }]);
        let source = MockAudioSource::new().with_chunks(chunked(speech_like_clip(), 1600));
        let mut orchestrator = VoiceOrchestrator::builder(base_config())
            .with_capabilities(Capabilities::default())
            .with_source_factory(mock_factory(source))
            .with_recognizer(Box::new(recognizer))
            .with_transcriber(Arc::new(MockTranscriber::new("base")))
            .with_synthesizer(Arc::new(MockSynthesizer::new()))
            .build();
        orchestrator.initialize().unwrap();
        let events = orchestrator.subscribe();

        assert!(orchestrator.start_recording().unwrap());
        thread::sleep(Duration::from_millis(120));
        orchestrator.stop_recording().unwrap();

        let events = drain(&events);
        assert!(transcription_results(&events).is_empty());
        assert!(events.iter().any(|e| matches!(
            e,
            VoiceEvent::Failed { component: Component::Transcription, message }
                if message.contains("not permitted")
        )));
        assert_eq!(orchestrator.get_status().status, ServiceStatus::Ready);
    }

    #[test]
    fn test_denied_microphone_permission_blocks_session_start() {
        let mut caps = Capabilities::default();
        caps.microphone_permission = PermissionState::Denied;
        let mut orchestrator = VoiceOrchestrator::builder(base_config())
            .with_capabilities(caps)
            .with_transcriber(Arc::new(MockTranscriber::new("base")))
            .with_synthesizer(Arc::new(MockSynthesizer::new()))
            .build();
        orchestrator.initialize().unwrap();
        let events = orchestrator.subscribe();

        let err = orchestrator.start_recording().unwrap_err();
        assert!(matches!(err, VoxprepError::MicrophonePermission { .. }));
        assert!(!orchestrator.get_status().is_recording);

        let events = drain(&events);
        assert!(events.iter().any(|e| matches!(
            e,
            VoiceEvent::Failed { component: Component::Capture, message }
                if message.contains("denied")
        )));
        // The service stays Ready; only the session start is refused.
        assert_eq!(orchestrator.get_status().status, ServiceStatus::Ready);
    }

    #[test]
    fn test_native_empty_result_rescued_at_stop() {
        // Native runs cleanly but never produces a final segment; the batch
        // path gets the clip instead.
        let source = MockAudioSource::new().with_chunks(chunked(speech_like_clip(), 1600));
        let mut orchestrator = VoiceOrchestrator::builder(base_config())
            .with_capabilities(Capabilities::default())
            .with_source_factory(mock_factory(source))
            .with_recognizer(Box::new(MockNativeRecognizer::new()))
            .with_transcriber(Arc::new(
                MockTranscriber::new("base").with_response("batch rescue"),
            ))
            .with_synthesizer(Arc::new(MockSynthesizer::new()))
            .build();
        orchestrator.initialize().unwrap();
        let events = orchestrator.subscribe();

        assert!(orchestrator.start_recording().unwrap());
        thread::sleep(Duration::from_millis(120));
        orchestrator.stop_recording().unwrap();

        let events = drain(&events);
        let results = transcription_results(&events);
        assert_eq!(results.len(), 1, "events: {events:?}");
        assert_eq!(results[0].text, "batch rescue");
        assert_eq!(results[0].method, TranscriptionMethod::Embedded);
    }

    #[test]
    fn test_unusable_clip_is_gated() {
        // Pure silence: fails the acceptance gate, engine never sees it.
        let source = MockAudioSource::new().with_chunks(vec![vec![0i16; 16000]]);
        let mut orchestrator = VoiceOrchestrator::builder(base_config())
            .with_capabilities(Capabilities::default())
            .with_source_factory(mock_factory(source))
            .with_transcriber(Arc::new(
                MockTranscriber::new("base").with_response("should not appear"),
            ))
            .with_synthesizer(Arc::new(MockSynthesizer::new()))
            .build();
        orchestrator.initialize().unwrap();
        let events = orchestrator.subscribe();

        assert!(orchestrator.start_recording().unwrap());
        thread::sleep(Duration::from_millis(120));
        orchestrator.stop_recording().unwrap();

        let events = drain(&events);
        assert!(transcription_results(&events).is_empty());
        assert!(events.iter().any(|e| matches!(
            e,
            VoiceEvent::Failed { component: Component::Capture, message }
                if message.contains("unusable")
        )));
        assert_eq!(orchestrator.get_status().status, ServiceStatus::Ready);
    }

    #[test]
    fn test_engine_failure_surfaces_without_result() {
        let source = MockAudioSource::new().with_chunks(chunked(speech_like_clip(), 1600));
        // Ready at session start, then fails on transcribe.
        struct FlakyTranscriber;
        impl Transcriber for FlakyTranscriber {
            fn transcribe(&self, _audio: &[i16]) -> Result<crate::stt::EngineResult> {
                Err(VoxprepError::TranscriptionInferenceFailed {
                    message: "decoder exploded".to_string(),
                })
            }
            fn model_name(&self) -> &str {
                "flaky"
            }
            fn is_ready(&self) -> bool {
                true
            }
        }
        let mut orchestrator = VoiceOrchestrator::builder(base_config())
            .with_capabilities(Capabilities::default())
            .with_source_factory(mock_factory(source))
            .with_transcriber(Arc::new(FlakyTranscriber))
            .with_synthesizer(Arc::new(MockSynthesizer::new()))
            .build();
        orchestrator.initialize().unwrap();
        let events = orchestrator.subscribe();

        assert!(orchestrator.start_recording().unwrap());
        thread::sleep(Duration::from_millis(120));
        orchestrator.stop_recording().unwrap();

        let events = drain(&events);
        assert!(transcription_results(&events).is_empty());
        assert!(events.iter().any(|e| matches!(
            e,
            VoiceEvent::Failed { component: Component::Transcription, message }
                if message.contains("decoder exploded")
        )));
        assert_eq!(orchestrator.get_status().status, ServiceStatus::Ready);
    }

    #[test]
    fn test_source_start_failure_surfaces() {
        let source = MockAudioSource::new()
            .with_start_failure()
            .with_error_message("device is busy");
        let mut orchestrator = VoiceOrchestrator::builder(base_config())
            .with_capabilities(Capabilities::default())
            .with_source_factory(mock_factory(source))
            .with_transcriber(Arc::new(MockTranscriber::new("base")))
            .with_synthesizer(Arc::new(MockSynthesizer::new()))
            .build();
        orchestrator.initialize().unwrap();
        let events = orchestrator.subscribe();

        assert!(orchestrator.start_recording().is_err());
        assert!(!orchestrator.get_status().is_recording);
        assert!(drain(&events).iter().any(|e| matches!(
            e,
            VoiceEvent::Failed { component: Component::Capture, message }
                if message.contains("device is busy")
        )));
    }

    #[test]
    fn test_cleanup_discards_active_session() {
        let source = MockAudioSource::new().with_chunks(chunked(speech_like_clip(), 1600));
        let mut orchestrator = VoiceOrchestrator::builder(base_config())
            .with_capabilities(Capabilities::default())
            .with_source_factory(mock_factory(source))
            .with_recognizer(Box::new(
                MockNativeRecognizer::new().with_utterance("discarded", 0.9),
            ))
            .with_transcriber(Arc::new(MockTranscriber::new("base")))
            .with_synthesizer(Arc::new(MockSynthesizer::new()))
            .build();
        orchestrator.initialize().unwrap();
        let events = orchestrator.subscribe();

        assert!(orchestrator.start_recording().unwrap());
        thread::sleep(Duration::from_millis(60));
        orchestrator.cleanup().unwrap();

        assert!(transcription_results(&drain(&events)).is_empty());
        assert_eq!(orchestrator.get_status().status, ServiceStatus::Ready);
        assert!(!orchestrator.get_status().is_recording);
    }

    #[test]
    fn test_recording_survives_speak_status_changes() {
        let source = MockAudioSource::new().with_chunks(chunked(speech_like_clip(), 1600));
        let synthesizer = Arc::new(MockSynthesizer::new());
        let mut orchestrator = VoiceOrchestrator::builder(base_config())
            .with_capabilities(Capabilities::default())
            .with_source_factory(mock_factory(source))
            .with_recognizer(Box::new(
                MockNativeRecognizer::new().with_utterance("still here", 0.9),
            ))
            .with_transcriber(Arc::new(MockTranscriber::new("base")))
            .with_synthesizer(synthesizer)
            .build();
        orchestrator.initialize().unwrap();

        assert!(orchestrator.start_recording().unwrap());
        orchestrator.speak("answer recorded").unwrap();
        thread::sleep(Duration::from_millis(120));

        // Still recording even though speaking toggled the headline status.
        assert!(orchestrator.get_status().is_recording);
        orchestrator.stop_recording().unwrap();
        assert!(!orchestrator.get_status().is_recording);
    }

    #[test]
    fn test_speak_emits_completion_event() {
        let synthesizer = Arc::new(MockSynthesizer::new());
        let mut orchestrator = VoiceOrchestrator::builder(base_config())
            .with_capabilities(Capabilities::default())
            .with_transcriber(Arc::new(MockTranscriber::new("base")))
            .with_synthesizer(synthesizer.clone())
            .build();
        orchestrator.initialize().unwrap();
        let events = orchestrator.subscribe();

        orchestrator.speak("hello there").unwrap();

        let outcome = wait_for_tts(&events);
        assert!(outcome.success);
        let requests = synthesizer.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].text, "hello there");
    }

    #[test]
    fn test_speak_auto_selects_voice_for_language() {
        let mut config = base_config();
        config.service.language = "es-ES".to_string();
        let synthesizer = Arc::new(MockSynthesizer::new());
        let mut orchestrator = VoiceOrchestrator::builder(config)
            .with_capabilities(Capabilities::default())
            .with_transcriber(Arc::new(MockTranscriber::new("base")))
            .with_synthesizer(synthesizer.clone())
            .build();
        orchestrator.initialize().unwrap();

        orchestrator.speak("hola").unwrap();

        let requests = synthesizer.requests();
        assert_eq!(requests.len(), 1);
        // The default mock voice set carries a Spanish voice.
        assert_eq!(requests[0].voice.as_deref(), Some("es"));
    }

    #[test]
    fn test_speak_without_backend_errors() {
        let mut orchestrator = VoiceOrchestrator::builder(base_config())
            .with_capabilities(Capabilities::default())
            .with_transcriber(Arc::new(MockTranscriber::new("base")))
            .build();
        orchestrator.initialize().unwrap();

        // The configured engine does not exist, so no synthesizer came up.
        let err = orchestrator.speak("anyone there?").unwrap_err();
        assert!(matches!(
            err,
            VoxprepError::Synthesis { .. } | VoxprepError::SynthesisEngineNotFound { .. }
        ));
        assert_ne!(orchestrator.get_status().status, ServiceStatus::Error);
    }

    #[test]
    fn test_test_voice_waits_for_completion() {
        let synthesizer = Arc::new(MockSynthesizer::new());
        let mut orchestrator = VoiceOrchestrator::builder(base_config())
            .with_capabilities(Capabilities::default())
            .with_transcriber(Arc::new(MockTranscriber::new("base")))
            .with_synthesizer(synthesizer.clone())
            .build();
        orchestrator.initialize().unwrap();

        assert!(orchestrator.test_voice(Some("fr-FR")).unwrap());
        let requests = synthesizer.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].text, tts::test_phrase("fr"));
    }

    #[test]
    fn test_configure_language_change_reinitializes() {
        let mut orchestrator = VoiceOrchestrator::builder(base_config())
            .with_capabilities(Capabilities::default())
            .with_transcriber(Arc::new(MockTranscriber::new("base")))
            .with_synthesizer(Arc::new(MockSynthesizer::new()))
            .build();
        orchestrator.initialize().unwrap();
        let events = orchestrator.subscribe();

        let mut config = base_config();
        config.service.language = "de-DE".to_string();
        orchestrator.configure(config).unwrap();

        let statuses: Vec<_> = drain(&events)
            .into_iter()
            .filter_map(|e| match e {
                VoiceEvent::StatusChanged { status } => Some(status),
                _ => None,
            })
            .collect();
        assert_eq!(
            statuses,
            vec![ServiceStatus::Initializing, ServiceStatus::Ready]
        );
    }

    #[test]
    fn test_configure_same_language_does_not_reinitialize() {
        let mut orchestrator = VoiceOrchestrator::builder(base_config())
            .with_capabilities(Capabilities::default())
            .with_transcriber(Arc::new(MockTranscriber::new("base")))
            .with_synthesizer(Arc::new(MockSynthesizer::new()))
            .build();
        orchestrator.initialize().unwrap();
        let events = orchestrator.subscribe();

        let mut config = base_config();
        config.service.enable_audio_processing = false;
        orchestrator.configure(config).unwrap();

        assert!(drain(&events).is_empty());
    }

    #[test]
    fn test_configure_refused_while_recording() {
        let source = MockAudioSource::new().with_chunks(chunked(speech_like_clip(), 1600));
        let mut orchestrator = VoiceOrchestrator::builder(base_config())
            .with_capabilities(Capabilities::default())
            .with_source_factory(mock_factory(source))
            .with_transcriber(Arc::new(MockTranscriber::new("base")))
            .with_synthesizer(Arc::new(MockSynthesizer::new()))
            .build();
        orchestrator.initialize().unwrap();

        assert!(orchestrator.start_recording().unwrap());
        assert!(orchestrator.configure(base_config()).is_err());
        orchestrator.stop_recording().unwrap();
    }

    #[test]
    fn test_status_report_includes_capabilities() {
        let caps = Capabilities::default();
        let mut orchestrator = VoiceOrchestrator::builder(base_config())
            .with_capabilities(caps)
            .with_recognizer(Box::new(MockNativeRecognizer::new()))
            .with_transcriber(Arc::new(MockTranscriber::new("base")))
            .with_synthesizer(Arc::new(MockSynthesizer::new()))
            .build();
        orchestrator.initialize().unwrap();

        let report = orchestrator.get_status();
        assert!(report.capabilities.native_recognition.available);
        assert!(!report.is_recording);
        assert!(!report.is_speaking);
    }

    fn wait_for_tts(rx: &Receiver<VoiceEvent>) -> TtsOutcome {
        let deadline = Duration::from_secs(2);
        let started = Instant::now();
        while started.elapsed() < deadline {
            if let Ok(event) = rx.recv_timeout(Duration::from_millis(50))
                && let VoiceEvent::TtsComplete { outcome } = event
            {
                return outcome;
            }
        }
        panic!("no TtsComplete event arrived");
    }
}
