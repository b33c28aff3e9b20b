//! Speech synthesis through system TTS engines.
//!
//! [`SpeechSynthesizer`] is the seam: the orchestrator speaks through it and
//! never learns which engine sits behind. [`CommandSynthesizer`] drives a
//! system engine (espeak-ng, espeak, spd-say, or macOS `say`) as a child
//! process; a watcher thread reaps the child and delivers the [`TtsOutcome`]
//! over a channel so `speak` can return at synthesis start.
//!
//! Synthesis failures are carried inside `TtsOutcome::error` and never take
//! the service down.

use crate::error::{Result, VoxprepError};
use crossbeam_channel::{Receiver, bounded};
use serde::{Deserialize, Serialize};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Engines tried in order when none is configured.
const ENGINE_CANDIDATES: &[&str] = &["espeak-ng", "espeak", "spd-say", "say"];

/// Cadence for the watcher thread checking whether the child exited.
const REAP_POLL: Duration = Duration::from_millis(20);

/// Baseline speaking rate in words per minute (the espeak default); the
/// configured rate is a multiplier against this.
const BASE_RATE_WPM: f32 = 175.0;

/// Synthesis options, loaded from the `[tts]` config section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TtsOptions {
    /// Engine command to use; `None` picks the first one installed.
    pub engine: Option<String>,
    /// Default voice identifier; `None` lets the engine or the
    /// language-based selection decide.
    pub voice: Option<String>,
    /// Speaking rate multiplier, 0.25..=4.0.
    pub rate: f32,
    /// Pitch multiplier, 0.5..=2.0.
    pub pitch: f32,
}

impl Default for TtsOptions {
    fn default() -> Self {
        Self {
            engine: None,
            voice: None,
            rate: 1.0,
            pitch: 1.0,
        }
    }
}

/// One installed synthesis voice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voice {
    /// Identifier the engine accepts for voice selection.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Language tag the voice speaks (engine-reported, e.g. "en-us").
    pub language: String,
    /// Whether the engine considers this its default voice.
    pub is_default: bool,
}

impl Voice {
    pub fn new(id: &str, name: &str, language: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            language: language.to_string(),
            is_default: false,
        }
    }
}

/// One utterance to synthesize.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakRequest {
    pub text: String,
    /// Voice identifier override; `None` uses the configured default.
    pub voice: Option<String>,
    pub rate: f32,
    pub pitch: f32,
}

impl SpeakRequest {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            voice: None,
            rate: 1.0,
            pitch: 1.0,
        }
    }

    /// Build a request carrying the configured voice, rate, and pitch.
    pub fn from_options(text: &str, options: &TtsOptions) -> Self {
        Self {
            text: text.to_string(),
            voice: options.voice.clone(),
            rate: options.rate,
            pitch: options.pitch,
        }
    }
}

/// How an utterance ended. Delivered on the completion channel and forwarded
/// to hosts as a `TtsComplete` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtsOutcome {
    pub success: bool,
    pub duration_ms: Option<u64>,
    pub voice: Option<String>,
    pub error: Option<String>,
}

impl TtsOutcome {
    pub fn completed(duration_ms: u64, voice: Option<String>) -> Self {
        Self {
            success: true,
            duration_ms: Some(duration_ms),
            voice,
            error: None,
        }
    }

    pub fn failed(error: &str) -> Self {
        Self {
            success: false,
            duration_ms: None,
            voice: None,
            error: Some(error.to_string()),
        }
    }
}

/// Handed back by [`SpeechSynthesizer::speak`] once synthesis has started.
///
/// The outcome arrives on `completion` when the utterance finishes, is
/// stopped, or fails.
#[derive(Debug)]
pub struct SpeakStart {
    /// Voice actually requested from the engine, if any.
    pub voice: Option<String>,
    pub completion: Receiver<TtsOutcome>,
}

/// Trait for speech synthesis backends.
pub trait SpeechSynthesizer: Send + Sync {
    /// List the installed voices. Empty when the engine cannot enumerate.
    fn voices(&self) -> Vec<Voice>;

    /// Start speaking. Returns once synthesis has begun; completion is
    /// delivered on the [`SpeakStart`] channel. Starting a new utterance
    /// stops the current one.
    fn speak(&self, request: &SpeakRequest) -> Result<SpeakStart>;

    /// Stop the current utterance. Safe to call when idle.
    fn stop(&self);

    /// Whether an utterance is currently being spoken.
    fn is_speaking(&self) -> bool;

    /// Pick the best voice for a language tag, preferring an exact match,
    /// then the primary subtag, then the engine default. `None` only when no
    /// voices exist at all.
    fn recommended_voice(&self, language: &str) -> Option<Voice> {
        select_voice(&self.voices(), language)
    }
}

/// Canned phrase used by voice tests, keyed by the primary language subtag.
pub fn test_phrase(language: &str) -> &'static str {
    let primary = language
        .split(['-', '_'])
        .next()
        .unwrap_or(language)
        .to_ascii_lowercase();
    match primary.as_str() {
        "es" => "Hola, esta es una prueba del sistema de voz.",
        "fr" => "Bonjour, ceci est un test du système vocal.",
        "de" => "Hallo, dies ist ein Test des Sprachsystems.",
        "it" => "Ciao, questo è un test del sistema vocale.",
        "pt" => "Olá, este é um teste do sistema de voz.",
        "zh" => "你好，这是语音系统测试。",
        "ja" => "こんにちは、これは音声システムのテストです。",
        "ko" => "안녕하세요, 음성 시스템 테스트입니다.",
        "hi" => "नमस्ते, यह वॉयस सिस्टम का परीक्षण है।",
        _ => "Hello, this is a test of the voice system.",
    }
}

/// Language-tag voice selection: exact match, then primary subtag, then the
/// engine default, then the first voice.
pub fn select_voice(voices: &[Voice], language: &str) -> Option<Voice> {
    if voices.is_empty() {
        return None;
    }

    let wanted = normalize_tag(language);
    if let Some(voice) = voices.iter().find(|v| normalize_tag(&v.language) == wanted) {
        return Some(voice.clone());
    }

    let primary = primary_subtag(language);
    if let Some(voice) = voices
        .iter()
        .find(|v| primary_subtag(&v.language) == primary)
    {
        return Some(voice.clone());
    }

    voices
        .iter()
        .find(|v| v.is_default)
        .or_else(|| voices.first())
        .cloned()
}

fn normalize_tag(tag: &str) -> String {
    tag.replace('_', "-").to_ascii_lowercase()
}

fn primary_subtag(tag: &str) -> String {
    tag.split(['-', '_'])
        .next()
        .unwrap_or(tag)
        .to_ascii_lowercase()
}

/// Check whether a TTS engine answers on this host.
pub fn engine_available(engine: &str) -> bool {
    let result = match engine {
        // `say` has no --version; listing voices is the cheap probe.
        "say" => Command::new(engine).args(["-v", "?"]).output(),
        _ => Command::new(engine).arg("--version").output(),
    };
    matches!(result, Ok(output) if output.status.success())
}

/// Find the first installed engine from the candidate list.
pub fn detect_engine() -> Option<String> {
    ENGINE_CANDIDATES
        .iter()
        .find(|engine| engine_available(engine))
        .map(|engine| engine.to_string())
}

/// Build the argument list for one utterance on the given engine.
///
/// Rate and pitch multipliers are mapped onto each engine's own scale:
/// espeak speaks in words per minute (default 175, pitch 0-99 around 50),
/// spd-say in -100..=100 offsets, `say` in words per minute only.
fn speak_args(engine: &str, request: &SpeakRequest) -> Vec<String> {
    let mut args = Vec::new();
    match engine {
        "spd-say" => {
            // -w ties the process lifetime to the utterance so reaping the
            // child means the speech is over.
            args.push("-w".to_string());
            let rate = ((request.rate - 1.0) * 100.0).round().clamp(-100.0, 100.0);
            args.push("-r".to_string());
            args.push(format!("{}", rate as i32));
            let pitch = ((request.pitch - 1.0) * 100.0).round().clamp(-100.0, 100.0);
            args.push("-p".to_string());
            args.push(format!("{}", pitch as i32));
            if let Some(voice) = &request.voice {
                args.push("-y".to_string());
                args.push(voice.clone());
            }
        }
        "say" => {
            let wpm = (BASE_RATE_WPM * request.rate).round().clamp(80.0, 500.0);
            args.push("-r".to_string());
            args.push(format!("{}", wpm as i32));
            if let Some(voice) = &request.voice {
                args.push("-v".to_string());
                args.push(voice.clone());
            }
        }
        // espeak-ng and espeak share flags.
        _ => {
            let wpm = (BASE_RATE_WPM * request.rate).round().clamp(80.0, 500.0);
            args.push("-s".to_string());
            args.push(format!("{}", wpm as i32));
            let pitch = (50.0 * request.pitch).round().clamp(0.0, 99.0);
            args.push("-p".to_string());
            args.push(format!("{}", pitch as i32));
            if let Some(voice) = &request.voice {
                args.push("-v".to_string());
                args.push(voice.clone());
            }
        }
    }
    args.push(request.text.clone());
    args
}

/// Parse `espeak-ng --voices` output.
///
/// Columns: `Pty Language Age/Gender VoiceName File Other Languages`; the
/// language code doubles as the selection id.
fn parse_espeak_voices(output: &str) -> Vec<Voice> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let columns: Vec<&str> = line.split_whitespace().collect();
            if columns.len() < 4 || columns[0].parse::<u32>().is_err() {
                return None;
            }
            Some(Voice::new(columns[1], columns[3], columns[1]))
        })
        .collect()
}

/// Parse `spd-say -L` output (`NAME LANGUAGE VARIANT` rows).
fn parse_spd_voices(output: &str) -> Vec<Voice> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let columns: Vec<&str> = line.split_whitespace().collect();
            if columns.len() < 2 {
                return None;
            }
            Some(Voice::new(columns[0], columns[0], columns[1]))
        })
        .collect()
}

/// Parse `say -v ?` output (`Name language # sample` rows).
fn parse_say_voices(output: &str) -> Vec<Voice> {
    output
        .lines()
        .filter_map(|line| {
            let before_comment = line.split('#').next().unwrap_or(line);
            let columns: Vec<&str> = before_comment.split_whitespace().collect();
            let (&language, name_columns) = columns.split_last()?;
            if name_columns.is_empty() {
                return None;
            }
            let name = name_columns.join(" ");
            Some(Voice::new(&name, &name, language))
        })
        .collect()
}

/// List the voices an installed engine reports. Empty on any failure.
pub fn list_engine_voices(engine: &str) -> Vec<Voice> {
    let (args, parse): (&[&str], fn(&str) -> Vec<Voice>) = match engine {
        "spd-say" => (&["-L"], parse_spd_voices),
        "say" => (&["-v", "?"], parse_say_voices),
        _ => (&["--voices"], parse_espeak_voices),
    };

    match Command::new(engine).args(args).output() {
        Ok(output) if output.status.success() => parse(&String::from_utf8_lossy(&output.stdout)),
        _ => Vec::new(),
    }
}

/// The child process of the utterance being spoken. The watcher thread and
/// `stop()` share it; whoever reaps it clears the slot.
type ChildSlot = Arc<Mutex<Option<Child>>>;

/// Synthesizer backed by a system TTS engine child process.
pub struct CommandSynthesizer {
    engine: String,
    options: TtsOptions,
    current: Mutex<Option<ChildSlot>>,
}

impl CommandSynthesizer {
    /// Use the configured engine, or detect one.
    ///
    /// # Errors
    /// `SynthesisEngineNotFound` when the named engine does not answer, or
    /// when nothing from the candidate list is installed.
    pub fn new(options: &TtsOptions) -> Result<Self> {
        let engine = match &options.engine {
            Some(engine) => {
                if !engine_available(engine) {
                    return Err(VoxprepError::SynthesisEngineNotFound {
                        engine: engine.clone(),
                    });
                }
                engine.clone()
            }
            None => detect_engine().ok_or_else(|| VoxprepError::SynthesisEngineNotFound {
                engine: ENGINE_CANDIDATES.join(", "),
            })?,
        };

        Ok(Self {
            engine,
            options: options.clone(),
            current: Mutex::new(None),
        })
    }

    /// The engine command in use.
    pub fn engine(&self) -> &str {
        &self.engine
    }

    fn watch(slot: ChildSlot, voice: Option<String>, tx: crossbeam_channel::Sender<TtsOutcome>) {
        let started = Instant::now();
        thread::spawn(move || {
            loop {
                let reaped = {
                    let mut guard = slot.lock().unwrap_or_else(|e| e.into_inner());
                    match guard.as_mut() {
                        Some(child) => match child.try_wait() {
                            Ok(Some(status)) => {
                                guard.take();
                                Some(Ok(status))
                            }
                            Ok(None) => None,
                            Err(e) => {
                                guard.take();
                                Some(Err(e))
                            }
                        },
                        // Someone else reaped it; nothing left to report.
                        None => return,
                    }
                };

                match reaped {
                    Some(Ok(status)) => {
                        let duration_ms = started.elapsed().as_millis() as u64;
                        let outcome = if status.success() {
                            TtsOutcome::completed(duration_ms, voice)
                        } else if status.code().is_none() {
                            // Killed by signal: that is our own stop().
                            TtsOutcome {
                                success: false,
                                duration_ms: Some(duration_ms),
                                voice,
                                error: Some("interrupted".to_string()),
                            }
                        } else {
                            TtsOutcome {
                                success: false,
                                duration_ms: Some(duration_ms),
                                voice,
                                error: Some(format!("engine exited with {}", status)),
                            }
                        };
                        let _ = tx.send(outcome);
                        return;
                    }
                    Some(Err(e)) => {
                        let _ = tx.send(TtsOutcome::failed(&format!(
                            "failed to wait for engine: {}",
                            e
                        )));
                        return;
                    }
                    None => thread::sleep(REAP_POLL),
                }
            }
        });
    }
}

impl SpeechSynthesizer for CommandSynthesizer {
    fn voices(&self) -> Vec<Voice> {
        list_engine_voices(&self.engine)
    }

    fn speak(&self, request: &SpeakRequest) -> Result<SpeakStart> {
        let voice = request.voice.clone().or_else(|| self.options.voice.clone());

        // Nothing to say: report completion right away, like an engine that
        // finished instantly.
        if request.text.trim().is_empty() {
            let (tx, rx) = bounded(1);
            let _ = tx.send(TtsOutcome::completed(0, voice.clone()));
            return Ok(SpeakStart {
                voice,
                completion: rx,
            });
        }

        // One utterance at a time.
        self.stop();

        let effective = SpeakRequest {
            text: request.text.clone(),
            voice: voice.clone(),
            rate: request.rate,
            pitch: request.pitch,
        };
        let args = speak_args(&self.engine, &effective);

        let child = Command::new(&self.engine)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    VoxprepError::SynthesisEngineNotFound {
                        engine: self.engine.clone(),
                    }
                } else {
                    VoxprepError::Synthesis {
                        message: format!("failed to start {}: {}", self.engine, e),
                    }
                }
            })?;

        let slot: ChildSlot = Arc::new(Mutex::new(Some(child)));
        {
            let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
            *current = Some(Arc::clone(&slot));
        }

        let (tx, rx) = bounded(1);
        Self::watch(slot, voice.clone(), tx);

        Ok(SpeakStart {
            voice,
            completion: rx,
        })
    }

    fn stop(&self) {
        let slot = {
            let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
            current.take()
        };
        if let Some(slot) = slot {
            let mut guard = slot.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(child) = guard.as_mut() {
                // The watcher reaps the killed child and reports the
                // interruption on its channel.
                let _ = child.kill();
            }
        }
    }

    fn is_speaking(&self) -> bool {
        let current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        match current.as_ref() {
            Some(slot) => slot.lock().unwrap_or_else(|e| e.into_inner()).is_some(),
            None => false,
        }
    }
}

/// Scriptable synthesizer for testing
pub struct MockSynthesizer {
    voices: Vec<Voice>,
    outcome: TtsOutcome,
    speak_failure: Option<String>,
    hold_completion: bool,
    speaking: Mutex<bool>,
    requests: Mutex<Vec<SpeakRequest>>,
    stop_count: Mutex<usize>,
    held: Mutex<Vec<crossbeam_channel::Sender<TtsOutcome>>>,
}

impl MockSynthesizer {
    /// Create a mock with an English default voice and a Spanish one
    pub fn new() -> Self {
        let mut default_voice = Voice::new("en-us", "English (America)", "en-us");
        default_voice.is_default = true;
        Self {
            voices: vec![default_voice, Voice::new("es", "Spanish", "es")],
            outcome: TtsOutcome::completed(120, None),
            speak_failure: None,
            hold_completion: false,
            speaking: Mutex::new(false),
            requests: Mutex::new(Vec::new()),
            stop_count: Mutex::new(0),
            held: Mutex::new(Vec::new()),
        }
    }

    /// Replace the voice list
    pub fn with_voices(mut self, voices: Vec<Voice>) -> Self {
        self.voices = voices;
        self
    }

    /// Set the outcome delivered on completion
    pub fn with_outcome(mut self, outcome: TtsOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    /// Make `speak` return an error instead of starting
    pub fn with_speak_failure(mut self, message: &str) -> Self {
        self.speak_failure = Some(message.to_string());
        self
    }

    /// Never deliver a completion (for timeout paths)
    pub fn with_held_completion(mut self) -> Self {
        self.hold_completion = true;
        self
    }

    /// Requests seen so far
    pub fn requests(&self) -> Vec<SpeakRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// How many times `stop` was called
    pub fn stop_count(&self) -> usize {
        *self.stop_count.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MockSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechSynthesizer for MockSynthesizer {
    fn voices(&self) -> Vec<Voice> {
        self.voices.clone()
    }

    fn speak(&self, request: &SpeakRequest) -> Result<SpeakStart> {
        if let Some(message) = &self.speak_failure {
            return Err(VoxprepError::Synthesis {
                message: message.clone(),
            });
        }

        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        *self.speaking.lock().unwrap_or_else(|e| e.into_inner()) = true;

        let (tx, rx) = bounded(1);
        if self.hold_completion {
            // Keep the sender alive so the receiver blocks instead of
            // disconnecting.
            self.held.lock().unwrap_or_else(|e| e.into_inner()).push(tx);
        } else {
            let mut outcome = self.outcome.clone();
            if outcome.voice.is_none() {
                outcome.voice = request.voice.clone();
            }
            let _ = tx.send(outcome);
            *self.speaking.lock().unwrap_or_else(|e| e.into_inner()) = false;
        }

        Ok(SpeakStart {
            voice: request.voice.clone(),
            completion: rx,
        })
    }

    fn stop(&self) {
        *self.stop_count.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        *self.speaking.lock().unwrap_or_else(|e| e.into_inner()) = false;
    }

    fn is_speaking(&self) -> bool {
        *self.speaking.lock().unwrap_or_else(|e| e.into_inner())
    }
}
