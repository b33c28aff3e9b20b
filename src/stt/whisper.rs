//! Embedded speech-to-text via whisper.cpp.
//!
//! This is the fallback recognition path: a locally loaded Whisper model
//! behind the batch [`Transcriber`] trait.
//!
//! # Feature Gate
//!
//! Real inference requires the `whisper` feature (and cmake at build time):
//!
//! ```bash
//! cargo build --features whisper
//! ```
//!
//! Without the feature this module still compiles; [`WhisperTranscriber`]
//! becomes a stub that reports itself not ready and errors on use.

use crate::config::SttConfig;
use crate::defaults;
use crate::error::{Result, VoxprepError};
use crate::stt::transcriber::{EngineResult, Transcriber};
use std::path::{Path, PathBuf};

#[cfg(feature = "whisper")]
use std::sync::{Mutex, Once};
#[cfg(feature = "whisper")]
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, install_logging_hooks,
};

#[cfg(feature = "whisper")]
static LOGGING_HOOKS_INSTALLED: Once = Once::new();

/// Resolve a model file from an explicit path or the conventional locations.
///
/// When `explicit` is given it must exist; otherwise `ggml-{model}.bin` is
/// searched in `~/.cache/voxprep/models` and then a local `models/` directory.
pub fn resolve_model_path(model: &str, explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(VoxprepError::TranscriptionModelNotFound {
            path: path.to_string_lossy().to_string(),
        });
    }

    let filename = format!("ggml-{model}.bin");
    for dir in candidate_model_dirs() {
        let path = dir.join(&filename);
        if path.exists() {
            return Ok(path);
        }
    }

    Err(VoxprepError::TranscriptionModelNotFound { path: filename })
}

fn candidate_model_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(home) = std::env::var("HOME") {
        dirs.push(PathBuf::from(home).join(".cache/voxprep/models"));
    }
    dirs.push(PathBuf::from("models"));
    dirs
}

/// Map a BCP-47 tag to the primary subtag Whisper expects ("en-US" -> "en").
pub fn whisper_language(tag: &str) -> String {
    tag.split(['-', '_'])
        .next()
        .unwrap_or(tag)
        .to_ascii_lowercase()
}

/// Configuration for the embedded Whisper engine.
#[derive(Debug, Clone)]
pub struct WhisperConfig {
    /// Path to the Whisper model file
    pub model_path: PathBuf,
    /// Primary language subtag (e.g. "en", "es")
    pub language: String,
    /// Number of threads for inference (None = auto-detect)
    pub threads: Option<usize>,
}

impl WhisperConfig {
    /// Build a config from the crate settings, resolving the model file.
    ///
    /// `language` is the full configured tag; it is reduced to the primary
    /// subtag here.
    pub fn from_settings(stt: &SttConfig, language: &str) -> Result<Self> {
        let model_path = resolve_model_path(&stt.model, stt.model_path.as_deref())?;
        Ok(Self {
            model_path,
            language: whisper_language(language),
            threads: stt.threads,
        })
    }
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(format!("models/ggml-{}.bin", defaults::DEFAULT_MODEL)),
            language: whisper_language(defaults::DEFAULT_LANGUAGE),
            threads: None,
        }
    }
}

/// Whisper-based transcriber implementation.
///
/// The `WhisperContext` is wrapped in a Mutex so one loaded model can be
/// shared across sessions; each transcription creates a fresh state.
#[cfg(feature = "whisper")]
pub struct WhisperTranscriber {
    context: Mutex<WhisperContext>,
    config: WhisperConfig,
    model_name: String,
}

#[cfg(feature = "whisper")]
impl std::fmt::Debug for WhisperTranscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperTranscriber")
            .field("config", &self.config)
            .field("model_name", &self.model_name)
            .field("context", &"<WhisperContext>")
            .finish()
    }
}

/// Whisper-based transcriber placeholder (without the `whisper` feature).
///
/// Construction still validates the model path so configuration problems
/// surface the same way, but transcription always errors.
#[cfg(not(feature = "whisper"))]
#[derive(Debug)]
pub struct WhisperTranscriber {
    config: WhisperConfig,
    model_name: String,
}

fn model_name_of(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(feature = "whisper")]
impl WhisperTranscriber {
    /// Load the model named by `config`.
    ///
    /// # Errors
    /// `TranscriptionModelNotFound` if the model file doesn't exist,
    /// `TranscriptionInferenceFailed` if loading it fails.
    pub fn new(config: WhisperConfig) -> Result<Self> {
        // Route whisper.cpp's chatty stderr output through hooks (once).
        LOGGING_HOOKS_INSTALLED.call_once(|| {
            install_logging_hooks();
        });

        if !config.model_path.exists() {
            return Err(VoxprepError::TranscriptionModelNotFound {
                path: config.model_path.to_string_lossy().to_string(),
            });
        }

        let model_name = model_name_of(&config.model_path);

        let mut context_params = WhisperContextParameters::default();
        // Fused attention kernels; avoids the standalone softmax path that
        // crashes on recent CUDA architectures.
        context_params.flash_attn(true);
        let context = WhisperContext::new_with_params(
            config.model_path.to_str().ok_or_else(|| {
                VoxprepError::TranscriptionInferenceFailed {
                    message: "Invalid UTF-8 in model path".to_string(),
                }
            })?,
            context_params,
        )
        .map_err(|e| VoxprepError::TranscriptionInferenceFailed {
            message: format!("Failed to load Whisper model: {}", e),
        })?;

        Ok(Self {
            context: Mutex::new(context),
            config,
            model_name,
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &WhisperConfig {
        &self.config
    }

    /// Convert i16 audio samples to f32 normalized to [-1.0, 1.0].
    ///
    /// Whisper expects f32 audio; input is 16-bit PCM.
    fn convert_audio(samples: &[i16]) -> Vec<f32> {
        samples
            .iter()
            .map(|&sample| sample as f32 / 32768.0)
            .collect()
    }
}

#[cfg(not(feature = "whisper"))]
impl WhisperTranscriber {
    /// Create the stub transcriber. Validates the model path only.
    pub fn new(config: WhisperConfig) -> Result<Self> {
        if !config.model_path.exists() {
            return Err(VoxprepError::TranscriptionModelNotFound {
                path: config.model_path.to_string_lossy().to_string(),
            });
        }

        let model_name = model_name_of(&config.model_path);
        Ok(Self { config, model_name })
    }

    /// Get the configuration
    pub fn config(&self) -> &WhisperConfig {
        &self.config
    }

    /// Convert i16 audio samples to f32 normalized to [-1.0, 1.0].
    ///
    /// Available without the whisper feature for testing.
    pub fn convert_audio(samples: &[i16]) -> Vec<f32> {
        samples
            .iter()
            .map(|&sample| sample as f32 / 32768.0)
            .collect()
    }
}

#[cfg(feature = "whisper")]
impl Transcriber for WhisperTranscriber {
    fn transcribe(&self, audio: &[i16]) -> Result<EngineResult> {
        let audio_f32 = Self::convert_audio(audio);

        // A context that panicked mid-inference is not safe to reuse.
        let context =
            self.context
                .lock()
                .map_err(|e| VoxprepError::TranscriptionInferenceFailed {
                    message: format!("Failed to acquire context lock: {}", e),
                })?;

        let mut state =
            context
                .create_state()
                .map_err(|e| VoxprepError::TranscriptionInferenceFailed {
                    message: format!("Failed to create Whisper state: {}", e),
                })?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(Some(&self.config.language));
        if let Some(threads) = self.config.threads {
            params.set_n_threads(threads as i32);
        }

        // Keep inference quiet; progress goes nowhere useful here.
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        state
            .full(params, &audio_f32)
            .map_err(|e| VoxprepError::TranscriptionInferenceFailed {
                message: format!("Whisper inference failed: {}", e),
            })?;

        let mut transcription = String::new();
        let mut confidence_sum = 0.0_f32;
        let mut segment_count = 0u32;
        for segment in state.as_iter() {
            transcription.push_str(&segment.to_string());
            // no_speech_probability is 0.0..1.0; confidence = 1 - no_speech_prob
            confidence_sum += 1.0 - segment.no_speech_probability();
            segment_count += 1;
        }

        // With no segments the engine reported no confidence at all; use the
        // nominal constant rather than claiming certainty either way.
        let confidence = if segment_count > 0 {
            (confidence_sum / segment_count as f32).clamp(0.0, 1.0)
        } else {
            defaults::NOMINAL_EMBEDDED_CONFIDENCE
        };

        Ok(EngineResult {
            text: transcription.trim().to_string(),
            confidence,
        })
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn is_ready(&self) -> bool {
        // The transcriber is ready if we successfully created it
        true
    }
}

#[cfg(not(feature = "whisper"))]
impl Transcriber for WhisperTranscriber {
    fn transcribe(&self, _audio: &[i16]) -> Result<EngineResult> {
        Err(VoxprepError::TranscriptionInferenceFailed {
            message: concat!(
                "Whisper feature not enabled. This binary was built without embedded recognition.\n",
                "To fix: cargo build --release (whisper is enabled by default)\n",
                "If build fails with cmake errors, install: sudo apt install cmake"
            )
            .to_string(),
        })
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn is_ready(&self) -> bool {
        false
    }
}
