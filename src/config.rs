use crate::audio::processing::ProcessingOptions;
use crate::defaults;
use crate::error::{Result, VoxprepError};
use crate::quality::metrics::QualityThresholds;
use crate::tts::TtsOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
#[cfg(feature = "cli")]
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct VoiceConfig {
    pub service: ServiceConfig,
    pub audio: AudioConfig,
    pub stt: SttConfig,
    pub thresholds: QualityThresholds,
    pub processing: ProcessingOptions,
    pub tts: TtsOptions,
}

/// Service-level switches
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Locale tag for recognition and voice selection (e.g. "en-US").
    pub language: String,
    /// Allow falling back to the embedded engine when native recognition
    /// fails or quality degrades.
    pub enable_embedded_fallback: bool,
    /// Attach the quality monitor to live recordings.
    pub enable_quality_monitoring: bool,
    /// Run captured clips through the processing chain before transcription.
    pub enable_audio_processing: bool,
    /// Pick a synthesis voice matching the configured language.
    pub auto_select_voice: bool,
}

/// Audio capture configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub device: Option<String>,
    pub sample_rate: u32,
}

/// Embedded transcription engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SttConfig {
    /// Model size tier (e.g. "base", "base.en", "small").
    pub model: String,
    /// Explicit model file path; overrides the conventional locations.
    pub model_path: Option<std::path::PathBuf>,
    /// Inference threads; `None` lets the engine decide.
    pub threads: Option<usize>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            language: defaults::DEFAULT_LANGUAGE.to_string(),
            enable_embedded_fallback: true,
            enable_quality_monitoring: true,
            enable_audio_processing: true,
            auto_select_voice: true,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: defaults::SAMPLE_RATE,
        }
    }
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            model: defaults::DEFAULT_MODEL.to_string(),
            model_path: None,
            threads: None,
        }
    }
}

impl VoiceConfig {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: VoiceConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                if e.downcast_ref::<std::io::Error>()
                    .map(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
                    .unwrap_or(false)
                {
                    Self::default()
                } else {
                    panic!("Failed to load config from {}: {}", path.display(), e);
                }
            }
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - VOXPREP_LANGUAGE → service.language
    /// - VOXPREP_MODEL → stt.model
    /// - VOXPREP_AUDIO_DEVICE → audio.device
    /// - VOXPREP_TTS_ENGINE → tts.engine
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(language) = std::env::var("VOXPREP_LANGUAGE")
            && !language.is_empty()
        {
            self.service.language = language;
        }

        if let Ok(model) = std::env::var("VOXPREP_MODEL")
            && !model.is_empty()
        {
            self.stt.model = model;
        }

        if let Ok(device) = std::env::var("VOXPREP_AUDIO_DEVICE")
            && !device.is_empty()
        {
            self.audio.device = Some(device);
        }

        if let Ok(engine) = std::env::var("VOXPREP_TTS_ENGINE")
            && !engine.is_empty()
        {
            self.tts.engine = Some(engine);
        }

        self
    }

    /// Check value ranges that serde cannot express.
    ///
    /// Returns the first violation found, keyed by its TOML path.
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            return Err(VoxprepError::ConfigInvalidValue {
                key: "audio.sample_rate".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.thresholds.min_volume <= 0.0 || self.thresholds.min_volume > 1.0 {
            return Err(VoxprepError::ConfigInvalidValue {
                key: "thresholds.min_volume".to_string(),
                message: "must be in (0, 1]".to_string(),
            });
        }
        if self.thresholds.min_snr_db <= 0.0 {
            return Err(VoxprepError::ConfigInvalidValue {
                key: "thresholds.min_snr_db".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.thresholds.min_clarity <= 0.0 || self.thresholds.min_clarity > 1.0 {
            return Err(VoxprepError::ConfigInvalidValue {
                key: "thresholds.min_clarity".to_string(),
                message: "must be in (0, 1]".to_string(),
            });
        }
        if self.thresholds.min_stability <= 0.0 || self.thresholds.min_stability > 1.0 {
            return Err(VoxprepError::ConfigInvalidValue {
                key: "thresholds.min_stability".to_string(),
                message: "must be in (0, 1]".to_string(),
            });
        }
        if self.thresholds.consecutive_failures == 0 {
            return Err(VoxprepError::ConfigInvalidValue {
                key: "thresholds.consecutive_failures".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.processing.highpass_hz >= self.processing.lowpass_hz {
            return Err(VoxprepError::ConfigInvalidValue {
                key: "processing.highpass_hz".to_string(),
                message: "must be below processing.lowpass_hz".to_string(),
            });
        }
        if !(0.25..=4.0).contains(&self.tts.rate) {
            return Err(VoxprepError::ConfigInvalidValue {
                key: "tts.rate".to_string(),
                message: "must be in [0.25, 4.0]".to_string(),
            });
        }
        if !(0.5..=2.0).contains(&self.tts.pitch) {
            return Err(VoxprepError::ConfigInvalidValue {
                key: "tts.pitch".to_string(),
                message: "must be in [0.5, 2.0]".to_string(),
            });
        }
        Ok(())
    }

    /// Render the effective configuration as TOML for display.
    pub fn to_display_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/voxprep/config.toml on Linux
    #[cfg(feature = "cli")]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .expect("Could not determine config directory")
            .join("voxprep")
            .join("config.toml")
    }
}
