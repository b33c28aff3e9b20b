//! Default configuration constants for voxprep.
//!
//! Every tunable heuristic lives here rather than inline at its point of use:
//! the classification shapes (weighted sums, fixed thresholds, debounce
//! counters) are contractual, the exact numbers are not.

/// Default audio sample rate in Hz.
///
/// 16kHz is the standard for speech recognition and provides a good balance
/// between quality and computational efficiency for voice applications.
pub const SAMPLE_RATE: u32 = 16000;

/// Default language tag for recognition and synthesis.
///
/// A full locale tag; the embedded engine only consumes the primary
/// subtag ("en-US" -> "en").
pub const DEFAULT_LANGUAGE: &str = "en-US";

/// Default embedded model name.
///
/// "base" (multilingual) supports any interview language.
/// Use "base.en" explicitly for English-only optimized transcription.
pub const DEFAULT_MODEL: &str = "base";

// ── Quality monitoring ──────────────────────────────────────────────────

/// Interval between quality evaluations in milliseconds.
pub const QUALITY_TICK_MS: u64 = 500;

/// Number of metric samples retained for trend and stability computation.
///
/// At one sample per tick this covers the most recent 15 seconds.
pub const QUALITY_HISTORY_LEN: usize = 30;

/// Number of prior volume samples (plus the current one) feeding the
/// stability metric's coefficient of variation.
pub const STABILITY_WINDOW: usize = 5;

/// Number of samples per side when comparing recent vs. preceding mean
/// clarity for the quality trend.
pub const TREND_WINDOW: usize = 5;

/// Minimum clarity delta before a trend counts as improving/declining.
pub const TREND_EPSILON: f32 = 0.05;

/// Minimum acceptable normalized volume (RMS of [-1,1] samples).
pub const MIN_VOLUME: f32 = 0.01;

/// Minimum acceptable signal-to-noise ratio in dB.
pub const MIN_SNR_DB: f32 = 10.0;

/// Minimum acceptable speech-band clarity fraction.
pub const MIN_CLARITY: f32 = 0.3;

/// Minimum acceptable volume stability.
pub const MIN_STABILITY: f32 = 0.5;

/// Consecutive poor/failed ticks required before a fallback fires.
pub const CONSECUTIVE_FAILURES: u32 = 3;

/// Lower edge of the speech band in Hz (telephone-band floor).
pub const SPEECH_BAND_LOW_HZ: f32 = 300.0;

/// Upper edge of the speech band in Hz (telephone-band ceiling).
pub const SPEECH_BAND_HIGH_HZ: f32 = 3400.0;

/// Fraction of the lowest-energy frequency bins averaged into the noise floor.
pub const NOISE_FLOOR_FRACTION: f32 = 0.1;

/// FFT length for per-tick spectral analysis. Power of two, 64ms at 16kHz.
pub const FFT_SIZE: usize = 1024;

// ── Audio processing ────────────────────────────────────────────────────

/// Default high-pass cutoff in Hz. Removes sub-speech rumble.
pub const HIGHPASS_HZ: f32 = 85.0;

/// Default low-pass cutoff in Hz. Removes hiss above the useful band while
/// staying under the Nyquist limit of the 16kHz engine rate.
pub const LOWPASS_HZ: f32 = 7200.0;

/// High-pass cutoff for tonal languages. Wider retained band preserves the
/// pitch contours that carry lexical meaning.
pub const TONAL_HIGHPASS_HZ: f32 = 60.0;

/// Low-pass cutoff for tonal languages.
pub const TONAL_LOWPASS_HZ: f32 = 7800.0;

/// Languages with lexical tone, by primary subtag.
pub const TONAL_LANGUAGES: &[&str] = &["zh", "yue", "vi", "th", "lo", "my"];

/// Compressor threshold in dBFS. Speech-appropriate dynamics defaults.
pub const COMPRESSOR_THRESHOLD_DB: f32 = -24.0;

/// Compressor soft-knee width in dB.
pub const COMPRESSOR_KNEE_DB: f32 = 30.0;

/// Compressor ratio above the knee.
pub const COMPRESSOR_RATIO: f32 = 12.0;

/// Compressor attack time in seconds.
pub const COMPRESSOR_ATTACK_SECS: f32 = 0.003;

/// Compressor release time in seconds.
pub const COMPRESSOR_RELEASE_SECS: f32 = 0.25;

/// RMS level the gain stage aims for when normalizing for recognition.
pub const RECOGNITION_TARGET_VOLUME: f32 = 0.15;

/// Upper bound on the linear gain the normalization stage may apply.
/// Keeps near-silent clips from being blown up into pure noise.
pub const MAX_GAIN: f32 = 4.0;

// ── Clip acceptance gate ────────────────────────────────────────────────

/// Minimum clip duration in seconds worth sending to a recognizer.
pub const MIN_CLIP_SECS: f32 = 0.5;

/// Minimum peak amplitude for a usable clip.
pub const MIN_CLIP_PEAK: f32 = 0.01;

/// Minimum RMS level for a usable clip.
pub const MIN_CLIP_RMS: f32 = 0.002;

/// Minimum estimated SNR in dB for a usable clip.
pub const MIN_CLIP_SNR_DB: f32 = 5.0;

// ── Orchestration ───────────────────────────────────────────────────────

/// Capture thread poll cadence in milliseconds (~60Hz).
pub const CAPTURE_POLL_MS: u64 = 16;

/// Deadline for joining the capture thread on stop/cleanup.
pub const SESSION_JOIN_DEADLINE_MS: u64 = 2000;

/// Consecutive source read failures tolerated before the session aborts.
pub const MAX_CONSECUTIVE_READ_ERRORS: u32 = 10;

/// Maximum consecutive backend fallbacks before the policy refuses more.
pub const MAX_FALLBACK_ATTEMPTS: u32 = 2;

/// Confidence reported for engines that do not produce one.
pub const NOMINAL_EMBEDDED_CONFIDENCE: f32 = 0.85;

/// How long `test_voice` waits for synthesis completion.
pub const TEST_VOICE_TIMEOUT_MS: u64 = 5000;

// ── Capability probe scoring ────────────────────────────────────────────

/// Points for a working native recognition backend.
pub const PROBE_POINTS_NATIVE: u32 = 30;

/// Points for a working speech synthesis engine.
pub const PROBE_POINTS_TTS: u32 = 25;

/// Points for a working capture path.
pub const PROBE_POINTS_RECORDING: u32 = 20;

/// Points for spectral analysis support.
pub const PROBE_POINTS_DSP: u32 = 15;

/// Points for the embedded engine with thread/SIMD extras.
pub const PROBE_POINTS_ADVANCED: u32 = 10;

/// Score deduction when microphone permission is known to be denied.
pub const PROBE_PERMISSION_DENIED_PENALTY: u32 = 30;

/// Score deduction when permission state cannot be determined.
pub const PROBE_PERMISSION_UNKNOWN_PENALTY: u32 = 5;

/// Minimum score for an `excellent` capability rating.
pub const RATING_EXCELLENT_MIN: u32 = 80;

/// Minimum score for a `good` capability rating.
pub const RATING_GOOD_MIN: u32 = 60;

/// Minimum score for a `limited` capability rating.
pub const RATING_LIMITED_MIN: u32 = 40;

/// Report the GPU backend compiled into this build.
///
/// Returns a human-readable name based on the compile-time feature flags.
/// Only one GPU backend can be active at a time; if none is enabled, returns "CPU".
pub fn gpu_backend() -> &'static str {
    if cfg!(feature = "cuda") {
        "CUDA"
    } else if cfg!(feature = "vulkan") {
        "Vulkan"
    } else if cfg!(feature = "hipblas") {
        "HipBLAS (AMD)"
    } else if cfg!(feature = "openblas") {
        "OpenBLAS"
    } else {
        "CPU"
    }
}
