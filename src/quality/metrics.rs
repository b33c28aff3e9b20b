//! Quality metric types and classification.
//!
//! Everything in this module is a pure function of its inputs so the
//! classification rules can be tested without audio hardware or timers.

use crate::defaults;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One quality sample from a live stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// RMS of normalized [-1, 1] samples over the tick window.
    pub volume: f32,
    /// Peak spectral energy over the noise floor, in dB.
    pub signal_to_noise_db: f32,
    /// Fraction of spectral energy inside the speech band.
    pub clarity: f32,
    /// 1 - coefficient of variation of recent volume, clamped to >= 0.
    pub stability: f32,
    /// Milliseconds since monitoring started.
    pub timestamp_ms: u64,
}

/// Classified quality level. Always derived from metrics, never stored.
///
/// Variants are ordered worst to best so levels compare naturally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityStatus {
    Failed,
    Poor,
    Fair,
    Good,
    Excellent,
}

impl QualityStatus {
    /// Whether this level counts toward the consecutive-failure fallback.
    pub fn counts_as_failure(self) -> bool {
        matches!(self, QualityStatus::Poor | QualityStatus::Failed)
    }
}

impl fmt::Display for QualityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QualityStatus::Failed => "failed",
            QualityStatus::Poor => "poor",
            QualityStatus::Fair => "fair",
            QualityStatus::Good => "good",
            QualityStatus::Excellent => "excellent",
        };
        write!(f, "{name}")
    }
}

/// Minimum acceptable levels for each metric.
///
/// Read-only for the lifetime of a monitoring session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    pub min_volume: f32,
    pub min_snr_db: f32,
    pub min_clarity: f32,
    pub min_stability: f32,
    /// Consecutive poor/failed ticks before a fallback fires.
    pub consecutive_failures: u32,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_volume: defaults::MIN_VOLUME,
            min_snr_db: defaults::MIN_SNR_DB,
            min_clarity: defaults::MIN_CLARITY,
            min_stability: defaults::MIN_STABILITY,
            consecutive_failures: defaults::CONSECUTIVE_FAILURES,
        }
    }
}

/// Direction recent clarity is moving in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTrend {
    Improving,
    Stable,
    Declining,
}

/// Classify one metrics sample against the thresholds.
///
/// `Failed` means volume or SNR sits under half its configured minimum.
/// Otherwise the level comes from a composite score: each metric normalized
/// against double its minimum (capped at 1) and averaged, mapped to
/// excellent (>= 0.8), good (>= 0.6), fair (>= 0.4), poor below that.
pub fn classify(metrics: &QualityMetrics, thresholds: &QualityThresholds) -> QualityStatus {
    if metrics.volume < thresholds.min_volume / 2.0
        || metrics.signal_to_noise_db < thresholds.min_snr_db / 2.0
    {
        return QualityStatus::Failed;
    }

    let score = composite_score(metrics, thresholds);
    if score >= 0.8 {
        QualityStatus::Excellent
    } else if score >= 0.6 {
        QualityStatus::Good
    } else if score >= 0.4 {
        QualityStatus::Fair
    } else {
        QualityStatus::Poor
    }
}

/// Composite 0-1 quality score. Monotone non-decreasing in every metric.
fn composite_score(metrics: &QualityMetrics, thresholds: &QualityThresholds) -> f32 {
    let volume = (metrics.volume / (thresholds.min_volume * 2.0)).min(1.0);
    let snr = (metrics.signal_to_noise_db / (thresholds.min_snr_db * 2.0)).min(1.0);
    let clarity = (metrics.clarity / (thresholds.min_clarity * 2.0)).min(1.0);
    let stability = (metrics.stability / (thresholds.min_stability * 2.0)).min(1.0);
    (volume + snr + clarity + stability) / 4.0
}

/// Human-readable reason for a quality-driven fallback.
///
/// Reports the first violated threshold, checked in a fixed order so the
/// message is deterministic when several metrics are bad at once.
pub fn failure_reason(metrics: &QualityMetrics, thresholds: &QualityThresholds) -> &'static str {
    if metrics.volume < thresholds.min_volume {
        "low microphone volume"
    } else if metrics.signal_to_noise_db < thresholds.min_snr_db {
        "high background noise"
    } else if metrics.clarity < thresholds.min_clarity {
        "poor speech clarity"
    } else if metrics.stability < thresholds.min_stability {
        "unstable audio signal"
    } else {
        "sustained poor audio quality"
    }
}

/// Compare mean clarity of the most recent window against the window before
/// it. Returns `Stable` when the history is too short to say.
pub fn trend(history: &[QualityMetrics]) -> QualityTrend {
    let window = defaults::TREND_WINDOW;
    if history.len() < window * 2 {
        return QualityTrend::Stable;
    }

    let recent = &history[history.len() - window..];
    let previous = &history[history.len() - window * 2..history.len() - window];

    let mean = |samples: &[QualityMetrics]| {
        samples.iter().map(|m| m.clarity).sum::<f32>() / samples.len() as f32
    };

    let delta = mean(recent) - mean(previous);
    if delta > defaults::TREND_EPSILON {
        QualityTrend::Improving
    } else if delta < -defaults::TREND_EPSILON {
        QualityTrend::Declining
    } else {
        QualityTrend::Stable
    }
}
