//! Real-time quality scoring of a live audio stream.
//!
//! The monitor never owns the stream. The capture loop hands it batches of
//! samples via [`QualityMonitor::push_samples`]; once the tick interval has
//! elapsed the accumulated window is scored and a [`QualityTick`] comes back.
//! Sustained poor/failed ticks raise a fallback signal, debounced by the
//! configured consecutive-failure count.

use crate::defaults;
use crate::quality::metrics::{
    self, QualityMetrics, QualityStatus, QualityThresholds, QualityTrend,
};
use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Clock abstraction for testability
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Production clock using system time
#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Result of one quality evaluation.
#[derive(Debug, Clone, Copy)]
pub struct QualityTick {
    pub metrics: QualityMetrics,
    pub status: QualityStatus,
    /// Set when the debounce threshold was just reached. Carries the
    /// human-readable reason; fires once, then the counter restarts.
    pub fallback: Option<&'static str>,
}

/// Periodic scorer for an active capture session.
pub struct QualityMonitor<C: Clock = SystemClock> {
    thresholds: QualityThresholds,
    sample_rate: u32,
    clock: C,
    tick_interval: Duration,
    started_at: Instant,
    last_tick: Instant,
    window: Vec<i16>,
    volume_history: VecDeque<f32>,
    history: VecDeque<QualityMetrics>,
    consecutive_failures: u32,
    fft: Arc<dyn RealToComplex<f32>>,
    hann: Vec<f32>,
}

impl QualityMonitor<SystemClock> {
    pub fn new(thresholds: QualityThresholds, sample_rate: u32) -> Self {
        Self::with_clock(thresholds, sample_rate, SystemClock)
    }
}

impl<C: Clock> QualityMonitor<C> {
    pub fn with_clock(thresholds: QualityThresholds, sample_rate: u32, clock: C) -> Self {
        let fft = RealFftPlanner::<f32>::new().plan_fft_forward(defaults::FFT_SIZE);
        let hann = hann_window(defaults::FFT_SIZE);
        let now = clock.now();
        Self {
            thresholds,
            sample_rate,
            clock,
            tick_interval: Duration::from_millis(defaults::QUALITY_TICK_MS),
            started_at: now,
            last_tick: now,
            window: Vec::new(),
            volume_history: VecDeque::with_capacity(defaults::STABILITY_WINDOW),
            history: VecDeque::with_capacity(defaults::QUALITY_HISTORY_LEN),
            consecutive_failures: 0,
            fft,
            hann,
        }
    }

    pub fn thresholds(&self) -> &QualityThresholds {
        &self.thresholds
    }

    /// Feed captured samples. Returns a tick once the interval has elapsed
    /// and at least some audio has accumulated.
    pub fn push_samples(&mut self, samples: &[i16]) -> Option<QualityTick> {
        self.window.extend_from_slice(samples);

        let now = self.clock.now();
        if now.duration_since(self.last_tick) < self.tick_interval || self.window.is_empty() {
            return None;
        }
        self.last_tick = now;

        let tick = self.evaluate(now);
        self.window.clear();
        Some(tick)
    }

    /// Latest metrics sample, if any tick has completed.
    pub fn current(&self) -> Option<&QualityMetrics> {
        self.history.back()
    }

    /// Classification of the latest sample.
    pub fn current_status(&self) -> Option<QualityStatus> {
        self.history
            .back()
            .map(|m| metrics::classify(m, &self.thresholds))
    }

    /// Bounded metric history, oldest first.
    pub fn history(&self) -> &VecDeque<QualityMetrics> {
        &self.history
    }

    /// Direction recent clarity is moving in.
    pub fn trend(&self) -> QualityTrend {
        let samples: Vec<QualityMetrics> = self.history.iter().copied().collect();
        metrics::trend(&samples)
    }

    /// Drop all accumulated state and re-base the tick timer.
    pub fn reset(&mut self) {
        let now = self.clock.now();
        self.started_at = now;
        self.last_tick = now;
        self.window.clear();
        self.volume_history.clear();
        self.history.clear();
        self.consecutive_failures = 0;
    }

    fn evaluate(&mut self, now: Instant) -> QualityTick {
        let volume = calculate_rms(&self.window);
        let (signal_to_noise_db, clarity) = self.spectral_metrics();
        let stability = self.stability(volume);

        self.volume_history.push_back(volume);
        while self.volume_history.len() > defaults::STABILITY_WINDOW {
            self.volume_history.pop_front();
        }

        let m = QualityMetrics {
            volume,
            signal_to_noise_db,
            clarity,
            stability,
            timestamp_ms: now.duration_since(self.started_at).as_millis() as u64,
        };

        self.history.push_back(m);
        while self.history.len() > defaults::QUALITY_HISTORY_LEN {
            self.history.pop_front();
        }

        let status = metrics::classify(&m, &self.thresholds);
        if status.counts_as_failure() {
            self.consecutive_failures += 1;
        } else {
            self.consecutive_failures = 0;
        }

        let fallback = if self.consecutive_failures >= self.thresholds.consecutive_failures {
            self.consecutive_failures = 0;
            Some(metrics::failure_reason(&m, &self.thresholds))
        } else {
            None
        };

        QualityTick {
            metrics: m,
            status,
            fallback,
        }
    }

    /// Peak-over-floor SNR in dB and speech-band clarity from the most
    /// recent FFT frame of the window.
    fn spectral_metrics(&self) -> (f32, f32) {
        let size = defaults::FFT_SIZE;
        let mut frame = vec![0.0f32; size];
        let take = self.window.len().min(size);
        let start = self.window.len() - take;
        for (i, s) in self.window[start..].iter().enumerate() {
            frame[i] = (*s as f32 / 32768.0) * self.hann[i];
        }

        let mut spectrum = self.fft.make_output_vec();
        // Lengths come from the same plan; a mismatch cannot happen.
        if self.fft.process(&mut frame, &mut spectrum).is_err() {
            spectrum.fill(Complex::default());
        }

        let energies: Vec<f32> = spectrum.iter().map(|c| c.norm_sqr()).collect();

        let peak = energies.iter().cloned().fold(0.0f32, f32::max);
        let mut sorted = energies.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let floor_count = ((sorted.len() as f32 * defaults::NOISE_FLOOR_FRACTION) as usize).max(1);
        let noise_floor =
            sorted[..floor_count].iter().sum::<f32>() / floor_count as f32;

        let snr_db = 20.0 * (peak.max(1e-10) / noise_floor.max(1e-10)).log10();

        let bin_hz = self.sample_rate as f32 / size as f32;
        let total: f32 = energies.iter().sum();
        let speech: f32 = energies
            .iter()
            .enumerate()
            .filter(|(k, _)| {
                let hz = *k as f32 * bin_hz;
                (defaults::SPEECH_BAND_LOW_HZ..=defaults::SPEECH_BAND_HIGH_HZ).contains(&hz)
            })
            .map(|(_, e)| e)
            .sum();
        let clarity = if total > 0.0 { speech / total } else { 0.0 };

        (snr_db, clarity)
    }

    /// 1 - coefficient of variation of the last few volumes plus this one.
    fn stability(&self, current_volume: f32) -> f32 {
        let mut volumes: Vec<f32> = self.volume_history.iter().copied().collect();
        volumes.push(current_volume);

        let mean = volumes.iter().sum::<f32>() / volumes.len() as f32;
        if mean <= f32::EPSILON {
            return 0.0;
        }
        let variance =
            volumes.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / volumes.len() as f32;
        let cv = variance.sqrt() / mean;
        (1.0 - cv).max(0.0)
    }
}

/// Calculate the RMS of i16 samples, normalized to [0, 1].
pub fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let normalized = s as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}

fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|n| {
            let x = (n as f32 * std::f32::consts::TAU) / (size as f32 - 1.0);
            0.5 * (1.0 - x.cos())
        })
        .collect()
}
