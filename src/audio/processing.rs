//! Clip and stream processing for recognition quality.
//!
//! The chain runs high-pass -> low-pass -> compressor -> gain. Filters
//! strip rumble and hiss outside the speech band, the compressor evens out
//! dynamics, and the gain stage pulls the level toward what recognition
//! engines expect. Stages with invalid parameters are skipped rather than
//! failing the whole clip.

use crate::defaults;
use crate::quality::monitor::calculate_rms;
use serde::{Deserialize, Serialize};
use std::f32::consts::{FRAC_1_SQRT_2, PI};

/// Switches and parameters for the processing chain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingOptions {
    /// Apply the band-pass filters around the speech range.
    pub noise_reduction: bool,
    /// Apply dynamic range compression.
    pub normalize: bool,
    /// Apply make-up gain toward `target_volume`.
    pub auto_gain_control: bool,
    /// RMS level the gain stage aims for.
    pub target_volume: f32,
    pub highpass_hz: f32,
    pub lowpass_hz: f32,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            noise_reduction: true,
            normalize: true,
            auto_gain_control: true,
            target_volume: defaults::RECOGNITION_TARGET_VOLUME,
            highpass_hz: defaults::HIGHPASS_HZ,
            lowpass_hz: defaults::LOWPASS_HZ,
        }
    }
}

/// Processing options tuned for a spoken language.
///
/// Tonal languages carry meaning in pitch contours, so their band is wider
/// at both ends to keep the fundamental and upper harmonics intact.
pub fn language_optimized_options(language: &str) -> ProcessingOptions {
    let primary = language
        .split(['-', '_'])
        .next()
        .unwrap_or(language)
        .to_lowercase();

    let mut options = ProcessingOptions::default();
    if defaults::TONAL_LANGUAGES.contains(&primary.as_str()) {
        options.highpass_hz = defaults::TONAL_HIGHPASS_HZ;
        options.lowpass_hz = defaults::TONAL_LOWPASS_HZ;
    }
    options
}

/// Second-order IIR filter (RBJ cookbook coefficients, Butterworth Q).
struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl Biquad {
    fn highpass(sample_rate: u32, cutoff_hz: f32) -> Self {
        let (cos_w0, alpha) = Self::angular(sample_rate, cutoff_hz);
        let a0 = 1.0 + alpha;
        Self {
            b0: ((1.0 + cos_w0) / 2.0) / a0,
            b1: (-(1.0 + cos_w0)) / a0,
            b2: ((1.0 + cos_w0) / 2.0) / a0,
            a1: (-2.0 * cos_w0) / a0,
            a2: (1.0 - alpha) / a0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    fn lowpass(sample_rate: u32, cutoff_hz: f32) -> Self {
        let (cos_w0, alpha) = Self::angular(sample_rate, cutoff_hz);
        let a0 = 1.0 + alpha;
        Self {
            b0: ((1.0 - cos_w0) / 2.0) / a0,
            b1: (1.0 - cos_w0) / a0,
            b2: ((1.0 - cos_w0) / 2.0) / a0,
            a1: (-2.0 * cos_w0) / a0,
            a2: (1.0 - alpha) / a0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    /// Angular frequency terms for a Butterworth response (Q = 1/sqrt(2)).
    fn angular(sample_rate: u32, cutoff_hz: f32) -> (f32, f32) {
        let w0 = 2.0 * PI * cutoff_hz / sample_rate as f32;
        let alpha = w0.sin() / (2.0 * FRAC_1_SQRT_2);
        (w0.cos(), alpha)
    }

    fn process(&mut self, x: f32) -> f32 {
        let y = self.b0 * x + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }

    fn process_buffer(&mut self, buffer: &mut [f32]) {
        for sample in buffer.iter_mut() {
            *sample = self.process(*sample);
        }
    }
}

/// Soft-knee downward compressor with an attack/release envelope follower.
struct Compressor {
    threshold_db: f32,
    knee_db: f32,
    ratio: f32,
    attack_coeff: f32,
    release_coeff: f32,
    envelope_db: f32,
}

impl Compressor {
    fn new(sample_rate: u32) -> Self {
        let rate = sample_rate as f32;
        Self {
            threshold_db: defaults::COMPRESSOR_THRESHOLD_DB,
            knee_db: defaults::COMPRESSOR_KNEE_DB,
            ratio: defaults::COMPRESSOR_RATIO,
            attack_coeff: (-1.0 / (defaults::COMPRESSOR_ATTACK_SECS * rate)).exp(),
            release_coeff: (-1.0 / (defaults::COMPRESSOR_RELEASE_SECS * rate)).exp(),
            envelope_db: -100.0,
        }
    }

    /// Gain reduction in dB for a given input level, with a quadratic
    /// soft knee around the threshold.
    fn reduction_db(&self, input_db: f32) -> f32 {
        let knee_start = self.threshold_db - self.knee_db / 2.0;
        let knee_end = self.threshold_db + self.knee_db / 2.0;
        let slope = 1.0 - 1.0 / self.ratio;

        if input_db <= knee_start {
            0.0
        } else if input_db >= knee_end {
            (input_db - self.threshold_db) * slope
        } else {
            let over = input_db - knee_start;
            slope * over * over / (2.0 * self.knee_db)
        }
    }

    fn process_buffer(&mut self, buffer: &mut [f32]) {
        for sample in buffer.iter_mut() {
            let level_db = 20.0 * sample.abs().max(1e-5).log10();
            let coeff = if level_db > self.envelope_db {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.envelope_db = level_db + coeff * (self.envelope_db - level_db);

            let gain_db = -self.reduction_db(self.envelope_db);
            *sample *= 10.0f32.powf(gain_db / 20.0);
        }
    }
}

fn to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

fn to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

fn valid_cutoff(cutoff_hz: f32, sample_rate: u32) -> bool {
    cutoff_hz > 0.0 && cutoff_hz < sample_rate as f32 / 2.0
}

/// Run a complete clip through the processing chain.
///
/// Stage order is fixed: high-pass, low-pass, compressor, gain. Each stage
/// runs only when enabled and its parameters are valid for the sample rate.
pub fn process_clip(samples: &[i16], sample_rate: u32, options: &ProcessingOptions) -> Vec<i16> {
    if samples.is_empty() || sample_rate == 0 {
        return samples.to_vec();
    }

    let mut buffer = to_f32(samples);

    if options.noise_reduction {
        if valid_cutoff(options.highpass_hz, sample_rate) {
            Biquad::highpass(sample_rate, options.highpass_hz).process_buffer(&mut buffer);
        }
        if valid_cutoff(options.lowpass_hz, sample_rate) {
            Biquad::lowpass(sample_rate, options.lowpass_hz).process_buffer(&mut buffer);
        }
    }

    if options.normalize {
        Compressor::new(sample_rate).process_buffer(&mut buffer);
    }

    if options.auto_gain_control && options.target_volume > 0.0 {
        let rms = rms_f32(&buffer);
        if rms > 0.0 {
            let gain = (options.target_volume / rms).min(defaults::MAX_GAIN);
            for sample in buffer.iter_mut() {
                *sample *= gain;
            }
        }
    }

    to_i16(&buffer)
}

/// Stateful chain for live frames.
///
/// Keeps filter and envelope state across frames so stage behavior matches
/// the offline path. The gain stage uses a smoothed RMS estimate instead of
/// the whole-clip RMS.
pub struct RealtimeChain {
    highpass: Option<Biquad>,
    lowpass: Option<Biquad>,
    compressor: Option<Compressor>,
    auto_gain_control: bool,
    target_volume: f32,
    smoothed_rms: f32,
}

impl RealtimeChain {
    pub fn new(sample_rate: u32, options: &ProcessingOptions) -> Self {
        let highpass = (options.noise_reduction
            && valid_cutoff(options.highpass_hz, sample_rate))
        .then(|| Biquad::highpass(sample_rate, options.highpass_hz));
        let lowpass = (options.noise_reduction && valid_cutoff(options.lowpass_hz, sample_rate))
            .then(|| Biquad::lowpass(sample_rate, options.lowpass_hz));
        let compressor = options.normalize.then(|| Compressor::new(sample_rate));

        Self {
            highpass,
            lowpass,
            compressor,
            auto_gain_control: options.auto_gain_control,
            target_volume: options.target_volume,
            smoothed_rms: 0.0,
        }
    }

    pub fn process_frame(&mut self, samples: &[i16]) -> Vec<i16> {
        if samples.is_empty() {
            return Vec::new();
        }

        let mut buffer = to_f32(samples);

        if let Some(hp) = &mut self.highpass {
            hp.process_buffer(&mut buffer);
        }
        if let Some(lp) = &mut self.lowpass {
            lp.process_buffer(&mut buffer);
        }
        if let Some(comp) = &mut self.compressor {
            comp.process_buffer(&mut buffer);
        }

        if self.auto_gain_control && self.target_volume > 0.0 {
            let frame_rms = rms_f32(&buffer);
            self.smoothed_rms = 0.9 * self.smoothed_rms + 0.1 * frame_rms;
            if self.smoothed_rms > 1e-6 {
                let gain = (self.target_volume / self.smoothed_rms).min(defaults::MAX_GAIN);
                for sample in buffer.iter_mut() {
                    *sample *= gain;
                }
            }
        }

        to_i16(&buffer)
    }
}

fn rms_f32(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    ((sum / samples.len() as f64).sqrt()) as f32
}

/// Level statistics of a finished clip.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipMetrics {
    pub duration_secs: f32,
    pub sample_rate: u32,
    /// Channel count of the analyzed buffer.
    pub channels: u16,
    /// Highest absolute sample, normalized to [0, 1].
    pub peak_amplitude: f32,
    /// Whole-clip RMS, normalized to [0, 1].
    pub rms_level: f32,
    /// Peak over the quiet-frame floor, in dB.
    pub dynamic_range_db: f32,
    /// Loud-frame level over the quiet-frame floor, in dB.
    pub signal_to_noise_db: f32,
}

/// Analyze a clip by comparing loud and quiet 50ms frames.
///
/// The 15th percentile of frame RMS stands in for the noise floor and the
/// 85th for speech level, which holds up well for clips that mix speech
/// and pauses.
pub fn clip_metrics(samples: &[i16], sample_rate: u32) -> ClipMetrics {
    let duration_secs = if sample_rate > 0 {
        samples.len() as f32 / sample_rate as f32
    } else {
        0.0
    };
    let peak_amplitude = samples
        .iter()
        .map(|&s| (s as f32 / i16::MAX as f32).abs())
        .fold(0.0f32, f32::max);
    let rms_level = calculate_rms(samples);

    let frame_len = (sample_rate as usize / 20).max(1);
    let mut frame_rms: Vec<f32> = samples
        .chunks(frame_len)
        .map(calculate_rms)
        .collect();
    frame_rms.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let (signal_to_noise_db, dynamic_range_db) = if frame_rms.len() < 2 || peak_amplitude == 0.0 {
        (0.0, 0.0)
    } else {
        let noise_floor = percentile(&frame_rms, 0.15).max(1e-5);
        let speech_level = percentile(&frame_rms, 0.85);
        let snr = 20.0 * (speech_level.max(1e-5) / noise_floor).log10();
        let range = 20.0 * (peak_amplitude / noise_floor).log10();
        (snr.max(0.0), range.max(0.0))
    };

    ClipMetrics {
        duration_secs,
        sample_rate,
        // capture and WAV decode both deliver mono
        channels: 1,
        peak_amplitude,
        rms_level,
        dynamic_range_db,
        signal_to_noise_db,
    }
}

/// Whether a clip is worth sending to a transcription engine.
///
/// Rejects clips that are too short, too quiet, or indistinguishable from
/// their own noise floor.
pub fn is_quality_acceptable(metrics: &ClipMetrics) -> bool {
    metrics.duration_secs >= defaults::MIN_CLIP_SECS
        && metrics.peak_amplitude >= defaults::MIN_CLIP_PEAK
        && metrics.rms_level >= defaults::MIN_CLIP_RMS
        && metrics.signal_to_noise_db >= defaults::MIN_CLIP_SNR_DB
}

fn percentile(sorted: &[f32], p: f32) -> f32 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f32 * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 16000;

    fn sine(freq: f32, secs: f32, amplitude: f32) -> Vec<i16> {
        let count = (secs * RATE as f32) as usize;
        (0..count)
            .map(|i| {
                let t = i as f32 / RATE as f32;
                (amplitude * (2.0 * PI * freq * t).sin() * i16::MAX as f32) as i16
            })
            .collect()
    }

    fn rms(samples: &[i16]) -> f32 {
        calculate_rms(samples)
    }

    #[test]
    fn test_default_options_match_documented_values() {
        let options = ProcessingOptions::default();
        assert!(options.noise_reduction);
        assert!(options.normalize);
        assert!(options.auto_gain_control);
        assert_eq!(options.target_volume, defaults::RECOGNITION_TARGET_VOLUME);
        assert_eq!(options.highpass_hz, defaults::HIGHPASS_HZ);
        assert_eq!(options.lowpass_hz, defaults::LOWPASS_HZ);
    }

    #[test]
    fn test_language_optimized_widens_band_for_tonal_languages() {
        let zh = language_optimized_options("zh-CN");
        assert_eq!(zh.highpass_hz, defaults::TONAL_HIGHPASS_HZ);
        assert_eq!(zh.lowpass_hz, defaults::TONAL_LOWPASS_HZ);

        let vi = language_optimized_options("vi");
        assert_eq!(vi.highpass_hz, defaults::TONAL_HIGHPASS_HZ);
    }

    #[test]
    fn test_language_optimized_standard_band_for_non_tonal() {
        let en = language_optimized_options("en-US");
        assert_eq!(en.highpass_hz, defaults::HIGHPASS_HZ);
        assert_eq!(en.lowpass_hz, defaults::LOWPASS_HZ);
    }

    #[test]
    fn test_language_optimized_is_case_insensitive() {
        let zh = language_optimized_options("ZH-TW");
        assert_eq!(zh.highpass_hz, defaults::TONAL_HIGHPASS_HZ);
    }

    #[test]
    fn test_highpass_attenuates_rumble_keeps_speech() {
        let rumble = sine(50.0, 1.0, 0.5);
        let speech = sine(1000.0, 1.0, 0.5);

        let mut hp = Biquad::highpass(RATE, defaults::HIGHPASS_HZ);
        let mut rumble_out = to_f32(&rumble);
        hp.process_buffer(&mut rumble_out);

        let mut hp = Biquad::highpass(RATE, defaults::HIGHPASS_HZ);
        let mut speech_out = to_f32(&speech);
        hp.process_buffer(&mut speech_out);

        // Measure after the filter settles
        let rumble_ratio = rms_f32(&rumble_out[4000..]) / rms_f32(&to_f32(&rumble)[4000..]);
        let speech_ratio = rms_f32(&speech_out[4000..]) / rms_f32(&to_f32(&speech)[4000..]);

        assert!(rumble_ratio < 0.5, "rumble ratio {rumble_ratio}");
        assert!(speech_ratio > 0.85, "speech ratio {speech_ratio}");
    }

    #[test]
    fn test_lowpass_attenuates_hiss_keeps_speech() {
        let hiss = sine(6000.0, 1.0, 0.5);
        let speech = sine(500.0, 1.0, 0.5);

        let mut lp = Biquad::lowpass(RATE, 1000.0);
        let mut hiss_out = to_f32(&hiss);
        lp.process_buffer(&mut hiss_out);

        let mut lp = Biquad::lowpass(RATE, 1000.0);
        let mut speech_out = to_f32(&speech);
        lp.process_buffer(&mut speech_out);

        let hiss_ratio = rms_f32(&hiss_out[4000..]) / rms_f32(&to_f32(&hiss)[4000..]);
        let speech_ratio = rms_f32(&speech_out[4000..]) / rms_f32(&to_f32(&speech)[4000..]);

        assert!(hiss_ratio < 0.1, "hiss ratio {hiss_ratio}");
        assert!(speech_ratio > 0.85, "speech ratio {speech_ratio}");
    }

    #[test]
    fn test_compressor_reduces_loud_signal() {
        let loud = sine(440.0, 1.0, 0.9);
        let mut buffer = to_f32(&loud);
        Compressor::new(RATE).process_buffer(&mut buffer);

        let ratio = rms_f32(&buffer) / rms_f32(&to_f32(&loud));
        assert!(ratio < 0.5, "loud ratio {ratio}");
    }

    #[test]
    fn test_compressor_passes_quiet_signal() {
        let quiet = sine(440.0, 1.0, 0.005);
        let mut buffer = to_f32(&quiet);
        Compressor::new(RATE).process_buffer(&mut buffer);

        let ratio = rms_f32(&buffer) / rms_f32(&to_f32(&quiet));
        assert!((ratio - 1.0).abs() < 0.05, "quiet ratio {ratio}");
    }

    #[test]
    fn test_compressor_curve_regions() {
        let comp = Compressor::new(RATE);

        // Below the knee: untouched
        assert_eq!(comp.reduction_db(-60.0), 0.0);
        // Above the knee: full ratio applies
        let above = comp.reduction_db(0.0);
        let expected = (0.0 - defaults::COMPRESSOR_THRESHOLD_DB)
            * (1.0 - 1.0 / defaults::COMPRESSOR_RATIO);
        assert!((above - expected).abs() < 0.001);
        // Inside the knee: between the two
        let inside = comp.reduction_db(defaults::COMPRESSOR_THRESHOLD_DB);
        assert!(inside > 0.0 && inside < above);
    }

    #[test]
    fn test_gain_stage_amplifies_toward_target() {
        let options = ProcessingOptions {
            noise_reduction: false,
            normalize: false,
            auto_gain_control: true,
            target_volume: 0.15,
            ..Default::default()
        };

        // RMS of 0.5 amplitude sine is ~0.354, so gain is uncapped
        let input = sine(440.0, 1.0, 0.5);
        let output = process_clip(&input, RATE, &options);
        assert!((rms(&output) - 0.15).abs() < 0.01, "rms {}", rms(&output));
    }

    #[test]
    fn test_gain_stage_caps_amplification() {
        let options = ProcessingOptions {
            noise_reduction: false,
            normalize: false,
            auto_gain_control: true,
            target_volume: 0.15,
            ..Default::default()
        };

        // Very quiet input needs more than MAX_GAIN, so the cap applies
        let input = sine(440.0, 1.0, 0.02);
        let output = process_clip(&input, RATE, &options);
        let ratio = rms(&output) / rms(&input);
        assert!(
            ratio > defaults::MAX_GAIN - 0.1 && ratio <= defaults::MAX_GAIN + 0.05,
            "ratio {ratio}"
        );
    }

    #[test]
    fn test_process_clip_silence_stays_silent() {
        let silence = vec![0i16; 16000];
        let output = process_clip(&silence, RATE, &ProcessingOptions::default());
        assert_eq!(output.len(), silence.len());
        assert!(output.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_process_clip_empty_input() {
        let output = process_clip(&[], RATE, &ProcessingOptions::default());
        assert!(output.is_empty());
    }

    #[test]
    fn test_invalid_cutoffs_skip_filter_stages() {
        let options = ProcessingOptions {
            noise_reduction: true,
            normalize: false,
            auto_gain_control: false,
            // Both cutoffs beyond Nyquist for 16kHz
            highpass_hz: 9000.0,
            lowpass_hz: 12000.0,
            ..Default::default()
        };

        let input = sine(1000.0, 0.5, 0.3);
        let output = process_clip(&input, RATE, &options);
        assert_eq!(output, input);
    }

    #[test]
    fn test_disabled_stages_pass_through_exactly() {
        let options = ProcessingOptions {
            noise_reduction: false,
            normalize: false,
            auto_gain_control: false,
            ..Default::default()
        };

        let input = sine(1000.0, 0.5, 0.3);
        let output = process_clip(&input, RATE, &options);
        assert_eq!(output, input);
    }

    #[test]
    fn test_process_clip_output_length_matches_input() {
        let input = sine(440.0, 0.73, 0.4);
        let output = process_clip(&input, RATE, &ProcessingOptions::default());
        assert_eq!(output.len(), input.len());
    }

    #[test]
    fn test_realtime_chain_matches_frame_lengths() {
        let mut chain = RealtimeChain::new(RATE, &ProcessingOptions::default());
        let frame = sine(440.0, 0.1, 0.3);

        for _ in 0..5 {
            let out = chain.process_frame(&frame);
            assert_eq!(out.len(), frame.len());
        }
    }

    #[test]
    fn test_realtime_chain_carries_state_across_frames() {
        let options = ProcessingOptions {
            normalize: false,
            auto_gain_control: false,
            ..Default::default()
        };
        let mut chain = RealtimeChain::new(RATE, &options);
        let frame = sine(1000.0, 0.1, 0.3);

        // First frame includes the filter transient; later frames settle
        // to a pass-band level close to the input
        let mut last = chain.process_frame(&frame);
        for _ in 0..10 {
            last = chain.process_frame(&frame);
        }
        let settled_rms = rms(&last);
        assert!(settled_rms > 0.0);
        assert!((settled_rms - rms(&frame)).abs() < 0.05 * rms(&frame));
    }

    #[test]
    fn test_realtime_chain_empty_frame() {
        let mut chain = RealtimeChain::new(RATE, &ProcessingOptions::default());
        assert!(chain.process_frame(&[]).is_empty());
    }

    #[test]
    fn test_clip_metrics_of_speech_with_pauses() {
        // Half a second of tone, half a second of silence
        let mut samples = sine(440.0, 0.5, 0.5);
        samples.extend(vec![0i16; 8000]);

        let metrics = clip_metrics(&samples, RATE);

        assert!((metrics.duration_secs - 1.0).abs() < 0.01);
        assert_eq!(metrics.sample_rate, RATE);
        assert_eq!(metrics.channels, 1);
        assert!((metrics.peak_amplitude - 0.5).abs() < 0.01);
        assert!(metrics.signal_to_noise_db > 20.0, "snr {}", metrics.signal_to_noise_db);
        assert!(metrics.dynamic_range_db >= metrics.signal_to_noise_db);
    }

    #[test]
    fn test_clip_metrics_of_silence() {
        let metrics = clip_metrics(&vec![0i16; 16000], RATE);
        assert_eq!(metrics.peak_amplitude, 0.0);
        assert_eq!(metrics.rms_level, 0.0);
        assert_eq!(metrics.signal_to_noise_db, 0.0);
    }

    #[test]
    fn test_clip_metrics_empty_input() {
        let metrics = clip_metrics(&[], RATE);
        assert_eq!(metrics.duration_secs, 0.0);
        assert_eq!(metrics.peak_amplitude, 0.0);
    }

    #[test]
    fn test_quality_gate_accepts_decent_clip() {
        // A second of speech-level tone followed by a second of room silence
        let mut samples = sine(440.0, 1.0, 0.4);
        samples.extend(vec![0i16; 16000]);
        let metrics = clip_metrics(&samples, RATE);
        assert!(is_quality_acceptable(&metrics));
    }

    #[test]
    fn test_quality_gate_rejects_too_short_clip() {
        let samples = sine(440.0, 0.2, 0.4);
        let metrics = clip_metrics(&samples, RATE);
        assert!(!is_quality_acceptable(&metrics));
    }

    #[test]
    fn test_quality_gate_rejects_silence() {
        let metrics = clip_metrics(&vec![0i16; 16000], RATE);
        assert!(!is_quality_acceptable(&metrics));
    }

    #[test]
    fn test_percentile_bounds() {
        let sorted = vec![1.0f32, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&sorted, 0.0), 1.0);
        assert_eq!(percentile(&sorted, 1.0), 5.0);
        assert_eq!(percentile(&sorted, 0.5), 3.0);
        assert_eq!(percentile(&[], 0.5), 0.0);
    }
}
