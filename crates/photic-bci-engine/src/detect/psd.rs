//! PSD/SNR detection strategy
//!
//! Welch power-spectral-density estimation with harmonic-weighted
//! signal-to-noise scoring. Per channel, the window is split into
//! half-overlapping Hann-windowed segments whose periodograms are averaged;
//! multi-channel windows average the per-channel PSDs after estimation
//! (never the raw signals before it). Each target's score is the power at
//! its nearest bin, plus down-weighted harmonic power, divided by the mean
//! power of a neighbor band around the peak with a guard band excluded.

use rustfft::{num_complex::Complex, FftPlanner};

use photic_bci_core::config::{EngineConfig, TargetSet};
use photic_bci_core::error::ConfigError;
use photic_bci_core::event::DetectionResult;

use crate::detect::{TemplateData, TrainingData};
use crate::Window;

/// Harmonic contribution weights: fundamental, 2nd, 3rd.
///
/// Monotonically decreasing; empirically chosen defaults, not invariants.
const HARMONIC_WEIGHTS: [f64; 3] = [1.0, 0.5, 0.25];

/// Floor applied to noise power so scores stay finite.
const NOISE_EPSILON: f64 = 1e-12;

/// Welch-PSD SSVEP detector.
pub struct PsdDetector {
    sampling_rate: f64,
    targets: TargetSet,
    neighbor_bw: f64,
    guard_bw: f64,
    segment_seconds: f64,
}

impl PsdDetector {
    /// Build from the engine config.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the target set is invalid.
    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            sampling_rate: config.sampling_rate,
            targets: config.target_set()?,
            neighbor_bw: config.snr_neighbor_bw,
            guard_bw: config.snr_guard_bw,
            segment_seconds: 1.0,
        })
    }

    /// Score one filtered window against every target frequency.
    #[must_use]
    pub fn detect(&self, window: &Window) -> DetectionResult {
        let (freqs, psd) = averaged_psd(window, self.sampling_rate, self.segment_seconds);
        let scores: Vec<f64> = self
            .targets
            .frequencies()
            .iter()
            .map(|&f| {
                harmonic_snr(
                    &freqs,
                    &psd,
                    f,
                    self.targets.harmonics(),
                    self.neighbor_bw,
                    self.guard_bw,
                )
            })
            .collect();
        DetectionResult::from_scores(self.targets.frequencies(), &scores)
    }

    /// Average the in-class score per frequency into scalar templates.
    pub(crate) fn build_templates(&self, data: &TrainingData) -> TemplateData {
        let features = data
            .frequencies()
            .filter_map(|freq| {
                let segments = data.segments(freq)?;
                if segments.is_empty() {
                    return None;
                }
                let mean = segments
                    .iter()
                    .map(|s| self.detect(s).score_for(freq).unwrap_or(0.0))
                    .sum::<f64>()
                    / segments.len() as f64;
                Some((freq, mean))
            })
            .collect();
        TemplateData::Features(features)
    }
}

/// Hann window coefficients.
fn hann_window(size: usize) -> Vec<f64> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f64::consts::PI * i as f64 / (size - 1) as f64).cos()))
        .collect()
}

/// Welch PSD of a single channel.
///
/// Half-overlapping Hann-windowed segments with per-segment mean removal;
/// one-sided density scaling. A channel shorter than the requested segment
/// length shrinks the segment rather than failing.
fn welch_psd(samples: &[f64], sampling_rate: f64, nperseg: usize) -> (Vec<f64>, Vec<f64>) {
    let nperseg = nperseg.min(samples.len());
    // Below four samples the Hann window degenerates; treat as no data
    if nperseg < 4 {
        return (Vec::new(), Vec::new());
    }

    let window = hann_window(nperseg);
    let window_power: f64 = window.iter().map(|w| w * w).sum();
    let scale = 1.0 / (sampling_rate * window_power);
    let n_freqs = nperseg / 2 + 1;

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(nperseg);

    let step = (nperseg / 2).max(1);
    let mut psd = vec![0.0; n_freqs];
    let mut n_segments = 0usize;
    let mut start = 0;
    while start + nperseg <= samples.len() {
        let segment = &samples[start..start + nperseg];
        let mean = segment.iter().sum::<f64>() / nperseg as f64;

        let mut buffer: Vec<Complex<f64>> = segment
            .iter()
            .zip(&window)
            .map(|(&s, &w)| Complex::new((s - mean) * w, 0.0))
            .collect();
        fft.process(&mut buffer);

        for (acc, c) in psd.iter_mut().zip(&buffer[..n_freqs]) {
            *acc += (c.re * c.re + c.im * c.im) * scale;
        }
        n_segments += 1;
        start += step;
    }

    if n_segments > 1 {
        for v in &mut psd {
            *v /= n_segments as f64;
        }
    }
    // One-sided spectrum: interior bins carry both halves
    let last = if nperseg % 2 == 0 {
        n_freqs - 1
    } else {
        n_freqs
    };
    for v in &mut psd[1..last] {
        *v *= 2.0;
    }

    let freqs = (0..n_freqs)
        .map(|k| k as f64 * sampling_rate / nperseg as f64)
        .collect();
    (freqs, psd)
}

/// Channel-averaged Welch PSD of a multichannel window.
///
/// Each channel's PSD is estimated independently, then averaged.
pub(crate) fn averaged_psd(
    window: &Window,
    sampling_rate: f64,
    segment_seconds: f64,
) -> (Vec<f64>, Vec<f64>) {
    let n_samples = window.first().map_or(0, Vec::len);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let nperseg = ((segment_seconds * sampling_rate).round() as usize).min(n_samples);

    let mut freqs = Vec::new();
    let mut mean_psd: Vec<f64> = Vec::new();
    let mut n_channels = 0usize;
    for channel in window {
        let (f, p) = welch_psd(channel, sampling_rate, nperseg);
        if p.is_empty() {
            continue;
        }
        if mean_psd.is_empty() {
            freqs = f;
            mean_psd = p;
        } else {
            for (acc, v) in mean_psd.iter_mut().zip(&p) {
                *acc += v;
            }
        }
        n_channels += 1;
    }
    if n_channels > 1 {
        for v in &mut mean_psd {
            *v /= n_channels as f64;
        }
    }
    (freqs, mean_psd)
}

/// SNR of a single spectral peak.
///
/// Signal power is the PSD at the bin nearest `target`; noise is the mean
/// PSD over `neighbor_bw` on each side, excluding `guard_bw` immediately
/// around the peak so the peak cannot contaminate its own noise estimate.
pub(crate) fn snr_at(
    freqs: &[f64],
    psd: &[f64],
    target: f64,
    neighbor_bw: f64,
    guard_bw: f64,
) -> f64 {
    if freqs.len() < 2 {
        return 0.0;
    }
    let target_idx = nearest_bin(freqs, target);
    let signal_power = psd[target_idx];

    let resolution = freqs[1] - freqs[0];
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let guard_bins = (guard_bw / resolution).ceil() as usize;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let neighbor_bins = (neighbor_bw / resolution).ceil() as usize;

    let left_start = target_idx.saturating_sub(neighbor_bins + guard_bins);
    let left_end = target_idx.saturating_sub(guard_bins);
    let right_start = (target_idx + guard_bins + 1).min(psd.len());
    let right_end = (target_idx + guard_bins + neighbor_bins + 1).min(psd.len());

    let noise: Vec<f64> = psd[left_start..left_end]
        .iter()
        .chain(&psd[right_start..right_end])
        .copied()
        .collect();
    if noise.is_empty() {
        return 0.0;
    }
    let noise_power = noise.iter().sum::<f64>() / noise.len() as f64;
    signal_power / noise_power.max(NOISE_EPSILON)
}

/// Harmonic-weighted SNR for one target frequency.
///
/// Harmonics beyond the spectrum's reach contribute nothing.
pub(crate) fn harmonic_snr(
    freqs: &[f64],
    psd: &[f64],
    target: f64,
    harmonics: usize,
    neighbor_bw: f64,
    guard_bw: f64,
) -> f64 {
    let Some(&top) = freqs.last() else {
        return 0.0;
    };
    let mut total = 0.0;
    for (k, &weight) in HARMONIC_WEIGHTS.iter().enumerate().take(harmonics) {
        let freq = target * (k + 1) as f64;
        if freq > top {
            break;
        }
        total += weight * snr_at(freqs, psd, freq, neighbor_bw, guard_bw);
    }
    total
}

fn nearest_bin(freqs: &[f64], target: f64) -> usize {
    let mut best = 0;
    let mut best_dist = f64::MAX;
    for (i, &f) in freqs.iter().enumerate() {
        let dist = (f - target).abs();
        if dist < best_dist {
            best_dist = dist;
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::FilterSpec;
    use crate::synth::SyntheticSsvep;

    fn config_125() -> EngineConfig {
        EngineConfig {
            sampling_rate: 125.0,
            target_frequencies: vec![10.0, 15.0],
            ..EngineConfig::default()
        }
    }

    fn sine_window(freq: f64, rate: f64, n: usize, channels: usize) -> Window {
        (0..channels)
            .map(|_| {
                (0..n)
                    .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / rate).sin())
                    .collect()
            })
            .collect()
    }

    #[test]
    fn welch_peaks_at_signal_frequency() {
        let x: Vec<f64> = (0..500)
            .map(|i| (2.0 * std::f64::consts::PI * 10.0 * i as f64 / 250.0).sin())
            .collect();
        let (freqs, psd) = welch_psd(&x, 250.0, 256);
        let peak = psd
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .unwrap()
            .0;
        assert!((freqs[peak] - 10.0).abs() < 1.0);
    }

    #[test]
    fn clean_sine_scores_its_own_target() {
        let detector = PsdDetector::from_config(&config_125()).unwrap();
        let window = sine_window(15.0, 125.0, 250, 2);
        let result = detector.detect(&window);
        assert_eq!(result.frequency, 15.0);
        assert!(result.score > 5.0, "score = {}", result.score);
        assert!(result.confidence > 0.5);
    }

    #[test]
    fn synthetic_accuracy_over_seeded_trials() {
        // At SNR 3 a single-frequency signal must classify correctly in at
        // least 90% of seeded trials
        let config = config_125();
        let detector = PsdDetector::from_config(&config).unwrap();
        let filter = FilterSpec::from_config(&config);

        let mut correct = 0;
        let mut trials = 0;
        for &true_freq in &[10.0, 15.0] {
            for seed in 0..10u64 {
                let mut synth = SyntheticSsvep::new(125.0, 4, true_freq, 3.0, seed);
                let mut window = synth.next_chunk(250);
                filter.apply_all(&mut window);
                let result = detector.detect(&window);
                if result.frequency == true_freq {
                    correct += 1;
                }
                trials += 1;
            }
        }
        assert!(correct * 10 >= trials * 9, "accuracy {correct}/{trials}");
    }

    #[test]
    fn simultaneous_targets_yield_low_confidence() {
        // Equal-amplitude 10 Hz + 15 Hz must not produce a confident pick.
        // A wider neighbor band tightens the noise estimate so the near-tie
        // is not swamped by estimator variance.
        let config = EngineConfig {
            snr_neighbor_bw: 3.0,
            ..config_125()
        };
        let detector = PsdDetector::from_config(&config).unwrap();
        let mut low_confidence = 0;
        for seed in 0..10u64 {
            let mut noise = SyntheticSsvep::new(125.0, 2, 10.0, 3.0, seed);
            noise.set_stimulated(false);
            let mut window = noise.next_chunk(250);
            for channel in &mut window {
                for (i, v) in channel.iter_mut().enumerate() {
                    let t = i as f64 / 125.0;
                    *v += (2.0 * std::f64::consts::PI * 10.0 * t).sin()
                        + (2.0 * std::f64::consts::PI * 15.0 * t).sin();
                }
            }
            if detector.detect(&window).confidence < 0.3 {
                low_confidence += 1;
            }
        }
        assert!(low_confidence > 5, "only {low_confidence}/10 trials were ties");
    }

    #[test]
    fn pure_noise_scores_near_equal() {
        let config = EngineConfig {
            snr_neighbor_bw: 3.0,
            ..config_125()
        };
        let detector = PsdDetector::from_config(&config).unwrap();
        let mut low_confidence = 0;
        for seed in 0..10u64 {
            let mut synth = SyntheticSsvep::new(125.0, 2, 10.0, 3.0, seed + 50);
            synth.set_stimulated(false);
            let window = synth.next_chunk(250);
            let result = detector.detect(&window);
            assert!(result.scores.iter().all(|s| s.score.is_finite()));
            if result.confidence < 0.5 {
                low_confidence += 1;
            }
        }
        assert!(low_confidence > 5, "only {low_confidence}/10 noise trials were indecisive");
    }

    #[test]
    fn short_window_degrades_gracefully() {
        let detector = PsdDetector::from_config(&config_125()).unwrap();
        // 0.1 s at 125 Hz
        let window = sine_window(10.0, 125.0, 12, 1);
        let result = detector.detect(&window);
        assert_eq!(result.scores.len(), 2);
        assert!(result.confidence.is_finite());
    }

    #[test]
    fn empty_window_is_well_formed() {
        let detector = PsdDetector::from_config(&config_125()).unwrap();
        let result = detector.detect(&Window::new());
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn guard_band_is_excluded_from_noise() {
        // A lone peak with an empty spectrum elsewhere: noise band must not
        // include the peak itself
        let freqs: Vec<f64> = (0..64).map(|k| k as f64 * 0.5).collect();
        let mut psd = vec![1e-3; 64];
        psd[20] = 1.0; // 10 Hz
        let snr = snr_at(&freqs, &psd, 10.0, 1.0, 0.3);
        assert!(snr > 500.0, "snr = {snr}");
    }

    #[test]
    fn harmonics_above_nyquist_are_skipped() {
        let freqs: Vec<f64> = (0..32).map(|k| k as f64).collect(); // up to 31 Hz
        let psd = vec![1.0; 32];
        // 3rd harmonic of 15 Hz (45 Hz) is out of reach; must not panic
        let score = harmonic_snr(&freqs, &psd, 15.0, 3, 1.0, 0.3);
        assert!(score.is_finite());
    }
}
