//! Calibration sequence
//!
//! A calibration run is a fixed sequence of timed, labeled phases: one
//! baseline/rest phase with no stimulus, then one phase per target frequency
//! while the subject attends that stimulus. The controller accumulates the
//! continuous data of each phase and advances phases by elapsed time on the
//! chunks it is fed, so it is driven by the same polling pattern as online
//! detection.
//!
//! After the last phase, [`CalibrationController::finish`]:
//!
//! 1. ranks channels by summed SNR across all targets on the baseline data
//!    and keeps the top-k subset,
//! 2. measures the baseline noise floor as the median SNR over off-target
//!    probe frequencies,
//! 3. segments each target phase into non-overlapping analysis-window-length
//!    chunks, labels them, and trains the detector,
//! 4. derives an adaptive score threshold from the in-class score
//!    distributions (a fraction of the weakest target's 75th percentile,
//!    floored at a strategy-dependent minimum), since raw score magnitudes
//!    vary by subject and hardware gain.

use serde::Serialize;
use tracing::info;

use photic_bci_core::config::{DetectorKind, EngineConfig, TargetSet};
use photic_bci_core::error::CalibrationError;

use crate::detect::psd::{averaged_psd, harmonic_snr};
use crate::detect::{FrequencyDetector, TrainingData};
use crate::filters::FilterSpec;
use crate::{select_channels, Window};

/// Threshold = `THRESHOLD_FRACTION` x the weakest target's p75 score.
const THRESHOLD_FRACTION: f64 = 0.7;
/// Threshold floor for SNR-scaled scores.
const SNR_THRESHOLD_FLOOR: f64 = 1.5;
/// Threshold floor for correlation-scaled scores.
const CORRELATION_THRESHOLD_FLOOR: f64 = 0.2;
/// Off-target probe range for the baseline noise floor, in whole Hz.
const PROBE_RANGE_HZ: std::ops::Range<u32> = 5..30;

/// One step of the calibration sequence.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CalibrationPhase {
    /// Rest phase: no stimulus, used for channel ranking and the noise floor
    Baseline,
    /// Attend the stimulus flickering at this frequency
    Target {
        /// Stimulation frequency in Hz
        frequency: f64,
    },
}

impl CalibrationPhase {
    /// Human-readable label for operator cueing.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Baseline => "baseline (rest)".to_string(),
            Self::Target { frequency } => format!("attend {frequency} Hz"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Idle,
    CollectingBaseline,
    CollectingTarget(usize),
    Computing,
    Complete,
}

/// Per-target score statistics from the calibration run.
#[derive(Clone, Debug, Serialize)]
pub struct TargetStats {
    /// Target frequency in Hz
    pub frequency: f64,
    /// Mean in-class score across segments
    pub mean: f64,
    /// Best in-class score
    pub max: f64,
    /// 75th percentile of in-class scores
    pub p75: f64,
    /// Number of labeled segments collected
    pub n_segments: usize,
}

/// Derived parameters of a completed calibration run.
#[derive(Clone, Debug, Serialize)]
pub struct CalibrationOutcome {
    /// Channel subset selected by summed-SNR ranking, by index
    pub selected_channels: Vec<usize>,
    /// Median off-target SNR during rest
    pub baseline_noise: f64,
    /// Adaptive score threshold for the online gate
    pub threshold: f64,
    /// Per-target score statistics
    pub target_stats: Vec<TargetStats>,
}

/// Orchestrates the baseline + per-frequency collection sequence.
pub struct CalibrationController {
    targets: TargetSet,
    filter: FilterSpec,
    sampling_rate: f64,
    window_samples: usize,
    n_select: usize,
    neighbor_bw: f64,
    guard_bw: f64,
    baseline_ms: u64,
    trial_ms: u64,

    state: State,
    phase_started_ms: u64,
    baseline: Window,
    target_data: Vec<Window>,
}

impl CalibrationController {
    /// Create a controller for one calibration run.
    ///
    /// The target set comes pre-validated from the session.
    #[must_use]
    pub fn new(config: &EngineConfig, targets: TargetSet) -> Self {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let baseline_ms = (config.baseline_seconds * 1000.0).round() as u64;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let trial_ms = (config.trial_seconds * 1000.0).round() as u64;
        let n_targets = targets.len();
        Self {
            targets,
            filter: FilterSpec::from_config(config),
            sampling_rate: config.sampling_rate,
            window_samples: config.window_samples(),
            n_select: config.n_select_channels.max(1),
            neighbor_bw: config.snr_neighbor_bw,
            guard_bw: config.snr_guard_bw,
            baseline_ms,
            trial_ms,
            state: State::Idle,
            phase_started_ms: 0,
            baseline: Window::new(),
            target_data: vec![Window::new(); n_targets],
        }
    }

    /// The full phase schedule: `(phase, duration_ms)` in order.
    #[must_use]
    pub fn phases(&self) -> Vec<(CalibrationPhase, u64)> {
        let mut phases = vec![(CalibrationPhase::Baseline, self.baseline_ms)];
        for &frequency in self.targets.frequencies() {
            phases.push((CalibrationPhase::Target { frequency }, self.trial_ms));
        }
        phases
    }

    /// The phase currently collecting, if any.
    #[must_use]
    pub fn current_phase(&self) -> Option<CalibrationPhase> {
        match self.state {
            State::CollectingBaseline => Some(CalibrationPhase::Baseline),
            State::CollectingTarget(i) => Some(CalibrationPhase::Target {
                frequency: self.targets.frequencies()[i],
            }),
            _ => None,
        }
    }

    /// True once every phase has elapsed and [`Self::finish`] may run.
    #[must_use]
    pub fn done_collecting(&self) -> bool {
        self.state == State::Computing
    }

    /// Begin the baseline phase at `now_ms`.
    pub fn start(&mut self, now_ms: u64) {
        self.state = State::CollectingBaseline;
        self.phase_started_ms = now_ms;
        self.baseline = Window::new();
        for block in &mut self.target_data {
            block.clear();
        }
        info!(phase = %CalibrationPhase::Baseline.label(), "calibration started");
    }

    /// Feed freshly acquired samples at `now_ms`.
    ///
    /// Appends the chunk to the active phase's accumulator and advances the
    /// phase once its duration has elapsed. Returns the newly entered phase
    /// on a transition so the caller can cue the subject.
    ///
    /// # Errors
    ///
    /// [`CalibrationError::InvalidState`] outside the collecting phases.
    pub fn add_chunk(
        &mut self,
        chunk: &[Vec<f64>],
        now_ms: u64,
    ) -> Result<Option<CalibrationPhase>, CalibrationError> {
        let (block, duration) = match self.state {
            State::CollectingBaseline => (&mut self.baseline, self.baseline_ms),
            State::CollectingTarget(i) => (&mut self.target_data[i], self.trial_ms),
            _ => {
                return Err(CalibrationError::InvalidState {
                    expected: "CollectingBaseline or CollectingTarget",
                    actual: format!("{:?}", self.state),
                })
            }
        };

        if block.is_empty() {
            block.extend(chunk.iter().cloned());
        } else {
            debug_assert_eq!(block.len(), chunk.len());
            for (acc, channel) in block.iter_mut().zip(chunk) {
                acc.extend_from_slice(channel);
            }
        }

        if now_ms.saturating_sub(self.phase_started_ms) < duration {
            return Ok(None);
        }

        // Phase elapsed; advance
        self.state = match self.state {
            State::CollectingBaseline => State::CollectingTarget(0),
            State::CollectingTarget(i) if i + 1 < self.targets.len() => {
                State::CollectingTarget(i + 1)
            }
            _ => State::Computing,
        };
        self.phase_started_ms = now_ms;

        let next = self.current_phase();
        match &next {
            Some(phase) => info!(phase = %phase.label(), "calibration phase started"),
            None => info!("calibration collection complete"),
        }
        Ok(next)
    }

    /// Derive the calibration outcome and train the detector.
    ///
    /// # Errors
    ///
    /// [`CalibrationError::InvalidState`] before collection finished;
    /// [`CalibrationError::InsufficientSamples`] when any phase gathered
    /// less than one analysis window of data.
    pub fn finish(
        &mut self,
        detector: &mut FrequencyDetector,
    ) -> Result<CalibrationOutcome, CalibrationError> {
        if self.state != State::Computing {
            return Err(CalibrationError::InvalidState {
                expected: "Computing",
                actual: format!("{:?}", self.state),
            });
        }

        let baseline_len = self.baseline.first().map_or(0, Vec::len);
        if baseline_len < self.window_samples {
            return Err(CalibrationError::InsufficientSamples {
                got: baseline_len,
                need: self.window_samples,
            });
        }
        let mut baseline = self.baseline.clone();
        self.filter.apply_all(&mut baseline);

        let selected_channels = self.rank_channels(&baseline);
        let baseline_view = select_channels(&baseline, &selected_channels);
        let baseline_noise = self.noise_floor(&baseline_view);
        info!(
            ?selected_channels,
            baseline_noise, "baseline phase processed"
        );

        // Segment each target phase and score the segments in-class
        let mut training = TrainingData::default();
        let mut target_stats = Vec::with_capacity(self.targets.len());
        let mut weakest_p75 = f64::MAX;
        for (i, &frequency) in self.targets.frequencies().iter().enumerate() {
            let mut block = self.target_data[i].clone();
            let block_len = block.first().map_or(0, Vec::len);
            if block_len < self.window_samples {
                return Err(CalibrationError::InsufficientSamples {
                    got: block_len,
                    need: self.window_samples,
                });
            }
            self.filter.apply_all(&mut block);
            let block = select_channels(&block, &selected_channels);

            let mut scores = Vec::new();
            let mut start = 0;
            while start + self.window_samples <= block_len {
                let segment: Window = block
                    .iter()
                    .map(|channel| channel[start..start + self.window_samples].to_vec())
                    .collect();
                let score = detector.detect(&segment).score_for(frequency).unwrap_or(0.0);
                scores.push(score);
                training.push(frequency, segment);
                start += self.window_samples;
            }

            let n_segments = scores.len();
            let mean = scores.iter().sum::<f64>() / n_segments as f64;
            let max = scores.iter().copied().fold(f64::MIN, f64::max);
            let p75 = percentile(&mut scores, 75.0);
            weakest_p75 = weakest_p75.min(p75);
            info!(frequency, mean, max, p75, n_segments, "target phase scored");
            target_stats.push(TargetStats {
                frequency,
                mean,
                max,
                p75,
                n_segments,
            });
        }

        detector.train(&training);

        let floor = match detector.kind() {
            DetectorKind::Psd => SNR_THRESHOLD_FLOOR,
            DetectorKind::Cca | DetectorKind::Fbcca => CORRELATION_THRESHOLD_FLOOR,
        };
        let threshold = (THRESHOLD_FRACTION * weakest_p75).max(floor);
        detector.set_calibration(baseline_noise, selected_channels.clone(), threshold);

        self.state = State::Complete;
        info!(threshold, "calibration complete");
        Ok(CalibrationOutcome {
            selected_channels,
            baseline_noise,
            threshold,
            target_stats,
        })
    }

    /// Rank channels by summed SNR across all targets; keep the top-k,
    /// reported in ascending index order.
    fn rank_channels(&self, baseline: &Window) -> Vec<usize> {
        let mut ranked: Vec<(usize, f64)> = baseline
            .iter()
            .enumerate()
            .map(|(idx, channel)| {
                let single: Window = vec![channel.clone()];
                let (freqs, psd) = averaged_psd(&single, self.sampling_rate, 1.0);
                let summed: f64 = self
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
                    .sum();
                (idx, summed)
            })
            .collect();

        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        let mut selected: Vec<usize> = ranked
            .iter()
            .take(self.n_select.min(baseline.len()))
            .map(|&(idx, _)| idx)
            .collect();
        selected.sort_unstable();
        selected
    }

    /// Median SNR over off-target integer probe frequencies.
    fn noise_floor(&self, baseline: &Window) -> f64 {
        let (freqs, psd) = averaged_psd(baseline, self.sampling_rate, 1.0);
        let mut probes: Vec<f64> = PROBE_RANGE_HZ
            .map(f64::from)
            .filter(|probe| {
                self.targets
                    .frequencies()
                    .iter()
                    .all(|&t| (probe - t).abs() >= 0.5)
            })
            .map(|probe| {
                harmonic_snr(
                    &freqs,
                    &psd,
                    probe,
                    self.targets.harmonics(),
                    self.neighbor_bw,
                    self.guard_bw,
                )
            })
            .collect();
        percentile(&mut probes, 50.0)
    }
}

/// Linear-interpolation percentile of an unsorted sample.
fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    let rank = p / 100.0 * (values.len() - 1) as f64;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let lo = rank.floor() as usize;
    let hi = (lo + 1).min(values.len() - 1);
    let weight = rank - rank.floor();
    values[lo] * (1.0 - weight) + values[hi] * weight
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::SyntheticSsvep;

    fn quick_config() -> EngineConfig {
        EngineConfig {
            sampling_rate: 125.0,
            target_frequencies: vec![10.0, 15.0],
            window_seconds: 1.0,
            buffer_seconds: 4.0,
            baseline_seconds: 2.0,
            trial_seconds: 4.0,
            n_select_channels: 2,
            ..EngineConfig::default()
        }
    }

    fn controller(config: &EngineConfig) -> CalibrationController {
        CalibrationController::new(config, config.target_set().unwrap())
    }

    #[test]
    fn phase_schedule_covers_baseline_and_targets() {
        let config = quick_config();
        let phases = controller(&config).phases();
        assert_eq!(phases.len(), 3);
        assert_eq!(phases[0], (CalibrationPhase::Baseline, 2000));
        assert_eq!(
            phases[1],
            (CalibrationPhase::Target { frequency: 10.0 }, 4000)
        );
    }

    #[test]
    fn transitions_follow_elapsed_time() {
        let config = quick_config();
        let mut ctl = controller(&config);
        ctl.start(0);
        assert_eq!(ctl.current_phase(), Some(CalibrationPhase::Baseline));

        let chunk = vec![vec![0.0; 25]; 2];
        assert_eq!(ctl.add_chunk(&chunk, 1000).unwrap(), None);
        assert_eq!(
            ctl.add_chunk(&chunk, 2000).unwrap(),
            Some(CalibrationPhase::Target { frequency: 10.0 })
        );
        assert_eq!(ctl.add_chunk(&chunk, 5999).unwrap(), None);
        assert_eq!(
            ctl.add_chunk(&chunk, 6000).unwrap(),
            Some(CalibrationPhase::Target { frequency: 15.0 })
        );
        assert_eq!(ctl.add_chunk(&chunk, 10_000).unwrap(), None);
        assert!(ctl.done_collecting());
    }

    #[test]
    fn add_chunk_outside_collection_is_rejected() {
        let config = quick_config();
        let mut ctl = controller(&config);
        let chunk = vec![vec![0.0; 10]; 2];
        assert!(matches!(
            ctl.add_chunk(&chunk, 0),
            Err(CalibrationError::InvalidState { .. })
        ));
    }

    #[test]
    fn finish_before_done_is_rejected() {
        let config = quick_config();
        let mut ctl = controller(&config);
        ctl.start(0);
        let mut detector = FrequencyDetector::from_config(&config).unwrap();
        assert!(matches!(
            ctl.finish(&mut detector),
            Err(CalibrationError::InvalidState { .. })
        ));
    }

    #[test]
    fn starved_phase_reports_insufficient_samples() {
        let config = quick_config();
        let mut ctl = controller(&config);
        ctl.start(0);
        // Jump straight through every phase with almost no data
        let tiny = vec![vec![0.0; 5]; 2];
        ctl.add_chunk(&tiny, 2000).unwrap();
        ctl.add_chunk(&tiny, 6000).unwrap();
        ctl.add_chunk(&tiny, 10_000).unwrap();

        let mut detector = FrequencyDetector::from_config(&config).unwrap();
        assert!(matches!(
            ctl.finish(&mut detector),
            Err(CalibrationError::InsufficientSamples { .. })
        ));
    }

    #[test]
    fn full_run_trains_detector_and_derives_threshold() {
        let config = quick_config();
        let mut ctl = controller(&config);
        let mut detector = FrequencyDetector::from_config(&config).unwrap();

        let mut synth = SyntheticSsvep::new(125.0, 4, 10.0, 4.0, 21);
        synth.set_stimulated(false);
        ctl.start(0);

        // 0.2 s chunks; switch the synthetic stimulus on phase transitions
        let mut now = 0u64;
        while !ctl.done_collecting() {
            now += 200;
            let chunk = synth.next_chunk(25);
            if let Some(phase) = ctl.add_chunk(&chunk, now).unwrap() {
                match phase {
                    CalibrationPhase::Target { frequency } => {
                        synth.set_stimulated(true);
                        synth.set_frequency(frequency);
                    }
                    CalibrationPhase::Baseline => {}
                }
            }
        }

        let outcome = ctl.finish(&mut detector).unwrap();
        assert!(detector.is_trained());
        assert_eq!(outcome.selected_channels.len(), 2);
        assert!(outcome.threshold >= SNR_THRESHOLD_FLOOR);
        assert_eq!(outcome.target_stats.len(), 2);
        for stats in &outcome.target_stats {
            assert!(stats.n_segments >= 3, "segments = {}", stats.n_segments);
            assert!(stats.mean > SNR_THRESHOLD_FLOOR, "mean = {}", stats.mean);
        }
        let template = detector.template().unwrap();
        assert_eq!(template.threshold, outcome.threshold);
        assert_eq!(template.selected_channels, outcome.selected_channels);
    }

    #[test]
    fn channel_ranking_prefers_responsive_channels() {
        let config = quick_config();
        let ctl = controller(&config);

        // Channels 0 and 2 carry a target-frequency response, 1 and 3 only
        // noise; ranking must pick out 0 and 2
        let mut noise = SyntheticSsvep::new(125.0, 4, 10.0, 2.0, 3);
        noise.set_stimulated(false);
        let mut baseline = noise.next_chunk(250);
        for &ch in &[0usize, 2] {
            for (i, v) in baseline[ch].iter_mut().enumerate() {
                let t = i as f64 / 125.0;
                *v += 1.5 * (std::f64::consts::TAU * 10.0 * t).sin();
            }
        }

        let selected = ctl.rank_channels(&baseline);
        assert_eq!(selected, vec![0, 2]);
    }

    #[test]
    fn percentile_interpolates() {
        let mut values = vec![1.0, 2.0, 3.0, 4.0];
        assert!((percentile(&mut values, 75.0) - 3.25).abs() < 1e-12);
        assert!((percentile(&mut values, 50.0) - 2.5).abs() < 1e-12);
        let mut single = vec![7.0];
        assert_eq!(percentile(&mut single, 75.0), 7.0);
    }
}
