//! Frequency-detection strategies
//!
//! Two interchangeable families operate on a filtered analysis window:
//!
//! - [`psd`]: Welch power-spectral-density estimate with harmonic-weighted
//!   SNR scoring per target frequency
//! - [`cca`]: canonical correlation between the window and per-frequency
//!   sine/cosine reference harmonics, optionally averaged across a sub-band
//!   filter bank (FBCCA)
//!
//! The strategy is a closed set selected once at construction through
//! [`FrequencyDetector`]; there is no runtime string dispatch and each
//! algorithm is independently testable.

pub mod cca;
pub mod psd;

use photic_bci_core::config::{DetectorKind, EngineConfig};
use photic_bci_core::error::ConfigError;
use photic_bci_core::event::DetectionResult;

use crate::Window;

pub use cca::{CcaDetector, FbccaDetector};
pub use psd::PsdDetector;

/// Labeled calibration segments, grouped by target frequency.
#[derive(Debug, Default)]
pub struct TrainingData {
    entries: Vec<(f64, Vec<Window>)>,
}

impl TrainingData {
    /// Add one analysis-window-length segment recorded while the subject
    /// attended `frequency`.
    pub fn push(&mut self, frequency: f64, segment: Window) {
        if let Some((_, segments)) = self.entries.iter_mut().find(|(f, _)| *f == frequency) {
            segments.push(segment);
        } else {
            self.entries.push((frequency, vec![segment]));
        }
    }

    /// Segments recorded for one frequency.
    #[must_use]
    pub fn segments(&self, frequency: f64) -> Option<&[Window]> {
        self.entries
            .iter()
            .find(|(f, _)| *f == frequency)
            .map(|(_, segments)| segments.as_slice())
    }

    /// Frequencies with at least one segment.
    pub fn frequencies(&self) -> impl Iterator<Item = f64> + '_ {
        self.entries.iter().map(|(f, _)| *f)
    }

    /// True when no segments were collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-frequency averaged reference built by `train`.
#[derive(Clone, Debug)]
pub enum TemplateData {
    /// Averaged raw segments, one per frequency (correlation strategies)
    Segments(Vec<(f64, Window)>),
    /// Averaged scalar feature, one per frequency (PSD strategy)
    Features(Vec<(f64, f64)>),
}

/// Subject-specific parameters produced by one calibration run.
///
/// Built once per calibration, then owned by the detector and treated as
/// immutable.
#[derive(Clone, Debug)]
pub struct CalibrationTemplate {
    /// Averaged per-frequency reference data
    pub data: TemplateData,
    /// Noise floor measured during the rest phase
    pub baseline_noise: f64,
    /// Channel subset the calibration selected, by index
    pub selected_channels: Vec<usize>,
    /// Adaptive score threshold derived from in-class score distributions
    pub threshold: f64,
}

enum Strategy {
    Psd(PsdDetector),
    Cca(CcaDetector),
    Fbcca(FbccaDetector),
}

/// A detection strategy plus the calibration template it owns.
pub struct FrequencyDetector {
    strategy: Strategy,
    template: Option<CalibrationTemplate>,
}

impl FrequencyDetector {
    /// Build the strategy the config selects.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the target set is invalid.
    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        let strategy = match config.detector {
            DetectorKind::Psd => Strategy::Psd(PsdDetector::from_config(config)?),
            DetectorKind::Cca => Strategy::Cca(CcaDetector::from_config(config)?),
            DetectorKind::Fbcca if !config.filter_bank.enabled => {
                tracing::debug!("filter bank disabled, falling back to plain CCA");
                Strategy::Cca(CcaDetector::from_config(config)?)
            }
            DetectorKind::Fbcca => Strategy::Fbcca(FbccaDetector::from_config(config)?),
        };
        Ok(Self {
            strategy,
            template: None,
        })
    }

    /// Which strategy this detector runs.
    #[must_use]
    pub fn kind(&self) -> DetectorKind {
        match self.strategy {
            Strategy::Psd(_) => DetectorKind::Psd,
            Strategy::Cca(_) => DetectorKind::Cca,
            Strategy::Fbcca(_) => DetectorKind::Fbcca,
        }
    }

    /// Score one filtered analysis window against every target.
    ///
    /// Never fails for well-formed input; degenerate windows (short, pure
    /// noise, simultaneous targets) produce well-formed low-confidence
    /// results.
    #[must_use]
    pub fn detect(&self, window: &Window) -> DetectionResult {
        match &self.strategy {
            Strategy::Psd(d) => d.detect(window),
            Strategy::Cca(d) => d.detect(window),
            Strategy::Fbcca(d) => d.detect(window),
        }
    }

    /// Primary decision path: `(target index, confidence)`.
    ///
    /// The confidence is the best combined score itself; no softmax is
    /// involved in the decision.
    #[must_use]
    pub fn predict(&self, window: &Window) -> (usize, f64) {
        let result = self.detect(window);
        (result.index, result.score)
    }

    /// Diagnostic softmax-normalized distribution over all targets.
    #[must_use]
    pub fn predict_proba(&self, window: &Window) -> Vec<f64> {
        let result = self.detect(window);
        let max = result
            .scores
            .iter()
            .map(|s| s.score)
            .fold(f64::MIN, f64::max);
        let exp: Vec<f64> = result
            .scores
            .iter()
            .map(|s| (s.score - max).exp())
            .collect();
        let sum: f64 = exp.iter().sum();
        exp.into_iter().map(|e| e / sum).collect()
    }

    /// Build and store per-frequency templates from labeled segments.
    ///
    /// Correlation strategies store the averaged raw segment per frequency;
    /// the PSD strategy stores the averaged in-class score. The template's
    /// derived scalars start neutral and are filled in by the calibration
    /// controller through [`FrequencyDetector::set_calibration`].
    pub fn train(&mut self, data: &TrainingData) {
        let template_data = match &self.strategy {
            Strategy::Psd(d) => d.build_templates(data),
            Strategy::Cca(d) => d.build_templates(data),
            Strategy::Fbcca(d) => d.inner().build_templates(data),
        };
        self.template = Some(CalibrationTemplate {
            data: template_data,
            baseline_noise: 0.0,
            selected_channels: Vec::new(),
            threshold: 0.0,
        });
        tracing::info!("detector trained with per-frequency templates");
    }

    /// True once `train` has run.
    #[must_use]
    pub fn is_trained(&self) -> bool {
        self.template.is_some()
    }

    /// Install the derived calibration scalars.
    pub fn set_calibration(
        &mut self,
        baseline_noise: f64,
        selected_channels: Vec<usize>,
        threshold: f64,
    ) {
        if let Some(template) = &mut self.template {
            template.baseline_noise = baseline_noise;
            template.selected_channels = selected_channels;
            template.threshold = threshold;
        }
    }

    /// The calibration template, once trained.
    #[must_use]
    pub fn template(&self) -> Option<&CalibrationTemplate> {
        self.template.as_ref()
    }
}

/// Average a set of equally shaped segments element-wise.
///
/// Segments are truncated to the shortest length before averaging.
pub(crate) fn average_segments(segments: &[Window]) -> Window {
    let Some(first) = segments.first() else {
        return Window::new();
    };
    let n_channels = first.len();
    let n_samples = segments
        .iter()
        .map(|s| s.first().map_or(0, Vec::len))
        .min()
        .unwrap_or(0);

    let mut mean = vec![vec![0.0; n_samples]; n_channels];
    for segment in segments {
        for (acc, channel) in mean.iter_mut().zip(segment) {
            for (a, &v) in acc.iter_mut().zip(channel.iter().take(n_samples)) {
                *a += v;
            }
        }
    }
    let scale = 1.0 / segments.len() as f64;
    for channel in &mut mean {
        for v in channel.iter_mut() {
            *v *= scale;
        }
    }
    mean
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn training_data_groups_by_frequency() {
        let mut data = TrainingData::default();
        data.push(10.0, vec![vec![1.0]]);
        data.push(10.0, vec![vec![2.0]]);
        data.push(15.0, vec![vec![3.0]]);

        assert_eq!(data.segments(10.0).unwrap().len(), 2);
        assert_eq!(data.segments(15.0).unwrap().len(), 1);
        assert!(data.segments(12.0).is_none());
    }

    #[test]
    fn average_segments_truncates_to_shortest() {
        let segments = vec![
            vec![vec![1.0, 3.0, 5.0]],
            vec![vec![3.0, 5.0]],
        ];
        let mean = average_segments(&segments);
        assert_eq!(mean, vec![vec![2.0, 4.0]]);
    }

    #[test]
    fn predict_proba_sums_to_one() {
        let config = EngineConfig {
            sampling_rate: 125.0,
            ..EngineConfig::default()
        };
        let detector = FrequencyDetector::from_config(&config).unwrap();
        let window: Window = vec![(0..250).map(|i| (i as f64 * 0.1).sin()).collect(); 2];
        let proba = detector.predict_proba(&window);
        assert_eq!(proba.len(), 2);
        assert!((proba.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }
}
