//! Correlation detection strategies (CCA and filter-bank CCA)
//!
//! Canonical correlation analysis finds the linear combination of the
//! multichannel window most correlated with a set of sine/cosine reference
//! waveforms at a candidate frequency; the largest canonical correlation is
//! that frequency's score. The filter-bank variant runs the same analysis
//! independently in several sub-bands and combines the scores with linearly
//! decreasing weights, which rewards targets whose harmonics carry energy
//! into the higher bands.
//!
//! The correlation itself uses the whitened-eigenvalue formulation: whiten
//! the covariance matrices with Cholesky factors, then the squared
//! canonical correlations are the eigenvalues of `K^T K` for
//! `K = Lx^-1 Cxy Ly^-T`. Tikhonov regularization keeps near-singular
//! covariance (flat channels, short windows) from failing; any failure path
//! scores zero instead of erroring.

use nalgebra::{Cholesky, DMatrix, SymmetricEigen};
use tracing::warn;

use photic_bci_core::config::{EngineConfig, TargetSet};
use photic_bci_core::error::ConfigError;
use photic_bci_core::event::DetectionResult;

use crate::detect::{average_segments, TemplateData, TrainingData};
use crate::filters::FilterSpec;
use crate::Window;

/// Tikhonov regularization added to covariance diagonals.
const REGULARIZATION: f64 = 1e-6;

/// First sub-band low edge in Hz.
const SUBBAND_BASE_HZ: f64 = 6.0;
/// Sub-band spacing in Hz.
const SUBBAND_STEP_HZ: f64 = 8.0;
/// Upper cap of every sub-band in Hz.
const SUBBAND_CAP_HZ: f64 = 45.0;

/// Sine/cosine reference matrix for one candidate frequency.
///
/// Rows are time samples, columns alternate `sin`/`cos` at the fundamental
/// and each harmonic up to `harmonics`, sampled over exactly `n_samples`.
pub(crate) fn reference_matrix(
    sampling_rate: f64,
    frequency: f64,
    harmonics: usize,
    n_samples: usize,
) -> DMatrix<f64> {
    DMatrix::from_fn(n_samples, 2 * harmonics, |row, col| {
        let harmonic = (col / 2 + 1) as f64;
        let angle =
            2.0 * std::f64::consts::PI * harmonic * frequency * row as f64 / sampling_rate;
        if col % 2 == 0 {
            angle.sin()
        } else {
            angle.cos()
        }
    })
}

fn center_columns(m: &DMatrix<f64>) -> DMatrix<f64> {
    let mut out = m.clone();
    for mut col in out.column_iter_mut() {
        let mean = col.mean();
        col.add_scalar_mut(-mean);
    }
    out
}

/// Largest canonical correlation between `x` (samples x channels) and `y`
/// (samples x references), in [0, 1]. Returns 0 on degenerate input.
pub(crate) fn canonical_correlation(x: &DMatrix<f64>, y: &DMatrix<f64>) -> f64 {
    let t = x.nrows();
    if t < 2 || t != y.nrows() || x.ncols() == 0 || y.ncols() == 0 {
        return 0.0;
    }

    let xc = center_columns(x);
    let yc = center_columns(y);
    let scale = 1.0 / (t as f64 - 1.0);

    let mut cxx = xc.transpose() * &xc * scale;
    let mut cyy = yc.transpose() * &yc * scale;
    let cxy = xc.transpose() * &yc * scale;
    for i in 0..cxx.nrows() {
        cxx[(i, i)] += REGULARIZATION;
    }
    for i in 0..cyy.nrows() {
        cyy[(i, i)] += REGULARIZATION;
    }

    let Some(lx) = Cholesky::new(cxx) else {
        return 0.0;
    };
    let Some(ly) = Cholesky::new(cyy) else {
        return 0.0;
    };

    // A = Lx^-1 Cxy, then K^T = Ly^-1 A^T; rho^2 are eigenvalues of K^T K
    let Some(a) = lx.l().solve_lower_triangular(&cxy) else {
        return 0.0;
    };
    let Some(kt) = ly.l().solve_lower_triangular(&a.transpose()) else {
        return 0.0;
    };
    let m = &kt * kt.transpose();

    let eigen = SymmetricEigen::new(m);
    let max_ev = eigen.eigenvalues.iter().copied().fold(0.0_f64, f64::max);
    max_ev.max(0.0).sqrt().min(1.0)
}

fn window_matrix(window: &Window) -> DMatrix<f64> {
    let channels = window.len();
    let samples = window.first().map_or(0, Vec::len);
    DMatrix::from_fn(samples, channels, |row, col| window[col][row])
}

/// Plain CCA SSVEP detector.
pub struct CcaDetector {
    sampling_rate: f64,
    targets: TargetSet,
}

impl CcaDetector {
    /// Build from the engine config.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the target set is invalid.
    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            sampling_rate: config.sampling_rate,
            targets: config.target_set()?,
        })
    }

    /// Per-target canonical correlations for one window.
    ///
    /// References are generated over the window's actual length, so short
    /// windows degrade to low scores instead of failing.
    fn scores(&self, window: &Window) -> Vec<f64> {
        let x = window_matrix(window);
        self.targets
            .frequencies()
            .iter()
            .map(|&freq| {
                let y = reference_matrix(
                    self.sampling_rate,
                    freq,
                    self.targets.harmonics(),
                    x.nrows(),
                );
                canonical_correlation(&x, &y)
            })
            .collect()
    }

    /// Score one filtered window against every target frequency.
    #[must_use]
    pub fn detect(&self, window: &Window) -> DetectionResult {
        let scores = self.scores(window);
        DetectionResult::from_scores(self.targets.frequencies(), &scores)
    }

    /// Average the raw segments per frequency into signal templates.
    ///
    /// The CCA score itself is data-driven per window; the stored templates
    /// serve diagnostics and alternate template matching.
    pub(crate) fn build_templates(&self, data: &TrainingData) -> TemplateData {
        let segments = data
            .frequencies()
            .filter_map(|freq| {
                let segments = data.segments(freq)?;
                if segments.is_empty() {
                    return None;
                }
                Some((freq, average_segments(segments)))
            })
            .collect();
        TemplateData::Segments(segments)
    }
}

/// Filter-bank CCA detector.
pub struct FbccaDetector {
    cca: CcaDetector,
    bank: Vec<FilterSpec>,
    weights: Vec<f64>,
}

impl FbccaDetector {
    /// Build from the engine config.
    ///
    /// Sub-bands follow the 8 Hz-wide ladder from 6 Hz (6-14, 14-22, ...),
    /// capped at 45 Hz; bands that collapse under the cap or the nyquist
    /// limit are dropped with a warning.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the target set is invalid.
    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        let n = config.filter_bank.n_subbands.max(1);
        let nyquist = config.sampling_rate / 2.0;

        let mut bank = Vec::new();
        for i in 0..n {
            let low = SUBBAND_BASE_HZ + SUBBAND_STEP_HZ * i as f64;
            let high = (SUBBAND_BASE_HZ + SUBBAND_STEP_HZ + SUBBAND_STEP_HZ * i as f64)
                .min(SUBBAND_CAP_HZ)
                .min(0.99 * nyquist);
            if high - low < 1.0 {
                warn!(sub_band = i, low, high, "dropping collapsed sub-band");
                continue;
            }
            bank.push(FilterSpec::subband(
                config.sampling_rate,
                low,
                high,
                config.filter_bank.order,
            ));
        }

        // Lower sub-bands carry the fundamentals and are weighted most
        let n_bands = bank.len();
        let weights = (0..n_bands)
            .map(|i| (n_bands - i) as f64 / n_bands as f64)
            .collect();

        Ok(Self {
            cca: CcaDetector::from_config(config)?,
            bank,
            weights,
        })
    }

    pub(crate) fn inner(&self) -> &CcaDetector {
        &self.cca
    }

    /// Score one filtered window: weighted per-sub-band CCA, normalized so
    /// the best target scores 1.
    #[must_use]
    pub fn detect(&self, window: &Window) -> DetectionResult {
        let n_targets = self.cca.targets.len();
        let mut combined = vec![0.0; n_targets];
        for (spec, &weight) in self.bank.iter().zip(&self.weights) {
            let mut sub = window.clone();
            spec.apply_all(&mut sub);
            for (acc, score) in combined.iter_mut().zip(self.cca.scores(&sub)) {
                *acc += weight * score;
            }
        }

        let max = combined.iter().copied().fold(0.0_f64, f64::max);
        if max > 0.0 {
            for v in &mut combined {
                *v /= max;
            }
        }
        DetectionResult::from_scores(self.cca.targets.frequencies(), &combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use photic_bci_core::config::{DetectorKind, FilterBankConfig};

    use crate::synth::SyntheticSsvep;

    fn config_125(detector: DetectorKind) -> EngineConfig {
        EngineConfig {
            sampling_rate: 125.0,
            target_frequencies: vec![10.0, 15.0],
            detector,
            filter_bank: FilterBankConfig {
                enabled: detector == DetectorKind::Fbcca,
                n_subbands: 3,
                order: 4,
            },
            ..EngineConfig::default()
        }
    }

    #[test]
    fn reference_matrix_layout() {
        let refs = reference_matrix(250.0, 10.0, 2, 100);
        assert_eq!(refs.shape(), (100, 4));
        // t = 0: sin components 0, cos components 1
        assert!(refs[(0, 0)].abs() < 1e-12);
        assert!((refs[(0, 1)] - 1.0).abs() < 1e-12);
        assert!((refs[(0, 3)] - 1.0).abs() < 1e-12);
        // One full 10 Hz period later the fundamental sin is zero again
        assert!(refs[(25, 0)].abs() < 1e-9);
    }

    #[test]
    fn perfect_correlation_with_own_references() {
        let refs = reference_matrix(250.0, 12.0, 2, 200);
        let signals = refs.columns(0, 2).into_owned();
        let rho = canonical_correlation(&signals, &refs);
        assert!(rho > 0.99, "rho = {rho}");
    }

    #[test]
    fn incommensurate_frequency_scores_low() {
        let signals = reference_matrix(250.0, 10.0, 1, 500);
        let refs = reference_matrix(250.0, 37.0, 2, 500);
        let rho = canonical_correlation(&signals, &refs);
        assert!(rho < 0.3, "rho = {rho}");
    }

    #[test]
    fn flat_window_scores_zero() {
        let x = DMatrix::from_element(100, 2, 1.0);
        let refs = reference_matrix(250.0, 10.0, 2, 100);
        let rho = canonical_correlation(&x, &refs);
        assert!(rho < 0.2, "rho = {rho}");
    }

    #[test]
    fn cca_discriminates_targets() {
        let config = config_125(DetectorKind::Cca);
        let detector = CcaDetector::from_config(&config).unwrap();

        let mut correct = 0;
        let mut trials = 0;
        for &true_freq in &[10.0, 15.0] {
            for seed in 0..10u64 {
                let mut synth = SyntheticSsvep::new(125.0, 4, true_freq, 3.0, seed);
                let window = synth.next_chunk(250);
                if detector.detect(&window).frequency == true_freq {
                    correct += 1;
                }
                trials += 1;
            }
        }
        assert!(correct * 10 >= trials * 9, "accuracy {correct}/{trials}");
    }

    #[test]
    fn cca_scores_stay_bounded() {
        let config = config_125(DetectorKind::Cca);
        let detector = CcaDetector::from_config(&config).unwrap();
        let mut synth = SyntheticSsvep::new(125.0, 8, 10.0, 1.0, 3);
        let window = synth.next_chunk(250);
        for s in detector.detect(&window).scores {
            assert!((0.0..=1.0).contains(&s.score), "score = {}", s.score);
        }
    }

    #[test]
    fn short_window_returns_well_formed_result() {
        let config = config_125(DetectorKind::Cca);
        let detector = CcaDetector::from_config(&config).unwrap();
        let window: Window = vec![vec![0.1, -0.2, 0.3], vec![0.0, 0.1, -0.1]];
        let result = detector.detect(&window);
        assert_eq!(result.scores.len(), 2);
        assert!(result.confidence.is_finite());
    }

    #[test]
    fn fbcca_normalizes_best_to_one() {
        let config = config_125(DetectorKind::Fbcca);
        let detector = FbccaDetector::from_config(&config).unwrap();
        let mut synth = SyntheticSsvep::new(125.0, 4, 15.0, 3.0, 5);
        let window = synth.next_chunk(250);
        let result = detector.detect(&window);
        assert!((result.score - 1.0).abs() < 1e-12);
        assert_eq!(result.frequency, 15.0);
    }

    #[test]
    fn fbcca_drops_subbands_beyond_nyquist() {
        let config = EngineConfig {
            sampling_rate: 40.0, // nyquist 20 Hz
            ..config_125(DetectorKind::Fbcca)
        };
        let detector = FbccaDetector::from_config(&config).unwrap();
        // The band starting at 22 Hz collapses above 0.99 * nyquist
        assert_eq!(detector.bank.len(), 2);
        assert_eq!(detector.bank.len(), detector.weights.len());
    }

    #[test]
    fn templates_average_raw_segments() {
        let config = config_125(DetectorKind::Cca);
        let detector = CcaDetector::from_config(&config).unwrap();
        let mut data = TrainingData::default();
        data.push(10.0, vec![vec![1.0, 2.0]]);
        data.push(10.0, vec![vec![3.0, 4.0]]);

        let TemplateData::Segments(segments) = detector.build_templates(&data) else {
            panic!("expected segment templates");
        };
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].1, vec![vec![2.0, 3.0]]);
    }
}
