//! Engine configuration
//!
//! [`EngineConfig`] is the full recognized option surface of the engine.
//! It is plain data with serde derives so callers can load it from any
//! format they like; [`EngineConfig::validate`] enforces the construction
//! rules before a session is built. [`TargetSet`] is the validated form of
//! the target-frequency list and is what the detectors actually consume.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Which detection strategy the engine runs.
///
/// Selected once at construction; each strategy is independently testable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    /// Welch power-spectral-density estimate with harmonic-weighted SNR scoring
    #[default]
    Psd,
    /// Canonical correlation against sine/cosine reference harmonics
    Cca,
    /// Filter-bank CCA: per-sub-band CCA combined with decreasing weights
    Fbcca,
}

/// Sub-band filter bank settings for the FBCCA strategy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterBankConfig {
    /// Whether the filter bank is applied (FBCCA vs plain CCA)
    pub enabled: bool,
    /// Number of sub-bands
    pub n_subbands: usize,
    /// Butterworth order of each sub-band filter
    pub order: usize,
}

impl Default for FilterBankConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            n_subbands: 5,
            order: 4,
        }
    }
}

/// Validated, ordered set of target stimulation frequencies.
///
/// Guarantees at least two distinct positive frequencies and a harmonic
/// count in 1..=3. Unique per session.
#[derive(Clone, Debug, PartialEq)]
pub struct TargetSet {
    frequencies: Vec<f64>,
    harmonics: usize,
}

impl TargetSet {
    /// Validate and build a target set.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when fewer than two frequencies are given,
    /// any frequency is non-positive or duplicated, or the harmonic count
    /// is outside 1..=3.
    pub fn new(frequencies: &[f64], harmonics: usize) -> Result<Self, ConfigError> {
        if frequencies.len() < 2 {
            return Err(ConfigError::TooFewTargets(frequencies.len()));
        }
        if !(1..=3).contains(&harmonics) {
            return Err(ConfigError::InvalidHarmonics(harmonics));
        }
        for (i, &f) in frequencies.iter().enumerate() {
            if f <= 0.0 || !f.is_finite() {
                return Err(ConfigError::NonPositiveTarget(f));
            }
            if frequencies[..i].contains(&f) {
                return Err(ConfigError::DuplicateTarget(f));
            }
        }
        Ok(Self {
            frequencies: frequencies.to_vec(),
            harmonics,
        })
    }

    /// Target frequencies in their configured order.
    #[must_use]
    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    /// Number of harmonics scored per target (1 = fundamental only).
    #[must_use]
    pub fn harmonics(&self) -> usize {
        self.harmonics
    }

    /// Number of targets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    /// Always false; a valid set has at least two targets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }

    /// Index of a frequency within the set, if present.
    #[must_use]
    pub fn index_of(&self, frequency: f64) -> Option<usize> {
        self.frequencies.iter().position(|&f| f == frequency)
    }
}

/// Full engine configuration.
///
/// Score scales differ by strategy: PSD scores are SNR ratios (typically
/// 1..20), correlation scores lie in [0, 1]. `min_score_threshold` should be
/// chosen accordingly; calibration replaces it with an adaptive value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Acquisition sampling rate in Hz
    pub sampling_rate: f64,
    /// Target stimulation frequencies in Hz (at least two, distinct)
    pub target_frequencies: Vec<f64>,
    /// Harmonics scored per target (1..=3)
    pub harmonics: usize,
    /// Bandpass cutoffs (low, high) in Hz
    pub bandpass: (f64, f64),
    /// Powerline notch frequency in Hz; `None` disables the notch
    pub notch_freq: Option<f64>,
    /// Notch quality factor (higher = narrower)
    pub notch_q: f64,
    /// Analysis window length in seconds
    pub window_seconds: f64,
    /// Detection tick interval in seconds
    pub step_seconds: f64,
    /// Ring buffer duration in seconds
    pub buffer_seconds: f64,
    /// Hold time before a candidate becomes a stable decision, in ms
    pub vote_hold_ms: u64,
    /// Minimum best score for a window to produce a candidate
    pub min_score_threshold: f64,
    /// Minimum gap confidence for a window to produce a candidate
    pub min_confidence: f64,
    /// Exponential smoothing factor for per-target scores (1.0 = none)
    pub ema_alpha: f64,
    /// Detection strategy
    pub detector: DetectorKind,
    /// Sub-band filter bank (FBCCA)
    pub filter_bank: FilterBankConfig,
    /// Half-width of the SNR noise neighbor band in Hz
    pub snr_neighbor_bw: f64,
    /// Half-width of the guard band excluded around each peak in Hz
    pub snr_guard_bw: f64,
    /// Baseline (rest) calibration phase duration in seconds
    pub baseline_seconds: f64,
    /// Per-target calibration phase duration in seconds
    pub trial_seconds: f64,
    /// Number of channels the calibration keeps (top-k by summed SNR)
    pub n_select_channels: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sampling_rate: 250.0,
            target_frequencies: vec![10.0, 15.0],
            harmonics: 2,
            bandpass: (6.0, 45.0),
            notch_freq: Some(60.0),
            notch_q: 30.0,
            window_seconds: 2.0,
            step_seconds: 0.25,
            buffer_seconds: 4.0,
            vote_hold_ms: 500,
            min_score_threshold: 2.0,
            min_confidence: 0.3,
            ema_alpha: 0.3,
            detector: DetectorKind::Psd,
            filter_bank: FilterBankConfig::default(),
            snr_neighbor_bw: 1.0,
            snr_guard_bw: 0.3,
            baseline_seconds: 5.0,
            trial_seconds: 10.0,
            n_select_channels: 3,
        }
    }
}

impl EngineConfig {
    /// Check every construction rule.
    ///
    /// # Errors
    ///
    /// Returns the first violated [`ConfigError`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sampling_rate <= 0.0 || !self.sampling_rate.is_finite() {
            return Err(ConfigError::InvalidSamplingRate(self.sampling_rate));
        }
        self.target_set()?;
        let (low, high) = self.bandpass;
        if low <= 0.0 || high <= low {
            return Err(ConfigError::InvalidBandpass { low, high });
        }
        if self.window_seconds <= 0.0 {
            return Err(ConfigError::InvalidWindow(self.window_seconds));
        }
        if self.step_seconds <= 0.0 {
            return Err(ConfigError::InvalidStep(self.step_seconds));
        }
        if self.buffer_seconds < self.window_seconds {
            return Err(ConfigError::BufferTooShort {
                buffer: self.buffer_seconds,
                window: self.window_seconds,
            });
        }
        if !(0.0..=1.0).contains(&self.ema_alpha) {
            return Err(ConfigError::InvalidSmoothing(self.ema_alpha));
        }
        if self.detector == DetectorKind::Fbcca && self.filter_bank.n_subbands == 0 {
            return Err(ConfigError::EmptyFilterBank);
        }
        Ok(())
    }

    /// Build the validated target set.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the target list or harmonic count is
    /// invalid.
    pub fn target_set(&self) -> Result<TargetSet, ConfigError> {
        TargetSet::new(&self.target_frequencies, self.harmonics)
    }

    /// Number of samples in one analysis window.
    #[must_use]
    pub fn window_samples(&self) -> usize {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let n = (self.window_seconds * self.sampling_rate).round() as usize;
        n.max(1)
    }
}
