//! Digital filter stage
//!
//! Bandpass and powerline-notch filtering for analysis windows. The bandpass
//! is a 4th-order Butterworth realized as cascaded second-order sections
//! (two highpass + two lowpass biquads at the Butterworth cascade Q values);
//! the notch is an IIR biquad with configurable Q.
//!
//! Two application modes:
//!
//! - **Batch** ([`FilterSpec::apply_all`]): zero-phase forward-backward
//!   filtering of a whole window. Phase-sensitive detectors (CCA) require
//!   this path; it is what the online detectors use on every window.
//! - **Streaming** ([`FilterSpec::filter_chunk`]): causal single-pass
//!   filtering that preserves filter memory across chunks through an
//!   explicit [`StreamingFilterState`] owned by the caller.
//!
//! Misconfigured cutoffs are clamped into `(0, nyquist)` with a logged
//! warning rather than failing; a running session must not crash on a bad
//! cutoff.

use std::f64::consts::PI;

use tracing::warn;

use photic_bci_core::config::EngineConfig;

use crate::Window;

/// Butterworth second-order-section coefficients.
#[derive(Clone, Copy, Debug)]
pub struct BiquadCoeffs {
    /// Numerator coefficients [b0, b1, b2]
    pub b: [f64; 3],
    /// Denominator coefficients [a0=1, a1, a2]
    pub a: [f64; 3],
}

impl BiquadCoeffs {
    /// Second-order Butterworth lowpass section with explicit Q.
    #[must_use]
    pub fn lowpass(sample_rate: f64, cutoff: f64, q: f64) -> Self {
        let k = (PI * cutoff / sample_rate).tan();
        let k2 = k * k;
        let norm = 1.0 / (1.0 + k / q + k2);

        Self {
            b: [k2 * norm, 2.0 * k2 * norm, k2 * norm],
            a: [1.0, 2.0 * (k2 - 1.0) * norm, (1.0 - k / q + k2) * norm],
        }
    }

    /// Second-order Butterworth highpass section with explicit Q.
    #[must_use]
    pub fn highpass(sample_rate: f64, cutoff: f64, q: f64) -> Self {
        let k = (PI * cutoff / sample_rate).tan();
        let k2 = k * k;
        let norm = 1.0 / (1.0 + k / q + k2);

        Self {
            b: [norm, -2.0 * norm, norm],
            a: [1.0, 2.0 * (k2 - 1.0) * norm, (1.0 - k / q + k2) * norm],
        }
    }

    /// Notch section for powerline interference.
    #[must_use]
    pub fn notch(sample_rate: f64, notch_freq: f64, q: f64) -> Self {
        let omega = 2.0 * PI * notch_freq / sample_rate;
        let cos_omega = omega.cos();
        let alpha = omega.sin() / (2.0 * q);
        let norm = 1.0 / (1.0 + alpha);

        Self {
            b: [norm, -2.0 * cos_omega * norm, norm],
            a: [1.0, -2.0 * cos_omega * norm, (1.0 - alpha) * norm],
        }
    }
}

/// Q values for the sections of an even-order Butterworth cascade.
///
/// Section k of an order-n cascade has Q = 1 / (2 cos(pi (2k+1) / 2n)).
fn butterworth_section_qs(order: usize) -> Vec<f64> {
    let n = order.max(2) / 2 * 2;
    (0..n / 2)
        .map(|k| {
            let theta = PI * (2 * k + 1) as f64 / (2 * n) as f64;
            1.0 / (2.0 * theta.sin())
        })
        .collect()
}

/// Immutable coefficient set for one bandpass (+ optional notch) pipeline.
#[derive(Clone, Debug)]
pub struct FilterSpec {
    sampling_rate: f64,
    sections: Vec<BiquadCoeffs>,
}

impl FilterSpec {
    /// Bandpass of the given Butterworth order plus an optional notch.
    ///
    /// `order` is realized as `order / 2` highpass and `order / 2` lowpass
    /// sections (minimum one of each). Cutoffs outside `(0, nyquist)` are
    /// clamped with a warning; a notch at or above nyquist is skipped with a
    /// warning.
    #[must_use]
    pub fn new(
        sampling_rate: f64,
        low: f64,
        high: f64,
        order: usize,
        notch: Option<(f64, f64)>,
    ) -> Self {
        let nyquist = sampling_rate / 2.0;
        let mut low = low;
        let mut high = high;
        if low <= 0.0 || high >= nyquist {
            warn!(
                low,
                high, sampling_rate, "bandpass cutoffs out of range, clamping"
            );
            low = low.max(0.01 * nyquist);
            high = high.min(0.99 * nyquist);
        }

        let mut sections = Vec::new();
        for q in butterworth_section_qs(order) {
            sections.push(BiquadCoeffs::highpass(sampling_rate, low, q));
        }
        for q in butterworth_section_qs(order) {
            sections.push(BiquadCoeffs::lowpass(sampling_rate, high, q));
        }
        if let Some((freq, q)) = notch {
            if freq > 0.0 && freq < nyquist {
                sections.push(BiquadCoeffs::notch(sampling_rate, freq, q));
            } else {
                warn!(freq, sampling_rate, "notch frequency out of range, disabled");
            }
        }

        Self {
            sampling_rate,
            sections,
        }
    }

    /// The engine's main filter: 4th-order bandpass + configured notch.
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        let (low, high) = config.bandpass;
        Self::new(
            config.sampling_rate,
            low,
            high,
            4,
            config.notch_freq.map(|f| (f, config.notch_q)),
        )
    }

    /// Sub-band bandpass without a notch, for the FBCCA filter bank.
    #[must_use]
    pub fn subband(sampling_rate: f64, low: f64, high: f64, order: usize) -> Self {
        Self::new(sampling_rate, low, high, order, None)
    }

    /// Sampling rate the coefficients were designed for.
    #[must_use]
    pub fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }

    /// Apply the full pipeline zero-phase (forward-backward) in place.
    ///
    /// Used by the detectors on each analysis window; the double pass
    /// cancels phase distortion that would corrupt phase-sensitive scoring.
    pub fn apply_all(&self, window: &mut Window) {
        for samples in window.iter_mut() {
            self.forward(samples);
            samples.reverse();
            self.forward(samples);
            samples.reverse();
        }
    }

    /// One causal pass over every channel, from zero state.
    fn forward(&self, samples: &mut [f64]) {
        for section in &self.sections {
            let mut z1 = 0.0;
            let mut z2 = 0.0;
            for x in samples.iter_mut() {
                let y = section.b[0] * *x + z1;
                z1 = section.b[1] * *x - section.a[1] * y + z2;
                z2 = section.b[2] * *x - section.a[2] * y;
                *x = y;
            }
        }
    }

    /// Fresh streaming state for `n_channels` channels.
    #[must_use]
    pub fn init_state(&self, n_channels: usize) -> StreamingFilterState {
        StreamingFilterState {
            zi: vec![vec![[0.0; 2]; self.sections.len()]; n_channels],
        }
    }

    /// Filter a chunk causally, carrying filter memory across calls.
    ///
    /// The state must be the one returned by [`FilterSpec::init_state`] for
    /// this spec and must be threaded explicitly between calls; nothing is
    /// kept inside the spec itself, so one spec can serve any number of
    /// concurrent streams.
    #[must_use]
    pub fn filter_chunk(&self, chunk: &[Vec<f64>], state: &mut StreamingFilterState) -> Window {
        debug_assert_eq!(chunk.len(), state.zi.len());
        chunk
            .iter()
            .zip(state.zi.iter_mut())
            .map(|(samples, channel_state)| {
                let mut out = samples.clone();
                for (section, zi) in self.sections.iter().zip(channel_state.iter_mut()) {
                    for x in out.iter_mut() {
                        let y = section.b[0] * *x + zi[0];
                        zi[0] = section.b[1] * *x - section.a[1] * y + zi[1];
                        zi[1] = section.b[2] * *x - section.a[2] * y;
                        *x = y;
                    }
                }
                out
            })
            .collect()
    }
}

/// Per-channel, per-section delay lines for chunked causal filtering.
///
/// Owned by the caller and passed back into every [`FilterSpec::filter_chunk`]
/// call; keeping it out of the spec avoids accidental cross-session aliasing.
#[derive(Clone, Debug)]
pub struct StreamingFilterState {
    /// `[channel][section] -> [z1, z2]`
    zi: Vec<Vec<[f64; 2]>>,
}
