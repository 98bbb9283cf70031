//! Synthetic SSVEP source
//!
//! Deterministic multichannel signal generator for demos and tests: a
//! steady-state response at a chosen frequency (with a weaker second
//! harmonic), per-channel amplitude and phase variation to mimic electrode
//! differences, background rhythms in the alpha and beta bands, and
//! Gaussian noise scaled by the inverse of the requested SNR.
//!
//! Chunks are continuous in time across calls, so the generator can stand in
//! for an acquisition device feeding the ingestion boundary at its natural
//! cadence.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::Window;

/// Amplitude of the second harmonic relative to the fundamental.
const HARMONIC_AMPLITUDE: f64 = 0.3;

/// Background rhythm frequencies in Hz (alpha and beta band).
///
/// Deliberately off the harmonic grid of the common 10/12/15 Hz target
/// sets, so unstimulated output carries no target-locked energy.
const BACKGROUND_FREQS: [f64; 3] = [8.0, 13.0, 23.0];

struct ChannelModel {
    gain: f64,
    phase: f64,
    /// (frequency, amplitude, phase) per background rhythm
    background: Vec<(f64, f64, f64)>,
}

/// Seeded synthetic SSVEP generator.
pub struct SyntheticSsvep {
    sampling_rate: f64,
    frequency: f64,
    snr: f64,
    stimulated: bool,
    channels: Vec<ChannelModel>,
    rng: StdRng,
    sample_index: u64,
}

impl SyntheticSsvep {
    /// Create a generator for `n_channels` channels at `sampling_rate`.
    ///
    /// `snr` scales the Gaussian noise as `1 / snr`; higher means cleaner.
    /// The same seed reproduces the same stream exactly.
    #[must_use]
    pub fn new(sampling_rate: f64, n_channels: usize, frequency: f64, snr: f64, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let channels = (0..n_channels)
            .map(|_| ChannelModel {
                gain: rng.gen_range(0.7..1.3),
                phase: rng.gen_range(0.0..std::f64::consts::TAU),
                background: BACKGROUND_FREQS
                    .iter()
                    .map(|&f| {
                        (
                            f,
                            rng.gen_range(0.1..0.3),
                            rng.gen_range(0.0..std::f64::consts::TAU),
                        )
                    })
                    .collect(),
            })
            .collect();
        Self {
            sampling_rate,
            frequency,
            snr: snr.max(f64::MIN_POSITIVE),
            stimulated: true,
            channels,
            rng,
            sample_index: 0,
        }
    }

    /// Change the attended frequency (takes effect from the next sample).
    pub fn set_frequency(&mut self, frequency: f64) {
        self.frequency = frequency;
    }

    /// Enable or disable the evoked response; background rhythms and noise
    /// continue either way. Used for rest/baseline phases.
    pub fn set_stimulated(&mut self, stimulated: bool) {
        self.stimulated = stimulated;
    }

    /// Generate the next `n_samples` samples per channel.
    #[must_use]
    pub fn next_chunk(&mut self, n_samples: usize) -> Window {
        let nyquist = self.sampling_rate / 2.0;
        let mut chunk: Window = vec![Vec::with_capacity(n_samples); self.channels.len()];

        for step in 0..n_samples {
            let t = (self.sample_index + step as u64) as f64 / self.sampling_rate;
            for (model, out) in self.channels.iter().zip(&mut chunk) {
                let mut v = 0.0;
                if self.stimulated {
                    let angle = std::f64::consts::TAU * self.frequency * t + model.phase;
                    v += model.gain * angle.sin();
                    if 2.0 * self.frequency < nyquist {
                        let harmonic =
                            std::f64::consts::TAU * 2.0 * self.frequency * t + model.phase;
                        v += HARMONIC_AMPLITUDE * model.gain * harmonic.sin();
                    }
                }
                for &(freq, amplitude, phase) in &model.background {
                    if freq < nyquist {
                        v += amplitude * (std::f64::consts::TAU * freq * t + phase).sin();
                    }
                }
                let noise: f64 = self.rng.sample(StandardNormal);
                out.push(v + noise / self.snr);
            }
        }
        self.sample_index += n_samples as u64;
        chunk
    }
}
