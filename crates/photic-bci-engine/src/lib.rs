//! Photic BCI Engine - real-time SSVEP frequency classification
//!
//! This crate implements the online classification pipeline: a producer
//! feeds fixed-rate multichannel sample chunks into a ring buffer, a
//! detection loop polls the buffer on a fixed timer, batch-filters the
//! latest analysis window, scores it against the configured target
//! frequencies, and debounces the per-window classifications into stable,
//! hold-confirmed decisions.
//!
//! # Modules
//!
//! - [`buffer`]: Multichannel ring buffer (the acquisition boundary)
//! - [`filters`]: Zero-phase bandpass/notch filtering, batch and streaming
//! - [`detect`]: PSD/SNR, CCA, and filter-bank CCA detection strategies
//! - [`vote`]: Hold-time debouncing of per-window classifications
//! - [`calibrate`]: Baseline + per-target calibration sequence
//! - [`session`]: The online session tying the pipeline together
//! - [`synth`]: Seeded synthetic SSVEP source for demos and tests
//!
//! # Data flow
//!
//! ```text
//! producer -> SampleBuffer -> FilterSpec -> FrequencyDetector
//!                                               |
//!                              DetectionEvent <- VoteStabilizer
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod buffer;
pub mod calibrate;
pub mod detect;
pub mod filters;
pub mod session;
pub mod synth;
pub mod vote;

/// One analysis window or chunk: outer index is the channel, inner the
/// sample, in chronological order.
pub type Window = Vec<Vec<f64>>;

/// Copy of the given channels of a window, in the order requested.
pub(crate) fn select_channels(window: &Window, indices: &[usize]) -> Window {
    indices
        .iter()
        .filter_map(|&i| window.get(i).cloned())
        .collect()
}

// Re-export the main pipeline types
pub use buffer::SampleBuffer;
pub use calibrate::{CalibrationController, CalibrationOutcome, CalibrationPhase};
pub use detect::{CalibrationTemplate, FrequencyDetector, TrainingData};
pub use filters::{FilterSpec, StreamingFilterState};
pub use session::{IngestHandle, Session, StopFlag};
pub use synth::SyntheticSsvep;
pub use vote::VoteStabilizer;
