//! Error types for the Photic engine
//!
//! Three families, matching where in the lifecycle they can occur:
//! construction ([`ConfigError`]), the ingestion boundary ([`IngestError`]),
//! and the calibration sequence ([`CalibrationError`]). Nothing in the online
//! hot path errors for well-formed input; data insufficiency is a normal
//! "no decision yet" outcome and is represented as `None`, not an error.

use thiserror::Error;

/// Errors rejected at construction time.
///
/// Invalid configurations never reach a running session; the single
/// exception is bandpass cutoff clamping, which is coerced with a logged
/// warning instead (see the filter stage).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// Sampling rate must be positive
    #[error("invalid sampling rate: {0} Hz")]
    InvalidSamplingRate(f64),

    /// At least two target frequencies are required
    #[error("at least two target frequencies required, got {0}")]
    TooFewTargets(usize),

    /// Target frequencies must be distinct
    #[error("duplicate target frequency: {0} Hz")]
    DuplicateTarget(f64),

    /// Target frequencies must be positive
    #[error("target frequency must be positive, got {0} Hz")]
    NonPositiveTarget(f64),

    /// Harmonic count outside the supported range
    #[error("harmonic count must be 1-3, got {0}")]
    InvalidHarmonics(usize),

    /// Bandpass cutoffs must satisfy 0 < low < high
    #[error("invalid bandpass cutoffs: {low}-{high} Hz")]
    InvalidBandpass {
        /// Low cutoff in Hz
        low: f64,
        /// High cutoff in Hz
        high: f64,
    },

    /// Analysis window must be positive
    #[error("invalid analysis window length: {0} s")]
    InvalidWindow(f64),

    /// Detection step must be positive
    #[error("invalid detection step: {0} s")]
    InvalidStep(f64),

    /// Buffer must hold at least one analysis window
    #[error("buffer duration {buffer} s is shorter than analysis window {window} s")]
    BufferTooShort {
        /// Configured buffer duration in seconds
        buffer: f64,
        /// Configured analysis window in seconds
        window: f64,
    },

    /// Score smoothing factor outside [0, 1]
    #[error("smoothing factor must be within [0, 1], got {0}")]
    InvalidSmoothing(f64),

    /// Filter bank enabled with no sub-bands
    #[error("filter bank needs at least one sub-band")]
    EmptyFilterBank,
}

/// Errors at the ingestion boundary.
///
/// The only fatal conditions in a running session: malformed chunks are
/// rejected before they can corrupt buffer or filter state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IngestError {
    /// Chunk carries the wrong number of channels
    #[error("channel count mismatch: expected {expected}, got {got}")]
    ShapeMismatch {
        /// Channel count fixed at session construction
        expected: usize,
        /// Channel count of the offending chunk
        got: usize,
    },

    /// Channels within one chunk have differing sample counts
    #[error("ragged chunk: channel {channel} has {got} samples, expected {expected}")]
    RaggedChunk {
        /// Index of the offending channel
        channel: usize,
        /// Sample count of channel 0
        expected: usize,
        /// Sample count of the offending channel
        got: usize,
    },

    /// Chunk was produced at a different nominal rate than the session
    #[error("sampling rate mismatch: expected {expected} Hz, got {got} Hz")]
    RateMismatch {
        /// Rate fixed at session construction
        expected: f64,
        /// Rate declared by the producer
        got: f64,
    },
}

/// Errors from the calibration sequence.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalibrationError {
    /// A phase collected fewer samples than one analysis window
    #[error("insufficient calibration samples: got {got}, need {need}")]
    InsufficientSamples {
        /// Samples actually collected
        got: usize,
        /// Samples required
        need: usize,
    },

    /// A method was called in the wrong phase
    #[error("invalid calibration state: expected {expected}, actual {actual}")]
    InvalidState {
        /// The state the call requires
        expected: &'static str,
        /// The state the controller was in
        actual: String,
    },

    /// The session was stopped before the phase sequence finished
    #[error("calibration interrupted before completion")]
    Interrupted,
}
