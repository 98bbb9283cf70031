//! Detection results and per-tick events
//!
//! [`DetectionResult`] is produced fresh for every analysis window and never
//! mutated afterwards. [`DetectionEvent`] is the per-tick output surface the
//! engine hands to downstream collaborators (transports, UIs); it is
//! serde-serializable so those collaborators can ship it however they like.

use serde::{Deserialize, Serialize};

/// Score achieved by one target frequency in one analysis window.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrequencyScore {
    /// Target frequency in Hz
    pub frequency: f64,
    /// Strategy-dependent score (SNR ratio or canonical correlation)
    pub score: f64,
}

/// Classification of a single analysis window.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectionResult {
    /// Best-scoring target frequency in Hz
    pub frequency: f64,
    /// Index of the best target within the configured set
    pub index: usize,
    /// Score of the best target
    pub score: f64,
    /// Scores for every target, in configured order
    pub scores: Vec<FrequencyScore>,
    /// Confidence in [0, 1] derived from the best/second-best gap
    pub confidence: f64,
}

/// Saturation point of the single-score confidence fallback.
///
/// With fewer than two positive scores the gap rule is undefined; a lone
/// score of 1.5 or more maps to full confidence.
const FALLBACK_SATURATION: f64 = 1.5;

impl DetectionResult {
    /// Build a result from per-target scores.
    ///
    /// The best target is the argmax (first wins on exact ties). Confidence
    /// is `1 - second_best/best` when at least two targets scored above
    /// zero, otherwise a saturating function of the best score alone, always
    /// clamped to [0, 1]. All-zero scores yield zero confidence.
    #[must_use]
    pub fn from_scores(frequencies: &[f64], scores: &[f64]) -> Self {
        debug_assert_eq!(frequencies.len(), scores.len());

        let mut best_idx = 0;
        let mut best = f64::MIN;
        for (i, &s) in scores.iter().enumerate() {
            if s > best {
                best = s;
                best_idx = i;
            }
        }

        let second = scores
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != best_idx)
            .map(|(_, &s)| s)
            .fold(f64::MIN, f64::max);

        let confidence = if best <= 0.0 {
            0.0
        } else if scores.len() > 1 && second > 0.0 {
            1.0 - second / best
        } else {
            best / FALLBACK_SATURATION
        }
        .clamp(0.0, 1.0);

        Self {
            frequency: frequencies[best_idx],
            index: best_idx,
            score: best,
            scores: frequencies
                .iter()
                .zip(scores)
                .map(|(&frequency, &score)| FrequencyScore { frequency, score })
                .collect(),
            confidence,
        }
    }

    /// Score achieved by a specific target frequency, if it is in the set.
    #[must_use]
    pub fn score_for(&self, frequency: f64) -> Option<f64> {
        self.scores
            .iter()
            .find(|s| s.frequency == frequency)
            .map(|s| s.score)
    }
}

/// Per-tick output of the online detection loop.
///
/// Emitted once per detection tick whenever a full analysis window was
/// available; ticks without enough data emit nothing.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectionEvent {
    /// Milliseconds since the session started
    pub timestamp_ms: u64,
    /// Frequency that passed the score/confidence gate this tick, if any
    pub candidate: Option<f64>,
    /// Hold-confirmed stable decision, if one is currently in force
    pub stable: Option<f64>,
    /// Scores for every target, in configured order
    pub scores: Vec<FrequencyScore>,
    /// Gap confidence of this tick's classification
    pub confidence: f64,
}
