//! Temporal debouncing of per-window classifications
//!
//! A raw classification stream flickers between near-equally-likely targets
//! under noise. [`VoteStabilizer`] only promotes a vote to a stable decision
//! after it has been *continuously* the same for a full hold window; any
//! interruption restarts the clock. The upstream loop calls
//! [`VoteStabilizer::reset`] whenever the detector reports low confidence,
//! so noise cannot accumulate hold time across unrelated candidates.
//!
//! Time is injected by the caller in milliseconds, which keeps the
//! transition logic deterministic under test.

use std::fmt::Debug;

/// Hold-time vote debouncer.
#[derive(Clone, Debug)]
pub struct VoteStabilizer<T> {
    hold_duration_ms: u64,
    current_vote: Option<T>,
    vote_started_ms: Option<u64>,
    stable_decision: Option<T>,
}

impl<T: Copy + PartialEq + Debug> VoteStabilizer<T> {
    /// Create a stabilizer requiring `hold_duration_ms` of unchanged votes.
    #[must_use]
    pub fn new(hold_duration_ms: u64) -> Self {
        Self {
            hold_duration_ms,
            current_vote: None,
            vote_started_ms: None,
            stable_decision: None,
        }
    }

    /// Feed one vote at time `now_ms`.
    ///
    /// Returns the vote once it has been held for the full window, `None`
    /// while it is still accumulating hold time. A changed vote restarts
    /// the timer.
    pub fn update(&mut self, vote: T, now_ms: u64) -> Option<T> {
        if self.current_vote != Some(vote) {
            self.current_vote = Some(vote);
            self.vote_started_ms = Some(now_ms);
            return None;
        }

        let started = self.vote_started_ms?;
        let held = now_ms.saturating_sub(started);
        if held >= self.hold_duration_ms {
            if self.stable_decision != Some(vote) {
                self.stable_decision = Some(vote);
                tracing::info!(?vote, held_ms = held, "stable decision");
            }
            return Some(vote);
        }
        None
    }

    /// The last hold-confirmed decision, if any.
    #[must_use]
    pub fn stable(&self) -> Option<T> {
        self.stable_decision
    }

    /// Clear the tracked vote, its timer, and the stable decision.
    ///
    /// Called on every low-confidence or tied window.
    pub fn reset(&mut self) {
        self.current_vote = None;
        self.vote_started_ms = None;
        self.stable_decision = None;
    }
}
