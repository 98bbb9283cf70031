//! Online session
//!
//! [`Session`] ties the pipeline together: it owns the sample buffer (behind
//! a single mutex, the only shared mutable resource), the filter stage, the
//! detector, and the vote stabilizer. One producer context pushes chunks
//! through an [`IngestHandle`]; one detection context polls the buffer on a
//! fixed timer and only proceeds once a full analysis window is available.
//! The detection loop never blocks waiting for data; a tick without enough
//! data simply emits nothing and re-checks on the next tick.
//!
//! Both loops observe a cooperative [`StopFlag`] once per iteration. Online
//! detection and calibration are mutually exclusive by construction: both
//! [`Session::run_online`] and [`Session::run_calibration`] borrow the
//! session mutably, so the borrow checker rules out running them against the
//! same buffer and detector at the same time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use photic_bci_core::config::{EngineConfig, TargetSet};
use photic_bci_core::error::{CalibrationError, ConfigError, IngestError};
use photic_bci_core::event::{DetectionEvent, DetectionResult};

use crate::buffer::SampleBuffer;
use crate::calibrate::{CalibrationController, CalibrationOutcome, CalibrationPhase};
use crate::detect::FrequencyDetector;
use crate::filters::FilterSpec;
use crate::vote::VoteStabilizer;
use crate::{select_channels, Window};

/// Cooperative stop signal shared between the producer and detection loops.
#[derive(Clone, Debug, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    /// A fresh, unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request every observing loop to finish its current iteration.
    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Checked once per loop iteration.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Producer-facing ingestion boundary.
///
/// Clonable and safe to hand to the acquisition context; it only touches the
/// shared buffer. Shape and rate are validated on every call, before the
/// chunk can reach buffer or filter state.
#[derive(Clone)]
pub struct IngestHandle {
    buffer: Arc<Mutex<SampleBuffer>>,
    sampling_rate: f64,
}

impl IngestHandle {
    /// Append one `channels x samples` chunk acquired at `sampling_rate`.
    ///
    /// # Errors
    ///
    /// [`IngestError::RateMismatch`] when the producer's rate disagrees with
    /// the session, [`IngestError::ShapeMismatch`] /
    /// [`IngestError::RaggedChunk`] on malformed chunks.
    pub fn ingest(&self, chunk: &[Vec<f64>], sampling_rate: f64) -> Result<(), IngestError> {
        if (sampling_rate - self.sampling_rate).abs() > 1e-9 {
            return Err(IngestError::RateMismatch {
                expected: self.sampling_rate,
                got: sampling_rate,
            });
        }
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add_samples(chunk)
    }
}

/// One online classification session.
pub struct Session {
    config: EngineConfig,
    targets: TargetSet,
    buffer: Arc<Mutex<SampleBuffer>>,
    filter: FilterSpec,
    detector: FrequencyDetector,
    stabilizer: VoteStabilizer<usize>,
    stop: StopFlag,
    started: Instant,

    /// Exponentially smoothed per-target scores
    smoothed: Vec<f64>,
    /// Active score gate; replaced by calibration
    threshold: f64,
    /// Channel subset from calibration, when one exists
    selected_channels: Option<Vec<usize>>,
    /// Read cursor for calibration's fresh-sample draining
    seen: u64,
}

impl Session {
    /// Build a session for a producer with `n_channels` channels.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for any invalid configuration; nothing is
    /// coerced here.
    pub fn new(config: EngineConfig, n_channels: usize) -> Result<Self, ConfigError> {
        config.validate()?;
        let targets = config.target_set()?;
        let buffer = SampleBuffer::new(n_channels, config.buffer_seconds, config.sampling_rate);
        let n_targets = targets.len();
        info!(
            n_channels,
            sampling_rate = config.sampling_rate,
            detector = ?config.detector,
            targets = ?config.target_frequencies,
            "session created"
        );
        Ok(Self {
            filter: FilterSpec::from_config(&config),
            detector: FrequencyDetector::from_config(&config)?,
            stabilizer: VoteStabilizer::new(config.vote_hold_ms),
            buffer: Arc::new(Mutex::new(buffer)),
            stop: StopFlag::new(),
            started: Instant::now(),
            smoothed: vec![0.0; n_targets],
            threshold: config.min_score_threshold,
            selected_channels: None,
            seen: 0,
            targets,
            config,
        })
    }

    /// Handle for the producer context.
    #[must_use]
    pub fn ingest_handle(&self) -> IngestHandle {
        IngestHandle {
            buffer: Arc::clone(&self.buffer),
            sampling_rate: self.config.sampling_rate,
        }
    }

    /// The session's stop flag, for sharing with the producer context.
    #[must_use]
    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    /// The detector, for inspecting templates after calibration.
    #[must_use]
    pub fn detector(&self) -> &FrequencyDetector {
        &self.detector
    }

    /// Score gate currently in force.
    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Run one detection tick now.
    ///
    /// Snapshots the latest analysis window, filters it, scores it, and
    /// feeds the stabilizer. Returns `None` while the buffer does not yet
    /// hold a full window; that is a normal "no decision yet" outcome.
    pub fn poll(&mut self) -> Option<DetectionEvent> {
        let now_ms = self.now_ms();
        self.tick(now_ms)
    }

    /// Detection loop: poll every `step_seconds` until stopped.
    ///
    /// Events go to `events`; a dropped receiver ends the loop.
    pub fn run_online(&mut self, events: &Sender<DetectionEvent>) {
        info!(
            step_seconds = self.config.step_seconds,
            window_seconds = self.config.window_seconds,
            "online detection started"
        );
        let step = Duration::from_secs_f64(self.config.step_seconds);
        while !self.stop.is_stopped() {
            let now_ms = self.now_ms();
            if let Some(event) = self.tick(now_ms) {
                if events.send(event).is_err() {
                    warn!("event receiver dropped, stopping detection loop");
                    break;
                }
            }
            std::thread::sleep(step);
        }
        info!("online detection stopped");
    }

    /// Run the calibration sequence against live data.
    ///
    /// Drives the phase schedule off the same polling pattern as online
    /// detection; `on_phase` is invoked at every phase start so the caller
    /// can cue the subject (and steer a synthetic producer). On success the
    /// derived channel subset and adaptive threshold replace the session's
    /// configured values.
    ///
    /// # Errors
    ///
    /// [`CalibrationError::Interrupted`] when stopped mid-sequence, plus the
    /// controller's own errors.
    pub fn run_calibration(
        &mut self,
        mut on_phase: impl FnMut(&CalibrationPhase),
    ) -> Result<CalibrationOutcome, CalibrationError> {
        let mut controller = CalibrationController::new(&self.config, self.targets.clone());
        let step = Duration::from_secs_f64(self.config.step_seconds);

        // A calibration run owns the buffer contents and the vote state
        {
            let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
            buffer.clear();
        }
        self.seen = 0;
        self.stabilizer.reset();
        self.smoothed.fill(0.0);

        controller.start(self.now_ms());
        on_phase(&CalibrationPhase::Baseline);

        while !controller.done_collecting() {
            if self.stop.is_stopped() {
                return Err(CalibrationError::Interrupted);
            }
            std::thread::sleep(step);
            let now_ms = self.now_ms();
            if let Some(chunk) = self.drain_fresh() {
                if let Some(phase) = controller.add_chunk(&chunk, now_ms)? {
                    on_phase(&phase);
                }
            }
        }

        let outcome = controller.finish(&mut self.detector)?;
        self.threshold = outcome.threshold;
        self.selected_channels = Some(outcome.selected_channels.clone());
        self.stabilizer.reset();
        self.smoothed.fill(0.0);
        info!(
            threshold = outcome.threshold,
            channels = ?outcome.selected_channels,
            "calibration applied to session"
        );
        Ok(outcome)
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Samples written since the last drain, as one contiguous chunk.
    fn drain_fresh(&mut self) -> Option<Window> {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        let total = buffer.total_written();
        #[allow(clippy::cast_possible_truncation)]
        let fresh = (total.saturating_sub(self.seen) as usize).min(buffer.capacity());
        if fresh == 0 {
            return None;
        }
        self.seen = total;
        buffer.get_latest_samples(fresh)
    }

    fn tick(&mut self, now_ms: u64) -> Option<DetectionEvent> {
        let mut window = {
            let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
            buffer.get_latest_duration(self.config.window_seconds)?
        };

        self.filter.apply_all(&mut window);
        if let Some(channels) = &self.selected_channels {
            if !channels.is_empty() {
                window = select_channels(&window, channels);
            }
        }

        let raw = self.detector.detect(&window);
        let result = if self.config.ema_alpha < 1.0 {
            let alpha = self.config.ema_alpha;
            for (smoothed, score) in self.smoothed.iter_mut().zip(&raw.scores) {
                *smoothed = alpha * score.score + (1.0 - alpha) * *smoothed;
            }
            DetectionResult::from_scores(self.targets.frequencies(), &self.smoothed)
        } else {
            raw
        };

        let confident =
            result.score >= self.threshold && result.confidence >= self.config.min_confidence;
        let (candidate, stable) = if confident {
            let stable_index = self.stabilizer.update(result.index, now_ms);
            (
                Some(result.frequency),
                stable_index.map(|i| self.targets.frequencies()[i]),
            )
        } else {
            // Low confidence or a tie: no hold time may accumulate
            self.stabilizer.reset();
            (None, None)
        };

        debug!(
            best = result.frequency,
            score = result.score,
            confidence = result.confidence,
            ?candidate,
            ?stable,
            "detection tick"
        );
        Some(DetectionEvent {
            timestamp_ms: now_ms,
            candidate,
            stable,
            scores: result.scores,
            confidence: result.confidence,
        })
    }
}
