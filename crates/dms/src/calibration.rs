//! Per-user EAR baseline calibration
//!
//! A session collects plausible smoothed EAR samples for a fixed wall-clock
//! window and turns their mean into a personalized drowsiness threshold.

use crate::config::CalibrationConfig;
use ring_buffer::RingBuffer;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Why a session ended without a threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbandonReason {
    /// No valid sample for longer than the face-lost timeout
    FaceLost,
    /// Window elapsed with too few valid samples
    InsufficientSamples,
    /// Stop signal raised by the owner
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CalibrationProgress {
    Collecting { elapsed_sec: f64, samples: usize },
    Succeeded { threshold: f64 },
    Abandoned { reason: AbandonReason },
}

impl CalibrationProgress {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CalibrationProgress::Collecting { .. })
    }

    /// Derived threshold, `None` unless the session succeeded
    pub fn threshold(&self) -> Option<f64> {
        match self {
            CalibrationProgress::Succeeded { threshold } => Some(*threshold),
            _ => None,
        }
    }
}

/// One calibration run. Terminal states are sticky; start a new session to retry.
pub struct CalibrationSession {
    config: CalibrationConfig,
    samples: RingBuffer<f64>,
    started_at: Option<f64>,
    last_valid_at: Option<f64>,
    outcome: Option<CalibrationProgress>,
    stop: Arc<AtomicBool>,
}

impl CalibrationSession {
    pub fn new(config: &CalibrationConfig, stop: Arc<AtomicBool>) -> Self {
        Self {
            samples: RingBuffer::new(config.max_samples),
            config: config.clone(),
            started_at: None,
            last_valid_at: None,
            outcome: None,
            stop,
        }
    }

    /// Raise the session's stop signal
    pub fn cancel(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn outcome(&self) -> Option<CalibrationProgress> {
        self.outcome
    }

    fn is_plausible(&self, ear: f64) -> bool {
        let (min, max) = self.config.ear_bounds;
        ear.is_finite() && ear >= min && ear <= max
    }

    fn finish(&mut self, progress: CalibrationProgress) -> CalibrationProgress {
        self.samples.clear();
        self.started_at = None;
        self.last_valid_at = None;
        self.outcome = Some(progress);
        progress
    }

    /// Feed one frame; `ear` is `None` when no face was detected
    pub fn update(&mut self, timestamp_sec: f64, ear: Option<f64>) -> CalibrationProgress {
        if let Some(done) = self.outcome {
            return done;
        }
        if self.stop.load(Ordering::Relaxed) {
            info!(samples = self.samples.len(), "Calibration cancelled");
            return self.finish(CalibrationProgress::Abandoned {
                reason: AbandonReason::Cancelled,
            });
        }

        let started_at = *self.started_at.get_or_insert(timestamp_sec);

        match ear {
            Some(value) if self.is_plausible(value) => {
                self.samples.push(value);
                self.last_valid_at = Some(timestamp_sec);
            }
            Some(value) => debug!(ear = value, "Calibration sample out of bounds"),
            None => {}
        }

        let elapsed = timestamp_sec - started_at;
        let since_valid = timestamp_sec - self.last_valid_at.unwrap_or(started_at);

        if since_valid >= self.config.face_lost_timeout_sec {
            warn!(since_valid_sec = since_valid, "Calibration abandoned: face lost");
            return self.finish(CalibrationProgress::Abandoned {
                reason: AbandonReason::FaceLost,
            });
        }

        if elapsed >= self.config.duration_sec {
            let count = self.samples.len();
            if count < self.config.min_valid_samples {
                warn!(
                    samples = count,
                    required = self.config.min_valid_samples,
                    "Calibration abandoned: insufficient samples"
                );
                return self.finish(CalibrationProgress::Abandoned {
                    reason: AbandonReason::InsufficientSamples,
                });
            }
            let mean = self.samples.mean().unwrap_or(0.0);
            let threshold = mean * self.config.drowsiness_factor;
            info!(
                samples = count,
                mean_ear = mean,
                threshold,
                "Calibration succeeded"
            );
            return self.finish(CalibrationProgress::Succeeded { threshold });
        }

        CalibrationProgress::Collecting {
            elapsed_sec: elapsed,
            samples: self.samples.len(),
        }
    }
}
