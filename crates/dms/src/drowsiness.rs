//! Drowsiness state machine
//!
//! Four cooperating mechanisms feed one label:
//! - consecutive eyes-closed counter (hard edge, asserts DROWSY)
//! - eye-closure episode tracker with low/high hysteresis
//! - PERCLOS over a trailing window
//! - weighted score with Schmitt-trigger hold/release
//!
//! Yawns are confirmed from sustained MAR, rate-limited by a cooldown and
//! counted over a long window. Smiles and laughs suppress both eye and yawn
//! triggers for a short time.

use crate::analysis::{Diagnostics, LoggableEvent};
use crate::config::{DrowsinessConfig, FrameCounts};
use crate::state::{DrowsinessLabel, ExpressionLabel, StatusColor};
use alerting::Severity;
use metrics::gauge;
use ring_buffer::{FlagWindow, RingBuffer};
use serde::Serialize;
use tracing::{debug, info};

pub const EVENT_DROWSY: &str = "DROWSY";
pub const EVENT_DROWSY_SCORE_ON: &str = "DROWSY_SCORE_ON";
pub const EVENT_YAWN: &str = "YAWN";

const CATEGORY: &str = "Drowsiness";

/// Smoothed per-frame inputs
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DrowsinessInput {
    pub timestamp_sec: f64,
    pub ear: Option<f64>,
    pub mar: Option<f64>,
    pub pitch: Option<f64>,
    pub expression: ExpressionLabel,
    /// A hand covers the mouth
    pub mouth_covered: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrowsinessOutput {
    pub label: DrowsinessLabel,
    pub color: StatusColor,
    pub diagnostics: Diagnostics,
    /// Set only on the frame a state edge occurred
    pub event: Option<LoggableEvent>,
}

/// Running counters for telemetry
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DrowsinessStats {
    /// Closed-eye episodes that lasted at least `min_episode_sec`
    pub closed_episodes: u64,
    pub drowsy_events: u64,
    pub yawns_in_window: usize,
    pub perclos: f64,
}

/// Eye-closure episode with separate enter/exit thresholds
#[derive(Debug, Default)]
struct EyeEpisode {
    active: bool,
    start_ts: f64,
    min_ear: f64,
    below_run: u32,
    below_since: f64,
    above_run: u32,
    closed_episodes: u64,
}

impl EyeEpisode {
    fn update(&mut self, ts: f64, ear: f64, low: f64, high: f64, frames: &FrameCounts, min_sec: f64) {
        if self.active {
            self.min_ear = self.min_ear.min(ear);
        }
        if ear < low {
            if self.below_run == 0 {
                self.below_since = ts;
            }
            self.below_run += 1;
            self.above_run = 0;
            if !self.active && self.below_run >= frames.episode_start {
                self.active = true;
                self.start_ts = self.below_since;
                self.min_ear = ear;
                debug!(start_ts = self.start_ts, "Eye closure episode started");
            }
        } else if ear >= high {
            self.above_run += 1;
            self.below_run = 0;
            if self.active && self.above_run >= frames.episode_end {
                self.active = false;
                let duration = ts - self.start_ts;
                if duration >= min_sec {
                    self.closed_episodes += 1;
                }
                debug!(
                    duration_sec = duration,
                    min_ear = self.min_ear,
                    "Eye closure episode ended"
                );
            }
        } else {
            self.below_run = 0;
            self.above_run = 0;
        }
    }
}

/// Schmitt trigger over the weighted score
#[derive(Debug, Default)]
struct ScoreTrigger {
    on: bool,
    hold_run: u32,
    release_run: u32,
}

pub struct DrowsinessStateMachine {
    config: DrowsinessConfig,
    frames: FrameCounts,
    ear_threshold: f64,
    high_threshold: f64,

    closed_run: u32,
    closed_since: f64,
    closed_min_ear: f64,
    drowsy_events: u64,

    episode: EyeEpisode,
    perclos: FlagWindow,
    score: ScoreTrigger,

    yawn_run: u32,
    yawn_peak_mar: f64,
    yawn_active: bool,
    yawn_cooldown: u32,
    yawn_times: RingBuffer<f64>,

    suppress_remaining: u32,
}

impl DrowsinessStateMachine {
    pub fn new(config: &DrowsinessConfig, frames: &FrameCounts) -> Self {
        Self {
            ear_threshold: config.ear.low_threshold,
            high_threshold: config.ear.high_threshold,
            closed_run: 0,
            closed_since: 0.0,
            closed_min_ear: f64::MAX,
            drowsy_events: 0,
            episode: EyeEpisode::default(),
            perclos: FlagWindow::new(frames.perclos_window),
            score: ScoreTrigger::default(),
            yawn_run: 0,
            yawn_peak_mar: 0.0,
            yawn_active: false,
            yawn_cooldown: 0,
            yawn_times: RingBuffer::new(config.yawn.timestamps_max),
            suppress_remaining: 0,
            frames: *frames,
            config: config.clone(),
        }
    }

    /// Install a personalized low threshold; the high threshold keeps the configured ratio
    pub fn set_threshold(&mut self, ear_threshold: f64) {
        self.ear_threshold = ear_threshold;
        self.high_threshold = ear_threshold * self.config.ear.high_ratio();
        info!(
            ear_threshold,
            high_threshold = self.high_threshold,
            "Drowsiness thresholds updated"
        );
    }

    pub fn ear_threshold(&self) -> f64 {
        self.ear_threshold
    }

    /// Clear all per-driver state, keeping the installed thresholds
    pub fn reset(&mut self) {
        let threshold = (self.ear_threshold, self.high_threshold);
        *self = Self::new(&self.config, &self.frames);
        (self.ear_threshold, self.high_threshold) = threshold;
    }

    pub fn stats(&self) -> DrowsinessStats {
        DrowsinessStats {
            closed_episodes: self.episode.closed_episodes,
            drowsy_events: self.drowsy_events,
            yawns_in_window: self.yawn_times.len(),
            perclos: self.perclos.ratio(),
        }
    }

    /// PERCLOS term for the score, zero until the window is half full
    fn perclos_term(&self) -> f64 {
        if self.perclos.len() * 2 >= self.perclos.capacity() {
            self.perclos.ratio()
        } else {
            0.0
        }
    }

    fn yawn_density(&self) -> f64 {
        let saturate = self.config.score.yawn_saturate_count.max(1);
        self.yawn_times.len().min(saturate) as f64 / saturate as f64
    }

    fn frequent_yawning(&self) -> bool {
        self.yawn_times.len() >= self.config.yawn.high_frequency_count
    }

    fn update_suppression(&mut self, expression: ExpressionLabel) -> bool {
        let arm = match expression {
            ExpressionLabel::Smile => self.frames.smile_suppress,
            ExpressionLabel::Laugh => self.frames.laugh_suppress,
            _ => 0,
        };
        self.suppress_remaining = self.suppress_remaining.max(arm);
        if self.suppress_remaining > 0 {
            self.suppress_remaining -= 1;
            true
        } else {
            false
        }
    }

    /// Consecutive closed-eye counter; returns the DROWSY event on its rising edge
    fn update_eyes(&mut self, ts: f64, ear: Option<f64>, suppressed: bool) -> Option<LoggableEvent> {
        let closed = match ear {
            Some(value) if !suppressed && value < self.ear_threshold => value,
            _ => {
                self.closed_run = 0;
                return None;
            }
        };

        if self.closed_run == 0 {
            self.closed_since = ts;
            self.closed_min_ear = closed;
        }
        self.closed_run += 1;
        self.closed_min_ear = self.closed_min_ear.min(closed);

        if self.closed_run != self.frames.ear_consec {
            return None;
        }

        let duration = ts - self.closed_since;
        let severity = self.config.severity.classify(duration).max(Severity::Medium);
        self.drowsy_events += 1;
        info!(
            duration_sec = duration,
            min_ear = self.closed_min_ear,
            severity = %severity,
            "Drowsiness detected: eyes closed"
        );
        Some(LoggableEvent {
            event_type: EVENT_DROWSY.to_string(),
            category: CATEGORY.to_string(),
            detail: "Eyes Closed Too Long".to_string(),
            severity,
            duration_sec: duration,
            value: self.closed_min_ear,
        })
    }

    /// Returns the YAWN event on confirmation
    fn update_yawn(
        &mut self,
        ts: f64,
        mar: Option<f64>,
        mouth_covered: bool,
        suppressed: bool,
    ) -> Option<LoggableEvent> {
        if self.yawn_cooldown > 0 {
            self.yawn_cooldown -= 1;
        }

        let threshold = if mouth_covered {
            self.config.yawn.covered_mar_min
        } else {
            self.config.yawn.mar_threshold
        };
        let open = match mar {
            Some(value) if !suppressed && value > threshold => value,
            _ => {
                self.yawn_run = 0;
                if self.yawn_active {
                    self.yawn_active = false;
                    self.yawn_cooldown = self.frames.yawn_cooldown;
                    debug!(cooldown_frames = self.yawn_cooldown, "Yawn released");
                }
                return None;
            }
        };

        if self.yawn_run == 0 {
            self.yawn_peak_mar = open;
        }
        self.yawn_run += 1;
        self.yawn_peak_mar = self.yawn_peak_mar.max(open);

        if self.yawn_active || self.yawn_cooldown > 0 || self.yawn_run < self.frames.yawn_thresh {
            return None;
        }

        self.yawn_active = true;
        self.yawn_times.push(ts);

        let count = self.yawn_times.len();
        let (detail, severity) = if self.frequent_yawning() {
            ("Frequent Yawning", Severity::High)
        } else {
            ("Yawning", Severity::Low)
        };
        info!(mar = self.yawn_peak_mar, yawns_in_window = count, "{}", detail);
        Some(LoggableEvent {
            event_type: EVENT_YAWN.to_string(),
            category: CATEGORY.to_string(),
            detail: detail.to_string(),
            severity,
            duration_sec: 0.0,
            value: self.yawn_peak_mar,
        })
    }

    /// Schmitt trigger; returns the score-on event on its rising edge
    fn update_score(&mut self, score: f64, perclos: f64) -> Option<LoggableEvent> {
        let cfg = &self.config.score;
        let hard_close = self.closed_run >= self.frames.hard_close;
        let trigger = &mut self.score;

        if !trigger.on {
            if score >= cfg.on_threshold {
                trigger.hold_run += 1;
            } else {
                trigger.hold_run = 0;
            }
            if trigger.hold_run >= self.frames.score_hold || hard_close {
                trigger.on = true;
                trigger.hold_run = 0;
                trigger.release_run = 0;
                info!(score, perclos, hard_close, "Drowsiness score asserted");
                return Some(LoggableEvent {
                    event_type: EVENT_DROWSY_SCORE_ON.to_string(),
                    category: CATEGORY.to_string(),
                    detail: format!("Weighted score ON (score={:.2}, perclos={:.2})", score, perclos),
                    severity: Severity::Medium,
                    duration_sec: 0.0,
                    value: score,
                });
            }
        } else {
            if score < cfg.off_threshold && !hard_close {
                trigger.release_run += 1;
            } else {
                trigger.release_run = 0;
            }
            if trigger.release_run >= self.frames.score_release {
                trigger.on = false;
                trigger.release_run = 0;
                debug!(score, "Drowsiness score released");
            }
        }
        None
    }

    pub fn update(&mut self, input: &DrowsinessInput) -> DrowsinessOutput {
        let ts = input.timestamp_sec;
        // Yawns age out of the frequency window on every frame
        let window = self.config.yawn.frequency_window_sec;
        self.yawn_times.evict_while(|&t| ts - t > window);

        let suppressed = self.update_suppression(input.expression);

        let drowsy_event = self.update_eyes(ts, input.ear, suppressed);
        if let Some(ear) = input.ear {
            self.episode.update(
                ts,
                ear,
                self.ear_threshold,
                self.high_threshold,
                &self.frames,
                self.config.episode.min_episode_sec,
            );
            self.perclos.push(ear < self.ear_threshold);
        }
        let yawn_event = self.update_yawn(ts, input.mar, input.mouth_covered, suppressed);

        let w = &self.config.score.weights;
        let pitch_down = input
            .pitch
            .map(|p| p.abs() > self.config.head_pose.pitch_abs_threshold_deg)
            .unwrap_or(false);
        let perclos = self.perclos.ratio();
        let score = w.perclos * self.perclos_term()
            + w.eyes_closed * if self.episode.active { 1.0 } else { 0.0 }
            + w.yawn * self.yawn_density()
            + w.pitch * if pitch_down { 1.0 } else { 0.0 };
        let score_event = self.update_score(score, perclos);

        gauge!("dms_perclos").set(perclos);
        gauge!("dms_drowsy_score").set(score);

        let eyes_drowsy = self.closed_run >= self.frames.ear_consec;
        let label = if eyes_drowsy || self.score.on {
            DrowsinessLabel::Drowsy
        } else if self.yawn_active && self.frequent_yawning() {
            DrowsinessLabel::FrequentYawning
        } else if self.yawn_active {
            DrowsinessLabel::Yawning
        } else {
            DrowsinessLabel::Normal
        };
        let color = match label {
            DrowsinessLabel::Drowsy => StatusColor::Red,
            DrowsinessLabel::FrequentYawning => StatusColor::Orange,
            DrowsinessLabel::Yawning => StatusColor::Yellow,
            DrowsinessLabel::Normal => StatusColor::Green,
        };

        // One event per frame: DROWSY > DROWSY_SCORE_ON > YAWN
        let mut edges = [drowsy_event, score_event, yawn_event].into_iter().flatten();
        let event = edges.next();
        for dropped in edges {
            debug!(event_type = %dropped.event_type, "Event superseded on the same frame");
        }

        DrowsinessOutput {
            label,
            color,
            diagnostics: Diagnostics {
                drowsy_score: Some(score),
                perclos: Some(perclos),
                score_drowsy: Some(self.score.on),
                eye_episode_active: Some(self.episode.active),
                expression: Some(input.expression),
                looking_away: false,
            },
            event,
        }
    }
}
