//! DMS configuration
//!
//! Every duration is configured in seconds and converted to frame counts
//! once, by [`DmsConfig::resolve`], using `system.target_fps`.

use crate::DmsError;
use alerting::DurationSeverity;
use driver_auth::IdentityConfig;
use serde::{Deserialize, Serialize};
pub use signal_filter::sec_to_frames;
use std::path::Path;

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DmsConfig {
    pub system: SystemConfig,
    pub smoothing: SmoothingConfig,
    pub calibration: CalibrationConfig,
    pub drowsiness: DrowsinessConfig,
    pub distraction: DistractionConfig,
    pub expression: ExpressionConfig,
    pub identity: IdentityConfig,
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Frame rate used for every seconds-to-frames conversion
    pub target_fps: f64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self { target_fps: 30.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// Rolling EAR average window (seconds)
    pub ear_window_sec: f64,
    /// EMA factor for MAR
    pub mar_alpha: f64,
    /// EMA factor for head pose angles
    pub pose_alpha: f64,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            ear_window_sec: 1.0,
            mar_alpha: 0.35,
            pose_alpha: 0.5,
        }
    }
}

/// Per-user EAR baseline collection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub duration_sec: f64,
    /// Abandon after this long without a valid sample
    pub face_lost_timeout_sec: f64,
    pub min_valid_samples: usize,
    /// EAR samples outside this range are ignored
    pub ear_bounds: (f64, f64),
    /// threshold = mean(samples) * drowsiness_factor
    pub drowsiness_factor: f64,
    /// Sample buffer capacity
    pub max_samples: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            duration_sec: 10.0,
            face_lost_timeout_sec: 3.5,
            min_valid_samples: 20,
            ear_bounds: (0.06, 0.60),
            drowsiness_factor: 0.8,
            max_samples: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EarConfig {
    /// Default low threshold (replaced by the calibrated per-user value)
    pub low_threshold: f64,
    /// High threshold; the ratio high/low is kept for personalized thresholds
    pub high_threshold: f64,
    /// Consecutive below-threshold time that asserts DROWSY
    pub consec_sec: f64,
}

impl Default for EarConfig {
    fn default() -> Self {
        Self {
            low_threshold: 0.22,
            high_threshold: 0.26,
            consec_sec: 1.0,
        }
    }
}

impl EarConfig {
    pub fn high_ratio(&self) -> f64 {
        if self.low_threshold > 0.0 {
            self.high_threshold / self.low_threshold
        } else {
            1.2
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EpisodeConfig {
    pub start_sec: f64,
    pub end_grace_sec: f64,
    /// Closed episodes shorter than this are not counted
    pub min_episode_sec: f64,
}

impl Default for EpisodeConfig {
    fn default() -> Self {
        Self {
            start_sec: 0.5,
            end_grace_sec: 1.5,
            min_episode_sec: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerclosConfig {
    pub window_sec: f64,
    /// PERCLOS above this is flagged in diagnostics
    pub threshold: f64,
}

impl Default for PerclosConfig {
    fn default() -> Self {
        Self {
            window_sec: 30.0,
            threshold: 0.25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub perclos: f64,
    pub eyes_closed: f64,
    pub yawn: f64,
    pub pitch: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            perclos: 0.55,
            eyes_closed: 0.25,
            yawn: 0.15,
            pitch: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreConfig {
    pub on_threshold: f64,
    pub off_threshold: f64,
    pub hold_sec: f64,
    pub release_sec: f64,
    /// Eyes closed this long forces the score state on
    pub hard_close_sec: f64,
    /// Yawns in the frequency window at which the yawn term saturates
    pub yawn_saturate_count: usize,
    pub weights: ScoreWeights,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            on_threshold: 0.65,
            off_threshold: 0.45,
            hold_sec: 0.5,
            release_sec: 1.0,
            hard_close_sec: 2.0,
            yawn_saturate_count: 3,
            weights: ScoreWeights::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct YawnConfig {
    pub mar_threshold: f64,
    /// MAR above threshold this long confirms a yawn
    pub threshold_sec: f64,
    pub cooldown_sec: f64,
    /// Hand landmark within this normalized distance of the mouth center covers it
    pub hand_cover_distance_norm: f64,
    pub frequency_window_sec: f64,
    pub high_frequency_count: usize,
    pub timestamps_max: usize,
    /// Yawn MAR threshold while the mouth is covered by a hand
    pub covered_mar_min: f64,
}

impl Default for YawnConfig {
    fn default() -> Self {
        Self {
            mar_threshold: 0.55,
            threshold_sec: 0.27,
            cooldown_sec: 2.0,
            hand_cover_distance_norm: 0.15,
            frequency_window_sec: 120.0,
            high_frequency_count: 3,
            timestamps_max: 10,
            covered_mar_min: 0.45,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuppressionConfig {
    pub smile_sec: f64,
    pub laugh_sec: f64,
}

impl Default for SuppressionConfig {
    fn default() -> Self {
        Self {
            smile_sec: 0.5,
            laugh_sec: 0.67,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadPoseScoreConfig {
    pub pitch_abs_threshold_deg: f64,
}

impl Default for HeadPoseScoreConfig {
    fn default() -> Self {
        Self {
            pitch_abs_threshold_deg: 18.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DrowsinessConfig {
    pub ear: EarConfig,
    pub episode: EpisodeConfig,
    pub perclos: PerclosConfig,
    pub score: ScoreConfig,
    pub yawn: YawnConfig,
    pub expression_suppression: SuppressionConfig,
    pub head_pose: HeadPoseScoreConfig,
    pub severity: DurationSeverity,
}

/// Normalized image regions for hand classification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandZoneConfig {
    /// Fingertip above this line may hold a phone
    pub phone_zone_y_max: f64,
    pub phone_zone_x_left: f64,
    pub phone_zone_x_right: f64,
    /// Wrist below this line is on the wheel
    pub wheel_zone_y_min: f64,
}

impl Default for HandZoneConfig {
    fn default() -> Self {
        Self {
            phone_zone_y_max: 0.5,
            phone_zone_x_left: 0.30,
            phone_zone_x_right: 0.70,
            wheel_zone_y_min: 0.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistractionConfig {
    pub yaw_threshold_deg: f64,
    pub pitch_down_threshold_deg: f64,
    pub pitch_up_threshold_deg: f64,
    pub roll_threshold_deg: f64,
    /// Sustained stable distraction before it is confirmed
    pub time_threshold_sec: f64,
    /// Resting pose of the driver as seen by this camera mount
    pub expected_pitch_deg: f64,
    pub expected_yaw_deg: f64,
    pub expected_roll_deg: f64,
    pub vote_window: usize,
    pub vote_min_true: usize,
    pub zones: HandZoneConfig,
}

impl Default for DistractionConfig {
    fn default() -> Self {
        Self {
            yaw_threshold_deg: 45.0,
            pitch_down_threshold_deg: 25.0,
            pitch_up_threshold_deg: 25.0,
            roll_threshold_deg: 35.0,
            time_threshold_sec: 2.5,
            expected_pitch_deg: 0.0,
            expected_yaw_deg: 0.0,
            expected_roll_deg: 0.0,
            vote_window: 5,
            vote_min_true: 3,
            zones: HandZoneConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpressionConfig {
    pub ema_alpha: f64,
    /// Majority-vote window
    pub persist_frames: usize,
    /// Frames used to capture the neutral mouth width
    pub baseline_frames: usize,
    pub yawn_mar: f64,
    pub laugh_mar: f64,
    pub laugh_width_ratio: f64,
    /// Minimum recent MAR change per frame for a laugh
    pub laugh_velocity: f64,
    pub smile_width_ratio: f64,
    pub smile_mar: f64,
    /// Hand fingertip within this normalized radius of the mouth obscures it
    pub hand_mouth_radius: f64,
}

impl Default for ExpressionConfig {
    fn default() -> Self {
        Self {
            ema_alpha: 0.35,
            persist_frames: 6,
            baseline_frames: 30,
            yawn_mar: 0.55,
            laugh_mar: 0.40,
            laugh_width_ratio: 1.10,
            laugh_velocity: 0.05,
            smile_width_ratio: 1.15,
            smile_mar: 0.25,
            hand_mouth_radius: 0.16,
        }
    }
}

/// Orchestration of identity, calibration and detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// An unrecognized face present this long starts calibration
    pub unknown_face_sec: f64,
    /// Frames between known-user probes while calibrating
    pub probe_interval_frames: u32,
    /// Embeddings kept for registration
    pub registration_samples: usize,
    /// Active identity mismatching this long hands the seat over
    pub identity_lost_sec: f64,
    pub event_queue_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            unknown_face_sec: 2.0,
            probe_interval_frames: 15,
            registration_samples: 10,
            identity_lost_sec: 3.0,
            event_queue_capacity: 64,
        }
    }
}

/// Frame counts derived from the configured durations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCounts {
    pub ear_window: usize,
    pub ear_consec: u32,
    pub episode_start: u32,
    pub episode_end: u32,
    pub perclos_window: usize,
    pub score_hold: u32,
    pub score_release: u32,
    pub hard_close: u32,
    pub yawn_thresh: u32,
    pub yawn_cooldown: u32,
    pub smile_suppress: u32,
    pub laugh_suppress: u32,
}

fn check_positive(name: &str, value: f64) -> Result<(), DmsError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(DmsError::Config(format!("{} must be positive, got {}", name, value)))
    }
}

fn check_unit(name: &str, value: f64) -> Result<(), DmsError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(DmsError::Config(format!("{} must be within [0, 1], got {}", name, value)))
    }
}

fn check_non_negative(name: &str, value: f64) -> Result<(), DmsError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(DmsError::Config(format!("{} must not be negative, got {}", name, value)))
    }
}

impl DmsConfig {
    /// Load from a YAML/TOML file, then apply `DMS__SECTION__KEY` environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DmsError> {
        let config: DmsConfig = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix("DMS").separator("__"))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| DmsError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides only
    pub fn from_env() -> Result<Self, DmsError> {
        let config: DmsConfig = config::Config::builder()
            .add_source(config::Environment::with_prefix("DMS").separator("__"))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| DmsError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<(), DmsError> {
        check_positive("system.target_fps", self.system.target_fps)?;
        check_positive("smoothing.ear_window_sec", self.smoothing.ear_window_sec)?;
        check_unit("smoothing.mar_alpha", self.smoothing.mar_alpha)?;
        check_unit("smoothing.pose_alpha", self.smoothing.pose_alpha)?;

        let cal = &self.calibration;
        check_positive("calibration.duration_sec", cal.duration_sec)?;
        check_positive("calibration.face_lost_timeout_sec", cal.face_lost_timeout_sec)?;
        check_positive("calibration.drowsiness_factor", cal.drowsiness_factor)?;
        if cal.drowsiness_factor > 1.0 {
            return Err(DmsError::Config(format!(
                "calibration.drowsiness_factor must not exceed 1, got {}",
                cal.drowsiness_factor
            )));
        }
        if cal.min_valid_samples == 0 || cal.max_samples < cal.min_valid_samples {
            return Err(DmsError::Config(format!(
                "calibration needs 0 < min_valid_samples ({}) <= max_samples ({})",
                cal.min_valid_samples, cal.max_samples
            )));
        }
        if cal.ear_bounds.0 >= cal.ear_bounds.1 {
            return Err(DmsError::Config(format!(
                "calibration.ear_bounds {:?} is empty",
                cal.ear_bounds
            )));
        }

        let d = &self.drowsiness;
        check_unit("drowsiness.ear.low_threshold", d.ear.low_threshold)?;
        check_unit("drowsiness.ear.high_threshold", d.ear.high_threshold)?;
        if d.ear.high_threshold < d.ear.low_threshold {
            return Err(DmsError::Config(
                "drowsiness.ear.high_threshold must be >= low_threshold".into(),
            ));
        }
        check_positive("drowsiness.ear.consec_sec", d.ear.consec_sec)?;
        check_positive("drowsiness.episode.start_sec", d.episode.start_sec)?;
        check_positive("drowsiness.episode.end_grace_sec", d.episode.end_grace_sec)?;
        check_non_negative("drowsiness.episode.min_episode_sec", d.episode.min_episode_sec)?;
        check_positive("drowsiness.perclos.window_sec", d.perclos.window_sec)?;
        check_unit("drowsiness.perclos.threshold", d.perclos.threshold)?;
        check_unit("drowsiness.score.on_threshold", d.score.on_threshold)?;
        check_unit("drowsiness.score.off_threshold", d.score.off_threshold)?;
        if d.score.on_threshold <= d.score.off_threshold {
            return Err(DmsError::Config(format!(
                "drowsiness.score.on_threshold ({}) must exceed off_threshold ({})",
                d.score.on_threshold, d.score.off_threshold
            )));
        }
        check_positive("drowsiness.score.hold_sec", d.score.hold_sec)?;
        check_positive("drowsiness.score.release_sec", d.score.release_sec)?;
        check_positive("drowsiness.score.hard_close_sec", d.score.hard_close_sec)?;
        if d.score.yawn_saturate_count == 0 {
            return Err(DmsError::Config(
                "drowsiness.score.yawn_saturate_count must be at least 1".into(),
            ));
        }
        let w = &d.score.weights;
        for (name, value) in [
            ("perclos", w.perclos),
            ("eyes_closed", w.eyes_closed),
            ("yawn", w.yawn),
            ("pitch", w.pitch),
        ] {
            check_non_negative(&format!("drowsiness.score.weights.{}", name), value)?;
        }
        check_positive("drowsiness.yawn.mar_threshold", d.yawn.mar_threshold)?;
        check_positive("drowsiness.yawn.threshold_sec", d.yawn.threshold_sec)?;
        check_non_negative("drowsiness.yawn.cooldown_sec", d.yawn.cooldown_sec)?;
        check_positive("drowsiness.yawn.frequency_window_sec", d.yawn.frequency_window_sec)?;
        if d.yawn.high_frequency_count == 0 || d.yawn.timestamps_max < d.yawn.high_frequency_count {
            return Err(DmsError::Config(format!(
                "drowsiness.yawn needs 0 < high_frequency_count ({}) <= timestamps_max ({})",
                d.yawn.high_frequency_count, d.yawn.timestamps_max
            )));
        }
        check_non_negative("drowsiness.expression_suppression.smile_sec", d.expression_suppression.smile_sec)?;
        check_non_negative("drowsiness.expression_suppression.laugh_sec", d.expression_suppression.laugh_sec)?;
        if !d.severity.is_ordered() {
            return Err(DmsError::Config(
                "drowsiness.severity thresholds must be non-negative and ascending".into(),
            ));
        }

        let x = &self.distraction;
        check_positive("distraction.yaw_threshold_deg", x.yaw_threshold_deg)?;
        check_positive("distraction.pitch_down_threshold_deg", x.pitch_down_threshold_deg)?;
        check_positive("distraction.pitch_up_threshold_deg", x.pitch_up_threshold_deg)?;
        check_positive("distraction.roll_threshold_deg", x.roll_threshold_deg)?;
        check_non_negative("distraction.time_threshold_sec", x.time_threshold_sec)?;
        if x.vote_window == 0 || x.vote_min_true == 0 || x.vote_min_true > x.vote_window {
            return Err(DmsError::Config(format!(
                "distraction needs 0 < vote_min_true ({}) <= vote_window ({})",
                x.vote_min_true, x.vote_window
            )));
        }
        for (name, value) in [
            ("phone_zone_y_max", x.zones.phone_zone_y_max),
            ("phone_zone_x_left", x.zones.phone_zone_x_left),
            ("phone_zone_x_right", x.zones.phone_zone_x_right),
            ("wheel_zone_y_min", x.zones.wheel_zone_y_min),
        ] {
            check_unit(&format!("distraction.zones.{}", name), value)?;
        }

        let e = &self.expression;
        check_unit("expression.ema_alpha", e.ema_alpha)?;
        if e.persist_frames == 0 || e.baseline_frames == 0 {
            return Err(DmsError::Config(
                "expression.persist_frames and baseline_frames must be at least 1".into(),
            ));
        }
        check_positive("expression.hand_mouth_radius", e.hand_mouth_radius)?;

        self.identity
            .validate()
            .map_err(|e| DmsError::Config(e.to_string()))?;

        let m = &self.monitor;
        check_non_negative("monitor.unknown_face_sec", m.unknown_face_sec)?;
        check_positive("monitor.identity_lost_sec", m.identity_lost_sec)?;
        if m.probe_interval_frames == 0 || m.registration_samples == 0 || m.event_queue_capacity == 0 {
            return Err(DmsError::Config(
                "monitor intervals, sample counts and queue capacity must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Convert every duration to frames at the configured rate
    pub fn resolve(&self) -> FrameCounts {
        let fps = self.system.target_fps;
        let d = &self.drowsiness;
        FrameCounts {
            ear_window: sec_to_frames(self.smoothing.ear_window_sec, fps) as usize,
            ear_consec: sec_to_frames(d.ear.consec_sec, fps),
            episode_start: sec_to_frames(d.episode.start_sec, fps),
            episode_end: sec_to_frames(d.episode.end_grace_sec, fps),
            perclos_window: sec_to_frames(d.perclos.window_sec, fps) as usize,
            score_hold: sec_to_frames(d.score.hold_sec, fps),
            score_release: sec_to_frames(d.score.release_sec, fps),
            hard_close: sec_to_frames(d.score.hard_close_sec, fps),
            yawn_thresh: sec_to_frames(d.yawn.threshold_sec, fps),
            yawn_cooldown: sec_to_frames(d.yawn.cooldown_sec, fps),
            smile_suppress: sec_to_frames(d.expression_suppression.smile_sec, fps),
            laugh_suppress: sec_to_frames(d.expression_suppression.laugh_sec, fps),
        }
    }

    /// Create strict config (earlier alerts)
    pub fn strict() -> Self {
        let mut config = Self::default();
        config.drowsiness.ear.consec_sec = 0.7;
        config.drowsiness.score.on_threshold = 0.55;
        config.drowsiness.score.off_threshold = 0.40;
        config.distraction.yaw_threshold_deg = 35.0;
        config.distraction.pitch_down_threshold_deg = 20.0;
        config.distraction.pitch_up_threshold_deg = 20.0;
        config.distraction.time_threshold_sec = 1.5;
        config
    }

    /// Create lenient config (fewer false positives)
    pub fn lenient() -> Self {
        let mut config = Self::default();
        config.drowsiness.ear.consec_sec = 1.5;
        config.drowsiness.score.on_threshold = 0.75;
        config.drowsiness.score.off_threshold = 0.50;
        config.distraction.yaw_threshold_deg = 50.0;
        config.distraction.time_threshold_sec = 3.5;
        config
    }
}
