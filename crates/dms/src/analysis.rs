//! Per-frame results and loggable events

use crate::state::{ExpressionLabel, StatusColor, StatusLabel};
use alerting::{EventRecord, Severity};
use serde::Serialize;

/// Event descriptor produced on a state edge
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggableEvent {
    /// e.g. `DROWSY`, `YAWN`, `DROWSY_SCORE_ON`, `DISTRACTION_ASIDE`
    pub event_type: String,
    pub category: String,
    pub detail: String,
    pub severity: Severity,
    pub duration_sec: f64,
    pub value: f64,
}

impl LoggableEvent {
    /// Attach the driver and frame and turn this into a persistable record
    pub fn into_record(self, user_id: u32, frame_id: u64) -> EventRecord {
        EventRecord::new(user_id, self.event_type, self.category, self.detail, self.severity)
            .with_measurement(self.duration_sec, self.value)
            .with_frame(frame_id)
    }
}

/// Telemetry carried alongside the label
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diagnostics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drowsy_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub perclos: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_drowsy: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eye_episode_active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<ExpressionLabel>,
    /// Stable distraction votes, not yet confirmed
    pub looking_away: bool,
}

/// Arbitrated status for one frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalStatus {
    pub label: StatusLabel,
    pub color: StatusColor,
    pub diagnostics: Diagnostics,
    /// Present only on the frame where a state edge occurred
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<LoggableEvent>,
}

impl FinalStatus {
    pub fn normal() -> Self {
        Self {
            label: StatusLabel::Normal,
            color: StatusColor::Green,
            diagnostics: Diagnostics::default(),
            event: None,
        }
    }

    pub fn idle(label: StatusLabel) -> Self {
        Self {
            label,
            color: StatusColor::Gray,
            diagnostics: Diagnostics::default(),
            event: None,
        }
    }

    pub fn should_log(&self) -> bool {
        self.event.is_some()
    }
}
