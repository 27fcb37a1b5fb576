//! Loggable event contract

use crate::{AlertError, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User id reported while no identity is active; its events are never delivered
pub const UNKNOWN_USER_ID: u32 = 0;

/// One driver-state event, as handed to persistence and remote delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub user_id: u32,
    /// e.g. `DROWSY`, `YAWN`, `DISTRACTION_ASIDE`
    pub event_type: String,
    pub duration_sec: f64,
    /// Measured value (minimum EAR, MAR, score, ...)
    pub value: f64,
    /// Source frame, when the collaborator keeps snapshots
    pub frame_id: Option<u64>,
    pub category: String,
    pub detail: String,
    pub severity: Severity,
}

impl EventRecord {
    pub fn new(
        user_id: u32,
        event_type: impl Into<String>,
        category: impl Into<String>,
        detail: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            recorded_at: Utc::now(),
            user_id,
            event_type: event_type.into(),
            duration_sec: 0.0,
            value: 0.0,
            frame_id: None,
            category: category.into(),
            detail: detail.into(),
            severity,
        }
    }

    pub fn with_measurement(mut self, duration_sec: f64, value: f64) -> Self {
        self.duration_sec = duration_sec;
        self.value = value;
        self
    }

    pub fn with_frame(mut self, frame_id: u64) -> Self {
        self.frame_id = Some(frame_id);
        self
    }

    pub fn is_attributed(&self) -> bool {
        self.user_id != UNKNOWN_USER_ID
    }
}

/// Persistence / remote delivery collaborator
pub trait EventSink: Send + Sync {
    fn record(&self, event: &EventRecord) -> Result<(), AlertError>;
}
