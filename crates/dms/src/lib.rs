//! Driver Monitoring System (DMS)
//!
//! Per-frame driver state decisions from geometric face and hand signals:
//! - Personalized EAR calibration
//! - Drowsiness (eye closure, PERCLOS, weighted score, yawning)
//! - Distraction (head pose and hand zones)
//! - Expression classification for false-positive suppression
//! - Status arbitration and identity-gated event emission

pub mod aggregator;
pub mod analysis;
pub mod calibration;
pub mod config;
pub mod distraction;
pub mod drowsiness;
pub mod expression;
pub mod frame;
pub mod monitor;
pub mod state;

pub use aggregator::StatusAggregator;
pub use analysis::{Diagnostics, FinalStatus, LoggableEvent};
pub use calibration::{AbandonReason, CalibrationProgress, CalibrationSession};
pub use config::{DmsConfig, FrameCounts};
pub use distraction::{DistractionOutput, DistractionStateMachine, DistractionStatus};
pub use drowsiness::{DrowsinessInput, DrowsinessOutput, DrowsinessStateMachine};
pub use expression::ExpressionClassifier;
pub use frame::{FaceLandmarks, FrameInput, FrameSample, HandLandmarks, HandZones};
pub use monitor::{DriverMonitor, MonitorMode, MonitorOutput};
pub use state::{DistractionReason, DrowsinessLabel, ExpressionLabel, StatusColor, StatusLabel};

use driver_auth::AuthError;
use thiserror::Error;

/// DMS error types
#[derive(Error, Debug)]
pub enum DmsError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Identity error: {0}")]
    Identity(#[from] AuthError),

    #[error("Monitor stopped")]
    Stopped,
}
