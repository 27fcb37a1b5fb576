//! Driver-State Event Alerting
//!
//! Provides the loggable-event contract, severity mapping and a
//! non-blocking dispatcher in front of the persistence collaborator.

mod dispatcher;
mod event;
mod severity;

pub use dispatcher::{DispatchOutcome, DispatchStats, EventDispatcher};
pub use event::{EventRecord, EventSink, UNKNOWN_USER_ID};
pub use severity::{DurationSeverity, Severity};

use thiserror::Error;

/// Alerting error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AlertError {
    #[error("Event sink error: {0}")]
    Sink(String),

    #[error("Dispatcher is closed")]
    Closed,
}
