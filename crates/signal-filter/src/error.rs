//! Validation Error Types

use thiserror::Error;

/// Errors raised when a signal is outside its plausible range
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    /// Value out of allowed range
    #[error("{field} value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    /// NaN or infinite input
    #[error("{0} is not a finite number")]
    NotFinite(&'static str),

    /// Pose estimator returned its all-zero failure value
    #[error("Head pose is all zeros (tracking failure)")]
    ZeroPose,
}
