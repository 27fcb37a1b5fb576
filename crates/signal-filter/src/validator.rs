//! Plausibility checks for face signals

use crate::error::ValidationError;
use crate::pose::HeadPose;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Plausible EAR range (outside = landmark glitch)
    pub ear_range: (f64, f64),
    /// Plausible MAR range
    pub mar_range: (f64, f64),
    /// Any pose angle at or beyond this magnitude is a solver failure (degrees)
    pub max_abs_angle: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            ear_range: (0.0, 1.0),
            mar_range: (0.0, 1.5),
            max_abs_angle: 90.0,
        }
    }
}

/// Range validator for per-frame signals
#[derive(Debug, Clone)]
pub struct Validator {
    config: ValidationConfig,
}

impl Validator {
    /// Create a new validator with given config
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Validate a single value against an inclusive range
    pub fn validate_range(
        &self,
        field: &'static str,
        value: f64,
        range: (f64, f64),
    ) -> Result<(), ValidationError> {
        if !value.is_finite() {
            return Err(ValidationError::NotFinite(field));
        }
        if value < range.0 || value > range.1 {
            trace!(field, value, "Signal rejected");
            Err(ValidationError::OutOfRange {
                field,
                value,
                min: range.0,
                max: range.1,
            })
        } else {
            Ok(())
        }
    }

    /// Validate an eye aspect ratio sample
    pub fn validate_ear(&self, ear: f64) -> Result<(), ValidationError> {
        self.validate_range("ear", ear, self.config.ear_range)
    }

    /// Validate a mouth aspect ratio sample
    pub fn validate_mar(&self, mar: f64) -> Result<(), ValidationError> {
        self.validate_range("mar", mar, self.config.mar_range)
    }

    /// Reject solver failures: any |angle| >= limit, or the all-zero pose
    pub fn validate_pose(&self, pose: &HeadPose) -> Result<(), ValidationError> {
        let limit = self.config.max_abs_angle;
        for (field, value) in [("pitch", pose.pitch), ("yaw", pose.yaw), ("roll", pose.roll)] {
            if !value.is_finite() {
                return Err(ValidationError::NotFinite(field));
            }
            if value.abs() >= limit {
                return Err(ValidationError::OutOfRange {
                    field,
                    value,
                    min: -limit,
                    max: limit,
                });
            }
        }
        if pose.pitch == 0.0 && pose.yaw == 0.0 && pose.roll == 0.0 {
            return Err(ValidationError::ZeroPose);
        }
        Ok(())
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(ValidationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_ear() {
        let validator = Validator::default();
        assert!(validator.validate_ear(0.30).is_ok());
        assert!(validator.validate_ear(0.0).is_ok());
        assert!(validator.validate_ear(1.0).is_ok());
    }

    #[test]
    fn test_invalid_ear() {
        let validator = Validator::default();
        let result = validator.validate_ear(1.2);
        assert!(matches!(result, Err(ValidationError::OutOfRange { field: "ear", .. })));
        assert_eq!(
            validator.validate_ear(f64::NAN),
            Err(ValidationError::NotFinite("ear"))
        );
    }

    #[test]
    fn test_calibration_bounds() {
        let validator = Validator::default();
        assert!(validator.validate_range("ear", 0.05, (0.06, 0.60)).is_err());
        assert!(validator.validate_range("ear", 0.25, (0.06, 0.60)).is_ok());
    }

    #[test]
    fn test_pose_limits() {
        let validator = Validator::default();
        assert!(validator.validate_pose(&HeadPose::new(10.0, -20.0, 3.0)).is_ok());
        assert!(validator.validate_pose(&HeadPose::new(0.0, 90.0, 0.0)).is_err());
        assert!(validator.validate_pose(&HeadPose::new(-95.0, 1.0, 0.0)).is_err());
    }

    #[test]
    fn test_zero_pose_rejected() {
        let validator = Validator::default();
        assert_eq!(
            validator.validate_pose(&HeadPose::default()),
            Err(ValidationError::ZeroPose)
        );
        // One non-zero component is enough
        assert!(validator.validate_pose(&HeadPose::new(0.0, 0.0, 0.1)).is_ok());
    }
}
