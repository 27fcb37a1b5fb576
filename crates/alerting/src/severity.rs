//! Severity levels

use serde::{Deserialize, Serialize};
use std::fmt;

/// Event severity, ordered from least to most urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
            Severity::Critical => "Critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Duration thresholds (seconds) mapping an episode length to a severity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DurationSeverity {
    pub medium_sec: f64,
    pub high_sec: f64,
    pub critical_sec: f64,
}

impl Default for DurationSeverity {
    fn default() -> Self {
        Self {
            medium_sec: 2.0,
            high_sec: 3.0,
            critical_sec: 5.0,
        }
    }
}

impl DurationSeverity {
    pub fn classify(&self, duration_sec: f64) -> Severity {
        if duration_sec >= self.critical_sec {
            Severity::Critical
        } else if duration_sec >= self.high_sec {
            Severity::High
        } else if duration_sec >= self.medium_sec {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    /// Thresholds must be non-negative and non-decreasing
    pub fn is_ordered(&self) -> bool {
        self.medium_sec >= 0.0 && self.medium_sec <= self.high_sec && self.high_sec <= self.critical_sec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_levels() {
        let levels = DurationSeverity::default();

        assert_eq!(levels.classify(0.5), Severity::Low);
        assert_eq!(levels.classify(2.0), Severity::Medium);
        assert_eq!(levels.classify(3.4), Severity::High);
        assert_eq!(levels.classify(7.0), Severity::Critical);
    }

    #[test]
    fn test_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(Severity::High.to_string(), "High");
        assert!(DurationSeverity::default().is_ordered());
    }
}
