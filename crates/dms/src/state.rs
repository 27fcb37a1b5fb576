//! Driver state labels

use serde::{Deserialize, Serialize};
use std::fmt;

/// Output label of the drowsiness state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DrowsinessLabel {
    #[default]
    Normal,
    Yawning,
    FrequentYawning,
    Drowsy,
}

impl DrowsinessLabel {
    /// Drowsiness-class labels win arbitration outright
    pub fn is_alerting(&self) -> bool {
        !matches!(self, DrowsinessLabel::Normal)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DrowsinessLabel::Normal => "NORMAL",
            DrowsinessLabel::Yawning => "YAWNING",
            DrowsinessLabel::FrequentYawning => "FREQUENT YAWNING",
            DrowsinessLabel::Drowsy => "DROWSY",
        }
    }
}

/// Why the driver is considered distracted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DistractionReason {
    Phone,
    BothHands,
    OneHand,
    Aside,
    Down,
    Up,
    Roll,
}

impl DistractionReason {
    /// Reason code used in event names (`DISTRACTION_<code>`)
    pub fn code(&self) -> &'static str {
        match self {
            DistractionReason::Phone => "PHONE",
            DistractionReason::BothHands => "BOTH_HANDS",
            DistractionReason::OneHand => "ONE_HAND",
            DistractionReason::Aside => "ASIDE",
            DistractionReason::Down => "DOWN",
            DistractionReason::Up => "UP",
            DistractionReason::Roll => "ROLL",
        }
    }
}

/// Stabilized mouth expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExpressionLabel {
    #[default]
    Neutral,
    Yawn,
    Smile,
    Laugh,
    /// Hand in front of the mouth
    Obscured,
}

impl ExpressionLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpressionLabel::Neutral => "NEUTRAL",
            ExpressionLabel::Yawn => "YAWN",
            ExpressionLabel::Smile => "SMILE",
            ExpressionLabel::Laugh => "LAUGH",
            ExpressionLabel::Obscured => "OBSCURED",
        }
    }
}

/// Display color tag for renderers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusColor {
    Green,
    Yellow,
    Orange,
    Red,
    Gray,
}

impl StatusColor {
    /// OpenCV-style BGR triple
    pub fn bgr(&self) -> (u8, u8, u8) {
        match self {
            StatusColor::Green => (0, 255, 0),
            StatusColor::Yellow => (0, 255, 255),
            StatusColor::Orange => (0, 165, 255),
            StatusColor::Red => (0, 0, 255),
            StatusColor::Gray => (128, 128, 128),
        }
    }
}

/// Final per-frame label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLabel {
    Normal,
    Drowsiness(DrowsinessLabel),
    Distracted(DistractionReason),
    WaitingForUser,
    Calibrating,
}

impl StatusLabel {
    pub fn is_drowsiness(&self) -> bool {
        matches!(self, StatusLabel::Drowsiness(_))
    }
}

impl fmt::Display for StatusLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StatusLabel::Normal => "NORMAL",
            StatusLabel::Drowsiness(label) => label.as_str(),
            StatusLabel::Distracted(reason) => match reason {
                DistractionReason::Phone => "PHONE IN HAND",
                DistractionReason::BothHands => "BOTH HANDS VISIBLE!",
                DistractionReason::OneHand => "ONE HAND VISIBLE",
                DistractionReason::Aside => "LOOKING ASIDE",
                DistractionReason::Down => "LOOKING DOWN",
                DistractionReason::Up => "LOOKING UP",
                DistractionReason::Roll => "DISTRACTED",
            },
            StatusLabel::WaitingForUser => "WAITING FOR USER",
            StatusLabel::Calibrating => "CALIBRATING",
        };
        f.write_str(text)
    }
}

impl Serialize for StatusLabel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_text() {
        assert_eq!(StatusLabel::Normal.to_string(), "NORMAL");
        assert_eq!(
            StatusLabel::Distracted(DistractionReason::BothHands).to_string(),
            "BOTH HANDS VISIBLE!"
        );
        assert_eq!(
            StatusLabel::Drowsiness(DrowsinessLabel::Drowsy).to_string(),
            "DROWSY"
        );
    }

    #[test]
    fn test_reason_classes() {
        assert_eq!(DistractionReason::Phone.code(), "PHONE");
        assert_eq!(DistractionReason::BothHands.code(), "BOTH_HANDS");
    }
}
