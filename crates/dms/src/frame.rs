//! Per-frame input contract and derived sample

use crate::config::HandZoneConfig;
use crate::state::ExpressionLabel;
use serde::{Deserialize, Serialize};
use signal_filter::{AspectRatio, EyeAspectRatio, HeadPose, MouthAspectRatio, Point2};

/// Hand landmark indices (21-point hand model)
pub const WRIST: usize = 0;
pub const INDEX_TIP: usize = 8;
pub const MIDDLE_TIP: usize = 12;

/// Semantic 6-point landmark sets `[corner, upper, upper, corner, lower, lower]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceLandmarks {
    pub left_eye: [Point2; 6],
    pub right_eye: [Point2; 6],
    /// Normalized image coordinates (0-1)
    pub mouth: [Point2; 6],
}

/// One tracked hand, normalized image coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandLandmarks {
    pub points: Vec<Point2>,
}

impl HandLandmarks {
    pub fn point(&self, index: usize) -> Option<Point2> {
        self.points.get(index).copied()
    }
}

/// Everything the external collaborators deliver for one camera frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameInput {
    pub frame_id: u64,
    pub timestamp_ms: u64,
    #[serde(default)]
    pub face: Option<FaceLandmarks>,
    #[serde(default)]
    pub pose: Option<HeadPose>,
    /// `None` when hand tracking did not run this frame
    #[serde(default)]
    pub hands: Option<Vec<HandLandmarks>>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

/// Discretized hand positions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HandZones {
    /// Hand tracking ran this frame
    pub tracked: bool,
    pub visible: usize,
    pub on_wheel: usize,
    pub phone: bool,
}

impl HandZones {
    pub fn classify(hands: Option<&[HandLandmarks]>, zones: &HandZoneConfig) -> Self {
        let Some(hands) = hands else {
            return Self::default();
        };
        let mut result = Self {
            tracked: true,
            ..Self::default()
        };
        for hand in hands {
            let (Some(wrist), Some(finger)) = (hand.point(WRIST), hand.point(MIDDLE_TIP)) else {
                continue;
            };
            result.visible += 1;
            if finger.y < zones.phone_zone_y_max
                && (finger.x < zones.phone_zone_x_left || finger.x > zones.phone_zone_x_right)
            {
                result.phone = true;
            }
            if wrist.y > zones.wheel_zone_y_min {
                result.on_wheel += 1;
            }
        }
        result
    }

    pub fn off_wheel(&self) -> usize {
        self.visible.saturating_sub(self.on_wheel)
    }
}

/// Mouth center as the midpoint of the two corners
pub fn mouth_center(mouth: &[Point2; 6]) -> Point2 {
    mouth[0].midpoint(&mouth[3])
}

/// True when an index or middle fingertip is within `radius` of the mouth center
pub fn hand_near_mouth(mouth: &[Point2; 6], hands: &[HandLandmarks], radius: f64) -> bool {
    let center = mouth_center(mouth);
    let radius_sq = radius * radius;
    hands.iter().any(|hand| {
        [MIDDLE_TIP, INDEX_TIP]
            .iter()
            .filter_map(|&i| hand.point(i))
            .any(|p| p.distance_sq(&center) < radius_sq)
    })
}

/// Raw per-frame measurements derived from a [`FrameInput`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameSample {
    pub frame_id: u64,
    pub timestamp_sec: f64,
    pub left_ear: Option<f64>,
    pub right_ear: Option<f64>,
    /// Mean of both eyes
    pub ear: Option<f64>,
    pub mar: Option<f64>,
    pub pose: Option<HeadPose>,
    pub hands: HandZones,
    pub mouth_covered: bool,
    pub expression: ExpressionLabel,
}

impl FrameSample {
    pub fn assemble(input: &FrameInput, zones: &HandZoneConfig, cover_radius: f64) -> Self {
        let face = input.face.as_ref();
        let left_ear = face.map(|f| EyeAspectRatio.calculate(&f.left_eye));
        let right_ear = face.map(|f| EyeAspectRatio.calculate(&f.right_eye));
        let ear = match (left_ear, right_ear) {
            (Some(l), Some(r)) => Some((l + r) / 2.0),
            _ => None,
        };
        let mar = face.map(|f| MouthAspectRatio.calculate(&f.mouth));
        let hands = input.hands.as_deref();
        let mouth_covered = match (face, hands) {
            (Some(f), Some(h)) => hand_near_mouth(&f.mouth, h, cover_radius),
            _ => false,
        };

        Self {
            frame_id: input.frame_id,
            timestamp_sec: input.timestamp_ms as f64 / 1000.0,
            left_ear,
            right_ear,
            ear,
            mar,
            pose: input.pose,
            hands: HandZones::classify(hands, zones),
            mouth_covered,
            expression: ExpressionLabel::Neutral,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn hand(wrist: (f64, f64), tip: (f64, f64)) -> HandLandmarks {
        let mut points = vec![Point2::new(wrist.0, wrist.1); 21];
        points[MIDDLE_TIP] = Point2::new(tip.0, tip.1);
        points[INDEX_TIP] = Point2::new(tip.0, tip.1);
        HandLandmarks { points }
    }

    #[test]
    fn test_hand_zones() {
        let zones = HandZoneConfig::default();

        let on_wheel = hand((0.4, 0.8), (0.45, 0.7));
        let phone = hand((0.85, 0.5), (0.8, 0.3));
        let result = HandZones::classify(Some(&[on_wheel, phone]), &zones);

        assert!(result.tracked);
        assert_eq!(result.visible, 2);
        assert_eq!(result.on_wheel, 1);
        assert_eq!(result.off_wheel(), 1);
        assert!(result.phone);

        assert_eq!(HandZones::classify(None, &zones), HandZones::default());
    }

    #[test]
    fn test_short_hand_list_is_ignored() {
        let partial = HandLandmarks {
            points: vec![Point2::new(0.5, 0.5); 5],
        };
        let result = HandZones::classify(Some(&[partial]), &HandZoneConfig::default());
        assert!(result.tracked);
        assert_eq!(result.visible, 0);
    }

    #[test]
    fn test_hand_near_mouth() {
        let mouth = [
            Point2::new(0.45, 0.6),
            Point2::new(0.48, 0.58),
            Point2::new(0.52, 0.58),
            Point2::new(0.55, 0.6),
            Point2::new(0.52, 0.62),
            Point2::new(0.48, 0.62),
        ];
        let close = hand((0.5, 0.9), (0.52, 0.65));
        let far = hand((0.5, 0.9), (0.9, 0.1));
        assert!(hand_near_mouth(&mouth, &[close], 0.15));
        assert!(!hand_near_mouth(&mouth, &[far], 0.15));
    }

    #[test]
    fn test_assemble_without_face() {
        let input = FrameInput {
            frame_id: 7,
            timestamp_ms: 1500,
            ..FrameInput::default()
        };
        let sample = FrameSample::assemble(&input, &HandZoneConfig::default(), 0.15);
        assert_eq!(sample.timestamp_sec, 1.5);
        assert!(sample.ear.is_none());
        assert!(sample.mar.is_none());
        assert!(!sample.mouth_covered);
    }
}
