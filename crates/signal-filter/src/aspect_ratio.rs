//! Eye and mouth aspect ratios
//!
//! Both use the 6-point convention `[corner, upper1, upper2, corner, lower2, lower1]`:
//! `(|p1-p5| + |p2-p4|) / (2 * |p0-p3|)`.

use serde::{Deserialize, Serialize};

/// 2D landmark (pixels or normalized image coordinates)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point2) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn distance_sq(&self, other: &Point2) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    pub fn midpoint(&self, other: &Point2) -> Point2 {
        Point2::new(0.5 * (self.x + other.x), 0.5 * (self.y + other.y))
    }
}

/// Horizontal distances below this are treated as degenerate
const MIN_HORIZONTAL: f64 = 1e-6;

/// Ratio of vertical to horizontal landmark distances
pub trait AspectRatio {
    fn calculate(&self, landmarks: &[Point2; 6]) -> f64;
}

fn six_point_ratio(p: &[Point2; 6]) -> f64 {
    let a = p[1].distance(&p[5]);
    let b = p[2].distance(&p[4]);
    let c = p[0].distance(&p[3]);
    if c < MIN_HORIZONTAL {
        return 0.0;
    }
    (a + b) / (2.0 * c)
}

/// Eye aspect ratio; low values mean a closed eye
#[derive(Debug, Clone, Copy, Default)]
pub struct EyeAspectRatio;

impl AspectRatio for EyeAspectRatio {
    fn calculate(&self, landmarks: &[Point2; 6]) -> f64 {
        six_point_ratio(landmarks)
    }
}

/// Mouth aspect ratio; high values mean an open mouth
#[derive(Debug, Clone, Copy, Default)]
pub struct MouthAspectRatio;

impl AspectRatio for MouthAspectRatio {
    fn calculate(&self, landmarks: &[Point2; 6]) -> f64 {
        six_point_ratio(landmarks)
    }
}
