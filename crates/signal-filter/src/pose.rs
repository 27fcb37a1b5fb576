//! Head pose value type and its smoother

use crate::smoother::{Ema, SignalSmoother};
use serde::{Deserialize, Serialize};

/// Head pose (Euler angles, degrees) from the external PnP estimator
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HeadPose {
    /// Up-down tilt; positive looks down
    pub pitch: f64,
    /// Left-right rotation
    pub yaw: f64,
    /// Side tilt
    pub roll: f64,
}

impl HeadPose {
    pub const fn new(pitch: f64, yaw: f64, roll: f64) -> Self {
        Self { pitch, yaw, roll }
    }

    /// Component-wise difference from a reference pose
    pub fn delta_from(&self, reference: &HeadPose) -> HeadPose {
        HeadPose {
            pitch: self.pitch - reference.pitch,
            yaw: self.yaw - reference.yaw,
            roll: self.roll - reference.roll,
        }
    }
}

/// EMA over all three pose angles
#[derive(Debug, Clone)]
pub struct PoseSmoother {
    pitch: Ema,
    yaw: Ema,
    roll: Ema,
}

impl PoseSmoother {
    pub fn new(alpha: f64) -> Self {
        Self {
            pitch: Ema::new(alpha),
            yaw: Ema::new(alpha),
            roll: Ema::new(alpha),
        }
    }

    pub fn update(&mut self, pose: HeadPose) -> HeadPose {
        HeadPose {
            pitch: self.pitch.update(pose.pitch),
            yaw: self.yaw.update(pose.yaw),
            roll: self.roll.update(pose.roll),
        }
    }

    pub fn reset(&mut self) {
        self.pitch.reset();
        self.yaw.reset();
        self.roll.reset();
    }
}
