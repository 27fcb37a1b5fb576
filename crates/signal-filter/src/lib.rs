//! Signal Conditioning
//!
//! Turns raw per-frame face geometry into usable scalar signals:
//! - Eye/mouth aspect ratios from 6-point landmark sets
//! - Rolling-window and exponential smoothing
//! - Plausibility checks for EAR, MAR and head pose

mod aspect_ratio;
mod error;
mod pose;
mod smoother;
mod validator;

pub use aspect_ratio::{AspectRatio, EyeAspectRatio, MouthAspectRatio, Point2};
pub use error::ValidationError;
pub use pose::{HeadPose, PoseSmoother};
pub use smoother::{sec_to_frames, Ema, RollingAverage, SignalSmoother};
pub use validator::{ValidationConfig, Validator};
