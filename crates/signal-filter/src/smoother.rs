//! Scalar signal smoothing
//!
//! Two flavours share the `SignalSmoother` contract:
//! - `RollingAverage`: fixed-capacity window with an O(1) running sum (1 s EAR averaging)
//! - `Ema`: exponentially weighted moving average (head pose, expression features)
//!
//! Missing input is never fed as a sentinel; callers skip `update` for frames
//! without a measurement.

use ring_buffer::RingBuffer;
use serde::{Deserialize, Serialize};

/// Common contract for scalar smoothers
pub trait SignalSmoother {
    /// Feed a new sample and get the smoothed output
    fn update(&mut self, value: f64) -> f64;

    /// Current smoothed value, `None` before the first sample
    fn value(&self) -> Option<f64>;

    /// Forget all history
    fn reset(&mut self);
}

/// `max(1, round(sec * fps))`: frame count for a duration at a frame rate
pub fn sec_to_frames(sec: f64, fps: f64) -> u32 {
    ((sec * fps).round() as u32).max(1)
}

/// Rolling mean over the last `capacity` samples
#[derive(Debug, Clone)]
pub struct RollingAverage {
    window: RingBuffer<f64>,
    sum: f64,
}

impl RollingAverage {
    /// Create a rolling average holding `capacity` samples (at least one)
    pub fn new(capacity: usize) -> Self {
        Self {
            window: RingBuffer::new(capacity),
            sum: 0.0,
        }
    }

    /// Size the window from a duration and the configured frame rate
    pub fn with_duration(duration_sec: f64, target_fps: f64) -> Self {
        Self::new(sec_to_frames(duration_sec, target_fps) as usize)
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.window.capacity()
    }
}

impl SignalSmoother for RollingAverage {
    fn update(&mut self, value: f64) -> f64 {
        if !value.is_finite() {
            return self.value().unwrap_or(0.0);
        }
        if let Some(oldest) = self.window.push(value) {
            self.sum -= oldest;
        }
        self.sum += value;
        self.sum / self.window.len() as f64
    }

    fn value(&self) -> Option<f64> {
        if self.window.is_empty() {
            None
        } else {
            Some(self.sum / self.window.len() as f64)
        }
    }

    fn reset(&mut self) {
        self.window.clear();
        self.sum = 0.0;
    }
}

/// Exponential moving average
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ema {
    /// Smoothing factor (0-1, higher = more weight on recent)
    alpha: f64,
    /// Current estimate
    current: Option<f64>,
}

impl Ema {
    /// Create a new EMA; `alpha` is clamped into (0, 1]
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(f64::EPSILON, 1.0),
            current: None,
        }
    }

    /// Create an EMA that starts from a known value instead of the first sample
    pub fn with_initial(alpha: f64, initial: f64) -> Self {
        Self {
            current: Some(initial),
            ..Self::new(alpha)
        }
    }
}

impl SignalSmoother for Ema {
    fn update(&mut self, value: f64) -> f64 {
        if !value.is_finite() {
            return self.current.unwrap_or(0.0);
        }
        let next = match self.current {
            None => value,
            Some(prev) => self.alpha * value + (1.0 - self.alpha) * prev,
        };
        self.current = Some(next);
        next
    }

    fn value(&self) -> Option<f64> {
        self.current
    }

    fn reset(&mut self) {
        self.current = None;
    }
}
