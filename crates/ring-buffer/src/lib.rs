//! Rolling Windows
//!
//! Bounded, overwrite-oldest windows used by the frame pipeline:
//! - `RingBuffer<T>` for arbitrary samples (calibration EARs, labels, identity votes)
//! - `FlagWindow` for boolean votes with an O(1) true-count (PERCLOS, distraction votes)

mod buffer;
mod flags;

pub use buffer::RingBuffer;
pub use flags::FlagWindow;
