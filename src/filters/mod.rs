/// Signal conditioning for the gait pipeline
///
/// Zero-phase low-pass filtering of raw IMU blocks and band-limited
/// resampling of stride segments.

pub mod butterworth;
pub mod resample;

pub use butterworth::ZeroPhaseLowPass;
pub use resample::{resample, resample_axes};
