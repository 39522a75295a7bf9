//! Fixed-size vector types for the stride feature pipeline
//!
//! Every model boundary has a compile-time length so a shape mismatch is
//! caught where the vector is built, not when the model is called.

use nalgebra::{Matrix3, SVector};

// ===== Stride Dimensions =====
pub const RESAMPLE_BINS: usize = 30;
pub const GYRO_AXES: usize = 3;
pub const STATS_PER_AXIS: usize = 5;
pub const ANTHRO_FEATURES: usize = 3; // weight, height, stride duration

pub const STRIDE_DIM_90: usize = RESAMPLE_BINS * GYRO_AXES;
pub const CORRECTION_DIM_31: usize = STRIDE_DIM_90 + 1; // duration + stride
pub const STATS_DIM_15: usize = STATS_PER_AXIS * GYRO_AXES;
pub const FEATURE_DIM_108: usize = ANTHRO_FEATURES + STRIDE_DIM_90 + STATS_DIM_15;

// ===== Model I/O Types =====
/// Axis-major flattened stride: `[x0..x29, y0..y29, z0..z29]`.
pub type StrideVec90 = SVector<f64, STRIDE_DIM_90>;
/// Correction-model input: `[duration_s, stride(90)]`.
pub type CorrectionVec31 = SVector<f64, CORRECTION_DIM_31>;
/// Per-axis mean, std, median, skew, L2 norm for x, y, z.
pub type AxisStatsVec15 = SVector<f64, STATS_DIM_15>;
/// Energy-model input: `[weight, height, duration, corrected(90), stats(15)]`.
pub type FeatureVec108 = SVector<f64, FEATURE_DIM_108>;

// ===== Orientation =====
pub type RotationMat = Matrix3<f64>;
