//! Pocket orientation calibration
//!
//! The phone sits in the pocket at an unknown angle. Two one-dimensional
//! rotation searches align it with the thigh:
//!
//! 1. About z, so that gravity (mean acceleration) lies along +y, the
//!    superior-inferior axis.
//! 2. About y, using the average stride, so that the leg-swing rotation lands
//!    on the z axis while the principal swing is positive.
//!
//! A final half-turn about y resolves the forward/backward ambiguity that the
//! searches cannot see. All rotations act on row vectors: `rotated = data · R`.

use log::{debug, warn};
use nalgebra::{Rotation3, Vector3};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use std::f64::consts::PI;

use crate::config::PipelineConfig;
use crate::gait::GaitSegmenter;
use crate::types::RotationMat;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RotationAxis {
    Y,
    Z,
}

/// Best rotation found on the angle grid.
#[derive(Clone, Debug)]
pub struct RotationSearch {
    pub rotation: RotationMat,
    /// Chosen angle, radians; 0 when identity was kept
    pub angle: f64,
    pub objective: f64,
    pub identity_objective: f64,
    /// False when no candidate beat identity
    pub improved: bool,
}

/// Why a window could not be calibrated.
#[derive(Clone, Debug, PartialEq)]
pub enum CalibrationFailure {
    NotEnoughPeaks { found: usize },
    NoValidStrides { peaks: usize },
}

#[derive(Clone, Debug)]
pub struct Calibration {
    /// Composed `Rz · Ry` (and half-turn, if applied)
    pub rotation: RotationMat,
    pub theta_z: f64,
    pub theta_y: f64,
    /// 0 (x) or 2 (z) of the z-aligned gyro
    pub principal_axis: usize,
    pub polarity_flipped: bool,
    pub provisional_peaks: usize,
    pub degenerate_axes: Vec<RotationAxis>,
    /// Gyro rotated into the thigh frame, `N × 3`
    pub gyro: Array2<f64>,
}

impl Calibration {
    pub fn is_degenerate(&self) -> bool {
        !self.degenerate_axes.is_empty()
    }
}

pub fn axis_rotation(axis: RotationAxis, theta: f64) -> RotationMat {
    let unit = match axis {
        RotationAxis::Y => Vector3::y_axis(),
        RotationAxis::Z => Vector3::z_axis(),
    };
    Rotation3::from_axis_angle(&unit, theta).into_inner()
}

/// `data · R` for an `N × 3` block of row vectors.
pub fn rotate_rows(data: ArrayView2<f64>, rotation: &RotationMat) -> Array2<f64> {
    let mut out = Array2::<f64>::zeros(data.raw_dim());
    for (row_in, mut row_out) in data.rows().into_iter().zip(out.rows_mut()) {
        for j in 0..3 {
            row_out[j] = (0..3).map(|k| row_in[k] * rotation[(k, j)]).sum();
        }
    }
    out
}

/// Scan `steps` angles over [-π, π] and keep the best strict improvement on identity.
pub fn search_rotation<F>(axis: RotationAxis, steps: usize, objective: F) -> RotationSearch
where
    F: Fn(&RotationMat) -> f64,
{
    let identity = RotationMat::identity();
    let identity_objective = objective(&identity);
    let mut best = RotationSearch {
        rotation: identity,
        angle: 0.0,
        objective: identity_objective,
        identity_objective,
        improved: false,
    };

    let step = 2.0 * PI / (steps.max(2) - 1) as f64;
    for i in 0..steps {
        let theta = -PI + i as f64 * step;
        let candidate = axis_rotation(axis, theta);
        let value = objective(&candidate);
        if value > best.objective {
            best.rotation = candidate;
            best.angle = theta;
            best.objective = value;
            best.improved = true;
        }
    }
    best
}

/// Align gravity with +y: maximize the mean y component of rotated acceleration.
pub fn align_superior_inferior(accel: ArrayView2<f64>, steps: usize) -> RotationSearch {
    let mean = column_means(accel);
    search_rotation(RotationAxis::Z, steps, |r| {
        (0..3).map(|k| mean[k] * r[(k, 1)]).sum()
    })
}

/// Align the swing with z: maximize the summed z component over rows where
/// the principal axis of the average stride is positive.
pub fn align_mediolateral(
    average_stride: ArrayView2<f64>,
    principal_axis: usize,
    steps: usize,
) -> RotationSearch {
    let mut sums = [0.0; 3];
    for row in average_stride.rows() {
        if row[principal_axis] > 0.0 {
            for k in 0..3 {
                sums[k] += row[k];
            }
        }
    }
    search_rotation(RotationAxis::Y, steps, |r| {
        (0..3).map(|k| sums[k] * r[(k, 2)]).sum()
    })
}

/// Axis 0 or 2, whichever carries more angular-velocity energy.
pub fn principal_axis(gyro: ArrayView2<f64>) -> usize {
    let x = l2_norm(gyro.column(0));
    let z = l2_norm(gyro.column(2));
    if x > z {
        0
    } else {
        2
    }
}

#[derive(Clone, Debug)]
pub struct OrientationCalibrator {
    segmenter: GaitSegmenter,
    steps: usize,
}

impl OrientationCalibrator {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            segmenter: GaitSegmenter::from_config(config),
            steps: config.rotation_steps,
        }
    }

    /// Calibrate one filtered window of gyro and acceleration, both `N × 3`.
    pub fn calibrate(
        &self,
        gyro: ArrayView2<f64>,
        accel: ArrayView2<f64>,
    ) -> Result<Calibration, CalibrationFailure> {
        let z_search = align_superior_inferior(accel, self.steps);
        let gyro_z = rotate_rows(gyro, &z_search.rotation);

        let principal = principal_axis(gyro_z.view());
        let mut swing = gyro_z.column(principal).to_owned();
        let max = swing.fold(f64::MIN, |m, &v| m.max(v));
        let min = swing.fold(f64::MAX, |m, &v| m.min(v));
        if max.abs() < min.abs() {
            swing.mapv_inplace(|v| -v);
        }

        let peaks = self.segmenter.detect_peaks(swing.view());
        if !self.segmenter.has_usable_gait(&peaks) {
            return Err(CalibrationFailure::NotEnoughPeaks { found: peaks.len() });
        }

        let strides = self.segmenter.segment(&peaks, gyro_z.view());
        if strides.is_empty() {
            return Err(CalibrationFailure::NoValidStrides { peaks: peaks.len() });
        }
        let mut average = Array2::<f64>::zeros(strides[0].raw_dim());
        for stride in &strides {
            average += stride;
        }
        average /= strides.len() as f64;

        let y_search = align_mediolateral(average.view(), principal, self.steps);
        let mut rotation = z_search.rotation * y_search.rotation;
        let mut calibrated = rotate_rows(gyro, &rotation);

        let polarity_flipped = !swing_is_forward(calibrated.column(2));
        let mut theta_y = y_search.angle;
        if polarity_flipped {
            rotation *= axis_rotation(RotationAxis::Y, PI);
            calibrated = rotate_rows(gyro, &rotation);
            theta_y = wrap_angle(theta_y + PI);
        }

        let mut degenerate_axes = Vec::new();
        if !z_search.improved {
            degenerate_axes.push(RotationAxis::Z);
        }
        if !y_search.improved {
            degenerate_axes.push(RotationAxis::Y);
        }
        if !degenerate_axes.is_empty() {
            warn!(
                "Rotation search kept identity for {:?} (objective {:.4})",
                degenerate_axes, z_search.identity_objective
            );
        }

        debug!(
            "Calibrated: theta_z={:.1} deg, theta_y={:.1} deg, principal axis {}, {} strides, flipped={}",
            z_search.angle.to_degrees(),
            theta_y.to_degrees(),
            principal,
            strides.len(),
            polarity_flipped
        );

        Ok(Calibration {
            rotation,
            theta_z: z_search.angle,
            theta_y,
            principal_axis: principal,
            polarity_flipped,
            provisional_peaks: peaks.len(),
            degenerate_axes,
            gyro: calibrated,
        })
    }
}

/// Map an angle into (-π, π].
fn wrap_angle(theta: f64) -> f64 {
    if theta > PI {
        theta - 2.0 * PI
    } else if theta <= -PI {
        theta + 2.0 * PI
    } else {
        theta
    }
}

/// Positive excursions must outweigh negative ones on the swing axis.
fn swing_is_forward(swing: ArrayView1<f64>) -> bool {
    let (pos, neg) = swing.iter().fold((0.0, 0.0), |(p, n), &v| {
        if v > 0.0 {
            (p + v * v, n)
        } else if v < 0.0 {
            (p, n + v * v)
        } else {
            (p, n)
        }
    });
    pos.sqrt() > neg.sqrt()
}

fn column_means(data: ArrayView2<f64>) -> [f64; 3] {
    let mut means = [0.0; 3];
    if let Some(m) = data.mean_axis(Axis(0)) {
        for k in 0..3 {
            means[k] = m[k];
        }
    }
    means
}

fn l2_norm(values: ArrayView1<f64>) -> f64 {
    values.iter().map(|v| v * v).sum::<f64>().sqrt()
}
