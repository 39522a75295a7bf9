//! Per-window energy estimation
//!
//! Runs one window through conditioning, calibration, segmentation and
//! featurization, then asks the energy model for one value per stride. A
//! window without usable gait yields a single basal-rate estimate instead.
//! Non-finite values never abort the session; they are flagged per entry.

use log::{debug, warn};
use ndarray::{Array2, Axis};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::calibration::{Calibration, CalibrationFailure, OrientationCalibrator};
use crate::error::{DataError, MetabolicsError, Result};
use crate::features::StrideFeaturizer;
use crate::filters::ZeroPhaseLowPass;
use crate::gait::{GaitSegmenter, Stride};
use crate::models::Model;
use crate::session::SessionContext;
use crate::types::{Estimate, FeatureVec108, Outcome, Provenance, SubjectProfile, Window};

/// Why a window was answered with the basal rate.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FallbackReason {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error("No movement: peak angular speed {peak:.3} rad/s")]
    Stationary { peak: f64 },

    #[error("Not enough gait peaks ({found})")]
    NotEnoughPeaks { found: usize },

    #[error("No stride within duration bounds ({peaks} peaks)")]
    NoValidStrides { peaks: usize },

    #[error("Orientation search kept identity")]
    DegenerateCalibration,
}

impl From<CalibrationFailure> for FallbackReason {
    fn from(failure: CalibrationFailure) -> Self {
        match failure {
            CalibrationFailure::NotEnoughPeaks { found } => FallbackReason::NotEnoughPeaks { found },
            CalibrationFailure::NoValidStrides { peaks } => FallbackReason::NoValidStrides { peaks },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CalibrationSummary {
    pub theta_z_deg: f64,
    pub theta_y_deg: f64,
    pub principal_axis: usize,
    pub polarity_flipped: bool,
    pub degenerate: bool,
    pub provisional_peaks: usize,
}

impl From<&Calibration> for CalibrationSummary {
    fn from(c: &Calibration) -> Self {
        Self {
            theta_z_deg: c.theta_z.to_degrees(),
            theta_y_deg: c.theta_y.to_degrees(),
            principal_axis: c.principal_axis,
            polarity_flipped: c.polarity_flipped,
            degenerate: c.is_degenerate(),
            provisional_peaks: c.provisional_peaks,
        }
    }
}

#[derive(Clone, Debug)]
pub struct WindowReport {
    pub window_index: u64,
    pub outcomes: Vec<Outcome>,
    pub calibration: Option<CalibrationSummary>,
    pub fallback: Option<FallbackReason>,
}

impl WindowReport {
    pub fn is_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}

/// Calibrated window ready for stride-level inference.
struct Gait {
    calibration: Calibration,
    strides: Vec<Stride>,
}

pub struct EnergyEstimator {
    profile: SubjectProfile,
    basal_watts: f64,
    min_samples: usize,
    gyro_norm_threshold: f64,
    reject_degenerate: bool,
    filter: ZeroPhaseLowPass,
    calibrator: OrientationCalibrator,
    segmenter: GaitSegmenter,
    featurizer: StrideFeaturizer,
    energy: Arc<dyn Model>,
}

impl EnergyEstimator {
    pub fn new(ctx: &SessionContext) -> Result<Self> {
        let config = ctx.config();
        let filter = ZeroPhaseLowPass::from_config(config)?;
        Ok(Self {
            profile: ctx.profile().clone(),
            basal_watts: ctx.basal_watts(),
            min_samples: filter.min_len(),
            gyro_norm_threshold: config.gyro_norm_threshold,
            reject_degenerate: config.reject_degenerate_calibration,
            filter,
            calibrator: OrientationCalibrator::new(config),
            segmenter: GaitSegmenter::from_config(config),
            featurizer: StrideFeaturizer::new(ctx.models().correction.clone(), config.sampling_rate_hz),
            energy: ctx.models().energy.clone(),
        })
    }

    pub fn basal_watts(&self) -> f64 {
        self.basal_watts
    }

    /// One outcome per valid stride, or a single basal fallback.
    ///
    /// Errors are model failures only; everything data-related degrades.
    pub fn estimate_window(&self, window: &Window) -> Result<WindowReport> {
        if window.is_empty() {
            warn!("Window {} is empty, skipping", window.index);
            return Ok(WindowReport {
                window_index: window.index,
                outcomes: Vec::new(),
                calibration: None,
                fallback: Some(FallbackReason::Data(DataError::Empty)),
            });
        }

        let gait = match self.detect_gait(window) {
            Ok(gait) => gait,
            Err(reason) => {
                match &reason {
                    FallbackReason::Data(e) => warn!("Window {}: {}", window.index, e),
                    other => debug!("Window {}: basal fallback, {}", window.index, other),
                }
                return Ok(self.fallback(window, None, reason));
            }
        };

        let summary = CalibrationSummary::from(&gait.calibration);
        if gait.strides.is_empty() {
            let peaks = self.final_peaks(&gait.calibration).len();
            debug!("Window {}: no stride after calibration", window.index);
            return Ok(self.fallback(
                window,
                Some(summary),
                FallbackReason::NoValidStrides { peaks },
            ));
        }

        let mut outcomes = Vec::with_capacity(gait.strides.len());
        for (stride_index, stride) in gait.strides.iter().enumerate() {
            let resampled = self
                .segmenter
                .resample_stride(gait.calibration.gyro.view(), stride);
            let features = self
                .featurizer
                .featurize(&self.profile, resampled.view(), stride.len())?;
            let timestamp = window.samples[stride.start].timestamp;
            outcomes.push(self.predict(window.index, stride_index, timestamp, &features)?);
        }

        debug!(
            "Window {}: {} strides, {} flagged",
            window.index,
            outcomes.len(),
            outcomes.iter().filter(|o| o.is_flagged()).count()
        );

        Ok(WindowReport {
            window_index: window.index,
            outcomes,
            calibration: Some(summary),
            fallback: None,
        })
    }

    fn detect_gait(&self, window: &Window) -> std::result::Result<Gait, FallbackReason> {
        if let Some(index) = window.samples.iter().position(|s| !s.is_finite()) {
            return Err(DataError::NonFiniteSample { index }.into());
        }
        if window.len() < self.min_samples {
            return Err(DataError::Undersized {
                len: window.len(),
                min: self.min_samples - 1,
            }
            .into());
        }

        let n = window.len();
        let gyro = Array2::from_shape_fn((n, 3), |(i, j)| window.samples[i].gyro[j]);
        let accel = Array2::from_shape_fn((n, 3), |(i, j)| window.samples[i].accel[j]);
        let gyro = self.filter.apply_axes(&gyro)?;
        let accel = self.filter.apply_axes(&accel)?;

        let peak = gyro
            .map_axis(Axis(1), |row| row.dot(&row).sqrt())
            .fold(0.0f64, |m, &v| m.max(v));
        if peak <= self.gyro_norm_threshold {
            return Err(FallbackReason::Stationary { peak });
        }

        let calibration = self.calibrator.calibrate(gyro.view(), accel.view())?;
        if self.reject_degenerate && calibration.is_degenerate() {
            return Err(FallbackReason::DegenerateCalibration);
        }

        let strides = self.segmenter.strides(&self.final_peaks(&calibration));
        Ok(Gait {
            calibration,
            strides,
        })
    }

    fn final_peaks(&self, calibration: &Calibration) -> Vec<usize> {
        self.segmenter.detect_peaks(calibration.gyro.column(2))
    }

    fn predict(
        &self,
        window_index: u64,
        stride_index: usize,
        timestamp: f64,
        features: &FeatureVec108,
    ) -> Result<Outcome> {
        if let Some(i) = features.iter().position(|v| !v.is_finite()) {
            let detail = format!("Non-finite stride feature {} ({})", i, features[i]);
            warn!("Window {} stride {}: {}", window_index, stride_index, detail);
            return Ok(Outcome::Flagged(Estimate {
                timestamp,
                energy_watts: None,
                provenance: Provenance::Model,
                window_index,
                stride_index,
                error: Some(detail),
            }));
        }

        let output = self.energy.predict(features.as_slice())?;
        let &[value] = output.as_slice() else {
            return Err(MetabolicsError::model(
                "energy",
                format!("expected 1 output, got {}", output.len()),
                features.len(),
            ));
        };

        let estimate = Estimate {
            timestamp,
            energy_watts: Some(value),
            provenance: Provenance::Model,
            window_index,
            stride_index,
            error: None,
        };
        if value.is_finite() && self.basal_watts.is_finite() {
            Ok(Outcome::Ok(estimate))
        } else {
            Ok(self.flag(estimate, value))
        }
    }

    fn fallback(
        &self,
        window: &Window,
        calibration: Option<CalibrationSummary>,
        reason: FallbackReason,
    ) -> WindowReport {
        let estimate = Estimate {
            timestamp: window.start_time().unwrap_or_default(),
            energy_watts: Some(self.basal_watts),
            provenance: Provenance::BasalFallback,
            window_index: window.index,
            stride_index: 0,
            error: None,
        };
        let outcome = if self.basal_watts.is_finite() {
            Outcome::Fallback(estimate)
        } else {
            self.flag(estimate, self.basal_watts)
        };
        WindowReport {
            window_index: window.index,
            outcomes: vec![outcome],
            calibration,
            fallback: Some(reason),
        }
    }

    fn flag(&self, mut estimate: Estimate, value: f64) -> Outcome {
        let detail = format!(
            "Non-finite EE ({}) or BMR ({}) detected",
            value, self.basal_watts
        );
        warn!(
            "Window {} stride {}: {}",
            estimate.window_index, estimate.stride_index, detail
        );
        estimate.energy_watts = None;
        estimate.error = Some(detail);
        Outcome::Flagged(estimate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::test_support::{
        context, context_with, constant_model, stationary_samples, walking_samples, window_of,
    };

    #[test]
    fn test_stationary_window_falls_back_to_basal() {
        let ctx = context(PipelineConfig::discrete_bout());
        let estimator = EnergyEstimator::new(&ctx).unwrap();
        let window = window_of(3, stationary_samples(200, 100.0));
        let report = estimator.estimate_window(&window).unwrap();

        assert_eq!(report.outcomes.len(), 1);
        assert!(matches!(report.fallback, Some(FallbackReason::Stationary { .. })));
        let Outcome::Fallback(estimate) = &report.outcomes[0] else {
            panic!("expected fallback, got {:?}", report.outcomes[0]);
        };
        assert_eq!(estimate.energy_watts, Some(ctx.basal_watts()));
        assert_eq!(estimate.provenance, Provenance::BasalFallback);
        assert_eq!(estimate.window_index, 3);
        assert_eq!(estimate.timestamp, 100.0);
    }

    #[test]
    fn test_walking_window_yields_model_estimates() {
        let ctx = context(PipelineConfig::default());
        let estimator = EnergyEstimator::new(&ctx).unwrap();
        let window = window_of(0, walking_samples(400, 10.0));
        let report = estimator.estimate_window(&window).unwrap();

        assert!(!report.is_fallback(), "fallback: {:?}", report.fallback);
        assert!(report.outcomes.len() >= 2);
        let start = window.start_time().unwrap();
        let end = window.end_time().unwrap();
        for (i, outcome) in report.outcomes.iter().enumerate() {
            let Outcome::Ok(estimate) = outcome else {
                panic!("expected model estimate, got {:?}", outcome);
            };
            assert_eq!(estimate.provenance, Provenance::Model);
            assert_eq!(estimate.stride_index, i);
            assert_eq!(estimate.energy_watts, Some(250.0));
            assert!(estimate.timestamp > start && estimate.timestamp < end);
        }
    }

    #[test]
    fn test_non_finite_sample_is_a_data_error() {
        let ctx = context(PipelineConfig::default());
        let estimator = EnergyEstimator::new(&ctx).unwrap();
        let mut samples = walking_samples(200, 0.0);
        samples[17].accel[1] = f64::NAN;
        let report = estimator.estimate_window(&window_of(0, samples)).unwrap();
        assert_eq!(
            report.fallback,
            Some(FallbackReason::Data(DataError::NonFiniteSample { index: 17 }))
        );
        assert!(matches!(report.outcomes[..], [Outcome::Fallback(_)]));
    }

    #[test]
    fn test_undersized_window_falls_back() {
        let ctx = context(PipelineConfig::default());
        let estimator = EnergyEstimator::new(&ctx).unwrap();
        let report = estimator
            .estimate_window(&window_of(0, walking_samples(15, 0.0)))
            .unwrap();
        assert_eq!(
            report.fallback,
            Some(FallbackReason::Data(DataError::Undersized { len: 15, min: 15 }))
        );
        assert_eq!(report.outcomes.len(), 1);
    }

    #[test]
    fn test_non_finite_prediction_is_flagged() {
        let ctx = context_with(PipelineConfig::default(), constant_model(f64::INFINITY));
        let estimator = EnergyEstimator::new(&ctx).unwrap();
        let report = estimator
            .estimate_window(&window_of(0, walking_samples(400, 0.0)))
            .unwrap();
        assert!(!report.outcomes.is_empty());
        for outcome in &report.outcomes {
            assert!(outcome.is_flagged());
            assert_eq!(outcome.energy_watts(), None);
            let message = outcome.estimate().error.as_deref().unwrap_or_default();
            assert!(message.starts_with("Non-finite EE (inf)"));
        }
    }

    #[test]
    fn test_degenerate_calibration_can_be_rejected() {
        let config = PipelineConfig {
            reject_degenerate_calibration: true,
            ..PipelineConfig::default()
        };
        let estimator = EnergyEstimator::new(&context(config)).unwrap();
        // Gravity already on +y, so the z search keeps identity
        let report = estimator
            .estimate_window(&window_of(0, walking_samples(400, 0.0)))
            .unwrap();
        assert_eq!(report.fallback, Some(FallbackReason::DegenerateCalibration));
    }
}
