//! Per-stride feature extraction
//!
//! A resampled stride is flattened axis-major, the correction model's
//! estimate of pocket-motion artifact is subtracted, and five summary
//! statistics per axis are appended. Subject weight, height and the stride
//! duration lead the vector.

use ndarray::ArrayView2;
use std::sync::Arc;

use crate::error::{MetabolicsError, Result};
use crate::models::Model;
use crate::types::{
    AxisStatsVec15, CorrectionVec31, FeatureVec108, StrideVec90, SubjectProfile, RESAMPLE_BINS,
    STATS_PER_AXIS, STRIDE_DIM_90,
};

/// `[x0..x29, y0..y29, z0..z29]` from a `30 × 3` block.
pub fn flatten_axis_major(block: ArrayView2<f64>) -> StrideVec90 {
    StrideVec90::from_fn(|i, _| block[[i % RESAMPLE_BINS, i / RESAMPLE_BINS]])
}

pub fn correction_input(duration_s: f64, stride: &StrideVec90) -> CorrectionVec31 {
    CorrectionVec31::from_fn(|i, _| if i == 0 { duration_s } else { stride[i - 1] })
}

/// Mean, std, median, skew and L2 norm of each 30-bin axis.
pub fn axis_stats(stride: &StrideVec90) -> AxisStatsVec15 {
    let mut stats = AxisStatsVec15::zeros();
    for (axis, values) in stride.as_slice().chunks(RESAMPLE_BINS).enumerate() {
        let base = axis * STATS_PER_AXIS;
        stats[base] = mean(values);
        stats[base + 1] = population_std(values);
        stats[base + 2] = median(values);
        stats[base + 3] = skewness(values);
        stats[base + 4] = l2_norm(values);
    }
    stats
}

pub fn assemble(
    profile: &SubjectProfile,
    duration_s: f64,
    corrected: &StrideVec90,
    stats: &AxisStatsVec15,
) -> FeatureVec108 {
    let head = [profile.weight_kg, profile.height_m, duration_s];
    FeatureVec108::from_iterator(
        head.iter()
            .chain(corrected.iter())
            .chain(stats.iter())
            .copied(),
    )
}

#[derive(Clone)]
pub struct StrideFeaturizer {
    correction: Arc<dyn Model>,
    sampling_rate_hz: f64,
}

impl StrideFeaturizer {
    pub fn new(correction: Arc<dyn Model>, sampling_rate_hz: f64) -> Self {
        Self {
            correction,
            sampling_rate_hz,
        }
    }

    /// Features of one stride of `len` raw samples, already resampled to `30 × 3`.
    pub fn featurize(
        &self,
        profile: &SubjectProfile,
        resampled: ArrayView2<f64>,
        len: usize,
    ) -> Result<FeatureVec108> {
        let duration_s = len as f64 / self.sampling_rate_hz;
        let flat = flatten_axis_major(resampled);
        let input = correction_input(duration_s, &flat);

        let artifact = self.correction.predict(input.as_slice())?;
        if artifact.len() != STRIDE_DIM_90 {
            return Err(MetabolicsError::model(
                "correction",
                format!("expected {} outputs, got {}", STRIDE_DIM_90, artifact.len()),
                input.len(),
            ));
        }
        let corrected = flat - StrideVec90::from_column_slice(&artifact);
        let stats = axis_stats(&corrected);

        Ok(assemble(profile, duration_s, &corrected, &stats))
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn population_std(values: &[f64]) -> f64 {
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

const SKEW_RESOLUTION: f64 = 1e-15;

/// Biased sample skewness `m3 / m2^1.5`; NaN when the variance is
/// indistinguishable from rounding noise of the mean.
fn skewness(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let m = mean(values);
    let m2 = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n;
    if m2 <= (SKEW_RESOLUTION * m).powi(2) {
        return f64::NAN;
    }
    let m3 = values.iter().map(|v| (v - m).powi(3)).sum::<f64>() / n;
    m3 / m2.powf(1.5)
}

fn l2_norm(values: &[f64]) -> f64 {
    values.iter().map(|v| v * v).sum::<f64>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LinearModel;
    use crate::types::{Gender, CORRECTION_DIM_31, FEATURE_DIM_108};
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn profile() -> SubjectProfile {
        SubjectProfile::new(1.8, 75.0, 30.0, Gender::Male).unwrap()
    }

    fn zero_correction() -> Arc<dyn Model> {
        Arc::new(
            LinearModel::new(
                vec![vec![0.0; CORRECTION_DIM_31]; STRIDE_DIM_90],
                vec![0.0; STRIDE_DIM_90],
            )
            .unwrap(),
        )
    }

    /// Predicts an artifact equal to the stride duration in every bin.
    fn duration_correction() -> Arc<dyn Model> {
        let mut rows = vec![vec![0.0; CORRECTION_DIM_31]; STRIDE_DIM_90];
        for row in rows.iter_mut() {
            row[0] = 1.0;
        }
        Arc::new(LinearModel::new(rows, vec![0.0; STRIDE_DIM_90]).unwrap())
    }

    fn ramp_block() -> Array2<f64> {
        Array2::from_shape_fn((30, 3), |(i, j)| (j * 100 + i) as f64)
    }

    #[test]
    fn test_flatten_is_axis_major() {
        let flat = flatten_axis_major(ramp_block().view());
        assert_eq!(flat[0], 0.0);
        assert_eq!(flat[29], 29.0);
        assert_eq!(flat[30], 100.0);
        assert_eq!(flat[89], 229.0);
    }

    #[test]
    fn test_correction_input_leads_with_duration() {
        let flat = flatten_axis_major(ramp_block().view());
        let input = correction_input(0.9, &flat);
        assert_eq!(input[0], 0.9);
        assert_eq!(input[1], 0.0);
        assert_eq!(input[30], 29.0);
    }

    #[test]
    fn test_statistics() {
        let values = [1.0, 2.0, 3.0, 4.0, 10.0];
        assert_relative_eq!(mean(&values), 4.0);
        assert_relative_eq!(median(&values), 3.0);
        assert_relative_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_relative_eq!(population_std(&values), 10.0f64.sqrt());
        assert_relative_eq!(l2_norm(&[3.0, 4.0]), 5.0);
        // m2 = 10, m3 = (-27 - 8 - 1 + 0 + 216) / 5 = 36
        assert_relative_eq!(skewness(&values), 36.0 / 10.0f64.powf(1.5), epsilon = 1e-12);
        assert!(skewness(&[2.0; 30]).is_nan());
    }

    #[test]
    fn test_feature_layout() {
        let featurizer = StrideFeaturizer::new(zero_correction(), 50.0);
        let features = featurizer
            .featurize(&profile(), ramp_block().view(), 45)
            .unwrap();
        assert_eq!(features.len(), FEATURE_DIM_108);
        assert_eq!(features[0], 75.0);
        assert_eq!(features[1], 1.8);
        assert_relative_eq!(features[2], 0.9);
        assert_eq!(features[3], 0.0);
        assert_eq!(features[33], 100.0);
        // x-axis stats follow the 90 corrected bins
        assert_relative_eq!(features[93], 14.5);
        assert_relative_eq!(features[95], 14.5);
        assert_relative_eq!(features[96], 0.0, epsilon = 1e-12);
        assert_relative_eq!(features[98], 114.5);
    }

    #[test]
    fn test_artifact_is_subtracted() {
        let featurizer = StrideFeaturizer::new(duration_correction(), 50.0);
        let features = featurizer
            .featurize(&profile(), ramp_block().view(), 50)
            .unwrap();
        assert_relative_eq!(features[3], -1.0);
        assert_relative_eq!(features[92], 228.0);
    }

    #[test]
    fn test_constant_axis_has_nan_skew() {
        let featurizer = StrideFeaturizer::new(zero_correction(), 50.0);
        let block = Array2::from_shape_fn((30, 3), |(i, j)| if j == 1 { 4.0 } else { i as f64 });
        let features = featurizer.featurize(&profile(), block.view(), 40).unwrap();
        assert!(features[96].is_finite());
        assert!(features[101].is_nan());
    }
}
