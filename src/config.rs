use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::{MetabolicsError, Result};

/// Tuning constants for one deployment of the pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sampling_rate_hz: f64,
    /// Low-pass corner frequency
    pub cutoff_hz: f64,
    pub filter_order: usize,
    /// Samples per analysis window (4 s at 50 Hz)
    pub window_size: usize,
    /// Windows accumulated before a flush
    pub chunk_windows: usize,
    /// Longest admissible stride, in samples
    pub stride_window_samples: usize,
    /// Strides must be strictly longer than this, in samples
    pub min_stride_samples: usize,
    pub peak_height_deg: f64,
    pub peak_min_distance_s: f64,
    pub resample_bins: usize,
    pub rotation_steps: usize,
    /// Gait is usable only with more peaks than this
    pub min_peak_count: usize,
    /// Movement requires max |gyro| (rad/s) above this
    pub gyro_norm_threshold: f64,
    pub stand_aug_factor: f64,
    pub kcal_per_day_to_watts: f64,
    pub reject_degenerate_calibration: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::streaming()
    }
}

impl PipelineConfig {
    /// Continuous processing of uploaded sessions.
    pub fn streaming() -> Self {
        Self {
            sampling_rate_hz: 50.0,
            cutoff_hz: 6.0,
            filter_order: 4,
            window_size: 200,
            chunk_windows: 10,
            stride_window_samples: 200,
            min_stride_samples: 35,
            peak_height_deg: 70.0,
            peak_min_distance_s: 0.6,
            resample_bins: 30,
            rotation_steps: 1000,
            min_peak_count: 1,
            gyro_norm_threshold: 0.0,
            stand_aug_factor: 1.41,
            kcal_per_day_to_watts: 0.048426,
            reject_degenerate_calibration: false,
        }
    }

    /// Offline analysis of a single pre-cut walking bout.
    pub fn discrete_bout() -> Self {
        Self {
            stride_window_samples: 100,
            min_peak_count: 3,
            gyro_norm_threshold: 0.5,
            ..Self::streaming()
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            MetabolicsError::InvalidConfig(format!("{}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            MetabolicsError::InvalidConfig(format!("{}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn peak_height_rad(&self) -> f64 {
        self.peak_height_deg.to_radians()
    }

    pub fn peak_min_distance_samples(&self) -> usize {
        (self.peak_min_distance_s * self.sampling_rate_hz) as usize
    }

    pub fn chunk_target(&self) -> usize {
        self.window_size * self.chunk_windows
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(MetabolicsError::InvalidConfig(msg));

        if !(self.sampling_rate_hz > 0.0) {
            return fail(format!("sampling_rate_hz must be positive, got {}", self.sampling_rate_hz));
        }
        if !(self.cutoff_hz > 0.0 && self.cutoff_hz < self.sampling_rate_hz / 2.0) {
            return fail(format!(
                "cutoff_hz must lie in (0, {}), got {}",
                self.sampling_rate_hz / 2.0,
                self.cutoff_hz
            ));
        }
        if self.filter_order == 0 {
            return fail("filter_order must be at least 1".to_string());
        }
        if self.window_size == 0 || self.chunk_windows == 0 {
            return fail("window_size and chunk_windows must be non-zero".to_string());
        }
        if self.min_stride_samples >= self.stride_window_samples {
            return fail(format!(
                "min_stride_samples ({}) must be below stride_window_samples ({})",
                self.min_stride_samples, self.stride_window_samples
            ));
        }
        if self.resample_bins != RESAMPLE_BINS_SUPPORTED {
            return fail(format!(
                "resample_bins must be {} to match the model input, got {}",
                RESAMPLE_BINS_SUPPORTED, self.resample_bins
            ));
        }
        if self.rotation_steps < 2 {
            return fail("rotation_steps must be at least 2".to_string());
        }
        if self.peak_min_distance_samples() == 0 {
            return fail("peak_min_distance_s is shorter than one sample".to_string());
        }
        if !(self.stand_aug_factor > 0.0 && self.kcal_per_day_to_watts > 0.0) {
            return fail("basal-rate factors must be positive".to_string());
        }
        Ok(())
    }
}

const RESAMPLE_BINS_SUPPORTED: usize = crate::types::RESAMPLE_BINS;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(PipelineConfig::streaming().validate().is_ok());
        assert!(PipelineConfig::discrete_bout().validate().is_ok());
    }

    #[test]
    fn test_derived_constants() {
        let config = PipelineConfig::default();
        assert_eq!(config.peak_min_distance_samples(), 30);
        assert_eq!(config.chunk_target(), 2000);
        assert!((config.peak_height_rad() - 1.2217).abs() < 1e-3);
    }

    #[test]
    fn test_rejects_bad_cutoff() {
        let config = PipelineConfig {
            cutoff_hz: 30.0,
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(MetabolicsError::InvalidConfig(_))));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"min_peak_count": 3, "gyro_norm_threshold": 0.5}"#).unwrap();
        assert_eq!(config.min_peak_count, 3);
        assert_eq!(config.window_size, 200);
    }
}
