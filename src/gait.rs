//! Gait event detection and stride segmentation
//!
//! Leg-swing peaks in the thigh's dominant angular velocity mark stride
//! boundaries. Peaks must clear a fixed height and be separated by a minimum
//! distance, larger peaks winning when two are too close. Every consecutive
//! pair of peaks is a stride candidate, kept only when its length is plausible.

use ndarray::{s, Array2, ArrayView1, ArrayView2};

use crate::config::PipelineConfig;
use crate::filters::resample_axes;

/// Half-open sample range `[start, end)` between two consecutive peaks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stride {
    pub start: usize,
    pub end: usize,
}

impl Stride {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

#[derive(Clone, Debug)]
pub struct GaitSegmenter {
    peak_height: f64,
    min_distance: usize,
    min_stride_samples: usize,
    max_stride_samples: usize,
    bins: usize,
    min_peak_count: usize,
}

impl GaitSegmenter {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            peak_height: config.peak_height_rad(),
            min_distance: config.peak_min_distance_samples().max(1),
            min_stride_samples: config.min_stride_samples,
            max_stride_samples: config.stride_window_samples,
            bins: config.resample_bins,
            min_peak_count: config.min_peak_count,
        }
    }

    /// Indices of qualifying peaks, ascending.
    pub fn detect_peaks(&self, signal: ArrayView1<f64>) -> Vec<usize> {
        let candidates: Vec<usize> = local_maxima(signal)
            .into_iter()
            .filter(|&i| signal[i] >= self.peak_height)
            .collect();
        select_by_distance(&candidates, signal, self.min_distance)
    }

    /// Whether enough peaks were found to treat the span as walking.
    pub fn has_usable_gait(&self, peaks: &[usize]) -> bool {
        peaks.len() > self.min_peak_count
    }

    pub fn is_valid_stride(&self, stride: &Stride) -> bool {
        stride.len() > self.min_stride_samples && stride.len() <= self.max_stride_samples
    }

    /// Consecutive peak pairs whose length falls inside the stride bounds.
    pub fn strides(&self, peaks: &[usize]) -> Vec<Stride> {
        peaks
            .windows(2)
            .map(|pair| Stride {
                start: pair[0],
                end: pair[1],
            })
            .filter(|stride| self.is_valid_stride(stride))
            .collect()
    }

    /// Resample one stride of an `N × 3` block to `bins × 3`.
    pub fn resample_stride(&self, data: ArrayView2<f64>, stride: &Stride) -> Array2<f64> {
        resample_axes(data.slice(s![stride.start..stride.end, ..]), self.bins)
    }

    /// Valid strides of `data`, each resampled to `bins × 3`.
    pub fn segment(&self, peaks: &[usize], data: ArrayView2<f64>) -> Vec<Array2<f64>> {
        self.strides(peaks)
            .iter()
            .map(|stride| self.resample_stride(data, stride))
            .collect()
    }
}

/// Strict local maxima; a flat top reports its middle sample. Endpoints never qualify.
fn local_maxima(x: ArrayView1<f64>) -> Vec<usize> {
    let n = x.len();
    let mut peaks = Vec::new();
    if n < 3 {
        return peaks;
    }

    let last = n - 1;
    let mut i = 1;
    while i < last {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < last && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

/// Drop peaks closer than `distance` to a taller neighbour.
fn select_by_distance(peaks: &[usize], x: ArrayView1<f64>, distance: usize) -> Vec<usize> {
    let mut keep = vec![true; peaks.len()];
    let mut order: Vec<usize> = (0..peaks.len()).collect();
    order.sort_by(|&a, &b| x[peaks[a]].total_cmp(&x[peaks[b]]));

    for &j in order.iter().rev() {
        if !keep[j] {
            continue;
        }
        let mut k = j;
        while k > 0 && peaks[j] - peaks[k - 1] < distance {
            keep[k - 1] = false;
            k -= 1;
        }
        let mut k = j + 1;
        while k < peaks.len() && peaks[k] - peaks[j] < distance {
            keep[k] = false;
            k += 1;
        }
    }

    peaks
        .iter()
        .zip(keep)
        .filter_map(|(&p, kept)| kept.then_some(p))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;
    use std::f64::consts::PI;

    fn segmenter() -> GaitSegmenter {
        GaitSegmenter::from_config(&PipelineConfig::default())
    }

    fn walking_signal(n: usize, period_s: f64, amplitude: f64) -> Array1<f64> {
        Array1::from(
            (0..n)
                .map(|i| amplitude * (2.0 * PI * (i as f64 + 0.3) / (50.0 * period_s)).sin())
                .collect::<Vec<_>>(),
        )
    }

    #[test]
    fn test_detects_one_peak_per_cycle() {
        let signal = walking_signal(400, 1.0, 3.0);
        let peaks = segmenter().detect_peaks(signal.view());
        // crests fall at 12.2 + 50k, nearest sample 12 + 50k
        assert_eq!(peaks.len(), 8);
        for pair in peaks.windows(2) {
            assert_eq!(pair[1] - pair[0], 50);
        }
    }

    #[test]
    fn test_height_threshold() {
        let signal = walking_signal(400, 1.0, 1.0); // below 70 deg/s
        assert!(segmenter().detect_peaks(signal.view()).is_empty());
    }

    #[test]
    fn test_min_distance_prefers_taller_peak() {
        let mut x = vec![0.0; 100];
        x[20] = 2.0;
        x[35] = 3.0; // 15 samples away, taller
        x[80] = 2.5;
        let peaks = segmenter().detect_peaks(Array1::from(x).view());
        assert_eq!(peaks, vec![35, 80]);
    }

    #[test]
    fn test_plateau_reports_middle() {
        let x = Array1::from(vec![0.0, 2.0, 2.0, 2.0, 0.0, 0.0]);
        assert_eq!(local_maxima(x.view()), vec![2]);
    }

    #[test]
    fn test_endpoints_are_not_peaks() {
        let x = Array1::from(vec![5.0, 1.0, 0.0, 1.0, 5.0]);
        assert!(local_maxima(x.view()).is_empty());
    }

    #[test]
    fn test_stride_bounds() {
        let seg = segmenter();
        let strides = seg.strides(&[10, 40, 100, 350, 400]);
        // 30 is too short, 250 too long
        assert_eq!(
            strides,
            vec![
                Stride { start: 40, end: 100 },
                Stride { start: 350, end: 400 }
            ]
        );
        assert!(!seg.is_valid_stride(&Stride { start: 0, end: 35 }));
        assert!(seg.is_valid_stride(&Stride { start: 0, end: 36 }));
        assert!(seg.is_valid_stride(&Stride { start: 0, end: 200 }));
        assert!(!seg.is_valid_stride(&Stride { start: 0, end: 201 }));
    }

    #[test]
    fn test_usable_gait_policy() {
        let streaming = segmenter();
        assert!(!streaming.has_usable_gait(&[10]));
        assert!(streaming.has_usable_gait(&[10, 60]));

        let bout = GaitSegmenter::from_config(&PipelineConfig::discrete_bout());
        assert!(!bout.has_usable_gait(&[10, 60, 110]));
        assert!(bout.has_usable_gait(&[10, 60, 110, 160]));
    }

    #[test]
    fn test_segment_resamples_to_bins() {
        let data = Array2::<f64>::ones((200, 3));
        let resampled = segmenter().segment(&[10, 60, 110], data.view());
        assert_eq!(resampled.len(), 2);
        assert_eq!(resampled[0].dim(), (30, 3));
    }
}
