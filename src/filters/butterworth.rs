//! Zero-phase Butterworth low-pass
//!
//! The filter is designed as a cascade of second-order sections (bilinear
//! transform, pre-warped at the corner frequency) and run forward then
//! backward over an odd-reflected extension of the input. Each pass starts
//! every section at its steady state for the first input value, so a constant
//! signal passes through untouched and the edges carry no start-up transient.

use ndarray::{Array1, Array2};
use std::f64::consts::PI;

use crate::config::PipelineConfig;
use crate::error::{DataError, MetabolicsError, Result};

/// Transposed direct-form II section, `a0` normalized to 1.
#[derive(Clone, Copy, Debug)]
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Biquad {
    fn lowpass(k: f64, q: f64) -> Self {
        let k2 = k * k;
        let norm = 1.0 / (1.0 + k / q + k2);
        let b0 = k2 * norm;
        Self {
            b0,
            b1: 2.0 * b0,
            b2: b0,
            a1: 2.0 * (k2 - 1.0) * norm,
            a2: (1.0 - k / q + k2) * norm,
        }
    }

    fn first_order_lowpass(k: f64) -> Self {
        let norm = 1.0 / (1.0 + k);
        let b0 = k * norm;
        Self {
            b0,
            b1: b0,
            b2: 0.0,
            a1: (k - 1.0) * norm,
            a2: 0.0,
        }
    }

    fn dc_gain(&self) -> f64 {
        (self.b0 + self.b1 + self.b2) / (1.0 + self.a1 + self.a2)
    }

    /// Filter in place, starting from the steady state for `signal[0]`.
    fn run(&self, signal: &mut [f64]) {
        let Some(&first) = signal.first() else {
            return;
        };
        let y_ss = self.dc_gain() * first;
        let mut z2 = self.b2 * first - self.a2 * y_ss;
        let mut z1 = self.b1 * first - self.a1 * y_ss + z2;

        for x in signal.iter_mut() {
            let input = *x;
            let y = self.b0 * input + z1;
            z1 = self.b1 * input - self.a1 * y + z2;
            z2 = self.b2 * input - self.a2 * y;
            *x = y;
        }
    }
}

#[derive(Clone, Debug)]
pub struct ZeroPhaseLowPass {
    sections: Vec<Biquad>,
    padlen: usize,
}

impl ZeroPhaseLowPass {
    pub fn butterworth(order: usize, cutoff_hz: f64, sampling_rate_hz: f64) -> Result<Self> {
        if order == 0 {
            return Err(MetabolicsError::InvalidConfig(
                "filter order must be at least 1".to_string(),
            ));
        }
        let nyquist = sampling_rate_hz / 2.0;
        if !(cutoff_hz > 0.0 && cutoff_hz < nyquist) {
            return Err(MetabolicsError::InvalidConfig(format!(
                "cutoff {} Hz outside (0, {}) Hz",
                cutoff_hz, nyquist
            )));
        }

        let k = (PI * cutoff_hz / sampling_rate_hz).tan();
        let mut sections = Vec::with_capacity(order / 2 + 1);
        for i in 0..order / 2 {
            let angle = (2 * i + 1) as f64 * PI / (2 * order) as f64;
            let q = 1.0 / (2.0 * angle.sin());
            sections.push(Biquad::lowpass(k, q));
        }
        if order % 2 == 1 {
            sections.push(Biquad::first_order_lowpass(k));
        }

        Ok(Self {
            sections,
            padlen: 3 * (order + 1),
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Self::butterworth(config.filter_order, config.cutoff_hz, config.sampling_rate_hz)
    }

    /// Shortest signal the forward-backward pass accepts.
    pub fn min_len(&self) -> usize {
        self.padlen + 1
    }

    pub fn apply(&self, signal: &[f64]) -> std::result::Result<Vec<f64>, DataError> {
        let n = signal.len();
        if n < self.min_len() {
            return Err(DataError::Undersized {
                len: n,
                min: self.padlen,
            });
        }

        let pad = self.padlen;
        let first = signal[0];
        let last = signal[n - 1];
        let mut ext = Vec::with_capacity(n + 2 * pad);
        ext.extend((1..=pad).rev().map(|i| 2.0 * first - signal[i]));
        ext.extend_from_slice(signal);
        ext.extend((1..=pad).map(|i| 2.0 * last - signal[n - 1 - i]));

        self.cascade(&mut ext);
        ext.reverse();
        self.cascade(&mut ext);
        ext.reverse();

        Ok(ext[pad..pad + n].to_vec())
    }

    /// Filter every column of an `N × axes` block independently.
    pub fn apply_axes(&self, block: &Array2<f64>) -> std::result::Result<Array2<f64>, DataError> {
        let mut out = block.clone();
        for mut column in out.columns_mut() {
            let filtered = self.apply(&column.to_vec())?;
            column.assign(&Array1::from(filtered));
        }
        Ok(out)
    }

    fn cascade(&self, signal: &mut [f64]) {
        for section in &self.sections {
            section.run(signal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lowpass() -> ZeroPhaseLowPass {
        ZeroPhaseLowPass::butterworth(4, 6.0, 50.0).unwrap()
    }

    fn sine(freq_hz: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| (2.0 * PI * freq_hz * i as f64 / 50.0).sin())
            .collect()
    }

    #[test]
    fn test_unity_dc_gain() {
        let filter = lowpass();
        let gain: f64 = filter.sections.iter().map(|s| s.dc_gain()).product();
        assert!((gain - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_constant_signal_unchanged() {
        let out = lowpass().apply(&vec![9.81; 100]).unwrap();
        assert!(out.iter().all(|v| (v - 9.81).abs() < 1e-9));
    }

    #[test]
    fn test_attenuates_high_frequency() {
        let out = lowpass().apply(&sine(20.0, 200)).unwrap();
        let peak = out[50..150].iter().fold(0.0f64, |m, v| m.max(v.abs()));
        assert!(peak < 0.01, "20 Hz residual {}", peak);
    }

    #[test]
    fn test_passband_has_no_phase_shift() {
        let input = sine(1.0, 200);
        let out = lowpass().apply(&input).unwrap();
        // A one-sample lag would leave a residual near 2π/50
        let worst = (50..150).fold(0.0f64, |m, i| m.max((out[i] - input[i]).abs()));
        assert!(worst < 0.01, "residual {}", worst);
    }

    #[test]
    fn test_rejects_undersized_input() {
        let filter = lowpass();
        assert_eq!(filter.min_len(), 16);
        assert_eq!(
            filter.apply(&[1.0; 15]),
            Err(DataError::Undersized { len: 15, min: 15 })
        );
        assert!(filter.apply(&[1.0; 16]).is_ok());
    }

    #[test]
    fn test_odd_order_design() {
        let filter = ZeroPhaseLowPass::butterworth(3, 6.0, 50.0).unwrap();
        assert_eq!(filter.sections.len(), 2);
        let out = filter.apply(&vec![2.0; 40]).unwrap();
        assert!(out.iter().all(|v| (v - 2.0).abs() < 1e-9));
    }

    #[test]
    fn test_filters_each_axis() {
        let mut block = Array2::<f64>::zeros((100, 3));
        for i in 0..100 {
            block[[i, 0]] = 1.0;
            block[[i, 2]] = -3.0;
        }
        let out = lowpass().apply_axes(&block).unwrap();
        assert_eq!(out.dim(), (100, 3));
        assert!((out[[50, 0]] - 1.0).abs() < 1e-9);
        assert!(out[[50, 1]].abs() < 1e-12);
        assert!((out[[50, 2]] + 3.0).abs() < 1e-9);
    }
}
