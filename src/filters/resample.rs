//! Band-limited resampling
//!
//! Resamples by truncating or zero-padding the one-sided spectrum and
//! synthesizing the new length, so a stride of any duration maps onto a fixed
//! number of bins without aliasing. The Nyquist bin is split or merged the same
//! way a real-input Fourier resampler does.

use ndarray::{Array2, ArrayView1, ArrayView2};
use rustfft::{num_complex::Complex, FftPlanner};

/// Resample a real signal to `num` points.
pub fn resample(signal: ArrayView1<f64>, num: usize) -> Vec<f64> {
    resample_with(&mut FftPlanner::new(), signal, num)
}

fn resample_with(planner: &mut FftPlanner<f64>, signal: ArrayView1<f64>, num: usize) -> Vec<f64> {
    let nx = signal.len();
    if nx == 0 || num == 0 {
        return vec![0.0; num];
    }

    let mut input: Vec<Complex<f64>> = signal.iter().map(|&x| Complex::new(x, 0.0)).collect();
    planner.plan_fft_forward(nx).process(&mut input);

    // Keep the low half of the spectrum that fits both lengths
    let n = num.min(nx);
    let mut spectrum = vec![Complex::new(0.0, 0.0); num];
    spectrum[..n / 2 + 1].copy_from_slice(&input[..n / 2 + 1]);

    if n % 2 == 0 {
        let nyq = n / 2;
        if num < nx {
            spectrum[nyq] *= 2.0;
        } else if num > nx {
            spectrum[nyq] *= 0.5;
        }
    }

    // Hermitian fill so the inverse is real
    if num % 2 == 0 {
        spectrum[num / 2].im = 0.0;
    }
    for k in 1..(num + 1) / 2 {
        spectrum[num - k] = spectrum[k].conj();
    }

    planner.plan_fft_inverse(num).process(&mut spectrum);
    spectrum.iter().map(|c| c.re / nx as f64).collect()
}

/// Resample every column of an `N × axes` block to `num` rows.
pub fn resample_axes(block: ArrayView2<f64>, num: usize) -> Array2<f64> {
    let mut planner = FftPlanner::new();
    let mut out = Array2::<f64>::zeros((num, block.ncols()));
    for (axis, column) in block.columns().into_iter().enumerate() {
        for (row, value) in resample_with(&mut planner, column, num).into_iter().enumerate() {
            out[[row, axis]] = value;
        }
    }
    out
}
