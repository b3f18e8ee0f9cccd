// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright © 2026 Gyrosync contributors

// I0 grows like e^x, above this the series overflows f64
const MAX_ALPHA: f64 = 500.0;

/// Kaiser window low-pass kernel generator.
///
/// The shape parameter `alpha` is the filter strength: `alpha = 0` gives a rectangular
/// window (strongest smoothing), larger values narrow the window down towards a single tap.
#[derive(Clone, Copy, Debug)]
pub struct KaiserWindow {
    length: usize,
}

impl KaiserWindow {
    /// `length` is in taps (video frames). Even lengths are extended by one tap to keep the kernel centered.
    pub fn new(length: usize) -> Self {
        let length = length.max(1);
        Self { length: if length % 2 == 0 { length + 1 } else { length } }
    }

    pub fn kernel(&self, alpha: f64) -> SmoothingKernel {
        let alpha = if alpha.is_finite() { alpha.abs().min(MAX_ALPHA) } else { MAX_ALPHA };
        let n = self.length;
        if n == 1 {
            return SmoothingKernel { strength: alpha, coefficients: vec![1.0] };
        }
        let mut coefficients: Vec<f64> = (0..n).map(|i| {
            let x = 2.0 * i as f64 / (n - 1) as f64 - 1.0;
            bessel_i0(alpha * (1.0 - x * x).max(0.0).sqrt())
        }).collect();

        let sum: f64 = coefficients.iter().sum();
        coefficients.iter_mut().for_each(|c| *c /= sum);

        SmoothingKernel { strength: alpha, coefficients }
    }
}

/// Normalized, symmetric smoothing kernel. Taps are spaced one video frame apart.
#[derive(Clone, Debug, PartialEq)]
pub struct SmoothingKernel {
    strength: f64,
    coefficients: Vec<f64>,
}

impl SmoothingKernel {
    /// Single tap, no smoothing at all.
    pub fn identity() -> Self {
        Self { strength: f64::INFINITY, coefficients: vec![1.0] }
    }

    pub fn strength(&self) -> f64 { self.strength }
    pub fn coefficients(&self) -> &[f64] { &self.coefficients }
    pub fn half_length(&self) -> usize { self.coefficients.len() / 2 }

    /// (offset in taps relative to the center, weight)
    pub fn taps(&self) -> impl Iterator<Item = (isize, f64)> + '_ {
        let half = self.half_length() as isize;
        self.coefficients.iter().enumerate().map(move |(i, &w)| (i as isize - half, w))
    }
}

/// Zeroth order modified Bessel function of the first kind.
pub fn bessel_i0(x: f64) -> f64 {
    let half_x = x / 2.0;
    let mut sum = 1.0;
    let mut term = 1.0;
    let mut k = 1.0;
    loop {
        term *= (half_x / k) * (half_x / k);
        sum += term;
        if term < sum * 1e-16 { break; }
        k += 1.0;
    }
    sum
}
