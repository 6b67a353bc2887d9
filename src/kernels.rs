//! NaN-safe numeric primitives the noise scaler and S+C finder are built on:
//! sum/mean, standard deviation and MAD about a reference value, a
//! histogram Gaussian-fit noise estimator, a 1-D boxcar filter, and a
//! separable 2-D Gaussian filter approximated by repeated boxcars.
//!
//! Every routine is generic over a small local `Float` trait covering
//! `f32`/`f64` rather than pulling in a generic-numerics crate for two
//! instances.

use serde::{Deserialize, Serialize};

/// Which noise statistic to use when estimating the scale of a sample
/// distribution. Corresponds to the provider contract's `"std"`/`"mad"`/
/// `"gauss"` tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Statistic {
    Std,
    Mad,
    Gauss,
}

/// Which sign of sample values participates in noise estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FluxRange {
    Negative,
    Full,
    Positive,
}

impl FluxRange {
    fn accepts(self, x: f64) -> bool {
        match self {
            FluxRange::Negative => x < 0.0,
            FluxRange::Full => true,
            FluxRange::Positive => x > 0.0,
        }
    }
}

/// Minimal float abstraction so the kernels below need not be written twice
/// for `f32` and `f64`.
pub trait Float: Copy + PartialOrd + 'static {
    fn to_f64(self) -> f64;
    fn from_f64(v: f64) -> Self;
    fn zero() -> Self;
    fn is_nan(self) -> bool;
}

impl Float for f32 {
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_f64(v: f64) -> Self {
        v as f32
    }
    fn zero() -> Self {
        0.0
    }
    fn is_nan(self) -> bool {
        f32::is_nan(self)
    }
}

impl Float for f64 {
    fn to_f64(self) -> f64 {
        self
    }
    fn from_f64(v: f64) -> Self {
        v
    }
    fn zero() -> Self {
        0.0
    }
    fn is_nan(self) -> bool {
        f64::is_nan(self)
    }
}

/// NaN-safe sum over `data`. Returns NaN only if every sample is NaN.
pub fn sum<T: Float>(data: &[T]) -> f64 {
    let mut acc = 0.0f64;
    let mut any = false;
    for &x in data {
        if !x.is_nan() {
            acc += x.to_f64();
            any = true;
        }
    }
    if any {
        acc
    } else {
        f64::NAN
    }
}

/// NaN-safe mean over `data`.
pub fn mean<T: Float>(data: &[T]) -> f64 {
    let mut acc = 0.0f64;
    let mut n = 0usize;
    for &x in data {
        if !x.is_nan() {
            acc += x.to_f64();
            n += 1;
        }
    }
    if n == 0 {
        f64::NAN
    } else {
        acc / n as f64
    }
}

/// Standard deviation about reference value `mu0`, sub-sampled at the given
/// `cadence` (every `cadence`-th element) and restricted to samples
/// matching `range`. Returns NaN if no samples matched.
pub fn std_dev<T: Float>(data: &[T], mu0: f64, cadence: usize, range: FluxRange) -> f64 {
    let cadence = cadence.max(1);
    let mut acc = 0.0f64;
    let mut n = 0usize;

    for &x in data.iter().step_by(cadence) {
        if x.is_nan() {
            continue;
        }
        let xf = x.to_f64();
        if !range.accepts(xf) {
            continue;
        }
        let d = xf - mu0;
        acc += d * d;
        n += 1;
    }

    if n == 0 {
        f64::NAN
    } else {
        (acc / n as f64).sqrt()
    }
}

/// Median absolute deviation about `mu0`. Collects the finite samples into
/// a scratch buffer and partitions it with `select_nth_unstable` to find
/// the median in expected linear time, leaving the caller's slice
/// untouched.
pub fn mad<T: Float>(data: &[T], mu0: f64) -> f64 {
    let mut deviations: Vec<f64> = data
        .iter()
        .filter(|x| !x.is_nan())
        .map(|&x| (x.to_f64() - mu0).abs())
        .collect();

    if deviations.is_empty() {
        return f64::NAN;
    }

    let mid = deviations.len() / 2;
    let (_, median, _) = deviations.select_nth_unstable_by(mid, |a, b| a.partial_cmp(b).unwrap());
    let median = *median;

    if deviations.len() % 2 == 0 && mid > 0 {
        let (_, upper, _) = deviations.select_nth_unstable_by(mid - 1, |a, b| a.partial_cmp(b).unwrap());
        (median + *upper) / 2.0
    } else {
        median
    }
}

/// Histogram Gaussian-fit noise estimator: builds a histogram of finite
/// samples over `[-k*sigma0, +k*sigma0]` using a coarse MAD-based preset for
/// `sigma0`, then fits a parabola to the log-counts around the histogram
/// peak (`log N(x) = -(x-mu)^2 / (2 sigma^2) + const`), returning the
/// fitted `sigma`.
pub fn gauss_fit_noise<T: Float>(data: &[T], range: FluxRange) -> f64 {
    const K: f64 = 5.0;
    const N_BINS: usize = 201;

    let sigma0 = 1.4826 * mad(data, 0.0);
    if !sigma0.is_finite() || sigma0 <= 0.0 {
        return f64::NAN;
    }

    let half_range = K * sigma0;
    let bin_width = 2.0 * half_range / N_BINS as f64;
    let mut counts = vec![0u64; N_BINS];

    for &x in data {
        if x.is_nan() {
            continue;
        }
        let xf = x.to_f64();
        if !range.accepts(xf) || xf < -half_range || xf >= half_range {
            continue;
        }
        let bin = ((xf + half_range) / bin_width) as usize;
        let bin = bin.min(N_BINS - 1);
        counts[bin] += 1;
    }

    let peak = match counts.iter().enumerate().max_by_key(|&(_, &c)| c) {
        Some((i, &c)) if c > 0 => i,
        _ => return sigma0,
    };

    // Quadratic least-squares fit of ln(count) against bin centre over a
    // window around the peak, using only non-empty bins.
    let window = (N_BINS / 10).max(3);
    let lo = peak.saturating_sub(window);
    let hi = (peak + window).min(N_BINS - 1);

    let mut sxx = 0.0f64;
    let mut sxxxx = 0.0f64;
    let mut sxxy = 0.0f64;
    let mut sy = 0.0f64;
    let mut n = 0.0f64;

    for i in lo..=hi {
        if counts[i] == 0 {
            continue;
        }
        let centre = (i as f64 - peak as f64) * bin_width;
        let y = (counts[i] as f64).ln();
        let xx = centre * centre;
        sxx += xx;
        sxxxx += xx * xx;
        sxxy += xx * y;
        sy += y;
        n += 1.0;
    }

    if n < 3.0 {
        return sigma0;
    }

    // Fit y = a + b*xx (parabola in x centred at the peak, so the linear
    // term in x vanishes by symmetry of the binning window).
    let denom = n * sxxxx - sxx * sxx;
    if denom.abs() < 1e-12 {
        return sigma0;
    }
    let b = (n * sxxy - sxx * sy) / denom;

    if b >= 0.0 {
        // Fit did not curve downward as expected; fall back to the MAD preset.
        return sigma0;
    }

    (-1.0 / (2.0 * b)).sqrt()
}

/// Dispatch to the configured noise statistic, applying `cadence` and
/// `range` uniformly across all three (MAD and the Gaussian fit do not take
/// those parameters directly, so the subset is gathered first). Used by both
/// the noise scaler and the S+C finder, which both select a statistic and a
/// flux range once and re-estimate noise repeatedly against it.
pub fn estimate_noise<T: Float>(data: &[T], mu0: f64, cadence: usize, statistic: Statistic, range: FluxRange) -> f64 {
    match statistic {
        Statistic::Std => std_dev(data, mu0, cadence, range),
        Statistic::Mad => {
            let cadence = cadence.max(1);
            let sample: Vec<f64> = data
                .iter()
                .step_by(cadence)
                .filter(|x| !x.is_nan())
                .map(|&x| x.to_f64())
                .filter(|&v| range.accepts(v))
                .collect();
            1.4826 * mad(&sample, mu0)
        }
        Statistic::Gauss => {
            let cadence = cadence.max(1);
            let sample: Vec<f64> = data.iter().step_by(cadence).filter(|x| !x.is_nan()).map(|&x| x.to_f64()).collect();
            gauss_fit_noise(&sample, range)
        }
    }
}

/// Symmetric running-mean boxcar filter of radius `R` (width `2R+1`).
/// Samples outside the array are treated as zero; NaN samples are replaced
/// by zero before filtering.
pub fn boxcar_1d<T: Float>(data: &mut [T], radius: usize) {
    let radius = radius.max(1);
    let n = data.len();
    if n == 0 {
        return;
    }

    let mut padded = vec![0.0f64; n + 2 * radius];
    for (i, &x) in data.iter().enumerate() {
        padded[i + radius] = if x.is_nan() { 0.0 } else { x.to_f64() };
    }

    let width = (2 * radius + 1) as f64;
    let mut window_sum: f64 = padded[..2 * radius + 1].iter().sum();
    let mut out = vec![0.0f64; n];
    out[0] = window_sum / width;

    for i in 1..n {
        window_sum += padded[i + 2 * radius] - padded[i - 1];
        out[i] = window_sum / width;
    }

    for (slot, v) in data.iter_mut().zip(out) {
        *slot = T::from_f64(v);
    }
}

/// Given a target Gaussian sigma, choose `(radius, n_iter)` for the
/// repeated-boxcar approximation minimising `|sigma_eff - sigma|`, subject
/// to `radius >= 1`.
pub fn optimal_filter_size(sigma: f64) -> (usize, usize) {
    const MAX_N: usize = 6;
    let mut best = (1usize, 1usize);
    let mut best_err = f64::INFINITY;

    for n in 1..=MAX_N {
        let ideal_r = 0.5 * ((12.0 * sigma * sigma / n as f64 + 1.0).sqrt() - 1.0);
        for &r in &[ideal_r.floor().max(1.0) as usize, ideal_r.ceil().max(1.0) as usize] {
            let sigma_eff = ((n as f64) * (((2 * r + 1) * (2 * r + 1) - 1) as f64) / 12.0).sqrt();
            let err = (sigma_eff - sigma).abs();
            if err < best_err {
                best_err = err;
                best = (r, n);
            }
        }
    }

    best
}

/// Separable 2-D Gaussian filter over a row-major `(nx, ny)` plane,
/// approximated by `n_iter` passes of a 1-D boxcar of `radius` along x then
/// along y. Requires `sigma >= 1.5`.
pub fn gaussian_2d<T: Float>(plane: &mut [T], nx: usize, ny: usize, radius: usize, n_iter: usize) {
    for _ in 0..n_iter {
        for y in 0..ny {
            boxcar_1d(&mut plane[y * nx..(y + 1) * nx], radius);
        }
    }

    let mut column = vec![T::zero(); ny];
    for _ in 0..n_iter {
        for x in 0..nx {
            for y in 0..ny {
                column[y] = plane[y * nx + x];
            }
            boxcar_1d(&mut column, radius);
            for y in 0..ny {
                plane[y * nx + x] = column[y];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_ignores_nan_unless_all_nan() {
        let data = [1.0f32, f32::NAN, 3.0];
        assert_eq!(sum(&data), 4.0);
        let all_nan = [f32::NAN, f32::NAN];
        assert!(sum(&all_nan).is_nan());
    }

    #[test]
    fn std_dev_matches_known_white_noise() {
        let data: Vec<f64> = (0..100_000)
            .map(|i| {
                // Simple deterministic pseudo-noise generator, no external
                // dependency needed for this sanity check.
                let x = (i as f64 * 12.9898).sin() * 43758.5453;
                (x - x.floor() - 0.5) * 2.0
            })
            .collect();
        let sigma = std_dev(&data, 0.0, 1, FluxRange::Full);
        // Uniform(-1, 1) has variance 1/3.
        assert!((sigma - (1.0f64 / 3.0).sqrt()).abs() < 0.05);
    }

    #[test]
    fn mad_of_symmetric_data() {
        let data = [-2.0f64, -1.0, 0.0, 1.0, 2.0];
        assert_eq!(mad(&data, 0.0), 1.0);
    }

    #[test]
    fn boxcar_treats_boundary_as_zero() {
        let mut data = [0.0f32, 0.0, 10.0, 0.0, 0.0];
        boxcar_1d(&mut data, 1);
        assert!((data[2] - 10.0 / 3.0).abs() < 1e-5);
        assert!((data[0] - 0.0).abs() < 1e-5);
    }

    #[test]
    fn boxcar_replaces_nan_with_zero() {
        let mut data = [f32::NAN, 10.0, f32::NAN];
        boxcar_1d(&mut data, 1);
        assert!((data[1] - 10.0 / 3.0).abs() < 1e-5);
    }

    #[test]
    fn estimate_noise_dispatches_on_statistic() {
        let data = [-2.0f64, -1.0, 0.0, 1.0, 2.0];
        let std = estimate_noise(&data, 0.0, 1, Statistic::Std, FluxRange::Full);
        let m = estimate_noise(&data, 0.0, 1, Statistic::Mad, FluxRange::Full);
        assert!(std.is_finite() && std > 0.0);
        assert!(m.is_finite() && m > 0.0);
    }

    #[test]
    fn optimal_filter_size_respects_minimum_radius() {
        let (r, _n) = optimal_filter_size(1.5);
        assert!(r >= 1);
    }

    #[test]
    fn gaussian_2d_smooths_a_point_source() {
        let nx = 16;
        let ny = 16;
        let mut plane = vec![0.0f32; nx * ny];
        plane[8 * nx + 8] = 100.0;
        let (r, n) = optimal_filter_size(2.0);
        gaussian_2d(&mut plane, nx, ny, r, n);
        assert!(plane[8 * nx + 8] < 100.0);
        assert!(plane[8 * nx + 8] > 0.0);
        let total: f32 = plane.iter().sum();
        assert!((total - 100.0).abs() < 1.0);
    }
}
