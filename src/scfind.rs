//! The Smooth-and-Clip (S+C) finder: iterates over the Cartesian product of
//! spatial and spectral kernels, convolving a scratch copy of the data cube
//! at each scale, remeasuring noise, and additively thresholding into a
//! shared mask. Masked voxels are replaced using the baseline (unsmoothed)
//! noise estimate before every re-smoothing pass, not the noise measured at
//! the previous scale.

use crate::cube::{Cube, FloatView};
use crate::kernels::{self, FluxRange, Statistic};
use crate::mask::Mask;
use anyhow::Result;

const FWHM_CONST: f64 = 2.355_443_298_060_743; // 2 * sqrt(2 * ln 2)
const DEFAULT_CADENCE_CAP: usize = 1_000_000;

/// Parameters controlling one S+C finder run.
#[derive(Debug, Clone)]
pub struct ScfindConfig {
    pub kernels_spatial: Vec<f64>,
    pub kernels_spectral: Vec<usize>,
    pub threshold: f64,
    pub replacement: f64,
    pub statistic: Statistic,
    pub flux_range: FluxRange,
    /// Maximum number of samples noise estimation should consider; the
    /// cadence is derived so that `n / cadence^3 <= cadence_cap`.
    pub cadence_cap: usize,
}

impl Default for ScfindConfig {
    fn default() -> Self {
        ScfindConfig {
            kernels_spatial: vec![0.0],
            kernels_spectral: vec![0],
            threshold: 5.0,
            replacement: 2.0,
            statistic: Statistic::Std,
            flux_range: FluxRange::Negative,
            cadence_cap: DEFAULT_CADENCE_CAP,
        }
    }
}

fn cadence_for(n: usize, cadence_cap: usize) -> usize {
    let c = (n as f64 / cadence_cap.max(1) as f64).cbrt().ceil();
    (c as usize).max(1)
}

fn flat_samples(view: &FloatView<'_>) -> Vec<f64> {
    match view {
        FloatView::F32(a) => a.iter().map(|&v| v as f64).collect(),
        FloatView::F64(a) => a.to_vec(),
    }
}

/// Run the S+C finder over `data`, returning the accumulated detection
/// mask. `data` must hold floating-point samples.
pub fn run(data: &Cube, config: &ScfindConfig) -> Result<Mask> {
    anyhow::ensure!(
        !config.kernels_spatial.is_empty() && !config.kernels_spectral.is_empty(),
        "invalid spatial or spectral kernel list encountered"
    );
    anyhow::ensure!(config.threshold >= 0.0, "negative flux threshold encountered");

    let mut mask = Mask::blank_like(data);
    let cadence = cadence_for(data.len(), config.cadence_cap);

    let sigma0 = {
        let view = data.float_data()?;
        let sample = flat_samples(&view);
        kernels::estimate_noise(&sample, 0.0, cadence, config.statistic, config.flux_range)
    };
    tracing::info!(sigma0, cadence, "baseline noise estimated on unsmoothed cube");

    mask.threshold(data, config.threshold * sigma0)?;

    for &k_s in &config.kernels_spatial {
        for &k_z in &config.kernels_spectral {
            if k_s == 0.0 && k_z == 0 {
                continue;
            }
            tracing::info!(spatial = k_s, spectral = k_z, "smoothing kernel");

            let mut scratch = data.clone();
            mask.set_masked(&mut scratch, config.replacement * sigma0)?;

            if k_s > 0.0 {
                scratch.gaussian(k_s / FWHM_CONST)?;
            }
            if k_z > 0 {
                scratch.boxcar(k_z / 2)?;
            }

            let sigma_scale = {
                let view = scratch.float_data()?;
                let sample = flat_samples(&view);
                kernels::estimate_noise(&sample, 0.0, cadence, config.statistic, config.flux_range)
            };
            tracing::info!(spatial = k_s, spectral = k_z, sigma_scale, "re-estimated noise at scale");

            mask.threshold(&scratch, config.threshold * sigma_scale)?;
        }
    }

    Ok(mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cube::SampleType;

    fn gaussian_noise_free_cube() -> Cube {
        Cube::blank(16, 16, 16, SampleType::F64)
    }

    #[test]
    fn single_isolated_source_is_detected_with_a_single_kernel_pair() {
        let mut cube = gaussian_noise_free_cube();
        cube.set_flt(8, 8, 8, 10.0).unwrap();

        let config = ScfindConfig {
            kernels_spatial: vec![0.0],
            kernels_spectral: vec![0],
            threshold: 5.0,
            replacement: 2.0,
            statistic: Statistic::Std,
            flux_range: FluxRange::Full,
            cadence_cap: 1_000_000,
        };

        let mask = run(&cube, &config).unwrap();
        assert_eq!(mask.get(8, 8, 8).unwrap(), 1);

        let mut n_marked = 0;
        for &v in mask.as_slice() {
            if v != 0 {
                n_marked += 1;
            }
        }
        assert_eq!(n_marked, 1);
    }

    #[test]
    fn kernel_pair_zero_zero_is_skipped_after_initial_pass() {
        let cube = gaussian_noise_free_cube();
        let config = ScfindConfig {
            kernels_spatial: vec![0.0],
            kernels_spectral: vec![0],
            threshold: 5.0,
            replacement: 2.0,
            statistic: Statistic::Std,
            flux_range: FluxRange::Full,
            cadence_cap: 1_000_000,
        };
        let mask = run(&cube, &config).unwrap();
        assert!(mask.as_slice().iter().all(|&v| v == 0));
    }

    #[test]
    fn mask_is_monotone_non_decreasing_across_kernel_product() {
        let mut cube = Cube::blank(20, 20, 20, SampleType::F64);
        cube.set_flt(10, 10, 10, 8.0).unwrap();

        let narrow = ScfindConfig {
            kernels_spatial: vec![0.0],
            kernels_spectral: vec![0],
            threshold: 5.0,
            replacement: 2.0,
            statistic: Statistic::Std,
            flux_range: FluxRange::Full,
            cadence_cap: 1_000_000,
        };
        let wide = ScfindConfig {
            kernels_spatial: vec![0.0, 4.0],
            kernels_spectral: vec![0],
            threshold: 5.0,
            replacement: 2.0,
            statistic: Statistic::Std,
            flux_range: FluxRange::Full,
            cadence_cap: 1_000_000,
        };

        let mask_narrow = run(&cube, &narrow).unwrap();
        let mask_wide = run(&cube, &wide).unwrap();

        for i in 0..mask_narrow.as_slice().len() {
            if mask_narrow.as_slice()[i] != 0 {
                assert_ne!(mask_wide.as_slice()[i], 0);
            }
        }
    }

    #[test]
    fn running_twice_with_the_same_parameters_is_deterministic() {
        let mut cube = Cube::blank(16, 16, 16, SampleType::F64);
        cube.set_flt(8, 8, 8, 9.0).unwrap();
        let config = ScfindConfig {
            kernels_spatial: vec![0.0, 4.0],
            kernels_spectral: vec![0],
            threshold: 5.0,
            replacement: 2.0,
            statistic: Statistic::Std,
            flux_range: FluxRange::Full,
            cadence_cap: 1_000_000,
        };
        let a = run(&cube, &config).unwrap();
        let b = run(&cube, &config).unwrap();
        assert_eq!(a.as_slice(), b.as_slice());
    }
}
