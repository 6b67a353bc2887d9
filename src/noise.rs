//! The noise scaler: global per-channel normalisation and local
//! sliding-window normalisation. Both modes divide the data cube by an
//! estimated noise level so that downstream thresholds in the S+C finder are
//! expressed in units of sigma rather than raw flux. Both reuse the same
//! `kernels::estimate_noise` dispatcher the finder uses rather than
//! re-deriving noise estimation.

use crate::cube::{Cube, FloatView, SampleType};
use crate::error::soft_warn;
use crate::kernels::{self, FluxRange, Statistic};
use anyhow::{ensure, Result};

fn channel_slice(data: &FloatView<'_>, nx: usize, ny: usize, z: usize) -> Vec<f64> {
    let plane = nx * ny;
    match data {
        FloatView::F32(a) => a[z * plane..(z + 1) * plane].iter().map(|&v| v as f64).collect(),
        FloatView::F64(a) => a[z * plane..(z + 1) * plane].to_vec(),
    }
}

/// Divide every sample in each channel `z` by a noise level `sigma_z`
/// estimated over that channel's `x`-`y` plane. Channels whose estimated
/// noise is zero or NaN are left unscaled.
pub fn spectral_scale(cube: &mut Cube, statistic: Statistic, range: FluxRange) -> Result<()> {
    let (nx, ny, nz) = (cube.nx(), cube.ny(), cube.nz());
    let mut sigmas = Vec::with_capacity(nz);

    {
        let data = cube.float_data()?;
        for z in 0..nz {
            let plane = channel_slice(&data, nx, ny, z);
            sigmas.push(kernels::estimate_noise(&plane, 0.0, 1, statistic, range));
        }
    }

    for z in 0..nz {
        let sigma = sigmas[z];
        if sigma == 0.0 || sigma.is_nan() {
            soft_warn(format!("channel {z} has zero or undefined noise; left unscaled"));
            continue;
        }
        for y in 0..ny {
            for x in 0..nx {
                let v = cube.get_flt(x, y, z)?;
                cube.set_flt(x, y, z, v / sigma)?;
            }
        }
    }

    Ok(())
}

/// Trilinear interpolation weight helper: given a full-resolution coordinate
/// and the grid spacing, return the two bracketing grid indices and the
/// interpolation fraction between them.
fn bracket(coord: f64, spacing: usize, n_grid: usize) -> (usize, usize, f64) {
    let g = coord / spacing as f64 - 0.5;
    let lo = g.floor();
    let frac = g - lo;
    let lo = lo.max(0.0) as usize;
    let lo = lo.min(n_grid.saturating_sub(1));
    let hi = (lo + 1).min(n_grid.saturating_sub(1));
    (lo, hi, frac.clamp(0.0, 1.0))
}

/// Local (sliding-window) noise scaling. Produces a coarse noise cube on a
/// `(nx/gx, ny/gy, nz/gz)` grid, optionally interpolates it trilinearly to
/// full resolution, then divides `cube` by the (interpolated) noise cube.
/// The coarse noise cube is returned so the caller may persist it.
#[allow(clippy::too_many_arguments)]
pub fn local_scale(
    cube: &mut Cube,
    grid: (usize, usize, usize),
    window: (usize, usize, usize),
    statistic: Statistic,
    range: FluxRange,
    interpolate: bool,
) -> Result<Cube> {
    let (gx, gy, gz) = grid;
    let (wx, wy, wz) = window;
    ensure!(gx > 0 && gy > 0 && gz > 0, "local noise scaling grid spacing must be positive");

    let (nx, ny, nz) = (cube.nx(), cube.ny(), cube.nz());
    let ngx = nx.div_ceil(gx).max(1);
    let ngy = ny.div_ceil(gy).max(1);
    let ngz = nz.div_ceil(gz).max(1);

    let mut coarse = Cube::blank(ngx, ngy, ngz, SampleType::F64);
    let (hwx, hwy, hwz) = (wx / 2, wy / 2, wz / 2);

    for kz in 0..ngz {
        let cz = (kz * gz + gz / 2).min(nz.saturating_sub(1));
        let z0 = cz.saturating_sub(hwz);
        let z1 = (cz + hwz).min(nz.saturating_sub(1));
        for ky in 0..ngy {
            let cy = (ky * gy + gy / 2).min(ny.saturating_sub(1));
            let y0 = cy.saturating_sub(hwy);
            let y1 = (cy + hwy).min(ny.saturating_sub(1));
            for kx in 0..ngx {
                let cx = (kx * gx + gx / 2).min(nx.saturating_sub(1));
                let x0 = cx.saturating_sub(hwx);
                let x1 = (cx + hwx).min(nx.saturating_sub(1));

                let mut window_samples = Vec::with_capacity((x1 - x0 + 1) * (y1 - y0 + 1) * (z1 - z0 + 1));
                for z in z0..=z1 {
                    for y in y0..=y1 {
                        for x in x0..=x1 {
                            window_samples.push(cube.get_flt(x, y, z)?);
                        }
                    }
                }

                let sigma = kernels::estimate_noise(&window_samples, 0.0, 1, statistic, range);
                coarse.set_flt(kx, ky, kz, sigma)?;
            }
        }
    }

    if interpolate {
        for z in 0..nz {
            for y in 0..ny {
                for x in 0..nx {
                    let (x0, x1, fx) = bracket(x as f64, gx, ngx);
                    let (y0, y1, fy) = bracket(y as f64, gy, ngy);
                    let (z0, z1, fz) = bracket(z as f64, gz, ngz);

                    let c000 = coarse.get_flt(x0, y0, z0)?;
                    let c100 = coarse.get_flt(x1, y0, z0)?;
                    let c010 = coarse.get_flt(x0, y1, z0)?;
                    let c110 = coarse.get_flt(x1, y1, z0)?;
                    let c001 = coarse.get_flt(x0, y0, z1)?;
                    let c101 = coarse.get_flt(x1, y0, z1)?;
                    let c011 = coarse.get_flt(x0, y1, z1)?;
                    let c111 = coarse.get_flt(x1, y1, z1)?;

                    let c00 = c000 * (1.0 - fx) + c100 * fx;
                    let c10 = c010 * (1.0 - fx) + c110 * fx;
                    let c01 = c001 * (1.0 - fx) + c101 * fx;
                    let c11 = c011 * (1.0 - fx) + c111 * fx;
                    let c0 = c00 * (1.0 - fy) + c10 * fy;
                    let c1 = c01 * (1.0 - fy) + c11 * fy;
                    let sigma = c0 * (1.0 - fz) + c1 * fz;

                    if sigma == 0.0 || sigma.is_nan() {
                        continue;
                    }
                    let v = cube.get_flt(x, y, z)?;
                    cube.set_flt(x, y, z, v / sigma)?;
                }
            }
        }
    } else {
        for kz in 0..ngz {
            for ky in 0..ngy {
                for kx in 0..ngx {
                    let sigma = coarse.get_flt(kx, ky, kz)?;
                    if sigma == 0.0 || sigma.is_nan() {
                        continue;
                    }
                    for z in (kz * gz)..((kz * gz + gz).min(nz)) {
                        for y in (ky * gy)..((ky * gy + gy).min(ny)) {
                            for x in (kx * gx)..((kx * gx + gx).min(nx)) {
                                let v = cube.get_flt(x, y, z)?;
                                cube.set_flt(x, y, z, v / sigma)?;
                            }
                        }
                    }
                }
            }
        }
    }

    Ok(coarse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cube::SampleType;

    #[test]
    fn spectral_scale_normalises_each_channel_independently() {
        let mut cube = Cube::blank(4, 4, 2, SampleType::F64);
        for y in 0..4 {
            for x in 0..4 {
                cube.set_flt(x, y, 0, if (x + y) % 2 == 0 { 2.0 } else { -2.0 }).unwrap();
                cube.set_flt(x, y, 1, if (x + y) % 2 == 0 { 8.0 } else { -8.0 }).unwrap();
            }
        }
        spectral_scale(&mut cube, Statistic::Std, FluxRange::Full).unwrap();
        assert!((cube.get_flt(0, 0, 0).unwrap().abs() - 1.0).abs() < 1e-9);
        assert!((cube.get_flt(0, 0, 1).unwrap().abs() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn spectral_scale_leaves_zero_variance_channel_untouched() {
        let mut cube = Cube::blank(2, 2, 1, SampleType::F64);
        for y in 0..2 {
            for x in 0..2 {
                cube.set_flt(x, y, 0, 5.0).unwrap();
            }
        }
        spectral_scale(&mut cube, Statistic::Std, FluxRange::Full).unwrap();
        assert_eq!(cube.get_flt(0, 0, 0).unwrap(), 5.0);
    }

    #[test]
    fn local_scale_returns_a_coarse_grid_sized_cube() {
        let mut cube = Cube::blank(8, 8, 4, SampleType::F64);
        for z in 0..4 {
            for y in 0..8 {
                for x in 0..8 {
                    cube.set_flt(x, y, z, if (x + y + z) % 2 == 0 { 3.0 } else { -3.0 }).unwrap();
                }
            }
        }
        let coarse = local_scale(&mut cube, (4, 4, 4), (4, 4, 4), Statistic::Std, FluxRange::Full, true).unwrap();
        assert_eq!((coarse.nx(), coarse.ny(), coarse.nz()), (2, 2, 1));
    }
}
