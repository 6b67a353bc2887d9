//! The detection mask: a cube restricted to 32-bit signed integer samples,
//! with the two specialised operations the S+C finder and linker need:
//! additive thresholding, and masked-value replacement before each
//! smoothing pass.

use crate::cube::{Cube, SampleType};
use anyhow::{ensure, Result};

/// Header keywords copied from the data cube onto a fresh mask so that
/// downstream WCS-aware tools can locate detections without re-reading the
/// original cube.
const WCS_KEYS: &[&str] = &[
    "CTYPE1", "CTYPE2", "CTYPE3", "CTYPE4",
    "CRVAL1", "CRVAL2", "CRVAL3", "CRVAL4",
    "CRPIX1", "CRPIX2", "CRPIX3", "CRPIX4",
    "CDELT1", "CDELT2", "CDELT3", "CDELT4",
    "EPOCH",
];

/// A 32-bit integer mask cube: `0` is background, positive values are
/// detections (a bare flag during S+C scanning, a compacted label after
/// linking).
#[derive(Debug, Clone)]
pub struct Mask {
    cube: Cube,
}

impl Mask {
    /// Build an empty mask matching `data`'s geometry, copying over the WCS
    /// header entries named in `WCS_KEYS` so the mask can stand alone.
    pub fn blank_like(data: &Cube) -> Self {
        let mut cube = Cube::blank(data.nx(), data.ny(), data.nz(), SampleType::I32);
        for key in WCS_KEYS {
            if let Some(raw) = data.header().get_raw(key) {
                if let Ok(v) = raw.trim().parse::<f64>() {
                    cube.header_mut().put_flt(key, v);
                } else if let Some(s) = data.header().get_str(key) {
                    let _ = cube.header_mut().put_str(key, &s);
                }
            }
        }
        Mask { cube }
    }

    pub fn nx(&self) -> usize {
        self.cube.nx()
    }

    pub fn ny(&self) -> usize {
        self.cube.ny()
    }

    pub fn nz(&self) -> usize {
        self.cube.nz()
    }

    pub fn get(&self, x: usize, y: usize, z: usize) -> Result<i32> {
        Ok(self.cube.get_int(x, y, z)? as i32)
    }

    pub fn set(&mut self, x: usize, y: usize, z: usize, v: i32) -> Result<()> {
        self.cube.set_int(x, y, z, v as i64)
    }

    /// Borrow the mask's flat `(x, y, z)`-indexed label buffer directly.
    /// The linker walks this in place rather than going through
    /// bounds-checked per-voxel accessors.
    pub fn as_slice(&self) -> &[i32] {
        self.cube.int32_data().expect("Mask always holds an I32 cube")
    }

    pub fn as_slice_mut(&mut self) -> &mut [i32] {
        self.cube.int32_data_mut().expect("Mask always holds an I32 cube")
    }

    pub fn cube(&self) -> &Cube {
        &self.cube
    }

    pub fn cube_mut(&mut self) -> &mut Cube {
        &mut self.cube
    }

    pub fn into_cube(self) -> Cube {
        self.cube
    }

    /// Additively threshold `data` against this mask: every voxel with
    /// `|data[v]| > tau` is set to `1`; existing marks are never cleared.
    pub fn threshold(&mut self, data: &Cube, tau: f64) -> Result<()> {
        ensure!(
            self.nx() == data.nx() && self.ny() == data.ny() && self.nz() == data.nz(),
            "mask and data cube have mismatched geometry"
        );

        for z in 0..self.nz() {
            for y in 0..self.ny() {
                for x in 0..self.nx() {
                    let v = data.get_flt(x, y, z)?;
                    if !v.is_nan() && v.abs() > tau {
                        self.set(x, y, z, 1)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Replace every masked voxel of `data` with `sign(data[v]) * value`,
    /// leaving unmasked voxels untouched. Used to tame already-detected
    /// bright sources before re-smoothing at the next kernel scale.
    pub fn set_masked(&self, data: &mut Cube, value: f64) -> Result<()> {
        ensure!(
            self.nx() == data.nx() && self.ny() == data.ny() && self.nz() == data.nz(),
            "mask and data cube have mismatched geometry"
        );

        for z in 0..self.nz() {
            for y in 0..self.ny() {
                for x in 0..self.nx() {
                    if self.get(x, y, z)? != 0 {
                        let sign = data.get_flt(x, y, z)?.signum();
                        let sign = if sign == 0.0 { 1.0 } else { sign };
                        data.set_flt(x, y, z, sign * value)?;
                    }
                }
            }
        }
        Ok(())
    }
}
