//! An immutable, cube-clamped sub-region specification.

use anyhow::{ensure, Result};

/// An inclusive voxel-coordinate sub-region `(x_min..=x_max, y_min..=y_max,
/// z_min..=z_max)`, clamped to a cube's bounds at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x_min: usize,
    pub x_max: usize,
    pub y_min: usize,
    pub y_max: usize,
    pub z_min: usize,
    pub z_max: usize,
}

impl Region {
    /// Build a region from six bounds, clamping to `(nx, ny, nz)` and
    /// rejecting an inverted range.
    pub fn new(
        x_min: usize,
        x_max: usize,
        y_min: usize,
        y_max: usize,
        z_min: usize,
        z_max: usize,
        nx: usize,
        ny: usize,
        nz: usize,
    ) -> Result<Self> {
        ensure!(x_min <= x_max, "invalid region: x_min > x_max");
        ensure!(y_min <= y_max, "invalid region: y_min > y_max");
        ensure!(z_min <= z_max, "invalid region: z_min > z_max");

        Ok(Region {
            x_min,
            x_max: x_max.min(nx.saturating_sub(1)),
            y_min,
            y_max: y_max.min(ny.saturating_sub(1)),
            z_min,
            z_max: z_max.min(nz.saturating_sub(1)),
        })
    }

    /// Parse the `"x_min-x_max,y_min-y_max,z_min-z_max"` sub-region string
    /// accepted as a configuration value, then clamp it to the
    /// given cube geometry.
    pub fn parse(s: &str, nx: usize, ny: usize, nz: usize) -> Result<Self> {
        let parts: Vec<&str> = s.split(',').collect();
        ensure!(parts.len() == 3, "malformed region string '{s}': expected 3 comma-separated ranges");

        let mut bounds = [0usize; 6];
        for (i, part) in parts.iter().enumerate() {
            let (lo, hi) = part
                .split_once('-')
                .ok_or_else(|| anyhow::anyhow!("malformed region range '{part}': expected 'min-max'"))?;
            bounds[2 * i] = lo.trim().parse()?;
            bounds[2 * i + 1] = hi.trim().parse()?;
        }

        Region::new(bounds[0], bounds[1], bounds[2], bounds[3], bounds[4], bounds[5], nx, ny, nz)
    }

    pub fn nx(&self) -> usize {
        self.x_max - self.x_min + 1
    }

    pub fn ny(&self) -> usize {
        self.y_max - self.y_min + 1
    }

    pub fn nz(&self) -> usize {
        self.z_max - self.z_min + 1
    }

    /// The `(x_min, x_max, y_min, y_max, z_min, z_max)` tuple `Cube::load`
    /// accepts as its region argument.
    pub fn as_tuple(&self) -> (usize, usize, usize, usize, usize, usize) {
        (self.x_min, self.x_max, self.y_min, self.y_max, self.z_min, self.z_max)
    }
}
