//! Voxel/region flagging: accumulate flagging instructions in absolute
//! voxel coordinates and blank them out (set to NaN) before the noise
//! scaler and S+C finder run, so flagged regions never contribute to any
//! downstream NaN-safe statistic or detection.

use crate::cube::Cube;
use anyhow::Result;
use serde::Deserialize;

/// One flagging instruction, in absolute voxel coordinates. Deserializable
/// so the provider contract's configuration file (`config.rs`) can carry a
/// `flags` list directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "shape", rename_all = "lowercase")]
pub enum FlagShape {
    Pixel { x: usize, y: usize },
    Channel { z: usize },
    Region { x_min: usize, x_max: usize, y_min: usize, y_max: usize, z_min: usize, z_max: usize },
    Circle { x_centre: usize, y_centre: usize, radius: usize },
}

impl FlagShape {
    fn covers(&self, x: usize, y: usize, z: usize) -> bool {
        match *self {
            FlagShape::Pixel { x: px, y: py } => x == px && y == py,
            FlagShape::Channel { z: pz } => z == pz,
            FlagShape::Region { x_min, x_max, y_min, y_max, z_min, z_max } => {
                (x_min..=x_max).contains(&x) && (y_min..=y_max).contains(&y) && (z_min..=z_max).contains(&z)
            }
            FlagShape::Circle { x_centre, y_centre, radius } => {
                let dx = x as i64 - x_centre as i64;
                let dy = y as i64 - y_centre as i64;
                dx * dx + dy * dy <= (radius * radius) as i64
            }
        }
    }
}

/// An ordered collection of flagging instructions, applied to a data cube
/// before noise scaling and detection.
#[derive(Debug, Clone, Default)]
pub struct Flagger {
    shapes: Vec<FlagShape>,
}

impl Flagger {
    pub fn new() -> Self {
        Flagger::default()
    }

    pub fn add(&mut self, shape: FlagShape) -> &mut Self {
        self.shapes.push(shape);
        self
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// Set every voxel covered by any instruction to NaN. `cube` must hold
    /// floating-point samples; flagging an integer cube (e.g. a mask) makes
    /// no sense and is rejected.
    pub fn apply(&self, cube: &mut Cube) -> Result<()> {
        if self.shapes.is_empty() {
            return Ok(());
        }

        let (nx, ny, nz) = (cube.nx(), cube.ny(), cube.nz());
        let mut n_flagged = 0u64;

        for z in 0..nz {
            for y in 0..ny {
                for x in 0..nx {
                    if self.shapes.iter().any(|s| s.covers(x, y, z)) {
                        cube.set_flt(x, y, z, f64::NAN)?;
                        n_flagged += 1;
                    }
                }
            }
        }

        tracing::info!(n_instructions = self.shapes.len(), n_flagged, "applied flagging instructions");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cube::SampleType;

    #[test]
    fn pixel_flag_blanks_exactly_its_spectrum() {
        let mut cube = Cube::blank(4, 4, 3, SampleType::F64);
        for z in 0..3 {
            cube.set_flt(1, 2, z, 5.0).unwrap();
        }
        let mut flagger = Flagger::new();
        flagger.add(FlagShape::Pixel { x: 1, y: 2 });
        flagger.apply(&mut cube).unwrap();

        for z in 0..3 {
            assert!(cube.get_flt(1, 2, z).unwrap().is_nan());
        }
        assert_eq!(cube.get_flt(0, 0, 0).unwrap(), 0.0);
    }

    #[test]
    fn channel_flag_blanks_the_entire_plane() {
        let mut cube = Cube::blank(4, 4, 2, SampleType::F64);
        let mut flagger = Flagger::new();
        flagger.add(FlagShape::Channel { z: 1 });
        flagger.apply(&mut cube).unwrap();

        for y in 0..4 {
            for x in 0..4 {
                assert!(cube.get_flt(x, y, 1).unwrap().is_nan());
                assert!(!cube.get_flt(x, y, 0).unwrap().is_nan());
            }
        }
    }

    #[test]
    fn circle_flag_uses_radius_in_pixel_units() {
        let mut cube = Cube::blank(11, 11, 1, SampleType::F64);
        let mut flagger = Flagger::new();
        flagger.add(FlagShape::Circle { x_centre: 5, y_centre: 5, radius: 2 });
        flagger.apply(&mut cube).unwrap();

        assert!(cube.get_flt(5, 5, 0).unwrap().is_nan());
        assert!(cube.get_flt(7, 5, 0).unwrap().is_nan());
        assert!(!cube.get_flt(9, 5, 0).unwrap().is_nan());
    }

    #[test]
    fn empty_flagger_leaves_cube_untouched() {
        let mut cube = Cube::blank(4, 4, 4, SampleType::F64);
        cube.set_flt(0, 0, 0, 3.0).unwrap();
        Flagger::new().apply(&mut cube).unwrap();
        assert_eq!(cube.get_flt(0, 0, 0).unwrap(), 3.0);
    }
}
