//! The connected-component linker: groups masked voxels into labelled
//! objects under per-axis merge radii, filters components below a minimum
//! bounding-box extent, and compacts surviving labels to `1..K`.
//!
//! The flood fill walks an explicit worklist (a `Vec` used as a stack)
//! rather than recursing per neighbour, since recursion depth bounded only
//! by component size risks stack exhaustion on large components. Adjacency
//! is a plain rectangular box scaled by the per-axis merge radii.

use crate::cube::Cube;
use crate::error::LinkerError;
use crate::mask::Mask;
use anyhow::Result;

/// Per-axis merge radii and minimum-extent filter.
#[derive(Debug, Clone, Copy)]
pub struct LinkerConfig {
    pub radius_x: usize,
    pub radius_y: usize,
    pub radius_z: usize,
    pub min_size_x: usize,
    pub min_size_y: usize,
    pub min_size_z: usize,
    /// Drop components whose peak-flux voxel is negative. Only has an
    /// effect when `run` is given the signed data cube alongside the mask.
    pub remove_negative_sources: bool,
}

/// One surviving object's parameters, in voxel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectRecord {
    pub label: i32,
    pub n_pix: u64,
    pub x_min: u16,
    pub x_max: u16,
    pub y_min: u16,
    pub y_max: u16,
    pub z_min: u16,
    pub z_max: u16,
}

/// The object-parameter table, in final compacted label order.
#[derive(Debug, Clone, Default)]
pub struct ObjectTable {
    records: Vec<ObjectRecord>,
}

impl ObjectTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ObjectRecord> {
        self.records.iter()
    }
}

/// Provisional per-label bookkeeping during the growth phase. Indices 0 and
/// 1 are dummy entries; real labels start at 2.
struct Provisional {
    n_pix: u64,
    x_min: u16,
    x_max: u16,
    y_min: u16,
    y_max: u16,
    z_min: u16,
    z_max: u16,
    peak_abs: f64,
    peak_negative: bool,
    final_label: i32,
}

impl Provisional {
    fn dummy() -> Self {
        Provisional {
            n_pix: 0,
            x_min: 0,
            x_max: 0,
            y_min: 0,
            y_max: 0,
            z_min: 0,
            z_max: 0,
            peak_abs: 0.0,
            peak_negative: false,
            final_label: 0,
        }
    }

    fn seed(x: usize, y: usize, z: usize, flux: Option<f64>) -> Self {
        let (peak_abs, peak_negative) = match flux {
            Some(v) => (v.abs(), v < 0.0),
            None => (0.0, false),
        };
        Provisional {
            n_pix: 1,
            x_min: x as u16,
            x_max: x as u16,
            y_min: y as u16,
            y_max: y as u16,
            z_min: z as u16,
            z_max: z as u16,
            peak_abs,
            peak_negative,
            final_label: 0,
        }
    }

    fn update(&mut self, x: usize, y: usize, z: usize, flux: Option<f64>) {
        self.n_pix += 1;
        self.x_min = self.x_min.min(x as u16);
        self.x_max = self.x_max.max(x as u16);
        self.y_min = self.y_min.min(y as u16);
        self.y_max = self.y_max.max(y as u16);
        self.z_min = self.z_min.min(z as u16);
        self.z_max = self.z_max.max(z as u16);
        if let Some(v) = flux {
            if v.abs() > self.peak_abs {
                self.peak_abs = v.abs();
                self.peak_negative = v < 0.0;
            }
        }
    }

    fn size(&self, axis: usize) -> usize {
        match axis {
            0 => (self.x_max - self.x_min) as usize + 1,
            1 => (self.y_max - self.y_min) as usize + 1,
            _ => (self.z_max - self.z_min) as usize + 1,
        }
    }
}

const MAX_LABEL: i32 = i32::MAX - 1; // 2^31 - 2

/// Run the linker over `mask` in place, returning the compacted
/// object-parameter table. If `data` is supplied, its signed flux values
/// are used only to decide the sign of each component's peak voxel for the
/// `remove_negative_sources` filter; the adjacency and sizing logic never
/// looks at `data`.
pub fn run(mask: &mut Mask, data: Option<&Cube>, config: &LinkerConfig) -> Result<ObjectTable> {
    let (nx, ny, nz) = (mask.nx(), mask.ny(), mask.nz());
    let mut table: Vec<Provisional> = vec![Provisional::dummy(), Provisional::dummy()];
    let mut worklist: Vec<(usize, usize, usize)> = Vec::new();

    {
        let buf = mask.as_slice_mut();
        let index = |x: usize, y: usize, z: usize| x + nx * (y + ny * z);

        for z in (0..nz).rev() {
            for y in (0..ny).rev() {
                for x in (0..nx).rev() {
                    let idx = index(x, y, z);
                    if buf[idx] != 1 {
                        continue;
                    }

                    let label = table.len() as i32;
                    if label > MAX_LABEL {
                        anyhow::bail!(LinkerError::LabelOverflow { limit: MAX_LABEL });
                    }

                    buf[idx] = label;
                    let flux = data.map(|d| d.get_flt(x, y, z)).transpose()?;
                    table.push(Provisional::seed(x, y, z, flux));
                    worklist.push((x, y, z));

                    while let Some((cx, cy, cz)) = worklist.pop() {
                        let x1 = cx.saturating_sub(config.radius_x);
                        let y1 = cy.saturating_sub(config.radius_y);
                        let z1 = cz.saturating_sub(config.radius_z);
                        let x2 = (cx + config.radius_x).min(nx - 1);
                        let y2 = (cy + config.radius_y).min(ny - 1);
                        let z2 = (cz + config.radius_z).min(nz - 1);

                        for zz in z1..=z2 {
                            for yy in y1..=y2 {
                                for xx in x1..=x2 {
                                    let nidx = index(xx, yy, zz);
                                    if buf[nidx] != 1 {
                                        continue;
                                    }
                                    buf[nidx] = label;
                                    let flux = data.map(|d| d.get_flt(xx, yy, zz)).transpose()?;
                                    table[label as usize].update(xx, yy, zz, flux);
                                    worklist.push((xx, yy, zz));
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    tracing::info!(n_provisional = table.len() - 2, "linker: growth phase complete");

    let mut next_label = 1i32;
    {
        let buf = mask.as_slice_mut();
        for v in buf.iter_mut() {
            if *v <= 0 {
                continue;
            }
            let entry = &mut table[*v as usize];
            let fails_extent = entry.size(0) < config.min_size_x
                || entry.size(1) < config.min_size_y
                || entry.size(2) < config.min_size_z;
            let fails_sign = config.remove_negative_sources && data.is_some() && entry.peak_negative;

            if fails_extent || fails_sign {
                *v = 0;
                continue;
            }

            if entry.final_label == 0 {
                entry.final_label = next_label;
                next_label += 1;
            }
            *v = entry.final_label;
        }
    }

    tracing::info!(n_objects = next_label - 1, "linker: filtering and relabelling complete");

    let mut records = vec![
        ObjectRecord {
            label: 0,
            n_pix: 0,
            x_min: 0,
            x_max: 0,
            y_min: 0,
            y_max: 0,
            z_min: 0,
            z_max: 0,
        };
        (next_label - 1).max(0) as usize
    ];
    for entry in &table[2..] {
        if entry.final_label > 0 {
            let i = (entry.final_label - 1) as usize;
            records[i] = ObjectRecord {
                label: entry.final_label,
                n_pix: entry.n_pix,
                x_min: entry.x_min,
                x_max: entry.x_max,
                y_min: entry.y_min,
                y_max: entry.y_max,
                z_min: entry.z_min,
                z_max: entry.z_max,
            };
        }
    }

    Ok(ObjectTable { records })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cube::{Cube, SampleType};

    fn empty_mask(nx: usize, ny: usize, nz: usize) -> Mask {
        let data = Cube::blank(nx, ny, nz, SampleType::F64);
        Mask::blank_like(&data)
    }

    fn default_config() -> LinkerConfig {
        LinkerConfig {
            radius_x: 0,
            radius_y: 0,
            radius_z: 0,
            min_size_x: 1,
            min_size_y: 1,
            min_size_z: 1,
            remove_negative_sources: false,
        }
    }

    #[test]
    fn single_isolated_voxel_becomes_one_object() {
        let mut mask = empty_mask(64, 64, 64);
        mask.set(32, 32, 32, 1).unwrap();

        let table = run(&mut mask, None, &default_config()).unwrap();
        assert_eq!(table.len(), 1);
        let obj = table.iter().next().unwrap();
        assert_eq!(obj.label, 1);
        assert_eq!(obj.n_pix, 1);
        assert_eq!((obj.x_min, obj.x_max), (32, 32));
        assert_eq!(mask.get(32, 32, 32).unwrap(), 1);
    }

    #[test]
    fn merge_radius_controls_whether_neighbours_link() {
        let mut mask = empty_mask(32, 32, 32);
        mask.set(10, 10, 10, 1).unwrap();
        mask.set(13, 10, 10, 1).unwrap();

        let mut config = default_config();
        config.radius_x = 3;
        let mut mask_wide = mask.clone();
        let table_wide = run(&mut mask_wide, None, &config).unwrap();
        assert_eq!(table_wide.len(), 1);
        let obj = table_wide.iter().next().unwrap();
        assert_eq!((obj.x_min, obj.x_max), (10, 13));

        config.radius_x = 2;
        let mut mask_narrow = mask.clone();
        let table_narrow = run(&mut mask_narrow, None, &config).unwrap();
        assert_eq!(table_narrow.len(), 2);
    }

    #[test]
    fn minimum_extent_filter_drops_small_components() {
        let mut mask = empty_mask(32, 32, 32);
        mask.set(1, 1, 1, 1).unwrap();
        mask.set(10, 10, 10, 1).unwrap();
        mask.set(20, 5, 5, 1).unwrap();
        mask.set(5, 25, 25, 1).unwrap();

        let mut config = default_config();
        config.min_size_x = 2;
        config.min_size_y = 2;
        config.min_size_z = 2;

        let table = run(&mut mask, None, &config).unwrap();
        assert!(table.is_empty());
        assert!(mask.as_slice().iter().all(|&v| v == 0));
    }

    #[test]
    fn minimum_extent_filter_applies_to_bounding_box_not_pixel_count() {
        // A thin filament spanning a large x extent but touching only a
        // handful of voxels must pass an x-extent filter even though its
        // voxel count is small.
        let mut mask = empty_mask(32, 4, 4);
        for x in 0..10 {
            mask.set(x, 0, 0, 1).unwrap();
        }

        let mut config = default_config();
        config.radius_x = 1;
        config.min_size_x = 5;
        config.min_size_y = 1;
        config.min_size_z = 1;

        let table = run(&mut mask, None, &config).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.iter().next().unwrap().n_pix, 10);
    }

    #[test]
    fn compacted_labels_form_a_contiguous_range() {
        let mut mask = empty_mask(32, 32, 32);
        mask.set(1, 1, 1, 1).unwrap();
        mask.set(10, 10, 10, 1).unwrap();
        mask.set(20, 20, 20, 1).unwrap();

        let table = run(&mut mask, None, &default_config()).unwrap();
        let mut labels: Vec<i32> = table.iter().map(|o| o.label).collect();
        labels.sort_unstable();
        assert_eq!(labels, vec![1, 2, 3]);
    }

    #[test]
    fn remove_negative_sources_drops_components_with_a_negative_peak() {
        let mut data = Cube::blank(16, 16, 16, SampleType::F64);
        data.set_flt(4, 4, 4, 10.0).unwrap();
        data.set_flt(10, 10, 10, -10.0).unwrap();

        let mut mask = Mask::blank_like(&data);
        mask.set(4, 4, 4, 1).unwrap();
        mask.set(10, 10, 10, 1).unwrap();

        let mut config = default_config();
        config.remove_negative_sources = true;

        let table = run(&mut mask, Some(&data), &config).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(mask.get(10, 10, 10).unwrap(), 0);
        assert_eq!(mask.get(4, 4, 4).unwrap(), 1);
    }
}
