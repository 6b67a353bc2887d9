//! The typed parameter map the pipeline is configured with: a
//! `serde`-deserializable tree read from a JSON configuration file.
//! Unrecognised enum tokens (e.g. an unknown noise statistic) fail
//! deserialization rather than silently falling back to a default.

use crate::flagger::FlagShape;
use crate::kernels::{FluxRange, Statistic};
use crate::linker::LinkerConfig;
use crate::scfind::ScfindConfig;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

fn default_replacement() -> f64 {
    2.0
}

fn default_cadence_cap() -> usize {
    1_000_000
}

/// The S+C finder's kernel lists and detection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ScfindParameters {
    /// Spatial FWHM values, in pixels. `0` skips the spatial axis for
    /// that iteration.
    pub kernels_spatial: Vec<f64>,
    /// Comma-separated spectral boxcar widths, in channels. Must be `0` or a
    /// non-negative odd integer.
    pub kernels_spectral: Vec<usize>,
    /// Detection threshold, in units of the per-scale noise estimate.
    pub threshold: f64,
    /// Replacement factor `mu`: already-masked voxels are replaced by
    /// `sign(x) * mu * sigma0` before each re-smoothing pass.
    #[serde(default = "default_replacement")]
    pub replacement: f64,
    #[serde(default)]
    pub statistic: Statistic,
    #[serde(default)]
    pub flux_range: FluxRange,
}

impl Default for Statistic {
    fn default() -> Self {
        Statistic::Std
    }
}

impl Default for FluxRange {
    fn default() -> Self {
        FluxRange::Negative
    }
}

/// The linker's merge radii and minimum-extent filter.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LinkerParameters {
    pub radius_x: usize,
    pub radius_y: usize,
    pub radius_z: usize,
    pub min_size_x: usize,
    pub min_size_y: usize,
    pub min_size_z: usize,
    /// Whether to drop components whose peak voxel is negative.
    #[serde(default)]
    pub remove_negative_sources: bool,
}

/// Which noise-scaling mode to run before the S+C finder, if any.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum NoiseScalingParameters {
    None,
    Spectral {
        #[serde(default)]
        statistic: Statistic,
        #[serde(default)]
        flux_range: FluxRange,
    },
    Local {
        grid_x: usize,
        grid_y: usize,
        grid_z: usize,
        window_x: usize,
        window_y: usize,
        window_z: usize,
        #[serde(default)]
        statistic: Statistic,
        #[serde(default)]
        flux_range: FluxRange,
        #[serde(default)]
        interpolate: bool,
    },
}

/// The full typed-parameter map the core consumes. Fields not covered here
/// (catalogue format, output paths) are read directly by the CLI driver,
/// not by the core.
#[derive(Debug, Clone, Deserialize)]
pub struct Parameters {
    pub scfind: ScfindParameters,
    pub linker: LinkerParameters,
    #[serde(default = "default_noise")]
    pub noise: NoiseScalingParameters,
    /// Optional sub-region string, `"x_min-x_max,y_min-y_max,z_min-z_max"`.
    pub region: Option<String>,
    /// Optional path to a weights cube the input is divided by before noise
    /// scaling.
    pub weights: Option<String>,
    #[serde(default = "default_cadence_cap")]
    pub cadence_cap: usize,
    /// Voxel/region flagging instructions applied before noise scaling and
    /// detection.
    #[serde(default)]
    pub flags: Vec<FlagShape>,
}

fn default_noise() -> NoiseScalingParameters {
    NoiseScalingParameters::None
}

impl Parameters {
    /// Load and validate parameters from a JSON file. Any parse failure
    /// (missing field, unrecognised enum token, malformed JSON) is fatal.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration file '{}'", path.display()))?;
        let params: Parameters = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse configuration file '{}'", path.display()))?;
        params.validate()?;
        Ok(params)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.scfind.kernels_spatial.is_empty() && !self.scfind.kernels_spectral.is_empty(),
            "scfind.kernels_spatial and scfind.kernels_spectral must both be non-empty"
        );
        for &k in &self.scfind.kernels_spatial {
            anyhow::ensure!(k >= 0.0, "spatial kernel FWHM must be non-negative, got {k}");
        }
        for &k in &self.scfind.kernels_spectral {
            anyhow::ensure!(
                k == 0 || k % 2 == 1,
                "spectral kernel width must be zero or odd, got {k}"
            );
        }
        anyhow::ensure!(self.scfind.threshold >= 0.0, "scfind.threshold must be non-negative");
        Ok(())
    }

    /// Build the S+C finder's runtime configuration from the loaded
    /// parameters.
    pub fn scfind_config(&self) -> ScfindConfig {
        ScfindConfig {
            kernels_spatial: self.scfind.kernels_spatial.clone(),
            kernels_spectral: self.scfind.kernels_spectral.clone(),
            threshold: self.scfind.threshold,
            replacement: self.scfind.replacement,
            statistic: self.scfind.statistic,
            flux_range: self.scfind.flux_range,
            cadence_cap: self.cadence_cap,
        }
    }

    /// Build the linker's runtime configuration from the loaded parameters.
    pub fn linker_config(&self) -> LinkerConfig {
        LinkerConfig {
            radius_x: self.linker.radius_x,
            radius_y: self.linker.radius_y,
            radius_z: self.linker.radius_z,
            min_size_x: self.linker.min_size_x,
            min_size_y: self.linker.min_size_y,
            min_size_z: self.linker.min_size_z,
            remove_negative_sources: self.linker.remove_negative_sources,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");
        std::fs::write(
            &path,
            r#"{
                "scfind": {
                    "kernels_spatial": [0, 5, 10],
                    "kernels_spectral": [0, 3],
                    "threshold": 5.0
                },
                "linker": {
                    "radius_x": 2, "radius_y": 2, "radius_z": 2,
                    "min_size_x": 2, "min_size_y": 2, "min_size_z": 2
                }
            }"#,
        )
        .unwrap();

        let params = Parameters::load(&path).unwrap();
        assert_eq!(params.scfind.kernels_spatial.len(), 3);
        assert_eq!(params.scfind.replacement, 2.0);
        assert!(matches!(params.noise, NoiseScalingParameters::None));
    }

    #[test]
    fn rejects_unknown_statistic_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");
        std::fs::write(
            &path,
            r#"{
                "scfind": {
                    "kernels_spatial": [0],
                    "kernels_spectral": [0],
                    "threshold": 5.0,
                    "statistic": "bogus"
                },
                "linker": {
                    "radius_x": 0, "radius_y": 0, "radius_z": 0,
                    "min_size_x": 1, "min_size_y": 1, "min_size_z": 1
                }
            }"#,
        )
        .unwrap();

        assert!(Parameters::load(&path).is_err());
    }

    #[test]
    fn rejects_even_spectral_kernel_width() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");
        std::fs::write(
            &path,
            r#"{
                "scfind": {
                    "kernels_spatial": [0],
                    "kernels_spectral": [4],
                    "threshold": 5.0
                },
                "linker": {
                    "radius_x": 0, "radius_y": 0, "radius_z": 0,
                    "min_size_x": 1, "min_size_y": 1, "min_size_z": 1
                }
            }"#,
        )
        .unwrap();

        assert!(Parameters::load(&path).is_err());
    }
}
