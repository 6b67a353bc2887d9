//! CLI driver: sequences the cube engine end to end, load, flag, scale,
//! find, link, write. Deliberately thin; the detection logic lives in the
//! library modules, not here.

use anyhow::{Context, Result};
use clap::Parser;
use cubefind::config::{NoiseScalingParameters, Parameters};
use cubefind::{noise, scfind, Cube, Region};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cubefind", about = "Multi-scale Smooth-and-Clip source finder for spectral-line cubes")]
struct Args {
    /// Input data cube.
    #[arg(long)]
    input: PathBuf,

    /// JSON configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Optional sub-region override, "x_min-x_max,y_min-y_max,z_min-z_max".
    #[arg(long)]
    region: Option<String>,

    /// Output path stem; writes `<output>.mask.fits` and
    /// `<output>.catalog.txt`.
    #[arg(long)]
    output: PathBuf,

    /// Overwrite existing output files.
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    if let Err(err) = run() {
        tracing::error!("{err:#}");
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<()> {
    let args = Args::parse();
    let params = Parameters::load(&args.config)?;

    let region_str = args.region.as_deref().or(params.region.as_deref());
    let region = match region_str {
        Some(s) => {
            let (nx, ny, nz) = Cube::peek_geometry(&args.input)?;
            Some(Region::parse(s, nx, ny, nz)?)
        }
        None => None,
    };

    let mut data = Cube::load(&args.input, region.map(Region::as_tuple))?;
    tracing::info!(nx = data.nx(), ny = data.ny(), nz = data.nz(), "cube loaded");

    if let Some(weights_path) = &params.weights {
        let weights = Cube::load(weights_path, region.map(Region::as_tuple))?;
        data.divide(&weights).context("failed to divide by weights cube")?;
    }

    if !params.flags.is_empty() {
        let mut flagger = cubefind::Flagger::new();
        for shape in &params.flags {
            flagger.add(*shape);
        }
        flagger.apply(&mut data)?;
    }

    match &params.noise {
        NoiseScalingParameters::None => {}
        NoiseScalingParameters::Spectral { statistic, flux_range } => {
            noise::spectral_scale(&mut data, *statistic, *flux_range)?;
        }
        NoiseScalingParameters::Local {
            grid_x,
            grid_y,
            grid_z,
            window_x,
            window_y,
            window_z,
            statistic,
            flux_range,
            interpolate,
        } => {
            let coarse = noise::local_scale(
                &mut data,
                (*grid_x, *grid_y, *grid_z),
                (*window_x, *window_y, *window_z),
                *statistic,
                *flux_range,
                *interpolate,
            )?;
            let noise_path = with_suffix(&args.output, "noise.fits");
            coarse.save(&noise_path, args.overwrite)?;
        }
    }

    let scfind_config = params.scfind_config();
    let mut mask = scfind::run(&data, &scfind_config)?;

    // Reload the original, unscaled cube so the linker's sign-based
    // filtering sees true flux values rather than noise-scaled ones.
    let original = Cube::load(&args.input, region.map(Region::as_tuple))?;
    let linker_config = params.linker_config();
    let objects = cubefind::linker::run(&mut mask, Some(&original), &linker_config)?;
    tracing::info!(n_objects = objects.len(), "linker complete");

    let mask_path = with_suffix(&args.output, "mask.fits");
    mask.into_cube().save(&mask_path, args.overwrite)?;

    let catalog_path = with_suffix(&args.output, "catalog.txt");
    write_catalog(&catalog_path, &objects)?;

    Ok(())
}

fn with_suffix(stem: &std::path::Path, suffix: &str) -> PathBuf {
    let mut s = stem.as_os_str().to_owned();
    s.push(".");
    s.push(suffix);
    PathBuf::from(s)
}

/// Write a plain-text catalogue: one line per surviving object, in label
/// order, with its pixel count and bounding box.
fn write_catalog(path: &std::path::Path, objects: &cubefind::ObjectTable) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create catalogue '{}'", path.display()))?;
    let mut w = BufWriter::new(file);
    writeln!(w, "# label n_pixels x_min x_max y_min y_max z_min z_max")?;
    for obj in objects.iter() {
        writeln!(
            w,
            "{} {} {} {} {} {} {} {}",
            obj.label, obj.n_pix, obj.x_min, obj.x_max, obj.y_min, obj.y_max, obj.z_min, obj.z_max
        )?;
    }
    w.flush().context("failed to flush catalogue file")?;
    Ok(())
}
