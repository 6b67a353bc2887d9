//! The cube container: a typed sample buffer plus its FITS-flavoured
//! header, with bounds-checked voxel access and region-aware binary I/O.
//!
//! The sample buffer is modelled as an enum over six `ndarray::Array1<T>`
//! variants, so the six sample types are a compile-time distinction
//! rather than a runtime one carried alongside a raw byte buffer.

use crate::header::{Header, BLOCK_SIZE};
use crate::kernels::{self, Float};
use crate::region::Region;
use anyhow::{bail, ensure, Context, Result};
use ndarray::Array1;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// One of the six sample types a cube may be stored as, named after the
/// FITS `BITPIX` values they correspond to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl SampleType {
    fn from_bitpix(bitpix: i64) -> Result<Self> {
        Ok(match bitpix {
            8 => SampleType::I8,
            16 => SampleType::I16,
            32 => SampleType::I32,
            64 => SampleType::I64,
            -32 => SampleType::F32,
            -64 => SampleType::F64,
            other => bail!("invalid BITPIX keyword encountered: {other}"),
        })
    }

    fn bitpix(self) -> i64 {
        match self {
            SampleType::I8 => 8,
            SampleType::I16 => 16,
            SampleType::I32 => 32,
            SampleType::I64 => 64,
            SampleType::F32 => -32,
            SampleType::F64 => -64,
        }
    }

    pub fn word_size(self) -> usize {
        match self {
            SampleType::I8 => 1,
            SampleType::I16 => 2,
            SampleType::I32 => 4,
            SampleType::I64 => 8,
            SampleType::F32 => 4,
            SampleType::F64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, SampleType::F32 | SampleType::F64)
    }
}

/// Binary big-endian codec for the six sample types, used by both the
/// header-agnostic reader/writer below.
trait Sample: Copy + Default + 'static {
    const WORD_SIZE: usize;
    fn read_be(bytes: &[u8]) -> Self;
    fn write_be(self, out: &mut Vec<u8>);
}

macro_rules! impl_sample {
    ($t:ty) => {
        impl Sample for $t {
            const WORD_SIZE: usize = std::mem::size_of::<$t>();
            fn read_be(bytes: &[u8]) -> Self {
                <$t>::from_be_bytes(bytes.try_into().expect("word size mismatch"))
            }
            fn write_be(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_be_bytes());
            }
        }
    };
}

impl_sample!(i8);
impl_sample!(i16);
impl_sample!(i32);
impl_sample!(i64);
impl_sample!(f32);
impl_sample!(f64);

fn read_full<R: Read, T: Sample>(reader: &mut R, n: usize) -> Result<Array1<T>> {
    let mut raw = vec![0u8; n * T::WORD_SIZE];
    reader
        .read_exact(&mut raw)
        .context("FITS file ended unexpectedly while reading data")?;
    Ok(Array1::from_vec(
        raw.chunks_exact(T::WORD_SIZE).map(T::read_be).collect(),
    ))
}

/// Read only the rows covered by `region`, seeking row-by-row instead of
/// reading the full cube.
fn read_region<R: Read + Seek, T: Sample>(
    reader: &mut R,
    data_start: u64,
    full_nx: usize,
    full_ny: usize,
    region: &Region,
) -> Result<Array1<T>> {
    let mut out = Vec::with_capacity(region.nx() * region.ny() * region.nz());
    let mut row = vec![0u8; region.nx() * T::WORD_SIZE];

    for z in region.z_min..=region.z_max {
        for y in region.y_min..=region.y_max {
            let index = region.x_min + full_nx * (y + full_ny * z);
            reader
                .seek(SeekFrom::Start(data_start + (index * T::WORD_SIZE) as u64))
                .context("failed to seek while reading FITS region")?;
            reader
                .read_exact(&mut row)
                .context("FITS file ended unexpectedly while reading data")?;
            out.extend(row.chunks_exact(T::WORD_SIZE).map(T::read_be));
        }
    }

    Ok(Array1::from_vec(out))
}

fn write_all<W: Write, T: Sample>(writer: &mut W, data: &Array1<T>) -> Result<()> {
    let mut buf = Vec::with_capacity(data.len() * T::WORD_SIZE);
    for &v in data.iter() {
        v.write_be(&mut buf);
    }
    writer.write_all(&buf).context("failed to write FITS sample data")
}

/// The sample buffer of a [`Cube`], one flat array per sample type in
/// `x`-fastest-varying order.
#[derive(Debug, Clone)]
pub enum SampleBuffer {
    I8(Array1<i8>),
    I16(Array1<i16>),
    I32(Array1<i32>),
    I64(Array1<i64>),
    F32(Array1<f32>),
    F64(Array1<f64>),
}

impl SampleBuffer {
    fn zeros(sample_type: SampleType, n: usize) -> Self {
        match sample_type {
            SampleType::I8 => SampleBuffer::I8(Array1::zeros(n)),
            SampleType::I16 => SampleBuffer::I16(Array1::zeros(n)),
            SampleType::I32 => SampleBuffer::I32(Array1::zeros(n)),
            SampleType::I64 => SampleBuffer::I64(Array1::zeros(n)),
            SampleType::F32 => SampleBuffer::F32(Array1::zeros(n)),
            SampleType::F64 => SampleBuffer::F64(Array1::zeros(n)),
        }
    }

    fn read_full_typed<R: Read>(sample_type: SampleType, n: usize, reader: &mut R) -> Result<Self> {
        Ok(match sample_type {
            SampleType::I8 => SampleBuffer::I8(read_full(reader, n)?),
            SampleType::I16 => SampleBuffer::I16(read_full(reader, n)?),
            SampleType::I32 => SampleBuffer::I32(read_full(reader, n)?),
            SampleType::I64 => SampleBuffer::I64(read_full(reader, n)?),
            SampleType::F32 => SampleBuffer::F32(read_full(reader, n)?),
            SampleType::F64 => SampleBuffer::F64(read_full(reader, n)?),
        })
    }

    fn read_region_typed<R: Read + Seek>(
        sample_type: SampleType,
        data_start: u64,
        full_nx: usize,
        full_ny: usize,
        region: &Region,
        reader: &mut R,
    ) -> Result<Self> {
        Ok(match sample_type {
            SampleType::I8 => SampleBuffer::I8(read_region(reader, data_start, full_nx, full_ny, region)?),
            SampleType::I16 => SampleBuffer::I16(read_region(reader, data_start, full_nx, full_ny, region)?),
            SampleType::I32 => SampleBuffer::I32(read_region(reader, data_start, full_nx, full_ny, region)?),
            SampleType::I64 => SampleBuffer::I64(read_region(reader, data_start, full_nx, full_ny, region)?),
            SampleType::F32 => SampleBuffer::F32(read_region(reader, data_start, full_nx, full_ny, region)?),
            SampleType::F64 => SampleBuffer::F64(read_region(reader, data_start, full_nx, full_ny, region)?),
        })
    }

    fn write_typed<W: Write>(&self, writer: &mut W) -> Result<()> {
        match self {
            SampleBuffer::I8(a) => write_all(writer, a),
            SampleBuffer::I16(a) => write_all(writer, a),
            SampleBuffer::I32(a) => write_all(writer, a),
            SampleBuffer::I64(a) => write_all(writer, a),
            SampleBuffer::F32(a) => write_all(writer, a),
            SampleBuffer::F64(a) => write_all(writer, a),
        }
    }

    pub fn sample_type(&self) -> SampleType {
        match self {
            SampleBuffer::I8(_) => SampleType::I8,
            SampleBuffer::I16(_) => SampleType::I16,
            SampleBuffer::I32(_) => SampleType::I32,
            SampleBuffer::I64(_) => SampleType::I64,
            SampleBuffer::F32(_) => SampleType::F32,
            SampleBuffer::F64(_) => SampleType::F64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SampleBuffer::I8(a) => a.len(),
            SampleBuffer::I16(a) => a.len(),
            SampleBuffer::I32(a) => a.len(),
            SampleBuffer::I64(a) => a.len(),
            SampleBuffer::F32(a) => a.len(),
            SampleBuffer::F64(a) => a.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Coerce the sample at `i` to `f64`. NaN passes through for float
    /// buffers; integer buffers never hold NaN.
    pub fn get_flt(&self, i: usize) -> f64 {
        match self {
            SampleBuffer::I8(a) => a[i] as f64,
            SampleBuffer::I16(a) => a[i] as f64,
            SampleBuffer::I32(a) => a[i] as f64,
            SampleBuffer::I64(a) => a[i] as f64,
            SampleBuffer::F32(a) => a[i] as f64,
            SampleBuffer::F64(a) => a[i],
        }
    }

    pub fn get_int(&self, i: usize) -> i64 {
        match self {
            SampleBuffer::I8(a) => a[i] as i64,
            SampleBuffer::I16(a) => a[i] as i64,
            SampleBuffer::I32(a) => a[i] as i64,
            SampleBuffer::I64(a) => a[i],
            SampleBuffer::F32(a) => a[i] as i64,
            SampleBuffer::F64(a) => a[i] as i64,
        }
    }

    pub fn set_flt(&mut self, i: usize, v: f64) {
        match self {
            SampleBuffer::I8(a) => a[i] = v as i8,
            SampleBuffer::I16(a) => a[i] = v as i16,
            SampleBuffer::I32(a) => a[i] = v as i32,
            SampleBuffer::I64(a) => a[i] = v as i64,
            SampleBuffer::F32(a) => a[i] = v as f32,
            SampleBuffer::F64(a) => a[i] = v,
        }
    }

    pub fn set_int(&mut self, i: usize, v: i64) {
        match self {
            SampleBuffer::I8(a) => a[i] = v as i8,
            SampleBuffer::I16(a) => a[i] = v as i16,
            SampleBuffer::I32(a) => a[i] = v as i32,
            SampleBuffer::I64(a) => a[i] = v,
            SampleBuffer::F32(a) => a[i] = v as f32,
            SampleBuffer::F64(a) => a[i] = v as f64,
        }
    }
}

/// A view of a [`Cube`]'s buffer restricted to the two sample types the
/// noise scaler, S+C finder and numeric kernels operate on.
pub enum FloatView<'a> {
    F32(&'a [f32]),
    F64(&'a [f64]),
}

pub enum FloatViewMut<'a> {
    F32(&'a mut [f32]),
    F64(&'a mut [f64]),
}

/// A typed sample buffer plus its FITS-flavoured textual header.
#[derive(Debug, Clone)]
pub struct Cube {
    header: Header,
    buffer: SampleBuffer,
    nx: usize,
    ny: usize,
    nz: usize,
}

impl Cube {
    /// Allocate a zero-filled cube of the given geometry and sample type,
    /// with a minimal header.
    pub fn blank(nx: usize, ny: usize, nz: usize, sample_type: SampleType) -> Self {
        let header = Header::blank(nx, ny, nz, sample_type.bitpix() as i32);
        let buffer = SampleBuffer::zeros(sample_type, nx * ny * nz);
        Cube { header, buffer, nx, ny, nz }
    }

    /// Read only the header of a FITS-flavoured file to learn its geometry,
    /// without reading the sample buffer. Used to parse a sub-region string
    /// against a cube's full extent before deciding what to load.
    pub fn peek_geometry<P: AsRef<Path>>(path: P) -> Result<(usize, usize, usize)> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open FITS file '{}'", path.display()))?;
        let mut reader = BufReader::new(file);
        let header = Header::parse(&mut reader)
            .with_context(|| format!("failed to parse FITS header in '{}'", path.display()))?;

        let naxis = header.get_int("NAXIS");
        ensure!(
            (1..=4).contains(&naxis),
            "only FITS files with 1-4 dimensions are supported, found NAXIS={naxis}"
        );

        let nx = header.get_int("NAXIS1").max(1) as usize;
        let ny = if naxis >= 2 { header.get_int("NAXIS2").max(1) as usize } else { 1 };
        let nz = if naxis >= 3 { header.get_int("NAXIS3").max(1) as usize } else { 1 };
        Ok((nx, ny, nz))
    }

    /// Load a cube from a FITS-flavoured file, optionally restricted to an
    /// `(x_min, x_max, y_min, y_max, z_min, z_max)` sub-region in voxel
    /// coordinates. All I/O and validation failures are fatal.
    pub fn load<P: AsRef<Path>>(
        path: P,
        region: Option<(usize, usize, usize, usize, usize, usize)>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open FITS file '{}'", path.display()))?;
        let mut reader = BufReader::new(file);

        tracing::info!(path = %path.display(), "opening FITS file");
        let mut header = Header::parse(&mut reader)
            .with_context(|| format!("failed to parse FITS header in '{}'", path.display()))?;

        let bitpix = header.get_int("BITPIX");
        let sample_type = SampleType::from_bitpix(bitpix)?;

        let naxis = header.get_int("NAXIS");
        ensure!(
            (1..=4).contains(&naxis),
            "only FITS files with 1-4 dimensions are supported, found NAXIS={naxis}"
        );

        let nx = header.get_int("NAXIS1").max(1) as usize;
        let ny = if naxis >= 2 { header.get_int("NAXIS2").max(1) as usize } else { 1 };
        let nz = if naxis >= 3 { header.get_int("NAXIS3").max(1) as usize } else { 1 };
        if naxis == 4 {
            ensure!(header.get_int("NAXIS4") == 1, "the size of the 4th axis must be 1");
        }

        let bscale = header.get_flt("BSCALE");
        let bzero = header.get_flt("BZERO");
        ensure!(
            (bscale.is_nan() || bscale == 1.0) && (bzero.is_nan() || bzero == 0.0),
            "non-trivial BSCALE/BZERO are not currently supported"
        );

        tracing::info!(bitpix, naxis, nx, ny, nz, "reading FITS data");

        let (buffer, nx, ny, nz) = match region {
            None => {
                let n = nx * ny * nz;
                (SampleBuffer::read_full_typed(sample_type, n, &mut reader)?, nx, ny, nz)
            }
            Some((x_min, x_max, y_min, y_max, z_min, z_max)) => {
                let region = Region::new(x_min, x_max, y_min, y_max, z_min, z_max, nx, ny, nz)?;
                let data_start = reader.stream_position()?;
                let buffer =
                    SampleBuffer::read_region_typed(sample_type, data_start, nx, ny, &region, &mut reader)?;

                if header.check("NAXIS1").is_some() {
                    header.put_int("NAXIS1", region.nx() as i64);
                }
                if header.check("NAXIS2").is_some() {
                    header.put_int("NAXIS2", region.ny() as i64);
                }
                if header.check("NAXIS3").is_some() {
                    header.put_int("NAXIS3", region.nz() as i64);
                }
                if header.check("CRPIX1").is_some() {
                    header.put_flt("CRPIX1", header.get_flt("CRPIX1") - region.x_min as f64);
                }
                if header.check("CRPIX2").is_some() {
                    header.put_flt("CRPIX2", header.get_flt("CRPIX2") - region.y_min as f64);
                }
                if header.check("CRPIX3").is_some() {
                    header.put_flt("CRPIX3", header.get_flt("CRPIX3") - region.z_min as f64);
                }

                (buffer, region.nx(), region.ny(), region.nz())
            }
        };

        Ok(Cube { header, buffer, nx, ny, nz })
    }

    /// Write header and sample data, padded to a `2880`-byte boundary.
    /// Fails if `path` exists and `overwrite` is `false`.
    pub fn save<P: AsRef<Path>>(&self, path: P, overwrite: bool) -> Result<()> {
        let path = path.as_ref();
        let file = if overwrite {
            File::create(path)
        } else {
            OpenOptions::new().write(true).create_new(true).open(path)
        }
        .with_context(|| format!("failed to create FITS file '{}' (does it already exist?)", path.display()))?;

        tracing::info!(path = %path.display(), "creating FITS file");
        let mut writer = BufWriter::new(file);
        self.header.write(&mut writer)?;
        self.buffer.write_typed(&mut writer)?;

        let data_bytes = self.buffer.len() * self.buffer.sample_type().word_size();
        let padding = (BLOCK_SIZE - data_bytes % BLOCK_SIZE) % BLOCK_SIZE;
        if padding > 0 {
            writer
                .write_all(&vec![0u8; padding])
                .context("failed to pad FITS file to a block boundary")?;
        }
        writer.flush().context("failed to flush FITS file")?;
        Ok(())
    }

    pub fn nx(&self) -> usize {
        self.nx
    }

    pub fn ny(&self) -> usize {
        self.ny
    }

    pub fn nz(&self) -> usize {
        self.nz
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn sample_type(&self) -> SampleType {
        self.buffer.sample_type()
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    pub fn get_index(&self, x: usize, y: usize, z: usize) -> Result<usize> {
        ensure!(
            x < self.nx && y < self.ny && z < self.nz,
            "voxel ({x}, {y}, {z}) out of bounds for cube of size ({}, {}, {})",
            self.nx,
            self.ny,
            self.nz
        );
        Ok(x + self.nx * (y + self.ny * z))
    }

    pub fn get_flt(&self, x: usize, y: usize, z: usize) -> Result<f64> {
        Ok(self.buffer.get_flt(self.get_index(x, y, z)?))
    }

    pub fn get_int(&self, x: usize, y: usize, z: usize) -> Result<i64> {
        Ok(self.buffer.get_int(self.get_index(x, y, z)?))
    }

    pub fn set_flt(&mut self, x: usize, y: usize, z: usize, v: f64) -> Result<()> {
        let i = self.get_index(x, y, z)?;
        self.buffer.set_flt(i, v);
        Ok(())
    }

    pub fn set_int(&mut self, x: usize, y: usize, z: usize, v: i64) -> Result<()> {
        let i = self.get_index(x, y, z)?;
        self.buffer.set_int(i, v);
        Ok(())
    }

    /// Borrow the buffer as a float slice, failing if the cube holds
    /// integer samples.
    pub fn float_data(&self) -> Result<FloatView<'_>> {
        match &self.buffer {
            SampleBuffer::F32(a) => Ok(FloatView::F32(a.as_slice().expect("buffer not contiguous"))),
            SampleBuffer::F64(a) => Ok(FloatView::F64(a.as_slice().expect("buffer not contiguous"))),
            _ => bail!("operation requires a floating-point sample cube, found {:?}", self.sample_type()),
        }
    }

    pub fn float_data_mut(&mut self) -> Result<FloatViewMut<'_>> {
        match &mut self.buffer {
            SampleBuffer::F32(a) => Ok(FloatViewMut::F32(a.as_slice_mut().expect("buffer not contiguous"))),
            SampleBuffer::F64(a) => Ok(FloatViewMut::F64(a.as_slice_mut().expect("buffer not contiguous"))),
            _ => bail!("operation requires a floating-point sample cube, found {:?}", self.sample_type()),
        }
    }

    /// Borrow the buffer as a flat `i32` slice, failing if the cube does
    /// not hold 32-bit integer samples. Used by the mask container and the
    /// linker, which both walk the mask in place for performance.
    pub fn int32_data(&self) -> Result<&[i32]> {
        match &self.buffer {
            SampleBuffer::I32(a) => Ok(a.as_slice().expect("buffer not contiguous")),
            _ => bail!("operation requires an I32 sample cube, found {:?}", self.sample_type()),
        }
    }

    pub fn int32_data_mut(&mut self) -> Result<&mut [i32]> {
        match &mut self.buffer {
            SampleBuffer::I32(a) => Ok(a.as_slice_mut().expect("buffer not contiguous")),
            _ => bail!("operation requires an I32 sample cube, found {:?}", self.sample_type()),
        }
    }

    /// Element-wise divide by `other`, preserving NaN where `other` is zero
    /// or NaN. Both cubes must share the same geometry.
    pub fn divide(&mut self, other: &Cube) -> Result<()> {
        ensure!(
            self.nx == other.nx && self.ny == other.ny && self.nz == other.nz,
            "cube and divisor have mismatched geometry: ({}, {}, {}) vs ({}, {}, {})",
            self.nx,
            self.ny,
            self.nz,
            other.nx,
            other.ny,
            other.nz
        );

        for i in 0..self.buffer.len() {
            let d = other.buffer.get_flt(i);
            let result = if d == 0.0 || d.is_nan() {
                f64::NAN
            } else {
                self.buffer.get_flt(i) / d
            };
            self.buffer.set_flt(i, result);
        }
        Ok(())
    }

    /// Apply a 1-D boxcar filter of the given radius along the spectral
    /// axis to every spatial pixel's spectrum. Each spectrum is extracted
    /// into a contiguous scratch buffer first since the flat sample buffer
    /// strides by `nx * ny` along `z`, not contiguously.
    pub fn boxcar(&mut self, radius: usize) -> Result<()> {
        match self.float_data_mut()? {
            FloatViewMut::F32(data) => boxcar_spectral(data, self.nx, self.ny, self.nz, radius),
            FloatViewMut::F64(data) => boxcar_spectral(data, self.nx, self.ny, self.nz, radius),
        }
        Ok(())
    }

    /// Apply a separable 2-D Gaussian of the given sigma to every spatial
    /// plane.
    pub fn gaussian(&mut self, sigma: f64) -> Result<()> {
        ensure!(sigma >= 1.5, "Gaussian sigma must be >= 1.5, got {sigma}");
        let (radius, n_iter) = kernels::optimal_filter_size(sigma);
        match self.float_data_mut()? {
            FloatViewMut::F32(data) => gaussian_spatial(data, self.nx, self.ny, self.nz, radius, n_iter),
            FloatViewMut::F64(data) => gaussian_spatial(data, self.nx, self.ny, self.nz, radius, n_iter),
        }
        Ok(())
    }
}

fn boxcar_spectral<T: Float>(data: &mut [T], nx: usize, ny: usize, nz: usize, radius: usize) {
    let mut spectrum = vec![T::zero(); nz];
    for y in 0..ny {
        for x in 0..nx {
            for (z, slot) in spectrum.iter_mut().enumerate() {
                *slot = data[x + nx * (y + ny * z)];
            }
            kernels::boxcar_1d(&mut spectrum, radius);
            for (z, &v) in spectrum.iter().enumerate() {
                data[x + nx * (y + ny * z)] = v;
            }
        }
    }
}

fn gaussian_spatial<T: Float>(data: &mut [T], nx: usize, ny: usize, nz: usize, radius: usize, n_iter: usize) {
    let plane_size = nx * ny;
    for z in 0..nz {
        let plane = &mut data[z * plane_size..(z + 1) * plane_size];
        kernels::gaussian_2d(plane, nx, ny, radius, n_iter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cube() -> Cube {
        let mut cube = Cube::blank(4, 3, 2, SampleType::F32);
        let mut v = 0.0;
        for z in 0..2 {
            for y in 0..3 {
                for x in 0..4 {
                    cube.set_flt(x, y, z, v).unwrap();
                    v += 1.0;
                }
            }
        }
        cube
    }

    #[test]
    fn blank_cube_has_expected_geometry_and_zeros() {
        let cube = Cube::blank(4, 3, 2, SampleType::F64);
        assert_eq!((cube.nx(), cube.ny(), cube.nz()), (4, 3, 2));
        assert_eq!(cube.len(), 24);
        assert_eq!(cube.get_flt(1, 1, 1).unwrap(), 0.0);
    }

    #[test]
    fn get_index_is_x_fastest_varying() {
        let cube = sample_cube();
        assert_eq!(cube.get_index(0, 0, 0).unwrap(), 0);
        assert_eq!(cube.get_index(1, 0, 0).unwrap(), 1);
        assert_eq!(cube.get_index(0, 1, 0).unwrap(), 4);
        assert_eq!(cube.get_index(0, 0, 1).unwrap(), 12);
    }

    #[test]
    fn out_of_bounds_access_is_an_error() {
        let cube = sample_cube();
        assert!(cube.get_flt(4, 0, 0).is_err());
    }

    #[test]
    fn save_then_load_round_trips_samples_and_header() {
        let cube = sample_cube();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cube.fits");
        cube.save(&path, false).unwrap();

        let loaded = Cube::load(&path, None).unwrap();
        assert_eq!((loaded.nx(), loaded.ny(), loaded.nz()), (4, 3, 2));
        for z in 0..2 {
            for y in 0..3 {
                for x in 0..4 {
                    assert_eq!(loaded.get_flt(x, y, z).unwrap(), cube.get_flt(x, y, z).unwrap());
                }
            }
        }
    }

    #[test]
    fn save_without_overwrite_fails_on_existing_file() {
        let cube = sample_cube();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cube.fits");
        cube.save(&path, false).unwrap();
        assert!(cube.save(&path, false).is_err());
        assert!(cube.save(&path, true).is_ok());
    }

    #[test]
    fn load_rejects_non_trivial_bscale() {
        let mut cube = sample_cube();
        cube.header_mut().put_flt("BSCALE", 2.0);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cube.fits");
        cube.save(&path, false).unwrap();
        assert!(Cube::load(&path, None).is_err());
    }

    #[test]
    fn load_with_region_reads_only_the_sub_cube_and_shifts_crpix() {
        let mut cube = sample_cube();
        cube.header_mut().put_flt("CRPIX1", 2.0);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cube.fits");
        cube.save(&path, false).unwrap();

        let region = Cube::load(&path, Some((1, 2, 0, 1, 0, 1))).unwrap();
        assert_eq!((region.nx(), region.ny(), region.nz()), (2, 2, 2));
        assert_eq!(region.get_flt(0, 0, 0).unwrap(), cube.get_flt(1, 0, 0).unwrap());
        assert_eq!(region.header().get_flt("CRPIX1"), 1.0);
    }

    #[test]
    fn divide_preserves_nan_on_zero_or_nan_divisor() {
        let mut a = Cube::blank(2, 1, 1, SampleType::F64);
        a.set_flt(0, 0, 0, 10.0).unwrap();
        a.set_flt(1, 0, 0, 20.0).unwrap();

        let mut b = Cube::blank(2, 1, 1, SampleType::F64);
        b.set_flt(0, 0, 0, 2.0).unwrap();
        b.set_flt(1, 0, 0, 0.0).unwrap();

        a.divide(&b).unwrap();
        assert_eq!(a.get_flt(0, 0, 0).unwrap(), 5.0);
        assert!(a.get_flt(1, 0, 0).unwrap().is_nan());
    }

    #[test]
    fn boxcar_smooths_along_the_spectral_axis() {
        let mut cube = Cube::blank(1, 1, 5, SampleType::F32);
        cube.set_flt(0, 0, 2, 10.0).unwrap();
        cube.boxcar(1).unwrap();
        assert!(cube.get_flt(0, 0, 2).unwrap() < 10.0);
        assert!(cube.get_flt(0, 0, 2).unwrap() > 0.0);
    }

    #[test]
    fn gaussian_rejects_sigma_below_minimum() {
        let mut cube = Cube::blank(8, 8, 1, SampleType::F32);
        assert!(cube.gaussian(1.0).is_err());
    }
}
