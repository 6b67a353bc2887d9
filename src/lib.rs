//! cubefind: a multi-scale Smooth-and-Clip source finder for spectral-line
//! image cubes.
//!
//! The crate is organised the way the upstream source finder is: a cube
//! container with FITS-flavoured header and sample I/O, an integer mask
//! cube, a family of NaN-safe numeric kernels the finder and noise scaler
//! build on, a noise scaler, the Smooth-and-Clip (S+C) finder itself, and a
//! connected-component linker. Everything here runs single-threaded and
//! synchronously on one cube at a time; nothing is shared across threads.

pub mod config;
pub mod cube;
pub mod error;
pub mod flagger;
pub mod header;
pub mod kernels;
pub mod linker;
pub mod mask;
pub mod noise;
pub mod region;
pub mod scfind;

pub use config::Parameters;
pub use cube::{Cube, SampleType};
pub use flagger::{FlagShape, Flagger};
pub use linker::{LinkerConfig, ObjectRecord, ObjectTable};
pub use mask::Mask;
pub use region::Region;
pub use scfind::ScfindConfig;
