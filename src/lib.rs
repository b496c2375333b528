//! Linear spectral mixture analysis for hyperspectral image cubes.
//!
//! Given reference spectra ("endmembers"), every pixel of a cube is
//! decomposed into endmember fractions by a closed-form least-squares solve,
//! optionally constrained so the fractions sum to one.
//!
//! ```no_run
//! use hypmix::{EndMember, ImageCube, MixtureModel, Spectrum};
//! use ndarray::Array3;
//!
//! # fn main() -> anyhow::Result<()> {
//! let wvl = vec![450.0, 550.0, 650.0];
//! // bands × rows × cols; moved band-last on construction
//! let cube = ImageCube::new(Array3::from_elem((3, 8, 8), 0.2), wvl.clone())?;
//!
//! let soil = EndMember::new("soil", Spectrum::new(vec![0.2, 0.3, 0.4], wvl.clone())?);
//! let grass = EndMember::in_scene("grass", Spectrum::new(vec![0.05, 0.4, 0.1], wvl)?, (2, 5));
//!
//! let mut model = MixtureModel::new(vec![soil, grass], cube)?;
//! model.add_virtual_shade()?;
//! let result = model.run("scene.parquet", "soil-grass-shade")?;
//! assert_eq!(result.unmixed.fractions().shape(), &[8, 8, 3]);
//! hypmix::io::save_model_result(&result)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod io;
pub mod model;
pub mod render;
pub mod unmix;

pub use data::endmember::{read_endmember_set, EndMember, EndMemberGroup, Provenance};
pub use data::spectrum::{CubeLayout, ImageCube, Spectrum};
pub use error::{Error, Result};
pub use model::{MixtureModel, ModelResult, ModelState, ModelSummary};
pub use unmix::{unmix_spectral_cube, MixedCube, UnMixedCube};
