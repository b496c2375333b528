use std::path::{Path, PathBuf};

use log::{debug, info};
use ndarray::{Array2, Axis};
use serde::Serialize;

use crate::config::UnmixConfig;
use crate::data::endmember::{EndMember, EndMemberGroup};
use crate::data::spectrum::{ImageCube, Spectrum};
use crate::error::{Error, Result};
use crate::unmix::{unmix_spectral_cube, MixedCube, UnMixedCube};

/// Intensity of the virtual shade endmember.
pub const SHADE_LEVEL: f64 = 0.001;

// ---------------------------------------------------------------------------
// Model state
// ---------------------------------------------------------------------------

/// Which virtual endmembers a model holds, plus its roster size.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelState {
    pub has_reflector: bool,
    pub has_shade: bool,
    pub has_blackbody: bool,
    pub endmember_count: usize,
}

// ---------------------------------------------------------------------------
// MixtureModel – roster builder and run
// ---------------------------------------------------------------------------

/// A data cube and the endmember roster it will be unmixed against.
///
/// Cloning copies the roster and its state together.
#[derive(Debug, Clone)]
pub struct MixtureModel {
    endmembers: Vec<EndMember>,
    cube: ImageCube,
    state: ModelState,
}

impl MixtureModel {
    /// Start a model from an initial roster. Names must be unique.
    pub fn new(endmembers: Vec<EndMember>, cube: ImageCube) -> Result<Self> {
        let mut model = MixtureModel {
            endmembers: Vec::with_capacity(endmembers.len()),
            cube,
            state: ModelState::default(),
        };
        for em in endmembers {
            model.add_endmember(em)?;
        }
        Ok(model)
    }

    pub fn endmembers(&self) -> &[EndMember] {
        &self.endmembers
    }

    pub fn state(&self) -> &ModelState {
        &self.state
    }

    pub fn cube(&self) -> &ImageCube {
        &self.cube
    }

    /// Append an endmember; a name already on the roster is rejected.
    pub fn add_endmember(&mut self, endmember: EndMember) -> Result<()> {
        if self.endmembers.iter().any(|em| em.name() == endmember.name()) {
            return Err(Error::DuplicateEndmember(endmember.name().to_string()));
        }
        debug!("adding endmember '{}'", endmember.name());
        self.endmembers.push(endmember);
        self.state.endmember_count += 1;
        Ok(())
    }

    fn add_virtual(&mut self, name: &str, level: f64) -> Result<()> {
        let spectrum = Spectrum::constant(level, self.cube.wvl());
        self.add_endmember(EndMember::virtual_member(name, spectrum))
    }

    /// Add a flat unit reflector. Does nothing if one is already present.
    pub fn add_virtual_reflector(&mut self) -> Result<()> {
        if self.state.has_reflector {
            return Ok(());
        }
        self.add_virtual("Reflector", 1.0)?;
        self.state.has_reflector = true;
        Ok(())
    }

    /// Add a flat shade endmember. Fails if shade was already added.
    pub fn add_virtual_shade(&mut self) -> Result<()> {
        if self.state.has_shade {
            return Err(Error::VirtualAlreadyExists("shade"));
        }
        self.add_virtual("Shade", SHADE_LEVEL)?;
        self.state.has_shade = true;
        Ok(())
    }

    /// Add a flat unit blackbody. Fails if one was already added.
    pub fn add_virtual_blackbody(&mut self) -> Result<()> {
        if self.state.has_blackbody {
            return Err(Error::VirtualAlreadyExists("blackbody"));
        }
        self.add_virtual("Blackbody", 1.0)?;
        self.state.has_blackbody = true;
        Ok(())
    }

    /// Unmix the cube with the sum-to-one constraint.
    pub fn run(&self, destination: impl AsRef<Path>, model_id: &str) -> Result<ModelResult> {
        self.run_with(destination, model_id, &UnmixConfig::default())
    }

    /// Unmix the cube against the current roster, in roster order.
    pub fn run_with(
        &self,
        destination: impl AsRef<Path>,
        model_id: &str,
        config: &UnmixConfig,
    ) -> Result<ModelResult> {
        let endmembers = EndMemberGroup::from_endmembers(self.endmembers.clone())?;
        let mixed = MixedCube::new(endmembers.matrix().to_owned(), self.cube.data().to_owned())?;
        let unmixed = unmix_spectral_cube(&mixed, config.add_to_one)?;
        let residual_norm = residual_norm(&unmixed);

        info!(
            "model '{model_id}': {} endmembers over {}x{} px",
            endmembers.len(),
            self.cube.height(),
            self.cube.width()
        );

        Ok(ModelResult {
            destination: destination.as_ref().to_path_buf(),
            model_id: model_id.to_string(),
            unmixed,
            endmembers,
            residual_norm,
        })
    }
}

/// Euclidean norm over bands of the signed residual, per pixel.
pub fn residual_norm(unmixed: &UnMixedCube) -> Array2<f64> {
    unmixed
        .res()
        .mapv(|r| r * r)
        .sum_axis(Axis(2))
        .mapv_into(f64::sqrt)
}

// ---------------------------------------------------------------------------
// ModelResult – packaged output of a run
// ---------------------------------------------------------------------------

/// Everything a run produced, ready to be saved or displayed.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResult {
    /// Container file the result is destined for (not written by `run`).
    pub destination: PathBuf,
    pub model_id: String,
    pub unmixed: UnMixedCube,
    pub endmembers: EndMemberGroup,
    /// Per-pixel L2 norm of the residual spectrum.
    ///
    /// This is a residual magnitude, not a coefficient of determination,
    /// even though older files call the field "rsquared".
    pub residual_norm: Array2<f64>,
}

impl ModelResult {
    pub fn summary(&self) -> ModelSummary {
        let fractions = self.unmixed.fractions();
        let endmembers = self
            .endmembers
            .names()
            .iter()
            .enumerate()
            .map(|(i, name)| EndMemberSummary {
                name: name.clone(),
                mean_fraction: fractions.index_axis(Axis(2), i).mean().unwrap_or(f64::NAN),
            })
            .collect();

        ModelSummary {
            model_id: self.model_id.clone(),
            height: self.unmixed.height(),
            width: self.unmixed.width(),
            bands: self.unmixed.bands(),
            constrained: self.unmixed.is_constrained(),
            endmembers,
            residual_norm: NormStats::of(self.residual_norm.iter().copied()),
        }
    }
}

/// Compact, serializable description of a [`ModelResult`].
#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub model_id: String,
    pub height: usize,
    pub width: usize,
    pub bands: usize,
    pub constrained: bool,
    pub endmembers: Vec<EndMemberSummary>,
    pub residual_norm: NormStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct EndMemberSummary {
    pub name: String,
    pub mean_fraction: f64,
}

/// Extrema and mean over the finite values of a map.
#[derive(Debug, Clone, Serialize)]
pub struct NormStats {
    pub min: f64,
    pub mean: f64,
    pub max: f64,
}

impl NormStats {
    fn of(values: impl Iterator<Item = f64>) -> Self {
        let (mut min, mut max) = (f64::INFINITY, f64::NEG_INFINITY);
        let (mut sum, mut count) = (0.0, 0usize);
        for v in values.filter(|v| v.is_finite()) {
            min = min.min(v);
            max = max.max(v);
            sum += v;
            count += 1;
        }
        if count == 0 {
            return NormStats {
                min: f64::NAN,
                mean: f64::NAN,
                max: f64::NAN,
            };
        }
        NormStats {
            min,
            mean: sum / count as f64,
            max,
        }
    }
}
