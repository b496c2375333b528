//! Closed-form linear unmixing of a whole cube.
//!
//! Every pixel spectrum `d_p` is decomposed against the design matrix `G`
//! (bands × endmembers). One projection is built per cube and applied to
//! all pixels in a single matrix product:
//!
//! ```text
//! unconstrained:  f_p = (GᵗG)⁻¹ Gᵗ d_p
//!
//! sum-to-one:     ┌ GᵗG  1 ┐ ┌ f_p ┐   ┌ Gᵗd_p ┐
//!                 └ 1ᵗ   0 ┘ └ μ_p ┘ = └   1   ┘
//! ```
//!
//! Both are evaluated through the SVD `G = U Σ Vᵗ` rather than by inverting
//! `GᵗG`. With `w = (GᵗG)⁻¹ 1 = V Σ⁻² Vᵗ 1` and `s = 1ᵗw` the bordered
//! system reduces to `μ_p = (1ᵗ f_u − 1) / s` and `f_p = f_u − μ_p w`, where
//! `f_u` is the unconstrained solution.
//!
//! `μ_p` is a Lagrange multiplier. It is kept as the last fraction column
//! but is not a proportion.

use std::time::Instant;

use log::debug;
use nalgebra::DMatrix;
use ndarray::{concatenate, s, Array1, Array2, Array3, ArrayView2, ArrayView3, Axis};

use crate::error::{Error, Result};

/// Smallest accepted ratio of the smallest to the largest singular value
/// of `G`. Below it the design is treated as rank deficient.
const RANK_TOLERANCE: f64 = 1e-10;

// ---------------------------------------------------------------------------
// Solver input / output
// ---------------------------------------------------------------------------

/// Design matrix plus the band-last data cube it is solved against.
#[derive(Debug, Clone)]
pub struct MixedCube {
    g: Array2<f64>,
    d: Array3<f64>,
}

impl MixedCube {
    pub fn new(g: Array2<f64>, d: Array3<f64>) -> Result<Self> {
        let bands = d.shape()[2];
        if g.nrows() != bands {
            return Err(Error::LengthMismatch {
                what: "design matrix rows",
                expected: bands,
                actual: g.nrows(),
            });
        }
        let d = if d.is_standard_layout() {
            d
        } else {
            d.as_standard_layout().into_owned()
        };
        Ok(MixedCube { g, d })
    }

    /// Design matrix, `bands × endmembers`.
    pub fn g(&self) -> ArrayView2<'_, f64> {
        self.g.view()
    }

    pub fn d(&self) -> ArrayView3<'_, f64> {
        self.d.view()
    }
}

/// Result of unmixing a cube.
#[derive(Debug, Clone, PartialEq)]
pub struct UnMixedCube {
    model: Array3<f64>,
    fracs: Array3<f64>,
    res: Array3<f64>,
    constrained: bool,
}

impl UnMixedCube {
    /// Reassemble a result from its cubes, checking they agree on shape.
    pub fn from_parts(
        model: Array3<f64>,
        fracs: Array3<f64>,
        res: Array3<f64>,
        constrained: bool,
    ) -> Result<Self> {
        if model.shape() != res.shape() || model.shape()[..2] != fracs.shape()[..2] {
            return Err(Error::Shape(format!(
                "model {:?}, fractions {:?} and residuals {:?} disagree",
                model.shape(),
                fracs.shape(),
                res.shape()
            )));
        }
        if constrained && fracs.shape()[2] == 0 {
            return Err(Error::Shape("constrained fractions lack the multiplier column".into()));
        }
        Ok(UnMixedCube {
            model,
            fracs,
            res,
            constrained,
        })
    }

    /// Reconstructed spectra, `H × W × bands`.
    pub fn model(&self) -> ArrayView3<'_, f64> {
        self.model.view()
    }

    /// Raw solution vectors, including the multiplier column when
    /// the sum-to-one constraint was applied.
    pub fn fracs(&self) -> ArrayView3<'_, f64> {
        self.fracs.view()
    }

    /// Signed residual `model − data`, `H × W × bands`.
    pub fn res(&self) -> ArrayView3<'_, f64> {
        self.res.view()
    }

    pub fn is_constrained(&self) -> bool {
        self.constrained
    }

    pub fn n_endmembers(&self) -> usize {
        self.fracs.shape()[2] - usize::from(self.constrained)
    }

    pub fn height(&self) -> usize {
        self.model.shape()[0]
    }

    pub fn width(&self) -> usize {
        self.model.shape()[1]
    }

    pub fn bands(&self) -> usize {
        self.model.shape()[2]
    }

    /// Endmember fractions only, `H × W × k`.
    pub fn fractions(&self) -> ArrayView3<'_, f64> {
        self.fracs.slice(s![.., .., ..self.n_endmembers()])
    }

    /// Per-pixel Lagrange multiplier of the sum-to-one constraint.
    pub fn lagrange_multiplier(&self) -> Option<ArrayView2<'_, f64>> {
        self.constrained
            .then(|| self.fracs.index_axis(Axis(2), self.n_endmembers()))
    }
}

// ---------------------------------------------------------------------------
// Solve
// ---------------------------------------------------------------------------

/// Affine per-pixel map `f = matrix · d + offset`.
struct Projection {
    matrix: Array2<f64>,
    offset: Array1<f64>,
}

fn projection(g: ArrayView2<'_, f64>, add_to_one: bool) -> Result<Projection> {
    let (bands, k) = g.dim();
    if k == 0 {
        return Err(Error::EmptyDesignMatrix);
    }
    if k > bands {
        return Err(Error::Underdetermined { endmembers: k, bands });
    }

    // V Σ⁻¹, so that P = (V Σ⁻¹) Uᵗ and (GᵗG)⁻¹ = (V Σ⁻¹)(V Σ⁻¹)ᵗ.
    let (u, v_scaled) = scaled_svd(g)?;
    let pseudo_inverse = v_scaled.dot(&u.t());
    if !add_to_one {
        return Ok(Projection {
            matrix: pseudo_inverse,
            offset: Array1::zeros(k),
        });
    }

    let w = v_scaled.dot(&v_scaled.t()).sum_axis(Axis(1));
    let w_sum = w.sum();
    if !w_sum.is_finite() || w_sum <= 0.0 {
        return Err(Error::SingularDesign);
    }
    // 1ᵗP: maps a pixel to the sum of its unconstrained fractions.
    let total = pseudo_inverse.sum_axis(Axis(0));
    let correction = w
        .view()
        .insert_axis(Axis(1))
        .dot(&total.view().insert_axis(Axis(0)))
        / w_sum;
    let fractions = pseudo_inverse - correction;
    let multiplier = &total / w_sum;

    Ok(Projection {
        matrix: concatenate(
            Axis(0),
            &[fractions.view(), multiplier.view().insert_axis(Axis(0))],
        )?,
        offset: w.iter().map(|wi| wi / w_sum).chain([-1.0 / w_sum]).collect(),
    })
}

/// `U` (bands × k) and `V Σ⁻¹` (k × k) of the thin SVD of `g`.
fn scaled_svd(g: ArrayView2<'_, f64>) -> Result<(Array2<f64>, Array2<f64>)> {
    let (bands, k) = g.dim();
    let svd = DMatrix::from_fn(bands, k, |i, j| g[[i, j]]).svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Err(Error::SingularDesign);
    };

    let sigma = &svd.singular_values;
    let largest = sigma.iter().copied().fold(0.0, f64::max);
    let smallest = sigma.iter().copied().fold(f64::INFINITY, f64::min);
    if !largest.is_finite() || largest == 0.0 || smallest <= RANK_TOLERANCE * largest {
        debug!("rank deficient design: singular values {smallest:e}..{largest:e}");
        return Err(Error::SingularDesign);
    }

    let u = Array2::from_shape_fn((bands, k), |(i, j)| u[(i, j)]);
    let v_scaled = Array2::from_shape_fn((k, k), |(i, j)| v_t[(j, i)] / sigma[j]);
    Ok((u, v_scaled))
}

/// Unmix every pixel of `mixed` against its design matrix.
///
/// With `add_to_one` the first `k` fractions of each pixel sum to one and
/// `fracs` carries one extra column holding the Lagrange multiplier.
/// Fractions are never clamped; negative or >1 values signal a poor fit.
pub fn unmix_spectral_cube(mixed: &MixedCube, add_to_one: bool) -> Result<UnMixedCube> {
    let started = Instant::now();
    let g = mixed.g();
    let (height, width, bands) = mixed.d.dim();
    let k = g.ncols();

    let projection = projection(g, add_to_one)?;

    let pixels = mixed.d.view().into_shape_with_order((height * width, bands))?;
    let mut fracs = pixels.dot(&projection.matrix.t());
    fracs += &projection.offset;
    let model = fracs.slice(s![.., ..k]).dot(&g.t());
    let res = &model - &pixels;

    let n_fracs = fracs.ncols();
    let result = UnMixedCube {
        model: model.into_shape_with_order((height, width, bands))?,
        fracs: fracs.into_shape_with_order((height, width, n_fracs))?,
        res: res.into_shape_with_order((height, width, bands))?,
        constrained: add_to_one,
    };
    debug!(
        "unmixed {height}x{width} px, {bands} bands, {k} endmembers \
         (sum-to-one: {add_to_one}) in {:.2?}",
        started.elapsed()
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array3};

    const TOL: f64 = 1e-10;

    fn unit_pair() -> Array2<f64> {
        array![
            [1.0, 0.0],
            [0.0, 1.0],
            [0.0, 0.0],
            [0.0, 0.0],
            [0.0, 0.0]
        ]
    }

    fn single_pixel(values: &[f64]) -> Array3<f64> {
        Array3::from_shape_vec((1, 1, values.len()), values.to_vec()).unwrap()
    }

    #[test]
    fn unconstrained_recovers_exact_mixture() {
        let mixed = MixedCube::new(unit_pair(), single_pixel(&[0.5, 0.5, 0.0, 0.0, 0.0])).unwrap();
        let out = unmix_spectral_cube(&mixed, false).unwrap();

        assert!(!out.is_constrained());
        assert_eq!(out.fracs().shape(), &[1, 1, 2]);
        assert!((out.fracs()[[0, 0, 0]] - 0.5).abs() < TOL);
        assert!((out.fracs()[[0, 0, 1]] - 0.5).abs() < TOL);
        assert!(out.res().iter().all(|r| r.abs() < TOL));
        assert!(out.lagrange_multiplier().is_none());
    }

    #[test]
    fn constrained_consistent_mixture_has_zero_residual() {
        let mixed = MixedCube::new(unit_pair(), single_pixel(&[0.5, 0.5, 0.0, 0.0, 0.0])).unwrap();
        let out = unmix_spectral_cube(&mixed, true).unwrap();

        assert_eq!(out.fracs().shape(), &[1, 1, 3]);
        assert_eq!(out.fractions().shape(), &[1, 1, 2]);
        assert!((out.fractions().sum() - 1.0).abs() < TOL);
        assert!(out.res().iter().all(|r| r.abs() < TOL));
        let mu = out.lagrange_multiplier().unwrap();
        assert!(mu[[0, 0]].abs() < TOL);
    }

    #[test]
    fn constrained_inconsistent_mixture_is_projected_onto_the_constraint() {
        let mixed = MixedCube::new(unit_pair(), single_pixel(&[0.9, 0.3, 0.2, 0.1, 0.0])).unwrap();
        let out = unmix_spectral_cube(&mixed, true).unwrap();

        let f = out.fractions();
        assert!((f[[0, 0, 0]] - 0.8).abs() < TOL);
        assert!((f[[0, 0, 1]] - 0.2).abs() < TOL);
        assert!((out.lagrange_multiplier().unwrap()[[0, 0]] - 0.1).abs() < TOL);

        let expected_res = [-0.1, -0.1, -0.2, -0.1, 0.0];
        for (r, e) in out.res().iter().zip(expected_res) {
            assert!((r - e).abs() < TOL, "{r} != {e}");
        }
    }

    #[test]
    fn output_shapes_follow_input_cube() {
        let g = array![[1.0, 0.2, 0.0], [0.5, 0.9, 0.1], [0.1, 0.4, 1.0], [0.3, 0.3, 0.3]];
        let d = Array3::from_shape_fn((3, 4, 4), |(r, c, b)| {
            ((r * 7 + c * 3 + b) % 5) as f64 / 5.0
        });
        let mixed = MixedCube::new(g, d).unwrap();

        let constrained = unmix_spectral_cube(&mixed, true).unwrap();
        assert_eq!(constrained.model().shape(), &[3, 4, 4]);
        assert_eq!(constrained.res().shape(), &[3, 4, 4]);
        assert_eq!(constrained.fracs().shape(), &[3, 4, 4]);
        assert_eq!(constrained.n_endmembers(), 3);

        let free = unmix_spectral_cube(&mixed, false).unwrap();
        assert_eq!(free.fracs().shape(), &[3, 4, 3]);
        assert_eq!(free.model().shape(), &[3, 4, 4]);
    }

    #[test]
    fn dependent_endmembers_are_singular() {
        let g = array![[1.0, 1.0], [1.0, 1.0], [1.0, 1.0]];
        let mixed = MixedCube::new(g, Array3::zeros((2, 2, 3))).unwrap();
        assert_eq!(unmix_spectral_cube(&mixed, false).unwrap_err(), Error::SingularDesign);
        assert_eq!(unmix_spectral_cube(&mixed, true).unwrap_err(), Error::SingularDesign);
    }

    #[test]
    fn near_collinear_endmembers_are_still_solved() {
        // Instrument-count scale spectra that differ by well under 1%.
        let bands = 50;
        let base = |b: usize| 1000.0 + 500.0 * (b as f64 / 7.0).sin();
        let g = Array2::from_shape_fn((bands, 3), |(b, j)| match j {
            0 => base(b),
            1 => 1.01 * base(b) + 3.0 * (b as f64 / 5.0).cos(),
            _ => 1.005 * base(b) + 1.5 * (b as f64 / 5.0).cos() + 0.5 * (1.3 * b as f64).sin(),
        });
        let d = Array3::from_shape_fn((1, 1, bands), |(_, _, b)| 0.3 * g[[b, 0]] + 0.7 * g[[b, 1]]);
        let mixed = MixedCube::new(g, d).unwrap();

        for add_to_one in [false, true] {
            let out = unmix_spectral_cube(&mixed, add_to_one).unwrap();
            let f = out.fractions();
            assert!((f[[0, 0, 0]] - 0.3).abs() < 1e-6, "{f:?}");
            assert!((f[[0, 0, 1]] - 0.7).abs() < 1e-6, "{f:?}");
            assert!(f[[0, 0, 2]].abs() < 1e-6, "{f:?}");
            assert!(out.res().iter().all(|r| r.abs() < 1e-6));
        }
    }

    #[test]
    fn more_endmembers_than_bands_is_rejected() {
        let g = Array2::from_elem((2, 3), 1.0);
        let mixed = MixedCube::new(g, Array3::zeros((1, 1, 2))).unwrap();
        assert_eq!(
            unmix_spectral_cube(&mixed, true).unwrap_err(),
            Error::Underdetermined { endmembers: 3, bands: 2 }
        );
    }

    #[test]
    fn design_rows_must_match_bands() {
        let err = MixedCube::new(unit_pair(), Array3::zeros((1, 1, 4))).unwrap_err();
        assert!(matches!(err, Error::LengthMismatch { expected: 4, actual: 5, .. }));
    }
}
