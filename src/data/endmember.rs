use std::path::PathBuf;

use ndarray::{Array2, ArrayView2};

use super::spectrum::Spectrum;
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// EndMember – a named reference spectrum
// ---------------------------------------------------------------------------

/// Where an endmember spectrum came from. Catalog metadata only; never
/// affects the solve.
#[derive(Debug, Clone, PartialEq)]
pub enum Provenance {
    /// Picked from a pixel of the scene being unmixed.
    InScene { row: usize, col: usize },
    /// Read from a spectral library file.
    External { file_path: PathBuf },
    /// Synthetic spectrum such as shade or a reflector.
    Virtual,
    /// In-memory set or reloaded result.
    Unknown,
}

/// A reference spectrum assumed to be a pure material signature.
#[derive(Debug, Clone, PartialEq)]
pub struct EndMember {
    name: String,
    spectrum: Spectrum,
    provenance: Provenance,
}

impl EndMember {
    pub fn new(name: impl Into<String>, spectrum: Spectrum) -> Self {
        Self::with_provenance(name, spectrum, Provenance::Unknown)
    }

    pub fn in_scene(name: impl Into<String>, spectrum: Spectrum, coord: (usize, usize)) -> Self {
        let (row, col) = coord;
        Self::with_provenance(name, spectrum, Provenance::InScene { row, col })
    }

    pub fn external(
        name: impl Into<String>,
        spectrum: Spectrum,
        file_path: impl Into<PathBuf>,
    ) -> Self {
        let file_path = file_path.into();
        Self::with_provenance(name, spectrum, Provenance::External { file_path })
    }

    pub fn virtual_member(name: impl Into<String>, spectrum: Spectrum) -> Self {
        Self::with_provenance(name, spectrum, Provenance::Virtual)
    }

    fn with_provenance(
        name: impl Into<String>,
        spectrum: Spectrum,
        provenance: Provenance,
    ) -> Self {
        EndMember {
            name: name.into(),
            spectrum,
            provenance,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spectrum(&self) -> &Spectrum {
        &self.spectrum
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }
}

// ---------------------------------------------------------------------------
// EndMemberGroup – packed design-matrix view of a roster
// ---------------------------------------------------------------------------

/// An ordered, immutable set of endmembers packed column-wise into an
/// `n × k` matrix. Rebuild the group when the roster changes.
#[derive(Debug, Clone, PartialEq)]
pub struct EndMemberGroup {
    endmembers: Vec<EndMember>,
    matrix: Array2<f64>,
    names: Vec<String>,
}

impl EndMemberGroup {
    /// Pack a non-empty list of equal-length endmembers, column per
    /// endmember in list order.
    pub fn from_endmembers(endmembers: Vec<EndMember>) -> Result<Self> {
        let first = endmembers.first().ok_or(Error::EmptyEndmemberList)?;
        let n = first.spectrum().len();

        let mut matrix = Array2::zeros((n, endmembers.len()));
        let mut names = Vec::with_capacity(endmembers.len());
        for (i, em) in endmembers.iter().enumerate() {
            let data = em.spectrum().data();
            if data.len() != n {
                return Err(Error::LengthMismatch {
                    what: "endmember spectrum",
                    expected: n,
                    actual: data.len(),
                });
            }
            for (dst, &src) in matrix.column_mut(i).iter_mut().zip(data) {
                *dst = src;
            }
            names.push(em.name().to_string());
        }

        Ok(EndMemberGroup {
            endmembers,
            matrix,
            names,
        })
    }

    /// Packed `n × k` design matrix.
    pub fn matrix(&self) -> ArrayView2<'_, f64> {
        self.matrix.view()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn endmembers(&self) -> &[EndMember] {
        &self.endmembers
    }

    /// Wavelength axis shared by the group (that of the first endmember).
    pub fn wavelengths(&self) -> &[f64] {
        self.endmembers[0].spectrum().wvl()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Always `false`; groups are never empty.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Unpack an in-memory library: row `i` of `arr` is the spectrum of `names[i]`.
pub fn read_endmember_set(
    names: &[String],
    arr: ArrayView2<'_, f64>,
    wvl: &[f64],
) -> Result<Vec<EndMember>> {
    if names.len() != arr.nrows() {
        return Err(Error::LengthMismatch {
            what: "endmember names",
            expected: arr.nrows(),
            actual: names.len(),
        });
    }
    names
        .iter()
        .zip(arr.rows())
        .map(|(name, row)| -> Result<EndMember> {
            let spectrum = Spectrum::new(row.to_vec(), wvl.to_vec())?;
            Ok(EndMember::new(name.clone(), spectrum))
        })
        .collect()
}
