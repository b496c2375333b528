use ndarray::{Array3, ArrayView1, ArrayView3, Axis};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Spectrum – one intensity vector on a wavelength axis
// ---------------------------------------------------------------------------

/// A single spectrum. Wavelengths are assumed strictly increasing.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    data: Vec<f64>,
    wvl: Vec<f64>,
}

impl Spectrum {
    /// Pair an intensity vector with its wavelength axis.
    pub fn new(data: Vec<f64>, wvl: Vec<f64>) -> Result<Self> {
        if data.len() != wvl.len() {
            return Err(Error::LengthMismatch {
                what: "spectrum wavelengths",
                expected: data.len(),
                actual: wvl.len(),
            });
        }
        Ok(Spectrum { data, wvl })
    }

    /// Constant spectrum on the given wavelength axis.
    pub fn constant(value: f64, wvl: &[f64]) -> Self {
        Spectrum {
            data: vec![value; wvl.len()],
            wvl: wvl.to_vec(),
        }
    }

    /// Intensity axis.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Wavelength axis – same length as `data`.
    pub fn wvl(&self) -> &[f64] {
        &self.wvl
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

// ---------------------------------------------------------------------------
// ImageCube – height × width × bands
// ---------------------------------------------------------------------------

/// Axis order of a raw cube handed to [`ImageCube::with_layout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CubeLayout {
    /// bands × height × width
    BandsFirst,
    /// height × width × bands
    BandsLast,
}

/// A hyperspectral cube, always stored band-last in standard layout.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageCube {
    data: Array3<f64>,
    wvl: Vec<f64>,
}

impl ImageCube {
    /// Build a cube whose band axis is detected as the shortest axis.
    ///
    /// The band count must be strictly smaller than both spatial
    /// dimensions; ties are rejected with [`Error::AmbiguousBandAxis`].
    /// Use [`ImageCube::with_layout`] for scenes where that does not hold.
    pub fn new(data: Array3<f64>, wvl: Vec<f64>) -> Result<Self> {
        let shape = [data.shape()[0], data.shape()[1], data.shape()[2]];
        let band_axis = shortest_axis(shape).ok_or(Error::AmbiguousBandAxis { shape })?;
        Self::from_band_axis(data, wvl, band_axis)
    }

    /// Build a cube from an explicitly declared axis order.
    pub fn with_layout(data: Array3<f64>, wvl: Vec<f64>, layout: CubeLayout) -> Result<Self> {
        let band_axis = match layout {
            CubeLayout::BandsFirst => 0,
            CubeLayout::BandsLast => 2,
        };
        Self::from_band_axis(data, wvl, band_axis)
    }

    fn from_band_axis(data: Array3<f64>, wvl: Vec<f64>, band_axis: usize) -> Result<Self> {
        let bands = data.shape()[band_axis];
        if wvl.len() != bands {
            return Err(Error::LengthMismatch {
                what: "cube wavelengths",
                expected: bands,
                actual: wvl.len(),
            });
        }
        let data = match band_axis {
            0 => data.permuted_axes([1, 2, 0]),
            1 => data.permuted_axes([0, 2, 1]),
            _ => data,
        };
        let data = if data.is_standard_layout() {
            data
        } else {
            data.as_standard_layout().into_owned()
        };
        Ok(ImageCube { data, wvl })
    }

    /// Band-last view of the cube data.
    pub fn data(&self) -> ArrayView3<'_, f64> {
        self.data.view()
    }

    pub fn wvl(&self) -> &[f64] {
        &self.wvl
    }

    pub fn height(&self) -> usize {
        self.data.shape()[0]
    }

    pub fn width(&self) -> usize {
        self.data.shape()[1]
    }

    pub fn bands(&self) -> usize {
        self.data.shape()[2]
    }

    /// Spectrum at a pixel, or `None` outside the image.
    pub fn pixel_spectrum(&self, row: usize, col: usize) -> Option<Spectrum> {
        if row >= self.height() || col >= self.width() {
            return None;
        }
        let pixel: ArrayView1<'_, f64> = self
            .data
            .index_axis(Axis(0), row)
            .index_axis_move(Axis(0), col);
        Some(Spectrum {
            data: pixel.to_vec(),
            wvl: self.wvl.clone(),
        })
    }
}

/// Index of the unique shortest axis, `None` on a tie.
fn shortest_axis(shape: [usize; 3]) -> Option<usize> {
    let (axis, &len) = shape.iter().enumerate().min_by_key(|(_, len)| **len)?;
    let ties = shape.iter().filter(|&&l| l == len).count();
    (ties == 1).then_some(axis)
}
