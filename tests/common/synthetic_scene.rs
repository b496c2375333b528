use std::path::PathBuf;

use hypmix::{EndMember, Spectrum};
use ndarray::{Array3, ArrayView2};

pub const BANDS: usize = 12;

pub fn wavelengths() -> Vec<f64> {
    (0..BANDS).map(|i| 500.0 + 50.0 * i as f64).collect()
}

/// Three smooth, linearly independent reference spectra.
pub fn library() -> Vec<EndMember> {
    let shapes: [(&str, fn(f64) -> f64); 3] = [
        ("ramp", |x| 0.1 + 0.05 * x),
        ("ripple", |x| 0.6 - 0.03 * x + 0.1 * x.sin()),
        ("wave", |x| 0.3 + 0.2 * (0.7 * x).cos()),
    ];
    shapes
        .iter()
        .map(|(name, f)| {
            let data = (0..BANDS).map(|i| f(i as f64)).collect();
            let spectrum = Spectrum::new(data, wavelengths()).expect("matching lengths");
            EndMember::new(*name, spectrum)
        })
        .collect()
}

/// Deterministic fraction field, optionally normalised to sum to one.
pub fn fraction_field(height: usize, width: usize, k: usize, sum_to_one: bool) -> Array3<f64> {
    let mut f = Array3::from_shape_fn((height, width, k), |(r, c, i)| {
        0.2 + 0.5 * ((r * 3 + c * 5 + i * 7) % 11) as f64 / 11.0
    });
    if sum_to_one {
        for mut pixel in f.lanes_mut(ndarray::Axis(2)) {
            let total = pixel.sum();
            pixel /= total;
        }
    }
    f
}

/// `d = G f` for every pixel.
pub fn mix(g: ArrayView2<'_, f64>, fractions: &Array3<f64>) -> Array3<f64> {
    let (height, width, k) = fractions.dim();
    Array3::from_shape_fn((height, width, g.nrows()), |(r, c, b)| {
        (0..k).map(|i| g[[b, i]] * fractions[[r, c, i]]).sum()
    })
}

/// Cube values that are not a combination of any library spectra.
pub fn arbitrary_cube(height: usize, width: usize) -> Array3<f64> {
    Array3::from_shape_fn((height, width, BANDS), |(r, c, b)| {
        let x = (r * 131 + c * 71 + b * 29) % 97;
        x as f64 / 97.0
    })
}

/// Empty scratch directory unique to this test process.
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("hypmix-{}-{name}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}
