use std::env;

use anyhow::{anyhow, Context, Result};
use log::info;
use ndarray::{aview1, s, Array1, Array3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use hypmix::io::save_model_result;
use hypmix::{EndMember, ImageCube, MixtureModel, Spectrum};

const HEIGHT: usize = 48;
const WIDTH: usize = 64;
const NOISE_STD: f64 = 0.002;

fn gaussian(x: f64, mu: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(x - mu).powi(2) / (2.0 * sigma.powi(2))).exp()
}

/// Baseline plus absorption/reflection features.
fn generate_spectrum(wavelengths: &[f64], baseline: f64, peaks: &[(f64, f64, f64)]) -> Vec<f64> {
    wavelengths
        .iter()
        .map(|&wl| {
            let signal: f64 = peaks
                .iter()
                .map(|&(mu, sigma, amp)| gaussian(wl, mu, sigma, amp))
                .sum();
            baseline + signal
        })
        .collect()
}

fn main() -> Result<()> {
    env_logger::init();
    let output_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "sample_model.parquet".to_string());
    let mut rng = StdRng::seed_from_u64(42);
    let noise = Normal::new(0.0, NOISE_STD).map_err(|e| anyhow!("noise model: {e}"))?;

    // Wavelengths: 450 → 2430 nm, step 60
    let wavelengths: Vec<f64> = (0..34).map(|i| 450.0 + i as f64 * 60.0).collect();

    let library: Vec<(&str, f64, Vec<(f64, f64, f64)>)> = vec![
        ("Basalt", 0.08, vec![(1000.0, 180.0, -0.03), (2000.0, 250.0, -0.02)]),
        ("Anorthosite", 0.35, vec![(1250.0, 150.0, -0.05)]),
        ("Regolith", 0.15, vec![(700.0, 300.0, 0.05), (1900.0, 400.0, 0.08)]),
    ];
    let endmembers: Vec<Spectrum> = library
        .iter()
        .map(|(_, baseline, peaks)| {
            Spectrum::new(generate_spectrum(&wavelengths, *baseline, peaks), wavelengths.clone())
        })
        .collect::<hypmix::Result<_>>()?;

    // Random abundances per pixel (normalised), then mixed plus noise.
    // Stored bands-first to exercise layout detection.
    let bands = wavelengths.len();
    let mut raw = Array3::<f64>::zeros((bands, HEIGHT, WIDTH));
    for row in 0..HEIGHT {
        for col in 0..WIDTH {
            let weights: Array1<f64> = (0..endmembers.len()).map(|_| rng.random()).collect();
            let weights = &weights / weights.sum();
            let mut pixel = raw.slice_mut(s![.., row, col]);
            for (em, w) in endmembers.iter().zip(&weights) {
                pixel.scaled_add(*w, &aview1(em.data()));
            }
            pixel.mapv_inplace(|v| v + noise.sample(&mut rng));
        }
    }
    let cube = ImageCube::new(raw, wavelengths.clone()).context("building sample cube")?;

    let roster = library
        .iter()
        .zip(endmembers)
        .enumerate()
        .map(|(i, ((name, _, _), spectrum))| match i {
            0 => EndMember::in_scene(*name, spectrum, (HEIGHT / 2, WIDTH / 2)),
            _ => EndMember::external(*name, spectrum, format!("library/{name}.csv")),
        })
        .collect();
    let mut model = MixtureModel::new(roster, cube)?;
    model.add_virtual_shade()?;

    let result = model.run(&output_path, "sample")?;
    save_model_result(&result)?;

    let summary = result.summary();
    info!(
        "residual norm min/mean/max: {:.4}/{:.4}/{:.4}",
        summary.residual_norm.min, summary.residual_norm.mean, summary.residual_norm.max
    );
    println!(
        "Wrote model 'sample' ({} endmembers, {HEIGHT}x{WIDTH} px, {bands} bands) to {output_path}",
        result.endmembers.len()
    );
    Ok(())
}
