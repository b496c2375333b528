use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use image::{GrayImage, Luma, Rgb, RgbImage};
use log::info;
use ndarray::{ArrayView2, Axis};
use palette::Srgb;

use crate::config::RenderConfig;
use crate::model::ModelResult;

// ---------------------------------------------------------------------------
// Fraction colour map
// ---------------------------------------------------------------------------

/// Flag colour for fractions below the clip range.
const UNDER_CLIP: Srgb<f32> = Srgb::new(0.0, 0.807_843, 0.819_608);
/// Flag colour for fractions above the clip range.
const OVER_CLIP: Srgb<f32> = Srgb::new(0.698_039, 0.133_333, 0.133_333);

fn to_pixel(color: Srgb<f32>) -> Rgb<u8> {
    let c: Srgb<u8> = color.into_format();
    Rgb([c.red, c.green, c.blue])
}

/// Grey ramp across `[clip_min, clip_max]`, teal below, red above,
/// black for non-finite values.
pub fn minmax_color(value: f64, clip_min: f64, clip_max: f64) -> Rgb<u8> {
    if !value.is_finite() {
        return Rgb([0, 0, 0]);
    }
    if value < clip_min {
        return to_pixel(UNDER_CLIP);
    }
    if value > clip_max {
        return to_pixel(OVER_CLIP);
    }
    let t = ramp(value, clip_min, clip_max) as f32;
    to_pixel(Srgb::new(t, t, t))
}

/// Position of `value` in `[lo, hi]`, clamped to `[0, 1]`.
fn ramp(value: f64, lo: f64, hi: f64) -> f64 {
    if hi > lo {
        ((value - lo) / (hi - lo)).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Fraction map of one endmember.
pub fn fraction_image(
    result: &ModelResult,
    index: usize,
    config: &RenderConfig,
) -> Result<RgbImage> {
    let fractions = result.unmixed.fractions();
    if index >= fractions.shape()[2] {
        bail!(
            "model '{}' has no fraction map {index} ({} endmembers)",
            result.model_id,
            fractions.shape()[2]
        );
    }
    let band = fractions.index_axis(Axis(2), index);
    let (height, width) = band.dim();
    Ok(RgbImage::from_fn(width as u32, height as u32, |x, y| {
        minmax_color(band[[y as usize, x as usize]], config.clip_min, config.clip_max)
    }))
}

// ---------------------------------------------------------------------------
// Residual map
// ---------------------------------------------------------------------------

/// Grey image of a residual-norm map, stretched over its finite extrema
/// scaled by the configured percentages.
pub fn residual_image(norm: ArrayView2<'_, f64>, config: &RenderConfig) -> GrayImage {
    let (min, max) = norm
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let lo = min * config.residual_low_pct / 100.0;
    let hi = max * config.residual_high_pct / 100.0;

    let (height, width) = norm.dim();
    GrayImage::from_fn(width as u32, height as u32, |x, y| {
        let v = norm[[y as usize, x as usize]];
        if !v.is_finite() {
            return Luma([0]);
        }
        Luma([(ramp(v, lo, hi) * 255.0).round() as u8])
    })
}

// ---------------------------------------------------------------------------
// Quicklook files
// ---------------------------------------------------------------------------

fn file_stem(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

/// Write one PNG per endmember fraction map plus the residual map into `dir`.
pub fn save_quicklooks(
    result: &ModelResult,
    dir: &Path,
    config: &RenderConfig,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let prefix = file_stem(&result.model_id);
    let mut written = Vec::new();

    for (i, name) in result.endmembers.names().iter().enumerate() {
        let img = fraction_image(result, i, config)?;
        let path = dir.join(format!("{prefix}_{}.png", file_stem(name)));
        img.save(&path)
            .with_context(|| format!("writing {}", path.display()))?;
        written.push(path);
    }

    let path = dir.join(format!("{prefix}_residual.png"));
    residual_image(result.residual_norm.view(), config)
        .save(&path)
        .with_context(|| format!("writing {}", path.display()))?;
    written.push(path);

    info!("wrote {} quicklook(s) to {}", written.len(), dir.display());
    Ok(written)
}
