use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Top-level settings file for the command-line tools.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub unmix: UnmixConfig,
    pub render: RenderConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UnmixConfig {
    /// Constrain the endmember fractions of every pixel to sum to one.
    pub add_to_one: bool,
}

impl Default for UnmixConfig {
    fn default() -> Self {
        Self { add_to_one: true }
    }
}

/// Colour scaling for quicklook images.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Fractions below this value are flagged teal.
    pub clip_min: f64,
    /// Fractions above this value are flagged red.
    pub clip_max: f64,
    /// Lower end of the residual grey ramp, in percent of the smallest
    /// finite residual norm.
    pub residual_low_pct: f64,
    /// Upper end of the residual grey ramp, in percent of the largest
    /// finite residual norm.
    pub residual_high_pct: f64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            clip_min: -0.1,
            clip_max: 1.1,
            residual_low_pct: 100.0,
            residual_high_pct: 100.0,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing config {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config: Config = serde_json::from_str(r#"{ "render": { "clip_max": 1.5 } }"#).unwrap();
        assert!(config.unmix.add_to_one);
        assert_eq!(config.render.clip_min, -0.1);
        assert_eq!(config.render.clip_max, 1.5);
        assert_eq!(config.render.residual_high_pct, 100.0);
    }

    #[test]
    fn constraint_can_be_disabled() {
        let json = r#"{ "unmix": { "add_to_one": false } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(!config.unmix.add_to_one);
    }

    #[test]
    fn config_is_read_from_file() {
        let path = std::env::temp_dir().join(format!("hypmix-config-{}.json", std::process::id()));
        fs::write(&path, r#"{ "unmix": { "add_to_one": false }, "render": { "clip_min": 0.0 } }"#)
            .unwrap();
        let config = load_config(&path).unwrap();
        fs::remove_file(&path).unwrap();

        assert!(!config.unmix.add_to_one);
        assert_eq!(config.render.clip_min, 0.0);
        assert_eq!(config.render.clip_max, 1.1);
    }

    #[test]
    fn unreadable_config_names_the_file() {
        let path = std::env::temp_dir().join("hypmix-config-missing.json");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("hypmix-config-missing.json"));
    }
}
