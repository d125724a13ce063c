//! Runtime configuration.
//!
//! Kept deliberately small and serializable so it can be loaded from JSON
//! or assembled in code with the `with_*` builders.

use serde::{Deserialize, Serialize};

use crate::error::{PhotomapError, Result};

/// Tuning knobs for the cache and the renderer.
///
/// # Example
///
/// ```rust
/// use photomap::Config;
///
/// let config = Config::default().with_icon_size(24);
/// assert!(config.validate().is_ok());
///
/// let from_json: Config = photomap::Config::from_json(r#"{ "pile_max": 6 }"#).unwrap();
/// assert_eq!(from_json.pile_max, 6);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Separation (in projected degrees) below which photos always merge
    /// into one pile; roughly five metres at the equator.
    #[serde(default = "Config::default_photo_min_sep")]
    pub photo_min_sep: f64,

    /// Side of the square bounding box photo icons are scaled into.
    #[serde(default = "Config::default_icon_size")]
    pub icon_size: u32,

    /// Side of the square bounding box gallery thumbnails are scaled into.
    #[serde(default = "Config::default_thumb_size")]
    pub thumb_size: u32,

    /// Maximum number of icons drawn per pile.
    #[serde(default = "Config::default_pile_max")]
    pub pile_max: usize,

    /// Cap on concurrent derived-artifact generations.
    #[serde(default = "Config::default_gen_parallel")]
    pub gen_parallel: usize,
}

impl Config {
    const fn default_photo_min_sep() -> f64 {
        5e-5
    }

    const fn default_icon_size() -> u32 {
        20
    }

    const fn default_thumb_size() -> u32 {
        100
    }

    const fn default_pile_max() -> usize {
        10
    }

    const fn default_gen_parallel() -> usize {
        4
    }

    pub fn with_photo_min_sep(mut self, sep: f64) -> Self {
        self.photo_min_sep = sep;
        self
    }

    pub fn with_icon_size(mut self, size: u32) -> Self {
        self.icon_size = size;
        self
    }

    pub fn with_thumb_size(mut self, size: u32) -> Self {
        self.thumb_size = size;
        self
    }

    pub fn with_pile_max(mut self, max: usize) -> Self {
        self.pile_max = max;
        self
    }

    pub fn with_gen_parallel(mut self, n: usize) -> Self {
        self.gen_parallel = n;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.photo_min_sep.is_finite() && self.photo_min_sep > 0.0) {
            return Err(PhotomapError::InvalidConfig(
                "photo_min_sep must be positive and finite".into(),
            ));
        }
        if self.icon_size == 0 || self.thumb_size == 0 {
            return Err(PhotomapError::InvalidConfig(
                "icon_size and thumb_size must be positive".into(),
            ));
        }
        if self.pile_max == 0 {
            return Err(PhotomapError::InvalidConfig(
                "pile_max must be positive".into(),
            ));
        }
        if self.gen_parallel == 0 {
            return Err(PhotomapError::InvalidConfig(
                "gen_parallel must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Load configuration from a JSON string and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            photo_min_sep: Self::default_photo_min_sep(),
            icon_size: Self::default_icon_size(),
            thumb_size: Self::default_thumb_size(),
            pile_max: Self::default_pile_max(),
            gen_parallel: Self::default_gen_parallel(),
        }
    }
}
