//! Image source abstraction.
//!
//! A source provides the candidate images for the map: their ids and
//! modification times, per-image metadata, and the raw bytes. Concrete
//! backends (a filesystem walker lives in [`crate::fs_source`]) stay outside
//! the cache and the renderer, which only see this trait.

use crate::error::Result;
use std::collections::HashMap;
use std::io::Read;
use std::time::SystemTime;

/// Metadata of an image that decoded but may lack a GPS position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageMeta {
    /// Capture time; `None` when neither EXIF nor the source provide one.
    pub create_time: Option<SystemTime>,
    pub width: u32,
    pub height: u32,
}

/// Full per-image information including the geolocation.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceInfo {
    pub create_time: Option<SystemTime>,
    pub width: u32,
    pub height: u32,
    /// Degrees, -85..85 after ingest clamping.
    pub lat: f64,
    /// Degrees, -180..180.
    pub long: f64,
}

/// Provider of geotagged images.
pub trait ImageSource: Send + Sync {
    /// All images that are candidates for inclusion on the map, along with
    /// their modification times.
    fn mod_times(&self) -> Result<HashMap<String, SystemTime>>;

    /// Image info for the specified id.
    ///
    /// Returns [`crate::PhotomapError::NoLocation`] when the id refers to a
    /// valid image without a GPS position, and other errors when the id is
    /// unknown or the bytes are not an image.
    fn info(&self, id: &str) -> Result<SourceInfo>;

    /// Opens the raw image bytes for reading.
    fn open(&self, id: &str) -> Result<Box<dyn Read + Send>>;

    /// Releases any resources held by the source.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}
