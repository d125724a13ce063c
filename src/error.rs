//! Error types shared across the crate.

use crate::source::ImageMeta;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PhotomapError>;

#[derive(Error, Debug)]
pub enum PhotomapError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// The image decoded fine but carries no GPS position. The partial
    /// metadata is kept so callers can still report dimensions and times.
    #[error("image has no geolocation")]
    NoLocation(Box<ImageMeta>),

    #[error("unknown image id {0:?}")]
    UnknownId(String),

    #[error("image source error: {0}")]
    Source(String),

    #[error("no geotagged images in source")]
    NoGeotaggedImages,

    #[error("corrupt cache log record")]
    InvalidLogRecord,

    #[error("unexpected end of cache log")]
    UnexpectedEof,

    #[error("storage backend is closed")]
    StorageClosed,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PhotomapError {
    /// Whether this error marks a decodable image that lacks a GPS position.
    pub fn is_no_location(&self) -> bool {
        matches!(self, PhotomapError::NoLocation(_))
    }
}
