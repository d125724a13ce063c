//! Interactive geographic photo map.
//!
//! Indexes a collection of geotagged images into a quadtree and a
//! hierarchical cluster tree, renders web map tiles where nearby photos
//! stack into zoom-dependent piles, and persists per-image metadata and
//! thumbnails in a durable key-value cache.
//!
//! ```no_run
//! use photomap::{Config, FsImageSource, ImageCache, Store, TileMap};
//! use std::sync::Arc;
//!
//! # fn main() -> photomap::Result<()> {
//! let config = Config::default();
//! let source = Arc::new(FsImageSource::new(&["./photos"])?);
//! let cache = Arc::new(ImageCache::new(source, Store::memory(), &config)?);
//! let tiles = TileMap::new(cache, &config)?;
//! let start = tiles.find_start_location();
//! println!("map opens at {}, {}", start.lat, start.long);
//! # Ok(())
//! # }
//! ```

pub mod blur;
pub mod cluster;
pub mod config;
pub mod error;
pub mod fs_source;
pub mod imagecache;
pub mod persistence;
pub mod projection;
pub mod quadtree;
pub mod server;
pub mod singleflight;
pub mod source;
pub mod storage;
pub mod thumber;
pub mod tiler;

pub use cluster::{group_nearby, Cluster, ClusterSource, ClusterTree, Point, Rect};
pub use config::Config;
pub use error::{PhotomapError, Result};
pub use fs_source::FsImageSource;
pub use imagecache::{ImageCache, ImageInfo};
pub use persistence::AofBackend;
pub use quadtree::{PointSource, Quadtree, QuadtreeOptions};
pub use source::{ImageMeta, ImageSource, SourceInfo};
pub use storage::{MemoryBackend, StorageBackend, Store};
pub use thumber::Thumber;
pub use tiler::{StartLocation, TileMap, TILE_SIZE};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports.
pub mod prelude {
    pub use crate::{Config, PhotomapError, Result};

    pub use crate::{FsImageSource, ImageSource};

    pub use crate::{ImageCache, ImageInfo, TileMap};

    pub use crate::{AofBackend, MemoryBackend, Store};
}
