//! Durable per-image info cache with content-addressed keys.
//!
//! The cache assigns every source image a short stable key, remembers its
//! metadata across restarts, and owns the generation of derived artifacts
//! (photo icons and gallery thumbnails). Generation is single-flight per
//! key and globally capped, so a burst of tile requests cannot stampede the
//! image decoder.

use crate::config::Config;
use crate::error::{PhotomapError, Result};
use crate::projection::clamp_lat;
use crate::singleflight::FlightGroup;
use crate::source::ImageSource;
use crate::storage::Store;
use crate::thumber::Thumber;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use bytes::{BufMut, Bytes, BytesMut};
use dashmap::DashMap;
use image::{ImageFormat, RgbaImage};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

pub(crate) const KEY_PREFIX: &str = "key|";
pub(crate) const IMAGE_INFO_PREFIX: &str = "imageinfo|";
pub(crate) const PHOTO_ICON_PREFIX: &str = "photoicon|";
pub(crate) const THUMB_PREFIX: &str = "thumb|";

/// Immutable record of one geotagged image, as exposed to the indexes and
/// the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    /// Cache key, also used for thumb and icon lookups.
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<SystemTime>,

    // image dimensions
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,

    // gps position
    pub lat: f64,
    pub long: f64,
}

/// Persisted cache row for one source image. Rows whose source could not be
/// read (or had no location) keep `is_err` set so later warmups skip them.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    src_id: String,
    mod_time: SystemTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    info: Option<ImageInfo>,
    #[serde(default)]
    is_err: bool,
}

pub struct ImageCache {
    src: Arc<dyn ImageSource>,
    store: Arc<Store>,

    icon_thumber: Thumber,
    thumb_thumber: Thumber,

    // read-only after warmup
    key_src: FxHashMap<String, String>,
    images: Vec<ImageInfo>,

    icon_memo: DashMap<String, Option<Arc<RgbaImage>>>,
    icon_flights: FlightGroup<Option<Arc<RgbaImage>>>,
    thumb_flights: FlightGroup<Option<Bytes>>,
}

impl ImageCache {
    /// Warms the cache from `src`: every source image gets a key and a
    /// fresh (or trusted) info row. Runs on the caller's thread; the cache
    /// must be warm before any renderer is exposed.
    pub fn new(src: Arc<dyn ImageSource>, store: Store, config: &Config) -> Result<Self> {
        let mut cache = ImageCache {
            src,
            store: Arc::new(store),
            icon_thumber: Thumber::photo_icon(config.icon_size),
            thumb_thumber: Thumber::thumbnail(config.thumb_size),
            key_src: FxHashMap::default(),
            images: Vec::new(),
            icon_memo: DashMap::new(),
            icon_flights: FlightGroup::bounded(config.gen_parallel),
            thumb_flights: FlightGroup::bounded(config.gen_parallel),
        };
        cache.warmup()?;
        Ok(cache)
    }

    fn warmup(&mut self) -> Result<()> {
        let mod_times = self.src.mod_times()?;
        let mut ids: Vec<&String> = mod_times.keys().collect();
        ids.sort();

        for src_id in ids {
            let mt = mod_times[src_id];
            let key = get_key(&self.store, src_id)?;
            self.key_src.insert(key.clone(), src_id.clone());
            let entry = self.load_fresh_entry(&key, src_id, mt)?;
            if let Some(info) = entry.info {
                self.images.push(info);
            }
        }
        info!(
            "image cache warm: {} geotagged of {} candidates",
            self.images.len(),
            mod_times.len()
        );
        Ok(())
    }

    /// Loads the cache row for `key`, refreshing it from the source when
    /// the row is missing, belongs to another source id, or is older than
    /// the source. Refreshing also drops the derived icon and thumb rows.
    fn load_fresh_entry(&self, key: &str, src_id: &str, mt: SystemTime) -> Result<CacheEntry> {
        let row_key = format!("{IMAGE_INFO_PREFIX}{key}");
        if let Some(data) = self.store.get(&row_key)? {
            let entry: CacheEntry = serde_json::from_slice(&data)?;
            if entry.src_id == src_id && entry.mod_time >= mt {
                // cache up to date
                return Ok(entry);
            }
            for prefix in [PHOTO_ICON_PREFIX, THUMB_PREFIX] {
                if let Err(err) = self.store.delete(format!("{prefix}{key}")) {
                    warn!("delete stale cache row {prefix}{key}: {err}");
                }
            }
        }

        let mut entry = CacheEntry {
            src_id: src_id.to_string(),
            mod_time: mt,
            info: None,
            is_err: false,
        };
        match self.src.info(src_id) {
            Ok(si) => {
                entry.info = Some(ImageInfo {
                    id: key.to_string(),
                    create_time: si.create_time,
                    width: si.width,
                    height: si.height,
                    lat: clamp_lat(si.lat),
                    long: wrap_long(si.long),
                });
            }
            Err(err) if err.is_no_location() => {
                info!("skipping {src_id}: no geolocation");
                entry.is_err = true;
            }
            Err(err) => {
                warn!("image info for {src_id}: {err}");
                entry.is_err = true;
            }
        }
        self.store.put(row_key, serde_json::to_vec(&entry)?.into())?;
        Ok(entry)
    }

    /// All geotagged images known to the cache, in warmup order.
    pub fn images(&self) -> &[ImageInfo] {
        &self.images
    }

    pub fn close(&self) -> Result<()> {
        self.src.close()?;
        self.store.close()
    }

    /// The framed map icon for `key`, or `None` when it cannot be
    /// produced. Failures are memoised: the source is not retried for the
    /// lifetime of the process.
    pub async fn photo_icon(&self, key: &str) -> Option<Arc<RgbaImage>> {
        if let Some(hit) = self.icon_memo.get(key) {
            return hit.value().clone();
        }

        let store = self.store.clone();
        let src = self.src.clone();
        let src_id = self.key_src.get(key).cloned();
        let thumber = self.icon_thumber.clone();
        let k = key.to_string();
        let res = self
            .icon_flights
            .run(key, async move {
                tokio::task::spawn_blocking(move || {
                    create_photo_icon(&store, &*src, src_id.as_deref(), &k, &thumber)
                })
                .await
                .unwrap_or_else(|err| {
                    warn!("photo icon worker failed: {err}");
                    None
                })
            })
            .await;

        self.icon_memo.insert(key.to_string(), res.clone());
        res
    }

    /// The timestamped JPEG thumbnail for `key`: the payload plus its
    /// embedded creation time.
    pub async fn thumbnail(&self, key: &str) -> Result<(Bytes, SystemTime)> {
        let row_key = format!("{THUMB_PREFIX}{key}");
        if let Some(data) = self.store.get(&row_key)? {
            return Ok(split_thumb(data));
        }

        let store = self.store.clone();
        let src = self.src.clone();
        let src_id = self.key_src.get(key).cloned();
        let thumber = self.thumb_thumber.clone();
        let k = key.to_string();
        let res = self
            .thumb_flights
            .run(key, async move {
                tokio::task::spawn_blocking(move || {
                    create_thumb(&store, &*src, src_id.as_deref(), &k, &thumber)
                })
                .await
                .unwrap_or_else(|err| {
                    warn!("thumbnail worker failed: {err}");
                    None
                })
            })
            .await;

        match res {
            Some(data) => Ok(split_thumb(data)),
            None => Err(PhotomapError::Source(format!(
                "thumbnail generation failed for {key}"
            ))),
        }
    }
}

/// Splits a stored thumb blob into its JPEG payload and the embedded
/// big-endian creation timestamp.
fn split_thumb(data: Bytes) -> (Bytes, SystemTime) {
    if data.len() > 8 {
        let mut secs = [0u8; 8];
        secs.copy_from_slice(&data[..8]);
        let mt = UNIX_EPOCH + Duration::from_secs(u64::from_be_bytes(secs));
        (data.slice(8..), mt)
    } else {
        (data, UNIX_EPOCH)
    }
}

/// Stable cache key for `src_id`: the first 9 bytes of its SHA-1 in
/// URL-safe base64, incremented as a big-endian integer until it does not
/// collide with an existing info row. The mapping is persisted so the key
/// survives restarts.
fn get_key(store: &Store, src_id: &str) -> Result<String> {
    let mapping_key = format!("{KEY_PREFIX}{src_id}");
    if let Some(data) = store.get(&mapping_key)? {
        return Ok(String::from_utf8_lossy(&data).into_owned());
    }

    let digest = Sha1::digest(src_id.as_bytes());
    let mut h = [0u8; 9];
    h.copy_from_slice(&digest[..9]);
    loop {
        let key = URL_SAFE_NO_PAD.encode(h);
        if !store.contains_key(format!("{IMAGE_INFO_PREFIX}{key}"))? {
            // key not in use yet
            store.put(&mapping_key, Bytes::from(key.clone().into_bytes()))?;
            return Ok(key);
        }
        inc_be_bytes(&mut h);
    }
}

fn inc_be_bytes(p: &mut [u8]) {
    for b in p.iter_mut().rev() {
        *b = b.wrapping_add(1);
        if *b != 0 {
            return;
        }
    }
}

fn create_photo_icon(
    store: &Store,
    src: &dyn ImageSource,
    src_id: Option<&str>,
    key: &str,
    thumber: &Thumber,
) -> Option<Arc<RgbaImage>> {
    let row_key = format!("{PHOTO_ICON_PREFIX}{key}");
    match store.get(&row_key) {
        Ok(Some(data)) => match image::load_from_memory(&data) {
            Ok(im) => return Some(Arc::new(im.to_rgba8())),
            Err(err) => warn!("stored photo icon for {key} is corrupt: {err}"),
        },
        Ok(None) => {}
        Err(err) => {
            warn!("photo icon cache read {key}: {err}");
            return None;
        }
    }

    let src_id = match src_id {
        Some(id) => id,
        None => {
            warn!("no source id for cache key {key}");
            return None;
        }
    };

    let icon = match src
        .open(src_id)
        .and_then(|mut rc| thumber.icon_from_reader(&mut rc))
    {
        Ok(icon) => icon,
        Err(err) => {
            warn!("can't generate photo icon for {key}: {err}");
            return None;
        }
    };

    let mut png = Cursor::new(Vec::new());
    if let Err(err) = icon.write_to(&mut png, ImageFormat::Png) {
        warn!("can't encode photo icon for cache: {err}");
    } else if let Err(err) = store.put(row_key, Bytes::from(png.into_inner())) {
        warn!("can't store photo icon in cache: {err}");
    }

    Some(Arc::new(icon))
}

fn create_thumb(
    store: &Store,
    src: &dyn ImageSource,
    src_id: Option<&str>,
    key: &str,
    thumber: &Thumber,
) -> Option<Bytes> {
    let src_id = match src_id {
        Some(id) => id,
        None => {
            warn!("no source id for cache key {key}");
            return None;
        }
    };

    let thumb = match src
        .open(src_id)
        .and_then(|mut rc| thumber.thumb_from_reader(&mut rc))
    {
        Ok(t) => t,
        Err(err) => {
            warn!("can't generate thumbnail for {key}: {err}");
            return None;
        }
    };

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs();
    let mut buf = BytesMut::new();
    buf.put_u64(now);

    let rgb = image::DynamicImage::ImageRgba8(thumb).to_rgb8();
    let mut jpeg = Cursor::new(Vec::new());
    if let Err(err) = rgb.write_to(&mut jpeg, ImageFormat::Jpeg) {
        warn!("thumbnail encode for {key}: {err}");
        return None;
    }
    buf.extend_from_slice(&jpeg.into_inner());
    let data = buf.freeze();

    if let Err(err) = store.put(format!("{THUMB_PREFIX}{key}"), data.clone()) {
        warn!("can't store thumbnail in cache: {err}");
    }
    Some(data)
}

/// Normalises a longitude into `[-180, 180)`.
fn wrap_long(long: f64) -> f64 {
    let mut v = (long + 180.0).rem_euclid(360.0) - 180.0;
    if v >= 180.0 {
        v = -180.0;
    }
    v
}
