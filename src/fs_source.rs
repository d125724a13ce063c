//! Filesystem image source.
//!
//! Walks one or more root directories for JPEG and PNG files and exposes
//! them under `file://` ids. Geolocation and capture time come from EXIF;
//! images without GPS coordinates are reported as
//! [`PhotomapError::NoLocation`] so the cache can remember them as negative
//! entries instead of retrying every startup.

use crate::error::{PhotomapError, Result};
use crate::source::{ImageMeta, ImageSource, SourceInfo};
use exif::{In, Tag, Value};
use rustc_hash::FxHashMap;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};
use walkdir::WalkDir;

pub struct FsImageSource {
    /// id -> (path, modification time)
    files: FxHashMap<String, (PathBuf, SystemTime)>,
}

impl FsImageSource {
    /// Walks `roots` recursively, collecting every image file found.
    pub fn new<P: AsRef<Path>>(roots: &[P]) -> Result<Self> {
        let mut files = FxHashMap::default();
        for root in roots {
            for entry in WalkDir::new(root).follow_links(true) {
                let entry = match entry {
                    Ok(e) => e,
                    Err(err) => {
                        warn!("walk error under {}: {}", root.as_ref().display(), err);
                        continue;
                    }
                };
                if !entry.file_type().is_file() || !is_image_path(entry.path()) {
                    continue;
                }
                let abs = entry.path().canonicalize()?;
                let mtime = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .unwrap_or(UNIX_EPOCH);
                let id = format!("file://{}", abs.display());
                files.insert(id, (abs, mtime));
            }
        }
        debug!("filesystem source holds {} image files", files.len());
        Ok(FsImageSource { files })
    }

    fn lookup(&self, id: &str) -> Result<&(PathBuf, SystemTime)> {
        self.files
            .get(id)
            .ok_or_else(|| PhotomapError::UnknownId(id.to_string()))
    }
}

impl ImageSource for FsImageSource {
    fn mod_times(&self) -> Result<HashMap<String, SystemTime>> {
        Ok(self
            .files
            .iter()
            .map(|(id, (_, mt))| (id.clone(), *mt))
            .collect())
    }

    fn info(&self, id: &str) -> Result<SourceInfo> {
        let (path, mtime) = self.lookup(id)?;

        let (width, height) = image::image_dimensions(path)?;
        let mut meta = ImageMeta {
            create_time: Some(*mtime),
            width,
            height,
        };

        let exif = match read_exif(path) {
            Some(x) => x,
            None => return Err(PhotomapError::NoLocation(Box::new(meta))),
        };

        if let Some(t) = exif_create_time(&exif) {
            meta.create_time = Some(t);
        }

        match exif_lat_long(&exif) {
            Some((lat, long)) => Ok(SourceInfo {
                create_time: meta.create_time,
                width,
                height,
                lat,
                long,
            }),
            None => Err(PhotomapError::NoLocation(Box::new(meta))),
        }
    }

    fn open(&self, id: &str) -> Result<Box<dyn Read + Send>> {
        let (path, _) = self.lookup(id)?;
        Ok(Box::new(File::open(path)?))
    }
}

fn is_image_path(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref(),
        Some("jpg" | "jpeg" | "png")
    )
}

fn read_exif(path: &Path) -> Option<exif::Exif> {
    let file = File::open(path).ok()?;
    let mut reader = BufReader::new(file);
    exif::Reader::new().read_from_container(&mut reader).ok()
}

/// Decimal degrees from the EXIF degree/minute/second rationals, negated
/// for southern / western hemisphere references.
fn exif_lat_long(exif: &exif::Exif) -> Option<(f64, f64)> {
    let lat = gps_coord(exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, b'S')?;
    let long = gps_coord(exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, b'W')?;
    Some((lat, long))
}

fn gps_coord(exif: &exif::Exif, tag: Tag, ref_tag: Tag, negative_ref: u8) -> Option<f64> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    let v = match &field.value {
        Value::Rational(v) if v.len() >= 3 => v,
        _ => return None,
    };
    let deg = v[0].to_f64() + v[1].to_f64() / 60.0 + v[2].to_f64() / 3600.0;
    if !deg.is_finite() {
        return None;
    }
    let hemisphere = exif.get_field(ref_tag, In::PRIMARY)?;
    match &hemisphere.value {
        Value::Ascii(refs) if !refs.is_empty() && !refs[0].is_empty() => {
            if refs[0][0] == negative_ref {
                Some(-deg)
            } else {
                Some(deg)
            }
        }
        _ => None,
    }
}

fn exif_create_time(exif: &exif::Exif) -> Option<SystemTime> {
    let field = exif
        .get_field(Tag::DateTimeOriginal, In::PRIMARY)
        .or_else(|| exif.get_field(Tag::DateTime, In::PRIMARY))?;
    let raw = match &field.value {
        Value::Ascii(v) if !v.is_empty() => String::from_utf8_lossy(&v[0]).into_owned(),
        _ => return None,
    };
    let s = raw.trim_end_matches('\0').trim();
    let naive = chrono::NaiveDateTime::parse_from_str(s, "%Y:%m:%d %H:%M:%S").ok()?;
    let secs = naive.and_utc().timestamp();
    if secs < 0 {
        return None;
    }
    Some(UNIX_EPOCH + Duration::from_secs(secs as u64))
}
