//! Shared test fixtures: an in-memory image source with adjustable
//! modification times and call counters.
#![allow(dead_code)]

use image::{ImageFormat, Rgba, RgbaImage};
use photomap::{ImageSource, PhotomapError, SourceInfo};
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub struct MapSource {
    mods: Mutex<HashMap<String, SystemTime>>,
    infos: HashMap<String, SourceInfo>,
    bytes: HashMap<String, Vec<u8>>,
    pub info_calls: AtomicUsize,
    pub open_calls: AtomicUsize,
}

impl MapSource {
    pub fn new() -> Self {
        MapSource {
            mods: Mutex::new(HashMap::new()),
            infos: HashMap::new(),
            bytes: HashMap::new(),
            info_calls: AtomicUsize::new(0),
            open_calls: AtomicUsize::new(0),
        }
    }

    /// A source holding one 8x8 image per `(lat, long)` pair, with ids
    /// `img-000`, `img-001`, ... and distinct creation times.
    pub fn with_points(pts: &[(f64, f64)]) -> Self {
        let mut src = Self::new();
        for (i, &(lat, long)) in pts.iter().enumerate() {
            src.add_image(
                &format!("img-{i:03}"),
                lat,
                long,
                UNIX_EPOCH + Duration::from_secs(1_000 + i as u64),
            );
        }
        src
    }

    pub fn add_image(&mut self, id: &str, lat: f64, long: f64, mt: SystemTime) {
        self.mods.lock().unwrap().insert(id.to_string(), mt);
        self.infos.insert(
            id.to_string(),
            SourceInfo {
                create_time: Some(mt),
                width: 8,
                height: 8,
                lat,
                long,
            },
        );
        let im = RgbaImage::from_pixel(8, 8, Rgba([90, 140, 210, 255]));
        let mut png = Cursor::new(Vec::new());
        im.write_to(&mut png, ImageFormat::Png).unwrap();
        self.bytes.insert(id.to_string(), png.into_inner());
    }

    pub fn set_mod_time(&self, id: &str, mt: SystemTime) {
        self.mods.lock().unwrap().insert(id.to_string(), mt);
    }
}

impl ImageSource for MapSource {
    fn mod_times(&self) -> photomap::Result<HashMap<String, SystemTime>> {
        Ok(self.mods.lock().unwrap().clone())
    }

    fn info(&self, id: &str) -> photomap::Result<SourceInfo> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        self.infos
            .get(id)
            .cloned()
            .ok_or_else(|| PhotomapError::Source(format!("unreadable image {id}")))
    }

    fn open(&self, id: &str) -> photomap::Result<Box<dyn Read + Send>> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        match self.bytes.get(id) {
            Some(b) => Ok(Box::new(Cursor::new(b.clone()))),
            None => Err(PhotomapError::UnknownId(id.to_string())),
        }
    }
}
