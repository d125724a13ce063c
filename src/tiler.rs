//! Tile rendering over the spatial indexes.
//!
//! A [`TileMap`] owns the quadtree (photo spots) and the cluster tree
//! (photo piles) built from the warm image cache, renders 256x256 PNG
//! tiles on demand, and memoises them per tile coordinate. It also answers
//! the viewport and gallery queries used by the web client.

use crate::cluster::{ClusterSource, ClusterTree};
use crate::config::Config;
use crate::error::{PhotomapError, Result};
use crate::imagecache::{ImageCache, ImageInfo};
use crate::projection::{clamp_lat, lat_to_merc, merc_to_lat};
use crate::quadtree::{PointSource, Quadtree, QuadtreeOptions};
use crate::singleflight::FlightGroup;
use bytes::Bytes;
use dashmap::DashMap;
use image::{imageops, ImageFormat, Rgba, RgbaImage};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::f64::consts::PI;
use std::io::Cursor;
use std::sync::Arc;
use tracing::debug;

pub const TILE_SIZE: u32 = 256;

/// Map view the client should open with.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StartLocation {
    pub lat: f64,
    pub long: f64,
}

/// Renders and memoises the spot and photo-pile tile layers.
pub struct TileMap {
    inner: Arc<TileInner>,

    spot_memo: DashMap<String, Bytes>,
    photo_memo: DashMap<String, Bytes>,
    spot_flights: FlightGroup<Bytes>,
    photo_flights: FlightGroup<Bytes>,
}

struct TileInner {
    cache: Arc<ImageCache>,
    images: Vec<ImageInfo>,

    qt: Quadtree,       // for photo spots
    tree: ClusterTree,  // for photo piles

    spot: RgbaImage,
    empty_tile: Bytes,

    photo_min_sep: f64,
    icon_size: u32,
    pile_max: usize,
}

/// Images as projected points: x is the longitude, y the Mercator
/// latitude, every image weighing the same.
struct ImagePoints<'a>(&'a [ImageInfo]);

impl PointSource for ImagePoints<'_> {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn at(&self, i: usize) -> (f64, f64) {
        let ii = &self.0[i];
        (ii.long, lat_to_merc(ii.lat))
    }
}

impl ClusterSource for ImagePoints<'_> {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn at(&self, i: usize) -> (f64, f64) {
        PointSource::at(self, i)
    }

    fn weight(&self, _i: usize) -> f64 {
        1.0
    }
}

impl TileMap {
    /// Builds the indexes over the cache's images. Fails when the cache
    /// holds no geotagged images at all.
    pub fn new(cache: Arc<ImageCache>, config: &Config) -> Result<TileMap> {
        let images = cache.images().to_vec();
        if images.is_empty() {
            return Err(PhotomapError::NoGeotaggedImages);
        }

        let pts = ImagePoints(&images);
        let qt = Quadtree::with_options(
            &pts,
            QuadtreeOptions::new().with_min_dist(config.photo_min_sep),
        );
        let tree = ClusterTree::new(&pts, config.photo_min_sep);

        let inner = TileInner {
            cache,
            qt,
            tree,
            images,
            spot: blurry_spot(Rgba([255, 0, 0, 64]), 16),
            empty_tile: encode_png(&RgbaImage::new(TILE_SIZE, TILE_SIZE)),
            photo_min_sep: config.photo_min_sep,
            icon_size: config.icon_size,
            pile_max: config.pile_max,
        };
        Ok(TileMap {
            inner: Arc::new(inner),
            spot_memo: DashMap::new(),
            photo_memo: DashMap::new(),
            spot_flights: FlightGroup::unbounded(),
            photo_flights: FlightGroup::unbounded(),
        })
    }

    /// PNG bytes of the spot-density layer for the tile.
    pub async fn spot_tile(&self, x: i64, y: i64, zoom: u32) -> Bytes {
        let (x, y, zoom) = normalize_tile(x, y, zoom);
        let key = format!("{x}|{y}|{zoom}");
        if let Some(hit) = self.spot_memo.get(&key) {
            return hit.value().clone();
        }

        let inner = self.inner.clone();
        let bytes = self
            .spot_flights
            .run(&key, async move {
                tokio::task::spawn_blocking(move || inner.render_spot_tile(x, y, zoom))
                    .await
                    .expect("spot tile render panicked")
            })
            .await;
        self.spot_memo.insert(key, bytes.clone());
        bytes
    }

    /// PNG bytes of the photo-pile layer for the tile.
    pub async fn photo_tile(&self, x: i64, y: i64, zoom: u32) -> Bytes {
        let (x, y, zoom) = normalize_tile(x, y, zoom);
        let key = format!("{x}|{y}|{zoom}");
        if let Some(hit) = self.photo_memo.get(&key) {
            return hit.value().clone();
        }

        let inner = self.inner.clone();
        let bytes = self
            .photo_flights
            .run(&key, async move { inner.render_photo_tile(x, y, zoom).await })
            .await;
        self.photo_memo.insert(key, bytes.clone());
        bytes
    }

    /// Representative cluster centres within the viewport at the given
    /// zoom, with the hotspot radius to draw them at.
    pub fn photo_places(
        &self,
        la0: f64,
        lo0: f64,
        la1: f64,
        lo1: f64,
        zoom: u32,
    ) -> (Vec<(f64, f64)>, f64) {
        let (la0, la1) = (la0.min(la1), la0.max(la1));
        let (lo0, lo1) = (lo0.min(lo1), lo0.max(lo1));
        let d = self.inner.zoom_dist(zoom);
        let mut places = Vec::new();
        self.inner.tree.query(
            lo0,
            lat_to_merc(clamp_lat(la0)),
            lo1,
            lat_to_merc(clamp_lat(la1)),
            d,
            |pt, _| places.push((merc_to_lat(pt.y), pt.x)),
        );
        (places, d / 2.0)
    }

    /// Member ids of the cluster nearest to `(lat, long)` at the given
    /// zoom, oldest first. Empty when no cluster is close enough.
    pub fn gallery(&self, lat: f64, long: f64, zoom: u32) -> Vec<String> {
        let d = self.inner.zoom_dist(zoom);
        let r = d / 2.0;
        let (cx, cy) = (long, lat_to_merc(clamp_lat(lat)));

        let mut best: Option<(f64, Vec<usize>)> = None;
        self.inner
            .tree
            .query(cx - r, cy - r, cx + r, cy + r, d, |pt, elems| {
                let dd = (pt.x - cx).powi(2) + (pt.y - cy).powi(2);
                if best.as_ref().map_or(true, |(b, _)| dd < *b) {
                    best = Some((dd, elems.to_vec()));
                }
            });

        match best {
            Some((_, mut idx)) => {
                idx.sort_by_key(|&i| self.inner.images[i].create_time);
                idx.into_iter()
                    .map(|i| self.inner.images[i].id.clone())
                    .collect()
            }
            None => Vec::new(),
        }
    }

    /// Initial map view: the centre of the image bounding box, computed
    /// under both the standard and the 180-degree rotated longitude frame
    /// so collections spanning the antimeridian do not open on the wrong
    /// side of the globe.
    pub fn find_start_location(&self) -> StartLocation {
        let mut la = (f64::INFINITY, f64::NEG_INFINITY);
        let mut lo = (f64::INFINITY, f64::NEG_INFINITY);
        let mut ro = (f64::INFINITY, f64::NEG_INFINITY);
        for ii in &self.inner.images {
            la = (la.0.min(ii.lat), la.1.max(ii.lat));
            lo = (lo.0.min(ii.long), lo.1.max(ii.long));
            let r = rotate_long(ii.long);
            ro = (ro.0.min(r), ro.1.max(r));
        }
        let long = if ro.1 - ro.0 < lo.1 - lo.0 {
            rotate_long((ro.0 + ro.1) / 2.0)
        } else {
            (lo.0 + lo.1) / 2.0
        };
        StartLocation {
            lat: (la.0 + la.1) / 2.0,
            long,
        }
    }
}

impl TileInner {
    /// Granularity threshold for the cluster tree at a web map zoom level.
    fn zoom_dist(&self, zoom: u32) -> f64 {
        self.photo_min_sep * 2f64.powi(21 - zoom as i32)
    }

    /// Geographic bounds of the tile expanded by the icon safety gap, as
    /// (lo_min, merc_min, lo_max, merc_max).
    fn tile_bounds(&self, t: &TileSchema, x: i64, y: i64) -> (f64, f64, f64, f64) {
        let gap = (self.icon_size as f64 * 1.5) / TILE_SIZE as f64;
        let (xo, yo) = (x as f64, y as f64);
        let (lami, lomi) = t.lat_long(xo - gap, yo + 1.0 + gap);
        let (lama, loma) = t.lat_long(xo + 1.0 + gap, yo - gap);
        (lomi, lat_to_merc(lami), loma, lat_to_merc(lama))
    }

    fn render_spot_tile(&self, x: i64, y: i64, zoom: u32) -> Bytes {
        let t = TileSchema::new(zoom);
        let (x0, y0, x1, y1) = self.tile_bounds(&t, x, y);
        let (xo, yo) = (x as f64, y as f64);
        let (sdx, sdy) = self.spot.dimensions();

        let mut im = RgbaImage::new(TILE_SIZE, TILE_SIZE);
        let mut any = false;
        self.qt.near_fn(x0, y0, x1, y1, |i| {
            let ii = &self.images[i];
            let (tx, ty) = t.tile(ii.lat, ii.long);
            let px = ((tx - xo) * TILE_SIZE as f64) as i64 - sdx as i64 / 2;
            let py = ((ty - yo) * TILE_SIZE as f64) as i64 - sdy as i64 / 2;
            if px < TILE_SIZE as i64
                && px + sdx as i64 > 0
                && py < TILE_SIZE as i64
                && py + sdy as i64 > 0
            {
                any = true;
            }
            imageops::overlay(&mut im, &self.spot, px, py);
            true
        });

        if !any {
            return self.empty_tile.clone();
        }
        encode_png(&im)
    }

    async fn render_photo_tile(&self, x: i64, y: i64, zoom: u32) -> Bytes {
        struct Pile {
            cx: f64,
            cy: f64,
            /// Member ids, newest first, truncated to the pile limit.
            ids: Vec<String>,
        }

        let t = TileSchema::new(zoom);
        let (x0, y0, x1, y1) = self.tile_bounds(&t, x, y);
        let mindist = self.zoom_dist(zoom);

        let mut piles = Vec::new();
        self.tree.query(x0, y0, x1, y1, mindist, |pt, elems| {
            let mut order: Vec<usize> = elems.to_vec();
            order.sort_by_key(|&i| std::cmp::Reverse(self.images[i].create_time));
            order.truncate(self.pile_max);
            piles.push(Pile {
                cx: pt.x,
                cy: pt.y,
                ids: order
                    .into_iter()
                    .map(|i| self.images[i].id.clone())
                    .collect(),
            });
        });

        let mut icons: FxHashMap<String, Arc<RgbaImage>> = FxHashMap::default();
        for pile in &piles {
            for id in &pile.ids {
                if icons.contains_key(id) {
                    continue;
                }
                match self.cache.photo_icon(id).await {
                    Some(icon) => {
                        icons.insert(id.clone(), icon);
                    }
                    None => debug!("skipping icon {id} in tile {x}|{y}|{zoom}"),
                }
            }
        }

        let (xo, yo) = (x as f64, y as f64);
        let mut im = RgbaImage::new(TILE_SIZE, TILE_SIZE);
        let draw_photo = |im: &mut RgbaImage, px: f64, py: f64, id: &str| {
            if let Some(icon) = icons.get(id) {
                let (dx, dy) = icon.dimensions();
                let ix = px as i64 - dx as i64 / 2;
                let iy = py as i64 - dy as i64 / 2;
                imageops::overlay(im, icon.as_ref(), ix, iy);
            }
        };

        let pile_photo_area =
            self.icon_size as f64 * self.icon_size as f64 * PI / self.pile_max as f64;
        for pile in &piles {
            let (tx, ty) = t.tile(merc_to_lat(pile.cy), pile.cx);
            let px = (tx - xo) * TILE_SIZE as f64;
            let py = (ty - yo) * TILE_SIZE as f64;

            if pile.ids.len() > 1 {
                let area = pile.ids.len() as f64 * pile_photo_area;
                let rmax = (area / PI).sqrt();
                let mut rgen = pile_rng(pile.cx, pile.cy);
                for id in &pile.ids[1..] {
                    let theta = 2.0 * PI * rgen.gen::<f64>();
                    let r = rgen.gen::<f64>().sqrt() * rmax;
                    draw_photo(&mut im, px + r * theta.cos(), py + r * theta.sin(), id);
                }
            }
            // the newest member sits on top of the pile
            draw_photo(&mut im, px, py, &pile.ids[0]);
        }
        encode_png(&im)
    }
}

/// Tile coordinate transforms at one zoom level.
struct TileSchema {
    m: f64,
}

impl TileSchema {
    fn new(zoom: u32) -> Self {
        TileSchema {
            m: (1u64 << zoom.min(30)) as f64,
        }
    }

    fn lat_long(&self, x: f64, y: f64) -> (f64, f64) {
        let long = x / self.m * 360.0 - 180.0;
        let n = PI - 2.0 * PI * y / self.m;
        let lat = 180.0 / PI * (0.5 * (n.exp() - (-n).exp())).atan();
        (lat, long)
    }

    fn tile(&self, lat: f64, long: f64) -> (f64, f64) {
        let x = self.m * (long + 180.0) / 360.0;
        let lr = lat * PI / 180.0;
        let y = self.m * (1.0 - ((lr.tan() + 1.0 / lr.cos()).ln()) / PI) / 2.0;
        (x, y)
    }
}

/// Wraps x around the antimeridian and clamps y and zoom to the valid
/// ranges of the tiling scheme.
fn normalize_tile(x: i64, y: i64, zoom: u32) -> (i64, i64, u32) {
    let zoom = zoom.min(30);
    let mask = (1i64 << zoom) - 1;
    (x & mask, y.clamp(0, mask), zoom)
}

/// Shifts a longitude into the 180-degree rotated frame; applying it twice
/// is the identity.
fn rotate_long(long: f64) -> f64 {
    if long < 0.0 {
        long + 180.0
    } else {
        long - 180.0
    }
}

/// Deterministic layout generator for one pile, seeded from the fractional
/// part of the cluster centre so the same cluster always scatters its
/// companions identically:
/// `seed = (floor(fy * 65536) mod 65536) * 65536 + (floor(fx * 65536) mod 65536)`.
fn pile_rng(x: f64, y: f64) -> Xoshiro256PlusPlus {
    const M: f64 = 65536.0;
    let xv = ((x - x.floor()) * M) as u64 & 0xffff;
    let yv = ((y - y.floor()) * M) as u64 & 0xffff;
    Xoshiro256PlusPlus::seed_from_u64(yv * 65536 + xv)
}

/// Soft translucent disk with a linear radial falloff from the centre.
fn blurry_spot(color: Rgba<u8>, size: u32) -> RgbaImage {
    let mut im = RgbaImage::new(size, size);
    let c = size as f64 / 2.0;
    for yi in 0..size {
        for xi in 0..size {
            let (dx, dy) = (xi as f64 - c, yi as f64 - c);
            let r = (dx * dx + dy * dy).sqrt();
            let intens = (1.0 - r / c).max(0.0);
            let mut cp = color;
            cp[3] = (color[3] as f64 * intens) as u8;
            im.put_pixel(xi, yi, cp);
        }
    }
    im
}

fn encode_png(im: &RgbaImage) -> Bytes {
    let mut buf = Cursor::new(Vec::new());
    im.write_to(&mut buf, ImageFormat::Png)
        .expect("png encoding of an in-memory image cannot fail");
    Bytes::from(buf.into_inner())
}
