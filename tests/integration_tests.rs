//! End-to-end scenarios over the public API: indexes, cache warmup, tile
//! rendering and the HTTP surface.

mod common;

use common::MapSource;
use photomap::cluster::{self, ClusterSource, ClusterTree};
use photomap::server::{router, AppState};
use photomap::thumber::{apply_orientation, Thumber};
use photomap::{Config, ImageCache, PointSource, Quadtree, Store, TileMap};
use std::sync::Arc;

struct Pts(Vec<(f64, f64)>);

impl PointSource for Pts {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn at(&self, i: usize) -> (f64, f64) {
        self.0[i]
    }
}

impl ClusterSource for Pts {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn at(&self, i: usize) -> (f64, f64) {
        self.0[i]
    }

    fn weight(&self, _i: usize) -> f64 {
        1.0
    }
}

/// Pseudo-random but reproducible coordinates in [-180, 180)^2.
fn random_points(n: usize, seed: u64) -> Vec<(f64, f64)> {
    let mut state = seed | 1;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        (state >> 11) as f64 / (1u64 << 53) as f64
    };
    (0..n)
        .map(|_| (next() * 360.0 - 180.0, next() * 360.0 - 180.0))
        .collect()
}

#[test]
fn s1_quadtree_rectangle_queries() {
    let qt = Quadtree::new(&Pts(vec![(-2.0, -2.0), (0.0, 0.0), (1.0, 2.0), (2.0, 2.0)]));

    let mut a = qt.rect(-2.0, -2.0, 0.0, 0.0);
    a.sort_unstable();
    assert_eq!(a, vec![0, 1]);

    let mut b = qt.rect(1.0, 1.0, 2.0, 2.0);
    b.sort_unstable();
    assert_eq!(b, vec![2, 3]);

    assert_eq!(qt.rect(0.0, 0.0, 0.1, 0.1), vec![1]);
}

#[test]
fn s2_group_nearby_partitions_all_points() {
    let pts = Pts(random_points(1000, 0xfeed));
    let clusters = cluster::group_nearby(&pts, 30.0);

    let total: usize = clusters.iter().map(|c| c.elems.len()).sum();
    assert_eq!(total, 1000);

    let mut seen = vec![false; 1000];
    for c in &clusters {
        for &i in &c.elems {
            assert!(!seen[i], "element {i} in two clusters");
            seen[i] = true;
        }
    }
    assert!(seen.iter().all(|&s| s));
}

#[test]
fn s3_cluster_tree_covers_every_element() {
    let pts = Pts(random_points(1000, 0xbeef));
    let tree = ClusterTree::new(&pts, 5e-5);

    let mut total = 0usize;
    tree.query(-180.0, -180.0, 180.0, 180.0, 0.0, |_, elems| {
        total += elems.len();
    });
    assert_eq!(total, 1000);
}

#[test]
fn s4_icon_pipeline_dimensions_after_rotation() {
    // EXIF orientation 6 turns a 100x200 capture into a 200x100 image
    let im = image::DynamicImage::ImageRgba8(image::RgbaImage::new(100, 200));
    let oriented = apply_orientation(im, 6);
    assert_eq!((oriented.width(), oriented.height()), (200, 100));

    let t = Thumber::photo_icon(20);
    let thumb = t.scaled(&oriented);
    assert_eq!(thumb.dimensions(), (20, 10));

    // framed + shadowed canvas: (pdx + 4*blur + |dx|, pdy + 4*blur + |dy|)
    assert_eq!(t.icon_size(20, 20), (40, 41));
    let icon = t.icon_from_thumb(&thumb);
    assert_eq!(icon.dimensions(), (40, 31));
}

#[test]
fn s5_warmup_registers_image_and_rows() {
    let mut src = MapSource::new();
    src.add_image(
        "balaton",
        47.5,
        19.05,
        std::time::UNIX_EPOCH + std::time::Duration::from_secs(1_600_000_000),
    );
    let cache = ImageCache::new(Arc::new(src), Store::memory(), &Config::default()).unwrap();

    assert_eq!(cache.images().len(), 1);
    let ii = &cache.images()[0];
    assert!((ii.lat - 47.5).abs() < 1e-6);
    assert!((ii.long - 19.05).abs() < 1e-6);
    assert_eq!(ii.id.len(), 12);
}

#[tokio::test]
async fn s6_tile_render_with_center_image() {
    let src = MapSource::with_points(&[(0.0, 0.0)]);
    let cache = Arc::new(ImageCache::new(Arc::new(src), Store::memory(), &Config::default()).unwrap());
    let tiles = TileMap::new(cache, &Config::default()).unwrap();

    let png = tiles.photo_tile(0, 0, 0).await;
    let im = image::load_from_memory(&png).unwrap().to_rgba8();
    assert_eq!(im.dimensions(), (256, 256));

    // photo icon pixels near the tile midpoint
    let mut hit = false;
    for y in 120..136 {
        for x in 120..136 {
            hit |= im.get_pixel(x, y)[3] > 0;
        }
    }
    assert!(hit, "no icon pixels near the tile center");

    for &(x, y) in &[(0u32, 0u32), (255, 0), (0, 255), (255, 255)] {
        assert_eq!(im.get_pixel(x, y)[3], 0, "corner {x},{y} not transparent");
    }
}

#[tokio::test]
async fn http_surface_round_trip() {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    let src = MapSource::with_points(&[(10.0, 20.0), (10.000001, 20.000001)]);
    let cache = Arc::new(ImageCache::new(Arc::new(src), Store::memory(), &Config::default()).unwrap());
    let key = cache.images()[0].id.clone();
    let tiles = TileMap::new(cache.clone(), &Config::default()).unwrap();
    let app = router(Arc::new(AppState::new(tiles, cache).unwrap()));

    // photo tile
    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/tile/photo/0_0_0")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-type"], "image/png");
    let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    assert!(body.starts_with(&[0x89, b'P', b'N', b'G']));

    // malformed tile spec
    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/tile/spot/xyz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    // viewport places
    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/viewport.json?la0=0&lo0=0&la1=40&lo1=40&zoom=5")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(v["radius"].as_f64().unwrap() > 0.0);
    assert_eq!(v["coords"].as_array().unwrap().len() % 2, 0);

    // missing viewport params
    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/viewport.json?la0=0")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    // gallery at the photo pair
    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/gallery.json?la=10&lo=20&zoom=21")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let ids: Vec<String> = serde_json::from_slice(&body).unwrap();
    assert_eq!(ids.len(), 2);

    // gallery far from anything
    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/gallery.json?la=-80&lo=-170&zoom=21")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    // thumbnail with Last-Modified
    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/thumb/{key}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-type"], "image/jpeg");
    assert!(res.headers()["last-modified"]
        .to_str()
        .unwrap()
        .ends_with("GMT"));

    // startup payloads
    for uri in ["/photos.json", "/bounds.json"] {
        let res = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert!(serde_json::from_slice::<serde_json::Value>(&body).is_ok());
    }
}
