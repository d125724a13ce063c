//! Degenerate inputs, cache invalidation across restarts, and rendering
//! determinism.

mod common;

use common::MapSource;
use photomap::{AofBackend, Config, ImageCache, PhotomapError, Store, TileMap};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tempfile::TempDir;

fn durable_store(dir: &TempDir) -> Store {
    Store::new(Box::new(
        AofBackend::open(dir.path().join("imagecache.aof")).unwrap(),
    ))
}

#[test]
fn empty_source_fails_map_construction() {
    let cache = Arc::new(
        ImageCache::new(Arc::new(MapSource::new()), Store::memory(), &Config::default()).unwrap(),
    );
    assert!(cache.images().is_empty());
    assert!(matches!(
        TileMap::new(cache, &Config::default()),
        Err(PhotomapError::NoGeotaggedImages)
    ));
}

#[test]
fn cache_key_is_stable_across_restarts() {
    let dir = TempDir::new().unwrap();
    let mk_source = || {
        let mut s = MapSource::new();
        s.add_image("the-one", 1.0, 2.0, UNIX_EPOCH + Duration::from_secs(7));
        Arc::new(s)
    };

    let first = {
        let cache = ImageCache::new(mk_source(), durable_store(&dir), &Config::default()).unwrap();
        cache.images()[0].id.clone()
    };
    let second = {
        let cache = ImageCache::new(mk_source(), durable_store(&dir), &Config::default()).unwrap();
        cache.images()[0].id.clone()
    };
    assert_eq!(first, second);
}

#[test]
fn second_warmup_trusts_cached_rows() {
    let dir = TempDir::new().unwrap();
    let src = {
        let mut s = MapSource::new();
        s.add_image("a", 1.0, 2.0, UNIX_EPOCH + Duration::from_secs(7));
        s.add_image("b", 3.0, 4.0, UNIX_EPOCH + Duration::from_secs(8));
        Arc::new(s)
    };

    {
        let _ = ImageCache::new(src.clone(), durable_store(&dir), &Config::default()).unwrap();
    }
    assert_eq!(src.info_calls.load(Ordering::SeqCst), 2);

    {
        let cache =
            ImageCache::new(src.clone(), durable_store(&dir), &Config::default()).unwrap();
        assert_eq!(cache.images().len(), 2);
    }
    // cached rows answered the second warmup
    assert_eq!(src.info_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn modtime_advance_invalidates_derived_artifacts() {
    let dir = TempDir::new().unwrap();
    let src = {
        let mut s = MapSource::new();
        s.add_image("a", 1.0, 2.0, UNIX_EPOCH + Duration::from_secs(100));
        Arc::new(s)
    };

    let key = {
        let cache = Arc::new(
            ImageCache::new(src.clone(), durable_store(&dir), &Config::default()).unwrap(),
        );
        let key = cache.images()[0].id.clone();
        cache.photo_icon(&key).await.expect("icon generated");
        key
    };
    assert_eq!(src.open_calls.load(Ordering::SeqCst), 1);

    // unchanged source: the icon row survives the restart, no new read
    {
        let cache = Arc::new(
            ImageCache::new(src.clone(), durable_store(&dir), &Config::default()).unwrap(),
        );
        cache.photo_icon(&key).await.expect("icon from store");
    }
    assert_eq!(src.open_calls.load(Ordering::SeqCst), 1);

    // advanced modtime: warmup drops the stale icon, forcing a re-read
    src.set_mod_time("a", UNIX_EPOCH + Duration::from_secs(200));
    {
        let cache = Arc::new(
            ImageCache::new(src.clone(), durable_store(&dir), &Config::default()).unwrap(),
        );
        cache.photo_icon(&key).await.expect("icon regenerated");
    }
    assert_eq!(src.open_calls.load(Ordering::SeqCst), 2);
}

#[test]
fn broken_images_are_remembered_across_restarts() {
    let dir = TempDir::new().unwrap();
    let src = {
        let mut s = MapSource::new();
        s.add_image("good", 1.0, 2.0, UNIX_EPOCH + Duration::from_secs(5));
        // modtime registered but no info/bytes: reads fail
        s.set_mod_time("broken", UNIX_EPOCH + Duration::from_secs(5));
        Arc::new(s)
    };

    {
        let cache =
            ImageCache::new(src.clone(), durable_store(&dir), &Config::default()).unwrap();
        assert_eq!(cache.images().len(), 1);
    }
    assert_eq!(src.info_calls.load(Ordering::SeqCst), 2);

    {
        let cache =
            ImageCache::new(src.clone(), durable_store(&dir), &Config::default()).unwrap();
        assert_eq!(cache.images().len(), 1);
    }
    // the negative entry was trusted: no new info call for the broken image
    assert_eq!(src.info_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn tile_bytes_identical_across_restarts() {
    let dir = TempDir::new().unwrap();
    let pts: &[(f64, f64)] = &[
        (47.5, 19.05),
        (47.5001, 19.0501),
        (47.5002, 19.0502),
        (-33.86, 151.2),
    ];

    let render = |store: Store| async {
        let cache = Arc::new(
            ImageCache::new(
                Arc::new(MapSource::with_points(pts)),
                store,
                &Config::default(),
            )
            .unwrap(),
        );
        let tiles = TileMap::new(cache, &Config::default()).unwrap();
        (
            tiles.photo_tile(0, 0, 0).await,
            tiles.spot_tile(0, 0, 0).await,
        )
    };

    let (photo_a, spot_a) = render(durable_store(&dir)).await;
    let (photo_b, spot_b) = render(durable_store(&dir)).await;
    assert_eq!(photo_a, photo_b);
    assert_eq!(spot_a, spot_b);
}

#[tokio::test]
async fn wrapped_tile_x_renders_the_same_tile() {
    let cache = Arc::new(
        ImageCache::new(
            Arc::new(MapSource::with_points(&[(10.0, 20.0)])),
            Store::memory(),
            &Config::default(),
        )
        .unwrap(),
    );
    let tiles = TileMap::new(cache, &Config::default()).unwrap();

    let a = tiles.photo_tile(1, 1, 2).await;
    let b = tiles.photo_tile(1 - 4, 1, 2).await;
    let c = tiles.photo_tile(1 + 4, 1, 2).await;
    assert_eq!(a, b);
    assert_eq!(a, c);
}

#[test]
fn poles_are_clamped_at_ingest() {
    let mut s = MapSource::new();
    s.add_image("np", 89.9, 10.0, UNIX_EPOCH + Duration::from_secs(5));
    let cache =
        ImageCache::new(Arc::new(s), Store::memory(), &Config::default()).unwrap();
    assert_eq!(cache.images()[0].lat, 85.0);
    // the clamped value still projects to a finite coordinate
    assert!(photomap::projection::lat_to_merc(cache.images()[0].lat).is_finite());
}
