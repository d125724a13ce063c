//! HTTP surface over the tile map and the image cache.
//!
//! A thin axum shim: handlers parse parameters, delegate to the core, and
//! shape the responses. Bad parameters earn a 400; missing galleries and
//! thumbnails a 404. Tiles always render, possibly with fewer icons.

use crate::error::Result;
use crate::imagecache::ImageCache;
use crate::tiler::TileMap;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;
use tower_http::trace::TraceLayer;
use tracing::warn;

pub struct AppState {
    pub tiles: TileMap,
    pub cache: Arc<ImageCache>,

    // startup payloads
    photos: Bytes,
    bounds: Bytes,
}

impl AppState {
    pub fn new(tiles: TileMap, cache: Arc<ImageCache>) -> Result<Self> {
        #[derive(Serialize)]
        struct PhotoCoord {
            lat: f64,
            lng: f64,
        }
        let coords: Vec<PhotoCoord> = cache
            .images()
            .iter()
            .map(|ii| PhotoCoord {
                lat: ii.lat,
                lng: ii.long,
            })
            .collect();
        let photos = Bytes::from(serde_json::to_vec(&coords)?);
        let bounds = Bytes::from(serde_json::to_vec(&tiles.find_start_location())?);
        Ok(AppState {
            tiles,
            cache,
            photos,
            bounds,
        })
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/tile/spot/:spec", get(spot_tile))
        .route("/tile/photo/:spec", get(photo_tile))
        .route("/viewport.json", get(viewport))
        .route("/gallery.json", get(gallery))
        .route("/thumb/:key", get(thumb))
        .route("/photos.json", get(photos))
        .route("/bounds.json", get(bounds))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Parses a `{x}_{y}_{zoom}` tile path segment.
fn parse_tile_spec(spec: &str) -> Option<(i64, i64, u32)> {
    let mut parts = spec.split('_');
    let x = parts.next()?.parse().ok()?;
    let y = parts.next()?.parse().ok()?;
    let zoom: u32 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || zoom > 30 {
        return None;
    }
    Some((x, y, zoom))
}

fn png_response(bytes: Bytes) -> Response {
    ([(header::CONTENT_TYPE, "image/png")], bytes).into_response()
}

fn json_response(bytes: Bytes) -> Response {
    ([(header::CONTENT_TYPE, "application/json")], bytes).into_response()
}

async fn spot_tile(State(state): State<Arc<AppState>>, Path(spec): Path<String>) -> Response {
    match parse_tile_spec(&spec) {
        Some((x, y, zoom)) => png_response(state.tiles.spot_tile(x, y, zoom).await),
        None => (StatusCode::BAD_REQUEST, "invalid tile path").into_response(),
    }
}

async fn photo_tile(State(state): State<Arc<AppState>>, Path(spec): Path<String>) -> Response {
    match parse_tile_spec(&spec) {
        Some((x, y, zoom)) => png_response(state.tiles.photo_tile(x, y, zoom).await),
        None => (StatusCode::BAD_REQUEST, "invalid tile path").into_response(),
    }
}

#[derive(Deserialize)]
struct ViewportParams {
    la0: f64,
    lo0: f64,
    la1: f64,
    lo1: f64,
    zoom: u32,
}

#[derive(Serialize)]
struct ViewportResponse {
    radius: f64,
    coords: Vec<f64>,
}

async fn viewport(
    State(state): State<Arc<AppState>>,
    Query(p): Query<ViewportParams>,
) -> Response {
    if ![p.la0, p.lo0, p.la1, p.lo1].iter().all(|v| v.is_finite()) {
        return (StatusCode::BAD_REQUEST, "bounds invalid").into_response();
    }
    let (places, radius) = state.tiles.photo_places(p.la0, p.lo0, p.la1, p.lo1, p.zoom);
    let mut coords = Vec::with_capacity(places.len() * 2);
    for (lat, long) in places {
        coords.push(round6(lat));
        coords.push(round6(long));
    }
    Json(ViewportResponse { radius, coords }).into_response()
}

#[derive(Deserialize)]
struct GalleryParams {
    la: f64,
    lo: f64,
    zoom: u32,
}

async fn gallery(State(state): State<Arc<AppState>>, Query(p): Query<GalleryParams>) -> Response {
    if !(p.la.is_finite() && p.lo.is_finite()) {
        return (StatusCode::BAD_REQUEST, "loc invalid").into_response();
    }
    let ids = state.tiles.gallery(p.la, p.lo, p.zoom);
    if ids.is_empty() {
        return StatusCode::NOT_FOUND.into_response();
    }
    Json(ids).into_response()
}

async fn thumb(State(state): State<Arc<AppState>>, Path(key): Path<String>) -> Response {
    match state.cache.thumbnail(&key).await {
        Ok((jpeg, mt)) => (
            [
                (header::CONTENT_TYPE, "image/jpeg".to_string()),
                (header::LAST_MODIFIED, http_date(mt)),
            ],
            jpeg,
        )
            .into_response(),
        Err(err) => {
            warn!("thumbnail {key}: {err}");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

async fn photos(State(state): State<Arc<AppState>>) -> Response {
    json_response(state.photos.clone())
}

async fn bounds(State(state): State<Arc<AppState>>) -> Response {
    json_response(state.bounds.clone())
}

fn round6(v: f64) -> f64 {
    (v * 1e6).round() / 1e6
}

fn http_date(t: SystemTime) -> String {
    chrono::DateTime::<chrono::Utc>::from(t)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}
