//! Web Mercator latitude projection.
//!
//! Longitudes are used as-is; latitudes are projected so that distances in
//! the spatial indexes are scale-consistent with longitude degrees.

use std::f64::consts::PI;

/// Latitudes are restricted to this range so the projection stays finite.
pub const MAX_LAT: f64 = 85.0;

/// Projects a latitude (-85..85) to a vertical Mercator coordinate in the
/// range of roughly (-180..180), so that locations appear evenly spaced on
/// a Mercator map.
pub fn lat_to_merc(lat: f64) -> f64 {
    180.0 / PI * (PI / 4.0 + lat * PI / 180.0 / 2.0).tan().ln()
}

/// Inverse of [`lat_to_merc`].
pub fn merc_to_lat(y: f64) -> f64 {
    180.0 / PI * (2.0 * (y * PI / 180.0).exp().atan() - PI / 2.0)
}

/// Clamps a latitude to the projectable range.
pub fn clamp_lat(lat: f64) -> f64 {
    lat.clamp(-MAX_LAT, MAX_LAT)
}
