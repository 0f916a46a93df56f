//! Utility functions for coordinate validation, source identifiers and extents

use crate::Coordinate;
use geo::{Coord, Rect};
use std::path::{Component, Path};

/// Valid WGS84 latitude range in degrees
pub const MAX_LATITUDE: f64 = 90.0;
pub const MIN_LATITUDE: f64 = -90.0;

/// Valid WGS84 longitude range in degrees
pub const MAX_LONGITUDE: f64 = 180.0;
pub const MIN_LONGITUDE: f64 = -180.0;

/// Check if a latitude/longitude pair is finite and within WGS84 bounds
#[inline(always)]
pub fn is_valid_wgs84(lat: f64, lon: f64) -> bool {
    lat.is_finite()
        && lon.is_finite()
        && (MIN_LATITUDE..=MAX_LATITUDE).contains(&lat)
        && (MIN_LONGITUDE..=MAX_LONGITUDE).contains(&lon)
}

/// Derive a stable source identifier for a route file
///
/// The identifier is the path relative to `root`, joined with `/` so that it is the same
/// on every platform and independent of the order files were discovered in. Paths outside
/// `root` keep their whole path, so two files sharing a name never share an identifier.
pub fn source_id_for(root: &Path, path: &Path) -> String {
    let relative = match path.strip_prefix(root) {
        Ok(rel) if !rel.as_os_str().is_empty() => rel,
        _ => return path.to_string_lossy().into_owned(),
    };

    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Bounding box of a set of coordinates (x = longitude, y = latitude)
///
/// Returns `None` for an empty input.
pub fn bounding_box<'a>(coords: impl IntoIterator<Item = &'a Coordinate>) -> Option<Rect<f64>> {
    let mut iter = coords.into_iter();
    let first = iter.next()?;

    let mut min_x = first.longitude;
    let mut min_y = first.latitude;
    let mut max_x = first.longitude;
    let mut max_y = first.latitude;

    for c in iter {
        min_x = min_x.min(c.longitude);
        min_y = min_y.min(c.latitude);
        max_x = max_x.max(c.longitude);
        max_y = max_y.max(c.latitude);
    }

    Some(Rect::new(
        Coord { x: min_x, y: min_y },
        Coord { x: max_x, y: max_y },
    ))
}

/// Arithmetic mean of latitudes and longitudes, as `(lat, lon)`
///
/// Returns `None` for an empty input.
pub fn mean_center<'a>(coords: impl IntoIterator<Item = &'a Coordinate>) -> Option<(f64, f64)> {
    let (count, lat_sum, lon_sum) = coords
        .into_iter()
        .fold((0usize, 0.0f64, 0.0f64), |(n, lat, lon), c| {
            (n + 1, lat + c.latitude, lon + c.longitude)
        });

    if count == 0 {
        return None;
    }
    Some((lat_sum / count as f64, lon_sum / count as f64))
}
