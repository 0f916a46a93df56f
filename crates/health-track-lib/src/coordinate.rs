//! Validated GPS coordinate tagged with its source route

use crate::{DataError, Result, utils};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single GPS point of the unified dataset
///
/// Construction through [`Coordinate::new`] guarantees that latitude and longitude are finite
/// and inside the WGS84 range. This is also the row layout of the coordinates table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Recorded time of the point, if the source had one
    #[serde(default, alias = "time")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Stable identifier of the source route file
    #[serde(alias = "filename")]
    pub source_id: String,
    /// Elevation in meters, if the source had one
    #[serde(default)]
    pub elevation: Option<f64>,
    /// Per-point `<extensions>` values, by element name, as written in the source
    ///
    /// Stored in tables as one JSON object column, empty when there are none.
    #[serde(default, with = "extensions_column")]
    pub extensions: BTreeMap<String, String>,
}

impl Coordinate {
    /// Create a coordinate, rejecting out-of-range or non-finite positions
    pub fn new(
        latitude: f64,
        longitude: f64,
        timestamp: Option<DateTime<Utc>>,
        source_id: impl Into<String>,
    ) -> Result<Self> {
        if !utils::is_valid_wgs84(latitude, longitude) {
            return Err(DataError::InvalidCoordinate {
                latitude,
                longitude,
            });
        }

        Ok(Self {
            latitude,
            longitude,
            timestamp,
            source_id: source_id.into(),
            elevation: None,
            extensions: BTreeMap::new(),
        })
    }

    /// Attach an elevation in meters
    #[inline]
    pub fn with_elevation(mut self, elevation: Option<f64>) -> Self {
        self.elevation = elevation.filter(|e| e.is_finite());
        self
    }

    /// Attach `<extensions>` values
    #[inline]
    pub fn with_extensions(mut self, extensions: BTreeMap<String, String>) -> Self {
        self.extensions = extensions;
        self
    }

    /// Re-check the range invariant, for rows that bypassed [`Coordinate::new`]
    #[inline]
    pub fn is_valid(&self) -> bool {
        utils::is_valid_wgs84(self.latitude, self.longitude)
    }

    /// `[lat, lon]` pair as expected by map renderers
    #[inline]
    pub fn lat_lon(&self) -> [f64; 2] {
        [self.latitude, self.longitude]
    }
}

mod extensions_column {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        extensions: &BTreeMap<String, String>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        if extensions.is_empty() {
            return serializer.serialize_str("");
        }
        let json = serde_json::to_string(extensions)
            .map_err(<S::Error as serde::ser::Error>::custom)?;
        serializer.serialize_str(&json)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, String>, D::Error> {
        let text = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        let values: BTreeMap<String, serde_json::Value> =
            serde_json::from_str(&text).map_err(D::Error::custom)?;
        Ok(values
            .into_iter()
            .map(|(name, value)| match value {
                serde_json::Value::String(text) => (name, text),
                other => (name, other.to_string()),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_coordinate() {
        let c = Coordinate::new(51.5074, -0.1278, None, "route.gpx").unwrap();
        assert_eq!(c.source_id, "route.gpx");
        assert!(c.is_valid());
        assert_eq!(c.lat_lon(), [51.5074, -0.1278]);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let err = Coordinate::new(120.0, 0.0, None, "route.gpx").unwrap_err();
        assert!(matches!(err, DataError::InvalidCoordinate { .. }));
        assert!(Coordinate::new(0.0, 181.0, None, "route.gpx").is_err());
        assert!(Coordinate::new(f64::NAN, 0.0, None, "route.gpx").is_err());
    }

    #[test]
    fn test_with_elevation_ignores_non_finite() {
        let c = Coordinate::new(1.0, 2.0, None, "a")
            .unwrap()
            .with_elevation(Some(f64::NAN));
        assert_eq!(c.elevation, None);

        let c = c.with_elevation(Some(12.5));
        assert_eq!(c.elevation, Some(12.5));
    }
}
