//! Route file parsing module
//!
//! This module turns one GPX workout file into a [`RouteTrace`]: the ordered, validated
//! coordinates of that file. Route files are single workouts, so the whole file is read
//! and parsed in memory.

mod recovery;

use crate::{Coordinate, DataError, IssueSummary, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::Path;

/// What to do with a track point that has coordinates but no timestamp
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MissingTimestamp {
    /// Keep the point with an empty timestamp
    #[default]
    Keep,
    /// Drop the point and count it
    Drop,
}

/// When a well-formed route file counts as empty
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EmptyCriterion {
    /// Only files without a single track point element are empty
    NoPointElements,
    /// Files whose points were all filtered out are empty too
    #[default]
    NoRetainedPoints,
}

/// Per-file parsing policy
#[derive(Clone, Copy, Debug, Default)]
pub struct ParseOptions {
    pub missing_timestamp: MissingTimestamp,
    pub empty_criterion: EmptyCriterion,
}

/// The ordered coordinates of a single route file
#[derive(Clone, Debug, PartialEq)]
pub struct RouteTrace {
    source_id: String,
    coordinates: Vec<Coordinate>,
}

impl RouteTrace {
    /// Identifier of the file the trace came from
    #[inline]
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Coordinates in the file's native point order
    #[inline]
    pub fn coordinates(&self) -> &[Coordinate] {
        &self.coordinates
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.coordinates.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }

    /// Give up the trace, keeping its coordinates
    #[inline]
    pub fn into_coordinates(self) -> Vec<Coordinate> {
        self.coordinates
    }
}

/// Result of parsing one route file
#[derive(Clone, Debug)]
pub struct RouteParse {
    pub trace: RouteTrace,
    /// Number of track point elements found in the file
    pub point_elements: usize,
    /// Points skipped while building the trace
    pub issues: IssueSummary,
    /// Whether the strict GPX reader rejected the file and the tolerant scan was used
    pub recovered: bool,
}

/// A track point as read from the file, before validation
#[derive(Clone, Debug, Default)]
pub(crate) struct RawPoint {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub elevation: Option<f64>,
    pub time: Option<DateTime<Utc>>,
    /// `<extensions>` leaves (Apple routes carry `speed`, `course`, `hAcc`, `vAcc`)
    pub extensions: BTreeMap<String, String>,
}

/// Parse a GPX route file into a [`RouteTrace`]
///
/// # Errors
/// * [`DataError::GpxParse`] / [`DataError::Parse`] / [`DataError::Xml`] when the file is
///   malformed beyond recovery
/// * [`DataError::EmptyRoute`] when it is well-formed but empty under `options.empty_criterion`
/// * [`DataError::Io`] when it cannot be read
pub fn parse_route_file(
    path: &Path,
    source_id: &str,
    options: &ParseOptions,
) -> Result<RouteParse> {
    #[cfg(feature = "profiling")]
    profiling::scope!("route::parse_route_file");

    let bytes = std::fs::read(path)?;
    parse_route_bytes(&bytes, source_id, options)
}

/// Parse GPX content already held in memory
pub(crate) fn parse_route_bytes(
    bytes: &[u8],
    source_id: &str,
    options: &ParseOptions,
) -> Result<RouteParse> {
    let (raw_points, recovered) = match gpx::read(bytes) {
        Ok(gpx_data) => {
            let mut points = points_from_gpx(&gpx_data);
            attach_extensions(bytes, &mut points, source_id);
            (points, false)
        }
        Err(strict_err) => {
            tracing::debug!(
                source_id,
                "Strict GPX read failed ({strict_err}), scanning track points leniently"
            );
            match recovery::scan_track_points(bytes) {
                Ok(points) => (points, true),
                Err(scan_err) => {
                    tracing::debug!(source_id, "Lenient scan failed: {scan_err}");
                    return Err(DataError::GpxParse(strict_err));
                }
            }
        }
    };

    build_trace(raw_points, source_id, options, recovered)
}

/// Flatten every track segment of a parsed GPX document, in document order
fn points_from_gpx(gpx_data: &gpx::Gpx) -> Vec<RawPoint> {
    gpx_data
        .tracks
        .iter()
        .flat_map(|track| track.segments.iter())
        .flat_map(|segment| segment.points.iter())
        .map(|waypoint| {
            let point = waypoint.point();
            RawPoint {
                latitude: Some(point.y()),
                longitude: Some(point.x()),
                elevation: waypoint.elevation,
                time: waypoint.time.clone().and_then(gpx_time_to_utc),
                extensions: BTreeMap::new(),
            }
        })
        .collect()
}

/// Fill in the extension values the `gpx` reader skipped
///
/// Points are matched by position. When the event scan disagrees with the strict reader on
/// the number of points, the extensions are left out for the file.
fn attach_extensions(bytes: &[u8], points: &mut [RawPoint], source_id: &str) {
    const CLOSING_TAG: &[u8] = b"extensions>";
    if !bytes.windows(CLOSING_TAG.len()).any(|w| w == CLOSING_TAG) {
        return;
    }

    match recovery::scan_track_points(bytes) {
        Ok(scanned) if scanned.len() == points.len() => {
            for (point, scanned) in points.iter_mut().zip(scanned) {
                point.extensions = scanned.extensions;
            }
        }
        Ok(scanned) => tracing::debug!(
            source_id,
            "Extension scan found {} points, expected {}; skipping extensions",
            scanned.len(),
            points.len()
        ),
        Err(e) => tracing::debug!(source_id, "Extension scan failed: {e}"),
    }
}

fn gpx_time_to_utc(gpx_time: gpx::Time) -> Option<DateTime<Utc>> {
    let odt: time::OffsetDateTime = gpx_time.into();
    DateTime::from_timestamp(odt.unix_timestamp(), odt.nanosecond())
}

/// Validate raw points and apply the parsing policy
fn build_trace(
    raw_points: Vec<RawPoint>,
    source_id: &str,
    options: &ParseOptions,
    recovered: bool,
) -> Result<RouteParse> {
    let point_elements = raw_points.len();
    let mut issues = IssueSummary::default();
    let mut coordinates = Vec::with_capacity(point_elements);

    for raw in raw_points {
        let (Some(lat), Some(lon)) = (raw.latitude, raw.longitude) else {
            issues.missing_coordinates += 1;
            continue;
        };

        if raw.time.is_none() && options.missing_timestamp == MissingTimestamp::Drop {
            issues.untimed_points += 1;
            continue;
        }

        match Coordinate::new(lat, lon, raw.time, source_id) {
            Ok(coord) => coordinates.push(
                coord
                    .with_elevation(raw.elevation)
                    .with_extensions(raw.extensions),
            ),
            Err(_) => issues.invalid_coordinates += 1,
        }
    }

    if issues.missing_coordinates > 0 {
        tracing::warn!(
            source_id,
            "Skipped {} track points without latitude/longitude",
            issues.missing_coordinates
        );
    }
    if issues.invalid_coordinates > 0 {
        tracing::warn!(
            source_id,
            "Dropped {} track points outside WGS84 bounds",
            issues.invalid_coordinates
        );
    }

    let is_empty = match options.empty_criterion {
        EmptyCriterion::NoPointElements => point_elements == 0,
        EmptyCriterion::NoRetainedPoints => coordinates.is_empty(),
    };
    if is_empty {
        return Err(DataError::EmptyRoute);
    }

    Ok(RouteParse {
        trace: RouteTrace {
            source_id: source_id.to_string(),
            coordinates,
        },
        point_elements,
        issues,
        recovered,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="Apple Health Export" xmlns="http://www.topografix.com/GPX/1/1">
<trk><name>Route 2019-06-01 10:00am</name><trkseg>"#;
    const FOOTER: &str = "</trkseg></trk></gpx>";

    fn gpx_doc(points: &str) -> String {
        format!("{HEADER}{points}{FOOTER}")
    }

    fn trkpt(lat: f64, lon: f64, time: &str) -> String {
        format!(
            r#"<trkpt lat="{lat}" lon="{lon}"><ele>12.5</ele><time>{time}</time></trkpt>"#
        )
    }

    fn parse(doc: &str, options: &ParseOptions) -> Result<RouteParse> {
        parse_route_bytes(doc.as_bytes(), "route.gpx", options)
    }

    #[test]
    fn test_parse_well_formed_route() {
        let points: String = (0..3)
            .map(|i| trkpt(51.5 + i as f64 * 0.001, -0.12, "2019-06-01T10:00:00Z"))
            .collect();
        let parsed = parse(&gpx_doc(&points), &ParseOptions::default()).unwrap();

        assert_eq!(parsed.trace.len(), 3);
        assert_eq!(parsed.point_elements, 3);
        assert!(parsed.issues.is_clean());
        assert!(!parsed.recovered);

        let first = &parsed.trace.coordinates()[0];
        assert_eq!(first.source_id, "route.gpx");
        assert_eq!(first.elevation, Some(12.5));
        assert_eq!(
            first.timestamp.unwrap().to_rfc3339(),
            "2019-06-01T10:00:00+00:00"
        );
    }

    #[test]
    fn test_apple_extensions_are_kept() {
        let points = format!(
            "{}{}",
            r#"<trkpt lat="51.5" lon="-0.12"><ele>12.1</ele><time>2019-06-01T10:00:00Z</time><extensions><speed>2.5</speed><course>90.1</course><hAcc>1.2</hAcc><vAcc>0.8</vAcc></extensions></trkpt>"#,
            trkpt(51.6, -0.12, "2019-06-01T10:00:01Z"),
        );
        let parsed = parse(&gpx_doc(&points), &ParseOptions::default()).unwrap();
        assert!(!parsed.recovered);

        let first = &parsed.trace.coordinates()[0];
        assert_eq!(first.elevation, Some(12.1));
        assert_eq!(first.extensions.get("speed").map(String::as_str), Some("2.5"));
        assert_eq!(first.extensions.get("course").map(String::as_str), Some("90.1"));
        assert_eq!(first.extensions.get("hAcc").map(String::as_str), Some("1.2"));
        assert_eq!(first.extensions.get("vAcc").map(String::as_str), Some("0.8"));
        assert!(parsed.trace.coordinates()[1].extensions.is_empty());
    }

    #[test]
    fn test_extensions_kept_on_recovered_files() {
        let points = format!(
            "{}{}",
            r#"<trkpt lat="51.5" lon="-0.12"><extensions><speed>3.0</speed></extensions></trkpt>"#,
            r#"<trkpt lon="-0.12"/>"#,
        );
        let parsed = parse(&gpx_doc(&points), &ParseOptions::default()).unwrap();
        assert!(parsed.recovered);
        assert_eq!(
            parsed.trace.coordinates()[0].extensions.get("speed").map(String::as_str),
            Some("3.0")
        );
    }

    #[test]
    fn test_point_order_preserved() {
        let points: String = (0..10)
            .map(|i| trkpt(10.0 + i as f64, 20.0, "2019-06-01T10:00:00Z"))
            .collect();
        let parsed = parse(&gpx_doc(&points), &ParseOptions::default()).unwrap();
        let lats: Vec<f64> = parsed
            .trace
            .coordinates()
            .iter()
            .map(|c| c.latitude)
            .collect();
        assert_eq!(lats, (0..10).map(|i| 10.0 + i as f64).collect::<Vec<_>>());
    }

    #[test]
    fn test_points_without_coordinates_are_skipped() {
        let points = format!(
            "{}{}{}",
            trkpt(51.5, -0.12, "2019-06-01T10:00:00Z"),
            r#"<trkpt lon="-0.12"><time>2019-06-01T10:00:01Z</time></trkpt>"#,
            trkpt(51.6, -0.12, "2019-06-01T10:00:02Z"),
        );
        let parsed = parse(&gpx_doc(&points), &ParseOptions::default()).unwrap();

        assert!(parsed.recovered);
        assert_eq!(parsed.point_elements, 3);
        assert_eq!(parsed.trace.len(), 2);
        assert_eq!(parsed.issues.missing_coordinates, 1);
    }

    #[test]
    fn test_out_of_range_points_are_dropped() {
        let points = format!(
            "{}{}",
            trkpt(51.5, -0.12, "2019-06-01T10:00:00Z"),
            trkpt(95.0, -0.12, "2019-06-01T10:00:01Z"),
        );
        let parsed = parse(&gpx_doc(&points), &ParseOptions::default()).unwrap();

        assert_eq!(parsed.trace.len(), 1);
        assert_eq!(parsed.issues.invalid_coordinates, 1);
        assert!(parsed.trace.coordinates().iter().all(|c| c.is_valid()));
    }

    #[test]
    fn test_output_never_exceeds_point_elements() {
        let points = format!(
            "{}{}{}",
            trkpt(0.0, 0.0, "2019-06-01T10:00:00Z"),
            trkpt(-91.0, 0.0, "2019-06-01T10:00:01Z"),
            r#"<trkpt lat="1.0"/>"#,
        );
        let parsed = parse(&gpx_doc(&points), &ParseOptions::default()).unwrap();
        assert!(parsed.trace.len() <= parsed.point_elements);
    }

    #[test]
    fn test_empty_route_fails() {
        let result = parse(&gpx_doc(""), &ParseOptions::default());
        assert!(matches!(result, Err(DataError::EmptyRoute)));
    }

    #[test]
    fn test_all_filtered_route_depends_on_criterion() {
        let doc = gpx_doc(&trkpt(100.0, 0.0, "2019-06-01T10:00:00Z"));

        let strict = parse(&doc, &ParseOptions::default());
        assert!(matches!(strict, Err(DataError::EmptyRoute)));

        let options = ParseOptions {
            empty_criterion: EmptyCriterion::NoPointElements,
            ..Default::default()
        };
        let parsed = parse(&doc, &options).unwrap();
        assert!(parsed.trace.is_empty());
        assert_eq!(parsed.issues.invalid_coordinates, 1);
    }

    #[test]
    fn test_missing_timestamp_policy() {
        let points = format!(
            "{}{}",
            trkpt(51.5, -0.12, "2019-06-01T10:00:00Z"),
            r#"<trkpt lat="51.6" lon="-0.12"></trkpt>"#,
        );
        let doc = gpx_doc(&points);

        let kept = parse(&doc, &ParseOptions::default()).unwrap();
        assert_eq!(kept.trace.len(), 2);
        assert!(kept.trace.coordinates()[1].timestamp.is_none());

        let options = ParseOptions {
            missing_timestamp: MissingTimestamp::Drop,
            ..Default::default()
        };
        let dropped = parse(&doc, &options).unwrap();
        assert_eq!(dropped.trace.len(), 1);
        assert_eq!(dropped.issues.untimed_points, 1);
    }

    #[test]
    fn test_malformed_xml_is_parse_error() {
        let doc = format!("{HEADER}<trkpt lat=\"1\" lon=\"2\"><time>");
        let result = parse(&doc, &ParseOptions::default());
        assert!(matches!(result, Err(DataError::GpxParse(_))));
    }

    #[test]
    fn test_non_gpx_document_is_parse_error() {
        let result = parse("<kml><Placemark/></kml>", &ParseOptions::default());
        assert!(result.is_err());
        assert!(!matches!(result, Err(DataError::EmptyRoute)));
    }

    #[test]
    fn test_parse_route_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("route.gpx");
        std::fs::write(&path, gpx_doc(&trkpt(1.0, 2.0, "2019-06-01T10:00:00Z"))).unwrap();

        let parsed = parse_route_file(&path, "route.gpx", &ParseOptions::default()).unwrap();
        assert_eq!(parsed.trace.source_id(), "route.gpx");
        assert_eq!(parsed.trace.len(), 1);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = parse_route_file(
            Path::new("/nonexistent/route.gpx"),
            "route.gpx",
            &ParseOptions::default(),
        );
        assert!(matches!(result, Err(DataError::Io(_))));
    }
}
