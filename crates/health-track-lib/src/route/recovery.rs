//! Event-level track point scan
//!
//! Exports sometimes contain points the `gpx` reader refuses as a whole (a missing `lat`,
//! a coordinate outside its bounds). This scan walks the XML events and keeps whatever
//! `<trkpt>` data is present, leaving validation to the caller. It is also the only reader of
//! `<extensions>` children, which the `gpx` crate does not expose for track points.

use super::RawPoint;
use crate::{DataError, Result};
use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

/// Child element whose text is being read
#[derive(Clone, PartialEq)]
enum TextField {
    Elevation,
    Time,
    /// Leaf under `<extensions>`, by local name
    Extension(String),
}

/// Collect every `<trkpt>` of a GPX document, including incomplete ones
///
/// Fails when the document is not well-formed XML, is truncated, or has no `<gpx>` root.
pub(crate) fn scan_track_points(bytes: &[u8]) -> Result<Vec<RawPoint>> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut points = Vec::new();
    let mut pending: Option<RawPoint> = None;
    let mut field: Option<TextField> = None;
    let mut in_extensions = false;
    let mut depth = 0usize;
    let mut saw_root = false;
    let mut root_closed = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                if depth == 0 {
                    saw_root = e.local_name().as_ref() == b"gpx";
                    if !saw_root {
                        return Err(not_gpx());
                    }
                }
                depth += 1;
                match e.local_name().as_ref() {
                    b"trkpt" => pending = Some(point_from_attributes(&e)?),
                    b"extensions" if pending.is_some() => in_extensions = true,
                    name if in_extensions => {
                        field = Some(TextField::Extension(
                            String::from_utf8_lossy(name).into_owned(),
                        ))
                    }
                    b"ele" if pending.is_some() => field = Some(TextField::Elevation),
                    b"time" if pending.is_some() => field = Some(TextField::Time),
                    _ => {}
                }
            }
            Event::Empty(e) => {
                if depth == 0 {
                    return Err(not_gpx());
                }
                if e.local_name().as_ref() == b"trkpt" {
                    points.push(point_from_attributes(&e)?);
                }
            }
            Event::Text(t) => {
                if let (Some(point), Some(target)) = (pending.as_mut(), field.as_ref()) {
                    let text = t.unescape()?;
                    let text = text.trim();
                    match target {
                        TextField::Elevation => point.elevation = text.parse().ok(),
                        TextField::Time => point.time = parse_time(text),
                        TextField::Extension(name) => {
                            point.extensions.insert(name.clone(), text.to_string());
                        }
                    }
                }
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                match e.local_name().as_ref() {
                    b"trkpt" => {
                        in_extensions = false;
                        if let Some(point) = pending.take() {
                            points.push(point);
                        }
                    }
                    b"extensions" => in_extensions = false,
                    _ => field = None,
                }
                if depth == 0 {
                    root_closed = true;
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        return Err(not_gpx());
    }
    if !root_closed {
        return Err(DataError::Parse {
            reason: "GPX document ends before its root element is closed".to_string(),
        });
    }

    Ok(points)
}

fn not_gpx() -> DataError {
    DataError::Parse {
        reason: "document root is not a <gpx> element".to_string(),
    }
}

/// Read `lat`/`lon` attributes; unparsable values count as missing
fn point_from_attributes(e: &BytesStart<'_>) -> Result<RawPoint> {
    let mut point = RawPoint::default();
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        match attr.key.local_name().as_ref() {
            b"lat" => point.latitude = attr.unescape_value()?.trim().parse().ok(),
            b"lon" => point.longitude = attr.unescape_value()?.trim().parse().ok(),
            _ => {}
        }
    }
    Ok(point)
}

fn parse_time(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_keeps_incomplete_points() {
        let doc = r#"<gpx version="1.1"><trk><trkseg>
            <trkpt lat="1.5" lon="2.5"><ele>3</ele><time>2020-01-01T00:00:00Z</time></trkpt>
            <trkpt lon="2.5"/>
            <trkpt lat="abc" lon="2.5"></trkpt>
        </trkseg></trk></gpx>"#;
        let points = scan_track_points(doc.as_bytes()).unwrap();

        assert_eq!(points.len(), 3);
        assert_eq!(points[0].latitude, Some(1.5));
        assert_eq!(points[0].elevation, Some(3.0));
        assert!(points[0].time.is_some());
        assert_eq!(points[1].latitude, None);
        assert_eq!(points[2].latitude, None);
        assert_eq!(points[2].longitude, Some(2.5));
    }

    #[test]
    fn test_scan_handles_namespace_prefix() {
        let doc = r#"<g:gpx xmlns:g="http://www.topografix.com/GPX/1/1"><g:trk><g:trkseg>
            <g:trkpt lat="1" lon="2"/>
        </g:trkseg></g:trk></g:gpx>"#;
        let points = scan_track_points(doc.as_bytes()).unwrap();
        assert_eq!(points.len(), 1);
    }

    #[test]
    fn test_scan_rejects_truncated_document() {
        let doc = r#"<gpx version="1.1"><trk><trkseg><trkpt lat="1" lon="2">"#;
        assert!(scan_track_points(doc.as_bytes()).is_err());
    }

    #[test]
    fn test_scan_rejects_other_roots() {
        assert!(scan_track_points(b"<kml></kml>").is_err());
        assert!(scan_track_points(b"<kml/>").is_err());
        assert!(scan_track_points(b"").is_err());
    }

    #[test]
    fn test_scan_collects_extension_leaves() {
        let doc = r#"<gpx><trk><trkseg>
            <trkpt lat="51.5" lon="-0.12"><ele>12.1</ele><time>2019-06-01T10:00:00Z</time>
              <extensions><speed>2.5</speed><course>90.1</course><hAcc>1.2</hAcc><vAcc>0.8</vAcc></extensions>
            </trkpt>
            <trkpt lat="51.6" lon="-0.12"><extensions><g:TrackPointExtension xmlns:g="urn:g"><g:hr>140</g:hr></g:TrackPointExtension></extensions></trkpt>
            <trkpt lat="51.7" lon="-0.12"/>
        </trkseg></trk></gpx>"#;
        let points = scan_track_points(doc.as_bytes()).unwrap();

        let first: Vec<(&str, &str)> = points[0]
            .extensions
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        assert_eq!(
            first,
            vec![("course", "90.1"), ("hAcc", "1.2"), ("speed", "2.5"), ("vAcc", "0.8")]
        );
        assert_eq!(points[0].elevation, Some(12.1));
        assert_eq!(points[1].extensions.get("hr").map(String::as_str), Some("140"));
        assert!(points[2].extensions.is_empty());
    }

    #[test]
    fn test_unparsable_time_is_ignored() {
        let doc = r#"<gpx><trk><trkseg>
            <trkpt lat="1" lon="2"><time>yesterday</time></trkpt>
        </trkseg></trk></gpx>"#;
        let points = scan_track_points(doc.as_bytes()).unwrap();
        assert!(points[0].time.is_none());
        assert_eq!(points[0].latitude, Some(1.0));
    }
}
