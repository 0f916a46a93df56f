//! Map composition
//!
//! [`MapScene`] gathers everything a map needs (sampled route lines per source, the weighted
//! heatmap points, the initial view) and a [`MapRenderer`] turns it into a document. The only
//! renderer shipped is [`LeafletDocument`], a self-contained HTML page driving Leaflet and
//! Leaflet.heat from a CDN.

use crate::sampler::{density_sample, sample};
use crate::{DataError, Result, UnifiedDataset, utils};
use geo::Rect;
use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::num::NonZeroUsize;
use std::path::Path;
use std::str::FromStr;

const LEAFLET_CSS: &str = "https://unpkg.com/leaflet@1.9.4/dist/leaflet.css";
const LEAFLET_JS: &str = "https://unpkg.com/leaflet@1.9.4/dist/leaflet.js";
const LEAFLET_HEAT_JS: &str = "https://unpkg.com/leaflet.heat@0.2.0/dist/leaflet-heat.js";

/// Available base map tile providers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BaseMap {
    #[default]
    CartoDbPositron,
    OpenStreetMap,
    OpenTopoMap,
}

impl BaseMap {
    pub fn url(&self) -> &'static str {
        match self {
            Self::CartoDbPositron => "https://{s}.basemaps.cartocdn.com/light_all/{z}/{x}/{y}{r}.png",
            Self::OpenStreetMap => "https://tile.openstreetmap.org/{z}/{x}/{y}.png",
            Self::OpenTopoMap => "https://tile.opentopomap.org/{z}/{x}/{y}.png",
        }
    }

    pub fn attribution(&self) -> &'static str {
        match self {
            Self::CartoDbPositron => "© OpenStreetMap contributors © CARTO",
            Self::OpenStreetMap => "© OpenStreetMap contributors",
            Self::OpenTopoMap => "© OpenTopoMap (CC-BY-SA)",
        }
    }

    pub fn all() -> &'static [Self] {
        &[Self::CartoDbPositron, Self::OpenStreetMap, Self::OpenTopoMap]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::CartoDbPositron => "cartodb-positron",
            Self::OpenStreetMap => "openstreetmap",
            Self::OpenTopoMap => "opentopomap",
        }
    }
}

impl fmt::Display for BaseMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BaseMap {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace([' ', '_'], "-");
        Self::all()
            .iter()
            .copied()
            .find(|map| map.name() == wanted)
            .ok_or_else(|| {
                let names: Vec<_> = Self::all().iter().map(|m| m.name()).collect();
                format!("unknown base map '{s}', expected one of: {}", names.join(", "))
            })
    }
}

/// Visual parameters of the map
#[derive(Clone, Debug, PartialEq)]
pub struct MapStyle {
    /// CSS color of route lines
    pub line_color: String,
    pub line_weight: f64,
    pub line_opacity: f64,
    /// Heat layer blur, in pixels
    pub blur: f64,
    /// Heat layer point radius, in pixels
    pub radius: f64,
    /// Lowest heat weight any point may have
    pub min_opacity: f64,
    pub base_map: BaseMap,
    pub zoom_start: u8,
}

impl Default for MapStyle {
    fn default() -> Self {
        Self {
            line_color: "blue".to_string(),
            line_weight: 2.0,
            line_opacity: 0.6,
            blur: 20.0,
            radius: 15.0,
            min_opacity: 0.3,
            base_map: BaseMap::default(),
            zoom_start: 12,
        }
    }
}

impl MapStyle {
    /// Reject parameters the heat layer cannot draw
    pub fn validate(&self) -> Result<()> {
        if !(self.radius.is_finite() && self.radius > 0.0) {
            return Err(DataError::InvalidSampling(format!(
                "heatmap radius must be positive, got {}",
                self.radius
            )));
        }
        if !(self.blur.is_finite() && self.blur >= 0.0) {
            return Err(DataError::InvalidSampling(format!(
                "heatmap blur must not be negative, got {}",
                self.blur
            )));
        }
        if !self.min_opacity.is_finite() {
            return Err(DataError::InvalidSampling(format!(
                "opacity floor must be finite, got {}",
                self.min_opacity
            )));
        }
        Ok(())
    }
}

/// Strides of the two sampled views
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SamplingConfig {
    /// Route line stride
    pub sample_rate: usize,
    /// Heatmap stride
    pub heatmap_sample: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            sample_rate: 10,
            heatmap_sample: 20,
        }
    }
}

impl SamplingConfig {
    /// Both strides, failing if either is zero
    pub fn strides(&self) -> Result<(NonZeroUsize, NonZeroUsize)> {
        let route = NonZeroUsize::new(self.sample_rate).ok_or_else(|| {
            DataError::InvalidSampling("sample rate must be at least 1".to_string())
        })?;
        let heat = NonZeroUsize::new(self.heatmap_sample).ok_or_else(|| {
            DataError::InvalidSampling("heatmap sample must be at least 1".to_string())
        })?;
        Ok((route, heat))
    }
}

/// The sampled line of one route file
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RoutePolyline {
    pub source_id: String,
    /// `[latitude, longitude]` pairs
    pub points: Vec<[f64; 2]>,
}

/// Everything needed to draw the map
#[derive(Clone, Debug)]
pub struct MapScene {
    /// Route lines, ordered by source id
    pub routes: Vec<RoutePolyline>,
    /// `[latitude, longitude, weight]` triples
    pub heat: Vec<[f64; 3]>,
    /// `(latitude, longitude)` of the initial view
    pub center: (f64, f64),
    /// Extent of the whole dataset, `x` is longitude
    pub bounds: Option<Rect<f64>>,
    pub style: MapStyle,
}

impl MapScene {
    /// Sample `dataset` into route lines and heat points
    ///
    /// Routes whose sampled line has fewer than two points are left out; their points still
    /// contribute to the heatmap.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn build(
        dataset: &UnifiedDataset,
        sampling: &SamplingConfig,
        style: &MapStyle,
    ) -> Result<Self> {
        let (route_stride, heat_stride) = sampling.strides()?;
        style.validate()?;

        let mut routes = Vec::new();
        let mut skipped = 0usize;
        for (source_id, coords) in dataset.by_source() {
            let line = sample(&coords, route_stride);
            if line.len() < 2 {
                skipped += 1;
                continue;
            }
            routes.push(RoutePolyline {
                source_id: source_id.to_string(),
                points: line.iter().map(|c| c.lat_lon()).collect(),
            });
        }
        if skipped > 0 {
            tracing::debug!("Left out {skipped} routes with fewer than two sampled points");
        }

        let heat = density_sample(
            dataset.coordinates(),
            heat_stride,
            style.min_opacity,
            style.radius,
        )
        .into_iter()
        .map(|w| [w.item.latitude, w.item.longitude, w.weight])
        .collect();

        let center = utils::mean_center(dataset.coordinates()).unwrap_or((0.0, 0.0));
        let bounds = utils::bounding_box(dataset.coordinates());

        Ok(Self {
            routes,
            heat,
            center,
            bounds,
            style: style.clone(),
        })
    }

    /// Number of points across all route lines
    pub fn route_point_count(&self) -> usize {
        self.routes.iter().map(|r| r.points.len()).sum()
    }
}

/// Turns a scene into a document
pub trait MapRenderer {
    fn render(&self, scene: &MapScene, out: &mut dyn Write) -> Result<()>;
}

/// Standalone HTML page using Leaflet and Leaflet.heat
#[derive(Clone, Debug)]
pub struct LeafletDocument {
    pub title: String,
    /// Open on the dataset's extent instead of `center` at `zoom_start`
    pub fit_bounds: bool,
}

impl Default for LeafletDocument {
    fn default() -> Self {
        Self {
            title: "Workout Routes".to_string(),
            fit_bounds: false,
        }
    }
}

/// Data handed to the page script
#[derive(Serialize)]
struct ScenePayload<'a> {
    center: [f64; 2],
    zoom: u8,
    /// `[[south, west], [north, east]]`
    bounds: Option<[[f64; 2]; 2]>,
    tiles: &'a str,
    attribution: &'a str,
    line: LineOptions<'a>,
    heat_options: HeatOptions,
    routes: &'a [RoutePolyline],
    heat: &'a [[f64; 3]],
}

#[derive(Serialize)]
struct LineOptions<'a> {
    color: &'a str,
    weight: f64,
    opacity: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HeatOptions {
    radius: f64,
    blur: f64,
    min_opacity: f64,
}

impl MapRenderer for LeafletDocument {
    fn render(&self, scene: &MapScene, out: &mut dyn Write) -> Result<()> {
        let style = &scene.style;
        let payload = ScenePayload {
            center: [scene.center.0, scene.center.1],
            zoom: style.zoom_start,
            bounds: if self.fit_bounds {
                scene.bounds.map(|r| [[r.min().y, r.min().x], [r.max().y, r.max().x]])
            } else {
                None
            },
            tiles: style.base_map.url(),
            attribution: style.base_map.attribution(),
            line: LineOptions {
                color: &style.line_color,
                weight: style.line_weight,
                opacity: style.line_opacity,
            },
            heat_options: HeatOptions {
                radius: style.radius,
                blur: style.blur,
                min_opacity: style.min_opacity,
            },
            routes: &scene.routes,
            heat: &scene.heat,
        };
        // Keep source ids from closing the script element
        let data = serde_json::to_string(&payload)?.replace("</", "<\\/");

        write!(
            out,
            r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>{title}</title>
<link rel="stylesheet" href="{LEAFLET_CSS}">
<script src="{LEAFLET_JS}"></script>
<script src="{LEAFLET_HEAT_JS}"></script>
<style>html, body, #map {{ height: 100%; margin: 0; }}</style>
</head>
<body>
<div id="map"></div>
<script>
const scene = {data};
const map = L.map("map");
if (scene.bounds) {{
  map.fitBounds(scene.bounds);
}} else {{
  map.setView(scene.center, scene.zoom);
}}
L.tileLayer(scene.tiles, {{ attribution: scene.attribution, maxZoom: 19 }}).addTo(map);
const routes = L.layerGroup(
  scene.routes.map((r) => L.polyline(r.points, scene.line).bindTooltip(r.source_id))
);
const heat = L.heatLayer(scene.heat, scene.heat_options);
routes.addTo(map);
heat.addTo(map);
L.control.layers(null, {{ "Routes": routes, "Heatmap": heat }}).addTo(map);
</script>
</body>
</html>
"#,
            title = escape_html(&self.title),
        )?;
        Ok(())
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Build the scene for `dataset` and write it to `output_path`
///
/// The output file is the only side effect. Coordinates are drawn as given.
pub fn compose_map(
    dataset: &UnifiedDataset,
    sampling: &SamplingConfig,
    style: &MapStyle,
    renderer: &dyn MapRenderer,
    output_path: &Path,
) -> Result<MapScene> {
    #[cfg(feature = "profiling")]
    profiling::scope!("composer::compose_map");

    let scene = MapScene::build(dataset, sampling, style)?;

    let mut out = BufWriter::new(File::create(output_path)?);
    renderer.render(&scene, &mut out)?;
    out.flush()?;

    tracing::info!(
        "Wrote map with {} routes ({} points) and {} heat points to {}",
        scene.routes.len(),
        scene.route_point_count(),
        scene.heat.len(),
        output_path.display()
    );
    Ok(scene)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Coordinate;

    fn dataset(routes: &[(&str, usize)]) -> UnifiedDataset {
        let coords = routes
            .iter()
            .flat_map(|(source, n)| {
                (0..*n).map(move |i| {
                    Coordinate::new(10.0 + i as f64 * 0.001, 20.0, None, *source).unwrap()
                })
            })
            .collect();
        UnifiedDataset::from_coordinates(coords)
    }

    #[test]
    fn test_scene_groups_routes_by_source() {
        let data = dataset(&[("b.gpx", 30), ("a.gpx", 25), ("short.gpx", 5)]);
        let scene =
            MapScene::build(&data, &SamplingConfig::default(), &MapStyle::default()).unwrap();

        let ids: Vec<&str> = scene.routes.iter().map(|r| r.source_id.as_str()).collect();
        assert_eq!(ids, vec!["a.gpx", "b.gpx"]);
        assert_eq!(scene.routes[0].points.len(), 3);
        assert_eq!(scene.routes[1].points.len(), 3);
        assert_eq!(scene.heat.len(), 60usize.div_ceil(20));
    }

    #[test]
    fn test_heat_weights_respect_floor() {
        let data = dataset(&[("a.gpx", 50)]);
        let sampling = SamplingConfig {
            sample_rate: 10,
            heatmap_sample: 1,
        };
        let style = MapStyle {
            min_opacity: 0.3,
            radius: 15.0,
            ..Default::default()
        };
        let scene = MapScene::build(&data, &sampling, &style).unwrap();

        assert_eq!(scene.heat.len(), 50);
        assert!(scene.heat.iter().all(|p| p[2] >= 0.3));
    }

    #[test]
    fn test_empty_dataset_centers_on_origin() {
        let scene = MapScene::build(
            &UnifiedDataset::new(),
            &SamplingConfig::default(),
            &MapStyle::default(),
        )
        .unwrap();
        assert_eq!(scene.center, (0.0, 0.0));
        assert!(scene.routes.is_empty());
        assert!(scene.heat.is_empty());
        assert!(scene.bounds.is_none());
    }

    #[test]
    fn test_zero_stride_is_rejected() {
        let sampling = SamplingConfig {
            sample_rate: 0,
            heatmap_sample: 20,
        };
        let result = MapScene::build(&dataset(&[("a.gpx", 3)]), &sampling, &MapStyle::default());
        assert!(matches!(result, Err(DataError::InvalidSampling(_))));
    }

    #[test]
    fn test_invalid_style_is_rejected() {
        let style = MapStyle {
            radius: 0.0,
            ..Default::default()
        };
        assert!(style.validate().is_err());
        assert!(MapStyle::default().validate().is_ok());
    }

    #[test]
    fn test_leaflet_document_embeds_scene() {
        let data = dataset(&[("</script>.gpx", 30)]);
        let scene =
            MapScene::build(&data, &SamplingConfig::default(), &MapStyle::default()).unwrap();

        let mut html = Vec::new();
        LeafletDocument::default().render(&scene, &mut html).unwrap();
        let html = String::from_utf8(html).unwrap();

        assert!(html.contains("leaflet-heat.js"));
        assert!(html.contains("basemaps.cartocdn.com"));
        assert!(html.contains(r#""minOpacity":0.3"#));
        assert!(html.contains(r#""color":"blue""#));
        assert_eq!(html.matches("</script>").count(), 3);
    }

    #[test]
    fn test_compose_map_writes_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("workout_routes.html");
        let data = dataset(&[("a.gpx", 40)]);

        let scene = compose_map(
            &data,
            &SamplingConfig::default(),
            &MapStyle::default(),
            &LeafletDocument::default(),
            &output,
        )
        .unwrap();

        assert_eq!(scene.routes.len(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
        let html = std::fs::read_to_string(&output).unwrap();
        assert!(html.starts_with("<!DOCTYPE html>"));
    }

    #[test]
    fn test_base_map_parsing() {
        assert_eq!("OpenTopoMap".parse::<BaseMap>().unwrap(), BaseMap::OpenTopoMap);
        assert_eq!(
            "cartodb_positron".parse::<BaseMap>().unwrap(),
            BaseMap::CartoDbPositron
        );
        assert!("stamen".parse::<BaseMap>().is_err());
        for map in BaseMap::all() {
            assert_eq!(map.to_string().parse::<BaseMap>().unwrap(), *map);
        }
    }
}
