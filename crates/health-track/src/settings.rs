use clap::{Args, Parser, Subcommand, ValueEnum};
use health_track_lib::{
    BaseMap, CollectorConfig, EmptyCriterion, MapStyle, MissingTimestamp, ParseOptions,
    SamplingConfig,
};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
/// Health Track - Extract workout routes and health records from a health-tracker export
pub struct Settings {
    /// Log progress at info level
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Log details at debug level (overrides --verbose)
    #[clap(long, global = true)]
    pub debug: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List the distinct record types of an export file
    Types(TypesArgs),
    /// Export every record of one type to CSV
    Export(ExportArgs),
    /// Merge a directory of GPX routes into one coordinates CSV
    Routes(RoutesArgs),
    /// Render a coordinates CSV as an HTML map with route lines and a heatmap
    Map(MapArgs),
}

#[derive(Args, Debug, Clone)]
pub struct TypesArgs {
    /// Export file (export.xml)
    #[clap(short, long, value_name = "FILE")]
    pub input: PathBuf,

    /// Write the types here, one per line, instead of printing them
    #[clap(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    /// Export file (export.xml)
    #[clap(short, long, value_name = "FILE")]
    pub input: PathBuf,

    /// Record type to export, e.g. HKQuantityTypeIdentifierHeartRate
    #[clap(short = 't', long = "type", value_name = "TYPE")]
    pub record_type: String,

    /// Output CSV (defaults to the type name without its identifier prefix)
    #[clap(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Add a JSON column with each record's metadata entries
    #[clap(long, default_value = "false")]
    pub metadata: bool,
}

/// When a well-formed route file is reported as empty
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyWhen {
    /// It has no track point elements
    NoPoints,
    /// None of its points survive validation
    NoRetained,
}

impl From<EmptyWhen> for EmptyCriterion {
    fn from(value: EmptyWhen) -> Self {
        match value {
            EmptyWhen::NoPoints => EmptyCriterion::NoPointElements,
            EmptyWhen::NoRetained => EmptyCriterion::NoRetainedPoints,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct RoutesArgs {
    /// Directory holding the GPX route files (searched recursively)
    #[clap(short, long, value_name = "DIR")]
    pub input: PathBuf,

    /// Output coordinates CSV
    #[clap(short, long, value_name = "FILE", default_value = "gpx_data.csv")]
    pub output: PathBuf,

    /// Parse files one at a time instead of on all cores
    #[clap(long, default_value = "false")]
    pub sequential: bool,

    /// Drop track points that carry no timestamp
    #[clap(long, default_value = "false")]
    pub drop_untimed: bool,

    /// When a well-formed file counts as empty
    #[clap(long, value_enum, default_value = "no-retained")]
    pub empty_when: EmptyWhen,
}

impl RoutesArgs {
    pub fn collector_config(&self) -> CollectorConfig {
        CollectorConfig {
            parse: ParseOptions {
                missing_timestamp: if self.drop_untimed {
                    MissingTimestamp::Drop
                } else {
                    MissingTimestamp::Keep
                },
                empty_criterion: self.empty_when.into(),
            },
            parallel: !self.sequential,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct MapArgs {
    /// Coordinates CSV written by `routes`
    #[clap(short, long, value_name = "FILE", default_value = "gpx_data.csv")]
    pub input: PathBuf,

    /// Output HTML map
    #[clap(short, long, value_name = "FILE", default_value = "workout_routes.html")]
    pub output: PathBuf,

    /// Keep every Nth point of each route line
    #[clap(long, default_value = "10", value_parser = clap::value_parser!(u32).range(1..))]
    pub sample_rate: u32,

    /// Keep every Nth point for the heatmap
    #[clap(long, default_value = "20", value_parser = clap::value_parser!(u32).range(1..))]
    pub heatmap_sample: u32,

    /// Heatmap blur in pixels
    #[clap(long, default_value = "20")]
    pub blur: f64,

    /// Heatmap point radius in pixels
    #[clap(long, default_value = "15")]
    pub radius: f64,

    /// Minimum heatmap opacity
    #[clap(long, default_value = "0.3")]
    pub opacity: f64,

    /// Route line color (any CSS color)
    #[clap(long, default_value = "blue")]
    pub line_color: String,

    /// Base map tiles: cartodb-positron, openstreetmap or opentopomap
    #[clap(long, default_value = "cartodb-positron")]
    pub tiles: BaseMap,

    /// Initial zoom level
    #[clap(long, default_value = "12")]
    pub zoom: u8,

    /// Open the map on the extent of all points instead of their mean at --zoom
    #[clap(long, default_value = "false")]
    pub fit_bounds: bool,
}

impl MapArgs {
    pub fn sampling(&self) -> SamplingConfig {
        SamplingConfig {
            sample_rate: self.sample_rate as usize,
            heatmap_sample: self.heatmap_sample as usize,
        }
    }

    pub fn style(&self) -> MapStyle {
        MapStyle {
            line_color: self.line_color.clone(),
            blur: self.blur,
            radius: self.radius,
            min_opacity: self.opacity,
            base_map: self.tiles,
            zoom_start: self.zoom,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_defaults() {
        let settings = Settings::try_parse_from(["health-track", "map"]).unwrap();
        let Command::Map(args) = settings.command else {
            panic!("expected map command");
        };
        assert_eq!(args.output, PathBuf::from("workout_routes.html"));
        assert_eq!(args.sampling(), SamplingConfig::default());
        assert_eq!(args.style(), MapStyle::default());
    }

    #[test]
    fn test_routes_flags() {
        let settings = Settings::try_parse_from([
            "health-track",
            "routes",
            "--input",
            "workout-routes",
            "--sequential",
            "--drop-untimed",
            "--empty-when",
            "no-points",
            "--verbose",
        ])
        .unwrap();
        assert!(settings.verbose);
        let Command::Routes(args) = settings.command else {
            panic!("expected routes command");
        };
        let config = args.collector_config();
        assert!(!config.parallel);
        assert_eq!(config.parse.missing_timestamp, MissingTimestamp::Drop);
        assert_eq!(config.parse.empty_criterion, EmptyCriterion::NoPointElements);
        assert_eq!(args.output, PathBuf::from("gpx_data.csv"));
    }

    #[test]
    fn test_zero_sample_rate_rejected() {
        let result = Settings::try_parse_from(["health-track", "map", "--sample-rate", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_tiles_parsing() {
        let settings =
            Settings::try_parse_from(["health-track", "map", "--tiles", "opentopomap"]).unwrap();
        let Command::Map(args) = settings.command else {
            panic!("expected map command");
        };
        assert_eq!(args.tiles, BaseMap::OpenTopoMap);
        assert!(Settings::try_parse_from(["health-track", "map", "--tiles", "nope"]).is_err());
    }

    #[test]
    fn test_export_requires_type() {
        assert!(Settings::try_parse_from(["health-track", "export", "-i", "export.xml"]).is_err());
        let settings = Settings::try_parse_from([
            "health-track",
            "export",
            "-i",
            "export.xml",
            "--type",
            "HKQuantityTypeIdentifierHeartRate",
            "--metadata",
        ])
        .unwrap();
        let Command::Export(args) = settings.command else {
            panic!("expected export command");
        };
        assert!(args.metadata);
        assert_eq!(args.output, None);
    }
}
