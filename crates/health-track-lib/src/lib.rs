//! Health Track Library - Extraction and aggregation for health-tracker exports
//!
//! This library turns a health-tracker export bundle (a directory of GPX workout routes plus a
//! single, potentially multi-gigabyte `export.xml`) into flat tables and an interactive map.
//!
//! # Architecture
//!
//! - **[`parse_route_file`]**: Whole-file GPX parse of one workout into a [`RouteTrace`]
//! - **[`RouteCollector`]**: Batch parse of a route directory into one [`UnifiedDataset`]
//! - **[`RecordStream`]**: Forward-only, event-driven pass over the record file
//! - **[`sample`] / [`density_sample`]**: Deterministic stride sampling for rendering
//! - **[`MapScene`] / [`MapRenderer`]**: Map composition, drawing delegated to a renderer
//!
//! # Memory Characteristics
//!
//! - **Route files**: O(points) per file, files are small single workouts
//! - **Record file**: O(1) per element in export mode, O(distinct types) in list mode
//! - **Sampling**: borrowed views, no coordinate copies

mod collection;
mod composer;
mod coordinate;
mod records;
mod report;
mod route;
mod sampler;
pub mod table;
pub mod utils;

// Public API exports
pub use collection::{
    Collected, CollectorConfig, FileOutcome, Manifest, RouteCollector, UnifiedDataset,
    discover_route_files,
};
pub use composer::{
    BaseMap, LeafletDocument, MapRenderer, MapScene, MapStyle, RoutePolyline, SamplingConfig,
    compose_map,
};
pub use coordinate::Coordinate;
pub use records::{
    ExportReport, HealthRecord, RecordFilter, RecordSink, RecordStream, RecordValue,
    RecordsOfType, TypeListing, default_export_path, export_records,
};
pub use report::IssueSummary;
pub use route::{
    EmptyCriterion, MissingTimestamp, ParseOptions, RouteParse, RouteTrace, parse_route_file,
};
pub use sampler::{
    REFERENCE_HEAT_RADIUS, SampledSeries, Weighted, density_sample, heat_weight, sample,
};

use std::path::PathBuf;

/// Error types for the library
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("GPX parsing error: {0}")]
    GpxParse(#[from] gpx::errors::GpxError),

    #[error("Malformed input: {reason}")]
    Parse { reason: String },

    #[error("Empty route")]
    EmptyRoute,

    #[error("Cannot stream records from {bundle}: {reason}")]
    Stream { bundle: PathBuf, reason: String },

    #[error("Invalid coordinate: ({latitude}, {longitude})")]
    InvalidCoordinate { latitude: f64, longitude: f64 },

    #[error("Invalid sampling parameters: {0}")]
    InvalidSampling(String),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DataError>;
