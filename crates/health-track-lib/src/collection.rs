//! RouteCollector - Batch parsing of route files into one dataset
//!
//! This module discovers the GPX files of an export, parses each one independently and merges
//! the results into a [`UnifiedDataset`]. A failing file never aborts the batch: every file gets
//! a [`FileOutcome`] in the [`Manifest`], and failures are reported once at the end.

use crate::{
    Coordinate, DataError, IssueSummary, ParseOptions, Result, RouteParse, RouteTrace,
    parse_route_file, utils,
};

use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Configuration for the route collector
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Per-file parsing policy
    pub parse: ParseOptions,
    /// Parse files on the rayon thread pool.
    /// Results are merged sequentially in path order, so the dataset is identical either way.
    pub parallel: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            parse: ParseOptions::default(),
            parallel: true,
        }
    }
}

/// Outcome of one route file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Parsed, with the number of points merged into the dataset
    Ok(usize),
    /// Well-formed but without points
    Empty,
    /// Unreadable or malformed, with the reason
    ParseError(String),
}

/// Outcome of every processed file, keyed by path
pub type Manifest = BTreeMap<PathBuf, FileOutcome>;

/// Concatenation of all route traces
///
/// Append-only. Order is meaningful only among coordinates sharing a `source_id`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnifiedDataset {
    coordinates: Vec<Coordinate>,
}

impl UnifiedDataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a dataset from rows read back from a table
    pub fn from_coordinates(coordinates: Vec<Coordinate>) -> Self {
        Self { coordinates }
    }

    /// Move a trace's coordinates to the end of the dataset
    pub fn append(&mut self, trace: RouteTrace) {
        self.coordinates.extend(trace.into_coordinates());
    }

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

    /// Coordinates grouped by `source_id`, each group in its original order
    pub fn by_source(&self) -> BTreeMap<&str, Vec<&Coordinate>> {
        let mut groups: BTreeMap<&str, Vec<&Coordinate>> = BTreeMap::new();
        for coord in &self.coordinates {
            groups.entry(coord.source_id.as_str()).or_default().push(coord);
        }
        groups
    }

    /// Number of distinct sources
    pub fn source_count(&self) -> usize {
        self.by_source().len()
    }
}

/// Result of a collection run
#[derive(Debug, Clone, Default)]
pub struct Collected {
    pub dataset: UnifiedDataset,
    pub manifest: Manifest,
    pub summary: IssueSummary,
    /// Files the strict GPX reader rejected but the tolerant scan read, in path order
    pub recovered: Vec<PathBuf>,
}

impl Collected {
    /// Files parsed successfully (including those contributing zero points)
    pub fn ok_count(&self) -> usize {
        self.count_outcomes(|o| matches!(o, FileOutcome::Ok(_)))
    }

    /// Files that were well-formed but empty
    pub fn empty_count(&self) -> usize {
        self.count_outcomes(|o| matches!(o, FileOutcome::Empty))
    }

    /// Files that failed to parse
    pub fn failed_count(&self) -> usize {
        self.count_outcomes(|o| matches!(o, FileOutcome::ParseError(_)))
    }

    fn count_outcomes(&self, pred: impl Fn(&FileOutcome) -> bool) -> usize {
        self.manifest.values().filter(|o| pred(o)).count()
    }
}

/// Find route files (`*.gpx`, any case) under `root`, sorted by path
///
/// Entries that cannot be read are logged and skipped; only an unreadable `root` is an error.
pub fn discover_route_files(root: &Path) -> Result<Vec<PathBuf>> {
    #[cfg(feature = "profiling")]
    profiling::scope!("collection::discover_route_files");

    std::fs::metadata(root)?;

    let mut paths: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!("Skipping unreadable entry under {}: {e}", root.display());
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && is_route_file(entry.path()))
        .map(|entry| entry.into_path())
        .collect();

    paths.sort();
    tracing::debug!("Found {} route files under {}", paths.len(), root.display());
    Ok(paths)
}

fn is_route_file(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gpx"))
}

/// Drives the route parser over a batch of files
#[derive(Debug, Clone, Default)]
pub struct RouteCollector {
    config: CollectorConfig,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl RouteCollector {
    /// Create a new collector with the given configuration
    pub fn new(config: CollectorConfig) -> Self {
        Self { config }
    }

    /// Get a reference to the configuration
    #[inline]
    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Discover and collect every route file under `root`
    pub fn collect_dir(&self, root: &Path) -> Result<Collected> {
        let paths = discover_route_files(root)?;
        if paths.is_empty() {
            tracing::warn!("No route files found under {}", root.display());
        }
        Ok(self.collect_paths(root, paths))
    }

    /// Parse the given files and merge them
    ///
    /// `source_id`s are derived from each path relative to `root`. The paths are sorted and
    /// deduplicated first, so the dataset does not depend on the order they were supplied in.
    pub fn collect_paths(&self, root: &Path, mut paths: Vec<PathBuf>) -> Collected {
        paths.sort();
        paths.dedup();

        let parse = |path: &PathBuf| {
            let source_id = utils::source_id_for(root, path);
            let result = parse_route_file(path, &source_id, &self.config.parse);
            (path.clone(), result)
        };

        // Parse (in parallel when enabled), then merge under a single writer in path order
        let results: Vec<(PathBuf, Result<RouteParse>)> = if self.config.parallel {
            paths.par_iter().map(parse).collect()
        } else {
            paths.iter().map(parse).collect()
        };

        let mut collected = Collected::default();
        for (path, result) in results {
            let outcome = match result {
                Ok(parsed) => {
                    if parsed.recovered {
                        collected.recovered.push(path.clone());
                    }
                    collected.summary += parsed.issues;
                    let count = parsed.trace.len();
                    collected.dataset.append(parsed.trace);
                    FileOutcome::Ok(count)
                }
                Err(DataError::EmptyRoute) => {
                    collected.summary.empty_routes += 1;
                    FileOutcome::Empty
                }
                Err(e) => {
                    collected.summary.parse_errors += 1;
                    FileOutcome::ParseError(e.to_string())
                }
            };
            collected.manifest.insert(path, outcome);
        }

        self.report(&collected);
        collected
    }

    /// Log the batch result once
    fn report(&self, collected: &Collected) {
        tracing::info!(
            "Collected {} points from {} route files ({} ok, {} empty, {} failed)",
            collected.dataset.len(),
            collected.manifest.len(),
            collected.ok_count(),
            collected.empty_count(),
            collected.failed_count()
        );

        if !collected.recovered.is_empty() {
            tracing::info!(
                "{} route files were read leniently after the strict GPX reader rejected them",
                collected.recovered.len()
            );
            for path in &collected.recovered {
                tracing::debug!("Recovered {}", path.display());
            }
        }

        if collected.failed_count() > 0 {
            let failures: Vec<String> = collected
                .manifest
                .iter()
                .filter_map(|(path, outcome)| match outcome {
                    FileOutcome::ParseError(reason) => {
                        Some(format!("{}: {reason}", path.display()))
                    }
                    _ => None,
                })
                .collect();
            tracing::warn!(
                "{} route files could not be parsed:\n  {}",
                failures.len(),
                failures.join("\n  ")
            );
        }
    }
}
