//! One function per subcommand
//!
//! Every successful command returns the [`IssueSummary`] of what it had to skip, which `main`
//! prints after the command's own output.

use crate::settings::{Command, ExportArgs, MapArgs, RoutesArgs, TypesArgs};
use anyhow::{Context, Result};
use health_track_lib::table::{
    RecordCsvWriter, read_coordinates_file, write_coordinates_file, write_type_list,
};
use health_track_lib::{
    IssueSummary, LeafletDocument, RecordFilter, RecordStream, RouteCollector, compose_map,
    default_export_path, export_records,
};
use std::fs::File;
use std::io::BufWriter;

/// Run a subcommand
pub fn run(command: &Command) -> Result<IssueSummary> {
    match command {
        Command::Types(args) => list_types(args),
        Command::Export(args) => export(args),
        Command::Routes(args) => routes(args),
        Command::Map(args) => map(args),
    }
}

fn list_types(args: &TypesArgs) -> Result<IssueSummary> {
    let listing = RecordStream::open(&args.input)
        .with_context(|| format!("Failed to open export file {}", args.input.display()))?
        .list_record_types();

    match &args.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            write_type_list(BufWriter::new(file), &listing.types)?;
            println!(
                "Wrote {} record types to {}",
                listing.types.len(),
                path.display()
            );
        }
        None => {
            println!("Found {} record types:", listing.types.len());
            for record_type in &listing.types {
                println!("  {record_type}");
            }
        }
    }

    if listing.truncated {
        tracing::warn!("The export file ended early, the type list may be incomplete");
    }

    Ok(IssueSummary {
        malformed_records: listing.malformed,
        ..Default::default()
    })
}

fn export(args: &ExportArgs) -> Result<IssueSummary> {
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_export_path(&args.record_type));

    let mut stream = RecordStream::open(&args.input)
        .with_context(|| format!("Failed to open export file {}", args.input.display()))?;
    let mut sink = RecordCsvWriter::create(&output, args.metadata)
        .with_context(|| format!("Failed to create {}", output.display()))?;

    let filter = RecordFilter::new(&args.record_type).with_metadata(args.metadata);
    let report = export_records(&mut stream, &filter, &mut sink)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "Exported {} {} records to {}",
        report.written,
        args.record_type,
        output.display()
    );
    if report.truncated {
        tracing::warn!(
            "The export file ended early after {} records, the output may be incomplete",
            report.records_seen
        );
    }

    Ok(IssueSummary {
        malformed_records: report.malformed + report.untyped,
        ..Default::default()
    })
}

fn routes(args: &RoutesArgs) -> Result<IssueSummary> {
    let collector = RouteCollector::new(args.collector_config());
    let collected = collector
        .collect_dir(&args.input)
        .with_context(|| format!("Failed to read route directory {}", args.input.display()))?;

    let rows = write_coordinates_file(&args.output, &collected.dataset)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    println!(
        "Saved {rows} coordinates from {} of {} route files to {}",
        collected.ok_count(),
        collected.manifest.len(),
        args.output.display()
    );
    Ok(collected.summary)
}

fn map(args: &MapArgs) -> Result<IssueSummary> {
    let (dataset, issues) = read_coordinates_file(&args.input)
        .with_context(|| format!("Failed to read coordinates from {}", args.input.display()))?;

    let renderer = LeafletDocument {
        fit_bounds: args.fit_bounds,
        ..Default::default()
    };
    let scene = compose_map(
        &dataset,
        &args.sampling(),
        &args.style(),
        &renderer,
        &args.output,
    )
    .with_context(|| format!("Failed to create map {}", args.output.display()))?;

    println!(
        "Map with {} routes and {} heatmap points saved to {}",
        scene.routes.len(),
        scene.heat.len(),
        args.output.display()
    );
    Ok(issues)
}
