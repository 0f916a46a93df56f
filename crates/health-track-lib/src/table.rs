//! Flat tables: the coordinates CSV, the records CSV and the type list
//!
//! The coordinates table is the hand-off between route collection and map composition, so it can
//! also be read back. Rows that fail to deserialize or fall outside WGS84 are skipped and counted.

use crate::records::{HealthRecord, RecordSink, RecordValue};
use crate::{Coordinate, IssueSummary, Result, UnifiedDataset};
use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

/// Columns of the coordinates table, in [`Coordinate`] field order
const COORDINATE_COLUMNS: [&str; 6] = [
    "latitude",
    "longitude",
    "timestamp",
    "source_id",
    "elevation",
    "extensions",
];

/// Columns of the records table, `metadata` only when requested
const RECORD_COLUMNS: [&str; 6] = ["type", "value", "unit", "start_date", "end_date", "source_name"];

/// Write coordinates as CSV rows, returning the row count
pub fn write_coordinates<'a, W: Write>(
    writer: W,
    coords: impl IntoIterator<Item = &'a Coordinate>,
) -> Result<usize> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    let mut rows = 0;
    for coord in coords {
        csv_writer.serialize(coord)?;
        rows += 1;
    }
    if rows == 0 {
        // serde only emits the header alongside the first row
        csv_writer.write_record(COORDINATE_COLUMNS)?;
    }
    csv_writer.flush()?;
    Ok(rows)
}

/// Write a dataset to a CSV file
pub fn write_coordinates_file(path: &Path, dataset: &UnifiedDataset) -> Result<usize> {
    let rows = write_coordinates(BufWriter::new(File::create(path)?), dataset.coordinates())?;
    tracing::info!("Saved {rows} coordinates to {}", path.display());
    Ok(rows)
}

/// Read a coordinates CSV, skipping unusable rows
///
/// Older tables naming the columns `time` and `filename` are accepted. Only I/O failures are
/// errors; bad rows are counted in the returned summary as invalid coordinates.
pub fn read_coordinates<R: Read>(reader: R) -> Result<(UnifiedDataset, IssueSummary)> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let mut coords = Vec::new();
    let mut issues = IssueSummary::default();

    for (index, row) in csv_reader.deserialize::<Coordinate>().enumerate() {
        match row {
            Ok(coord) if coord.is_valid() => coords.push(coord),
            Ok(coord) => {
                tracing::debug!(
                    "Row {}: coordinate ({}, {}) out of range",
                    index + 1,
                    coord.latitude,
                    coord.longitude
                );
                issues.invalid_coordinates += 1;
            }
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => {
                tracing::debug!("Row {}: {e}", index + 1);
                issues.invalid_coordinates += 1;
            }
        }
    }

    if issues.invalid_coordinates > 0 {
        tracing::warn!("Skipped {} unusable coordinate rows", issues.invalid_coordinates);
    }
    Ok((UnifiedDataset::from_coordinates(coords), issues))
}

/// Read a coordinates CSV file
pub fn read_coordinates_file(path: &Path) -> Result<(UnifiedDataset, IssueSummary)> {
    read_coordinates(File::open(path)?)
}

/// One row of the records table
#[derive(Serialize)]
struct RecordRow<'a> {
    #[serde(rename = "type")]
    record_type: &'a str,
    value: Option<&'a RecordValue>,
    unit: Option<&'a str>,
    start_date: &'a DateTime<FixedOffset>,
    end_date: &'a DateTime<FixedOffset>,
    source_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<String>,
}

/// [`RecordSink`] writing CSV rows as they arrive
pub struct RecordCsvWriter<W: Write> {
    writer: csv::Writer<W>,
    include_metadata: bool,
    rows: usize,
}

impl RecordCsvWriter<BufWriter<File>> {
    pub fn create(path: &Path, include_metadata: bool) -> Result<Self> {
        Self::new(BufWriter::new(File::create(path)?), include_metadata)
    }
}

impl<W: Write> RecordCsvWriter<W> {
    /// Start a table on `writer`, header included
    pub fn new(writer: W, include_metadata: bool) -> Result<Self> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(writer);
        if include_metadata {
            writer.write_record(RECORD_COLUMNS.iter().chain(["metadata"].iter()))?;
        } else {
            writer.write_record(RECORD_COLUMNS)?;
        }
        Ok(Self {
            writer,
            include_metadata,
            rows: 0,
        })
    }

    /// Rows written so far
    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Flush and hand back the underlying writer
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| crate::DataError::Io(e.into_error()))
    }
}

impl<W: Write> RecordSink for RecordCsvWriter<W> {
    fn write_record(&mut self, record: &HealthRecord) -> Result<()> {
        let metadata = if self.include_metadata {
            let map: serde_json::Map<String, serde_json::Value> = record
                .metadata
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            Some(serde_json::to_string(&map)?)
        } else {
            None
        };

        self.writer.serialize(RecordRow {
            record_type: &record.record_type,
            value: record.value.as_ref(),
            unit: record.unit.as_deref(),
            start_date: &record.start_date,
            end_date: &record.end_date,
            source_name: record.source_name.as_deref(),
            metadata,
        })?;
        self.rows += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Write record types one per line
pub fn write_type_list<'a, W: Write>(
    mut writer: W,
    types: impl IntoIterator<Item = &'a String>,
) -> Result<()> {
    for record_type in types {
        writeln!(writer, "{record_type}")?;
    }
    writer.flush()?;
    Ok(())
}
