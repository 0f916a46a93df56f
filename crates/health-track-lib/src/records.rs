//! Streaming extraction of typed health records
//!
//! The record file of an export (`export.xml`) routinely reaches gigabytes, so it is never loaded
//! as a document tree. [`RecordStream`] pulls XML events from a buffered reader and materializes at
//! most one `<Record>` element at a time, reusing a single event buffer for the whole pass.
//!
//! The stream is forward-only and read once: listing types and exporting records are two
//! separate passes. Dropping the stream at any point closes the underlying reader.

use crate::{DataError, Result};
use chrono::{DateTime, FixedOffset};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Date layout used by the export, e.g. `2019-06-01 10:00:00 -0500`
const EXPORT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

/// Identifier prefixes stripped when deriving default output file names
const TYPE_PREFIXES: [&str; 2] = ["HKQuantityTypeIdentifier", "HKCategoryTypeIdentifier"];

/// How often (in elements) progress is logged at debug level
const PROGRESS_INTERVAL: usize = 1_000_000;

/// Value of a record: numeric for quantities, text for categories
///
/// Both variants keep the attribute text, which is what tables receive, so exported values
/// match the source character for character.
#[derive(Clone, Debug, PartialEq)]
pub enum RecordValue {
    Number { value: f64, raw: String },
    Text(String),
}

impl RecordValue {
    /// Classify attribute text, numeric when it parses to a finite number
    pub fn parse(raw: String) -> Self {
        match raw.trim().parse::<f64>() {
            Ok(value) if value.is_finite() => RecordValue::Number { value, raw },
            _ => RecordValue::Text(raw),
        }
    }

    /// Numeric value, for quantity records
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RecordValue::Number { value, .. } => Some(*value),
            RecordValue::Text(_) => None,
        }
    }

    /// Attribute text as it appeared in the export
    #[inline]
    pub fn as_str(&self) -> &str {
        match self {
            RecordValue::Number { raw, .. } | RecordValue::Text(raw) => raw,
        }
    }
}

impl Serialize for RecordValue {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl fmt::Display for RecordValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `<Record>` element of the export
#[derive(Clone, Debug, PartialEq)]
pub struct HealthRecord {
    pub record_type: String,
    pub value: Option<RecordValue>,
    pub unit: Option<String>,
    pub start_date: DateTime<FixedOffset>,
    pub end_date: DateTime<FixedOffset>,
    pub source_name: Option<String>,
    /// `<MetadataEntry key value/>` children, in document order
    pub metadata: Vec<(String, String)>,
}

/// Which records an export pass keeps
#[derive(Clone, Debug)]
pub struct RecordFilter {
    /// Exact `type` attribute to match
    pub record_type: String,
    /// Also collect `<MetadataEntry>` children
    pub include_metadata: bool,
}

impl RecordFilter {
    pub fn new(record_type: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            include_metadata: false,
        }
    }

    pub fn with_metadata(mut self, include_metadata: bool) -> Self {
        self.include_metadata = include_metadata;
        self
    }
}

/// Destination of exported records, fed one record at a time
pub trait RecordSink {
    fn write_record(&mut self, record: &HealthRecord) -> Result<()>;

    /// Flush buffered output once the pass is over
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl RecordSink for Vec<HealthRecord> {
    fn write_record(&mut self, record: &HealthRecord) -> Result<()> {
        self.push(record.clone());
        Ok(())
    }
}

/// Result of a list pass
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TypeListing {
    /// Distinct `type` values, sorted
    pub types: BTreeSet<String>,
    /// Record elements encountered
    pub records_seen: usize,
    /// Record elements without a usable `type`
    pub malformed: usize,
    /// The file ended in a syntax error after streaming began
    pub truncated: bool,
}

/// Result of an export pass
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExportReport {
    /// Record elements encountered
    pub records_seen: usize,
    /// Elements whose type matched the filter
    pub matched: usize,
    /// Rows handed to the sink
    pub written: usize,
    /// Matching elements skipped for missing or unparsable fields
    pub malformed: usize,
    /// Elements without a `type` attribute
    pub untyped: usize,
    /// The file ended in a syntax error after streaming began
    pub truncated: bool,
}

/// How much of an element to decode
#[derive(Clone, Copy)]
enum Detail<'a> {
    TypeOnly,
    Matching {
        record_type: &'a str,
        metadata: bool,
    },
}

/// Outcome of decoding one `<Record>` element
enum Scanned {
    Type(String),
    NotMatching,
    Record(HealthRecord),
    Malformed(String),
    Untyped,
}

/// Forward-only reader over the `<Record>` elements of an export
pub struct RecordStream<R> {
    reader: Reader<R>,
    buf: Vec<u8>,
    bundle: PathBuf,
    /// A record met while looking for the first element, with whether it has children
    lookahead: Option<(BytesStart<'static>, bool)>,
    records_seen: usize,
    finished: bool,
    truncated: bool,
}

impl RecordStream<BufReader<File>> {
    /// Open an export file for streaming
    ///
    /// # Errors
    /// [`DataError::Stream`] if the file cannot be opened or does not start with an XML element.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| DataError::Stream {
            bundle: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_reader(BufReader::new(file), path)
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl<R: BufRead> RecordStream<R> {
    /// Stream records from any buffered reader
    ///
    /// `bundle` names the source in errors and logs. The reader is advanced up to the first
    /// element; failing to reach one is a fatal [`DataError::Stream`].
    pub fn from_reader(reader: R, bundle: impl Into<PathBuf>) -> Result<Self> {
        let mut stream = Self {
            reader: Reader::from_reader(reader),
            buf: Vec::new(),
            bundle: bundle.into(),
            lookahead: None,
            records_seen: 0,
            finished: false,
            truncated: false,
        };
        stream.reader.config_mut().trim_text(true);
        stream.prime()?;
        Ok(stream)
    }

    /// Advance to the first element, failing if the input is not XML
    fn prime(&mut self) -> Result<()> {
        loop {
            let step = match self.reader.read_event_into(&mut self.buf) {
                Ok(Event::Start(e)) => Ok(Some((is_record(&e), e.into_owned(), true))),
                Ok(Event::Empty(e)) => Ok(Some((is_record(&e), e.into_owned(), false))),
                Ok(Event::Eof) => Err("no XML element found".to_string()),
                Ok(_) => Ok(None),
                Err(e) => Err(e.to_string()),
            };
            self.buf.clear();

            match step {
                Ok(Some((record, element, has_children))) => {
                    if record {
                        self.lookahead = Some((element, has_children));
                    }
                    return Ok(());
                }
                Ok(None) => continue,
                Err(reason) => {
                    return Err(DataError::Stream {
                        bundle: self.bundle.clone(),
                        reason,
                    });
                }
            }
        }
    }

    /// Record elements encountered so far
    #[inline]
    pub fn records_seen(&self) -> usize {
        self.records_seen
    }

    /// Collect the distinct record types, consuming the stream
    ///
    /// Only the `type` attribute of each element is decoded and nothing else is kept, so memory
    /// grows with the number of distinct types, not the number of records.
    pub fn list_record_types(mut self) -> TypeListing {
        let mut listing = TypeListing::default();
        while let Some(scanned) = self.next_scanned(Detail::TypeOnly) {
            match scanned {
                Scanned::Type(record_type) => {
                    listing.types.insert(record_type);
                }
                Scanned::Untyped | Scanned::Malformed(_) => listing.malformed += 1,
                Scanned::NotMatching | Scanned::Record(_) => {}
            }
        }

        listing.records_seen = self.records_seen;
        listing.truncated = self.truncated;
        if listing.malformed > 0 {
            tracing::warn!(
                "Skipped {} record elements without a type in {}",
                listing.malformed,
                self.bundle.display()
            );
        }
        listing
    }

    /// Iterate over the well-formed records of one type
    ///
    /// Malformed matching elements are skipped; their count is available from the iterator.
    /// Stopping early is fine: nothing past the last yielded record has been read.
    pub fn records_of_type<'s>(&'s mut self, filter: &'s RecordFilter) -> RecordsOfType<'s, R> {
        RecordsOfType {
            stream: self,
            filter,
            report: ExportReport::default(),
        }
    }

    /// Decode the next `<Record>` element
    fn next_scanned(&mut self, detail: Detail<'_>) -> Option<Scanned> {
        loop {
            if let Some((element, has_children)) = self.lookahead.take() {
                return Some(self.finish_element(&element, has_children, detail));
            }
            if self.finished {
                return None;
            }

            // Decode while the event still borrows the buffer, then release it
            let step = match self.reader.read_event_into(&mut self.buf) {
                Ok(Event::Empty(e)) if is_record(&e) => Some(Ok((scan_element(&e, detail), false))),
                Ok(Event::Start(e)) if is_record(&e) => Some(Ok((scan_element(&e, detail), true))),
                Ok(Event::Eof) => Some(Err(None)),
                Ok(_) => None,
                Err(e) => Some(Err(Some(e))),
            };
            self.buf.clear();

            match step {
                None => continue,
                Some(Ok((mut scanned, has_children))) => {
                    if has_children {
                        let metadata = match (&mut scanned, detail) {
                            (Scanned::Record(record), Detail::Matching { metadata: true, .. }) => {
                                Some(&mut record.metadata)
                            }
                            _ => None,
                        };
                        self.skip_children(metadata);
                    }
                    self.count_element();
                    return Some(scanned);
                }
                Some(Err(None)) => {
                    self.finished = true;
                    return None;
                }
                Some(Err(Some(e))) => {
                    self.stop_on_error(e);
                    return None;
                }
            }
        }
    }

    /// Decode an element kept aside while priming the stream
    fn finish_element(
        &mut self,
        element: &BytesStart<'_>,
        has_children: bool,
        detail: Detail<'_>,
    ) -> Scanned {
        let mut scanned = scan_element(element, detail);
        if has_children {
            let metadata = match (&mut scanned, detail) {
                (Scanned::Record(record), Detail::Matching { metadata: true, .. }) => {
                    Some(&mut record.metadata)
                }
                _ => None,
            };
            self.skip_children(metadata);
        }
        self.count_element();
        scanned
    }

    /// Consume the children of an open `<Record>`, optionally collecting metadata entries
    fn skip_children(&mut self, mut metadata: Option<&mut Vec<(String, String)>>) {
        let mut depth = 1usize;
        while depth > 0 {
            let step = match self.reader.read_event_into(&mut self.buf) {
                Ok(Event::Start(_)) => {
                    depth += 1;
                    Ok(None)
                }
                Ok(Event::End(_)) => {
                    depth -= 1;
                    Ok(None)
                }
                Ok(Event::Empty(e)) if depth == 1 && metadata.is_some() => {
                    Ok(metadata_entry(&e))
                }
                Ok(Event::Eof) => Err(None),
                Ok(_) => Ok(None),
                Err(e) => Err(Some(e)),
            };
            self.buf.clear();

            match step {
                Ok(Some(entry)) => {
                    if let Some(entries) = metadata.as_mut() {
                        entries.push(entry);
                    }
                }
                Ok(None) => {}
                Err(None) => {
                    self.finished = true;
                    self.truncated = true;
                    tracing::warn!(
                        "{} ends inside a record element",
                        self.bundle.display()
                    );
                    return;
                }
                Err(Some(e)) => {
                    self.stop_on_error(e);
                    return;
                }
            }
        }
    }

    fn count_element(&mut self) {
        self.records_seen += 1;
        if self.records_seen % PROGRESS_INTERVAL == 0 {
            tracing::debug!(
                "Scanned {} records of {}",
                self.records_seen,
                self.bundle.display()
            );
        }
    }

    /// A syntax error after the first element ends the pass without discarding earlier output
    fn stop_on_error(&mut self, error: quick_xml::Error) {
        tracing::warn!(
            "Stopped reading {} at byte {} after {} records: {error}",
            self.bundle.display(),
            self.reader.buffer_position(),
            self.records_seen
        );
        self.finished = true;
        self.truncated = true;
    }
}

/// Iterator over the well-formed records of one type
pub struct RecordsOfType<'s, R> {
    stream: &'s mut RecordStream<R>,
    filter: &'s RecordFilter,
    report: ExportReport,
}

impl<R: BufRead> RecordsOfType<'_, R> {
    /// Counters for the elements consumed so far
    pub fn report(&self) -> ExportReport {
        ExportReport {
            records_seen: self.stream.records_seen,
            truncated: self.stream.truncated,
            ..self.report.clone()
        }
    }
}

impl<R: BufRead> Iterator for RecordsOfType<'_, R> {
    type Item = HealthRecord;

    fn next(&mut self) -> Option<HealthRecord> {
        let detail = Detail::Matching {
            record_type: &self.filter.record_type,
            metadata: self.filter.include_metadata,
        };
        loop {
            match self.stream.next_scanned(detail)? {
                Scanned::Record(record) => {
                    self.report.matched += 1;
                    self.report.written += 1;
                    return Some(record);
                }
                Scanned::Malformed(reason) => {
                    self.report.matched += 1;
                    self.report.malformed += 1;
                    tracing::debug!("Skipping malformed {} record: {reason}", self.filter.record_type);
                }
                Scanned::Untyped => self.report.untyped += 1,
                Scanned::NotMatching | Scanned::Type(_) => {}
            }
        }
    }
}

/// Stream every record matching `filter` into `sink`, one row at a time
///
/// Only sink failures are errors; malformed elements and a truncated file are reported in the
/// returned [`ExportReport`].
pub fn export_records<R: BufRead>(
    stream: &mut RecordStream<R>,
    filter: &RecordFilter,
    sink: &mut dyn RecordSink,
) -> Result<ExportReport> {
    #[cfg(feature = "profiling")]
    profiling::scope!("records::export_records");

    let mut records = stream.records_of_type(filter);
    for record in records.by_ref() {
        sink.write_record(&record)?;
    }
    let report = records.report();
    sink.finish()?;

    if report.malformed > 0 || report.untyped > 0 {
        tracing::warn!(
            "Skipped {} malformed {} records and {} untyped elements",
            report.malformed,
            filter.record_type,
            report.untyped
        );
    }
    if report.matched == 0 {
        tracing::warn!("No records found for type: {}", filter.record_type);
    }
    Ok(report)
}

/// Default output file for an export, e.g. `HeartRate.csv` for `HKQuantityTypeIdentifierHeartRate`
pub fn default_export_path(record_type: &str) -> PathBuf {
    let short = TYPE_PREFIXES
        .iter()
        .find_map(|prefix| record_type.strip_prefix(prefix))
        .filter(|rest| !rest.is_empty())
        .unwrap_or(record_type);

    let file_name: String = short
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    PathBuf::from(format!("{file_name}.csv"))
}

#[inline]
fn is_record(e: &BytesStart<'_>) -> bool {
    e.local_name().as_ref() == b"Record"
}

/// Find the `type` attribute without decoding the others
fn element_type(e: &BytesStart<'_>) -> std::result::Result<Option<String>, String> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| err.to_string())?;
        if attr.key.local_name().as_ref() == b"type" {
            let value = attr.unescape_value().map_err(|err| err.to_string())?;
            let value = value.trim();
            return Ok((!value.is_empty()).then(|| value.to_string()));
        }
    }
    Ok(None)
}

/// Decode a `<Record>` start tag to the level `detail` asks for
fn scan_element(e: &BytesStart<'_>, detail: Detail<'_>) -> Scanned {
    let record_type = match element_type(e) {
        Ok(Some(t)) => t,
        Ok(None) => return Scanned::Untyped,
        Err(reason) => return Scanned::Malformed(reason),
    };

    match detail {
        Detail::TypeOnly => Scanned::Type(record_type),
        Detail::Matching { record_type: wanted, .. } if wanted != record_type => {
            Scanned::NotMatching
        }
        Detail::Matching { .. } => match decode_record(e, record_type) {
            Ok(record) => Scanned::Record(record),
            Err(reason) => Scanned::Malformed(reason),
        },
    }
}

fn decode_record(
    e: &BytesStart<'_>,
    record_type: String,
) -> std::result::Result<HealthRecord, String> {
    let mut value = None;
    let mut unit = None;
    let mut start = None;
    let mut end = None;
    let mut source_name = None;

    for attr in e.attributes() {
        let attr = attr.map_err(|err| err.to_string())?;
        let text = attr
            .unescape_value()
            .map_err(|err| err.to_string())?
            .into_owned();
        match attr.key.local_name().as_ref() {
            b"value" => value = Some(RecordValue::parse(text)),
            b"unit" => unit = Some(text),
            b"startDate" => start = Some(text),
            b"endDate" => end = Some(text),
            b"sourceName" => source_name = Some(text),
            _ => {}
        }
    }

    let start_date = parse_export_date(start.as_deref(), "startDate")?;
    let end_date = parse_export_date(end.as_deref(), "endDate")?;

    Ok(HealthRecord {
        record_type,
        value,
        unit,
        start_date,
        end_date,
        source_name,
        metadata: Vec::new(),
    })
}

fn parse_export_date(
    raw: Option<&str>,
    field: &str,
) -> std::result::Result<DateTime<FixedOffset>, String> {
    let raw = raw.ok_or_else(|| format!("missing {field}"))?.trim();
    DateTime::parse_from_str(raw, EXPORT_DATE_FORMAT)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map_err(|err| format!("invalid {field} '{raw}': {err}"))
}

fn metadata_entry(e: &BytesStart<'_>) -> Option<(String, String)> {
    if e.local_name().as_ref() != b"MetadataEntry" {
        return None;
    }
    let mut key = None;
    let mut value = None;
    for attr in e.attributes().flatten() {
        let Ok(text) = attr.unescape_value() else {
            continue;
        };
        match attr.key.local_name().as_ref() {
            b"key" => key = Some(text.into_owned()),
            b"value" => value = Some(text.into_owned()),
            _ => {}
        }
    }
    Some((key?, value.unwrap_or_default()))
}
