use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use billing_core::RunData;
use csv::{ReaderBuilder, StringRecord};
use flate2::read::GzDecoder;
use tracing::{error, info, warn};
use zip::ZipArchive;

use crate::line_item::LineItemProcessor;
use crate::types::{FileStats, IngestError, IngestIssue, LineItemError, LineItemOutcome, Result};

const PROGRESS_INTERVAL: usize = 500_000;

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineOptions<'a> {
    pub with_tags: bool,
    /// Monitor rows do not move the run's end time.
    pub monitor: bool,
    pub cancel: Option<&'a AtomicBool>,
}

impl PipelineOptions<'_> {
    fn cancelled(&self) -> bool {
        self.cancel.is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}

/// Rows that asked to be classified again once the first pass is done.
#[derive(Debug, Default)]
pub struct DelayedRows {
    rows: Vec<StringRecord>,
}

impl DelayedRows {
    pub fn push(&mut self, row: StringRecord) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Zip,
    Gzip,
    Csv,
}

fn file_kind(path: &Path) -> FileKind {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    if name.ends_with(".zip") {
        FileKind::Zip
    } else if name.ends_with(".gz") {
        FileKind::Gzip
    } else {
        FileKind::Csv
    }
}

/// Streams a local billing file (zip of CSVs, gzip CSV or plain CSV) through
/// the line-item processor.
pub fn process_billing_file(
    path: &Path,
    options: PipelineOptions<'_>,
    processor: &mut dyn LineItemProcessor,
    run: &mut RunData,
) -> Result<FileStats> {
    let started = Instant::now();
    let display_name = path.display().to_string();
    let file = File::open(path)?;
    let mut stats = FileStats::default();
    match file_kind(path) {
        FileKind::Zip => {
            let mut archive = ZipArchive::new(BufReader::new(file))?;
            for i in 0..archive.len() {
                let entry = archive.by_index(i)?;
                if entry.is_dir() {
                    continue;
                }
                let name = format!("{}!{}", display_name, entry.name());
                stats.merge(process_csv_stream(&name, entry, options, processor, run)?);
            }
        }
        FileKind::Gzip => {
            let reader = GzDecoder::new(BufReader::new(file));
            stats.merge(process_csv_stream(&display_name, reader, options, processor, run)?);
        }
        FileKind::Csv => {
            let reader = BufReader::new(file);
            stats.merge(process_csv_stream(&display_name, reader, options, processor, run)?);
        }
    }
    info!(
        file = %display_name,
        lines = stats.lines,
        hourly = stats.hourly,
        monthly = stats.monthly,
        delayed = stats.delayed,
        dropped = stats.dropped,
        malformed = stats.malformed,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "processed billing file"
    );
    Ok(stats)
}

/// Reads one CSV stream: header, first pass, then replay of delayed rows.
pub fn process_csv_stream<R: Read>(
    name: &str,
    reader: R,
    options: PipelineOptions<'_>,
    processor: &mut dyn LineItemProcessor,
    run: &mut RunData,
) -> Result<FileStats> {
    let mut csv = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);
    let mut stats = FileStats {
        entries: 1,
        ..FileStats::default()
    };
    let mut header = StringRecord::new();
    if !csv.read_record(&mut header)? {
        return Ok(stats);
    }
    processor.init_indexes(&header, options.with_tags)?;

    let delayed = first_pass(name, &mut csv, options, processor, run, &mut stats)?;
    if !delayed.is_empty() {
        info!(file = name, rows = delayed.len(), "replaying delayed rows");
    }
    replay(delayed, options, processor, run, &mut stats)?;
    Ok(stats)
}

/// Classifies every row once, returning those that asked for a delay.
pub fn first_pass<R: Read>(
    name: &str,
    csv: &mut csv::Reader<R>,
    options: PipelineOptions<'_>,
    processor: &mut dyn LineItemProcessor,
    run: &mut RunData,
    stats: &mut FileStats,
) -> Result<DelayedRows> {
    let mut delayed = DelayedRows::default();
    let mut record = StringRecord::new();
    loop {
        if options.cancelled() {
            return Err(IngestError::Cancelled);
        }
        match csv.read_record(&mut record) {
            Ok(false) => break,
            Ok(true) => {
                stats.lines += 1;
                if let Some(row) = handle_row(&record, false, options, processor, run, stats) {
                    delayed.push(row);
                }
                if stats.lines % PROGRESS_INTERVAL == 0 {
                    info!(file = name, lines = stats.lines, "processing billing file");
                }
            }
            Err(err) if is_benign_eof(&err) => {
                info!(file = name, "reached end of stream");
                break;
            }
            Err(err) if matches!(err.kind(), csv::ErrorKind::Io(_)) => {
                error!(
                    file = name,
                    lines = stats.lines,
                    error = %err,
                    "stopped reading billing file"
                );
                return Err(err.into());
            }
            Err(err) => {
                // The reader has already moved past the bad record.
                stats.lines += 1;
                stats.malformed += 1;
                let line = err.position().map_or(stats.lines as u64 + 1, |pos| pos.line());
                warn!(file = name, line, error = %err, "skipping unreadable row");
                stats.issues.push(IngestIssue {
                    file_path: name.to_string(),
                    message: format!("line {line}: {err}"),
                });
            }
        }
    }
    Ok(delayed)
}

/// Second pass over delayed rows. Rows that still cannot be placed are
/// dropped.
pub fn replay(
    delayed: DelayedRows,
    options: PipelineOptions<'_>,
    processor: &mut dyn LineItemProcessor,
    run: &mut RunData,
    stats: &mut FileStats,
) -> Result<()> {
    for row in delayed.rows {
        if options.cancelled() {
            return Err(IngestError::Cancelled);
        }
        stats.replayed += 1;
        if handle_row(&row, true, options, processor, run, stats).is_some() {
            warn!(row = %join_row(&row), "delayed row asked for another pass, dropping");
            stats.dropped += 1;
        }
    }
    Ok(())
}

// Returns the row when it must be retried on the second pass.
fn handle_row(
    record: &StringRecord,
    second_pass: bool,
    options: PipelineOptions<'_>,
    processor: &mut dyn LineItemProcessor,
    run: &mut RunData,
    stats: &mut FileStats,
) -> Option<StringRecord> {
    match processor.process(record, second_pass, run) {
        Ok(LineItemOutcome::Delay) => {
            if !second_pass {
                stats.delayed += 1;
            }
            Some(record.clone())
        }
        Ok(LineItemOutcome::Hourly) => {
            stats.hourly += 1;
            if !options.monitor {
                if let Some(end) = processor.end_millis(record) {
                    stats.observe_end(end);
                }
            }
            None
        }
        Ok(LineItemOutcome::Monthly) => {
            stats.monthly += 1;
            None
        }
        Ok(LineItemOutcome::Ignore) => {
            stats.ignored += 1;
            None
        }
        Err(LineItemError::Unclassifiable(reason)) => {
            warn!(row = %join_row(record), reason = %reason, "dropping unclassifiable row");
            stats.dropped += 1;
            None
        }
        Err(err) => {
            warn!(row = %join_row(record), error = %err, "skipping malformed row");
            stats.malformed += 1;
            None
        }
    }
}

fn join_row(record: &StringRecord) -> String {
    record.iter().collect::<Vec<_>>().join(",")
}

fn is_benign_eof(err: &csv::Error) -> bool {
    match err.kind() {
        csv::ErrorKind::Io(io_err) => {
            io_err.kind() == io::ErrorKind::UnexpectedEof
                || io_err.to_string().contains("Stream closed")
        }
        _ => false,
    }
}
