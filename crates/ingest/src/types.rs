use serde::Serialize;
use std::io;

/// How a row was placed into the cubes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineItemOutcome {
    Ignore,
    Hourly,
    Monthly,
    /// Needs state that is only complete after the first pass.
    Delay,
}

/// Per-row failures. Logged and counted, never fatal for the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineItemError {
    NotInitialized,
    Malformed(String),
    Unclassifiable(String),
}

impl std::fmt::Display for LineItemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "column indexes not initialized"),
            Self::Malformed(msg) => write!(f, "malformed row: {}", msg),
            Self::Unclassifiable(msg) => write!(f, "unclassifiable row: {}", msg),
        }
    }
}

impl std::error::Error for LineItemError {}

/// Counters for one billing file (or one archive entry).
#[derive(Debug, Clone, Default, Serialize)]
pub struct FileStats {
    pub entries: usize,
    pub lines: usize,
    pub hourly: usize,
    pub monthly: usize,
    pub ignored: usize,
    pub delayed: usize,
    pub replayed: usize,
    pub dropped: usize,
    pub malformed: usize,
    /// Exclusive end of the latest hourly row.
    pub end_millis: Option<i64>,
    pub issues: Vec<IngestIssue>,
}

impl FileStats {
    pub fn merge(&mut self, other: FileStats) {
        self.entries += other.entries;
        self.lines += other.lines;
        self.hourly += other.hourly;
        self.monthly += other.monthly;
        self.ignored += other.ignored;
        self.delayed += other.delayed;
        self.replayed += other.replayed;
        self.dropped += other.dropped;
        self.malformed += other.malformed;
        self.end_millis = match (self.end_millis, other.end_millis) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self.issues.extend(other.issues);
    }

    pub fn observe_end(&mut self, end_millis: i64) {
        self.end_millis = Some(
            self.end_millis
                .map_or(end_millis, |current| current.max(end_millis)),
        );
    }
}

/// Non-fatal issues encountered while reading a file.
#[derive(Debug, Clone, Serialize)]
pub struct IngestIssue {
    pub file_path: String,
    pub message: String,
}

/// Errors emitted by the billing file pipeline.
#[derive(Debug)]
pub enum IngestError {
    Io(io::Error),
    Csv(csv::Error),
    Zip(zip::result::ZipError),
    MissingColumn(String),
    Cancelled,
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io error: {}", err),
            Self::Csv(err) => write!(f, "csv error: {}", err),
            Self::Zip(err) => write!(f, "zip error: {}", err),
            Self::MissingColumn(name) => write!(f, "missing required column {}", name),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for IngestError {}

impl From<io::Error> for IngestError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<csv::Error> for IngestError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

impl From<zip::result::ZipError> for IngestError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Zip(err)
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
