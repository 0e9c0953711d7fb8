//! Append-only CSV record store
//!
//! One file per source under the data directory, named `<kind>_<name>.csv`.
//! The header row is written when the file is created (or found empty);
//! after that rows are only ever appended. Each row is encoded in memory and
//! written with a single call, so a failed append never leaves earlier rows
//! damaged.

#![allow(clippy::uninlined_format_args)]

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{Metric, Record, SourceConfig, SourceKind};

/// `Date` column format
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error on {path:?}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Store {path:?} has no '{column}' column")]
    MissingColumn { path: PathBuf, column: String },
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Durable per-source record storage
pub trait RecordStore: Send + Sync {
    /// Identifiers already stored for `source`; empty when nothing is stored yet
    fn load_identifiers(&self, source: &SourceConfig) -> PersistenceResult<HashSet<String>>;

    /// Append one record to its source's store
    fn append(&self, record: &Record) -> PersistenceResult<()>;
}

/// Column layout for a source kind
pub const fn header(kind: SourceKind) -> &'static [&'static str] {
    match kind {
        SourceKind::Listing => &["Date", "SourceName", "Title", "Upvotes", "Comments", "URL"],
        SourceKind::VideoFeed => &["Date", "Username", "VideoURL", "Description", "Likes", "Comments", "Shares"],
    }
}

/// Name of the column holding the record identifier
pub const fn identifier_column(kind: SourceKind) -> &'static str {
    match kind {
        SourceKind::Listing => "URL",
        SourceKind::VideoFeed => "VideoURL",
    }
}

fn row(record: &Record) -> Vec<String> {
    let date = record.captured_at.format(DATE_FORMAT).to_string();
    let count = |metric: Metric| record.metric(metric).to_string();
    match record.source_kind {
        SourceKind::Listing => vec![
            date,
            record.source_name.clone(),
            record.title.clone(),
            count(Metric::Upvotes),
            count(Metric::Comments),
            record.identifier.clone(),
        ],
        SourceKind::VideoFeed => vec![
            date,
            record.source_name.clone(),
            record.identifier.clone(),
            record.title.clone(),
            count(Metric::Likes),
            count(Metric::Comments),
            count(Metric::Shares),
        ],
    }
}

/// CSV files under a data directory
#[derive(Debug, Clone)]
pub struct CsvRecordStore {
    data_dir: PathBuf,
}

impl CsvRecordStore {
    /// Open the store, creating the data directory if needed
    pub fn open(data_dir: impl Into<PathBuf>) -> PersistenceResult<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir).map_err(|source| PersistenceError::Io {
            path: data_dir.clone(),
            source,
        })?;
        info!("📁 Record store at {:?}", data_dir);
        Ok(Self { data_dir })
    }

    pub fn path_for(&self, kind: SourceKind, name: &str) -> PathBuf {
        self.data_dir.join(format!("{}_{}.csv", kind.as_str(), name))
    }

    fn encode(path: &Path, fields: &[&str], buffer: &mut Vec<u8>) -> PersistenceResult<()> {
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(buffer);
        writer.write_record(fields).map_err(|source| PersistenceError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        writer.flush().map_err(|source| PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl RecordStore for CsvRecordStore {
    fn load_identifiers(&self, source: &SourceConfig) -> PersistenceResult<HashSet<String>> {
        let path = self.path_for(source.kind, &source.name);
        if !path.exists() {
            debug!("No store yet at {:?}", path);
            return Ok(HashSet::new());
        }

        let csv_error = |source| PersistenceError::Csv {
            path: path.clone(),
            source,
        };
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&path)
            .map_err(csv_error)?;

        let headers = reader.headers().map_err(csv_error)?.clone();
        if headers.is_empty() {
            return Ok(HashSet::new());
        }

        let column = identifier_column(source.kind);
        let index = headers
            .iter()
            .position(|h| h.trim() == column)
            .ok_or_else(|| PersistenceError::MissingColumn {
                path: path.clone(),
                column: column.to_string(),
            })?;

        let mut identifiers = HashSet::new();
        for (line, result) in reader.records().enumerate() {
            match result {
                Ok(row) => {
                    if let Some(id) = row.get(index).map(str::trim).filter(|id| !id.is_empty()) {
                        identifiers.insert(id.to_string());
                    }
                }
                Err(e) => warn!("⚠️ Skipping unreadable row {} in {:?}: {}", line + 2, path, e),
            }
        }

        info!("📚 Loaded {} stored identifiers for {}", identifiers.len(), source.key());
        Ok(identifiers)
    }

    fn append(&self, record: &Record) -> PersistenceResult<()> {
        let path = self.path_for(record.source_kind, &record.source_name);
        let io_error = |source| PersistenceError::Io {
            path: path.clone(),
            source,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_error)?;
        let needs_header = file.metadata().map_err(io_error)?.len() == 0;

        let mut buffer = Vec::new();
        if needs_header {
            Self::encode(&path, header(record.source_kind), &mut buffer)?;
        }
        let fields = row(record);
        let fields: Vec<&str> = fields.iter().map(String::as_str).collect();
        Self::encode(&path, &fields, &mut buffer)?;

        file.write_all(&buffer).map_err(io_error)?;
        file.flush().map_err(io_error)?;
        debug!("💾 Appended {} to {:?}", record.identifier, path);
        Ok(())
    }
}
