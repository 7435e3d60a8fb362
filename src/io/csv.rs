//! Streaming CSV ingestion in bounded row batches.
//!
//! This module provides:
//! - **Header validation**: [`read_header`] checks the partition field without touching data rows
//! - **Batch streaming**: [`open_batches`] returns a lazy [`RowBatches`] iterator
//!
//! # Design notes
//! - Batching is **row-count based** (header excluded), not byte-range based.
//! - Rows stay as raw [`StringRecord`]s; no per-column typing happens here.
//! - Ragged rows (field count differing from the header) are rejected, never padded.
//! - The iterator is single-pass. A failure mid-file ends iteration; restarting means
//!   reopening the object from the first batch.
//! - An optional read budget bounds the time spent pulling one batch. It is checked after
//!   each record, so an overrun surfaces as an `Io` error of kind `TimedOut`.

use crate::error::SchemaError;
use csv::{Reader, ReaderBuilder, StringRecord};
use std::collections::HashSet;
use std::io::Read;
use std::iter::FusedIterator;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Column layout of a raw file plus the position of its partition field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    fields: Vec<String>,
    key_field: String,
    key_index: usize,
}

impl FieldSchema {
    /// Build a schema from a header record.
    ///
    /// Repeated column names are made unique by suffixing later occurrences with `.1`, `.2`
    /// and so on, skipping any name the header already uses. The partition field itself
    /// must appear exactly once.
    ///
    /// # Errors
    /// [`SchemaError::MissingField`] if `key_field` is not a column and
    /// [`SchemaError::DuplicateField`] if it is a column more than once.
    pub fn from_header(header: &StringRecord, key_field: &str) -> Result<Self, SchemaError> {
        let raw: Vec<&str> = header.iter().collect();

        let mut matches = raw.iter().enumerate().filter(|(_, f)| **f == key_field);
        let key_index = match (matches.next(), matches.next()) {
            (Some((index, _)), None) => index,
            (Some(_), Some(_)) => {
                return Err(SchemaError::DuplicateField {
                    field: key_field.to_string(),
                });
            }
            (None, _) => {
                return Err(SchemaError::MissingField {
                    field: key_field.to_string(),
                    available: raw.iter().map(|f| (*f).to_string()).collect(),
                });
            }
        };

        let mut taken: HashSet<String> = raw.iter().map(|f| (*f).to_string()).collect();
        let mut seen = HashSet::with_capacity(raw.len());
        let fields = raw
            .iter()
            .map(|name| {
                if seen.insert(*name) {
                    return (*name).to_string();
                }
                (1..)
                    .map(|n| format!("{name}.{n}"))
                    .find(|candidate| taken.insert(candidate.clone()))
                    .unwrap_or_default()
            })
            .collect();

        Ok(Self {
            fields,
            key_field: key_field.to_string(),
            key_index,
        })
    }

    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    #[must_use]
    pub fn key_field(&self) -> &str {
        &self.key_field
    }

    #[must_use]
    pub const fn key_index(&self) -> usize {
        self.key_index
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A contiguous span of data rows.
#[derive(Debug, Clone)]
pub struct RowBatch {
    /// 0-based sequence number of this batch within its file.
    pub index: usize,
    /// 0-based index of the first row in this batch, header excluded.
    pub first_row: u64,
    pub rows: Vec<StringRecord>,
}

impl RowBatch {
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Failure while pulling the next batch.
#[derive(Debug, Error)]
pub enum BatchReadError {
    /// The underlying stream failed.
    #[error("read failed near data row {row}: {source}")]
    Io {
        row: u64,
        #[source]
        source: std::io::Error,
    },

    /// The bytes were read but do not form a valid row.
    #[error("malformed data row {row}: {message}")]
    Malformed { row: u64, message: String },
}

impl BatchReadError {
    fn from_csv(err: csv::Error, row: u64) -> Self {
        if err.is_io_error() {
            let message = err.to_string();
            match err.into_kind() {
                csv::ErrorKind::Io(source) => Self::Io { row, source },
                _ => Self::Malformed { row, message },
            }
        } else {
            Self::Malformed {
                row,
                message: err.to_string(),
            }
        }
    }
}

fn reader_builder() -> ReaderBuilder {
    let mut builder = ReaderBuilder::new();
    builder.has_headers(true).flexible(false);
    builder
}

/// Read only the header of a CSV stream and resolve the partition field.
///
/// # Errors
/// [`SchemaError::Unreadable`] if the header cannot be decoded, otherwise see
/// [`FieldSchema::from_header`].
pub fn read_header<R: Read>(reader: R, key_field: &str) -> Result<FieldSchema, SchemaError> {
    let mut rdr = reader_builder().from_reader(reader);
    let header = rdr.headers().map_err(|e| SchemaError::Unreadable {
        message: e.to_string(),
    })?;
    FieldSchema::from_header(header, key_field)
}

/// Validate the header and return a lazy iterator over row batches.
///
/// `batch_row_limit` is clamped to at least 1.
///
/// # Errors
/// Header problems are reported as [`SchemaError`] before any data row is read.
pub fn open_batches<R: Read>(
    reader: R,
    key_field: &str,
    batch_row_limit: usize,
) -> Result<(FieldSchema, RowBatches<R>), SchemaError> {
    let mut rdr = reader_builder().from_reader(reader);
    let header = rdr.headers().map_err(|e| SchemaError::Unreadable {
        message: e.to_string(),
    })?;
    let schema = FieldSchema::from_header(header, key_field)?;

    let batches = RowBatches {
        reader: rdr,
        batch_row_limit: batch_row_limit.max(1),
        read_budget: None,
        next_index: 0,
        rows_read: 0,
        finished: false,
    };
    Ok((schema, batches))
}

/// Lazy, single-pass sequence of [`RowBatch`]es in file order.
pub struct RowBatches<R> {
    reader: Reader<R>,
    batch_row_limit: usize,
    read_budget: Option<Duration>,
    next_index: usize,
    rows_read: u64,
    finished: bool,
}

impl<R> RowBatches<R> {
    /// Fail any batch whose rows take longer than `budget` to read.
    #[must_use]
    pub const fn with_read_budget(mut self, budget: Duration) -> Self {
        self.read_budget = Some(budget);
        self
    }

    /// Data rows consumed so far.
    #[must_use]
    pub const fn rows_read(&self) -> u64 {
        self.rows_read
    }
}

impl<R: Read> Iterator for RowBatches<R> {
    type Item = Result<RowBatch, BatchReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let first_row = self.rows_read;
        let started = Instant::now();
        let mut rows = Vec::with_capacity(self.batch_row_limit.min(4096));
        while rows.len() < self.batch_row_limit {
            let mut record = StringRecord::new();
            let read = self.reader.read_record(&mut record);
            if let Some(budget) = self.read_budget.filter(|b| started.elapsed() > *b) {
                self.finished = true;
                return Some(Err(BatchReadError::Io {
                    row: self.rows_read + 1,
                    source: std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("batch {} exceeded read budget of {budget:?}", self.next_index),
                    ),
                }));
            }
            match read {
                Ok(true) => {
                    rows.push(record);
                    self.rows_read += 1;
                }
                Ok(false) => {
                    self.finished = true;
                    break;
                }
                Err(err) => {
                    self.finished = true;
                    return Some(Err(BatchReadError::from_csv(err, self.rows_read + 1)));
                }
            }
        }

        if rows.is_empty() {
            return None;
        }

        let batch = RowBatch {
            index: self.next_index,
            first_row,
            rows,
        };
        self.next_index += 1;
        Some(Ok(batch))
    }
}

impl<R: Read> FusedIterator for RowBatches<R> {}
