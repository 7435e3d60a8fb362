//! The partitioning transformer.
//!
//! One raw file moves through five steps:
//!
//! 1. **validate**: read the header, resolve the partition field
//! 2. **stream**: pull bounded [`RowBatch`]es in file order
//! 3. **group**: split each batch by partition value ([`group_by_key`])
//! 4. **publish**: encode each group to Parquet and put it with a single call
//! 5. **finalize**: copy the source to the archive, verify the copy, delete the source
//!
//! Any failure stops the file where it is. Artifacts already written stay in place (their
//! names are deterministic, so a retry overwrites them) and the source is not touched.

use crate::config::TransformConfig;
use crate::error::{RemoteOp, Result, TransformError};
use crate::event::{InvocationOutcome, S3Event};
use crate::io::cloud::helpers::run_remote;
use crate::io::cloud::{CloudIOError, ErrorKind, ObjectIO};
use crate::io::csv::{BatchReadError, FieldSchema, RowBatch, RowBatches, open_batches, read_header};
use crate::io::parquet::encode_rows;
use crate::namespace::RawFileRef;
use crate::partition::{artifact_key, group_by_key};
use chrono::{NaiveDate, Utc};
use csv::StringRecord;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Read;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Footer metadata keys written into every artifact.
pub const META_SOURCE: &str = "partbeam.source";
pub const META_BATCH: &str = "partbeam.batch";
pub const META_PARTITION: &str = "partbeam.partition";

/// A published partition artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub bucket: String,
    pub key: String,
    pub partition_value: String,
    pub batch: usize,
    pub rows: usize,
    pub bytes: usize,
}

/// The verified archive copy of a raw file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRef {
    pub bucket: String,
    pub key: String,
    pub size: u64,
}

/// Summary of one successfully processed raw file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReport {
    pub source: RawFileRef,
    pub batches: usize,
    pub rows: u64,
    pub artifacts: Vec<ArtifactRef>,
    pub archive: ArchiveRef,
}

impl FileReport {
    /// Distinct partition values touched by this file, sorted.
    #[must_use]
    pub fn partitions(&self) -> Vec<&str> {
        let mut values: Vec<&str> = self
            .artifacts
            .iter()
            .map(|a| a.partition_value.as_str())
            .collect();
        values.sort_unstable();
        values.dedup();
        values
    }
}

/// Rewrites raw files into a key-partitioned Parquet layout.
///
/// The storage backend is injected; every remote call runs under the configured time budget
/// and retry policy.
pub struct PartitionTransformer<S> {
    storage: S,
    config: TransformConfig,
}

impl<S: ObjectIO> PartitionTransformer<S> {
    /// # Errors
    /// Returns an error if `config` does not validate.
    pub fn new(storage: S, config: TransformConfig) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self { storage, config })
    }

    #[must_use]
    pub const fn config(&self) -> &TransformConfig {
        &self.config
    }

    #[must_use]
    pub const fn storage(&self) -> &S {
        &self.storage
    }

    /// Read only the header of `file` and check the partition field.
    ///
    /// # Errors
    /// [`TransformError::Validation`] if the field is missing or the header is unusable;
    /// [`TransformError::TransientIo`] if the object cannot be opened.
    pub fn validate(&self, file: &RawFileRef) -> Result<FieldSchema> {
        let reader = self.open_source(file)?;
        read_header(reader, &self.config.partition_field).map_err(|source| {
            TransformError::Validation {
                file: file.to_string(),
                source,
            }
        })
    }

    /// Validate the header and return the lazy batch sequence for `file`.
    ///
    /// The object is opened once; batches are read on demand and cannot be restarted. The
    /// header and every batch are each held to the read time budget.
    ///
    /// # Errors
    /// Same as [`PartitionTransformer::validate`], plus [`TransformError::TransientIo`] if
    /// the header read overruns the budget.
    pub fn stream_batches(
        &self,
        file: &RawFileRef,
        batch_row_limit: usize,
    ) -> Result<(FieldSchema, RowBatches<Box<dyn Read + Send>>)> {
        let budget = self.config.timeouts.read();
        let reader = self.open_source(file)?;
        let started = Instant::now();
        let (schema, batches) = open_batches(reader, &self.config.partition_field, batch_row_limit)
            .map_err(|source| TransformError::Validation {
                file: file.to_string(),
                source,
            })?;
        if started.elapsed() > budget {
            let timeout = CloudIOError::new(
                ErrorKind::Timeout,
                format!("header read exceeded timeout of {budget:?}"),
            );
            return Err(transient(file, RemoteOp::Read, timeout));
        }
        Ok((schema, batches.with_read_budget(budget)))
    }

    /// Encode one group and write it with a single put.
    ///
    /// # Errors
    /// [`TransformError::Publish`] if encoding fails or the write is rejected;
    /// [`TransformError::TransientIo`] if the write keeps failing transiently.
    pub fn encode_and_publish(
        &self,
        file: &RawFileRef,
        schema: &FieldSchema,
        batch: usize,
        partition_value: &str,
        rows: &[StringRecord],
    ) -> Result<ArtifactRef> {
        let bucket = &self.config.destination_bucket;
        let key = artifact_key(
            &self.config.namespace,
            &self.config.partition_label,
            file,
            batch,
            partition_value,
        );
        let publish_error = |message: String| TransformError::Publish {
            file: file.to_string(),
            batch,
            partition: Some(partition_value.to_string()),
            message,
        };

        let metadata = HashMap::from([
            (META_SOURCE.to_string(), file.to_string()),
            (META_BATCH.to_string(), batch.to_string()),
            (META_PARTITION.to_string(), partition_value.to_string()),
        ]);
        let buffer = encode_rows(schema, rows, metadata).map_err(|e| publish_error(format!("{e:#}")))?;

        run_remote(&self.config.retry, self.config.timeouts.write(), || {
            self.storage.put_object(bucket, &key, &buffer)
        })
        .map_err(|source| {
            if source.is_transient() {
                transient(file, RemoteOp::Write, source)
            } else {
                publish_error(format!("write to {bucket}/{key} failed: {source}"))
            }
        })?;

        debug!(
            bucket = %bucket,
            key = %key,
            batch,
            partition = %partition_value,
            rows = rows.len(),
            bytes = buffer.len(),
            "published artifact"
        );
        Ok(ArtifactRef {
            bucket: bucket.clone(),
            key,
            partition_value: partition_value.to_string(),
            batch,
            rows: rows.len(),
            bytes: buffer.len(),
        })
    }

    /// Group one batch and publish every group.
    ///
    /// Returns only after every group of the batch has been attempted, in parallel mode too.
    /// Artifacts come back in ascending partition value order.
    ///
    /// # Errors
    /// The first group failure, as returned by [`PartitionTransformer::encode_and_publish`].
    pub fn publish_batch(
        &self,
        file: &RawFileRef,
        schema: &FieldSchema,
        batch: RowBatch,
    ) -> Result<Vec<ArtifactRef>> {
        let index = batch.index;
        let groups = group_by_key(batch.rows, schema.key_index(), &self.config.empty_key_sentinel);
        debug!(key = %file.key, batch = index, groups = groups.len(), "grouped batch");

        if self.config.parallel_publish && groups.len() > 1 {
            groups
                .into_par_iter()
                .map(|(value, rows)| self.encode_and_publish(file, schema, index, &value, &rows))
                .collect()
        } else {
            groups
                .iter()
                .map(|(value, rows)| self.encode_and_publish(file, schema, index, value, rows))
                .collect()
        }
    }

    /// Archive the source under `date`, verify the copy and delete the source.
    ///
    /// The delete is only issued once the archive copy is confirmed to exist with the same
    /// byte size as the source.
    ///
    /// # Errors
    /// [`TransformError::Archive`] if any step is rejected outright or the copy cannot be
    /// verified; [`TransformError::TransientIo`] if a step keeps failing transiently.
    pub fn finalize(&self, file: &RawFileRef, date: NaiveDate) -> Result<ArchiveRef> {
        let retry = &self.config.retry;
        let timeouts = &self.config.timeouts;
        let bucket = &self.config.destination_bucket;
        let archive_key = self.config.namespace.archive_key(date, file);
        let archive_error = |message: String| TransformError::Archive {
            file: file.to_string(),
            archive_key: format!("{bucket}/{archive_key}"),
            message,
        };

        let source = run_remote(retry, timeouts.read(), || {
            self.storage.get_metadata(&file.bucket, &file.key)
        })
        .map_err(|e| {
            if e.is_transient() {
                transient(file, RemoteOp::Read, e)
            } else {
                archive_error(format!("source could not be inspected: {e}"))
            }
        })?;

        run_remote(retry, timeouts.copy(), || {
            self.storage
                .copy_object(&file.bucket, &file.key, bucket, &archive_key)
        })
        .map_err(|e| {
            if e.is_transient() {
                transient(file, RemoteOp::Copy, e)
            } else {
                archive_error(format!("copy failed: {e}"))
            }
        })?;

        let copied = run_remote(retry, timeouts.read(), || {
            self.storage.get_metadata(bucket, &archive_key)
        })
        .map_err(|e| {
            if e.is_transient() {
                transient(file, RemoteOp::Verify, e)
            } else {
                archive_error(format!("archive copy could not be verified: {e}"))
            }
        })?;
        if copied.size != source.size {
            return Err(archive_error(format!(
                "archive copy is {} bytes, source is {} bytes",
                copied.size, source.size
            )));
        }

        run_remote(retry, timeouts.delete(), || {
            self.storage.delete_object(&file.bucket, &file.key)
        })
        .map_err(|e| {
            if e.is_transient() {
                transient(file, RemoteOp::Delete, e)
            } else {
                archive_error(format!("source delete was rejected: {e}"))
            }
        })?;

        info!(
            bucket = %file.bucket,
            key = %file.key,
            archive = %archive_key,
            size = source.size,
            "archived and removed raw file"
        );
        Ok(ArchiveRef {
            bucket: bucket.clone(),
            key: archive_key,
            size: source.size,
        })
    }

    /// Process `file` end to end, archiving under today's UTC date.
    ///
    /// # Errors
    /// See [`PartitionTransformer::process_file_on`].
    pub fn process_file(&self, file: &RawFileRef) -> Result<FileReport> {
        self.process_file_on(file, Utc::now().date_naive())
    }

    /// Process `file` end to end, archiving under `date`.
    ///
    /// All batches are published before finalize runs. On error nothing further happens and
    /// the source stays where it is.
    ///
    /// # Errors
    /// Any [`TransformError`] raised by one of the steps.
    pub fn process_file_on(&self, file: &RawFileRef, date: NaiveDate) -> Result<FileReport> {
        let started = Instant::now();
        info!(bucket = %file.bucket, key = %file.key, "processing raw file");

        let (schema, batches) = self.stream_batches(file, self.config.batch_row_limit)?;
        debug!(
            key = %file.key,
            columns = schema.len(),
            partition_field = %schema.key_field(),
            "header validated"
        );

        let mut artifacts = Vec::new();
        let mut batch_count = 0;
        let mut rows = 0u64;
        for batch in batches {
            let batch = batch.map_err(|e| batch_read_error(file, batch_count, e))?;
            batch_count += 1;
            rows += batch.len() as u64;
            debug!(key = %file.key, batch = batch.index, first_row = batch.first_row, rows = batch.len(), "read batch");
            artifacts.extend(self.publish_batch(file, &schema, batch)?);
        }

        let archive = self.finalize(file, date)?;

        info!(
            bucket = %file.bucket,
            key = %file.key,
            batches = batch_count,
            rows,
            artifacts = artifacts.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "raw file partitioned"
        );
        Ok(FileReport {
            source: file.clone(),
            batches: batch_count,
            rows,
            artifacts,
            archive,
        })
    }

    /// Handle one notification, archiving under today's UTC date.
    pub fn handle_event(&self, event: &S3Event) -> InvocationOutcome {
        self.handle_event_on(event, Utc::now().date_naive())
    }

    /// Process every eligible record of `event` in order.
    ///
    /// Keys outside the raw prefix are skipped. The first failing file ends the invocation
    /// with status 500 and a body naming the file and the error kind; files after it are not
    /// attempted.
    pub fn handle_event_on(&self, event: &S3Event, date: NaiveDate) -> InvocationOutcome {
        let mut processed = 0usize;
        let mut skipped = 0usize;
        let mut artifacts = 0usize;

        for record in &event.records {
            let file = record.file();
            if !self.config.namespace.accepts(&file.key) {
                info!(bucket = %file.bucket, key = %file.key, "skipping object outside raw prefix");
                skipped += 1;
                continue;
            }

            match self.process_file_on(&file, date) {
                Ok(report) => {
                    processed += 1;
                    artifacts += report.artifacts.len();
                }
                Err(err) => {
                    error!(
                        bucket = %file.bucket,
                        key = %file.key,
                        kind = %err.kind(),
                        retryable = err.is_retryable(),
                        error = %err,
                        "raw file failed"
                    );
                    return InvocationOutcome::failed(format!("Error processing {file}: {err}"));
                }
            }
        }

        if processed == 0 && skipped > 0 {
            warn!(skipped, "event contained no raw files");
        }
        InvocationOutcome::ok(format!(
            "Processed {processed} file(s) into {artifacts} artifact(s); skipped {skipped}"
        ))
    }

    /// Parse and handle a JSON notification. An unparsable payload yields status 500.
    pub fn handle_event_json(&self, payload: &str) -> InvocationOutcome {
        match S3Event::from_json(payload) {
            Ok(event) => self.handle_event(&event),
            Err(err) => {
                error!(error = %err, "invalid event payload");
                InvocationOutcome::failed(format!("Invalid event payload: {err}"))
            }
        }
    }

    fn open_source(&self, file: &RawFileRef) -> Result<Box<dyn Read + Send>> {
        run_remote(&self.config.retry, self.config.timeouts.read(), || {
            self.storage.get_object_reader(&file.bucket, &file.key)
        })
        .map_err(|e| transient(file, RemoteOp::Read, e))
    }
}

fn transient(file: &RawFileRef, operation: RemoteOp, source: CloudIOError) -> TransformError {
    TransformError::TransientIo {
        file: file.to_string(),
        operation,
        source,
    }
}

fn batch_read_error(file: &RawFileRef, batch: usize, err: BatchReadError) -> TransformError {
    match err {
        BatchReadError::Io { source, .. } => transient(file, RemoteOp::Read, source.into()),
        BatchReadError::Malformed { .. } => TransformError::Publish {
            file: file.to_string(),
            batch,
            partition: None,
            message: err.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::cloud::FakeObjectIO;

    fn transformer(limit: usize) -> PartitionTransformer<FakeObjectIO> {
        let mut config = TransformConfig::for_bucket("lake");
        config.batch_row_limit = limit;
        PartitionTransformer::new(FakeObjectIO::new(), config).unwrap()
    }

    #[test]
    fn rejects_invalid_config() {
        assert!(PartitionTransformer::new(FakeObjectIO::new(), TransformConfig::default()).is_err());
    }

    #[test]
    fn validate_reads_header_only() {
        let t = transformer(10);
        t.storage()
            .put_object("lake", "raw-data/a.csv", b"id,Country\n1,US\n")
            .unwrap();
        let schema = t.validate(&RawFileRef::new("lake", "raw-data/a.csv")).unwrap();
        assert_eq!(schema.key_index(), 1);
        assert!(t.storage().object_exists("lake", "raw-data/a.csv").unwrap());
    }

    #[test]
    fn missing_source_is_a_read_failure() {
        let t = transformer(10);
        let err = t.validate(&RawFileRef::new("lake", "raw-data/none.csv")).unwrap_err();
        assert!(matches!(
            err,
            TransformError::TransientIo { operation: RemoteOp::Read, .. }
        ));
    }

    #[test]
    fn batch_groups_come_back_sorted() {
        let t = transformer(10);
        let schema = FieldSchema::from_header(&StringRecord::from(vec!["id", "Country"]), "Country")
            .unwrap();
        let batch = RowBatch {
            index: 0,
            first_row: 0,
            rows: vec![
                StringRecord::from(vec!["1", "US"]),
                StringRecord::from(vec!["2", "DE"]),
            ],
        };
        let file = RawFileRef::new("lake", "raw-data/a.csv");
        let artifacts = t.publish_batch(&file, &schema, batch).unwrap();
        let values: Vec<&str> = artifacts.iter().map(|a| a.partition_value.as_str()).collect();
        assert_eq!(values, vec!["DE", "US"]);
    }
}
