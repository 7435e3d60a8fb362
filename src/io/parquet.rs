//! Parquet encoding for partition groups.
//!
//! - [`encode_rows`] turns a group of raw rows into one in-memory Parquet file
//! - [`decode_rows`] reads such a buffer back (used to inspect published artifacts)
//!
//! Every column is a nullable UTF-8 column in header order; an empty cell is written as
//! null. Values are not re-typed, so artifacts from different batches of the same file
//! always share a schema.

use crate::io::csv::FieldSchema;
use anyhow::{Context, Result, anyhow};
use arrow::array::{Array, ArrayRef, StringArray, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use csv::StringRecord;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::collections::HashMap;
use std::sync::Arc;

/// Arrow schema for a raw file: one nullable `Utf8` field per header column.
#[must_use]
pub fn arrow_schema(fields: &FieldSchema, metadata: HashMap<String, String>) -> Schema {
    let columns: Vec<Field> = fields
        .fields()
        .iter()
        .map(|name| Field::new(name, DataType::Utf8, true))
        .collect();
    Schema::new_with_metadata(columns, metadata)
}

/// Encode rows to a complete Parquet file held in memory.
///
/// Internally:
/// 1. Builds one `StringArray` per column.
/// 2. Assembles a single `RecordBatch`.
/// 3. Writes it with `parquet::arrow::ArrowWriter` (Snappy) and closes the writer, so the
///    returned buffer carries its footer and is self-contained.
///
/// `metadata` is stored as Arrow schema metadata in the file footer.
///
/// # Errors
/// Returns an error if a row is narrower than the schema or if Arrow/Parquet writing fails.
pub fn encode_rows(
    fields: &FieldSchema,
    rows: &[StringRecord],
    metadata: HashMap<String, String>,
) -> Result<Vec<u8>> {
    let schema = Arc::new(arrow_schema(fields, metadata));

    let mut builders: Vec<StringBuilder> = (0..fields.len())
        .map(|_| StringBuilder::with_capacity(rows.len(), rows.len() * 8))
        .collect();
    for (i, row) in rows.iter().enumerate() {
        if row.len() != fields.len() {
            return Err(anyhow!(
                "row #{} has {} fields, expected {}",
                i + 1,
                row.len(),
                fields.len()
            ));
        }
        for (builder, value) in builders.iter_mut().zip(row.iter()) {
            if value.is_empty() {
                builder.append_null();
            } else {
                builder.append_value(value);
            }
        }
    }
    let columns: Vec<ArrayRef> = builders
        .into_iter()
        .map(|mut b| Arc::new(b.finish()) as ArrayRef)
        .collect();

    let batch = RecordBatch::try_new(Arc::clone(&schema), columns)
        .context("assemble RecordBatch")?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer =
        ArrowWriter::try_new(Vec::new(), schema, Some(props)).context("create ArrowWriter")?;
    writer.write(&batch).context("write batch to parquet")?;
    writer.into_inner().context("close ArrowWriter")
}

/// Contents of a decoded artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedArtifact {
    pub fields: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
    pub metadata: HashMap<String, String>,
}

impl DecodedArtifact {
    /// Values of one column by name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<Vec<Option<&str>>> {
        let idx = self.fields.iter().position(|f| f == name)?;
        Some(self.rows.iter().map(|r| r[idx].as_deref()).collect())
    }
}

/// Decode a Parquet buffer produced by [`encode_rows`].
///
/// # Errors
/// Returns an error if the buffer is not valid Parquet or a column is not UTF-8.
pub fn decode_rows(data: &[u8]) -> Result<DecodedArtifact> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(Bytes::copy_from_slice(data))
        .context("open ParquetRecordBatchReader")?;
    let schema = Arc::clone(builder.schema());
    let reader = builder.build().context("build ParquetRecordBatchReader")?;

    let fields: Vec<String> = schema.fields().iter().map(|f| f.name().clone()).collect();
    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch.context("read batch")?;
        let columns: Vec<&StringArray> = batch
            .columns()
            .iter()
            .enumerate()
            .map(|(i, col)| {
                col.as_any()
                    .downcast_ref::<StringArray>()
                    .ok_or_else(|| anyhow!("column {} is not Utf8", fields[i]))
            })
            .collect::<Result<_>>()?;
        for r in 0..batch.num_rows() {
            rows.push(
                columns
                    .iter()
                    .map(|c| (!c.is_null(r)).then(|| c.value(r).to_string()))
                    .collect(),
            );
        }
    }

    Ok(DecodedArtifact {
        fields,
        rows,
        metadata: schema.metadata().clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> FieldSchema {
        FieldSchema::from_header(&StringRecord::from(vec!["id", "Country", "amount"]), "Country")
            .unwrap()
    }

    #[test]
    fn empty_cells_become_nulls() {
        let rows = vec![
            StringRecord::from(vec!["1", "US", ""]),
            StringRecord::from(vec!["2", "US", "7.5"]),
        ];
        let bytes = encode_rows(&schema(), &rows, HashMap::new()).unwrap();
        let decoded = decode_rows(&bytes).unwrap();

        assert_eq!(decoded.fields, vec!["id", "Country", "amount"]);
        assert_eq!(decoded.column("amount").unwrap(), vec![None, Some("7.5")]);
    }

    #[test]
    fn metadata_lands_in_footer() {
        let rows = vec![StringRecord::from(vec!["1", "FR", "3"])];
        let meta = HashMap::from([("partbeam.batch".to_string(), "4".to_string())]);
        let decoded = decode_rows(&encode_rows(&schema(), &rows, meta).unwrap()).unwrap();
        assert_eq!(decoded.metadata.get("partbeam.batch").map(String::as_str), Some("4"));
    }

    #[test]
    fn ragged_row_is_rejected() {
        let rows = vec![StringRecord::from(vec!["1", "FR"])];
        assert!(encode_rows(&schema(), &rows, HashMap::new()).is_err());
    }
}
