//! Columnar record codec
//!
//! Events are serialized as single-row parquet objects. The arrow schema is
//! embedded by the parquet writer, and the footer carries
//! [`SCHEMA_VERSION_KEY`], so the bytes alone are enough to rebuild the
//! record. Every encoded buffer comes with a SHA-256 checksum (base64),
//! stored alongside the object by the writer.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use deltalake::arrow::array::{Array, ArrayRef, AsArray, RecordBatch, StringArray};
use deltalake::arrow::compute::cast;
use deltalake::arrow::datatypes::DataType;
use deltalake::parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use deltalake::parquet::arrow::ArrowWriter;
use deltalake::parquet::file::metadata::KeyValue;
use deltalake::parquet::file::properties::WriterProperties;
use sha2::{Digest, Sha256};

use crate::error::{AuditError, Result};
use crate::event::AuditEvent;
use crate::schema::{self, SCHEMA_VERSION, SCHEMA_VERSION_KEY};

/// Object extension for encoded records
pub const RECORD_EXTENSION: &str = "parquet";

/// Encoded bytes plus their integrity token
#[derive(Debug, Clone)]
pub struct EncodedRecord {
    pub bytes: Bytes,
    /// Base64 SHA-256 of `bytes`
    pub checksum: String,
}

/// Serialize one event; `id` must already be assigned
pub fn encode(event: &AuditEvent) -> Result<EncodedRecord> {
    if event.id.as_deref().map_or(true, str::is_empty) {
        return Err(AuditError::Encoding("record has no id".into()));
    }
    if event.what.trim().is_empty() {
        return Err(AuditError::Encoding("record has no 'what'".into()));
    }

    let batch = events_to_batch(std::slice::from_ref(event))?;
    let bytes = write_parquet(&batch)?;
    let checksum = checksum(&bytes);
    Ok(EncodedRecord { bytes, checksum })
}

/// Rebuild every record held in an encoded object
pub fn decode(bytes: Bytes) -> Result<Vec<AuditEvent>> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(bytes)
        .map_err(|e| AuditError::Encoding(format!("not a record object: {e}")))?;

    let version = builder
        .metadata()
        .file_metadata()
        .key_value_metadata()
        .and_then(|kvs| kvs.iter().find(|kv| kv.key == SCHEMA_VERSION_KEY))
        .and_then(|kv| kv.value.clone());
    if version.as_deref() != Some(SCHEMA_VERSION) {
        return Err(AuditError::Encoding(format!(
            "unsupported schema version: {version:?}"
        )));
    }

    let mut events = Vec::new();
    for batch in builder.build()? {
        events.extend(batch_to_events(&batch?)?);
    }
    Ok(events)
}

/// Base64 SHA-256 digest
pub fn checksum(bytes: &[u8]) -> String {
    STANDARD.encode(Sha256::digest(bytes))
}

/// Write a batch as a parquet buffer stamped with the schema version
pub(crate) fn write_parquet(batch: &RecordBatch) -> Result<Bytes> {
    let props = WriterProperties::builder()
        .set_key_value_metadata(Some(vec![KeyValue::new(
            SCHEMA_VERSION_KEY.to_string(),
            SCHEMA_VERSION.to_string(),
        )]))
        .build();

    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;
    Ok(Bytes::from(buf))
}

/// ISO-8601 text stored in the `when` column
///
/// Always nine fractional digits, so text order is time order.
pub fn format_when(when: &DateTime<Utc>) -> String {
    when.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn parse_when(value: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value).map(|dt| dt.with_timezone(&Utc))
}

/// Build a record batch in schema order
pub fn events_to_batch(events: &[AuditEvent]) -> Result<RecordBatch> {
    let ids: Vec<Option<&str>> = events.iter().map(|e| e.id.as_deref()).collect();
    let whens: Vec<String> = events.iter().map(|e| format_when(&e.when)).collect();

    let column = |f: fn(&AuditEvent) -> Option<&str>| -> ArrayRef {
        Arc::new(StringArray::from(events.iter().map(f).collect::<Vec<_>>()))
    };

    let batch = RecordBatch::try_new(
        Arc::new(schema::audit_event_arrow_schema()),
        vec![
            Arc::new(StringArray::from(ids)) as ArrayRef,
            column(|e| Some(e.what.as_str())),
            Arc::new(StringArray::from(
                whens.iter().map(String::as_str).collect::<Vec<_>>(),
            )),
            column(|e| e.operation_id.as_deref()),
            column(|e| e.subject_id.as_deref()),
            column(|e| e.subject_type.as_deref()),
            column(|e| e.correlation_id.as_deref()),
            column(|e| e.who.as_deref()),
            column(|e| e.service.as_deref()),
            column(|e| e.details.as_deref()),
        ],
    )?;
    Ok(batch)
}

/// Read records back out of a batch, locating columns by name
pub fn batch_to_events(batch: &RecordBatch) -> Result<Vec<AuditEvent>> {
    let required = |name: &str| -> Result<StringArray> {
        string_column(batch, name)?
            .ok_or_else(|| AuditError::Encoding(format!("missing column '{name}'")))
    };
    let ids = required(schema::COL_ID)?;
    let whats = required(schema::COL_WHAT)?;
    let whens = required(schema::COL_WHEN)?;
    let operation_ids = string_column(batch, schema::COL_OPERATION_ID)?;
    let subject_ids = string_column(batch, schema::COL_SUBJECT_ID)?;
    let subject_types = string_column(batch, schema::COL_SUBJECT_TYPE)?;
    let correlation_ids = string_column(batch, schema::COL_CORRELATION_ID)?;
    let whos = string_column(batch, schema::COL_WHO)?;
    let services = string_column(batch, schema::COL_SERVICE)?;
    let details = string_column(batch, schema::COL_DETAILS)?;

    let mut events = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let raw_when = value_at(&whens, i)
            .ok_or_else(|| AuditError::Encoding(format!("row {i} has no 'when'")))?;
        let when = parse_when(&raw_when)
            .map_err(|e| AuditError::Encoding(format!("row {i} 'when' {raw_when:?}: {e}")))?;

        events.push(AuditEvent {
            id: value_at(&ids, i),
            what: value_at(&whats, i).unwrap_or_default(),
            when,
            operation_id: opt_value_at(&operation_ids, i),
            subject_id: opt_value_at(&subject_ids, i),
            subject_type: opt_value_at(&subject_types, i),
            correlation_id: opt_value_at(&correlation_ids, i),
            who: opt_value_at(&whos, i),
            service: opt_value_at(&services, i),
            details: opt_value_at(&details, i),
        });
    }
    Ok(events)
}

fn string_column(batch: &RecordBatch, name: &str) -> Result<Option<StringArray>> {
    let Ok(idx) = batch.schema().index_of(name) else {
        return Ok(None);
    };
    let column = batch.column(idx);
    let utf8 = if column.data_type() == &DataType::Utf8 {
        Arc::clone(column)
    } else {
        cast(column.as_ref(), &DataType::Utf8)?
    };
    Ok(Some(utf8.as_string::<i32>().clone()))
}

fn value_at(array: &StringArray, i: usize) -> Option<String> {
    (!array.is_null(i)).then(|| array.value(i).to_string())
}

fn opt_value_at(array: &Option<StringArray>, i: usize) -> Option<String> {
    array.as_ref().and_then(|a| value_at(a, i))
}
