//! Arrow schema definitions for audit event records
//!
//! One record layout serves both paths:
//! - An Arrow `Schema` for RecordBatch construction (columnar objects, query
//!   results, row-store appends)
//! - A list of Delta `StructField`s for row-store table creation
//!
//! Field order is fixed; readers map values back by name, not position.

use deltalake::arrow::datatypes::{DataType, Field, Schema};
use deltalake::kernel::{DataType as DeltaDataType, PrimitiveType, StructField};

use crate::event::AuditEventType;

/// Version stamped into every columnar object's footer metadata
pub const SCHEMA_VERSION: &str = "1";

/// Footer metadata key holding [`SCHEMA_VERSION`]
pub const SCHEMA_VERSION_KEY: &str = "audit.schema.version";

// ─── Column Names (constants) ───

pub const COL_ID: &str = "id";
pub const COL_WHAT: &str = "what";
pub const COL_WHEN: &str = "when";
pub const COL_OPERATION_ID: &str = "operationId";
pub const COL_SUBJECT_ID: &str = "subjectId";
pub const COL_SUBJECT_TYPE: &str = "subjectType";
pub const COL_CORRELATION_ID: &str = "correlationId";
pub const COL_WHO: &str = "who";
pub const COL_SERVICE: &str = "service";
pub const COL_DETAILS: &str = "details";

/// Record fields in schema order
pub const AUDIT_EVENT_COLUMNS: [&str; 10] = [
    COL_ID,
    COL_WHAT,
    COL_WHEN,
    COL_OPERATION_ID,
    COL_SUBJECT_ID,
    COL_SUBJECT_TYPE,
    COL_CORRELATION_ID,
    COL_WHO,
    COL_SERVICE,
    COL_DETAILS,
];

fn nullable(name: &str) -> bool {
    !matches!(name, COL_ID | COL_WHAT)
}

/// Arrow schema for an audit event record
///
/// `when` is an ISO-8601 string; only `id` and `what` are non-null.
pub fn audit_event_arrow_schema() -> Schema {
    Schema::new(
        AUDIT_EVENT_COLUMNS
            .iter()
            .map(|name| Field::new(*name, DataType::Utf8, nullable(name)))
            .collect::<Vec<_>>(),
    )
}

/// Delta StructFields for the row-store tables
pub fn audit_event_delta_fields() -> Vec<StructField> {
    AUDIT_EVENT_COLUMNS
        .iter()
        .map(|name| {
            StructField::new(
                *name,
                DeltaDataType::Primitive(PrimitiveType::String),
                nullable(name),
            )
        })
        .collect()
}

pub fn audit_event_partition_columns() -> Vec<String> {
    vec![] // Row store is filtered by predicate, not pruned by layout
}

/// Table definition bundle for `DeltaRowStore::ensure_table`
pub struct TableDefinition {
    pub name: String,
    pub event_type: AuditEventType,
    pub delta_fields: Vec<StructField>,
    pub partition_columns: Vec<String>,
}

impl TableDefinition {
    pub fn audit_event(name: impl Into<String>, event_type: AuditEventType) -> Self {
        Self {
            name: name.into(),
            event_type,
            delta_fields: audit_event_delta_fields(),
            partition_columns: audit_event_partition_columns(),
        }
    }
}
