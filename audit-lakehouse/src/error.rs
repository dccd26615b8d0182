//! Error types for audit-lakehouse: Railway Programming
//!
//! All operations return `Result<T, AuditError>`.
//! Nothing in the pipeline retries on its own: every failure below is handed
//! back to the immediate caller (the queue handler or the query request).

use thiserror::Error;

use crate::engine::QueryState;

/// Unified error type for ingestion and analytical query operations
#[derive(Error, Debug)]
pub enum AuditError {
    // ─── Ingestion Errors ───

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Write failed: {0}")]
    WriteFailure(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    // ─── Partition Maintenance Errors ───

    #[error("Partition reconciliation failed: table={table}, state={state}, reason={reason}")]
    ReconciliationFailure {
        table: String,
        state: QueryState,
        reason: String,
    },

    #[error("Partition reconciliation timed out: table={table}, attempts={attempts}")]
    ReconciliationTimeout { table: String, attempts: u32 },

    // ─── Query Errors ───

    #[error("Query execution {execution_id} ended in {state}: {reason}")]
    QueryExecutionFailure {
        execution_id: String,
        state: QueryState,
        reason: String,
    },

    #[error("Query execution {execution_id} has not finished: state={state}")]
    QueryNotFinished {
        execution_id: String,
        state: QueryState,
    },

    #[error("Query execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("Malformed result: column={column}, value={value:?}: {reason}")]
    MalformedResult {
        column: String,
        value: String,
        reason: String,
    },

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Token invalid: {0}")]
    TokenInvalid(String),

    // ─── Storage Errors ───

    #[error("Delta table error: {0}")]
    DeltaTable(String),

    #[error("Object store error: {0}")]
    ObjectStore(String),

    // ─── Infrastructure Errors ───

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Arrow error: {0}")]
    Arrow(String),

    #[error("Parquet error: {0}")]
    Parquet(String),

    #[error("DataFusion error: {0}")]
    DataFusion(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Actor unavailable: {0}")]
    ActorUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<deltalake::DeltaTableError> for AuditError {
    fn from(err: deltalake::DeltaTableError) -> Self {
        AuditError::DeltaTable(err.to_string())
    }
}

impl From<deltalake::arrow::error::ArrowError> for AuditError {
    fn from(err: deltalake::arrow::error::ArrowError) -> Self {
        AuditError::Arrow(err.to_string())
    }
}

impl From<deltalake::parquet::errors::ParquetError> for AuditError {
    fn from(err: deltalake::parquet::errors::ParquetError) -> Self {
        AuditError::Parquet(err.to_string())
    }
}

impl From<deltalake::datafusion::error::DataFusionError> for AuditError {
    fn from(err: deltalake::datafusion::error::DataFusionError) -> Self {
        AuditError::DataFusion(err.to_string())
    }
}

impl From<object_store::Error> for AuditError {
    fn from(err: object_store::Error) -> Self {
        AuditError::ObjectStore(err.to_string())
    }
}

impl From<serde_json::Error> for AuditError {
    fn from(err: serde_json::Error) -> Self {
        AuditError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for AuditError {
    fn from(err: url::ParseError) -> Self {
        AuditError::Config(format!("URL parse error: {err}"))
    }
}

#[cfg(feature = "jwt")]
impl From<jsonwebtoken::errors::Error> for AuditError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        AuditError::TokenInvalid(err.to_string())
    }
}

/// Result type alias for audit operations
pub type Result<T> = std::result::Result<T, AuditError>;
