//! # Audit Lakehouse
//!
//! Audit event ingestion and scoped analytical retrieval over a partitioned
//! data lake, with a Delta Lake row store for the legacy path. Built on
//! [delta-rs](https://github.com/delta-io/delta-rs), DataFusion and
//! `object_store`.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      audit-lakehouse                         │
//! ├──────────────────────────────┬───────────────────────────────┤
//! │ AuditQueueListener           │ AuditQueryService             │
//! │   └─ IngestionRouter         │   ├─ QueryCompiler + scope    │
//! │       ├─ ColumnarWriter ─────┼─► ├─ PartitionMaintainer      │
//! │       └─ DeltaRowStore       │   └─ QueryExecutionClient     │
//! ├──────────────────────────────┴───────────────────────────────┤
//! │ QueryEngine (LocalQueryEngine actor: catalog + DataFusion)   │
//! ├──────────────────────────────────────────────────────────────┤
//! │ BucketStores: year=/month=/day=/user=/<id>.parquet objects   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use audit_lakehouse::{
//!     AuditConfig, AuditEventType, AuditFilter, AuditQueryService, AuthorisedServices,
//!     BucketStores, EngineActor, QueryExecutionClient,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AuditConfig::new("/data/audit").with_columnar_write(true);
//!     let stores = BucketStores::from_config(&config)?;
//!     let engine = EngineActor::spawn_from_config(&config, stores);
//!     let client = QueryExecutionClient::new(Arc::new(engine), config.result_page_size);
//!     let queries = AuditQueryService::from_config(&config, client);
//!
//!     let filter = AuditFilter::new()
//!         .with_who("bobby.beans")
//!         .with_start_date(chrono::NaiveDate::from_ymd_opt(2021, 4, 1).unwrap());
//!     let scope = AuthorisedServices::new(["offender-service"]);
//!     let started = queries.start_query(AuditEventType::Staff, &filter, &scope).await?;
//!     let results = queries.query_results(AuditEventType::Staff, &started.execution_id).await?;
//!     println!("{} {}", results.state, results.results.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **One object per event**: self-describing parquet with a SHA-256 checksum
//! - **Deterministic partitions**: Europe/London calendar day plus actor
//! - **Reconcile-before-read**: every ad-hoc query waits on a bounded partition repair
//! - **Scoped queries**: an empty authorised-service set compiles to zero rows
//! - **Railway Programming**: All operations return `Result<T, AuditError>`

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod listener;
pub mod maintenance;
pub mod partition;
pub mod query;
pub mod router;
pub mod row_store;
pub mod schema;
pub mod scope;
pub mod storage;
pub mod telemetry;
pub mod writer;

// Re-exports for convenience
pub use config::{AuditConfig, EventTypeConfig, EventTypeRegistry, StorageBackend};
pub use engine::{EngineActor, LocalQueryEngine, QueryEngine, QueryExecution, QueryState};
pub use error::{AuditError, Result};
pub use event::{AuditEvent, AuditEventType, InboundMessage};
pub use listener::{AuditQueueListener, QueueDelivery};
pub use maintenance::{MaintenanceScheduler, PartitionMaintainer};
pub use partition::PartitionKey;
pub use query::{AuditFilter, AuditQueryService, QueryCompiler, QueryExecutionClient};
pub use router::{IngestionRouter, RouteOutcome};
pub use row_store::{DeltaRowStore, RowStore, RowStorePage};
pub use scope::{AuthorisedServices, ServiceScopeResolver};
pub use storage::BucketStores;
pub use telemetry::{TelemetrySink, TracingTelemetry};
pub use writer::ColumnarWriter;

/// Delta Lake re-exports for downstream use
pub mod arrow {
    pub use deltalake::arrow::*;
}
