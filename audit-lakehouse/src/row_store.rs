//! Row store: synchronous keyed storage for the legacy ingestion path
//!
//! One Delta table per event type under the configured base path:
//!
//! ```text
//! {base_path}/
//! ├── audit_event/            (STAFF)
//! └── prisoner_audit_event/   (PRISONER)
//! ```
//!
//! Reads go through DataFusion with the same predicate builder as the
//! analytical path, minus the service scope.

use std::sync::Arc;

use async_trait::async_trait;
use deltalake::arrow::array::{AsArray, RecordBatch};
use deltalake::arrow::datatypes::Int64Type;
use deltalake::datafusion::prelude::SessionContext;
use deltalake::kernel::StructField;
use deltalake::protocol::SaveMode;
use deltalake::writer::{DeltaWriter, RecordBatchWriter};
use deltalake::{open_table, DeltaTable};
use serde::Serialize;
use tracing::{debug, info};
use url::Url;

use crate::codec;
use crate::config::{AuditConfig, EventTypeRegistry};
use crate::error::{AuditError, Result};
use crate::event::{AuditEvent, AuditEventType};
use crate::query::compiler::{filter_predicates, quote_ident};
use crate::query::filter::AuditFilter;
use crate::schema::{TableDefinition, COL_WHEN};

/// Zero-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: usize,
    pub size: usize,
}

impl PageRequest {
    pub fn new(page: usize, size: usize) -> Self {
        Self { page, size }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 0, size: 20 }
    }
}

/// One page of events, newest first
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowStorePage {
    pub content: Vec<AuditEvent>,
    pub page: usize,
    pub size: usize,
    pub total_elements: usize,
}

impl RowStorePage {
    pub fn total_pages(&self) -> usize {
        if self.size == 0 {
            0
        } else {
            self.total_elements.div_ceil(self.size)
        }
    }
}

/// Row-store collaborator used when columnar writes are off
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Persist one event, assigning an id if it has none; returns the id
    async fn save(&self, event_type: AuditEventType, event: AuditEvent) -> Result<String>;

    /// Events matching `filter`, sorted by `when` descending
    async fn find(
        &self,
        event_type: AuditEventType,
        filter: &AuditFilter,
        page: PageRequest,
    ) -> Result<RowStorePage>;
}

/// Delta Lake row store
///
/// Thread-safe: share across handlers via `Arc<DeltaRowStore>`.
pub struct DeltaRowStore {
    config: AuditConfig,
}

impl DeltaRowStore {
    /// Open the store, creating both tables if they don't exist
    pub async fn new(config: AuditConfig) -> Result<Self> {
        let store = Self { config };
        store.init_all_tables().await?;
        info!(path = %store.config.base_path.display(), "Row store initialized");
        Ok(store)
    }

    fn event_types(&self) -> &EventTypeRegistry {
        &self.config.event_types
    }

    fn table_name(&self, event_type: AuditEventType) -> &str {
        &self.event_types().get(event_type).row_store_table
    }

    fn table_url(&self, name: &str) -> Result<Url> {
        let path = self.config.table_path(name);
        Url::from_directory_path(&path)
            .map_err(|_| AuditError::Config(format!("Invalid table path: {}", path.display())))
    }

    /// Idempotent
    async fn init_all_tables(&self) -> Result<()> {
        for (event_type, type_config) in self.event_types().iter() {
            let def = TableDefinition::audit_event(type_config.row_store_table.clone(), event_type);
            self.ensure_table(&def.name, def.delta_fields, def.partition_columns)
                .await?;
        }
        Ok(())
    }

    /// Create a Delta table if it doesn't exist
    pub async fn ensure_table(
        &self,
        name: &str,
        fields: Vec<StructField>,
        partition_columns: Vec<String>,
    ) -> Result<()> {
        let url = self.table_url(name)?;
        let path = self.config.table_path(name);

        match open_table(url.clone()).await {
            Ok(table) => {
                debug!(table = name, version = ?table.version(), "Table already exists");
                Ok(())
            }
            Err(_) => {
                std::fs::create_dir_all(&path)?;

                let table = DeltaTable::try_from_url(url).await?;
                let mut builder = table
                    .create()
                    .with_table_name(name)
                    .with_save_mode(SaveMode::Ignore)
                    .with_columns(fields);

                if !partition_columns.is_empty() {
                    builder = builder.with_partition_columns(partition_columns);
                }

                builder.await?;
                info!(table = name, "Created Delta table");
                Ok(())
            }
        }
    }

    /// Append records (one ACID commit); returns the new table version
    pub async fn append(&self, table_name: &str, batch: RecordBatch) -> Result<i64> {
        let url = self.table_url(table_name)?;
        let mut table = open_table(url).await?;

        let mut writer = RecordBatchWriter::for_table(&table)?;
        writer.write(batch).await?;
        let version = writer.flush_and_commit(&mut table).await?;

        debug!(table = table_name, version, "Appended records");
        Ok(version as i64)
    }

    /// Current version of a table
    pub async fn version(&self, event_type: AuditEventType) -> Result<i64> {
        let url = self.table_url(self.table_name(event_type))?;
        let table = open_table(url).await?;
        Ok(table.version().unwrap_or(0))
    }

    /// Run `full_sql` with the type's table registered as `t`
    pub async fn sql(&self, event_type: AuditEventType, full_sql: &str) -> Result<Vec<RecordBatch>> {
        let url = self.table_url(self.table_name(event_type))?;
        let table = open_table(url).await?;
        let table_provider: Arc<dyn deltalake::datafusion::catalog::TableProvider> = Arc::new(table);

        let ctx = SessionContext::new();
        ctx.register_table("t", table_provider)?;

        let batches = ctx.sql(full_sql).await?.collect().await?;
        Ok(batches)
    }
}

fn where_clause(filter: &AuditFilter) -> String {
    let predicates = filter_predicates(filter);
    if predicates.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", predicates.join(" AND "))
    }
}

#[async_trait]
impl RowStore for DeltaRowStore {
    async fn save(&self, event_type: AuditEventType, mut event: AuditEvent) -> Result<String> {
        let id = event.ensure_id().to_string();
        let batch = codec::events_to_batch(std::slice::from_ref(&event))?;
        let version = self.append(self.table_name(event_type), batch).await?;
        info!(%event_type, id = %id, version, "Audit event saved to row store");
        Ok(id)
    }

    async fn find(
        &self,
        event_type: AuditEventType,
        filter: &AuditFilter,
        page: PageRequest,
    ) -> Result<RowStorePage> {
        let where_clause = where_clause(filter);

        let count_batches = self
            .sql(event_type, &format!("SELECT COUNT(*) AS total FROM t{where_clause}"))
            .await?;
        let total_elements = count_batches
            .iter()
            .filter(|b| b.num_rows() > 0)
            .map(|b| b.column(0).as_primitive::<Int64Type>().value(0))
            .sum::<i64>()
            .max(0) as usize;

        let offset = page.page.saturating_mul(page.size);
        let batches = self
            .sql(
                event_type,
                &format!(
                    "SELECT * FROM t{where_clause} ORDER BY {} DESC LIMIT {} OFFSET {offset}",
                    quote_ident(COL_WHEN),
                    page.size
                ),
            )
            .await?;

        let mut content = Vec::new();
        for batch in &batches {
            content.extend(codec::batch_to_events(batch)?);
        }
        debug!(%event_type, total_elements, returned = content.len(), "Row store query");

        Ok(RowStorePage {
            content,
            page: page.page,
            size: page.size,
            total_elements,
        })
    }
}
