//! EngineActor: local asynchronous query engine over the data lake buckets
//!
//! The actor owns the execution table and the partition catalog; every
//! statement runs on its own tokio task and reports back through the
//! actor's channel, so state is only ever mutated in one place.
//!
//! Two statement shapes are understood:
//! - `MSCK REPAIR TABLE <db>.<table>` registers every partition found in the
//!   table's bucket.
//! - Anything else is SQL for DataFusion, run against the registered
//!   partitions of the request's database. The result set is written as
//!   parquet to `<output_location>/<execution_id>.parquet` and paged from
//!   there.
//!
//! # Usage
//!
//! ```rust,no_run
//! use audit_lakehouse::engine::{CatalogTable, EngineActor, QueryEngine, QueryRequest};
//! use audit_lakehouse::storage::BucketStores;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let stores = BucketStores::in_memory(["audit-staff", "audit-query-results"]);
//!     let engine = EngineActor::spawn(
//!         stores,
//!         [CatalogTable::new("audit_db", "audit_event", "audit-staff")],
//!     );
//!
//!     let id = engine.start_query(QueryRequest {
//!         query: "MSCK REPAIR TABLE audit_db.audit_event".into(),
//!         database: "audit_db".into(),
//!         workgroup: "primary".into(),
//!         output_location: "audit-query-results/staff".into(),
//!     }).await?;
//!     let execution = engine.get_query_execution(&id).await?;
//!     println!("{}", execution.state);
//!     Ok(())
//! }
//! ```

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use deltalake::arrow::array::{Array, AsArray, RecordBatch};
use deltalake::arrow::compute::{cast, concat_batches};
use deltalake::arrow::datatypes::DataType;
use deltalake::datafusion::datasource::MemTable;
use deltalake::datafusion::prelude::{SessionConfig, SessionContext};
use deltalake::parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use object_store::PutPayload;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::codec;
use crate::config::AuditConfig;
use crate::error::{AuditError, Result};
use crate::partition::PartitionKey;
use crate::storage::{split_location, BucketStores};

use super::catalog::{discover_partitions, CatalogTable, PartitionCatalog};
use super::{QueryEngine, QueryExecution, QueryRequest, QueryState, ResultPage};

const RESULT_EXTENSION: &str = "parquet";

// ─── Statements ───

#[derive(Debug, Clone, PartialEq, Eq)]
enum Statement {
    RepairTable { qualified_name: String },
    Sql(String),
}

impl Statement {
    fn parse(query: &str, database: &str) -> Self {
        let trimmed = query.trim().trim_end_matches(';').trim();
        let words: Vec<&str> = trimmed.split_whitespace().collect();
        match words.as_slice() {
            [msck, repair, table, name]
                if msck.eq_ignore_ascii_case("MSCK")
                    && repair.eq_ignore_ascii_case("REPAIR")
                    && table.eq_ignore_ascii_case("TABLE") =>
            {
                let name = name.trim_matches('`').trim_matches('"');
                let qualified_name = if name.contains('.') {
                    name.to_string()
                } else {
                    format!("{database}.{name}")
                };
                Statement::RepairTable { qualified_name }
            }
            _ => Statement::Sql(trimmed.to_string()),
        }
    }
}

// ─── Messages ───

enum Outcome {
    Repaired {
        qualified_name: String,
        partitions: BTreeSet<PartitionKey>,
    },
    Results {
        location: String,
    },
    Failed(String),
}

enum EngineMsg {
    Start {
        request: QueryRequest,
        reply: oneshot::Sender<Result<String>>,
    },
    GetExecution {
        execution_id: String,
        reply: oneshot::Sender<Result<ExecutionRecord>>,
    },
    Running {
        execution_id: String,
    },
    Finished {
        execution_id: String,
        outcome: Outcome,
    },
}

#[derive(Debug, Clone)]
struct ExecutionRecord {
    execution: QueryExecution,
    /// `bucket/key` of the written result set, once SUCCEEDED
    result_location: Option<String>,
}

// ─── Actor ───

/// Local query engine actor
pub struct EngineActor {
    stores: BucketStores,
    catalog: PartitionCatalog,
    executions: HashMap<String, ExecutionRecord>,
    tx: mpsc::Sender<EngineMsg>,
    rx: mpsc::Receiver<EngineMsg>,
}

impl EngineActor {
    /// Spawn the engine with the given tables registered (no partitions yet)
    pub fn spawn(
        stores: BucketStores,
        tables: impl IntoIterator<Item = CatalogTable>,
    ) -> LocalQueryEngine {
        let mut catalog = PartitionCatalog::new();
        for table in tables {
            catalog.register_table(table);
        }

        let (tx, rx) = mpsc::channel(512);
        let actor = Self {
            stores: stores.clone(),
            catalog,
            executions: HashMap::new(),
            tx: tx.clone(),
            rx,
        };
        tokio::spawn(actor.run());
        info!("EngineActor spawned");
        LocalQueryEngine { tx, stores }
    }

    /// Spawn with one table per configured event type
    pub fn spawn_from_config(config: &AuditConfig, stores: BucketStores) -> LocalQueryEngine {
        let tables = config
            .event_types
            .iter()
            .map(|(_, c)| CatalogTable::new(&c.database, &c.table, &c.bucket))
            .collect::<Vec<_>>();
        Self::spawn(stores, tables)
    }

    async fn run(mut self) {
        while let Some(msg) = self.rx.recv().await {
            match msg {
                EngineMsg::Start { request, reply } => {
                    let _ = reply.send(self.handle_start(request));
                }
                EngineMsg::GetExecution { execution_id, reply } => {
                    let record = self
                        .executions
                        .get(&execution_id)
                        .cloned()
                        .ok_or(AuditError::ExecutionNotFound(execution_id));
                    let _ = reply.send(record);
                }
                EngineMsg::Running { execution_id } => {
                    if let Some(record) = self.executions.get_mut(&execution_id) {
                        if record.execution.state == QueryState::Queued {
                            record.execution.state = QueryState::Running;
                        }
                    }
                }
                EngineMsg::Finished { execution_id, outcome } => {
                    self.handle_finished(execution_id, outcome);
                }
            }
        }
        info!("EngineActor stopped");
    }

    fn handle_start(&mut self, request: QueryRequest) -> Result<String> {
        let execution_id = Uuid::new_v4().to_string();
        let statement = Statement::parse(&request.query, &request.database);

        let task = match &statement {
            Statement::RepairTable { qualified_name } => {
                let table = self.catalog.table(qualified_name).cloned();
                ExecutionTask::Repair {
                    qualified_name: qualified_name.clone(),
                    table,
                }
            }
            Statement::Sql(sql) => ExecutionTask::Sql {
                sql: sql.clone(),
                database: request.database.clone(),
                tables: self.catalog.tables_in(&request.database).cloned().collect(),
                output_location: request.output_location.clone(),
            },
        };

        self.executions.insert(
            execution_id.clone(),
            ExecutionRecord {
                execution: QueryExecution {
                    execution_id: execution_id.clone(),
                    state: QueryState::Queued,
                    query: request.query,
                    workgroup: request.workgroup.clone(),
                    state_reason: None,
                    submitted_at: Utc::now(),
                    completed_at: None,
                },
                result_location: None,
            },
        );

        debug!(execution_id = %execution_id, workgroup = %request.workgroup, "Query queued");
        tokio::spawn(task.run(execution_id.clone(), self.stores.clone(), self.tx.clone()));
        Ok(execution_id)
    }

    fn handle_finished(&mut self, execution_id: String, outcome: Outcome) {
        let (state, reason, location) = match outcome {
            Outcome::Repaired { qualified_name, partitions } => {
                match self.catalog.table_mut(&qualified_name) {
                    Some(table) => {
                        let added = table.register_partitions(partitions);
                        info!(table = %qualified_name, added, "Partitions repaired");
                        (QueryState::Succeeded, None, None)
                    }
                    None => (
                        QueryState::Failed,
                        Some(format!("Table not found: {qualified_name}")),
                        None,
                    ),
                }
            }
            Outcome::Results { location } => (QueryState::Succeeded, None, Some(location)),
            Outcome::Failed(reason) => (QueryState::Failed, Some(reason), None),
        };

        let Some(record) = self.executions.get_mut(&execution_id) else {
            warn!(execution_id = %execution_id, "Finished unknown execution");
            return;
        };
        if record.execution.state.is_terminal() {
            return;
        }
        if let Some(reason) = &reason {
            warn!(execution_id = %execution_id, reason = %reason, "Query failed");
        }
        record.execution.state = state;
        record.execution.state_reason = reason;
        record.execution.completed_at = Some(Utc::now());
        record.result_location = location;
    }
}

// ─── Execution Tasks ───

enum ExecutionTask {
    Repair {
        qualified_name: String,
        table: Option<CatalogTable>,
    },
    Sql {
        sql: String,
        database: String,
        tables: Vec<CatalogTable>,
        output_location: String,
    },
}

impl ExecutionTask {
    async fn run(self, execution_id: String, stores: BucketStores, tx: mpsc::Sender<EngineMsg>) {
        let _ = tx
            .send(EngineMsg::Running {
                execution_id: execution_id.clone(),
            })
            .await;

        let outcome = match self {
            ExecutionTask::Repair { qualified_name, table } => {
                match repair(&qualified_name, table.as_ref(), &stores).await {
                    Ok(partitions) => Outcome::Repaired {
                        qualified_name,
                        partitions,
                    },
                    Err(e) => Outcome::Failed(e.to_string()),
                }
            }
            ExecutionTask::Sql {
                sql,
                database,
                tables,
                output_location,
            } => match run_sql(&execution_id, &sql, &database, &tables, &output_location, &stores).await {
                Ok(location) => Outcome::Results { location },
                Err(e) => Outcome::Failed(e.to_string()),
            },
        };

        let _ = tx.send(EngineMsg::Finished { execution_id, outcome }).await;
    }
}

async fn repair(
    qualified_name: &str,
    table: Option<&CatalogTable>,
    stores: &BucketStores,
) -> Result<BTreeSet<PartitionKey>> {
    let table = table.ok_or_else(|| AuditError::Internal(format!("Table not found: {qualified_name}")))?;
    let store = stores.get(&table.bucket)?;
    discover_partitions(store.as_ref()).await
}

async fn run_sql(
    execution_id: &str,
    sql: &str,
    database: &str,
    tables: &[CatalogTable],
    output_location: &str,
    stores: &BucketStores,
) -> Result<String> {
    let config = SessionConfig::new().with_default_catalog_and_schema("datafusion", database);
    let ctx = SessionContext::new_with_config(config);

    for table in tables {
        let store = stores.get(&table.bucket)?;
        let batch = table.load(store.as_ref()).await?;
        let mem_table = MemTable::try_new(batch.schema(), vec![vec![batch]])?;
        ctx.register_table(table.name.as_str(), Arc::new(mem_table))?;
    }

    let df = ctx.sql(sql).await?;
    let planned = Arc::new(df.schema().as_arrow().clone());
    let batches = df.collect().await?;
    let schema = batches.first().map(|b| b.schema()).unwrap_or(planned);
    let result = concat_batches(&schema, &batches)?;

    let (bucket, prefix) = split_location(output_location)?;
    let key = prefix.child(format!("{execution_id}.{RESULT_EXTENSION}"));
    let bytes = codec::write_parquet(&result)?;
    stores.get(bucket)?.put(&key, PutPayload::from(bytes)).await?;

    debug!(execution_id, rows = result.num_rows(), location = %key, "Result set written");
    Ok(format!("{bucket}/{key}"))
}

// ─── Handle ───

/// Thread-safe handle to the local engine
#[derive(Clone)]
pub struct LocalQueryEngine {
    tx: mpsc::Sender<EngineMsg>,
    stores: BucketStores,
}

impl LocalQueryEngine {
    async fn record(&self, execution_id: &str) -> Result<ExecutionRecord> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineMsg::GetExecution {
                execution_id: execution_id.to_string(),
                reply,
            })
            .await
            .map_err(|_| AuditError::ActorUnavailable("EngineActor".into()))?;
        rx.await
            .map_err(|_| AuditError::ActorUnavailable("EngineActor dropped".into()))?
    }

    async fn read_results(&self, location: &str) -> Result<RecordBatch> {
        let (bucket, key) = split_location(location)?;
        let bytes: Bytes = self.stores.get(bucket)?.get(&key).await?.bytes().await?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(bytes)?;
        let schema = builder.schema().clone();
        let reader = builder.build()?;
        let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(concat_batches(&schema, &batches)?)
    }
}

#[async_trait]
impl QueryEngine for LocalQueryEngine {
    async fn start_query(&self, request: QueryRequest) -> Result<String> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineMsg::Start { request, reply })
            .await
            .map_err(|_| AuditError::ActorUnavailable("EngineActor".into()))?;
        rx.await
            .map_err(|_| AuditError::ActorUnavailable("EngineActor dropped".into()))?
    }

    async fn get_query_execution(&self, execution_id: &str) -> Result<QueryExecution> {
        Ok(self.record(execution_id).await?.execution)
    }

    async fn get_query_results(
        &self,
        execution_id: &str,
        next_token: Option<&str>,
        max_results: usize,
    ) -> Result<ResultPage> {
        let record = self.record(execution_id).await?;
        let execution = record.execution;
        match execution.state {
            QueryState::Succeeded => {}
            QueryState::Failed | QueryState::Cancelled => {
                return Err(AuditError::QueryExecutionFailure {
                    execution_id: execution.execution_id,
                    state: execution.state,
                    reason: execution.state_reason.unwrap_or_default(),
                })
            }
            state => {
                return Err(AuditError::QueryNotFinished {
                    execution_id: execution.execution_id,
                    state,
                })
            }
        }

        // Repair statements succeed without a result set
        let Some(location) = record.result_location else {
            return Ok(ResultPage::default());
        };
        let batch = self.read_results(&location).await?;
        page_of(&batch, next_token, max_results.max(1))
    }
}

/// Slice one page out of a result set; the token is the data-row offset
fn page_of(batch: &RecordBatch, next_token: Option<&str>, max_results: usize) -> Result<ResultPage> {
    let columns: Vec<String> = batch
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().to_string())
        .collect();

    let offset = match next_token {
        None => 0,
        Some(token) => token
            .parse::<usize>()
            .map_err(|_| AuditError::Internal(format!("Invalid continuation token: {token}")))?,
    };

    let mut rows = Vec::new();
    let mut budget = max_results;
    if next_token.is_none() {
        rows.push(columns.iter().cloned().map(Some).collect());
        budget = budget.saturating_sub(1);
    }

    let end = offset.saturating_add(budget).min(batch.num_rows());
    let start = offset.min(end);
    let as_text = batch
        .columns()
        .iter()
        .map(|c| cast(c.as_ref(), &DataType::Utf8))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    for i in start..end {
        rows.push(
            as_text
                .iter()
                .map(|col| {
                    let col = col.as_string::<i32>();
                    (!col.is_null(i)).then(|| col.value(i).to_string())
                })
                .collect(),
        );
    }

    let next_token = (end < batch.num_rows()).then(|| end.to_string());
    Ok(ResultPage {
        columns,
        rows,
        next_token,
    })
}
