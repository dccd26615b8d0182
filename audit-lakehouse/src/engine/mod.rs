//! Asynchronous query engine: the analytical side of the data lake
//!
//! Statements are submitted, run in the background, and observed by
//! polling. The engine keeps its own execution table and partition catalog;
//! nothing on the caller's side caches either.
//!
//! ```text
//! start_query ──► QUEUED ──► RUNNING ──┬──► SUCCEEDED ──► get_query_results (paged)
//!                                      ├──► FAILED
//!                                      └──► CANCELLED
//! ```

pub mod actor;
pub mod catalog;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use actor::{EngineActor, LocalQueryEngine};
pub use catalog::{CatalogTable, PartitionCatalog};

/// Execution state as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl QueryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// No further transition happens from a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for QueryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A statement plus the context it runs in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub query: String,
    /// Database unqualified table names resolve against
    pub database: String,
    pub workgroup: String,
    /// `bucket/prefix` the result set is written under
    pub output_location: String,
}

/// Snapshot of one execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryExecution {
    pub execution_id: String,
    pub state: QueryState,
    pub query: String,
    pub workgroup: String,
    /// Engine-supplied detail for FAILED / CANCELLED
    pub state_reason: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One page of a result set
///
/// Values are strings (or null) regardless of the column type. The first
/// page starts with a header row repeating the column names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultPage {
    /// Column names in row-value order
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
    /// Present while more pages remain
    pub next_token: Option<String>,
}

/// Engine contract consumed by the query client and partition maintenance
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Submit a statement; returns as soon as it is accepted
    async fn start_query(&self, request: QueryRequest) -> Result<String>;

    /// Current state of an execution (side-effect free)
    async fn get_query_execution(&self, execution_id: &str) -> Result<QueryExecution>;

    /// One page of a SUCCEEDED execution's results
    async fn get_query_results(
        &self,
        execution_id: &str,
        next_token: Option<&str>,
        max_results: usize,
    ) -> Result<ResultPage>;
}
