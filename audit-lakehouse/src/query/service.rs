//! AuditQueryService: the request-facing analytical query flow
//!
//! ```text
//! start_query:   validate ─► compile ─► repair partitions (wait) ─► submit
//! query_results: poll ─► RUNNING/QUEUED: state only
//!                     ─► SUCCEEDED: typed records
//!                     ─► FAILED/CANCELLED: QueryExecutionFailure
//! ```

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::{AuditConfig, EventTypeRegistry};
use crate::engine::QueryState;
use crate::error::{AuditError, Result};
use crate::event::{AuditEvent, AuditEventType};
use crate::maintenance::PartitionMaintainer;
use crate::query::client::{ExecutionContext, QueryExecutionClient};
use crate::query::compiler::QueryCompiler;
use crate::query::filter::AuditFilter;
use crate::scope::AuthorisedServices;

/// Returned as soon as the query is accepted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticalQueryResponse {
    pub execution_id: String,
    pub state: QueryState,
    pub authorised_services: Vec<String>,
}

/// State of an execution plus its records once SUCCEEDED
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResultsResponse {
    pub execution_id: String,
    pub state: QueryState,
    pub results: Vec<AuditEvent>,
}

#[derive(Clone)]
pub struct AuditQueryService {
    client: QueryExecutionClient,
    maintainer: Arc<PartitionMaintainer>,
    event_types: EventTypeRegistry,
}

impl AuditQueryService {
    pub fn new(
        client: QueryExecutionClient,
        maintainer: Arc<PartitionMaintainer>,
        event_types: EventTypeRegistry,
    ) -> Self {
        Self {
            client,
            maintainer,
            event_types,
        }
    }

    pub fn from_config(config: &AuditConfig, client: QueryExecutionClient) -> Self {
        let maintainer = Arc::new(PartitionMaintainer::from_config(config, client.clone()));
        Self::new(client, maintainer, config.event_types.clone())
    }

    /// Compile the filter for `scope`, repair partitions, then submit
    ///
    /// A failed repair aborts before anything is submitted.
    pub async fn start_query(
        &self,
        event_type: AuditEventType,
        filter: &AuditFilter,
        scope: &AuthorisedServices,
    ) -> Result<AnalyticalQueryResponse> {
        filter.validate()?;

        let config = self.event_types.get(event_type);
        let sql = QueryCompiler::new(config.qualified_table()).compile(filter, scope);
        debug!(%event_type, sql = %sql, "Compiled analytical query");

        self.maintainer.reconcile_and_wait(event_type).await?;

        let execution_id = self.client.submit(sql, &ExecutionContext::from(config)).await?;
        let state = self.client.poll(&execution_id).await?;

        info!(
            %event_type,
            execution_id = %execution_id,
            services = scope.len(),
            "Analytical query started"
        );
        Ok(AnalyticalQueryResponse {
            execution_id,
            state,
            authorised_services: scope.to_vec(),
        })
    }

    pub async fn query_results(
        &self,
        event_type: AuditEventType,
        execution_id: &str,
    ) -> Result<QueryResultsResponse> {
        let execution = self.client.execution(execution_id).await?;
        debug!(%event_type, execution_id, state = %execution.state, "Query results requested");

        let results = match execution.state {
            QueryState::Succeeded => self.client.fetch_results(execution_id).await?,
            QueryState::Failed | QueryState::Cancelled => {
                return Err(AuditError::QueryExecutionFailure {
                    execution_id: execution.execution_id,
                    state: execution.state,
                    reason: execution.state_reason.unwrap_or_default(),
                })
            }
            QueryState::Queued | QueryState::Running => Vec::new(),
        };

        Ok(QueryResultsResponse {
            execution_id: execution.execution_id,
            state: execution.state,
            results,
        })
    }
}
