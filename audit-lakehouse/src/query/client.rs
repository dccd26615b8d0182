//! QueryExecutionClient: submit, poll, and collect typed results
//!
//! Thin layer over a [`QueryEngine`]: it never resubmits, never cancels,
//! and turns FAILED / CANCELLED into [`AuditError::QueryExecutionFailure`].
//!
//! Result paging: the first page always leads with a header row, which is
//! dropped. Engines may also repeat the header at the top of later pages, so
//! a later page's leading row is dropped only when every value equals its
//! column name.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::codec::parse_when;
use crate::config::EventTypeConfig;
use crate::engine::{QueryEngine, QueryExecution, QueryRequest, QueryState};
use crate::error::{AuditError, Result};
use crate::event::AuditEvent;
use crate::schema::{
    COL_CORRELATION_ID, COL_DETAILS, COL_ID, COL_OPERATION_ID, COL_SERVICE, COL_SUBJECT_ID,
    COL_SUBJECT_TYPE, COL_WHAT, COL_WHEN, COL_WHO,
};

/// Where and under which group a statement runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    pub database: String,
    pub workgroup: String,
    pub output_location: String,
}

impl From<&EventTypeConfig> for ExecutionContext {
    fn from(config: &EventTypeConfig) -> Self {
        Self {
            database: config.database.clone(),
            workgroup: config.workgroup.clone(),
            output_location: config.output_location.clone(),
        }
    }
}

/// All data rows of a finished execution, keyed by column order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

#[derive(Clone)]
pub struct QueryExecutionClient {
    engine: Arc<dyn QueryEngine>,
    page_size: usize,
}

impl QueryExecutionClient {
    pub fn new(engine: Arc<dyn QueryEngine>, page_size: usize) -> Self {
        Self {
            engine,
            page_size: page_size.max(1),
        }
    }

    /// Submit a statement; returns once the engine has accepted it
    pub async fn submit(&self, query: impl Into<String>, context: &ExecutionContext) -> Result<String> {
        let query = query.into();
        let execution_id = self
            .engine
            .start_query(QueryRequest {
                query,
                database: context.database.clone(),
                workgroup: context.workgroup.clone(),
                output_location: context.output_location.clone(),
            })
            .await?;
        debug!(execution_id = %execution_id, workgroup = %context.workgroup, "Query submitted");
        Ok(execution_id)
    }

    /// Current state (no side effects)
    pub async fn poll(&self, execution_id: &str) -> Result<QueryState> {
        Ok(self.engine.get_query_execution(execution_id).await?.state)
    }

    pub async fn execution(&self, execution_id: &str) -> Result<QueryExecution> {
        self.engine.get_query_execution(execution_id).await
    }

    /// Poll at a fixed interval until terminal
    ///
    /// Returns `None` if `max_attempts` polls pass without a terminal state.
    pub async fn wait_for_terminal(
        &self,
        execution_id: &str,
        poll_interval: Duration,
        max_attempts: u32,
    ) -> Result<Option<QueryExecution>> {
        for attempt in 1..=max_attempts {
            let execution = self.engine.get_query_execution(execution_id).await?;
            if execution.state.is_terminal() {
                debug!(execution_id, attempt, state = %execution.state, "Execution finished");
                return Ok(Some(execution));
            }
            if attempt < max_attempts {
                tokio::time::sleep(poll_interval).await;
            }
        }
        warn!(execution_id, max_attempts, "Execution still running after max attempts");
        Ok(None)
    }

    /// Every data row of a SUCCEEDED execution, following continuation tokens
    pub async fn fetch_rows(&self, execution_id: &str) -> Result<ResultRows> {
        let execution = self.engine.get_query_execution(execution_id).await?;
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

        let mut result = ResultRows::default();
        let mut token: Option<String> = None;
        let mut pages = 0usize;
        loop {
            let page = self
                .engine
                .get_query_results(execution_id, token.as_deref(), self.page_size)
                .await?;
            if pages == 0 {
                result.columns = page.columns.clone();
            }

            let mut rows = page.rows.into_iter().peekable();
            // First page always leads with the header; later pages may repeat it
            let leading_header = rows
                .peek()
                .map_or(false, |row| is_header(row, &result.columns));
            if pages == 0 || leading_header {
                rows.next();
            }
            result.rows.extend(rows);

            pages += 1;
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        debug!(execution_id, pages, rows = result.rows.len(), "Results fetched");
        Ok(result)
    }

    /// Every record of a SUCCEEDED execution, in result order
    pub async fn fetch_results(&self, execution_id: &str) -> Result<Vec<AuditEvent>> {
        let rows = self.fetch_rows(execution_id).await?;
        rows_to_events(&rows)
    }
}

fn is_header(row: &[Option<String>], columns: &[String]) -> bool {
    row.len() == columns.len()
        && row
            .iter()
            .zip(columns)
            .all(|(value, column)| value.as_deref() == Some(column.as_str()))
}

/// Map positional string rows onto events by column name
pub fn rows_to_events(result: &ResultRows) -> Result<Vec<AuditEvent>> {
    let index: HashMap<&str, usize> = result
        .columns
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i))
        .collect();

    result
        .rows
        .iter()
        .map(|row| {
            let get = |column: &str| -> Option<String> {
                index.get(column).and_then(|&i| row.get(i).cloned().flatten())
            };

            let raw_when = get(COL_WHEN).ok_or_else(|| AuditError::MalformedResult {
                column: COL_WHEN.into(),
                value: String::new(),
                reason: "missing value".into(),
            })?;
            let when = parse_when(&raw_when).map_err(|e| AuditError::MalformedResult {
                column: COL_WHEN.into(),
                value: raw_when.clone(),
                reason: e.to_string(),
            })?;
            let what = get(COL_WHAT).ok_or_else(|| AuditError::MalformedResult {
                column: COL_WHAT.into(),
                value: String::new(),
                reason: "missing value".into(),
            })?;

            Ok(AuditEvent {
                id: get(COL_ID),
                what,
                when,
                operation_id: get(COL_OPERATION_ID),
                subject_id: get(COL_SUBJECT_ID),
                subject_type: get(COL_SUBJECT_TYPE),
                correlation_id: get(COL_CORRELATION_ID),
                who: get(COL_WHO),
                service: get(COL_SERVICE),
                details: get(COL_DETAILS),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn row(values: &[&str]) -> Vec<Option<String>> {
        values.iter().map(|v| Some(v.to_string())).collect()
    }

    #[test]
    fn test_maps_by_column_name_not_position() {
        let rows = ResultRows {
            columns: cols(&["who", "when", "what", "id"]),
            rows: vec![row(&["bobby.beans", "2021-04-01T15:15:30Z", "OFFENDER_DELETED", "1"])],
        };
        let events = rows_to_events(&rows).unwrap();
        assert_eq!(events[0].who.as_deref(), Some("bobby.beans"));
        assert_eq!(events[0].what, "OFFENDER_DELETED");
        assert_eq!(events[0].id.as_deref(), Some("1"));
        assert!(events[0].service.is_none());
    }

    #[test]
    fn test_bad_when_is_malformed_result() {
        let rows = ResultRows {
            columns: cols(&["id", "what", "when"]),
            rows: vec![row(&["1", "X", "yesterday"])],
        };
        match rows_to_events(&rows) {
            Err(AuditError::MalformedResult { column, value, .. }) => {
                assert_eq!(column, "when");
                assert_eq!(value, "yesterday");
            }
            other => panic!("expected MalformedResult, got {other:?}"),
        }
    }

    #[test]
    fn test_header_detection() {
        let columns = cols(&["id", "what"]);
        assert!(is_header(&row(&["id", "what"]), &columns));
        assert!(!is_header(&row(&["1", "what"]), &columns));
        assert!(!is_header(&[Some("id".into()), None], &columns));
    }
}
