//! Shared fakes for integration tests

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use audit_lakehouse::config::AuditConfig;
use audit_lakehouse::engine::{QueryEngine, QueryExecution, QueryRequest, QueryState, ResultPage};
use audit_lakehouse::error::{AuditError, Result};
use audit_lakehouse::event::{AuditEvent, AuditEventType};
use audit_lakehouse::query::AuditFilter;
use audit_lakehouse::row_store::{PageRequest, RowStore, RowStorePage};
use audit_lakehouse::telemetry::TelemetrySink;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Defaults with a fast reconciliation wait
pub fn test_config(base_path: &std::path::Path) -> AuditConfig {
    AuditConfig::new(base_path)
        .with_jwt_secret("test-secret-key-for-testing-only")
        .with_reconcile_wait(Duration::from_millis(10), 500)
}

// ─── Scripted Engine ───

/// How an execution behaves, chosen by the statement it was started with
#[derive(Debug, Clone)]
pub struct Script {
    /// States reported by successive polls; the last one sticks
    pub states: Vec<QueryState>,
    pub state_reason: Option<String>,
    /// Pages served in order, keyed by the token that requests them
    pub pages: Vec<ResultPage>,
}

impl Script {
    pub fn succeeds() -> Self {
        Self {
            states: vec![QueryState::Succeeded],
            state_reason: None,
            pages: vec![ResultPage::default()],
        }
    }

    pub fn with_states(mut self, states: &[QueryState]) -> Self {
        self.states = states.to_vec();
        self
    }

    pub fn with_pages(mut self, pages: Vec<ResultPage>) -> Self {
        self.pages = pages;
        self
    }

    pub fn failing(state: QueryState, reason: &str) -> Self {
        Self {
            states: vec![QueryState::Running, state],
            state_reason: Some(reason.to_string()),
            pages: vec![],
        }
    }
}

#[derive(Default)]
struct ScriptedState {
    submitted: Vec<QueryRequest>,
    executions: HashMap<String, (Script, VecDeque<QueryState>, QueryState)>,
    page_requests: Vec<(String, Option<String>)>,
}

/// Engine whose executions follow pre-written scripts
///
/// Statements starting with `MSCK` use the repair script, everything else
/// the select script.
pub struct ScriptedEngine {
    repair: Script,
    select: Script,
    state: Mutex<ScriptedState>,
}

impl ScriptedEngine {
    pub fn new(repair: Script, select: Script) -> Arc<Self> {
        Arc::new(Self {
            repair,
            select,
            state: Mutex::new(ScriptedState::default()),
        })
    }

    pub fn submitted(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .submitted
            .iter()
            .map(|r| r.query.clone())
            .collect()
    }

    pub fn submitted_requests(&self) -> Vec<QueryRequest> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn page_requests(&self) -> Vec<(String, Option<String>)> {
        self.state.lock().unwrap().page_requests.clone()
    }
}

#[async_trait]
impl QueryEngine for ScriptedEngine {
    async fn start_query(&self, request: QueryRequest) -> Result<String> {
        let script = if request.query.starts_with("MSCK") {
            self.repair.clone()
        } else {
            self.select.clone()
        };
        let mut state = self.state.lock().unwrap();
        state.submitted.push(request);
        let id = format!("exec-{}", state.submitted.len());
        let states: VecDeque<QueryState> = script.states.iter().copied().collect();
        state
            .executions
            .insert(id.clone(), (script, states, QueryState::Queued));
        Ok(id)
    }

    async fn get_query_execution(&self, execution_id: &str) -> Result<QueryExecution> {
        let mut state = self.state.lock().unwrap();
        let (script, pending, current) = state
            .executions
            .get_mut(execution_id)
            .ok_or_else(|| AuditError::ExecutionNotFound(execution_id.to_string()))?;
        if !current.is_terminal() {
            if let Some(next) = pending.pop_front() {
                *current = next;
            }
        }
        Ok(QueryExecution {
            execution_id: execution_id.to_string(),
            state: *current,
            query: String::new(),
            workgroup: String::new(),
            state_reason: script.state_reason.clone(),
            submitted_at: Utc::now(),
            completed_at: current.is_terminal().then(Utc::now),
        })
    }

    async fn get_query_results(
        &self,
        execution_id: &str,
        next_token: Option<&str>,
        _max_results: usize,
    ) -> Result<ResultPage> {
        let mut state = self.state.lock().unwrap();
        state
            .page_requests
            .push((execution_id.to_string(), next_token.map(String::from)));
        let (script, _, _) = state
            .executions
            .get(execution_id)
            .ok_or_else(|| AuditError::ExecutionNotFound(execution_id.to_string()))?;
        let index = match next_token {
            None => 0,
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| AuditError::Internal(format!("bad token {token}")))?,
        };
        script
            .pages
            .get(index)
            .cloned()
            .ok_or_else(|| AuditError::Internal(format!("no page {index}")))
    }
}

// ─── Recording Collaborators ───

#[derive(Default)]
pub struct RecordingRowStore {
    pub saved: Mutex<Vec<(AuditEventType, AuditEvent)>>,
}

impl RecordingRowStore {
    pub fn saved(&self) -> Vec<(AuditEventType, AuditEvent)> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl RowStore for RecordingRowStore {
    async fn save(&self, event_type: AuditEventType, mut event: AuditEvent) -> Result<String> {
        let id = event.ensure_id().to_string();
        self.saved.lock().unwrap().push((event_type, event));
        Ok(id)
    }

    async fn find(
        &self,
        event_type: AuditEventType,
        _filter: &AuditFilter,
        page: PageRequest,
    ) -> Result<RowStorePage> {
        let content: Vec<AuditEvent> = self
            .saved()
            .into_iter()
            .filter(|(t, _)| *t == event_type)
            .map(|(_, e)| e)
            .collect();
        Ok(RowStorePage {
            total_elements: content.len(),
            content,
            page: page.page,
            size: page.size,
        })
    }
}

#[derive(Default)]
pub struct RecordingTelemetry {
    pub events: Mutex<Vec<(String, BTreeMap<String, String>)>>,
}

impl RecordingTelemetry {
    pub fn names(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(n, _)| n.clone())
            .collect()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn track_event(&self, name: &str, properties: &BTreeMap<String, String>) {
        self.events
            .lock()
            .unwrap()
            .push((name.to_string(), properties.clone()));
    }
}

// ─── Result Pages ───

pub fn header(columns: &[&str]) -> Vec<Option<String>> {
    columns.iter().map(|c| Some(c.to_string())).collect()
}

pub fn data_row(id: &str, what: &str, when: &str) -> Vec<Option<String>> {
    vec![
        Some(id.to_string()),
        Some(what.to_string()),
        Some(when.to_string()),
    ]
}

pub const PAGE_COLUMNS: [&str; 3] = ["id", "what", "when"];

pub fn page(rows: Vec<Vec<Option<String>>>, next_token: Option<&str>) -> ResultPage {
    ResultPage {
        columns: PAGE_COLUMNS.iter().map(|c| c.to_string()).collect(),
        rows,
        next_token: next_token.map(String::from),
    }
}
