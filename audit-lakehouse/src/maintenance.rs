//! Partition maintenance: keep the engine's catalog in step with the buckets
//!
//! Objects written since the last repair are invisible to queries. Repairs
//! happen three ways:
//! - Triggered after every columnar write (submit only)
//! - Synchronously before an ad-hoc query (submit and wait, bounded)
//! - On a schedule, one task per event type, offset from each other

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config::{AuditConfig, EventTypeConfig, EventTypeRegistry};
use crate::engine::{QueryExecution, QueryState};
use crate::error::{AuditError, Result};
use crate::event::AuditEventType;
use crate::query::client::{ExecutionContext, QueryExecutionClient};

/// Catalog-repair statement for one table
pub fn repair_statement(config: &EventTypeConfig) -> String {
    format!("MSCK REPAIR TABLE {}", config.qualified_table())
}

/// Issues partition repairs for the configured tables
#[derive(Clone)]
pub struct PartitionMaintainer {
    client: QueryExecutionClient,
    event_types: EventTypeRegistry,
    poll_interval: Duration,
    max_attempts: u32,
}

impl PartitionMaintainer {
    pub fn new(
        client: QueryExecutionClient,
        event_types: EventTypeRegistry,
        poll_interval: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            client,
            event_types,
            poll_interval,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_config(config: &AuditConfig, client: QueryExecutionClient) -> Self {
        Self::new(
            client,
            config.event_types.clone(),
            config.reconcile_poll_interval,
            config.reconcile_max_attempts,
        )
    }

    /// Submit a repair and return its execution id without waiting
    pub async fn trigger(&self, event_type: AuditEventType) -> Result<String> {
        let config = self.event_types.get(event_type);
        let execution_id = self
            .client
            .submit(repair_statement(config), &ExecutionContext::from(config))
            .await?;
        info!(%event_type, table = %config.qualified_table(), execution_id = %execution_id, "Partition repair triggered");
        Ok(execution_id)
    }

    /// Submit a repair and block until it succeeds
    ///
    /// FAILED / CANCELLED become [`AuditError::ReconciliationFailure`];
    /// running past the attempt bound becomes
    /// [`AuditError::ReconciliationTimeout`].
    pub async fn reconcile_and_wait(&self, event_type: AuditEventType) -> Result<QueryExecution> {
        let table = self.event_types.get(event_type).qualified_table();
        let execution_id = self.trigger(event_type).await?;

        let execution = self
            .client
            .wait_for_terminal(&execution_id, self.poll_interval, self.max_attempts)
            .await?
            .ok_or_else(|| AuditError::ReconciliationTimeout {
                table: table.clone(),
                attempts: self.max_attempts,
            })?;

        match execution.state {
            QueryState::Succeeded => Ok(execution),
            state => Err(AuditError::ReconciliationFailure {
                table,
                state,
                reason: execution.state_reason.unwrap_or_default(),
            }),
        }
    }
}

/// Background repair schedule
pub struct MaintenanceScheduler {
    maintainer: Arc<PartitionMaintainer>,
    interval: Duration,
    offset: Duration,
    handles: Vec<JoinHandle<()>>,
}

impl MaintenanceScheduler {
    pub fn new(maintainer: Arc<PartitionMaintainer>, interval: Duration, offset: Duration) -> Self {
        Self {
            maintainer,
            interval,
            offset,
            handles: Vec::new(),
        }
    }

    pub fn from_config(config: &AuditConfig, maintainer: Arc<PartitionMaintainer>) -> Self {
        Self::new(maintainer, config.reconcile_interval, config.reconcile_offset)
    }

    /// Start one repair task per event type
    ///
    /// STAFF ticks first; each following type starts `offset` later. The
    /// tasks share nothing and never wait on each other.
    pub fn start(&mut self) {
        for (slot, event_type) in AuditEventType::ALL.into_iter().enumerate() {
            let delay = self.offset * slot as u32;
            self.start_reconcile(event_type, delay);
        }
        info!(
            interval_secs = self.interval.as_secs(),
            offset_secs = self.offset.as_secs(),
            "Maintenance scheduler started"
        );
    }

    /// Start the periodic repair of one type, first tick after `delay`
    pub fn start_reconcile(&mut self, event_type: AuditEventType, delay: Duration) {
        let maintainer = Arc::clone(&self.maintainer);
        let period = self.interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + delay, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match maintainer.reconcile_and_wait(event_type).await {
                    Ok(execution) => info!(
                        %event_type,
                        execution_id = %execution.execution_id,
                        "Scheduled partition repair done"
                    ),
                    Err(e @ AuditError::ReconciliationTimeout { .. }) => {
                        warn!(%event_type, error = %e, "Scheduled partition repair still running")
                    }
                    Err(e) => error!(%event_type, error = ?e, "Scheduled partition repair failed"),
                }
            }
        });
        self.handles.push(handle);
    }

    /// Repair every type once, in order, stopping at the first failure
    pub async fn run_once(&self) -> Result<()> {
        info!("Running one-shot partition repair");
        for event_type in AuditEventType::ALL {
            self.maintainer.reconcile_and_wait(event_type).await?;
        }
        info!("Partition repair cycle complete");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.handles.iter().any(|h| !h.is_finished())
    }

    /// Stop all background tasks
    pub fn stop(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
        info!("Maintenance scheduler stopped");
    }
}

impl Drop for MaintenanceScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;

    use crate::engine::{QueryEngine, QueryRequest, ResultPage};

    /// Every execution reports `final_state` once polled `polls_to_finish` times
    struct FixedEngine {
        final_state: QueryState,
        polls_to_finish: u32,
        submitted: Mutex<Vec<(Instant, QueryRequest)>>,
        polls: Mutex<u32>,
    }

    impl FixedEngine {
        fn new(final_state: QueryState, polls_to_finish: u32) -> Arc<Self> {
            Arc::new(Self {
                final_state,
                polls_to_finish,
                submitted: Mutex::new(Vec::new()),
                polls: Mutex::new(0),
            })
        }

        fn queries(&self) -> Vec<String> {
            self.submitted
                .lock()
                .unwrap()
                .iter()
                .map(|(_, r)| r.query.clone())
                .collect()
        }
    }

    #[async_trait]
    impl QueryEngine for FixedEngine {
        async fn start_query(&self, request: QueryRequest) -> Result<String> {
            let mut submitted = self.submitted.lock().unwrap();
            submitted.push((Instant::now(), request));
            Ok(format!("exec-{}", submitted.len()))
        }

        async fn get_query_execution(&self, execution_id: &str) -> Result<QueryExecution> {
            let mut polls = self.polls.lock().unwrap();
            *polls += 1;
            let state = if *polls >= self.polls_to_finish {
                self.final_state
            } else {
                QueryState::Running
            };
            Ok(QueryExecution {
                execution_id: execution_id.to_string(),
                state,
                query: String::new(),
                workgroup: String::new(),
                state_reason: (state == QueryState::Failed).then(|| "boom".to_string()),
                submitted_at: Utc::now(),
                completed_at: None,
            })
        }

        async fn get_query_results(&self, _: &str, _: Option<&str>, _: usize) -> Result<ResultPage> {
            Ok(ResultPage::default())
        }
    }

    fn maintainer(engine: Arc<FixedEngine>, max_attempts: u32) -> PartitionMaintainer {
        PartitionMaintainer::new(
            QueryExecutionClient::new(engine, 100),
            EventTypeRegistry::default(),
            Duration::from_millis(10),
            max_attempts,
        )
    }

    #[test]
    fn test_repair_statement() {
        let registry = EventTypeRegistry::default();
        assert_eq!(
            repair_statement(registry.get(AuditEventType::Prisoner)),
            "MSCK REPAIR TABLE audit_db.prisoner_audit_event"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_waits_for_success() {
        let engine = FixedEngine::new(QueryState::Succeeded, 3);
        let execution = maintainer(engine.clone(), 5)
            .reconcile_and_wait(AuditEventType::Staff)
            .await
            .unwrap();
        assert_eq!(execution.state, QueryState::Succeeded);
        assert_eq!(engine.queries(), vec!["MSCK REPAIR TABLE audit_db.audit_event"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_failure_aborts() {
        let engine = FixedEngine::new(QueryState::Failed, 1);
        let err = maintainer(engine, 5)
            .reconcile_and_wait(AuditEventType::Staff)
            .await
            .unwrap_err();
        match err {
            AuditError::ReconciliationFailure { table, state, reason } => {
                assert_eq!(table, "audit_db.audit_event");
                assert_eq!(state, QueryState::Failed);
                assert_eq!(reason, "boom");
            }
            other => panic!("expected ReconciliationFailure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_cancelled_aborts() {
        let engine = FixedEngine::new(QueryState::Cancelled, 2);
        let err = maintainer(engine.clone(), 5)
            .reconcile_and_wait(AuditEventType::Prisoner)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AuditError::ReconciliationFailure { state: QueryState::Cancelled, .. }
        ));
        assert_eq!(engine.queries(), vec!["MSCK REPAIR TABLE audit_db.prisoner_audit_event"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_gives_up_after_max_attempts() {
        let engine = FixedEngine::new(QueryState::Succeeded, u32::MAX);
        let err = maintainer(engine.clone(), 4)
            .reconcile_and_wait(AuditEventType::Prisoner)
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::ReconciliationTimeout { attempts: 4, .. }));
        assert_eq!(*engine.polls.lock().unwrap(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_offsets_types() {
        let engine = FixedEngine::new(QueryState::Succeeded, 1);
        let mut scheduler = MaintenanceScheduler::new(
            Arc::new(maintainer(engine.clone(), 3)),
            Duration::from_secs(300),
            Duration::from_secs(30),
        );
        let started = Instant::now();
        scheduler.start();
        assert!(scheduler.is_running());

        tokio::time::sleep(Duration::from_secs(31)).await;
        let submitted: Vec<(Duration, String)> = engine
            .submitted
            .lock()
            .unwrap()
            .iter()
            .map(|(at, r)| (at.duration_since(started), r.query.clone()))
            .collect();

        assert_eq!(submitted.len(), 2);
        assert!(submitted[0].1.ends_with("audit_db.audit_event"));
        assert!(submitted[1].1.ends_with("audit_db.prisoner_audit_event"));
        assert!(submitted[1].0 >= Duration::from_secs(30));

        scheduler.stop();
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_once_repairs_both_types() {
        let engine = FixedEngine::new(QueryState::Succeeded, 1);
        let scheduler = MaintenanceScheduler::new(
            Arc::new(maintainer(engine.clone(), 3)),
            Duration::from_secs(300),
            Duration::from_secs(30),
        );
        scheduler.run_once().await.unwrap();
        assert_eq!(engine.queries().len(), 2);
    }
}
