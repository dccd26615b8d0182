//! IngestionRouter: one event, exactly one store
//!
//! ```text
//! message ─► parse ─► normalize ─┬─ columnar on  ─► ColumnarWriter ─► partition repair (submit)
//!                                └─ columnar off ─► RowStore
//! ```
//!
//! The switch is process-wide and read once at construction. Failures are
//! returned unchanged so the queue can redeliver.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::error::Result;
use crate::event::{AuditEvent, AuditEventType, InboundMessage};
use crate::maintenance::PartitionMaintainer;
use crate::row_store::RowStore;
use crate::telemetry::{TelemetrySink, EVENT_ROUTED_TO_ROW_STORE, EVENT_STORED};
use crate::writer::{ColumnarWriter, WriteReceipt};

/// Where an event ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Columnar {
        receipt: WriteReceipt,
        /// Partition repair submitted after the write
        repair_execution_id: String,
    },
    RowStore {
        id: String,
    },
}

impl RouteOutcome {
    pub fn id(&self) -> &str {
        match self {
            Self::Columnar { receipt, .. } => &receipt.id,
            Self::RowStore { id } => id,
        }
    }

    fn target(&self) -> &'static str {
        match self {
            Self::Columnar { .. } => "columnar",
            Self::RowStore { .. } => "row-store",
        }
    }
}

#[derive(Clone)]
pub struct IngestionRouter {
    columnar_write_enabled: bool,
    writer: ColumnarWriter,
    maintainer: Arc<PartitionMaintainer>,
    row_store: Arc<dyn RowStore>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl IngestionRouter {
    pub fn new(
        columnar_write_enabled: bool,
        writer: ColumnarWriter,
        maintainer: Arc<PartitionMaintainer>,
        row_store: Arc<dyn RowStore>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            columnar_write_enabled,
            writer,
            maintainer,
            row_store,
            telemetry,
        }
    }

    /// Parse a queue message received now and route it
    pub async fn handle_message(
        &self,
        event_type: AuditEventType,
        message: &InboundMessage,
    ) -> Result<RouteOutcome> {
        let event = AuditEvent::from_message(message, Utc::now())?;
        self.route(event_type, event.normalized(message.trace_parent()))
            .await
    }

    /// Dispatch an already-normalized event
    pub async fn route(&self, event_type: AuditEventType, mut event: AuditEvent) -> Result<RouteOutcome> {
        let outcome = if self.columnar_write_enabled {
            event.ensure_id();
            let what = event.what.clone();
            let service = event.service.clone();
            let receipt = self.writer.write(event_type, event).await?;
            let repair_execution_id = self.maintainer.trigger(event_type).await?;
            let outcome = RouteOutcome::Columnar {
                receipt,
                repair_execution_id,
            };
            self.track(EVENT_STORED, event_type, &what, service.as_deref(), &outcome);
            outcome
        } else {
            let what = event.what.clone();
            let service = event.service.clone();
            let id = self.row_store.save(event_type, event).await?;
            let outcome = RouteOutcome::RowStore { id };
            self.track(EVENT_ROUTED_TO_ROW_STORE, event_type, &what, service.as_deref(), &outcome);
            outcome
        };

        debug!(%event_type, id = %outcome.id(), target = outcome.target(), "Audit event routed");
        Ok(outcome)
    }

    fn track(
        &self,
        name: &str,
        event_type: AuditEventType,
        what: &str,
        service: Option<&str>,
        outcome: &RouteOutcome,
    ) {
        let mut properties = BTreeMap::new();
        properties.insert("eventType".to_string(), event_type.to_string());
        properties.insert("what".to_string(), what.to_string());
        properties.insert("service".to_string(), service.unwrap_or_default().to_string());
        properties.insert("target".to_string(), outcome.target().to_string());
        properties.insert("id".to_string(), outcome.id().to_string());
        self.telemetry.track_event(name, &properties);
    }
}
