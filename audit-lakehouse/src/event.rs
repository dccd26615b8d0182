//! Audit domain types: AuditEventType, AuditEvent, inbound queue messages

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AuditError, Result};

/// Sentinel stored in `subjectType` when the producer did not name one
pub const SUBJECT_TYPE_NOT_APPLICABLE: &str = "NOT_APPLICABLE";

/// Message attribute carrying the W3C trace context
pub const TRACE_PARENT_ATTRIBUTE: &str = "traceparent";

/// Which audit stream an event belongs to
///
/// Selects bucket, table, workgroup and output location on the columnar
/// path, and the Delta table on the row-store path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    Staff,
    Prisoner,
}

impl AuditEventType {
    pub const ALL: [AuditEventType; 2] = [AuditEventType::Staff, AuditEventType::Prisoner];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Staff => "STAFF",
            Self::Prisoner => "PRISONER",
        }
    }
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The canonical audit record, on both storage paths
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    /// Assigned by the ingestion boundary, never by the producer
    pub id: Option<String>,
    pub what: String,
    pub when: DateTime<Utc>,
    pub operation_id: Option<String>,
    pub subject_id: Option<String>,
    pub subject_type: Option<String>,
    pub correlation_id: Option<String>,
    pub who: Option<String>,
    pub service: Option<String>,
    /// Opaque JSON payload, kept as text
    pub details: Option<String>,
}

impl AuditEvent {
    /// New event with only the required name, stamped now
    pub fn new(what: impl Into<String>) -> Self {
        Self {
            id: None,
            what: what.into(),
            when: Utc::now(),
            operation_id: None,
            subject_id: None,
            subject_type: None,
            correlation_id: None,
            who: None,
            service: None,
            details: None,
        }
    }

    pub fn with_who(mut self, who: impl Into<String>) -> Self {
        self.who = Some(who.into());
        self
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_when(mut self, when: DateTime<Utc>) -> Self {
        self.when = when;
        self
    }

    pub fn with_subject(mut self, subject_id: impl Into<String>, subject_type: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self.subject_type = Some(subject_type.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Assign a fresh random id if none is present, returning it
    pub fn ensure_id(&mut self) -> &str {
        self.id.get_or_insert_with(|| Uuid::new_v4().to_string())
    }

    /// Apply ingestion defaults: `subjectType` sentinel and `operationId`
    /// backfilled from the trace context when the producer sent none.
    pub fn normalized(mut self, trace_parent: Option<&str>) -> Self {
        if self.subject_type.is_none() {
            self.subject_type = Some(SUBJECT_TYPE_NOT_APPLICABLE.to_string());
        }
        if self.operation_id.is_none() {
            self.operation_id = trace_parent.and_then(trace_id_from_traceparent);
        }
        self
    }

    /// Parse a queue message body into an event received at `received_at`
    ///
    /// Any `id` in the body is ignored; unknown fields are dropped.
    pub fn from_message(message: &InboundMessage, received_at: DateTime<Utc>) -> Result<Self> {
        let raw: InboundAuditMessage = serde_json::from_str(&message.body)
            .map_err(|e| AuditError::InvalidMessage(e.to_string()))?;

        let what = raw
            .what
            .filter(|w| !w.trim().is_empty())
            .ok_or_else(|| AuditError::InvalidMessage("'what' is required".into()))?;

        let when = match raw.when {
            Some(ts) => DateTime::parse_from_rfc3339(&ts)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| AuditError::InvalidMessage(format!("invalid 'when' {ts:?}: {e}")))?,
            None => received_at,
        };

        let details = match raw.details {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) => Some(s),
            Some(other) => Some(other.to_string()),
        };

        Ok(Self {
            id: None,
            what,
            when,
            operation_id: raw.operation_id,
            subject_id: raw.subject_id,
            subject_type: raw.subject_type,
            correlation_id: raw.correlation_id,
            who: raw.who,
            service: raw.service,
            details,
        })
    }
}

/// A message as delivered by the queue: JSON body plus string attributes
#[derive(Debug, Clone, Default)]
pub struct InboundMessage {
    pub body: String,
    pub attributes: HashMap<String, String>,
}

impl InboundMessage {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn trace_parent(&self) -> Option<&str> {
        self.attributes.get(TRACE_PARENT_ATTRIBUTE).map(String::as_str)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InboundAuditMessage {
    what: Option<String>,
    when: Option<String>,
    operation_id: Option<String>,
    subject_id: Option<String>,
    subject_type: Option<String>,
    correlation_id: Option<String>,
    who: Option<String>,
    service: Option<String>,
    details: Option<serde_json::Value>,
}

/// Extract the trace-id from a `traceparent` header
/// (`version-traceid-parentid-flags`)
fn trace_id_from_traceparent(header: &str) -> Option<String> {
    let mut parts = header.trim().split('-');
    let _version = parts.next().filter(|v| v.len() == 2)?;
    let trace_id = parts.next()?;
    let valid = trace_id.len() == 32
        && trace_id.chars().all(|c| c.is_ascii_hexdigit())
        && trace_id.chars().any(|c| c != '0');
    valid.then(|| trace_id.to_ascii_lowercase())
}
