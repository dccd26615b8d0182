//! Telemetry sink: fire-and-forget pipeline events

use std::collections::BTreeMap;

use tracing::info;

pub const EVENT_STORED: &str = "audit-event-stored";
pub const EVENT_ROUTED_TO_ROW_STORE: &str = "audit-event-routed-to-row-store";

/// Receives named events with string properties
///
/// Implementations must not block and must not fail.
pub trait TelemetrySink: Send + Sync {
    fn track_event(&self, name: &str, properties: &BTreeMap<String, String>);
}

/// Emits every event as a `tracing` record on the `audit_telemetry` target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn track_event(&self, name: &str, properties: &BTreeMap<String, String>) {
        info!(target: "audit_telemetry", event = name, ?properties, "telemetry");
    }
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn track_event(&self, _name: &str, _properties: &BTreeMap<String, String>) {}
}
