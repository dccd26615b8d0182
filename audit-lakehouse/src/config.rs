//! Configuration for audit-lakehouse
//!
//! Everything here is resolved once at process start and then shared
//! read-only; per-type settings are looked up by `AuditEventType`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AuditError, Result};
use crate::event::AuditEventType;

/// Where a bucket's objects live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// Process-local in-memory store (tests, local runs)
    Memory,
    /// Amazon S3 (credentials and region from the environment)
    S3 { region: Option<String> },
}

/// Per-type data lake and row-store settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTypeConfig {
    /// Bucket holding the partitioned parquet objects
    pub bucket: String,
    /// Query engine database
    pub database: String,
    /// Query engine table over `bucket`
    pub table: String,
    /// Execution group queries run under
    pub workgroup: String,
    /// Where the engine writes result sets (`<bucket>/<prefix>`)
    pub output_location: String,
    /// Delta table name on the row-store path
    pub row_store_table: String,
}

impl EventTypeConfig {
    /// `<database>.<table>` as used in statements
    pub fn qualified_table(&self) -> String {
        format!("{}.{}", self.database, self.table)
    }

    fn staff_default() -> Self {
        Self {
            bucket: "audit-staff".to_string(),
            database: "audit_db".to_string(),
            table: "audit_event".to_string(),
            workgroup: "audit-staff-workgroup".to_string(),
            output_location: "audit-query-results/staff".to_string(),
            row_store_table: "audit_event".to_string(),
        }
    }

    fn prisoner_default() -> Self {
        Self {
            bucket: "audit-prisoner".to_string(),
            database: "audit_db".to_string(),
            table: "prisoner_audit_event".to_string(),
            workgroup: "audit-prisoner-workgroup".to_string(),
            output_location: "audit-query-results/prisoner".to_string(),
            row_store_table: "prisoner_audit_event".to_string(),
        }
    }
}

/// Closed lookup table keyed by `AuditEventType`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTypeRegistry {
    staff: EventTypeConfig,
    prisoner: EventTypeConfig,
}

impl EventTypeRegistry {
    pub fn new(staff: EventTypeConfig, prisoner: EventTypeConfig) -> Self {
        Self { staff, prisoner }
    }

    pub fn get(&self, event_type: AuditEventType) -> &EventTypeConfig {
        match event_type {
            AuditEventType::Staff => &self.staff,
            AuditEventType::Prisoner => &self.prisoner,
        }
    }

    /// Every configured type with its settings
    pub fn iter(&self) -> impl Iterator<Item = (AuditEventType, &EventTypeConfig)> {
        AuditEventType::ALL.into_iter().map(move |t| (t, self.get(t)))
    }
}

impl Default for EventTypeRegistry {
    fn default() -> Self {
        Self::new(EventTypeConfig::staff_default(), EventTypeConfig::prisoner_default())
    }
}

/// Audit lakehouse configuration
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Root path for the Delta row-store tables
    pub base_path: PathBuf,

    /// Route ingestion to the columnar store instead of the row store
    pub columnar_write_enabled: bool,

    /// Per-type bucket/table/workgroup settings
    pub event_types: EventTypeRegistry,

    /// Backend used for every bucket
    pub storage_backend: StorageBackend,

    /// Scheduled partition reconciliation cadence
    pub reconcile_interval: Duration,

    /// Delay between the STAFF and PRISONER schedules
    pub reconcile_offset: Duration,

    /// Fixed backoff between polls while waiting on a reconciliation
    pub reconcile_poll_interval: Duration,

    /// Polls before a synchronous reconciliation gives up
    pub reconcile_max_attempts: u32,

    /// Rows requested per result page
    pub result_page_size: usize,

    /// Queue handlers allowed in flight at once
    pub max_concurrent_handlers: usize,

    /// Secret used to verify bearer tokens
    pub jwt_secret: String,

    /// Every service name the caller could ever be granted
    pub known_services: Vec<String>,

    /// Role -> services granted by that role
    pub role_services: BTreeMap<String, Vec<String>>,

    /// Role granting every known service
    pub all_services_role: String,
}

impl AuditConfig {
    /// Create config with sensible defaults
    ///
    /// # Arguments
    /// * `base_path` - Root directory for the row-store Delta tables.
    ///   Structure created:
    ///   ```text
    ///   base_path/
    ///   ├── audit_event/            (STAFF events)
    ///   └── prisoner_audit_event/   (PRISONER events)
    ///   ```
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
            columnar_write_enabled: false,
            event_types: EventTypeRegistry::default(),
            storage_backend: StorageBackend::Memory,
            reconcile_interval: Duration::from_secs(5 * 60),
            reconcile_offset: Duration::from_secs(30),
            reconcile_poll_interval: Duration::from_millis(500),
            reconcile_max_attempts: 120,
            result_page_size: 1000,
            max_concurrent_handlers: 4,
            jwt_secret: std::env::var("AUDIT_JWT_SECRET")
                .unwrap_or_else(|_| "audit-lakehouse-default-secret-change-me".to_string()),
            known_services: Vec::new(),
            role_services: BTreeMap::new(),
            all_services_role: "ROLE_AUDIT_ALL_SERVICES".to_string(),
        }
    }

    /// Build from `AUDIT_*` environment variables on top of defaults
    ///
    /// | Variable | Meaning |
    /// |---|---|
    /// | `AUDIT_BASE_PATH` | row-store root (required) |
    /// | `AUDIT_COLUMNAR_WRITE_ENABLED` | `true`/`false` |
    /// | `AUDIT_STORAGE_BACKEND` | `memory` or `s3` |
    /// | `AUDIT_S3_REGION` | region for the S3 backend |
    /// | `AUDIT_STAFF_BUCKET`, `AUDIT_PRISONER_BUCKET` | data lake buckets |
    /// | `AUDIT_STAFF_WORKGROUP`, `AUDIT_PRISONER_WORKGROUP` | execution groups |
    /// | `AUDIT_STAFF_OUTPUT_LOCATION`, `AUDIT_PRISONER_OUTPUT_LOCATION` | result locations |
    /// | `AUDIT_DATABASE` | engine database for both types |
    /// | `AUDIT_KNOWN_SERVICES` | comma separated service names |
    /// | `AUDIT_RECONCILE_INTERVAL_SECS`, `AUDIT_RECONCILE_OFFSET_SECS` | schedule |
    /// | `AUDIT_RECONCILE_MAX_ATTEMPTS` | synchronous wait bound |
    pub fn from_env() -> Result<Self> {
        let base_path = std::env::var("AUDIT_BASE_PATH")
            .map_err(|_| AuditError::Config("AUDIT_BASE_PATH is not set".into()))?;
        let mut cfg = Self::new(base_path);

        if let Some(enabled) = env_parse::<bool>("AUDIT_COLUMNAR_WRITE_ENABLED")? {
            cfg.columnar_write_enabled = enabled;
        }
        if let Ok(backend) = std::env::var("AUDIT_STORAGE_BACKEND") {
            cfg.storage_backend = match backend.to_lowercase().as_str() {
                "memory" => StorageBackend::Memory,
                "s3" => StorageBackend::S3 {
                    region: std::env::var("AUDIT_S3_REGION").ok(),
                },
                other => {
                    return Err(AuditError::Config(format!("unknown storage backend: {other}")))
                }
            };
        }

        let mut staff = cfg.event_types.get(AuditEventType::Staff).clone();
        let mut prisoner = cfg.event_types.get(AuditEventType::Prisoner).clone();
        override_from_env(&mut staff.bucket, "AUDIT_STAFF_BUCKET");
        override_from_env(&mut prisoner.bucket, "AUDIT_PRISONER_BUCKET");
        override_from_env(&mut staff.workgroup, "AUDIT_STAFF_WORKGROUP");
        override_from_env(&mut prisoner.workgroup, "AUDIT_PRISONER_WORKGROUP");
        override_from_env(&mut staff.output_location, "AUDIT_STAFF_OUTPUT_LOCATION");
        override_from_env(&mut prisoner.output_location, "AUDIT_PRISONER_OUTPUT_LOCATION");
        override_from_env(&mut staff.database, "AUDIT_DATABASE");
        override_from_env(&mut prisoner.database, "AUDIT_DATABASE");
        cfg.event_types = EventTypeRegistry::new(staff, prisoner);

        if let Ok(services) = std::env::var("AUDIT_KNOWN_SERVICES") {
            cfg.known_services = services
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(secs) = env_parse::<u64>("AUDIT_RECONCILE_INTERVAL_SECS")? {
            cfg.reconcile_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("AUDIT_RECONCILE_OFFSET_SECS")? {
            cfg.reconcile_offset = Duration::from_secs(secs);
        }
        if let Some(attempts) = env_parse::<u32>("AUDIT_RECONCILE_MAX_ATTEMPTS")? {
            cfg.reconcile_max_attempts = attempts;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.reconcile_interval.is_zero() {
            return Err(AuditError::Config("reconcile_interval must be > 0".into()));
        }
        // Types reconcile at distinct moments within each period
        if self.reconcile_offset.is_zero() || self.reconcile_offset >= self.reconcile_interval {
            return Err(AuditError::Config(
                "reconcile_offset must be > 0 and shorter than reconcile_interval".into(),
            ));
        }
        if self.reconcile_max_attempts == 0 {
            return Err(AuditError::Config("reconcile_max_attempts must be > 0".into()));
        }
        if self.result_page_size == 0 {
            return Err(AuditError::Config("result_page_size must be > 0".into()));
        }
        if self.max_concurrent_handlers == 0 {
            return Err(AuditError::Config("max_concurrent_handlers must be > 0".into()));
        }
        let staff = self.event_types.get(AuditEventType::Staff);
        let prisoner = self.event_types.get(AuditEventType::Prisoner);
        if staff.qualified_table() == prisoner.qualified_table() || staff.bucket == prisoner.bucket {
            return Err(AuditError::Config(
                "STAFF and PRISONER must use distinct buckets and tables".into(),
            ));
        }
        Ok(())
    }

    pub fn with_columnar_write(mut self, enabled: bool) -> Self {
        self.columnar_write_enabled = enabled;
        self
    }

    pub fn with_event_types(mut self, event_types: EventTypeRegistry) -> Self {
        self.event_types = event_types;
        self
    }

    pub fn with_storage_backend(mut self, backend: StorageBackend) -> Self {
        self.storage_backend = backend;
        self
    }

    pub fn with_reconcile_schedule(mut self, interval: Duration, offset: Duration) -> Self {
        self.reconcile_interval = interval;
        self.reconcile_offset = offset;
        self
    }

    pub fn with_reconcile_wait(mut self, poll_interval: Duration, max_attempts: u32) -> Self {
        self.reconcile_poll_interval = poll_interval;
        self.reconcile_max_attempts = max_attempts;
        self
    }

    pub fn with_result_page_size(mut self, size: usize) -> Self {
        self.result_page_size = size;
        self
    }

    pub fn with_max_concurrent_handlers(mut self, n: usize) -> Self {
        self.max_concurrent_handlers = n;
        self
    }

    pub fn with_jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.jwt_secret = secret.into();
        self
    }

    pub fn with_known_services<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_services = services.into_iter().map(Into::into).collect();
        self
    }

    /// Grant `services` to holders of `role`
    pub fn with_role_grant<I, S>(mut self, role: impl Into<String>, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.role_services
            .insert(role.into(), services.into_iter().map(Into::into).collect());
        self
    }

    /// Settings for one event type
    pub fn event_type(&self, event_type: AuditEventType) -> &EventTypeConfig {
        self.event_types.get(event_type)
    }

    /// Get path for a row-store table
    pub fn table_path(&self, table_name: &str) -> PathBuf {
        self.base_path.join(table_name)
    }
}

fn override_from_env(target: &mut String, var: &str) {
    if let Ok(value) = std::env::var(var) {
        if !value.trim().is_empty() {
            *target = value;
        }
    }
}

fn env_parse<T>(var: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| AuditError::Config(format!("{var}={raw:?}: {e}"))),
        Err(_) => Ok(None),
    }
}
