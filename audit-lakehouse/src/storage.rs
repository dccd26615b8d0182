//! Bucket registry for the data lake
//!
//! Each configured bucket resolves once to an `Arc<dyn ObjectStore>`; writers,
//! the query engine and its result locations all look stores up by bucket
//! name from here.

use std::collections::HashMap;
use std::sync::Arc;

use object_store::aws::{AmazonS3Builder, Checksum};
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::ObjectStore;
use tracing::info;

use crate::config::{AuditConfig, StorageBackend};
use crate::error::{AuditError, Result};

/// Bucket name -> object store
#[derive(Clone, Default)]
pub struct BucketStores {
    stores: HashMap<String, Arc<dyn ObjectStore>>,
}

impl BucketStores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve every bucket named by the config: data buckets and the
    /// buckets of each output location
    pub fn from_config(config: &AuditConfig) -> Result<Self> {
        let mut stores = Self::new();
        for (_, type_config) in config.event_types.iter() {
            let (output_bucket, _) = split_location(&type_config.output_location)?;
            for bucket in [type_config.bucket.as_str(), output_bucket] {
                if stores.contains(bucket) {
                    continue;
                }
                let store = build_store(&config.storage_backend, bucket)?;
                stores.insert(bucket, store);
            }
        }
        info!(
            backend = ?config.storage_backend,
            buckets = stores.stores.len(),
            "Bucket stores resolved"
        );
        Ok(stores)
    }

    /// Fresh in-memory store per bucket
    pub fn in_memory<I, S>(buckets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut stores = Self::new();
        for bucket in buckets {
            stores.insert(bucket.as_ref(), Arc::new(InMemory::new()));
        }
        stores
    }

    pub fn insert(&mut self, bucket: &str, store: Arc<dyn ObjectStore>) {
        self.stores.insert(bucket.to_string(), store);
    }

    pub fn contains(&self, bucket: &str) -> bool {
        self.stores.contains_key(bucket)
    }

    pub fn get(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
        self.stores
            .get(bucket)
            .cloned()
            .ok_or_else(|| AuditError::Config(format!("No store for bucket: {bucket}")))
    }
}

impl std::fmt::Debug for BucketStores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut buckets: Vec<&String> = self.stores.keys().collect();
        buckets.sort();
        f.debug_struct("BucketStores").field("buckets", &buckets).finish()
    }
}

fn build_store(backend: &StorageBackend, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
    match backend {
        StorageBackend::Memory => Ok(Arc::new(InMemory::new())),
        StorageBackend::S3 { region } => {
            let mut builder = AmazonS3Builder::from_env()
                .with_bucket_name(bucket)
                .with_checksum_algorithm(Checksum::SHA256);
            if let Some(region) = region {
                builder = builder.with_region(region);
            }
            Ok(Arc::new(builder.build()?))
        }
    }
}

/// Split `bucket/prefix` (optionally `s3://`-prefixed) into its parts
pub fn split_location(location: &str) -> Result<(&str, Path)> {
    let trimmed = location.strip_prefix("s3://").unwrap_or(location);
    let trimmed = trimmed.trim_matches('/');
    let (bucket, prefix) = trimmed.split_once('/').unwrap_or((trimmed, ""));
    if bucket.is_empty() {
        return Err(AuditError::Config(format!("Invalid location: {location:?}")));
    }
    Ok((bucket, Path::from(prefix)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AuditEventType;

    #[test]
    fn test_split_location() {
        let (bucket, prefix) = split_location("s3://results/staff/queries/").unwrap();
        assert_eq!(bucket, "results");
        assert_eq!(prefix.as_ref(), "staff/queries");

        let (bucket, prefix) = split_location("results").unwrap();
        assert_eq!(bucket, "results");
        assert_eq!(prefix.as_ref(), "");

        assert!(split_location("s3://").is_err());
    }

    #[test]
    fn test_from_config_registers_all_buckets() {
        let config = AuditConfig::new("/tmp/unused");
        let stores = BucketStores::from_config(&config).unwrap();

        for event_type in AuditEventType::ALL {
            let type_config = config.event_type(event_type);
            assert!(stores.contains(&type_config.bucket));
            let (output_bucket, _) = split_location(&type_config.output_location).unwrap();
            assert!(stores.contains(output_bucket));
        }
        assert!(stores.get("no-such-bucket").is_err());
    }
}
