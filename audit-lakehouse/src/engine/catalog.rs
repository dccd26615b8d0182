//! Partition catalog: which storage partitions a table is known to have
//!
//! Objects written to a bucket are invisible to queries until a repair
//! statement registers their `year=/month=/day=/user=` partition here.

use std::collections::{BTreeMap, BTreeSet};

use deltalake::arrow::array::RecordBatch;
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::ObjectStore;
use tracing::debug;

use crate::codec;
use crate::error::Result;
use crate::partition::PartitionKey;

/// A table over one bucket, with its registered partitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogTable {
    pub database: String,
    pub name: String,
    pub bucket: String,
    partitions: BTreeSet<PartitionKey>,
}

impl CatalogTable {
    pub fn new(database: impl Into<String>, name: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            name: name.into(),
            bucket: bucket.into(),
            partitions: BTreeSet::new(),
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.database, self.name)
    }

    pub fn partitions(&self) -> &BTreeSet<PartitionKey> {
        &self.partitions
    }

    /// Register partitions, returning how many were new
    pub fn register_partitions(&mut self, partitions: impl IntoIterator<Item = PartitionKey>) -> usize {
        partitions
            .into_iter()
            .filter(|p| self.partitions.insert(p.clone()))
            .count()
    }

    /// Read every record in the registered partitions into one batch
    pub async fn load(&self, store: &dyn ObjectStore) -> Result<RecordBatch> {
        let mut events = Vec::new();
        for partition in &self.partitions {
            let prefix = Path::from(partition.prefix());
            let objects: Vec<_> = store.list(Some(&prefix)).try_collect().await?;
            for meta in objects {
                let bytes = store.get(&meta.location).await?.bytes().await?;
                events.extend(codec::decode(bytes)?);
            }
        }
        debug!(
            table = %self.qualified_name(),
            partitions = self.partitions.len(),
            rows = events.len(),
            "Loaded table"
        );
        codec::events_to_batch(&events)
    }
}

/// Every table the engine knows, keyed by `<database>.<table>`
#[derive(Debug, Clone, Default)]
pub struct PartitionCatalog {
    tables: BTreeMap<String, CatalogTable>,
}

impl PartitionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_table(&mut self, table: CatalogTable) {
        self.tables.insert(table.qualified_name(), table);
    }

    pub fn table(&self, qualified_name: &str) -> Option<&CatalogTable> {
        self.tables.get(qualified_name)
    }

    pub fn table_mut(&mut self, qualified_name: &str) -> Option<&mut CatalogTable> {
        self.tables.get_mut(qualified_name)
    }

    /// Tables living in `database`
    pub fn tables_in<'a>(&'a self, database: &'a str) -> impl Iterator<Item = &'a CatalogTable> + 'a {
        self.tables.values().filter(move |t| t.database == database)
    }
}

/// List a bucket and collect every partition that holds at least one object
pub async fn discover_partitions(store: &dyn ObjectStore) -> Result<BTreeSet<PartitionKey>> {
    let objects: Vec<_> = store.list(None).try_collect().await?;
    Ok(objects
        .iter()
        .filter_map(|meta| PartitionKey::parse(meta.location.as_ref()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use object_store::memory::InMemory;
    use object_store::PutPayload;

    use crate::event::AuditEvent;

    fn key(day: u32, who: &str) -> PartitionKey {
        PartitionKey::derive(Utc.with_ymd_and_hms(2021, 4, day, 12, 0, 0).unwrap(), Some(who))
    }

    #[test]
    fn test_register_counts_only_new_partitions() {
        let mut table = CatalogTable::new("audit_db", "audit_event", "audit-staff");
        assert_eq!(table.register_partitions([key(1, "a"), key(2, "a")]), 2);
        assert_eq!(table.register_partitions([key(2, "a"), key(3, "b")]), 1);
        assert_eq!(table.partitions().len(), 3);
    }

    #[test]
    fn test_tables_in_database() {
        let mut catalog = PartitionCatalog::new();
        catalog.register_table(CatalogTable::new("audit_db", "audit_event", "a"));
        catalog.register_table(CatalogTable::new("audit_db", "prisoner_audit_event", "b"));
        catalog.register_table(CatalogTable::new("other_db", "audit_event", "c"));

        assert_eq!(catalog.tables_in("audit_db").count(), 2);
        assert!(catalog.table("other_db.audit_event").is_some());
        assert!(catalog.table("missing.audit_event").is_none());
    }

    #[tokio::test]
    async fn test_discover_and_load() {
        let store = InMemory::new();
        let mut event = AuditEvent::new("X")
            .with_who("a")
            .with_when(Utc.with_ymd_and_hms(2021, 4, 1, 12, 0, 0).unwrap());
        event.ensure_id();
        let encoded = codec::encode(&event).unwrap();
        let object = key(1, "a").object_key(event.id.as_deref().unwrap(), "parquet");
        store
            .put(&Path::from(object.as_str()), PutPayload::from(encoded.bytes))
            .await
            .unwrap();
        store
            .put(&Path::from("stray/file.txt"), PutPayload::from_static(b"x"))
            .await
            .unwrap();

        let found = discover_partitions(&store).await.unwrap();
        assert_eq!(found, BTreeSet::from([key(1, "a")]));

        let mut table = CatalogTable::new("audit_db", "audit_event", "audit-staff");
        assert_eq!(table.load(&store).await.unwrap().num_rows(), 0);

        table.register_partitions(found);
        let batch = table.load(&store).await.unwrap();
        assert_eq!(batch.num_rows(), 1);
    }
}
