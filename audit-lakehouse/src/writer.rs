//! ColumnarWriter: one durable parquet object per audit event
//!
//! Objects land in the event type's bucket under the event's partition:
//!
//! ```text
//! <bucket>/year=<Y>/month=<M>/day=<D>/user=<who>/<id>.parquet
//! ```
//!
//! No batching and no deduplication; a store failure is returned as
//! [`AuditError::WriteFailure`] and left to queue redelivery.
//!
//! The record checksum travels with the object as the `checksum-sha256`
//! metadata entry. Stores do not check user metadata: on S3 the upload is
//! verified by the client's SHA-256 checksum setting (see
//! [`crate::storage`]), and [`ColumnarWriter::verify`] re-reads an object
//! and compares its digest with the stored entry on any backend.

use object_store::path::Path;
use object_store::{Attribute, AttributeValue, Attributes, PutOptions, PutPayload};
use tracing::{debug, info};

use crate::codec::{self, RECORD_EXTENSION};
use crate::config::EventTypeRegistry;
use crate::error::{AuditError, Result};
use crate::event::{AuditEvent, AuditEventType};
use crate::partition::PartitionKey;
use crate::storage::BucketStores;

/// Object metadata key carrying the record checksum
pub const CHECKSUM_METADATA_KEY: &str = "checksum-sha256";

const PARQUET_CONTENT_TYPE: &str = "application/vnd.apache.parquet";

/// Where a record was written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    pub id: String,
    pub bucket: String,
    pub key: String,
    pub partition: PartitionKey,
    pub checksum: String,
    pub e_tag: Option<String>,
}

/// Writes events into the per-type data lake buckets
///
/// Holds only immutable configuration; safe to share across concurrent
/// handlers via `Arc`.
#[derive(Debug, Clone)]
pub struct ColumnarWriter {
    stores: BucketStores,
    event_types: EventTypeRegistry,
}

impl ColumnarWriter {
    pub fn new(stores: BucketStores, event_types: EventTypeRegistry) -> Self {
        Self { stores, event_types }
    }

    /// Assign an id if missing, encode, and store the event
    pub async fn write(&self, event_type: AuditEventType, mut event: AuditEvent) -> Result<WriteReceipt> {
        let bucket = &self.event_types.get(event_type).bucket;
        let store = self.stores.get(bucket)?;

        let id = event.ensure_id().to_string();
        let encoded = codec::encode(&event)?;
        let partition = PartitionKey::for_event(&event);
        let key = partition.object_key(&id, RECORD_EXTENSION);

        let mut attributes = Attributes::new();
        attributes.insert(
            Attribute::ContentType,
            AttributeValue::from(PARQUET_CONTENT_TYPE),
        );
        attributes.insert(
            Attribute::Metadata(CHECKSUM_METADATA_KEY.into()),
            AttributeValue::from(encoded.checksum.clone()),
        );
        let options = PutOptions {
            attributes,
            ..Default::default()
        };

        debug!(%event_type, bucket = %bucket, key = %key, "Writing audit record");
        let result = store
            .put_opts(&Path::from(key.as_str()), PutPayload::from(encoded.bytes), options)
            .await
            .map_err(|e| AuditError::WriteFailure(format!("{bucket}/{key}: {e}")))?;

        info!(
            %event_type,
            id = %id,
            partition = %partition,
            "Audit record stored"
        );

        Ok(WriteReceipt {
            id,
            bucket: bucket.clone(),
            key,
            partition,
            checksum: encoded.checksum,
            e_tag: result.e_tag,
        })
    }

    /// Read a written record back and check it against its checksum entry
    pub async fn verify(&self, receipt: &WriteReceipt) -> Result<()> {
        let store = self.stores.get(&receipt.bucket)?;
        let location = format!("{}/{}", receipt.bucket, receipt.key);
        let got = store
            .get(&Path::from(receipt.key.as_str()))
            .await
            .map_err(|e| AuditError::WriteFailure(format!("{location}: {e}")))?;

        let stored = got
            .attributes
            .get(&Attribute::Metadata(CHECKSUM_METADATA_KEY.into()))
            .map(|v| v.as_ref().to_string());
        let bytes = got
            .bytes()
            .await
            .map_err(|e| AuditError::WriteFailure(format!("{location}: {e}")))?;
        let actual = codec::checksum(&bytes);

        match stored {
            Some(stored) if stored == actual => Ok(()),
            Some(stored) => Err(AuditError::WriteFailure(format!(
                "{location}: checksum mismatch, stored {stored}, computed {actual}"
            ))),
            None => Err(AuditError::WriteFailure(format!(
                "{location}: no {CHECKSUM_METADATA_KEY} entry"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use futures::TryStreamExt;
    use object_store::ObjectStore;

    fn writer() -> (ColumnarWriter, BucketStores) {
        let registry = EventTypeRegistry::default();
        let stores = BucketStores::in_memory(registry.iter().map(|(_, c)| c.bucket.clone()));
        (ColumnarWriter::new(stores.clone(), registry), stores)
    }

    #[tokio::test]
    async fn test_write_assigns_id_and_partitions() {
        let (writer, stores) = writer();
        let event = AuditEvent::new("OFFENDER_DELETED")
            .with_who("bobby.beans")
            .with_service("offender-service")
            .with_when(Utc.with_ymd_and_hms(2021, 4, 1, 15, 15, 30).unwrap());

        let receipt = writer.write(AuditEventType::Staff, event).await.unwrap();
        assert!(!receipt.id.is_empty());
        assert_eq!(
            receipt.key,
            format!("year=2021/month=4/day=1/user=bobby.beans/{}.parquet", receipt.id)
        );

        let store = stores.get("audit-staff").unwrap();
        let got = store.get(&Path::from(receipt.key.as_str())).await.unwrap();
        let checksum_attr = got
            .attributes
            .get(&Attribute::Metadata(CHECKSUM_METADATA_KEY.into()))
            .map(|v| v.as_ref().to_string());
        let bytes = got.bytes().await.unwrap();

        assert_eq!(checksum_attr.as_deref(), Some(receipt.checksum.as_str()));
        assert_eq!(codec::checksum(&bytes), receipt.checksum);

        let decoded = codec::decode(bytes).unwrap();
        assert_eq!(decoded[0].id.as_deref(), Some(receipt.id.as_str()));
        assert_eq!(decoded[0].who.as_deref(), Some("bobby.beans"));
    }

    #[tokio::test]
    async fn test_write_goes_to_type_bucket() {
        let (writer, stores) = writer();
        writer
            .write(AuditEventType::Prisoner, AuditEvent::new("VIEWED"))
            .await
            .unwrap();

        let staff_store = stores.get("audit-staff").unwrap();
        let prisoner_store = stores.get("audit-prisoner").unwrap();
        let staff: Vec<_> = staff_store.list(None).try_collect().await.unwrap();
        let prisoner: Vec<_> = prisoner_store.list(None).try_collect().await.unwrap();
        assert!(staff.is_empty());
        assert_eq!(prisoner.len(), 1);
    }

    #[tokio::test]
    async fn test_verify_detects_changed_object() {
        let (writer, stores) = writer();
        let receipt = writer
            .write(AuditEventType::Staff, AuditEvent::new("OFFENDER_DELETED").with_who("bobby.beans"))
            .await
            .unwrap();
        writer.verify(&receipt).await.unwrap();

        // Same metadata, different bytes
        let store = stores.get("audit-staff").unwrap();
        let path = Path::from(receipt.key.as_str());
        let attributes = store.get(&path).await.unwrap().attributes;
        store
            .put_opts(
                &path,
                PutPayload::from_static(b"not the record"),
                PutOptions {
                    attributes,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let err = writer.verify(&receipt).await.unwrap_err();
        assert!(matches!(err, AuditError::WriteFailure(msg) if msg.contains("checksum mismatch")));

        store.put(&path, PutPayload::from_static(b"bare")).await.unwrap();
        assert!(writer.verify(&receipt).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_bucket_is_config_error() {
        let writer = ColumnarWriter::new(BucketStores::new(), EventTypeRegistry::default());
        let result = writer.write(AuditEventType::Staff, AuditEvent::new("X")).await;
        assert!(matches!(result, Err(AuditError::Config(_))));
    }
}
