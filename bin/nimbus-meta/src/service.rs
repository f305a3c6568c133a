//! Metadata store server
//!
//! Answers insert, space-usage and lookup requests against per-namespace
//! indexes. Requests are served one at a time in receipt order; each reply
//! goes to the address carried in its request.

use crate::metrics::MetaMetrics;
use nimbus_common::NamespaceId;
use nimbus_meta_store::{IndexCache, MetaStoreError};
use nimbus_proto::{
    DecodeError, Handler, Inbound, InsertErrorKind, InsertOutcome, KeyLookupReply,
    KeyLookupRequest, LookupErrorKind, Message, MetadataInsertReply, MetadataInsertRequest,
    MetadataRecord, Outgoing, ReplyError, SpaceUsage, SpaceUsageErrorKind, SpaceUsageReply,
    SpaceUsageRequest,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct MetaService {
    indexes: IndexCache,
    metrics: Arc<MetaMetrics>,
}

impl MetaService {
    pub fn new(indexes: IndexCache, metrics: Arc<MetaMetrics>) -> Self {
        Self { indexes, metrics }
    }

    #[must_use]
    pub const fn indexes(&self) -> &IndexCache {
        &self.indexes
    }

    #[must_use]
    pub fn metrics(&self) -> Arc<MetaMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Close every open namespace index
    pub fn close_all(&mut self) {
        info!("Closing {} open indexes", self.indexes.open_count());
        self.indexes.close_all();
    }

    /// Store `record` under `key` unless it is older than what is there
    pub fn insert(
        &mut self,
        namespace: NamespaceId,
        key: &str,
        record: &MetadataRecord,
    ) -> InsertOutcome {
        let result = self
            .indexes
            .get_or_open(namespace)
            .and_then(|index| index.insert(key, record));

        match result {
            Ok(previous_size) => {
                MetaMetrics::incr(&self.metrics.inserts_stored);
                Ok(previous_size)
            }
            Err(
                e @ (MetaStoreError::OutOfOrder { .. } | MetaStoreError::NonFiniteTimestamp(_)),
            ) => {
                MetaMetrics::incr(&self.metrics.inserts_out_of_order);
                warn!("Rejected insert {}/{}: {}", namespace, key, e);
                Err(ReplyError::new(InsertErrorKind::InvalidDuplicate, e.to_string()))
            }
            Err(e) => {
                MetaMetrics::incr(&self.metrics.inserts_failed);
                error!("Insert {}/{} failed: {}", namespace, key, e);
                Err(ReplyError::new(InsertErrorKind::StoreFailed, e.to_string()))
            }
        }
    }

    /// Space used by live keys; a namespace never written reports zero
    pub fn space_usage(
        &mut self,
        namespace: NamespaceId,
    ) -> Result<SpaceUsage, ReplyError<SpaceUsageErrorKind>> {
        MetaMetrics::incr(&self.metrics.space_usage_requests);
        let result = match self.indexes.get_existing(namespace) {
            Ok(Some(index)) => index.space_usage(),
            Ok(None) => Ok(SpaceUsage::default()),
            Err(e) => Err(e),
        };
        result.map_err(|e| {
            MetaMetrics::incr(&self.metrics.space_usage_failed);
            error!("Space usage for {} failed: {}", namespace, e);
            ReplyError::new(SpaceUsageErrorKind::StoreFailed, e.to_string())
        })
    }

    /// Current record for `key`, tombstones included
    pub fn lookup(
        &mut self,
        namespace: NamespaceId,
        key: &str,
    ) -> Result<MetadataRecord, ReplyError<LookupErrorKind>> {
        let result = match self.indexes.get_existing(namespace) {
            Ok(Some(index)) => index.get(key),
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };
        match result {
            Ok(Some(record)) => {
                MetaMetrics::incr(&self.metrics.lookups_found);
                Ok(record)
            }
            Ok(None) => {
                MetaMetrics::incr(&self.metrics.lookups_not_found);
                debug!("Lookup {}/{}: not found", namespace, key);
                Err(ReplyError::new(
                    LookupErrorKind::KeyNotFound,
                    format!("key '{key}' not found in namespace {namespace}"),
                ))
            }
            Err(e) => {
                MetaMetrics::incr(&self.metrics.lookups_failed);
                error!("Lookup {}/{} failed: {}", namespace, key, e);
                Err(ReplyError::new(LookupErrorKind::StoreFailed, e.to_string()))
            }
        }
    }

    fn handle_insert(&mut self, request: MetadataInsertRequest) -> Outgoing {
        info!(
            "Insert {}/{} ts={} tombstone={}",
            request.namespace, request.key, request.record.timestamp, request.record.is_tombstone
        );
        let outcome = self.insert(request.namespace, &request.key, &request.record);
        Outgoing::new(
            request.reply_to,
            MetadataInsertReply {
                request_id: request.request_id,
                outcome,
            },
        )
    }

    fn handle_space_usage(&mut self, request: SpaceUsageRequest) -> Outgoing {
        let outcome = self.space_usage(request.namespace);
        Outgoing::new(
            request.reply_to,
            SpaceUsageReply {
                request_id: request.request_id,
                outcome,
            },
        )
    }

    fn handle_lookup(&mut self, request: KeyLookupRequest) -> Outgoing {
        let outcome = self.lookup(request.namespace, &request.key);
        Outgoing::new(
            request.reply_to,
            KeyLookupReply {
                request_id: request.request_id,
                outcome,
            },
        )
    }
}

impl Handler for MetaService {
    fn handle(&mut self, message: Message) -> Vec<Outgoing> {
        match message {
            Message::MetadataInsertRequest(request) => vec![self.handle_insert(request)],
            Message::SpaceUsageRequest(request) => vec![self.handle_space_usage(request)],
            Message::KeyLookupRequest(request) => vec![self.handle_lookup(request)],
            other @ (Message::ArchiveRequest(_)
            | Message::ArchiveReply(_)
            | Message::MetadataInsertReply(_)
            | Message::SpaceUsageReply(_)
            | Message::KeyLookupReply(_)) => {
                MetaMetrics::incr(&self.metrics.unexpected_messages);
                warn!(
                    "Ignoring unexpected {:?} {}",
                    other.kind(),
                    other.request_id()
                );
                Vec::new()
            }
        }
    }

    fn on_malformed(&mut self, inbound: &Inbound, error: &DecodeError) -> Vec<Outgoing> {
        MetaMetrics::incr(&self.metrics.malformed_messages);
        warn!(
            "Dropping malformed message on {}: {} ({} bytes)",
            inbound.routing_key,
            error,
            inbound.payload.len()
        );
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use nimbus_common::{Checksum, ReplyAddress, RequestId};
    use nimbus_proto::process::process_one;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    fn service(capacity: usize) -> (TempDir, MetaService) {
        let dir = tempfile::tempdir().unwrap();
        let indexes = IndexCache::new(dir.path(), capacity);
        (dir, MetaService::new(indexes, Arc::new(MetaMetrics::default())))
    }

    fn record(timestamp: f64, size: u32) -> MetadataRecord {
        MetadataRecord::live(
            timestamp,
            0,
            size,
            Checksum::compute(b"x"),
            format!("0000000000000001/{size}"),
        )
    }

    fn reply_to() -> ReplyAddress {
        ReplyAddress::new("writer-1", "writer.database_key_insert_reply")
    }

    #[test]
    fn test_insert_reports_previous_size() {
        let (_dir, mut meta) = service(10);
        let ns = NamespaceId::new(1);

        assert_eq!(meta.insert(ns, "foo", &record(1.0, 100)), Ok(0));
        assert_eq!(meta.insert(ns, "foo", &record(2.0, 250)), Ok(100));
        assert_eq!(meta.insert(ns, "foo", &MetadataRecord::tombstone(3.0)), Ok(250));
        assert_eq!(meta.insert(ns, "foo", &record(4.0, 10)), Ok(0));
    }

    #[test]
    fn test_out_of_order_is_invalid_duplicate() {
        let (_dir, mut meta) = service(10);
        let ns = NamespaceId::new(1);

        meta.insert(ns, "foo", &record(5.0, 100)).unwrap();
        let err = meta.insert(ns, "foo", &record(4.0, 300)).unwrap_err();
        assert_eq!(err.kind, InsertErrorKind::InvalidDuplicate);
        assert_eq!(meta.lookup(ns, "foo").unwrap().segment_size, 100);
        assert_eq!(meta.metrics.inserts_out_of_order.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_nan_timestamp_is_invalid_duplicate() {
        let (_dir, mut meta) = service(10);
        let ns = NamespaceId::new(1);

        let err = meta.insert(ns, "foo", &record(f64::NAN, 100)).unwrap_err();
        assert_eq!(err.kind, InsertErrorKind::InvalidDuplicate);
        assert_eq!(meta.lookup(ns, "foo").unwrap_err().kind, LookupErrorKind::KeyNotFound);

        // the key still accepts ordinary versions afterwards
        meta.insert(ns, "foo", &record(5.0, 100)).unwrap();
        assert_eq!(meta.insert(ns, "foo", &record(6.0, 200)).unwrap(), 100);
    }

    #[test]
    fn test_space_usage_of_unknown_namespace_is_zero() {
        let (_dir, mut meta) = service(10);
        let ns = NamespaceId::new(77);

        assert_eq!(meta.space_usage(ns), Ok(SpaceUsage::default()));
        assert!(!meta.indexes().is_open(ns));
        assert!(!meta.indexes().index_path(ns).exists());
    }

    #[test]
    fn test_lookup_missing_key_and_tombstone() {
        let (_dir, mut meta) = service(10);
        let ns = NamespaceId::new(1);

        let err = meta.lookup(ns, "foo").unwrap_err();
        assert_eq!(err.kind, LookupErrorKind::KeyNotFound);

        meta.insert(ns, "foo", &MetadataRecord::tombstone(9.0)).unwrap();
        let found = meta.lookup(ns, "foo").unwrap();
        assert!(found.is_tombstone);
        assert_eq!(meta.lookup(ns, "bar").unwrap_err().kind, LookupErrorKind::KeyNotFound);
    }

    #[test]
    fn test_eleventh_namespace_evicts_least_recent() {
        let (_dir, mut meta) = service(10);
        for n in 1..=10 {
            meta.insert(NamespaceId::new(n), "k", &record(1.0, 1)).unwrap();
        }
        // touch namespace 1 so namespace 2 becomes least recent
        meta.lookup(NamespaceId::new(1), "k").unwrap();
        meta.insert(NamespaceId::new(11), "k", &record(1.0, 1)).unwrap();

        assert_eq!(meta.indexes().open_count(), 10);
        assert!(meta.indexes().is_open(NamespaceId::new(1)));
        assert!(!meta.indexes().is_open(NamespaceId::new(2)));

        // evicted indexes reopen with their data intact
        assert_eq!(meta.insert(NamespaceId::new(2), "k", &record(2.0, 5)), Ok(1));
    }

    #[test]
    fn test_handle_replies_to_request_address() {
        let (_dir, mut meta) = service(10);
        let request_id = RequestId::new();
        let out = meta.handle(
            MetadataInsertRequest {
                request_id,
                namespace: NamespaceId::new(3),
                reply_to: reply_to(),
                key: "foo".to_string(),
                record: record(1.0, 42),
            }
            .into(),
        );

        assert_eq!(
            out,
            vec![Outgoing::new(
                reply_to(),
                MetadataInsertReply::stored(request_id, 0)
            )]
        );
    }

    #[test]
    fn test_unexpected_and_malformed_get_no_reply() {
        let (_dir, mut meta) = service(10);
        let unexpected = meta.handle(nimbus_proto::ArchiveReply::stored(RequestId::new(), 0).into());
        assert!(unexpected.is_empty());

        let malformed = process_one(
            &mut meta,
            &Inbound::new("meta.database_key_insert", Bytes::from_static(&[3, 0, 1])),
        );
        assert!(malformed.is_empty());
        assert_eq!(meta.metrics.malformed_messages.load(Ordering::Relaxed), 1);
        assert_eq!(meta.metrics.unexpected_messages.load(Ordering::Relaxed), 1);
    }
}
