//! Segment writer
//!
//! An archive request is answered in two steps. The content is committed
//! through the durability fence and an insert is sent to the metadata store;
//! the archive stays pending until the insert reply arrives. Every version
//! is committed under its own blob name, so a rejected insert removes only
//! the blob that request committed and never one an index record points at.
//! An accepted insert prunes the versions it superseded.

use crate::metrics::WriterMetrics;
use nimbus_common::{NamespaceId, ReplyAddress, RequestId};
use nimbus_proto::{
    ArchiveErrorKind, ArchiveReply, ArchiveRequest, DecodeError, Handler, Inbound, Message,
    MetadataInsertReply, MetadataInsertRequest, MetadataRecord, Outgoing,
};
use nimbus_storage::{BlobVersion, ContentStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// What an archive needs once its insert reply arrives
#[derive(Debug)]
struct PendingArchive {
    namespace: NamespaceId,
    key: String,
    timestamp: f64,
    /// The blob this request committed
    file_name: String,
    reply_to: ReplyAddress,
    size: u32,
    started: Instant,
}

pub struct SegmentWriter {
    content: ContentStore,
    pending: HashMap<RequestId, PendingArchive>,
    /// Where metadata inserts are sent
    meta: ReplyAddress,
    /// Where the metadata store sends insert replies
    reply_to: ReplyAddress,
    metrics: Arc<WriterMetrics>,
}

impl SegmentWriter {
    pub fn new(
        content: ContentStore,
        meta: ReplyAddress,
        reply_to: ReplyAddress,
        metrics: Arc<WriterMetrics>,
    ) -> Self {
        Self {
            content,
            pending: HashMap::new(),
            meta,
            reply_to,
            metrics,
        }
    }

    #[must_use]
    pub const fn content(&self) -> &ContentStore {
        &self.content
    }

    /// Archives waiting on the metadata store
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn metrics(&self) -> Arc<WriterMetrics> {
        Arc::clone(&self.metrics)
    }

    fn set_pending_gauge(&self) {
        self.metrics
            .pending
            .store(
                u64::try_from(self.pending.len()).unwrap_or(u64::MAX),
                Ordering::Relaxed,
            );
    }

    fn reject(
        &self,
        request: &ArchiveRequest,
        kind: ArchiveErrorKind,
        message: String,
    ) -> Outgoing {
        WriterMetrics::incr(&self.metrics.archives_failed);
        Outgoing::new(
            request.reply_to.clone(),
            ArchiveReply::failed(request.request_id, kind, message),
        )
    }

    fn handle_archive(&mut self, request: ArchiveRequest) -> Outgoing {
        WriterMetrics::incr(&self.metrics.archives_received);
        info!(
            "Archive {}/{} ({} bytes, ts={}) request {}",
            request.namespace,
            request.key,
            request.content.len(),
            request.timestamp,
            request.request_id
        );

        if self.pending.contains_key(&request.request_id) {
            WriterMetrics::incr(&self.metrics.duplicate_requests);
            error!("Duplicate archive request {}", request.request_id);
            return self.reject(
                &request,
                ArchiveErrorKind::DuplicateRequest,
                format!("request {} is already in progress", request.request_id),
            );
        }

        let version = BlobVersion::new(request.timestamp, request.request_id);
        let blob = match self.content.commit(
            request.namespace,
            &request.key,
            &version,
            &request.content,
        ) {
            Ok(blob) => blob,
            Err(e) => {
                WriterMetrics::incr(&self.metrics.write_failures);
                error!(
                    "Write of {}/{} failed: {}",
                    request.namespace, request.key, e
                );
                return self.reject(&request, ArchiveErrorKind::WriteFailed, e.to_string());
            }
        };
        self.metrics
            .bytes_written
            .fetch_add(u64::from(blob.size), Ordering::Relaxed);

        let insert = MetadataInsertRequest {
            request_id: request.request_id,
            namespace: request.namespace,
            reply_to: self.reply_to.clone(),
            key: request.key.clone(),
            record: MetadataRecord::live(
                request.timestamp,
                request.segment_number,
                blob.size,
                request.checksum,
                blob.file_name.clone(),
            ),
        };

        self.pending.insert(
            request.request_id,
            PendingArchive {
                namespace: request.namespace,
                key: request.key,
                timestamp: request.timestamp,
                file_name: blob.file_name,
                reply_to: request.reply_to,
                size: blob.size,
                started: Instant::now(),
            },
        );
        self.set_pending_gauge();

        Outgoing::new(self.meta.clone(), insert)
    }

    fn handle_insert_reply(&mut self, reply: MetadataInsertReply) -> Option<Outgoing> {
        let Some(archive) = self.pending.remove(&reply.request_id) else {
            WriterMetrics::incr(&self.metrics.orphan_replies);
            error!("Insert reply {} has no pending archive", reply.request_id);
            return None;
        };
        self.set_pending_gauge();

        let reply = match reply.outcome {
            Ok(previous_size) => {
                WriterMetrics::incr(&self.metrics.archives_stored);
                info!(
                    "Archived {}/{} ({} bytes, previous {}) in {:?}",
                    archive.namespace,
                    archive.key,
                    archive.size,
                    previous_size,
                    archive.started.elapsed()
                );
                self.prune_superseded(&archive);
                ArchiveReply::stored(reply.request_id, previous_size)
            }
            Err(e) => {
                WriterMetrics::incr(&self.metrics.archives_failed);
                warn!(
                    "Insert of {}/{} rejected ({}), rolling back content",
                    archive.namespace, archive.key, e
                );
                self.roll_back(&archive);
                ArchiveReply::failed(reply.request_id, e.kind.into(), e.message)
            }
        };
        Some(Outgoing::new(archive.reply_to, reply))
    }

    fn roll_back(&self, archive: &PendingArchive) {
        WriterMetrics::incr(&self.metrics.rollbacks);
        match self.content.remove(&archive.file_name) {
            Ok(true) => debug!("Removed content {}", archive.file_name),
            Ok(false) => warn!("Content {} was already gone", archive.file_name),
            Err(e) => error!(
                "Rollback of {}/{} failed: {}",
                archive.namespace, archive.key, e
            ),
        }
    }

    /// Versions older than an indexed one can never be indexed again
    fn prune_superseded(&self, archive: &PendingArchive) {
        match self
            .content
            .prune_older(archive.namespace, &archive.key, archive.timestamp)
        {
            Ok(removed) => {
                self.metrics
                    .versions_pruned
                    .fetch_add(u64::try_from(removed).unwrap_or(u64::MAX), Ordering::Relaxed);
            }
            Err(e) => warn!(
                "Pruning old versions of {}/{} failed: {}",
                archive.namespace, archive.key, e
            ),
        }
    }
}

impl Handler for SegmentWriter {
    fn handle(&mut self, message: Message) -> Vec<Outgoing> {
        match message {
            Message::ArchiveRequest(request) => vec![self.handle_archive(request)],
            Message::MetadataInsertReply(reply) => {
                self.handle_insert_reply(reply).into_iter().collect()
            }
            other @ (Message::ArchiveReply(_)
            | Message::MetadataInsertRequest(_)
            | Message::SpaceUsageRequest(_)
            | Message::SpaceUsageReply(_)
            | Message::KeyLookupRequest(_)
            | Message::KeyLookupReply(_)) => {
                WriterMetrics::incr(&self.metrics.unexpected_messages);
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
        WriterMetrics::incr(&self.metrics.malformed_messages);
        warn!(
            "Dropping malformed message on {}: {} ({} bytes)",
            inbound.routing_key,
            error,
            inbound.payload.len()
        );
        Vec::new()
    }
}
