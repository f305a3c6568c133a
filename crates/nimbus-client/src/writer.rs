//! Segment writer client

use crate::error::{ClientError, ClientResult};
use crate::router::ReplyRouter;
use bytes::Bytes;
use nimbus_common::{Checksum, NamespaceId, ReplyAddress, RequestId};
use nimbus_proto::{ArchiveRequest, Message, Transport, routing};
use std::sync::Arc;
use std::time::Duration;

pub struct WriterClient {
    exchange: String,
    transport: Arc<dyn Transport>,
    router: ReplyRouter,
    reply_to: ReplyAddress,
    timeout: Duration,
}

impl WriterClient {
    pub fn new(
        exchange: impl Into<String>,
        transport: Arc<dyn Transport>,
        router: ReplyRouter,
        reply_to: ReplyAddress,
        timeout: Duration,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            transport,
            router,
            reply_to,
            timeout,
        }
    }

    /// Archive `content` as the whole of `key`; returns the superseded size
    pub async fn archive(
        &self,
        namespace: NamespaceId,
        key: &str,
        content: Bytes,
        timestamp: f64,
    ) -> ClientResult<u64> {
        let checksum = Checksum::compute(&content);
        self.archive_with_checksum(namespace, key, content, checksum, timestamp)
            .await
    }

    /// Like [`Self::archive`], for content whose checksums were computed while
    /// it was read
    pub async fn archive_with_checksum(
        &self,
        namespace: NamespaceId,
        key: &str,
        content: Bytes,
        checksum: Checksum,
        timestamp: f64,
    ) -> ClientResult<u64> {
        let request_id = RequestId::new();
        let request = ArchiveRequest {
            request_id,
            namespace,
            timestamp,
            segment_number: 0,
            checksum,
            key: key.to_string(),
            content,
            reply_to: self.reply_to.clone(),
        };

        let pending = self.router.register(request_id)?;
        self.transport
            .send(
                &ReplyAddress::new(&self.exchange, routing::WRITER_ARCHIVE),
                &request.into(),
            )
            .await?;

        match pending.wait(self.timeout).await? {
            Message::ArchiveReply(reply) => reply.outcome.map_err(ClientError::rejected),
            other => Err(ClientError::UnexpectedReply(other.kind())),
        }
    }
}
