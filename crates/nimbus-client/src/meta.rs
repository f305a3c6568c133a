//! Metadata store client

use crate::error::{ClientError, ClientResult};
use crate::router::ReplyRouter;
use async_trait::async_trait;
use nimbus_common::{NamespaceId, ReplyAddress, RequestId};
use nimbus_proto::{
    KeyLookupRequest, Message, MetadataRecord, SpaceUsage, SpaceUsageRequest, Transport, routing,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Read-side view of one metadata store replica
#[async_trait]
pub trait MetaReplica: Send + Sync {
    /// Name used in logs (the replica's exchange)
    fn name(&self) -> &str;

    async fn space_usage(&self, namespace: NamespaceId) -> ClientResult<SpaceUsage>;

    async fn lookup(&self, namespace: NamespaceId, key: &str) -> ClientResult<MetadataRecord>;
}

/// Client for one metadata store server, over any transport
pub struct MetaClient {
    exchange: String,
    transport: Arc<dyn Transport>,
    router: ReplyRouter,
    reply_to: ReplyAddress,
    timeout: Duration,
}

impl MetaClient {
    /// `reply_to` must be an exchange whose inbox is fed into `router`
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

    async fn call(
        &self,
        request_id: RequestId,
        routing_key: &str,
        request: Message,
    ) -> ClientResult<Message> {
        let pending = self.router.register(request_id)?;
        debug!(
            "Sending {:?} {} to {}",
            request.kind(),
            request_id,
            self.exchange
        );
        self.transport
            .send(&ReplyAddress::new(&self.exchange, routing_key), &request)
            .await?;
        pending.wait(self.timeout).await
    }
}

#[async_trait]
impl MetaReplica for MetaClient {
    fn name(&self) -> &str {
        &self.exchange
    }

    async fn space_usage(&self, namespace: NamespaceId) -> ClientResult<SpaceUsage> {
        let request_id = RequestId::new();
        let request = SpaceUsageRequest {
            request_id,
            namespace,
            reply_to: self.reply_to.clone(),
        };
        match self
            .call(request_id, routing::META_SPACE_USAGE, request.into())
            .await?
        {
            Message::SpaceUsageReply(reply) => reply.outcome.map_err(ClientError::rejected),
            other => Err(ClientError::UnexpectedReply(other.kind())),
        }
    }

    async fn lookup(&self, namespace: NamespaceId, key: &str) -> ClientResult<MetadataRecord> {
        let request_id = RequestId::new();
        let request = KeyLookupRequest {
            request_id,
            namespace,
            key: key.to_string(),
            reply_to: self.reply_to.clone(),
        };
        match self
            .call(request_id, routing::META_LOOKUP, request.into())
            .await?
        {
            Message::KeyLookupReply(reply) => reply.outcome.map_err(ClientError::rejected),
            other => Err(ClientError::UnexpectedReply(other.kind())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_proto::{
        KeyLookupReply, LocalBus, LookupErrorKind, ReplyError, SpaceUsageReply,
    };

    /// Answers space-usage with a fixed value and every lookup with not-found
    fn spawn_fake_server(bus: &LocalBus, exchange: &str, usage: SpaceUsage) {
        let mut inbox = bus.bind(exchange);
        let bus = bus.clone();
        tokio::spawn(async move {
            while let Some(inbound) = inbox.recv().await {
                let (to, reply): (ReplyAddress, Message) =
                    match Message::decode(&inbound.payload).unwrap() {
                        Message::SpaceUsageRequest(req) => (
                            req.reply_to,
                            SpaceUsageReply {
                                request_id: req.request_id,
                                outcome: Ok(usage),
                            }
                            .into(),
                        ),
                        Message::KeyLookupRequest(req) => (
                            req.reply_to,
                            KeyLookupReply {
                                request_id: req.request_id,
                                outcome: Err(ReplyError::new(
                                    LookupErrorKind::KeyNotFound,
                                    req.key,
                                )),
                            }
                            .into(),
                        ),
                        other => panic!("unexpected {other:?}"),
                    };
                bus.send(&to, &reply).await.unwrap();
            }
        });
    }

    fn client(bus: &LocalBus, router: &ReplyRouter, exchange: &str) -> MetaClient {
        MetaClient::new(
            exchange,
            Arc::new(bus.clone()),
            router.clone(),
            ReplyAddress::new("client", "client.reply"),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_space_usage_roundtrip() {
        let bus = LocalBus::new();
        let router = ReplyRouter::new();
        router.spawn(bus.bind("client"));
        let usage = SpaceUsage {
            total_size: 500,
            live_keys: 3,
        };
        spawn_fake_server(&bus, "meta-a", usage);

        let client = client(&bus, &router, "meta-a");
        assert_eq!(client.space_usage(NamespaceId::new(1)).await.unwrap(), usage);
        assert_eq!(router.pending(), 0);
    }

    #[tokio::test]
    async fn test_lookup_rejection_surfaces_kind() {
        let bus = LocalBus::new();
        let router = ReplyRouter::new();
        router.spawn(bus.bind("client"));
        spawn_fake_server(&bus, "meta-a", SpaceUsage::default());

        let client = client(&bus, &router, "meta-a");
        let err = client.lookup(NamespaceId::new(1), "foo").await.unwrap_err();
        match err {
            ClientError::Rejected { kind, message } => {
                assert_eq!(kind, "KeyNotFound");
                assert_eq!(message, "foo");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_replica_is_transport_error() {
        let bus = LocalBus::new();
        let router = ReplyRouter::new();
        let client = client(&bus, &router, "nowhere");

        let err = client.space_usage(NamespaceId::new(1)).await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
        assert_eq!(router.pending(), 0);
    }
}
