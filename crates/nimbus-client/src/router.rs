//! Reply correlation
//!
//! Outbound requests register their correlation id with a [`ReplyRouter`];
//! the router's receive task decodes inbound replies and completes the
//! matching waiter. A waiter that is dropped before its reply arrives
//! (timeout, quorum already decided) removes itself, so abandoned requests
//! hold nothing once they are gone.

use crate::error::{ClientError, ClientResult};
use nimbus_common::RequestId;
use nimbus_proto::{Inbox, Message};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type Waiters = HashMap<RequestId, oneshot::Sender<Message>>;

#[derive(Clone, Default)]
pub struct ReplyRouter {
    waiters: Arc<Mutex<Waiters>>,
}

impl ReplyRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start waiting for the reply to `request_id`
    pub fn register(&self, request_id: RequestId) -> ClientResult<PendingReply> {
        let (tx, rx) = oneshot::channel();
        let mut waiters = self.waiters.lock();
        if waiters.contains_key(&request_id) {
            return Err(ClientError::DuplicateRequest(request_id));
        }
        waiters.insert(request_id, tx);
        Ok(PendingReply {
            request_id,
            rx,
            router: self.clone(),
        })
    }

    /// Complete the waiter for `message`; false if nobody is waiting
    pub fn deliver(&self, message: Message) -> bool {
        let request_id = message.request_id();
        let Some(tx) = self.waiters.lock().remove(&request_id) else {
            debug!("No waiter for reply {}", request_id);
            return false;
        };
        tx.send(message).is_ok()
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Decode everything arriving on `inbox` and route it to waiters
    pub fn spawn(&self, mut inbox: Inbox) -> JoinHandle<()> {
        let router = self.clone();
        tokio::spawn(async move {
            while let Some(inbound) = inbox.recv().await {
                match Message::decode(&inbound.payload) {
                    Ok(message) => {
                        router.deliver(message);
                    }
                    Err(e) => warn!("Malformed reply on {}: {}", inbound.routing_key, e),
                }
            }
        })
    }
}

/// A registered wait for one reply
pub struct PendingReply {
    request_id: RequestId,
    rx: oneshot::Receiver<Message>,
    router: ReplyRouter,
}

impl PendingReply {
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub async fn wait(mut self, timeout: Duration) -> ClientResult<Message> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(_)) => Err(ClientError::Disconnected),
            Err(_) => Err(ClientError::Timeout(timeout)),
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.router.waiters.lock().remove(&self.request_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_proto::ArchiveReply;

    #[tokio::test]
    async fn test_deliver_completes_waiter() {
        let router = ReplyRouter::new();
        let id = RequestId::new();
        let pending = router.register(id).unwrap();

        assert!(router.deliver(ArchiveReply::stored(id, 3).into()));
        let reply = pending.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(reply.request_id(), id);
        assert_eq!(router.pending(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let router = ReplyRouter::new();
        let id = RequestId::new();
        let _pending = router.register(id).unwrap();
        assert!(matches!(
            router.register(id),
            Err(ClientError::DuplicateRequest(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_releases_waiter() {
        let router = ReplyRouter::new();
        let id = RequestId::new();
        let pending = router.register(id).unwrap();

        let err = pending.wait(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout(_)));
        assert_eq!(router.pending(), 0);
        assert!(!router.deliver(ArchiveReply::stored(id, 0).into()));
    }

    #[tokio::test]
    async fn test_dropped_waiter_is_removed() {
        let router = ReplyRouter::new();
        drop(router.register(RequestId::new()).unwrap());
        assert_eq!(router.pending(), 0);
    }
}
