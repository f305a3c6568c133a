//! Single-loop message-driven process
//!
//! Each Nimbus service is one loop: receive a payload, decode it, hand it to
//! the service's [`Handler`], send whatever the handler returns. Messages are
//! handled one at a time in receipt order, so handler state needs no locking.

use crate::codec::DecodeError;
use crate::message::Message;
use crate::transport::{Inbound, Inbox, Transport};
use nimbus_common::ReplyAddress;
use tracing::{debug, error, info, warn};

/// A message a handler wants delivered
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub to: ReplyAddress,
    pub message: Message,
}

impl Outgoing {
    pub fn new(to: ReplyAddress, message: impl Into<Message>) -> Self {
        Self {
            to,
            message: message.into(),
        }
    }
}

/// Per-service message handling
///
/// `handle` may block on disk I/O; the loop runs it on a blocking-capable
/// worker thread.
pub trait Handler: Send {
    fn handle(&mut self, message: Message) -> Vec<Outgoing>;

    /// Called when a payload cannot be decoded. There is no reply address to
    /// answer, so the default just logs.
    fn on_malformed(&mut self, inbound: &Inbound, error: &DecodeError) -> Vec<Outgoing> {
        warn!(
            "Malformed message on {}: {} ({} bytes)",
            inbound.routing_key,
            error,
            inbound.payload.len()
        );
        Vec::new()
    }
}

/// Decode and dispatch one payload
pub fn process_one<H: Handler + ?Sized>(handler: &mut H, inbound: &Inbound) -> Vec<Outgoing> {
    match Message::decode(&inbound.payload) {
        Ok(message) => {
            debug!(
                "{:?} {} on {}",
                message.kind(),
                message.request_id(),
                inbound.routing_key
            );
            handler.handle(message)
        }
        Err(e) => handler.on_malformed(inbound, &e),
    }
}

/// Run `handler` until the inbox closes
///
/// Requires the multi-threaded tokio runtime: handler I/O runs under
/// `block_in_place`.
pub async fn run<H, T>(handler: &mut H, mut inbox: Inbox, transport: &T)
where
    H: Handler + ?Sized,
    T: Transport + ?Sized,
{
    while let Some(inbound) = inbox.recv().await {
        let outgoing = tokio::task::block_in_place(|| process_one(handler, &inbound));
        for out in outgoing {
            if let Err(e) = transport.send(&out.to, &out.message).await {
                error!(
                    "Failed to deliver {:?} {} to {}: {}",
                    out.message.kind(),
                    out.message.request_id(),
                    out.to,
                    e
                );
            }
        }
    }
    info!("Inbox closed, message loop exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveReply;
    use crate::transport::LocalBus;
    use bytes::Bytes;
    use nimbus_common::RequestId;

    #[derive(Default)]
    struct Echo {
        seen: Vec<RequestId>,
        malformed: usize,
    }

    impl Handler for Echo {
        fn handle(&mut self, message: Message) -> Vec<Outgoing> {
            self.seen.push(message.request_id());
            vec![Outgoing::new(ReplyAddress::new("out", "echo"), message)]
        }

        fn on_malformed(&mut self, _inbound: &Inbound, _error: &DecodeError) -> Vec<Outgoing> {
            self.malformed += 1;
            Vec::new()
        }
    }

    #[test]
    fn test_process_one_routes_malformed() {
        let mut echo = Echo::default();
        let out = process_one(&mut echo, &Inbound::new("x", Bytes::from_static(&[99])));
        assert!(out.is_empty());
        assert_eq!(echo.malformed, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_run_preserves_order_and_forwards() {
        let bus = LocalBus::new();
        let inbox = bus.bind("in");
        let mut out = bus.bind("out");

        let ids: Vec<RequestId> = (0..3).map(|_| RequestId::new()).collect();
        for id in &ids {
            bus.send(
                &ReplyAddress::new("in", "test"),
                &ArchiveReply::stored(*id, 0).into(),
            )
            .await
            .unwrap();
        }
        bus.deliver("in", Inbound::new("test", Bytes::from_static(b"")))
            .await
            .unwrap();
        bus.unbind("in");

        let mut echo = Echo::default();
        run(&mut echo, inbox, &bus).await;

        assert_eq!(echo.seen, ids);
        assert_eq!(echo.malformed, 1);
        for id in &ids {
            let inbound = out.recv().await.unwrap();
            assert_eq!(Message::decode(&inbound.payload).unwrap().request_id(), *id);
        }
    }
}
