//! Message delivery between Nimbus processes
//!
//! A transport delivers opaque payloads to a named exchange, at least once,
//! tagged with a routing key. Receivers decode the payload themselves so a
//! malformed message is seen by the process that has to deal with it.
//!
//! Two implementations are provided:
//! - [`LocalBus`]: in-process channels, one per bound exchange
//! - [`TcpTransport`]: length-delimited frames over TCP, the exchange being a
//!   `host:port`

use crate::message::Message;
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use nimbus_common::ReplyAddress;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, info, warn};

/// Largest frame accepted on a TCP connection (256 MiB)
pub const MAX_FRAME_LENGTH: usize = 256 * 1024 * 1024;

/// How long a TCP connect may take before the delivery fails
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A payload as received, before decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub routing_key: String,
    pub payload: Bytes,
}

impl Inbound {
    pub fn new(routing_key: impl Into<String>, payload: Bytes) -> Self {
        Self {
            routing_key: routing_key.into(),
            payload,
        }
    }
}

/// Receiving end of a bound exchange
pub type Inbox = mpsc::UnboundedReceiver<Inbound>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no route to exchange {0}")]
    UnknownExchange(String),

    #[error("exchange {0} is no longer receiving")]
    Closed(String),

    #[error("connect to {exchange} timed out after {timeout:?}")]
    ConnectTimeout { exchange: String, timeout: Duration },

    #[error("connect to {exchange} failed: {source}")]
    Connect {
        exchange: String,
        #[source]
        source: std::io::Error,
    },

    #[error("send to {exchange} failed: {source}")]
    Send {
        exchange: String,
        #[source]
        source: std::io::Error,
    },
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver a raw payload to `exchange`
    async fn deliver(&self, exchange: &str, inbound: Inbound) -> Result<(), TransportError>;

    /// Encode and deliver `message` to `to`, using its routing key verbatim
    async fn send(&self, to: &ReplyAddress, message: &Message) -> Result<(), TransportError> {
        self.deliver(
            &to.exchange,
            Inbound::new(to.routing_key.clone(), message.encode()),
        )
        .await
    }
}

/// In-process transport
#[derive(Clone, Default)]
pub struct LocalBus {
    exchanges: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<Inbound>>>>,
}

impl LocalBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `exchange`, replacing any previous binding
    pub fn bind(&self, exchange: impl Into<String>) -> Inbox {
        let (tx, rx) = mpsc::unbounded_channel();
        self.exchanges.lock().insert(exchange.into(), tx);
        rx
    }

    pub fn unbind(&self, exchange: &str) {
        self.exchanges.lock().remove(exchange);
    }
}

#[async_trait]
impl Transport for LocalBus {
    async fn deliver(&self, exchange: &str, inbound: Inbound) -> Result<(), TransportError> {
        let sender = self
            .exchanges
            .lock()
            .get(exchange)
            .cloned()
            .ok_or_else(|| TransportError::UnknownExchange(exchange.to_string()))?;
        sender
            .send(inbound)
            .map_err(|_| TransportError::Closed(exchange.to_string()))
    }
}

fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

/// Frame body: length-prefixed routing key, then the payload
fn encode_frame(inbound: &Inbound) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + inbound.routing_key.len() + inbound.payload.len());
    crate::codec::put_str(&mut buf, &inbound.routing_key);
    buf.put_slice(&inbound.payload);
    buf.freeze()
}

fn decode_frame(frame: &Bytes) -> Result<Inbound, crate::codec::DecodeError> {
    let mut dec = crate::codec::Decoder::new(frame);
    let routing_key = dec.string()?;
    let offset = frame.len() - dec.remaining();
    Ok(Inbound::new(routing_key, frame.slice(offset..)))
}

type Connection = Framed<TcpStream, LengthDelimitedCodec>;

/// Cached connection to one exchange; sends to that exchange queue on it
type Slot = Arc<tokio::sync::Mutex<Option<Connection>>>;

/// TCP transport with one cached outbound connection per exchange
///
/// The slot map lock is only held to look a slot up, so a slow or
/// unreachable exchange never delays delivery to the others.
pub struct TcpTransport {
    slots: Mutex<HashMap<String, Slot>>,
    connect_timeout: Duration,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::with_connect_timeout(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl TcpTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_connect_timeout(connect_timeout: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            connect_timeout,
        }
    }

    /// Bind `addr` and feed every received frame into the returned inbox
    ///
    /// The returned address is the bound one, so `127.0.0.1:0` can be used to
    /// get an ephemeral reply exchange.
    pub async fn listen(addr: &str) -> std::io::Result<(SocketAddr, Inbox)> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        let (tx, rx) = mpsc::unbounded_channel();
        info!("Listening for messages on {}", local);

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!("Accepted connection from {}", peer);
                        tokio::spawn(read_frames(stream, peer, tx.clone()));
                    }
                    Err(e) => warn!("Accept failed on {}: {}", local, e),
                }
                if tx.is_closed() {
                    break;
                }
            }
        });

        Ok((local, rx))
    }

    fn slot(&self, exchange: &str) -> Slot {
        Arc::clone(self.slots.lock().entry(exchange.to_string()).or_default())
    }

    async fn connect(&self, exchange: &str) -> Result<Connection, TransportError> {
        let stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(exchange))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(TransportError::Connect {
                    exchange: exchange.to_string(),
                    source,
                });
            }
            Err(_) => {
                return Err(TransportError::ConnectTimeout {
                    exchange: exchange.to_string(),
                    timeout: self.connect_timeout,
                });
            }
        };
        stream.set_nodelay(true).ok();
        Ok(Framed::new(stream, frame_codec()))
    }
}

async fn read_frames(stream: TcpStream, peer: SocketAddr, tx: mpsc::UnboundedSender<Inbound>) {
    let mut framed = Framed::new(stream, frame_codec());
    while let Some(frame) = framed.next().await {
        match frame {
            Ok(frame) => match decode_frame(&frame.freeze()) {
                Ok(inbound) => {
                    if tx.send(inbound).is_err() {
                        return;
                    }
                }
                Err(e) => warn!("Dropping unroutable frame from {}: {}", peer, e),
            },
            Err(e) => {
                debug!("Connection from {} closed: {}", peer, e);
                return;
            }
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn deliver(&self, exchange: &str, inbound: Inbound) -> Result<(), TransportError> {
        let frame = encode_frame(&inbound);
        let slot = self.slot(exchange);
        let mut cached = slot.lock().await;

        if let Some(conn) = cached.as_mut() {
            match conn.send(frame.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    // Cached connection may have been closed by the peer; redial once
                    debug!("Send to {} failed ({}), reconnecting", exchange, e);
                    *cached = None;
                }
            }
        }

        let mut conn = self.connect(exchange).await?;
        conn.send(frame)
            .await
            .map_err(|source| TransportError::Send {
                exchange: exchange.to_string(),
                source,
            })?;
        *cached = Some(conn);
        Ok(())
    }
}
