//! Core type definitions for Nimbus
//!
//! Identifiers shared by the writer, the metadata store and their clients.

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Namespace (avatar / account) identifier
///
/// Every namespace has its own key space and its own metadata index.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize, Display, From,
    Into,
)]
#[display("{_0}")]
pub struct NamespaceId(u64);

impl NamespaceId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Fixed-width hex form used for on-disk names
    #[must_use]
    pub fn to_hex(self) -> String {
        format!("{:016x}", self.0)
    }
}

/// Request correlation id
///
/// 16 raw bytes on the wire; displayed as 32 lower-case hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId([u8; 16]);

impl RequestId {
    /// Generate a new random request id
    #[must_use]
    pub fn new() -> Self {
        Self(*Uuid::new_v4().as_bytes())
    }

    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        Self(*uuid.as_bytes())
    }
}

impl FromStr for RequestId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({})", self.to_hex())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Where a service should deliver its reply
///
/// `exchange` is the opaque transport address; `routing_key` is the token the
/// receiving process uses to recognise the reply. Both are used verbatim.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct ReplyAddress {
    pub exchange: String,
    pub routing_key: String,
}

impl ReplyAddress {
    pub fn new(exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
        }
    }
}

impl fmt::Display for ReplyAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.exchange, self.routing_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_hex_roundtrip() {
        let id = RequestId::new();
        let hex = id.to_hex();
        assert_eq!(hex.len(), 32);

        let parsed: RequestId = hex.parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_request_id_rejects_bad_hex() {
        assert!("not-hex".parse::<RequestId>().is_err());
        assert!("abcd".parse::<RequestId>().is_err());
    }

    #[test]
    fn test_namespace_hex_is_fixed_width() {
        assert_eq!(NamespaceId::new(1).to_hex(), "0000000000000001");
        assert_eq!(NamespaceId::new(u64::MAX).to_hex(), "ffffffffffffffff");
    }

    #[test]
    fn test_reply_address_display() {
        let addr = ReplyAddress::new("127.0.0.1:9300", "writer.insert_reply");
        assert_eq!(addr.to_string(), "127.0.0.1:9300/writer.insert_reply");
    }
}
