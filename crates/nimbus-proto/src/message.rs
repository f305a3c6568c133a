//! The closed set of messages exchanged between Nimbus processes
//!
//! Every payload starts with a one-byte kind tag followed by the message
//! body. Handlers dispatch with a `match` over [`Message`], so adding a
//! variant is a compile error until every process decides what to do with it.

use crate::archive::{ArchiveReply, ArchiveRequest};
use crate::codec::{DecodeError, Decoder};
use crate::insert::{MetadataInsertReply, MetadataInsertRequest};
use crate::lookup::{KeyLookupReply, KeyLookupRequest};
use crate::space_usage::{SpaceUsageReply, SpaceUsageRequest};
use bytes::{BufMut, Bytes, BytesMut};
use derive_more::From;
use nimbus_common::RequestId;

/// Routing keys used by the Nimbus services
pub mod routing {
    pub const WRITER_ARCHIVE: &str = "writer.archive_key_entire";
    pub const WRITER_INSERT_REPLY: &str = "writer.database_key_insert_reply";
    pub const META_INSERT: &str = "meta.database_key_insert";
    pub const META_SPACE_USAGE: &str = "meta.space_usage";
    pub const META_LOOKUP: &str = "meta.database_key_lookup";
}

/// Kind tag written as the first payload byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    ArchiveRequest = 1,
    ArchiveReply = 2,
    MetadataInsertRequest = 3,
    MetadataInsertReply = 4,
    SpaceUsageRequest = 5,
    SpaceUsageReply = 6,
    KeyLookupRequest = 7,
    KeyLookupReply = 8,
}

impl TryFrom<u8> for MessageKind {
    type Error = DecodeError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Ok(match tag {
            1 => Self::ArchiveRequest,
            2 => Self::ArchiveReply,
            3 => Self::MetadataInsertRequest,
            4 => Self::MetadataInsertReply,
            5 => Self::SpaceUsageRequest,
            6 => Self::SpaceUsageReply,
            7 => Self::KeyLookupRequest,
            8 => Self::KeyLookupReply,
            other => return Err(DecodeError::UnknownKind(other)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, From)]
pub enum Message {
    ArchiveRequest(ArchiveRequest),
    ArchiveReply(ArchiveReply),
    MetadataInsertRequest(MetadataInsertRequest),
    MetadataInsertReply(MetadataInsertReply),
    SpaceUsageRequest(SpaceUsageRequest),
    SpaceUsageReply(SpaceUsageReply),
    KeyLookupRequest(KeyLookupRequest),
    KeyLookupReply(KeyLookupReply),
}

impl Message {
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::ArchiveRequest(_) => MessageKind::ArchiveRequest,
            Self::ArchiveReply(_) => MessageKind::ArchiveReply,
            Self::MetadataInsertRequest(_) => MessageKind::MetadataInsertRequest,
            Self::MetadataInsertReply(_) => MessageKind::MetadataInsertReply,
            Self::SpaceUsageRequest(_) => MessageKind::SpaceUsageRequest,
            Self::SpaceUsageReply(_) => MessageKind::SpaceUsageReply,
            Self::KeyLookupRequest(_) => MessageKind::KeyLookupRequest,
            Self::KeyLookupReply(_) => MessageKind::KeyLookupReply,
        }
    }

    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        match self {
            Self::ArchiveRequest(m) => m.request_id,
            Self::ArchiveReply(m) => m.request_id,
            Self::MetadataInsertRequest(m) => m.request_id,
            Self::MetadataInsertReply(m) => m.request_id,
            Self::SpaceUsageRequest(m) => m.request_id,
            Self::SpaceUsageReply(m) => m.request_id,
            Self::KeyLookupRequest(m) => m.request_id,
            Self::KeyLookupReply(m) => m.request_id,
        }
    }

    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u8(self.kind() as u8);
        match self {
            Self::ArchiveRequest(m) => m.encode_into(&mut buf),
            Self::ArchiveReply(m) => m.encode_into(&mut buf),
            Self::MetadataInsertRequest(m) => m.encode_into(&mut buf),
            Self::MetadataInsertReply(m) => m.encode_into(&mut buf),
            Self::SpaceUsageRequest(m) => m.encode_into(&mut buf),
            Self::SpaceUsageReply(m) => m.encode_into(&mut buf),
            Self::KeyLookupRequest(m) => m.encode_into(&mut buf),
            Self::KeyLookupReply(m) => m.encode_into(&mut buf),
        }
        buf.freeze()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let (&tag, body) = payload.split_first().ok_or(DecodeError::Empty)?;
        let mut dec = Decoder::new(body);
        let message = match MessageKind::try_from(tag)? {
            MessageKind::ArchiveRequest => ArchiveRequest::decode_from(&mut dec)?.into(),
            MessageKind::ArchiveReply => ArchiveReply::decode_from(&mut dec)?.into(),
            MessageKind::MetadataInsertRequest => {
                MetadataInsertRequest::decode_from(&mut dec)?.into()
            }
            MessageKind::MetadataInsertReply => MetadataInsertReply::decode_from(&mut dec)?.into(),
            MessageKind::SpaceUsageRequest => SpaceUsageRequest::decode_from(&mut dec)?.into(),
            MessageKind::SpaceUsageReply => SpaceUsageReply::decode_from(&mut dec)?.into(),
            MessageKind::KeyLookupRequest => KeyLookupRequest::decode_from(&mut dec)?.into(),
            MessageKind::KeyLookupReply => KeyLookupReply::decode_from(&mut dec)?.into(),
        };
        dec.finish()?;
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveErrorKind;
    use crate::codec::ReplyError;
    use crate::insert::InsertErrorKind;
    use crate::lookup::LookupErrorKind;
    use crate::record::MetadataRecord;
    use crate::space_usage::{SpaceUsage, SpaceUsageErrorKind};
    use nimbus_common::{Checksum, NamespaceId, ReplyAddress};

    fn reply_to() -> ReplyAddress {
        ReplyAddress::new("127.0.0.1:9300", routing::WRITER_INSERT_REPLY)
    }

    fn roundtrip(message: Message) {
        let encoded = message.encode();
        assert_eq!(encoded[0], message.kind() as u8);
        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(decoded, message);
    }

    fn record() -> MetadataRecord {
        MetadataRecord::live(100.0, 0, 5, Checksum::compute(b"hello"), "ns/foo")
    }

    #[test]
    fn test_roundtrip_every_kind() {
        let id = RequestId::new();
        let ns = NamespaceId::new(1001);

        roundtrip(
            ArchiveRequest {
                request_id: id,
                namespace: ns,
                timestamp: 100.5,
                segment_number: 0,
                checksum: Checksum::compute(b"hello"),
                key: "foo".into(),
                content: Bytes::from_static(b"hello"),
                reply_to: reply_to(),
            }
            .into(),
        );
        roundtrip(ArchiveReply::stored(id, 5).into());
        roundtrip(ArchiveReply::failed(id, ArchiveErrorKind::WriteFailed, "disk full").into());
        roundtrip(
            MetadataInsertRequest {
                request_id: id,
                namespace: ns,
                reply_to: reply_to(),
                key: "foo".into(),
                record: record(),
            }
            .into(),
        );
        roundtrip(MetadataInsertReply::stored(id, 0).into());
        roundtrip(
            MetadataInsertReply::failed(id, InsertErrorKind::InvalidDuplicate, "older").into(),
        );
        roundtrip(
            SpaceUsageRequest {
                request_id: id,
                namespace: ns,
                reply_to: reply_to(),
            }
            .into(),
        );
        roundtrip(
            SpaceUsageReply {
                request_id: id,
                outcome: Ok(SpaceUsage {
                    total_size: 500,
                    live_keys: 2,
                }),
            }
            .into(),
        );
        roundtrip(
            SpaceUsageReply {
                request_id: id,
                outcome: Err(ReplyError::new(SpaceUsageErrorKind::StoreFailed, "no fd")),
            }
            .into(),
        );
        roundtrip(
            KeyLookupRequest {
                request_id: id,
                namespace: ns,
                key: "foo".into(),
                reply_to: reply_to(),
            }
            .into(),
        );
        roundtrip(
            KeyLookupReply {
                request_id: id,
                outcome: Ok(record()),
            }
            .into(),
        );
        roundtrip(
            KeyLookupReply {
                request_id: id,
                outcome: Err(ReplyError::new(LookupErrorKind::KeyNotFound, "foo")),
            }
            .into(),
        );
    }

    #[test]
    fn test_roundtrip_empty_strings_and_max_integers() {
        roundtrip(
            ArchiveRequest {
                request_id: RequestId::from_bytes([0xff; 16]),
                namespace: NamespaceId::new(u64::MAX),
                timestamp: 0.0,
                segment_number: u8::MAX,
                checksum: Checksum::new(u32::MAX, [0xff; 16]),
                key: String::new(),
                content: Bytes::new(),
                reply_to: ReplyAddress::new("", ""),
            }
            .into(),
        );
        roundtrip(ArchiveReply::stored(RequestId::new(), u64::MAX).into());
        roundtrip(ArchiveReply::failed(RequestId::new(), ArchiveErrorKind::StoreFailed, "").into());
    }

    #[test]
    fn test_success_reply_has_no_error_field() {
        let id = RequestId::new();
        let encoded = Message::from(MetadataInsertReply::stored(id, 7)).encode();
        // tag + id + result + previous_size
        assert_eq!(encoded.len(), 1 + 16 + 1 + 8);

        let failed = Message::from(MetadataInsertReply::failed(
            id,
            InsertErrorKind::StoreFailed,
            "boom",
        ))
        .encode();
        assert_eq!(failed.len(), 1 + 16 + 1 + 8 + 4 + 4);
    }

    #[test]
    fn test_malformed_payloads() {
        assert_eq!(Message::decode(&[]), Err(DecodeError::Empty));
        assert_eq!(Message::decode(&[42]), Err(DecodeError::UnknownKind(42)));

        let encoded = Message::from(ArchiveReply::stored(RequestId::new(), 1)).encode();
        assert!(matches!(
            Message::decode(&encoded[..encoded.len() - 1]),
            Err(DecodeError::Truncated { .. })
        ));

        let mut trailing = encoded.to_vec();
        trailing.push(0);
        assert_eq!(
            Message::decode(&trailing),
            Err(DecodeError::TrailingBytes(1))
        );

        let mut bad_code = encoded.to_vec();
        bad_code[17] = 9;
        assert!(matches!(
            Message::decode(&bad_code),
            Err(DecodeError::UnknownResult { code: 9, .. })
        ));
    }

    #[test]
    fn test_nan_timestamp_is_malformed() {
        let archive = Message::from(ArchiveRequest {
            request_id: RequestId::new(),
            namespace: NamespaceId::new(1),
            timestamp: f64::NAN,
            segment_number: 0,
            checksum: Checksum::compute(b"hello"),
            key: "foo".into(),
            content: Bytes::from_static(b"hello"),
            reply_to: reply_to(),
        });
        assert_eq!(
            Message::decode(&archive.encode()),
            Err(DecodeError::NonFiniteTimestamp)
        );

        let insert = Message::from(MetadataInsertRequest {
            request_id: RequestId::new(),
            namespace: NamespaceId::new(1),
            reply_to: reply_to(),
            key: "foo".into(),
            record: MetadataRecord {
                timestamp: f64::INFINITY,
                ..record()
            },
        });
        assert_eq!(
            Message::decode(&insert.encode()),
            Err(DecodeError::NonFiniteTimestamp)
        );
    }
}
