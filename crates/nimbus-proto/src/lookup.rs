//! Single-key metadata lookup

use crate::codec::{
    DecodeError, Decoder, ReplyError, ResultCode, put_reply_address, put_result_code, put_str,
};
use crate::record::MetadataRecord;
use bytes::{BufMut, BytesMut};
use nimbus_common::{NamespaceId, ReplyAddress, RequestId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLookupRequest {
    pub request_id: RequestId,
    pub namespace: NamespaceId,
    pub key: String,
    pub reply_to: ReplyAddress,
}

impl KeyLookupRequest {
    pub(crate) fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_slice(self.request_id.as_bytes());
        buf.put_u64(self.namespace.get());
        put_str(buf, &self.key);
        put_reply_address(buf, &self.reply_to);
    }

    pub(crate) fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            request_id: dec.request_id()?,
            namespace: NamespaceId::new(dec.u64()?),
            key: dec.string()?,
            reply_to: dec.reply_address()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupErrorKind {
    KeyNotFound,
    StoreFailed,
}

impl ResultCode for LookupErrorKind {
    const MESSAGE: &'static str = "KeyLookupReply";

    fn code(self) -> u8 {
        match self {
            Self::KeyNotFound => 1,
            Self::StoreFailed => 2,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::KeyNotFound),
            2 => Some(Self::StoreFailed),
            _ => None,
        }
    }
}

/// The stored record, tombstones included
#[derive(Debug, Clone, PartialEq)]
pub struct KeyLookupReply {
    pub request_id: RequestId,
    pub outcome: Result<MetadataRecord, ReplyError<LookupErrorKind>>,
}

impl KeyLookupReply {
    pub(crate) fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_slice(self.request_id.as_bytes());
        put_result_code(buf, self.outcome.as_ref().err());
        match &self.outcome {
            Ok(record) => record.encode_into(buf),
            Err(error) => put_str(buf, &error.message),
        }
    }

    pub(crate) fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        let request_id = dec.request_id()?;
        let outcome = match dec.result_code::<LookupErrorKind>()? {
            None => Ok(MetadataRecord::decode_from(dec)?),
            Some(kind) => Err(ReplyError::new(kind, dec.string()?)),
        };
        Ok(Self {
            request_id,
            outcome,
        })
    }
}
