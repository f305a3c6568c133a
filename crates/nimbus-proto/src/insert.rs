//! Metadata insert request (writer to metadata store) and its reply

use crate::codec::{
    DecodeError, Decoder, ReplyError, ResultCode, put_reply_address, put_result_code, put_str,
};
use crate::record::MetadataRecord;
use bytes::{BufMut, BytesMut};
use nimbus_common::{NamespaceId, ReplyAddress, RequestId};

/// Record `record` as the current version of `key`
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataInsertRequest {
    pub request_id: RequestId,
    pub namespace: NamespaceId,
    pub reply_to: ReplyAddress,
    pub key: String,
    pub record: MetadataRecord,
}

impl MetadataInsertRequest {
    pub(crate) fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_slice(self.request_id.as_bytes());
        buf.put_u64(self.namespace.get());
        put_reply_address(buf, &self.reply_to);
        put_str(buf, &self.key);
        self.record.encode_into(buf);
    }

    pub(crate) fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            request_id: dec.request_id()?,
            namespace: NamespaceId::new(dec.u64()?),
            reply_to: dec.reply_address()?,
            key: dec.string()?,
            record: MetadataRecord::decode_from(dec)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InsertErrorKind {
    /// Incoming timestamp is older than the stored record
    InvalidDuplicate,
    StoreFailed,
}

impl ResultCode for InsertErrorKind {
    const MESSAGE: &'static str = "MetadataInsertReply";

    fn code(self) -> u8 {
        match self {
            Self::InvalidDuplicate => 1,
            Self::StoreFailed => 2,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::InvalidDuplicate),
            2 => Some(Self::StoreFailed),
            _ => None,
        }
    }
}

/// Outcome of an insert: the superseded live size on success
pub type InsertOutcome = Result<u64, ReplyError<InsertErrorKind>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataInsertReply {
    pub request_id: RequestId,
    pub outcome: InsertOutcome,
}

impl MetadataInsertReply {
    #[must_use]
    pub const fn stored(request_id: RequestId, previous_size: u64) -> Self {
        Self {
            request_id,
            outcome: Ok(previous_size),
        }
    }

    pub fn failed(request_id: RequestId, kind: InsertErrorKind, message: impl Into<String>) -> Self {
        Self {
            request_id,
            outcome: Err(ReplyError::new(kind, message)),
        }
    }

    pub(crate) fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_slice(self.request_id.as_bytes());
        put_result_code(buf, self.outcome.as_ref().err());
        match &self.outcome {
            Ok(previous_size) => buf.put_u64(*previous_size),
            Err(error) => {
                buf.put_u64(0);
                put_str(buf, &error.message);
            }
        }
    }

    pub(crate) fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        let request_id = dec.request_id()?;
        let kind = dec.result_code::<InsertErrorKind>()?;
        let previous_size = dec.u64()?;
        let outcome = match kind {
            None => Ok(previous_size),
            Some(kind) => Err(ReplyError::new(kind, dec.string()?)),
        };
        Ok(Self {
            request_id,
            outcome,
        })
    }
}
