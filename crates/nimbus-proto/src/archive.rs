//! Whole-object archive request and its reply

use crate::codec::{
    DecodeError, Decoder, ReplyError, ResultCode, put_blob, put_checksum, put_reply_address,
    put_result_code, put_str,
};
use crate::insert::InsertErrorKind;
use bytes::{BufMut, Bytes, BytesMut};
use nimbus_common::{Checksum, NamespaceId, ReplyAddress, RequestId};

/// Archive an entire key's content in one message
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveRequest {
    pub request_id: RequestId,
    pub namespace: NamespaceId,
    pub timestamp: f64,
    pub segment_number: u8,
    pub checksum: Checksum,
    pub key: String,
    pub content: Bytes,
    pub reply_to: ReplyAddress,
}

impl ArchiveRequest {
    pub(crate) fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_slice(self.request_id.as_bytes());
        buf.put_u64(self.namespace.get());
        buf.put_f64(self.timestamp);
        buf.put_u8(self.segment_number);
        put_checksum(buf, &self.checksum);
        put_str(buf, &self.key);
        put_blob(buf, &self.content);
        put_reply_address(buf, &self.reply_to);
    }

    pub(crate) fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            request_id: dec.request_id()?,
            namespace: NamespaceId::new(dec.u64()?),
            timestamp: dec.timestamp()?,
            segment_number: dec.u8()?,
            checksum: dec.checksum()?,
            key: dec.string()?,
            content: Bytes::copy_from_slice(dec.blob()?),
            reply_to: dec.reply_address()?,
        })
    }
}

/// Why an archive request failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveErrorKind {
    /// Correlation id already in flight
    DuplicateRequest,
    /// Staging or durability fence failed
    WriteFailed,
    /// Metadata store refused an out-of-order timestamp
    InvalidDuplicate,
    /// Metadata store could not open or write the namespace index
    StoreFailed,
}

impl ResultCode for ArchiveErrorKind {
    const MESSAGE: &'static str = "ArchiveReply";

    fn code(self) -> u8 {
        match self {
            Self::DuplicateRequest => 1,
            Self::WriteFailed => 2,
            Self::InvalidDuplicate => 3,
            Self::StoreFailed => 4,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::DuplicateRequest),
            2 => Some(Self::WriteFailed),
            3 => Some(Self::InvalidDuplicate),
            4 => Some(Self::StoreFailed),
            _ => None,
        }
    }
}

impl From<InsertErrorKind> for ArchiveErrorKind {
    fn from(kind: InsertErrorKind) -> Self {
        match kind {
            InsertErrorKind::InvalidDuplicate => Self::InvalidDuplicate,
            InsertErrorKind::StoreFailed => Self::StoreFailed,
        }
    }
}

/// Outcome of an archive: the superseded size on success
pub type ArchiveOutcome = Result<u64, ReplyError<ArchiveErrorKind>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveReply {
    pub request_id: RequestId,
    pub outcome: ArchiveOutcome,
}

impl ArchiveReply {
    #[must_use]
    pub const fn stored(request_id: RequestId, previous_size: u64) -> Self {
        Self {
            request_id,
            outcome: Ok(previous_size),
        }
    }

    pub fn failed(request_id: RequestId, kind: ArchiveErrorKind, message: impl Into<String>) -> Self {
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
        let kind = dec.result_code::<ArchiveErrorKind>()?;
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
