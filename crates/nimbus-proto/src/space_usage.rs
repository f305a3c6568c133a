//! Namespace space-usage query, fanned out to replicas by the quorum reader

use crate::codec::{
    DecodeError, Decoder, ReplyError, ResultCode, put_reply_address, put_result_code, put_str,
};
use bytes::{BufMut, BytesMut};
use nimbus_common::{NamespaceId, ReplyAddress, RequestId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceUsageRequest {
    pub request_id: RequestId,
    pub namespace: NamespaceId,
    pub reply_to: ReplyAddress,
}

impl SpaceUsageRequest {
    pub(crate) fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_slice(self.request_id.as_bytes());
        buf.put_u64(self.namespace.get());
        put_reply_address(buf, &self.reply_to);
    }

    pub(crate) fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            request_id: dec.request_id()?,
            namespace: NamespaceId::new(dec.u64()?),
            reply_to: dec.reply_address()?,
        })
    }
}

/// Live bytes and live key count of one namespace
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SpaceUsage {
    pub total_size: u64,
    pub live_keys: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpaceUsageErrorKind {
    StoreFailed,
}

impl ResultCode for SpaceUsageErrorKind {
    const MESSAGE: &'static str = "SpaceUsageReply";

    fn code(self) -> u8 {
        match self {
            Self::StoreFailed => 1,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::StoreFailed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceUsageReply {
    pub request_id: RequestId,
    pub outcome: Result<SpaceUsage, ReplyError<SpaceUsageErrorKind>>,
}

impl SpaceUsageReply {
    pub(crate) fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_slice(self.request_id.as_bytes());
        put_result_code(buf, self.outcome.as_ref().err());
        match &self.outcome {
            Ok(usage) => {
                buf.put_u64(usage.total_size);
                buf.put_u64(usage.live_keys);
            }
            Err(error) => put_str(buf, &error.message),
        }
    }

    pub(crate) fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        let request_id = dec.request_id()?;
        let outcome = match dec.result_code::<SpaceUsageErrorKind>()? {
            None => Ok(SpaceUsage {
                total_size: dec.u64()?,
                live_keys: dec.u64()?,
            }),
            Some(kind) => Err(ReplyError::new(kind, dec.string()?)),
        };
        Ok(Self {
            request_id,
            outcome,
        })
    }
}
