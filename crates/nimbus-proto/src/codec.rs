//! Primitive encoders and decoders shared by every message type
//!
//! All integers are big-endian. Strings and byte blobs are prefixed with a
//! 4-byte big-endian length. Decoding never panics: every short read, bad
//! flag or invalid string is reported as a [`DecodeError`].

use bytes::{BufMut, BytesMut};
use nimbus_common::{Checksum, ReplyAddress, RequestId};
use thiserror::Error;

/// Failure to decode a received payload
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("truncated payload: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("empty payload")]
    Empty,

    #[error("unknown message kind {0}")]
    UnknownKind(u8),

    #[error("unknown result code {code} for {message}")]
    UnknownResult { message: &'static str, code: u8 },

    #[error("invalid boolean byte {0}")]
    InvalidBool(u8),

    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    #[error("timestamp is not a finite number")]
    NonFiniteTimestamp,

    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
}

impl From<DecodeError> for nimbus_common::Error {
    fn from(e: DecodeError) -> Self {
        Self::malformed(e.to_string())
    }
}

/// Error kinds carried by a reply's result code
///
/// Code `0` is reserved for success and never maps to a kind.
pub trait ResultCode: Sized + Copy {
    /// Message name used in decode errors
    const MESSAGE: &'static str;

    fn code(self) -> u8;

    fn from_code(code: u8) -> Option<Self>;
}

/// Failure half of a reply: the error kind and its human-readable message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyError<K> {
    pub kind: K,
    pub message: String,
}

impl<K> ReplyError<K> {
    pub fn new(kind: K, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl<K: std::fmt::Debug> std::fmt::Display for ReplyError<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

pub(crate) fn put_str(buf: &mut BytesMut, value: &str) {
    put_blob(buf, value.as_bytes());
}

pub(crate) fn put_blob(buf: &mut BytesMut, value: &[u8]) {
    // Payloads above 4 GiB cannot be framed; callers bound content size first.
    #[allow(clippy::cast_possible_truncation)]
    buf.put_u32(value.len() as u32);
    buf.put_slice(value);
}

pub(crate) fn put_reply_address(buf: &mut BytesMut, address: &ReplyAddress) {
    put_str(buf, &address.exchange);
    put_str(buf, &address.routing_key);
}

pub(crate) fn put_checksum(buf: &mut BytesMut, checksum: &Checksum) {
    buf.put_u32(checksum.adler32);
    buf.put_slice(&checksum.md5);
}

/// Result code byte followed by the error text, or just `0` on success
pub(crate) fn put_result_code<K: ResultCode>(buf: &mut BytesMut, error: Option<&ReplyError<K>>) {
    buf.put_u8(error.map_or(0, |e| e.kind.code()));
}

/// Cursor over a received payload
pub struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    #[must_use]
    pub const fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.buf.len() < n {
            return Err(DecodeError::Truncated {
                needed: n,
                remaining: self.buf.len(),
            });
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn bool(&mut self) -> Result<bool, DecodeError> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(DecodeError::InvalidBool(other)),
        }
    }

    pub fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    pub fn f64(&mut self) -> Result<f64, DecodeError> {
        Ok(f64::from_be_bytes(self.array()?))
    }

    /// Version timestamp; NaN and infinities would break version ordering
    pub fn timestamp(&mut self) -> Result<f64, DecodeError> {
        let value = self.f64()?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(DecodeError::NonFiniteTimestamp)
        }
    }

    pub fn request_id(&mut self) -> Result<RequestId, DecodeError> {
        Ok(RequestId::from_bytes(self.array()?))
    }

    pub fn checksum(&mut self) -> Result<Checksum, DecodeError> {
        let adler32 = self.u32()?;
        let md5 = self.array()?;
        Ok(Checksum::new(adler32, md5))
    }

    pub fn blob(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    pub fn string(&mut self) -> Result<String, DecodeError> {
        let raw = self.blob()?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidUtf8)
    }

    pub fn reply_address(&mut self) -> Result<ReplyAddress, DecodeError> {
        let exchange = self.string()?;
        let routing_key = self.string()?;
        Ok(ReplyAddress {
            exchange,
            routing_key,
        })
    }

    /// Result code byte: `None` on success, the error kind otherwise
    pub fn result_code<K: ResultCode>(&mut self) -> Result<Option<K>, DecodeError> {
        match self.u8()? {
            0 => Ok(None),
            code => K::from_code(code)
                .map(Some)
                .ok_or(DecodeError::UnknownResult {
                    message: K::MESSAGE,
                    code,
                }),
        }
    }

    /// Fail unless the whole payload was consumed
    pub fn finish(self) -> Result<(), DecodeError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(DecodeError::TrailingBytes(self.buf.len()))
        }
    }
}
