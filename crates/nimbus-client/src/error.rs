//! Client error types

use nimbus_common::RequestId;
use nimbus_proto::{MessageKind, TransportError};
use thiserror::Error;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("request {0} is already awaiting a reply")]
    DuplicateRequest(RequestId),

    #[error("no reply within {0:?}")]
    Timeout(std::time::Duration),

    #[error("reply channel closed")]
    Disconnected,

    #[error("unexpected reply {0:?}")]
    UnexpectedReply(MessageKind),

    #[error("request rejected ({kind}): {message}")]
    Rejected { kind: String, message: String },
}

impl ClientError {
    pub(crate) fn rejected<K: std::fmt::Debug>(error: nimbus_proto::ReplyError<K>) -> Self {
        Self::Rejected {
            kind: format!("{:?}", error.kind),
            message: error.message,
        }
    }
}
