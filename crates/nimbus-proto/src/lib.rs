//! Nimbus Protocol - binary wire format and message plumbing
//!
//! This crate defines the messages exchanged between the segment writer,
//! the metadata store and their clients, the metadata record stored per key,
//! and the transport / message-loop seam every service runs on.

pub mod archive;
pub mod codec;
pub mod insert;
pub mod lookup;
pub mod message;
pub mod process;
pub mod record;
pub mod space_usage;
pub mod transport;

pub use archive::{ArchiveErrorKind, ArchiveOutcome, ArchiveReply, ArchiveRequest};
pub use codec::{DecodeError, ReplyError, ResultCode};
pub use insert::{InsertErrorKind, InsertOutcome, MetadataInsertReply, MetadataInsertRequest};
pub use lookup::{KeyLookupReply, KeyLookupRequest, LookupErrorKind};
pub use message::{Message, MessageKind, routing};
pub use process::{Handler, Outgoing};
pub use record::MetadataRecord;
pub use space_usage::{SpaceUsage, SpaceUsageErrorKind, SpaceUsageReply, SpaceUsageRequest};
pub use transport::{Inbound, Inbox, LocalBus, TcpTransport, Transport, TransportError};
