//! Nimbus Client - internal service clients
//!
//! This crate provides reply correlation, clients for the segment writer and
//! the metadata store, and quorum reads across metadata store replicas.

pub mod error;
pub mod meta;
pub mod quorum;
pub mod router;
pub mod writer;

// Re-exports
pub use error::{ClientError, ClientResult};
pub use meta::{MetaClient, MetaReplica};
pub use quorum::{QuorumAggregator, QuorumError, SpaceUsageGetter};
pub use router::{PendingReply, ReplyRouter};
pub use writer::WriterClient;
