//! Nimbus segment writer
//!
//! Library half of the `nimbus-writer` daemon, split out so other crates can
//! drive the writer in process.

pub mod metrics;
pub mod service;

pub use metrics::WriterMetrics;
pub use service::SegmentWriter;
