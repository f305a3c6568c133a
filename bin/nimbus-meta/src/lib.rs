//! Nimbus metadata store server
//!
//! Library half of the `nimbus-meta` daemon, split out so other crates can
//! drive the server in process.

pub mod metrics;
pub mod service;

pub use metrics::MetaMetrics;
pub use service::MetaService;
