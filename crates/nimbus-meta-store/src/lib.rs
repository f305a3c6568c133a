//! Nimbus Metadata Store - per-namespace versioned key indexes
//!
//! Each namespace has its own redb index mapping keys to their current
//! metadata record. The metadata server keeps a bounded LRU of open indexes.

pub mod cache;
pub mod index;
pub mod tables;

// Re-exports
pub use cache::{CacheStats, IndexCache, LruCache};
pub use index::{MetaStoreError, MetaStoreResult, NamespaceIndex};
