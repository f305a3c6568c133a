//! Nimbus Storage - content blob storage
//!
//! Whole-object content is stored as one file per archived version of a
//! (namespace, key) under a content root, committed through a
//! write / fsync / rename / fsync-directory fence.

pub mod content;
pub mod layout;

pub use content::{CommittedBlob, ContentError, ContentResult, ContentStore};
pub use layout::{BlobVersion, ContentLayout};
