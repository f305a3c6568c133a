//! Content directory layout
//!
//! ```text
//! <content_root>/
//!   <namespace as 16 hex digits>/
//!     <sha256(key) hex>/
//!       <version>          committed content blob
//!       <version>.tmp      staging file, same directory
//! ```
//!
//! Every archived version of a key gets its own blob, named from the
//! version's timestamp and request id. A version only stops being needed
//! once the index holds something newer, so blobs are never replaced in
//! place. Staging in the same directory keeps the final rename on one
//! filesystem.

use nimbus_common::{NamespaceId, RequestId};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};

/// Suffix of a staging file
pub const STAGING_SUFFIX: &str = ".tmp";

/// Identity of one archived version of a key
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlobVersion {
    pub timestamp: f64,
    pub request_id: RequestId,
}

impl BlobVersion {
    #[must_use]
    pub const fn new(timestamp: f64, request_id: RequestId) -> Self {
        Self {
            timestamp,
            request_id,
        }
    }

    /// Parse a committed blob's file name; staging files and strangers give `None`
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let (bits, request_id) = name.split_once('-')?;
        if bits.len() != 16 {
            return None;
        }
        let bits = u64::from_str_radix(bits, 16).ok()?;
        let request_id = request_id.parse().ok()?;
        Some(Self::new(f64::from_bits(bits), request_id))
    }
}

/// `<timestamp bits as 16 hex digits>-<request id hex>`
impl fmt::Display for BlobVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:016x}-{}",
            self.timestamp.to_bits(),
            self.request_id.to_hex()
        )
    }
}

#[derive(Clone, Debug)]
pub struct ContentLayout {
    root: PathBuf,
}

impl ContentLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn namespace_dir(&self, namespace: NamespaceId) -> PathBuf {
        self.root.join(namespace.to_hex())
    }

    /// Directory holding every version of `key`
    #[must_use]
    pub fn key_dir(&self, namespace: NamespaceId, key: &str) -> PathBuf {
        self.namespace_dir(namespace).join(key_digest(key))
    }

    /// Blob name relative to the content root, as stored in metadata records
    #[must_use]
    pub fn file_name(namespace: NamespaceId, key: &str, version: &BlobVersion) -> String {
        format!("{}/{}/{}", namespace.to_hex(), key_digest(key), version)
    }

    #[must_use]
    pub fn content_path(&self, namespace: NamespaceId, key: &str, version: &BlobVersion) -> PathBuf {
        self.key_dir(namespace, key).join(version.to_string())
    }

    #[must_use]
    pub fn staging_path(&self, namespace: NamespaceId, key: &str, version: &BlobVersion) -> PathBuf {
        self.key_dir(namespace, key)
            .join(format!("{version}{STAGING_SUFFIX}"))
    }

    /// Resolve a record's `file_name` back to an absolute path
    #[must_use]
    pub fn resolve(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }
}

fn key_digest(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(timestamp: f64) -> BlobVersion {
        BlobVersion::new(timestamp, RequestId::from_bytes([7; 16]))
    }

    #[test]
    fn test_paths_are_deterministic() {
        let layout = ContentLayout::new("/data");
        let ns = NamespaceId::new(1);
        let v = version(100.0);

        let a = layout.content_path(ns, "foo", &v);
        assert_eq!(a, layout.content_path(ns, "foo", &v));
        assert_ne!(a, layout.content_path(ns, "bar", &v));
        assert_ne!(a, layout.content_path(NamespaceId::new(2), "foo", &v));
        assert!(a.starts_with("/data/0000000000000001"));
    }

    #[test]
    fn test_versions_of_a_key_do_not_collide() {
        let layout = ContentLayout::new("/data");
        let ns = NamespaceId::new(1);

        let a = layout.content_path(ns, "foo", &version(100.0));
        let b = layout.content_path(ns, "foo", &version(200.0));
        let c = layout.content_path(
            ns,
            "foo",
            &BlobVersion::new(100.0, RequestId::from_bytes([8; 16])),
        );
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.parent(), b.parent());
    }

    #[test]
    fn test_staging_is_sibling_of_content() {
        let layout = ContentLayout::new("/data");
        let ns = NamespaceId::new(7);
        let v = version(1.5);

        let content = layout.content_path(ns, "a/b/../c", &v);
        let staging = layout.staging_path(ns, "a/b/../c", &v);
        assert_eq!(content.parent(), staging.parent());
        assert!(staging.to_string_lossy().ends_with(STAGING_SUFFIX));
    }

    #[test]
    fn test_version_name_parses_back() {
        let v = version(1_700_000_000.25);
        assert_eq!(BlobVersion::parse(&v.to_string()), Some(v));
        assert_eq!(BlobVersion::parse(&format!("{v}{STAGING_SUFFIX}")), None);
        assert_eq!(BlobVersion::parse("notes.txt"), None);
    }

    #[test]
    fn test_file_name_resolves_to_content_path() {
        let layout = ContentLayout::new("/data");
        let ns = NamespaceId::new(3);
        let v = version(9.0);
        let name = ContentLayout::file_name(ns, "key", &v);
        assert_eq!(layout.resolve(&name), layout.content_path(ns, "key", &v));
    }
}
