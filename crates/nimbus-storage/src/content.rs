//! Content blob store
//!
//! A blob becomes visible at its final path only through the durability
//! fence: write to the staging file, fsync it, rename to the final path,
//! fsync the directory. A failure at any step leaves nothing at the final
//! path that this commit put there.
//!
//! Final paths are per version, so a commit never replaces a blob that an
//! index record may still reference. Older versions are dropped with
//! [`ContentStore::prune_older`] once something newer is indexed.

use crate::layout::{BlobVersion, ContentLayout};
use nimbus_common::{Checksum, NamespaceId};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("{op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("content too large: {0} bytes")]
    TooLarge(usize),

    #[error("no content at {}", .0.display())]
    NotFound(PathBuf),

    #[error("checksum mismatch for {}: expected {expected}, got {actual}", path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: Checksum,
        actual: Checksum,
    },
}

pub type ContentResult<T> = Result<T, ContentError>;

fn io_error(op: &'static str, path: &Path) -> impl FnOnce(io::Error) -> ContentError {
    let path = path.to_path_buf();
    move |source| ContentError::Io { op, path, source }
}

/// A blob that has passed the durability fence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedBlob {
    pub path: PathBuf,
    /// Name relative to the content root
    pub file_name: String,
    pub size: u32,
}

pub struct ContentStore {
    layout: ContentLayout,
}

impl ContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            layout: ContentLayout::new(root),
        }
    }

    #[must_use]
    pub const fn layout(&self) -> &ContentLayout {
        &self.layout
    }

    /// Stage `data` and durably move it to the final path of `version`
    pub fn commit(
        &self,
        namespace: NamespaceId,
        key: &str,
        version: &BlobVersion,
        data: &[u8],
    ) -> ContentResult<CommittedBlob> {
        let size = u32::try_from(data.len()).map_err(|_| ContentError::TooLarge(data.len()))?;

        let dir = self.layout.key_dir(namespace, key);
        let new_dir = !dir.is_dir();
        fs::create_dir_all(&dir).map_err(io_error("create directory", &dir))?;

        let staging = self.layout.staging_path(namespace, key, version);
        let path = self.layout.content_path(namespace, key, version);

        if let Err(e) = write_synced(&staging, data) {
            let _ = fs::remove_file(&staging);
            return Err(e);
        }

        if let Err(source) = fs::rename(&staging, &path) {
            let _ = fs::remove_file(&staging);
            return Err(ContentError::Io {
                op: "rename",
                path,
                source,
            });
        }

        let synced = sync_dir(&dir).and_then(|()| {
            if new_dir {
                sync_dir(&self.layout.namespace_dir(namespace))
            } else {
                Ok(())
            }
        });
        if let Err(e) = synced {
            // The rename may not survive a crash; don't leave it visible
            let _ = fs::remove_file(&path);
            return Err(e);
        }

        debug!("Committed {} bytes to {}", size, path.display());
        Ok(CommittedBlob {
            path,
            file_name: ContentLayout::file_name(namespace, key, version),
            size,
        })
    }

    /// Delete one committed blob by its record `file_name`
    ///
    /// Returns `false` if there was nothing to delete.
    pub fn remove(&self, file_name: &str) -> ContentResult<bool> {
        let path = self.layout.resolve(file_name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("No content to remove at {}", path.display());
                Ok(false)
            }
            Err(source) => Err(ContentError::Io {
                op: "remove",
                path,
                source,
            }),
        }
    }

    /// Committed versions of (namespace, key), oldest first
    pub fn versions(&self, namespace: NamespaceId, key: &str) -> ContentResult<Vec<BlobVersion>> {
        let dir = self.layout.key_dir(namespace, key);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(ContentError::Io {
                    op: "list",
                    path: dir,
                    source,
                });
            }
        };

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(io_error("list", &dir))?;
            if let Some(version) = entry.file_name().to_str().and_then(BlobVersion::parse) {
                versions.push(version);
            }
        }
        versions.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        Ok(versions)
    }

    /// Delete every committed version of (namespace, key) strictly older than `timestamp`
    ///
    /// Staging files are left alone; they belong to commits still in flight.
    pub fn prune_older(
        &self,
        namespace: NamespaceId,
        key: &str,
        timestamp: f64,
    ) -> ContentResult<usize> {
        let mut removed = 0;
        for version in self.versions(namespace, key)? {
            if version.timestamp >= timestamp {
                break;
            }
            let path = self.layout.content_path(namespace, key, &version);
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(ContentError::Io {
                        op: "remove",
                        path,
                        source,
                    });
                }
            }
        }
        if removed > 0 {
            debug!("Pruned {} superseded version(s) of {:?}", removed, key);
        }
        Ok(removed)
    }

    #[must_use]
    pub fn exists(&self, file_name: &str) -> bool {
        self.layout.resolve(file_name).is_file()
    }

    pub fn read(&self, file_name: &str) -> ContentResult<Vec<u8>> {
        let path = self.layout.resolve(file_name);
        fs::read(&path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                ContentError::NotFound(path.clone())
            } else {
                ContentError::Io {
                    op: "read",
                    path: path.clone(),
                    source,
                }
            }
        })
    }

    /// Read a committed blob and check it against its recorded checksums
    pub fn read_verified(&self, file_name: &str, expected: &Checksum) -> ContentResult<Vec<u8>> {
        let data = self.read(file_name)?;
        if !expected.verify(&data) {
            return Err(ContentError::ChecksumMismatch {
                path: self.layout.resolve(file_name),
                expected: *expected,
                actual: Checksum::compute(&data),
            });
        }
        Ok(data)
    }
}

fn write_synced(path: &Path, data: &[u8]) -> ContentResult<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(io_error("create", path))?;
    file.write_all(data).map_err(io_error("write", path))?;
    file.sync_all().map_err(io_error("fsync", path))
}

fn sync_dir(dir: &Path) -> ContentResult<()> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(io_error("fsync directory", dir))
}
