//! Persistent per-namespace index backed by redb.
//!
//! One redb file per namespace maps each key to its current
//! [`MetadataRecord`]. Every insert is a single write transaction committed
//! with redb's default immediate durability, so the record is fsynced before
//! the insert returns.

use crate::tables;
use nimbus_common::NamespaceId;
use nimbus_proto::{DecodeError, MetadataRecord, SpaceUsage};
use redb::{Database, ReadableTable};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Error type for namespace index operations
#[derive(Debug, thiserror::Error)]
pub enum MetaStoreError {
    #[error("redb error: {0}")]
    Database(#[from] redb::DatabaseError),
    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("redb transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt record for key '{key}': {source}")]
    Corrupt {
        key: String,
        #[source]
        source: DecodeError,
    },
    #[error("invalid duplicate: timestamp {incoming} is older than stored {existing}")]
    OutOfOrder { incoming: f64, existing: f64 },
    #[error("invalid timestamp {0}: not a finite number")]
    NonFiniteTimestamp(f64),
}

impl From<redb::TransactionError> for MetaStoreError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Transaction(Box::new(e))
    }
}

impl MetaStoreError {
    /// True for a timestamp rejection, as opposed to a storage failure
    #[must_use]
    pub const fn is_invalid_timestamp(&self) -> bool {
        matches!(self, Self::OutOfOrder { .. } | Self::NonFiniteTimestamp(_))
    }
}

pub type MetaStoreResult<T> = Result<T, MetaStoreError>;

fn read_record<T>(table: &T, key: &str) -> MetaStoreResult<Option<MetadataRecord>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let Some(value) = table.get(key)? else {
        return Ok(None);
    };
    MetadataRecord::from_bytes(value.value())
        .map(Some)
        .map_err(|source| MetaStoreError::Corrupt {
            key: key.to_string(),
            source,
        })
}

/// Open handle on one namespace's index
pub struct NamespaceIndex {
    namespace: NamespaceId,
    path: PathBuf,
    db: Database,
}

impl NamespaceIndex {
    /// Open (or create) the index file at `path`.
    pub fn open(namespace: NamespaceId, path: impl AsRef<Path>) -> MetaStoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Create the table eagerly so read txns on a fresh index don't fail
        let write_txn = db.begin_write()?;
        {
            let _t = write_txn.open_table(tables::RECORDS)?;
        }
        write_txn.commit()?;

        debug!("Opened index for namespace {} at {}", namespace, path.display());
        Ok(Self {
            namespace,
            path: path.to_path_buf(),
            db,
        })
    }

    #[must_use]
    pub const fn namespace(&self) -> NamespaceId {
        self.namespace
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> MetaStoreResult<Option<MetadataRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::RECORDS)?;
        read_record(&table, key)
    }

    /// Store `record` as the current version of `key`.
    ///
    /// Refuses a record strictly older than the stored one, whatever either
    /// side's tombstone flag. Returns the superseded live size: the stored
    /// record's `total_size`, or zero when there was none or it was a
    /// tombstone.
    pub fn insert(&self, key: &str, record: &MetadataRecord) -> MetaStoreResult<u64> {
        // NaN compares false both ways and would pin the key forever
        if !record.timestamp.is_finite() {
            return Err(MetaStoreError::NonFiniteTimestamp(record.timestamp));
        }

        let write_txn = self.db.begin_write()?;
        let existing = {
            let table = write_txn.open_table(tables::RECORDS)?;
            read_record(&table, key)?
        };

        if let Some(existing) = &existing {
            if record.is_older_than(existing) {
                write_txn.abort()?;
                return Err(MetaStoreError::OutOfOrder {
                    incoming: record.timestamp,
                    existing: existing.timestamp,
                });
            }
        }

        {
            let mut table = write_txn.open_table(tables::RECORDS)?;
            table.insert(key, record.to_bytes().as_slice())?;
        }
        write_txn.commit()?;

        Ok(existing.map_or(0, |e| e.accounted_size()))
    }

    /// Live bytes and live key count; tombstones are not counted
    pub fn space_usage(&self) -> MetaStoreResult<SpaceUsage> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::RECORDS)?;
        let mut usage = SpaceUsage::default();
        for entry in table.iter()? {
            let (key, value) = entry?;
            let record = MetadataRecord::from_bytes(value.value()).map_err(|source| {
                MetaStoreError::Corrupt {
                    key: key.value().to_string(),
                    source,
                }
            })?;
            if !record.is_tombstone {
                usage.total_size += record.total_size;
                usage.live_keys += 1;
            }
        }
        Ok(usage)
    }

    /// Release the database file
    pub fn close(self) {
        debug!(
            "Closing index for namespace {} at {}",
            self.namespace,
            self.path.display()
        );
        drop(self.db);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_common::Checksum;
    use tempfile::tempdir;

    fn live(timestamp: f64, size: u32) -> MetadataRecord {
        MetadataRecord::live(timestamp, 0, size, Checksum::compute(b"x"), "ns/key")
    }

    fn open(dir: &Path) -> NamespaceIndex {
        NamespaceIndex::open(NamespaceId::new(1), dir.join("1.redb")).unwrap()
    }

    #[test]
    fn test_insert_reports_previous_live_size() {
        let dir = tempdir().unwrap();
        let index = open(dir.path());

        assert_eq!(index.insert("foo", &live(100.0, 5)).unwrap(), 0);
        assert_eq!(index.insert("foo", &live(200.0, 11)).unwrap(), 5);
        assert_eq!(index.get("foo").unwrap().unwrap().total_size, 11);
    }

    #[test]
    fn test_insert_over_tombstone_reports_zero() {
        let dir = tempdir().unwrap();
        let index = open(dir.path());

        index.insert("foo", &live(100.0, 5)).unwrap();
        assert_eq!(index.insert("foo", &MetadataRecord::tombstone(150.0)).unwrap(), 5);
        assert_eq!(index.insert("foo", &live(200.0, 7)).unwrap(), 0);
    }

    #[test]
    fn test_older_timestamp_rejected_regardless_of_tombstones() {
        let dir = tempdir().unwrap();
        let index = open(dir.path());

        index.insert("live", &live(200.0, 5)).unwrap();
        let err = index.insert("live", &MetadataRecord::tombstone(150.0)).unwrap_err();
        assert!(err.is_invalid_timestamp());
        assert_eq!(index.get("live").unwrap().unwrap().timestamp, 200.0);

        index.insert("dead", &MetadataRecord::tombstone(200.0)).unwrap();
        let err = index.insert("dead", &live(150.0, 5)).unwrap_err();
        assert!(err.is_invalid_timestamp());
        assert!(index.get("dead").unwrap().unwrap().is_tombstone);
    }

    #[test]
    fn test_non_finite_timestamp_rejected() {
        let dir = tempdir().unwrap();
        let index = open(dir.path());

        let err = index.insert("foo", &live(f64::NAN, 5)).unwrap_err();
        assert!(matches!(err, MetaStoreError::NonFiniteTimestamp(_)));
        assert!(index.get("foo").unwrap().is_none());

        index.insert("foo", &live(100.0, 5)).unwrap();
        let err = index.insert("foo", &live(f64::INFINITY, 6)).unwrap_err();
        assert!(err.is_invalid_timestamp());
        assert_eq!(index.insert("foo", &live(200.0, 7)).unwrap(), 5);
    }

    #[test]
    fn test_equal_timestamp_accepted() {
        let dir = tempdir().unwrap();
        let index = open(dir.path());

        index.insert("foo", &MetadataRecord::tombstone(100.0)).unwrap();
        assert_eq!(index.insert("foo", &live(100.0, 9)).unwrap(), 0);
        assert!(!index.get("foo").unwrap().unwrap().is_tombstone);
    }

    #[test]
    fn test_space_usage_skips_tombstones() {
        let dir = tempdir().unwrap();
        let index = open(dir.path());

        index.insert("a", &live(1.0, 100)).unwrap();
        index.insert("b", &live(1.0, 400)).unwrap();
        index.insert("c", &MetadataRecord::tombstone(1.0)).unwrap();

        assert_eq!(
            index.space_usage().unwrap(),
            SpaceUsage {
                total_size: 500,
                live_keys: 2
            }
        );
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempdir().unwrap();
        let index = open(dir.path());
        index.insert("foo", &live(100.0, 5)).unwrap();
        index.close();

        let index = open(dir.path());
        assert_eq!(index.get("foo").unwrap(), Some(live(100.0, 5)));
        assert_eq!(index.get("bar").unwrap(), None);
    }
}
