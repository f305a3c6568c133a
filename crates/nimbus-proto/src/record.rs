//! Metadata record stored in a namespace index
//!
//! One record per (namespace, key) describes the current version of that
//! key: where its content lives, how big it is, its checksums, and whether
//! it has been deleted.
//!
//! Layout (42-byte fixed block, then the file name):
//!
//! ```text
//! timestamp       f64   8
//! is_tombstone    u8    1
//! segment_number  u8    1
//! segment_size    u32   4
//! total_size      u64   8
//! adler32         u32   4
//! md5             [u8]  16
//! file_name       len-prefixed string
//! ```

use crate::codec::{DecodeError, Decoder, put_checksum, put_str};
use bytes::{BufMut, BytesMut};
use nimbus_common::Checksum;

/// Size of the fixed part of an encoded record
pub const RECORD_FIXED_SIZE: usize = 8 + 1 + 1 + 4 + 8 + 4 + 16;

/// Versioned content descriptor for one key
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataRecord {
    /// Version order; authoritative, later wins
    pub timestamp: f64,
    pub is_tombstone: bool,
    pub segment_number: u8,
    pub segment_size: u32,
    pub total_size: u64,
    pub checksum: Checksum,
    /// Content blob location, relative to the content root
    pub file_name: String,
}

impl MetadataRecord {
    /// Record for a whole object stored as a single segment
    #[must_use]
    pub fn live(
        timestamp: f64,
        segment_number: u8,
        size: u32,
        checksum: Checksum,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            is_tombstone: false,
            segment_number,
            segment_size: size,
            total_size: u64::from(size),
            checksum,
            file_name: file_name.into(),
        }
    }

    /// Deletion marker as of `timestamp`
    #[must_use]
    pub fn tombstone(timestamp: f64) -> Self {
        Self {
            timestamp,
            is_tombstone: true,
            segment_number: 0,
            segment_size: 0,
            total_size: 0,
            checksum: Checksum::new(0, [0; 16]),
            file_name: String::new(),
        }
    }

    /// True if this record must not replace `existing`
    ///
    /// Only a strictly older timestamp is refused; tombstone status plays no
    /// part. Equal timestamps are accepted as an idempotent re-insert.
    #[must_use]
    pub fn is_older_than(&self, existing: &Self) -> bool {
        self.timestamp < existing.timestamp
    }

    /// Bytes this record accounts for: zero for a tombstone
    #[must_use]
    pub const fn accounted_size(&self) -> u64 {
        if self.is_tombstone { 0 } else { self.total_size }
    }

    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_f64(self.timestamp);
        buf.put_u8(u8::from(self.is_tombstone));
        buf.put_u8(self.segment_number);
        buf.put_u32(self.segment_size);
        buf.put_u64(self.total_size);
        put_checksum(buf, &self.checksum);
        put_str(buf, &self.file_name);
    }

    pub fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            timestamp: dec.timestamp()?,
            is_tombstone: dec.bool()?,
            segment_number: dec.u8()?,
            segment_size: dec.u32()?,
            total_size: dec.u64()?,
            checksum: dec.checksum()?,
            file_name: dec.string()?,
        })
    }

    /// Standalone encoding, as stored in the index
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(RECORD_FIXED_SIZE + 4 + self.file_name.len());
        self.encode_into(&mut buf);
        buf.to_vec()
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let mut dec = Decoder::new(data);
        let record = Self::decode_from(&mut dec)?;
        dec.finish()?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MetadataRecord {
        MetadataRecord::live(
            1_700_000_000.25,
            0,
            5,
            Checksum::compute(b"hello"),
            "0000000000000001/abcd",
        )
    }

    #[test]
    fn test_fixed_block_size() {
        let record = MetadataRecord {
            file_name: String::new(),
            ..sample()
        };
        assert_eq!(record.to_bytes().len(), RECORD_FIXED_SIZE + 4);
    }

    #[test]
    fn test_roundtrip_extremes() {
        let record = MetadataRecord {
            timestamp: f64::MAX,
            is_tombstone: true,
            segment_number: u8::MAX,
            segment_size: u32::MAX,
            total_size: u64::MAX,
            checksum: Checksum::new(u32::MAX, [0xff; 16]),
            file_name: String::new(),
        };
        assert_eq!(MetadataRecord::from_bytes(&record.to_bytes()).unwrap(), record);

        let record = sample();
        assert_eq!(MetadataRecord::from_bytes(&record.to_bytes()).unwrap(), record);
    }

    #[test]
    fn test_truncated_record_rejected() {
        let bytes = sample().to_bytes();
        assert!(MetadataRecord::from_bytes(&bytes[..RECORD_FIXED_SIZE - 1]).is_err());
        assert!(MetadataRecord::from_bytes(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn test_ordering_ignores_tombstones() {
        let live = sample();
        let older_tombstone = MetadataRecord::tombstone(live.timestamp - 1.0);
        let same_time_tombstone = MetadataRecord::tombstone(live.timestamp);

        assert!(older_tombstone.is_older_than(&live));
        assert!(!same_time_tombstone.is_older_than(&live));
        assert!(!live.is_older_than(&same_time_tombstone));
    }

    #[test]
    fn test_accounted_size() {
        assert_eq!(sample().accounted_size(), 5);
        assert_eq!(MetadataRecord::tombstone(1.0).accounted_size(), 0);
    }
}
