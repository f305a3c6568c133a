//! Checksum utilities for Nimbus
//!
//! Every stored segment carries an Adler-32 and an MD5 of its content so a
//! reader can verify integrity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Checksum values computed for a segment of data
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum {
    /// Adler-32 (fast, for inline verification)
    pub adler32: u32,
    /// MD5 digest of the content
    pub md5: [u8; 16],
}

impl Checksum {
    #[must_use]
    pub const fn new(adler32: u32, md5: [u8; 16]) -> Self {
        Self { adler32, md5 }
    }

    /// Compute checksum from data
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self {
            adler32: compute_adler32(data),
            md5: compute_md5(data),
        }
    }

    /// Verify data against this checksum
    #[must_use]
    pub fn verify(&self, data: &[u8]) -> bool {
        Self::compute(data) == *self
    }

    /// MD5 digest as lower-case hex
    #[must_use]
    pub fn md5_hex(&self) -> String {
        hex::encode(self.md5)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "adler32={:08x} md5={}", self.adler32, self.md5_hex())
    }
}

/// Streaming checksum calculator
pub struct ChecksumCalculator {
    adler32: adler::Adler32,
    md5: md5::Context,
}

impl ChecksumCalculator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            adler32: adler::Adler32::new(),
            md5: md5::Context::new(),
        }
    }

    /// Update the calculator with more data
    pub fn update(&mut self, data: &[u8]) {
        self.adler32.write_slice(data);
        self.md5.consume(data);
    }

    /// Finalize and return the computed checksum
    #[must_use]
    pub fn finalize(self) -> Checksum {
        Checksum {
            adler32: self.adler32.checksum(),
            md5: self.md5.compute().0,
        }
    }
}

impl Default for ChecksumCalculator {
    fn default() -> Self {
        Self::new()
    }
}

/// Quick Adler-32 computation
#[inline]
#[must_use]
pub fn compute_adler32(data: &[u8]) -> u32 {
    let mut adler = adler::Adler32::new();
    adler.write_slice(data);
    adler.checksum()
}

/// Compute MD5 digest
#[must_use]
pub fn compute_md5(data: &[u8]) -> [u8; 16] {
    md5::compute(data).0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_values() {
        // Reference values for "Wikipedia" / "" from the algorithm definitions
        assert_eq!(compute_adler32(b"Wikipedia"), 0x11E6_0398);
        assert_eq!(compute_adler32(b""), 1);
        assert_eq!(
            hex::encode(compute_md5(b"")),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
    }

    #[test]
    fn test_checksum_verify() {
        let data = b"hello, world!";
        let checksum = Checksum::compute(data);

        assert!(checksum.verify(data));
        assert!(!checksum.verify(b"hello, world?"));
    }

    #[test]
    fn test_streaming_calculator() {
        let data = b"hello, world!";
        let expected = Checksum::compute(data);

        let mut calc = ChecksumCalculator::new();
        calc.update(b"hello, ");
        calc.update(b"world!");

        assert_eq!(calc.finalize(), expected);
    }
}
