//! Error types for Nimbus
//!
//! Crate-specific errors (decode, transport, index, content, client) live in
//! their own crates and convert into this type where they cross into shared
//! code.

use thiserror::Error;

/// Common result type for Nimbus operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for Nimbus
#[derive(Debug, Error)]
pub enum Error {
    #[error("disk I/O error: {0}")]
    DiskIo(#[from] std::io::Error),

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Create a malformed message error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedMessage(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_display() {
        assert_eq!(
            Error::malformed("short buffer").to_string(),
            "malformed message: short buffer"
        );
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::DiskIo(_)));
        assert!(err.to_string().contains("gone"));
    }
}
