//! Nimbus Common - Shared types and utilities
//!
//! This crate provides common types, error definitions, configuration and
//! checksum helpers used across all Nimbus components.

pub mod checksum;
pub mod config;
pub mod error;
pub mod types;

pub use checksum::{Checksum, ChecksumCalculator, compute_adler32, compute_md5};
pub use config::Config;
pub use error::{Error, Result};
pub use types::*;
