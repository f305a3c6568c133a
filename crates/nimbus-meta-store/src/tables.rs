//! Redb table definitions for namespace indexes.

use redb::TableDefinition;

// Key: object key, Value: encoded MetadataRecord
pub const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("records");
