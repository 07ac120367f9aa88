//! redb table definitions for the registry.
//!
//! Record tables use `&str` keys and `&[u8]` values (JSON-serialized
//! records). The meta table holds the append counter that orders records.

use redb::TableDefinition;

/// Deployment records keyed by deployment id.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// Release records keyed by release id.
pub const RELEASES: TableDefinition<&str, &[u8]> = TableDefinition::new("releases");

/// Rollback entries keyed by rollback id.
pub const ROLLBACKS: TableDefinition<&str, &[u8]> = TableDefinition::new("rollbacks");

/// Pre-rollback snapshots keyed by rollback id.
pub const SNAPSHOTS: TableDefinition<&str, &[u8]> = TableDefinition::new("snapshots");

/// Counters keyed by name.
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Key in [`META`] holding the last assigned append sequence.
pub const SEQUENCE_KEY: &str = "sequence";
