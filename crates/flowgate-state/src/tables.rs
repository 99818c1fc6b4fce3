//! redb table definitions for the flowgate instance store.
//!
//! Both tables are keyed by the caller-assigned service instance id and are
//! always written in the same transaction.

use redb::TableDefinition;

/// Serialized `ServiceInstance` blobs (`service_instance_details`).
pub const INSTANCE_DETAILS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("service_instance_details");

/// Owner-space reference of each instance (`space_id`).
pub const INSTANCE_SPACES: TableDefinition<&str, &str> = TableDefinition::new("space_id");
