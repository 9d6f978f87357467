pub mod block_meta;
pub mod macros;
pub mod signer_cache;

#[cfg(feature = "test_utils")]
pub mod test_utils;

use rockbound::{schema::ColumnFamilyName, Schema};

use block_meta::schemas::BlockMetaSchema;
use signer_cache::schemas::SignerCacheSchema;

pub use block_meta::db::BlockMetaDb;
pub use signer_cache::db::SignerCacheDb;

pub const ROCKSDB_NAME: &str = "causeway";

pub const STORE_COLUMN_FAMILIES: &[ColumnFamilyName] = &[
    BlockMetaSchema::COLUMN_FAMILY_NAME,
    SignerCacheSchema::COLUMN_FAMILY_NAME,
];

/// database operations configuration
#[derive(Clone, Copy, Debug)]
pub struct DbOpsConfig {
    pub retry_count: u16,
}

impl DbOpsConfig {
    pub fn new(retry_count: u16) -> Self {
        Self { retry_count }
    }
}
