use std::sync::Arc;

use rockbound::{OptimisticTransactionDB, SchemaDBOperationsExt, TransactionRetry};
use tracing::*;

use causeway_db::{
    errors::DbError, traits::SignerCacheDatabase, types::SignerCacheEntry, DbResult,
};
use causeway_primitives::buf::Buf32;

use super::schemas::SignerCacheSchema;
use crate::DbOpsConfig;

#[derive(Debug)]
pub struct SignerCacheDb {
    db: Arc<OptimisticTransactionDB>,
    ops: DbOpsConfig,
}

impl SignerCacheDb {
    pub fn new(db: Arc<OptimisticTransactionDB>, ops: DbOpsConfig) -> Self {
        Self { db, ops }
    }
}

impl SignerCacheDatabase for SignerCacheDb {
    fn get_signed(&self, fingerprint: Buf32) -> DbResult<Option<SignerCacheEntry>> {
        Ok(self.db.get::<SignerCacheSchema>(&fingerprint)?)
    }

    // First write wins. A second cycle for the same fingerprint should never
    // complete, but if one does the original txid stays authoritative.
    fn put_signed(&self, fingerprint: Buf32, entry: SignerCacheEntry) -> DbResult<()> {
        self.db
            .with_optimistic_txn(TransactionRetry::Count(self.ops.retry_count), |txn| {
                if let Some(existing) = txn.get::<SignerCacheSchema>(&fingerprint)? {
                    warn!(%fingerprint, txid = %existing.txid, "signer cache entry already present");
                    return Ok(());
                }
                txn.put::<SignerCacheSchema>(&fingerprint, &entry)?;
                Ok::<(), DbError>(())
            })
            .map_err(|e| DbError::TransactionError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use causeway_test_utils::ArbitraryGenerator;

    use super::*;
    use crate::test_utils::get_rocksdb_tmp_instance;

    fn setup_db() -> SignerCacheDb {
        let (db, db_ops) = get_rocksdb_tmp_instance().unwrap();
        SignerCacheDb::new(db, db_ops)
    }

    #[test]
    fn test_get_missing_entry() {
        let db = setup_db();
        assert_eq!(db.get_signed([1; 32].into()).unwrap(), None);
        assert!(!db.has_signed([1; 32].into()).unwrap());
    }

    #[test]
    fn test_put_get_roundtrip() {
        let db = setup_db();
        let entry: SignerCacheEntry = ArbitraryGenerator::new().generate();

        db.put_signed([1; 32].into(), entry.clone()).unwrap();

        assert_eq!(db.get_signed([1; 32].into()).unwrap(), Some(entry));
        assert!(db.has_signed([1; 32].into()).unwrap());
    }

    #[test]
    fn test_first_write_wins() {
        let db = setup_db();
        let gen = ArbitraryGenerator::new();
        let first: SignerCacheEntry = gen.generate();
        let second: SignerCacheEntry = gen.generate();

        db.put_signed([1; 32].into(), first.clone()).unwrap();
        db.put_signed([1; 32].into(), second).unwrap();

        assert_eq!(db.get_signed([1; 32].into()).unwrap(), Some(first));
    }
}
