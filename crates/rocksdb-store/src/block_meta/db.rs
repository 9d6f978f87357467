use std::sync::Arc;

use rockbound::{
    rocksdb::ReadOptions, schema::KeyEncoder, OptimisticTransactionDB, SchemaDBOperationsExt,
    TransactionRetry,
};

use causeway_db::{errors::DbError, traits::BlockMetaDatabase, types::BlockMeta, DbResult};

use super::schemas::BlockMetaSchema;
use crate::DbOpsConfig;

#[derive(Debug)]
pub struct BlockMetaDb {
    db: Arc<OptimisticTransactionDB>,
    ops: DbOpsConfig,
}

impl BlockMetaDb {
    // NOTE: db is expected to open all the column families defined in
    // STORE_COLUMN_FAMILIES.
    pub fn new(db: Arc<OptimisticTransactionDB>, ops: DbOpsConfig) -> Self {
        Self { db, ops }
    }

    fn iter_metas(&self, options: ReadOptions) -> DbResult<Vec<(u64, BlockMeta)>> {
        let res = self
            .db
            .iter_with_opts::<BlockMetaSchema>(options)?
            .map(|item_result| item_result.map(|item| item.into_tuple()))
            .collect::<Result<Vec<_>, anyhow::Error>>()?;
        Ok(res)
    }
}

impl BlockMetaDatabase for BlockMetaDb {
    fn get_block_meta(&self, height: u64) -> DbResult<Option<BlockMeta>> {
        Ok(self.db.get::<BlockMetaSchema>(&height)?)
    }

    fn put_block_meta(&self, height: u64, meta: BlockMeta) -> DbResult<()> {
        self.db.put::<BlockMetaSchema>(&height, &meta)?;
        Ok(())
    }

    fn get_block_metas(&self) -> DbResult<Vec<BlockMeta>> {
        let metas = self.iter_metas(ReadOptions::default())?;
        Ok(metas.into_iter().map(|(_, meta)| meta).collect())
    }

    fn prune_block_metas(
        &self,
        below_height: u64,
        keep: &dyn Fn(&BlockMeta) -> bool,
    ) -> DbResult<Vec<u64>> {
        let mut options = ReadOptions::default();
        options.set_iterate_upper_bound(
            KeyEncoder::<BlockMetaSchema>::encode_key(&below_height)
                .map_err(|err| DbError::CodecError(err.to_string()))?,
        );

        let mut pruned = Vec::new();
        for (height, meta) in self.iter_metas(options)? {
            if keep(&meta) {
                continue;
            }
            pruned.push(height);
        }

        self.db
            .with_optimistic_txn(TransactionRetry::Count(self.ops.retry_count), |txn| {
                for height in &pruned {
                    txn.delete::<BlockMetaSchema>(height)?;
                }
                Ok::<(), DbError>(())
            })
            .map_err(|e| DbError::TransactionError(e.to_string()))?;

        Ok(pruned)
    }
}
