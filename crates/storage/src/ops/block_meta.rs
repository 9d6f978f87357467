use std::sync::Arc;

use threadpool::ThreadPool;

use causeway_db::{traits::BlockMetaDatabase, types::BlockMeta, DbResult};

use crate::exec::*;

/// Predicate deciding whether a meta below the prune cutoff must survive,
/// evaluated on the storage threadpool.
pub type KeepPredicate = Arc<dyn Fn(&BlockMeta) -> bool + Sync + Send + 'static>;

/// Database context for a database operation interface.
pub struct Context<D: BlockMetaDatabase + Sync + Send + 'static> {
    db: Arc<D>,
}

impl<D: BlockMetaDatabase + Sync + Send + 'static> Context<D> {
    pub fn new(db: Arc<D>) -> Self {
        Self { db }
    }

    pub fn into_ops(self, pool: ThreadPool) -> BlockMetaOps {
        BlockMetaOps::new(pool, Arc::new(self))
    }
}

pub struct BlockMetaOps {
    pool: ThreadPool,
    get_block_meta: OpShim<u64, Option<BlockMeta>>,
    put_block_meta: OpShim<(u64, BlockMeta), ()>,
    get_block_metas: OpShim<(), Vec<BlockMeta>>,
    prune_block_metas: OpShim<(u64, KeepPredicate), Vec<u64>>,
}

inst_ops! {
    (BlockMetaOps => pool, Context<D: BlockMetaDatabase>) {
        get_block_meta => get_block_meta_async, get_block_meta_blocking; u64 => Option<BlockMeta>,
        put_block_meta => put_block_meta_async, put_block_meta_blocking; (u64, BlockMeta) => (),
        get_block_metas => get_block_metas_async, get_block_metas_blocking; () => Vec<BlockMeta>,
        prune_block_metas => prune_block_metas_async, prune_block_metas_blocking; (u64, KeepPredicate) => Vec<u64>
    }
}

fn get_block_meta<D: BlockMetaDatabase + Sync + Send + 'static>(
    context: &Context<D>,
    height: u64,
) -> DbResult<Option<BlockMeta>> {
    context.db.get_block_meta(height)
}

fn put_block_meta<D: BlockMetaDatabase + Sync + Send + 'static>(
    context: &Context<D>,
    (height, meta): (u64, BlockMeta),
) -> DbResult<()> {
    context.db.put_block_meta(height, meta)
}

fn get_block_metas<D: BlockMetaDatabase + Sync + Send + 'static>(
    context: &Context<D>,
    _: (),
) -> DbResult<Vec<BlockMeta>> {
    context.db.get_block_metas()
}

fn prune_block_metas<D: BlockMetaDatabase + Sync + Send + 'static>(
    context: &Context<D>,
    (below_height, keep): (u64, KeepPredicate),
) -> DbResult<Vec<u64>> {
    context.db.prune_block_metas(below_height, keep.as_ref())
}

#[cfg(test)]
mod tests {
    use causeway_rocksdb::{test_utils::get_rocksdb_tmp_instance, BlockMetaDb};

    use super::*;

    fn get_ops() -> BlockMetaOps {
        let (db, db_ops) = get_rocksdb_tmp_instance().unwrap();
        let db = Arc::new(BlockMetaDb::new(db, db_ops));
        let pool = ThreadPool::new(2);
        Context::new(db).into_ops(pool)
    }

    #[tokio::test]
    async fn test_async_roundtrip() {
        let ops = get_ops();
        let meta = BlockMeta::new("prevhash", 7, "blockhash");

        ops.put_block_meta_async((7, meta.clone())).await.unwrap();

        assert_eq!(ops.get_block_meta_async(7).await.unwrap(), Some(meta));
        assert_eq!(ops.get_block_metas_async(()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_prune_through_ops() {
        let ops = get_ops();
        for height in 1..=4u64 {
            ops.put_block_meta_async((height, BlockMeta::new("p", height, "b")))
                .await
                .unwrap();
        }

        let keep: KeepPredicate = Arc::new(|meta: &BlockMeta| meta.height == 2);
        let pruned = ops.prune_block_metas_async((4, keep)).await.unwrap();
        assert_eq!(pruned, vec![1, 3]);
    }
}
