use causeway_primitives::buf::Buf32;

use crate::types::{BlockMeta, SignerCacheEntry};
use crate::DbResult;

/// Durable per-height block metadata, keyed by height.
pub trait BlockMetaDatabase: Send + Sync + 'static {
    fn get_block_meta(&self, height: u64) -> DbResult<Option<BlockMeta>>;

    fn put_block_meta(&self, height: u64, meta: BlockMeta) -> DbResult<()>;

    /// All stored metas in ascending height order.
    fn get_block_metas(&self) -> DbResult<Vec<BlockMeta>>;

    /// Removes metas below `below_height` unless `keep` reports the block
    /// still has in-flight bookkeeping. Returns the pruned heights.
    fn prune_block_metas(
        &self,
        below_height: u64,
        keep: &dyn Fn(&BlockMeta) -> bool,
    ) -> DbResult<Vec<u64>>;
}

/// Signed-payment cache, keyed by payment fingerprint.
pub trait SignerCacheDatabase: Send + Sync + 'static {
    fn get_signed(&self, fingerprint: Buf32) -> DbResult<Option<SignerCacheEntry>>;

    fn put_signed(&self, fingerprint: Buf32, entry: SignerCacheEntry) -> DbResult<()>;

    fn has_signed(&self, fingerprint: Buf32) -> DbResult<bool> {
        Ok(self.get_signed(fingerprint)?.is_some())
    }
}
