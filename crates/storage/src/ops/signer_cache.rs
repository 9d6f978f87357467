use std::sync::Arc;

use threadpool::ThreadPool;

use causeway_db::{traits::SignerCacheDatabase, types::SignerCacheEntry, DbResult};
use causeway_primitives::buf::Buf32;

use crate::exec::*;

/// Database context for a database operation interface.
pub struct Context<D: SignerCacheDatabase + Sync + Send + 'static> {
    db: Arc<D>,
}

impl<D: SignerCacheDatabase + Sync + Send + 'static> Context<D> {
    pub fn new(db: Arc<D>) -> Self {
        Self { db }
    }

    pub fn into_ops(self, pool: ThreadPool) -> SignerCacheOps {
        SignerCacheOps::new(pool, Arc::new(self))
    }
}

pub struct SignerCacheOps {
    pool: ThreadPool,
    get_signed: OpShim<Buf32, Option<SignerCacheEntry>>,
    put_signed: OpShim<(Buf32, SignerCacheEntry), ()>,
    has_signed: OpShim<Buf32, bool>,
}

inst_ops! {
    (SignerCacheOps => pool, Context<D: SignerCacheDatabase>) {
        get_signed => get_signed_async, get_signed_blocking; Buf32 => Option<SignerCacheEntry>,
        put_signed => put_signed_async, put_signed_blocking; (Buf32, SignerCacheEntry) => (),
        has_signed => has_signed_async, has_signed_blocking; Buf32 => bool
    }
}

fn get_signed<D: SignerCacheDatabase + Sync + Send + 'static>(
    context: &Context<D>,
    fingerprint: Buf32,
) -> DbResult<Option<SignerCacheEntry>> {
    context.db.get_signed(fingerprint)
}

fn put_signed<D: SignerCacheDatabase + Sync + Send + 'static>(
    context: &Context<D>,
    (fingerprint, entry): (Buf32, SignerCacheEntry),
) -> DbResult<()> {
    context.db.put_signed(fingerprint, entry)
}

fn has_signed<D: SignerCacheDatabase + Sync + Send + 'static>(
    context: &Context<D>,
    fingerprint: Buf32,
) -> DbResult<bool> {
    context.db.has_signed(fingerprint)
}
