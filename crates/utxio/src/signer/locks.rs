use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

/// One signing lock per vault public key, created lazily and never removed.
///
/// There are two entry points into signing, the outbound signer and the UTXO
/// consolidator, and each vault must have at most one keysign in flight at a
/// time or its UTXOs could be double-spent. Distinct vaults sign in
/// parallel. The registry's own lock is held only for the lazy insert; the
/// per-vault lock is held for a whole sign cycle, so it is an async mutex.
#[derive(Debug, Default)]
pub struct VaultLockRegistry {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl VaultLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, vault_pub_key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock();
        locks
            .entry(vault_pub_key.to_owned())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}
