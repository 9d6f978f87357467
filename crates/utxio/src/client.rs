//! The chain client: one long-lived instance per supported chain, shared by
//! the scanning and signing paths.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::*;

use causeway_db::types::{BlockMeta, SignerCacheEntry};
use causeway_primitives::events::DepositEvent;
use causeway_primitives::payment::payment_fingerprint;
use causeway_primitives::vault::VaultInfo;
use causeway_storage::{BlockMetaOps, SignerCacheOps};

use crate::bridge::BridgeAuthority;
use crate::config::ClientConfig;
use crate::encoder::TxEncoder;
use crate::memo::Memo;
use crate::rpc::traits::ChainRpc;
use crate::rpc::ClientResult;
use crate::signer::{NodeSigner, RemoteSigner, VaultLockRegistry};

/// Chain-observation and outbound-signing client for one UTXO chain.
///
/// Generic over its collaborators: the chain node RPC, the external
/// transaction encoder, the bridge-state authority and the remote threshold
/// signer.
pub struct Client<C, E, B, S> {
    pub(crate) config: ClientConfig,
    pub(crate) chain_rpc: Arc<C>,
    pub(crate) encoder: Arc<E>,
    pub(crate) bridge: Arc<B>,
    pub(crate) remote_signer: Arc<S>,
    pub(crate) node_signer: Arc<NodeSigner>,
    pub(crate) meta_ops: Arc<BlockMetaOps>,
    pub(crate) cache_ops: Arc<SignerCacheOps>,
    pub(crate) vault_locks: VaultLockRegistry,
    pub(crate) consolidate_in_progress: AtomicBool,
    pub(crate) current_height: AtomicU64,
    pub(crate) last_fee_rate: AtomicU64,
    pub(crate) last_solvency_height: AtomicU64,
    healthy: AtomicBool,
    vaults: RwLock<VaultCache>,
}

#[derive(Default)]
struct VaultCache {
    vaults: Vec<VaultInfo>,
    fetched_at: Option<Instant>,
}

impl VaultCache {
    fn fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.is_some_and(|at| at.elapsed() < ttl)
    }
}

impl<C, E, B, S> Client<C, E, B, S>
where
    C: ChainRpc,
    E: TxEncoder,
    B: BridgeAuthority,
    S: RemoteSigner,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ClientConfig,
        chain_rpc: Arc<C>,
        encoder: Arc<E>,
        bridge: Arc<B>,
        remote_signer: Arc<S>,
        node_signer: NodeSigner,
        meta_ops: Arc<BlockMetaOps>,
        cache_ops: Arc<SignerCacheOps>,
    ) -> Self {
        Self {
            config,
            chain_rpc,
            encoder,
            bridge,
            remote_signer,
            node_signer: Arc::new(node_signer),
            meta_ops,
            cache_ops,
            vault_locks: VaultLockRegistry::new(),
            consolidate_in_progress: AtomicBool::new(false),
            current_height: AtomicU64::new(0),
            last_fee_rate: AtomicU64::new(0),
            last_solvency_height: AtomicU64::new(0),
            healthy: AtomicBool::new(false),
            vaults: RwLock::new(VaultCache::default()),
        }
    }

    /// The node's own public key, as the bridge renders it.
    pub fn node_pub_key(&self) -> &str {
        self.node_signer.node_pub_key()
    }

    /// Current chain tip height, straight from the node.
    pub async fn get_height(&self) -> ClientResult<u64> {
        self.chain_rpc.get_block_count().await
    }

    /// The most recently scanned height.
    pub fn scanned_height(&self) -> u64 {
        self.current_height.load(Ordering::SeqCst)
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    pub(crate) fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// The current Asgard vaults, cached briefly to keep scanning off the
    /// bridge's back. A fetch failure serves the stale list.
    pub async fn asgard_vaults(&self) -> Vec<VaultInfo> {
        let ttl = Duration::from_secs(self.config.vault_cache_secs);
        {
            let cache = self.vaults.read().await;
            if cache.fresh(ttl) {
                return cache.vaults.clone();
            }
        }

        let mut cache = self.vaults.write().await;
        if cache.fresh(ttl) {
            return cache.vaults.clone();
        }
        match self.bridge.get_asgard_vaults().await {
            Ok(vaults) => {
                // ensure we don't overwrite with an empty list
                if !vaults.is_empty() {
                    cache.vaults = vaults;
                }
                cache.fetched_at = Some(Instant::now());
            }
            Err(err) => {
                warn!(%err, "fail to get asgard vaults");
            }
        }
        cache.vaults.clone()
    }

    pub async fn is_vault_address(&self, address: &str) -> bool {
        self.asgard_vaults()
            .await
            .iter()
            .any(|vault| vault.address.eq_ignore_ascii_case(address))
    }

    pub(crate) async fn vault_pub_key_for_address(&self, address: &str) -> Option<String> {
        self.asgard_vaults()
            .await
            .iter()
            .find(|vault| vault.address.eq_ignore_ascii_case(address))
            .map(|vault| vault.pub_key.clone())
    }

    /// Records an observed transaction in the height's block meta and, for
    /// vault outbounds, marks the fulfilled payment as signed so a restarted
    /// node does not sign it again.
    pub async fn on_observed_deposit(&self, deposit: &DepositEvent) {
        let height = deposit.height;
        let mut meta = match self.meta_ops.get_block_meta_async(height).await {
            Ok(Some(meta)) => meta,
            Ok(None) => BlockMeta::new("", height, ""),
            Err(err) => {
                error!(%err, %height, "fail to get block meta");
                return;
            }
        };

        let sender_is_vault = self.is_vault_address(&deposit.sender).await;
        if sender_is_vault {
            debug!(txid = %deposit.txid, %height, "recording self transaction");
            meta.add_self_transaction(&deposit.txid);
        } else {
            meta.add_customer_transaction(&deposit.txid);
        }
        if let Err(err) = self.meta_ops.put_block_meta_async((height, meta)).await {
            error!(%err, %height, "fail to save block meta");
        }

        if !sender_is_vault {
            return;
        }
        let Memo::Outbound { .. } = Memo::parse(&deposit.memo) else {
            return;
        };
        let Some(vault_pub_key) = deposit.observed_vault_pub_key.as_deref() else {
            return;
        };
        let fingerprint = payment_fingerprint(vault_pub_key, &deposit.recipient, &deposit.memo);
        let entry = SignerCacheEntry {
            vault_pub_key: vault_pub_key.to_owned(),
            txid: deposit.txid.clone(),
        };
        if let Err(err) = self.cache_ops.put_signed_async((fingerprint, entry)).await {
            error!(%err, "fail to update signer cache");
        }
    }
}
