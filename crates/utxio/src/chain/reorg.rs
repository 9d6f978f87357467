//! Chain-reorganization detection and repair.

use tokio::sync::mpsc;
use tracing::*;

use causeway_db::types::BlockMeta;
use causeway_primitives::events::{DepositEvent, ErrataEvent};

use crate::bridge::BridgeAuthority;
use crate::client::Client;
use crate::encoder::TxEncoder;
use crate::rpc::traits::ChainRpc;
use crate::rpc::types::RpcBlock;
use crate::signer::RemoteSigner;

impl<C, E, B, S> Client<C, E, B, S>
where
    C: ChainRpc,
    E: TxEncoder,
    B: BridgeAuthority,
    S: RemoteSigner,
{
    /// Checks a freshly fetched block against the stored lineage. On a
    /// mismatch, re-confirms every recorded customer transaction, emits
    /// errata for the ones that vanished, and re-extracts deposits from the
    /// blocks whose hashes changed.
    pub(crate) async fn process_reorg(
        &self,
        block: &RpcBlock,
        errata_tx: &mpsc::Sender<ErrataEvent>,
    ) -> anyhow::Result<Vec<DepositEvent>> {
        let Some(previous_height) = block.height.checked_sub(1) else {
            return Ok(Vec::new());
        };
        let Some(prev_meta) = self.meta_ops.get_block_meta_async(previous_height).await? else {
            // first scan, nothing to compare against
            return Ok(Vec::new());
        };
        if prev_meta.block_hash.eq_ignore_ascii_case(&block.previous_hash) {
            return Ok(Vec::new());
        }

        info!(
            height = block.height,
            previous_hash = %block.previous_hash,
            recorded_height = prev_meta.height,
            recorded_hash = %prev_meta.block_hash,
            "re-org detected"
        );

        let rescan_heights = match self.reconfirm_transactions(errata_tx).await {
            Ok(heights) => heights,
            Err(err) => {
                error!(%err, "fail to reprocess re-orged blocks");
                Vec::new()
            }
        };

        let mut deposits = Vec::new();
        for height in rescan_heights {
            info!(%height, "rescan block height");
            let block = match self.fetch_block(height).await {
                Ok(block) => block,
                Err(err) => {
                    error!(%err, %height, "fail to get block from RPC");
                    continue;
                }
            };
            let meta = match self.meta_ops.get_block_meta_async(height).await {
                Ok(Some(meta)) => meta,
                _ => BlockMeta::new(&block.previous_hash, height, &block.hash),
            };
            deposits.extend(self.extract_deposits(&block, &meta).await);
        }
        Ok(deposits)
    }

    /// Walks every stored meta: any recorded customer transaction that no
    /// longer exists on-chain or in the mempool is errata'd and removed, and
    /// any block whose canonical hash changed is queued for re-scan. Metas
    /// are rewritten with the fresh lineage.
    async fn reconfirm_transactions(
        &self,
        errata_tx: &mpsc::Sender<ErrataEvent>,
    ) -> anyhow::Result<Vec<u64>> {
        let metas = self.meta_ops.get_block_metas_async(()).await?;
        let mut rescan_heights = Vec::new();

        for mut meta in metas {
            for txid in meta.customer_transactions.clone() {
                if self.transaction_exists(&txid).await {
                    debug!(height = meta.height, %txid, "tx still exists");
                    continue;
                }
                // gone from chain and mempool, report and forget it
                info!(height = meta.height, %txid, "tx no longer exists, sending errata");
                let errata = ErrataEvent {
                    height: meta.height,
                    txid: txid.clone(),
                };
                if errata_tx.send(errata).await.is_err() {
                    warn!("errata channel closed");
                }
                meta.remove_customer_transaction(&txid);
            }

            let refreshed = match self.fetch_block(meta.height).await {
                Ok(block) => block,
                Err(err) => {
                    error!(%err, height = meta.height, "fail to re-fetch block");
                    continue;
                }
            };
            if !meta.block_hash.eq_ignore_ascii_case(&refreshed.hash) {
                rescan_heights.push(meta.height);
            }
            meta.previous_hash = refreshed.previous_hash;
            meta.block_hash = refreshed.hash;
            if let Err(err) = self
                .meta_ops
                .put_block_meta_async((meta.height, meta))
                .await
            {
                error!(%err, "fail to save block meta");
            }
        }

        Ok(rescan_heights)
    }

    /// Whether the transaction is still known to the ledger, first as a
    /// confirmed transaction, then in the mempool.
    async fn transaction_exists(&self, txid: &str) -> bool {
        if self.chain_rpc.get_raw_transaction_verbose(txid).await.is_ok() {
            return true;
        }
        matches!(self.chain_rpc.get_mempool_entry(txid).await, Ok(Some(_)))
    }
}

#[cfg(test)]
mod tests {
    use crate::config::ClientConfig;
    use crate::test_utils::harness::{build_client, TestHarness};
    use crate::test_utils::block;

    use super::*;

    async fn put_meta(harness: &TestHarness, meta: BlockMeta) {
        harness
            .client
            .meta_ops
            .put_block_meta_async((meta.height, meta))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_no_reorg_when_lineage_matches() {
        let harness = build_client(ClientConfig::default());
        put_meta(&harness, BlockMeta::new("h998", 999, "h999")).await;

        let (errata_tx, mut errata_rx) = mpsc::channel(8);
        let next = block(1000, "h1000", "h999", vec![]);
        let deposits = harness
            .client
            .process_reorg(&next, &errata_tx)
            .await
            .unwrap();

        assert!(deposits.is_empty());
        assert!(errata_rx.try_recv().is_err(), "no errata without a reorg");
    }

    #[tokio::test]
    async fn test_first_scan_has_nothing_to_compare() {
        let harness = build_client(ClientConfig::default());
        let (errata_tx, _errata_rx) = mpsc::channel(8);
        let next = block(1000, "h1000", "h999", vec![]);
        let deposits = harness
            .client
            .process_reorg(&next, &errata_tx)
            .await
            .unwrap();
        assert!(deposits.is_empty());
    }

    #[tokio::test]
    async fn test_reorg_emits_errata_once_for_vanished_tx() {
        let harness = build_client(ClientConfig::default());

        // stored lineage: 998 holds a customer tx, 999 is the stale tip
        let mut meta_998 = BlockMeta::new("h997", 998, "h998-old");
        meta_998.add_customer_transaction("cafe");
        put_meta(&harness, meta_998).await;
        put_meta(&harness, BlockMeta::new("h998-old", 999, "h999-old")).await;

        // canonical chain replaced both blocks; "cafe" exists nowhere anymore
        harness.chain.add_block(block(998, "h998-new", "h997", vec![]));
        harness
            .chain
            .add_block(block(999, "h999-new", "h998-new", vec![]));

        let (errata_tx, mut errata_rx) = mpsc::channel(8);
        let next = block(1000, "h1000", "h999-new", vec![]);
        let deposits = harness
            .client
            .process_reorg(&next, &errata_tx)
            .await
            .unwrap();
        assert!(deposits.is_empty(), "re-scanned blocks are empty");

        let errata = errata_rx.try_recv().expect("one errata event");
        assert_eq!(errata.height, 998);
        assert_eq!(errata.txid, "cafe");
        assert!(errata_rx.try_recv().is_err(), "exactly one errata event");

        // the vanished tx was removed and the lineage repaired
        let meta = harness
            .client
            .meta_ops
            .get_block_meta_async(998)
            .await
            .unwrap()
            .unwrap();
        assert!(meta.customer_transactions.is_empty());
        assert_eq!(meta.block_hash, "h998-new");
        let meta = harness
            .client
            .meta_ops
            .get_block_meta_async(999)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(meta.block_hash, "h999-new");
        assert_eq!(meta.previous_hash, "h998-new");
    }

    #[tokio::test]
    async fn test_reorg_keeps_still_confirmed_txs() {
        let harness = build_client(ClientConfig::default());

        let mut meta_998 = BlockMeta::new("h997", 998, "h998");
        meta_998.add_customer_transaction("feed");
        put_meta(&harness, meta_998).await;
        put_meta(&harness, BlockMeta::new("h998", 999, "h999-old")).await;

        // 998 is untouched by the fork and "feed" is still confirmed there
        let confirmed =
            crate::test_utils::tx_with_vouts("feed", vec![crate::test_utils::vout(1.0, 0, "x")]);
        harness
            .chain
            .add_block(block(998, "h998", "h997", vec![confirmed]));
        harness
            .chain
            .add_block(block(999, "h999-new", "h998", vec![]));

        let (errata_tx, mut errata_rx) = mpsc::channel(8);
        let next = block(1000, "h1000", "h999-new", vec![]);
        harness
            .client
            .process_reorg(&next, &errata_tx)
            .await
            .unwrap();

        assert!(errata_rx.try_recv().is_err(), "confirmed tx must not errata");
        let meta = harness
            .client
            .meta_ops
            .get_block_meta_async(998)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(meta.customer_transactions, vec!["feed"]);
    }

    #[tokio::test]
    async fn test_mempool_tx_survives_reconfirmation() {
        let harness = build_client(ClientConfig::default());

        let mut meta_998 = BlockMeta::new("h997", 998, "h998");
        meta_998.add_customer_transaction("beef");
        put_meta(&harness, meta_998).await;
        put_meta(&harness, BlockMeta::new("h998", 999, "h999-old")).await;

        harness.chain.add_block(block(998, "h998", "h997", vec![]));
        harness
            .chain
            .add_block(block(999, "h999-new", "h998", vec![]));
        // "beef" was evicted back into the mempool by the reorg
        harness.chain.add_mempool_entry("beef");

        let (errata_tx, mut errata_rx) = mpsc::channel(8);
        let next = block(1000, "h1000", "h999-new", vec![]);
        harness
            .client
            .process_reorg(&next, &errata_tx)
            .await
            .unwrap();

        assert!(errata_rx.try_recv().is_err(), "mempool tx must not errata");
    }
}
