//! The scan driver: pulls heights in order, keeps block metas current, and
//! hands deposit batches downstream.

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::{stream, StreamExt};
use tokio::sync::mpsc;
use tracing::*;

use causeway_db::types::BlockMeta;
use causeway_primitives::events::{DepositBatch, ErrataEvent, SolvencyReport};
use causeway_storage::ops::block_meta::KeepPredicate;

use crate::bridge::BridgeAuthority;
use crate::client::Client;
use crate::encoder::TxEncoder;
use crate::rpc::traits::ChainRpc;
use crate::rpc::types::RpcBlock;
use crate::rpc::ClientResult;
use crate::shutdown::Shutdown;
use crate::signer::RemoteSigner;

/// Posting cadence for the network fee when the rate is unchanged.
const FEE_REPOST_BLOCKS: u64 = 100;

/// Drives periodic scanning of the chain.
///
/// Blocks are fetched concurrently but processed and delivered in strictly
/// increasing height order. A failed height stops the pass; the next poll
/// resumes from the last processed height.
pub struct BlockScanner<C, E, B, S> {
    client: Arc<Client<C, E, B, S>>,
    deposit_tx: mpsc::Sender<DepositBatch>,
    errata_tx: mpsc::Sender<ErrataEvent>,
    solvency_tx: mpsc::Sender<SolvencyReport>,
    shutdown: Shutdown,
    last_scanned: u64,
}

impl<C, E, B, S> BlockScanner<C, E, B, S>
where
    C: ChainRpc,
    E: TxEncoder,
    B: BridgeAuthority,
    S: RemoteSigner,
{
    pub fn new(
        client: Arc<Client<C, E, B, S>>,
        deposit_tx: mpsc::Sender<DepositBatch>,
        errata_tx: mpsc::Sender<ErrataEvent>,
        solvency_tx: mpsc::Sender<SolvencyReport>,
        shutdown: Shutdown,
    ) -> Self {
        let last_scanned = client.config.start_scan_height.saturating_sub(1);
        Self {
            client,
            deposit_tx,
            errata_tx,
            solvency_tx,
            shutdown,
            last_scanned,
        }
    }

    pub async fn run(mut self) {
        info!(start = self.last_scanned + 1, "starting block scanner");
        let poll_dur = Duration::from_millis(self.client.config.poll_interval_ms);

        loop {
            if self.shutdown.should_shutdown() {
                info!("block scanner shutting down");
                return;
            }

            if let Err(err) = self.poll_once().await {
                warn!(%err, "failed to poll chain");
                self.client.set_healthy(false);
            }

            let mut shutdown = self.shutdown.clone();
            tokio::select! {
                _ = tokio::time::sleep(poll_dur) => {}
                _ = shutdown.wait_for_shutdown() => {
                    info!("block scanner shutting down");
                    return;
                }
            }
        }
    }

    /// Scans from the next unscanned height up to the current tip.
    async fn poll_once(&mut self) -> anyhow::Result<()> {
        let tip = self.client.chain_rpc.get_block_count().await?;
        let start = self.last_scanned + 1;
        if start > tip {
            trace!(%tip, "no new blocks");
            self.client.set_healthy(true);
            return Ok(());
        }

        let client = self.client.clone();
        let mut blocks = stream::iter(start..=tip)
            .map(|height| {
                let client = client.clone();
                async move { (height, client.fetch_block(height).await) }
            })
            .buffered(self.client.config.fetch_concurrency);

        while let Some((height, result)) = blocks.next().await {
            if self.shutdown.should_shutdown() {
                return Ok(());
            }
            let block = result.with_context(|| format!("fail to get block {height}"))?;
            let batch = self
                .client
                .process_block(&block, tip, &self.errata_tx, &self.solvency_tx)
                .await
                .with_context(|| format!("fail to process block {height}"))?;
            if !batch.is_empty() && self.deposit_tx.send(batch).await.is_err() {
                warn!("deposit channel closed, stopping scanner");
                return Ok(());
            }
            self.last_scanned = height;
            self.client.set_healthy(true);
        }
        Ok(())
    }
}

impl<C, E, B, S> Client<C, E, B, S>
where
    C: ChainRpc,
    E: TxEncoder,
    B: BridgeAuthority,
    S: RemoteSigner,
{
    pub(crate) async fn fetch_block(&self, height: u64) -> ClientResult<RpcBlock> {
        let hash = self.chain_rpc.get_block_hash(height).await?;
        self.chain_rpc.get_block_verbose(&hash).await
    }

    /// Processes one scanned block: reorg handling, meta bookkeeping,
    /// pruning, deposit extraction and the near-tip periodic reporting.
    pub(crate) async fn process_block(
        self: &Arc<Self>,
        block: &RpcBlock,
        chain_tip: u64,
        errata_tx: &mpsc::Sender<ErrataEvent>,
        solvency_tx: &mpsc::Sender<SolvencyReport>,
    ) -> anyhow::Result<DepositBatch> {
        let height = block.height;
        if block.hash.is_empty() && block.previous_hash.is_empty() {
            anyhow::bail!("invalid block at height {height}");
        }
        debug!(%height, hash = %block.hash, "processing block");
        self.current_height.store(height, Ordering::SeqCst);

        let mut deposits = match self.process_reorg(block, errata_tx).await {
            Ok(rescanned) => rescanned,
            Err(err) => {
                error!(%err, "fail to process re-org");
                Vec::new()
            }
        };

        let meta = match self.meta_ops.get_block_meta_async(height).await? {
            Some(mut meta) => {
                meta.previous_hash = block.previous_hash.clone();
                meta.block_hash = block.hash.clone();
                meta
            }
            None => BlockMeta::new(&block.previous_hash, height, &block.hash),
        };
        self.meta_ops
            .put_block_meta_async((height, meta.clone()))
            .await?;

        deposits.extend(self.extract_deposits(block, &meta).await);
        for deposit in &deposits {
            self.on_observed_deposit(deposit).await;
        }

        let prune_below = height.saturating_sub(self.config.block_retention);
        if prune_below > 0 {
            self.prune_metas(prune_below).await;
        }

        // report network fee and solvency only near the tip
        if chain_tip.saturating_sub(height) <= self.config.observation_flexibility_blocks {
            if let Err(err) = self.send_network_fee(height).await {
                error!(%err, "fail to send network fee");
            }
            if let Err(err) = self.report_solvency(height, solvency_tx).await {
                error!(%err, "fail to report solvency");
            }
        }

        Self::maybe_spawn_consolidate(self);

        Ok(DepositBatch { deposits })
    }

    /// Prunes metas below the cutoff, keeping blocks whose self transactions
    /// are still in the mempool so their spend locks survive.
    pub(crate) async fn prune_metas(&self, below_height: u64) {
        let metas = match self.meta_ops.get_block_metas_async(()).await {
            Ok(metas) => metas,
            Err(err) => {
                error!(%err, "fail to get block metas");
                return;
            }
        };

        let mut kept_heights = HashSet::new();
        for meta in metas.iter().filter(|m| m.height < below_height) {
            for txid in &meta.self_transactions {
                if let Ok(Some(_)) = self.chain_rpc.get_mempool_entry(txid).await {
                    info!(%txid, height = meta.height, "tx still in mempool, block can't be deleted");
                    kept_heights.insert(meta.height);
                    break;
                }
            }
        }

        let keep: KeepPredicate = Arc::new(move |meta: &BlockMeta| kept_heights.contains(&meta.height));
        if let Err(err) = self
            .meta_ops
            .prune_block_metas_async((below_height, keep))
            .await
        {
            error!(%err, height = below_height, "fail to prune block metas");
        }
    }

    /// Posts this chain's outbound fee rate whenever it changes, and
    /// periodically regardless.
    pub(crate) async fn send_network_fee(&self, height: u64) -> anyhow::Result<()> {
        let max_utxos = self.max_utxos_to_spend().await;
        // worst-case outbound: a full set of inputs, the payment and change
        // outputs, plus the slots a standard outbound memo occupies
        let fee_rate = self.encoder.calculate_fee(max_utxos, 5, "");
        if self.last_fee_rate.load(Ordering::SeqCst) != fee_rate || height % FEE_REPOST_BLOCKS == 0
        {
            let txid = self.bridge.post_network_fee(height, 1, fee_rate).await?;
            self.last_fee_rate.store(fee_rate, Ordering::SeqCst);
            debug!(%txid, %fee_rate, "posted network fee");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::ClientConfig;
    use crate::shutdown::ShutdownSignal;
    use crate::test_utils::harness::{build_client, TestHarness};
    use crate::test_utils::{block, null_data_vout, tx_with_vouts, vin, vout, vault};

    use super::*;

    /// A customer deposit paying 0.5 coins into the vault, plus the funding
    /// transaction the sender lookup needs.
    fn deposit_tx(harness: &TestHarness, name: &str) -> crate::rpc::types::RpcTransaction {
        let funding = tx_with_vouts(&format!("prev-{name}"), vec![vout(1.0, 0, "cust-1")]);
        harness.chain.add_tx(funding);

        let mut tx = tx_with_vouts(
            name,
            vec![
                vout(0.5, 0, "addr-vault-1"),
                null_data_vout("SWAP:BASE.CACAO", 1),
            ],
        );
        tx.vin = vec![vin(&format!("prev-{name}"), 0)];
        tx
    }

    struct TestChannels {
        deposit_tx: mpsc::Sender<DepositBatch>,
        deposit_rx: mpsc::Receiver<DepositBatch>,
        errata_tx: mpsc::Sender<ErrataEvent>,
        _errata_rx: mpsc::Receiver<ErrataEvent>,
        solvency_tx: mpsc::Sender<SolvencyReport>,
        _solvency_rx: mpsc::Receiver<SolvencyReport>,
    }

    fn channels() -> TestChannels {
        let (deposit_tx, deposit_rx) = mpsc::channel(16);
        let (errata_tx, _errata_rx) = mpsc::channel(16);
        let (solvency_tx, _solvency_rx) = mpsc::channel(16);
        TestChannels {
            deposit_tx,
            deposit_rx,
            errata_tx,
            _errata_rx,
            solvency_tx,
            _solvency_rx,
        }
    }

    #[tokio::test]
    async fn test_poll_delivers_heights_in_order() {
        let mut config = ClientConfig::default();
        config.start_scan_height = 1;
        config.fetch_concurrency = 3;
        let harness = build_client(config);
        harness
            .bridge
            .set_vaults(vec![vault("vault-1", &["peer-1"], 0)]);

        for height in 1..=3u64 {
            let tx = deposit_tx(&harness, &format!("dep-{height}"));
            harness.chain.add_block(block(
                height,
                &format!("h{height}"),
                &format!("h{}", height - 1),
                vec![tx],
            ));
        }

        let mut chans = channels();
        let signal = ShutdownSignal::new();
        let mut scanner = BlockScanner::new(
            harness.client.clone(),
            chans.deposit_tx.clone(),
            chans.errata_tx.clone(),
            chans.solvency_tx.clone(),
            signal.subscribe(),
        );

        scanner.poll_once().await.unwrap();

        let mut seen = Vec::new();
        while let Ok(batch) = chans.deposit_rx.try_recv() {
            assert_eq!(batch.deposits.len(), 1);
            seen.push(batch.deposits[0].height);
        }
        assert_eq!(seen, vec![1, 2, 3], "batches arrive in height order");
        assert_eq!(scanner.last_scanned, 3);
        assert!(harness.client.is_healthy());

        // every scanned height has a meta with the fetched lineage and the
        // observed customer transaction
        for height in 1..=3u64 {
            let meta = harness
                .client
                .meta_ops
                .get_block_meta_async(height)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(meta.block_hash, format!("h{height}"));
            assert!(meta.transaction_hash_exists(&format!("dep-{height}")));
        }
    }

    #[tokio::test]
    async fn test_poll_is_incremental() {
        let mut config = ClientConfig::default();
        config.start_scan_height = 1;
        let harness = build_client(config);

        harness.chain.add_block(block(1, "h1", "h0", vec![]));

        let chans = channels();
        let signal = ShutdownSignal::new();
        let mut scanner = BlockScanner::new(
            harness.client.clone(),
            chans.deposit_tx.clone(),
            chans.errata_tx.clone(),
            chans.solvency_tx.clone(),
            signal.subscribe(),
        );

        scanner.poll_once().await.unwrap();
        assert_eq!(scanner.last_scanned, 1);

        // nothing new: the poll is a no-op
        scanner.poll_once().await.unwrap();
        assert_eq!(scanner.last_scanned, 1);

        harness.chain.add_block(block(2, "h2", "h1", vec![]));
        scanner.poll_once().await.unwrap();
        assert_eq!(scanner.last_scanned, 2);
    }

    #[tokio::test]
    async fn test_prune_keeps_blocks_with_mempool_self_txs() {
        let harness = build_client(ClientConfig::default());
        let mut meta_1 = BlockMeta::new("h0", 1, "h1");
        meta_1.add_self_transaction("aaa");
        let mut meta_2 = BlockMeta::new("h1", 2, "h2");
        meta_2.add_self_transaction("bbb");
        let meta_3 = BlockMeta::new("h2", 3, "h3");
        for meta in [meta_1, meta_2, meta_3] {
            harness
                .client
                .meta_ops
                .put_block_meta_async((meta.height, meta))
                .await
                .unwrap();
        }
        // "aaa" is still waiting in the mempool, its spend locks must survive
        harness.chain.add_mempool_entry("aaa");

        harness.client.prune_metas(4).await;

        let heights: Vec<u64> = harness
            .client
            .meta_ops
            .get_block_metas_async(())
            .await
            .unwrap()
            .iter()
            .map(|m| m.height)
            .collect();
        assert_eq!(heights, vec![1]);
    }

    #[tokio::test]
    async fn test_network_fee_posted_on_change_and_cadence() {
        let harness = build_client(ClientConfig::default());

        harness.client.send_network_fee(5).await.unwrap();
        harness.client.send_network_fee(6).await.unwrap();
        harness.client.send_network_fee(100).await.unwrap();

        let posted = harness.bridge.network_fees.lock().clone();
        // rate for 10 inputs and 5 output slots
        assert_eq!(posted, vec![(5, 85_000), (100, 85_000)]);
    }

    #[tokio::test]
    async fn test_process_block_records_observations() {
        let harness = build_client(ClientConfig::default());
        harness
            .bridge
            .set_vaults(vec![vault("vault-1", &["peer-1"], 0)]);

        let tx = deposit_tx(&harness, "dep-10");
        let blk = block(10, "h10", "h9", vec![tx]);
        harness.chain.add_block(blk.clone());

        let chans = channels();
        let batch = harness
            .client
            .process_block(&blk, 10, &chans.errata_tx, &chans.solvency_tx)
            .await
            .unwrap();

        assert_eq!(batch.deposits.len(), 1);
        let deposit = &batch.deposits[0];
        assert_eq!(deposit.sender, "cust-1");
        assert_eq!(deposit.recipient, "addr-vault-1");
        assert_eq!(deposit.amount, 50_000_000);
        assert_eq!(deposit.gas, 50_000_000);
        assert_eq!(deposit.observed_vault_pub_key.as_deref(), Some("vault-1"));
        assert_eq!(harness.client.scanned_height(), 10);

        let meta = harness
            .client
            .meta_ops
            .get_block_meta_async(10)
            .await
            .unwrap()
            .unwrap();
        assert!(meta
            .customer_transactions
            .iter()
            .any(|txid| txid == "dep-10"));

        // a second pass over the same block reports nothing new
        let batch = harness
            .client
            .process_block(&blk, 10, &chans.errata_tx, &chans.solvency_tx)
            .await
            .unwrap();
        assert!(batch.is_empty());
    }
}
