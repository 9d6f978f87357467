//! Idempotent broadcast and the signed-payment bookkeeping around it.

use tracing::*;

use causeway_db::types::{BlockMeta, SignerCacheEntry};
use causeway_primitives::payment::OutboundPayment;

use crate::bridge::BridgeAuthority;
use crate::client::Client;
use crate::encoder::TxEncoder;
use crate::rpc::traits::ChainRpc;
use crate::signer::errors::BroadcastError;
use crate::signer::RemoteSigner;

impl<C, E, B, S> Client<C, E, B, S>
where
    C: ChainRpc,
    E: TxEncoder,
    B: BridgeAuthority,
    S: RemoteSigner,
{
    /// Broadcasts a signed outbound transaction and settles its bookkeeping:
    /// the txid is recorded as a self transaction, the pending-spent UTXOs it
    /// claimed are promoted to spent, and the payment's fingerprint is
    /// written to the signer cache.
    ///
    /// A node that loses the broadcast race gets "already known" back from
    /// the chain; that is success, with the txid recovered by decoding the
    /// payload locally. The chain is the source of truth throughout: a cache
    /// or meta write failure is logged but does not undo the broadcast.
    pub async fn broadcast_tx(
        &self,
        payment: &OutboundPayment,
        raw_tx: &[u8],
    ) -> Result<String, BroadcastError> {
        let height = self.chain_rpc.get_block_count().await?;

        let txid = match self.chain_rpc.send_raw_transaction(raw_tx).await {
            Ok(txid) => {
                info!(%txid, "broadcast to chain successfully");
                txid
            }
            Err(err) if err.is_already_known() => {
                let txid = self.encoder.decode_txid(raw_tx)?;
                info!(%txid, "broadcast to chain by another node");
                txid
            }
            Err(err) => return Err(BroadcastError::Rpc(err)),
        };

        // save the txid in the block meta in case we need to errata it later
        let mut meta = match self.meta_ops.get_block_meta_async(height).await {
            Ok(Some(meta)) => meta,
            Ok(None) => BlockMeta::new("", height, ""),
            Err(err) => {
                error!(%err, %height, "fail to get block meta");
                BlockMeta::new("", height, "")
            }
        };
        meta.add_self_transaction(&txid);
        if let Err(err) = self.meta_ops.put_block_meta_async((height, meta)).await {
            error!(%err, %height, "fail to save block meta");
        }

        self.commit_pending_spent(&txid).await;

        let entry = SignerCacheEntry {
            vault_pub_key: payment.vault_pub_key.clone(),
            txid: txid.clone(),
        };
        if let Err(err) = self
            .cache_ops
            .put_signed_async((payment.fingerprint(), entry))
            .await
        {
            // duplicate signing attempts after a failed cache write are
            // self-limiting, the UTXOs are already spent on-chain
            error!(%err, "fail to mark payment as signed");
        }

        Ok(txid)
    }

    /// Promotes pending-spent entries for the broadcast transaction to spent
    /// in every meta that carries them.
    async fn commit_pending_spent(&self, txid: &str) {
        let metas = match self.meta_ops.get_block_metas_async(()).await {
            Ok(metas) => metas,
            Err(err) => {
                error!(%err, "fail to get block metas");
                return;
            }
        };
        let prefix = format!("{txid}:");
        for mut meta in metas {
            let claimed = meta
                .pending_spent_utxos
                .iter()
                .any(|item| item.len() >= prefix.len() && item[..prefix.len()].eq_ignore_ascii_case(&prefix));
            if !claimed {
                continue;
            }
            meta.commit_pending_spent(txid);
            if let Err(err) = self
                .meta_ops
                .put_block_meta_async((meta.height, meta))
                .await
            {
                error!(%err, "fail to save block meta");
            }
        }
    }

    /// Signs and broadcasts in one go, used by internal payments.
    pub async fn sign_and_broadcast(
        &self,
        payment: &OutboundPayment,
        bridge_height: u64,
    ) -> anyhow::Result<Option<String>> {
        let Some(signed) = self.sign_tx(payment, bridge_height).await? else {
            return Ok(None);
        };
        let txid = self.broadcast_tx(payment, &signed.raw_tx).await?;
        Ok(Some(txid))
    }
}
