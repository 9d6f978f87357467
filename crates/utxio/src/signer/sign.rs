//! The signing coordinator: per-vault serialization, checkpoint restore,
//! parallel digest signing and blame forwarding.

use std::sync::atomic::Ordering;

use tracing::*;

use causeway_primitives::events::DepositEvent;
use causeway_primitives::payment::{OutboundPayment, PartialTx};

use crate::bridge::BridgeAuthority;
use crate::client::Client;
use crate::encoder::TxEncoder;
use crate::rpc::traits::ChainRpc;
use crate::signer::errors::{SignTxError, SignerError};
use crate::signer::RemoteSigner;

/// A fully signed outbound transaction, ready for broadcast, along with the
/// observation the signer reports ahead of it.
#[derive(Debug, Clone)]
pub struct SignedOutbound {
    pub raw_tx: Vec<u8>,
    pub txid: String,
    pub observation: DepositEvent,
}

impl<C, E, B, S> Client<C, E, B, S>
where
    C: ChainRpc,
    E: TxEncoder,
    B: BridgeAuthority,
    S: RemoteSigner,
{
    /// Builds and signs the outbound transaction.
    ///
    /// Returns `None` when there is nothing to do: a zero-amount payment, or
    /// one whose fingerprint is already in the signer cache. At most one
    /// signing operation runs per vault at a time; distinct vaults sign
    /// concurrently.
    pub async fn sign_tx(
        &self,
        payment: &OutboundPayment,
        bridge_height: u64,
    ) -> Result<Option<SignedOutbound>, SignTxError> {
        // skip outbounds without coins
        if payment.amount == 0 {
            return Ok(None);
        }

        // skip outbounds that have been signed before
        let fingerprint = payment.fingerprint();
        if self
            .cache_ops
            .has_signed_async(fingerprint)
            .await
            .map_err(SignerError::from)?
        {
            info!(%fingerprint, "transaction signed before, ignore");
            return Ok(None);
        }

        // only one keysign per vault at a time
        let vault_lock = self.vault_locks.lock_for(&payment.vault_pub_key);
        let _guard = vault_lock.lock().await;

        let (ptx, checkpoint) = match payment.checkpoint.as_deref() {
            Some(checkpoint) => {
                info!("loading transaction from checkpoint");
                let initial: PartialTx =
                    serde_json::from_slice(checkpoint).map_err(SignerError::from)?;
                // re-run only digest derivation from the checkpointed state;
                // re-selecting inputs here could double-spend
                let ptx = self
                    .encoder
                    .build_digests(&payment.vault_pub_key, initial)
                    .map_err(|err| {
                        SignTxError::with_checkpoint(checkpoint.to_vec(), SignerError::from(err))
                    })?;
                (ptx, checkpoint.to_vec())
            }
            None => self.build_partial_tx(payment).await?,
        };

        if ptx.outputs.is_empty() || ptx.outputs.len() > 2 {
            return Err(SignTxError::with_checkpoint(
                checkpoint,
                SignerError::InvalidOutputCount(ptx.outputs.len()),
            ));
        }
        if let Some(max_gas) = payment.max_gas {
            if ptx.fee > max_gas {
                return Err(SignTxError::with_checkpoint(
                    checkpoint,
                    SignerError::FeeExceedsMaxGas {
                        fee: ptx.fee,
                        max_gas,
                    },
                ));
            }
        }
        if ptx.sighashes.is_empty() {
            return Err(SignTxError::with_checkpoint(
                checkpoint,
                SignerError::NoSighashes,
            ));
        }

        let signatures = match self.sign_digests(&ptx, payment, bridge_height).await {
            Ok(signatures) => signatures,
            Err(err) => return Err(SignTxError::with_checkpoint(checkpoint, err)),
        };

        let raw_tx = self
            .encoder
            .apply_signatures(&payment.vault_pub_key, &ptx, &signatures)
            .map_err(|err| {
                SignTxError::with_checkpoint(checkpoint.clone(), SignerError::from(err))
            })?;

        let txid = ptx
            .txid
            .clone()
            .ok_or_else(|| SignTxError::with_checkpoint(checkpoint.clone(), SignerError::MissingTxid))?;
        debug!(%txid, "signed outbound transaction");

        // the observation the signer reports before broadcast; fall back to
        // the scanner's height when the node is unreachable
        let chain_height = match self.chain_rpc.get_block_count().await {
            Ok(height) => height,
            Err(_) => self.current_height.load(Ordering::SeqCst),
        };
        let sender = self
            .encoder
            .address_from_pubkey(&payment.vault_pub_key)
            .map_err(|err| {
                SignTxError::with_checkpoint(checkpoint.clone(), SignerError::from(err))
            })?;
        let observation = DepositEvent {
            height: chain_height + 1,
            txid: txid.clone(),
            sender,
            recipient: payment.to_address.clone(),
            // the first output is the outbound amount
            amount: ptx.outputs[0].amount,
            gas: ptx.fee,
            memo: payment.memo.clone(),
            observed_vault_pub_key: Some(payment.vault_pub_key.clone()),
        };

        Ok(Some(SignedOutbound {
            raw_tx,
            txid,
            observation,
        }))
    }

    /// Signs every digest concurrently, one task per input, collecting
    /// results into pre-sized slots so the signature order matches the input
    /// order. Failures are aggregated rather than short-circuited, and any
    /// structured blame is forwarded to the bridge before the error is
    /// returned.
    async fn sign_digests(
        &self,
        ptx: &PartialTx,
        payment: &OutboundPayment,
        bridge_height: u64,
    ) -> Result<Vec<Vec<u8>>, SignerError> {
        let local = self.node_signer.is_own_vault(&payment.vault_pub_key);

        let mut handles = Vec::with_capacity(ptx.sighashes.len());
        for digest in &ptx.sighashes {
            let digest = *digest;
            let handle = if local {
                let signer = self.node_signer.clone();
                tokio::spawn(async move { signer.sign_digest(&digest) })
            } else {
                let signer = self.remote_signer.clone();
                let vault_pub_key = payment.vault_pub_key.clone();
                tokio::spawn(async move { signer.sign(&digest, &vault_pub_key).await })
            };
            handles.push(handle);
        }

        let mut signatures: Vec<Option<Vec<u8>>> = vec![None; ptx.sighashes.len()];
        let mut failures: Vec<String> = Vec::new();
        for (input, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(Ok(signature)) => signatures[input] = Some(signature),
                Ok(Err(err)) => {
                    if let Some(blame) = err.blame() {
                        self.forward_keysign_blame(blame, payment, bridge_height)
                            .await;
                    }
                    failures.push(format!("input {input}: {err}"));
                }
                Err(err) => failures.push(format!("input {input}: task failed: {err}")),
            }
        }

        if !failures.is_empty() {
            return Err(SignerError::Keysign(failures.join("; ")));
        }

        // sanity check that every slot was filled
        signatures
            .into_iter()
            .enumerate()
            .map(|(input, slot)| slot.ok_or(SignerError::MissingSignature { input }))
            .collect()
    }

    /// Best-effort: a forwarding failure is logged and does not mask the
    /// signing error.
    async fn forward_keysign_blame(
        &self,
        blame: &causeway_primitives::vault::KeysignBlame,
        payment: &OutboundPayment,
        bridge_height: u64,
    ) {
        match self
            .bridge
            .post_keysign_failure(
                blame,
                bridge_height,
                &payment.memo,
                payment.amount,
                &payment.vault_pub_key,
            )
            .await
        {
            Ok(txid) => info!(%txid, "posted keysign failure to the bridge"),
            Err(err) => error!(%err, "fail to post keysign failure to the bridge"),
        }
    }
}
