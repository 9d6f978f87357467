//! Partial-transaction construction with fee reconciliation and the
//! crash-recovery checkpoint.

use tracing::*;

use causeway_db::types::BlockMeta;
use causeway_primitives::payment::{OutboundPayment, PartialTx, TxOutput};

use crate::bridge::BridgeAuthority;
use crate::client::Client;
use crate::encoder::TxEncoder;
use crate::rpc::traits::ChainRpc;
use crate::signer::errors::{SignTxError, SignerError};
use crate::signer::RemoteSigner;

impl<C, E, B, S> Client<C, E, B, S>
where
    C: ChainRpc,
    E: TxEncoder,
    B: BridgeAuthority,
    S: RemoteSigner,
{
    /// Builds the partial transaction for an outbound payment.
    ///
    /// The pre-digest structure is serialized as the checkpoint *before* the
    /// encoder derives the txid and sighashes, and the selected UTXOs are
    /// recorded as pending-spent before control returns to the signing
    /// stage. A failure after that point carries the checkpoint so a retry
    /// reproduces identical digests instead of re-selecting inputs.
    pub(crate) async fn build_partial_tx(
        &self,
        payment: &OutboundPayment,
    ) -> Result<(PartialTx, Vec<u8>), SignTxError> {
        self.encoder
            .validate_address(&payment.to_address)
            .map_err(|err| SignerError::InvalidAddress(format!("{}: {err}", payment.to_address)))?;

        let tip_height = self.chain_rpc.get_block_count().await.map_err(SignerError::from)?;
        let from_address = self
            .encoder
            .address_from_pubkey(&payment.vault_pub_key)
            .map_err(SignerError::from)?;

        // the gas allowance is part of the selection target so enough inputs
        // are gathered to pay the fee on top of the payment
        let target = payment.amount.saturating_add(payment.max_gas.unwrap_or(0));
        let utxos = self.select_utxos(&payment.vault_pub_key, target).await?;
        if utxos.is_empty() {
            return Err(SignerError::NoSpendableUtxos.into());
        }

        let total_input: u64 = utxos.iter().map(|u| u.value).sum();
        let mut fee = self
            .encoder
            .calculate_fee(utxos.len() as u64, 2, &payment.memo);
        let mut amount_to_customer = payment.amount;

        if let Some(max_gas) = payment.max_gas {
            if fee > max_gas {
                info!(%max_gas, estimated = %fee, "estimated gas exceeds the allowance, capping");
                fee = max_gas;
            } else if fee < max_gas {
                // the saved allowance is the customer's, not the vault's
                let gap = max_gas - fee;
                info!(%max_gas, required = %fee, %gap, "gas gap goes to customer");
                amount_to_customer += gap;
            }
        } else if payment.internal {
            // self payments have no allowance and pay the fee themselves
            amount_to_customer = amount_to_customer.saturating_sub(fee);
        }

        let required = amount_to_customer.saturating_add(fee);
        if total_input < required {
            return Err(SignerError::InsufficientFunds {
                available: total_input,
                required,
            }
            .into());
        }
        let change = total_input - amount_to_customer - fee;

        info!(
            %total_input,
            %amount_to_customer,
            %fee,
            %change,
            "built outbound amounts"
        );

        let mut outputs = vec![TxOutput {
            address: payment.to_address.clone(),
            amount: amount_to_customer,
            memo: payment.memo.clone(),
        }];
        if change > 0 {
            debug!(%change, "send change back to self");
            outputs.push(TxOutput {
                address: from_address,
                amount: change,
                memo: String::new(),
            });
        }

        let ptx = PartialTx {
            height: tip_height,
            expiry_height: 0, // never expires
            txid: None,
            inputs: utxos,
            outputs,
            fee,
            sighashes: Vec::new(),
        };

        // checkpoint first, then derive digests: a crash between the two
        // resumes from the checkpoint instead of re-running selection
        let checkpoint = serde_json::to_vec(&ptx).map_err(SignerError::from)?;

        let ptx = self
            .encoder
            .build_digests(&payment.vault_pub_key, ptx)
            .map_err(|err| {
                SignTxError::with_checkpoint(checkpoint.clone(), SignerError::from(err))
            })?;

        if ptx.sighashes.len() != ptx.inputs.len() {
            return Err(SignTxError::with_checkpoint(
                checkpoint,
                SignerError::DigestCountMismatch {
                    sighashes: ptx.sighashes.len(),
                    inputs: ptx.inputs.len(),
                },
            ));
        }
        let txid = ptx
            .txid
            .clone()
            .ok_or_else(|| SignTxError::with_checkpoint(checkpoint.clone(), SignerError::MissingTxid))?;

        info!(%txid, num_sighashes = ptx.sighashes.len(), "built partial transaction");

        self.record_pending_spent(&txid, &ptx, tip_height)
            .await
            .map_err(|err| SignTxError::with_checkpoint(checkpoint.clone(), err.into()))?;

        Ok((ptx, checkpoint))
    }

    /// Claims the partial transaction's inputs in the current height's meta,
    /// tagged with its txid, so no other build for this vault selects them.
    async fn record_pending_spent(
        &self,
        txid: &str,
        ptx: &PartialTx,
        height: u64,
    ) -> Result<(), causeway_db::DbError> {
        let mut meta = match self.meta_ops.get_block_meta_async(height).await? {
            Some(meta) => meta,
            None => BlockMeta::new("", height, ""),
        };
        for utxo in &ptx.inputs {
            meta.add_pending_spent_utxo(txid, &utxo.txid, utxo.vout);
        }
        self.meta_ops.put_block_meta_async((height, meta)).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use crate::config::ClientConfig;
    use crate::test_utils::harness::{build_client, TestHarness};
    use crate::test_utils::{utxo, vault};

    use super::*;

    fn setup() -> TestHarness {
        let harness = build_client(ClientConfig::default());
        harness.chain.set_height(100);
        harness
            .bridge
            .set_vaults(vec![vault("vault-1", &["peer-1", "peer-2"], 0)]);
        harness
    }

    fn payment(amount: u64, max_gas: Option<u64>) -> OutboundPayment {
        OutboundPayment {
            to_address: "cust-1".into(),
            vault_pub_key: "vault-1".into(),
            amount,
            max_gas,
            memo: "OUT:ABC".into(),
            checkpoint: None,
            internal: false,
        }
    }

    fn assert_fee_identity(ptx: &PartialTx) {
        let change = ptx.outputs.get(1).map(|o| o.amount).unwrap_or(0);
        assert_eq!(
            ptx.outputs[0].amount + ptx.fee,
            ptx.total_input_value() - change,
        );
    }

    #[tokio::test]
    async fn test_capped_fee_with_change_output() {
        let harness = setup();
        harness.chain.add_utxos(
            "addr-vault-1",
            vec![utxo("aa", 0, 1_500_000_000, 93, "addr-vault-1")],
        );

        let (ptx, _checkpoint) = harness
            .client
            .build_partial_tx(&payment(500_000, Some(10_000)))
            .await
            .unwrap();

        // computed fee exceeds the allowance and is capped at it
        assert_eq!(ptx.fee, 10_000);
        assert_eq!(ptx.outputs.len(), 2);
        assert_eq!(ptx.outputs[0].amount, 500_000);
        assert_eq!(ptx.outputs[0].address, "cust-1");
        assert_eq!(ptx.outputs[1].amount, 1_499_490_000);
        assert_eq!(ptx.outputs[1].address, "addr-vault-1");
        assert_fee_identity(&ptx);
    }

    #[tokio::test]
    async fn test_gas_surplus_goes_to_customer() {
        let harness = setup();
        harness.chain.add_utxos(
            "addr-vault-1",
            vec![utxo("aa", 0, 10_000_000, 93, "addr-vault-1")],
        );

        // memo "OUT:ABC" occupies one extra output slot: fee = 30_000
        let (ptx, _checkpoint) = harness
            .client
            .build_partial_tx(&payment(500_000, Some(50_000)))
            .await
            .unwrap();

        assert_eq!(ptx.fee, 30_000);
        assert_eq!(ptx.outputs[0].amount, 520_000);
        assert_fee_identity(&ptx);
    }

    #[tokio::test]
    async fn test_internal_payment_pays_own_fee() {
        let harness = setup();
        harness.chain.add_utxos(
            "addr-vault-1",
            vec![utxo("aa", 0, 1_000_000, 93, "addr-vault-1")],
        );

        let mut pay = payment(1_000_000, None);
        pay.internal = true;
        pay.memo = "consolidate".into();

        let (ptx, _checkpoint) = harness.client.build_partial_tx(&pay).await.unwrap();

        // fee for 1 input, 2 outputs and an 11-char memo
        assert_eq!(ptx.fee, 30_000);
        assert_eq!(ptx.outputs.len(), 1, "full sweep leaves no change");
        assert_eq!(ptx.outputs[0].amount, 970_000);
        assert_fee_identity(&ptx);
    }

    #[tokio::test]
    async fn test_insufficient_funds() {
        let harness = setup();
        harness.chain.add_utxos(
            "addr-vault-1",
            vec![utxo("aa", 0, 100_000, 93, "addr-vault-1")],
        );

        let err = harness
            .client
            .build_partial_tx(&payment(500_000, Some(10_000)))
            .await
            .unwrap_err();

        assert!(matches!(
            err.source,
            SignerError::InsufficientFunds {
                available: 100_000,
                required: 510_000,
            }
        ));
        // nothing was checkpointed and no spend intent recorded
        assert!(err.checkpoint.is_none());
        let meta = harness
            .client
            .meta_ops
            .get_block_meta_async(100)
            .await
            .unwrap();
        assert!(meta.is_none_or(|m| !m.has_pending_spent_utxos()));
    }

    #[tokio::test]
    async fn test_checkpoint_survives_digest_failure() {
        let harness = setup();
        harness.chain.add_utxos(
            "addr-vault-1",
            vec![utxo("aa", 0, 1_000_000, 93, "addr-vault-1")],
        );
        harness.encoder.fail_build.store(true, Ordering::SeqCst);

        let err = harness
            .client
            .build_partial_tx(&payment(500_000, Some(50_000)))
            .await
            .unwrap_err();

        let checkpoint = err.checkpoint.expect("checkpoint must survive the failure");
        let restored: PartialTx = serde_json::from_slice(&checkpoint).unwrap();
        assert_eq!(restored.inputs.len(), 1);
        assert_eq!(restored.inputs[0].txid, "aa");
        assert!(restored.txid.is_none(), "checkpoint predates the encoder");
        assert!(restored.sighashes.is_empty());
    }

    #[tokio::test]
    async fn test_pending_spent_blocks_reselection() {
        let harness = setup();
        harness.chain.add_utxos(
            "addr-vault-1",
            vec![utxo("aa", 0, 1_000_000, 93, "addr-vault-1")],
        );

        harness
            .client
            .build_partial_tx(&payment(500_000, Some(50_000)))
            .await
            .unwrap();

        // the only UTXO is now claimed by the first build
        let err = harness
            .client
            .build_partial_tx(&payment(400_000, Some(50_000)))
            .await
            .unwrap_err();
        assert!(matches!(err.source, SignerError::NoSpendableUtxos));
    }
}
