//! Background consolidation of a vault's UTXO set.
//!
//! When a vault accumulates as many eligible UTXOs as one transaction may
//! spend, the client sweeps them back to the vault's own address. Gated so
//! at most one consolidation runs per process.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::*;

use causeway_primitives::payment::OutboundPayment;

use crate::bridge::BridgeAuthority;
use crate::client::Client;
use crate::encoder::TxEncoder;
use crate::memo::CONSOLIDATE_MEMO;
use crate::rpc::traits::ChainRpc;
use crate::signer::RemoteSigner;

impl<C, E, B, S> Client<C, E, B, S>
where
    C: ChainRpc,
    E: TxEncoder,
    B: BridgeAuthority,
    S: RemoteSigner,
{
    /// Spawns a consolidation pass unless one is already running.
    pub fn maybe_spawn_consolidate(client: &Arc<Self>) {
        if client.consolidate_in_progress.swap(true, Ordering::SeqCst) {
            return;
        }
        let client = client.clone();
        tokio::spawn(async move {
            client.consolidate_utxos().await;
        });
    }

    pub(crate) async fn consolidate_utxos(&self) {
        if let Err(err) = self.run_consolidation().await {
            error!(%err, "fail to consolidate utxos");
        }
        self.consolidate_in_progress.store(false, Ordering::SeqCst);
    }

    async fn run_consolidation(&self) -> anyhow::Result<()> {
        if !self.bridge.is_node_active().await? {
            debug!("node is not active, doesn't need to consolidate utxos");
            return Ok(());
        }

        let vaults = self.bridge.get_asgard_vaults().await?;
        let max_utxos = self.max_utxos_to_spend().await;

        for vault in vaults {
            if !vault.contains(self.node_pub_key()) {
                // not part of this vault, nothing to consolidate
                continue;
            }

            let utxos = match self.select_utxos(&vault.pub_key, 0).await {
                Ok(utxos) => utxos,
                Err(err) => {
                    error!(%err, vault = %vault.pub_key, "fail to get eligible utxos");
                    continue;
                }
            };
            if (utxos.len() as u64) < max_utxos {
                debug!(count = utxos.len(), "no need to consolidate");
                continue;
            }
            info!(count = utxos.len(), vault = %vault.pub_key, "starting consolidation");

            let total_amount: u64 = utxos.iter().map(|u| u.value).sum();
            let to_address = match self.encoder.address_from_pubkey(&vault.pub_key) {
                Ok(address) => address,
                Err(err) => {
                    error!(%err, vault = %vault.pub_key, "fail to get vault address");
                    continue;
                }
            };

            let payment = OutboundPayment {
                to_address,
                vault_pub_key: vault.pub_key.clone(),
                amount: total_amount,
                max_gas: None,
                memo: CONSOLIDATE_MEMO.to_owned(),
                checkpoint: None,
                internal: true,
            };

            let bridge_height = match self.bridge.get_bridge_height().await {
                Ok(height) => height,
                Err(err) => {
                    error!(%err, "fail to get bridge block height");
                    continue;
                }
            };

            match self.sign_and_broadcast(&payment, bridge_height).await {
                Ok(Some(txid)) => info!(%txid, "broadcast consolidate tx successful"),
                Ok(None) => debug!("consolidate payment skipped"),
                Err(err) => error!(%err, "fail to sign or broadcast consolidate tx"),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::ClientConfig;
    use crate::test_utils::harness::{build_client, TestHarness, NODE_PUB_KEY};
    use crate::test_utils::{utxo, vault};

    use super::*;

    fn setup(member: &str) -> TestHarness {
        let harness = build_client(ClientConfig::default());
        harness.chain.set_height(100);
        harness.bridge.set_mimir("MaxUTXOsToSpend", 3);
        harness
            .bridge
            .set_vaults(vec![vault("vault-1", &[member, "peer-2"], 0)]);
        harness
    }

    fn fund(harness: &TestHarness, count: usize) {
        let utxos = (0..count)
            .map(|i| utxo(&format!("tx{i:02}"), 0, 1_000_000, 90, "addr-vault-1"))
            .collect();
        harness.chain.add_utxos("addr-vault-1", utxos);
    }

    #[tokio::test]
    async fn test_consolidation_sweeps_full_vault() {
        let harness = setup(NODE_PUB_KEY);
        fund(&harness, 3);

        harness.client.consolidate_utxos().await;

        assert_eq!(harness.chain.broadcasts(), 1);
        assert_eq!(harness.signer.calls(), 3, "one keysign per swept input");
        assert!(
            !harness
                .client
                .consolidate_in_progress
                .load(Ordering::SeqCst),
            "the in-progress gate must be released"
        );

        // the sweep is cached like any other payment
        let payment = OutboundPayment {
            to_address: "addr-vault-1".into(),
            vault_pub_key: "vault-1".into(),
            amount: 3_000_000,
            max_gas: None,
            memo: CONSOLIDATE_MEMO.into(),
            checkpoint: None,
            internal: true,
        };
        let cached = harness
            .client
            .cache_ops
            .has_signed_async(payment.fingerprint())
            .await
            .unwrap();
        assert!(cached);
    }

    #[tokio::test]
    async fn test_consolidation_skips_below_budget() {
        let harness = setup(NODE_PUB_KEY);
        fund(&harness, 2);

        harness.client.consolidate_utxos().await;

        assert_eq!(harness.chain.broadcasts(), 0);
        assert_eq!(harness.signer.calls(), 0);
    }

    #[tokio::test]
    async fn test_consolidation_skips_foreign_vault() {
        let harness = setup("someone-else");
        fund(&harness, 3);

        harness.client.consolidate_utxos().await;

        assert_eq!(harness.chain.broadcasts(), 0);
    }

    #[tokio::test]
    async fn test_consolidation_skips_inactive_node() {
        let harness = setup(NODE_PUB_KEY);
        fund(&harness, 3);
        harness.bridge.node_active.store(false, Ordering::SeqCst);

        harness.client.consolidate_utxos().await;

        assert_eq!(harness.chain.broadcasts(), 0);
    }

    #[tokio::test]
    async fn test_spawn_gate_prevents_overlap() {
        let harness = setup(NODE_PUB_KEY);

        harness
            .client
            .consolidate_in_progress
            .store(true, Ordering::SeqCst);
        Client::maybe_spawn_consolidate(&harness.client);

        // the gate was taken, so nothing ran and the flag is untouched
        assert!(harness
            .client
            .consolidate_in_progress
            .load(Ordering::SeqCst));
        assert_eq!(harness.chain.broadcasts(), 0);
    }
}
