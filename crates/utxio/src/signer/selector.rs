//! UTXO selection under the safety and confirmation rules.

use tracing::*;

use causeway_db::types::BlockMeta;
use causeway_primitives::utxo::Utxo;

use crate::bridge::BridgeAuthority;
use crate::client::Client;
use crate::encoder::TxEncoder;
use crate::rpc::traits::ChainRpc;
use crate::signer::errors::SignerError;
use crate::signer::RemoteSigner;

/// Mimir key overriding the per-transaction input budget.
const MIMIR_MAX_UTXOS_TO_SPEND: &str = "MaxUTXOsToSpend";

impl<C, E, B, S> Client<C, E, B, S>
where
    C: ChainRpc,
    E: TxEncoder,
    B: BridgeAuthority,
    S: RemoteSigner,
{
    /// The per-transaction input budget, taken from mimir when set there.
    pub(crate) async fn max_utxos_to_spend(&self) -> u64 {
        match self.bridge.get_mimir(MIMIR_MAX_UTXOS_TO_SPEND).await {
            Ok(value) if value > 0 => value as u64,
            Ok(_) => self.config.max_utxos_per_tx,
            Err(err) => {
                error!(%err, "fail to get MaxUTXOsToSpend");
                self.config.max_utxos_per_tx
            }
        }
    }

    /// Selects UTXOs of the vault worth at least `target_amount`.
    ///
    /// Candidates are spent oldest first, deterministically: sorted by
    /// confirmation count descending, tie-broken by txid. Selection stops
    /// once the input budget is reached and the accumulated value covers the
    /// target; the result can exceed the target, producing change.
    ///
    /// The caller is responsible for checking the accumulated value is
    /// actually sufficient.
    pub(crate) async fn select_utxos(
        &self,
        vault_pub_key: &str,
        target_amount: u64,
    ) -> Result<Vec<Utxo>, SignerError> {
        let max_utxos = self.max_utxos_to_spend().await;
        // a vault held by the node's own unshared key carries no multi-party
        // risk, which relaxes the dust and confirmation rules
        let privileged = self.node_signer.is_own_vault(vault_pub_key);
        let address = self.encoder.address_from_pubkey(vault_pub_key)?;

        let mut utxos = self.chain_rpc.list_unspent(&address).await?;
        let tip_height = self.chain_rpc.get_block_count().await?;

        utxos.sort_by(|a, b| {
            b.confirmations(tip_height)
                .cmp(&a.confirmations(tip_height))
                .then_with(|| a.txid.cmp(&b.txid))
        });

        let metas = self.meta_ops.get_block_metas_async(()).await?;

        let mut selected: Vec<Utxo> = Vec::with_capacity(utxos.len());
        let mut input_amount: u64 = 0;
        let min_confirmations = self.config.min_utxo_confirmations;
        let dust_threshold = self.config.dust_threshold;

        for utxo in utxos {
            let Some(owner_address) = self.encoder.extract_script_address(&utxo.script) else {
                info!(key = %utxo.key(), "invalid UTXO, can't spend it");
                continue;
            };

            let (is_self, is_spent) = spent_info(&metas, &utxo);
            if is_spent {
                continue;
            }

            let confirmations = utxo.confirmations(tip_height);

            // unconfirmed external funds are not trustworthy inputs
            if confirmations == 0 && !is_self && !self.is_vault_address(&owner_address).await {
                continue;
            }

            if utxo.value < dust_threshold && !is_self && !privileged {
                continue;
            }

            if !privileged && confirmations < min_confirmations && !is_self {
                continue;
            }

            input_amount += utxo.value;
            selected.push(utxo);

            // in the scenario that there are too many unspent utxos available,
            // make sure it doesn't spend too much, as too many inputs put
            // pressure on the remote signer
            if selected.len() as u64 >= max_utxos && input_amount >= target_amount {
                break;
            }
        }

        Ok(selected)
    }
}

/// Whether the UTXO stems from one of our own outbound transactions, and
/// whether any stored meta already records it as spent or pending-spent.
fn spent_info(metas: &[BlockMeta], utxo: &Utxo) -> (bool, bool) {
    let key = utxo.key();
    let mut is_self = false;
    let mut is_spent = false;
    for meta in metas {
        if !is_self
            && meta
                .self_transactions
                .iter()
                .any(|tx| tx.eq_ignore_ascii_case(&utxo.txid))
        {
            is_self = true;
        }
        if !is_spent && (meta.has_spent_utxo(&key) || meta.has_pending_spent_utxo(&key)) {
            debug!(%key, "utxo is already spent or claimed");
            is_spent = true;
        }
        if is_self && is_spent {
            break;
        }
    }
    (is_self, is_spent)
}

#[cfg(test)]
mod tests {
    use crate::config::ClientConfig;
    use crate::test_utils::harness::{build_client, TestHarness, NODE_PUB_KEY};
    use crate::test_utils::{utxo as owned_utxo, vault};

    use super::*;

    fn utxo(txid: &str, vout: u32, height: u64) -> Utxo {
        Utxo {
            txid: txid.into(),
            vout,
            script: "76a914".into(),
            value: 100_000,
            height,
        }
    }

    fn setup() -> TestHarness {
        let harness = build_client(ClientConfig::default());
        harness.chain.set_height(100);
        harness
            .bridge
            .set_vaults(vec![vault("vault-1", &["peer-1"], 0)]);
        harness
    }

    #[tokio::test]
    async fn test_selection_is_deterministic_and_oldest_first() {
        let harness = setup();
        // same confirmations tie-break on txid, deeper blocks come first
        harness.chain.add_utxos(
            "addr-vault-1",
            vec![
                owned_utxo("cc", 0, 200_000, 95, "addr-vault-1"),
                owned_utxo("aa", 0, 200_000, 95, "addr-vault-1"),
                owned_utxo("bb", 0, 200_000, 90, "addr-vault-1"),
            ],
        );

        let first = harness.client.select_utxos("vault-1", 600_000).await.unwrap();
        let second = harness.client.select_utxos("vault-1", 600_000).await.unwrap();

        let order: Vec<&str> = first.iter().map(|u| u.txid.as_str()).collect();
        assert_eq!(order, vec!["bb", "aa", "cc"]);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_selection_skips_spent_and_claimed_utxos() {
        let harness = setup();
        harness.chain.add_utxos(
            "addr-vault-1",
            vec![
                owned_utxo("aa", 0, 200_000, 90, "addr-vault-1"),
                owned_utxo("bb", 0, 200_000, 91, "addr-vault-1"),
                owned_utxo("cc", 0, 200_000, 92, "addr-vault-1"),
            ],
        );
        let mut meta = BlockMeta::new("p", 95, "h95");
        meta.spent_utxos.push("aa:0".into());
        meta.add_pending_spent_utxo("spender", "bb", 0);
        harness
            .client
            .meta_ops
            .put_block_meta_async((95, meta))
            .await
            .unwrap();

        let selected = harness.client.select_utxos("vault-1", 0).await.unwrap();
        let txids: Vec<&str> = selected.iter().map(|u| u.txid.as_str()).collect();
        assert_eq!(txids, vec!["cc"]);
    }

    #[tokio::test]
    async fn test_selection_skips_unconfirmed_external_funds() {
        let harness = setup();
        harness.chain.add_utxos(
            "addr-vault-1",
            vec![
                // zero confirmations, owned by an external address
                owned_utxo("aa", 0, 200_000, 0, "cust-1"),
                owned_utxo("bb", 0, 200_000, 90, "addr-vault-1"),
            ],
        );

        let selected = harness.client.select_utxos("vault-1", 0).await.unwrap();
        let txids: Vec<&str> = selected.iter().map(|u| u.txid.as_str()).collect();
        assert_eq!(txids, vec!["bb"]);
    }

    #[tokio::test]
    async fn test_min_confirmations_skipped_unless_self() {
        let mut config = ClientConfig::default();
        config.min_utxo_confirmations = 2;
        let harness = build_client(config);
        harness.chain.set_height(100);
        harness
            .bridge
            .set_vaults(vec![vault("vault-1", &["peer-1"], 0)]);
        harness.chain.add_utxos(
            "addr-vault-1",
            vec![
                // in the tip block: 1 confirmation, below the min of 2
                owned_utxo("aa", 0, 200_000, 100, "addr-vault-1"),
                owned_utxo("bb", 0, 200_000, 100, "addr-vault-1"),
            ],
        );
        // "bb" stems from our own outbound, which bypasses the min-conf rule
        let mut meta = BlockMeta::new("p", 100, "h100");
        meta.add_self_transaction("bb");
        harness
            .client
            .meta_ops
            .put_block_meta_async((100, meta))
            .await
            .unwrap();

        let selected = harness.client.select_utxos("vault-1", 0).await.unwrap();
        let txids: Vec<&str> = selected.iter().map(|u| u.txid.as_str()).collect();
        assert_eq!(txids, vec!["bb"]);
    }

    #[tokio::test]
    async fn test_dust_skipped_unless_privileged() {
        let harness = setup();
        harness.chain.add_utxos(
            "addr-vault-1",
            vec![
                owned_utxo("aa", 0, 500, 90, "addr-vault-1"), // below dust
                owned_utxo("bb", 0, 200_000, 90, "addr-vault-1"),
            ],
        );
        // same dust UTXO on the node's own single-signer vault is fine
        harness.chain.add_utxos(
            &format!("addr-{NODE_PUB_KEY}"),
            vec![owned_utxo("cc", 0, 500, 90, &format!("addr-{NODE_PUB_KEY}"))],
        );

        let shared = harness.client.select_utxos("vault-1", 0).await.unwrap();
        let txids: Vec<&str> = shared.iter().map(|u| u.txid.as_str()).collect();
        assert_eq!(txids, vec!["bb"]);

        let own = harness.client.select_utxos(NODE_PUB_KEY, 0).await.unwrap();
        let txids: Vec<&str> = own.iter().map(|u| u.txid.as_str()).collect();
        assert_eq!(txids, vec!["cc"]);
    }

    #[tokio::test]
    async fn test_selection_respects_input_budget() {
        let harness = setup();
        let utxos: Vec<Utxo> = (0..12)
            .map(|i| owned_utxo(&format!("tx{i:02}"), 0, 100_000, 90, "addr-vault-1"))
            .collect();
        harness.chain.add_utxos("addr-vault-1", utxos);

        // target met within the budget: stop at the budget
        let selected = harness.client.select_utxos("vault-1", 500_000).await.unwrap();
        assert_eq!(selected.len(), 10);

        // budget may be exceeded while the target is not yet met
        let selected = harness
            .client
            .select_utxos("vault-1", 1_150_000)
            .await
            .unwrap();
        assert_eq!(selected.len(), 12);
    }

    #[tokio::test]
    async fn test_mimir_overrides_input_budget() {
        let harness = setup();
        harness.bridge.set_mimir(MIMIR_MAX_UTXOS_TO_SPEND, 3);
        let utxos: Vec<Utxo> = (0..5)
            .map(|i| owned_utxo(&format!("tx{i:02}"), 0, 100_000, 90, "addr-vault-1"))
            .collect();
        harness.chain.add_utxos("addr-vault-1", utxos);

        let selected = harness.client.select_utxos("vault-1", 0).await.unwrap();
        assert_eq!(selected.len(), 3);
    }

    #[test]
    fn test_spent_info_checks_pending_and_spent() {
        let mut meta = BlockMeta::new("p", 5, "b");
        meta.add_pending_spent_utxo("spender", "txa", 0);
        let mut other = BlockMeta::new("p", 6, "b2");
        other.spent_utxos.push("txb:1".into());
        other.add_self_transaction("txc");
        let metas = vec![meta, other];

        assert_eq!(spent_info(&metas, &utxo("txa", 0, 1)), (false, true));
        assert_eq!(spent_info(&metas, &utxo("txb", 1, 1)), (false, true));
        assert_eq!(spent_info(&metas, &utxo("txc", 0, 1)), (true, false));
        assert_eq!(spent_info(&metas, &utxo("txd", 0, 1)), (false, false));
    }
}
