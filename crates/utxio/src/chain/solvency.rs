//! Periodic vault-balance attestation.

use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::*;

use causeway_primitives::events::SolvencyReport;

use crate::bridge::BridgeAuthority;
use crate::client::Client;
use crate::encoder::TxEncoder;
use crate::rpc::traits::ChainRpc;
use crate::signer::RemoteSigner;

/// How long a solvency send may block the scanner before it is dropped.
const SOLVENCY_SEND_TIMEOUT: Duration = Duration::from_secs(6);

/// A vault is solvent when its on-chain balance covers the bridge ledger's
/// balance within a fee-derived margin.
pub(crate) fn is_vault_solvent(chain_balance: u64, ledger_balance: u64, margin: u64) -> bool {
    chain_balance.saturating_add(margin) >= ledger_balance
}

impl<C, E, B, S> Client<C, E, B, S>
where
    C: ChainRpc,
    E: TxEncoder,
    B: BridgeAuthority,
    S: RemoteSigner,
{
    /// Compares each Asgard vault's on-chain balance against the bridge
    /// ledger and reports the ones that look insolvent. Reports also go out
    /// while the scanner is unhealthy, since balances can't be trusted then.
    pub(crate) async fn report_solvency(
        &self,
        height: u64,
        solvency_tx: &mpsc::Sender<SolvencyReport>,
    ) -> anyhow::Result<()> {
        if !self.should_report_solvency(height) {
            return Ok(());
        }

        let vaults = self.bridge.get_asgard_vaults().await?;
        for vault in vaults {
            let balance = match self.chain_rpc.get_address_balance(&vault.address).await {
                Ok(balance) => balance,
                Err(err) => {
                    error!(%err, vault = %vault.pub_key, "fail to get vault balance");
                    continue;
                }
            };

            let margin = 3 * self.last_fee_rate.load(Ordering::SeqCst);
            if self.is_healthy() && is_vault_solvent(balance, vault.balance, margin) {
                // when the vault is solvent, don't need to report solvency
                continue;
            }

            let report = SolvencyReport {
                height,
                vault_pub_key: vault.pub_key.clone(),
                balance,
            };
            match timeout(SOLVENCY_SEND_TIMEOUT, solvency_tx.send(report)).await {
                Ok(Ok(())) => {
                    debug!(%height, vault = %vault.pub_key, %balance, "insolvency report sent")
                }
                Ok(Err(_)) => warn!("solvency channel closed"),
                Err(_) => info!("fail to send solvency info, timeout"),
            }
        }

        self.last_solvency_height.store(height, Ordering::SeqCst);
        Ok(())
    }

    fn should_report_solvency(&self, height: u64) -> bool {
        height > self.last_solvency_height.load(Ordering::SeqCst) + self.config.solvency_blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solvency_margin() {
        assert!(is_vault_solvent(1_000, 1_000, 0));
        assert!(is_vault_solvent(970, 1_000, 30));
        assert!(!is_vault_solvent(969, 1_000, 30));
        // over-funded vault is always solvent
        assert!(is_vault_solvent(2_000, 1_000, 0));
    }
}

#[cfg(test)]
mod report_tests {
    use crate::config::ClientConfig;
    use crate::test_utils::harness::build_client;
    use crate::test_utils::vault;

    use super::*;

    #[tokio::test]
    async fn test_insolvent_vault_is_reported() {
        let harness = build_client(ClientConfig::default());
        harness
            .bridge
            .set_vaults(vec![vault("vault-1", &["peer-1"], 1_000_000)]);
        harness.chain.set_balance("addr-vault-1", 100);
        harness.client.set_healthy(true);

        let (solvency_tx, mut solvency_rx) = mpsc::channel(4);
        harness
            .client
            .report_solvency(20, &solvency_tx)
            .await
            .unwrap();

        let report = solvency_rx.try_recv().expect("insolvency must be reported");
        assert_eq!(report.height, 20);
        assert_eq!(report.vault_pub_key, "vault-1");
        assert_eq!(report.balance, 100);

        // within the cadence window nothing is re-checked
        harness
            .client
            .report_solvency(25, &solvency_tx)
            .await
            .unwrap();
        assert!(solvency_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_solvent_vault_is_not_reported() {
        let harness = build_client(ClientConfig::default());
        harness
            .bridge
            .set_vaults(vec![vault("vault-1", &["peer-1"], 1_000_000)]);
        harness.chain.set_balance("addr-vault-1", 2_000_000);
        harness.client.set_healthy(true);

        let (solvency_tx, mut solvency_rx) = mpsc::channel(4);
        harness
            .client
            .report_solvency(20, &solvency_tx)
            .await
            .unwrap();

        assert!(solvency_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unhealthy_scanner_always_reports() {
        let harness = build_client(ClientConfig::default());
        harness
            .bridge
            .set_vaults(vec![vault("vault-1", &["peer-1"], 1_000_000)]);
        harness.chain.set_balance("addr-vault-1", 2_000_000);
        // scanner unhealthy: the observed balance can't be trusted

        let (solvency_tx, mut solvency_rx) = mpsc::channel(4);
        harness
            .client
            .report_solvency(20, &solvency_tx)
            .await
            .unwrap();

        assert!(solvency_rx.try_recv().is_ok());
    }
}
