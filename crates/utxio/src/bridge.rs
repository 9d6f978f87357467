//! Interface to the bridge-state authority.

use async_trait::async_trait;

use causeway_primitives::vault::{KeysignBlame, VaultInfo};

/// What the chain client needs from the bridge-state authority: vault
/// membership, mimir configuration, fee posting and keysign-failure
/// reporting.
#[async_trait]
pub trait BridgeAuthority: Sync + Send + 'static {
    /// The current Asgard vaults, with their addresses on this chain and the
    /// bridge ledger's balances.
    async fn get_asgard_vaults(&self) -> anyhow::Result<Vec<VaultInfo>>;

    /// A mimir configuration value, negative when unset.
    async fn get_mimir(&self, key: &str) -> anyhow::Result<i64>;

    /// Posts this chain's current outbound fee rate.
    async fn post_network_fee(
        &self,
        height: u64,
        tx_size: u64,
        fee_rate: u64,
    ) -> anyhow::Result<String>;

    /// Forwards threshold-signing blame for slashing and monitoring.
    async fn post_keysign_failure(
        &self,
        blame: &KeysignBlame,
        height: u64,
        memo: &str,
        amount: u64,
        vault_pub_key: &str,
    ) -> anyhow::Result<String>;

    /// The bridge chain's current block height.
    async fn get_bridge_height(&self) -> anyhow::Result<u64>;

    /// Whether this node is an active federation member.
    async fn is_node_active(&self) -> anyhow::Result<bool>;
}
