use serde::{Deserialize, Serialize};

/// A federation vault as reported by the bridge-state authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultInfo {
    /// The vault's public key, as the bridge renders it.
    pub pub_key: String,
    /// The vault's address on this chain.
    pub address: String,
    /// Public keys of the nodes holding shares of this vault's key.
    pub members: Vec<String>,
    /// The bridge ledger's view of the vault's balance on this chain.
    pub balance: u64,
}

impl VaultInfo {
    pub fn contains(&self, node_pub_key: &str) -> bool {
        self.members.iter().any(|m| m == node_pub_key)
    }
}

/// Which federation members failed to cooperate in a threshold-signing
/// round. Forwarded to the bridge-state authority for slashing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysignBlame {
    pub fail_reason: String,
    pub nodes: Vec<String>,
}

impl KeysignBlame {
    /// Blame without named nodes cannot be acted on and is not forwarded.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
