//! Events the chain client reports to the rest of the bridge.

use serde::{Deserialize, Serialize};

/// An on-chain transaction decoded into a bridge-internal deposit
/// observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositEvent {
    pub height: u64,
    pub txid: String,
    pub sender: String,
    pub recipient: String,
    /// Amount transferred to the recipient, in base units.
    pub amount: u64,
    /// Fee the transaction paid, inputs minus outputs.
    pub gas: u64,
    pub memo: String,
    /// Public key of the vault involved, when the sender or recipient is a
    /// known vault address.
    pub observed_vault_pub_key: Option<String>,
}

/// All deposits observed while processing one scanned height, including any
/// merged in from reorg re-scans.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepositBatch {
    pub deposits: Vec<DepositEvent>,
}

impl DepositBatch {
    pub fn is_empty(&self) -> bool {
        self.deposits.is_empty()
    }
}

/// Retroactive correction: a previously observed transaction is no longer
/// present on-chain after a reorganization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrataEvent {
    pub height: u64,
    pub txid: String,
}

/// Attestation of a vault's observed on-chain balance, emitted when the vault
/// looks insolvent against the bridge ledger or the scanner is unhealthy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolvencyReport {
    pub height: u64,
    pub vault_pub_key: String,
    /// Balance observed on-chain, in base units.
    pub balance: u64,
}
