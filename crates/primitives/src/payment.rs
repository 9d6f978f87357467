//! Outbound payment orders and the partial-transaction checkpoint format.

use arbitrary::Arbitrary;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::buf::Buf32;
use crate::utxo::Utxo;

/// One output of an outbound transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Arbitrary)]
pub struct TxOutput {
    pub address: String,
    pub amount: u64,
    pub memo: String,
}

/// A partially built outbound transaction.
///
/// The pre-encoder form of this structure (no txid, no sighashes) is the
/// crash-recovery checkpoint: it is serialized to JSON and persisted before
/// any signature is requested, so a restart re-derives identical digests from
/// identical inputs instead of re-running UTXO selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Arbitrary)]
pub struct PartialTx {
    /// Chain height the transaction was built against.
    pub height: u64,
    /// Height after which the transaction expires, 0 for never.
    pub expiry_height: u64,
    /// Transaction id, filled by the encoder once digests are built.
    pub txid: Option<String>,
    pub inputs: Vec<Utxo>,
    pub outputs: Vec<TxOutput>,
    pub fee: u64,
    /// One signable digest per input, filled by the encoder.
    pub sighashes: Vec<Buf32>,
}

impl PartialTx {
    pub fn total_input_value(&self) -> u64 {
        self.inputs.iter().map(|i| i.value).sum()
    }

    /// Whether the encoder has already derived the txid and per-input digests.
    pub fn has_digests(&self) -> bool {
        self.txid.is_some() && self.sighashes.len() == self.inputs.len()
    }
}

/// An outbound payment order handed to the signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundPayment {
    pub to_address: String,
    pub vault_pub_key: String,
    /// Amount owed to the recipient, in base units.
    pub amount: u64,
    /// Gas ceiling granted by the bridge, if any. The computed fee is capped
    /// at this value and any saving is credited back to the recipient.
    pub max_gas: Option<u64>,
    pub memo: String,
    /// Serialized [`PartialTx`] from an earlier, failed signing attempt.
    pub checkpoint: Option<Vec<u8>>,
    /// Internal payments (UTXO consolidation) pay their own fee out of the
    /// transferred amount instead of receiving a gas allowance.
    pub internal: bool,
}

impl OutboundPayment {
    /// Deterministic identifier of this logical payment, used by the signer
    /// cache to guarantee at-most-once signing.
    pub fn fingerprint(&self) -> Buf32 {
        payment_fingerprint(&self.vault_pub_key, &self.to_address, &self.memo)
    }
}

/// Fingerprint over a payment's defining fields. The memo carries the source
/// transaction id for bridge outbounds, which makes the triple unique per
/// logical payment while staying derivable from an on-chain observation.
pub fn payment_fingerprint(vault_pub_key: &str, to_address: &str, memo: &str) -> Buf32 {
    let mut hasher = Sha256::new();
    hasher.update(vault_pub_key.as_bytes());
    hasher.update(b"|");
    hasher.update(to_address.as_bytes());
    hasher.update(b"|");
    hasher.update(memo.as_bytes());
    let digest: [u8; 32] = hasher.finalize().into();
    Buf32::from(digest)
}
