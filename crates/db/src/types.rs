//! Record types stored by the chain client.

use arbitrary::Arbitrary;
use borsh::{BorshDeserialize, BorshSerialize};
use tracing::*;

use causeway_primitives::utxo::utxo_key;

/// Per-height bookkeeping of block hash lineage and UTXO usage.
///
/// One record exists per scanned height. It tracks which observed
/// transactions were our own vaults' outbounds vs. customer deposits, which
/// UTXOs have been consumed by broadcast outbound transactions, and which are
/// claimed by outbound transactions that have not been broadcast yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Arbitrary)]
pub struct BlockMeta {
    pub height: u64,
    pub block_hash: String,
    pub previous_hash: String,

    /// Txids our vaults have broadcast, observed in this block.
    pub self_transactions: Vec<String>,

    /// Txids of customer deposits observed in this block.
    pub customer_transactions: Vec<String>,

    /// `txid:vout` keys of UTXOs consumed by successfully broadcast outbound
    /// transactions.
    pub spent_utxos: Vec<String>,

    /// `spender:txid:vout` keys of UTXOs claimed by a built-but-not-yet
    /// broadcast outbound transaction, tagged with the spender's txid. They
    /// are promoted to [`Self::spent_utxos`] only if that transaction is
    /// broadcast successfully.
    pub pending_spent_utxos: Vec<String>,
}

impl BlockMeta {
    pub fn new(previous_hash: &str, height: u64, block_hash: &str) -> Self {
        Self {
            height,
            block_hash: block_hash.to_owned(),
            previous_hash: previous_hash.to_owned(),
            ..Default::default()
        }
    }

    pub fn add_self_transaction(&mut self, txid: &str) {
        add_transaction(&mut self.self_transactions, txid);
    }

    pub fn add_customer_transaction(&mut self, txid: &str) {
        if contains_ignore_case(&self.self_transactions, txid) {
            info!(%txid, "customer txn with matching self txn seen");
            return;
        }
        add_transaction(&mut self.customer_transactions, txid);
    }

    pub fn remove_customer_transaction(&mut self, txid: &str) {
        self.customer_transactions
            .retain(|tx| !tx.eq_ignore_ascii_case(txid));
    }

    /// True if the txid was already observed in this block, in either the
    /// self or customer set.
    pub fn transaction_hash_exists(&self, txid: &str) -> bool {
        contains_ignore_case(&self.customer_transactions, txid)
            || contains_ignore_case(&self.self_transactions, txid)
    }

    /// Registers a UTXO as a pending input of the outbound transaction
    /// `spender_txid`. It becomes spent only once that transaction is
    /// broadcast.
    pub fn add_pending_spent_utxo(&mut self, spender_txid: &str, utxo_txid: &str, vout: u32) {
        let pending_key = format!("{spender_txid}:{}", utxo_key(utxo_txid, vout));
        add_transaction(&mut self.pending_spent_utxos, &pending_key);
    }

    /// Promotes the pending UTXOs claimed by `spender_txid` to spent and
    /// discards every other pending entry, whose transactions were not
    /// broadcast. Promotion is all-or-nothing per spender.
    pub fn commit_pending_spent(&mut self, spender_txid: &str) {
        let prefix = format!("{spender_txid}:");
        for item in &self.pending_spent_utxos {
            if let Some(key) = strip_prefix_ignore_case(item, &prefix) {
                add_transaction(&mut self.spent_utxos, key);
            }
        }
        self.pending_spent_utxos.clear();
    }

    pub fn has_spent_utxo(&self, key: &str) -> bool {
        contains_ignore_case(&self.spent_utxos, key)
    }

    /// True if any outbound transaction currently claims the UTXO.
    pub fn has_pending_spent_utxo(&self, key: &str) -> bool {
        self.pending_spent_utxos.iter().any(|item| {
            item.split_once(':')
                .is_some_and(|(_, rest)| rest.eq_ignore_ascii_case(key))
        })
    }

    pub fn has_pending_spent_utxos(&self) -> bool {
        !self.pending_spent_utxos.is_empty()
    }
}

/// Result of a completed signing/broadcast cycle, keyed by the payment
/// fingerprint. Presence short-circuits any further signing attempt.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Arbitrary)]
pub struct SignerCacheEntry {
    pub vault_pub_key: String,
    pub txid: String,
}

fn contains_ignore_case(hashes: &[String], txid: &str) -> bool {
    hashes.iter().any(|tx| tx.eq_ignore_ascii_case(txid))
}

fn add_transaction(hashes: &mut Vec<String>, txid: &str) {
    if !contains_ignore_case(hashes, txid) {
        hashes.push(txid.to_owned());
    }
}

// Case-insensitive on the spender tag, like the txid sets.
fn strip_prefix_ignore_case<'a>(item: &'a str, prefix: &str) -> Option<&'a str> {
    if item.len() >= prefix.len() && item[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&item[prefix.len()..])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_transaction_dedupes_ignoring_case() {
        let mut meta = BlockMeta::new("aa", 10, "bb");
        meta.add_customer_transaction("ABC123");
        meta.add_customer_transaction("abc123");
        assert_eq!(meta.customer_transactions.len(), 1);
        assert!(meta.transaction_hash_exists("Abc123"));
    }

    #[test]
    fn test_customer_transaction_skipped_when_already_self() {
        let mut meta = BlockMeta::new("aa", 10, "bb");
        meta.add_self_transaction("abc123");
        meta.add_customer_transaction("ABC123");
        assert!(meta.customer_transactions.is_empty());
        assert!(meta.transaction_hash_exists("abc123"));
    }

    #[test]
    fn test_remove_customer_transaction() {
        let mut meta = BlockMeta::new("aa", 10, "bb");
        meta.add_customer_transaction("abc123");
        meta.remove_customer_transaction("ABC123");
        assert!(meta.customer_transactions.is_empty());
    }

    #[test]
    fn test_commit_promotes_only_spender_and_clears_all_pending() {
        let mut meta = BlockMeta::new("aa", 10, "bb");
        meta.add_pending_spent_utxo("spender1", "utxoa", 0);
        meta.add_pending_spent_utxo("spender1", "utxob", 1);
        meta.add_pending_spent_utxo("spender2", "utxoc", 0);

        meta.commit_pending_spent("spender1");

        assert_eq!(meta.spent_utxos, vec!["utxoa:0", "utxob:1"]);
        // spender2's claim is discarded entirely, not promoted
        assert!(!meta.has_spent_utxo("utxoc:0"));
        assert!(!meta.has_pending_spent_utxos());
    }

    #[test]
    fn test_commit_with_no_matching_spender_discards_pending() {
        let mut meta = BlockMeta::new("aa", 10, "bb");
        meta.add_pending_spent_utxo("spender1", "utxoa", 0);
        meta.commit_pending_spent("other");
        assert!(meta.spent_utxos.is_empty());
        assert!(!meta.has_pending_spent_utxos());
    }

    #[test]
    fn test_pending_lookup_matches_on_utxo_key() {
        let mut meta = BlockMeta::new("aa", 10, "bb");
        meta.add_pending_spent_utxo("spender1", "utxoa", 7);
        assert!(meta.has_pending_spent_utxo("utxoa:7"));
        assert!(!meta.has_pending_spent_utxo("utxoa:8"));
        assert!(!meta.has_spent_utxo("utxoa:7"));
    }
}
