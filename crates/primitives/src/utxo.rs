use arbitrary::Arbitrary;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

/// An unspent transparent output owned by some address, as reported by the
/// chain node. Not owned by this system, only referenced.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    BorshSerialize,
    BorshDeserialize,
    Arbitrary,
)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    /// Hex-encoded locking script of the output.
    pub script: String,
    /// Value in base units.
    pub value: u64,
    /// Height of the block the funding transaction was included in, 0 when
    /// still unconfirmed.
    pub height: u64,
}

impl Utxo {
    /// The `txid:vout` key under which spend bookkeeping tracks this output.
    pub fn key(&self) -> String {
        utxo_key(&self.txid, self.vout)
    }

    /// Number of confirmations at the given chain tip. An output in the tip
    /// block has one confirmation; an unconfirmed output has zero.
    pub fn confirmations(&self, tip_height: u64) -> u64 {
        if self.height == 0 || self.height > tip_height {
            return 0;
        }
        tip_height - self.height + 1
    }
}

pub fn utxo_key(txid: &str, vout: u32) -> String {
    format!("{txid}:{vout}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utxo_at(height: u64) -> Utxo {
        Utxo {
            txid: "ab".repeat(32),
            vout: 1,
            script: "76a914".into(),
            value: 50_000,
            height,
        }
    }

    #[test]
    fn test_confirmations() {
        assert_eq!(utxo_at(100).confirmations(100), 1);
        assert_eq!(utxo_at(93).confirmations(100), 8);
        assert_eq!(utxo_at(101).confirmations(100), 0);
        assert_eq!(utxo_at(0).confirmations(100), 0);
    }

    #[test]
    fn test_key_format() {
        let utxo = utxo_at(5);
        assert_eq!(utxo.key(), format!("{}:1", "ab".repeat(32)));
    }
}
