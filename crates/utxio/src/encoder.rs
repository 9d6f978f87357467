//! Boundary to the external transaction-encoding library.
//!
//! Chain-specific binary encoding is consumed as a set of pure functions:
//! given a partial transaction the library derives the txid and per-input
//! signable digests, and given signatures it produces the final wire bytes.
//! The client never inspects the encoding itself.

use thiserror::Error;

use causeway_primitives::payment::PartialTx;

/// Conventional fee for the transaction structure itself.
pub const BASE_RELAY_FEE: u64 = 10_000;

/// Marginal fee per transparent input and output.
pub const MARGINAL_FEE: u64 = 5_000;

/// Bytes a standard output slot can carry; long memos occupy extra slots.
pub const OUTPUT_SLOT_SIZE: u64 = 34;

#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid public key: {0}")]
    InvalidPubKey(String),

    #[error("fail to build digests: {0}")]
    Build(String),

    #[error("fail to apply signatures: {0}")]
    Signatures(String),

    #[error("fail to decode transaction: {0}")]
    Decode(String),
}

pub trait TxEncoder: Send + Sync + 'static {
    /// Derives the txid and one signable digest per input. The returned
    /// structure is identical to the input apart from those fields, so
    /// re-running this on a restored checkpoint reproduces the same digests.
    fn build_digests(&self, vault_pub_key: &str, ptx: PartialTx) -> Result<PartialTx, EncoderError>;

    /// Produces the final wire-format transaction from the partial
    /// transaction and one signature per input.
    fn apply_signatures(
        &self,
        vault_pub_key: &str,
        ptx: &PartialTx,
        signatures: &[Vec<u8>],
    ) -> Result<Vec<u8>, EncoderError>;

    /// Computes the txid of an already encoded transaction.
    fn decode_txid(&self, raw_tx: &[u8]) -> Result<String, EncoderError>;

    /// Checks the address is well formed for the target network.
    fn validate_address(&self, address: &str) -> Result<(), EncoderError>;

    /// Derives the chain address controlled by the given public key.
    fn address_from_pubkey(&self, pub_key: &str) -> Result<String, EncoderError>;

    /// The single owner address of a locking script, or `None` when the
    /// script does not decode to exactly one address.
    fn extract_script_address(&self, script_hex: &str) -> Option<String>;

    /// Fee for a transaction with the given shape.
    fn calculate_fee(&self, input_count: u64, output_count: u64, memo: &str) -> u64 {
        calculate_fee(input_count, output_count, memo)
    }
}

/// Fee as a function of input count, output count and memo length: a marginal
/// fee per input and output on top of the base relay fee, with inputs floored
/// at 1 and outputs at 2, and additional output slots for memo bytes.
pub fn calculate_fee(input_count: u64, output_count: u64, memo: &str) -> u64 {
    let mut outputs = output_count;
    if !memo.is_empty() {
        let memo_len_with_overhead = memo.len() as u64 + 2;
        outputs += memo_len_with_overhead.div_ceil(OUTPUT_SLOT_SIZE);
    }

    let inputs = input_count.max(1);
    let outputs = outputs.max(2);

    let fee = inputs * MARGINAL_FEE + outputs * MARGINAL_FEE + BASE_RELAY_FEE;
    fee.max(BASE_RELAY_FEE)
}
