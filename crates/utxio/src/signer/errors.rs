use thiserror::Error;

use causeway_db::DbError;

use crate::encoder::EncoderError;
use crate::rpc::ClientError;

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("invalid destination address: {0}")]
    InvalidAddress(String),

    #[error("no utxo to spend found")]
    NoSpendableUtxos,

    #[error("total utxo amount {available} is less than out amount + gas {required}")]
    InsufficientFunds { available: u64, required: u64 },

    #[error("invalid count of outputs (1 or 2): {0}")]
    InvalidOutputCount(usize),

    #[error("gas fee {fee} must not exceed the payment's max gas {max_gas}")]
    FeeExceedsMaxGas { fee: u64, max_gas: u64 },

    #[error("no sighashes")]
    NoSighashes,

    #[error("number of sighashes ({sighashes}) does not match number of inputs ({inputs})")]
    DigestCountMismatch { sighashes: usize, inputs: usize },

    #[error("encoder returned no txid")]
    MissingTxid,

    #[error("signature for input {input} was not generated")]
    MissingSignature { input: usize },

    #[error("fail to sign sighashes: {0}")]
    Keysign(String),

    #[error("checkpoint: {0}")]
    Checkpoint(#[from] serde_json::Error),

    #[error(transparent)]
    Encoder(#[from] EncoderError),

    #[error(transparent)]
    Rpc(#[from] ClientError),

    #[error(transparent)]
    Db(#[from] DbError),
}

/// A signing failure, carrying the serialized checkpoint when one was
/// persisted before the failure. The caller stores it on the payment so a
/// retry re-derives identical digests instead of re-selecting UTXOs.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct SignTxError {
    pub checkpoint: Option<Vec<u8>>,
    #[source]
    pub source: SignerError,
}

impl SignTxError {
    pub fn with_checkpoint(checkpoint: Vec<u8>, source: SignerError) -> Self {
        Self {
            checkpoint: Some(checkpoint),
            source,
        }
    }
}

impl From<SignerError> for SignTxError {
    fn from(source: SignerError) -> Self {
        Self {
            checkpoint: None,
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("fail to broadcast transaction to chain: {0}")]
    Rpc(#[from] ClientError),

    #[error(transparent)]
    Encoder(#[from] EncoderError),
}
