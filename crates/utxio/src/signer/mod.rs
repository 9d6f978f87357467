//! Outbound payment signing: UTXO selection, partial-transaction building
//! with crash-recoverable checkpoints, parallel multi-party signing and
//! idempotent broadcast.

pub mod broadcast;
pub mod builder;
pub mod consolidate;
pub mod errors;
pub mod keysign;
pub mod locks;
pub mod selector;
pub mod sign;

pub use errors::{BroadcastError, SignTxError, SignerError};
pub use keysign::{KeysignError, NodeSigner, RemoteSigner};
pub use locks::VaultLockRegistry;
pub use sign::SignedOutbound;
