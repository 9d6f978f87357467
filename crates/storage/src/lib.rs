//! Async facade over the chain client's databases.
//!
//! Database implementations are synchronous; the ops types here push each
//! call onto a shared threadpool and expose `_async` and `_blocking`
//! variants so both the scanning and signing paths can use the same handle.

pub mod exec;
pub mod ops;

pub use ops::block_meta::BlockMetaOps;
pub use ops::signer_cache::SignerCacheOps;
