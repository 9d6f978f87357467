pub mod block_meta;
pub mod signer_cache;
