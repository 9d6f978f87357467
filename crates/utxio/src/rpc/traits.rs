use async_trait::async_trait;

use causeway_primitives::utxo::Utxo;

use super::error::ClientResult;
use super::types::{RpcBlock, RpcMempoolEntry, RpcTransaction};

/// Read access to the chain node.
#[async_trait]
pub trait ChainReader: Sync + Send + 'static {
    /// Corresponds to `getblockcount`.
    async fn get_block_count(&self) -> ClientResult<u64>;

    /// Corresponds to `getblockhash`.
    async fn get_block_hash(&self, height: u64) -> ClientResult<String>;

    /// Fetches the block with all transactions decoded.
    async fn get_block_verbose(&self, hash: &str) -> ClientResult<RpcBlock>;

    /// Fetches a single decoded transaction from chain or mempool.
    async fn get_raw_transaction_verbose(&self, txid: &str) -> ClientResult<RpcTransaction>;

    /// `None` when the transaction is not in the mempool.
    async fn get_mempool_entry(&self, txid: &str) -> ClientResult<Option<RpcMempoolEntry>>;

    /// Unspent outputs owned by the given address.
    async fn list_unspent(&self, address: &str) -> ClientResult<Vec<Utxo>>;

    /// Confirmed balance of the given address, in base units.
    async fn get_address_balance(&self, address: &str) -> ClientResult<u64>;
}

/// Write access to the chain node.
#[async_trait]
pub trait ChainBroadcaster: Sync + Send + 'static {
    /// Submits the raw transaction, returning its txid.
    async fn send_raw_transaction(&self, raw_tx: &[u8]) -> ClientResult<String>;
}

/// Everything the chain client needs from the node.
pub trait ChainRpc: ChainReader + ChainBroadcaster {}

impl<T: ChainReader + ChainBroadcaster> ChainRpc for T {}
