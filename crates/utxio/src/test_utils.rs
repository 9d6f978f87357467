//! Stateful fakes of the client's collaborators, shared across tests.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use causeway_primitives::buf::Buf32;
use causeway_primitives::payment::PartialTx;
use causeway_primitives::utxo::Utxo;
use causeway_primitives::vault::{KeysignBlame, VaultInfo};

use crate::bridge::BridgeAuthority;
use crate::encoder::{EncoderError, TxEncoder};
use crate::rpc::traits::{ChainBroadcaster, ChainReader};
use crate::rpc::types::{
    RpcBlock, RpcMempoolEntry, RpcScriptPubKey, RpcTransaction, RpcVin, RpcVout,
};
use crate::rpc::{ClientError, ClientResult};
use crate::signer::keysign::{KeysignError, RemoteSigner};

// ---------------------------------------------------------------- fixtures

pub fn mock_address(pub_key: &str) -> String {
    format!("addr-{pub_key}")
}

/// Scripts in tests are the hex encoding of the owner address.
pub fn mock_script(address: &str) -> String {
    hex::encode(address)
}

pub fn vin(txid: &str, vout_index: u32) -> RpcVin {
    RpcVin {
        txid: Some(txid.to_owned()),
        vout: Some(vout_index),
        coinbase: None,
    }
}

pub fn vout(value: f64, n: u32, address: &str) -> RpcVout {
    RpcVout {
        value,
        n,
        script_pub_key: RpcScriptPubKey {
            asm: String::new(),
            hex: mock_script(address),
            kind: "pubkeyhash".to_owned(),
            addresses: vec![address.to_owned()],
        },
    }
}

pub fn null_data_vout(memo: &str, n: u32) -> RpcVout {
    RpcVout {
        value: 0.0,
        n,
        script_pub_key: RpcScriptPubKey {
            asm: format!("OP_RETURN {}", hex::encode(memo)),
            hex: String::new(),
            kind: "nulldata".to_owned(),
            addresses: Vec::new(),
        },
    }
}

pub fn tx_with_vouts(txid: &str, vouts: Vec<RpcVout>) -> RpcTransaction {
    RpcTransaction {
        txid: txid.to_owned(),
        version: 2,
        locktime: 0,
        vin: vec![vin(&format!("prev-{txid}"), 0)],
        vout: vouts,
    }
}

pub fn block(height: u64, hash: &str, previous_hash: &str, tx: Vec<RpcTransaction>) -> RpcBlock {
    RpcBlock {
        hash: hash.to_owned(),
        previous_hash: previous_hash.to_owned(),
        height,
        tx,
    }
}

pub fn utxo(txid: &str, vout_index: u32, value: u64, height: u64, owner: &str) -> Utxo {
    Utxo {
        txid: txid.to_owned(),
        vout: vout_index,
        script: mock_script(owner),
        value,
        height,
    }
}

pub fn vault(pub_key: &str, members: &[&str], balance: u64) -> VaultInfo {
    VaultInfo {
        pub_key: pub_key.to_owned(),
        address: mock_address(pub_key),
        members: members.iter().map(|m| m.to_string()).collect(),
        balance,
    }
}

// ------------------------------------------------------------- chain node

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BroadcastBehavior {
    #[default]
    Accept,
    AlreadyKnown,
    Reject,
}

#[derive(Default)]
pub struct ChainState {
    pub height: u64,
    pub blocks: HashMap<u64, RpcBlock>,
    pub txs: HashMap<String, RpcTransaction>,
    pub mempool: HashMap<String, RpcMempoolEntry>,
    pub utxos: HashMap<String, Vec<Utxo>>,
    pub balances: HashMap<String, u64>,
    pub broadcast_behavior: BroadcastBehavior,
}

/// In-memory chain node.
#[derive(Default)]
pub struct MockChainClient {
    pub state: Mutex<ChainState>,
    broadcast_calls: AtomicUsize,
}

impl MockChainClient {
    pub fn set_height(&self, height: u64) {
        self.state.lock().height = height;
    }

    pub fn add_block(&self, block: RpcBlock) {
        let mut state = self.state.lock();
        for tx in &block.tx {
            state.txs.insert(tx.txid.clone(), tx.clone());
        }
        if block.height > state.height {
            state.height = block.height;
        }
        state.blocks.insert(block.height, block);
    }

    pub fn add_tx(&self, tx: RpcTransaction) {
        self.state.lock().txs.insert(tx.txid.clone(), tx);
    }

    pub fn add_utxos(&self, address: &str, utxos: Vec<Utxo>) {
        self.state
            .lock()
            .utxos
            .entry(address.to_owned())
            .or_default()
            .extend(utxos);
    }

    pub fn set_balance(&self, address: &str, balance: u64) {
        self.state.lock().balances.insert(address.to_owned(), balance);
    }

    pub fn add_mempool_entry(&self, txid: &str) {
        self.state
            .lock()
            .mempool
            .insert(txid.to_owned(), RpcMempoolEntry::default());
    }

    pub fn set_broadcast_behavior(&self, behavior: BroadcastBehavior) {
        self.state.lock().broadcast_behavior = behavior;
    }

    pub fn broadcasts(&self) -> usize {
        self.broadcast_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainReader for MockChainClient {
    async fn get_block_count(&self) -> ClientResult<u64> {
        Ok(self.state.lock().height)
    }

    async fn get_block_hash(&self, height: u64) -> ClientResult<String> {
        self.state
            .lock()
            .blocks
            .get(&height)
            .map(|b| b.hash.clone())
            .ok_or_else(|| ClientError::Server(-8, "Block height out of range".into()))
    }

    async fn get_block_verbose(&self, hash: &str) -> ClientResult<RpcBlock> {
        self.state
            .lock()
            .blocks
            .values()
            .find(|b| b.hash == hash)
            .cloned()
            .ok_or_else(|| ClientError::Server(-5, "Block not found".into()))
    }

    async fn get_raw_transaction_verbose(&self, txid: &str) -> ClientResult<RpcTransaction> {
        self.state.lock().txs.get(txid).cloned().ok_or_else(|| {
            ClientError::Server(-5, "No such mempool or blockchain transaction".into())
        })
    }

    async fn get_mempool_entry(&self, txid: &str) -> ClientResult<Option<RpcMempoolEntry>> {
        Ok(self.state.lock().mempool.get(txid).cloned())
    }

    async fn list_unspent(&self, address: &str) -> ClientResult<Vec<Utxo>> {
        Ok(self.state.lock().utxos.get(address).cloned().unwrap_or_default())
    }

    async fn get_address_balance(&self, address: &str) -> ClientResult<u64> {
        Ok(self.state.lock().balances.get(address).copied().unwrap_or(0))
    }
}

#[async_trait]
impl ChainBroadcaster for MockChainClient {
    async fn send_raw_transaction(&self, raw_tx: &[u8]) -> ClientResult<String> {
        self.broadcast_calls.fetch_add(1, Ordering::SeqCst);
        match self.state.lock().broadcast_behavior {
            BroadcastBehavior::Accept => decode_mock_txid(raw_tx)
                .ok_or_else(|| ClientError::Server(-22, "TX decode failed".into())),
            BroadcastBehavior::AlreadyKnown => {
                Err(ClientError::Server(-27, "already in block chain".into()))
            }
            BroadcastBehavior::Reject => {
                Err(ClientError::Server(-25, "Missing inputs".into()))
            }
        }
    }
}

// ---------------------------------------------------------------- encoder

fn decode_mock_txid(raw_tx: &[u8]) -> Option<String> {
    let s = String::from_utf8(raw_tx.to_vec()).ok()?;
    s.split('|').next().map(|t| t.to_owned())
}

pub fn mock_txid(ptx: &PartialTx) -> String {
    let mut hasher = DefaultHasher::new();
    serde_json::to_string(&(&ptx.inputs, &ptx.outputs, ptx.fee))
        .expect("serialize ptx")
        .hash(&mut hasher);
    let h = hasher.finish();
    format!("{h:016x}").repeat(4)
}

pub fn mock_sighash(txid: &str, input: usize) -> Buf32 {
    let mut hasher = DefaultHasher::new();
    (txid, input).hash(&mut hasher);
    let bytes = hasher.finish().to_be_bytes();
    let mut out = [0u8; 32];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = bytes[i % bytes.len()];
    }
    Buf32::from(out)
}

/// Deterministic stand-in for the external transaction-encoding library.
///
/// The "wire format" is `txid|signature-count`, which is all the broadcast
/// path needs to round-trip.
#[derive(Default)]
pub struct MockEncoder {
    pub fail_build: AtomicBool,
}

impl TxEncoder for MockEncoder {
    fn build_digests(&self, _vault_pub_key: &str, ptx: PartialTx) -> Result<PartialTx, EncoderError> {
        if self.fail_build.load(Ordering::SeqCst) {
            return Err(EncoderError::Build("forced build failure".into()));
        }
        let txid = mock_txid(&ptx);
        let sighashes = (0..ptx.inputs.len())
            .map(|i| mock_sighash(&txid, i))
            .collect();
        Ok(PartialTx {
            txid: Some(txid),
            sighashes,
            ..ptx
        })
    }

    fn apply_signatures(
        &self,
        _vault_pub_key: &str,
        ptx: &PartialTx,
        signatures: &[Vec<u8>],
    ) -> Result<Vec<u8>, EncoderError> {
        if signatures.len() != ptx.inputs.len() {
            return Err(EncoderError::Signatures(format!(
                "want {} signatures, got {}",
                ptx.inputs.len(),
                signatures.len()
            )));
        }
        if signatures.iter().any(|sig| sig.is_empty()) {
            return Err(EncoderError::Signatures("empty signature".into()));
        }
        let txid = ptx
            .txid
            .as_deref()
            .ok_or_else(|| EncoderError::Signatures("no txid".into()))?;
        Ok(format!("{txid}|{}", signatures.len()).into_bytes())
    }

    fn decode_txid(&self, raw_tx: &[u8]) -> Result<String, EncoderError> {
        decode_mock_txid(raw_tx).ok_or_else(|| EncoderError::Decode("not mock format".into()))
    }

    fn validate_address(&self, address: &str) -> Result<(), EncoderError> {
        if address.is_empty() || address.starts_with("bad") {
            return Err(EncoderError::InvalidAddress(address.to_owned()));
        }
        Ok(())
    }

    fn address_from_pubkey(&self, pub_key: &str) -> Result<String, EncoderError> {
        Ok(mock_address(pub_key))
    }

    fn extract_script_address(&self, script_hex: &str) -> Option<String> {
        let bytes = hex::decode(script_hex).ok()?;
        let address = String::from_utf8(bytes).ok()?;
        (!address.is_empty()).then_some(address)
    }
}

// ----------------------------------------------------------- remote signer

pub struct MockSignFailure {
    pub message: String,
    pub blame: KeysignBlame,
}

/// Remote threshold signer double with call accounting and an optional
/// failure mode. `max_active` records how many sign calls ever overlapped,
/// which the per-vault serialization tests assert on.
#[derive(Default)]
pub struct MockRemoteSigner {
    pub delay_ms: AtomicU64,
    pub fail: Mutex<Option<MockSignFailure>>,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl MockRemoteSigner {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn fail_with_blame(&self, message: &str, nodes: &[&str]) {
        *self.fail.lock() = Some(MockSignFailure {
            message: message.to_owned(),
            blame: KeysignBlame {
                fail_reason: message.to_owned(),
                nodes: nodes.iter().map(|n| n.to_string()).collect(),
            },
        });
    }
}

#[async_trait]
impl RemoteSigner for MockRemoteSigner {
    async fn sign(&self, digest: &Buf32, _vault_pub_key: &str) -> Result<Vec<u8>, KeysignError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let result = match &*self.fail.lock() {
            Some(failure) => Err(KeysignError::Tss {
                message: failure.message.clone(),
                blame: failure.blame.clone(),
            }),
            None => Ok(format!("sig-{}", hex::encode(&digest.0[..4])).into_bytes()),
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

// -------------------------------------------------------- bridge authority

/// Bridge-state authority double.
pub struct MockBridge {
    pub vaults: Mutex<Vec<VaultInfo>>,
    pub mimir: Mutex<HashMap<String, i64>>,
    pub keysign_failures: Mutex<Vec<KeysignBlame>>,
    pub network_fees: Mutex<Vec<(u64, u64)>>,
    pub bridge_height: AtomicU64,
    pub node_active: AtomicBool,
}

impl Default for MockBridge {
    fn default() -> Self {
        Self {
            vaults: Mutex::new(Vec::new()),
            mimir: Mutex::new(HashMap::new()),
            keysign_failures: Mutex::new(Vec::new()),
            network_fees: Mutex::new(Vec::new()),
            bridge_height: AtomicU64::new(100),
            node_active: AtomicBool::new(true),
        }
    }
}

impl MockBridge {
    pub fn set_vaults(&self, vaults: Vec<VaultInfo>) {
        *self.vaults.lock() = vaults;
    }

    pub fn set_mimir(&self, key: &str, value: i64) {
        self.mimir.lock().insert(key.to_owned(), value);
    }
}

#[async_trait]
impl BridgeAuthority for MockBridge {
    async fn get_asgard_vaults(&self) -> anyhow::Result<Vec<VaultInfo>> {
        Ok(self.vaults.lock().clone())
    }

    async fn get_mimir(&self, key: &str) -> anyhow::Result<i64> {
        Ok(self.mimir.lock().get(key).copied().unwrap_or(-1))
    }

    async fn post_network_fee(
        &self,
        height: u64,
        _tx_size: u64,
        fee_rate: u64,
    ) -> anyhow::Result<String> {
        self.network_fees.lock().push((height, fee_rate));
        Ok("bridge-fee-tx".to_owned())
    }

    async fn post_keysign_failure(
        &self,
        blame: &KeysignBlame,
        _height: u64,
        _memo: &str,
        _amount: u64,
        _vault_pub_key: &str,
    ) -> anyhow::Result<String> {
        self.keysign_failures.lock().push(blame.clone());
        Ok("bridge-blame-tx".to_owned())
    }

    async fn get_bridge_height(&self) -> anyhow::Result<u64> {
        Ok(self.bridge_height.load(Ordering::SeqCst))
    }

    async fn is_node_active(&self) -> anyhow::Result<bool> {
        Ok(self.node_active.load(Ordering::SeqCst))
    }
}

// ----------------------------------------------------------------- harness
