//! Decoding block transactions into bridge deposit events.

use tracing::*;

use causeway_db::types::BlockMeta;
use causeway_primitives::events::DepositEvent;

use crate::bridge::BridgeAuthority;
use crate::client::Client;
use crate::encoder::TxEncoder;
use crate::memo::Memo;
use crate::rpc::traits::ChainRpc;
use crate::rpc::types::{amount_to_base_units, RpcBlock, RpcScriptPubKey, RpcTransaction, RpcVout};
use crate::rpc::{ClientError, ClientResult};
use crate::signer::RemoteSigner;

/// Longest memo the bridge accepts.
const MAX_MEMO_SIZE: usize = 250;

/// Observable transactions have at most this many outputs.
const MAX_OUTPUTS: usize = 4;

/// At most this many outputs may carry value: the payment and the change.
const MAX_VALUE_OUTPUTS: usize = 2;

impl<C, E, B, S> Client<C, E, B, S>
where
    C: ChainRpc,
    E: TxEncoder,
    B: BridgeAuthority,
    S: RemoteSigner,
{
    /// Extracts deposit events from a block, skipping transactions this
    /// block's meta already records.
    pub(crate) async fn extract_deposits(
        &self,
        block: &RpcBlock,
        meta: &BlockMeta,
    ) -> Vec<DepositEvent> {
        let mut deposits = Vec::new();
        for tx in &block.tx {
            let deposit = match self.get_tx_in(tx, block.height).await {
                Ok(Some(deposit)) => deposit,
                Ok(None) => continue,
                Err(err) => {
                    warn!(%err, txid = %tx.txid, "fail to decode deposit");
                    continue;
                }
            };
            if deposit.amount < self.config.dust_threshold {
                continue;
            }
            if meta.transaction_hash_exists(&deposit.txid) {
                debug!(txid = %deposit.txid, "tx had been reported before, ignore");
                continue;
            }
            deposits.push(deposit);
        }
        deposits
    }

    /// Converts one decoded transaction into a deposit event, or `None` when
    /// it does not match the observable format.
    pub(crate) async fn get_tx_in(
        &self,
        tx: &RpcTransaction,
        height: u64,
    ) -> ClientResult<Option<DepositEvent>> {
        if let Some(reason) = ignore_tx(tx, height) {
            debug!(%height, txid = %tx.txid, "ignore tx not matching format, {reason}");
            return Ok(None);
        }

        let sender = self.get_sender(tx).await?;
        let memo = self.get_memo(tx)?;
        if memo.len() > MAX_MEMO_SIZE {
            return Err(ClientError::Other(format!(
                "memo longer than max allowed length({MAX_MEMO_SIZE})"
            )));
        }
        let consolidate = Memo::parse(&memo).is_consolidate();

        let Some(output) = self.get_output(&sender, tx, consolidate).await? else {
            debug!(%height, txid = %tx.txid, "ignore tx not matching format");
            return Ok(None);
        };
        let addresses = self.addresses_from_script(&output.script_pub_key);
        let Some(recipient) = addresses.first().cloned() else {
            return Err(ClientError::Other(
                "fail to get addresses from script pub key".to_string(),
            ));
        };

        // An output claiming to pay a vault must carry a script that decodes
        // to exactly that one owner; don't trust the node's address list.
        if self.is_vault_address(&recipient).await
            && self
                .encoder
                .extract_script_address(&output.script_pub_key.hex)
                .is_none()
        {
            return Err(ClientError::Other("invalid utxo".to_string()));
        }

        let amount = amount_to_base_units(output.value)?;
        let gas = self.get_gas(tx).await?;

        let observed_vault_pub_key = if self.is_vault_address(&sender).await {
            self.vault_pub_key_for_address(&sender).await
        } else {
            self.vault_pub_key_for_address(&recipient).await
        };

        Ok(Some(DepositEvent {
            height,
            txid: tx.txid.clone(),
            sender,
            recipient,
            amount,
            gas,
            memo,
            observed_vault_pub_key,
        }))
    }

    /// Sender address of a transaction, taken from its first input's
    /// previous output.
    pub(crate) async fn get_sender(&self, tx: &RpcTransaction) -> ClientResult<String> {
        let vin = tx
            .vin
            .first()
            .ok_or_else(|| ClientError::Other("no vin available in tx".to_string()))?;
        let prev_txid = vin
            .txid
            .as_deref()
            .ok_or_else(|| ClientError::Other("no previous txid in vin".to_string()))?;

        let prev_tx = self.chain_rpc.get_raw_transaction_verbose(prev_txid).await?;
        let vout_index = vin.vout.unwrap_or(0) as usize;
        let prev_out = prev_tx.vout.get(vout_index).ok_or_else(|| {
            ClientError::Other(format!("vout {vout_index} missing in tx {prev_txid}"))
        })?;

        self.addresses_from_script(&prev_out.script_pub_key)
            .first()
            .cloned()
            .ok_or_else(|| ClientError::Other("no address available in vout".to_string()))
    }

    /// Memo carried in the transaction's null-data outputs, concatenated in
    /// output order.
    pub(crate) fn get_memo(&self, tx: &RpcTransaction) -> ClientResult<String> {
        let mut opreturns = String::new();
        for vout in &tx.vout {
            if vout.script_pub_key.is_null_data() {
                let fields: Vec<&str> = vout.script_pub_key.asm.split_whitespace().collect();
                if fields.len() == 2 {
                    opreturns.push_str(fields[1]);
                }
            }
        }
        let decoded = hex::decode(&opreturns)
            .map_err(|_| ClientError::Parse(format!("fail to decode memo: {opreturns}")))?;
        Ok(String::from_utf8_lossy(&decoded).into_owned())
    }

    /// Picks the transaction output that is the observable payment.
    ///
    /// If the sender is a vault, the first value-bearing output is the
    /// payment and a later one may be change. Otherwise only outputs paying
    /// a vault are candidates, so a change output ahead of the vault-inbound
    /// output is not mistaken for the payment.
    pub(crate) async fn get_output(
        &self,
        sender: &str,
        tx: &RpcTransaction,
        consolidate: bool,
    ) -> ClientResult<Option<RpcVout>> {
        let sender_is_vault = self.is_vault_address(sender).await;
        for vout in &tx.vout {
            if vout.script_pub_key.is_null_data() {
                continue;
            }
            if vout.value <= 0.0 {
                continue;
            }
            let addresses = self.addresses_from_script(&vout.script_pub_key);
            if addresses.len() != 1 {
                continue;
            }
            let receiver = &addresses[0];
            if !sender_is_vault && !self.is_vault_address(receiver).await {
                continue;
            }
            if consolidate && receiver.eq_ignore_ascii_case(sender) {
                return Ok(Some(vout.clone()));
            }
            if !consolidate && !receiver.eq_ignore_ascii_case(sender) {
                return Ok(Some(vout.clone()));
            }
        }
        Ok(None)
    }

    /// Fee the transaction paid: total inputs minus total outputs.
    pub(crate) async fn get_gas(&self, tx: &RpcTransaction) -> ClientResult<u64> {
        let mut sum_vin: u64 = 0;
        for vin in &tx.vin {
            let Some(prev_txid) = vin.txid.as_deref() else {
                continue;
            };
            let prev_tx = self.chain_rpc.get_raw_transaction_verbose(prev_txid).await?;
            let vout_index = vin.vout.unwrap_or(0) as usize;
            let prev_out = prev_tx.vout.get(vout_index).ok_or_else(|| {
                ClientError::Other(format!("vout {vout_index} missing in tx {prev_txid}"))
            })?;
            sum_vin += amount_to_base_units(prev_out.value)?;
        }

        let mut sum_vout: u64 = 0;
        for vout in &tx.vout {
            sum_vout += amount_to_base_units(vout.value)?;
        }
        Ok(sum_vin.saturating_sub(sum_vout))
    }

    /// Owner addresses of a locking script, falling back to decoding the
    /// script when the node response carries no address list.
    pub(crate) fn addresses_from_script(&self, script_pub_key: &RpcScriptPubKey) -> Vec<String> {
        if !script_pub_key.addresses.is_empty() {
            return script_pub_key.addresses.clone();
        }
        if script_pub_key.hex.is_empty() {
            return Vec::new();
        }
        self.encoder
            .extract_script_address(&script_pub_key.hex)
            .into_iter()
            .collect()
    }
}

/// Why a transaction is not observable, if it isn't.
fn ignore_tx(tx: &RpcTransaction, height: u64) -> Option<&'static str> {
    if tx.vin.is_empty() {
        return Some("0 vins");
    }
    if tx.vout.is_empty() {
        return Some("0 vouts");
    }
    if tx.vout.len() > MAX_OUTPUTS {
        return Some("more than 4 vouts");
    }
    if tx.locktime > height {
        return Some("locktime has been set");
    }
    if tx.vin[0].is_coinbase() {
        return Some("missing txid - coinbase");
    }

    let with_value = tx.vout.iter().filter(|vout| vout.value > 0.0).count();
    if with_value == 0 {
        return Some("vout total is 0");
    }
    if with_value > MAX_VALUE_OUTPUTS {
        return Some("more than 2 vouts with value");
    }

    None
}
