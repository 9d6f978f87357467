//! Wire types for the verbose block/transaction RPC responses.

use serde::{Deserialize, Serialize};

use causeway_primitives::utxo::Utxo;

use super::error::{ClientError, ClientResult};

/// Base units per whole coin in the node's float amounts.
const COIN_UNITS: f64 = 100_000_000.0;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RpcBlock {
    pub hash: String,
    #[serde(rename = "previousblockhash", default)]
    pub previous_hash: String,
    pub height: u64,
    #[serde(default)]
    pub tx: Vec<RpcTransaction>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RpcTransaction {
    pub txid: String,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub locktime: u64,
    #[serde(default)]
    pub vin: Vec<RpcVin>,
    #[serde(default)]
    pub vout: Vec<RpcVout>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct RpcVin {
    #[serde(default)]
    pub txid: Option<String>,
    #[serde(default)]
    pub vout: Option<u32>,
    #[serde(default)]
    pub coinbase: Option<String>,
}

impl RpcVin {
    pub fn is_coinbase(&self) -> bool {
        self.coinbase.is_some() || self.txid.is_none()
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RpcVout {
    /// Amount in whole coins, as the node reports it.
    pub value: f64,
    pub n: u32,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: RpcScriptPubKey,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct RpcScriptPubKey {
    #[serde(default)]
    pub asm: String,
    #[serde(default)]
    pub hex: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub addresses: Vec<String>,
}

impl RpcScriptPubKey {
    /// Null-data outputs carry memo bytes instead of value.
    pub fn is_null_data(&self) -> bool {
        self.kind.eq_ignore_ascii_case("nulldata")
    }
}

/// Entry of an address-indexed `getaddressutxos` response.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RpcUtxo {
    pub txid: String,
    #[serde(rename = "outputIndex")]
    pub output_index: u32,
    #[serde(default)]
    pub script: String,
    pub satoshis: u64,
    #[serde(default)]
    pub height: u64,
}

impl From<RpcUtxo> for Utxo {
    fn from(value: RpcUtxo) -> Self {
        Utxo {
            txid: value.txid,
            vout: value.output_index,
            script: value.script,
            value: value.satoshis,
            height: value.height,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RpcAddressBalance {
    pub balance: u64,
    #[serde(default)]
    pub received: u64,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct RpcMempoolEntry {
    #[serde(default)]
    pub time: u64,
    #[serde(default)]
    pub height: u64,
}

/// Converts the node's float coin amount into integer base units.
pub fn amount_to_base_units(value: f64) -> ClientResult<u64> {
    if !value.is_finite() || value < 0.0 {
        return Err(ClientError::Parse(format!("bad amount: {value}")));
    }
    Ok((value * COIN_UNITS).round() as u64)
}
