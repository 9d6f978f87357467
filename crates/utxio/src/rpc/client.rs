use std::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine};
use reqwest::{
    header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE},
    Client,
};
use serde::{de, Serialize};
use serde_json::{json, value::Value};
use tokio::time::sleep;
use tracing::*;

use causeway_primitives::utxo::Utxo;

use super::error::{ClientError, ClientResult, RpcServerError};
use super::traits::{ChainBroadcaster, ChainReader};
use super::types::{RpcAddressBalance, RpcBlock, RpcMempoolEntry, RpcTransaction, RpcUtxo};

/// The maximum number of retries for a request.
const MAX_RETRIES: u8 = 3;

/// Custom implementation to convert a value to a `Value` type.
fn to_value<T>(value: T) -> ClientResult<Value>
where
    T: Serialize,
{
    serde_json::to_value(value)
        .map_err(|e| ClientError::Param(format!("Error creating value: {}", e)))
}

/// An `async` client for interacting with the chain node's JSON-RPC server.
#[derive(Debug)]
pub struct ChainRpcClient {
    /// The URL of the node.
    url: String,
    /// The underlying `async` HTTP client.
    client: Client,
    /// The ID of the current request.
    id: AtomicUsize,
}

/// Response returned by the RPC server.
#[derive(Debug, serde::Deserialize)]
struct Response<R> {
    pub result: Option<R>,
    pub error: Option<RpcServerError>,
}

impl ChainRpcClient {
    /// Creates a new [`ChainRpcClient`] with the given URL, username, and
    /// password.
    pub fn new(url: String, username: String, password: String) -> ClientResult<Self> {
        if username.is_empty() || password.is_empty() {
            return Err(ClientError::MissingUserPassword);
        }

        let user_pw = general_purpose::STANDARD.encode(format!("{username}:{password}"));
        let authorization = format!("Basic {user_pw}")
            .parse()
            .map_err(|_| ClientError::Other("Error parsing header".to_string()))?;

        let content_type = "application/json"
            .parse()
            .map_err(|_| ClientError::Other("Error parsing header".to_string()))?;
        let headers =
            HeaderMap::from_iter([(AUTHORIZATION, authorization), (CONTENT_TYPE, content_type)]);

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| ClientError::Other(format!("Could not create client: {e}")))?;

        let id = AtomicUsize::new(0);

        trace!(url = %url, "Created chain rpc client");

        Ok(Self { url, client, id })
    }

    fn next_id(&self) -> usize {
        self.id.fetch_add(1, Ordering::AcqRel)
    }

    async fn call<T: de::DeserializeOwned + fmt::Debug>(
        &self,
        method: &str,
        params: &[Value],
    ) -> ClientResult<T> {
        let mut retries = 0;
        loop {
            trace!(%method, ?params, %retries, "Calling chain rpc");

            let id = self.next_id();

            let response = self
                .client
                .post(&self.url)
                .json(&json!({
                    "jsonrpc": "1.0",
                    "id": id,
                    "method": method,
                    "params": params
                }))
                .send()
                .await;
            match response {
                Ok(resp) => {
                    let data = resp
                        .json::<Response<T>>()
                        .await
                        .map_err(|e| ClientError::Parse(e.to_string()))?;
                    if let Some(err) = data.error {
                        return Err(ClientError::Server(err.code, err.message));
                    }
                    return data
                        .result
                        .ok_or_else(|| ClientError::Other("Empty data received".to_string()));
                }
                Err(err) => {
                    warn!(err = %err, "Error calling chain rpc");

                    if err.is_body() {
                        // Body error is unrecoverable
                        return Err(ClientError::Body(err.to_string()));
                    } else if err.is_status() {
                        // Status error is unrecoverable
                        let e = match err.status() {
                            Some(code) => ClientError::Status(code.to_string(), err.to_string()),
                            _ => ClientError::Other(err.to_string()),
                        };
                        return Err(e);
                    } else if err.is_decode() {
                        // Error decoding response, might be recoverable
                        let e = ClientError::MalformedResponse(err.to_string());
                        warn!(%e, "decoding error, retrying...");
                    } else if err.is_connect() {
                        // Connection error, might be recoverable
                        let e = ClientError::Connection(err.to_string());
                        warn!(%e, "connection error, retrying...");
                    } else if err.is_timeout() {
                        // Timeout error, might be recoverable
                        let e = ClientError::Timeout;
                        warn!(%e, "timeout error, retrying...");
                    } else if err.is_request() {
                        // General request error, might be recoverable
                        let e = ClientError::Request(err.to_string());
                        warn!(%e, "request error, retrying...");
                    } else if err.is_builder() {
                        // Request builder error is unrecoverable
                        return Err(ClientError::ReqBuilder(err.to_string()));
                    } else if err.is_redirect() {
                        // Redirect error is unrecoverable
                        return Err(ClientError::HttpRedirect(err.to_string()));
                    } else {
                        // Unknown error is unrecoverable
                        return Err(ClientError::Other("Unknown error".to_string()));
                    }
                }
            }
            retries += 1;
            if retries >= MAX_RETRIES {
                return Err(ClientError::MaxRetriesExceeded(MAX_RETRIES));
            }
            sleep(Duration::from_millis(1_000)).await;
        }
    }
}

#[async_trait]
impl ChainReader for ChainRpcClient {
    async fn get_block_count(&self) -> ClientResult<u64> {
        self.call::<u64>("getblockcount", &[]).await
    }

    async fn get_block_hash(&self, height: u64) -> ClientResult<String> {
        self.call::<String>("getblockhash", &[to_value(height)?])
            .await
    }

    async fn get_block_verbose(&self, hash: &str) -> ClientResult<RpcBlock> {
        // verbosity 2 decodes every transaction in place
        self.call::<RpcBlock>("getblock", &[to_value(hash)?, to_value(2)?])
            .await
    }

    async fn get_raw_transaction_verbose(&self, txid: &str) -> ClientResult<RpcTransaction> {
        self.call::<RpcTransaction>("getrawtransaction", &[to_value(txid)?, to_value(1)?])
            .await
    }

    async fn get_mempool_entry(&self, txid: &str) -> ClientResult<Option<RpcMempoolEntry>> {
        match self
            .call::<RpcMempoolEntry>("getmempoolentry", &[to_value(txid)?])
            .await
        {
            Ok(entry) => Ok(Some(entry)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn list_unspent(&self, address: &str) -> ClientResult<Vec<Utxo>> {
        let utxos = self
            .call::<Vec<RpcUtxo>>(
                "getaddressutxos",
                &[to_value(json!({ "addresses": [address] }))?],
            )
            .await?;
        Ok(utxos.into_iter().map(Utxo::from).collect())
    }

    async fn get_address_balance(&self, address: &str) -> ClientResult<u64> {
        let balance = self
            .call::<RpcAddressBalance>(
                "getaddressbalance",
                &[to_value(json!({ "addresses": [address] }))?],
            )
            .await?;
        Ok(balance.balance)
    }
}

#[async_trait]
impl ChainBroadcaster for ChainRpcClient {
    async fn send_raw_transaction(&self, raw_tx: &[u8]) -> ClientResult<String> {
        let txstr = hex::encode(raw_tx);
        trace!(txstr = %txstr, "Sending raw transaction");
        self.call::<String>("sendrawtransaction", &[to_value(txstr)?])
            .await
    }
}
