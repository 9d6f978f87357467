//! Error types for the RPC client.
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// This is an alias for the result type returned by the RPC client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Server error code for "transaction already in chain".
const RPC_VERIFY_ALREADY_IN_CHAIN: i32 = -27;

/// Server error codes for "no such transaction / mempool entry".
const RPC_INVALID_ADDRESS_OR_KEY: i32 = -5;

/// The error type for errors produced in this library.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientError {
    /// Missing username or password for the RPC server
    #[error("Missing username or password")]
    MissingUserPassword,

    /// RPC server returned an error
    #[error("RPC server returned error '{1}' (code {0})")]
    Server(i32, String),

    #[error("Error parsing rpc response: {0}")]
    Parse(String),

    /// Error creating the RPC request, retry might help
    #[error("Could not create RPC Param")]
    Param(String),

    /// Body error, unlikely to be recoverable by retrying
    #[error("{0}")]
    Body(String),

    /// HTTP status error, not retryable
    #[error("Obtained failure status({0}): {1}")]
    Status(String, String),

    /// Error decoding the response, retry might not help
    #[error("Malformed Response: {0}")]
    MalformedResponse(String),

    /// Connection error, retry might help
    #[error("Could not connect: {0}")]
    Connection(String),

    /// Timeout error, retry might help
    #[error("Timeout")]
    Timeout,

    /// Redirect error, not retryable
    #[error("HttpRedirect: {0}")]
    HttpRedirect(String),

    /// Error building the request, unlikely to be recoverable
    #[error("Could not build request: {0}")]
    ReqBuilder(String),

    /// Maximum retries exceeded, not retryable
    #[error("Max retries {0} exceeded")]
    MaxRetriesExceeded(u8),

    /// General request error, retry might help
    #[error("Could not create request: {0}")]
    Request(String),

    /// Unknown error, unlikely to be recoverable
    #[error("{0}")]
    Other(String),
}

impl ClientError {
    /// The submitted transaction is already known to the chain, which the
    /// broadcast manager treats as success.
    pub fn is_already_known(&self) -> bool {
        match self {
            Self::Server(code, message) => {
                *code == RPC_VERIFY_ALREADY_IN_CHAIN
                    || message.contains("already in block chain")
                    || message.contains("already known")
            }
            _ => false,
        }
    }

    /// The queried object does not exist on the server.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Server(code, message) => {
                *code == RPC_INVALID_ADDRESS_OR_KEY || message.contains("not found")
            }
            _ => false,
        }
    }

    /// Whether the scan loop should retry the operation on its next pass.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Timeout | Self::Request(_) | Self::MaxRetriesExceeded(_)
        )
    }
}

impl From<SerdeJsonError> for ClientError {
    fn from(value: SerdeJsonError) -> Self {
        Self::Parse(format!("Could not parse {}", value))
    }
}

/// RPC server error payload.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcServerError {
    pub code: i32,
    pub message: String,
}

impl fmt::Display for RpcServerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "RPC error {}: {}", self.code, self.message)
    }
}

impl From<RpcServerError> for ClientError {
    fn from(value: RpcServerError) -> Self {
        Self::Server(value.code, value.message)
    }
}
