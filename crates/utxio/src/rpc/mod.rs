pub mod client;
pub mod error;
pub mod traits;
pub mod types;

pub use client::ChainRpcClient;
pub use error::{ClientError, ClientResult};
