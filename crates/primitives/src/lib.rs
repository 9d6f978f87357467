//! Plain types shared across the causeway chain-client crates.

pub mod buf;
pub mod events;
pub mod payment;
pub mod utxo;
pub mod vault;
