//! The two signing strategies: this node's own key, or the remote
//! threshold-signature service.

use async_trait::async_trait;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey, SignOnly};
use thiserror::Error;

use causeway_primitives::buf::Buf32;
use causeway_primitives::vault::KeysignBlame;

#[derive(Debug, Error)]
pub enum KeysignError {
    /// The threshold protocol failed; the blame names the uncooperative
    /// members when the protocol could determine them.
    #[error("keysign failed: {message}")]
    Tss {
        message: String,
        blame: KeysignBlame,
    },

    #[error("{0}")]
    Other(String),
}

impl KeysignError {
    pub fn blame(&self) -> Option<&KeysignBlame> {
        match self {
            Self::Tss { blame, .. } if !blame.is_empty() => Some(blame),
            _ => None,
        }
    }
}

/// Remote multi-party signer for shared vault keys. The protocol itself is a
/// black box; a sign call either produces a signature usable by the encoder
/// or a structured failure.
#[async_trait]
pub trait RemoteSigner: Sync + Send + 'static {
    async fn sign(&self, digest: &Buf32, vault_pub_key: &str) -> Result<Vec<u8>, KeysignError>;
}

/// Signer for vaults whose key is this node's own, unshared key. Single-node
/// vaults skip the threshold protocol entirely.
#[derive(Debug)]
pub struct NodeSigner {
    secp: Secp256k1<SignOnly>,
    secret_key: SecretKey,
    node_pub_key: String,
}

impl NodeSigner {
    pub fn new(secret_key: SecretKey) -> Self {
        let secp = Secp256k1::signing_only();
        let node_pub_key = hex::encode(PublicKey::from_secret_key(&secp, &secret_key).serialize());
        Self {
            secp,
            secret_key,
            node_pub_key,
        }
    }

    /// Uses the bridge's rendering of the node key instead of the derived
    /// hex form, for bridges that hand out bech32 keys.
    pub fn with_pub_key(secret_key: SecretKey, node_pub_key: String) -> Self {
        Self {
            secp: Secp256k1::signing_only(),
            secret_key,
            node_pub_key,
        }
    }

    pub fn node_pub_key(&self) -> &str {
        &self.node_pub_key
    }

    /// A vault whose key is the node's own key needs no multi-party
    /// coordination, which also relaxes some UTXO selection rules.
    pub fn is_own_vault(&self, vault_pub_key: &str) -> bool {
        self.node_pub_key.eq_ignore_ascii_case(vault_pub_key)
    }

    pub fn sign_digest(&self, digest: &Buf32) -> Result<Vec<u8>, KeysignError> {
        let message = Message::from_digest(digest.0);
        let signature = self.secp.sign_ecdsa(&message, &self.secret_key);
        Ok(signature.serialize_der().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use secp256k1::ecdsa::Signature;

    use super::*;

    fn node_signer() -> NodeSigner {
        NodeSigner::new(SecretKey::from_slice(&[0x42; 32]).unwrap())
    }

    #[test]
    fn test_own_vault_detection() {
        let signer = node_signer();
        let own = signer.node_pub_key().to_owned();
        assert!(signer.is_own_vault(&own));
        assert!(signer.is_own_vault(&own.to_uppercase()));
        assert!(!signer.is_own_vault("03deadbeef"));
    }

    #[test]
    fn test_sign_digest_verifies() {
        let signer = node_signer();
        let digest = Buf32::from([7; 32]);
        let sig_bytes = signer.sign_digest(&digest).unwrap();

        let secp = Secp256k1::new();
        let pk = PublicKey::from_secret_key(&secp, &SecretKey::from_slice(&[0x42; 32]).unwrap());
        let sig = Signature::from_der(&sig_bytes).unwrap();
        let msg = Message::from_digest(digest.0);
        assert!(secp.verify_ecdsa(&msg, &sig, &pk).is_ok());
    }
}
