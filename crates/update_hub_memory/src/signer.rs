//! Keyed signing adapter. The real cryptographic algorithm is out of scope —
//! this satisfies the port contract (deterministic signature, pure
//! verification) for in-process deployments and tests.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use update_hub_core::ports::{Result, Signer};
use update_hub_core::types::SignatureEnvelope;

pub struct KeyedSigner {
    key: Vec<u8>,
    identity: String,
}

impl KeyedSigner {
    pub fn new(key: impl Into<Vec<u8>>, identity: &str) -> Self {
        Self {
            key: key.into(),
            identity: identity.to_string(),
        }
    }

    fn compute(&self, bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.key);
        hasher.update([0x1f]);
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }
}

#[async_trait]
impl Signer for KeyedSigner {
    async fn sign(&self, bytes: &[u8]) -> Result<SignatureEnvelope> {
        Ok(SignatureEnvelope {
            signature: self.compute(bytes),
            identity: self.identity.clone(),
        })
    }

    async fn verify(&self, bytes: &[u8], signature: &str, identity: &str) -> Result<bool> {
        Ok(identity == self.identity && self.compute(bytes) == signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sign_verify_round_trip() {
        let signer = KeyedSigner::new(b"secret".to_vec(), "signer-1");
        let envelope = signer.sign(b"payload").await.unwrap();
        assert_eq!(envelope.identity, "signer-1");
        assert!(signer
            .verify(b"payload", &envelope.signature, &envelope.identity)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn verify_rejects_tampered_bytes() {
        let signer = KeyedSigner::new(b"secret".to_vec(), "signer-1");
        let envelope = signer.sign(b"payload").await.unwrap();
        assert!(!signer
            .verify(b"payload!", &envelope.signature, &envelope.identity)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn verify_rejects_wrong_identity() {
        let signer = KeyedSigner::new(b"secret".to_vec(), "signer-1");
        let envelope = signer.sign(b"payload").await.unwrap();
        assert!(!signer
            .verify(b"payload", &envelope.signature, "signer-2")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn different_keys_produce_different_signatures() {
        let a = KeyedSigner::new(b"key-a".to_vec(), "signer");
        let b = KeyedSigner::new(b"key-b".to_vec(), "signer");
        let sig_a = a.sign(b"payload").await.unwrap();
        let sig_b = b.sign(b"payload").await.unwrap();
        assert_ne!(sig_a.signature, sig_b.signature);
    }
}
