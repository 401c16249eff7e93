use crate::error::LogError;
use rand::rngs::OsRng;
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey};

pub struct SignatureManager {
    secp: Secp256k1<secp256k1::All>,
}

impl SignatureManager {
    pub fn new() -> Self {
        Self {
            secp: Secp256k1::new(),
        }
    }

    /// Sign a 32-byte digest directly; entry hashes are already SHA-256 output.
    pub fn sign_digest(
        &self,
        digest: &[u8; 32],
        secret_key: &SecretKey,
    ) -> Result<Signature, LogError> {
        let message = Message::from_digest_slice(digest)
            .map_err(|e| LogError::CryptoError(format!("Invalid digest: {}", e)))?;

        Ok(self.secp.sign_ecdsa(&message, secret_key))
    }

    pub fn verify_digest(
        &self,
        digest: &[u8; 32],
        signature: &Signature,
        public_key: &PublicKey,
    ) -> Result<bool, LogError> {
        let message = Message::from_digest_slice(digest)
            .map_err(|e| LogError::CryptoError(format!("Invalid digest: {}", e)))?;

        match self.secp.verify_ecdsa(&message, signature, public_key) {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    /// Verify a hex-encoded compact signature against a hex-encoded compressed key.
    pub fn verify_hex(
        &self,
        digest: &[u8; 32],
        signature: &str,
        public_key: &str,
    ) -> Result<bool, LogError> {
        let signature = parse_signature(signature)?;
        let public_key = parse_public_key(public_key)?;
        self.verify_digest(digest, &signature, &public_key)
    }

    pub fn public_key_from_secret(&self, secret_key: &SecretKey) -> PublicKey {
        PublicKey::from_secret_key(&self.secp, secret_key)
    }

    pub fn generate_secret_key(&self) -> SecretKey {
        SecretKey::new(&mut OsRng)
    }
}

impl Default for SignatureManager {
    fn default() -> Self {
        Self::new()
    }
}

pub fn parse_public_key(hex_key: &str) -> Result<PublicKey, LogError> {
    let bytes = hex::decode(hex_key.trim())
        .map_err(|e| LogError::CryptoError(format!("Invalid public key hex: {}", e)))?;
    PublicKey::from_slice(&bytes)
        .map_err(|e| LogError::CryptoError(format!("Invalid public key: {}", e)))
}

pub fn parse_signature(hex_sig: &str) -> Result<Signature, LogError> {
    let bytes = hex::decode(hex_sig.trim())
        .map_err(|e| LogError::CryptoError(format!("Invalid signature hex: {}", e)))?;
    Signature::from_compact(&bytes)
        .map_err(|e| LogError::CryptoError(format!("Invalid signature format: {}", e)))
}

pub fn parse_secret_key(hex_key: &str) -> Result<SecretKey, LogError> {
    let bytes = hex::decode(hex_key.trim())
        .map_err(|e| LogError::CryptoError(format!("Invalid secret key hex: {}", e)))?;
    SecretKey::from_slice(&bytes)
        .map_err(|e| LogError::CryptoError(format!("Invalid secret key: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};

    fn digest(data: &[u8]) -> [u8; 32] {
        Sha256::digest(data).into()
    }

    #[test]
    fn test_sign_and_verify_digest() {
        let manager = SignatureManager::new();
        let secret_key = manager.generate_secret_key();
        let public_key = manager.public_key_from_secret(&secret_key);

        let signed = digest(b"entry");
        let signature = manager.sign_digest(&signed, &secret_key).unwrap();
        assert!(manager.verify_digest(&signed, &signature, &public_key).unwrap());

        let other = digest(b"tampered");
        assert!(!manager.verify_digest(&other, &signature, &public_key).unwrap());
    }

    #[test]
    fn test_hex_round_trip_verification() {
        let manager = SignatureManager::new();
        let secret_key = SecretKey::from_slice(&[0x42; 32]).unwrap();
        let public_key = manager.public_key_from_secret(&secret_key);

        let signed = digest(b"hex");
        let signature = manager.sign_digest(&signed, &secret_key).unwrap();
        let sig_hex = hex::encode(signature.serialize_compact());
        let key_hex = hex::encode(public_key.serialize());

        assert!(manager.verify_hex(&signed, &sig_hex, &key_hex).unwrap());
    }

    #[test]
    fn test_wrong_key_fails() {
        let manager = SignatureManager::new();
        let signer = SecretKey::from_slice(&[0x01; 32]).unwrap();
        let other = SecretKey::from_slice(&[0x02; 32]).unwrap();

        let signed = digest(b"entry");
        let signature = manager.sign_digest(&signed, &signer).unwrap();
        let other_public = manager.public_key_from_secret(&other);
        assert!(!manager.verify_digest(&signed, &signature, &other_public).unwrap());
    }

    #[test]
    fn test_malformed_inputs_are_errors() {
        assert!(parse_public_key("zz").is_err());
        assert!(parse_signature("00").is_err());
        assert!(parse_secret_key(&"00".repeat(32)).is_err());
    }
}
