//! Agent signing key: loading, generation and entry signing.

use std::fs;
use std::path::Path;

use secp256k1::{PublicKey, SecretKey};
use tracing::info;

use super::signatures::{parse_secret_key, SignatureManager};
use crate::error::LogError;

/// The agent's signing identity.
pub struct AgentSigner {
    secret_key: SecretKey,
    public_key: PublicKey,
    manager: SignatureManager,
}

impl AgentSigner {
    pub fn new(secret_key: SecretKey) -> Self {
        let manager = SignatureManager::new();
        let public_key = manager.public_key_from_secret(&secret_key);
        Self {
            secret_key,
            public_key,
            manager,
        }
    }

    pub fn generate() -> Self {
        let manager = SignatureManager::new();
        Self::new(manager.generate_secret_key())
    }

    pub fn from_hex(hex_key: &str) -> Result<Self, LogError> {
        Ok(Self::new(parse_secret_key(hex_key)?))
    }

    /// Load a hex-encoded secret key from a file.
    pub fn load(path: &Path) -> Result<Self, LogError> {
        let contents = fs::read_to_string(path).map_err(|e| {
            LogError::SigningUnavailable(format!("Failed to read signing key {:?}: {}", path, e))
        })?;
        let signer = Self::from_hex(&contents)?;
        info!("Loaded signing key {}", signer.public_key_hex());
        Ok(signer)
    }

    /// Write a fresh key to `path`, refusing to overwrite an existing key.
    pub fn generate_to_file(path: &Path) -> Result<Self, LogError> {
        if path.exists() {
            return Err(LogError::ConfigError(format!(
                "Refusing to overwrite existing key file {:?}",
                path
            )));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let signer = Self::generate();
        fs::write(path, hex::encode(signer.secret_key.secret_bytes()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }

        info!("Generated signing key {} at {:?}", signer.public_key_hex(), path);
        Ok(signer)
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key.serialize())
    }

    /// Sign a 32-byte digest, returning the hex compact signature.
    pub fn sign_hex(&self, digest: &[u8; 32]) -> Result<String, LogError> {
        let signature = self.manager.sign_digest(digest, &self.secret_key)?;
        Ok(hex::encode(signature.serialize_compact()))
    }
}

impl std::fmt::Debug for AgentSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSigner")
            .field("public_key", &self.public_key_hex())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_generate_and_load_key_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keys").join("agent.key");

        let generated = AgentSigner::generate_to_file(&path).unwrap();
        let loaded = AgentSigner::load(&path).unwrap();
        assert_eq!(generated.public_key_hex(), loaded.public_key_hex());

        assert!(AgentSigner::generate_to_file(&path).is_err());
    }

    #[test]
    fn test_missing_key_file_is_signing_unavailable() {
        let dir = tempdir().unwrap();
        let result = AgentSigner::load(&dir.path().join("absent.key"));
        assert!(matches!(result, Err(LogError::SigningUnavailable(_))));
    }

    #[test]
    fn test_signature_verifies_with_public_key() {
        let signer = AgentSigner::from_hex(&"11".repeat(32)).unwrap();
        let digest = [7u8; 32];
        let signature = signer.sign_hex(&digest).unwrap();

        let manager = SignatureManager::new();
        assert!(manager
            .verify_hex(&digest, &signature, &signer.public_key_hex())
            .unwrap());
    }
}
