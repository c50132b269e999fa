//! Local Ed25519 key material and seal signatures
//!
//! The keystore is a small JSON file holding a hex-encoded keypair. Seals are
//! signed over the SHA-256 digest of their JSON text; when no key is available
//! the signature is the literal [`UNSIGNED`] marker.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::Context;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ProofworkError, Result};
use crate::storage::Seal;

/// Signature value recorded when a seal was produced without a key.
pub const UNSIGNED: &str = "unsigned";

/// Keypair persisted in `keystore.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keystore {
    /// Public key (hex encoded)
    pub public_key: String,
    /// Private key seed (hex encoded)
    pub private_key: String,
    /// Key creation timestamp (RFC-3339)
    pub created_at: String,
}

impl Keystore {
    /// Generate a fresh keypair from the thread-local CSPRNG.
    pub fn generate() -> Self {
        let seed: [u8; 32] = rand::random();
        let signing_key = SigningKey::from_bytes(&seed);
        Self {
            public_key: hex::encode(signing_key.verifying_key().to_bytes()),
            private_key: hex::encode(seed),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read keystore {}", path.display()))?;
        let keystore: Self = serde_json::from_str(&json)
            .map_err(|e| ProofworkError::Signing(format!("Failed to parse keystore: {}", e)))?;
        // Reject key material that does not decode or does not pair up
        // before anyone signs with it.
        let signing_key = keystore.signing_key()?;
        if keystore.verifying_key()? != signing_key.verifying_key() {
            return Err(ProofworkError::Signing(format!(
                "Keystore {} public key does not match its private key",
                path.display()
            ))
            .into());
        }
        Ok(keystore)
    }

    /// Write the keystore, restricting permissions to the owner on unix.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(path)
            .with_context(|| format!("Failed to open keystore {}", path.display()))?;

        // `mode` only applies on creation; tighten a file that already existed.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }

        file.write_all(json.as_bytes())
            .with_context(|| format!("Failed to write keystore {}", path.display()))?;
        file.sync_all()?;
        Ok(())
    }

    /// Load the keystore at `path`, generating and saving one if absent.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }
        let keystore = Self::generate();
        keystore.save(path)?;
        tracing::info!(path = %path.display(), "Generated new signing keystore");
        Ok(keystore)
    }

    pub fn signing_key(&self) -> Result<SigningKey> {
        let seed = decode_fixed::<32>(&self.private_key, "private key")?;
        Ok(SigningKey::from_bytes(&seed))
    }

    pub fn verifying_key(&self) -> Result<VerifyingKey> {
        let bytes = decode_fixed::<32>(&self.public_key, "public key")?;
        VerifyingKey::from_bytes(&bytes)
            .map_err(|e| ProofworkError::Signing(format!("Invalid public key: {}", e)).into())
    }
}

fn decode_fixed<const N: usize>(encoded: &str, what: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(encoded)
        .map_err(|e| ProofworkError::Signing(format!("Invalid {} hex: {}", what, e)))?;
    bytes.try_into().map_err(|_| {
        ProofworkError::Signing(format!("{} must be {} bytes", what, N)).into()
    })
}

/// Sign the SHA-256 digest of `json`, or return [`UNSIGNED`] without a key.
pub fn sign_json(json: &str, key: Option<&SigningKey>) -> String {
    match key {
        Some(key) => {
            let digest = Sha256::digest(json.as_bytes());
            hex::encode(key.sign(&digest).to_bytes())
        }
        None => UNSIGNED.to_string(),
    }
}

/// Check a signature produced by [`sign_json`].
///
/// Always false for [`UNSIGNED`] or undecodable signatures.
pub fn verify_json(json: &str, signature: &str, key: &VerifyingKey) -> bool {
    if signature == UNSIGNED {
        return false;
    }
    let Ok(bytes) = decode_fixed::<64>(signature, "signature") else {
        return false;
    };
    let digest = Sha256::digest(json.as_bytes());
    key.verify(&digest, &Signature::from_bytes(&bytes)).is_ok()
}

/// Check an indexed seal by re-serializing its summary.
pub fn verify_seal(seal: &Seal, key: &VerifyingKey) -> bool {
    match serde_json::to_string(&seal.summary) {
        Ok(json) => verify_json(&json, &seal.seal_signature, key),
        Err(_) => false,
    }
}
