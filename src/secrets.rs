//! At-rest encryption for provider credentials.
//!
//! AES-256-GCM with a key derived from an operator passphrase by iterated
//! SHA-256. The ciphertext and nonce are base64-encoded so the value can
//! live in a JSON column. Plaintext keys exist only inside the provider
//! registry boundary; nothing here ever logs them.

use aes_gcm::{
    aead::{Aead, AeadCore, OsRng},
    Aes256Gcm, KeyInit, Nonce,
};
use base64::{engine::general_purpose::STANDARD as B64, Engine};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const DERIVE_ROUNDS: u32 = 100_000;
const DERIVE_SALT: &[u8] = b"cognitude-provider-keys-v1";

/// An encrypted credential as stored in the `provider_configs` JSON column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SealedSecret {
    /// Base64 of the 12-byte AES-GCM nonce.
    pub nonce: String,
    /// Base64 of ciphertext + 16-byte auth tag.
    pub ciphertext: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("credential decryption failed: {0}")]
    Decrypt(String),
    #[error("sealed secret is malformed: {0}")]
    Malformed(String),
}

/// Seals and opens provider credentials with a process-wide key.
pub struct SecretBox {
    key: [u8; 32],
}

impl SecretBox {
    /// Derive the sealing key from a passphrase. Empty passphrases are
    /// rejected — a blank env var must fail loudly, not silently weaken
    /// every stored credential.
    pub fn from_passphrase(passphrase: &str) -> anyhow::Result<Self> {
        anyhow::ensure!(
            !passphrase.is_empty(),
            "secrets passphrase must not be empty"
        );
        Ok(Self {
            key: derive_key(passphrase),
        })
    }

    /// Encrypt a plaintext credential. Every call draws a fresh nonce, so
    /// sealing the same key twice yields different ciphertexts.
    pub fn seal(&self, plaintext: &str) -> SealedSecret {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .expect("32-byte key is always valid for AES-256-GCM");
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .expect("AES-GCM encryption is infallible for in-memory buffers");
        SealedSecret {
            nonce: B64.encode(nonce),
            ciphertext: B64.encode(ciphertext),
        }
    }

    /// Decrypt a sealed credential. Fails on a wrong key or any tampering —
    /// GCM authenticates the ciphertext.
    pub fn open(&self, sealed: &SealedSecret) -> Result<String, SecretError> {
        let nonce_bytes = B64
            .decode(&sealed.nonce)
            .map_err(|e| SecretError::Malformed(format!("nonce: {e}")))?;
        if nonce_bytes.len() != 12 {
            return Err(SecretError::Malformed(format!(
                "nonce must be 12 bytes, got {}",
                nonce_bytes.len()
            )));
        }
        let ciphertext = B64
            .decode(&sealed.ciphertext)
            .map_err(|e| SecretError::Malformed(format!("ciphertext: {e}")))?;

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .expect("32-byte key is always valid for AES-256-GCM");
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| SecretError::Decrypt("wrong key or corrupted ciphertext".into()))?;

        String::from_utf8(plaintext)
            .map_err(|_| SecretError::Decrypt("plaintext is not valid UTF-8".into()))
    }
}

/// Iterated SHA-256 key derivation. Not a memory-hard KDF, but the
/// passphrase is operator-provisioned entropy, not a human password.
fn derive_key(passphrase: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(DERIVE_SALT);
    hasher.update(passphrase.as_bytes());
    let mut digest = hasher.finalize();

    for _ in 0..DERIVE_ROUNDS {
        let mut h = Sha256::new();
        h.update(digest);
        h.update(passphrase.as_bytes());
        digest = h.finalize();
    }

    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let sb = SecretBox::from_passphrase("operator-passphrase").unwrap();
        let sealed = sb.seal("sk-live-1234567890");
        assert_eq!(sb.open(&sealed).unwrap(), "sk-live-1234567890");
    }

    #[test]
    fn fresh_nonce_per_seal() {
        let sb = SecretBox::from_passphrase("p").unwrap();
        let a = sb.seal("same-plaintext");
        let b = sb.seal("same-plaintext");
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
        assert_eq!(sb.open(&a).unwrap(), sb.open(&b).unwrap());
    }

    #[test]
    fn wrong_passphrase_fails_closed() {
        let right = SecretBox::from_passphrase("right").unwrap();
        let wrong = SecretBox::from_passphrase("wrong").unwrap();
        let sealed = right.seal("sk-secret");
        assert!(wrong.open(&sealed).is_err());
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let sb = SecretBox::from_passphrase("p").unwrap();
        let mut sealed = sb.seal("sk-secret");
        let mut bytes = B64.decode(&sealed.ciphertext).unwrap();
        bytes[0] ^= 0xFF;
        sealed.ciphertext = B64.encode(bytes);
        assert!(matches!(sb.open(&sealed), Err(SecretError::Decrypt(_))));
    }

    #[test]
    fn malformed_base64_is_rejected_without_panic() {
        let sb = SecretBox::from_passphrase("p").unwrap();
        let sealed = SealedSecret {
            nonce: "!!!not-base64!!!".into(),
            ciphertext: "also-not".into(),
        };
        assert!(matches!(sb.open(&sealed), Err(SecretError::Malformed(_))));
    }

    #[test]
    fn empty_passphrase_is_rejected() {
        assert!(SecretBox::from_passphrase("").is_err());
    }

    #[test]
    fn sealed_secret_survives_json_round_trip() {
        let sb = SecretBox::from_passphrase("p").unwrap();
        let sealed = sb.seal("sk-abc");
        let json = serde_json::to_string(&sealed).unwrap();
        let back: SealedSecret = serde_json::from_str(&json).unwrap();
        assert_eq!(sb.open(&back).unwrap(), "sk-abc");
    }
}
