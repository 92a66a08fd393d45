use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    ChaCha20Poly1305, Nonce,
};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};

/// Algorithm tag written into every envelope. Lets a future key/algorithm
/// rotation distinguish old blobs without guessing.
const ALG: &str = "chacha20poly1305";

/// Serialized envelope for a sealed credential blob.
#[derive(Serialize, Deserialize)]
struct Envelope {
    alg: String,
    /// Base64-encoded 12-byte nonce.
    nonce: String,
    /// Base64-encoded ciphertext (Poly1305 tag appended).
    ct: String,
}

/// Process-wide credential vault.
///
/// Cheap to clone conceptually but there is no need: the server constructs
/// one and shares it behind an `Arc`.
pub struct CredentialVault {
    cipher: ChaCha20Poly1305,
}

impl CredentialVault {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(key.into()),
        }
    }

    /// Build a vault from the configured hex key (64 hex chars).
    pub fn from_hex(key_hex: &str) -> Result<Self> {
        let bytes = hex::decode(key_hex.trim())
            .map_err(|e| VaultError::InvalidKey(format!("not valid hex: {e}")))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| VaultError::InvalidKey("key must be exactly 32 bytes".to_string()))?;
        Ok(Self::new(&key))
    }

    /// Seal `plaintext` into a base64 blob suitable for the credentials
    /// column. A fresh nonce is drawn per call.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ct = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| VaultError::Corrupted("encryption failed".to_string()))?;

        let envelope = Envelope {
            alg: ALG.to_string(),
            nonce: B64.encode(nonce),
            ct: B64.encode(ct),
        };
        let json = serde_json::to_vec(&envelope)
            .map_err(|e| VaultError::Corrupted(format!("envelope encode: {e}")))?;
        Ok(B64.encode(json))
    }

    /// Open a blob produced by [`encrypt`](Self::encrypt). Fails with
    /// [`VaultError::Corrupted`] on any decode, algorithm, or tag mismatch.
    pub fn decrypt(&self, blob: &str) -> Result<Vec<u8>> {
        let json = B64
            .decode(blob.trim())
            .map_err(|e| VaultError::Corrupted(format!("outer base64: {e}")))?;
        let envelope: Envelope = serde_json::from_slice(&json)
            .map_err(|e| VaultError::Corrupted(format!("envelope decode: {e}")))?;

        if envelope.alg != ALG {
            return Err(VaultError::Corrupted(format!(
                "unknown algorithm: {}",
                envelope.alg
            )));
        }

        let nonce_bytes = B64
            .decode(&envelope.nonce)
            .map_err(|e| VaultError::Corrupted(format!("nonce base64: {e}")))?;
        if nonce_bytes.len() != 12 {
            return Err(VaultError::Corrupted("nonce must be 12 bytes".to_string()));
        }
        let ct = B64
            .decode(&envelope.ct)
            .map_err(|e| VaultError::Corrupted(format!("ciphertext base64: {e}")))?;

        let nonce = Nonce::from_slice(&nonce_bytes);
        self.cipher
            .decrypt(nonce, ct.as_ref())
            .map_err(|_| VaultError::Corrupted("authentication failed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> CredentialVault {
        CredentialVault::new(&[7u8; 32])
    }

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let v = vault();
        let plain = br#"{"host":"smtp.example.com","pass":"hunter2"}"#;
        let blob = v.encrypt(plain).unwrap();
        assert_eq!(v.decrypt(&blob).unwrap(), plain);
    }

    #[test]
    fn each_encryption_uses_a_fresh_nonce() {
        let v = vault();
        let a = v.encrypt(b"same").unwrap();
        let b = v.encrypt(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn tampered_blob_is_corrupted() {
        let v = vault();
        let blob = v.encrypt(b"secret").unwrap();
        // Flip one character of the outer base64.
        let mut chars: Vec<char> = blob.chars().collect();
        let mid = chars.len() / 2;
        chars[mid] = if chars[mid] == 'A' { 'B' } else { 'A' };
        let tampered: String = chars.into_iter().collect();
        assert!(matches!(
            v.decrypt(&tampered),
            Err(VaultError::Corrupted(_))
        ));
    }

    #[test]
    fn wrong_key_is_corrupted() {
        let blob = vault().encrypt(b"secret").unwrap();
        let other = CredentialVault::new(&[9u8; 32]);
        assert!(matches!(other.decrypt(&blob), Err(VaultError::Corrupted(_))));
    }

    #[test]
    fn garbage_is_corrupted_not_a_panic() {
        assert!(matches!(
            vault().decrypt("not base64 at all!!"),
            Err(VaultError::Corrupted(_))
        ));
    }

    #[test]
    fn from_hex_validates_length() {
        assert!(CredentialVault::from_hex(&"ab".repeat(32)).is_ok());
        assert!(CredentialVault::from_hex("abcd").is_err());
        assert!(CredentialVault::from_hex("zz".repeat(32).as_str()).is_err());
    }
}
