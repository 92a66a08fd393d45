//! `outflow-vault` — symmetric encryption of channel credentials at rest.
//!
//! Uses ChaCha20-Poly1305 with a 32-byte process-wide key loaded from
//! configuration. A sealed blob is a base64 JSON envelope carrying the
//! algorithm tag and a fresh nonce; the Poly1305 tag rides inside the
//! ciphertext, so any tamper fails decryption as [`VaultError::Corrupted`].

pub mod error;
pub mod vault;

pub use error::{Result, VaultError};
pub use vault::CredentialVault;
