//! Cryptographic primitives for the vault.
//!
//! This module provides:
//! - Argon2id key derivation and password verification
//! - AES-256-GCM envelopes for arbitrary payloads
//! - Zeroizing containers for keys and passwords

pub mod cipher;
pub mod kdf;
pub mod zero;

pub use cipher::{
    decrypt, decrypt_to_string, encrypt, encrypt_string, EncryptedEnvelope, SessionKey,
    ENVELOPE_VERSION,
};
pub use kdf::{
    derive_key_material, generate_nonce, generate_salt, verify_hash, KdfParams,
    MasterKeyMaterial,
};
pub use zero::SecureBuffer;

use thiserror::Error;

/// Errors that can occur in cryptographic operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Key derivation failed: {0}")]
    KdfFailed(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Authentication failed - data may have been tampered with")]
    AuthenticationFailed,

    #[error("Unsupported envelope version {0}")]
    UnsupportedVersion(u32),

    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    #[error("Random number generation failed: {0}")]
    RandomFailed(String),
}

/// Result type for crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;
