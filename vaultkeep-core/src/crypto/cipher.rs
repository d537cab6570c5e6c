//! AES-256-GCM envelopes for vault payloads.
//!
//! Uses AES-256-GCM with:
//! - 256-bit key
//! - 96-bit (12 byte) nonce, fresh for every call
//! - 128-bit authentication tag
//! - A format version so the algorithm can change without breaking old data

use crate::crypto::kdf::{generate_nonce, KEY_LEN, NONCE_LEN};
use crate::crypto::{CryptoError, Result};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Current envelope format version
pub const ENVELOPE_VERSION: u32 = 1;

/// Authentication tag length in bytes
pub const TAG_LEN: usize = 16;

/// The symmetric key held while the vault is unlocked.
///
/// Zeroized on drop. `Debug` never prints the key bytes.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey {
    key: [u8; KEY_LEN],
}

impl SessionKey {
    /// Generate a new random key
    pub fn generate() -> Result<Self> {
        let mut key = [0u8; KEY_LEN];
        OsRng
            .try_fill_bytes(&mut key)
            .map_err(|e| CryptoError::RandomFailed(e.to_string()))?;
        Ok(Self { key })
    }

    /// Create a key from raw bytes (use with caution)
    pub fn from_bytes(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    /// Get the raw key bytes (use sparingly)
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.key
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// An encrypted payload with its nonce and tag.
///
/// Serialized as `{cipherText, iv, authTag, version}` with base64 byte
/// fields, which is also the remote wire document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// Encrypted data, without the tag
    #[serde(rename = "cipherText", with = "base64_bytes")]
    pub ciphertext: Vec<u8>,

    /// Unique nonce for this envelope (12 bytes)
    #[serde(rename = "iv", with = "base64_bytes")]
    pub nonce: [u8; NONCE_LEN],

    /// Authentication tag (16 bytes)
    #[serde(rename = "authTag", with = "base64_bytes")]
    pub auth_tag: [u8; TAG_LEN],

    /// Envelope format version
    pub version: u32,
}

impl EncryptedEnvelope {
    /// Serialize to the JSON wire document
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CryptoError::InvalidEncoding(e.to_string()))
    }

    /// Parse the JSON wire document.
    ///
    /// The version is checked here as well as in [`decrypt`], so an unknown
    /// format is rejected before any key is touched.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let envelope: Self =
            serde_json::from_slice(bytes).map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;
        if envelope.version != ENVELOPE_VERSION {
            return Err(CryptoError::UnsupportedVersion(envelope.version));
        }
        Ok(envelope)
    }
}

/// Encrypt data using AES-256-GCM
///
/// # Security Notes
/// - Never reuse nonces with the same key!
/// - The nonce is generated randomly for each call
pub fn encrypt(key: &SessionKey, plaintext: &[u8]) -> Result<EncryptedEnvelope> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let nonce_bytes = generate_nonce()?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let mut ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(format!("{}", e)))?;

    // AES-GCM appends the auth tag to the ciphertext
    if ciphertext.len() < TAG_LEN {
        return Err(CryptoError::EncryptionFailed(
            "Ciphertext too short - missing auth tag".to_string(),
        ));
    }

    let tag_start = ciphertext.len() - TAG_LEN;
    let auth_tag: [u8; TAG_LEN] = ciphertext[tag_start..]
        .try_into()
        .map_err(|_| CryptoError::EncryptionFailed("Invalid auth tag length".to_string()))?;
    ciphertext.truncate(tag_start);

    Ok(EncryptedEnvelope {
        ciphertext,
        nonce: nonce_bytes,
        auth_tag,
        version: ENVELOPE_VERSION,
    })
}

/// Decrypt an envelope using AES-256-GCM
///
/// # Security
/// - The tag is verified before any plaintext is returned
/// - A wrong key, corrupted transport or tampering all surface as
///   [`CryptoError::AuthenticationFailed`]
pub fn decrypt(key: &SessionKey, envelope: &EncryptedEnvelope) -> Result<Vec<u8>> {
    if envelope.version != ENVELOPE_VERSION {
        return Err(CryptoError::UnsupportedVersion(envelope.version));
    }

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let nonce = Nonce::from_slice(&envelope.nonce);

    let mut ciphertext_with_tag = Vec::with_capacity(envelope.ciphertext.len() + TAG_LEN);
    ciphertext_with_tag.extend_from_slice(&envelope.ciphertext);
    ciphertext_with_tag.extend_from_slice(&envelope.auth_tag);

    cipher
        .decrypt(nonce, ciphertext_with_tag.as_slice())
        .map_err(|_| CryptoError::AuthenticationFailed)
}

/// Encrypt a string
pub fn encrypt_string(key: &SessionKey, plaintext: &str) -> Result<EncryptedEnvelope> {
    encrypt(key, plaintext.as_bytes())
}

/// Decrypt to a string
pub fn decrypt_to_string(key: &SessionKey, envelope: &EncryptedEnvelope) -> Result<String> {
    let bytes = decrypt(key, envelope)?;
    String::from_utf8(bytes).map_err(|_| CryptoError::DecryptionFailed("Invalid UTF-8".to_string()))
}

/// Base64 (standard alphabet) serialization for byte vectors and arrays.
pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, T>(bytes: &T, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: AsRef<[u8]>,
    {
        s.serialize_str(&STANDARD.encode(bytes.as_ref()))
    }

    pub fn deserialize<'de, D, T>(d: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: TryFrom<Vec<u8>>,
    {
        let s = String::deserialize(d)?;
        let bytes = STANDARD.decode(&s).map_err(serde::de::Error::custom)?;
        let len = bytes.len();
        T::try_from(bytes)
            .map_err(|_| serde::de::Error::custom(format!("unexpected byte length {}", len)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_key_generation() {
        let a = SessionKey::generate().unwrap();
        let b = SessionKey::generate().unwrap();
        assert_eq!(a.as_bytes().len(), 32);
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = SessionKey::generate().unwrap();
        let plaintext = b"Hello, World! This is a test.";

        let envelope = encrypt(&key, plaintext).unwrap();
        assert_eq!(envelope.version, ENVELOPE_VERSION);
        assert_eq!(envelope.ciphertext.len(), plaintext.len());

        let decrypted = decrypt(&key, &envelope).unwrap();
        assert_eq!(plaintext.to_vec(), decrypted);
    }

    #[test]
    fn test_empty_plaintext_roundtrip() {
        let key = SessionKey::generate().unwrap();
        let envelope = encrypt(&key, b"").unwrap();
        assert!(envelope.ciphertext.is_empty());
        assert_eq!(decrypt(&key, &envelope).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_encrypt_string_roundtrip() {
        let key = SessionKey::generate().unwrap();
        let envelope = encrypt_string(&key, "My secret password!").unwrap();
        assert_eq!(decrypt_to_string(&key, &envelope).unwrap(), "My secret password!");
    }

    #[test]
    fn test_different_nonces() {
        let key = SessionKey::generate().unwrap();

        let first = encrypt(&key, b"Same data").unwrap();
        let second = encrypt(&key, b"Same data").unwrap();

        assert_ne!(first.nonce, second.nonce);
        assert_ne!(first.ciphertext, second.ciphertext);
    }

    #[test]
    fn test_tampering_detected() {
        let key = SessionKey::generate().unwrap();
        let mut envelope = encrypt(&key, b"Original data").unwrap();
        envelope.ciphertext[0] ^= 0xFF;
        assert_eq!(decrypt(&key, &envelope), Err(CryptoError::AuthenticationFailed));
    }

    #[test]
    fn test_tampered_tag_and_nonce_detected() {
        let key = SessionKey::generate().unwrap();
        let envelope = encrypt(&key, b"Original data").unwrap();

        let mut bad_tag = envelope.clone();
        bad_tag.auth_tag[15] ^= 0x01;
        assert_eq!(decrypt(&key, &bad_tag), Err(CryptoError::AuthenticationFailed));

        let mut bad_nonce = envelope;
        bad_nonce.nonce[0] ^= 0x01;
        assert_eq!(decrypt(&key, &bad_nonce), Err(CryptoError::AuthenticationFailed));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let key = SessionKey::generate().unwrap();
        let mut envelope = encrypt(&key, b"data").unwrap();
        envelope.version = 2;
        assert_eq!(decrypt(&key, &envelope), Err(CryptoError::UnsupportedVersion(2)));

        let json = envelope.to_json().unwrap();
        assert_eq!(
            EncryptedEnvelope::from_json(&json),
            Err(CryptoError::UnsupportedVersion(2))
        );
    }

    #[test]
    fn test_json_wire_shape() {
        let key = SessionKey::generate().unwrap();
        let envelope = encrypt(&key, b"wire").unwrap();
        let json: serde_json::Value = serde_json::from_slice(&envelope.to_json().unwrap()).unwrap();

        assert!(json["cipherText"].is_string());
        assert!(json["iv"].is_string());
        assert!(json["authTag"].is_string());
        assert_eq!(json["version"], 1);

        let parsed = EncryptedEnvelope::from_json(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn test_wrong_nonce_length_rejected() {
        let doc = br#"{"cipherText":"AAAA","iv":"AAAA","authTag":"AAAAAAAAAAAAAAAAAAAAAA==","version":1}"#;
        assert!(matches!(
            EncryptedEnvelope::from_json(doc),
            Err(CryptoError::InvalidEncoding(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_roundtrip(plaintext in proptest::collection::vec(any::<u8>(), 0..512), key in any::<[u8; 32]>()) {
            let key = SessionKey::from_bytes(key);
            let envelope = encrypt(&key, &plaintext).unwrap();
            prop_assert_eq!(decrypt(&key, &envelope).unwrap(), plaintext);
        }

        #[test]
        fn prop_wrong_key_always_fails(
            plaintext in proptest::collection::vec(any::<u8>(), 0..512),
            k1 in any::<[u8; 32]>(),
            k2 in any::<[u8; 32]>(),
        ) {
            prop_assume!(k1 != k2);
            let envelope = encrypt(&SessionKey::from_bytes(k1), &plaintext).unwrap();
            prop_assert_eq!(
                decrypt(&SessionKey::from_bytes(k2), &envelope),
                Err(CryptoError::AuthenticationFailed)
            );
        }
    }
}
