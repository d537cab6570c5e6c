//! Whole-vault payload: the document stored remotely as `vault.json`.
//!
//! The entry set is serialized to JSON, optionally gzip-compressed, then
//! sealed in an [`EncryptedEnvelope`]. Compression happens before
//! encryption; ciphertext does not compress.

use crate::crypto::{decrypt, encrypt, EncryptedEnvelope, SessionKey};
use crate::entry::VaultEntry;
use crate::sync::models::SyncSnapshot;
use crate::{Result, VaultError};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

pub const PAYLOAD_FORMAT_VERSION: u32 = 1;

/// Upper bound on inflated payload size
const MAX_DECOMPRESSED_BYTES: u64 = 64 * 1024 * 1024;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Plaintext contents of the remote vault document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultPayload {
    pub format_version: u32,
    pub checksum: String,
    pub exported_at: DateTime<Utc>,
    pub entries: Vec<VaultEntry>,
}

impl VaultPayload {
    pub fn new(entries: Vec<VaultEntry>) -> Self {
        let checksum = SyncSnapshot::from_entries(&entries).checksum;
        Self {
            format_version: PAYLOAD_FORMAT_VERSION,
            checksum,
            exported_at: Utc::now(),
            entries,
        }
    }
}

/// Serialize, optionally compress, and encrypt. Returns the envelope JSON.
pub fn seal(key: &SessionKey, payload: &VaultPayload, compress: bool) -> Result<Vec<u8>> {
    let mut plaintext = serde_json::to_vec(payload)?;
    if compress {
        plaintext = gzip(&plaintext)?;
    }
    Ok(encrypt(key, &plaintext)?.to_json()?)
}

/// Decrypt and parse a remote vault document.
///
/// Accepts compressed and uncompressed plaintext, and also a gzip wrapper
/// around the envelope itself as written by older clients.
pub fn open(key: &SessionKey, bytes: &[u8]) -> Result<VaultPayload> {
    let document = if bytes.starts_with(&GZIP_MAGIC) {
        gunzip(bytes)?
    } else {
        bytes.to_vec()
    };

    let envelope = EncryptedEnvelope::from_json(&document)?;
    let mut plaintext = decrypt(key, &envelope)?;
    if plaintext.starts_with(&GZIP_MAGIC) {
        plaintext = gunzip(&plaintext)?;
    }

    let payload: VaultPayload = serde_json::from_slice(&plaintext)?;
    if payload.format_version != PAYLOAD_FORMAT_VERSION {
        return Err(VaultError::Serialization(format!(
            "Unsupported payload version {}",
            payload.format_version
        )));
    }

    let actual = SyncSnapshot::from_entries(&payload.entries).checksum;
    if actual != payload.checksum {
        return Err(VaultError::Serialization(
            "Payload checksum does not match its entries".to_string(),
        ));
    }

    Ok(payload)
}

fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .take(MAX_DECOMPRESSED_BYTES + 1)
        .read_to_end(&mut out)
        .map_err(|e| VaultError::Serialization(format!("Invalid gzip data: {}", e)))?;

    if out.len() as u64 > MAX_DECOMPRESSED_BYTES {
        return Err(VaultError::Serialization(
            "Decompressed payload too large".to_string(),
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryPayload;
    use crate::CryptoError;

    fn entries() -> Vec<VaultEntry> {
        (0..20)
            .map(|i| {
                VaultEntry::new(EntryPayload::Login {
                    title: format!("site {}", i),
                    username: "same-user@example.com".to_string(),
                    password: "correct horse battery staple".to_string(),
                    url: None,
                    notes: None,
                })
            })
            .collect()
    }

    #[test]
    fn test_seal_open_compressed_and_plain() {
        let key = SessionKey::generate().unwrap();
        let payload = VaultPayload::new(entries());

        let plain = seal(&key, &payload, false).unwrap();
        let packed = seal(&key, &payload, true).unwrap();
        assert!(packed.len() < plain.len());

        assert_eq!(open(&key, &plain).unwrap(), payload);
        assert_eq!(open(&key, &packed).unwrap(), payload);
    }

    #[test]
    fn test_no_plaintext_on_the_wire() {
        let key = SessionKey::generate().unwrap();
        let sealed = seal(&key, &VaultPayload::new(entries()), false).unwrap();
        let text = String::from_utf8_lossy(&sealed);
        assert!(!text.contains("same-user@example.com"));
        assert!(text.contains("cipherText"));
    }

    #[test]
    fn test_legacy_outer_gzip_accepted() {
        let key = SessionKey::generate().unwrap();
        let payload = VaultPayload::new(entries());
        let wrapped = gzip(&seal(&key, &payload, false).unwrap()).unwrap();
        assert_eq!(open(&key, &wrapped).unwrap(), payload);
    }

    #[test]
    fn test_wrong_key_is_crypto_error() {
        let key = SessionKey::generate().unwrap();
        let sealed = seal(&key, &VaultPayload::new(entries()), true).unwrap();

        let other = SessionKey::generate().unwrap();
        assert!(matches!(
            open(&other, &sealed),
            Err(VaultError::Crypto(CryptoError::AuthenticationFailed))
        ));
    }

    #[test]
    fn test_checksum_mismatch_rejected() {
        let key = SessionKey::generate().unwrap();
        let mut payload = VaultPayload::new(entries());
        payload.checksum = "0".repeat(64);
        let sealed = seal(&key, &payload, false).unwrap();
        assert!(matches!(open(&key, &sealed), Err(VaultError::Serialization(_))));
    }

    #[test]
    fn test_garbage_rejected() {
        let key = SessionKey::generate().unwrap();
        assert!(open(&key, b"not json").is_err());
        assert!(open(&key, &[0x1f, 0x8b, 0x00]).is_err());
    }
}
