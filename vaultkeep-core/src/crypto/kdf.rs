//! Argon2id key derivation for master password processing.
//!
//! Default parameters:
//! - Memory cost: 64 MiB (65,536 KiB)
//! - Time cost: 3 iterations
//! - Parallelism: 4 lanes
//! - Output length: 32 bytes (256 bits)
//! - Salt length: 32 bytes

use crate::crypto::cipher::SessionKey;
use crate::crypto::{CryptoError, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

/// Salt length in bytes
pub const SALT_LEN: usize = 32;

/// Nonce length in bytes (AES-GCM 96-bit nonce)
pub const NONCE_LEN: usize = 12;

/// Derived key length in bytes
pub const KEY_LEN: usize = 32;

/// Identifier persisted with the parameters
pub const KDF_ALGORITHM: &str = "argon2id";

/// Version of the key material format
pub const KDF_FORMAT_VERSION: u32 = 1;

const MIN_MEM_COST: u32 = 8 * 1024;

const VERIFY_LABEL: &[u8] = b"vaultkeep/verify/v1";

/// Parameters for Argon2id key derivation.
///
/// Persisted next to the salt so that a vault created with older parameters
/// keeps unlocking after the defaults are raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Algorithm identifier, always `argon2id` for format version 1
    pub algorithm: String,

    /// Key material format version
    pub version: u32,

    /// Memory cost in KiB
    pub mem_cost: u32,

    /// Time cost (number of iterations)
    pub time_cost: u32,

    /// Parallelism (number of lanes)
    pub parallelism: u32,

    /// Output length in bytes
    pub output_length: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            algorithm: KDF_ALGORITHM.to_string(),
            version: KDF_FORMAT_VERSION,
            mem_cost: 65_536, // 64 MiB
            time_cost: 3,
            parallelism: 4,
            output_length: KEY_LEN as u32,
        }
    }
}

impl KdfParams {
    /// Verify that parameters are within acceptable ranges
    pub fn validate(&self) -> Result<()> {
        if self.algorithm != KDF_ALGORITHM {
            return Err(CryptoError::KdfFailed(format!(
                "Unsupported algorithm: {}",
                self.algorithm
            )));
        }
        if self.version != KDF_FORMAT_VERSION {
            return Err(CryptoError::KdfFailed(format!(
                "Unsupported key material version: {}",
                self.version
            )));
        }
        if self.mem_cost < MIN_MEM_COST {
            return Err(CryptoError::KdfFailed(
                "Memory cost too low (minimum: 8 MiB)".to_string(),
            ));
        }
        if self.time_cost < 1 {
            return Err(CryptoError::KdfFailed(
                "Time cost too low (minimum: 1)".to_string(),
            ));
        }
        if self.parallelism < 1 {
            return Err(CryptoError::KdfFailed(
                "Parallelism too low (minimum: 1)".to_string(),
            ));
        }
        if self.output_length as usize != KEY_LEN {
            return Err(CryptoError::KdfFailed(format!(
                "Output length must be {} bytes",
                KEY_LEN
            )));
        }
        Ok(())
    }

    /// Cheapest parameters that still pass validation. Only for tests.
    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self {
            mem_cost: MIN_MEM_COST,
            time_cost: 1,
            parallelism: 1,
            ..Self::default()
        }
    }
}

/// Key material derived from a master password.
///
/// Only `salt`, `verification_hash` and `params` are ever persisted. The key
/// is zeroized when this value is dropped.
pub struct MasterKeyMaterial {
    key: SessionKey,
    pub salt: [u8; SALT_LEN],
    pub verification_hash: [u8; 32],
    pub params: KdfParams,
}

impl MasterKeyMaterial {
    /// The derived symmetric key
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Consume the material, keeping only the key
    pub fn into_key(self) -> SessionKey {
        self.key
    }

    /// Algorithm identifier of the derivation
    pub fn algorithm_id(&self) -> &str {
        &self.params.algorithm
    }

    /// Format version of the derivation
    pub fn format_version(&self) -> u32 {
        self.params.version
    }
}

impl std::fmt::Debug for MasterKeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKeyMaterial")
            .field("salt", &hex::encode(self.salt))
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Derive the master key and its verification hash from a password.
///
/// Both outputs are a pure function of `(password, salt, params)`. The
/// verification hash is an HMAC-SHA256 keyed with the Argon2id output, so
/// checking a candidate password always costs a full derivation.
pub fn derive_key_material(
    password: &[u8],
    salt: &[u8; SALT_LEN],
    params: &KdfParams,
) -> Result<MasterKeyMaterial> {
    params.validate()?;

    let params_obj = Params::new(
        params.mem_cost,
        params.time_cost,
        params.parallelism,
        Some(params.output_length as usize),
    )
    .map_err(|e| CryptoError::KdfFailed(format!("Invalid parameters: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params_obj);

    let mut output = [0u8; KEY_LEN];
    argon2
        .hash_password_into(password, salt, &mut output)
        .map_err(|e| CryptoError::KdfFailed(format!("Hashing failed: {}", e)))?;

    let key = SessionKey::from_bytes(output);
    output.zeroize();

    let verification_hash = verification_digest(&key, salt)?;

    Ok(MasterKeyMaterial {
        key,
        salt: *salt,
        verification_hash,
        params: params.clone(),
    })
}

fn verification_digest(key: &SessionKey, salt: &[u8; SALT_LEN]) -> Result<[u8; 32]> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::KdfFailed(format!("HMAC init failed: {}", e)))?;
    mac.update(VERIFY_LABEL);
    mac.update(salt);

    let mut digest = [0u8; 32];
    digest.copy_from_slice(&mac.finalize().into_bytes());
    Ok(digest)
}

/// Compare two verification hashes in constant time
pub fn verify_hash(candidate: &[u8], expected: &[u8]) -> bool {
    candidate.ct_eq(expected).into()
}

/// Generate a fresh 32-byte salt from the OS CSPRNG
pub fn generate_salt() -> Result<[u8; SALT_LEN]> {
    let mut salt = [0u8; SALT_LEN];
    OsRng
        .try_fill_bytes(&mut salt)
        .map_err(|e| CryptoError::RandomFailed(e.to_string()))?;
    Ok(salt)
}

/// Generate a fresh 12-byte nonce from the OS CSPRNG
pub fn generate_nonce() -> Result<[u8; NONCE_LEN]> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng
        .try_fill_bytes(&mut nonce)
        .map_err(|e| CryptoError::RandomFailed(e.to_string()))?;
    Ok(nonce)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXED_SALT: [u8; SALT_LEN] = [
        0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e,
        0x0f, 0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1a, 0x1b, 0x1c, 0x1d,
        0x1e, 0x1f,
    ];

    #[test]
    fn test_kdf_params_default() {
        let params = KdfParams::default();
        assert_eq!(params.algorithm, "argon2id");
        assert_eq!(params.mem_cost, 65_536);
        assert_eq!(params.time_cost, 3);
        assert_eq!(params.parallelism, 4);
        assert_eq!(params.output_length, 32);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_kdf_params_validation() {
        let mut params = KdfParams::default();

        params.mem_cost = 1000;
        assert!(params.validate().is_err());

        params.mem_cost = 65_536;
        params.time_cost = 0;
        assert!(params.validate().is_err());

        params.time_cost = 3;
        params.parallelism = 0;
        assert!(params.validate().is_err());

        params.parallelism = 4;
        params.output_length = 16;
        assert!(params.validate().is_err());

        params.output_length = 32;
        params.algorithm = "scrypt".to_string();
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let params = KdfParams::for_tests();

        let first = derive_key_material(b"test_password_123!", &FIXED_SALT, &params).unwrap();
        let second = derive_key_material(b"test_password_123!", &FIXED_SALT, &params).unwrap();

        assert_eq!(first.key().as_bytes(), second.key().as_bytes());
        assert_eq!(first.verification_hash, second.verification_hash);
    }

    #[test]
    fn test_different_salts_give_different_keys() {
        let params = KdfParams::for_tests();
        let salt_a = generate_salt().unwrap();
        let salt_b = generate_salt().unwrap();
        assert_ne!(salt_a, salt_b);

        let a = derive_key_material(b"same password", &salt_a, &params).unwrap();
        let b = derive_key_material(b"same password", &salt_b, &params).unwrap();

        assert_ne!(a.key().as_bytes(), b.key().as_bytes());
        assert_ne!(a.verification_hash, b.verification_hash);
    }

    #[test]
    fn test_different_passwords_give_different_hashes() {
        let params = KdfParams::for_tests();
        let a = derive_key_material(b"correct horse", &FIXED_SALT, &params).unwrap();
        let b = derive_key_material(b"battery staple", &FIXED_SALT, &params).unwrap();

        assert!(!verify_hash(&a.verification_hash, &b.verification_hash));
        assert!(verify_hash(&a.verification_hash, &a.verification_hash));
    }

    #[test]
    fn test_default_parameters_concrete_scenario() {
        let material =
            derive_key_material(b"Tr0ub4dor&3", &FIXED_SALT, &KdfParams::default()).unwrap();

        assert_eq!(material.key().as_bytes().len(), 32);
        assert_eq!(material.algorithm_id(), "argon2id");
        assert_eq!(material.format_version(), 1);

        let envelope = crate::crypto::encrypt(material.key(), b"hunter2").unwrap();
        let plaintext = crate::crypto::decrypt(material.key(), &envelope).unwrap();
        assert_eq!(plaintext, b"hunter2");

        let mut tampered = envelope.clone();
        tampered.ciphertext[0] ^= 0x01;
        assert_eq!(
            crate::crypto::decrypt(material.key(), &tampered),
            Err(CryptoError::AuthenticationFailed)
        );
    }

    #[test]
    fn test_nonces_are_fresh() {
        let a = generate_nonce().unwrap();
        let b = generate_nonce().unwrap();
        assert_eq!(a.len(), 12);
        assert_ne!(a, b);
    }

    #[test]
    fn test_debug_does_not_leak_key() {
        let material =
            derive_key_material(b"pw", &FIXED_SALT, &KdfParams::for_tests()).unwrap();
        let rendered = format!("{:?}", material);
        assert!(!rendered.contains(&hex::encode(material.key().as_bytes())));
    }
}
