//! Key derivation: scrypt password → master key

use pqvault_core::config::KdfConfig;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::KEY_SIZE;

/// A 256-bit key derived from a password via scrypt.
///
/// Zeroized on drop to prevent secrets lingering in memory.
#[derive(Clone)]
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// scrypt cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// log2 of the CPU/memory cost N (default: 15, N = 32768)
    pub log_n: u8,
    /// Block size (default: 8)
    pub r: u32,
    /// Parallelism (default: 1)
    pub p: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            log_n: 15,
            r: 8,
            p: 1,
        }
    }
}

impl KdfParams {
    pub fn from_config(config: &KdfConfig) -> Self {
        Self {
            log_n: config.scrypt_log_n,
            r: config.scrypt_r,
            p: config.scrypt_p,
        }
    }
}

impl From<&KdfConfig> for KdfParams {
    fn from(config: &KdfConfig) -> Self {
        Self::from_config(config)
    }
}

/// Derive a 256-bit key from a password and salt using scrypt.
///
/// Deterministic for a given (password, salt, params). Invalid parameters are
/// an error; callers treat that as fatal since nothing can be opened.
pub fn derive_key(
    password: &SecretString,
    salt: &[u8],
    params: &KdfParams,
) -> anyhow::Result<MasterKey> {
    let scrypt_params = scrypt::Params::new(params.log_n, params.r, params.p, KEY_SIZE)
        .map_err(|e| anyhow::anyhow!("invalid scrypt params: {e}"))?;

    let mut key = [0u8; KEY_SIZE];
    scrypt::scrypt(
        password.expose_secret().as_bytes(),
        salt,
        &scrypt_params,
        &mut key,
    )
    .map_err(|e| anyhow::anyhow!("scrypt KDF failed: {e}"))?;

    Ok(MasterKey::from_bytes(key))
}

/// Unsalted single-round SHA-256 of the password.
///
/// Only for opening `PQCENC01` archives written by older releases. Never
/// used to protect anything new.
pub fn legacy_password_key(password: &SecretString) -> [u8; KEY_SIZE] {
    let digest = Sha256::digest(password.expose_secret().as_bytes());
    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&digest);
    key
}
