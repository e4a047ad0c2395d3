//! Key hierarchy: record subkeys, container key generation, key wrapping

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::kdf::MasterKey;
use crate::{random_bytes, KEY_SIZE, NONCE_SIZE, TAG_SIZE, WRAPPED_KEY_SIZE};

/// A per-archive 256-bit content key. Zeroized on drop.
#[derive(Clone)]
pub struct ContainerKey {
    bytes: [u8; KEY_SIZE],
}

impl ContainerKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for ContainerKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for ContainerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Subkeys for the two AEAD passes of a credential record.
pub struct RecordKeys {
    pub secret_key_key: [u8; KEY_SIZE],
    pub password_key: [u8; KEY_SIZE],
}

impl RecordKeys {
    /// Both passes keyed directly by `master`. Only for reading records
    /// written before per-field subkeys existed.
    pub fn unbound(master: &MasterKey) -> Self {
        Self {
            secret_key_key: *master.as_bytes(),
            password_key: *master.as_bytes(),
        }
    }
}

impl Drop for RecordKeys {
    fn drop(&mut self) {
        self.secret_key_key.zeroize();
        self.password_key.zeroize();
    }
}

/// Generate a random 256-bit container key.
pub fn generate_container_key() -> ContainerKey {
    ContainerKey::from_bytes(random_bytes())
}

/// Split the master key into independent subkeys for the two record fields.
///
/// Both fields are sealed under the record's single stored IV, so each needs
/// its own key.
pub fn derive_record_keys(master: &MasterKey) -> anyhow::Result<RecordKeys> {
    Ok(RecordKeys {
        secret_key_key: hkdf_derive(master.as_bytes(), b"pqvault-record-secret-key")?,
        password_key: hkdf_derive(master.as_bytes(), b"pqvault-record-password")?,
    })
}

/// HKDF-SHA256 key derivation with a domain-specific info string.
fn hkdf_derive(ikm: &[u8; KEY_SIZE], info: &[u8]) -> anyhow::Result<[u8; KEY_SIZE]> {
    let hkdf = Hkdf::<Sha256>::new(None, ikm);
    let mut okm = [0u8; KEY_SIZE];
    hkdf.expand(info, &mut okm)
        .map_err(|e| anyhow::anyhow!("HKDF expand failed: {e}"))?;
    Ok(okm)
}

/// Wrap (encrypt) a container key under a password-derived key.
///
/// Uses XChaCha20-Poly1305 with a random nonce.
/// Output: `[24-byte nonce][ciphertext + 16-byte tag]`
pub fn wrap_key(master: &MasterKey, container_key: &ContainerKey) -> anyhow::Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(master.as_bytes().into());

    let nonce_bytes: [u8; NONCE_SIZE] = random_bytes();
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, container_key.as_bytes().as_ref())
        .map_err(|e| anyhow::anyhow!("key wrapping failed: {e}"))?;

    let mut result = Vec::with_capacity(WRAPPED_KEY_SIZE);
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Unwrap (decrypt) a container key.
///
/// Input: `[24-byte nonce][ciphertext + 16-byte tag]` (output of `wrap_key`)
pub fn unwrap_key(master: &MasterKey, wrapped: &[u8]) -> anyhow::Result<ContainerKey> {
    if wrapped.len() != NONCE_SIZE + KEY_SIZE + TAG_SIZE {
        anyhow::bail!(
            "wrapped key has wrong size: {} bytes (expected {})",
            wrapped.len(),
            WRAPPED_KEY_SIZE
        );
    }

    let (nonce_bytes, ciphertext) = wrapped.split_at(NONCE_SIZE);
    let nonce = XNonce::from_slice(nonce_bytes);
    let cipher = XChaCha20Poly1305::new(master.as_bytes().into());

    let mut plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| anyhow::anyhow!("key unwrapping failed: wrong password or corrupted data"))?;

    let mut key_bytes = [0u8; KEY_SIZE];
    key_bytes.copy_from_slice(&plaintext);
    plaintext.zeroize();

    Ok(ContainerKey::from_bytes(key_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_master_key() -> MasterKey {
        MasterKey::from_bytes([42u8; KEY_SIZE])
    }

    #[test]
    fn test_container_key_generation() {
        let k1 = generate_container_key();
        let k2 = generate_container_key();
        assert_ne!(k1.as_bytes(), k2.as_bytes(), "random keys must differ");
    }

    #[test]
    fn test_key_wrap_unwrap_roundtrip() {
        let master = test_master_key();
        let key = generate_container_key();

        let wrapped = wrap_key(&master, &key).unwrap();
        let unwrapped = unwrap_key(&master, &wrapped).unwrap();

        assert_eq!(key.as_bytes(), unwrapped.as_bytes());
    }

    #[test]
    fn test_key_unwrap_wrong_master() {
        let key = generate_container_key();
        let wrapped = wrap_key(&MasterKey::from_bytes([1u8; KEY_SIZE]), &key).unwrap();

        let result = unwrap_key(&MasterKey::from_bytes([2u8; KEY_SIZE]), &wrapped);
        assert!(result.is_err(), "unwrap with wrong master key must fail");
    }

    #[test]
    fn test_wrapped_key_size() {
        let wrapped = wrap_key(&test_master_key(), &generate_container_key()).unwrap();
        // nonce (24) + key (32) + tag (16) = 72
        assert_eq!(wrapped.len(), WRAPPED_KEY_SIZE);
    }

    #[test]
    fn test_unwrap_rejects_truncated() {
        let wrapped = wrap_key(&test_master_key(), &generate_container_key()).unwrap();
        assert!(unwrap_key(&test_master_key(), &wrapped[..WRAPPED_KEY_SIZE - 1]).is_err());
    }

    #[test]
    fn test_record_subkeys_distinct() {
        let keys = derive_record_keys(&test_master_key()).unwrap();
        assert_ne!(keys.secret_key_key, keys.password_key);
        assert_ne!(&keys.password_key, test_master_key().as_bytes());
    }

    #[test]
    fn test_unbound_record_keys_are_master() {
        let keys = RecordKeys::unbound(&test_master_key());
        assert_eq!(&keys.secret_key_key, test_master_key().as_bytes());
        assert_eq!(&keys.password_key, test_master_key().as_bytes());
    }
}
