//! Kyber-768 key encapsulation

use pqcrypto_kyber::kyber768;
use pqcrypto_traits::kem::{Ciphertext as _, PublicKey as _, SecretKey as _, SharedSecret as _};
use zeroize::Zeroize;

use crate::KEY_SIZE;

pub const PUBLIC_KEY_SIZE: usize = 1184;
pub const SECRET_KEY_SIZE: usize = 2400;
pub const CIPHERTEXT_SIZE: usize = 1088;

/// A Kyber-768 secret key. Zeroized on drop.
pub struct KemSecretKey {
    bytes: Vec<u8>,
}

impl KemSecretKey {
    pub fn from_bytes(bytes: Vec<u8>) -> anyhow::Result<Self> {
        if bytes.len() != SECRET_KEY_SIZE {
            let len = bytes.len();
            let mut bytes = bytes;
            bytes.zeroize();
            anyhow::bail!("KEM secret key has wrong size: {len} bytes (expected {SECRET_KEY_SIZE})");
        }
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Drop for KemSecretKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for KemSecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KemSecretKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// The 32-byte secret agreed by encapsulate/decapsulate. Zeroized on drop.
pub struct SharedSecret {
    bytes: [u8; KEY_SIZE],
}

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for SharedSecret {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSecret")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug)]
pub struct KemKeypair {
    pub public: Vec<u8>,
    pub secret: KemSecretKey,
}

/// Generate a fresh Kyber-768 keypair.
pub fn keypair() -> KemKeypair {
    let (pk, sk) = kyber768::keypair();
    KemKeypair {
        public: pk.as_bytes().to_vec(),
        secret: KemSecretKey {
            bytes: sk.as_bytes().to_vec(),
        },
    }
}

/// Encapsulate against `public_key`, returning `(ciphertext, shared_secret)`.
pub fn encapsulate(public_key: &[u8]) -> anyhow::Result<(Vec<u8>, SharedSecret)> {
    let pk = kyber768::PublicKey::from_bytes(public_key)
        .map_err(|e| anyhow::anyhow!("invalid KEM public key: {e:?}"))?;
    let (ss, ct) = kyber768::encapsulate(&pk);
    Ok((ct.as_bytes().to_vec(), shared_secret_from(ss.as_bytes())?))
}

/// Recover the shared secret for `ciphertext` with `secret_key`.
///
/// Kyber decapsulation never fails on a well-formed ciphertext: a mismatched
/// key yields an unrelated secret, which the caller detects downstream.
pub fn decapsulate(ciphertext: &[u8], secret_key: &KemSecretKey) -> anyhow::Result<SharedSecret> {
    let sk = kyber768::SecretKey::from_bytes(secret_key.as_bytes())
        .map_err(|e| anyhow::anyhow!("invalid KEM secret key: {e:?}"))?;
    let ct = kyber768::Ciphertext::from_bytes(ciphertext)
        .map_err(|e| anyhow::anyhow!("invalid KEM ciphertext: {e:?}"))?;
    let ss = kyber768::decapsulate(&ct, &sk);
    shared_secret_from(ss.as_bytes())
}

fn shared_secret_from(raw: &[u8]) -> anyhow::Result<SharedSecret> {
    if raw.len() != KEY_SIZE {
        anyhow::bail!("KEM shared secret has wrong size: {} bytes", raw.len());
    }
    let mut bytes = [0u8; KEY_SIZE];
    bytes.copy_from_slice(raw);
    Ok(SharedSecret { bytes })
}
