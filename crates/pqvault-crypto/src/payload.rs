//! XChaCha20-Poly1305 sealing of a serialized archive payload
//!
//! Sealed format (binary):
//! ```text
//! [24 bytes: random nonce][N bytes: ciphertext][16 bytes: Poly1305 tag]
//! ```
//!
//! The caller supplies AAD binding the payload to its container (format magic
//! plus `<username>_<archive>`), so a sealed payload cannot be moved into
//! another user's file and still open.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};

use crate::keys::ContainerKey;
use crate::{random_bytes, NONCE_SIZE, TAG_SIZE};

/// Encrypt a payload under the container key.
///
/// Returns: `[24-byte nonce][ciphertext][16-byte tag]`
pub fn seal(key: &ContainerKey, aad: &[u8], plaintext: &[u8]) -> anyhow::Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    let nonce_bytes: [u8; NONCE_SIZE] = random_bytes();
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| anyhow::anyhow!("payload encryption failed: {e}"))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt a payload produced by [`seal`].
pub fn open(key: &ContainerKey, aad: &[u8], sealed: &[u8]) -> anyhow::Result<Vec<u8>> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        anyhow::bail!(
            "sealed payload too short: {} bytes (minimum {})",
            sealed.len(),
            NONCE_SIZE + TAG_SIZE
        );
    }

    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
    let nonce = XNonce::from_slice(nonce_bytes);
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| anyhow::anyhow!("payload decryption failed: wrong key, wrong container, or corrupted data"))
}
