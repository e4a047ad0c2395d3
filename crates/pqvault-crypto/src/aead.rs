//! AES-256-GCM with detached tags, as stored in credential records.

use aes_gcm::{
    aead::{AeadInPlace, KeyInit},
    Aes256Gcm, Nonce, Tag,
};

use crate::{GCM_NONCE_SIZE, KEY_SIZE, TAG_SIZE};

/// Encrypt `plaintext`, returning the ciphertext (same length) and its tag.
pub fn seal_detached(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; GCM_NONCE_SIZE],
    aad: &[u8],
    plaintext: &[u8],
) -> anyhow::Result<(Vec<u8>, [u8; TAG_SIZE])> {
    let cipher = Aes256Gcm::new(key.into());
    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(nonce), aad, &mut buffer)
        .map_err(|e| anyhow::anyhow!("AES-GCM encryption failed: {e}"))?;

    let mut tag_bytes = [0u8; TAG_SIZE];
    tag_bytes.copy_from_slice(&tag);
    Ok((buffer, tag_bytes))
}

/// Decrypt and authenticate. Fails closed on any tag mismatch.
pub fn open_detached(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; GCM_NONCE_SIZE],
    aad: &[u8],
    ciphertext: &[u8],
    tag: &[u8; TAG_SIZE],
) -> anyhow::Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.into());
    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(Nonce::from_slice(nonce), aad, &mut buffer, Tag::from_slice(tag))
        .map_err(|_| anyhow::anyhow!("AES-GCM authentication failed"))?;
    Ok(buffer)
}
