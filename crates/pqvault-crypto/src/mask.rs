//! Repeating-key XOR mask.
//!
//! Not encryption on its own. Used to blind the password with the KEM shared
//! secret before the AEAD pass, and to read `PQCENC01` archives.

/// XOR `data` in place with `key`, repeating the key as needed.
/// Applying the same key twice restores the input. An empty key is a no-op.
pub fn apply(data: &mut [u8], key: &[u8]) {
    if key.is_empty() {
        return;
    }
    for (byte, k) in data.iter_mut().zip(key.iter().cycle()) {
        *byte ^= k;
    }
}

/// Like [`apply`] but returns a new buffer.
pub fn masked(data: &[u8], key: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    apply(&mut out, key);
    out
}
