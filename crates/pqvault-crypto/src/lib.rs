//! pqvault-crypto: primitives behind the credential vault and archive containers
//!
//! Credential record (per user):
//! ```text
//! password ──scrypt(salt)──► master key
//!   ├── HKDF "pqvault-record-secret-key" ─► AES-256-GCM(Kyber-768 secret key)      tag A
//!   └── HKDF "pqvault-record-password"   ─► AES-256-GCM(password XOR shared secret) tag B
//! shared secret = Kyber-768 encapsulate(public key)
//! ```
//!
//! Archive container (per user + archive name):
//! ```text
//! password ──scrypt(salt)──► wrapping key ──XChaCha20-Poly1305──► container key (random, 256-bit)
//! container key ──XChaCha20-Poly1305(AAD = magic || binding)──► serialized payload
//! ```
//! Rotating a password only re-wraps the container key.

pub mod aead;
pub mod kdf;
pub mod kem;
pub mod keys;
pub mod mask;
pub mod payload;

pub use aead::{open_detached, seal_detached};
pub use kdf::{derive_key, legacy_password_key, KdfParams, MasterKey};
pub use kem::{decapsulate, encapsulate, keypair, KemKeypair, KemSecretKey, SharedSecret};
pub use keys::{
    derive_record_keys, generate_container_key, unwrap_key, wrap_key, ContainerKey, RecordKeys,
};
pub use payload::{open, seal};

/// Size of a symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 or GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of an AES-GCM nonce (96-bit)
pub const GCM_NONCE_SIZE: usize = 12;

/// Size of a scrypt salt
pub const SALT_SIZE: usize = 32;

/// Length of a wrapped container key: nonce + key + tag
pub const WRAPPED_KEY_SIZE: usize = NONCE_SIZE + KEY_SIZE + TAG_SIZE;

/// Fill a fixed-size buffer from the OS-seeded thread RNG.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    use rand::RngCore;
    let mut out = [0u8; N];
    rand::thread_rng().fill_bytes(&mut out);
    out
}
