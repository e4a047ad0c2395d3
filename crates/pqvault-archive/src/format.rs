//! On-disk container frame
//!
//! ```text
//! [8 bytes: magic][8 bytes: u64 LE body length][body]
//! ```
//!
//! | magic      | body                                                        |
//! |------------|-------------------------------------------------------------|
//! | `PQCENC02` | `[32 salt][72 wrapped container key][sealed payload]`       |
//! | `PQCENC01` | payload XOR SHA-256(password) (read-only)                   |
//! | none       | the whole file is an unencrypted payload (read-only)        |

use pqvault_core::{ArchiveId, PqvError, PqvResult};
use pqvault_crypto::{NONCE_SIZE, SALT_SIZE, TAG_SIZE, WRAPPED_KEY_SIZE};

pub const MAGIC: &[u8; 8] = b"PQCENC02";
pub const LEGACY_MAGIC: &[u8; 8] = b"PQCENC01";
pub const HEADER_SIZE: usize = 16;

const MIN_ENVELOPED_BODY: usize = SALT_SIZE + WRAPPED_KEY_SIZE + NONCE_SIZE + TAG_SIZE;

/// A parsed container file, borrowing from the raw bytes.
#[derive(Debug)]
pub enum Frame<'a> {
    Enveloped {
        salt: [u8; SALT_SIZE],
        wrapped_key: &'a [u8],
        sealed: &'a [u8],
    },
    LegacyMasked(&'a [u8]),
    LegacyPlain(&'a [u8]),
}

pub fn parse(bytes: &[u8]) -> PqvResult<Frame<'_>> {
    if bytes.len() < HEADER_SIZE {
        return Err(PqvError::Corrupt(format!(
            "archive file is too small ({} bytes)",
            bytes.len()
        )));
    }

    let (magic, rest) = bytes.split_at(8);
    if magic != MAGIC && magic != LEGACY_MAGIC {
        return Ok(Frame::LegacyPlain(bytes));
    }

    let (len_bytes, body) = rest.split_at(8);
    let mut buf = [0u8; 8];
    buf.copy_from_slice(len_bytes);
    let declared = u64::from_le_bytes(buf);
    if declared != body.len() as u64 {
        return Err(PqvError::Corrupt(format!(
            "declared body length {declared} but {} bytes follow the header",
            body.len()
        )));
    }

    if magic == LEGACY_MAGIC {
        if body.is_empty() {
            return Err(PqvError::Corrupt("empty legacy archive body".into()));
        }
        return Ok(Frame::LegacyMasked(body));
    }

    if body.len() < MIN_ENVELOPED_BODY {
        return Err(PqvError::Corrupt(format!(
            "archive body too short ({} bytes)",
            body.len()
        )));
    }
    let (salt_bytes, rest) = body.split_at(SALT_SIZE);
    let (wrapped_key, sealed) = rest.split_at(WRAPPED_KEY_SIZE);
    let mut salt = [0u8; SALT_SIZE];
    salt.copy_from_slice(salt_bytes);

    Ok(Frame::Enveloped {
        salt,
        wrapped_key,
        sealed,
    })
}

/// Serialize a `PQCENC02` file.
pub fn write_enveloped(salt: &[u8; SALT_SIZE], wrapped_key: &[u8], sealed: &[u8]) -> Vec<u8> {
    let body_len = SALT_SIZE + wrapped_key.len() + sealed.len();
    let mut out = Vec::with_capacity(HEADER_SIZE + body_len);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&(body_len as u64).to_le_bytes());
    out.extend_from_slice(salt);
    out.extend_from_slice(wrapped_key);
    out.extend_from_slice(sealed);
    out
}

/// AAD for the sealed payload: the magic plus `<username>_<archive>`.
pub fn payload_aad(id: &ArchiveId) -> Vec<u8> {
    let binding = id.binding();
    let mut aad = Vec::with_capacity(MAGIC.len() + binding.len());
    aad.extend_from_slice(MAGIC);
    aad.extend_from_slice(binding.as_bytes());
    aad
}
