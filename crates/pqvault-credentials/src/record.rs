//! Credential record codec
//!
//! Sealed records open with the format id as a little-endian `u32`, then
//! seven fields, each a `u64` LE length followed by its bytes:
//!
//! ```text
//! [u32 = 3 or 2]
//! salt | iv | kem_ciphertext | kem_public_key | encrypted_secret_key |
//! encrypted_password | auth_tag (password tag ‖ secret-key tag)
//! ```
//!
//! Id 3 records seal both fields under HKDF subkeys of the scrypt output
//! with the username as associated data. Id 2 records share the layout but
//! seal both fields under the scrypt output itself with no associated data;
//! they are verified and upgraded, never written.
//!
//! Legacy records carry no format id: four length-prefixed fields
//! `kem_ciphertext | kem_public_key | kem_secret_key | masked_password`,
//! with the KEM secret key in the clear. The first legacy field is a
//! Kyber-768 ciphertext, so its length prefix can never read as a format id.
//! Legacy records are parsed but never produced.

use pqvault_core::{PqvError, PqvResult};
use pqvault_crypto::kem::{CIPHERTEXT_SIZE, PUBLIC_KEY_SIZE, SECRET_KEY_SIZE};
use pqvault_crypto::{KemSecretKey, GCM_NONCE_SIZE, SALT_SIZE, TAG_SIZE};

pub const CURRENT_VERSION: u32 = 3;

/// Format id of sealed records keyed directly by the scrypt output.
pub const UNBOUND_VERSION: u32 = 2;

/// Upper bound on any single field, checked before slicing.
pub const MAX_FIELD_LEN: u64 = 64 * 1024;

/// A parsed `<username>.enc` file.
#[derive(Debug)]
pub enum CredentialRecord {
    Current(SealedRecord),
    Unbound(SealedRecord),
    Legacy(LegacyRecord),
}

impl CredentialRecord {
    pub fn decode(bytes: &[u8]) -> PqvResult<Self> {
        match bytes.get(..4) {
            Some(prefix) if prefix == CURRENT_VERSION.to_le_bytes() => {
                SealedRecord::decode(&bytes[4..]).map(Self::Current)
            }
            Some(prefix) if prefix == UNBOUND_VERSION.to_le_bytes() => {
                SealedRecord::decode(&bytes[4..]).map(Self::Unbound)
            }
            _ => LegacyRecord::decode(bytes).map(Self::Legacy),
        }
    }

    pub fn is_current(&self) -> bool {
        matches!(self, Self::Current(_))
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, Self::Legacy(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Current(_) => "v3",
            Self::Unbound(_) => "v2 (upgrade available)",
            Self::Legacy(_) => "v1 (legacy)",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedRecord {
    pub salt: [u8; SALT_SIZE],
    pub iv: [u8; GCM_NONCE_SIZE],
    pub kem_ciphertext: Vec<u8>,
    pub kem_public_key: Vec<u8>,
    pub encrypted_secret_key: Vec<u8>,
    pub encrypted_password: Vec<u8>,
    pub password_tag: [u8; TAG_SIZE],
    pub secret_key_tag: [u8; TAG_SIZE],
}

impl SealedRecord {
    pub fn encode(&self) -> Vec<u8> {
        self.encode_as(CURRENT_VERSION)
    }

    #[cfg(test)]
    pub(crate) fn encode_unbound(&self) -> Vec<u8> {
        self.encode_as(UNBOUND_VERSION)
    }

    fn encode_as(&self, version: u32) -> Vec<u8> {
        let mut auth_tag = [0u8; 2 * TAG_SIZE];
        auth_tag[..TAG_SIZE].copy_from_slice(&self.password_tag);
        auth_tag[TAG_SIZE..].copy_from_slice(&self.secret_key_tag);

        let fields: [&[u8]; 7] = [
            &self.salt,
            &self.iv,
            &self.kem_ciphertext,
            &self.kem_public_key,
            &self.encrypted_secret_key,
            &self.encrypted_password,
            &auth_tag,
        ];
        let mut out = Vec::with_capacity(4 + fields.iter().map(|f| 8 + f.len()).sum::<usize>());
        out.extend_from_slice(&version.to_le_bytes());
        for field in fields {
            put_field(&mut out, field);
        }
        out
    }

    fn decode(body: &[u8]) -> PqvResult<Self> {
        let mut reader = FieldReader::new(body);

        let salt = reader.array::<SALT_SIZE>("salt")?;
        let iv = reader.array::<GCM_NONCE_SIZE>("iv")?;
        let kem_ciphertext = reader.exact("kem ciphertext", CIPHERTEXT_SIZE)?.to_vec();
        let kem_public_key = reader.exact("kem public key", PUBLIC_KEY_SIZE)?.to_vec();
        let encrypted_secret_key = reader.exact("encrypted secret key", SECRET_KEY_SIZE)?.to_vec();
        let encrypted_password = reader.field("encrypted password")?.to_vec();
        let auth_tag = reader.array::<{ 2 * TAG_SIZE }>("auth tag")?;
        reader.finish()?;

        let mut password_tag = [0u8; TAG_SIZE];
        let mut secret_key_tag = [0u8; TAG_SIZE];
        password_tag.copy_from_slice(&auth_tag[..TAG_SIZE]);
        secret_key_tag.copy_from_slice(&auth_tag[TAG_SIZE..]);

        Ok(Self {
            salt,
            iv,
            kem_ciphertext,
            kem_public_key,
            encrypted_secret_key,
            encrypted_password,
            password_tag,
            secret_key_tag,
        })
    }
}

/// Read-only v1 record. The secret key is zeroized on drop.
#[derive(Debug)]
pub struct LegacyRecord {
    pub kem_ciphertext: Vec<u8>,
    pub kem_public_key: Vec<u8>,
    pub kem_secret_key: KemSecretKey,
    pub masked_password: Vec<u8>,
}

impl LegacyRecord {
    fn decode(bytes: &[u8]) -> PqvResult<Self> {
        let mut reader = FieldReader::new(bytes);

        let kem_ciphertext = reader.exact("legacy kem ciphertext", CIPHERTEXT_SIZE)?.to_vec();
        let kem_public_key = reader.exact("legacy kem public key", PUBLIC_KEY_SIZE)?.to_vec();
        let secret = reader.exact("legacy kem secret key", SECRET_KEY_SIZE)?.to_vec();
        let masked_password = reader.field("legacy masked password")?.to_vec();
        reader.finish()?;

        let kem_secret_key =
            KemSecretKey::from_bytes(secret).map_err(|e| PqvError::Corrupt(e.to_string()))?;
        Ok(Self {
            kem_ciphertext,
            kem_public_key,
            kem_secret_key,
            masked_password,
        })
    }

    #[cfg(test)]
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        put_field(&mut out, &self.kem_ciphertext);
        put_field(&mut out, &self.kem_public_key);
        put_field(&mut out, self.kem_secret_key.as_bytes());
        put_field(&mut out, &self.masked_password);
        out
    }
}

fn put_field(out: &mut Vec<u8>, field: &[u8]) {
    out.extend_from_slice(&(field.len() as u64).to_le_bytes());
    out.extend_from_slice(field);
}

struct FieldReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> FieldReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take(&mut self, name: &str, len: usize) -> PqvResult<&'a [u8]> {
        let bytes = self.bytes;
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= bytes.len())
            .ok_or_else(|| PqvError::Corrupt(format!("credential record truncated in {name}")))?;
        let out = &bytes[self.offset..end];
        self.offset = end;
        Ok(out)
    }

    fn field(&mut self, name: &str) -> PqvResult<&'a [u8]> {
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(self.take(name, 8)?);
        let len = u64::from_le_bytes(len_bytes);
        if len > MAX_FIELD_LEN {
            return Err(PqvError::Corrupt(format!(
                "{name} length {len} exceeds {MAX_FIELD_LEN}"
            )));
        }
        self.take(name, len as usize)
    }

    fn exact(&mut self, name: &str, expected: usize) -> PqvResult<&'a [u8]> {
        let field = self.field(name)?;
        if field.len() != expected {
            return Err(PqvError::Corrupt(format!(
                "{name} is {} bytes (expected {expected})",
                field.len()
            )));
        }
        Ok(field)
    }

    fn array<const N: usize>(&mut self, name: &str) -> PqvResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.exact(name, N)?);
        Ok(out)
    }

    fn finish(self) -> PqvResult<()> {
        let remaining = self.bytes.len() - self.offset;
        if remaining != 0 {
            return Err(PqvError::Corrupt(format!(
                "{remaining} trailing bytes after credential record"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> SealedRecord {
        SealedRecord {
            salt: [1; SALT_SIZE],
            iv: [2; GCM_NONCE_SIZE],
            kem_ciphertext: vec![3; CIPHERTEXT_SIZE],
            kem_public_key: vec![4; PUBLIC_KEY_SIZE],
            encrypted_secret_key: vec![5; SECRET_KEY_SIZE],
            encrypted_password: vec![6; 7],
            password_tag: [7; TAG_SIZE],
            secret_key_tag: [8; TAG_SIZE],
        }
    }

    fn sample_legacy() -> LegacyRecord {
        LegacyRecord {
            kem_ciphertext: vec![9; CIPHERTEXT_SIZE],
            kem_public_key: vec![10; PUBLIC_KEY_SIZE],
            kem_secret_key: KemSecretKey::from_bytes(vec![11; SECRET_KEY_SIZE]).unwrap(),
            masked_password: vec![12; 5],
        }
    }

    #[test]
    fn test_current_layout() {
        let bytes = sample().encode();
        assert_eq!(&bytes[..4], &[3u8, 0, 0, 0]);
        // salt field: u64 length then 32 bytes
        assert_eq!(&bytes[4..12], &32u64.to_le_bytes());

        // auth tag is the password tag followed by the secret key tag
        let tail = &bytes[bytes.len() - 2 * TAG_SIZE..];
        assert_eq!(&tail[..TAG_SIZE], &[7u8; TAG_SIZE]);
        assert_eq!(&tail[TAG_SIZE..], &[8u8; TAG_SIZE]);

        match CredentialRecord::decode(&bytes).unwrap() {
            CredentialRecord::Current(record) => assert_eq!(record, sample()),
            other => panic!("expected current record, got {}", other.kind()),
        }
    }

    #[test]
    fn test_unbound_is_detected() {
        let bytes = sample().encode_unbound();
        assert_eq!(&bytes[..4], &[2u8, 0, 0, 0]);
        assert_eq!(&bytes[4..], &sample().encode()[4..]);

        let record = CredentialRecord::decode(&bytes).unwrap();
        assert!(!record.is_current());
        assert!(!record.is_legacy());
        match record {
            CredentialRecord::Unbound(record) => assert_eq!(record, sample()),
            other => panic!("expected unbound record, got {}", other.kind()),
        }
    }

    #[test]
    fn test_legacy_is_detected() {
        let bytes = sample_legacy().encode();
        assert_ne!(&bytes[..4], &CURRENT_VERSION.to_le_bytes());
        assert_ne!(&bytes[..4], &UNBOUND_VERSION.to_le_bytes());

        let record = CredentialRecord::decode(&bytes).unwrap();
        assert!(record.is_legacy());
        match record {
            CredentialRecord::Legacy(legacy) => {
                assert_eq!(legacy.masked_password, vec![12u8; 5]);
                assert_eq!(legacy.kem_secret_key.as_bytes(), &[11u8; SECRET_KEY_SIZE][..]);
            }
            other => panic!("expected legacy record, got {}", other.kind()),
        }
    }

    #[test]
    fn test_corrupt_current_does_not_fall_back() {
        let mut bytes = sample().encode();
        bytes.truncate(bytes.len() - 1);
        assert!(matches!(
            CredentialRecord::decode(&bytes),
            Err(PqvError::Corrupt(_))
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = sample().encode();
        bytes.push(0);
        assert!(CredentialRecord::decode(&bytes).is_err());

        let mut legacy = sample_legacy().encode();
        legacy.extend_from_slice(&[0; 9]);
        assert!(CredentialRecord::decode(&legacy).is_err());
    }

    #[test]
    fn test_oversized_field_rejected() {
        let mut bytes = CURRENT_VERSION.to_le_bytes().to_vec();
        bytes.extend_from_slice(&u64::MAX.to_le_bytes());
        let err = CredentialRecord::decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn test_wrong_field_size_rejected() {
        let mut record = sample();
        record.kem_public_key.pop();
        assert!(CredentialRecord::decode(&record.encode()).is_err());
    }

    #[test]
    fn test_empty_and_short_input() {
        assert!(CredentialRecord::decode(&[]).is_err());
        assert!(CredentialRecord::decode(&[2, 0, 0]).is_err());
        assert!(CredentialRecord::decode(&[2, 0, 0, 0]).is_err());
        assert!(CredentialRecord::decode(&[3, 0, 0, 0]).is_err());
    }

    proptest! {
        #[test]
        fn prop_decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = CredentialRecord::decode(&bytes);
        }
    }
}
