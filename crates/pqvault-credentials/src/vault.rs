//! Per-user credential vault
//!
//! A record proves knowledge of a password without storing it. The password
//! is masked with a Kyber-768 shared secret and sealed under a scrypt-derived
//! key; the Kyber secret key needed to recover that shared secret is sealed
//! under the same password. Both AEAD passes share the record IV, so each
//! uses its own HKDF subkey of the scrypt output.
//!
//! The username is bound as associated data, so a record copied to another
//! user's file name no longer verifies. Records from older releases (v2
//! unbound, v1 legacy) still verify and are rewritten only on request.

use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use pqvault_core::config::PqvConfig;
use pqvault_core::fs::{atomic_write, ensure_private_dir};
use pqvault_core::types::ENC_EXTENSION;
use pqvault_core::{validate_new_username, validate_username, PqvError, PqvResult};
use pqvault_crypto::{
    decapsulate, derive_key, derive_record_keys, encapsulate, keypair, mask, open_detached,
    random_bytes, seal_detached, KdfParams, KemSecretKey, MasterKey, RecordKeys, GCM_NONCE_SIZE,
    SALT_SIZE,
};

use crate::record::{CredentialRecord, LegacyRecord, SealedRecord};

/// One `<username>.enc` record per user, all in one directory.
#[derive(Debug, Clone)]
pub struct CredentialVault {
    users_dir: PathBuf,
    kdf: KdfParams,
}

impl CredentialVault {
    pub fn open(config: &PqvConfig) -> PqvResult<Self> {
        Self::with_dir(
            config.storage.users_path(),
            KdfParams::from_config(&config.kdf),
        )
    }

    /// Use `dir` as the users directory, creating it owner-only.
    pub fn with_dir(dir: impl Into<PathBuf>, kdf: KdfParams) -> PqvResult<Self> {
        let users_dir = dir.into();
        ensure_private_dir(&users_dir)?;
        Ok(Self { users_dir, kdf })
    }

    pub fn users_dir(&self) -> &Path {
        &self.users_dir
    }

    fn record_path(&self, username: &str) -> PathBuf {
        self.users_dir.join(format!("{username}.{ENC_EXTENSION}"))
    }

    pub fn user_exists(&self, username: &str) -> bool {
        validate_username(username).is_ok() && self.record_path(username).is_file()
    }

    pub fn has_any_users(&self) -> PqvResult<bool> {
        Ok(!self.usernames()?.is_empty())
    }

    /// Usernames recovered from record file names, sorted.
    pub fn usernames(&self) -> PqvResult<Vec<String>> {
        let mut names = Vec::new();
        for dirent in std::fs::read_dir(&self.users_dir)? {
            let path = dirent?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(ENC_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_username(stem).is_ok() {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Create a current-format record for a new user. Fails with
    /// `UserExists` if a record is already present.
    pub fn create_user(&self, username: &str, password: &SecretString) -> PqvResult<()> {
        validate_new_username(username)?;
        if self.record_path(username).exists() {
            return Err(PqvError::UserExists(username.to_string()));
        }
        self.write_record(username, password)?;
        tracing::info!(user = username, "created user");
        Ok(())
    }

    pub fn read_record(&self, username: &str) -> PqvResult<CredentialRecord> {
        validate_username(username)?;
        let bytes = match std::fs::read(self.record_path(username)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PqvError::UserNotFound(username.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        CredentialRecord::decode(&bytes)
    }

    /// `Ok(false)` for a wrong password. Missing users, unreadable and
    /// malformed records are errors.
    pub fn verify_password(&self, username: &str, candidate: &SecretString) -> PqvResult<bool> {
        let matched = match self.read_record(username)? {
            CredentialRecord::Current(record) => {
                verify_sealed(&record, Sealing::Bound(username), candidate, &self.kdf)?
            }
            CredentialRecord::Unbound(record) => {
                tracing::debug!(user = username, "verifying unbound v2 record");
                verify_sealed(&record, Sealing::Unbound, candidate, &self.kdf)?
            }
            CredentialRecord::Legacy(record) => {
                tracing::debug!(user = username, "verifying legacy v1 record");
                verify_legacy(&record, candidate)?
            }
        };
        if !matched {
            tracing::debug!(user = username, "password rejected");
        }
        Ok(matched)
    }

    /// Like [`verify_password`](Self::verify_password), with a wrong password
    /// reported as `AuthenticationFailed`.
    pub fn authenticate(&self, username: &str, password: &SecretString) -> PqvResult<()> {
        if self.verify_password(username, password)? {
            Ok(())
        } else {
            Err(PqvError::AuthenticationFailed)
        }
    }

    /// Rewrite a v2 or legacy v1 record in the current format. Returns
    /// `false` if the record is already current.
    pub fn upgrade_legacy_record(&self, username: &str, password: &SecretString) -> PqvResult<bool> {
        let record = self.read_record(username)?;
        let from = record.kind();
        let matched = match record {
            CredentialRecord::Current(_) => return Ok(false),
            CredentialRecord::Unbound(record) => {
                verify_sealed(&record, Sealing::Unbound, password, &self.kdf)?
            }
            CredentialRecord::Legacy(record) => verify_legacy(&record, password)?,
        };
        if !matched {
            return Err(PqvError::AuthenticationFailed);
        }
        self.write_record(username, password)?;
        tracing::info!(user = username, from, "upgraded credential record");
        Ok(true)
    }

    /// Seal a fresh current-format record for `password` and atomically
    /// replace the file.
    pub(crate) fn write_record(&self, username: &str, password: &SecretString) -> PqvResult<()> {
        let record = seal_record(username, password, &self.kdf)?;
        atomic_write(&self.record_path(username), &record.encode(), true)
    }
}

/// How the two AEAD passes of a sealed record are keyed.
#[derive(Debug, Clone, Copy)]
enum Sealing<'a> {
    /// HKDF subkeys, username as associated data.
    Bound(&'a str),
    /// The scrypt output for both passes, no associated data.
    Unbound,
}

impl<'a> Sealing<'a> {
    fn keys(self, master: &MasterKey) -> PqvResult<RecordKeys> {
        match self {
            Sealing::Bound(_) => Ok(derive_record_keys(master)?),
            Sealing::Unbound => Ok(RecordKeys::unbound(master)),
        }
    }

    fn aad(self) -> &'a [u8] {
        match self {
            Sealing::Bound(username) => username.as_bytes(),
            Sealing::Unbound => &[],
        }
    }
}

fn seal_record(username: &str, password: &SecretString, kdf: &KdfParams) -> PqvResult<SealedRecord> {
    let salt: [u8; SALT_SIZE] = random_bytes();
    let iv: [u8; GCM_NONCE_SIZE] = random_bytes();
    let sealing = Sealing::Bound(username);
    let aad = sealing.aad();

    let master = derive_key(password, &salt, kdf)?;
    let keys = sealing.keys(&master)?;

    let kem = keypair();
    let (encrypted_secret_key, secret_key_tag) =
        seal_detached(&keys.secret_key_key, &iv, aad, kem.secret.as_bytes())?;
    let (kem_ciphertext, shared) = encapsulate(&kem.public)?;

    let mut masked = mask::masked(password.expose_secret().as_bytes(), shared.as_bytes());
    let sealed = seal_detached(&keys.password_key, &iv, aad, &masked);
    masked.zeroize();
    let (encrypted_password, password_tag) = sealed?;

    Ok(SealedRecord {
        salt,
        iv,
        kem_ciphertext,
        kem_public_key: kem.public,
        encrypted_secret_key,
        encrypted_password,
        password_tag,
        secret_key_tag,
    })
}

fn verify_sealed(
    record: &SealedRecord,
    sealing: Sealing<'_>,
    candidate: &SecretString,
    kdf: &KdfParams,
) -> PqvResult<bool> {
    let aad = sealing.aad();
    let master = derive_key(candidate, &record.salt, kdf)?;
    let keys = sealing.keys(&master)?;

    let Ok(secret) = open_detached(
        &keys.secret_key_key,
        &record.iv,
        aad,
        &record.encrypted_secret_key,
        &record.secret_key_tag,
    ) else {
        return Ok(false);
    };
    let secret = KemSecretKey::from_bytes(secret).map_err(|e| PqvError::Corrupt(e.to_string()))?;
    let shared = decapsulate(&record.kem_ciphertext, &secret)
        .map_err(|e| PqvError::Corrupt(e.to_string()))?;

    let Ok(mut recovered) = open_detached(
        &keys.password_key,
        &record.iv,
        aad,
        &record.encrypted_password,
        &record.password_tag,
    ) else {
        return Ok(false);
    };
    mask::apply(&mut recovered, shared.as_bytes());

    let matched = constant_time_eq(&recovered, candidate);
    recovered.zeroize();
    Ok(matched)
}

fn verify_legacy(record: &LegacyRecord, candidate: &SecretString) -> PqvResult<bool> {
    let shared = decapsulate(&record.kem_ciphertext, &record.kem_secret_key)
        .map_err(|e| PqvError::Corrupt(e.to_string()))?;
    let mut recovered = mask::masked(&record.masked_password, shared.as_bytes());
    let matched = constant_time_eq(&recovered, candidate);
    recovered.zeroize();
    Ok(matched)
}

fn constant_time_eq(recovered: &[u8], candidate: &SecretString) -> bool {
    recovered.ct_eq(candidate.expose_secret().as_bytes()).into()
}
