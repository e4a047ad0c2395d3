//! Container key envelope: a random content key wrapped under a
//! password-derived key.

use secrecy::SecretString;

use pqvault_core::{PqvError, PqvResult};
use pqvault_crypto::{
    derive_key, generate_container_key, random_bytes, unwrap_key, wrap_key, ContainerKey,
    KdfParams, SALT_SIZE,
};

/// Key material held by a loaded archive. The password itself is never kept.
pub struct Keyring {
    pub salt: [u8; SALT_SIZE],
    pub wrapped_key: Vec<u8>,
    pub container_key: ContainerKey,
}

impl std::fmt::Debug for Keyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keyring")
            .field("salt", &hex::encode(self.salt))
            .field("container_key", &"[REDACTED]")
            .finish()
    }
}

impl Keyring {
    /// Fresh container key wrapped under `password`.
    pub fn create(password: &SecretString, kdf: &KdfParams) -> PqvResult<Self> {
        Self::wrap(generate_container_key(), password, kdf)
    }

    /// Unwrap a stored container key. A wrong password is `AuthenticationFailed`.
    pub fn unlock(
        salt: [u8; SALT_SIZE],
        wrapped_key: &[u8],
        password: &SecretString,
        kdf: &KdfParams,
    ) -> PqvResult<Self> {
        let wrapping_key = derive_key(password, &salt, kdf)?;
        let container_key =
            unwrap_key(&wrapping_key, wrapped_key).map_err(|_| PqvError::AuthenticationFailed)?;
        Ok(Self {
            salt,
            wrapped_key: wrapped_key.to_vec(),
            container_key,
        })
    }

    /// Same container key, fresh salt, wrapped under `password`.
    pub fn rewrap(&self, password: &SecretString, kdf: &KdfParams) -> PqvResult<Self> {
        Self::wrap(self.container_key.clone(), password, kdf)
    }

    fn wrap(container_key: ContainerKey, password: &SecretString, kdf: &KdfParams) -> PqvResult<Self> {
        let salt: [u8; SALT_SIZE] = random_bytes();
        let wrapping_key = derive_key(password, &salt, kdf)?;
        let wrapped_key = wrap_key(&wrapping_key, &container_key)?;
        Ok(Self {
            salt,
            wrapped_key,
            container_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> KdfParams {
        KdfParams {
            log_n: 10,
            ..KdfParams::default()
        }
    }

    #[test]
    fn test_unlock_with_correct_password() {
        let pw = SecretString::from("pw");
        let ring = Keyring::create(&pw, &fast()).unwrap();
        let opened = Keyring::unlock(ring.salt, &ring.wrapped_key, &pw, &fast()).unwrap();
        assert_eq!(ring.container_key.as_bytes(), opened.container_key.as_bytes());
    }

    #[test]
    fn test_unlock_wrong_password() {
        let ring = Keyring::create(&SecretString::from("pw"), &fast()).unwrap();
        let err = Keyring::unlock(
            ring.salt,
            &ring.wrapped_key,
            &SecretString::from("other"),
            &fast(),
        )
        .unwrap_err();
        assert!(err.is_authentication());
    }

    #[test]
    fn test_rewrap_keeps_content_key() {
        let ring = Keyring::create(&SecretString::from("old"), &fast()).unwrap();
        let new_pw = SecretString::from("new");
        let rotated = ring.rewrap(&new_pw, &fast()).unwrap();

        assert_ne!(ring.salt, rotated.salt);
        assert_eq!(ring.container_key.as_bytes(), rotated.container_key.as_bytes());
        assert!(Keyring::unlock(rotated.salt, &rotated.wrapped_key, &new_pw, &fast()).is_ok());
    }
}
