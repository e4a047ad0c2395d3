use std::path::{Path, PathBuf};

use secrecy::SecretString;

use pqvault_core::config::PqvConfig;
use pqvault_core::fs::ensure_private_dir;
use pqvault_core::{validate_username, ArchiveId, PqvError, PqvResult};
use pqvault_crypto::KdfParams;

use crate::archive::Archive;
use crate::codec::Limits;

/// All archives under one directory, sharing KDF parameters and decode bounds.
#[derive(Debug, Clone)]
pub struct ArchiveStore {
    dir: PathBuf,
    kdf: KdfParams,
    limits: Limits,
}

impl ArchiveStore {
    pub fn new(dir: impl Into<PathBuf>, kdf: KdfParams, limits: Limits) -> Self {
        Self {
            dir: dir.into(),
            kdf,
            limits,
        }
    }

    pub fn from_config(config: &PqvConfig) -> Self {
        Self::new(
            config.storage.archives_path(),
            KdfParams::from_config(&config.kdf),
            Limits::from(&config.archive),
        )
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Bind an unloaded handle. Creates the directory but not the file.
    pub fn open(&self, username: &str, archive_name: &str) -> PqvResult<Archive> {
        let id = ArchiveId::new(username, archive_name)?;
        ensure_private_dir(&self.dir)?;
        Ok(Archive::new(&self.dir, id, self.kdf, self.limits))
    }

    /// Create and persist a new empty archive. Fails if one already exists.
    pub fn create_new(
        &self,
        username: &str,
        archive_name: &str,
        password: &SecretString,
    ) -> PqvResult<Archive> {
        let mut archive = self.open(username, archive_name)?;
        if archive.exists() {
            return Err(PqvError::AlreadyExists(archive.id().to_string()));
        }
        archive.initialize(password)?;
        Ok(archive)
    }

    /// Archive names owned by `username`, sorted. A missing directory means
    /// no archives.
    pub fn find_user_archives(&self, username: &str) -> PqvResult<Vec<String>> {
        self.find_user_archives_among(username, &[])
    }

    /// Like [`find_user_archives`](Self::find_user_archives), but files that
    /// parse for a longer name in `known_users` (`john_doe_tax.enc` when both
    /// `john` and `john_doe` exist) are left to that user.
    pub fn find_user_archives_among(
        &self,
        username: &str,
        known_users: &[String],
    ) -> PqvResult<Vec<String>> {
        validate_username(username)?;
        let longer: Vec<&str> = known_users
            .iter()
            .map(String::as_str)
            .filter(|other| other.len() > username.len() && other.starts_with(username))
            .collect();

        let read_dir = match std::fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for dirent in read_dir {
            let dirent = dirent?;
            if !dirent.file_type()?.is_file() {
                continue;
            }
            let file_name = dirent.file_name().to_string_lossy().into_owned();
            let Some(id) = ArchiveId::parse(username, &file_name) else {
                continue;
            };
            if longer.iter().any(|other| ArchiveId::parse(other, &file_name).is_some()) {
                continue;
            }
            names.push(id.archive_name);
        }
        names.sort();

        tracing::debug!(user = username, count = names.len(), "found user archives");
        Ok(names)
    }
}
