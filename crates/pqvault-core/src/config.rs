use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PqvError, PqvResult};
use crate::fs::expand_tilde;

/// Top-level configuration (loaded from pqvault.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PqvConfig {
    pub storage: StorageConfig,
    pub kdf: KdfConfig,
    pub archive: ArchiveConfig,
    pub logging: LoggingConfig,
    /// Warn if the config file is readable by group/other (default: true)
    #[serde(default = "default_true")]
    pub config_file_mode_check: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PqvConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            kdf: KdfConfig::default(),
            archive: ArchiveConfig::default(),
            logging: LoggingConfig::default(),
            config_file_mode_check: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for all on-disk state (default: ~/.local/share/pqvault)
    pub base_dir: PathBuf,
    /// Credential records, relative to base_dir unless absolute
    pub users_dir: PathBuf,
    /// Archive containers, relative to base_dir unless absolute
    pub archives_dir: PathBuf,
}

/// scrypt parameters shared by credential records and archive key wrapping
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    /// log2(N) (default: 15, N = 32768)
    pub scrypt_log_n: u8,
    /// Block size (default: 8)
    pub scrypt_r: u32,
    /// Parallelism (default: 1)
    pub scrypt_p: u32,
}

/// Sanity bounds applied when decoding an archive payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub max_files: u32,
    pub max_name_len: u32,
    pub max_timestamp_len: u32,
    pub max_hash_len: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("~/.local/share/pqvault"),
            users_dir: PathBuf::from("users"),
            archives_dir: PathBuf::from("archives"),
        }
    }
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            scrypt_log_n: 15,
            scrypt_r: 8,
            scrypt_p: 1,
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            max_files: 1000,
            max_name_len: 1024,
            max_timestamp_len: 64,
            max_hash_len: 128,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl StorageConfig {
    /// Directory holding `<username>.enc` credential records.
    pub fn users_path(&self) -> PathBuf {
        self.resolve(&self.users_dir)
    }

    /// Directory holding `<username>_<archive>.enc` containers.
    pub fn archives_path(&self) -> PathBuf {
        self.resolve(&self.archives_dir)
    }

    fn resolve(&self, dir: &Path) -> PathBuf {
        let dir = expand_tilde(dir);
        if dir.is_absolute() {
            dir
        } else {
            expand_tilde(&self.base_dir).join(dir)
        }
    }
}

impl PqvConfig {
    /// Load configuration from a TOML file, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &Path) -> PqvResult<Self> {
        if !path.exists() {
            tracing::debug!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: PqvConfig = toml::from_str(&content)
            .map_err(|e| PqvError::Config(format!("parsing {}: {e}", path.display())))?;

        if config.config_file_mode_check {
            warn_if_world_readable(path);
        }
        Ok(config)
    }

    /// Build a configuration rooted at `base_dir` with all other defaults.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig {
                base_dir: base_dir.into(),
                ..StorageConfig::default()
            },
            ..Self::default()
        }
    }
}

#[cfg(unix)]
fn warn_if_world_readable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Ok(meta) = std::fs::metadata(path) {
        let mode = meta.permissions().mode();
        if mode & 0o077 != 0 {
            tracing::warn!(
                path = %path.display(),
                mode = format!("{:o}", mode & 0o777),
                "config file is accessible by group/other"
            );
        }
    }
}

#[cfg(not(unix))]
fn warn_if_world_readable(_path: &Path) {}
