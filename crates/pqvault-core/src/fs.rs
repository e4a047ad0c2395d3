//! Filesystem helpers shared by the credential vault and archive store.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::PqvResult;

/// Expand a leading `~/` to `$HOME`.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    match s.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_default();
            PathBuf::from(home).join(rest)
        }
        None => path.to_path_buf(),
    }
}

/// Create `dir` (and parents) if missing; on unix restrict it to the owner.
pub fn ensure_private_dir(dir: &Path) -> PqvResult<()> {
    std::fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Replace `path` with `content` atomically: write a sibling temp file,
/// fsync it, then rename over the target. A crash leaves either the old or
/// the new file, never a truncated one.
///
/// When `owner_only` is set the temp file is created 0600 before any bytes
/// are written.
pub fn atomic_write(path: &Path, content: &[u8], owner_only: bool) -> PqvResult<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = parent.join(format!(
        ".{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy()
    ));

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    if owner_only {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    #[cfg(not(unix))]
    let _ = owner_only;

    let result = (|| -> std::io::Result<()> {
        let mut file = options.open(&tmp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
        std::fs::rename(&tmp_path, path)
    })();

    if let Err(e) = result {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e.into());
    }

    tracing::debug!(path = %path.display(), bytes = content.len(), "atomic write");
    Ok(())
}
