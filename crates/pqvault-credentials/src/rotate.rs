//! Master password rotation across the credential record and every archive
//! the user owns.
//!
//! Rotation flow:
//!   1. Verify the old password against the credential record
//!   2. Rewrite the record under the new password
//!   3. Sweep the user's archives, rewrapping each container key
//!
//! Archive payloads are never re-encrypted, only their wrapped keys. The
//! sweep is idempotent: an archive that already opens with the new password
//! is skipped, so an interrupted rotation is finished by running the sweep
//! again with [`CredentialVault::resume_rotation`]. Archives that were
//! already rotated are never rolled back.

use secrecy::SecretString;
use serde::Serialize;

use pqvault_archive::ArchiveStore;
use pqvault_core::{PqvError, PqvResult};

use crate::vault::CredentialVault;

/// What happened to one archive during a sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveRotation {
    Rotated,
    AlreadyCurrent,
    Failed { reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RotationReport {
    pub rotated: Vec<String>,
    pub already_current: Vec<String>,
    /// `(archive name, reason)`
    pub failed: Vec<(String, String)>,
}

impl RotationReport {
    /// True when every archive now opens with the new password.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.rotated.len() + self.already_current.len() + self.failed.len()
    }

    fn record(&mut self, archive: String, outcome: ArchiveRotation) {
        match outcome {
            ArchiveRotation::Rotated => self.rotated.push(archive),
            ArchiveRotation::AlreadyCurrent => self.already_current.push(archive),
            ArchiveRotation::Failed { reason } => self.failed.push((archive, reason)),
        }
    }
}

impl CredentialVault {
    /// Rotate `username` from `old` to `new`.
    ///
    /// A wrong `old` password fails with `AuthenticationFailed` before
    /// anything is written. Once the credential record is rewritten the
    /// call succeeds; per-archive failures are reported, not returned.
    pub fn change_master_password(
        &self,
        archives: &ArchiveStore,
        username: &str,
        old: &SecretString,
        new: &SecretString,
    ) -> PqvResult<RotationReport> {
        self.authenticate(username, old)?;

        self.write_record(username, new)?;
        tracing::info!(user = username, "credential record rotated");

        let report = sweep(archives, &self.usernames()?, username, old, new)?;
        log_report(username, &report);
        Ok(report)
    }

    /// Finish a partially failed rotation. The credential record must
    /// already accept `new`.
    pub fn resume_rotation(
        &self,
        archives: &ArchiveStore,
        username: &str,
        old: &SecretString,
        new: &SecretString,
    ) -> PqvResult<RotationReport> {
        self.authenticate(username, new)?;

        let report = sweep(archives, &self.usernames()?, username, old, new)?;
        log_report(username, &report);
        Ok(report)
    }
}

fn sweep(
    archives: &ArchiveStore,
    known_users: &[String],
    username: &str,
    old: &SecretString,
    new: &SecretString,
) -> PqvResult<RotationReport> {
    let mut report = RotationReport::default();
    for name in archives.find_user_archives_among(username, known_users)? {
        let outcome = rotate_archive(archives, username, &name, old, new);
        if let ArchiveRotation::Failed { reason } = &outcome {
            tracing::warn!(user = username, archive = %name, %reason, "archive rotation failed");
        }
        report.record(name, outcome);
    }
    Ok(report)
}

/// Rewrap one archive from `old` to `new`.
pub fn rotate_archive(
    archives: &ArchiveStore,
    username: &str,
    archive_name: &str,
    old: &SecretString,
    new: &SecretString,
) -> ArchiveRotation {
    let mut archive = match archives.open(username, archive_name) {
        Ok(archive) => archive,
        Err(e) => return ArchiveRotation::Failed { reason: e.to_string() },
    };

    match archive.change_password(old, new) {
        Ok(()) => ArchiveRotation::Rotated,
        Err(PqvError::AuthenticationFailed) => match archive.unlocks_with(new) {
            Ok(true) => ArchiveRotation::AlreadyCurrent,
            Ok(false) => ArchiveRotation::Failed {
                reason: "opens with neither the old nor the new password".into(),
            },
            Err(e) => ArchiveRotation::Failed { reason: e.to_string() },
        },
        Err(e) => ArchiveRotation::Failed { reason: e.to_string() },
    }
}

fn log_report(username: &str, report: &RotationReport) {
    if report.is_complete() {
        tracing::info!(
            user = username,
            rotated = report.rotated.len(),
            already_current = report.already_current.len(),
            "rotation complete"
        );
    } else {
        tracing::warn!(
            user = username,
            rotated = report.rotated.len(),
            already_current = report.already_current.len(),
            failed = report.failed.len(),
            "rotation incomplete; run resume to retry failed archives"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_bookkeeping() {
        let mut report = RotationReport::default();
        assert!(report.is_complete());

        report.record("a".into(), ArchiveRotation::Rotated);
        report.record("b".into(), ArchiveRotation::AlreadyCurrent);
        assert!(report.is_complete());

        report.record(
            "c".into(),
            ArchiveRotation::Failed {
                reason: "io".into(),
            },
        );
        assert!(!report.is_complete());
        assert_eq!(report.total(), 3);
        assert_eq!(report.failed, vec![("c".to_string(), "io".to_string())]);
    }
}
