//! Checks and side work that must happen before an image is touched.
//!
//! Ownership acquisition and elevation are left to the caller; what can be
//! checked portably is checked here.

use crate::error::{PatchError, Result};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

/// Executable stem of `argv0`, for usage and banner text.
pub fn program_name(argv0: &str) -> String {
    // argv0 may use either separator regardless of host.
    let base = argv0.rsplit(['/', '\\']).next().unwrap_or(argv0);
    let stem = match base.rfind('.') {
        Some(dot) if dot > 0 => &base[..dot],
        _ => base,
    };
    stem.to_string()
}

/// `<path>.bak`, keeping the original extension.
pub fn backup_path_for(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".bak");
    PathBuf::from(name)
}

/// Outcome of [`ensure_backup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupStatus {
    Created(PathBuf),
    Existing(PathBuf),
}

impl BackupStatus {
    pub fn path(&self) -> &Path {
        match self {
            Self::Created(p) | Self::Existing(p) => p,
        }
    }
}

/// Copies `path` to `<path>.bak` unless a backup already exists.
pub fn ensure_backup(path: &Path) -> Result<BackupStatus> {
    if !path.is_file() {
        return Err(PatchError::Precondition(format!(
            "Could not create backup of {}: file not found",
            path.display()
        )));
    }

    let backup = backup_path_for(path);
    let mut target = match OpenOptions::new().write(true).create_new(true).open(&backup) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            info!("Backup '{}' already exists - keeping it", backup.display());
            return Ok(BackupStatus::Existing(backup));
        }
        Err(e) => {
            return Err(PatchError::Precondition(format!(
                "Could not create backup of {}: {}",
                path.display(),
                e
            )))
        }
    };

    let copied = File::open(path).and_then(|mut source| io::copy(&mut source, &mut target));
    if let Err(e) = copied {
        drop(target);
        // A partial backup is worse than none.
        let _ = fs::remove_file(&backup);
        return Err(PatchError::Precondition(format!(
            "Could not create backup of {}: {}",
            path.display(),
            e
        )));
    }

    info!("Saved backup as '{}'", backup.display());
    Ok(BackupStatus::Created(backup))
}

/// Refuses paths under the live system directory.
pub fn ensure_not_system_file(path: &Path, system_directory: &str) -> Result<()> {
    let normalize = |s: &str| s.replace('/', "\\").to_lowercase();
    let target = normalize(&path.display().to_string());
    let system = normalize(system_directory);
    if !system.is_empty() && target.starts_with(&system) {
        return Err(PatchError::Precondition(
            "Patching of active system files is prohibited!".to_string(),
        ));
    }
    Ok(())
}

/// Requires an existing regular file that is not marked read-only.
pub fn ensure_writable(path: &Path) -> Result<()> {
    let metadata = fs::metadata(path).map_err(|e| {
        PatchError::Precondition(format!("Could not open '{}': {}", path.display(), e))
    })?;
    if !metadata.is_file() {
        return Err(PatchError::Precondition(format!(
            "'{}' is not a regular file",
            path.display()
        )));
    }
    if metadata.permissions().readonly() {
        return Err(PatchError::Precondition(format!(
            "No write access to '{}'",
            path.display()
        )));
    }
    Ok(())
}
