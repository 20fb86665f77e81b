//! Saving and restoring the backend configuration to a file.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::backend::{Backend, BackendError};
use crate::snapshot::{Snapshot, SnapshotError};

/// Where `saveconfig` and `restoreconfig` look when no file is given.
pub const DEFAULT_SAVE_FILE: &str = "/etc/target/saveconfig.json";

/// Mode of a freshly written configuration file: owner read/write.
#[cfg(unix)]
const SAVE_FILE_MODE: u32 = 0o600;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("{op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Error parsing savefile: {}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: SnapshotError,
    },

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[source] SnapshotError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl PersistError {
    fn io<'a>(op: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> PersistError + 'a {
        move |source| PersistError::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result of a successful save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    pub path: PathBuf,
    /// Set when an existing file was moved aside first.
    pub backup: Option<PathBuf>,
}

/// Result of a restore that did not fail outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Nothing to restore; the backend was not touched.
    NotFound(PathBuf),
    /// The snapshot was applied. `errors` counts items the backend skipped.
    Restored { path: PathBuf, errors: usize },
}

/// Expand a leading `~` to the current user's home directory.
pub fn expand_path(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// `<path>.backup`, next to `path`.
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".backup");
    PathBuf::from(name)
}

/// Move an existing save file aside. A missing file is not an error; any
/// other failure is.
fn rotate_backup(path: &Path) -> Result<Option<PathBuf>, PersistError> {
    let backup = backup_path(path);
    match fs::rename(path, &backup) {
        Ok(()) => {
            tracing::info!(path = %path.display(), backup = %backup.display(), "existing save file backed up");
            Ok(Some(backup))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(PersistError::io("Failed to back up", path)(e)),
    }
}

#[cfg(unix)]
fn open_private(path: &Path) -> io::Result<fs::File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(SAVE_FILE_MODE)
        .open(path)?;
    // The creation mode does not apply to a file that already existed.
    file.set_permissions(fs::Permissions::from_mode(SAVE_FILE_MODE))?;
    Ok(file)
}

// Without unix permission bits the file keeps whatever access the platform
// default grants.
#[cfg(not(unix))]
fn open_private(path: &Path) -> io::Result<fs::File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

/// Write the backend's current configuration to `path`.
///
/// An existing file is first renamed to `<path>.backup`. The new file is
/// owner read/write only before any data reaches it.
pub fn save_config<B: Backend + ?Sized>(backend: &B, path: &Path) -> Result<SaveOutcome, PersistError> {
    let text = backend.dump().to_json_pretty().map_err(PersistError::Serialize)?;

    let backup = rotate_backup(path)?;

    let mut file = open_private(path).map_err(PersistError::io("Failed to open", path))?;
    file.write_all(text.as_bytes())
        .map_err(PersistError::io("Failed to write", path))?;
    file.sync_all()
        .map_err(PersistError::io("Failed to sync", path))?;

    tracing::info!(path = %path.display(), "configuration saved");
    Ok(SaveOutcome {
        path: path.to_path_buf(),
        backup,
    })
}

/// Read a snapshot from `path` without applying it.
pub fn load_snapshot(path: &Path) -> Result<Snapshot, PersistError> {
    let text = fs::read_to_string(path).map_err(PersistError::io("Failed to read", path))?;
    Snapshot::from_json(&text).map_err(|source| PersistError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Apply the snapshot stored at `path`.
///
/// A path that is not a regular file yields [`RestoreOutcome::NotFound`].
/// A malformed file fails before the backend is touched.
pub fn restore_config<B: Backend + ?Sized>(
    backend: &B,
    path: &Path,
    clear_existing: bool,
) -> Result<RestoreOutcome, PersistError> {
    if !path.is_file() {
        tracing::debug!(path = %path.display(), "restore file not found");
        return Ok(RestoreOutcome::NotFound(path.to_path_buf()));
    }

    let snapshot = load_snapshot(path)?;
    let errors = backend.restore(&snapshot, clear_existing)?;
    if errors > 0 {
        tracing::warn!(path = %path.display(), errors, "configuration restored with recoverable errors");
    } else {
        tracing::info!(path = %path.display(), "configuration restored");
    }

    Ok(RestoreOutcome::Restored {
        path: path.to_path_buf(),
        errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::snapshot::{BackstorePlugin, StorageObjectConfig};
    use std::collections::BTreeMap;

    fn configured_backend() -> MemoryBackend {
        let backend = MemoryBackend::new();
        let snapshot = Snapshot {
            storage_objects: vec![StorageObjectConfig {
                plugin: BackstorePlugin::RdMcp,
                name: "ram0".into(),
                dev: None,
                size: Some(1 << 20),
                wwn: None,
                write_back: false,
                readonly: false,
                attributes: BTreeMap::new(),
            }],
            ..Default::default()
        };
        backend.restore(&snapshot, false).unwrap();
        backend
    }

    #[test]
    fn expand_path_leaves_plain_paths_alone() {
        assert_eq!(expand_path("/etc/target/x.json"), PathBuf::from("/etc/target/x.json"));
        assert_eq!(expand_path("relative.json"), PathBuf::from("relative.json"));
        assert_eq!(expand_path("~user/x"), PathBuf::from("~user/x"));
    }

    #[test]
    fn expand_path_uses_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_path("~/saved.json"), home.join("saved.json"));
            assert_eq!(expand_path("~"), home);
        }
    }

    #[test]
    fn backup_path_appends_suffix() {
        assert_eq!(
            backup_path(Path::new("/etc/target/saveconfig.json")),
            PathBuf::from("/etc/target/saveconfig.json.backup")
        );
    }

    #[test]
    fn save_without_prior_file_creates_no_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saveconfig.json");

        let outcome = save_config(&configured_backend(), &path).unwrap();
        assert_eq!(outcome.backup, None);
        assert!(path.is_file());
        assert!(!backup_path(&path).exists());
    }

    #[cfg(unix)]
    #[test]
    fn failed_backup_aborts_save_and_keeps_original() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saveconfig.json");
        fs::write(&path, "original\n").unwrap();
        // a non-empty directory in the way of the backup rename
        let backup = backup_path(&path);
        fs::create_dir(&backup).unwrap();
        fs::write(backup.join("occupied"), "x").unwrap();

        let err = save_config(&configured_backend(), &path).unwrap_err();
        assert!(matches!(
            err,
            PersistError::Io { op: "Failed to back up", .. }
        ));
        assert_eq!(fs::read_to_string(&path).unwrap(), "original\n");
        assert!(backup.join("occupied").is_file());
    }

    #[test]
    fn save_into_missing_directory_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("saveconfig.json");

        let err = save_config(&configured_backend(), &path).unwrap_err();
        assert!(matches!(err, PersistError::Io { .. }));
    }

    #[test]
    fn restore_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.json");
        let backend = MemoryBackend::new();

        let outcome = restore_config(&backend, &path, false).unwrap();
        assert_eq!(outcome, RestoreOutcome::NotFound(path));
    }

    #[test]
    fn restore_directory_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MemoryBackend::new();

        let outcome = restore_config(&backend, dir.path(), false).unwrap();
        assert!(matches!(outcome, RestoreOutcome::NotFound(_)));
    }

    #[test]
    fn restore_malformed_file_leaves_backend_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{\"storage_objects\": [").unwrap();

        let backend = configured_backend();
        let before = backend.dump();
        let err = restore_config(&backend, &path, true).unwrap_err();
        assert!(matches!(err, PersistError::Parse { .. }));
        assert_eq!(err.to_string(), format!("Error parsing savefile: {}", path.display()));
        assert_eq!(backend.dump(), before);
    }

    #[test]
    fn restore_reports_backend_refusal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saveconfig.json");
        let backend = configured_backend();
        save_config(&backend, &path).unwrap();

        let err = restore_config(&backend, &path, false).unwrap_err();
        assert!(matches!(err, PersistError::Backend(BackendError::ExistingConfig)));
    }
}
