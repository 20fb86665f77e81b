use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::persist::DEFAULT_SAVE_FILE;

/// Shell preferences, loaded from TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellPrefs {
    /// File used by `saveconfig`/`restoreconfig` when none is given.
    pub save_file: String,
    /// Run `saveconfig` when leaving the interactive shell.
    pub auto_save_on_exit: bool,
    /// Color warnings and errors on a terminal.
    pub color: bool,
}

impl Default for ShellPrefs {
    fn default() -> Self {
        Self {
            save_file: DEFAULT_SAVE_FILE.to_string(),
            auto_save_on_exit: false,
            color: true,
        }
    }
}

impl ShellPrefs {
    /// Load prefs from a TOML file path. Returns None if file doesn't exist.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        check_prefs_permissions(path);

        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let prefs: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        Ok(Some(prefs))
    }

    /// Load prefs, falling back to defaults when the file is absent.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        Ok(Self::load(path)?.unwrap_or_default())
    }

    /// Save prefs to a TOML file path, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, contents)
            .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// `~/.targetsh/prefs.toml`, or None when there is no home directory.
pub fn default_prefs_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".targetsh").join("prefs.toml"))
}

/// Errors that can occur when loading or saving prefs.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read prefs {}: {}", .0.display(), .1)]
    ReadFailed(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse prefs {}: {}", .0.display(), .1)]
    ParseFailed(PathBuf, #[source] toml::de::Error),
    #[error("Failed to write prefs {}: {}", .0.display(), .1)]
    WriteFailed(PathBuf, #[source] std::io::Error),
    #[error("Failed to serialize prefs: {0}")]
    SerializeFailed(#[source] toml::ser::Error),
}

/// Warn if a prefs file is writable by other users: it names the file that
/// privileged saves and restores operate on.
#[cfg(unix)]
pub fn check_prefs_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let Ok(metadata) = std::fs::metadata(path) else {
        return;
    };

    let mode = metadata.permissions().mode();
    if is_world_writable(mode) {
        tracing::warn!(
            "Prefs file {} is world-writable (mode {:o}). \
             Consider restricting permissions to 644.",
            path.display(),
            mode & 0o7777,
        );
    }
}

#[cfg(not(unix))]
pub fn check_prefs_permissions(_path: &Path) {}

/// True if the mode's world-writable bit is set.
pub fn is_world_writable(mode: u32) -> bool {
    mode & 0o002 != 0
}
