//! Platform directories used by credforge.

use directories::ProjectDirs;
use std::path::{Path, PathBuf};

const CREDENTIALS_FILE: &str = "credentials.enc";
const CONFIG_FILE: &str = "config.toml";

/// Resolved configuration and data directories.
///
/// On Linux these are `~/.config/credforge` and `~/.local/share/credforge`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    config_dir: PathBuf,
    data_dir: PathBuf,
}

impl AppPaths {
    /// Resolve the platform directories, falling back to `./.credforge`
    /// when no home directory is known.
    pub fn discover() -> Self {
        match ProjectDirs::from("com", "credforge", "credforge") {
            Some(dirs) => Self {
                config_dir: dirs.config_dir().to_path_buf(),
                data_dir: dirs.data_dir().to_path_buf(),
            },
            None => Self::in_dir(".credforge"),
        }
    }

    /// Keep configuration and data under one directory.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            config_dir: dir.as_ref().to_path_buf(),
            data_dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    pub fn credentials_file(&self) -> PathBuf {
        self.data_dir.join(CREDENTIALS_FILE)
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::discover()
    }
}
