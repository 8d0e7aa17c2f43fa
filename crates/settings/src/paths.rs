use std::path::{Path, PathBuf};

use directories::ProjectDirs;

const SESSION_FILE: &str = "session.json";
const AUTOSAVE_FILE: &str = "autosave.json";
const PREFERENCES_FILE: &str = "preferences.json";
const RECENT_FILE: &str = "recent.db";

/// 每位使用者的應用程式資料位置。 / Per-user application data locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    data_dir: PathBuf,
    config_dir: PathBuf,
}

impl AppPaths {
    /// Resolves the platform data/config directories. `None` when no home directory is known.
    pub fn discover() -> Option<Self> {
        let dirs = ProjectDirs::from("org", "multipad", "Multipad")?;
        Some(Self {
            data_dir: dirs.data_dir().to_path_buf(),
            config_dir: dirs.config_dir().to_path_buf(),
        })
    }

    /// Keeps every file under one explicit root.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            data_dir: root.clone(),
            config_dir: root,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn session_file(&self) -> PathBuf {
        self.data_dir.join(SESSION_FILE)
    }

    pub fn autosave_file(&self) -> PathBuf {
        self.data_dir.join(AUTOSAVE_FILE)
    }

    pub fn preferences_file(&self) -> PathBuf {
        self.config_dir.join(PREFERENCES_FILE)
    }

    pub fn recent_files_file(&self) -> PathBuf {
        self.data_dir.join(RECENT_FILE)
    }
}
