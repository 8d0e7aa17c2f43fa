use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use multipad_core::{ResourceLimits, MIB};

use crate::recent::DEFAULT_RECENT_CAPACITY;

const PREFERENCES_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum PreferencesError {
    #[error("failed to read preferences {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse preferences {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize preferences {}: {source}", path.display())]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write preferences {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to prepare directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub session: SessionPreferences,
    #[serde(default)]
    pub limits: LimitPreferences,
}

fn default_version() -> u32 {
    PREFERENCES_VERSION
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            version: PREFERENCES_VERSION,
            session: SessionPreferences::default(),
            limits: LimitPreferences::default(),
        }
    }
}

impl Preferences {
    pub fn sanitize(&mut self) {
        if self.version == 0 {
            self.version = PREFERENCES_VERSION;
        }
        self.session.sanitize();
        self.limits.sanitize();
    }
}

/// 工作階段與自動儲存設定。 / Session restore and autosave settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPreferences {
    #[serde(default = "default_true")]
    pub autosave_enabled: bool,
    #[serde(default = "default_autosave_interval")]
    pub autosave_interval_secs: u64,
    /// Reopen the previous session's files after a clean exit. Crash recovery is offered regardless.
    #[serde(default = "default_true")]
    pub restore_on_startup: bool,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,
    #[serde(default = "default_recent_limit")]
    pub recent_files_limit: usize,
}

fn default_true() -> bool {
    true
}

fn default_autosave_interval() -> u64 {
    30
}

fn default_shutdown_timeout() -> u64 {
    2_000
}

fn default_recent_limit() -> usize {
    DEFAULT_RECENT_CAPACITY
}

impl Default for SessionPreferences {
    fn default() -> Self {
        Self {
            autosave_enabled: true,
            autosave_interval_secs: default_autosave_interval(),
            restore_on_startup: true,
            shutdown_timeout_ms: default_shutdown_timeout(),
            recent_files_limit: default_recent_limit(),
        }
    }
}

impl SessionPreferences {
    fn sanitize(&mut self) {
        if self.autosave_interval_secs == 0 {
            self.autosave_interval_secs = default_autosave_interval();
        }
        self.autosave_interval_secs = self.autosave_interval_secs.clamp(5, 3_600);
        self.shutdown_timeout_ms = self.shutdown_timeout_ms.clamp(100, 30_000);
        self.recent_files_limit = self.recent_files_limit.clamp(1, 50);
    }

    pub fn autosave_interval(&self) -> Duration {
        Duration::from_secs(self.autosave_interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// 資源檢查門檻（位元組）。 / Resource thresholds in bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitPreferences {
    #[serde(default = "default_large_file")]
    pub large_file_bytes: u64,
    #[serde(default = "default_huge_file")]
    pub huge_file_bytes: u64,
    #[serde(default = "default_memory_threshold")]
    pub memory_threshold_bytes: u64,
    #[serde(default = "default_disk_margin")]
    pub disk_safety_margin_bytes: u64,
}

fn default_large_file() -> u64 {
    50 * MIB
}

fn default_huge_file() -> u64 {
    200 * MIB
}

fn default_memory_threshold() -> u64 {
    1024 * MIB
}

fn default_disk_margin() -> u64 {
    100 * MIB
}

impl Default for LimitPreferences {
    fn default() -> Self {
        Self {
            large_file_bytes: default_large_file(),
            huge_file_bytes: default_huge_file(),
            memory_threshold_bytes: default_memory_threshold(),
            disk_safety_margin_bytes: default_disk_margin(),
        }
    }
}

impl LimitPreferences {
    fn sanitize(&mut self) {
        if self.large_file_bytes == 0 {
            self.large_file_bytes = default_large_file();
        }
        if self.huge_file_bytes < self.large_file_bytes {
            self.huge_file_bytes = self.large_file_bytes;
        }
        if self.memory_threshold_bytes == 0 {
            self.memory_threshold_bytes = default_memory_threshold();
        }
    }

    pub fn to_resource_limits(&self) -> ResourceLimits {
        ResourceLimits {
            large_file_bytes: self.large_file_bytes,
            huge_file_bytes: self.huge_file_bytes,
            memory_threshold_bytes: self.memory_threshold_bytes,
            disk_safety_margin_bytes: self.disk_safety_margin_bytes,
        }
    }
}

#[derive(Debug)]
pub struct PreferencesStore {
    path: PathBuf,
    data: Preferences,
}

impl PreferencesStore {
    pub fn new(path: impl Into<PathBuf>, preferences: Preferences) -> Self {
        Self {
            path: path.into(),
            data: preferences,
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PreferencesError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            let mut data = Preferences::default();
            data.sanitize();
            return Ok(Self { path, data });
        }

        let contents = fs::read_to_string(&path).map_err(|source| PreferencesError::Read {
            path: path.clone(),
            source,
        })?;
        let mut data: Preferences =
            serde_json::from_str(&contents).map_err(|source| PreferencesError::Parse {
                path: path.clone(),
                source,
            })?;
        data.sanitize();
        Ok(Self { path, data })
    }

    pub fn preferences(&self) -> &Preferences {
        &self.data
    }

    pub fn update<F>(&mut self, mut op: F) -> Result<(), PreferencesError>
    where
        F: FnMut(&mut Preferences),
    {
        op(&mut self.data);
        self.data.sanitize();
        self.save()
    }

    pub fn save(&self) -> Result<(), PreferencesError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| PreferencesError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let payload = serde_json::to_string_pretty(&self.data).map_err(|source| {
            PreferencesError::Serialize {
                path: self.path.clone(),
                source,
            }
        })?;

        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, payload.as_bytes()).map_err(|source| PreferencesError::Write {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &self.path).map_err(|source| PreferencesError::Write {
            path: self.path.clone(),
            source,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
