use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use multipad_core::{FileOperation, FileSystem, SessionData};

use crate::error::SessionError;

/// 工作階段檔與自動儲存檔兩個儲存位置。 / The two persisted records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Slot {
    Session,
    Autosave,
}

/// One JSON record on the injected file system.
#[derive(Debug, Clone)]
pub struct SessionSlot {
    path: PathBuf,
    fs: Arc<dyn FileSystem>,
}

impl SessionSlot {
    pub fn new(path: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            path: path.into(),
            fs,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 讀取紀錄；檔案不存在時回傳 `Ok(None)`。 / Loads the record. A missing file is `Ok(None)`.
    pub fn load(&self) -> Result<Option<SessionData>, SessionError> {
        match self.fs.read(&self.path) {
            Ok(bytes) => SessionData::from_json(&bytes)
                .map(Some)
                .map_err(|source| SessionError::InvalidPayload {
                    path: self.path.clone(),
                    source,
                }),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(SessionError::Io {
                path: self.path.clone(),
                operation: FileOperation::Restoring,
                source,
            }),
        }
    }

    pub fn save(&self, data: &SessionData) -> Result<(), SessionError> {
        let json = data.to_json().map_err(SessionError::Serialize)?;
        self.fs
            .write_atomic(&self.path, &json)
            .map_err(|source| SessionError::Io {
                path: self.path.clone(),
                operation: FileOperation::Saving,
                source,
            })
    }

    /// Removes the record; an already missing file is fine.
    pub fn remove(&self) -> Result<(), SessionError> {
        match self.fs.remove(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SessionError::Io {
                path: self.path.clone(),
                operation: FileOperation::Deleting,
                source,
            }),
        }
    }

    pub fn exists(&self) -> bool {
        self.fs.exists(&self.path)
    }
}
