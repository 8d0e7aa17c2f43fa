use std::collections::VecDeque;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use multipad_core::FileSystem;

/// 最近檔案清單的預設長度。 / Default number of remembered files.
pub const DEFAULT_RECENT_CAPACITY: usize = 10;

/// 管理最近開啟檔案的清單。 / Bounded most-recent-first list of opened or saved files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentFiles {
    capacity: usize,
    entries: VecDeque<PathBuf>,
}

impl RecentFiles {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// 依序列化資料還原清單，重複項目只保留第一個。 / Rebuilds the list from persisted entries, keeping the first copy of duplicates.
    pub fn with_entries(capacity: usize, entries: Vec<PathBuf>) -> Self {
        let mut recent = Self::new(capacity);
        for path in entries {
            if !recent.entries.contains(&path) {
                recent.entries.push_back(path);
            }
        }
        recent.entries.truncate(recent.capacity);
        recent
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        self.entries.truncate(self.capacity);
    }

    /// 加入或提升至清單頂端。 / Inserts or promotes a path to the front.
    pub fn add(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        self.entries.retain(|existing| existing != &path);
        self.entries.push_front(path);
        self.entries.truncate(self.capacity);
    }

    /// Returns `true` when the path was listed.
    pub fn remove(&mut self, path: &Path) -> bool {
        let before = self.entries.len();
        self.entries.retain(|existing| existing.as_path() != path);
        before != self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        self.entries.iter()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.iter().any(|existing| existing.as_path() == path)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// 最近檔案清單的持久化。 / Persists the recent-files list through a [`FileSystem`].
///
/// The file holds a `capacity=N` header followed by one base64-encoded path
/// per line, so non-UTF-8 paths survive. A store without a path keeps the
/// list in memory only.
#[derive(Debug)]
pub struct RecentFilesStore {
    path: Option<PathBuf>,
    fs: Option<Arc<dyn FileSystem>>,
    history: RecentFiles,
}

impl RecentFilesStore {
    /// 從檔案載入；檔案不存在時回傳空清單。 / Loads the list, returning an empty one when the file is missing.
    pub fn load(
        path: impl Into<PathBuf>,
        default_capacity: usize,
        fs: Arc<dyn FileSystem>,
    ) -> io::Result<Self> {
        let path = path.into();
        let history = match fs.read(&path) {
            Ok(bytes) => parse(&bytes, default_capacity)?,
            Err(err) if err.kind() == ErrorKind::NotFound => RecentFiles::new(default_capacity),
            Err(err) => return Err(err),
        };
        Ok(Self {
            path: Some(path),
            fs: Some(fs),
            history,
        })
    }

    pub fn in_memory(capacity: usize) -> Self {
        Self {
            path: None,
            fs: None,
            history: RecentFiles::new(capacity),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn history(&self) -> &RecentFiles {
        &self.history
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        self.history.iter()
    }

    pub fn add(&mut self, path: impl Into<PathBuf>) -> io::Result<()> {
        let path = path.into();
        if self.history.iter().next() == Some(&path) {
            return Ok(());
        }
        self.history.add(path);
        self.persist()
    }

    pub fn remove(&mut self, path: &Path) -> io::Result<bool> {
        let removed = self.history.remove(path);
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    pub fn clear(&mut self) -> io::Result<()> {
        self.history.clear();
        self.persist()
    }

    pub fn set_capacity(&mut self, capacity: usize) -> io::Result<()> {
        self.history.set_capacity(capacity);
        self.persist()
    }

    fn persist(&self) -> io::Result<()> {
        let (Some(path), Some(fs)) = (&self.path, &self.fs) else {
            return Ok(());
        };
        let mut payload = format!("capacity={}\n", self.history.capacity());
        for entry in self.history.iter() {
            payload.push_str(&BASE64.encode(path_to_bytes(entry)));
            payload.push('\n');
        }
        fs.write_atomic(path, payload.as_bytes())
    }
}

fn parse(bytes: &[u8], default_capacity: usize) -> io::Result<RecentFiles> {
    let contents =
        std::str::from_utf8(bytes).map_err(|err| io::Error::new(ErrorKind::InvalidData, err))?;
    let mut lines = contents.lines().map(str::trim).filter(|line| !line.is_empty());
    let mut capacity = default_capacity;
    let mut entries = Vec::new();
    if let Some(first) = lines.next() {
        match first.strip_prefix("capacity=") {
            Some(value) => {
                if let Ok(parsed) = value.parse::<usize>() {
                    capacity = parsed;
                }
            }
            None => entries.push(decode_path(first)?),
        }
    }
    for line in lines {
        entries.push(decode_path(line)?);
    }
    Ok(RecentFiles::with_entries(capacity, entries))
}

fn decode_path(encoded: &str) -> io::Result<PathBuf> {
    let bytes = BASE64
        .decode(encoded.as_bytes())
        .map_err(|err| io::Error::new(ErrorKind::InvalidData, err))?;
    bytes_to_path(bytes)
}

#[cfg(unix)]
fn path_to_bytes(path: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

#[cfg(unix)]
fn bytes_to_path(bytes: Vec<u8>) -> io::Result<PathBuf> {
    use std::ffi::OsString;
    use std::os::unix::ffi::OsStringExt;
    Ok(PathBuf::from(OsString::from_vec(bytes)))
}

#[cfg(not(unix))]
fn path_to_bytes(path: &Path) -> Vec<u8> {
    path.to_string_lossy().into_owned().into_bytes()
}

#[cfg(not(unix))]
fn bytes_to_path(bytes: Vec<u8>) -> io::Result<PathBuf> {
    String::from_utf8(bytes)
        .map(PathBuf::from)
        .map_err(|err| io::Error::new(ErrorKind::InvalidData, err))
}
