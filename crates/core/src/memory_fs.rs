use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::fs::{FileAccess, FileSystem};

/// 記憶體中的檔案系統，可注入錯誤。 / In-memory file system with fault injection.
///
/// Writes can be held open to simulate a slow disk, failed with a chosen
/// error kind, or refused by lowering the reported free space. Every
/// successful write is appended to a log for later inspection.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    state: Mutex<MemoryState>,
    released: Condvar,
}

#[derive(Debug)]
struct MemoryState {
    files: BTreeMap<PathBuf, Vec<u8>>,
    read_only: BTreeSet<PathBuf>,
    unreadable: BTreeSet<PathBuf>,
    available: u64,
    fail_writes: Option<ErrorKind>,
    hold_writes: bool,
    blocked_writers: usize,
    log: Vec<(PathBuf, Vec<u8>)>,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            files: BTreeMap::new(),
            read_only: BTreeSet::new(),
            unreadable: BTreeSet::new(),
            available: u64::MAX,
            fail_writes: None,
            hold_writes: false,
            blocked_writers: 0,
            log: Vec::new(),
        }
    }
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, data: impl Into<Vec<u8>>) {
        self.state.lock().files.insert(path.into(), data.into());
    }

    pub fn contents(&self, path: &Path) -> Option<Vec<u8>> {
        self.state.lock().files.get(path).cloned()
    }

    pub fn set_available_space(&self, bytes: u64) {
        self.state.lock().available = bytes;
    }

    pub fn set_read_only(&self, path: impl Into<PathBuf>, read_only: bool) {
        let path = path.into();
        let mut state = self.state.lock();
        if read_only {
            state.read_only.insert(path);
        } else {
            state.read_only.remove(&path);
        }
    }

    pub fn set_unreadable(&self, path: impl Into<PathBuf>) {
        self.state.lock().unreadable.insert(path.into());
    }

    /// Makes every subsequent write fail with `kind` (or succeed again with `None`).
    pub fn fail_writes(&self, kind: Option<ErrorKind>) {
        self.state.lock().fail_writes = kind;
    }

    /// Blocks writers inside `write_atomic` until [`Self::release_writes`].
    pub fn hold_writes(&self) {
        self.state.lock().hold_writes = true;
    }

    pub fn release_writes(&self) {
        self.state.lock().hold_writes = false;
        self.released.notify_all();
    }

    /// Waits until at least `count` writers are parked on a held write.
    pub fn wait_for_blocked_writers(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.state.lock().blocked_writers >= count {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().log.len()
    }

    /// Payloads written to `path`, oldest first.
    pub fn writes_to(&self, path: &Path) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .log
            .iter()
            .filter(|(target, _)| target == path)
            .map(|(_, data)| data.clone())
            .collect()
    }
}

impl FileSystem for MemoryFileSystem {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        let state = self.state.lock();
        if state.unreadable.contains(path) {
            return Err(io::Error::new(ErrorKind::PermissionDenied, "read denied"));
        }
        state
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(ErrorKind::NotFound, "no such file"))
    }

    fn write_atomic(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.hold_writes {
            state.blocked_writers += 1;
            while state.hold_writes {
                self.released.wait(&mut state);
            }
            state.blocked_writers -= 1;
        }
        if state.read_only.contains(path) {
            return Err(io::Error::new(ErrorKind::PermissionDenied, "read-only file"));
        }
        if let Some(kind) = state.fail_writes {
            return Err(io::Error::new(kind, "injected write failure"));
        }
        if (data.len() as u64) > state.available {
            return Err(io::Error::new(ErrorKind::Other, "no space left on device"));
        }
        state.files.insert(path.to_path_buf(), data.to_vec());
        state.log.push((path.to_path_buf(), data.to_vec()));
        Ok(())
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        self.state
            .lock()
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| io::Error::new(ErrorKind::NotFound, "no such file"))
    }

    fn file_size(&self, path: &Path) -> io::Result<u64> {
        self.state
            .lock()
            .files
            .get(path)
            .map(|data| data.len() as u64)
            .ok_or_else(|| io::Error::new(ErrorKind::NotFound, "no such file"))
    }

    fn access(&self, path: &Path) -> FileAccess {
        let state = self.state.lock();
        let writable = !state.read_only.contains(path);
        if state.files.contains_key(path) {
            FileAccess::Present {
                readable: !state.unreadable.contains(path),
                writable,
            }
        } else {
            FileAccess::Missing {
                creatable: writable,
            }
        }
    }

    fn available_space(&self, _path: &Path) -> io::Result<u64> {
        Ok(self.state.lock().available)
    }
}
