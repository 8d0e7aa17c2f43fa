//! 注入式檔案系統能力。 / Injected file-system capability.
//!
//! The editor core never touches `std::fs` directly; it reads, writes and
//! probes storage through [`FileSystem`]. [`StdFileSystem`] is the production
//! backend, [`crate::MemoryFileSystem`] the in-memory one used by tests.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// 檔案存取能力；「不存在」與「存在但不可寫」是不同狀態。 / File access capability. A missing file is a distinct state from an unwritable one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAccess {
    Missing { creatable: bool },
    Present { readable: bool, writable: bool },
}

impl FileAccess {
    pub fn exists(self) -> bool {
        matches!(self, FileAccess::Present { .. })
    }

    pub fn readable(self) -> bool {
        matches!(self, FileAccess::Present { readable: true, .. })
    }

    /// Writable in place, or creatable when missing.
    pub fn writable(self) -> bool {
        match self {
            FileAccess::Missing { creatable } => creatable,
            FileAccess::Present { writable, .. } => writable,
        }
    }
}

pub trait FileSystem: fmt::Debug + Send + Sync {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Replaces the file contents so readers never observe a truncated file.
    fn write_atomic(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    fn remove(&self, path: &Path) -> io::Result<()>;

    fn file_size(&self, path: &Path) -> io::Result<u64>;

    fn access(&self, path: &Path) -> FileAccess;

    /// Bytes available to this user on the volume holding `path`.
    fn available_space(&self, path: &Path) -> io::Result<u64>;

    fn exists(&self, path: &Path) -> bool {
        self.access(path).exists()
    }
}

/// 使用作業系統檔案系統的實作。 / Backend over the operating system's file system.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFileSystem;

impl FileSystem for StdFileSystem {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write_atomic(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = temp_sibling(path);
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(data)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, path).map_err(|err| {
            let _ = fs::remove_file(&tmp_path);
            err
        })
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn file_size(&self, path: &Path) -> io::Result<u64> {
        fs::metadata(path).map(|meta| meta.len())
    }

    fn access(&self, path: &Path) -> FileAccess {
        match fs::metadata(path) {
            Ok(meta) => FileAccess::Present {
                readable: os::can_read(path),
                writable: !meta.permissions().readonly() && os::can_write(path),
            },
            Err(_) => {
                let creatable = nearest_existing_ancestor(path)
                    .map(|dir| os::can_write(&dir))
                    .unwrap_or(false);
                FileAccess::Missing { creatable }
            }
        }
    }

    fn available_space(&self, path: &Path) -> io::Result<u64> {
        let probe = nearest_existing_ancestor(path).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no existing ancestor for {}", path.display()),
            )
        })?;
        os::available_space(&probe)
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.multipad-tmp"))
}

fn nearest_existing_ancestor(path: &Path) -> Option<PathBuf> {
    let mut current = Some(path);
    while let Some(candidate) = current {
        if !candidate.as_os_str().is_empty() && candidate.exists() {
            return Some(candidate.to_path_buf());
        }
        current = candidate.parent();
    }
    std::env::current_dir().ok()
}

#[cfg(unix)]
mod os {
    use std::ffi::CString;
    use std::io;
    use std::os::unix::ffi::OsStrExt;
    use std::path::Path;

    fn c_path(path: &Path) -> io::Result<CString> {
        CString::new(path.as_os_str().as_bytes())
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))
    }

    fn access(path: &Path, mode: libc::c_int) -> bool {
        match c_path(path) {
            // SAFETY: `c_path` is a valid NUL-terminated string for the call's duration.
            Ok(c_path) => unsafe { libc::access(c_path.as_ptr(), mode) == 0 },
            Err(_) => false,
        }
    }

    pub fn can_read(path: &Path) -> bool {
        access(path, libc::R_OK)
    }

    pub fn can_write(path: &Path) -> bool {
        access(path, libc::W_OK)
    }

    pub fn available_space(path: &Path) -> io::Result<u64> {
        let c_path = c_path(path)?;
        // SAFETY: statvfs is plain old data; zeroed is a valid initial value.
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        // SAFETY: both pointers are valid for the duration of the call.
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok((stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64))
    }
}

#[cfg(not(unix))]
mod os {
    use std::fs;
    use std::io;
    use std::path::Path;

    pub fn can_read(path: &Path) -> bool {
        fs::metadata(path).is_ok()
    }

    pub fn can_write(path: &Path) -> bool {
        fs::metadata(path)
            .map(|meta| !meta.permissions().readonly())
            .unwrap_or(false)
    }

    pub fn available_space(_path: &Path) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "free space query is not supported on this platform",
        ))
    }
}
