//! 資源檢查：磁碟空間、檔案權限、檔案大小與記憶體用量。 / Advisory resource checks.
//!
//! All checks are side-effect-free queries. A passing check does not promise
//! that the following I/O succeeds, so callers still handle the real error.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::fs::{FileAccess, FileSystem};

pub const MIB: u64 = 1024 * 1024;

/// 各項檢查使用的門檻。 / Thresholds used by the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    pub large_file_bytes: u64,
    pub huge_file_bytes: u64,
    pub memory_threshold_bytes: u64,
    pub disk_safety_margin_bytes: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            large_file_bytes: 50 * MIB,
            huge_file_bytes: 200 * MIB,
            memory_threshold_bytes: 1024 * MIB,
            disk_safety_margin_bytes: 100 * MIB,
        }
    }
}

/// 取樣目前程序的記憶體用量。 / Samples the resident memory of the current process.
pub trait MemoryProbe: Send + Sync {
    /// `None` when the platform cannot report it.
    fn resident_bytes(&self) -> Option<u64>;
}

impl<F> MemoryProbe for F
where
    F: Fn() -> Option<u64> + Send + Sync,
{
    fn resident_bytes(&self) -> Option<u64> {
        self()
    }
}

/// Reads `/proc/self/statm` on Linux; reports nothing elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessMemoryProbe;

impl MemoryProbe for ProcessMemoryProbe {
    #[cfg(target_os = "linux")]
    fn resident_bytes(&self) -> Option<u64> {
        let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
        let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
        // SAFETY: sysconf has no preconditions.
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        let page_size = u64::try_from(page_size).ok().filter(|size| *size > 0)?;
        Some(resident_pages.saturating_mul(page_size))
    }

    #[cfg(not(target_os = "linux"))]
    fn resident_bytes(&self) -> Option<u64> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskSpaceCheck {
    pub ok: bool,
    /// `None` when free space could not be determined; the check then passes.
    pub available_bytes: Option<u64>,
    pub required_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryCheck {
    pub used_bytes: Option<u64>,
    pub threshold_exceeded: bool,
}

/// 開檔前的大小分級。 / Size class used before opening a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSizeClass {
    Normal,
    /// Above the warning threshold; the caller decides whether to proceed.
    Large,
    /// Above the hard threshold; opening needs explicit confirmation.
    Huge,
}

#[derive(Clone)]
pub struct ResourceGuard {
    fs: Arc<dyn FileSystem>,
    memory: Arc<dyn MemoryProbe>,
    limits: ResourceLimits,
}

impl fmt::Debug for ResourceGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceGuard")
            .field("fs", &self.fs)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl ResourceGuard {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        memory: Arc<dyn MemoryProbe>,
        limits: ResourceLimits,
    ) -> Self {
        Self { fs, memory, limits }
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    pub fn file_system(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    /// 目標磁碟區的可用空間需大於需求加安全餘量。 / Passes when free space covers `required_bytes` plus the safety margin.
    pub fn check_disk_space(&self, path: &Path, required_bytes: u64) -> DiskSpaceCheck {
        let needed = required_bytes.saturating_add(self.limits.disk_safety_margin_bytes);
        match self.fs.available_space(path) {
            Ok(available) => {
                let ok = available >= needed;
                if !ok {
                    debug!(
                        path = %path.display(),
                        available,
                        needed,
                        "insufficient disk space"
                    );
                }
                DiskSpaceCheck {
                    ok,
                    available_bytes: Some(available),
                    required_bytes: needed,
                }
            }
            Err(err) => {
                debug!(path = %path.display(), error = %err, "free space unknown");
                DiskSpaceCheck {
                    ok: true,
                    available_bytes: None,
                    required_bytes: needed,
                }
            }
        }
    }

    pub fn check_file_permissions(&self, path: &Path) -> FileAccess {
        self.fs.access(path)
    }

    /// 超過警告門檻時回傳 `true`（僅為警告）。 / `true` above the large-file threshold; a warning, not a failure.
    pub fn check_file_size_warning(&self, size_bytes: u64) -> bool {
        size_bytes > self.limits.large_file_bytes
    }

    pub fn classify_file_size(&self, size_bytes: u64) -> FileSizeClass {
        if size_bytes > self.limits.huge_file_bytes {
            FileSizeClass::Huge
        } else if self.check_file_size_warning(size_bytes) {
            FileSizeClass::Large
        } else {
            FileSizeClass::Normal
        }
    }

    pub fn check_memory_usage(&self) -> MemoryCheck {
        let used_bytes = self.memory.resident_bytes();
        let threshold_exceeded =
            used_bytes.is_some_and(|used| used > self.limits.memory_threshold_bytes);
        if threshold_exceeded {
            debug!(?used_bytes, limit = self.limits.memory_threshold_bytes, "memory threshold exceeded");
        }
        MemoryCheck {
            used_bytes,
            threshold_exceeded,
        }
    }
}

/// 將位元組格式化為人類可讀字串。 / Formats a byte count for messages.
pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let value = bytes as f64;
    if value >= KB * KB * KB {
        format!("{:.1} GB", value / (KB * KB * KB))
    } else if value >= KB * KB {
        format!("{:.1} MB", value / (KB * KB))
    } else if value >= KB {
        format!("{:.1} KB", value / KB)
    } else {
        format!("{bytes} bytes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryFileSystem;

    fn guard(fs: Arc<MemoryFileSystem>, resident: Option<u64>) -> ResourceGuard {
        ResourceGuard::new(
            fs,
            Arc::new(move || resident),
            ResourceLimits {
                large_file_bytes: 100,
                huge_file_bytes: 1_000,
                memory_threshold_bytes: 500,
                disk_safety_margin_bytes: 10,
            },
        )
    }

    #[test]
    fn disk_space_includes_safety_margin() {
        let fs = Arc::new(MemoryFileSystem::new());
        fs.set_available_space(100);
        let guard = guard(fs, None);

        let ok = guard.check_disk_space(Path::new("/s.json"), 90);
        assert!(ok.ok);
        assert_eq!(ok.available_bytes, Some(100));

        let short = guard.check_disk_space(Path::new("/s.json"), 91);
        assert!(!short.ok);
        assert_eq!(short.required_bytes, 101);
    }

    #[test]
    fn file_size_thresholds() {
        let guard = guard(Arc::new(MemoryFileSystem::new()), None);
        assert!(!guard.check_file_size_warning(100));
        assert!(guard.check_file_size_warning(101));
        assert_eq!(guard.classify_file_size(50), FileSizeClass::Normal);
        assert_eq!(guard.classify_file_size(500), FileSizeClass::Large);
        assert_eq!(guard.classify_file_size(5_000), FileSizeClass::Huge);
    }

    #[test]
    fn memory_check_reports_threshold() {
        let fs = Arc::new(MemoryFileSystem::new());
        assert!(guard(Arc::clone(&fs), Some(501)).check_memory_usage().threshold_exceeded);
        assert!(!guard(Arc::clone(&fs), Some(500)).check_memory_usage().threshold_exceeded);
        let unknown = guard(fs, None).check_memory_usage();
        assert_eq!(unknown.used_bytes, None);
        assert!(!unknown.threshold_exceeded);
    }

    #[test]
    fn permissions_report_missing_files_distinctly() {
        let fs = Arc::new(MemoryFileSystem::new());
        fs.insert("/present.txt", "x");
        let guard = guard(fs, None);
        assert!(!guard.check_file_permissions(Path::new("/absent.txt")).exists());
        assert!(guard.check_file_permissions(Path::new("/present.txt")).readable());
    }

    #[test]
    fn sizes_format_like_the_status_bar() {
        assert_eq!(format_size(512), "512 bytes");
        assert_eq!(format_size(50 * MIB), "50.0 MB");
    }
}
