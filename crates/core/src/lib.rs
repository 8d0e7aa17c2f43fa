//! 多分頁編輯器核心：文件、分頁、資源檢查與錯誤路由。 / Multi-tab editor core: documents, tabs, resource checks and failure routing.

pub mod codec;
pub mod document;
pub mod events;
pub mod fs;
pub mod memory_fs;
pub mod report;
pub mod resource;
pub mod snapshot;
pub mod tabs;

pub use codec::{CodecError, DecodedText, LineEnding, TextEncoding, TextFormat};
pub use document::{Document, DocumentError, DocumentId, DocumentStats, LineColumn};
pub use events::{EditorEvent, EventBus, TabContext, TabId};
pub use fs::{FileAccess, FileSystem, StdFileSystem};
pub use memory_fs::MemoryFileSystem;
pub use report::{ErrorReporter, Failure, FailureKind, FileOperation, Policy, Report};
pub use resource::{
    format_size, DiskSpaceCheck, FileSizeClass, MemoryCheck, MemoryProbe, ProcessMemoryProbe,
    ResourceGuard, ResourceLimits, MIB,
};
pub use snapshot::{now_unix_ms, SessionData, SessionTab, SESSION_FORMAT_VERSION};
pub use tabs::{normalize_path, CloseDecision, OpenOutcome, TabError, TabRegistry};
