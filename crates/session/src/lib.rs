//! 工作階段持久化與編輯器上下文。 / Session persistence and the editor context.

pub mod autosave;
pub mod context;
pub mod error;
pub mod slot;
pub mod store;
pub mod writer;

pub use autosave::{AutosaveTick, AutosaveTicker, CancellationToken};
pub use context::{EditorContext, LargeFileConfirmation, RecoveryChoice};
pub use error::SessionError;
pub use slot::{SessionSlot, Slot};
pub use store::{
    AutosaveOutcome, PriorSession, RestoreSummary, SaveAllSummary, SessionConfig, SessionState,
    SessionStore, ShutdownReport,
};
pub use writer::{PersistWriter, Ticket, WriteOutcome, WriterStats};
