//! 核心對 UI 層發出的事件。 / Notifications raised by the core to the surrounding UI layer.

use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::document::{DocumentId, LineColumn};
use crate::report::Report;
use crate::snapshot::SessionData;

/// 分頁識別碼即文件識別碼。 / A tab is identified by the document it hosts.
pub type TabId = DocumentId;

/// 右鍵選單所需的分頁狀態。 / Tab state carried by a context-menu request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabContext {
    pub tab: TabId,
    pub index: usize,
    pub title: String,
    pub path: Option<PathBuf>,
    pub is_dirty: bool,
    pub is_active: bool,
    pub tabs_to_right: usize,
    pub total_tabs: usize,
}

#[derive(Debug, Clone)]
pub enum EditorEvent {
    /// Active tab changed, including as a side effect of closing one. `None` once empty.
    CurrentEditorChanged(Option<TabId>),
    CursorPositionChanged {
        tab: TabId,
        position: usize,
        line_column: LineColumn,
    },
    CloseRequiresConfirmation(TabId),
    RecoveryAvailable(SessionData),
    TabOpened(TabId),
    TabClosed(TabId),
    DirtyChanged {
        tab: TabId,
        dirty: bool,
    },
    ContextMenuRequested(TabContext),
    Failure(Report),
}

/// 事件匯流排：以 channel 廣播給所有訂閱者。 / Fans events out to every subscriber over mpsc channels.
///
/// Subscribers whose receiver has been dropped are pruned on the next emit.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Sender<EditorEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<EditorEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn emit(&self, event: EditorEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
