//! 分頁登錄表：擁有所有開啟中的文件。 / Tab registry: sole owner of every open document.
//!
//! All mutations are expected on one control thread. The registry keeps two
//! invariants after every operation: the active index is valid unless the
//! registry is empty, and no two tabs share a file path.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::codec::{self, CodecError, DecodedText};
use crate::document::{Document, DocumentError};
use crate::events::{EditorEvent, EventBus, TabContext, TabId};
use crate::report::FailureKind;
use crate::snapshot::{SessionData, SessionTab};

/// 關閉已修改分頁時呼叫端的決定。 / What the caller decided about unsaved changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDecision {
    /// No decision yet; dirty tabs raise a confirmation request.
    Prompt,
    Discard,
    /// The caller saved first; a tab that is still dirty is refused.
    SaveFirst,
}

#[derive(Debug, Error)]
pub enum TabError {
    #[error("no open tab with id {0}")]
    NotFound(TabId),
    #[error("{} tab(s) have unsaved changes", .0.len())]
    UnsavedChanges(Vec<TabId>),
    #[error("failed to read {}: {source}", path.display())]
    ReadFailure {
        path: PathBuf,
        #[source]
        source: CodecError,
    },
    #[error("{} is already open in {existing}", path.display())]
    DuplicatePath { path: PathBuf, existing: TabId },
    #[error(transparent)]
    Edit(#[from] DocumentError),
}

impl TabError {
    pub fn classify(&self) -> FailureKind {
        match self {
            TabError::NotFound(_) | TabError::ReadFailure { .. } => FailureKind::ReadFailure,
            TabError::UnsavedChanges(_) => FailureKind::UnsavedChanges,
            TabError::DuplicatePath { .. } => FailureKind::DuplicateTab,
            TabError::Edit(_) => FailureKind::WriteFailure,
        }
    }
}

/// 開啟檔案的結果；路徑已開啟時回傳既有分頁。 / Result of opening a path; an already-open path yields the existing tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOutcome {
    pub id: TabId,
    pub already_open: bool,
}

#[derive(Debug)]
pub struct TabRegistry {
    tabs: Vec<Document>,
    active: Option<usize>,
    bus: EventBus,
}

impl TabRegistry {
    pub fn new(bus: EventBus) -> Self {
        Self {
            tabs: Vec::new(),
            active: None,
            bus,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    /// Tab ids in display order.
    pub fn tab_ids(&self) -> Vec<TabId> {
        self.tabs.iter().map(Document::id).collect()
    }

    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.tabs.iter()
    }

    pub fn get(&self, id: TabId) -> Option<&Document> {
        self.tabs.iter().find(|doc| doc.id() == id)
    }

    pub fn position(&self, id: TabId) -> Option<usize> {
        self.tabs.iter().position(|doc| doc.id() == id)
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    pub fn active_id(&self) -> Option<TabId> {
        self.active.map(|idx| self.tabs[idx].id())
    }

    /// 目前分頁的唯讀檢視。 / Read-only view of the active document.
    pub fn current_editor(&self) -> Option<&Document> {
        self.active.and_then(|idx| self.tabs.get(idx))
    }

    pub fn find_by_path(&self, path: &Path) -> Option<TabId> {
        let wanted = normalize_path(path);
        self.tabs
            .iter()
            .find(|doc| doc.path() == Some(wanted.as_path()))
            .map(Document::id)
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.tabs.iter().any(Document::is_dirty)
    }

    pub fn dirty_tabs(&self) -> Vec<TabId> {
        self.tabs
            .iter()
            .filter(|doc| doc.is_dirty())
            .map(Document::id)
            .collect()
    }

    /// 新增分頁並設為目前分頁。 / Appends a new untitled tab and makes it active.
    pub fn create_tab(&mut self, initial_content: Option<&str>) -> TabId {
        let doc = match initial_content {
            Some(text) => Document::with_content(text),
            None => Document::new(),
        };
        self.push_and_activate(doc)
    }

    /// 開啟檔案；同一路徑已開啟時只切換到該分頁。 / Opens `path` from raw bytes, or activates the tab already showing it.
    pub fn open_tab(&mut self, path: &Path, bytes: &[u8]) -> Result<OpenOutcome, TabError> {
        if let Some(id) = self.find_by_path(path) {
            debug!(tab = %id, path = %path.display(), "path already open");
            self.activate(id)?;
            return Ok(OpenOutcome {
                id,
                already_open: true,
            });
        }
        let decoded = codec::decode(bytes).map_err(|source| TabError::ReadFailure {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(self.open_decoded(path, decoded))
    }

    /// Same as [`Self::open_tab`] for content that has already been decoded.
    pub fn open_decoded(&mut self, path: &Path, decoded: DecodedText) -> OpenOutcome {
        if let Some(id) = self.find_by_path(path) {
            self.set_active(self.position(id));
            return OpenOutcome {
                id,
                already_open: true,
            };
        }
        let id = self.push_and_activate(Document::loaded(normalize_path(path), decoded));
        OpenOutcome {
            id,
            already_open: false,
        }
    }

    /// 接收已建立的文件（工作階段還原用）。 / Takes ownership of a freshly built document, e.g. during restoration.
    pub fn adopt(&mut self, doc: Document) -> Result<TabId, TabError> {
        if let Some(path) = doc.path() {
            if let Some(existing) = self.find_by_path(path) {
                return Err(TabError::DuplicatePath {
                    path: path.to_path_buf(),
                    existing,
                });
            }
        }
        Ok(self.push_and_activate(doc))
    }

    pub fn activate(&mut self, id: TabId) -> Result<(), TabError> {
        let idx = self.position(id).ok_or(TabError::NotFound(id))?;
        self.set_active(Some(idx));
        Ok(())
    }

    /// 將分頁移到新位置；目前分頁跟著移動。 / Explicit reorder. The active tab follows its document.
    pub fn move_tab(&mut self, id: TabId, to: usize) -> Result<(), TabError> {
        let from = self.position(id).ok_or(TabError::NotFound(id))?;
        let active = self.active_id();
        let doc = self.tabs.remove(from);
        let to = to.min(self.tabs.len());
        self.tabs.insert(to, doc);
        self.active = active.and_then(|id| self.position(id));
        Ok(())
    }

    pub fn close_tab(&mut self, id: TabId, decision: CloseDecision) -> Result<(), TabError> {
        if self.position(id).is_none() {
            return Err(TabError::NotFound(id));
        }
        self.close_set(vec![id], decision)
    }

    /// 關閉全部分頁；未強制時一次回報所有未儲存分頁。 / Closes everything. Without `force`, every dirty tab is reported in one error.
    pub fn close_all_tabs(&mut self, force: bool) -> Result<(), TabError> {
        let decision = if force {
            CloseDecision::Discard
        } else {
            CloseDecision::Prompt
        };
        self.close_set(self.tab_ids(), decision)
    }

    pub fn close_other_tabs(&mut self, keep: TabId, decision: CloseDecision) -> Result<(), TabError> {
        if self.position(keep).is_none() {
            return Err(TabError::NotFound(keep));
        }
        let doomed = self
            .tab_ids()
            .into_iter()
            .filter(|id| *id != keep)
            .collect();
        self.close_set(doomed, decision)?;
        self.activate(keep)
    }

    pub fn close_tabs_to_right(&mut self, anchor: TabId, decision: CloseDecision) -> Result<(), TabError> {
        let idx = self.position(anchor).ok_or(TabError::NotFound(anchor))?;
        let doomed = self.tabs[idx + 1..].iter().map(Document::id).collect();
        self.close_set(doomed, decision)
    }

    /// 對單一文件執行修改並發出對應事件。 / Runs a mutation against one document and raises the matching events.
    pub fn with_document_mut<R>(
        &mut self,
        id: TabId,
        mutate: impl FnOnce(&mut Document) -> R,
    ) -> Result<R, TabError> {
        let idx = self.position(id).ok_or(TabError::NotFound(id))?;
        let doc = &mut self.tabs[idx];
        let (was_dirty, old_cursor) = (doc.is_dirty(), doc.cursor());
        let result = mutate(doc);
        let (dirty, cursor, line_column) = (doc.is_dirty(), doc.cursor(), doc.line_column());
        if dirty != was_dirty {
            self.bus.emit(EditorEvent::DirtyChanged { tab: id, dirty });
        }
        if cursor != old_cursor {
            self.bus.emit(EditorEvent::CursorPositionChanged {
                tab: id,
                position: cursor,
                line_column,
            });
        }
        Ok(result)
    }

    pub fn insert_text(&mut self, id: TabId, text: &str) -> Result<(), TabError> {
        self.with_document_mut(id, |doc| doc.insert_text(text))
    }

    pub fn set_cursor(&mut self, id: TabId, offset: usize) -> Result<usize, TabError> {
        self.with_document_mut(id, |doc| doc.set_cursor(offset))
    }

    /// 儲存完成：記錄路徑並清除修改旗標。 / Save completion for `id`; refuses a path already shown by another tab.
    pub fn mark_saved(&mut self, id: TabId, path: &Path) -> Result<(), TabError> {
        let path = normalize_path(path);
        if let Some(existing) = self.find_by_path(&path).filter(|other| *other != id) {
            return Err(TabError::DuplicatePath { path, existing });
        }
        self.with_document_mut(id, |doc| doc.mark_saved(path))
    }

    /// 發出右鍵選單事件並回傳分頁狀態。 / Raises a context-menu event carrying the tab's current state.
    pub fn context_menu_request(&self, id: TabId) -> Result<TabContext, TabError> {
        let index = self.position(id).ok_or(TabError::NotFound(id))?;
        let doc = &self.tabs[index];
        let context = TabContext {
            tab: id,
            index,
            title: doc.display_title(),
            path: doc.path().map(Path::to_path_buf),
            is_dirty: doc.is_dirty(),
            is_active: self.active == Some(index),
            tabs_to_right: self.tabs.len() - index - 1,
            total_tabs: self.tabs.len(),
        };
        self.bus.emit(EditorEvent::ContextMenuRequested(context.clone()));
        Ok(context)
    }

    /// 取得所有分頁的時間點複本。 / Point-in-time copy of every tab, taken on the control thread.
    pub fn snapshot(&self) -> SessionData {
        SessionData::new(
            self.tabs.iter().map(SessionTab::capture).collect(),
            self.active,
        )
    }

    fn push_and_activate(&mut self, doc: Document) -> TabId {
        let id = doc.id();
        self.tabs.push(doc);
        self.bus.emit(EditorEvent::TabOpened(id));
        self.set_active(Some(self.tabs.len() - 1));
        id
    }

    fn set_active(&mut self, idx: Option<usize>) {
        let previous = self.active_id();
        self.active = idx;
        let current = self.active_id();
        if current != previous {
            self.bus.emit(EditorEvent::CurrentEditorChanged(current));
        }
    }

    fn close_set(&mut self, doomed: Vec<TabId>, decision: CloseDecision) -> Result<(), TabError> {
        if decision != CloseDecision::Discard {
            let blocked: Vec<TabId> = doomed
                .iter()
                .copied()
                .filter(|id| self.get(*id).is_some_and(Document::is_dirty))
                .collect();
            if !blocked.is_empty() {
                if decision == CloseDecision::Prompt {
                    for id in &blocked {
                        self.bus.emit(EditorEvent::CloseRequiresConfirmation(*id));
                    }
                }
                return Err(TabError::UnsavedChanges(blocked));
            }
        }
        if doomed.is_empty() {
            return Ok(());
        }

        let previous = self.active_id();
        let next = match self.active {
            Some(pos) if doomed.contains(&self.tabs[pos].id()) => {
                let survivor = |doc: &&Document| !doomed.contains(&doc.id());
                self.tabs[pos + 1..]
                    .iter()
                    .find(survivor)
                    .or_else(|| self.tabs[..pos].iter().rev().find(survivor))
                    .map(Document::id)
            }
            _ => previous,
        };

        self.tabs.retain(|doc| !doomed.contains(&doc.id()));
        for id in &doomed {
            debug!(tab = %id, "tab closed");
            self.bus.emit(EditorEvent::TabClosed(*id));
        }
        self.active = next.and_then(|id| self.position(id));
        if self.active_id() != previous {
            self.bus.emit(EditorEvent::CurrentEditorChanged(self.active_id()));
        }
        Ok(())
    }
}

/// 以詞法方式轉為絕對路徑並去除 `.`／`..`。 / Lexically absolute form used for duplicate detection.
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}
