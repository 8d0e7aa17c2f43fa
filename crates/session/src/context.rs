//! 編輯器的單一擁有者：分頁、工作階段、資源檢查與錯誤回報。 / The one owner of tabs, session, resource guard and reporter.
//!
//! UI layers drive everything through [`EditorContext`] on one control thread
//! and observe results through the event bus.

use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use multipad_core::{
    CloseDecision, EditorEvent, ErrorReporter, EventBus, Failure, FailureKind, FileOperation,
    FileSizeClass, FileSystem, MemoryProbe, OpenOutcome, ResourceGuard, TabError, TabId,
    TabRegistry,
};
use multipad_settings::{AppPaths, Preferences, RecentFiles, RecentFilesStore};
use tracing::{info, warn};

use crate::error::SessionError;
use crate::store::{
    AutosaveOutcome, PriorSession, RestoreSummary, SaveAllSummary, SessionConfig, SessionStore,
    ShutdownReport,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryChoice {
    Recover,
    Discard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LargeFileConfirmation {
    #[default]
    NotConfirmed,
    Confirmed,
}

#[derive(Debug)]
pub struct EditorContext {
    registry: TabRegistry,
    store: SessionStore,
    guard: ResourceGuard,
    reporter: ErrorReporter,
    bus: EventBus,
    recent: RecentFilesStore,
}

impl EditorContext {
    pub fn new(
        preferences: &Preferences,
        paths: &AppPaths,
        fs: Arc<dyn FileSystem>,
        memory: Arc<dyn MemoryProbe>,
    ) -> Self {
        let limit = preferences.session.recent_files_limit;
        let recent = match RecentFilesStore::load(paths.recent_files_file(), limit, Arc::clone(&fs)) {
            Ok(mut store) => {
                if store.history().capacity() != limit {
                    if let Err(err) = store.set_capacity(limit) {
                        warn!(error = %err, "recent files list not resized");
                    }
                }
                store
            }
            Err(err) => {
                warn!(error = %err, "recent files list unreadable; starting empty");
                RecentFilesStore::in_memory(limit)
            }
        };
        let guard = ResourceGuard::new(fs, memory, preferences.limits.to_resource_limits());
        Self::with_parts(
            paths.session_file(),
            paths.autosave_file(),
            guard,
            SessionConfig::from(&preferences.session),
        )
        .with_recent_files(recent)
    }

    pub fn with_parts(
        session_path: impl Into<PathBuf>,
        autosave_path: impl Into<PathBuf>,
        guard: ResourceGuard,
        config: SessionConfig,
    ) -> Self {
        let bus = EventBus::new();
        let reporter = ErrorReporter::new(bus.clone());
        let store = SessionStore::new(
            session_path,
            autosave_path,
            guard.clone(),
            reporter.clone(),
            bus.clone(),
            config,
        );
        Self {
            registry: TabRegistry::new(bus.clone()),
            store,
            guard,
            reporter,
            bus,
            recent: RecentFilesStore::in_memory(multipad_settings::DEFAULT_RECENT_CAPACITY),
        }
    }

    /// Replaces the in-memory recent-files list with a persisted one.
    pub fn with_recent_files(mut self, recent: RecentFilesStore) -> Self {
        self.recent = recent;
        self
    }

    pub fn subscribe(&self) -> Receiver<EditorEvent> {
        self.bus.subscribe()
    }

    pub fn registry(&self) -> &TabRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut TabRegistry {
        &mut self.registry
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn reporter(&self) -> &ErrorReporter {
        &self.reporter
    }

    pub fn guard(&self) -> &ResourceGuard {
        &self.guard
    }

    pub fn recent_files(&self) -> &RecentFiles {
        self.recent.history()
    }

    /// 讀取上次的工作階段；當機時會發出 `RecoveryAvailable`。 / First startup step.
    pub fn open_session(&mut self) -> Result<PriorSession, SessionError> {
        self.store.open()
    }

    /// 依使用者選擇還原或捨棄，然後進入 Active。 / Applies the recovery choice, then activates the session.
    ///
    /// The choice only matters after a crash; a clean previous session is
    /// reopened according to the restore preference.
    pub fn resume(
        &mut self,
        prior: &PriorSession,
        choice: RecoveryChoice,
    ) -> Result<RestoreSummary, SessionError> {
        let summary = if prior.is_crash() && choice == RecoveryChoice::Discard {
            self.store.discard_recovery()?;
            RestoreSummary::default()
        } else {
            self.store.restore(&mut self.registry, prior)?
        };
        for path in &summary.skipped {
            self.forget_recent(path);
        }
        self.store.activate(&self.registry)?;
        Ok(summary)
    }

    /// Convenience for callers that decide the recovery choice up front.
    pub fn start(&mut self, choice: RecoveryChoice) -> Result<RestoreSummary, SessionError> {
        let prior = self.open_session()?;
        self.resume(&prior, choice)
    }

    pub fn new_tab(&mut self, initial_content: Option<&str>) -> TabId {
        self.registry.create_tab(initial_content)
    }

    /// 在目前分頁輸入；沒有分頁時先建立一個。 / Types into the current tab, creating one when none is open.
    pub fn type_text(&mut self, text: &str) -> Result<TabId, SessionError> {
        let id = match self.registry.active_id() {
            Some(id) => id,
            None => self.registry.create_tab(None),
        };
        self.registry.insert_text(id, text)?;
        Ok(id)
    }

    /// 開啟檔案：重複路徑改為切換分頁，過大的檔案需確認。 / Opens a file after permission, size and memory checks.
    pub fn open_file(
        &mut self,
        path: &Path,
        confirmation: LargeFileConfirmation,
    ) -> Result<OpenOutcome, SessionError> {
        let path = multipad_core::normalize_path(path);
        if let Some(existing) = self.registry.find_by_path(&path) {
            self.registry.activate(existing)?;
            self.reporter.report(
                Failure::new(FailureKind::DuplicateTab, FileOperation::Opening).with_path(&path),
            );
            return Ok(OpenOutcome {
                id: existing,
                already_open: true,
            });
        }

        let access = self.guard.check_file_permissions(&path);
        if !access.exists() {
            self.forget_recent(&path);
            return Err(self.refuse(
                Failure::new(FailureKind::ReadFailure, FileOperation::Opening).with_path(&path),
            ));
        }
        if !access.readable() {
            return Err(self.refuse(
                Failure::new(FailureKind::PermissionDenied, FileOperation::Opening).with_path(&path),
            ));
        }

        let fs = Arc::clone(self.guard.file_system());
        let size = fs.file_size(&path).map_err(|source| {
            self.reporter.report(Failure::from_io(
                FileOperation::Opening,
                Some(path.as_path()),
                &source,
            ));
            SessionError::Io {
                path: path.clone(),
                operation: FileOperation::Opening,
                source,
            }
        })?;
        let class = self.guard.classify_file_size(size);
        let confirmed = confirmation == LargeFileConfirmation::Confirmed;
        match class {
            FileSizeClass::Huge if !confirmed => {
                return Err(self.refuse(
                    Failure::new(FailureKind::FileTooLarge, FileOperation::Opening)
                        .with_path(&path)
                        .with_detail(multipad_core::format_size(size)),
                ))
            }
            FileSizeClass::Large | FileSizeClass::Huge => {
                self.reporter.report(
                    Failure::new(FailureKind::FileTooLarge, FileOperation::Opening)
                        .with_path(&path)
                        .with_detail(multipad_core::format_size(size)),
                );
            }
            FileSizeClass::Normal => {}
        }
        if class != FileSizeClass::Normal
            && !confirmed
            && self.guard.check_memory_usage().threshold_exceeded
        {
            return Err(self.refuse(
                Failure::new(FailureKind::MemoryPressure, FileOperation::Opening).with_path(&path),
            ));
        }

        let bytes = fs.read(&path).map_err(|source| {
            self.reporter.report(Failure::from_io(
                FileOperation::Opening,
                Some(path.as_path()),
                &source,
            ));
            SessionError::Io {
                path: path.clone(),
                operation: FileOperation::Opening,
                source,
            }
        })?;
        match self.registry.open_tab(&path, &bytes) {
            Ok(outcome) => {
                info!(tab = %outcome.id, path = %path.display(), size, "file opened");
                self.remember_recent(&path);
                Ok(outcome)
            }
            Err(err) => {
                self.reporter.report(
                    Failure::new(err.classify(), FileOperation::Opening)
                        .with_path(&path)
                        .with_detail(err.to_string()),
                );
                Err(err.into())
            }
        }
    }

    pub fn save(&mut self, id: TabId) -> Result<PathBuf, SessionError> {
        let path = self.store.save_tab(&mut self.registry, id, None)?;
        self.remember_recent(&path);
        Ok(path)
    }

    pub fn save_as(&mut self, id: TabId, path: &Path) -> Result<PathBuf, SessionError> {
        let path = self.store.save_tab(&mut self.registry, id, Some(path))?;
        self.remember_recent(&path);
        Ok(path)
    }

    pub fn save_all(&mut self) -> SaveAllSummary {
        let summary = self.store.save_all(&mut self.registry);
        let saved: Vec<PathBuf> = summary
            .saved
            .iter()
            .filter_map(|id| self.registry.get(*id)?.path().map(Path::to_path_buf))
            .collect();
        for path in saved.iter().rev() {
            self.remember_recent(path);
        }
        summary
    }

    /// 關閉分頁；`SaveFirst` 會先儲存。 / Closes one tab. `SaveFirst` saves it before closing.
    pub fn close_tab(&mut self, id: TabId, decision: CloseDecision) -> Result<(), SessionError> {
        let dirty = self
            .registry
            .get(id)
            .ok_or(TabError::NotFound(id))?
            .is_dirty();
        if decision == CloseDecision::SaveFirst && dirty {
            self.save(id)?;
        }
        match self.registry.close_tab(id, decision) {
            Err(TabError::UnsavedChanges(blocked)) => {
                self.reporter.report(
                    Failure::new(FailureKind::UnsavedChanges, FileOperation::Closing)
                        .with_detail(format!("{} tab(s) have unsaved changes", blocked.len())),
                );
                Err(TabError::UnsavedChanges(blocked).into())
            }
            other => other.map_err(SessionError::from),
        }
    }

    /// 結束程式：依決定處理未儲存分頁，然後關閉工作階段。 / Quits the editor.
    ///
    /// `Prompt` refuses while anything is dirty. `SaveFirst` saves named tabs
    /// and refuses if anything is still dirty afterwards. `Discard` drops dirty
    /// untitled tabs and the edits of named ones, which reopen from disk.
    pub fn request_quit(&mut self, decision: CloseDecision) -> Result<ShutdownReport, SessionError> {
        match decision {
            CloseDecision::Prompt => self.ensure_nothing_dirty()?,
            CloseDecision::SaveFirst => {
                let summary = self.save_all();
                if let Some((_, err)) = summary.failed.into_iter().next() {
                    return Err(err);
                }
                self.ensure_nothing_dirty()?;
            }
            CloseDecision::Discard => {
                let (untitled, named): (Vec<TabId>, Vec<TabId>) = self
                    .registry
                    .dirty_tabs()
                    .into_iter()
                    .partition(|id| self.registry.get(*id).is_some_and(|doc| doc.path().is_none()));
                for id in untitled {
                    self.registry.close_tab(id, CloseDecision::Discard)?;
                }
                return self.store.shutdown_discarding(&self.registry, &named);
            }
        }
        self.store.shutdown(&self.registry)
    }

    /// 不詢問直接結束，未儲存的內容保留在最後的紀錄中。 / Quits without prompting; unsaved buffers stay in the final record and reopen dirty.
    pub fn shutdown(&mut self) -> Result<ShutdownReport, SessionError> {
        self.store.shutdown(&self.registry)
    }

    /// 處理到期的自動儲存。 / Runs due autosave work; call from the control loop.
    pub fn pump(&mut self) -> Option<AutosaveOutcome> {
        self.store.pump(&self.registry)
    }

    /// 立即執行一次自動儲存。 / Forces an autosave pass regardless of the ticker.
    pub fn autosave_now(&mut self) -> AutosaveOutcome {
        self.store.autosave_tick(&self.registry)
    }

    fn ensure_nothing_dirty(&self) -> Result<(), SessionError> {
        let dirty = self.registry.dirty_tabs();
        if dirty.is_empty() {
            return Ok(());
        }
        for id in &dirty {
            self.bus.emit(EditorEvent::CloseRequiresConfirmation(*id));
        }
        self.reporter.report(
            Failure::new(FailureKind::UnsavedChanges, FileOperation::Closing)
                .with_detail(format!("{} tab(s) have unsaved changes", dirty.len())),
        );
        Err(TabError::UnsavedChanges(dirty).into())
    }

    fn remember_recent(&mut self, path: &Path) {
        if let Err(err) = self.recent.add(path) {
            warn!(path = %path.display(), error = %err, "recent files list not updated");
        }
    }

    fn forget_recent(&mut self, path: &Path) {
        if let Err(err) = self.recent.remove(path) {
            warn!(path = %path.display(), error = %err, "recent files list not updated");
        }
    }

    fn refuse(&self, failure: Failure) -> SessionError {
        self.reporter.report(failure.clone());
        SessionError::Refused(failure)
    }
}
