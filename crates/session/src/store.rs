//! 工作階段生命週期：還原、自動儲存、手動儲存與關閉。 / Session lifecycle: restore, autosave, manual save and shutdown.
//!
//! ```text
//! Uninitialized --open--> Restoring --activate--> Active --shutdown--> ShuttingDown --> Closed
//! ```
//!
//! Activation writes the session record with `clean_shutdown = false`; only a
//! completed shutdown flips it back. A record found with the flag unset on the
//! next start means the previous run crashed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use multipad_core::{
    codec, normalize_path, Document, EditorEvent, ErrorReporter, EventBus, Failure, FailureKind,
    FileOperation, ResourceGuard, SessionData, SessionTab, TabError, TabId, TabRegistry,
};
use multipad_settings::SessionPreferences;
use tracing::{debug, info, warn};

use crate::autosave::AutosaveTicker;
use crate::error::SessionError;
use crate::slot::{SessionSlot, Slot};
use crate::writer::{PersistWriter, Ticket, WriteOutcome, WriterStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Restoring,
    Active,
    ShuttingDown,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub autosave_enabled: bool,
    pub autosave_interval: Duration,
    pub restore_on_startup: bool,
    pub shutdown_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&SessionPreferences::default())
    }
}

impl From<&SessionPreferences> for SessionConfig {
    fn from(prefs: &SessionPreferences) -> Self {
        Self {
            autosave_enabled: prefs.autosave_enabled,
            autosave_interval: prefs.autosave_interval(),
            restore_on_startup: prefs.restore_on_startup,
            shutdown_timeout: prefs.shutdown_timeout(),
        }
    }
}

/// 上次執行留下的工作階段。 / What the previous run left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PriorSession {
    None,
    CleanShutdown(SessionData),
    /// The newer of the session and autosave records of a run that never shut down cleanly.
    Crashed(SessionData),
}

impl PriorSession {
    pub fn is_crash(&self) -> bool {
        matches!(self, PriorSession::Crashed(_))
    }

    pub fn data(&self) -> Option<&SessionData> {
        match self {
            PriorSession::None => None,
            PriorSession::CleanShutdown(data) | PriorSession::Crashed(data) => Some(data),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutosaveOutcome {
    Inactive,
    NothingDirty,
    /// A resource check refused the whole pass; reported once.
    Skipped(FailureKind),
    Submitted(Ticket),
    /// Nothing is dirty any more; the record was replaced with the clean layout
    /// so drafts that were saved, closed or discarded are not offered again.
    Settled(Ticket),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    pub restored: Vec<TabId>,
    pub skipped: Vec<PathBuf>,
    pub recovered: bool,
}

#[derive(Debug, Default)]
pub struct SaveAllSummary {
    pub saved: Vec<TabId>,
    /// Dirty tabs without a path; they need a save-as target.
    pub untitled: Vec<TabId>,
    pub failed: Vec<(TabId, SessionError)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// `None` when there were no tabs and the records were cleared instead.
    pub final_write: Option<WriteOutcome>,
    pub session_cleared: bool,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        matches!(self.final_write, Some(WriteOutcome::Written)) || self.session_cleared
    }
}

#[derive(Debug)]
pub struct SessionStore {
    state: SessionState,
    writer: PersistWriter,
    guard: ResourceGuard,
    reporter: ErrorReporter,
    bus: EventBus,
    config: SessionConfig,
    ticker: Option<AutosaveTicker>,
    /// The newest crash-recovery record may still hold unsaved content.
    recovery_has_drafts: bool,
}

impl SessionStore {
    pub fn new(
        session_path: impl Into<PathBuf>,
        autosave_path: impl Into<PathBuf>,
        guard: ResourceGuard,
        reporter: ErrorReporter,
        bus: EventBus,
        config: SessionConfig,
    ) -> Self {
        let fs = Arc::clone(guard.file_system());
        let writer = PersistWriter::spawn(
            SessionSlot::new(session_path, Arc::clone(&fs)),
            SessionSlot::new(autosave_path, fs),
            reporter.clone(),
        );
        Self {
            state: SessionState::Uninitialized,
            writer,
            guard,
            reporter,
            bus,
            config,
            ticker: None,
            recovery_has_drafts: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn writer_stats(&self) -> WriterStats {
        self.writer.stats()
    }

    pub fn writer(&self) -> &PersistWriter {
        &self.writer
    }

    pub fn session_path(&self) -> &Path {
        self.writer.slot(Slot::Session).path()
    }

    pub fn autosave_path(&self) -> &Path {
        self.writer.slot(Slot::Autosave).path()
    }

    /// 讀取上次的工作階段並判斷是否當機。 / Reads what the last run left and classifies it.
    pub fn open(&mut self) -> Result<PriorSession, SessionError> {
        self.require_state(&[SessionState::Uninitialized])?;
        self.state = SessionState::Restoring;

        let session = self.load_slot(Slot::Session);
        let autosave = self.load_slot(Slot::Autosave);
        let prior = match (session, autosave) {
            (None, None) => PriorSession::None,
            (Some(session), _) if session.clean_shutdown => PriorSession::CleanShutdown(session),
            (Some(session), Some(autosave)) => {
                if autosave.saved_at_unix_ms >= session.saved_at_unix_ms {
                    PriorSession::Crashed(autosave)
                } else {
                    PriorSession::Crashed(session)
                }
            }
            (Some(data), None) | (None, Some(data)) => PriorSession::Crashed(data),
        };

        if let PriorSession::Crashed(data) = &prior {
            info!(
                tabs = data.tabs.len(),
                dirty = data.dirty_tabs().count(),
                "previous session did not shut down cleanly"
            );
            self.bus.emit(EditorEvent::RecoveryAvailable(data.clone()));
        }
        Ok(prior)
    }

    /// 將上次的分頁放回登錄表。 / Rebuilds the previous tabs as brand-new documents.
    ///
    /// After a crash, snapshot content is used verbatim and dirty flags are
    /// kept. After a clean exit, saved files are re-read from disk; untitled
    /// buffers and tabs that were still dirty come from the snapshot. With
    /// `restore_on_startup` off, only the dirty tabs of a clean exit return.
    pub fn restore(
        &mut self,
        registry: &mut TabRegistry,
        prior: &PriorSession,
    ) -> Result<RestoreSummary, SessionError> {
        self.require_state(&[SessionState::Restoring])?;
        let (data, recovered) = match prior {
            PriorSession::None => return Ok(RestoreSummary::default()),
            PriorSession::CleanShutdown(data) => (data, false),
            PriorSession::Crashed(data) => (data, true),
        };
        let reopen_saved = recovered || self.config.restore_on_startup;

        let mut summary = RestoreSummary {
            recovered,
            ..RestoreSummary::default()
        };
        let mut placed: Vec<Option<TabId>> = Vec::with_capacity(data.tabs.len());
        for tab in &data.tabs {
            if !reopen_saved && !tab.is_dirty {
                placed.push(None);
                continue;
            }
            let from_snapshot = recovered || tab.is_dirty || tab.path.is_none();
            let doc = match (from_snapshot, tab.content.as_ref(), tab.path.as_ref()) {
                (true, Some(content), _) => {
                    let doc = Document::restored(
                        tab.path.clone(),
                        content.as_str(),
                        tab.cursor,
                        tab.is_dirty,
                    );
                    Some(doc.with_format(tab.format()))
                }
                (_, _, Some(path)) => {
                    let doc = self.reload_from_disk(path, tab);
                    if doc.is_none() {
                        summary.skipped.push(path.clone());
                    }
                    doc
                }
                (_, _, None) => None,
            };
            let id = doc.and_then(|doc| match registry.adopt(doc) {
                Ok(id) => Some(id),
                Err(err) => {
                    self.reporter.report(
                        Failure::new(err.classify(), FileOperation::Restoring)
                            .with_detail(err.to_string()),
                    );
                    None
                }
            });
            summary.restored.extend(id);
            placed.push(id);
        }

        if let Some(target) = data.current_tab_index {
            let split = target.min(placed.len());
            let choice = placed[split..]
                .iter()
                .flatten()
                .next()
                .or_else(|| placed[..split].iter().rev().flatten().next());
            if let Some(id) = choice {
                registry.activate(*id)?;
            }
        }
        info!(
            restored = summary.restored.len(),
            skipped = summary.skipped.len(),
            recovered,
            "session restored"
        );
        Ok(summary)
    }

    /// 使用者放棄復原：刪除所有紀錄。 / The user declined recovery; drops every record.
    pub fn discard_recovery(&mut self) -> Result<(), SessionError> {
        self.require_state(&[SessionState::Restoring])?;
        self.clear_session()
    }

    /// 進入 Active：立即寫入 `clean_shutdown = false` 的標記。 / Enters `Active`, persisting the crash marker for the next run first.
    pub fn activate(&mut self, registry: &TabRegistry) -> Result<(), SessionError> {
        self.require_state(&[SessionState::Restoring])?;
        let marker = registry.snapshot().with_clean_shutdown(false);
        self.recovery_has_drafts = marker.dirty_tabs().next().is_some();
        if let Err(err) = self.writer.write_now(Slot::Session, &marker) {
            self.report_session_error(&err, FileOperation::Restoring, Slot::Session);
        }
        let autosave = self.writer.slot(Slot::Autosave);
        if let Err(err) = self.writer.exclusive(|| autosave.remove()) {
            debug!(error = %err, "stale autosave record left in place");
        }

        self.state = SessionState::Active;
        if self.config.autosave_enabled {
            self.ticker = Some(AutosaveTicker::start(self.config.autosave_interval));
        }
        info!(tabs = registry.len(), "session active");
        Ok(())
    }

    /// 在控制執行緒上處理到期的自動儲存。 / Runs an autosave pass if the ticker fired since the last call.
    pub fn pump(&mut self, registry: &TabRegistry) -> Option<AutosaveOutcome> {
        let due = self.ticker.as_ref().and_then(AutosaveTicker::take_due)?;
        debug!(tick = due.seq, "autosave tick");
        Some(self.autosave_tick(registry))
    }

    /// 一次自動儲存：先檢查記憶體與磁碟，通過後提交完整快照。 / One autosave pass over the whole registry.
    ///
    /// Memory and disk are checked once per pass. If either refuses, nothing
    /// is written and a single warning is reported; the next tick retries.
    /// Once nothing is dirty, the first pass overwrites the record with the
    /// clean layout and later passes do nothing.
    pub fn autosave_tick(&mut self, registry: &TabRegistry) -> AutosaveOutcome {
        if self.state != SessionState::Active {
            return AutosaveOutcome::Inactive;
        }
        if !registry.has_unsaved_changes() {
            if !self.recovery_has_drafts {
                return AutosaveOutcome::NothingDirty;
            }
            self.recovery_has_drafts = false;
            let ticket = self
                .writer
                .submit(Slot::Autosave, registry.snapshot(), FileOperation::Autosaving);
            debug!("autosave record settled with no unsaved content");
            return AutosaveOutcome::Settled(ticket);
        }

        let memory = self.guard.check_memory_usage();
        if memory.threshold_exceeded {
            let used = memory.used_bytes.map(multipad_core::format_size).unwrap_or_default();
            self.reporter.report(
                Failure::new(FailureKind::MemoryPressure, FileOperation::Autosaving)
                    .with_detail(format!("process is using {used}")),
            );
            return AutosaveOutcome::Skipped(FailureKind::MemoryPressure);
        }

        let snapshot = registry.snapshot();
        let disk = self
            .guard
            .check_disk_space(self.autosave_path(), snapshot.estimated_size());
        if !disk.ok {
            let failure = Failure::new(FailureKind::InsufficientDiskSpace, FileOperation::Autosaving)
                .with_path(self.autosave_path())
                .with_detail(describe_space(disk.available_bytes, disk.required_bytes));
            self.reporter.report(failure);
            return AutosaveOutcome::Skipped(FailureKind::InsufficientDiskSpace);
        }

        let ticket = self
            .writer
            .submit(Slot::Autosave, snapshot, FileOperation::Autosaving);
        self.recovery_has_drafts = true;
        AutosaveOutcome::Submitted(ticket)
    }

    /// 手動儲存或另存新檔。 / Manual save, or save-as when `target` is given.
    pub fn save_tab(
        &mut self,
        registry: &mut TabRegistry,
        id: TabId,
        target: Option<&Path>,
    ) -> Result<PathBuf, SessionError> {
        if self.state == SessionState::Closed {
            return Err(SessionError::InvalidState(self.state));
        }
        let doc = registry.get(id).ok_or(TabError::NotFound(id))?;
        let path = match target {
            Some(target) => normalize_path(target),
            None => doc
                .path()
                .map(Path::to_path_buf)
                .ok_or(SessionError::NoPath(id))?,
        };
        if let Some(existing) = registry.find_by_path(&path).filter(|other| *other != id) {
            return Err(TabError::DuplicatePath { path, existing }.into());
        }

        if !self.guard.check_file_permissions(&path).writable() {
            return Err(self.refuse(
                Failure::new(FailureKind::PermissionDenied, FileOperation::Saving).with_path(&path),
            ));
        }
        let bytes = match doc.encode() {
            Ok(bytes) => bytes,
            Err(err) => {
                return Err(self.refuse(
                    Failure::new(FailureKind::WriteFailure, FileOperation::Saving)
                        .with_path(&path)
                        .with_detail(err.to_string()),
                ))
            }
        };
        let disk = self.guard.check_disk_space(&path, bytes.len() as u64);
        if !disk.ok {
            return Err(self.refuse(
                Failure::new(FailureKind::InsufficientDiskSpace, FileOperation::Saving)
                    .with_path(&path)
                    .with_detail(describe_space(disk.available_bytes, disk.required_bytes)),
            ));
        }

        let fs = Arc::clone(self.guard.file_system());
        self.writer
            .exclusive(|| fs.write_atomic(&path, &bytes))
            .map_err(|source| {
                self.reporter.report(Failure::from_io(
                    FileOperation::Saving,
                    Some(path.as_path()),
                    &source,
                ));
                SessionError::Io {
                    path: path.clone(),
                    operation: FileOperation::Saving,
                    source,
                }
            })?;
        registry.mark_saved(id, &path)?;
        info!(tab = %id, path = %path.display(), bytes = bytes.len(), "document saved");

        if let Err(err) = self.clear_autosave_content(&[(id, path.clone())]) {
            warn!(tab = %id, error = %err, "autosave record not trimmed after save");
        }
        Ok(path)
    }

    /// 儲存所有已命名且有修改的分頁。 / Saves every dirty tab that has a path.
    pub fn save_all(&mut self, registry: &mut TabRegistry) -> SaveAllSummary {
        let mut summary = SaveAllSummary::default();
        for id in registry.dirty_tabs() {
            if registry.get(id).and_then(Document::path).is_none() {
                summary.untitled.push(id);
                continue;
            }
            match self.save_tab(registry, id, None) {
                Ok(_) => summary.saved.push(id),
                Err(err) => summary.failed.push((id, err)),
            }
        }
        summary
    }

    /// 刪除工作階段與自動儲存紀錄。 / Deletes both persisted records, cancelling anything still queued.
    pub fn clear_session(&self) -> Result<(), SessionError> {
        self.writer.cancel_pending(Slot::Session);
        self.writer.cancel_pending(Slot::Autosave);
        self.writer.exclusive(|| {
            self.writer.slot(Slot::Session).remove()?;
            self.writer.slot(Slot::Autosave).remove()
        })?;
        info!("session records cleared");
        Ok(())
    }

    /// 只清除已儲存分頁的自動儲存內容。 / Drops autosaved content for the given saved tabs only.
    ///
    /// Other tabs keep their unsaved content. The record disappears once no
    /// tab in it carries unsaved content.
    pub fn clear_autosave_content(&self, saved: &[(TabId, PathBuf)]) -> Result<(), SessionError> {
        let saved: Vec<(u64, PathBuf)> = saved
            .iter()
            .map(|(id, path)| (id.get(), path.clone()))
            .collect();
        self.writer.modify_pending(Slot::Autosave, |data| {
            data.forget_saved_content(&saved);
        });
        let slot = self.writer.slot(Slot::Autosave);
        self.writer.exclusive(|| {
            let Some(mut record) = slot.load()? else {
                return Ok(());
            };
            if record.forget_saved_content(&saved) {
                slot.save(&record)
            } else {
                slot.remove()
            }
        })
    }

    /// 關閉：取消待寫的自動儲存，寫入 `clean_shutdown = true`，逾時則放棄。 / Graceful quit.
    ///
    /// Pending autosaves are cancelled and the final record is written with
    /// `clean_shutdown = true`, waiting at most the configured timeout. A
    /// failed or late final write is logged and shutdown completes anyway.
    /// Dirty tabs keep their content in the record and come back dirty.
    pub fn shutdown(&mut self, registry: &TabRegistry) -> Result<ShutdownReport, SessionError> {
        self.shutdown_discarding(registry, &[])
    }

    /// 關閉並捨棄指定分頁的修改；已命名的分頁下次從磁碟重新開啟。 / Shutdown that drops the edits of `discarded` tabs.
    pub fn shutdown_discarding(
        &mut self,
        registry: &TabRegistry,
        discarded: &[TabId],
    ) -> Result<ShutdownReport, SessionError> {
        self.require_state(&[SessionState::Active, SessionState::Restoring])?;
        self.state = SessionState::ShuttingDown;
        if let Some(mut ticker) = self.ticker.take() {
            ticker.stop();
        }
        self.writer.cancel_pending(Slot::Autosave);

        let report = if registry.is_empty() {
            let cleared = match self.clear_session() {
                Ok(()) => true,
                Err(err) => {
                    self.report_session_error(&err, FileOperation::ShutdownFlush, Slot::Session);
                    false
                }
            };
            ShutdownReport {
                final_write: None,
                session_cleared: cleared,
            }
        } else {
            let mut data = registry.snapshot().with_clean_shutdown(true);
            let reverted: Vec<(u64, PathBuf)> = discarded
                .iter()
                .filter_map(|id| {
                    let path = registry.get(*id)?.path()?.to_path_buf();
                    Some((id.get(), path))
                })
                .collect();
            data.forget_saved_content(&reverted);
            let ticket = self
                .writer
                .submit(Slot::Session, data, FileOperation::ShutdownFlush);
            let outcome = self.writer.wait(ticket, self.config.shutdown_timeout);
            match &outcome {
                WriteOutcome::Written => {
                    let autosave = self.writer.slot(Slot::Autosave);
                    if let Err(err) = self.writer.exclusive(|| autosave.remove()) {
                        debug!(error = %err, "autosave record left after clean shutdown");
                    }
                }
                WriteOutcome::Failed(_) => {}
                WriteOutcome::TimedOut | WriteOutcome::Cancelled => {
                    self.reporter.report(
                        Failure::new(FailureKind::WriteFailure, FileOperation::ShutdownFlush)
                            .with_path(self.session_path())
                            .with_detail(format!(
                                "final session write did not finish within {:?}",
                                self.config.shutdown_timeout
                            )),
                    );
                }
            }
            ShutdownReport {
                final_write: Some(outcome),
                session_cleared: false,
            }
        };

        self.state = SessionState::Closed;
        info!(clean = report.is_clean(), "session closed");
        Ok(report)
    }

    fn require_state(&self, allowed: &[SessionState]) -> Result<(), SessionError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SessionError::InvalidState(self.state))
        }
    }

    fn refuse(&self, failure: Failure) -> SessionError {
        self.reporter.report(failure.clone());
        SessionError::Refused(failure)
    }

    fn load_slot(&self, slot: Slot) -> Option<SessionData> {
        match self.writer.slot(slot).load() {
            Ok(data) => data,
            Err(err) => {
                self.report_session_error(&err, FileOperation::Restoring, slot);
                None
            }
        }
    }

    fn report_session_error(&self, err: &SessionError, operation: FileOperation, slot: Slot) {
        let failure = match err {
            SessionError::Io { path, source, .. } => {
                Failure::from_io(operation, Some(path.as_path()), source)
            }
            other => Failure::new(other.classify(), operation)
                .with_path(self.writer.slot(slot).path())
                .with_detail(other.to_string()),
        };
        self.reporter.report(failure);
    }

    fn reload_from_disk(&self, path: &Path, tab: &SessionTab) -> Option<Document> {
        let bytes = match self.guard.file_system().read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.reporter
                    .report(Failure::from_io(FileOperation::Restoring, Some(path), &err));
                return None;
            }
        };
        match codec::decode(&bytes) {
            Ok(decoded) => {
                let mut doc = Document::loaded(path, decoded);
                doc.set_cursor(tab.cursor);
                Some(doc)
            }
            Err(err) => {
                self.reporter.report(
                    Failure::new(FailureKind::ReadFailure, FileOperation::Restoring)
                        .with_path(path)
                        .with_detail(err.to_string()),
                );
                None
            }
        }
    }
}

fn describe_space(available: Option<u64>, required: u64) -> String {
    match available {
        Some(available) => format!(
            "{} available, {} required",
            multipad_core::format_size(available),
            multipad_core::format_size(required)
        ),
        None => format!("{} required", multipad_core::format_size(required)),
    }
}
