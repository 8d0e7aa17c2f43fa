//! 錯誤分類與路由。 / Failure classification and routing.
//!
//! [`ErrorReporter`] performs no recovery. It decides how loudly a failure
//! should surface, logs it, keeps a short history and forwards it to event
//! subscribers.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::events::{EditorEvent, EventBus};

const HISTORY_LIMIT: usize = 256;

/// 失敗分類。 / Failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Creating,
    ReadFailure,
    WriteFailure,
    PermissionDenied,
    InsufficientDiskSpace,
    MemoryPressure,
    UnsavedChanges,
    /// Informational: resolved by activating the existing tab.
    DuplicateTab,
    FileTooLarge,
}

/// 失敗發生時正在進行的操作。 / Operation in progress when the failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileOperation {
    Opening,
    Saving,
    Creating,
    Deleting,
    Closing,
    Autosaving,
    ShutdownFlush,
    Restoring,
}

impl FileOperation {
    fn verb(self) -> &'static str {
        match self {
            FileOperation::Opening => "open",
            FileOperation::Saving => "save",
            FileOperation::Creating => "create",
            FileOperation::Deleting => "delete",
            FileOperation::Closing => "close",
            FileOperation::Autosaving => "autosave",
            FileOperation::ShutdownFlush => "write the final session for",
            FileOperation::Restoring => "restore",
        }
    }

    fn is_write(self) -> bool {
        matches!(
            self,
            FileOperation::Saving
                | FileOperation::Creating
                | FileOperation::Deleting
                | FileOperation::Autosaving
                | FileOperation::ShutdownFlush
        )
    }
}

/// 呈現給使用者的方式。 / How a failure reaches the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    BlockAndPrompt,
    WarnAndContinue,
    LogOnly,
}

/// 結構化的失敗值。 / Structured failure handed to the reporter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub operation: FileOperation,
    pub path: Option<PathBuf>,
    pub detail: Option<String>,
}

impl Failure {
    pub fn new(kind: FailureKind, operation: FileOperation) -> Self {
        Self {
            kind,
            operation,
            path: None,
            detail: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// 將 I/O 錯誤對應到失敗分類。 / Classifies an I/O error raised during `operation`.
    ///
    /// A missing file carries no detail; the not-found message says it all.
    pub fn from_io(operation: FileOperation, path: Option<&Path>, err: &io::Error) -> Self {
        let kind = classify_io(operation, err);
        let failure = Self::new(kind, operation);
        let failure = if kind == FailureKind::ReadFailure && err.kind() == io::ErrorKind::NotFound {
            failure
        } else {
            failure.with_detail(err.to_string())
        };
        match path {
            Some(path) => failure.with_path(path),
            None => failure,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} while {:?}", self.kind, self.operation)?;
        if let Some(path) = &self.path {
            write!(f, " ({})", path.display())?;
        }
        if let Some(detail) = &self.detail {
            write!(f, ": {detail}")?;
        }
        Ok(())
    }
}

const ENOSPC: i32 = 28;

pub fn classify_io(operation: FileOperation, err: &io::Error) -> FailureKind {
    match err.kind() {
        io::ErrorKind::PermissionDenied => return FailureKind::PermissionDenied,
        io::ErrorKind::OutOfMemory => return FailureKind::MemoryPressure,
        _ => {}
    }
    if err.raw_os_error() == Some(ENOSPC) {
        return FailureKind::InsufficientDiskSpace;
    }
    let message = err.to_string().to_lowercase();
    if message.contains("no space") || message.contains("disk full") {
        FailureKind::InsufficientDiskSpace
    } else if message.contains("permission") || message.contains("access denied") {
        FailureKind::PermissionDenied
    } else if message.contains("out of memory") {
        FailureKind::MemoryPressure
    } else if operation.is_write() {
        FailureKind::WriteFailure
    } else {
        FailureKind::ReadFailure
    }
}

/// 分類後的結果，附帶訊息與建議。 / A routed failure with its policy and user-facing text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub failure: Failure,
    pub policy: Policy,
    pub message: String,
    pub suggestion: Option<&'static str>,
}

pub fn policy_for(failure: &Failure) -> Policy {
    match (failure.kind, failure.operation) {
        (_, FileOperation::ShutdownFlush) => Policy::LogOnly,
        (FailureKind::UnsavedChanges, _) => Policy::BlockAndPrompt,
        (FailureKind::DuplicateTab, _) => Policy::LogOnly,
        (_, FileOperation::Autosaving | FileOperation::Restoring) => Policy::WarnAndContinue,
        (FailureKind::MemoryPressure | FailureKind::FileTooLarge, _) => Policy::WarnAndContinue,
        _ => Policy::BlockAndPrompt,
    }
}

pub fn suggestion_for(kind: FailureKind) -> Option<&'static str> {
    match kind {
        FailureKind::ReadFailure => Some("Check the file path and ensure the file exists."),
        FailureKind::PermissionDenied => {
            Some("Check file permissions or try running as administrator.")
        }
        FailureKind::InsufficientDiskSpace => {
            Some("Free up disk space by deleting unnecessary files.")
        }
        FailureKind::FileTooLarge => {
            Some("Try opening the file with a different application designed for large files.")
        }
        FailureKind::MemoryPressure => Some("Close other applications to free up memory."),
        FailureKind::UnsavedChanges => Some("Save or discard the changes before closing."),
        FailureKind::Creating | FailureKind::WriteFailure | FailureKind::DuplicateTab => None,
    }
}

fn message_for(failure: &Failure) -> String {
    let target = failure
        .path
        .as_deref()
        .and_then(Path::file_name)
        .map(|name| format!("the file '{}'", name.to_string_lossy()))
        .unwrap_or_else(|| "the session".to_string());
    let mut message = match failure.kind {
        FailureKind::UnsavedChanges => format!("{} has unsaved changes.", capitalize(&target)),
        FailureKind::DuplicateTab => format!("{} is already open.", capitalize(&target)),
        _ => format!("Failed to {} {target}.", failure.operation.verb()),
    };
    let reason = match failure.kind {
        FailureKind::ReadFailure if failure.detail.is_none() => {
            Some("The file was not found. It may have been moved, renamed, or deleted.")
        }
        FailureKind::ReadFailure => Some("The file could not be read."),
        FailureKind::PermissionDenied => {
            Some("Access denied. You don't have the necessary permissions.")
        }
        FailureKind::InsufficientDiskSpace => {
            Some("The disk is full. Free up some space and try again.")
        }
        FailureKind::FileTooLarge => Some("The file is too large for this operation."),
        FailureKind::MemoryPressure => Some("Not enough memory available for this operation."),
        _ => None,
    };
    if let Some(reason) = reason {
        message.push(' ');
        message.push_str(reason);
    }
    let show_detail = reason.is_none() || failure.kind == FailureKind::ReadFailure;
    if let Some(detail) = failure.detail.as_ref().filter(|_| show_detail) {
        message.push_str(&format!(" System error: {detail}"));
    }
    message
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// 錯誤路由器。 / Routes failures to logs, history and event subscribers.
#[derive(Debug, Clone)]
pub struct ErrorReporter {
    bus: EventBus,
    history: Arc<Mutex<VecDeque<Report>>>,
}

impl ErrorReporter {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            history: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn report(&self, failure: Failure) -> Report {
        let policy = policy_for(&failure);
        let report = Report {
            message: message_for(&failure),
            suggestion: suggestion_for(failure.kind),
            policy,
            failure,
        };
        let path = report
            .failure
            .path
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let kind = report.failure.kind;
        let operation = report.failure.operation;
        match (policy, kind) {
            (_, FailureKind::DuplicateTab) => info!(?operation, %path, "tab already open"),
            (Policy::LogOnly, _) => error!(?kind, ?operation, %path, message = %report.message),
            (Policy::WarnAndContinue, _) => warn!(?kind, ?operation, %path, message = %report.message),
            (Policy::BlockAndPrompt, _) => info!(?kind, ?operation, %path, message = %report.message),
        }

        {
            let mut history = self.history.lock();
            if history.len() == HISTORY_LIMIT {
                history.pop_front();
            }
            history.push_back(report.clone());
        }
        self.bus.emit(EditorEvent::Failure(report.clone()));
        report
    }

    pub fn history(&self) -> Vec<Report> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn count(&self, kind: FailureKind) -> usize {
        self.history
            .lock()
            .iter()
            .filter(|report| report.failure.kind == kind)
            .count()
    }

    pub fn clear(&self) {
        self.history.lock().clear();
    }
}
