use std::io;
use std::path::PathBuf;

use multipad_core::report::classify_io;
use multipad_core::{DocumentError, Failure, FailureKind, FileOperation, TabError, TabId};
use thiserror::Error;

use crate::store::SessionState;

/// 工作階段層的錯誤。 / Errors raised by session persistence and the editor context.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        operation: FileOperation,
        #[source]
        source: io::Error,
    },
    #[error("invalid session payload in {}: {source}", path.display())]
    InvalidPayload {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize session: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("operation not allowed while the session is {0:?}")]
    InvalidState(SessionState),
    #[error("{0} has no file path yet")]
    NoPath(TabId),
    /// A resource preflight refused the operation; the failure was already reported.
    #[error("{0}")]
    Refused(Failure),
    #[error(transparent)]
    Tab(#[from] TabError),
    #[error(transparent)]
    Document(#[from] DocumentError),
}

impl SessionError {
    pub fn classify(&self) -> FailureKind {
        match self {
            SessionError::Io {
                operation, source, ..
            } => classify_io(*operation, source),
            SessionError::InvalidPayload { .. } => FailureKind::ReadFailure,
            SessionError::Serialize(_) | SessionError::Document(_) => FailureKind::WriteFailure,
            SessionError::InvalidState(_) => FailureKind::Creating,
            SessionError::NoPath(_) => FailureKind::WriteFailure,
            SessionError::Refused(failure) => failure.kind,
            SessionError::Tab(err) => err.classify(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn io_errors_classify_by_their_operation() {
        let read = SessionError::Io {
            path: PathBuf::from("/data/session.json"),
            operation: FileOperation::Restoring,
            source: io::Error::new(io::ErrorKind::NotFound, "gone"),
        };
        assert_eq!(read.classify(), FailureKind::ReadFailure);

        let write = SessionError::Io {
            path: PathBuf::from("/data/session.json"),
            operation: FileOperation::Autosaving,
            source: io::Error::new(io::ErrorKind::NotFound, "gone"),
        };
        assert_eq!(write.classify(), FailureKind::WriteFailure);

        let denied = SessionError::Io {
            path: PathBuf::from("/docs/a.txt"),
            operation: FileOperation::Opening,
            source: io::Error::new(io::ErrorKind::PermissionDenied, "nope"),
        };
        assert_eq!(denied.classify(), FailureKind::PermissionDenied);
    }
}
