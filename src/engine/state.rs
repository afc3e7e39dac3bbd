use std::path::PathBuf;

use serde::Serialize;

use crate::engine::models::{ReleaseRecord, UpgradeDecision};

// Everything the update workers tell the outside world.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum UpdateEvent {
    UpgradeDecision(UpgradeDecision),
    FetchFailed {
        message: String,
    },
    DownloadStarted {
        version_name: String,
    },
    /// `total_bytes == 0` means the size is unknown.
    DownloadProgress {
        bytes_transferred: u64,
        total_bytes: u64,
    },
    DownloadFailed {
        kind: FailureKind,
        message: String,
    },
    DownloadCancelled {
        bytes_transferred: u64,
    },
    DownloadSucceeded {
        installer: PathBuf,
    },
}

impl UpdateEvent {
    /// Whether this event ends a download session.
    pub fn is_download_terminal(&self) -> bool {
        matches!(
            self,
            UpdateEvent::DownloadFailed { .. }
                | UpdateEvent::DownloadCancelled { .. }
                | UpdateEvent::DownloadSucceeded { .. }
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    Io,
    Checksum,
}

impl FailureKind {
    pub fn label(self) -> &'static str {
        match self {
            FailureKind::Io => "I/O error",
            FailureKind::Checksum => "checksum mismatch",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DownloadOutcome {
    Running,
    Succeeded,
    FailedIo,
    FailedChecksum,
    Cancelled,
}

impl DownloadOutcome {
    pub fn is_terminal(self) -> bool {
        !matches!(self, DownloadOutcome::Running)
    }
}

// Actions triggered by the user (or by startup) from the front end.
#[derive(Clone, Debug)]
pub enum UserAction {
    CheckForUpdates { user_initiated: bool },
    InstallUpdate(ReleaseRecord),
    CancelDownload,
}
