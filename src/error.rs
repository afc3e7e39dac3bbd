//! Error types for the update pipeline.
//!
//! None of these cross a worker boundary as a fault: the fetch and download
//! workers turn every variant into a status event for the sink.

use crate::engine::state::FailureKind;

/// Errors raised while checking for, downloading or installing an update.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// Manifest host unreachable, non-2xx status or body read failure.
    #[error("manifest request failed: {0}")]
    FetchTransport(String),

    /// A manifest line did not carry all seven fields.
    #[error("malformed manifest record on line {line}: expected 7 fields, found {fields}")]
    ManifestRecordMalformed {
        /// 1-based line number within the manifest document.
        line: usize,
        /// Number of `;`-separated fields found on the line.
        fields: usize,
    },

    /// The payload stream or the destination file could not be opened.
    #[error("failed to open download: {0}")]
    DownloadOpen(String),

    /// Read or write failure in the middle of a transfer.
    #[error("download I/O error: {0}")]
    DownloadIo(String),

    /// The downloaded file does not hash to the advertised checksum.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// The caller raised the cancellation flag.
    #[error("download cancelled")]
    Cancelled,

    /// The OS refused to start the verified installer.
    #[error("failed to launch installer: {0}")]
    Launch(#[source] std::io::Error),

    /// Invalid updater configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl UpdateError {
    /// Kind reported in a `DownloadFailed` event for this error.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            UpdateError::ChecksumMismatch { .. } => FailureKind::Checksum,
            _ => FailureKind::Io,
        }
    }
}
