//! Update acquisition for the DroidPad desktop client.
//!
//! [`updater::ManifestFetcher`] decides whether a newer build exists,
//! [`download::ReleaseDownloader`] fetches, verifies and launches its
//! installer, and [`engine::UpdateEngine`] ties both to a front end through
//! an [`engine::sink::EventSink`].

pub mod config;
pub mod download;
pub mod engine;
pub mod env;
pub mod error;
pub mod manifest;
pub mod networking;
pub mod process;
pub mod updater;
pub mod util;

pub use config::UpdaterConfig;
pub use download::{DownloadHandle, DownloadSession, ReleaseDownloader};
pub use engine::UpdateEngine;
pub use engine::models::{Manifest, ReleaseRecord, UpgradeDecision};
pub use engine::sink::EventSink;
pub use engine::state::{DownloadOutcome, FailureKind, UpdateEvent, UserAction};
pub use error::UpdateError;
pub use process::{InstallerLauncher, ProcessLauncher};
pub use updater::ManifestFetcher;
