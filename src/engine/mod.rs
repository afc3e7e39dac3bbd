use std::sync::Arc;

use log::{debug, info, warn};
use tokio::task::JoinHandle;

use crate::config::UpdaterConfig;
use crate::download::{DownloadHandle, ReleaseDownloader};
use crate::engine::models::UpgradeDecision;
use crate::engine::sink::EventSink;
use crate::engine::state::{DownloadOutcome, UserAction};
use crate::env;
use crate::error::UpdateError;
use crate::networking::NetworkClient;
use crate::process::InstallerLauncher;
use crate::updater::ManifestFetcher;

pub mod models;
pub mod sink;
pub mod state;

/// Front door of the update subsystem.
///
/// Owns the fetch and download workers and turns [`UserAction`]s into work.
/// Results only ever reach the caller through the registered [`EventSink`].
pub struct UpdateEngine {
    config: UpdaterConfig,
    fetcher: ManifestFetcher,
    downloader: ReleaseDownloader,
    active_download: Option<DownloadHandle>,
}

impl UpdateEngine {
    pub fn new(
        config: UpdaterConfig,
        sink: Arc<dyn EventSink>,
        launcher: Arc<dyn InstallerLauncher>,
    ) -> Result<Self, UpdateError> {
        config.validate()?;
        let network = NetworkClient::new(config.connect_timeout());
        let fetcher = ManifestFetcher::new(
            network.clone(),
            sink.clone(),
            config.current_version_code,
            config.manifest_timeout(),
        );
        let downloader = ReleaseDownloader::new(
            network,
            sink,
            launcher,
            env::installer_path(&config.installer_file_name),
            config.chunk_size,
        );
        Ok(Self {
            config,
            fetcher,
            downloader,
            active_download: None,
        })
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    /// Kick off the automatic check if the configuration asks for one.
    pub fn startup(&mut self) -> Option<JoinHandle<Option<UpgradeDecision>>> {
        if !self.config.check_on_startup {
            debug!("engine: startup check disabled");
            return None;
        }
        Some(self.check_for_updates(false))
    }

    /// Must be called from within a tokio runtime.
    pub fn handle_action(&mut self, action: UserAction) {
        match action {
            UserAction::CheckForUpdates { user_initiated } => {
                info!("action: CheckForUpdates (user initiated: {user_initiated})");
                // Detached; the decision arrives through the sink.
                let _ = self.check_for_updates(user_initiated);
            }
            UserAction::InstallUpdate(record) => {
                info!("action: InstallUpdate {}", record.version_name);
                if self.download_active() {
                    warn!("action: InstallUpdate ignored; a download is already running");
                    return;
                }
                self.active_download = Some(self.downloader.start(record));
            }
            UserAction::CancelDownload => match &self.active_download {
                Some(handle) => {
                    warn!("action: CancelDownload");
                    ReleaseDownloader::cancel(handle);
                }
                None => debug!("action: CancelDownload with no active download"),
            },
        }
    }

    fn check_for_updates(&self, user_initiated: bool) -> JoinHandle<Option<UpgradeDecision>> {
        self.fetcher
            .spawn(self.config.manifest_url.clone(), user_initiated)
    }

    /// Whether a download session has been started and not yet finished.
    ///
    /// Every session writes the same installer path, so only one may run.
    pub fn download_active(&self) -> bool {
        self.active_download
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Wait for the current download, if any, and return its outcome.
    pub async fn wait_for_download(&mut self) -> Option<DownloadOutcome> {
        let handle = self.active_download.take()?;
        Some(handle.wait().await)
    }
}
