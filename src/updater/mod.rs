use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use tokio::task::JoinHandle;

use crate::engine::models::UpgradeDecision;
use crate::engine::sink::EventSink;
use crate::engine::state::UpdateEvent;
use crate::manifest;
use crate::networking::NetworkClient;

/// Downloads the update manifest and decides whether to offer an upgrade.
#[derive(Clone)]
pub struct ManifestFetcher {
    network: NetworkClient,
    sink: Arc<dyn EventSink>,
    current_version_code: i64,
    timeout: Duration,
}

impl ManifestFetcher {
    pub fn new(
        network: NetworkClient,
        sink: Arc<dyn EventSink>,
        current_version_code: i64,
        timeout: Duration,
    ) -> Self {
        Self {
            network,
            sink,
            current_version_code,
            timeout,
        }
    }

    /// Run [`fetch`](Self::fetch) on its own worker task.
    pub fn spawn(
        &self,
        manifest_url: String,
        is_user_initiated: bool,
    ) -> JoinHandle<Option<UpgradeDecision>> {
        let fetcher = self.clone();
        tokio::spawn(async move { fetcher.fetch(&manifest_url, is_user_initiated).await })
    }

    /// Check `manifest_url` for a newer release.
    ///
    /// Emits exactly one event: `UpgradeDecision` when the manifest was
    /// retrieved (even if no line parsed), `FetchFailed` otherwise. Returns
    /// `None` on transport failure.
    pub async fn fetch(&self, manifest_url: &str, is_user_initiated: bool) -> Option<UpgradeDecision> {
        info!(
            "updater: checking {manifest_url} (running version code {}, user initiated: {is_user_initiated})",
            self.current_version_code
        );
        let text = match self.network.fetch_text(manifest_url, self.timeout).await {
            Ok(text) => text,
            Err(err) => {
                error!("updater: couldn't download update file: {err}");
                self.sink.emit(UpdateEvent::FetchFailed {
                    message: err.to_string(),
                });
                return None;
            }
        };

        let manifest = manifest::parse_manifest(&text);
        let decision =
            UpgradeDecision::from_manifest(manifest, self.current_version_code, is_user_initiated);
        match decision.candidate() {
            Some(candidate) => info!(
                "updater: version {} ({}) available",
                candidate.version_name, candidate.version_code
            ),
            None => info!(
                "updater: up to date ({} release(s) listed)",
                decision.all_records().len()
            ),
        }
        self.sink.emit(UpdateEvent::UpgradeDecision(decision.clone()));
        Some(decision)
    }
}
