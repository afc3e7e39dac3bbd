use serde::{Deserialize, Serialize};

/// One version advertised by the update manifest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRecord {
    pub version_code: i64,
    pub version_name: String,
    pub download_url: String,
    /// Expected payload size; 0 when the manifest does not know it.
    pub size_bytes: u64,
    pub display_name: String,
    pub comment: String,
    /// Hex digest the downloaded installer must match.
    pub checksum: String,
}

/// Records parsed from one manifest fetch, in document order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub records: Vec<ReleaseRecord>,
    /// 1-based line numbers that were skipped as malformed.
    pub malformed_lines: Vec<usize>,
}

/// Outcome of a single update check. Built once, never mutated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UpgradeDecision {
    available: bool,
    candidate: Option<ReleaseRecord>,
    all_records: Vec<ReleaseRecord>,
    is_user_initiated: bool,
}

impl UpgradeDecision {
    /// Select an upgrade candidate from `manifest` for the running `current_version_code`.
    pub fn from_manifest(
        manifest: Manifest,
        current_version_code: i64,
        is_user_initiated: bool,
    ) -> Self {
        let candidate = crate::manifest::select_candidate(&manifest.records, current_version_code)
            .cloned();
        Self {
            available: candidate.is_some(),
            candidate,
            all_records: manifest.records,
            is_user_initiated,
        }
    }

    pub fn available(&self) -> bool {
        self.available
    }

    pub fn candidate(&self) -> Option<&ReleaseRecord> {
        self.candidate.as_ref()
    }

    pub fn all_records(&self) -> &[ReleaseRecord] {
        &self.all_records
    }

    pub fn is_user_initiated(&self) -> bool {
        self.is_user_initiated
    }

    /// Automatic startup checks stay quiet unless there is something to offer.
    pub fn should_notify(&self) -> bool {
        self.available || self.is_user_initiated
    }
}
