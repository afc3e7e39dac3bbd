use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::env;
use crate::error::UpdateError;

pub const DEFAULT_MANIFEST_URL: &str = "http://digitalsquid.co.uk/download/droidpad/win-update.upd";
/// Transfer granularity; also bounds how long a cancel request can go unnoticed.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    pub manifest_url: String,
    pub current_version_code: i64,
    pub installer_file_name: String,
    pub chunk_size: usize,
    pub connect_timeout_secs: u64,
    pub manifest_timeout_secs: u64,
    pub check_on_startup: bool,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            manifest_url: DEFAULT_MANIFEST_URL.to_owned(),
            current_version_code: build_version_code(),
            installer_file_name: env::DEFAULT_INSTALLER_FILE.to_owned(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            connect_timeout_secs: 10,
            manifest_timeout_secs: 30,
            check_on_startup: true,
        }
    }
}

impl UpdaterConfig {
    /// Load `updater.json` from the app dir, falling back to defaults.
    pub fn load() -> Self {
        Self::load_from(&env::config_path())
    }

    pub fn load_from(path: &Path) -> Self {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("config: {} not found, using defaults", path.display());
                return Self::default();
            }
            Err(err) => {
                warn!("config: failed to read {}: {err}; using defaults", path.display());
                return Self::default();
            }
        };
        serde_json::from_str(&contents).unwrap_or_else(|err| {
            warn!("config: {} parse error: {err}; using defaults", path.display());
            Self::default()
        })
    }

    pub fn validate(&self) -> Result<(), UpdateError> {
        if self.chunk_size == 0 {
            return Err(UpdateError::Config("chunk_size must be greater than 0".into()));
        }
        if self.manifest_url.trim().is_empty() {
            return Err(UpdateError::Config("manifest_url is empty".into()));
        }
        if self.installer_file_name.trim().is_empty() {
            return Err(UpdateError::Config("installer_file_name is empty".into()));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn manifest_timeout(&self) -> Duration {
        Duration::from_secs(self.manifest_timeout_secs)
    }
}

/// Version code of this build: `major * 10000 + minor * 100 + patch`.
pub fn build_version_code() -> i64 {
    let part = |value: &str| value.parse::<i64>().unwrap_or(0);
    part(env!("CARGO_PKG_VERSION_MAJOR")) * 10_000
        + part(env!("CARGO_PKG_VERSION_MINOR")) * 100
        + part(env!("CARGO_PKG_VERSION_PATCH"))
}
