use std::env;
use std::path::PathBuf;

#[cfg(target_os = "windows")]
pub const DEFAULT_INSTALLER_FILE: &str = "droidpad-update.exe";
#[cfg(not(target_os = "windows"))]
pub const DEFAULT_INSTALLER_FILE: &str = "droidpad-update";

const CONFIG_FILE: &str = "updater.json";

/// Returns the per-user directory DroidPad keeps its settings in.
pub fn default_app_dir() -> PathBuf {
    let base = match env::consts::OS {
        "windows" => env::var_os("LOCALAPPDATA")
            .or_else(|| env::var_os("APPDATA"))
            .map(PathBuf::from),
        "macos" => env::var_os("HOME")
            .map(PathBuf::from)
            .map(|home| home.join("Library").join("Application Support")),
        _ => env::var_os("HOME")
            .map(PathBuf::from)
            .map(|home| home.join(".local").join("share")),
    }
    .unwrap_or_else(|| PathBuf::from("."));

    base.join("droidpad")
}

pub fn config_path() -> PathBuf {
    default_app_dir().join(CONFIG_FILE)
}

/// Fixed download target under the platform temp dir.
///
/// Every session writes the same path, so only one download may run at a time.
pub fn installer_path(file_name: &str) -> PathBuf {
    env::temp_dir().join(file_name)
}
