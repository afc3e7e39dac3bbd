use std::path::Path;
#[cfg(not(target_os = "macos"))]
use std::process::{Command, Stdio};

use log::{debug, info};

use crate::error::UpdateError;

/// Hands a verified installer over to the operating system.
pub trait InstallerLauncher: Send + Sync {
    /// Start the installer and return without waiting for it.
    fn launch(&self, installer: &Path) -> Result<(), UpdateError>;
}

#[derive(Clone, Default)]
pub struct ProcessLauncher;

impl ProcessLauncher {
    pub fn new() -> Self {
        Self
    }
}

impl InstallerLauncher for ProcessLauncher {
    fn launch(&self, installer: &Path) -> Result<(), UpdateError> {
        info!("launch: starting installer {}", installer.display());

        #[cfg(target_os = "macos")]
        {
            // .pkg / .dmg payloads go through the default handler.
            open::that_detached(installer).map_err(UpdateError::Launch)?;
            debug!("launch: handed {} to the default opener", installer.display());
        }

        #[cfg(not(target_os = "macos"))]
        {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(installer, std::fs::Permissions::from_mode(0o755))
                    .map_err(UpdateError::Launch)?;
            }

            let mut cmd = Command::new(installer);
            if let Some(dir) = installer.parent() {
                cmd.current_dir(dir);
            }
            cmd.stdin(Stdio::null());
            cmd.stdout(Stdio::null());
            cmd.stderr(Stdio::null());

            #[cfg(target_os = "windows")]
            {
                use std::os::windows::process::CommandExt;
                // CREATE_NO_WINDOW | DETACHED_PROCESS
                cmd.creation_flags(0x08000000 | 0x00000008);
            }

            let child = cmd.spawn().map_err(UpdateError::Launch)?;
            debug!("launch: installer pid {}", child.id());
        }

        info!("launch: installer started");
        Ok(())
    }
}
