use std::env;
use std::path::PathBuf;

use crate::error::{ResetError, Result};
use crate::identity::IdentitySet;

/// Platform adapter, selected once at startup. Covers the three capabilities
/// that differ per OS: locating install paths, locating the machine-id file,
/// and updating the system-level identity store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
}

/// Outcome of a system-identity update; Linux models no system store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemUpdate {
    Applied,
    Skipped,
}

impl Platform {
    pub fn current() -> Result<Platform> {
        if cfg!(windows) {
            Ok(Platform::Windows)
        } else if cfg!(target_os = "macos") {
            Ok(Platform::MacOs)
        } else if cfg!(target_os = "linux") {
            Ok(Platform::Linux)
        } else {
            Err(ResetError::Unsupported(env::consts::OS.to_string()))
        }
    }

    pub fn config_section(&self) -> &'static str {
        match self {
            Platform::Windows => "WindowsPaths",
            Platform::MacOs => "MacPaths",
            Platform::Linux => "LinuxPaths",
        }
    }

    /// Home directory of the invoking user. Under sudo on Linux the reset
    /// must still target the real user's profile, not /root.
    pub fn home_dir(&self) -> Option<PathBuf> {
        if *self == Platform::Linux {
            if let Ok(user) = env::var("SUDO_USER") {
                return Some(PathBuf::from("/home").join(user));
            }
        }
        dirs::home_dir()
    }

    pub fn documents_dir(&self) -> Option<PathBuf> {
        if *self == Platform::Linux && env::var("SUDO_USER").is_ok() {
            return self.home_dir().map(|h| h.join("Documents"));
        }
        dirs::document_dir().or_else(|| self.home_dir().map(|h| h.join("Documents")))
    }

    /// Ordered candidate install roots, known directories first, then glob
    /// expansion for extracted self-contained archives (Linux AppImages).
    pub fn app_root_candidates(&self) -> Vec<PathBuf> {
        match self {
            Platform::Windows => {
                let mut v = Vec::new();
                if let Ok(local) = env::var("LOCALAPPDATA") {
                    v.push(
                        PathBuf::from(local)
                            .join("Programs")
                            .join("Cursor")
                            .join("resources")
                            .join("app"),
                    );
                }
                if let Some(home) = self.home_dir() {
                    v.push(home.join("Desktop").join("cursor").join("resources").join("app"));
                    v.push(
                        home.join("Desktop")
                            .join("Microsoft VS Code")
                            .join("resources")
                            .join("app"),
                    );
                }
                v
            }
            Platform::MacOs => {
                vec![PathBuf::from("/Applications/Cursor.app/Contents/Resources/app")]
            }
            Platform::Linux => {
                let mut v = vec![
                    PathBuf::from("/opt/Cursor/resources/app"),
                    PathBuf::from("/usr/share/cursor/resources/app"),
                ];
                if let Some(home) = self.home_dir() {
                    v.push(home.join(".local/share/cursor/resources/app"));
                }
                let mut patterns = vec![PathBuf::from("squashfs-root/usr/share/cursor/resources/app")];
                if let Some(home) = self.home_dir() {
                    patterns.insert(0, home.join("squashfs-root/usr/share/cursor/resources/app"));
                }
                for pattern in patterns {
                    if let Ok(paths) = glob::glob(&pattern.to_string_lossy()) {
                        v.extend(paths.flatten());
                    }
                }
                v
            }
        }
    }

    fn app_support_dir(&self) -> Option<PathBuf> {
        match self {
            Platform::Windows => env::var("APPDATA").ok().map(|p| PathBuf::from(p).join("Cursor")),
            Platform::MacOs => self
                .home_dir()
                .map(|h| h.join("Library").join("Application Support").join("Cursor")),
            Platform::Linux => self.home_dir().map(|h| h.join(".config").join("cursor")),
        }
    }

    pub fn default_document_store(&self) -> Option<PathBuf> {
        self.app_support_dir()
            .map(|d| d.join("User").join("globalStorage").join("storage.json"))
    }

    pub fn default_kv_store(&self) -> Option<PathBuf> {
        self.app_support_dir()
            .map(|d| d.join("User").join("globalStorage").join("state.vscdb"))
    }

    pub fn default_machine_id_file(&self) -> Option<PathBuf> {
        match self {
            Platform::Windows => self.app_support_dir().map(|d| d.join("machineId")),
            Platform::MacOs => self.app_support_dir().map(|d| d.join("machineId")),
            Platform::Linux => self.app_support_dir().map(|d| d.join("machineid")),
        }
    }

    /// Relative path of the workbench script inside an install root.
    pub fn workbench_rel_path(&self) -> PathBuf {
        ["out", "vs", "workbench", "workbench.desktop.main.js"]
            .iter()
            .collect()
    }

    /// Writes the identity set into the platform's system identity store.
    /// Windows needs elevation and two registry values; macOS shells out to a
    /// privileged utility; Linux has no modeled system store.
    pub fn update_system_identity(&self, ids: &IdentitySet) -> Result<SystemUpdate> {
        match self {
            Platform::Windows => update_windows_identity(ids),
            Platform::MacOs => update_macos_identity(ids),
            Platform::Linux => Ok(SystemUpdate::Skipped),
        }
    }
}

// Sets HKLM\SOFTWARE\Microsoft\Cryptography\MachineGuid and
// HKLM\SOFTWARE\Microsoft\SQMClient\MachineId (created if absent), through
// the 64-bit registry view.
#[cfg(windows)]
fn update_windows_identity(ids: &IdentitySet) -> Result<SystemUpdate> {
    use winreg::enums::{HKEY_LOCAL_MACHINE, KEY_WOW64_64KEY, KEY_WRITE};
    use winreg::RegKey;

    let as_permission = |e: std::io::Error, what: &str| {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            ResetError::PermissionDenied(format!("{what} (run as administrator)"))
        } else {
            ResetError::Io(e)
        }
    };

    let hklm = RegKey::predef(HKEY_LOCAL_MACHINE);

    let crypto = hklm
        .open_subkey_with_flags("SOFTWARE\\Microsoft\\Cryptography", KEY_WRITE | KEY_WOW64_64KEY)
        .map_err(|e| as_permission(e, "open Cryptography key"))?;
    crypto
        .set_value("MachineGuid", &ids.dev_device_id)
        .map_err(|e| as_permission(e, "set MachineGuid"))?;

    let (sqm, _) = hklm
        .create_subkey_with_flags("SOFTWARE\\Microsoft\\SQMClient", KEY_WRITE | KEY_WOW64_64KEY)
        .map_err(|e| as_permission(e, "open SQMClient key"))?;
    sqm.set_value("MachineId", &ids.sqm_id)
        .map_err(|e| as_permission(e, "set MachineId"))?;

    Ok(SystemUpdate::Applied)
}

#[cfg(not(windows))]
fn update_windows_identity(_ids: &IdentitySet) -> Result<SystemUpdate> {
    Err(ResetError::Unsupported(
        "windows registry update on a non-windows host".to_string(),
    ))
}

// Replaces the UUID property in the platform-uuid plist via plutil. The
// utility needs root, so it goes through sudo; a missing plist means there is
// nothing to rewrite.
fn update_macos_identity(ids: &IdentitySet) -> Result<SystemUpdate> {
    use std::process::Command;

    let plist = "/var/root/Library/Preferences/SystemConfiguration/com.apple.platform.uuid.plist";
    if !std::path::Path::new(plist).exists() {
        return Ok(SystemUpdate::Skipped);
    }

    let status = Command::new("sudo")
        .args(["plutil", "-replace", "UUID", "-string", &ids.mac_machine_id, plist])
        .status()?;
    if !status.success() {
        return Err(ResetError::ModifyFailed(format!(
            "plutil exited with {status}"
        )));
    }
    Ok(SystemUpdate::Applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_platform_resolves_on_supported_hosts() {
        let platform = Platform::current().unwrap();
        assert!(matches!(
            platform,
            Platform::Windows | Platform::MacOs | Platform::Linux
        ));
    }

    #[test]
    fn config_sections_match_file_format() {
        assert_eq!(Platform::Windows.config_section(), "WindowsPaths");
        assert_eq!(Platform::MacOs.config_section(), "MacPaths");
        assert_eq!(Platform::Linux.config_section(), "LinuxPaths");
    }

    #[test]
    fn linux_has_no_system_identity_store() {
        let ids = IdentitySet::generate();
        let outcome = Platform::Linux.update_system_identity(&ids).unwrap();
        assert_eq!(outcome, SystemUpdate::Skipped);
    }

    #[test]
    fn workbench_path_nests_under_out() {
        let rel = Platform::Linux.workbench_rel_path();
        assert!(rel.ends_with("workbench.desktop.main.js"));
        assert!(rel.starts_with("out"));
    }
}
