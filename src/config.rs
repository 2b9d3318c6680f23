use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ResetError, Result};
use crate::patch::atomic_write;
use crate::platform::Platform;

/// One section of the path configuration. Keys mirror the on-disk names;
/// unset keys are omitted from the file.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sqlite_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine_id_path: Option<String>,
}

impl PathsSection {
    pub fn get(&self, key: &str) -> Option<&str> {
        match key {
            "cursor_path" => self.cursor_path.as_deref(),
            "storage_path" => self.storage_path.as_deref(),
            "sqlite_path" => self.sqlite_path.as_deref(),
            "machine_id_path" => self.machine_id_path.as_deref(),
            _ => None,
        }
    }

    pub fn set(&mut self, key: &str, value: String) {
        match key {
            "cursor_path" => self.cursor_path = Some(value),
            "storage_path" => self.storage_path = Some(value),
            "sqlite_path" => self.sqlite_path = Some(value),
            "machine_id_path" => self.machine_id_path = Some(value),
            _ => {}
        }
    }
}

/// Persisted path configuration, partitioned by platform section so one file
/// can travel between machines. Constructed once at startup and passed into
/// each component; repeated runs skip searching when the cached paths still
/// qualify.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "WindowsPaths")]
    pub windows: PathsSection,
    #[serde(rename = "MacPaths")]
    pub mac: PathsSection,
    #[serde(rename = "LinuxPaths")]
    pub linux: PathsSection,
}

impl Config {
    /// Default location: `<Documents>/.cursor-reset/config.toml`.
    pub fn default_path(platform: Platform) -> Result<PathBuf> {
        let documents = platform
            .documents_dir()
            .ok_or_else(|| ResetError::NotFound("user documents directory".to_string()))?;
        Ok(documents.join(".cursor-reset").join("config.toml"))
    }

    /// Loads the config file, creating it with best-guess defaults for the
    /// current platform when it does not exist yet.
    pub fn load_or_init(platform: Platform, path: &Path) -> Result<Config> {
        if path.exists() {
            let text = fs::read_to_string(path)?;
            return toml::from_str(&text)
                .map_err(|e| ResetError::InvalidFormat(format!("{}: {e}", path.display())));
        }

        let mut config = Config::default();
        config.populate_defaults(platform);
        config.save(path)?;
        log::debug!("created config with defaults at {}", path.display());
        Ok(config)
    }

    /// Fills the current platform's section with the first existing install
    /// candidate (or the first candidate as a placeholder) plus the default
    /// store paths.
    fn populate_defaults(&mut self, platform: Platform) {
        let candidates = platform.app_root_candidates();
        let root = candidates
            .iter()
            .find(|p| p.exists())
            .or_else(|| candidates.first());
        let section = self.section_mut(platform);
        if let Some(root) = root {
            section.cursor_path = Some(root.to_string_lossy().into_owned());
        }
        if let Some(p) = platform.default_document_store() {
            section.storage_path = Some(p.to_string_lossy().into_owned());
        }
        if let Some(p) = platform.default_kv_store() {
            section.sqlite_path = Some(p.to_string_lossy().into_owned());
        }
        if let Some(p) = platform.default_machine_id_file() {
            section.machine_id_path = Some(p.to_string_lossy().into_owned());
        }
    }

    pub fn section(&self, platform: Platform) -> &PathsSection {
        match platform {
            Platform::Windows => &self.windows,
            Platform::MacOs => &self.mac,
            Platform::Linux => &self.linux,
        }
    }

    pub fn section_mut(&mut self, platform: Platform) -> &mut PathsSection {
        match platform {
            Platform::Windows => &mut self.windows,
            Platform::MacOs => &mut self.mac,
            Platform::Linux => &mut self.linux,
        }
    }

    /// Rewrites the whole file through a sibling temp file and atomic rename,
    /// so a crash mid-write never truncates the config.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self)
            .map_err(|e| ResetError::Config(e.to_string()))?;
        atomic_write(path, text.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_created_with_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = Config::load_or_init(Platform::Linux, &path).unwrap();
        assert!(path.exists());
        // Linux defaults always derive from a home directory.
        assert!(config.section(Platform::Linux).storage_path.is_some());
    }

    #[test]
    fn sections_round_trip_by_their_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config
            .section_mut(Platform::Windows)
            .set("cursor_path", "C:\\cursor\\resources\\app".to_string());
        config.save(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("[WindowsPaths]"));

        let reloaded = Config::load_or_init(Platform::Windows, &path).unwrap();
        assert_eq!(
            reloaded.section(Platform::Windows).get("cursor_path"),
            Some("C:\\cursor\\resources\\app")
        );
    }

    #[test]
    fn unknown_key_is_ignored_by_set() {
        let mut section = PathsSection::default();
        section.set("no_such_key", "value".to_string());
        assert!(section.get("no_such_key").is_none());
    }

    #[test]
    fn malformed_file_is_invalid_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "not [valid toml").unwrap();
        let err = Config::load_or_init(Platform::Linux, &path).unwrap_err();
        assert!(matches!(err, ResetError::InvalidFormat(_)));
    }
}
