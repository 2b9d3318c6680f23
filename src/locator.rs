use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{ResetError, Result};
use crate::platform::Platform;

/// What kind of path is being resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathRole {
    AppRoot,
    MachineIdFile,
    DocumentStore,
    KvStore,
}

impl PathRole {
    pub fn config_key(&self) -> &'static str {
        match self {
            PathRole::AppRoot => "cursor_path",
            PathRole::MachineIdFile => "machine_id_path",
            PathRole::DocumentStore => "storage_path",
            PathRole::KvStore => "sqlite_path",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathSource {
    Configured,
    Discovered,
    Default,
}

#[derive(Debug, Clone)]
pub struct InstallationPath {
    pub role: PathRole,
    pub value: PathBuf,
    pub source: PathSource,
}

/// Finds the installation's paths, checking the cached/configured location
/// before the platform's known candidates, and writes discoveries back into
/// the config so repeated runs skip the search.
pub struct InstallationLocator<'a> {
    platform: Platform,
    config: &'a mut Config,
    config_path: PathBuf,
}

impl<'a> InstallationLocator<'a> {
    pub fn new(platform: Platform, config: &'a mut Config, config_path: PathBuf) -> Self {
        InstallationLocator {
            platform,
            config,
            config_path,
        }
    }

    pub fn resolve(&mut self, role: PathRole) -> Result<InstallationPath> {
        if role == PathRole::MachineIdFile {
            // The machine-id file is created on write, so the configured or
            // default path qualifies without existing yet.
            let (value, source) = match self.cached(role) {
                Some(p) => (p, PathSource::Configured),
                None => {
                    let p = self.platform.default_machine_id_file().ok_or_else(|| {
                        ResetError::NotFound("machine-id file location".to_string())
                    })?;
                    (p, PathSource::Default)
                }
            };
            self.write_back(role, &value)?;
            return Ok(InstallationPath { role, value, source });
        }

        let candidates = self.candidates(role);
        for (candidate, source) in &candidates {
            log::debug!("probing {} for {:?}", candidate.display(), role);
            if qualifies(role, candidate) {
                self.write_back(role, candidate)?;
                return Ok(InstallationPath {
                    role,
                    value: candidate.clone(),
                    source: *source,
                });
            }
        }
        Err(ResetError::NotFound(format!(
            "no qualifying candidate for {}",
            role.config_key()
        )))
    }

    /// All workbench scripts under qualifying install roots, cached root
    /// first. More than one match means the installs are ambiguous and the
    /// caller should ask rather than silently pick.
    pub fn workbench_candidates(&self) -> Result<Vec<PathBuf>> {
        let rel = self.platform.workbench_rel_path();
        let mut found = Vec::new();
        for (root, _) in self.candidates(PathRole::AppRoot) {
            let script = root.join(&rel);
            if script.is_file() && !found.contains(&script) {
                found.push(script);
            }
        }
        if found.is_empty() {
            return Err(ResetError::NotFound(format!(
                "workbench script {}",
                rel.display()
            )));
        }
        Ok(found)
    }

    /// Records the install root a selected workbench script belongs to.
    pub fn record_app_root(&mut self, workbench_script: &Path) -> Result<()> {
        // Strip out/vs/workbench/<file> back to the root.
        let mut root = workbench_script.to_path_buf();
        for _ in 0..self.platform.workbench_rel_path().components().count() {
            root = match root.parent() {
                Some(p) => p.to_path_buf(),
                None => return Ok(()),
            };
        }
        self.write_back(PathRole::AppRoot, &root)
    }

    fn cached(&self, role: PathRole) -> Option<PathBuf> {
        self.config
            .section(self.platform)
            .get(role.config_key())
            .map(PathBuf::from)
    }

    fn defaults(&self, role: PathRole) -> Vec<PathBuf> {
        match role {
            PathRole::AppRoot => self.platform.app_root_candidates(),
            PathRole::DocumentStore => self.platform.default_document_store().into_iter().collect(),
            PathRole::KvStore => self.platform.default_kv_store().into_iter().collect(),
            PathRole::MachineIdFile => {
                self.platform.default_machine_id_file().into_iter().collect()
            }
        }
    }

    fn candidates(&self, role: PathRole) -> Vec<(PathBuf, PathSource)> {
        order_candidates(self.cached(role), self.defaults(role))
    }

    // Winning paths go back into the cache, but only when they differ from
    // what was already stored.
    fn write_back(&mut self, role: PathRole, path: &Path) -> Result<()> {
        let value = path.to_string_lossy().into_owned();
        let section = self.config.section_mut(self.platform);
        if section.get(role.config_key()) == Some(value.as_str()) {
            return Ok(());
        }
        println!("Recording {} = {}", role.config_key(), value);
        section.set(role.config_key(), value);
        self.config.save(&self.config_path)
    }
}

/// Cached path first, then defaults, duplicates removed preserving order.
fn order_candidates(
    cached: Option<PathBuf>,
    defaults: Vec<PathBuf>,
) -> Vec<(PathBuf, PathSource)> {
    let mut out: Vec<(PathBuf, PathSource)> = Vec::new();
    if let Some(c) = cached {
        out.push((c, PathSource::Configured));
    }
    for d in defaults {
        if !out.iter().any(|(p, _)| *p == d) {
            out.push((d, PathSource::Discovered));
        }
    }
    out
}

/// A candidate qualifies only if it carries the marker expected for its role.
fn qualifies(role: PathRole, candidate: &Path) -> bool {
    match role {
        PathRole::AppRoot => candidate.join("package.json").is_file(),
        PathRole::DocumentStore | PathRole::KvStore => candidate.is_file(),
        PathRole::MachineIdFile => true,
    }
}
