use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use regex::Regex;
use tempfile::NamedTempFile;

use crate::error::{ResetError, Result};
use crate::platform::Platform;

/// How the pre-patch copy of a target file is named. Both policies exist in
/// the wild for this domain; the caller picks one explicitly instead of the
/// choice being buried in a code path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupPolicy {
    /// `<path>.backup.<YYYYMMDD_HHMMSS>`, created on every run.
    Timestamped,
    /// `<path>.bak`, created only when absent so the oldest copy survives.
    FixedSuffixIfAbsent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleScope {
    Any,
    Only(Platform),
}

/// A single best-effort text substitution. Rules are independent: one that
/// finds no match simply leaves the buffer alone.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Whole-substring replacement of an exact minified code fragment.
    Literal {
        find: &'static str,
        replace: &'static str,
    },
    /// Rewrites `async name(){return X ?? Y}` to `async name(){return Y}`,
    /// discarding the left-hand fallback operand whatever it contains.
    NullishFallback { function: &'static str },
}

#[derive(Debug, Clone)]
pub struct PatchRule {
    pub matcher: Matcher,
    pub scope: RuleScope,
}

impl PatchRule {
    pub fn literal(find: &'static str, replace: &'static str) -> PatchRule {
        PatchRule {
            matcher: Matcher::Literal { find, replace },
            scope: RuleScope::Any,
        }
    }

    pub fn literal_for(platform: Platform, find: &'static str, replace: &'static str) -> PatchRule {
        PatchRule {
            matcher: Matcher::Literal { find, replace },
            scope: RuleScope::Only(platform),
        }
    }

    pub fn nullish_fallback(function: &'static str) -> PatchRule {
        PatchRule {
            matcher: Matcher::NullishFallback { function },
            scope: RuleScope::Any,
        }
    }

    pub fn applies_to(&self, platform: Platform) -> bool {
        match self.scope {
            RuleScope::Any => true,
            RuleScope::Only(p) => p == platform,
        }
    }

    /// Applies the rule to the buffer, returning the new buffer and the
    /// number of replacements made.
    pub fn apply(&self, content: &str) -> Result<(String, usize)> {
        match &self.matcher {
            Matcher::Literal { find, replace } => {
                let count = content.matches(find).count();
                if count == 0 {
                    Ok((content.to_string(), 0))
                } else {
                    Ok((content.replace(find, replace), count))
                }
            }
            Matcher::NullishFallback { function } => {
                let pattern = format!(
                    r"async {}\(\)\{{return [^?]+\?\?([^}}]+)\}}",
                    regex::escape(function)
                );
                let re = Regex::new(&pattern)
                    .map_err(|e| ResetError::ModifyFailed(e.to_string()))?;
                let count = re.find_iter(content).count();
                if count == 0 {
                    return Ok((content.to_string(), 0));
                }
                let replacement = format!("async {function}(){{return $1}}");
                Ok((re.replace_all(content, replacement.as_str()).into_owned(), count))
            }
        }
    }
}

/// Permission state of the original file, restored after the swap.
#[derive(Debug, Clone)]
struct PermissionSnapshot {
    permissions: fs::Permissions,
    #[cfg(unix)]
    uid: u32,
    #[cfg(unix)]
    gid: u32,
}

impl PermissionSnapshot {
    fn capture(path: &Path) -> Result<PermissionSnapshot> {
        let meta = fs::metadata(path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            return Ok(PermissionSnapshot {
                permissions: meta.permissions(),
                uid: meta.uid(),
                gid: meta.gid(),
            });
        }
        #[cfg(not(unix))]
        return Ok(PermissionSnapshot {
            permissions: meta.permissions(),
        });
    }

    // Best effort only: a failed restore leaves the patched file in place.
    fn restore(&self, path: &Path) {
        if let Err(e) = fs::set_permissions(path, self.permissions.clone()) {
            log::warn!("could not restore mode on {}: {e}", path.display());
        }
        #[cfg(unix)]
        if let Err(e) = std::os::unix::fs::chown(path, Some(self.uid), Some(self.gid)) {
            log::warn!("could not restore owner on {}: {e}", path.display());
        }
    }
}

/// Record of the backup taken before a destructive write. `backup` is `None`
/// when the fixed-suffix policy found an existing copy and kept it.
#[derive(Debug, Clone)]
pub struct BackupRecord {
    pub original: PathBuf,
    pub backup: Option<PathBuf>,
    pub created_at: chrono::DateTime<Local>,
}

#[derive(Debug)]
pub struct PatchReport {
    pub replacements: usize,
    pub backup: BackupRecord,
}

/// Backup + atomic-replace pipeline for rewriting a target text file:
/// read → apply rules in order → sibling temp file → backup → swap →
/// restore permissions. Any failure before the swap deletes the temp file
/// and leaves the original untouched.
#[derive(Debug)]
pub struct PatchEngine {
    policy: BackupPolicy,
    #[cfg(test)]
    fail_before_swap: bool,
}

impl PatchEngine {
    pub fn new(policy: BackupPolicy) -> PatchEngine {
        PatchEngine {
            policy,
            #[cfg(test)]
            fail_before_swap: false,
        }
    }

    pub fn apply(&self, target: &Path, platform: Platform, rules: &[PatchRule]) -> Result<PatchReport> {
        self.apply_inner(target, platform, rules).map_err(|e| match e {
            ResetError::ModifyFailed(_) | ResetError::PermissionDenied(_) => e,
            other => ResetError::ModifyFailed(format!("{}: {other}", target.display())),
        })
    }

    fn apply_inner(
        &self,
        target: &Path,
        platform: Platform,
        rules: &[PatchRule],
    ) -> Result<PatchReport> {
        if !target.is_file() {
            return Err(ResetError::ModifyFailed(format!(
                "{}: not a file",
                target.display()
            )));
        }
        let snapshot = PermissionSnapshot::capture(target)?;

        // Minified bundles occasionally carry invalid UTF-8; replace rather
        // than refuse, matching the substitution-only contract.
        let raw = fs::read(target)?;
        let mut content = String::from_utf8_lossy(&raw).into_owned();

        let mut replacements = 0;
        for rule in rules.iter().filter(|r| r.applies_to(platform)) {
            let (next, count) = rule.apply(&content)?;
            content = next;
            replacements += count;
        }

        let parent = target
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let mut tmp = NamedTempFile::new_in(&parent)?;
        tmp.write_all(content.as_bytes())?;
        tmp.flush()?;

        #[cfg(test)]
        if self.fail_before_swap {
            return Err(ResetError::ModifyFailed("injected failure".to_string()));
        }

        let backup = self.create_backup(target)?;
        log::debug!(
            "backup record for {} taken at {}",
            backup.original.display(),
            backup.created_at
        );

        // Windows cannot rename over an existing file; elsewhere the rename
        // itself is the atomic replacement.
        #[cfg(windows)]
        fs::remove_file(target)?;
        tmp.persist(target).map_err(|e| ResetError::Io(e.error))?;

        snapshot.restore(target);

        Ok(PatchReport {
            replacements,
            backup,
        })
    }

    fn create_backup(&self, target: &Path) -> Result<BackupRecord> {
        let created_at = Local::now();
        let backup = match self.policy {
            BackupPolicy::Timestamped => {
                let stamp = created_at.format("%Y%m%d_%H%M%S");
                let path = append_suffix(target, &format!(".backup.{stamp}"));
                fs::copy(target, &path)?;
                Some(path)
            }
            BackupPolicy::FixedSuffixIfAbsent => {
                let path = append_suffix(target, ".bak");
                if path.exists() {
                    log::debug!("backup already present at {}", path.display());
                    None
                } else {
                    fs::copy(target, &path)?;
                    Some(path)
                }
            }
        };
        Ok(BackupRecord {
            original: target.to_path_buf(),
            backup,
            created_at,
        })
    }
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

/// Writes `bytes` to `path` through a sibling temp file and atomic rename,
/// so a crash mid-write never leaves a truncated file behind.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let mut tmp = NamedTempFile::new_in(&parent)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    #[cfg(windows)]
    if path.exists() {
        fs::remove_file(path)?;
    }
    tmp.persist(path).map_err(|e| ResetError::Io(e.error))?;
    Ok(())
}
