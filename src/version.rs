use std::fs;
use std::path::Path;

use serde_json::Value;

use crate::error::{ResetError, Result};

/// Minimum app version whose main.js carries the patchable machine-id shape.
pub const MIN_PATCH_VERSION: &str = "0.45.0";

/// Parses a version strictly matching `major.minor.patch` with integer
/// components; anything else is `InvalidFormat`.
pub fn parse_version(version: &str) -> Result<(u64, u64, u64)> {
    let mut parts = version.split('.');
    let mut next = || -> Result<u64> {
        let part = parts
            .next()
            .ok_or_else(|| ResetError::InvalidFormat(format!("version {version:?}")))?;
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ResetError::InvalidFormat(format!("version {version:?}")));
        }
        part.parse()
            .map_err(|_| ResetError::InvalidFormat(format!("version {version:?}")))
    };
    let triple = (next()?, next()?, next()?);
    if parts.next().is_some() {
        return Err(ResetError::InvalidFormat(format!("version {version:?}")));
    }
    Ok(triple)
}

/// Lexicographic tuple comparison against optional bounds. Empty bound means
/// unchecked on that side.
pub fn compare(current: &str, min_version: Option<&str>, max_version: Option<&str>) -> Result<bool> {
    let current = parse_version(current)?;
    if let Some(min) = min_version {
        if current < parse_version(min)? {
            return Ok(false);
        }
    }
    if let Some(max) = max_version {
        if current > parse_version(max)? {
            return Ok(false);
        }
    }
    Ok(true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateVerdict {
    BelowThreshold,
    AtOrAboveThreshold,
}

/// One-shot classification of the installed version against the fixed patch
/// threshold. The verdict is terminal: once evaluated, later calls return the
/// stored verdict without re-reading anything.
#[derive(Debug, Default)]
pub struct VersionGate {
    verdict: Option<GateVerdict>,
}

impl VersionGate {
    pub fn new() -> VersionGate {
        VersionGate::default()
    }

    pub fn classify(&mut self, version: &str) -> Result<GateVerdict> {
        if let Some(verdict) = self.verdict {
            return Ok(verdict);
        }
        let verdict = if compare(version, Some(MIN_PATCH_VERSION), None)? {
            GateVerdict::AtOrAboveThreshold
        } else {
            GateVerdict::BelowThreshold
        };
        self.verdict = Some(verdict);
        Ok(verdict)
    }
}

/// Reads the `version` field out of the install's package descriptor.
pub fn app_version(pkg_path: &Path) -> Result<String> {
    let text = fs::read_to_string(pkg_path)?;
    let doc: Value = serde_json::from_str(&text)?;
    let version = doc
        .get("version")
        .and_then(Value::as_str)
        .map(str::trim)
        .ok_or_else(|| {
            ResetError::InvalidFormat(format!("no version field in {}", pkg_path.display()))
        })?;
    if version.is_empty() {
        return Err(ResetError::InvalidFormat(format!(
            "empty version field in {}",
            pkg_path.display()
        )));
    }
    Ok(version.to_string())
}
