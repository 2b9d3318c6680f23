use std::fs;
use std::path::PathBuf;

use rusqlite::Connection;
use serde_json::{Map, Value};

use crate::error::{ResetError, Result};
use crate::patch::atomic_write;

/// Key substrings that mark usage-tracking entries.
pub const USAGE_MARKERS: [&str; 3] = ["usage", "gpt4", "trial"];

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ScrubReport {
    pub document_removed: usize,
    pub kv_removed: usize,
}

/// Deletes usage-tracking entries from the document and key-value stores.
/// Matches are removed outright: stored values can be arbitrarily nested
/// structures that are unsafe to reparse and zero out. Zero matches is
/// informational, not an error.
pub struct UsageScrubber {
    pub document_store: PathBuf,
    pub kv_store: PathBuf,
}

impl UsageScrubber {
    pub fn scrub(&self) -> ScrubReport {
        let document_removed = match self.scrub_document() {
            Ok(n) => n,
            Err(e) => {
                println!("Could not scrub document store: {e}");
                0
            }
        };
        let kv_removed = match self.scrub_kv() {
            Ok(n) => n,
            Err(e) => {
                println!("Could not scrub key-value store: {e}");
                0
            }
        };
        ScrubReport {
            document_removed,
            kv_removed,
        }
    }

    fn scrub_document(&self) -> Result<usize> {
        if !self.document_store.is_file() {
            return Ok(0);
        }
        let text = fs::read_to_string(&self.document_store)?;
        let mut doc: Map<String, Value> = serde_json::from_str(&text).map_err(|e| {
            ResetError::InvalidFormat(format!("{}: {e}", self.document_store.display()))
        })?;

        let before = doc.len();
        doc.retain(|key, _| !is_usage_key(key));
        let removed = before - doc.len();

        if removed > 0 {
            atomic_write(
                &self.document_store,
                serde_json::to_string_pretty(&doc)?.as_bytes(),
            )?;
        }
        Ok(removed)
    }

    fn scrub_kv(&self) -> Result<usize> {
        if !self.kv_store.is_file() {
            return Ok(0);
        }
        let conn = Connection::open(&self.kv_store)?;
        let removed = conn.execute(
            "DELETE FROM ItemTable WHERE \
             key LIKE '%usage%' OR key LIKE '%gpt4%' OR key LIKE '%trial%'",
            [],
        )?;
        Ok(removed)
    }
}

fn is_usage_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    USAGE_MARKERS.iter().any(|marker| lower.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn scrubber(dir: &Path) -> UsageScrubber {
        UsageScrubber {
            document_store: dir.join("storage.json"),
            kv_store: dir.join("state.vscdb"),
        }
    }

    fn seed_kv(path: &Path, rows: &[(&str, &str)]) {
        let conn = Connection::open(path).unwrap();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS ItemTable (key TEXT PRIMARY KEY, value TEXT)",
            [],
        )
        .unwrap();
        for (k, v) in rows {
            conn.execute("INSERT INTO ItemTable (key, value) VALUES (?1, ?2)", [k, v])
                .unwrap();
        }
    }

    #[test]
    fn document_usage_keys_are_deleted_outright() {
        let dir = tempfile::tempdir().unwrap();
        let s = scrubber(dir.path());
        fs::write(&s.document_store, r#"{"gpt4_usage_count":5,"other":1}"#).unwrap();

        let report = s.scrub();

        assert_eq!(report.document_removed, 1);
        let doc: Map<String, Value> =
            serde_json::from_str(&fs::read_to_string(&s.document_store).unwrap()).unwrap();
        assert_eq!(doc.len(), 1);
        assert_eq!(doc["other"], Value::from(1));
    }

    #[test]
    fn document_match_is_case_insensitive() {
        assert!(is_usage_key("cursorAuth/TrialExpiry"));
        assert!(is_usage_key("GPT4.quota"));
        assert!(is_usage_key("workbench.Usage.count"));
        assert!(!is_usage_key("telemetry.devDeviceId"));
    }

    #[test]
    fn kv_rows_matching_markers_are_deleted_and_counted() {
        let dir = tempfile::tempdir().unwrap();
        let s = scrubber(dir.path());
        fs::write(&s.document_store, "{}").unwrap();
        seed_kv(
            &s.kv_store,
            &[
                ("aiService.usage", "{}"),
                ("gpt4.requests", "12"),
                ("cursorauth/trialEnd", "soon"),
                ("unrelated", "keep"),
            ],
        );

        let report = s.scrub();
        assert_eq!(report.kv_removed, 3);

        let conn = Connection::open(&s.kv_store).unwrap();
        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM ItemTable", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 1);
    }

    #[test]
    fn missing_stores_scrub_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        let report = scrubber(dir.path()).scrub();
        assert_eq!(report, ScrubReport::default());
    }

    #[test]
    fn clean_stores_leave_files_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let s = scrubber(dir.path());
        fs::write(&s.document_store, r#"{"other":1}"#).unwrap();

        let report = s.scrub();

        assert_eq!(report.document_removed, 0);
        // No rewrite happened for a zero-match scrub.
        assert_eq!(
            fs::read_to_string(&s.document_store).unwrap(),
            r#"{"other":1}"#
        );
    }
}
