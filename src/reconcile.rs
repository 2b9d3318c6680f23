use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use serde_json::{Map, Value};

use crate::error::{ResetError, Result};
use crate::identity::IdentitySet;
use crate::patch::atomic_write;
use crate::platform::{Platform, SystemUpdate};

/// Per-backend outcome. The stores share no transaction, so the report makes
/// the partial-success policy observable instead of implicit in console text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreStatus {
    Ok,
    Skipped,
    Error(String),
}

impl StoreStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, StoreStatus::Ok)
    }

    fn from_result(result: Result<()>) -> StoreStatus {
        match result {
            Ok(()) => StoreStatus::Ok,
            Err(e) => StoreStatus::Error(e.to_string()),
        }
    }
}

impl fmt::Display for StoreStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreStatus::Ok => write!(f, "ok"),
            StoreStatus::Skipped => write!(f, "skipped"),
            StoreStatus::Error(reason) => write!(f, "error: {reason}"),
        }
    }
}

#[derive(Debug)]
pub struct ReconcileReport {
    pub document: StoreStatus,
    pub kv: StoreStatus,
    pub machine_id_file: StoreStatus,
    pub system: StoreStatus,
}

impl ReconcileReport {
    /// Overall success needs the document and key-value stores; the
    /// machine-id file and platform stores are best-effort.
    pub fn succeeded(&self) -> bool {
        self.document.is_ok() && self.kv.is_ok()
    }
}

/// Commits one identity set across the independently-failing backends. Each
/// backend is attempted regardless of the others' outcomes; there is no
/// rollback.
pub struct StoreReconciler {
    pub platform: Platform,
    pub document_store: PathBuf,
    pub kv_store: PathBuf,
    pub machine_id_file: PathBuf,
}

impl StoreReconciler {
    pub fn commit(&self, ids: &IdentitySet) -> ReconcileReport {
        println!("Updating document store: {}", self.document_store.display());
        let document = StoreStatus::from_result(self.write_document_store(ids));

        println!("Updating key-value store: {}", self.kv_store.display());
        let kv = StoreStatus::from_result(self.write_kv_store(ids));

        println!("Updating machine-id file: {}", self.machine_id_file.display());
        let machine_id_file = StoreStatus::from_result(self.write_machine_id_file(ids));

        let system = match self.platform.update_system_identity(ids) {
            Ok(SystemUpdate::Applied) => StoreStatus::Ok,
            Ok(SystemUpdate::Skipped) => StoreStatus::Skipped,
            Err(e) => {
                log::warn!("system identity store not updated: {e}");
                StoreStatus::Error(e.to_string())
            }
        };

        ReconcileReport {
            document,
            kv,
            machine_id_file,
            system,
        }
    }

    /// Loads the whole JSON document, overlays the identity keys and writes
    /// it back atomically. A `.bak` copy is taken the first time only, so the
    /// pre-reset state survives repeated runs.
    fn write_document_store(&self, ids: &IdentitySet) -> Result<()> {
        let path = &self.document_store;
        if !path.is_file() {
            return Err(ResetError::NotFound(path.display().to_string()));
        }

        let backup = append_suffix(path, ".bak");
        if !backup.exists() {
            fs::copy(path, &backup)?;
            println!("Backup created: {}", backup.display());
        }

        let text = fs::read_to_string(path)?;
        let mut doc: Map<String, Value> = serde_json::from_str(&text)
            .map_err(|e| ResetError::InvalidFormat(format!("{}: {e}", path.display())))?;
        for (key, value) in ids.entries() {
            doc.insert(key.to_string(), Value::String(value.to_string()));
        }
        atomic_write(path, serde_json::to_string_pretty(&doc)?.as_bytes())
    }

    /// Upserts one row per identity field into the single ItemTable, creating
    /// the table when the database is fresh.
    fn write_kv_store(&self, ids: &IdentitySet) -> Result<()> {
        let conn = Connection::open(&self.kv_store)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS ItemTable (key TEXT PRIMARY KEY, value TEXT)",
            [],
        )?;
        for (key, value) in ids.entries() {
            conn.execute(
                "INSERT OR REPLACE INTO ItemTable (key, value) VALUES (?1, ?2)",
                [key, value],
            )?;
        }
        Ok(())
    }

    /// Rewrites the plain-text machine-id file with the new device id. The
    /// previous token is kept next to it.
    fn write_machine_id_file(&self, ids: &IdentitySet) -> Result<()> {
        let path = &self.machine_id_file;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        if path.exists() {
            let backup = append_suffix(path, ".backup");
            if let Err(e) = fs::copy(path, &backup) {
                log::warn!("could not back up {}: {e}", path.display());
            }
        }
        fs::write(path, &ids.dev_device_id)?;
        Ok(())
    }
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reconciler(dir: &Path) -> StoreReconciler {
        StoreReconciler {
            platform: Platform::Linux,
            document_store: dir.join("storage.json"),
            kv_store: dir.join("state.vscdb"),
            machine_id_file: dir.join("machineId"),
        }
    }

    fn kv_value(db: &Path, key: &str) -> String {
        let conn = Connection::open(db).unwrap();
        conn.query_row("SELECT value FROM ItemTable WHERE key = ?1", [key], |row| {
            row.get(0)
        })
        .unwrap()
    }

    #[test]
    fn commit_overlays_identity_keys_in_every_store() {
        let dir = tempfile::tempdir().unwrap();
        let r = reconciler(dir.path());
        fs::write(&r.document_store, r#"{"other": 1}"#).unwrap();

        let ids = IdentitySet::generate();
        let report = r.commit(&ids);

        assert!(report.succeeded());
        assert_eq!(report.system, StoreStatus::Skipped);

        let doc: Map<String, Value> =
            serde_json::from_str(&fs::read_to_string(&r.document_store).unwrap()).unwrap();
        assert_eq!(doc["other"], Value::from(1));
        assert_eq!(
            doc["telemetry.devDeviceId"],
            Value::String(ids.dev_device_id.clone())
        );
        assert_eq!(
            doc["storage.serviceMachineId"],
            Value::String(ids.dev_device_id.clone())
        );

        assert_eq!(kv_value(&r.kv_store, "telemetry.machineId"), ids.machine_id);
        assert_eq!(
            fs::read_to_string(&r.machine_id_file).unwrap(),
            ids.dev_device_id
        );
    }

    #[test]
    fn kv_failure_does_not_prevent_document_write() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = reconciler(dir.path());
        fs::write(&r.document_store, "{}").unwrap();
        // A directory at the database path makes the kv backend fail.
        r.kv_store = dir.path().join("state-dir");
        fs::create_dir(&r.kv_store).unwrap();

        let ids = IdentitySet::generate();
        let report = r.commit(&ids);

        assert!(report.document.is_ok());
        assert!(matches!(report.kv, StoreStatus::Error(_)));
        assert!(!report.succeeded());

        let doc: Map<String, Value> =
            serde_json::from_str(&fs::read_to_string(&r.document_store).unwrap()).unwrap();
        assert!(doc.contains_key("telemetry.sqmId"));
    }

    #[test]
    fn missing_document_store_still_attempts_kv() {
        let dir = tempfile::tempdir().unwrap();
        let r = reconciler(dir.path());

        let report = r.commit(&IdentitySet::generate());

        assert!(matches!(report.document, StoreStatus::Error(_)));
        assert!(report.kv.is_ok());
        assert!(!report.succeeded());
    }

    #[test]
    fn document_backup_is_taken_once() {
        let dir = tempfile::tempdir().unwrap();
        let r = reconciler(dir.path());
        fs::write(&r.document_store, r#"{"seed": true}"#).unwrap();

        r.commit(&IdentitySet::generate());
        r.commit(&IdentitySet::generate());

        let backup = dir.path().join("storage.json.bak");
        let doc: Map<String, Value> =
            serde_json::from_str(&fs::read_to_string(backup).unwrap()).unwrap();
        // The backup still holds the pre-reset document.
        assert_eq!(doc.len(), 1);
        assert_eq!(doc["seed"], Value::Bool(true));
    }

    #[test]
    fn undecodable_document_is_invalid_format() {
        let dir = tempfile::tempdir().unwrap();
        let r = reconciler(dir.path());
        fs::write(&r.document_store, "not json").unwrap();

        let report = r.commit(&IdentitySet::generate());
        match &report.document {
            StoreStatus::Error(reason) => assert!(reason.contains("invalid format")),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn machine_id_rewrite_keeps_previous_token() {
        let dir = tempfile::tempdir().unwrap();
        let r = reconciler(dir.path());
        fs::write(&r.document_store, "{}").unwrap();
        fs::write(&r.machine_id_file, "old-token").unwrap();

        let ids = IdentitySet::generate();
        let report = r.commit(&ids);

        assert!(report.machine_id_file.is_ok());
        assert_eq!(
            fs::read_to_string(dir.path().join("machineId.backup")).unwrap(),
            "old-token"
        );
        assert_eq!(
            fs::read_to_string(&r.machine_id_file).unwrap(),
            ids.dev_device_id
        );
    }
}
