//! In-memory audit trail of a run and its export to CSV and JSON files.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use csv::WriterBuilder;
use kvrbac_domain::{OperationRecord, RoleAssignment, SnapshotRecord, Subscription, VaultResource};
use serde::Serialize;
use tracing::info;

use crate::error::MigrateError;
use crate::report::ExportedArtifacts;

const OPERATION_COLUMNS: &[&str] = &[
    "Timestamp",
    "MappingOld",
    "MappingNew",
    "Subscription",
    "Vault",
    "Scope",
    "Action",
    "Role",
    "RoleId",
    "OldObjectId",
    "NewObjectId",
    "Status",
    "Message",
];

const SNAPSHOT_COLUMNS: &[&str] = &[
    "Timestamp",
    "MappingOld",
    "MappingNew",
    "Subscription",
    "Vault",
    "VaultScope",
    "Scope",
    "Role",
    "RoleId",
    "ObjectId",
    "Inherited",
];

#[derive(Debug, Clone)]
pub struct AuditLog {
    started: DateTime<Utc>,
    operations: Vec<OperationRecord>,
    snapshots: Vec<SnapshotRecord>,
}

impl AuditLog {
    pub fn new(started: DateTime<Utc>) -> Self {
        Self { started, operations: Vec::new(), snapshots: Vec::new() }
    }

    pub fn record_operation(&mut self, record: OperationRecord) {
        self.operations.push(record);
    }

    pub fn record_snapshot(&mut self, record: SnapshotRecord) {
        self.snapshots.push(record);
    }

    pub fn operations(&self) -> &[OperationRecord] {
        &self.operations
    }

    pub fn snapshots(&self) -> &[SnapshotRecord] {
        &self.snapshots
    }

    /// Run start time as used in artifact file names, e.g. `20240131-142501`.
    pub fn stamp(&self) -> String {
        self.started.format("%Y%m%d-%H%M%S").to_string()
    }

    /// Write the operation log (CSV and JSON) and the snapshot CSV into `dir`,
    /// creating it if needed.
    pub fn export(&self, dir: &Path) -> Result<ExportedArtifacts, MigrateError> {
        ensure_dir(dir)?;
        let stamp = self.stamp();
        let artifacts = ExportedArtifacts {
            operations_csv: dir.join(format!("kvrbac-operations-{stamp}.csv")),
            operations_json: dir.join(format!("kvrbac-operations-{stamp}.json")),
            snapshot_csv: dir.join(format!("kvrbac-snapshot-{stamp}.csv")),
        };

        write_csv(&artifacts.operations_csv, OPERATION_COLUMNS, &self.operations)?;
        write_json(&artifacts.operations_json, &self.operations)?;
        write_csv(&artifacts.snapshot_csv, SNAPSHOT_COLUMNS, &self.snapshots)?;

        info!(
            operations = self.operations.len(),
            snapshots = self.snapshots.len(),
            dir = %dir.display(),
            "Wrote audit logs"
        );
        Ok(artifacts)
    }

    /// Write only the snapshot CSV as `<prefix>-<stamp>.csv` in `dir`.
    pub fn export_snapshot(&self, dir: &Path, prefix: &str) -> Result<PathBuf, MigrateError> {
        ensure_dir(dir)?;
        let path = dir.join(format!("{}-{}.csv", prefix, self.stamp()));
        write_csv(&path, SNAPSHOT_COLUMNS, &self.snapshots)?;
        info!(snapshots = self.snapshots.len(), path = %path.display(), "Wrote snapshot");
        Ok(path)
    }
}

/// Snapshot row for one assignment held by the old principal at `vault`.
pub fn snapshot_of(
    mapping_old: &str,
    mapping_new: &str,
    subscription: &Subscription,
    vault: &VaultResource,
    assignment: &RoleAssignment,
) -> SnapshotRecord {
    SnapshotRecord {
        timestamp: Utc::now(),
        mapping_old: mapping_old.to_string(),
        mapping_new: mapping_new.to_string(),
        subscription: subscription.display_name.clone(),
        vault: vault.name.clone(),
        vault_scope: vault.id.to_string(),
        scope: assignment.scope.to_string(),
        role: assignment.role_definition_name.clone(),
        role_id: assignment.role_definition_id.clone(),
        object_id: assignment.principal_id.clone(),
        inherited: assignment.is_inherited_at(&vault.id),
    }
}

fn ensure_dir(dir: &Path) -> Result<(), MigrateError> {
    fs::create_dir_all(dir).map_err(|e| MigrateError::Io {
        path: dir.display().to_string(),
        source: e,
    })
}

/// The header row is written explicitly so an empty log still names its
/// columns.
fn write_csv<T: Serialize>(path: &Path, columns: &[&str], records: &[T]) -> Result<(), MigrateError> {
    let mut writer = WriterBuilder::new().has_headers(false).from_path(path)?;
    writer.write_record(columns)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush().map_err(|e| MigrateError::Io {
        path: path.display().to_string(),
        source: e,
    })
}

fn write_json<T: Serialize>(path: &Path, records: &[T]) -> Result<(), MigrateError> {
    let io_err = |e| MigrateError::Io { path: path.display().to_string(), source: e };
    let file = File::create(path).map_err(io_err)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, records)?;
    writer.flush().map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use kvrbac_domain::{Action, Scope, Status};

    fn started() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 31, 14, 25, 1).unwrap()
    }

    fn operation(status: Status) -> OperationRecord {
        OperationRecord {
            timestamp: started(),
            mapping_old: "alice@corp.com".into(),
            mapping_new: "bob@corp.com".into(),
            subscription: "Production".into(),
            vault: "kv1".into(),
            scope: "/subscriptions/sub-1/resourceGroups/rg/providers/Microsoft.KeyVault/vaults/kv1".into(),
            action: Action::Add,
            role: "Key Vault Secrets User".into(),
            role_id: "/providers/Microsoft.Authorization/roleDefinitions/4633458b".into(),
            old_object_id: "old".into(),
            new_object_id: "new".into(),
            status,
            message: "Added assignment".into(),
        }
    }

    #[test]
    fn stamp_format() {
        assert_eq!(AuditLog::new(started()).stamp(), "20240131-142501");
    }

    #[test]
    fn export_writes_three_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("logs");
        let mut log = AuditLog::new(started());
        log.record_operation(operation(Status::Success));
        log.record_operation(operation(Status::Exists));

        let artifacts = log.export(&out).unwrap();
        assert_eq!(artifacts.operations_csv, out.join("kvrbac-operations-20240131-142501.csv"));

        let csv_text = fs::read_to_string(&artifacts.operations_csv).unwrap();
        let mut lines = csv_text.lines();
        assert_eq!(lines.next().unwrap(), OPERATION_COLUMNS.join(","));
        assert!(lines.next().unwrap().contains(",Add,Key Vault Secrets User,"));
        assert_eq!(csv_text.lines().count(), 3);

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&artifacts.operations_json).unwrap()).unwrap();
        assert_eq!(json.as_array().unwrap().len(), 2);
        assert_eq!(json[1]["Status"], "Exists");
        assert_eq!(json[0]["MappingOld"], "alice@corp.com");

        // No snapshots recorded: header only.
        let snap = fs::read_to_string(&artifacts.snapshot_csv).unwrap();
        assert_eq!(snap.trim_end(), SNAPSHOT_COLUMNS.join(","));
    }

    #[test]
    fn snapshot_marks_inheritance() {
        let sub = Subscription { id: "sub-1".into(), display_name: "Production".into(), state: None };
        let vault = VaultResource {
            id: Scope::new("/subscriptions/sub-1/resourceGroups/rg/providers/Microsoft.KeyVault/vaults/kv1"),
            name: "kv1".into(),
            tags: Default::default(),
        };
        let inherited = RoleAssignment {
            scope: Scope::new("/subscriptions/sub-1"),
            principal_id: "old".into(),
            role_definition_id: "r1".into(),
            role_definition_name: "Reader".into(),
        };
        let record = snapshot_of("alice", "bob", &sub, &vault, &inherited);
        assert!(record.inherited);
        assert_eq!(record.vault_scope, vault.id.to_string());
        assert_eq!(record.scope, "/subscriptions/sub-1");

        let dir = tempfile::tempdir().unwrap();
        let mut log = AuditLog::new(started());
        log.record_snapshot(record);
        let path = log.export_snapshot(dir.path(), "kvrbac-inventory").unwrap();
        assert!(path.ends_with("kvrbac-inventory-20240131-142501.csv"));
        let text = fs::read_to_string(path).unwrap();
        assert!(text.lines().nth(1).unwrap().ends_with(",old,true"));
    }
}
