use std::path::PathBuf;
use std::time::Duration;

use kvrbac_config::RunConfig;
use kvrbac_domain::{NamePattern, OperationRecord, PrincipalRef, Status, TagFilter};
use serde::Serialize;

/// Engine switches for one migration run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationOptions {
    /// Default for rows that leave `IncludeInherited` blank.
    pub include_inherited: bool,
    pub remove_old: bool,
    pub what_if: bool,
    pub confirm: bool,
    pub throttle: Duration,
}

impl From<&RunConfig> for MigrationOptions {
    fn from(config: &RunConfig) -> Self {
        Self {
            include_inherited: config.include_inherited,
            remove_old: config.remove_old,
            what_if: config.what_if,
            confirm: config.confirm,
            throttle: Duration::from_millis(config.throttle_ms),
        }
    }
}

/// A mapping row that produced no work, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowSkip {
    pub line: usize,
    pub old_principal: String,
    pub new_principal: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub success: usize,
    pub simulated: usize,
    pub exists: usize,
    pub error: usize,
}

impl StatusCounts {
    pub fn tally(records: &[OperationRecord]) -> Self {
        records.iter().fold(Self::default(), |mut counts, r| {
            match r.status {
                Status::Success => counts.success += 1,
                Status::Simulated => counts.simulated += 1,
                Status::Exists => counts.exists += 1,
                Status::Error => counts.error += 1,
            }
            counts
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportedArtifacts {
    pub operations_csv: PathBuf,
    pub operations_json: PathBuf,
    pub snapshot_csv: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub what_if: bool,
    pub rows: usize,
    pub row_skips: Vec<RowSkip>,
    pub counts: StatusCounts,
    pub snapshots: usize,
    pub artifacts: Option<ExportedArtifacts>,
}

impl MigrationReport {
    /// True when any operation failed or any row was skipped.
    pub fn has_errors(&self) -> bool {
        self.counts.error > 0 || !self.row_skips.is_empty()
    }
}

/// Read-only inventory of one principal's vault assignments.
#[derive(Debug, Clone)]
pub struct InventoryRequest {
    pub principal: String,
    pub subscription_filter: Option<String>,
    pub vault_name_pattern: Option<NamePattern>,
    pub tag_filter: Option<TagFilter>,
    pub include_inherited: bool,
    pub output_path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct InventoryReport {
    pub principal: PrincipalRef,
    pub subscriptions: usize,
    pub vaults: usize,
    pub assignments: usize,
    pub snapshot_csv: PathBuf,
}
