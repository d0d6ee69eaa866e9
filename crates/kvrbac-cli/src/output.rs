use kvrbac_migrator::{InventoryReport, MigrationReport};

/// Render the end-of-run summary.
pub fn render_migration(report: &MigrationReport) -> String {
    let mut out = String::new();
    if report.what_if {
        out.push_str("WhatIf run: no changes were made.\n");
    }
    let c = &report.counts;
    out.push_str(&format!(
        "{} rows: {} succeeded, {} simulated, {} already present, {} errors\n",
        report.rows, c.success, c.simulated, c.exists, c.error
    ));
    out.push_str(&format!("{} existing assignments captured in the snapshot\n", report.snapshots));

    if !report.row_skips.is_empty() {
        out.push_str("Skipped rows:\n");
        for skip in &report.row_skips {
            out.push_str(&format!(
                "  row {} ({} -> {}): {}\n",
                skip.line, skip.old_principal, skip.new_principal, skip.reason
            ));
        }
    }

    if let Some(files) = &report.artifacts {
        out.push_str(&format!("Operations: {}\n", files.operations_csv.display()));
        out.push_str(&format!("Operations (JSON): {}\n", files.operations_json.display()));
        out.push_str(&format!("Snapshot: {}\n", files.snapshot_csv.display()));
    }
    out
}

pub fn render_inventory(report: &InventoryReport) -> String {
    format!(
        "{} ({}, {}): {} assignments across {} vaults in {} subscriptions\nSnapshot: {}\n",
        report.principal.raw_identifier,
        report.principal.kind,
        report.principal.resolved_id,
        report.assignments,
        report.vaults,
        report.subscriptions,
        report.snapshot_csv.display()
    )
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use kvrbac_domain::{ObjectId, PrincipalKind, PrincipalRef};
    use kvrbac_migrator::{ExportedArtifacts, RowSkip, StatusCounts};

    fn report() -> MigrationReport {
        MigrationReport {
            what_if: true,
            rows: 3,
            row_skips: vec![RowSkip {
                line: 2,
                old_principal: "ghost".into(),
                new_principal: "bob@corp.com".into(),
                reason: "old principal: identity not found: ghost".into(),
            }],
            counts: StatusCounts { success: 0, simulated: 4, exists: 1, error: 0 },
            snapshots: 5,
            artifacts: Some(ExportedArtifacts {
                operations_csv: PathBuf::from("out/ops.csv"),
                operations_json: PathBuf::from("out/ops.json"),
                snapshot_csv: PathBuf::from("out/snap.csv"),
            }),
        }
    }

    #[test]
    fn summary_lists_counts_skips_and_files() {
        let text = render_migration(&report());
        assert!(text.starts_with("WhatIf run"));
        assert!(text.contains("3 rows: 0 succeeded, 4 simulated, 1 already present, 0 errors"));
        assert!(text.contains("row 2 (ghost -> bob@corp.com): old principal: identity not found"));
        assert!(text.contains("Snapshot: out/snap.csv"));
    }

    #[test]
    fn real_run_without_skips() {
        let mut r = report();
        r.what_if = false;
        r.row_skips.clear();
        r.artifacts = None;
        let text = render_migration(&r);
        assert!(!text.contains("WhatIf"));
        assert!(!text.contains("Skipped rows"));
    }

    #[test]
    fn inventory_line() {
        let text = render_inventory(&InventoryReport {
            principal: PrincipalRef {
                raw_identifier: "deployer".into(),
                resolved_id: ObjectId::new("cccc"),
                kind: PrincipalKind::ServicePrincipal,
            },
            subscriptions: 1,
            vaults: 2,
            assignments: 3,
            snapshot_csv: PathBuf::from("inv.csv"),
        });
        assert!(text.starts_with("deployer (ServicePrincipal, cccc): 3 assignments across 2 vaults"));
    }
}
