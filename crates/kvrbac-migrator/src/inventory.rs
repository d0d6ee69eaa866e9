use std::sync::Arc;

use chrono::Utc;
use kvrbac_directory::Directory;
use kvrbac_domain::Subscription;
use tracing::{info, warn};

use crate::audit::{snapshot_of, AuditLog};
use crate::error::MigrateError;
use crate::index::assignments_at;
use crate::report::{InventoryReport, InventoryRequest};
use crate::resolver::IdentityResolver;
use crate::scopes::list_scopes;

/// Record every vault assignment held by one principal without changing
/// anything, and write it as a snapshot CSV.
pub async fn inventory(
    request: &InventoryRequest,
    directory: Arc<dyn Directory>,
) -> Result<InventoryReport, MigrateError> {
    let principal = IdentityResolver::new(directory.clone())
        .resolve(&request.principal)
        .await?;

    let subscriptions = directory.list_subscriptions().await?;
    if subscriptions.is_empty() {
        return Err(MigrateError::NoSubscriptions);
    }
    let targets: Vec<&Subscription> = match &request.subscription_filter {
        Some(filter) => subscriptions.iter().filter(|s| s.matches_filter(filter)).collect(),
        None => subscriptions.iter().collect(),
    };
    if targets.is_empty() {
        warn!(filter = ?request.subscription_filter, "No accessible subscription matches the filter");
    }

    let mut audit = AuditLog::new(Utc::now());
    let mut vaults = 0;
    for subscription in &targets {
        let found = list_scopes(
            directory.as_ref(),
            subscription,
            request.vault_name_pattern.as_ref(),
            request.tag_filter.as_ref(),
        )
        .await;
        vaults += found.len();
        for vault in &found {
            let held = assignments_at(directory.as_ref(), &vault.id, request.include_inherited).await;
            for assignment in held.iter().filter(|a| a.is_held_by(&principal.resolved_id)) {
                audit.record_snapshot(snapshot_of(&request.principal, "", subscription, vault, assignment));
            }
        }
    }

    let snapshot_csv = audit.export_snapshot(&request.output_path, "kvrbac-inventory")?;
    info!(
        principal = %principal.resolved_id,
        vaults,
        assignments = audit.snapshots().len(),
        "Inventory complete"
    );
    Ok(InventoryReport {
        principal,
        subscriptions: targets.len(),
        vaults,
        assignments: audit.snapshots().len(),
        snapshot_csv,
    })
}
