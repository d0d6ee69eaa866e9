use std::sync::Arc;

use chrono::Utc;
use kvrbac_config::RunConfig;
use kvrbac_directory::Directory;
use kvrbac_domain::{
    Action, MappingRow, ObjectId, OperationRecord, PrincipalRef, RoleAssignment, Status, Subscription,
    VaultResource,
};
use tracing::{debug, info, warn};

use crate::audit::{snapshot_of, AuditLog};
use crate::confirm::{Confirmer, PendingAction};
use crate::decision::{mutation_gate, Approval, Gate, Outcome};
use crate::error::MigrateError;
use crate::index::AssignmentIndex;
use crate::report::{MigrationOptions, MigrationReport, RowSkip, StatusCounts};
use crate::resolver::IdentityResolver;
use crate::scopes::list_scopes;

/// Load the mapping named by `config`, replicate every row and write the
/// audit logs to `config.output_path`.
pub async fn migrate(
    config: &RunConfig,
    directory: Arc<dyn Directory>,
    confirmer: Arc<dyn Confirmer>,
) -> Result<MigrationReport, MigrateError> {
    info!("Loading mapping from {:?}", config.mapping_csv);
    let rows = kvrbac_config::load_mapping(&config.mapping_csv)?;
    debug!("Loaded {} mapping rows", rows.len());

    let mut migrator = Migrator::new(directory, confirmer, MigrationOptions::from(config));
    migrator.run(&rows).await?;

    let artifacts = migrator.audit().export(&config.output_path)?;
    let mut report = migrator.report();
    report.artifacts = Some(artifacts);
    Ok(report)
}

/// Both sides of a row after resolution.
struct RowContext<'r> {
    row: &'r MappingRow,
    old: PrincipalRef,
    new: PrincipalRef,
    include_inherited: bool,
}

/// Replicates role assignments row by row. Failures below the run level are
/// recorded and never stop the run.
pub struct Migrator {
    directory: Arc<dyn Directory>,
    confirmer: Arc<dyn Confirmer>,
    options: MigrationOptions,
    resolver: IdentityResolver,
    audit: AuditLog,
    rows: usize,
    row_skips: Vec<RowSkip>,
}

impl Migrator {
    pub fn new(directory: Arc<dyn Directory>, confirmer: Arc<dyn Confirmer>, options: MigrationOptions) -> Self {
        Self {
            resolver: IdentityResolver::new(directory.clone()),
            directory,
            confirmer,
            options,
            audit: AuditLog::new(Utc::now()),
            rows: 0,
            row_skips: Vec::new(),
        }
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn row_skips(&self) -> &[RowSkip] {
        &self.row_skips
    }

    pub fn report(&self) -> MigrationReport {
        MigrationReport {
            what_if: self.options.what_if,
            rows: self.rows,
            row_skips: self.row_skips.clone(),
            counts: StatusCounts::tally(self.audit.operations()),
            snapshots: self.audit.snapshots().len(),
            artifacts: None,
        }
    }

    /// Process `rows` in order. Only a failed or empty subscription listing
    /// aborts, and it does so before any row is touched.
    pub async fn run(&mut self, rows: &[MappingRow]) -> Result<(), MigrateError> {
        let subscriptions = self.directory.list_subscriptions().await?;
        if subscriptions.is_empty() {
            return Err(MigrateError::NoSubscriptions);
        }
        info!(
            rows = rows.len(),
            subscriptions = subscriptions.len(),
            what_if = self.options.what_if,
            remove_old = self.options.remove_old,
            "Starting migration via {}",
            self.directory.name()
        );

        for row in rows {
            self.migrate_row(row, &subscriptions).await;
        }
        Ok(())
    }

    async fn migrate_row(&mut self, row: &MappingRow, subscriptions: &[Subscription]) {
        self.rows += 1;
        if let Some(reason) = &row.rejection {
            return self.skip_row(row, reason.clone());
        }
        if row.old_principal.is_empty() || row.new_principal.is_empty() {
            self.skip_row(row, "OldPrincipal and NewPrincipal are both required".into());
            return;
        }

        let old = match self.resolver.resolve(&row.old_principal).await {
            Ok(p) => p,
            Err(e) => return self.skip_row(row, format!("old principal: {}", e)),
        };
        let new = match self.resolver.resolve(&row.new_principal).await {
            Ok(p) => p,
            Err(e) => return self.skip_row(row, format!("new principal: {}", e)),
        };

        let targets: Vec<&Subscription> = match &row.subscription_filter {
            Some(filter) => subscriptions.iter().filter(|s| s.matches_filter(filter)).collect(),
            None => subscriptions.iter().collect(),
        };
        if targets.is_empty() {
            let filter = row.subscription_filter.as_deref().unwrap_or_default();
            return self.skip_row(row, format!("subscription '{}' is not accessible", filter));
        }

        let ctx = RowContext {
            row,
            include_inherited: row.effective_include_inherited(self.options.include_inherited),
            old,
            new,
        };
        info!(
            line = row.line,
            old = %ctx.old.resolved_id,
            new = %ctx.new.resolved_id,
            subscriptions = targets.len(),
            include_inherited = ctx.include_inherited,
            "Processing mapping row"
        );
        for subscription in targets {
            self.migrate_subscription(&ctx, subscription).await;
        }
    }

    async fn migrate_subscription(&mut self, ctx: &RowContext<'_>, subscription: &Subscription) {
        let vaults = list_scopes(
            self.directory.as_ref(),
            subscription,
            ctx.row.vault_name_pattern.as_ref(),
            ctx.row.tag_filter.as_ref(),
        )
        .await;
        if vaults.is_empty() {
            info!(subscription = %subscription.display_name, "No matching key vaults");
            return;
        }
        for vault in &vaults {
            self.migrate_scope(ctx, subscription, vault).await;
        }
    }

    async fn migrate_scope(&mut self, ctx: &RowContext<'_>, subscription: &Subscription, vault: &VaultResource) {
        let index = AssignmentIndex::load(self.directory.as_ref(), &vault.id).await;

        // Everything the old principal holds here, before filtering or changes.
        for assignment in index.held_by(&ctx.old.resolved_id) {
            self.audit.record_snapshot(snapshot_of(
                &ctx.row.old_principal,
                &ctx.row.new_principal,
                subscription,
                vault,
                assignment,
            ));
        }

        let eligible = index.eligible(&ctx.old.resolved_id, ctx.include_inherited);
        debug!(vault = %vault.name, fetched = index.len(), eligible = eligible.len(), "Scanned vault");
        for assignment in eligible {
            self.migrate_assignment(ctx, subscription, vault, &index, assignment).await;
        }
    }

    async fn migrate_assignment(
        &mut self,
        ctx: &RowContext<'_>,
        subscription: &Subscription,
        vault: &VaultResource,
        index: &AssignmentIndex,
        assignment: &RoleAssignment,
    ) {
        let record = |action: Action, status: Status, message: String| OperationRecord {
            timestamp: Utc::now(),
            mapping_old: ctx.row.old_principal.clone(),
            mapping_new: ctx.row.new_principal.clone(),
            subscription: subscription.display_name.clone(),
            vault: vault.name.clone(),
            scope: assignment.scope.to_string(),
            action,
            role: assignment.role_definition_name.clone(),
            role_id: assignment.role_definition_id.clone(),
            old_object_id: ctx.old.resolved_id.to_string(),
            new_object_id: ctx.new.resolved_id.to_string(),
            status,
            message,
        };

        if index.holds(&ctx.new.resolved_id, &assignment.role_definition_id, &assignment.scope) {
            debug!(role = %assignment.role_definition_name, scope = %assignment.scope, "New principal already holds role");
            self.audit.record_operation(record(
                Action::SkipAdd,
                Status::Exists,
                "New principal already holds this role at this scope".into(),
            ));
            return;
        }

        let added = self.execute(Action::Add, &ctx.new.resolved_id, assignment).await;
        self.audit.record_operation(record(Action::Add, added.status(), added.message(Action::Add)));

        if !self.options.remove_old || !added.proceeds() {
            return;
        }
        let removed = self.execute(Action::RemoveOld, &ctx.old.resolved_id, assignment).await;
        self.audit.record_operation(record(
            Action::RemoveOld,
            removed.status(),
            removed.message(Action::RemoveOld),
        ));
    }

    /// Carry out one add or remove as the run's flags dictate.
    async fn execute(&self, action: Action, principal: &ObjectId, assignment: &RoleAssignment) -> Outcome {
        let pending = PendingAction {
            action,
            principal: principal.clone(),
            role_name: assignment.role_definition_name.clone(),
            role_definition_id: assignment.role_definition_id.clone(),
            scope: assignment.scope.clone(),
        };

        match mutation_gate(self.options.what_if, self.options.confirm) {
            Gate::Simulate => {
                info!("WhatIf: {}", pending);
                return Outcome::Simulated;
            }
            Gate::Ask => {
                if self.confirmer.confirm(&pending).await == Approval::Decline {
                    info!("Declined: {}", pending);
                    return Outcome::Declined;
                }
            }
            Gate::Proceed => {}
        }

        let result = match action {
            Action::RemoveOld => {
                self.directory
                    .delete_role_assignment(principal, &assignment.role_definition_id, &assignment.scope)
                    .await
            }
            Action::Add | Action::SkipAdd => {
                self.directory
                    .create_role_assignment(principal, &assignment.role_definition_id, &assignment.scope)
                    .await
            }
        };
        if !self.options.throttle.is_zero() {
            tokio::time::sleep(self.options.throttle).await;
        }

        match result {
            Ok(()) => {
                info!("{}: done", pending);
                Outcome::Applied
            }
            Err(e) => {
                warn!(error = %e, "{}: failed", pending);
                Outcome::Failed(e.to_string())
            }
        }
    }

    fn skip_row(&mut self, row: &MappingRow, reason: String) {
        warn!(line = row.line, old = %row.old_principal, new = %row.new_principal, "Skipping row: {}", reason);
        self.row_skips.push(RowSkip {
            line: row.line,
            old_principal: row.old_principal.clone(),
            new_principal: row.new_principal.clone(),
            reason,
        });
    }
}
