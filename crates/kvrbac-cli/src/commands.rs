use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use kvrbac_config::{load_run_config, RunConfig, RunConfigFile};
use kvrbac_directory::{AzureDirectory, Directory};
use kvrbac_domain::{NamePattern, TagFilter};
use kvrbac_migrator::{Confirmer, InventoryRequest};

use crate::cli::{AuditArgs, AzureArgs, MigrateArgs};
use crate::confirm::ConsoleConfirmer;
use crate::output;

// ── Migrate ───────────────────────────────────────────────────────────────────

pub async fn migrate(args: MigrateArgs, azure: AzureArgs) -> Result<ExitCode> {
    let file = match &args.config {
        Some(path) => load_run_config(path)
            .with_context(|| format!("Failed to read run config {}", path.display()))?,
        None => RunConfigFile::default(),
    };
    let config = RunConfig::try_from(file.overlay(args.overrides()))
        .context("--mapping-csv (or MappingCsv in --config) is required")?;

    let directory: Arc<dyn Directory> = Arc::new(AzureDirectory::new(azure.into_config()));
    let confirmer: Arc<dyn Confirmer> = Arc::new(ConsoleConfirmer);

    let report = kvrbac_migrator::migrate(&config, directory, confirmer)
        .await
        .context("Migration aborted")?;
    print!("{}", output::render_migration(&report));

    if args.fail_on_error && report.has_errors() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

// ── Audit ─────────────────────────────────────────────────────────────────────

pub async fn audit(args: AuditArgs, azure: AzureArgs) -> Result<ExitCode> {
    let vault_name_pattern = args
        .vault_name_pattern
        .as_deref()
        .map(NamePattern::new)
        .transpose()
        .context("Invalid --vault-name-pattern")?;
    let tag_filter = match (args.tag_name, args.tag_value) {
        (Some(name), Some(value)) => Some(TagFilter { name, value }),
        _ => None,
    };

    let request = InventoryRequest {
        principal: args.principal,
        subscription_filter: args.subscription,
        vault_name_pattern,
        tag_filter,
        include_inherited: args.include_inherited,
        output_path: args.output_path,
    };
    let directory: Arc<dyn Directory> = Arc::new(AzureDirectory::new(azure.into_config()));

    let report = kvrbac_migrator::inventory(&request, directory)
        .await
        .with_context(|| format!("Inventory of '{}' failed", request.principal))?;
    print!("{}", output::render_inventory(&report));
    Ok(ExitCode::SUCCESS)
}
