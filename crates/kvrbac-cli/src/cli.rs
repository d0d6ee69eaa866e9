use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use kvrbac_config::RunConfigFile;
use kvrbac_directory::AzureDirectoryConfig;

#[derive(Debug, Parser)]
#[command(
    name = "kvrbac",
    about = "Replicate Key Vault RBAC role assignments from one principal to another",
    version
)]
pub struct Cli {
    /// Log line format.
    #[arg(long, env = "KVRBAC_LOG_FORMAT", default_value = "text", global = true)]
    pub log_format: LogFormat,

    #[command(flatten)]
    pub azure: AzureArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Credentials for ARM and Microsoft Graph. Without a client id and secret
/// the managed identity endpoint or the Azure CLI login is used.
#[derive(Debug, Args)]
pub struct AzureArgs {
    #[arg(long, env = "AZURE_TENANT_ID", global = true)]
    pub tenant_id: Option<String>,

    #[arg(long, env = "AZURE_CLIENT_ID", global = true)]
    pub client_id: Option<String>,

    #[arg(long, env = "AZURE_CLIENT_SECRET", global = true, hide_env_values = true)]
    pub client_secret: Option<String>,
}

impl AzureArgs {
    pub fn into_config(self) -> AzureDirectoryConfig {
        AzureDirectoryConfig {
            tenant_id: self.tenant_id.unwrap_or_default(),
            client_id: self.client_id,
            client_secret: self.client_secret,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Copy every role assignment of each old principal to its new principal.
    Migrate(MigrateArgs),

    /// List one principal's key vault assignments without changing anything.
    Audit(AuditArgs),
}

#[derive(Debug, Args)]
pub struct MigrateArgs {
    /// YAML run config; flags given on the command line take precedence.
    #[arg(long, env = "KVRBAC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Mapping CSV with OldPrincipal and NewPrincipal columns.
    #[arg(long, env = "KVRBAC_MAPPING_CSV")]
    pub mapping_csv: Option<PathBuf>,

    /// Directory for the operation and snapshot logs.
    #[arg(long, env = "KVRBAC_OUTPUT_PATH")]
    pub output_path: Option<PathBuf>,

    /// Pause after each real add or remove, in milliseconds.
    #[arg(long, env = "KVRBAC_THROTTLE_MS")]
    pub throttle_ms: Option<u64>,

    /// Also replicate assignments inherited from resource group or subscription.
    #[arg(long)]
    pub include_inherited: bool,

    /// Remove the old principal's assignment after the new one is in place.
    #[arg(long)]
    pub remove_old: bool,

    /// Simulate only.
    #[arg(long)]
    pub what_if: bool,

    /// Ask before each add or remove.
    #[arg(long)]
    pub confirm: bool,

    /// Exit with a failure status when any operation errored or row was skipped.
    #[arg(long)]
    pub fail_on_error: bool,
}

impl MigrateArgs {
    /// Values given on the command line, as a layer over the config file.
    /// Switches can only turn a setting on.
    pub fn overrides(&self) -> RunConfigFile {
        RunConfigFile {
            mapping_csv: self.mapping_csv.clone(),
            output_path: self.output_path.clone(),
            throttle_ms: self.throttle_ms,
            include_inherited: self.include_inherited.then_some(true),
            remove_old: self.remove_old.then_some(true),
            what_if: self.what_if.then_some(true),
            confirm: self.confirm.then_some(true),
        }
    }
}

#[derive(Debug, Args)]
pub struct AuditArgs {
    /// UPN, display name, app id or object id.
    #[arg(long)]
    pub principal: String,

    /// Subscription id or display name.
    #[arg(long)]
    pub subscription: Option<String>,

    /// Case-insensitive regex on vault names.
    #[arg(long)]
    pub vault_name_pattern: Option<String>,

    #[arg(long, requires = "tag_value")]
    pub tag_name: Option<String>,

    #[arg(long, requires = "tag_name")]
    pub tag_value: Option<String>,

    #[arg(long)]
    pub include_inherited: bool,

    #[arg(long, env = "KVRBAC_OUTPUT_PATH", default_value = ".")]
    pub output_path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_flags_become_overrides() {
        let cli = Cli::try_parse_from([
            "kvrbac",
            "migrate",
            "--mapping-csv",
            "map.csv",
            "--what-if",
            "--throttle-ms",
            "250",
        ])
        .unwrap();
        let Command::Migrate(args) = cli.command else {
            panic!("expected migrate");
        };
        let o = args.overrides();
        assert_eq!(o.mapping_csv, Some(PathBuf::from("map.csv")));
        assert_eq!(o.what_if, Some(true));
        assert_eq!(o.throttle_ms, Some(250));
        assert_eq!(o.remove_old, None);
        assert_eq!(o.output_path, None);
    }

    #[test]
    fn audit_tag_flags_come_in_pairs() {
        assert!(Cli::try_parse_from(["kvrbac", "audit", "--principal", "a", "--tag-name", "env"]).is_err());
        let cli = Cli::try_parse_from([
            "kvrbac", "audit", "--principal", "a", "--tag-name", "env", "--tag-value", "prod",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Audit(AuditArgs { tag_value: Some(_), .. })));
    }

    #[test]
    fn log_format_is_global() {
        let cli = Cli::try_parse_from(["kvrbac", "audit", "--principal", "a", "--log-format", "json"]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
    }
}
