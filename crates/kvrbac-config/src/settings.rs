use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// Run options as they appear in a YAML run-config file. Every key is
/// optional; the command line fills in or overrides whatever is absent.
///
/// ```yaml
/// MappingCsv: ./mapping.csv
/// OutputPath: ./logs
/// ThrottleMs: 250
/// IncludeInherited: false
/// RemoveOld: true
/// WhatIf: true
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct RunConfigFile {
    pub mapping_csv: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub throttle_ms: Option<u64>,
    pub include_inherited: Option<bool>,
    pub remove_old: Option<bool>,
    pub what_if: Option<bool>,
    pub confirm: Option<bool>,
}

impl RunConfigFile {
    /// Layer `overrides` on top of `self`; set fields in `overrides` win.
    pub fn overlay(self, overrides: RunConfigFile) -> RunConfigFile {
        RunConfigFile {
            mapping_csv: overrides.mapping_csv.or(self.mapping_csv),
            output_path: overrides.output_path.or(self.output_path),
            throttle_ms: overrides.throttle_ms.or(self.throttle_ms),
            include_inherited: overrides.include_inherited.or(self.include_inherited),
            remove_old: overrides.remove_old.or(self.remove_old),
            what_if: overrides.what_if.or(self.what_if),
            confirm: overrides.confirm.or(self.confirm),
        }
    }
}

/// Fully resolved run options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    pub mapping_csv: PathBuf,
    /// Directory the three log artifacts are written to.
    pub output_path: PathBuf,
    /// Delay after each real mutating call; 0 disables throttling.
    pub throttle_ms: u64,
    /// Default for rows without an `IncludeInherited` cell.
    pub include_inherited: bool,
    pub remove_old: bool,
    pub what_if: bool,
    pub confirm: bool,
}

impl TryFrom<RunConfigFile> for RunConfig {
    type Error = ConfigError;

    fn try_from(file: RunConfigFile) -> Result<Self, Self::Error> {
        Ok(RunConfig {
            mapping_csv: file.mapping_csv.ok_or(ConfigError::MissingSetting("MappingCsv"))?,
            output_path: file.output_path.unwrap_or_else(|| PathBuf::from(".")),
            throttle_ms: file.throttle_ms.unwrap_or(0),
            include_inherited: file.include_inherited.unwrap_or(false),
            remove_old: file.remove_old.unwrap_or(false),
            what_if: file.what_if.unwrap_or(false),
            confirm: file.confirm.unwrap_or(false),
        })
    }
}

/// Parse a YAML run-config file.
pub fn load_run_config(path: &Path) -> Result<RunConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    debug!("Loading run config from {}", path.display());
    serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
        path: path.display().to_string(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_unset() {
        let file = RunConfigFile {
            mapping_csv: Some("map.csv".into()),
            ..Default::default()
        };
        let cfg = RunConfig::try_from(file).unwrap();
        assert_eq!(cfg.output_path, PathBuf::from("."));
        assert_eq!(cfg.throttle_ms, 0);
        assert!(!cfg.what_if && !cfg.confirm && !cfg.remove_old && !cfg.include_inherited);
    }

    #[test]
    fn mapping_csv_is_required() {
        let err = RunConfig::try_from(RunConfigFile::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSetting("MappingCsv")));
    }

    #[test]
    fn overrides_win() {
        let file = RunConfigFile {
            mapping_csv: Some("a.csv".into()),
            throttle_ms: Some(100),
            what_if: Some(true),
            ..Default::default()
        };
        let cli = RunConfigFile {
            mapping_csv: Some("b.csv".into()),
            what_if: Some(false),
            ..Default::default()
        };
        let merged = file.overlay(cli);
        assert_eq!(merged.mapping_csv, Some(PathBuf::from("b.csv")));
        assert_eq!(merged.throttle_ms, Some(100));
        assert_eq!(merged.what_if, Some(false));
    }

    #[test]
    fn yaml_keys_are_pascal_case() {
        let parsed: RunConfigFile =
            serde_yaml::from_str("MappingCsv: m.csv\nThrottleMs: 250\nRemoveOld: true\n").unwrap();
        assert_eq!(parsed.mapping_csv, Some(PathBuf::from("m.csv")));
        assert_eq!(parsed.throttle_ms, Some(250));
        assert_eq!(parsed.remove_old, Some(true));
        assert!(serde_yaml::from_str::<RunConfigFile>("Bogus: 1\n").is_err());
    }
}
