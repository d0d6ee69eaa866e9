use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim};
use kvrbac_domain::{MappingRow, NamePattern, TagFilter};
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::raw::{RawMappingRow, KNOWN_COLUMNS, REQUIRED_COLUMNS};

/// Read and validate the mapping CSV.
///
/// Header names are matched case-insensitively and rewritten to their canonical
/// spelling before rows are deserialized. Rows may stop short of the header;
/// missing cells read as blank. Fails when the file is absent, when a required
/// column is missing, or when it has no data rows. A row whose vault-name pattern
/// does not compile is returned with [`MappingRow::rejection`] set.
pub fn load_mapping(path: &Path) -> Result<Vec<MappingRow>, ConfigError> {
    let path_str = path.display().to_string();
    if !path.is_file() {
        return Err(ConfigError::MissingInput { path: path_str });
    }

    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|e| ConfigError::CsvParse { path: path_str.clone(), source: e })?;

    let headers = reader
        .headers()
        .map_err(|e| ConfigError::CsvParse { path: path_str.clone(), source: e })?
        .clone();
    let headers = canonical_headers(&headers);

    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|col| !headers.iter().any(|h| h == **col))
        .map(|col| col.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ConfigError::MissingColumns { path: path_str, missing });
    }
    reader.set_headers(headers);

    let mut rows = Vec::new();
    for (i, record) in reader.deserialize::<RawMappingRow>().enumerate() {
        let raw = record.map_err(|e| ConfigError::CsvParse { path: path_str.clone(), source: e })?;
        rows.push(convert_row(raw, i + 1));
    }

    if rows.is_empty() {
        return Err(ConfigError::EmptyInput { path: path_str });
    }
    debug!("Loaded {} mapping rows from {}", rows.len(), path_str);
    Ok(rows)
}

fn canonical_headers(headers: &StringRecord) -> StringRecord {
    headers
        .iter()
        .map(|h| {
            KNOWN_COLUMNS
                .iter()
                .find(|known| known.eq_ignore_ascii_case(h))
                .map_or(h, |known| *known)
        })
        .collect()
}

fn convert_row(raw: RawMappingRow, line: usize) -> MappingRow {
    let (vault_name_pattern, rejection) = match non_empty(raw.vault_name_pattern).map(|p| NamePattern::new(&p)) {
        None => (None, None),
        Some(Ok(pattern)) => (Some(pattern), None),
        Some(Err(e)) => {
            warn!(line, error = %e, "Row will be skipped");
            (None, Some(e.to_string()))
        }
    };

    let tag_filter = match (non_empty(raw.tag_name), non_empty(raw.tag_value)) {
        (Some(name), Some(value)) => Some(TagFilter { name, value }),
        (None, None) => None,
        (name, value) => {
            warn!(
                line,
                tag_name = ?name,
                tag_value = ?value,
                "TagName and TagValue must both be set; ignoring tag filter for this row"
            );
            None
        }
    };

    MappingRow {
        line,
        old_principal: raw.old_principal.unwrap_or_default().trim().to_string(),
        new_principal: raw.new_principal.unwrap_or_default().trim().to_string(),
        subscription_filter: non_empty(raw.subscription),
        vault_name_pattern,
        tag_filter,
        include_inherited: raw.include_inherited.as_deref().and_then(parse_flag),
        rejection,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Interpret an `IncludeInherited` cell. `true`, `1` and `yes` (any case) are
/// truthy, any other text is false, and a blank cell leaves the flag unset.
pub fn parse_flag(value: &str) -> Option<bool> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    Some(["true", "1", "yes"].iter().any(|t| t.eq_ignore_ascii_case(value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_values() {
        assert_eq!(parse_flag("true"), Some(true));
        assert_eq!(parse_flag("True"), Some(true));
        assert_eq!(parse_flag("YES"), Some(true));
        assert_eq!(parse_flag("1"), Some(true));
        assert_eq!(parse_flag("false"), Some(false));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), Some(false));
        assert_eq!(parse_flag("  "), None);
    }

    #[test]
    fn headers_are_canonicalized() {
        let raw = StringRecord::from(vec!["oldprincipal", "NEWPRINCIPAL", "Notes"]);
        let out = canonical_headers(&raw);
        assert_eq!(out.iter().collect::<Vec<_>>(), vec!["OldPrincipal", "NewPrincipal", "Notes"]);
    }

    #[test]
    fn half_tag_filter_is_dropped() {
        let raw = RawMappingRow {
            old_principal: Some(" alice@corp.com ".into()),
            new_principal: Some("bob@corp.com".into()),
            subscription: Some("  ".into()),
            vault_name_pattern: None,
            tag_name: Some("env".into()),
            tag_value: None,
            include_inherited: None,
        };
        let row = convert_row(raw, 3);
        assert_eq!(row.old_principal, "alice@corp.com");
        assert_eq!(row.subscription_filter, None);
        assert_eq!(row.tag_filter, None);
        assert_eq!(row.include_inherited, None);
        assert_eq!(row.line, 3);
        assert_eq!(row.rejection, None);
    }

    #[test]
    fn bad_pattern_rejects_only_that_row() {
        let raw = RawMappingRow {
            old_principal: Some("a".into()),
            new_principal: Some("b".into()),
            subscription: None,
            vault_name_pattern: Some("kv-[".into()),
            tag_name: None,
            tag_value: None,
            include_inherited: None,
        };
        let row = convert_row(raw, 7);
        assert!(row.vault_name_pattern.is_none());
        let reason = row.rejection.expect("row should carry the pattern error");
        assert!(reason.contains("kv-["), "got: {}", reason);
    }
}
