use serde::Deserialize;

/// Column names of the mapping input, in their canonical spelling.
pub const OLD_PRINCIPAL: &str = "OldPrincipal";
pub const NEW_PRINCIPAL: &str = "NewPrincipal";
pub const SUBSCRIPTION: &str = "Subscription";
pub const VAULT_NAME_PATTERN: &str = "VaultNamePattern";
pub const TAG_NAME: &str = "TagName";
pub const TAG_VALUE: &str = "TagValue";
pub const INCLUDE_INHERITED: &str = "IncludeInherited";

pub const REQUIRED_COLUMNS: &[&str] = &[OLD_PRINCIPAL, NEW_PRINCIPAL];

pub const KNOWN_COLUMNS: &[&str] = &[
    OLD_PRINCIPAL,
    NEW_PRINCIPAL,
    SUBSCRIPTION,
    VAULT_NAME_PATTERN,
    TAG_NAME,
    TAG_VALUE,
    INCLUDE_INHERITED,
];

/// One record of the mapping CSV, as read. Empty cells and absent optional
/// columns both come through as `None`.
#[derive(Debug, Deserialize)]
pub struct RawMappingRow {
    #[serde(rename = "OldPrincipal", default)]
    pub old_principal: Option<String>,
    #[serde(rename = "NewPrincipal", default)]
    pub new_principal: Option<String>,
    #[serde(rename = "Subscription", default)]
    pub subscription: Option<String>,
    #[serde(rename = "VaultNamePattern", default)]
    pub vault_name_pattern: Option<String>,
    #[serde(rename = "TagName", default)]
    pub tag_name: Option<String>,
    #[serde(rename = "TagValue", default)]
    pub tag_value: Option<String>,
    #[serde(rename = "IncludeInherited", default)]
    pub include_inherited: Option<String>,
}
