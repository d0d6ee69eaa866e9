use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

// ── Identifiers ──────────────────────────────────────────────────────────────

/// Directory object id of a user, group or service principal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub String);

impl ObjectId {
    pub fn new(s: impl Into<String>) -> Self {
        ObjectId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Object ids are GUIDs; ARM and Graph disagree on casing.
    pub fn matches(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hierarchical ARM resource path an assignment applies to.
///
/// `/subscriptions/<id>` > `/subscriptions/<id>/resourceGroups/<rg>` >
/// `/subscriptions/<id>/resourceGroups/<rg>/providers/Microsoft.KeyVault/vaults/<name>`.
///
/// Comparison ignores ASCII case and a trailing `/`, the same way ARM does.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scope(String);

impl Scope {
    pub fn new(s: impl Into<String>) -> Self {
        Scope(s.into())
    }

    /// Like [`Scope::new`] but rejects anything that is not an absolute path.
    /// `/` is the tenant root.
    pub fn parse(s: &str) -> Result<Self, DomainError> {
        let trimmed = s.trim();
        if !trimmed.starts_with('/') {
            return Err(DomainError::InvalidScope(s.to_string()));
        }
        Ok(Scope(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn normalized(&self) -> String {
        self.0.trim_end_matches('/').to_ascii_lowercase()
    }

    /// True when `self` is a strict ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &Scope) -> bool {
        let parent = self.normalized();
        let child = other.normalized();
        child.len() > parent.len()
            && child.starts_with(&parent)
            && child.as_bytes()[parent.len()] == b'/'
    }

    /// Value of the path segment following `key` (case-insensitive), if any.
    fn segment_after(&self, key: &str) -> Option<&str> {
        let mut parts = self.0.split('/').filter(|p| !p.is_empty());
        while let Some(part) = parts.next() {
            if part.eq_ignore_ascii_case(key) {
                return parts.next();
            }
        }
        None
    }

    pub fn subscription_id(&self) -> Option<&str> {
        self.segment_after("subscriptions")
    }

    pub fn resource_group(&self) -> Option<&str> {
        self.segment_after("resourceGroups")
    }
}

impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}

impl Eq for Scope {}

impl Hash for Scope {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized().hash(state);
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Enums ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrincipalKind {
    User,
    Group,
    ServicePrincipal,
    Unknown,
}

impl std::fmt::Display for PrincipalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrincipalKind::User => write!(f, "User"),
            PrincipalKind::Group => write!(f, "Group"),
            PrincipalKind::ServicePrincipal => write!(f, "ServicePrincipal"),
            PrincipalKind::Unknown => write!(f, "Unknown"),
        }
    }
}

/// What the engine did (or would have done) for one assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Add,
    RemoveOld,
    #[serde(rename = "Skip(Add)")]
    SkipAdd,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Add => write!(f, "Add"),
            Action::RemoveOld => write!(f, "RemoveOld"),
            Action::SkipAdd => write!(f, "Skip(Add)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Success,
    Simulated,
    Exists,
    Error,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Success => write!(f, "Success"),
            Status::Simulated => write!(f, "Simulated"),
            Status::Exists => write!(f, "Exists"),
            Status::Error => write!(f, "Error"),
        }
    }
}

// ── Directory objects ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalRef {
    /// The string exactly as it appeared in the mapping input.
    pub raw_identifier: String,
    pub resolved_id: ObjectId,
    pub kind: PrincipalKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub display_name: String,
    /// `Enabled`, `Disabled`, `Warned`, ...; absent when the API omits it.
    pub state: Option<String>,
}

impl Subscription {
    /// A mapping row's subscription filter matches by id or display name.
    pub fn matches_filter(&self, filter: &str) -> bool {
        let filter = filter.trim();
        self.id.eq_ignore_ascii_case(filter) || self.display_name.eq_ignore_ascii_case(filter)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultResource {
    /// Full resource id; doubles as the vault's own scope.
    pub id: Scope,
    pub name: String,
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub scope: Scope,
    pub principal_id: String,
    pub role_definition_id: String,
    pub role_definition_name: String,
}

impl RoleAssignment {
    pub fn is_held_by(&self, principal: &ObjectId) -> bool {
        principal.matches(&self.principal_id)
    }

    /// Role definitions are compared by their trailing GUID: the same role can be
    /// reported with a subscription-qualified or a tenant-level path.
    pub fn has_role(&self, role_definition_id: &str) -> bool {
        role_key(&self.role_definition_id).eq_ignore_ascii_case(role_key(role_definition_id))
    }

    /// Whether this assignment was made at an ancestor of `vault_scope`.
    pub fn is_inherited_at(&self, vault_scope: &Scope) -> bool {
        self.scope != *vault_scope
    }
}

fn role_key(role_definition_id: &str) -> &str {
    role_definition_id
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(role_definition_id)
}

// ── Mapping input ────────────────────────────────────────────────────────────

/// Exact tag key/value pair a vault must carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagFilter {
    pub name: String,
    pub value: String,
}

impl TagFilter {
    pub fn matches(&self, tags: &HashMap<String, String>) -> bool {
        tags.get(&self.name).is_some_and(|v| *v == self.value)
    }
}

/// Compiled vault-name pattern. Unanchored and case-insensitive, like ARM names.
#[derive(Debug, Clone)]
pub struct NamePattern {
    source: String,
    regex: Regex,
}

impl NamePattern {
    pub fn new(source: &str) -> Result<Self, DomainError> {
        let regex = RegexBuilder::new(source)
            .case_insensitive(true)
            .build()
            .map_err(|e| DomainError::InvalidPattern {
                pattern: source.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self { source: source.to_string(), regex })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }
}

impl PartialEq for NamePattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for NamePattern {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingRow {
    /// 1-based data row number in the input file, for log messages.
    pub line: usize,
    pub old_principal: String,
    pub new_principal: String,
    pub subscription_filter: Option<String>,
    pub vault_name_pattern: Option<NamePattern>,
    pub tag_filter: Option<TagFilter>,
    /// `None` means the row did not say; the run-wide default applies.
    pub include_inherited: Option<bool>,
    /// Set when a cell could not be parsed. The row is skipped at run time
    /// with this message; the other rows still run.
    pub rejection: Option<String>,
}

impl MappingRow {
    pub fn effective_include_inherited(&self, global_default: bool) -> bool {
        self.include_inherited.unwrap_or(global_default)
    }
}

// ── Audit records ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OperationRecord {
    pub timestamp: DateTime<Utc>,
    pub mapping_old: String,
    pub mapping_new: String,
    pub subscription: String,
    pub vault: String,
    pub scope: String,
    pub action: Action,
    pub role: String,
    pub role_id: String,
    pub old_object_id: String,
    pub new_object_id: String,
    pub status: Status,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SnapshotRecord {
    pub timestamp: DateTime<Utc>,
    pub mapping_old: String,
    pub mapping_new: String,
    pub subscription: String,
    pub vault: String,
    pub vault_scope: String,
    /// Scope the assignment was made at; differs from `vault_scope` when inherited.
    pub scope: String,
    pub role: String,
    pub role_id: String,
    pub object_id: String,
    pub inherited: bool,
}
