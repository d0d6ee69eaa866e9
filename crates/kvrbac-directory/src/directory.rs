use async_trait::async_trait;
use kvrbac_domain::{ObjectId, PrincipalKind, RoleAssignment, Scope, Subscription, VaultResource};

use crate::error::DirectoryError;

/// Directory attribute an identity string is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupAttribute {
    UserPrincipalName,
    DisplayName,
    AppId,
}

impl std::fmt::Display for LookupAttribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LookupAttribute::UserPrincipalName => write!(f, "userPrincipalName"),
            LookupAttribute::DisplayName => write!(f, "displayName"),
            LookupAttribute::AppId => write!(f, "appId"),
        }
    }
}

/// Exact-match lookup of one kind of directory object by one attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectQuery {
    pub kind: PrincipalKind,
    pub attribute: LookupAttribute,
    pub value: String,
}

impl ObjectQuery {
    pub fn new(kind: PrincipalKind, attribute: LookupAttribute, value: impl Into<String>) -> Self {
        Self { kind, attribute, value: value.into() }
    }
}

/// Control-plane and identity-directory operations the migrator consumes.
///
/// Every call is independent and individually fallible. Subscription context is
/// carried by the arguments; implementations keep no "current subscription".
#[async_trait]
pub trait Directory: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    // ── Read-only ─────────────────────────────────────────────────────────────

    async fn list_subscriptions(&self) -> Result<Vec<Subscription>, DirectoryError>;

    /// Key vault resources in a subscription, with their tags.
    async fn list_vaults(&self, subscription_id: &str) -> Result<Vec<VaultResource>, DirectoryError>;

    /// Assignments that apply at `scope`: those made at the scope itself and
    /// those inherited from its ancestors. Assignments on child resources are
    /// not included.
    async fn list_role_assignments(&self, scope: &Scope) -> Result<Vec<RoleAssignment>, DirectoryError>;

    /// First object matching `query`, or `None` when nothing matches.
    async fn find_object(&self, query: &ObjectQuery) -> Result<Option<ObjectId>, DirectoryError>;

    // ── Mutating ──────────────────────────────────────────────────────────────

    /// Grant `role_definition_id` to `principal` at `scope`. An identical
    /// existing assignment counts as success.
    async fn create_role_assignment(
        &self,
        principal: &ObjectId,
        role_definition_id: &str,
        scope: &Scope,
    ) -> Result<(), DirectoryError>;

    /// Revoke the assignment of `role_definition_id` to `principal` made at
    /// exactly `scope`.
    async fn delete_role_assignment(
        &self,
        principal: &ObjectId,
        role_definition_id: &str,
        scope: &Scope,
    ) -> Result<(), DirectoryError>;
}
