use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use kvrbac_domain::{ObjectId, PrincipalKind, RoleAssignment, Scope, Subscription, VaultResource};
use tokio::sync::RwLock;
use tracing::debug;

use crate::directory::{Directory, LookupAttribute, ObjectQuery};
use crate::error::DirectoryError;

/// A user, group or service principal known to [`InMemoryDirectory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryObject {
    pub id: ObjectId,
    pub kind: PrincipalKind,
    pub display_name: String,
    pub user_principal_name: Option<String>,
    pub app_id: Option<String>,
}

impl DirectoryObject {
    pub fn user(id: &str, upn: &str, display_name: &str) -> Self {
        Self {
            id: ObjectId::new(id),
            kind: PrincipalKind::User,
            display_name: display_name.into(),
            user_principal_name: Some(upn.into()),
            app_id: None,
        }
    }

    pub fn group(id: &str, display_name: &str) -> Self {
        Self {
            id: ObjectId::new(id),
            kind: PrincipalKind::Group,
            display_name: display_name.into(),
            user_principal_name: None,
            app_id: None,
        }
    }

    pub fn service_principal(id: &str, app_id: &str, display_name: &str) -> Self {
        Self {
            id: ObjectId::new(id),
            kind: PrincipalKind::ServicePrincipal,
            display_name: display_name.into(),
            user_principal_name: None,
            app_id: Some(app_id.into()),
        }
    }

    fn matches(&self, query: &ObjectQuery) -> bool {
        if self.kind != query.kind {
            return false;
        }
        let field = match query.attribute {
            LookupAttribute::UserPrincipalName => self.user_principal_name.as_deref(),
            LookupAttribute::DisplayName => Some(self.display_name.as_str()),
            LookupAttribute::AppId => self.app_id.as_deref(),
        };
        // Graph `eq` on strings is case-insensitive.
        field.is_some_and(|f| f.eq_ignore_ascii_case(&query.value))
    }
}

#[derive(Debug, Default)]
struct Inner {
    subscriptions: Vec<Subscription>,
    fail_subscription_listing: bool,
    vaults: HashMap<String, Vec<VaultResource>>,
    fail_vault_listing: HashSet<String>,
    assignments: Vec<RoleAssignment>,
    fail_assignment_listing: HashSet<Scope>,
    objects: Vec<DirectoryObject>,
    /// Principals whose create/delete calls fail.
    fail_mutations_for: HashSet<ObjectId>,
    lookups: usize,
    creates: usize,
    deletes: usize,
}

/// In-memory implementation of [`Directory`].
///
/// State lives for the lifetime of the value. Used by tests and for rehearsing
/// a mapping without a tenant. Failures can be injected per subscription,
/// scope or principal, and every lookup and mutation is counted.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDirectory {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Seeding ───────────────────────────────────────────────────────────────

    pub async fn add_subscription(&self, id: &str, display_name: &str) {
        let mut guard = self.inner.write().await;
        guard.subscriptions.push(Subscription {
            id: id.into(),
            display_name: display_name.into(),
            state: Some("Enabled".into()),
        });
    }

    pub async fn add_vault(&self, subscription_id: &str, vault: VaultResource) {
        let mut guard = self.inner.write().await;
        guard.vaults.entry(subscription_id.to_string()).or_default().push(vault);
    }

    pub async fn add_assignment(&self, assignment: RoleAssignment) {
        self.inner.write().await.assignments.push(assignment);
    }

    pub async fn add_object(&self, object: DirectoryObject) {
        self.inner.write().await.objects.push(object);
    }

    // ── Failure injection ─────────────────────────────────────────────────────

    pub async fn fail_subscription_listing(&self) {
        self.inner.write().await.fail_subscription_listing = true;
    }

    pub async fn fail_vault_listing(&self, subscription_id: &str) {
        self.inner.write().await.fail_vault_listing.insert(subscription_id.to_string());
    }

    pub async fn fail_assignment_listing(&self, scope: &Scope) {
        self.inner.write().await.fail_assignment_listing.insert(scope.clone());
    }

    pub async fn fail_mutations_for(&self, principal: &ObjectId) {
        self.inner.write().await.fail_mutations_for.insert(principal.clone());
    }

    // ── Inspection ────────────────────────────────────────────────────────────

    pub async fn assignments(&self) -> Vec<RoleAssignment> {
        self.inner.read().await.assignments.clone()
    }

    /// Number of `find_object` calls served.
    pub async fn lookup_count(&self) -> usize {
        self.inner.read().await.lookups
    }

    /// Number of create and delete calls received, successful or not.
    pub async fn mutation_count(&self) -> usize {
        let guard = self.inner.read().await;
        guard.creates + guard.deletes
    }

    pub async fn create_count(&self) -> usize {
        self.inner.read().await.creates
    }

    pub async fn delete_count(&self) -> usize {
        self.inner.read().await.deletes
    }
}

fn same_assignment(a: &RoleAssignment, principal: &ObjectId, role_definition_id: &str, scope: &Scope) -> bool {
    a.is_held_by(principal) && a.has_role(role_definition_id) && a.scope == *scope
}

#[async_trait]
impl Directory for InMemoryDirectory {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn list_subscriptions(&self) -> Result<Vec<Subscription>, DirectoryError> {
        let guard = self.inner.read().await;
        if guard.fail_subscription_listing {
            return Err(DirectoryError::Injected("list subscriptions".into()));
        }
        Ok(guard.subscriptions.clone())
    }

    async fn list_vaults(&self, subscription_id: &str) -> Result<Vec<VaultResource>, DirectoryError> {
        let guard = self.inner.read().await;
        if guard.fail_vault_listing.contains(subscription_id) {
            return Err(DirectoryError::Injected(format!("list vaults in {}", subscription_id)));
        }
        Ok(guard.vaults.get(subscription_id).cloned().unwrap_or_default())
    }

    async fn list_role_assignments(&self, scope: &Scope) -> Result<Vec<RoleAssignment>, DirectoryError> {
        let guard = self.inner.read().await;
        if guard.fail_assignment_listing.contains(scope) {
            return Err(DirectoryError::Injected(format!("list role assignments at {}", scope)));
        }
        Ok(guard
            .assignments
            .iter()
            .filter(|a| a.scope == *scope || a.scope.is_ancestor_of(scope))
            .cloned()
            .collect())
    }

    async fn find_object(&self, query: &ObjectQuery) -> Result<Option<ObjectId>, DirectoryError> {
        let mut guard = self.inner.write().await;
        guard.lookups += 1;
        Ok(guard
            .objects
            .iter()
            .find(|o| o.matches(query))
            .map(|o| o.id.clone()))
    }

    async fn create_role_assignment(
        &self,
        principal: &ObjectId,
        role_definition_id: &str,
        scope: &Scope,
    ) -> Result<(), DirectoryError> {
        let mut guard = self.inner.write().await;
        guard.creates += 1;
        if guard.fail_mutations_for.contains(principal) {
            return Err(DirectoryError::Injected(format!("create for {}", principal)));
        }
        if guard
            .assignments
            .iter()
            .any(|a| same_assignment(a, principal, role_definition_id, scope))
        {
            debug!(%scope, role_definition_id, %principal, "InMemoryDirectory: assignment already exists");
            return Ok(());
        }
        let role_definition_name = guard
            .assignments
            .iter()
            .find(|a| a.has_role(role_definition_id))
            .map(|a| a.role_definition_name.clone())
            .unwrap_or_else(|| role_definition_id.to_string());
        debug!(%scope, role_definition_id, %principal, "InMemoryDirectory: create_role_assignment");
        guard.assignments.push(RoleAssignment {
            scope: scope.clone(),
            principal_id: principal.as_str().to_string(),
            role_definition_id: role_definition_id.to_string(),
            role_definition_name,
        });
        Ok(())
    }

    async fn delete_role_assignment(
        &self,
        principal: &ObjectId,
        role_definition_id: &str,
        scope: &Scope,
    ) -> Result<(), DirectoryError> {
        let mut guard = self.inner.write().await;
        guard.deletes += 1;
        if guard.fail_mutations_for.contains(principal) {
            return Err(DirectoryError::Injected(format!("delete for {}", principal)));
        }
        let before = guard.assignments.len();
        guard
            .assignments
            .retain(|a| !same_assignment(a, principal, role_definition_id, scope));
        if guard.assignments.len() == before {
            return Err(DirectoryError::NotFound(format!(
                "role assignment of {} to {} at {}",
                role_definition_id, principal, scope
            )));
        }
        debug!(%scope, role_definition_id, %principal, "InMemoryDirectory: delete_role_assignment");
        Ok(())
    }
}
