use kvrbac_directory::Directory;
use kvrbac_domain::{ObjectId, RoleAssignment, Scope};
use tracing::warn;

/// Every assignment that applies at one vault, fetched once and queried by
/// principal.
#[derive(Debug, Clone)]
pub struct AssignmentIndex {
    vault_scope: Scope,
    assignments: Vec<RoleAssignment>,
}

impl AssignmentIndex {
    /// Fetch the assignments applying at `vault_scope`. A failure is logged
    /// and leaves the index empty.
    pub async fn load(directory: &dyn Directory, vault_scope: &Scope) -> Self {
        let assignments = match directory.list_role_assignments(vault_scope).await {
            Ok(a) => a,
            Err(e) => {
                warn!(scope = %vault_scope, error = %e, "unable to list role assignments; treating as empty");
                Vec::new()
            }
        };
        Self::from_assignments(vault_scope.clone(), assignments)
    }

    pub fn from_assignments(vault_scope: Scope, assignments: Vec<RoleAssignment>) -> Self {
        Self { vault_scope, assignments }
    }

    pub fn vault_scope(&self) -> &Scope {
        &self.vault_scope
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// All of `principal`'s assignments, inherited ones included.
    pub fn held_by(&self, principal: &ObjectId) -> impl Iterator<Item = &RoleAssignment> + '_ {
        let principal = principal.clone();
        self.assignments.iter().filter(move |a| a.is_held_by(&principal))
    }

    /// `principal`'s assignments eligible for replication.
    pub fn eligible(&self, principal: &ObjectId, include_inherited: bool) -> Vec<&RoleAssignment> {
        filter_inherited(self.held_by(principal), &self.vault_scope, include_inherited)
    }

    /// Whether `principal` already holds `role_definition_id` at exactly `scope`.
    pub fn holds(&self, principal: &ObjectId, role_definition_id: &str, scope: &Scope) -> bool {
        self.held_by(principal)
            .any(|a| a.has_role(role_definition_id) && a.scope == *scope)
    }
}

/// Keep only assignments made at `vault_scope` itself unless inherited ones
/// are wanted.
pub fn filter_inherited<'a>(
    assignments: impl IntoIterator<Item = &'a RoleAssignment>,
    vault_scope: &Scope,
    include_inherited: bool,
) -> Vec<&'a RoleAssignment> {
    assignments
        .into_iter()
        .filter(|a| include_inherited || !a.is_inherited_at(vault_scope))
        .collect()
}

/// Assignments applying at `scope`, filtered per `include_inherited`.
pub async fn assignments_at(
    directory: &dyn Directory,
    scope: &Scope,
    include_inherited: bool,
) -> Vec<RoleAssignment> {
    let index = AssignmentIndex::load(directory, scope).await;
    filter_inherited(&index.assignments, scope, include_inherited)
        .into_iter()
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use kvrbac_directory::InMemoryDirectory;

    const SUB: &str = "/subscriptions/sub-1";
    const VAULT: &str = "/subscriptions/sub-1/resourceGroups/rg/providers/Microsoft.KeyVault/vaults/kv1";
    const READER: &str = "/providers/Microsoft.Authorization/roleDefinitions/21090545-7ca7-4776-b22c-e363652d74d2";
    const OFFICER: &str = "/providers/Microsoft.Authorization/roleDefinitions/b86a8fe4-44ce-4948-aee5-eccb2c155cd7";

    fn grant(scope: &str, principal: &str, role: &str) -> RoleAssignment {
        RoleAssignment {
            scope: Scope::new(scope),
            principal_id: principal.into(),
            role_definition_id: role.into(),
            role_definition_name: String::new(),
        }
    }

    fn index() -> AssignmentIndex {
        AssignmentIndex::from_assignments(
            Scope::new(VAULT),
            vec![
                grant(VAULT, "old", READER),
                grant(SUB, "old", OFFICER),
                grant(VAULT, "other", READER),
                grant(SUB, "NEW", READER),
            ],
        )
    }

    #[test]
    fn eligibility_honors_inheritance_flag() {
        let idx = index();
        let old = ObjectId::new("old");
        assert_eq!(idx.held_by(&old).count(), 2);
        let direct = idx.eligible(&old, false);
        assert_eq!(direct.len(), 1);
        assert_eq!(direct[0].role_definition_id, READER);
        assert_eq!(idx.eligible(&old, true).len(), 2);
    }

    #[test]
    fn holds_requires_exact_scope() {
        let idx = index();
        let new = ObjectId::new("new");
        let tenant_path = format!("/subscriptions/sub-1{READER}");
        assert!(idx.holds(&new, &tenant_path, &Scope::new(SUB)));
        assert!(idx.holds(&new, READER, &Scope::new("/SUBSCRIPTIONS/sub-1/")));
        // An inherited grant does not count as held at the vault itself.
        assert!(!idx.holds(&new, READER, &Scope::new(VAULT)));
        assert!(!idx.holds(&new, OFFICER, &Scope::new(SUB)));
    }

    #[tokio::test]
    async fn assignments_at_filters_after_fetch() {
        let dir = Arc::new(InMemoryDirectory::new());
        for a in index().assignments {
            dir.add_assignment(a).await;
        }
        assert_eq!(assignments_at(dir.as_ref(), &Scope::new(VAULT), true).await.len(), 4);
        assert_eq!(assignments_at(dir.as_ref(), &Scope::new(VAULT), false).await.len(), 2);

        dir.fail_assignment_listing(&Scope::new(VAULT)).await;
        assert!(AssignmentIndex::load(dir.as_ref(), &Scope::new(VAULT)).await.is_empty());
    }
}
