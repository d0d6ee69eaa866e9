use async_trait::async_trait;
use kvrbac_domain::{Action, ObjectId, Scope};

use crate::decision::Approval;

/// A mutating action awaiting operator approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAction {
    pub action: Action,
    pub principal: ObjectId,
    pub role_name: String,
    pub role_definition_id: String,
    pub scope: Scope,
}

impl std::fmt::Display for PendingAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let verb = match self.action {
            Action::RemoveOld => "Remove",
            Action::Add | Action::SkipAdd => "Add",
        };
        write!(
            f,
            "{} role '{}' for {} at {}",
            verb, self.role_name, self.principal, self.scope
        )
    }
}

/// Source of operator approvals in confirmation mode. The console prompt lives
/// in the binary; the engine only sees the answer.
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, pending: &PendingAction) -> Approval;
}
