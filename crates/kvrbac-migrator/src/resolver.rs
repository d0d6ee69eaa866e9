use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use kvrbac_directory::{Directory, LookupAttribute, ObjectQuery};
use kvrbac_domain::{ObjectId, PrincipalKind, PrincipalRef};
use regex::Regex;
use tracing::{debug, warn};

use crate::error::ResolutionError;

static CANONICAL_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .unwrap()
});

/// Lookups tried, in order, for an identifier that is not already an object id.
/// The first hit wins.
const LOOKUP_ORDER: &[(PrincipalKind, LookupAttribute)] = &[
    (PrincipalKind::User, LookupAttribute::UserPrincipalName),
    (PrincipalKind::User, LookupAttribute::DisplayName),
    (PrincipalKind::ServicePrincipal, LookupAttribute::AppId),
    (PrincipalKind::ServicePrincipal, LookupAttribute::DisplayName),
    (PrincipalKind::Group, LookupAttribute::DisplayName),
];

pub fn is_canonical_id(identifier: &str) -> bool {
    CANONICAL_ID.is_match(identifier)
}

/// Turns mapping identifiers into directory object ids, remembering every
/// successful resolution for the rest of the run.
pub struct IdentityResolver {
    directory: Arc<dyn Directory>,
    cache: HashMap<String, PrincipalRef>,
}

impl IdentityResolver {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self { directory, cache: HashMap::new() }
    }

    /// Resolve `identifier`. A canonical GUID is taken as an object id without
    /// a directory call. A lookup call that fails is logged and treated as no
    /// match for that step.
    pub async fn resolve(&mut self, identifier: &str) -> Result<PrincipalRef, ResolutionError> {
        if identifier.trim().is_empty() {
            return Err(ResolutionError::Blank);
        }
        if let Some(hit) = self.cache.get(identifier) {
            debug!(identifier, object_id = %hit.resolved_id, "resolved from cache");
            return Ok(hit.clone());
        }

        let resolved = if is_canonical_id(identifier) {
            PrincipalRef {
                raw_identifier: identifier.to_string(),
                resolved_id: ObjectId::new(identifier),
                kind: PrincipalKind::Unknown,
            }
        } else {
            self.lookup(identifier).await?
        };

        debug!(identifier, object_id = %resolved.resolved_id, kind = %resolved.kind, "resolved identity");
        self.cache.insert(identifier.to_string(), resolved.clone());
        Ok(resolved)
    }

    async fn lookup(&self, identifier: &str) -> Result<PrincipalRef, ResolutionError> {
        for (kind, attribute) in LOOKUP_ORDER {
            let query = ObjectQuery::new(*kind, *attribute, identifier);
            match self.directory.find_object(&query).await {
                Ok(Some(id)) => {
                    return Ok(PrincipalRef {
                        raw_identifier: identifier.to_string(),
                        resolved_id: id,
                        kind: *kind,
                    })
                }
                Ok(None) => {}
                Err(e) => warn!(identifier, kind = %kind, attribute = %attribute, error = %e, "directory lookup failed"),
            }
        }
        Err(ResolutionError::NotFound(identifier.to_string()))
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvrbac_directory::{DirectoryObject, InMemoryDirectory};

    const ALICE: &str = "11111111-1111-1111-1111-111111111111";

    async fn directory() -> Arc<InMemoryDirectory> {
        let dir = Arc::new(InMemoryDirectory::new());
        dir.add_object(DirectoryObject::user(ALICE, "alice@corp.com", "Alice")).await;
        dir.add_object(DirectoryObject::service_principal(
            "22222222-2222-2222-2222-222222222222",
            "app-123",
            "deployer",
        ))
        .await;
        dir.add_object(DirectoryObject::group("33333333-3333-3333-3333-333333333333", "Alice"))
            .await;
        dir.add_object(DirectoryObject::group("44444444-4444-4444-4444-444444444444", "kv-admins"))
            .await;
        dir
    }

    #[test]
    fn canonical_ids() {
        assert!(is_canonical_id(ALICE));
        assert!(is_canonical_id("ABCDEF01-2345-6789-abcd-ef0123456789"));
        assert!(!is_canonical_id("alice@corp.com"));
        assert!(!is_canonical_id("11111111111111111111111111111111"));
        assert!(!is_canonical_id(" 11111111-1111-1111-1111-111111111111"));
    }

    #[tokio::test]
    async fn guid_passes_through_without_lookup() {
        let dir = directory().await;
        let mut resolver = IdentityResolver::new(dir.clone());
        let r = resolver.resolve("99999999-9999-9999-9999-999999999999").await.unwrap();
        assert_eq!(r.kind, PrincipalKind::Unknown);
        assert_eq!(r.resolved_id.as_str(), "99999999-9999-9999-9999-999999999999");
        assert_eq!(dir.lookup_count().await, 0);
    }

    #[tokio::test]
    async fn user_wins_over_group_with_same_display_name() {
        let mut resolver = IdentityResolver::new(directory().await);
        let r = resolver.resolve("Alice").await.unwrap();
        assert_eq!(r.kind, PrincipalKind::User);
        assert_eq!(r.resolved_id.as_str(), ALICE);
        assert_eq!(r.raw_identifier, "Alice");
    }

    #[tokio::test]
    async fn app_id_then_group() {
        let mut resolver = IdentityResolver::new(directory().await);
        let sp = resolver.resolve("app-123").await.unwrap();
        assert_eq!(sp.kind, PrincipalKind::ServicePrincipal);
        let group = resolver.resolve("kv-admins").await.unwrap();
        assert_eq!(group.kind, PrincipalKind::Group);
        assert_eq!(group.resolved_id.as_str(), "44444444-4444-4444-4444-444444444444");
    }

    #[tokio::test]
    async fn second_resolution_is_served_from_cache() {
        let dir = directory().await;
        let mut resolver = IdentityResolver::new(dir.clone());
        resolver.resolve("alice@corp.com").await.unwrap();
        let after_first = dir.lookup_count().await;
        assert_eq!(after_first, 1);
        resolver.resolve("alice@corp.com").await.unwrap();
        assert_eq!(dir.lookup_count().await, after_first);
        assert_eq!(resolver.cached(), 1);
    }

    #[tokio::test]
    async fn unknown_and_blank_identities() {
        let dir = directory().await;
        let mut resolver = IdentityResolver::new(dir.clone());
        assert_eq!(
            resolver.resolve("nobody").await.unwrap_err(),
            ResolutionError::NotFound("nobody".into())
        );
        assert_eq!(dir.lookup_count().await, LOOKUP_ORDER.len());
        assert_eq!(resolver.resolve("  ").await.unwrap_err(), ResolutionError::Blank);
        assert_eq!(resolver.cached(), 0);
    }
}
