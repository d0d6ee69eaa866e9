use kvrbac_directory::Directory;
use kvrbac_domain::{NamePattern, Subscription, TagFilter, VaultResource};
use tracing::{debug, warn};

/// Vaults in `subscription` passing the optional name pattern and tag filter.
/// A listing failure is logged and yields no vaults; the run goes on.
pub async fn list_scopes(
    directory: &dyn Directory,
    subscription: &Subscription,
    pattern: Option<&NamePattern>,
    tag: Option<&TagFilter>,
) -> Vec<VaultResource> {
    let vaults = match directory.list_vaults(&subscription.id).await {
        Ok(v) => v,
        Err(e) => {
            warn!(
                subscription = %subscription.display_name,
                subscription_id = %subscription.id,
                error = %e,
                "unable to list key vaults; skipping subscription"
            );
            return Vec::new();
        }
    };
    let total = vaults.len();
    let kept = filter_vaults(vaults, pattern, tag);
    debug!(subscription = %subscription.id, total, kept = kept.len(), "enumerated vaults");
    kept
}

pub fn filter_vaults(
    vaults: Vec<VaultResource>,
    pattern: Option<&NamePattern>,
    tag: Option<&TagFilter>,
) -> Vec<VaultResource> {
    vaults
        .into_iter()
        .filter(|v| pattern.map_or(true, |p| p.is_match(&v.name)))
        .filter(|v| tag.map_or(true, |t| t.matches(&v.tags)))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::*;
    use kvrbac_directory::InMemoryDirectory;
    use kvrbac_domain::Scope;

    fn vault(name: &str, tags: &[(&str, &str)]) -> VaultResource {
        VaultResource {
            id: Scope::new(format!(
                "/subscriptions/sub-1/resourceGroups/rg/providers/Microsoft.KeyVault/vaults/{name}"
            )),
            name: name.into(),
            tags: tags.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect::<HashMap<_, _>>(),
        }
    }

    fn names(vaults: &[VaultResource]) -> Vec<&str> {
        vaults.iter().map(|v| v.name.as_str()).collect()
    }

    #[test]
    fn pattern_and_tag_both_apply() {
        let vaults = vec![
            vault("kv-prod-1", &[("env", "prod")]),
            vault("kv-prod-2", &[("env", "test")]),
            vault("kv-dev", &[("env", "prod")]),
            vault("other", &[]),
        ];
        let pattern = NamePattern::new("^kv-prod").unwrap();
        let tag = TagFilter { name: "env".into(), value: "prod".into() };

        assert_eq!(names(&filter_vaults(vaults.clone(), None, None)).len(), 4);
        assert_eq!(names(&filter_vaults(vaults.clone(), Some(&pattern), None)), vec!["kv-prod-1", "kv-prod-2"]);
        assert_eq!(names(&filter_vaults(vaults.clone(), None, Some(&tag))), vec!["kv-prod-1", "kv-dev"]);
        assert_eq!(names(&filter_vaults(vaults, Some(&pattern), Some(&tag))), vec!["kv-prod-1"]);
    }

    #[test]
    fn pattern_is_case_insensitive_and_unanchored() {
        let pattern = NamePattern::new("PROD").unwrap();
        let kept = filter_vaults(vec![vault("kv-prod-1", &[]), vault("kv-dev", &[])], Some(&pattern), None);
        assert_eq!(names(&kept), vec!["kv-prod-1"]);
    }

    #[tokio::test]
    async fn listing_failure_yields_nothing() {
        let dir = Arc::new(InMemoryDirectory::new());
        dir.add_subscription("sub-1", "Production").await;
        dir.add_vault("sub-1", vault("kv-prod-1", &[])).await;
        dir.fail_vault_listing("sub-1").await;
        let sub = Subscription { id: "sub-1".into(), display_name: "Production".into(), state: None };
        assert!(list_scopes(dir.as_ref(), &sub, None, None).await.is_empty());
    }
}
