use std::collections::HashMap;
use std::process::Command as StdCommand;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use kvrbac_domain::{ObjectId, PrincipalKind, RoleAssignment, Scope, Subscription, VaultResource};
use reqwest::Url;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::directory::{Directory, ObjectQuery};
use crate::error::DirectoryError;

const SUBSCRIPTIONS_API: &str = "2022-12-01";
const RESOURCES_API: &str = "2021-04-01";
const AUTHORIZATION_API: &str = "2022-04-01";
const VAULT_RESOURCE_TYPE: &str = "Microsoft.KeyVault/vaults";

// ── Configuration ─────────────────────────────────────────────────────────────

/// Operator-level settings for the Azure directory client.
#[derive(Clone, Default)]
pub struct AzureDirectoryConfig {
    /// Azure tenant ID (GUID). Required for service principal and CLI tokens.
    pub tenant_id: String,
    /// Service principal client ID (optional; falls back to MSI/CLI).
    pub client_id: Option<String>,
    /// Service principal client secret (optional; falls back to MSI/CLI).
    pub client_secret: Option<String>,
}

// ── Base URLs (overridden in tests) ───────────────────────────────────────────

#[derive(Clone)]
pub(crate) struct BaseUrls {
    management: String,
    login:      String,
    graph:      String,
}

impl Default for BaseUrls {
    fn default() -> Self {
        Self {
            management: "https://management.azure.com".into(),
            login:      "https://login.microsoftonline.com".into(),
            graph:      "https://graph.microsoft.com".into(),
        }
    }
}

/// Which API a bearer token is minted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Audience {
    Management,
    Graph,
}

impl Audience {
    fn resource(self) -> &'static str {
        match self {
            Audience::Management => "https://management.azure.com",
            Audience::Graph      => "https://graph.microsoft.com",
        }
    }

    fn scope(self) -> String {
        format!("{}/.default", self.resource())
    }
}

// ── Token provider ────────────────────────────────────────────────────────────

/// Abstraction over Azure token acquisition; enables test injection.
#[async_trait]
trait TokenProvider: Send + Sync {
    async fn token(&self, audience: Audience) -> Result<String, DirectoryError>;
}

type TokenCache = Mutex<HashMap<Audience, (String, Instant)>>;

async fn cached(cache: &TokenCache, audience: Audience) -> Option<String> {
    let guard = cache.lock().await;
    guard
        .get(&audience)
        .filter(|(_, expiry)| Instant::now() < *expiry)
        .map(|(tok, _)| tok.clone())
}

async fn remember(cache: &TokenCache, audience: Audience, tok: &str, expires_in: u64) {
    let expiry = Instant::now() + Duration::from_secs(expires_in.saturating_sub(60));
    cache.lock().await.insert(audience, (tok.to_string(), expiry));
}

// ── Service Principal ─────────────────────────────────────────────────────────

struct ServicePrincipalTokenProvider {
    tenant_id:     String,
    client_id:     String,
    client_secret: String,
    login_base:    String,
    client:        reqwest::Client,
    cache:         TokenCache,
}

#[async_trait]
impl TokenProvider for ServicePrincipalTokenProvider {
    async fn token(&self, audience: Audience) -> Result<String, DirectoryError> {
        if let Some(tok) = cached(&self.cache, audience).await {
            return Ok(tok);
        }

        let url = format!("{}/{}/oauth2/v2.0/token", self.login_base, self.tenant_id);
        let scope = audience.scope();
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", scope.as_str()),
        ];
        let resp: Value = self
            .client
            .post(&url)
            .form(&params)
            .send()
            .await
            .map_err(|e| DirectoryError::Auth(format!("SP token request: {}", e)))?
            .json()
            .await
            .map_err(|e| DirectoryError::Auth(format!("SP token decode: {}", e)))?;

        let tok = resp["access_token"]
            .as_str()
            .ok_or_else(|| DirectoryError::Auth(format!("SP token: no access_token in response: {}", resp)))?
            .to_string();
        let expires_in = resp["expires_in"].as_u64().unwrap_or(3600);
        remember(&self.cache, audience, &tok, expires_in).await;
        Ok(tok)
    }
}

// ── Managed Identity (IMDS) ───────────────────────────────────────────────────

struct ManagedIdentityTokenProvider {
    client: reqwest::Client,
    cache:  TokenCache,
}

#[async_trait]
impl TokenProvider for ManagedIdentityTokenProvider {
    async fn token(&self, audience: Audience) -> Result<String, DirectoryError> {
        if let Some(tok) = cached(&self.cache, audience).await {
            return Ok(tok);
        }

        let resp: Value = self
            .client
            .get("http://169.254.169.254/metadata/identity/oauth2/token")
            .header("Metadata", "true")
            .query(&[
                ("api-version", "2018-02-01"),
                ("resource", audience.resource()),
            ])
            .send()
            .await
            .map_err(|e| DirectoryError::Auth(format!("IMDS token request: {}", e)))?
            .json()
            .await
            .map_err(|e| DirectoryError::Auth(format!("IMDS token decode: {}", e)))?;

        let tok = resp["access_token"]
            .as_str()
            .ok_or_else(|| DirectoryError::Auth(format!("IMDS token: no access_token: {}", resp)))?
            .to_string();
        let expires_in = resp["expires_in"]
            .as_str()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(3600);
        remember(&self.cache, audience, &tok, expires_in).await;
        Ok(tok)
    }
}

// ── Azure CLI ─────────────────────────────────────────────────────────────────

struct AzureCliTokenProvider {
    tenant_id: String,
}

#[async_trait]
impl TokenProvider for AzureCliTokenProvider {
    async fn token(&self, audience: Audience) -> Result<String, DirectoryError> {
        let mut args = vec![
            "account",
            "get-access-token",
            "--resource",
            audience.resource(),
            "--output",
            "json",
        ];
        if !self.tenant_id.is_empty() {
            args.extend(["--tenant", self.tenant_id.as_str()]);
        }
        let output = StdCommand::new("az")
            .args(&args)
            .output()
            .map_err(|e| DirectoryError::Auth(format!("az CLI not found: {}. Install Azure CLI or configure service principal credentials.", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DirectoryError::Auth(format!(
                "az account get-access-token failed: {}. Run 'az login' first.",
                stderr.trim()
            )));
        }

        let resp: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| DirectoryError::Auth(format!("az CLI output parse: {}", e)))?;
        let tok = resp["accessToken"]
            .as_str()
            .ok_or_else(|| DirectoryError::Auth("az CLI: no accessToken in output".into()))?
            .to_string();
        Ok(tok)
    }
}

// ── Static (tests) ────────────────────────────────────────────────────────────

pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self, _audience: Audience) -> Result<String, DirectoryError> {
        Ok(self.0.clone())
    }
}

// ── AzureDirectory ────────────────────────────────────────────────────────────

/// [`Directory`] backed by Azure Resource Manager and Microsoft Graph.
pub struct AzureDirectory {
    client:     reqwest::Client,
    token:      Box<dyn TokenProvider>,
    base:       BaseUrls,
    /// Role definition id → role name. Definitions are immutable for a run.
    role_names: Mutex<HashMap<String, String>>,
}

impl AzureDirectory {
    /// Create an `AzureDirectory`, auto-selecting the token provider:
    /// 1. `client_id` + `client_secret` in config → Service Principal
    /// 2. `AZURE_CLIENT_ID` + `AZURE_CLIENT_SECRET` env vars → Service Principal
    /// 3. `IDENTITY_ENDPOINT` env var → Managed Identity (IMDS)
    /// 4. Otherwise → Azure CLI (`az account get-access-token`)
    pub fn new(config: AzureDirectoryConfig) -> Self {
        let client = reqwest::Client::new();
        let base   = BaseUrls::default();

        let sp_credentials = match (config.client_id.clone(), config.client_secret.clone()) {
            (Some(cid), Some(cs)) => Some((cid, cs)),
            _ => match (std::env::var("AZURE_CLIENT_ID"), std::env::var("AZURE_CLIENT_SECRET")) {
                (Ok(cid), Ok(cs)) => Some((cid, cs)),
                _ => None,
            },
        };

        let token: Box<dyn TokenProvider> = if let Some((client_id, client_secret)) = sp_credentials {
            debug!("Using service principal credentials");
            Box::new(ServicePrincipalTokenProvider {
                tenant_id:  config.tenant_id.clone(),
                client_id,
                client_secret,
                login_base: base.login.clone(),
                client:     client.clone(),
                cache:      Mutex::new(HashMap::new()),
            })
        } else if std::env::var("IDENTITY_ENDPOINT").is_ok() {
            debug!("Using managed identity credentials");
            Box::new(ManagedIdentityTokenProvider {
                client: client.clone(),
                cache:  Mutex::new(HashMap::new()),
            })
        } else {
            debug!("Using Azure CLI credentials");
            Box::new(AzureCliTokenProvider {
                tenant_id: config.tenant_id.clone(),
            })
        };

        Self { client, token, base, role_names: Mutex::new(HashMap::new()) }
    }

    /// Create an `AzureDirectory` with a static bearer token and custom base URLs.
    /// Used exclusively in tests.
    #[cfg(test)]
    pub(crate) fn with_static_token(token: &str, base: BaseUrls) -> Self {
        Self {
            client:     reqwest::Client::new(),
            token:      Box::new(StaticToken(token.to_string())),
            base,
            role_names: Mutex::new(HashMap::new()),
        }
    }

    async fn bearer(&self, audience: Audience) -> Result<String, DirectoryError> {
        self.token.token(audience).await
    }

    fn management_url(&self, path: &str, params: &[(&str, &str)]) -> Result<String, DirectoryError> {
        let base = format!("{}{}", self.base.management, path);
        Url::parse_with_params(&base, params)
            .map(String::from)
            .map_err(|e| DirectoryError::Internal(format!("bad url {}: {}", base, e)))
    }

    // ── Error parsing ─────────────────────────────────────────────────────────

    /// ARM and Graph share the `{ "error": { "code", "message" } }` shape.
    fn parse_arm_error(body: &Value) -> String {
        let err = body
            .get("error")
            .or_else(|| body.get("Error"))
            .unwrap_or(body);
        let code    = err["code"].as_str().unwrap_or("Unknown");
        let message = err["message"].as_str().unwrap_or("unknown error");
        format!("{}: {}", code, message)
    }

    // ── HTTP verbs ────────────────────────────────────────────────────────────

    async fn get_json(&self, url: &str, audience: Audience) -> Result<Value, DirectoryError> {
        let token = self.bearer(audience).await?;
        debug!(url, "GET");
        let resp = self
            .client
            .get(url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| DirectoryError::Request(format!("GET {}: {}", url, e)))?;

        let status = resp.status().as_u16();
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        if !(200..300).contains(&status) {
            return Err(DirectoryError::Api {
                operation: format!("GET {}", url),
                status,
                message: Self::parse_arm_error(&body),
            });
        }
        Ok(body)
    }

    /// Collect `value` arrays across pages. ARM pages with `nextLink`, Graph
    /// with `@odata.nextLink`.
    async fn get_paged(&self, url: &str, audience: Audience) -> Result<Vec<Value>, DirectoryError> {
        let mut items = Vec::new();
        let mut next = Some(url.to_string());
        while let Some(page_url) = next.take() {
            let body = self.get_json(&page_url, audience).await?;
            if let Some(values) = body["value"].as_array() {
                items.extend(values.iter().cloned());
            }
            next = body["nextLink"]
                .as_str()
                .or_else(|| body["@odata.nextLink"].as_str())
                .map(String::from);
        }
        Ok(items)
    }

    async fn arm_put(&self, url: &str, body: &Value) -> Result<(u16, Value), DirectoryError> {
        let token = self.bearer(Audience::Management).await?;
        debug!(url, "Azure ARM PUT");
        let resp = self
            .client
            .put(url)
            .bearer_auth(&token)
            .json(body)
            .send()
            .await
            .map_err(|e| DirectoryError::Request(format!("PUT {}: {}", url, e)))?;

        let status = resp.status().as_u16();
        let body_val: Value = resp.json().await.unwrap_or(Value::Null);
        Ok((status, body_val))
    }

    async fn arm_delete(&self, url: &str) -> Result<(), DirectoryError> {
        let token = self.bearer(Audience::Management).await?;
        debug!(url, "Azure ARM DELETE");
        let resp = self
            .client
            .delete(url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| DirectoryError::Request(format!("DELETE {}: {}", url, e)))?;

        let status = resp.status().as_u16();
        // 204 = already gone
        if (200..300).contains(&status) {
            return Ok(());
        }

        let body: Value = resp.json().await.unwrap_or(Value::Null);
        Err(DirectoryError::Api {
            operation: format!("DELETE {}", url),
            status,
            message: Self::parse_arm_error(&body),
        })
    }

    // ── Role assignments ──────────────────────────────────────────────────────

    /// Look up (and cache) the display name of a role definition. Falls back to
    /// the id itself when the definition cannot be read.
    async fn role_name(&self, role_definition_id: &str) -> String {
        let key = role_definition_id.to_ascii_lowercase();
        if let Some(name) = self.role_names.lock().await.get(&key) {
            return name.clone();
        }

        let name = match self.management_url(role_definition_id, &[("api-version", AUTHORIZATION_API)]) {
            Ok(url) => match self.get_json(&url, Audience::Management).await {
                Ok(body) => body["properties"]["roleName"].as_str().map(String::from),
                Err(e) => {
                    warn!(role_definition_id, error = %e, "Could not read role definition");
                    None
                }
            },
            Err(e) => {
                warn!(role_definition_id, error = %e, "Could not build role definition url");
                None
            }
        };
        let name = name.unwrap_or_else(|| role_definition_id.to_string());
        self.role_names.lock().await.insert(key, name.clone());
        name
    }

    async fn to_assignment(&self, item: &Value) -> Result<RoleAssignment, DirectoryError> {
        let props = &item["properties"];
        let scope = props["scope"]
            .as_str()
            .ok_or_else(|| DirectoryError::Malformed(format!("role assignment without scope: {}", item)))?;
        let scope = Scope::parse(scope).map_err(|e| DirectoryError::Malformed(e.to_string()))?;
        let role_definition_id = props["roleDefinitionId"].as_str().unwrap_or("").to_string();
        let role_definition_name = self.role_name(&role_definition_id).await;
        Ok(RoleAssignment {
            scope,
            principal_id: props["principalId"].as_str().unwrap_or("").to_string(),
            role_definition_id,
            role_definition_name,
        })
    }

    fn assignments_path(scope: &Scope) -> String {
        format!(
            "{}/providers/Microsoft.Authorization/roleAssignments",
            scope.as_str().trim_end_matches('/')
        )
    }
}

// ── Graph filter helpers ─────────────────────────────────────────────────────

fn graph_collection(kind: PrincipalKind) -> Option<&'static str> {
    match kind {
        PrincipalKind::User             => Some("users"),
        PrincipalKind::ServicePrincipal => Some("servicePrincipals"),
        PrincipalKind::Group            => Some("groups"),
        PrincipalKind::Unknown          => None,
    }
}

/// OData string literal: single quotes are escaped by doubling.
fn odata_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn vault_from(item: &Value) -> Result<VaultResource, DirectoryError> {
    let id = item["id"]
        .as_str()
        .ok_or_else(|| DirectoryError::Malformed(format!("resource without id: {}", item)))?;
    let tags = item["tags"]
        .as_object()
        .map(|t| {
            t.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default();
    Ok(VaultResource {
        id:   Scope::parse(id).map_err(|e| DirectoryError::Malformed(e.to_string()))?,
        name: item["name"].as_str().unwrap_or("").to_string(),
        tags,
    })
}

// ── Directory impl ───────────────────────────────────────────────────────────

#[async_trait]
impl Directory for AzureDirectory {
    fn name(&self) -> &'static str {
        "azure"
    }

    async fn list_subscriptions(&self) -> Result<Vec<Subscription>, DirectoryError> {
        let url = self.management_url("/subscriptions", &[("api-version", SUBSCRIPTIONS_API)])?;
        let items = self.get_paged(&url, Audience::Management).await?;
        let subs: Vec<Subscription> = items
            .iter()
            .filter_map(|s| {
                Some(Subscription {
                    id:           s["subscriptionId"].as_str()?.to_string(),
                    display_name: s["displayName"].as_str().unwrap_or("").to_string(),
                    state:        s["state"].as_str().map(String::from),
                })
            })
            .collect();
        info!(count = subs.len(), "Listed accessible subscriptions");
        Ok(subs)
    }

    async fn list_vaults(&self, subscription_id: &str) -> Result<Vec<VaultResource>, DirectoryError> {
        let filter = format!("resourceType eq {}", odata_literal(VAULT_RESOURCE_TYPE));
        let url = self.management_url(
            &format!("/subscriptions/{}/resources", subscription_id),
            &[("$filter", filter.as_str()), ("api-version", RESOURCES_API)],
        )?;
        let items = self.get_paged(&url, Audience::Management).await?;
        items.iter().map(vault_from).collect()
    }

    async fn list_role_assignments(&self, scope: &Scope) -> Result<Vec<RoleAssignment>, DirectoryError> {
        let url = self.management_url(
            &Self::assignments_path(scope),
            &[("$filter", "atScope()"), ("api-version", AUTHORIZATION_API)],
        )?;
        let items = self.get_paged(&url, Audience::Management).await?;
        let mut out = Vec::with_capacity(items.len());
        for item in &items {
            match self.to_assignment(item).await {
                Ok(assignment) => out.push(assignment),
                Err(e) => warn!(%scope, error = %e, "Skipping unreadable role assignment"),
            }
        }
        Ok(out)
    }

    async fn find_object(&self, query: &ObjectQuery) -> Result<Option<ObjectId>, DirectoryError> {
        let collection = graph_collection(query.kind).ok_or_else(|| {
            DirectoryError::Internal(format!("cannot look up objects of kind {}", query.kind))
        })?;
        let filter = format!("{} eq {}", query.attribute, odata_literal(&query.value));
        let base = format!("{}/v1.0/{}", self.base.graph, collection);
        let url = Url::parse_with_params(&base, &[("$filter", filter.as_str()), ("$select", "id")])
            .map_err(|e| DirectoryError::Internal(format!("bad url {}: {}", base, e)))?;

        let body = self.get_json(url.as_str(), Audience::Graph).await?;
        let values = body["value"].as_array().cloned().unwrap_or_default();
        if values.len() > 1 {
            warn!(
                kind = %query.kind,
                attribute = %query.attribute,
                value = %query.value,
                matches = values.len(),
                "Ambiguous directory lookup; using the first match"
            );
        }
        Ok(values
            .first()
            .and_then(|v| v["id"].as_str())
            .map(ObjectId::new))
    }

    async fn create_role_assignment(
        &self,
        principal: &ObjectId,
        role_definition_id: &str,
        scope: &Scope,
    ) -> Result<(), DirectoryError> {
        let assignment_id = Uuid::new_v4();
        let url = self.management_url(
            &format!("{}/{}", Self::assignments_path(scope), assignment_id),
            &[("api-version", AUTHORIZATION_API)],
        )?;
        let body = json!({
            "properties": {
                "roleDefinitionId": role_definition_id,
                "principalId": principal.as_str(),
            }
        });
        let (status, body_val) = self.arm_put(&url, &body).await?;
        if (200..300).contains(&status) {
            return Ok(());
        }
        // 409 = RoleAssignmentExists
        if status == 409 {
            debug!(%scope, role_definition_id, %principal, "RBAC role assignment already exists");
            return Ok(());
        }
        Err(DirectoryError::Api {
            operation: format!("assign role on {}", scope),
            status,
            message: Self::parse_arm_error(&body_val),
        })
    }

    async fn delete_role_assignment(
        &self,
        principal: &ObjectId,
        role_definition_id: &str,
        scope: &Scope,
    ) -> Result<(), DirectoryError> {
        let filter = format!("principalId eq {}", odata_literal(principal.as_str()));
        let url = self.management_url(
            &Self::assignments_path(scope),
            &[("$filter", filter.as_str()), ("api-version", AUTHORIZATION_API)],
        )?;
        let items = self.get_paged(&url, Audience::Management).await?;

        let target = items.iter().find(|item| {
            let props = &item["properties"];
            let same_scope = props["scope"].as_str().is_some_and(|s| Scope::new(s) == *scope);
            let candidate = RoleAssignment {
                scope:                scope.clone(),
                principal_id:         props["principalId"].as_str().unwrap_or("").to_string(),
                role_definition_id:   props["roleDefinitionId"].as_str().unwrap_or("").to_string(),
                role_definition_name: String::new(),
            };
            same_scope && candidate.is_held_by(principal) && candidate.has_role(role_definition_id)
        });

        let assignment_id = target
            .and_then(|item| item["id"].as_str())
            .ok_or_else(|| {
                DirectoryError::NotFound(format!(
                    "role assignment of {} to {} at {}",
                    role_definition_id, principal, scope
                ))
            })?;
        let url = self.management_url(assignment_id, &[("api-version", AUTHORIZATION_API)])?;
        self.arm_delete(&url).await
    }
}
