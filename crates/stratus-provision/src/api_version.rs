//! Per-run api-version lookup with a hardcoded fallback.

use std::collections::HashMap;

use serde_json::Value;
use stratus_core::{Credential, ResourceKind};
use tracing::debug;

use crate::client::ManagementApi;

/// Version used to query provider metadata itself.
pub const DISCOVERY_API_VERSION: &str = "2021-04-01";

/// Version used to list subscriptions.
pub const SUBSCRIPTIONS_API_VERSION: &str = "2020-01-01";

/// Known-good version per resource kind.
pub fn fallback_api_version(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::ResourceGroup => "2021-04-01",
        ResourceKind::ManagedEnvironment => "2023-05-01",
        ResourceKind::ComputeApp => "2023-05-01",
        ResourceKind::ManagedIdentity => "2023-01-31",
        ResourceKind::FederatedCredential => "2023-01-31",
        ResourceKind::RoleAssignment => "2022-04-01",
    }
}

/// Resolves api-versions for one pipeline run and remembers them until the run ends.
#[derive(Debug, Default)]
pub struct ApiVersionResolver {
    cache: HashMap<ResourceKind, String>,
}

impl ApiVersionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discover the newest stable version for `kind`, or fall back.
    pub async fn resolve(
        &mut self,
        api: &dyn ManagementApi,
        credential: &Credential,
        subscription_id: &str,
        kind: ResourceKind,
    ) -> String {
        if let Some(version) = self.cache.get(&kind) {
            return version.clone();
        }

        let (namespace, resource_type) = kind.provider_type();
        let path = format!("/subscriptions/{}/providers/{}", subscription_id, namespace);

        let discovered = match api.get(credential, &path, DISCOVERY_API_VERSION).await {
            Ok(response) if response.is_success() => {
                pick_stable_version(&response.body, resource_type)
            }
            Ok(response) => {
                debug!(%kind, status = response.status, "api-version discovery unavailable");
                None
            }
            Err(e) => {
                debug!(%kind, error = %e, "api-version discovery failed");
                None
            }
        };

        let version = discovered.unwrap_or_else(|| fallback_api_version(kind).to_string());
        self.cache.insert(kind, version.clone());
        version
    }
}

/// First non-preview version listed for `resource_type`.
fn pick_stable_version(provider: &Value, resource_type: &str) -> Option<String> {
    provider["resourceTypes"]
        .as_array()?
        .iter()
        .find(|t| {
            t["resourceType"]
                .as_str()
                .is_some_and(|name| name.eq_ignore_ascii_case(resource_type))
        })?["apiVersions"]
        .as_array()?
        .iter()
        .filter_map(Value::as_str)
        .find(|v| !v.contains("preview"))
        .map(str::to_string)
}
