//! Idempotent check-then-create.
//!
//! Always reads before writing, so provisioning can be re-run against a
//! partially built environment without duplicating or clobbering resources.

use serde_json::Value;
use stratus_core::{Credential, ResourceDescriptor};
use tracing::{debug, info};

use crate::client::ManagementApi;
use crate::error::Result;

/// What `ensure` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    Created,
    AlreadyExists,
}

/// Result of ensuring a resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Ensured {
    pub outcome: EnsureOutcome,
    /// Canonical path of the resource.
    pub path: String,
    /// Resource body as observed after the step.
    pub resource: Value,
}

impl Ensured {
    pub fn was_created(&self) -> bool {
        self.outcome == EnsureOutcome::Created
    }

    /// The resource id, falling back to the canonical path.
    pub fn id(&self) -> String {
        self.resource["id"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| self.path.clone())
    }
}

/// Check-then-create primitive used for every resource kind.
pub struct ResourceEnsurer<'a> {
    api: &'a dyn ManagementApi,
    credential: &'a Credential,
}

impl<'a> ResourceEnsurer<'a> {
    pub fn new(api: &'a dyn ManagementApi, credential: &'a Credential) -> Self {
        Self { api, credential }
    }

    /// Ensure `descriptor` exists.
    ///
    /// A 2xx read short-circuits without mutation; a 404 leads to a
    /// create-or-replace write where 409 counts as already existing. Any
    /// other status is fatal.
    pub async fn ensure(&self, descriptor: &ResourceDescriptor, api_version: &str) -> Result<Ensured> {
        let path = descriptor.canonical_path();

        let existing = self.api.get(self.credential, &path, api_version).await?;
        if existing.is_success() {
            debug!(kind = %descriptor.kind, %path, "resource already exists");
            return Ok(Ensured {
                outcome: EnsureOutcome::AlreadyExists,
                path,
                resource: existing.body,
            });
        }
        if !existing.is_not_found() {
            return Err(existing.into_error("GET", &path));
        }

        let created = self
            .api
            .put(self.credential, &path, api_version, &descriptor.desired_configuration)
            .await?;

        if created.is_success() {
            info!(kind = %descriptor.kind, %path, "resource created");
            return Ok(Ensured {
                outcome: EnsureOutcome::Created,
                path,
                resource: created.body,
            });
        }

        if created.is_conflict() {
            debug!(kind = %descriptor.kind, %path, "create raced with an existing resource");
            let resource = match self.api.get(self.credential, &path, api_version).await {
                Ok(response) if response.is_success() => response.body,
                _ => descriptor.desired_configuration.clone(),
            };
            return Ok(Ensured {
                outcome: EnsureOutcome::AlreadyExists,
                path,
                resource,
            });
        }

        Err(created.into_error("PUT", &path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProvisionError;
    use crate::memory::{InMemoryManagementApi, Method};
    use chrono::Utc;
    use serde_json::json;
    use stratus_core::ResourceKind;

    fn descriptor() -> ResourceDescriptor {
        ResourceDescriptor::new(
            ResourceKind::ResourceGroup,
            "rg-demo",
            "/subscriptions/s-1",
            json!({ "location": "westeurope", "tags": { "owner": "stratus" } }),
        )
    }

    fn credential() -> Credential {
        Credential::new("t", Utc::now(), "scope")
    }

    #[tokio::test]
    async fn test_ensure_twice_is_idempotent() {
        let api = InMemoryManagementApi::new();
        let cred = credential();
        let ensurer = ResourceEnsurer::new(&api, &cred);

        let first = ensurer.ensure(&descriptor(), "2021-04-01").await.unwrap();
        let second = ensurer.ensure(&descriptor(), "2021-04-01").await.unwrap();

        assert_eq!(first.outcome, EnsureOutcome::Created);
        assert_eq!(second.outcome, EnsureOutcome::AlreadyExists);
        assert_eq!(first.resource, second.resource);
        assert_eq!(api.puts_matching("/resourcegroups/").await.len(), 1);
    }

    #[tokio::test]
    async fn test_existing_resource_is_not_mutated() {
        let api = InMemoryManagementApi::new();
        let live = json!({ "id": "/subscriptions/s-1/resourceGroups/rg-demo", "location": "northeurope" });
        api.insert("/subscriptions/s-1/resourcegroups/rg-demo", live.clone()).await;
        let cred = credential();

        let ensured = ResourceEnsurer::new(&api, &cred)
            .ensure(&descriptor(), "2021-04-01")
            .await
            .unwrap();

        assert_eq!(ensured.outcome, EnsureOutcome::AlreadyExists);
        assert_eq!(ensured.resource, live);
        assert!(api.puts_matching("").await.is_empty());
    }

    #[tokio::test]
    async fn test_conflict_on_create_is_benign() {
        let api = InMemoryManagementApi::new();
        api.script(Method::Put, "/resourcegroups/rg-demo", 409, json!({ "error": {} }), 1).await;
        let cred = credential();

        let ensured = ResourceEnsurer::new(&api, &cred)
            .ensure(&descriptor(), "2021-04-01")
            .await
            .unwrap();
        assert_eq!(ensured.outcome, EnsureOutcome::AlreadyExists);
        assert_eq!(ensured.id(), "/subscriptions/s-1/resourcegroups/rg-demo");
    }

    #[tokio::test]
    async fn test_other_statuses_are_fatal() {
        let api = InMemoryManagementApi::new();
        api.script(Method::Get, "/resourcegroups/rg-demo", 403, json!("denied"), 1).await;
        let cred = credential();
        let ensurer = ResourceEnsurer::new(&api, &cred);

        let err = ensurer.ensure(&descriptor(), "v").await.unwrap_err();
        assert!(matches!(err, ProvisionError::Http { status: 403, ref method, .. } if method == "GET"));

        api.script(Method::Put, "/resourcegroups/rg-demo", 400, json!("bad"), 1).await;
        let err = ensurer.ensure(&descriptor(), "v").await.unwrap_err();
        assert_eq!(err.http_status(), Some(400));
    }
}
