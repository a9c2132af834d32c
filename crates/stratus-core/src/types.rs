//! Common types used across Stratus.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of operation a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionKind {
    /// Resource group, managed environment and container app.
    InitialSetup,
    /// Deployment identity with a federated trust for CI.
    CicdSetup,
    /// Swap the image of an existing container app.
    ImageDeploy,
    /// Repository bootstrap on the source host (sibling flow).
    GithubSetup,
    /// Package visibility change on the source host (sibling flow).
    MakePrivate,
}

impl SessionKind {
    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::InitialSetup => "initial-setup",
            SessionKind::CicdSetup => "cicd-setup",
            SessionKind::ImageDeploy => "image-deploy",
            SessionKind::GithubSetup => "github-setup",
            SessionKind::MakePrivate => "make-private",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a session in the session table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Registered, run not yet attached.
    Pending,
    /// Run attached and in flight.
    Running,
    /// Run finished successfully.
    Completed,
    /// Run aborted with an error.
    Failed,
    /// Run was cancelled by the client.
    Cancelled,
}

impl SessionStatus {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }

    /// Returns true if the session is still live.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Pending | SessionStatus::Running)
    }
}

/// Kinds of cloud resources the orchestrator manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    ResourceGroup,
    ManagedEnvironment,
    ComputeApp,
    ManagedIdentity,
    FederatedCredential,
    RoleAssignment,
}

impl ResourceKind {
    /// Path segment between the parent scope and the resource name.
    pub fn path_segment(&self) -> &'static str {
        match self {
            ResourceKind::ResourceGroup => "resourcegroups",
            ResourceKind::ManagedEnvironment => "providers/Microsoft.App/managedEnvironments",
            ResourceKind::ComputeApp => "providers/Microsoft.App/containerApps",
            ResourceKind::ManagedIdentity => {
                "providers/Microsoft.ManagedIdentity/userAssignedIdentities"
            }
            ResourceKind::FederatedCredential => "federatedIdentityCredentials",
            ResourceKind::RoleAssignment => "providers/Microsoft.Authorization/roleAssignments",
        }
    }

    /// Provider namespace and resource type used for api-version discovery.
    pub fn provider_type(&self) -> (&'static str, &'static str) {
        match self {
            ResourceKind::ResourceGroup => ("Microsoft.Resources", "resourceGroups"),
            ResourceKind::ManagedEnvironment => ("Microsoft.App", "managedEnvironments"),
            ResourceKind::ComputeApp => ("Microsoft.App", "containerApps"),
            ResourceKind::ManagedIdentity => {
                ("Microsoft.ManagedIdentity", "userAssignedIdentities")
            }
            ResourceKind::FederatedCredential => (
                "Microsoft.ManagedIdentity",
                "userAssignedIdentities/federatedIdentityCredentials",
            ),
            ResourceKind::RoleAssignment => ("Microsoft.Authorization", "roleAssignments"),
        }
    }

    /// Human readable label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            ResourceKind::ResourceGroup => "resource group",
            ResourceKind::ManagedEnvironment => "managed environment",
            ResourceKind::ComputeApp => "container app",
            ResourceKind::ManagedIdentity => "managed identity",
            ResourceKind::FederatedCredential => "federated credential",
            ResourceKind::RoleAssignment => "role assignment",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A resource the ensurer should bring into existence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub kind: ResourceKind,
    pub name: String,
    /// Scope the resource lives under, e.g. `/subscriptions/{id}`.
    pub parent_scope: String,
    /// Body sent on create.
    pub desired_configuration: serde_json::Value,
}

impl ResourceDescriptor {
    pub fn new(
        kind: ResourceKind,
        name: impl Into<String>,
        parent_scope: impl Into<String>,
        desired_configuration: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            parent_scope: parent_scope.into(),
            desired_configuration,
        }
    }

    /// Canonical management path of the resource.
    pub fn canonical_path(&self) -> String {
        format!(
            "{}/{}/{}",
            self.parent_scope.trim_end_matches('/'),
            self.kind.path_segment(),
            self.name
        )
    }
}

/// Bearer credential for one pipeline run.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub scope: String,
}

impl Credential {
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>, scope: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_at,
            scope: scope.into(),
        }
    }

    /// Check if the token has expired.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_session_status_terminal() {
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Failed.is_terminal());
        assert!(SessionStatus::Cancelled.is_terminal());
        assert!(!SessionStatus::Running.is_terminal());
        assert!(SessionStatus::Pending.is_active());
    }

    #[test]
    fn test_session_kind_wire_names() {
        let json = serde_json::to_string(&SessionKind::CicdSetup).unwrap();
        assert_eq!(json, "\"cicd-setup\"");
        assert_eq!(SessionKind::MakePrivate.to_string(), "make-private");
    }

    #[test]
    fn test_canonical_path() {
        let rg = ResourceDescriptor::new(
            ResourceKind::ResourceGroup,
            "rg-demo",
            "/subscriptions/sub-1/",
            json!({ "location": "westeurope" }),
        );
        assert_eq!(rg.canonical_path(), "/subscriptions/sub-1/resourcegroups/rg-demo");

        let app = ResourceDescriptor::new(
            ResourceKind::ComputeApp,
            "web",
            "/subscriptions/sub-1/resourceGroups/rg-demo",
            json!({}),
        );
        assert_eq!(
            app.canonical_path(),
            "/subscriptions/sub-1/resourceGroups/rg-demo/providers/Microsoft.App/containerApps/web"
        );
    }

    #[test]
    fn test_credential_debug_redacts_token() {
        let cred = Credential::new("secret-token", Utc::now(), "https://management.azure.com/");
        let printed = format!("{:?}", cred);
        assert!(!printed.contains("secret-token"));
        assert!(printed.contains("redacted"));
    }
}
