//! Provisioning policy and endpoints.

use serde::{Deserialize, Serialize};

/// Built-in Contributor role.
pub const CONTRIBUTOR_ROLE_ID: &str = "b24988ac-6180-42a0-ab88-20f7382dd24c";

/// Configuration for the provisioning pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    /// Base URL of the management API.
    pub management_endpoint: String,

    /// Token audience for the management API.
    pub management_scope: String,

    /// Subscription to provision into. Discovered when unset.
    pub subscription_id: Option<String>,

    /// Registry used for images derived from owner/name pairs.
    pub image_registry: String,

    /// Ingress port for a recognized application image.
    pub app_target_port: u16,

    /// Ingress port for the placeholder image.
    pub fallback_target_port: u16,

    /// Public image deployed when no image reference can be derived.
    pub placeholder_image: String,

    /// Upper bound of the scale envelope. The lower bound is always zero.
    pub max_replicas: u32,

    /// CPU cores per container.
    pub container_cpu: f64,

    /// Memory per container.
    pub container_memory: String,

    /// Role granted to the deployment identity.
    pub role_definition_id: String,

    /// Issuer trusted by the federated credential.
    pub federated_issuer: String,

    /// Audience of the federated credential.
    pub federated_audience: String,

    /// Branch trusted when the request does not name one.
    pub default_branch: String,

    /// Appended to the app name to form the deployment identity name.
    pub identity_suffix: String,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            management_endpoint: "https://management.azure.com".to_string(),
            management_scope: "https://management.azure.com/".to_string(),
            subscription_id: None,
            image_registry: "ghcr.io".to_string(),
            app_target_port: 3000,
            fallback_target_port: 80,
            placeholder_image: "mcr.microsoft.com/azuredocs/containerapps-helloworld:latest"
                .to_string(),
            max_replicas: 3,
            container_cpu: 0.5,
            container_memory: "1Gi".to_string(),
            role_definition_id: CONTRIBUTOR_ROLE_ID.to_string(),
            federated_issuer: "https://token.actions.githubusercontent.com".to_string(),
            federated_audience: "api://AzureADTokenExchange".to_string(),
            default_branch: "main".to_string(),
            identity_suffix: "-deployer".to_string(),
        }
    }
}
