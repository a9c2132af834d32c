//! Descriptors for the resources the pipeline manages.

use serde_json::json;
use stratus_core::{ResourceDescriptor, ResourceKind};

use crate::config::ProvisionConfig;
use crate::image::ResolvedImage;

pub fn subscription_scope(subscription_id: &str) -> String {
    format!("/subscriptions/{}", subscription_id)
}

pub fn resource_group_scope(subscription_id: &str, resource_group: &str) -> String {
    format!("/subscriptions/{}/resourceGroups/{}", subscription_id, resource_group)
}

pub fn resource_group(subscription_id: &str, name: &str, location: &str) -> ResourceDescriptor {
    ResourceDescriptor::new(
        ResourceKind::ResourceGroup,
        name,
        subscription_scope(subscription_id),
        json!({ "location": location }),
    )
}

pub fn managed_environment(
    subscription_id: &str,
    resource_group: &str,
    name: &str,
    location: &str,
) -> ResourceDescriptor {
    ResourceDescriptor::new(
        ResourceKind::ManagedEnvironment,
        name,
        resource_group_scope(subscription_id, resource_group),
        json!({ "location": location, "properties": {} }),
    )
}

/// Container app with external ingress and a scale-to-zero envelope.
#[allow(clippy::too_many_arguments)]
pub fn container_app(
    subscription_id: &str,
    resource_group: &str,
    name: &str,
    location: &str,
    environment_id: &str,
    image: &ResolvedImage,
    config: &ProvisionConfig,
) -> ResourceDescriptor {
    ResourceDescriptor::new(
        ResourceKind::ComputeApp,
        name,
        resource_group_scope(subscription_id, resource_group),
        json!({
            "location": location,
            "properties": {
                "managedEnvironmentId": environment_id,
                "configuration": {
                    "activeRevisionsMode": "Single",
                    "ingress": {
                        "external": true,
                        "targetPort": image.target_port(config),
                        "transport": "auto",
                        "allowInsecure": false
                    }
                },
                "template": {
                    "containers": [{
                        "name": name,
                        "image": image.reference,
                        "resources": {
                            "cpu": config.container_cpu,
                            "memory": config.container_memory
                        }
                    }],
                    "scale": {
                        "minReplicas": 0,
                        "maxReplicas": config.max_replicas
                    }
                }
            }
        }),
    )
}

pub fn container_app_path(subscription_id: &str, resource_group: &str, name: &str) -> String {
    format!(
        "{}/{}/{}",
        resource_group_scope(subscription_id, resource_group),
        ResourceKind::ComputeApp.path_segment(),
        name
    )
}

pub fn managed_identity(
    subscription_id: &str,
    resource_group: &str,
    name: &str,
    location: &str,
) -> ResourceDescriptor {
    ResourceDescriptor::new(
        ResourceKind::ManagedIdentity,
        name,
        resource_group_scope(subscription_id, resource_group),
        json!({ "location": location }),
    )
}

/// Subject trusted for pushes to `branch` of `owner/repo`.
pub fn federated_subject(owner: &str, repo: &str, branch: &str) -> String {
    format!("repo:{}/{}:ref:refs/heads/{}", owner, repo, branch)
}

/// Credential name derived from the repository and branch.
///
/// Names allow letters, digits, hyphens and underscores and must start with
/// a letter or digit.
pub fn federated_credential_name(repo: &str, branch: &str) -> String {
    let raw = format!("github-{}-{}", repo, branch);
    let cleaned: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    cleaned.chars().take(120).collect()
}

pub fn federated_credential(
    identity_id: &str,
    name: &str,
    subject: &str,
    config: &ProvisionConfig,
) -> ResourceDescriptor {
    ResourceDescriptor::new(
        ResourceKind::FederatedCredential,
        name,
        identity_id,
        json!({
            "properties": {
                "issuer": config.federated_issuer,
                "subject": subject,
                "audiences": [config.federated_audience]
            }
        }),
    )
}
