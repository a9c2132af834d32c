//! Role assignment with a two-tier fallback.
//!
//! The management API is inconsistent about which call shape a caller may
//! use, so a subscription-level write is tried first and a resource-group
//! level write second. Both count 409 as success.

use std::fmt;

use serde_json::{json, Value};
use stratus_core::Credential;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::ManagementApi;
use crate::error::{AttemptFailure, RoleAssignError};
use crate::resources::subscription_scope;

/// Which call shape produced the assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentTier {
    /// Written under the subscription with the effective scope in the body.
    Subscription,
    /// Written under the target scope itself.
    ResourceGroup,
}

impl fmt::Display for AssignmentTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssignmentTier::Subscription => f.write_str("subscription"),
            AssignmentTier::ResourceGroup => f.write_str("resource-group"),
        }
    }
}

/// A role grant that is in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleAssignment {
    /// Path of the assignment written by the successful tier.
    pub assignment_id: String,
    pub tier: AssignmentTier,
    /// The grant was already present (409).
    pub already_existed: bool,
}

pub struct RoleAssignmentResolver<'a> {
    api: &'a dyn ManagementApi,
    credential: &'a Credential,
    subscription_id: &'a str,
    api_version: &'a str,
}

impl<'a> RoleAssignmentResolver<'a> {
    pub fn new(
        api: &'a dyn ManagementApi,
        credential: &'a Credential,
        subscription_id: &'a str,
        api_version: &'a str,
    ) -> Self {
        Self {
            api,
            credential,
            subscription_id,
            api_version,
        }
    }

    fn role_definition(&self, role_id: &str) -> String {
        format!(
            "{}/providers/Microsoft.Authorization/roleDefinitions/{}",
            subscription_scope(self.subscription_id),
            role_id
        )
    }

    /// Grant `role_id` to `principal_id` on `scope`.
    ///
    /// Each tier uses a fresh assignment id. The resource-group tier runs at
    /// most once, and only after the subscription tier failed.
    pub async fn assign_role(
        &self,
        principal_id: &str,
        scope: &str,
        role_id: &str,
    ) -> Result<RoleAssignment, RoleAssignError> {
        let role_definition = self.role_definition(role_id);

        let subscription_path = format!(
            "{}/providers/Microsoft.Authorization/roleAssignments/{}",
            subscription_scope(self.subscription_id),
            Uuid::new_v4()
        );
        let body = json!({
            "properties": {
                "roleDefinitionId": role_definition,
                "principalId": principal_id,
                "principalType": "ServicePrincipal",
                "scope": scope,
            }
        });

        let subscription = match self.attempt(&subscription_path, &body).await {
            Ok(already_existed) => {
                info!(%scope, tier = %AssignmentTier::Subscription, already_existed, "role assigned");
                return Ok(RoleAssignment {
                    assignment_id: subscription_path,
                    tier: AssignmentTier::Subscription,
                    already_existed,
                });
            }
            Err(failure) => failure,
        };
        warn!(%scope, failure = %subscription, "subscription-level role assignment failed, retrying at resource group");

        let scoped_path = format!(
            "{}/providers/Microsoft.Authorization/roleAssignments/{}",
            scope.trim_end_matches('/'),
            Uuid::new_v4()
        );
        let body = json!({
            "properties": {
                "roleDefinitionId": role_definition,
                "principalId": principal_id,
                "principalType": "ServicePrincipal",
            }
        });

        match self.attempt(&scoped_path, &body).await {
            Ok(already_existed) => {
                info!(%scope, tier = %AssignmentTier::ResourceGroup, already_existed, "role assigned");
                Ok(RoleAssignment {
                    assignment_id: scoped_path,
                    tier: AssignmentTier::ResourceGroup,
                    already_existed,
                })
            }
            Err(resource_group) => Err(RoleAssignError {
                subscription,
                resource_group,
            }),
        }
    }

    /// One write. `Ok(true)` when the grant already existed.
    async fn attempt(&self, path: &str, body: &Value) -> Result<bool, AttemptFailure> {
        debug!(%path, "writing role assignment");
        match self.api.put(self.credential, path, self.api_version, body).await {
            Ok(response) if response.is_success() => Ok(false),
            Ok(response) if response.is_conflict() => Ok(true),
            Ok(response) => Err(AttemptFailure {
                status: Some(response.status),
                message: response.body_text(),
            }),
            Err(e) => Err(AttemptFailure {
                status: None,
                message: e.to_string(),
            }),
        }
    }
}
