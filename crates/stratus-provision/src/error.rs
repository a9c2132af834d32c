//! Error types for provisioning.

use std::fmt;

use serde_json::json;
use thiserror::Error;

/// Sign-in or token exchange failed. Fatal, never retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    /// The sign-in tool could not be started.
    #[error("Sign-in tool '{program}' could not be started: {message}")]
    ToolUnavailable { program: String, message: String },

    /// Interactive sign-in did not succeed.
    #[error("Sign-in failed: {0}")]
    SignInFailed(String),

    /// The sign-in result could not be exchanged for a management token.
    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    /// Sign-in did not complete in time.
    #[error("Sign-in timed out after {0}s")]
    TimedOut(u64),
}

/// A management call failed at a check-or-create step.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProvisionError {
    /// The API answered with a status that is neither success nor benign.
    #[error("{method} {path} returned HTTP {status}: {body}")]
    Http {
        method: String,
        path: String,
        status: u16,
        body: String,
    },

    /// The request never got an answer.
    #[error("Transport error calling {path}: {message}")]
    Transport { path: String, message: String },

    /// The API answered with something we could not use.
    #[error("Unexpected response from {path}: {message}")]
    MalformedResponse { path: String, message: String },

    /// No subscription is available to provision into.
    #[error("No enabled subscription is visible to the signed-in account")]
    NoSubscription,
}

impl ProvisionError {
    /// HTTP status behind this error, if any.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            ProvisionError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn malformed(path: impl Into<String>, message: impl Into<String>) -> Self {
        ProvisionError::MalformedResponse {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// One failed tier of a role assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    pub status: Option<u16>,
    pub message: String,
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP {}: {}", status, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Both role assignment tiers failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Role assignment failed at subscription scope ({subscription}) and at resource group scope ({resource_group})")]
pub struct RoleAssignError {
    pub subscription: AttemptFailure,
    pub resource_group: AttemptFailure,
}

impl RoleAssignError {
    /// Status of the last attempt, falling back to the first.
    pub fn http_status(&self) -> Option<u16> {
        self.resource_group.status.or(self.subscription.status)
    }
}

/// No usable image reference could be derived. Degrades to the placeholder.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no image name, package URL or repository was supplied")]
    NoSource,

    #[error("package URL '{0}' does not match .../<owner>/<repo>/pkgs/container/<name>")]
    MalformedPackageUrl(String),
}

/// Any fatal error surfaced at the pipeline boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    RoleAssign(#[from] RoleAssignError),

    /// The run observed its cancellation signal.
    #[error("Operation cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Short classifier used in the failure payload.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Auth(_) => "auth",
            PipelineError::Provision(_) => "provision",
            PipelineError::RoleAssign(_) => "role_assignment",
            PipelineError::Cancelled => "cancelled",
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            PipelineError::Provision(e) => e.http_status(),
            PipelineError::RoleAssign(e) => e.http_status(),
            PipelineError::Auth(_) | PipelineError::Cancelled => None,
        }
    }

    /// Remediation hint, bucketed by HTTP status.
    pub fn guidance(&self) -> &'static str {
        match (self, self.http_status()) {
            (_, Some(401)) => {
                "The management API rejected the access token. Sign in again and retry the operation."
            }
            (_, Some(403)) => {
                "The signed-in account is not allowed to perform this step. It needs Owner or User Access Administrator rights on the subscription or resource group."
            }
            (PipelineError::Auth(_), _) => {
                "Sign-in did not complete. Make sure the cloud CLI is installed and that you can sign in interactively, then retry."
            }
            _ => {
                "Check the log above for the failing step. Re-running the operation is safe: resources that already exist are reused."
            }
        }
    }

    /// Payload of the terminal `failed` status event.
    pub fn to_payload(&self) -> serde_json::Value {
        json!({
            "error": self.to_string(),
            "kind": self.kind(),
            "httpStatus": self.http_status(),
            "guidance": self.guidance(),
        })
    }
}

/// Convenience Result type for provisioning operations.
pub type Result<T> = std::result::Result<T, ProvisionError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> PipelineError {
        PipelineError::Provision(ProvisionError::Http {
            method: "PUT".to_string(),
            path: "/subscriptions/s/resourcegroups/rg".to_string(),
            status,
            body: "{}".to_string(),
        })
    }

    #[test]
    fn test_guidance_buckets() {
        assert!(http(401).guidance().contains("Sign in again"));
        assert!(http(403).guidance().contains("Owner"));
        assert!(http(500).guidance().contains("Re-running"));
        assert!(PipelineError::Auth(AuthError::TimedOut(30))
            .guidance()
            .contains("Sign-in did not complete"));
    }

    #[test]
    fn test_role_error_status_prefers_last_tier() {
        let err = RoleAssignError {
            subscription: AttemptFailure { status: Some(403), message: "denied".to_string() },
            resource_group: AttemptFailure { status: None, message: "reset".to_string() },
        };
        assert_eq!(err.http_status(), Some(403));

        let payload = PipelineError::from(err).to_payload();
        assert_eq!(payload["kind"], "role_assignment");
        assert_eq!(payload["httpStatus"], 403);
    }

    #[test]
    fn test_payload_without_status() {
        let payload = PipelineError::Provision(ProvisionError::NoSubscription).to_payload();
        assert!(payload["httpStatus"].is_null());
        assert_eq!(payload["kind"], "provision");
    }
}
