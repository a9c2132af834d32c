//! # Stratus Provision
//!
//! Sequences idempotent infrastructure operations against the cloud
//! management API and reports progress through a [`ProgressSink`].
//!
//! [`ProgressSink`]: stratus_core::ProgressSink

pub mod api_version;
pub mod auth;
pub mod client;
pub mod config;
pub mod ensure;
pub mod error;
pub mod image;
pub mod memory;
pub mod pipeline;
pub mod resources;
pub mod role;

pub use api_version::ApiVersionResolver;
pub use auth::{Authenticator, AzureCliAuthenticator, StaticTokenAuthenticator};
pub use client::{ApiResponse, HttpManagementApi, ManagementApi};
pub use config::ProvisionConfig;
pub use ensure::{EnsureOutcome, Ensured, ResourceEnsurer};
pub use error::{AuthError, PipelineError, ProvisionError, ResolveError, RoleAssignError};
pub use image::{resolve_image, ImageTier, ResolvedImage};
pub use memory::InMemoryManagementApi;
pub use pipeline::{PipelineStage, ProvisioningPipeline};
pub use role::{AssignmentTier, RoleAssignment, RoleAssignmentResolver};
