//! Provisioning pipeline.
//!
//! One run per session: sign in, pick a subscription, then walk the fixed
//! step sequence of the requested operation strictly in order. Every step is
//! a check-then-create, so a failed run can simply be started again.

use std::fmt;
use std::sync::Arc;

use serde_json::{json, Value};
use stratus_core::{
    CancelSignal, CicdSetupPayload, Credential, ImageDeployPayload, ImageSource,
    InitialSetupPayload, Operation, OperationRequest, ProgressEvent, ProgressSink,
    ResourceDescriptor, ResourceKind, SessionStatus,
};
use tracing::{error, info, warn};

use crate::api_version::{ApiVersionResolver, SUBSCRIPTIONS_API_VERSION};
use crate::auth::Authenticator;
use crate::client::ManagementApi;
use crate::config::ProvisionConfig;
use crate::ensure::{Ensured, ResourceEnsurer};
use crate::error::{PipelineError, ProvisionError};
use crate::image::{resolve_image, ResolvedImage};
use crate::resources;
use crate::role::RoleAssignmentResolver;

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Idle,
    Authenticating,
    ResolvingSubscription,
    ResolvingImage,
    CreatingResources(ResourceKind),
    AssigningRole,
    RegisteringFederatedCredential,
    DeployingImage,
    Completed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStage::Idle => f.write_str("idle"),
            PipelineStage::Authenticating => f.write_str("authenticating"),
            PipelineStage::ResolvingSubscription => f.write_str("resolving subscription"),
            PipelineStage::ResolvingImage => f.write_str("resolving image"),
            PipelineStage::CreatingResources(kind) => write!(f, "creating {}", kind.label()),
            PipelineStage::AssigningRole => f.write_str("assigning role"),
            PipelineStage::RegisteringFederatedCredential => {
                f.write_str("registering federated credential")
            }
            PipelineStage::DeployingImage => f.write_str("deploying image"),
            PipelineStage::Completed => f.write_str("completed"),
        }
    }
}

/// Runs provisioning operations against the management API.
#[derive(Clone)]
pub struct ProvisioningPipeline {
    api: Arc<dyn ManagementApi>,
    authenticator: Arc<dyn Authenticator>,
    config: ProvisionConfig,
}

impl ProvisioningPipeline {
    pub fn new(
        api: Arc<dyn ManagementApi>,
        authenticator: Arc<dyn Authenticator>,
        config: ProvisionConfig,
    ) -> Self {
        Self {
            api,
            authenticator,
            config,
        }
    }

    pub fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    /// Run `request` to completion, reporting through `sink`.
    ///
    /// Emits `starting` first and exactly one terminal status, except when
    /// the run stops on `cancel`: whoever raised the signal reports the
    /// terminal status in that case.
    pub async fn run(
        &self,
        request: &OperationRequest,
        sink: &dyn ProgressSink,
        cancel: &CancelSignal,
    ) -> SessionStatus {
        info!("🚀 Starting {} session {}", request.kind(), request.session_id);
        sink.emit(ProgressEvent::starting()).await;

        let mut stage = PipelineStage::Idle;
        let result = self.execute(request, sink, cancel, &mut stage).await;

        match result {
            Ok(payload) => {
                sink.info(format!("🎉 {} finished", request.kind())).await;
                sink.emit(ProgressEvent::completed(payload)).await;
                info!("✅ Session {} completed", request.session_id);
                SessionStatus::Completed
            }
            Err(PipelineError::Cancelled) => {
                info!("🛑 Session {} stopped while {}", request.session_id, stage);
                SessionStatus::Cancelled
            }
            Err(e) => {
                error!("❌ Session {} failed while {}: {}", request.session_id, stage, e);
                sink.error(format!("Failed while {}: {}", stage, e)).await;
                sink.warning(e.guidance().to_string()).await;

                let mut payload = e.to_payload();
                payload["stage"] = json!(stage.to_string());
                sink.emit(ProgressEvent::failed(payload)).await;
                SessionStatus::Failed
            }
        }
    }

    async fn execute(
        &self,
        request: &OperationRequest,
        sink: &dyn ProgressSink,
        cancel: &CancelSignal,
        stage: &mut PipelineStage,
    ) -> Result<Value, PipelineError> {
        advance(stage, PipelineStage::Authenticating, cancel)?;
        sink.info("🔐 Signing in to the management API...".to_string()).await;

        let mut signal = cancel.clone();
        let credential = tokio::select! {
            result = self.authenticator.authenticate(sink) => result?,
            _ = signal.cancelled() => return Err(PipelineError::Cancelled),
        };
        sink.info("Signed in".to_string()).await;

        advance(stage, PipelineStage::ResolvingSubscription, cancel)?;
        let subscription_id = self.resolve_subscription(&credential, sink).await?;
        sink.info(format!("Using subscription {}", subscription_id)).await;

        let mut run = Run {
            api: self.api.as_ref(),
            config: &self.config,
            sink,
            cancel,
            stage,
            credential,
            subscription_id,
            versions: ApiVersionResolver::new(),
        };

        let payload = match &request.operation {
            Operation::InitialSetup(payload) => run.initial_setup(payload).await?,
            Operation::CicdSetup(payload) => run.cicd_setup(payload).await?,
            Operation::ImageDeploy(payload) => run.image_deploy(payload).await?,
        };

        *run.stage = PipelineStage::Completed;
        Ok(payload)
    }

    /// Configured subscription, or the first enabled one the account can see.
    async fn resolve_subscription(
        &self,
        credential: &Credential,
        sink: &dyn ProgressSink,
    ) -> Result<String, ProvisionError> {
        if let Some(id) = self.config.subscription_id.as_deref().filter(|id| !id.is_empty()) {
            return Ok(id.to_string());
        }

        sink.command(format!("GET /subscriptions?api-version={}", SUBSCRIPTIONS_API_VERSION))
            .await;
        let response = self
            .api
            .get(credential, "/subscriptions", SUBSCRIPTIONS_API_VERSION)
            .await?;
        if !response.is_success() {
            return Err(response.into_error("GET", "/subscriptions"));
        }

        response.body["value"]
            .as_array()
            .ok_or_else(|| ProvisionError::malformed("/subscriptions", "missing subscription list"))?
            .iter()
            .find(|s| s["state"].as_str() == Some("Enabled"))
            .and_then(|s| s["subscriptionId"].as_str())
            .map(str::to_string)
            .ok_or(ProvisionError::NoSubscription)
    }
}

/// Move to `next`, stopping first if cancellation was requested.
fn advance(
    stage: &mut PipelineStage,
    next: PipelineStage,
    cancel: &CancelSignal,
) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }
    *stage = next;
    Ok(())
}

/// State of one authenticated run.
struct Run<'a> {
    api: &'a dyn ManagementApi,
    config: &'a ProvisionConfig,
    sink: &'a dyn ProgressSink,
    cancel: &'a CancelSignal,
    stage: &'a mut PipelineStage,
    credential: Credential,
    subscription_id: String,
    versions: ApiVersionResolver,
}

impl Run<'_> {
    fn enter(&mut self, next: PipelineStage) -> Result<(), PipelineError> {
        advance(self.stage, next, self.cancel)
    }

    async fn api_version(&mut self, kind: ResourceKind) -> String {
        self.versions
            .resolve(self.api, &self.credential, &self.subscription_id, kind)
            .await
    }

    /// Ensure one resource in the current stage.
    async fn ensure(&mut self, descriptor: &ResourceDescriptor) -> Result<Ensured, PipelineError> {
        let version = self.api_version(descriptor.kind).await;
        self.sink
            .command(format!(
                "ensure {} {} (api-version {})",
                descriptor.kind.label(),
                descriptor.canonical_path(),
                version
            ))
            .await;

        let ensured = ResourceEnsurer::new(self.api, &self.credential)
            .ensure(descriptor, &version)
            .await?;

        if ensured.was_created() {
            self.sink
                .info(format!("✅ Created {} '{}'", descriptor.kind.label(), descriptor.name))
                .await;
        } else {
            self.sink
                .info(format!(
                    "{} '{}' already exists, reusing it",
                    descriptor.kind.label(),
                    descriptor.name
                ))
                .await;
        }
        Ok(ensured)
    }

    async fn create(&mut self, descriptor: ResourceDescriptor) -> Result<Ensured, PipelineError> {
        self.enter(PipelineStage::CreatingResources(descriptor.kind))?;
        self.ensure(&descriptor).await
    }

    /// Resolve the image, degrading to the placeholder when nothing usable was sent.
    async fn resolve_image(&mut self, source: &ImageSource) -> Result<ResolvedImage, PipelineError> {
        self.enter(PipelineStage::ResolvingImage)?;
        let image = match resolve_image(source, &self.config.image_registry) {
            Ok(image) => {
                self.sink
                    .info(format!("Using image {} (from {})", image.reference, image.tier))
                    .await;
                image
            }
            Err(e) => {
                let image = ResolvedImage::placeholder(self.config);
                warn!("Image resolution degraded to placeholder: {}", e);
                self.sink
                    .warning(format!(
                        "No usable image reference ({}); deploying placeholder {}",
                        e, image.reference
                    ))
                    .await;
                image
            }
        };
        Ok(image)
    }

    async fn initial_setup(&mut self, payload: &InitialSetupPayload) -> Result<Value, PipelineError> {
        let image = self.resolve_image(&payload.image).await?;
        let subscription_id = self.subscription_id.clone();

        let group = self
            .create(resources::resource_group(
                &subscription_id,
                &payload.resource_group,
                &payload.location,
            ))
            .await?;

        let environment = self
            .create(resources::managed_environment(
                &subscription_id,
                &payload.resource_group,
                &payload.environment_name,
                &payload.location,
            ))
            .await?;

        let app = self
            .create(resources::container_app(
                &subscription_id,
                &payload.resource_group,
                &payload.app_name,
                &payload.location,
                &environment.id(),
                &image,
                self.config,
            ))
            .await?;
        if !app.was_created() {
            self.sink
                .info("The existing app keeps its current image. Run an image deploy to roll out a new one.".to_string())
                .await;
        }

        let endpoint = endpoint_of(&app.resource);
        if let Some(url) = &endpoint {
            self.sink.info(format!("🌐 App endpoint: {}", url)).await;
        }

        Ok(json!({
            "subscriptionId": subscription_id,
            "resourceGroup": group.id(),
            "environmentId": environment.id(),
            "appId": app.id(),
            "image": image.reference,
            "imageTier": image.tier.as_str(),
            "targetPort": image.target_port(self.config),
            "endpoint": endpoint,
            "appCreated": app.was_created(),
        }))
    }

    async fn cicd_setup(&mut self, payload: &CicdSetupPayload) -> Result<Value, PipelineError> {
        let subscription_id = self.subscription_id.clone();

        let group = self
            .create(resources::resource_group(
                &subscription_id,
                &payload.resource_group,
                &payload.location,
            ))
            .await?;

        let identity_name = format!("{}{}", payload.app_name, self.config.identity_suffix);
        let identity = self
            .create(resources::managed_identity(
                &subscription_id,
                &payload.resource_group,
                &identity_name,
                &payload.location,
            ))
            .await?;
        let principal_id = identity_field(&identity, "principalId")?;
        let client_id = identity_field(&identity, "clientId")?;
        let tenant_id = identity_field(&identity, "tenantId")?;

        self.enter(PipelineStage::AssigningRole)?;
        let scope = resources::resource_group_scope(&subscription_id, &payload.resource_group);
        let version = self.api_version(ResourceKind::RoleAssignment).await;
        self.sink
            .command(format!(
                "assign role {} to {} on {}",
                self.config.role_definition_id, principal_id, scope
            ))
            .await;
        let assignment = RoleAssignmentResolver::new(self.api, &self.credential, &subscription_id, &version)
            .assign_role(&principal_id, &scope, &self.config.role_definition_id)
            .await?;
        if assignment.already_existed {
            self.sink.info("Role assignment already in place".to_string()).await;
        } else {
            self.sink
                .info(format!("✅ Role assigned at {} level", assignment.tier))
                .await;
        }

        self.enter(PipelineStage::RegisteringFederatedCredential)?;
        let branch = payload
            .branch
            .clone()
            .unwrap_or_else(|| self.config.default_branch.clone());
        let subject = resources::federated_subject(&payload.owner, &payload.repo, &branch);
        let credential_name = resources::federated_credential_name(&payload.repo, &branch);
        let federated = resources::federated_credential(
            &identity.id(),
            &credential_name,
            &subject,
            self.config,
        );
        self.ensure(&federated).await?;

        self.sink
            .info("Store clientId, tenantId and subscriptionId as repository variables for the deploy workflow".to_string())
            .await;

        Ok(json!({
            "clientId": client_id,
            "tenantId": tenant_id,
            "subscriptionId": subscription_id,
            "principalId": principal_id,
            "identityId": identity.id(),
            "resourceGroup": group.id(),
            "federatedSubject": subject,
            "roleAssignmentTier": assignment.tier.to_string(),
        }))
    }

    async fn image_deploy(&mut self, payload: &ImageDeployPayload) -> Result<Value, PipelineError> {
        let image = self.resolve_image(&payload.image).await?;

        self.enter(PipelineStage::DeployingImage)?;
        let path = resources::container_app_path(
            &self.subscription_id,
            &payload.resource_group,
            &payload.app_name,
        );
        let version = self.api_version(ResourceKind::ComputeApp).await;

        self.sink.command(format!("GET {}?api-version={}", path, version)).await;
        let current = self.api.get(&self.credential, &path, &version).await?;
        if !current.is_success() {
            return Err(current.into_error("GET", &path).into());
        }

        let mut app = current.body;
        let port = image.target_port(self.config);
        match app.pointer_mut("/properties/template/containers/0") {
            Some(container) => container["image"] = json!(image.reference),
            None => {
                return Err(ProvisionError::malformed(&path, "app has no container to update").into())
            }
        }
        if let Some(ingress) = app.pointer_mut("/properties/configuration/ingress") {
            ingress["targetPort"] = json!(port);
        }

        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        self.sink.command(format!("PUT {}?api-version={}", path, version)).await;
        let updated = self.api.put(&self.credential, &path, &version, &app).await?;
        if !updated.is_success() {
            return Err(updated.into_error("PUT", &path).into());
        }
        self.sink
            .info(format!("✅ Deployed {} to '{}'", image.reference, payload.app_name))
            .await;

        let endpoint = endpoint_of(&updated.body).or_else(|| endpoint_of(&app));
        Ok(json!({
            "appId": app["id"].as_str().unwrap_or(&path),
            "image": image.reference,
            "imageTier": image.tier.as_str(),
            "targetPort": port,
            "endpoint": endpoint,
        }))
    }
}

fn endpoint_of(app: &Value) -> Option<String> {
    app.pointer("/properties/configuration/ingress/fqdn")
        .and_then(Value::as_str)
        .filter(|fqdn| !fqdn.is_empty())
        .map(|fqdn| format!("https://{}", fqdn))
}

fn identity_field(identity: &Ensured, field: &str) -> Result<String, ProvisionError> {
    identity.resource["properties"][field]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ProvisionError::malformed(&identity.path, format!("identity has no {}", field)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenAuthenticator;
    use crate::error::AuthError;
    use crate::memory::{InMemoryManagementApi, Method};
    use async_trait::async_trait;
    use stratus_core::{cancel_pair, LogLevel, StatusState};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<ProgressEvent>>,
    }

    impl RecordingSink {
        async fn events(&self) -> Vec<ProgressEvent> {
            self.events.lock().await.clone()
        }

        async fn terminal(&self) -> Vec<ProgressEvent> {
            self.events().await.into_iter().filter(|e| e.is_terminal()).collect()
        }
    }

    #[async_trait]
    impl ProgressSink for RecordingSink {
        async fn emit(&self, event: ProgressEvent) {
            self.events.lock().await.push(event);
        }
    }

    struct FailingAuthenticator;

    #[async_trait]
    impl Authenticator for FailingAuthenticator {
        async fn authenticate(&self, _sink: &dyn ProgressSink) -> Result<Credential, AuthError> {
            Err(AuthError::SignInFailed("user closed the browser".to_string()))
        }
    }

    fn pipeline(api: &InMemoryManagementApi) -> ProvisioningPipeline {
        ProvisioningPipeline::new(
            Arc::new(api.clone()),
            Arc::new(StaticTokenAuthenticator::new("token", "scope")),
            ProvisionConfig::default(),
        )
    }

    fn initial_setup() -> OperationRequest {
        OperationRequest::new(
            "s-1",
            Operation::InitialSetup(InitialSetupPayload {
                resource_group: "rg-widgets".to_string(),
                environment_name: "env-widgets".to_string(),
                app_name: "widgets".to_string(),
                location: "westeurope".to_string(),
                image: ImageSource {
                    github_container_url: Some(
                        "https://github.com/acme/widgets/pkgs/container/widgets-api".to_string(),
                    ),
                    ..ImageSource::default()
                },
            }),
        )
    }

    fn cicd_setup() -> OperationRequest {
        OperationRequest::new(
            "s-2",
            Operation::CicdSetup(CicdSetupPayload {
                app_name: "widgets".to_string(),
                resource_group: "rg-widgets".to_string(),
                location: "westeurope".to_string(),
                owner: "acme".to_string(),
                repo: "widgets".to_string(),
                branch: None,
            }),
        )
    }

    fn completed_data(event: &ProgressEvent) -> Value {
        match event {
            ProgressEvent::Status {
                status: StatusState::Completed,
                data: Some(data),
            } => data.clone(),
            other => panic!("expected completed status, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_initial_setup_creates_resources_in_order() {
        let api = InMemoryManagementApi::new();
        let sink = RecordingSink::default();

        let status = pipeline(&api)
            .run(&initial_setup(), &sink, &CancelSignal::never())
            .await;
        assert_eq!(status, SessionStatus::Completed);

        let puts: Vec<String> = api.puts_matching("").await.into_iter().map(|c| c.path).collect();
        assert_eq!(puts.len(), 3);
        assert!(puts[0].ends_with("/resourcegroups/rg-widgets"));
        assert!(puts[1].ends_with("/managedEnvironments/env-widgets"));
        assert!(puts[2].ends_with("/containerApps/widgets"));

        let events = sink.events().await;
        assert_eq!(events.first(), Some(&ProgressEvent::starting()));
        assert_eq!(sink.terminal().await.len(), 1);

        let data = completed_data(events.last().unwrap());
        assert_eq!(data["image"], "ghcr.io/acme/widgets-api:latest");
        assert_eq!(data["targetPort"], 3000);
        assert_eq!(data["endpoint"], "https://widgets.westeurope.azurecontainerapps.io");
        assert_eq!(data["appCreated"], true);
    }

    #[tokio::test]
    async fn test_rerun_reuses_everything() {
        let api = InMemoryManagementApi::new();
        let pipeline = pipeline(&api);

        pipeline.run(&initial_setup(), &RecordingSink::default(), &CancelSignal::never()).await;
        let sink = RecordingSink::default();
        let status = pipeline.run(&initial_setup(), &sink, &CancelSignal::never()).await;

        assert_eq!(status, SessionStatus::Completed);
        assert_eq!(api.puts_matching("").await.len(), 3);
        let data = completed_data(sink.events().await.last().unwrap());
        assert_eq!(data["appCreated"], false);
    }

    #[tokio::test]
    async fn test_placeholder_when_no_image_source() {
        let api = InMemoryManagementApi::new();
        let sink = RecordingSink::default();
        let mut request = initial_setup();
        if let Operation::InitialSetup(payload) = &mut request.operation {
            payload.image = ImageSource::default();
        }

        let status = pipeline(&api).run(&request, &sink, &CancelSignal::never()).await;
        assert_eq!(status, SessionStatus::Completed);

        let events = sink.events().await;
        assert!(events.iter().any(|e| matches!(e, ProgressEvent::Log { level: LogLevel::Warning, .. })));
        let data = completed_data(events.last().unwrap());
        assert_eq!(data["imageTier"], "placeholder");
        assert_eq!(data["targetPort"], 80);
    }

    #[tokio::test]
    async fn test_fatal_status_aborts_at_current_step() {
        let api = InMemoryManagementApi::new();
        api.script(Method::Put, "/managedenvironments/", 403, json!({ "error": { "code": "AuthorizationFailed" } }), 1)
            .await;
        let sink = RecordingSink::default();

        let status = pipeline(&api).run(&initial_setup(), &sink, &CancelSignal::never()).await;
        assert_eq!(status, SessionStatus::Failed);
        assert!(api.puts_matching("/containerapps/").await.is_empty());

        let terminal = sink.terminal().await;
        assert_eq!(terminal.len(), 1);
        match &terminal[0] {
            ProgressEvent::Status { status: StatusState::Failed, data: Some(data) } => {
                assert_eq!(data["httpStatus"], 403);
                assert_eq!(data["kind"], "provision");
                assert_eq!(data["stage"], "creating managed environment");
                assert!(data["guidance"].as_str().unwrap().contains("Owner"));
            }
            other => panic!("unexpected terminal event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_auth_failure_is_fatal() {
        let api = InMemoryManagementApi::new();
        let sink = RecordingSink::default();
        let pipeline = ProvisioningPipeline::new(
            Arc::new(api.clone()),
            Arc::new(FailingAuthenticator),
            ProvisionConfig::default(),
        );

        let status = pipeline.run(&initial_setup(), &sink, &CancelSignal::never()).await;
        assert_eq!(status, SessionStatus::Failed);
        assert!(api.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_cicd_setup_wires_identity_and_trust() {
        let api = InMemoryManagementApi::new();
        let sink = RecordingSink::default();

        let status = pipeline(&api).run(&cicd_setup(), &sink, &CancelSignal::never()).await;
        assert_eq!(status, SessionStatus::Completed);

        let data = completed_data(sink.events().await.last().unwrap());
        assert!(data["clientId"].is_string());
        assert!(data["tenantId"].is_string());
        assert_eq!(data["subscriptionId"], "00000000-0000-0000-0000-000000000000");
        assert_eq!(data["federatedSubject"], "repo:acme/widgets:ref:refs/heads/main");
        assert_eq!(data["roleAssignmentTier"], "subscription");

        let identity = api.puts_matching("/userassignedidentities/widgets-deployer").await;
        assert!(!identity.is_empty());

        let federated = api.puts_matching("/federatedidentitycredentials/").await;
        assert_eq!(federated.len(), 1);
        let body = federated[0].body.as_ref().unwrap();
        assert_eq!(body["properties"]["issuer"], "https://token.actions.githubusercontent.com");
        assert_eq!(body["properties"]["audiences"][0], "api://AzureADTokenExchange");
    }

    #[tokio::test]
    async fn test_cicd_setup_rerun_tolerates_existing_role() {
        let api = InMemoryManagementApi::new();
        let pipeline = pipeline(&api);
        pipeline.run(&cicd_setup(), &RecordingSink::default(), &CancelSignal::never()).await;

        let sink = RecordingSink::default();
        let status = pipeline.run(&cicd_setup(), &sink, &CancelSignal::never()).await;
        assert_eq!(status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_image_deploy_replaces_image() {
        let api = InMemoryManagementApi::new();
        let pipeline = pipeline(&api);
        let mut setup = initial_setup();
        if let Operation::InitialSetup(payload) = &mut setup.operation {
            payload.image = ImageSource::default();
        }
        pipeline.run(&setup, &RecordingSink::default(), &CancelSignal::never()).await;

        let deploy = OperationRequest::new(
            "s-3",
            Operation::ImageDeploy(ImageDeployPayload {
                app_name: "widgets".to_string(),
                resource_group: "rg-widgets".to_string(),
                image: ImageSource {
                    owner: Some("acme".to_string()),
                    container_image_name: Some("widgets-api".to_string()),
                    ..ImageSource::default()
                },
            }),
        );
        let sink = RecordingSink::default();
        let status = pipeline.run(&deploy, &sink, &CancelSignal::never()).await;
        assert_eq!(status, SessionStatus::Completed);

        let app = api
            .resource("/subscriptions/00000000-0000-0000-0000-000000000000/resourceGroups/rg-widgets/providers/Microsoft.App/containerApps/widgets")
            .await
            .unwrap();
        assert_eq!(
            app["properties"]["template"]["containers"][0]["image"],
            "ghcr.io/acme/widgets-api:latest"
        );
        assert_eq!(app["properties"]["configuration"]["ingress"]["targetPort"], 3000);
    }

    #[tokio::test]
    async fn test_image_deploy_missing_app_fails() {
        let api = InMemoryManagementApi::new();
        let sink = RecordingSink::default();
        let deploy = OperationRequest::new(
            "s-4",
            Operation::ImageDeploy(ImageDeployPayload {
                app_name: "ghost".to_string(),
                resource_group: "rg".to_string(),
                image: ImageSource::default(),
            }),
        );

        let status = pipeline(&api).run(&deploy, &sink, &CancelSignal::never()).await;
        assert_eq!(status, SessionStatus::Failed);
        assert!(api.puts_matching("").await.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_run_emits_no_terminal_status() {
        let api = InMemoryManagementApi::new();
        let sink = RecordingSink::default();
        let (trigger, signal) = cancel_pair();
        trigger.trigger();

        let status = pipeline(&api).run(&initial_setup(), &sink, &signal).await;
        assert_eq!(status, SessionStatus::Cancelled);
        assert!(sink.terminal().await.is_empty());
        assert!(api.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_configured_subscription_skips_listing() {
        let api = InMemoryManagementApi::with_subscriptions(vec![]);
        let config = ProvisionConfig {
            subscription_id: Some("sub-9".to_string()),
            ..ProvisionConfig::default()
        };
        let pipeline = ProvisioningPipeline::new(
            Arc::new(api.clone()),
            Arc::new(StaticTokenAuthenticator::new("token", "scope")),
            config,
        );

        let status = pipeline
            .run(&initial_setup(), &RecordingSink::default(), &CancelSignal::never())
            .await;
        assert_eq!(status, SessionStatus::Completed);
        assert!(api.calls().await.iter().all(|c| c.path != "/subscriptions"));
    }

    #[tokio::test]
    async fn test_no_enabled_subscription() {
        let api = InMemoryManagementApi::with_subscriptions(vec![]);
        let sink = RecordingSink::default();
        let status = pipeline(&api).run(&initial_setup(), &sink, &CancelSignal::never()).await;
        assert_eq!(status, SessionStatus::Failed);
    }
}
