//! In-memory management API.
//!
//! Backs dry runs and tests. Paths are matched case-insensitively, the way the
//! real API treats them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use stratus_core::Credential;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::client::{ApiResponse, ManagementApi};
use crate::error::Result;

const ROLE_ASSIGNMENTS: &str = "/providers/microsoft.authorization/roleassignments/";

/// HTTP method of a recorded or scripted call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
}

/// A call the fake received.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub api_version: String,
    pub body: Option<Value>,
}

/// A canned answer that takes precedence over the simulated behavior.
#[derive(Debug, Clone)]
struct ScriptedResponse {
    method: Method,
    path_fragment: String,
    response: ApiResponse,
    remaining: usize,
}

/// Simulated management API holding resources by path.
#[derive(Clone)]
pub struct InMemoryManagementApi {
    /// Stored resources: lowercase path -> resource body.
    resources: Arc<RwLock<HashMap<String, Value>>>,

    /// Subscriptions returned by the subscription listing.
    subscriptions: Vec<String>,

    /// Scripted answers, consumed in order.
    scripted: Arc<RwLock<Vec<ScriptedResponse>>>,

    /// Every call received.
    calls: Arc<RwLock<Vec<RecordedCall>>>,
}

impl InMemoryManagementApi {
    /// Create an empty cloud with one enabled subscription.
    pub fn new() -> Self {
        Self::with_subscriptions(vec!["00000000-0000-0000-0000-000000000000".to_string()])
    }

    pub fn with_subscriptions(subscriptions: Vec<String>) -> Self {
        Self {
            resources: Arc::new(RwLock::new(HashMap::new())),
            subscriptions,
            scripted: Arc::new(RwLock::new(Vec::new())),
            calls: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Answer the next `times` calls matching `method` and containing `path_fragment`
    /// with the given status and body.
    pub async fn script(
        &self,
        method: Method,
        path_fragment: impl Into<String>,
        status: u16,
        body: Value,
        times: usize,
    ) {
        let mut scripted = self.scripted.write().await;
        scripted.push(ScriptedResponse {
            method,
            path_fragment: path_fragment.into().to_lowercase(),
            response: ApiResponse::new(status, body),
            remaining: times,
        });
    }

    /// Seed a resource as if it had been created earlier.
    pub async fn insert(&self, path: &str, body: Value) {
        let mut resources = self.resources.write().await;
        resources.insert(path.to_lowercase(), body);
    }

    pub async fn resource(&self, path: &str) -> Option<Value> {
        let resources = self.resources.read().await;
        resources.get(&path.to_lowercase()).cloned()
    }

    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.read().await.clone()
    }

    /// Write calls whose path contains `fragment`.
    pub async fn puts_matching(&self, fragment: &str) -> Vec<RecordedCall> {
        let fragment = fragment.to_lowercase();
        self.calls
            .read()
            .await
            .iter()
            .filter(|c| c.method == Method::Put && c.path.to_lowercase().contains(&fragment))
            .cloned()
            .collect()
    }

    async fn record(&self, method: Method, path: &str, api_version: &str, body: Option<&Value>) {
        let mut calls = self.calls.write().await;
        calls.push(RecordedCall {
            method,
            path: path.to_string(),
            api_version: api_version.to_string(),
            body: body.cloned(),
        });
    }

    async fn take_scripted(&self, method: Method, path: &str) -> Option<ApiResponse> {
        let path = path.to_lowercase();
        let mut scripted = self.scripted.write().await;
        let entry = scripted
            .iter_mut()
            .find(|s| s.method == method && s.remaining > 0 && path.contains(&s.path_fragment))?;
        entry.remaining -= 1;
        Some(entry.response.clone())
    }

    fn list_subscriptions(&self) -> ApiResponse {
        let value: Vec<Value> = self
            .subscriptions
            .iter()
            .map(|id| {
                json!({
                    "id": format!("/subscriptions/{}", id),
                    "subscriptionId": id,
                    "displayName": "In-memory subscription",
                    "state": "Enabled",
                })
            })
            .collect();
        ApiResponse::new(200, json!({ "value": value }))
    }

    async fn put_role_assignment(&self, key: String, path: &str, body: &Value) -> ApiResponse {
        let mut resources = self.resources.write().await;

        let scope = effective_scope(path, body);
        let principal = body.pointer("/properties/principalId").cloned();
        let role = body.pointer("/properties/roleDefinitionId").cloned();

        let duplicate = resources.iter().any(|(existing_path, existing)| {
            existing_path.contains(ROLE_ASSIGNMENTS)
                && effective_scope(existing_path, existing) == scope
                && existing.pointer("/properties/principalId").cloned() == principal
                && existing.pointer("/properties/roleDefinitionId").cloned() == role
        });
        if duplicate {
            return ApiResponse::new(
                409,
                json!({ "error": { "code": "RoleAssignmentExists", "message": "The role assignment already exists." } }),
            );
        }

        let mut stored = body.clone();
        stored["id"] = json!(path);
        stored["name"] = json!(last_segment(path));
        resources.insert(key, stored.clone());
        ApiResponse::new(201, stored)
    }
}

impl Default for InMemoryManagementApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ManagementApi for InMemoryManagementApi {
    async fn get(
        &self,
        _credential: &Credential,
        path: &str,
        api_version: &str,
    ) -> Result<ApiResponse> {
        self.record(Method::Get, path, api_version, None).await;

        if let Some(response) = self.take_scripted(Method::Get, path).await {
            return Ok(response);
        }

        if path.eq_ignore_ascii_case("/subscriptions") {
            return Ok(self.list_subscriptions());
        }

        let resources = self.resources.read().await;
        Ok(match resources.get(&path.to_lowercase()) {
            Some(body) => ApiResponse::new(200, body.clone()),
            None => not_found(path),
        })
    }

    async fn put(
        &self,
        _credential: &Credential,
        path: &str,
        api_version: &str,
        body: &Value,
    ) -> Result<ApiResponse> {
        self.record(Method::Put, path, api_version, Some(body)).await;

        if let Some(response) = self.take_scripted(Method::Put, path).await {
            return Ok(response);
        }

        let key = path.to_lowercase();
        if key.contains(ROLE_ASSIGNMENTS) {
            return Ok(self.put_role_assignment(key, path, body).await);
        }

        let mut resources = self.resources.write().await;
        let previous = resources.get(&key).cloned();
        let stored = materialize(path, body, previous.as_ref());
        resources.insert(key, stored.clone());

        let status = if previous.is_some() { 200 } else { 201 };
        Ok(ApiResponse::new(status, stored))
    }
}

fn not_found(path: &str) -> ApiResponse {
    ApiResponse::new(
        404,
        json!({
            "error": {
                "code": "ResourceNotFound",
                "message": format!("The resource '{}' was not found.", path),
            }
        }),
    )
}

fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn effective_scope(path: &str, body: &Value) -> String {
    if let Some(scope) = body.pointer("/properties/scope").and_then(Value::as_str) {
        return scope.to_lowercase();
    }
    let lower = path.to_lowercase();
    match lower.find(ROLE_ASSIGNMENTS) {
        Some(index) => lower[..index].to_string(),
        None => lower,
    }
}

/// Fill in the read-only fields the real API would return.
fn materialize(path: &str, body: &Value, previous: Option<&Value>) -> Value {
    let mut stored = body.clone();
    if !stored.is_object() {
        stored = json!({});
    }
    let name = last_segment(path).to_string();
    stored["id"] = json!(path);
    stored["name"] = json!(name);
    if !stored["properties"].is_object() {
        stored["properties"] = json!({});
    }
    stored["properties"]["provisioningState"] = json!("Succeeded");

    let lower = path.to_lowercase();
    if lower.contains("/userassignedidentities/") && !lower.contains("/federatedidentitycredentials/") {
        for field in ["principalId", "clientId", "tenantId"] {
            let kept = previous
                .and_then(|p| p.pointer(&format!("/properties/{}", field)))
                .cloned()
                .unwrap_or_else(|| json!(Uuid::new_v4().to_string()));
            stored["properties"][field] = kept;
        }
    }

    if lower.contains("/containerapps/") && stored.pointer("/properties/configuration/ingress").is_some() {
        let location = body["location"]
            .as_str()
            .unwrap_or("local")
            .to_lowercase()
            .replace(' ', "");
        stored["properties"]["configuration"]["ingress"]["fqdn"] =
            json!(format!("{}.{}.azurecontainerapps.io", name, location));
    }

    stored
}
