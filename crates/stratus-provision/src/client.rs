//! Cloud management API client.
//!
//! The client is stateless: the credential travels with every call and no
//! business rule lives here.

use async_trait::async_trait;
use serde_json::Value;
use stratus_core::Credential;
use tracing::debug;

use crate::error::{ProvisionError, Result};

/// Status and decoded body of a management call.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_conflict(&self) -> bool {
        self.status == 409
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    /// Body rendered for error messages.
    pub fn body_text(&self) -> String {
        match &self.body {
            Value::Null => String::new(),
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }

    /// Convert into a fatal error for the given call.
    pub fn into_error(self, method: &str, path: &str) -> ProvisionError {
        ProvisionError::Http {
            method: method.to_string(),
            path: path.to_string(),
            status: self.status,
            body: self.body_text(),
        }
    }
}

/// Minimal surface of the management API the pipeline needs.
///
/// Non-2xx answers are returned as [`ApiResponse`]s; only transport failures
/// are errors, so callers decide which statuses are benign.
#[async_trait]
pub trait ManagementApi: Send + Sync {
    /// Read a resource or collection.
    async fn get(&self, credential: &Credential, path: &str, api_version: &str)
        -> Result<ApiResponse>;

    /// Create or replace a resource.
    async fn put(
        &self,
        credential: &Credential,
        path: &str,
        api_version: &str,
        body: &Value,
    ) -> Result<ApiResponse>;
}

/// [`ManagementApi`] over HTTPS.
#[derive(Clone)]
pub struct HttpManagementApi {
    /// Base URL of the management endpoint.
    base_url: String,

    /// HTTP client.
    http_client: reqwest::Client,
}

impl HttpManagementApi {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client: reqwest::Client::builder()
                .user_agent(concat!("stratus/", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send(&self, request: reqwest::RequestBuilder, path: &str) -> Result<ApiResponse> {
        let response = request.send().await.map_err(|e| ProvisionError::Transport {
            path: path.to_string(),
            message: e.to_string(),
        })?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| ProvisionError::Transport {
            path: path.to_string(),
            message: e.to_string(),
        })?;

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        debug!(path, status, "management call finished");
        Ok(ApiResponse { status, body })
    }
}

#[async_trait]
impl ManagementApi for HttpManagementApi {
    async fn get(
        &self,
        credential: &Credential,
        path: &str,
        api_version: &str,
    ) -> Result<ApiResponse> {
        let url = format!("{}{}", self.base_url, path);
        let request = self
            .http_client
            .get(&url)
            .query(&[("api-version", api_version)])
            .bearer_auth(&credential.token);

        self.send(request, path).await
    }

    async fn put(
        &self,
        credential: &Credential,
        path: &str,
        api_version: &str,
        body: &Value,
    ) -> Result<ApiResponse> {
        let url = format!("{}{}", self.base_url, path);
        let request = self
            .http_client
            .put(&url)
            .query(&[("api-version", api_version)])
            .bearer_auth(&credential.token)
            .json(body);

        self.send(request, path).await
    }
}
