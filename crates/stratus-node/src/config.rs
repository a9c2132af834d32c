//! Node configuration from `STRATUS_*` environment variables.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use stratus_provision::ProvisionConfig;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {name}: '{value}' ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// How pipeline runs obtain their management token.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMode {
    /// Sign in through the cloud CLI for every run.
    AzureCli { program: String, interactive: bool },
    /// Use a pre-issued token.
    StaticToken(String),
}

impl fmt::Debug for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMode::AzureCli {
                program,
                interactive,
            } => f
                .debug_struct("AzureCli")
                .field("program", program)
                .field("interactive", interactive)
                .finish(),
            AuthMode::StaticToken(_) => f.write_str("StaticToken(<redacted>)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bind_addr: SocketAddr,
    /// Provision against an in-memory cloud instead of the real API.
    pub dry_run: bool,
    pub auth: AuthMode,
    pub auth_timeout: Duration,
    pub provision: ProvisionConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            dry_run: false,
            auth: AuthMode::AzureCli {
                program: "az".to_string(),
                interactive: true,
            },
            auth_timeout: Duration::from_secs(300),
            provision: ProvisionConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable source. Unset or blank variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(addr) = var("STRATUS_BIND") {
            config.bind_addr = parse("STRATUS_BIND", &addr)?;
        }
        if let Some(flag) = var("STRATUS_DRY_RUN") {
            config.dry_run = parse_flag("STRATUS_DRY_RUN", &flag)?;
        }

        let program = var("STRATUS_AZ_PROGRAM").unwrap_or_else(|| "az".to_string());
        let reuse_login = match var("STRATUS_REUSE_LOGIN") {
            Some(flag) => parse_flag("STRATUS_REUSE_LOGIN", &flag)?,
            None => false,
        };
        config.auth = match var("STRATUS_ACCESS_TOKEN") {
            Some(token) => AuthMode::StaticToken(token),
            None => AuthMode::AzureCli {
                program,
                interactive: !reuse_login,
            },
        };

        if let Some(secs) = var("STRATUS_AUTH_TIMEOUT_SECS") {
            config.auth_timeout = Duration::from_secs(parse("STRATUS_AUTH_TIMEOUT_SECS", &secs)?);
        }

        let provision = &mut config.provision;
        if let Some(endpoint) = var("STRATUS_MANAGEMENT_ENDPOINT") {
            provision.management_endpoint = endpoint;
        }
        provision.subscription_id = var("STRATUS_SUBSCRIPTION_ID");
        if let Some(registry) = var("STRATUS_IMAGE_REGISTRY") {
            provision.image_registry = registry;
        }
        if let Some(port) = var("STRATUS_APP_PORT") {
            provision.app_target_port = parse("STRATUS_APP_PORT", &port)?;
        }
        if let Some(image) = var("STRATUS_PLACEHOLDER_IMAGE") {
            provision.placeholder_image = image;
        }
        if let Some(replicas) = var("STRATUS_MAX_REPLICAS") {
            provision.max_replicas = parse("STRATUS_MAX_REPLICAS", &replicas)?;
        }

        Ok(config)
    }
}

fn parse<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_flag(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}
