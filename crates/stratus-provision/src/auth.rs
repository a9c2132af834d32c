//! Credential acquisition for one pipeline run.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use stratus_core::{Credential, LogLevel, ProgressEvent, ProgressSink};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::AuthError;

/// Acquires a bearer credential for the management API.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Block until sign-in completes, fails or times out.
    ///
    /// Output of any sign-in tool goes to `sink`.
    async fn authenticate(&self, sink: &dyn ProgressSink) -> Result<Credential, AuthError>;
}

/// Hands out a pre-issued token.
#[derive(Clone)]
pub struct StaticTokenAuthenticator {
    token: String,
    scope: String,
    lifetime: chrono::Duration,
}

impl StaticTokenAuthenticator {
    pub fn new(token: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            scope: scope.into(),
            lifetime: chrono::Duration::hours(1),
        }
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn authenticate(&self, _sink: &dyn ProgressSink) -> Result<Credential, AuthError> {
        if self.token.trim().is_empty() {
            return Err(AuthError::TokenExchange("no access token configured".to_string()));
        }
        Ok(Credential::new(
            self.token.clone(),
            Utc::now() + self.lifetime,
            self.scope.clone(),
        ))
    }
}

/// Signs in through the cloud CLI and exchanges the session for a management token.
///
/// Child processes are killed when the future is dropped, so aborting the
/// owning task also ends an interactive sign-in.
#[derive(Debug, Clone)]
pub struct AzureCliAuthenticator {
    program: String,
    resource: String,
    timeout: Duration,
    interactive: bool,
}

impl AzureCliAuthenticator {
    pub fn new(program: impl Into<String>, resource: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            resource: resource.into(),
            timeout,
            interactive: true,
        }
    }

    /// Skip `az login` and reuse the CLI's current sign-in.
    pub fn reuse_existing_login(mut self) -> Self {
        self.interactive = false;
        self
    }

    /// Run the tool, streaming stderr to `sink` line by line. Stdout is only
    /// streamed when `echo_stdout` is set; token output must stay private.
    async fn run(
        &self,
        args: &[&str],
        sink: &dyn ProgressSink,
        echo_stdout: bool,
    ) -> Result<ToolOutput, AuthError> {
        debug!(program = %self.program, ?args, "running sign-in tool");
        let unavailable = |e: std::io::Error| AuthError::ToolUnavailable {
            program: self.program.clone(),
            message: e.to_string(),
        };

        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(unavailable)?;
        sink.command(format!("{} {}", self.program, args.join(" "))).await;

        let (stdout, stderr) = tokio::join!(
            forward_lines(child.stdout.take(), sink, LogLevel::Stdout, echo_stdout),
            forward_lines(child.stderr.take(), sink, LogLevel::Stderr, true),
        );
        let status = child.wait().await.map_err(unavailable)?;

        Ok(ToolOutput {
            status,
            stdout,
            stderr,
        })
    }

    async fn sign_in_and_exchange(&self, sink: &dyn ProgressSink) -> Result<Credential, AuthError> {
        if self.interactive {
            let login = self
                .run(&["login", "--only-show-errors", "--output", "none"], sink, true)
                .await?;
            if !login.status.success() {
                return Err(AuthError::SignInFailed(login.failure_text()));
            }
            info!("🔐 Interactive sign-in completed");
        }

        let token = self
            .run(
                &[
                    "account",
                    "get-access-token",
                    "--resource",
                    self.resource.as_str(),
                    "--output",
                    "json",
                ],
                sink,
                false,
            )
            .await?;
        if !token.status.success() {
            return Err(AuthError::TokenExchange(token.failure_text()));
        }

        parse_token_output(token.stdout.as_bytes(), &self.resource)
    }
}

#[async_trait]
impl Authenticator for AzureCliAuthenticator {
    async fn authenticate(&self, sink: &dyn ProgressSink) -> Result<Credential, AuthError> {
        tokio::time::timeout(self.timeout, self.sign_in_and_exchange(sink))
            .await
            .map_err(|_| AuthError::TimedOut(self.timeout.as_secs()))?
    }
}

struct ToolOutput {
    status: ExitStatus,
    stdout: String,
    stderr: String,
}

impl ToolOutput {
    fn failure_text(&self) -> String {
        let text = self.stderr.trim();
        if text.is_empty() {
            format!("exited with {}", self.status)
        } else {
            text.to_string()
        }
    }
}

async fn forward_lines<R>(
    reader: Option<R>,
    sink: &dyn ProgressSink,
    level: LogLevel,
    echo: bool,
) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return String::new();
    };

    let mut captured = String::new();
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if echo && !line.trim().is_empty() {
            sink.emit(ProgressEvent::log(level, line.clone())).await;
        }
        captured.push_str(&line);
        captured.push('\n');
    }
    captured
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenOutput {
    access_token: String,
    /// Local wall-clock time, e.g. `2024-05-01 13:45:10.000000`.
    expires_on: Option<String>,
    /// Unix epoch seconds, present on newer CLI versions.
    #[serde(rename = "expires_on")]
    expires_on_epoch: Option<i64>,
}

/// Parse the JSON printed by `az account get-access-token`.
pub(crate) fn parse_token_output(stdout: &[u8], scope: &str) -> Result<Credential, AuthError> {
    let output: TokenOutput = serde_json::from_slice(stdout)
        .map_err(|e| AuthError::TokenExchange(format!("unreadable token output: {}", e)))?;

    if output.access_token.trim().is_empty() {
        return Err(AuthError::TokenExchange("empty access token".to_string()));
    }

    let expires_at = output
        .expires_on_epoch
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .or_else(|| output.expires_on.as_deref().and_then(parse_local_expiry))
        .unwrap_or_else(|| Utc::now() + chrono::Duration::hours(1));

    Ok(Credential::new(output.access_token, expires_at, scope))
}

fn parse_local_expiry(raw: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .single()
        .map(|local| local.with_timezone(&Utc))
}
