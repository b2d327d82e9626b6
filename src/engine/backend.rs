//! Execution backend boundary.
//!
//! The engine decides whether, when and with what inputs a step runs; the
//! backend owns actually running it, including enforcement of the resolved
//! timeout and retry policy. [`LocalBackend`] is the in-process
//! implementation used by the CLI; a durable implementation would hand the
//! same invocation to an external scheduler.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::retry::RetryPolicy;
use crate::error::{Error, Result};

/// Everything the backend needs to run one step attempt: identity for
/// diagnostics, the rendered parameters, and the env overlay.
#[derive(Debug, Clone)]
pub struct StepInvocation {
    pub workflow: String,
    pub job: String,
    pub step: String,
    pub uses: String,
    pub params: IndexMap<String, JsonValue>,
    pub env: IndexMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Success,
    Failure,
}

/// What came back from the backend: terminal status, the raw emitted lines
/// (scanned for the output protocol by the caller), and attempt accounting.
#[derive(Debug, Clone)]
pub struct StepExecution {
    pub status: StepStatus,
    pub lines: Vec<String>,
    pub error: Option<String>,
    pub attempts: u32,
}

#[async_trait]
pub trait StepBackend: Send + Sync {
    /// Run a step to a terminal state, enforcing `timeout` per attempt and
    /// `retry` across attempts. Cancellation is polled between attempts,
    /// never forced mid-attempt.
    async fn execute(
        &self,
        invocation: StepInvocation,
        timeout: Duration,
        retry: RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<StepExecution>;
}

/// Runs registered nodes in-process.
#[derive(Debug, Default)]
pub struct LocalBackend;

impl LocalBackend {
    pub fn new() -> Self {
        Self
    }

    async fn run_node(&self, invocation: &StepInvocation) -> Result<StepExecution> {
        match invocation.uses.as_str() {
            "shell@v1" => self.run_shell(invocation).await,
            "echo@v1" => {
                let message = string_param(invocation, "message")?;
                Ok(StepExecution {
                    status: StepStatus::Success,
                    lines: message.lines().map(str::to_string).collect(),
                    error: None,
                    attempts: 1,
                })
            }
            other => Err(Error::NodeNotRegistered(other.to_string())),
        }
    }

    async fn run_shell(&self, invocation: &StepInvocation) -> Result<StepExecution> {
        let run = string_param(invocation, "run")?;
        let shell = match invocation.params.get("shell") {
            Some(JsonValue::String(s)) => s.clone(),
            _ => "sh".to_string(),
        };
        let output = Command::new(&shell)
            .arg("-c")
            .arg(&run)
            .envs(invocation.env.iter())
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| Error::Execution(format!("failed to spawn {shell}: {err}")))?;

        let lines = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect();
        if output.status.success() {
            Ok(StepExecution {
                status: StepStatus::Success,
                lines,
                error: None,
                attempts: 1,
            })
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Ok(StepExecution {
                status: StepStatus::Failure,
                lines,
                error: Some(format!(
                    "exit status {}: {}",
                    output.status.code().unwrap_or(-1),
                    stderr.trim()
                )),
                attempts: 1,
            })
        }
    }
}

#[async_trait]
impl StepBackend for LocalBackend {
    async fn execute(
        &self,
        invocation: StepInvocation,
        timeout: Duration,
        retry: RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<StepExecution> {
        let mut attempt: u32 = 1;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let outcome = tokio::time::timeout(timeout, self.run_node(&invocation)).await;
            match outcome {
                Err(_elapsed) => {
                    if attempt < retry.max_attempts {
                        warn!(
                            job = %invocation.job,
                            step = %invocation.step,
                            attempt,
                            "attempt timed out, retrying"
                        );
                    } else {
                        return Err(Error::StepTimeout {
                            job: invocation.job.clone(),
                            step: invocation.step.clone(),
                            minutes: timeout.as_secs() / 60,
                        });
                    }
                }
                Ok(Err(err)) => {
                    if err.is_retryable() && attempt < retry.max_attempts {
                        warn!(
                            job = %invocation.job,
                            step = %invocation.step,
                            attempt,
                            error = %err,
                            "attempt failed, retrying"
                        );
                    } else {
                        return Err(err);
                    }
                }
                Ok(Ok(mut execution)) => {
                    execution.attempts = attempt;
                    if execution.status == StepStatus::Failure && attempt < retry.max_attempts {
                        debug!(
                            job = %invocation.job,
                            step = %invocation.step,
                            attempt,
                            "attempt concluded failure, retrying"
                        );
                    } else {
                        return Ok(execution);
                    }
                }
            }

            let backoff = retry.interval_for_attempt(attempt - 1);
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = cancel.cancelled() => return Err(Error::Cancelled),
            }
            attempt += 1;
        }
    }
}

fn string_param(invocation: &StepInvocation, name: &str) -> Result<String> {
    match invocation.params.get(name) {
        Some(JsonValue::String(s)) => Ok(s.clone()),
        Some(other) => Err(Error::Configuration(format!(
            "node '{}' parameter '{name}' must be a string, got {other}",
            invocation.uses
        ))),
        None => Err(Error::Configuration(format!(
            "node '{}' is missing parameter '{name}'",
            invocation.uses
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn invocation(uses: &str, params: &[(&str, JsonValue)]) -> StepInvocation {
        StepInvocation {
            workflow: "ci".to_string(),
            job: "build".to_string(),
            step: "#0".to_string(),
            uses: uses.to_string(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            env: IndexMap::new(),
        }
    }

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: attempts,
            initial_interval: Duration::from_millis(1),
            backoff_coefficient: 1.0,
            max_interval: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_echo_node_emits_lines() {
        let backend = LocalBackend::new();
        let execution = backend
            .execute(
                invocation("echo@v1", &[("message", json!("hello"))]),
                Duration::from_secs(5),
                policy(1),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(execution.status, StepStatus::Success);
        assert_eq!(execution.lines, ["hello"]);
        assert_eq!(execution.attempts, 1);
    }

    #[tokio::test]
    async fn test_shell_failure_retries_until_exhausted() {
        let backend = LocalBackend::new();
        let execution = backend
            .execute(
                invocation("shell@v1", &[("run", json!("exit 3"))]),
                Duration::from_secs(5),
                policy(3),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(execution.status, StepStatus::Failure);
        assert_eq!(execution.attempts, 3);
        assert!(execution.error.unwrap().contains("exit status 3"));
    }

    #[tokio::test]
    async fn test_unregistered_node_not_retried() {
        let backend = LocalBackend::new();
        let err = backend
            .execute(
                invocation("ghost@v1", &[]),
                Duration::from_secs(5),
                policy(5),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NodeNotRegistered(_)));
    }

    #[tokio::test]
    async fn test_timeout_surfaces_after_retries() {
        let backend = LocalBackend::new();
        let err = backend
            .execute(
                invocation("shell@v1", &[("run", json!("sleep 5"))]),
                Duration::from_millis(20),
                policy(2),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StepTimeout { .. }));
    }

    #[tokio::test]
    async fn test_cancellation_checked_before_attempt() {
        let backend = LocalBackend::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = backend
            .execute(
                invocation("echo@v1", &[("message", json!("hi"))]),
                Duration::from_secs(5),
                policy(1),
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn test_set_output_lines_pass_through() {
        let backend = LocalBackend::new();
        let execution = backend
            .execute(
                invocation(
                    "shell@v1",
                    &[("run", json!("echo '::set-output name=version::v1.2.3'"))],
                ),
                Duration::from_secs(5),
                policy(1),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(execution.lines, ["::set-output name=version::v1.2.3"]);
    }
}
