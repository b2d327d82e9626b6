//! Typed workflow document model.
//!
//! Field names mirror the authoring format (`runs-on`, `timeout-minutes`,
//! `continue-on-error`); interval fields accept humantime strings like
//! `1s` or `250ms`. The model is created once per parse and treated as
//! immutable afterwards; rendered copies are produced by expression
//! substitution at execution time.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;

/// Pool assigned to jobs that do not declare `runs-on`.
pub const DEFAULT_POOL: &str = "default";

/// Hard ceiling on a matrix's cartesian-product size, enforced by
/// validation and re-checked at expansion time.
pub const MAX_MATRIX_COMBINATIONS: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    #[serde(default, rename = "on")]
    pub trigger: Option<JsonValue>,
    #[serde(default)]
    pub vars: IndexMap<String, JsonValue>,
    #[serde(default)]
    pub env: IndexMap<String, String>,
    pub jobs: IndexMap<String, Job>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    #[serde(default = "default_pool", rename = "runs-on")]
    pub runs_on: String,
    #[serde(default, rename = "timeout-minutes")]
    pub timeout_minutes: Option<u64>,
    #[serde(default)]
    pub needs: Vec<String>,
    #[serde(default, rename = "if")]
    pub condition: Option<String>,
    #[serde(default)]
    pub strategy: Option<Strategy>,
    #[serde(default)]
    pub env: IndexMap<String, String>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default, rename = "continue-on-error")]
    pub continue_on_error: bool,
    #[serde(default)]
    pub outputs: IndexMap<String, String>,
}

fn default_pool() -> String {
    DEFAULT_POOL.to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Strategy {
    #[serde(default)]
    pub matrix: IndexMap<String, Vec<JsonValue>>,
    #[serde(default, rename = "max-parallel")]
    pub max_parallel: usize,
    #[serde(default, rename = "fail-fast")]
    pub fail_fast: Option<bool>,
    // Reserved: present in the authoring format but unsupported, and
    // rejected by semantic validation rather than silently ignored.
    #[serde(default)]
    pub include: Option<JsonValue>,
    #[serde(default)]
    pub exclude: Option<JsonValue>,
}

impl Strategy {
    /// Fail-fast is a tri-state in the document; unset means on.
    pub fn fail_fast(&self) -> bool {
        self.fail_fast.unwrap_or(true)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub uses: String,
    #[serde(default)]
    pub with: IndexMap<String, JsonValue>,
    #[serde(default, rename = "timeout-minutes")]
    pub timeout_minutes: Option<u64>,
    #[serde(default, rename = "continue-on-error")]
    pub continue_on_error: bool,
    #[serde(default, rename = "if")]
    pub condition: Option<String>,
    #[serde(default, rename = "retry-strategy")]
    pub retry_strategy: Option<RetryStrategy>,
    #[serde(default)]
    pub env: IndexMap<String, String>,
}

impl Step {
    /// Human-readable handle: the declared id, else the position.
    pub fn display_id(&self, index: usize) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| format!("#{index}"))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryStrategy {
    #[serde(default, rename = "max-attempts")]
    pub max_attempts: Option<u32>,
    #[serde(default, rename = "initial-interval", with = "humantime_serde::option")]
    pub initial_interval: Option<Duration>,
    #[serde(default, rename = "backoff-coefficient")]
    pub backoff_coefficient: Option<f64>,
    #[serde(default, rename = "max-interval", with = "humantime_serde::option")]
    pub max_interval: Option<Duration>,
}
